use std::{fmt, str::FromStr};

use log::LevelFilter;

use crate::{
  error::{HeapError, ParsePolicyError},
  tag::{BLOCK_SIZE, CHUNK_SIZE},
};

/// Strategy used to pick a free block for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Policy {
  /// First free block large enough, scanning from the heap start.
  #[default]
  FirstFit,
  /// Like first fit, but the scan resumes where the previous one stopped.
  NextFit,
  /// Smallest free block large enough; ties go to the lowest address.
  BestFit,
}

impl fmt::Display for Policy {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    let name = match self {
      Policy::FirstFit => "first fit",
      Policy::NextFit => "next fit",
      Policy::BestFit => "best fit",
    };
    f.write_str(name)
  }
}

impl FromStr for Policy {
  type Err = ParsePolicyError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_ascii_lowercase().as_str() {
      "first" | "first-fit" | "first_fit" | "ff" => Ok(Policy::FirstFit),
      "next" | "next-fit" | "next_fit" | "nf" => Ok(Policy::NextFit),
      "best" | "best-fit" | "best_fit" | "bf" => Ok(Policy::BestFit),
      _ => Err(ParsePolicyError(s.to_owned())),
    }
  }
}

/// Smallest chunk that still leaves room for one block once both heap edges
/// are rounded to the block granularity.
pub const MIN_CHUNK_SIZE: usize = 4 * BLOCK_SIZE;

/// Heap construction parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapConfig {
  pub policy: Policy,
  /// Initial break extension.
  pub chunk_size: usize,
  /// Verbosity gate applied before records reach the logger.
  pub log_level: LevelFilter,
}

impl HeapConfig {
  pub fn new(policy: Policy) -> Self {
    Self {
      policy,
      ..Self::default()
    }
  }

  pub fn with_chunk_size(
    mut self,
    chunk_size: usize,
  ) -> Self {
    self.chunk_size = chunk_size;
    self
  }

  pub fn with_log_level(
    mut self,
    log_level: LevelFilter,
  ) -> Self {
    self.log_level = log_level;
    self
  }

  pub fn validate(&self) -> Result<(), HeapError> {
    if self.chunk_size < MIN_CHUNK_SIZE {
      return Err(HeapError::ChunkTooSmall {
        chunk_size: self.chunk_size,
        minimum: MIN_CHUNK_SIZE,
      });
    }

    Ok(())
  }
}

impl Default for HeapConfig {
  fn default() -> Self {
    Self {
      policy: Policy::default(),
      chunk_size: CHUNK_SIZE,
      log_level: LevelFilter::Warn,
    }
  }
}
