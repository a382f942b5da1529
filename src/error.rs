use std::io;

use thiserror::Error;

/// Result of a fallible heap operation.
pub type HeapResult<T> = Result<T, HeapError>;

/// Errors raised by a [`DataSegment`](crate::DataSegment) when asked to move its break.
#[derive(Error, Debug)]
pub enum SegmentError {
  #[error("data segment exhausted: requested {requested} bytes, {available} bytes left")]
  Exhausted { requested: usize, available: usize },

  #[error("sbrk refused to extend the break: {0}")]
  Refused(#[source] io::Error),

  #[error("program break moved behind our back: expected {expected:#x}, found {found:#x}")]
  Moved { expected: usize, found: usize },
}

/// Heap errors.
///
/// Everything here belongs to the fatal tier: the infallible entry points
/// ([`Heap::allocate`](crate::Heap::allocate) and friends) panic with the
/// message, the `try_` forms hand it back untouched.
#[derive(Error, Debug)]
pub enum HeapError {
  #[error("data segment not initialized")]
  Uninitialized,

  #[error("heap not clean: segment starts at {start:#x} but the break is at {brk:#x}")]
  NotClean { start: usize, brk: usize },

  #[error("reported page size is 0")]
  ZeroPageSize,

  #[error("chunk size {chunk_size} is below the minimum of {minimum} bytes")]
  ChunkTooSmall { chunk_size: usize, minimum: usize },

  #[error("{address:#x} does not refer to an allocated block")]
  NotAllocated { address: usize },

  #[error("request of {requested} bytes overflows the address space")]
  RequestTooLarge { requested: usize },

  #[error("cannot grow the heap by {requested} bytes")]
  GrowthRefused {
    requested: usize,
    #[source]
    source: SegmentError,
  },
}

/// Returned when a policy name does not parse.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown allocation policy `{0}` (expected first-fit, next-fit or best-fit)")]
pub struct ParsePolicyError(pub String);
