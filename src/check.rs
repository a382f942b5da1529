use log::Level;

use crate::{
  heap::Heap,
  segment::DataSegment,
  tag::{Tag, WORD, footer},
};

/// A single inconsistency found while walking the heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discrepancy {
  /// A sentinel does not read `(0, allocated)`.
  Sentinel { address: usize, tag: Tag },
  /// Header and footer of a block disagree.
  TagMismatch {
    address: usize,
    header: Tag,
    footer: Tag,
  },
  /// Two free blocks sit next to each other.
  Uncoalesced { address: usize, next: usize },
  /// A block claims to extend past the end of the heap. Ends the walk.
  Overrun { address: usize, size: usize },
  /// A block of size zero inside the heap. Ends the walk.
  ZeroSize { address: usize },
}

/// Result of [`Heap::check_consistency`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsistencyReport {
  pub blocks: usize,
  pub free_blocks: usize,
  pub free_bytes: usize,
  pub allocated_bytes: usize,
  pub discrepancies: Vec<Discrepancy>,
  /// Whether the walk landed exactly on the end sentinel.
  pub complete: bool,
}

impl ConsistencyReport {
  pub fn error_count(&self) -> usize {
    self.discrepancies.len()
  }

  pub fn is_coherent(&self) -> bool {
    self.complete && self.discrepancies.is_empty()
  }
}

impl<S: DataSegment> Heap<S> {
  /// Walks the whole heap and verifies its block structure.
  ///
  /// Discrepancies are collected rather than raised; the walk continues past
  /// them unless the block sizes no longer lead anywhere. The heap is not
  /// modified.
  pub fn check_consistency(&self) -> ConsistencyReport {
    let mut report = ConsistencyReport::default();

    for address in [self.heap_start - WORD, self.heap_end] {
      let tag = self.tag_at(address);
      if !tag.is_sentinel() {
        report.discrepancies.push(Discrepancy::Sentinel { address, tag });
      }
    }

    let mut block = self.heap_start;
    let mut prev_free: Option<usize> = None;

    while block < self.heap_end {
      let header = self.tag_at(block);
      let size = header.size();

      if size == 0 {
        report.discrepancies.push(Discrepancy::ZeroSize { address: block });
        break;
      }
      if size > self.heap_end - block {
        report
          .discrepancies
          .push(Discrepancy::Overrun { address: block, size });
        break;
      }

      let footer = self.tag_at(footer(block, size));
      if footer != header {
        report.discrepancies.push(Discrepancy::TagMismatch {
          address: block,
          header,
          footer,
        });
      }

      report.blocks += 1;
      if header.is_free() {
        report.free_blocks += 1;
        report.free_bytes += size;
        if let Some(address) = prev_free {
          report
            .discrepancies
            .push(Discrepancy::Uncoalesced { address, next: block });
        }
        prev_free = Some(block);
      } else {
        report.allocated_bytes += size;
        prev_free = None;
      }

      block += size;
    }

    report.complete = block == self.heap_end;

    for discrepancy in &report.discrepancies {
      heap_log!(self, Level::Warn, "heap check: {discrepancy:?}");
    }
    heap_log!(
      self,
      Level::Debug,
      "heap check: {} blocks, {} free, {} errors, {}",
      report.blocks,
      report.free_blocks,
      report.error_count(),
      if report.is_coherent() { "coherent" } else { "incoherent" }
    );

    report
  }
}
