//! Free block search.
//!
//! All three policies walk the implicit free list in address order, jumping
//! from header to header by block size, and return the header of a free block
//! of at least the requested size.

use log::Level;

use crate::{config::Policy, heap::Heap, segment::DataSegment};

/// Active search policy and its state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Locator {
  FirstFit,
  /// `cursor` is the header where the next search starts.
  NextFit { cursor: usize },
  BestFit,
}

impl Locator {
  pub fn new(
    policy: Policy,
    heap_start: usize,
  ) -> Self {
    match policy {
      Policy::FirstFit => Locator::FirstFit,
      Policy::NextFit => Locator::NextFit { cursor: heap_start },
      Policy::BestFit => Locator::BestFit,
    }
  }

  pub fn policy(&self) -> Policy {
    match self {
      Locator::FirstFit => Policy::FirstFit,
      Locator::NextFit { .. } => Policy::NextFit,
      Locator::BestFit => Policy::BestFit,
    }
  }

  /// Keeps the cursor on a block boundary after the blocks inside
  /// `[header, header + size)` were merged into one.
  pub fn repair(
    &mut self,
    header: usize,
    size: usize,
  ) {
    if let Locator::NextFit { cursor } = self
      && *cursor > header
      && *cursor < header + size
    {
      *cursor = header;
    }
  }
}

impl<S: DataSegment> Heap<S> {
  /// Runs the active policy for a block of `size` bytes.
  pub(crate) fn locate(
    &mut self,
    size: usize,
  ) -> Option<usize> {
    let found = match self.locator {
      Locator::FirstFit => self.first_fit(size),
      Locator::NextFit { cursor } => {
        let (found, cursor) = self.next_fit(cursor, size);
        self.locator = Locator::NextFit { cursor };
        found
      }
      Locator::BestFit => self.best_fit(size),
    };

    match found {
      Some(block) => heap_log!(self, Level::Trace, "  {} picked {block:#x}", self.policy()),
      None => heap_log!(self, Level::Trace, "  {} found no block", self.policy()),
    }

    found
  }

  fn first_fit(
    &self,
    size: usize,
  ) -> Option<usize> {
    let mut block = self.heap_start;

    while block < self.heap_end {
      let tag = self.tag_at(block);
      heap_log!(self, Level::Trace, "    {block:#x}: {tag:?}");

      if tag.is_free() && tag.size() >= size {
        return Some(block);
      }
      if tag.size() == 0 {
        break;
      }
      block += tag.size();
    }

    None
  }

  /// Searches from `cursor`, wrapping around at the end of the heap.
  ///
  /// Returns the block found and the new cursor, which points just past the
  /// whole block as it was found, before any split. The search gives up once it
  /// has stepped onto the end sentinel twice, which covers every block at
  /// least once wherever it started.
  fn next_fit(
    &self,
    cursor: usize,
    size: usize,
  ) -> (Option<usize>, usize) {
    let mut block = cursor;
    let mut sentinel_hits = 0;

    loop {
      let tag = self.tag_at(block);
      let after = block + tag.size();
      heap_log!(self, Level::Trace, "    {block:#x}: {tag:?}");

      if self.tag_at(after).is_sentinel() {
        sentinel_hits += 1;
      }
      if tag.is_free() && tag.size() >= size {
        return (Some(block), self.wrap(after));
      }
      if sentinel_hits == 2 {
        return (None, cursor);
      }
      block = self.wrap(after);
    }
  }

  fn wrap(
    &self,
    addr: usize,
  ) -> usize {
    if addr < self.heap_end {
      addr
    } else {
      self.heap_start
    }
  }

  /// Smallest fitting block, the lowest address among equals.
  fn best_fit(
    &self,
    size: usize,
  ) -> Option<usize> {
    let mut best: Option<(usize, usize)> = None;
    let mut block = self.heap_start;

    while block < self.heap_end {
      let tag = self.tag_at(block);

      if tag.is_free() && tag.size() >= size {
        if tag.size() == size {
          return Some(block);
        }
        match best {
          Some((_, best_size)) if best_size <= tag.size() => {}
          _ => best = Some((block, tag.size())),
        }
      }
      if tag.size() == 0 {
        break;
      }
      block += tag.size();
    }

    best.map(|(block, _)| block)
  }
}
