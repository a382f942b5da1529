use log::Level;

use crate::{
  heap::Heap,
  segment::DataSegment,
  tag::{BLOCK_SIZE, Status, Tag, WORD, write_block},
};

/// A block as seen by a heap walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
  /// Header address.
  pub address: usize,
  /// Size including header and footer.
  pub size: usize,
  pub status: Status,
}

impl BlockInfo {
  pub fn is_free(&self) -> bool {
    self.status == Status::Free
  }
}

/// Iterator over the blocks of a heap in address order.
pub struct Blocks<'a, S: DataSegment> {
  heap: &'a Heap<S>,
  next: usize,
}

impl<S: DataSegment> Iterator for Blocks<'_, S> {
  type Item = BlockInfo;

  fn next(&mut self) -> Option<BlockInfo> {
    if self.next >= self.heap.heap_end {
      return None;
    }

    let tag = self.heap.tag_at(self.next);
    let block = BlockInfo {
      address: self.next,
      size: tag.size(),
      status: tag.status(),
    };

    // a zero size block would never advance
    self.next = match tag.size() {
      0 => self.heap.heap_end,
      size => self.next + size,
    };

    Some(block)
  }
}

impl<S: DataSegment> Heap<S> {
  /// Walks every block between the two sentinels.
  pub fn blocks(&self) -> Blocks<'_, S> {
    Blocks {
      heap: self,
      next: self.heap_start,
    }
  }

  /// Marks `blocksize` bytes at the start of `block` allocated.
  ///
  /// ```text
  ///   before:  | h                                              f |
  ///   after:   | H      blocksize      F | h      remainder     f |
  /// ```
  ///
  /// A remainder below the minimum block size stays inside the allocated
  /// block. Returns the header of the remainder when one was split off.
  pub(crate) fn place(
    &mut self,
    block: usize,
    blocksize: usize,
  ) -> Option<usize> {
    let size = self.tag_at(block).size();
    debug_assert!(size >= blocksize, "block of {size} bytes cannot hold {blocksize}");

    let remainder = size - blocksize;
    if remainder < BLOCK_SIZE {
      write_block(&mut self.segment, block, Tag::allocated(size));
      return None;
    }

    heap_log!(
      self,
      Level::Trace,
      "  split {block:#x}: {blocksize} allocated, {remainder} free"
    );
    write_block(&mut self.segment, block, Tag::allocated(blocksize));
    write_block(&mut self.segment, block + blocksize, Tag::free(remainder));

    Some(block + blocksize)
  }

  /// Merges the free block at `block` with its free neighbors and returns the
  /// header of the resulting block.
  ///
  /// The sentinels are allocated, so neither heap edge needs a special case.
  pub(crate) fn coalesce(
    &mut self,
    block: usize,
  ) -> usize {
    let tag = self.tag_at(block);
    debug_assert!(tag.is_free(), "coalescing allocated block {block:#x}");

    let mut header = block;
    let mut size = tag.size();

    let next = self.tag_at(block + size);
    if next.is_free() {
      heap_log!(self, Level::Trace, "  coalescing {block:#x} with its successor");
      size += next.size();
    }

    let prev = self.tag_at(block - WORD);
    if prev.is_free() {
      heap_log!(self, Level::Trace, "  coalescing {block:#x} with its predecessor");
      header -= prev.size();
      size += prev.size();
    }

    if size != tag.size() {
      write_block(&mut self.segment, header, Tag::free(size));
      self.locator.repair(header, size);
    }

    header
  }
}
