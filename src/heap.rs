use log::{Level, LevelFilter};

use crate::{
  align_down, align_up,
  config::{HeapConfig, Policy},
  error::{HeapError, HeapResult},
  fit::Locator,
  segment::DataSegment,
  tag::{BLOCK_SIZE, Tag, WORD, write_block},
};

/// Payload address handed out by the allocator.
///
/// A handle always points one word past its block header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Handle(usize);

impl Handle {
  pub(crate) fn from_header(header: usize) -> Self {
    Self(header + WORD)
  }

  pub(crate) fn header(self) -> usize {
    self.0 - WORD
  }

  /// Address of the first payload byte.
  pub fn address(self) -> usize {
    self.0
  }
}

/// Implicit free list heap on top of a [`DataSegment`].
///
/// ```text
///         initial sentinel                          end sentinel
///                |                                        |
///   seg start    |   heap_start                  heap_end |      brk
///       |        |   |                                  | |       |
///       v        v   v                                  v v       v
///       +-----+-----+--------------------------------------+-----+-----+
///       | ... |  A  | h :            free              : f |  A  | ... |
///       +-----+-----+--------------------------------------+-----+-----+
///                   ^                                      ^
///                   |                                      |
///             32-byte aligned                       32-byte aligned
/// ```
#[derive(Debug)]
pub struct Heap<S: DataSegment> {
  pub(crate) segment: S,
  pub(crate) heap_start: usize,
  pub(crate) heap_end: usize,
  pub(crate) locator: Locator,
  pub(crate) log_level: LevelFilter,
}

/// Block size needed to hold `size` payload bytes.
pub(crate) fn block_size_for(size: usize) -> HeapResult<usize> {
  let overflow = HeapError::RequestTooLarge { requested: size };
  let total = size.checked_add(2 * WORD).ok_or(overflow)?;
  let blocksize = total
    .checked_next_multiple_of(BLOCK_SIZE)
    .ok_or(HeapError::RequestTooLarge { requested: size })?;

  Ok(blocksize.max(BLOCK_SIZE))
}

impl<S: DataSegment> Heap<S> {
  /// Creates a heap on `segment` with the default configuration and `policy`.
  pub fn init(
    segment: S,
    policy: Policy,
  ) -> HeapResult<Self> {
    Self::with_config(segment, HeapConfig::new(policy))
  }

  /// Creates a heap on `segment`.
  ///
  /// The segment must be initialized and clean (its break still at its
  /// start). The break is extended by one chunk which becomes a single free
  /// block framed by the two sentinels.
  pub fn with_config(
    mut segment: S,
    config: HeapConfig,
  ) -> HeapResult<Self> {
    config.validate()?;

    let start = segment.start().ok_or(HeapError::Uninitialized)?;
    let brk = segment.brk();
    if start != brk {
      return Err(HeapError::NotClean { start, brk });
    }
    if segment.page_size() == 0 {
      return Err(HeapError::ZeroPageSize);
    }

    segment
      .sbrk(config.chunk_size)
      .map_err(|source| HeapError::GrowthRefused {
        requested: config.chunk_size,
        source,
      })?;

    let brk = segment.brk();
    let heap_start = align_up!(start + WORD, BLOCK_SIZE);
    let heap_end = align_down!(brk - WORD, BLOCK_SIZE);

    Tag::SENTINEL.write(&mut segment, heap_start - WORD);
    Tag::SENTINEL.write(&mut segment, heap_end);
    write_block(&mut segment, heap_start, Tag::free(heap_end - heap_start));

    let heap = Self {
      segment,
      heap_start,
      heap_end,
      locator: Locator::new(config.policy, heap_start),
      log_level: config.log_level,
    };

    heap_log!(
      heap,
      Level::Debug,
      "heap initialized: policy {}, start {:#x}, end {:#x}, page size {}",
      config.policy,
      heap_start,
      heap_end,
      heap.segment.page_size()
    );

    Ok(heap)
  }

  pub fn policy(&self) -> Policy {
    self.locator.policy()
  }

  pub fn heap_start(&self) -> usize {
    self.heap_start
  }

  pub fn heap_end(&self) -> usize {
    self.heap_end
  }

  pub fn segment(&self) -> &S {
    &self.segment
  }

  pub fn log_level(&self) -> LevelFilter {
    self.log_level
  }

  /// Sets the diagnostic verbosity. Has no effect on allocator behavior.
  pub fn set_log_level(
    &mut self,
    level: LevelFilter,
  ) {
    self.log_level = level;
  }

  pub(crate) fn tag_at(
    &self,
    addr: usize,
  ) -> Tag {
    Tag::read(&self.segment, addr)
  }

  /// Allocates `size` bytes.
  ///
  /// # Panics
  ///
  /// Panics if the heap cannot grow to satisfy the request.
  pub fn allocate(
    &mut self,
    size: usize,
  ) -> Handle {
    self
      .try_allocate(size)
      .unwrap_or_else(|err| panic!("allocation of {size} bytes failed: {err}"))
  }

  /// Allocates `size` bytes, returning the error instead of panicking.
  pub fn try_allocate(
    &mut self,
    size: usize,
  ) -> HeapResult<Handle> {
    let blocksize = block_size_for(size)?;
    heap_log!(self, Level::Debug, "allocate({size}): block size {blocksize}");

    let block = match self.locate(blocksize) {
      Some(block) => block,
      None => self.grow(blocksize)?,
    };
    self.place(block, blocksize);

    Ok(Handle::from_header(block))
  }

  /// Allocates `count * size` zeroed bytes.
  ///
  /// # Panics
  ///
  /// Panics on overflow or if the heap cannot grow.
  pub fn zero_allocate(
    &mut self,
    count: usize,
    size: usize,
  ) -> Handle {
    self
      .try_zero_allocate(count, size)
      .unwrap_or_else(|err| panic!("zero allocation of {count}x{size} bytes failed: {err}"))
  }

  pub fn try_zero_allocate(
    &mut self,
    count: usize,
    size: usize,
  ) -> HeapResult<Handle> {
    let total = count
      .checked_mul(size)
      .ok_or(HeapError::RequestTooLarge { requested: usize::MAX })?;

    let handle = self.try_allocate(total)?;
    self.payload_mut(handle).fill(0);

    Ok(handle)
  }

  /// Releases the block behind `handle`.
  ///
  /// Releasing a block that is already free only logs a warning.
  pub fn deallocate(
    &mut self,
    handle: Handle,
  ) {
    let block = handle.header();
    let tag = self.tag_at(block);
    heap_log!(self, Level::Debug, "deallocate({:#x})", handle.address());

    if tag.is_free() {
      heap_log!(
        self,
        Level::Warn,
        "double free of {:#x} detected, ignoring",
        handle.address()
      );
      return;
    }

    write_block(&mut self.segment, block, Tag::free(tag.size()));
    self.coalesce(block);
  }

  /// Resizes the allocation behind `handle` to hold at least `size` bytes.
  ///
  /// The block shrinks or grows in place when it can, otherwise the payload
  /// moves to a new block and the old one is released. On error the original
  /// allocation is left as it was. A handle whose block is already free is
  /// rejected with [`HeapError::NotAllocated`].
  pub fn reallocate(
    &mut self,
    handle: Handle,
    size: usize,
  ) -> HeapResult<Handle> {
    let block = handle.header();
    let tag = self.tag_at(block);
    if tag.is_free() {
      heap_log!(
        self,
        Level::Warn,
        "reallocate of released block {:#x}, ignoring",
        handle.address()
      );
      return Err(HeapError::NotAllocated {
        address: handle.address(),
      });
    }

    let current = tag.size();
    let blocksize = block_size_for(size)?;
    heap_log!(
      self,
      Level::Debug,
      "reallocate({:#x}, {size}): block size {current} -> {blocksize}",
      handle.address()
    );

    if blocksize <= current {
      if let Some(remainder) = self.place(block, blocksize) {
        self.coalesce(remainder);
      }
      return Ok(handle);
    }

    let next = self.tag_at(block + current);
    if next.is_free() && current + next.size() >= blocksize {
      heap_log!(self, Level::Trace, "  absorbing free successor of {} bytes", next.size());
      let merged = current + next.size();
      write_block(&mut self.segment, block, Tag::allocated(merged));
      self.locator.repair(block, merged);
      self.place(block, blocksize);
      return Ok(handle);
    }

    let moved = self.try_allocate(size)?;
    let len = current - 2 * WORD;
    let data = self.segment.bytes(handle.address(), len).to_vec();
    self.segment.bytes_mut(moved.address(), len).copy_from_slice(&data);
    self.deallocate(handle);

    Ok(moved)
  }

  /// Usable payload bytes behind `handle`.
  pub fn usable_size(
    &self,
    handle: Handle,
  ) -> usize {
    self.tag_at(handle.header()).size() - 2 * WORD
  }

  pub fn payload(
    &self,
    handle: Handle,
  ) -> &[u8] {
    let len = self.usable_size(handle);
    self.segment.bytes(handle.address(), len)
  }

  pub fn payload_mut(
    &mut self,
    handle: Handle,
  ) -> &mut [u8] {
    let len = self.usable_size(handle);
    self.segment.bytes_mut(handle.address(), len)
  }

  /// Extends the segment so that a free block of `blocksize` bytes exists at
  /// the end of the heap and returns its header.
  ///
  /// A free block already sitting in front of the end sentinel counts towards
  /// the request.
  pub(crate) fn grow(
    &mut self,
    blocksize: usize,
  ) -> HeapResult<usize> {
    let tail = self.tag_at(self.heap_end - WORD);
    let needed = if tail.is_free() {
      blocksize.saturating_sub(tail.size())
    } else {
      blocksize
    };

    let page_size = self.segment.page_size();
    let increment = align_up!(needed, BLOCK_SIZE)
      .max(BLOCK_SIZE)
      .checked_next_multiple_of(page_size)
      .ok_or(HeapError::RequestTooLarge { requested: blocksize })?;
    heap_log!(
      self,
      Level::Debug,
      "grow({blocksize}): tail {} bytes {}, extending break by {increment}",
      tail.size(),
      if tail.is_free() { "free" } else { "allocated" },
    );

    self
      .segment
      .sbrk(increment)
      .map_err(|source| HeapError::GrowthRefused {
        requested: increment,
        source,
      })?;

    let old_end = self.heap_end;
    let new_end = align_down!(self.segment.brk() - WORD, BLOCK_SIZE);

    write_block(&mut self.segment, old_end, Tag::free(new_end - old_end));
    Tag::SENTINEL.write(&mut self.segment, new_end);
    self.heap_end = new_end;

    let block = self.coalesce(old_end);
    debug_assert!(self.tag_at(block).size() >= blocksize);

    Ok(block)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    error::SegmentError,
    segment::{SIMULATED_BASE, SbrkSegment, SimulatedSegment},
    tag::CHUNK_SIZE,
  };

  fn heap(policy: Policy) -> Heap<SimulatedSegment> {
    Heap::init(SimulatedSegment::new(1 << 20), policy).unwrap()
  }

  #[test]
  fn test_block_size_for() {
    assert_eq!(block_size_for(0).unwrap(), BLOCK_SIZE);
    assert_eq!(block_size_for(1).unwrap(), 32);
    assert_eq!(block_size_for(16).unwrap(), 32);
    assert_eq!(block_size_for(17).unwrap(), 64);
    assert_eq!(block_size_for(70).unwrap(), 96);
    assert!(matches!(
      block_size_for(usize::MAX - 4),
      Err(HeapError::RequestTooLarge { .. })
    ));
  }

  #[test]
  fn test_init_layout() {
    let heap = heap(Policy::FirstFit);

    assert_eq!(heap.heap_start(), SIMULATED_BASE + BLOCK_SIZE);
    assert_eq!(heap.heap_end(), SIMULATED_BASE + CHUNK_SIZE - BLOCK_SIZE);
    assert_eq!(heap.segment().brk(), SIMULATED_BASE + CHUNK_SIZE);
    assert!(heap.tag_at(heap.heap_start() - WORD).is_sentinel());
    assert!(heap.tag_at(heap.heap_end()).is_sentinel());

    let first = heap.tag_at(heap.heap_start());
    assert_eq!(first, Tag::free(heap.heap_end() - heap.heap_start()));
  }

  #[test]
  fn test_init_unaligned_base() {
    let segment = SimulatedSegment::new(1 << 16).with_base(SIMULATED_BASE + 8);
    let heap = Heap::init(segment, Policy::FirstFit).unwrap();

    assert_eq!(heap.heap_start() % BLOCK_SIZE, 0);
    assert_eq!(heap.heap_end() % BLOCK_SIZE, 0);
    assert!(heap.heap_start() - WORD >= SIMULATED_BASE + 8);
    assert!(heap.check_consistency().is_coherent());
  }

  #[test]
  fn test_init_rejects_uninitialized() {
    let err = Heap::init(SimulatedSegment::uninitialized(), Policy::FirstFit).err();
    assert!(matches!(err, Some(HeapError::Uninitialized)));
  }

  #[test]
  fn test_init_rejects_dirty_segment() {
    let mut segment = SimulatedSegment::new(1 << 16);
    segment.sbrk(64).unwrap();

    let err = Heap::init(segment, Policy::BestFit).err();
    assert!(matches!(err, Some(HeapError::NotClean { .. })));
  }

  #[test]
  fn test_init_rejects_zero_page_size() {
    let segment = SimulatedSegment::new(1 << 16).with_page_size(0);
    let err = Heap::init(segment, Policy::NextFit).err();
    assert!(matches!(err, Some(HeapError::ZeroPageSize)));
  }

  #[test]
  fn test_init_refused() {
    let err = Heap::init(SimulatedSegment::new(1024), Policy::FirstFit).err();
    assert!(matches!(err, Some(HeapError::GrowthRefused { .. })));
  }

  #[test]
  fn test_allocate_splits() {
    let mut heap = heap(Policy::FirstFit);
    let start = heap.heap_start();

    let handle = heap.allocate(40);

    assert_eq!(handle.address(), start + WORD);
    assert_eq!(heap.tag_at(start), Tag::allocated(64));
    assert_eq!(heap.tag_at(start + 64 - WORD), Tag::allocated(64));
    assert_eq!(heap.tag_at(start + 64), Tag::free(heap.heap_end() - start - 64));
    assert_eq!(heap.usable_size(handle), 64 - 2 * WORD);
  }

  #[test]
  fn test_grow_reuses_free_tail() {
    let mut heap = heap(Policy::FirstFit);
    let tail = heap.heap_end() - heap.heap_start();
    let brk = heap.segment().brk();

    let handle = heap.allocate(8000);

    assert_eq!(handle.address(), heap.heap_start() + WORD);
    // 8032 byte block, 4032 bytes were already free at the tail
    assert_eq!(heap.segment().brk(), brk + 4096);
    assert_eq!(heap.tag_at(heap.heap_start()).size(), 8032);
    assert_eq!(
      heap.tag_at(heap.heap_start() + 8032),
      Tag::free(tail + 4096 - 8032)
    );
    assert!(heap.check_consistency().is_coherent());
  }

  #[test]
  fn test_grow_after_allocated_tail() {
    let mut heap = heap(Policy::FirstFit);
    let whole = heap.heap_end() - heap.heap_start();
    heap.allocate(whole - 2 * WORD);
    let old_end = heap.heap_end();

    let handle = heap.allocate(100);

    assert_eq!(handle.address(), old_end + WORD);
    assert_eq!(heap.heap_end(), old_end + 4096);
    assert!(heap.check_consistency().is_coherent());
  }

  #[test]
  fn test_grow_rounds_to_pages() {
    let segment = SimulatedSegment::new(1 << 20).with_page_size(1000);
    let mut heap = Heap::init(segment, Policy::FirstFit).unwrap();
    let brk = heap.segment().brk();

    heap.allocate(5000);

    assert_eq!((heap.segment().brk() - brk) % 1000, 0);
    assert!(heap.check_consistency().is_coherent());
  }

  #[test]
  fn test_try_allocate_refused_leaves_heap_intact() {
    let mut heap = Heap::init(SimulatedSegment::new(8192), Policy::FirstFit).unwrap();
    let kept = heap.allocate(100);
    heap.payload_mut(kept)[..4].copy_from_slice(b"keep");
    let before = heap.blocks().collect::<Vec<_>>();

    let err = heap.try_allocate(1 << 20).unwrap_err();

    assert!(matches!(err, HeapError::GrowthRefused { .. }));
    assert_eq!(heap.blocks().collect::<Vec<_>>(), before);
    assert_eq!(&heap.payload(kept)[..4], b"keep");
    assert!(heap.check_consistency().is_coherent());
  }

  #[test]
  #[should_panic(expected = "cannot grow the heap")]
  fn test_allocate_out_of_memory_panics() {
    let mut heap = Heap::init(SimulatedSegment::new(8192), Policy::FirstFit).unwrap();
    heap.allocate(1 << 20);
  }

  #[test]
  #[should_panic(expected = "overflows")]
  fn test_zero_allocate_overflow_panics() {
    let mut heap = heap(Policy::FirstFit);
    heap.zero_allocate(usize::MAX, 2);
  }

  #[test]
  fn test_zero_allocate_clears_reused_block() {
    let mut heap = heap(Policy::FirstFit);
    let dirty = heap.allocate(64);
    heap.payload_mut(dirty).fill(0xAB);
    heap.deallocate(dirty);

    let zeroed = heap.zero_allocate(8, 8);

    assert_eq!(zeroed, dirty);
    assert!(heap.payload(zeroed).iter().all(|&b| b == 0));
  }

  #[test]
  fn test_double_free_is_ignored() {
    let mut heap = heap(Policy::FirstFit);
    let a = heap.allocate(32);
    let b = heap.allocate(32);
    heap.deallocate(a);
    let before = heap.blocks().collect::<Vec<_>>();

    heap.deallocate(a);

    assert_eq!(heap.blocks().collect::<Vec<_>>(), before);
    assert!(heap.check_consistency().is_coherent());
    heap.deallocate(b);
    assert_eq!(heap.blocks().count(), 1);
  }

  #[test]
  fn test_reallocate_shrinks_in_place() {
    let mut heap = heap(Policy::FirstFit);
    let handle = heap.allocate(200);
    heap.payload_mut(handle)[..5].copy_from_slice(b"hello");
    let guard = heap.allocate(16);

    let shrunk = heap.reallocate(handle, 20).unwrap();

    assert_eq!(shrunk, handle);
    assert_eq!(heap.usable_size(shrunk), 64 - 2 * WORD);
    assert_eq!(&heap.payload(shrunk)[..5], b"hello");
    assert!(heap.check_consistency().is_coherent());
    heap.deallocate(guard);
  }

  #[test]
  fn test_reallocate_grows_into_free_successor() {
    let mut heap = heap(Policy::FirstFit);
    let handle = heap.allocate(16);
    heap.payload_mut(handle)[..3].copy_from_slice(b"abc");

    let grown = heap.reallocate(handle, 500).unwrap();

    assert_eq!(grown, handle);
    assert!(heap.usable_size(grown) >= 500);
    assert_eq!(&heap.payload(grown)[..3], b"abc");
    assert!(heap.check_consistency().is_coherent());
  }

  #[test]
  fn test_reallocate_moves() {
    let mut heap = heap(Policy::FirstFit);
    let handle = heap.allocate(16);
    heap.payload_mut(handle).copy_from_slice(b"0123456789abcdef");
    let guard = heap.allocate(16);

    let moved = heap.reallocate(handle, 300).unwrap();

    assert_ne!(moved, handle);
    assert_eq!(&heap.payload(moved)[..16], b"0123456789abcdef");
    assert!(heap.tag_at(handle.header()).is_free());
    assert!(heap.check_consistency().is_coherent());
    heap.deallocate(guard);
    heap.deallocate(moved);
    assert_eq!(heap.blocks().count(), 1);
  }

  #[test]
  fn test_reallocate_failure_keeps_source() {
    let mut heap = Heap::init(SimulatedSegment::new(8192), Policy::BestFit).unwrap();
    let handle = heap.allocate(16);
    heap.payload_mut(handle)[..4].copy_from_slice(b"data");
    let _guard = heap.allocate(16);

    let err = heap.reallocate(handle, 1 << 20).unwrap_err();

    assert!(matches!(err, HeapError::GrowthRefused { .. }));
    assert!(!heap.tag_at(handle.header()).is_free());
    assert_eq!(&heap.payload(handle)[..4], b"data");
    assert!(heap.check_consistency().is_coherent());
  }

  #[test]
  fn test_reallocate_rejects_released_block() {
    let mut heap = heap(Policy::FirstFit);
    let a = heap.allocate(100);
    let b = heap.allocate(100);
    heap.deallocate(a);
    let before = heap.blocks().collect::<Vec<_>>();

    for size in [8, 100, 1000] {
      let err = heap.reallocate(a, size).unwrap_err();
      assert!(matches!(err, HeapError::NotAllocated { address } if address == a.address()));
    }

    assert_eq!(heap.blocks().collect::<Vec<_>>(), before);
    assert!(heap.check_consistency().is_coherent());
    heap.deallocate(b);
    assert_eq!(heap.blocks().count(), 1);
  }

  #[test]
  fn test_init_on_process_break() {
    let segment = SbrkSegment::new();
    assert!(segment.start().is_some());
    assert_eq!(segment.start(), Some(segment.brk()));
    assert!(segment.page_size() > 0);

    // the system allocator may move the break between our calls
    match Heap::init(segment, Policy::FirstFit) {
      Ok(mut heap) => {
        assert_eq!(heap.heap_start() % BLOCK_SIZE, 0);
        assert!(heap.heap_end() <= heap.segment().brk());

        let handle = heap.allocate(100);
        heap.payload_mut(handle)[..4].copy_from_slice(b"brk!");
        assert_eq!(&heap.payload(handle)[..4], b"brk!");
        heap.deallocate(handle);

        let report = heap.check_consistency();
        assert!(report.is_coherent());
        assert_eq!(report.blocks, 1);
      }
      Err(HeapError::GrowthRefused {
        source: SegmentError::Moved { .. } | SegmentError::Refused(_),
        ..
      }) => {}
      Err(err) => panic!("unexpected error: {err}"),
    }
  }

  #[test]
  fn test_set_log_level() {
    let mut heap = heap(Policy::FirstFit);
    assert_eq!(heap.log_level(), LevelFilter::Warn);

    heap.set_log_level(LevelFilter::Trace);
    let handle = heap.allocate(10);
    heap.deallocate(handle);

    assert_eq!(heap.log_level(), LevelFilter::Trace);
    assert!(heap.check_consistency().is_coherent());
  }
}
