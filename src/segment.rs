//! Data segments backing a heap.
//!
//! A [`DataSegment`] is the memory provider underneath the allocator: it
//! reports where the segment starts, where the break currently is, the page
//! size, and moves the break forward on request. It also hands out byte views
//! of the memory between start and break; that is the only way the allocator
//! touches memory.

use std::{io, slice};

use libc::{c_void, intptr_t, sbrk};

use crate::error::SegmentError;

/// Memory provider with a movable break.
pub trait DataSegment {
  /// Start of the segment, `None` if the segment is not initialized.
  fn start(&self) -> Option<usize>;

  /// Current break (one past the last usable byte).
  fn brk(&self) -> usize;

  /// Page size reported by the provider.
  fn page_size(&self) -> usize;

  /// Moves the break forward by `increment` bytes and returns the old break.
  fn sbrk(
    &mut self,
    increment: usize,
  ) -> Result<usize, SegmentError>;

  /// Bytes in `[addr, addr + len)`.
  ///
  /// # Panics
  ///
  /// Panics if the range is not inside `[start, brk)`.
  fn bytes(
    &self,
    addr: usize,
    len: usize,
  ) -> &[u8];

  /// Mutable bytes in `[addr, addr + len)`.
  ///
  /// # Panics
  ///
  /// Panics if the range is not inside `[start, brk)`.
  fn bytes_mut(
    &mut self,
    addr: usize,
    len: usize,
  ) -> &mut [u8];
}

/// Address the simulated segment pretends to start at.
pub const SIMULATED_BASE: usize = 0x0010_0000;

/// Page size the simulated segment reports unless told otherwise.
pub const SIMULATED_PAGE_SIZE: usize = 4096;

/// Data segment simulated on top of a byte arena.
///
/// Addresses are `base + offset` into the arena, so heap tags and handles
/// look like real addresses while every access stays bounds checked.
#[derive(Debug, Clone)]
pub struct SimulatedSegment {
  base: usize,
  memory: Vec<u8>,
  capacity: usize,
  page_size: usize,
  initialized: bool,
}

impl SimulatedSegment {
  /// Creates an empty segment whose break may move up to `capacity` bytes.
  pub fn new(capacity: usize) -> Self {
    Self {
      base: SIMULATED_BASE,
      memory: Vec::new(),
      capacity,
      page_size: SIMULATED_PAGE_SIZE,
      initialized: true,
    }
  }

  /// Creates a segment that reports itself as not initialized.
  pub fn uninitialized() -> Self {
    Self {
      initialized: false,
      ..Self::new(0)
    }
  }

  pub fn with_page_size(
    mut self,
    page_size: usize,
  ) -> Self {
    self.page_size = page_size;
    self
  }

  pub fn with_base(
    mut self,
    base: usize,
  ) -> Self {
    self.base = base;
    self
  }

  /// Bytes currently between start and break.
  pub fn len(&self) -> usize {
    self.memory.len()
  }

  pub fn is_empty(&self) -> bool {
    self.memory.is_empty()
  }

  /// Bytes the break can still move.
  pub fn available(&self) -> usize {
    self.capacity - self.memory.len()
  }

  fn offset(
    &self,
    addr: usize,
    len: usize,
  ) -> usize {
    let offset = addr
      .checked_sub(self.base)
      .unwrap_or_else(|| panic!("address {addr:#x} below segment start {:#x}", self.base));
    assert!(
      offset + len <= self.memory.len(),
      "range {addr:#x}+{len} beyond break {:#x}",
      self.brk()
    );
    offset
  }
}

impl DataSegment for SimulatedSegment {
  fn start(&self) -> Option<usize> {
    self.initialized.then_some(self.base)
  }

  fn brk(&self) -> usize {
    self.base + self.memory.len()
  }

  fn page_size(&self) -> usize {
    self.page_size
  }

  fn sbrk(
    &mut self,
    increment: usize,
  ) -> Result<usize, SegmentError> {
    if increment > self.available() {
      return Err(SegmentError::Exhausted {
        requested: increment,
        available: self.available(),
      });
    }

    let old_brk = self.brk();
    self.memory.resize(self.memory.len() + increment, 0);

    Ok(old_brk)
  }

  fn bytes(
    &self,
    addr: usize,
    len: usize,
  ) -> &[u8] {
    let offset = self.offset(addr, len);
    &self.memory[offset..offset + len]
  }

  fn bytes_mut(
    &mut self,
    addr: usize,
    len: usize,
  ) -> &mut [u8] {
    let offset = self.offset(addr, len);
    &mut self.memory[offset..offset + len]
  }
}

/// The process data segment, moved with `sbrk(2)`.
///
/// The segment starts at the break observed when it is created. Other code in
/// the process (the system allocator in particular) may move the break too;
/// when that happens the segment stops growing instead of handing out memory
/// that is not contiguous with what it already owns.
#[derive(Debug)]
pub struct SbrkSegment {
  start: usize,
  brk: usize,
  page_size: usize,
}

impl SbrkSegment {
  pub fn new() -> Self {
    let brk = unsafe { sbrk(0) } as usize;
    let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };

    Self {
      start: brk,
      brk,
      page_size: usize::try_from(page_size).unwrap_or(0),
    }
  }

  fn check_range(
    &self,
    addr: usize,
    len: usize,
  ) {
    assert!(
      addr >= self.start && addr + len <= self.brk,
      "range {addr:#x}+{len} outside segment [{:#x}, {:#x})",
      self.start,
      self.brk
    );
  }
}

impl Default for SbrkSegment {
  fn default() -> Self {
    Self::new()
  }
}

impl DataSegment for SbrkSegment {
  fn start(&self) -> Option<usize> {
    (self.start != 0).then_some(self.start)
  }

  fn brk(&self) -> usize {
    self.brk
  }

  fn page_size(&self) -> usize {
    self.page_size
  }

  fn sbrk(
    &mut self,
    increment: usize,
  ) -> Result<usize, SegmentError> {
    let found = unsafe { sbrk(0) } as usize;
    if found != self.brk {
      return Err(SegmentError::Moved {
        expected: self.brk,
        found,
      });
    }

    let delta = intptr_t::try_from(increment).map_err(|_| {
      SegmentError::Refused(io::Error::new(
        io::ErrorKind::InvalidInput,
        "increment does not fit intptr_t",
      ))
    })?;

    let old_brk = unsafe { sbrk(delta) };
    if old_brk == usize::MAX as *mut c_void {
      return Err(SegmentError::Refused(io::Error::last_os_error()));
    }

    self.brk = old_brk as usize + increment;

    Ok(old_brk as usize)
  }

  fn bytes(
    &self,
    addr: usize,
    len: usize,
  ) -> &[u8] {
    self.check_range(addr, len);
    // The range lies between our start and the break we moved it to.
    unsafe { slice::from_raw_parts(addr as *const u8, len) }
  }

  fn bytes_mut(
    &mut self,
    addr: usize,
    len: usize,
  ) -> &mut [u8] {
    self.check_range(addr, len);
    unsafe { slice::from_raw_parts_mut(addr as *mut u8, len) }
  }
}
