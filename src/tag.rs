//! Boundary tags.
//!
//! Every block starts with a header word and ends with a footer word. Both
//! hold the same packed `(size, status)` pair:
//!
//! ```text
//!   63                                             3 2 1 0
//!   ┌───────────────────────────────────────────────┬─────┐
//!   │                 block size                    │ st. │
//!   └───────────────────────────────────────────────┴─────┘
//! ```
//!
//! Block sizes are multiples of [`BLOCK_SIZE`], so the low bits are always
//! free to carry the status.

use std::mem;

use crate::segment::DataSegment;

/// Size of a heap word (and of a single boundary tag).
pub const WORD: usize = mem::size_of::<usize>();

/// Block granularity and minimum block size: header, footer and two data words.
pub const BLOCK_SIZE: usize = 32;

/// Amount by which the break is extended when the heap is created.
pub const CHUNK_SIZE: usize = 1 << 12;

const STATUS_MASK: usize = 0x7;
const SIZE_MASK: usize = !STATUS_MASK;

/// Allocation status of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
  Free = 0,
  Allocated = 1,
}

/// Decoded boundary tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tag {
  size: usize,
  status: Status,
}

impl Tag {
  /// Zero-size allocated half-block bounding the heap on either side.
  pub const SENTINEL: Tag = Tag::allocated(0);

  pub const fn free(size: usize) -> Self {
    Self { size, status: Status::Free }
  }

  pub const fn allocated(size: usize) -> Self {
    Self {
      size,
      status: Status::Allocated,
    }
  }

  pub fn size(self) -> usize {
    self.size
  }

  pub fn status(self) -> Status {
    self.status
  }

  pub fn is_free(self) -> bool {
    self.status == Status::Free
  }

  pub fn is_sentinel(self) -> bool {
    self == Self::SENTINEL
  }

  /// Packs the tag into a single word.
  pub fn pack(self) -> usize {
    debug_assert_eq!(self.size & STATUS_MASK, 0, "unaligned block size");
    self.size | self.status as usize
  }

  /// Unpacks a word read from a header or footer.
  pub fn unpack(word: usize) -> Self {
    let status = match word & STATUS_MASK {
      0 => Status::Free,
      _ => Status::Allocated,
    };

    Self {
      size: word & SIZE_MASK,
      status,
    }
  }

  /// Reads the tag stored at `addr`.
  pub fn read<S: DataSegment + ?Sized>(
    segment: &S,
    addr: usize,
  ) -> Self {
    let mut word = [0u8; WORD];
    word.copy_from_slice(segment.bytes(addr, WORD));
    Self::unpack(usize::from_ne_bytes(word))
  }

  /// Writes the tag to `addr`.
  pub fn write<S: DataSegment + ?Sized>(
    self,
    segment: &mut S,
    addr: usize,
  ) {
    segment
      .bytes_mut(addr, WORD)
      .copy_from_slice(&self.pack().to_ne_bytes());
  }
}

/// Address of the footer of the block whose header sits at `header`.
pub fn footer(
  header: usize,
  size: usize,
) -> usize {
  header + size - WORD
}

/// Writes `tag` as both header and footer of the block starting at `header`.
pub fn write_block<S: DataSegment + ?Sized>(
  segment: &mut S,
  header: usize,
  tag: Tag,
) {
  tag.write(segment, header);
  tag.write(segment, footer(header, tag.size()));
}
