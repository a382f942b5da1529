//! # tagalloc - A Boundary-Tag Heap Allocator
//!
//! This crate implements a dynamic memory allocator on top of a single
//! contiguous heap carved out of a data segment whose break can only move
//! forward. Blocks carry boundary tags, free blocks are found by walking the
//! heap (an *implicit* free list), and released blocks are coalesced with their
//! free neighbors immediately.
//!
//! ## Overview
//!
//! ```text
//!   Heap Layout:
//!
//!   ┌──────────────────────────────────────────────────────────────────────┐
//!   │                          DATA SEGMENT                                │
//!   │                                                                      │
//!   │   ┌───┬─────────┬───────────────┬────────┬───────────────────┬───┐   │
//!   │   │ S │  alloc  │     free      │ alloc  │       free        │ S │   │
//!   │   └───┴─────────┴───────────────┴────────┴───────────────────┴───┘   │
//!   │     ▲ ▲                                                      ▲       │
//!   │     │ └── heap_start                                heap_end ┘       │
//!   │     └──── sentinel half-blocks (size 0, allocated)                   │
//!   └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every block, free or allocated, starts with a header and ends with a
//! footer holding the same `(size, status)` word:
//!
//! ```text
//!   Single Block:
//!   ┌────────┬───────────────────────────────────────────┬────────┐
//!   │ header │                 payload                   │ footer │
//!   │ size|st│                                           │ size|st│
//!   └────────┴───────────────────────────────────────────┴────────┘
//!            ▲
//!            └── Handle returned to the caller
//! ```
//!
//! The footer lets a block find its predecessor in constant time, which is all
//! coalescing needs. The sentinels at both ends look like allocated blocks of
//! size zero, so the coalescer never has to care about the heap edges.
//!
//! ## Crate Structure
//!
//! ```text
//!   tagalloc
//!   ├── align      - Rounding macros (align_up!, align_down!)
//!   ├── tag        - Boundary tag codec and block geometry constants
//!   ├── segment    - DataSegment trait, simulated and sbrk backed segments
//!   ├── config     - Allocation policy and heap configuration
//!   ├── heap       - Heap context: init, growth, public allocation API
//!   ├── fit        - First, next and best fit block search
//!   ├── block      - Splitting, coalescing and heap walks
//!   └── check      - Consistency checker
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use tagalloc::{Heap, Policy, SimulatedSegment};
//!
//! let mut heap = Heap::init(SimulatedSegment::new(1 << 20), Policy::BestFit).unwrap();
//!
//! let handle = heap.allocate(42);
//! heap.payload_mut(handle)[..5].copy_from_slice(b"hello");
//! assert_eq!(&heap.payload(handle)[..5], b"hello");
//!
//! heap.deallocate(handle);
//! assert!(heap.check_consistency().is_coherent());
//! ```
//!
//! ## Allocation
//!
//! A request for `n` bytes needs a block of `round_up(WORD + n + WORD, 32)`
//! bytes. The active [`Policy`] looks for a free block that large; if there is
//! none the heap grows through the [`DataSegment`], absorbing a free block at
//! the end of the heap if there is one. The block is then split when the
//! leftover is at least one minimum block.
//!
//! ## Limitations
//!
//! - **Single-threaded only**: wrap the heap in a lock to share it
//! - **No shrinking**: the break never moves back
//! - **Trusting**: corrupt tags or forged handles are not defended against

#[macro_use]
mod macros {
  /// Logs through the `log` facade if `$level` passes the heap's own gate.
  macro_rules! heap_log {
    ($heap:expr, $level:expr, $($arg:tt)+) => {{
      let level: ::log::Level = $level;
      if level <= $heap.log_level {
        ::log::log!(level, $($arg)+);
      }
    }};
  }
}

pub mod align;
mod block;
mod check;
mod config;
mod error;
mod fit;
mod heap;
pub mod segment;
pub mod tag;

pub use block::{BlockInfo, Blocks};
pub use check::{ConsistencyReport, Discrepancy};
pub use config::{HeapConfig, MIN_CHUNK_SIZE, Policy};
pub use error::{HeapError, HeapResult, ParsePolicyError, SegmentError};
pub use heap::{Handle, Heap};
pub use segment::{DataSegment, SbrkSegment, SimulatedSegment};
pub use tag::{Status, Tag};
