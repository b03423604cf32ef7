//! # segalloc - A Segregated Free-List Allocator
//!
//! This crate provides a **segregated-fit** allocator with **boundary-tag
//! coalescing**. It manages one contiguous heap that only ever grows, asking a
//! [`MemorySource`] for more bytes whenever no free block fits a request.
//!
//! ## Overview
//!
//! Free blocks are kept on one of several doubly linked lists, picked by
//! size class. Class `k` holds blocks whose size falls in `[2^k, 2^(k+1))`,
//! the last class takes everything larger:
//!
//! ```text
//!   Size classes:
//!
//!   ┌──────┐
//!   │  c4  │ ──► [16] ──► [24] ──► [16]
//!   ├──────┤
//!   │  c5  │ ──► [40]
//!   ├──────┤
//!   │  c6  │ ──► (empty)
//!   ├──────┤
//!   │  ... │
//!   ├──────┤
//!   │  c11 │ ──► [8192] ──► [2048]
//!   └──────┘
//!
//!   A request is rounded up, mapped to its class and served first-fit
//!   from that class. A miss grows the heap.
//! ```
//!
//! ## Crate Structure
//!
//! ```text
//!   segalloc
//!   ├── align      - Double-word alignment (align!)
//!   ├── block      - Boundary tags and block handles
//!   ├── seglist    - Size classes and free-list operations
//!   ├── source     - Memory sources (MemLib, SbrkSource)
//!   ├── heap       - SegAllocator: allocate / release / resize
//!   ├── check      - Heap consistency checker
//!   ├── config     - HeapConfig
//!   └── error      - HeapError
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use segalloc::{MemLib, SegAllocator};
//!
//! let mut heap = SegAllocator::new(MemLib::new(1 << 20)).unwrap();
//!
//! let block = heap.allocate(100).unwrap();
//! heap.payload_mut(block)[..5].copy_from_slice(b"hello");
//!
//! let block = heap.resize(block, 400).unwrap().unwrap();
//! assert_eq!(&heap.payload(block)[..5], b"hello");
//!
//! heap.release(block);
//! assert!(heap.check());
//! ```
//!
//! ## How It Works
//!
//! The heap starts with the size-class table, followed by two sentinels that
//! are always marked allocated so edge blocks never see a free neighbor
//! outside the heap:
//!
//! ```text
//!   Heap Layout:
//!
//!   ┌─────────────┬─────┬──────────┬─────────┬─────────┬─────┬──────────┐
//!   │ class table │ pad │ prologue │ block 1 │ block 2 │ ... │ epilogue │
//!   │ (one word   │     │  8 | 1   │         │         │     │  0 | 1   │
//!   │  per class) │     │          │         │         │     │          │
//!   └─────────────┴─────┴──────────┴─────────┴─────────┴─────┴──────────┘
//!                                                              ▲
//!                                                   moves on every growth
//! ```
//!
//! Every block carries its size and allocated bit twice, in a header and a
//! footer, so the allocator can step to the physical predecessor as easily
//! as to the successor:
//!
//! ```text
//!   Releasing B when both A and C are free:
//!
//!   ┌─────────┬─────────┬─────────┐        ┌─────────────────────────────┐
//!   │ A free  │ B used  │ C free  │  ───►  │         A + B + C free      │
//!   └─────────┴─────────┴─────────┘        └─────────────────────────────┘
//! ```
//!
//! ## Limitations
//!
//! - **Single-threaded only**: every operation takes `&mut self`
//! - **Grows only**: memory is never handed back to the memory source
//! - **8-byte alignment**: no stronger alignment is offered
//! - **`SbrkSource` is Unix-only**: it relies on `sbrk(2)` from `libc`
//!
//! ## Safety
//!
//! Blocks are addressed through [`BlockRef`] offsets into the heap, so the
//! public API is safe to call. Releasing a block twice or releasing a handle
//! that was never returned by this heap corrupts the heap's bookkeeping;
//! [`SegAllocator::check_heap`] is the tool for finding such damage.

pub mod align;
mod block;
mod check;
mod config;
mod error;
mod heap;
mod seglist;
mod source;

pub use block::{BlockInfo, BlockRef, DSIZE, MIN_BLOCK_SIZE, Tag, WSIZE};
pub use check::{CheckReport, Violation};
pub use config::{DEFAULT_CHUNK_SIZE, DEFAULT_SIZE_CLASSES, HeapConfig};
pub use error::{HeapError, Result};
pub use heap::{Blocks, HeapStats, SegAllocator, block_size_for};
pub use seglist::class_index;
pub use source::{DEFAULT_MAX_HEAP, MemLib, MemorySource, SbrkSource};
