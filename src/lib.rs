//! # brkalloc - A First-Fit Free-List Heap
//!
//! This crate provides a `malloc`-style heap that manages one contiguous
//! region of memory growing at its end, by default the process data segment
//! moved with the `sbrk` system call.
//!
//! ## Overview
//!
//! Every region handed out is preceded by a small header. Released regions
//! are threaded onto a free list through those headers and reused:
//!
//! ```text
//!   Heap Layout:
//!
//!   ┌──────────────────────────────────────────────────────────────────────┐
//!   │                         HEAP MEMORY                                  │
//!   │                                                                      │
//!   │   ┌─────┬──────┬─────┬──────┬─────┬──────┬─────┬──────┐              │
//!   │   │ hdr │  A1  │ hdr │ free │ hdr │  A3  │ hdr │ free │              │
//!   │   └─────┴──────┴─────┴──────┴─────┴──────┴─────┴──────┘              │
//!   │                  ▲                        ▲             ▲            │
//!   │                  │                        │             │            │
//!   │                  └──── free list ─────────┘          Program         │
//!   │                     (unordered, LIFO)                 Break          │
//!   │                                                                      │
//!   └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! - **Allocation** walks the free list and takes the first block that is
//!   large enough (first-fit). A block with room to spare is split and the
//!   tail goes back on the list. When nothing fits, the break is moved up.
//! - **Release** of the physically last block moves the break back down.
//!   Any other block is pushed onto the list and merged with free blocks
//!   directly before and after it (coalescing).
//!
//! ## Crate Structure
//!
//! ```text
//!   brkalloc
//!   ├── align      - Alignment macros (align!, align_to!)
//!   ├── block      - Block header, splitting (internal)
//!   ├── free_list  - Free list, neighbour lookups, coalescing (internal)
//!   ├── brk        - ProgramBreak trait, Sbrk and Arena sources
//!   ├── heap       - Heap: allocate / allocate_zeroed / reallocate / release
//!   ├── error      - HeapError
//!   └── ffi        - C ABI over a process-wide heap (feature = "ffi")
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use brkalloc::{Arena, Heap};
//!
//! let mut heap = Heap::with_break(Arena::with_capacity(4096).unwrap());
//!
//! unsafe {
//!   let ptr = heap.allocate(8) as *mut u64;
//!   assert!(!ptr.is_null());
//!
//!   *ptr = 42;
//!   assert_eq!(*ptr, 42);
//!
//!   heap.release(ptr as *mut u8);
//! }
//! ```
//!
//! `Heap::new()` builds the same heap on top of the real program break.
//!
//! ## Blocks
//!
//! ```text
//!   Single Allocation:
//!   ┌───────────────────────┬────────────────────────────────┐
//!   │    Block Header       │         User Data              │
//!   │  ┌─────────────────┐  │                                │
//!   │  │ size: N         │  │  ┌──────────────────────────┐  │
//!   │  │ next: null/ptr  │  │  │     N bytes usable       │  │
//!   │  └─────────────────┘  │  └──────────────────────────┘  │
//!   │      16 bytes         │                                │
//!   └───────────────────────┴────────────────────────────────┘
//!                           ▲
//!                           └── Pointer returned to user
//! ```
//!
//! `size` never counts the header. `next` is only meaningful while the block
//! is free. Requested sizes are rounded up to [`ALIGNMENT`], and the header is
//! exactly one alignment unit wide, so every payload handed out is aligned to
//! [`ALIGNMENT`].
//!
//! ## Limitations
//!
//! - **Single-threaded only**: a [`Heap`] needs `&mut self` for everything and
//!   is neither `Send` nor `Sync`
//! - **Linear free list**: first-fit and coalescing both scan the whole list
//! - **No shrink-to-fit**: `reallocate` to a smaller size keeps the block
//! - **No integrity checks**: writing past a payload corrupts the next header
//! - **Unix-only** for [`Sbrk`]: requires `libc` and `sbrk` (POSIX systems)

pub mod align;
mod block;
pub mod brk;
mod error;
#[cfg(feature = "ffi")]
pub mod ffi;
mod free_list;
mod heap;

/// Alignment of every payload and every block size.
pub const ALIGNMENT: usize = 16;

pub use block::HEADER_SIZE;
pub use brk::{Arena, ProgramBreak, Sbrk};
pub use error::{HeapError, Result};
pub use heap::{FreeBlock, Heap};
