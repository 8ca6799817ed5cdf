//! This crate implements a boundary-tag dynamic memory allocator managing a
//! single growable heap.
//!
//!  - **Blocks carry a header and a footer.** Both neighbours of any block
//!    can be located in constant time, so a released block is immediately
//!    merged with whichever neighbours are free.
//!
//!  - **The free-block index is pluggable.** [`FreeList`] is an unordered,
//!    doubly-linked list searched first-fit; [`SegregatedFreeList`] keeps an
//!    array of size classes, each sorted by size, and approximates best fit.
//!
//!  - **The memory is provided by a heap source.** The heap grows in
//!    chunks through [`HeapSource`], which may be a caller-supplied buffer
//!    ([`ArenaHeap`]) or, on Unix, an anonymous memory mapping
//!    ([`MmapHeap`]).
//!
//!  - **This crate supports `#![no_std]`.**
//!
//! # Examples
//!
//! ```rust
//! use tagalloc::{Allocator, ArenaHeap, FreeList};
//! use std::mem::MaybeUninit;
//!
//! let mut pool = [MaybeUninit::uninit(); 65536];
//!
//! // Grow the heap 4096 bytes at a time
//! let mut alloc: Allocator<_, FreeList, 4096> = Allocator::new(ArenaHeap::new(&mut pool));
//! alloc.initialize().unwrap();
//!
//! unsafe {
//!     let ptr1 = alloc.allocate(8).unwrap().cast::<u64>();
//!     let ptr2 = alloc.allocate(8).unwrap().cast::<u64>();
//!     ptr1.as_ptr().write(42);
//!     ptr2.as_ptr().write(56);
//!     assert_eq!(*ptr1.as_ref(), 42);
//!     assert_eq!(*ptr2.as_ref(), 56);
//!
//!     let ptr1 = alloc.resize(ptr1.cast(), 1000).unwrap().cast::<u64>();
//!     assert_eq!(*ptr1.as_ref(), 42);
//!
//!     alloc.release(ptr1.cast());
//!     alloc.release(ptr2.cast());
//! }
//!
//! assert_eq!(alloc.check().unwrap().used_blocks, 0);
//! ```
//!
//! # Cargo Features
//!
//!  - `std` implements `std::error::Error` for the error types.
//!  - `doc_cfg` enables the nightly-only documentation extras.
#![no_std]
#![cfg_attr(feature = "doc_cfg", feature(doc_cfg))]

#[cfg(any(test, feature = "std"))]
extern crate std;

mod allocator;
pub mod block;
mod coalesce;
mod heap;
mod init;
mod registry;
mod utils;
pub use self::{
    allocator::{Allocator, HeapCorruption, HeapStats, OutOfMemory, DEFAULT_CHUNK_SIZE},
    block::{Block, Tag, ALIGNMENT},
    heap::{ArenaHeap, HeapSource},
    init::Init,
    registry::{FreeList, FreeRegistry, SegregatedFreeList, DEFAULT_NUM_CLASSES},
};

#[cfg(unix)]
pub use self::heap::MmapHeap;

#[cfg(test)]
mod tests;
