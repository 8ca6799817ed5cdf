//! Free block registries
use core::{ops::ControlFlow, ptr::NonNull};

use crate::{block::Block, Init};

mod list;
mod segregated;
pub use self::{
    list::FreeList,
    segregated::{SegregatedFreeList, DEFAULT_NUM_CLASSES},
};

/// The set of free blocks of a heap.
///
/// A registry does not own any memory of its own. It threads its links
/// through the payloads of the free blocks it holds.
///
/// # Safety
///
///  - An implementation must only write to the first
///    `MIN_BLOCK_SIZE - OVERHEAD` bytes of a registered block's payload.
///  - [`find_fit`] must return a registered block whose size is at least the
///    requested size.
///  - Inserting a block and then removing it again without touching the block
///    in between must leave the registry exactly as it was.
///
/// [`find_fit`]: Self::find_fit
pub unsafe trait FreeRegistry: Init {
    /// The minimum size of a block, including both tags, such that a free
    /// block has room for the registry's links.
    const MIN_BLOCK_SIZE: usize;

    /// Forget every block and start tracking a heap beginning at `base`.
    fn reset(&mut self, base: NonNull<u8>);

    /// Register a free block.
    ///
    /// # Safety
    ///
    /// `block` must be a free block of the heap passed to [`Self::reset`]
    /// and must not be currently registered.
    unsafe fn insert(&mut self, block: Block);

    /// Unregister a free block.
    ///
    /// # Safety
    ///
    /// `block` must be currently registered, and its size must not have
    /// changed since it was inserted.
    unsafe fn remove(&mut self, block: Block);

    /// Find a registered block of at least `size` bytes.
    ///
    /// # Safety
    ///
    /// Every registered block must still be intact.
    unsafe fn find_fit(&self, size: usize) -> Option<Block>;

    /// Call `f` for every registered block until it returns
    /// [`ControlFlow::Break`].
    ///
    /// # Safety
    ///
    /// Every registered block must still be intact.
    unsafe fn visit(&self, f: &mut dyn FnMut(Block) -> ControlFlow<()>);
}

#[cfg(test)]
mod tests;
