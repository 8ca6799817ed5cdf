//! Size-class segregated free lists
use core::{num::NonZeroU32, ops::ControlFlow, ptr::NonNull};

use super::FreeRegistry;
use crate::{
    block::{Block, OVERHEAD},
    utils::addr,
    Init,
};

/// The default number of size classes.
pub const DEFAULT_NUM_CLASSES: usize = 20;

/// A link is the offset of a block's payload from the heap base. No payload
/// lives at offset zero, so zero encodes the end of a list.
type Link = Option<NonZeroU32>;

/// An array of `K` free lists indexed by size class.
///
/// Class `i` holds the free blocks whose size is in `[2^i, 2^(i+1))`; the
/// last class takes everything larger. Each list is kept in ascending size
/// order, so the first large-enough block of a class is also the smallest
/// one.
///
/// The links are 32-bit offsets from the heap base rather than pointers,
/// which is why this registry gets by with 16-byte blocks:
///
/// ```text
///  payload + 0: prev_free offset
///  payload + 4: next_free offset
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegregatedFreeList<const K: usize = DEFAULT_NUM_CLASSES> {
    base: NonNull<u8>,
    heads: [Link; K],
}

// Safety: All free blocks referenced by a particular instance of
//         `SegregatedFreeList` are logically owned by the allocator owning
//         that `SegregatedFreeList`.
unsafe impl<const K: usize> Send for SegregatedFreeList<K> {}

impl<const K: usize> Init for SegregatedFreeList<K> {
    const INIT: Self = {
        let () = Self::VALID;
        Self {
            base: NonNull::dangling(),
            heads: [None; K],
        }
    };
}

impl<const K: usize> const_default1::ConstDefault for SegregatedFreeList<K> {
    const DEFAULT: Self = Self::INIT;
}

impl<const K: usize> Default for SegregatedFreeList<K> {
    fn default() -> Self {
        Self::INIT
    }
}

impl<const K: usize> SegregatedFreeList<K> {
    /// Evaluates successfully if the parameters are valid.
    const VALID: () = assert!(
        K >= 1 && K <= 32,
        "the number of size classes must be in range `1..=32`"
    );

    /// Find the class of a block of `size` bytes by halving `size` up to
    /// `K - 1` times.
    #[inline]
    pub const fn class_of(size: usize) -> usize {
        let mut size = size;
        let mut class = 0;
        while class < K - 1 && size > 1 {
            size >>= 1;
            class += 1;
        }
        class
    }

    /// Whether class `class` currently holds no blocks.
    #[inline]
    pub fn is_class_empty(&self, class: usize) -> bool {
        self.heads[class].is_none()
    }

    #[inline]
    fn link_to(&self, block: Block) -> Link {
        let offset = block.addr() - addr(self.base.as_ptr());
        debug_assert!(offset <= u32::MAX as usize);
        let link = NonZeroU32::new(offset as u32);
        debug_assert!(link.is_some());
        link
    }

    #[inline]
    unsafe fn block_at(&self, offset: NonZeroU32) -> Block {
        Block::from_payload(NonNull::new_unchecked(
            self.base.as_ptr().add(offset.get() as usize),
        ))
    }

    #[inline]
    unsafe fn prev_free(block: Block) -> Link {
        NonZeroU32::new(block.link_slot::<u32>(0).read())
    }

    #[inline]
    unsafe fn next_free(block: Block) -> Link {
        NonZeroU32::new(block.link_slot::<u32>(1).read())
    }

    #[inline]
    unsafe fn set_prev_free(block: Block, link: Link) {
        block.link_slot::<u32>(0).write(link.map_or(0, NonZeroU32::get));
    }

    #[inline]
    unsafe fn set_next_free(block: Block, link: Link) {
        block.link_slot::<u32>(1).write(link.map_or(0, NonZeroU32::get));
    }
}

unsafe impl<const K: usize> FreeRegistry for SegregatedFreeList<K> {
    const MIN_BLOCK_SIZE: usize = OVERHEAD + core::mem::size_of::<u32>() * 2;

    #[inline]
    fn reset(&mut self, base: NonNull<u8>) {
        self.base = base;
        self.heads = [None; K];
    }

    unsafe fn insert(&mut self, block: Block) {
        debug_assert!(!block.is_used());
        let size = block.size();
        debug_assert!(size >= Self::MIN_BLOCK_SIZE);
        let class = Self::class_of(size);

        // Find the first entry not smaller than `block`
        let mut prev_free: Link = None;
        let mut next_free = self.heads[class];
        while let Some(offset) = next_free {
            let other = self.block_at(offset);
            if other.size() >= size {
                break;
            }
            prev_free = next_free;
            next_free = Self::next_free(other);
        }

        let link = self.link_to(block);
        Self::set_prev_free(block, prev_free);
        Self::set_next_free(block, next_free);

        if let Some(offset) = prev_free {
            Self::set_next_free(self.block_at(offset), link);
        } else {
            self.heads[class] = link;
        }

        if let Some(offset) = next_free {
            Self::set_prev_free(self.block_at(offset), link);
        }
    }

    unsafe fn remove(&mut self, block: Block) {
        let prev_free = Self::prev_free(block);
        let next_free = Self::next_free(block);

        if let Some(offset) = next_free {
            Self::set_prev_free(self.block_at(offset), prev_free);
        }

        if let Some(offset) = prev_free {
            Self::set_next_free(self.block_at(offset), next_free);
        } else {
            let class = Self::class_of(block.size());
            debug_assert_eq!(self.heads[class], self.link_to(block));
            self.heads[class] = next_free;
        }
    }

    unsafe fn find_fit(&self, size: usize) -> Option<Block> {
        for class in Self::class_of(size)..K {
            let mut cursor = self.heads[class];
            while let Some(offset) = cursor {
                let block = self.block_at(offset);
                if block.size() >= size {
                    return Some(block);
                }
                cursor = Self::next_free(block);
            }
        }
        None
    }

    unsafe fn visit(&self, f: &mut dyn FnMut(Block) -> ControlFlow<()>) {
        for &head in &self.heads {
            let mut cursor = head;
            while let Some(offset) = cursor {
                let block = self.block_at(offset);
                if let ControlFlow::Break(()) = f(block) {
                    return;
                }
                cursor = Self::next_free(block);
            }
        }
    }
}
