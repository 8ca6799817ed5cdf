//! The single, unordered free list
use core::{mem, ops::ControlFlow, ptr::NonNull};

use super::FreeRegistry;
use crate::{
    block::{Block, ALIGNMENT, OVERHEAD},
    Init,
};

type Link = Option<Block>;

/// One doubly linked list of free blocks.
///
/// New blocks are pushed at the head, and [`find_fit`] returns the first
/// block from the head that is large enough, so placement is LIFO-biased
/// first fit. The links are full pointers stored at the start of the
/// payload:
///
/// ```text
///  payload + 0: prev_free
///  payload + W: next_free    (W = size_of::<usize>())
/// ```
///
/// [`find_fit`]: FreeRegistry::find_fit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreeList {
    head: Link,
}

// Safety: All free blocks referenced by a particular instance of `FreeList`
//         are logically owned by the allocator owning that `FreeList`.
unsafe impl Send for FreeList {}

impl Init for FreeList {
    const INIT: Self = Self { head: None };
}

impl const_default1::ConstDefault for FreeList {
    const DEFAULT: Self = Self::INIT;
}

impl Default for FreeList {
    fn default() -> Self {
        Self::INIT
    }
}

impl FreeList {
    #[inline]
    unsafe fn prev_free(block: Block) -> Link {
        block.link_slot::<Link>(0).read()
    }

    #[inline]
    unsafe fn next_free(block: Block) -> Link {
        block.link_slot::<Link>(1).read()
    }

    #[inline]
    unsafe fn set_prev_free(block: Block, link: Link) {
        block.link_slot::<Link>(0).write(link);
    }

    #[inline]
    unsafe fn set_next_free(block: Block, link: Link) {
        block.link_slot::<Link>(1).write(link);
    }

    /// The first block of the list.
    pub fn head(&self) -> Option<Block> {
        self.head
    }
}

unsafe impl FreeRegistry for FreeList {
    const MIN_BLOCK_SIZE: usize =
        (OVERHEAD + mem::size_of::<Link>() * 2 + ALIGNMENT - 1) & !(ALIGNMENT - 1);

    #[inline]
    fn reset(&mut self, _base: NonNull<u8>) {
        self.head = None;
    }

    unsafe fn insert(&mut self, block: Block) {
        debug_assert!(!block.is_used());
        debug_assert!(block.size() >= Self::MIN_BLOCK_SIZE);

        Self::set_prev_free(block, None);
        Self::set_next_free(block, self.head);
        if let Some(head) = self.head {
            Self::set_prev_free(head, Some(block));
        }
        self.head = Some(block);
    }

    unsafe fn remove(&mut self, block: Block) {
        let prev_free = Self::prev_free(block);
        let next_free = Self::next_free(block);

        if let Some(next_free) = next_free {
            Self::set_prev_free(next_free, prev_free);
        }

        if let Some(prev_free) = prev_free {
            Self::set_next_free(prev_free, next_free);
        } else {
            debug_assert_eq!(self.head, Some(block));
            self.head = next_free;
        }
    }

    unsafe fn find_fit(&self, size: usize) -> Option<Block> {
        let mut cursor = self.head;
        while let Some(block) = cursor {
            if block.size() >= size {
                return Some(block);
            }
            cursor = Self::next_free(block);
        }
        None
    }

    unsafe fn visit(&self, f: &mut dyn FnMut(Block) -> ControlFlow<()>) {
        let mut cursor = self.head;
        while let Some(block) = cursor {
            if let ControlFlow::Break(()) = f(block) {
                return;
            }
            cursor = Self::next_free(block);
        }
    }
}
