//! Boundary-tag coalescing
use crate::{block::Block, registry::FreeRegistry};

/// Merge a free `block` with whichever of its physical neighbours are free,
/// register the result, and return it.
///
/// `first` is the first block of the heap. During the merge the neighbours
/// are unregistered *before* any tag is rewritten because a registry may
/// locate a block by its current size.
///
/// # Safety
///
///  - `block` must be a free block of the heap tracked by `registry`, with
///    both tags written, and must not be registered yet.
///  - `first` must be the first block of the same heap.
///  - The heap must otherwise satisfy the invariants of [`Allocator`]; in
///    particular every free block other than `block` must be registered.
///
/// [`Allocator`]: crate::Allocator
pub(crate) unsafe fn coalesce<R: FreeRegistry>(
    registry: &mut R,
    first: Block,
    block: Block,
) -> Block {
    debug_assert!(!block.is_used());
    debug_assert_eq!(block.header(), block.footer());

    let prev_used = prev_is_used(first, block);
    let next = block.next();
    let next_used = next.is_used();
    let mut size = block.size();

    let merged = match (prev_used, next_used) {
        (true, true) => block,
        (true, false) => {
            registry.remove(next);
            size += next.size();
            block.set_tags(size, false);
            block
        }
        (false, true) => {
            let prev = block.prev();
            registry.remove(prev);
            size += prev.size();
            prev.set_tags(size, false);
            prev
        }
        (false, false) => {
            let prev = block.prev();
            registry.remove(prev);
            registry.remove(next);
            size += prev.size() + next.size();
            prev.set_tags(size, false);
            prev
        }
    };

    registry.insert(merged);
    merged
}

/// Whether the block physically preceding `block` is allocated. There is no
/// such block before the start of the heap, which counts as allocated.
#[inline]
unsafe fn prev_is_used(first: Block, block: Block) -> bool {
    let prev = block.prev();
    if prev == block || prev.addr() < first.addr() {
        true
    } else {
        block.prev_footer().is_used()
    }
}
