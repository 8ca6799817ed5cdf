//! Heap walking and consistency checks
use core::{fmt, ops::ControlFlow};

use super::{Allocator, Heap};
use crate::{
    block::{Block, Tag, ALIGNMENT},
    heap::HeapSource,
    registry::FreeRegistry,
    utils::addr,
};

/// A summary of a heap, produced by [`Allocator::stats`] and
/// [`Allocator::check`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HeapStats {
    /// The number of bytes under management, including the prologue and the
    /// epilogue.
    pub heap_size: usize,
    pub used_blocks: usize,
    /// The total size of the allocated blocks, including their tags.
    pub used_bytes: usize,
    pub free_blocks: usize,
    /// The total size of the free blocks, including their tags.
    pub free_bytes: usize,
    /// The size of the largest free block.
    pub largest_free: usize,
}

/// A heap inconsistency found by [`Allocator::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeapCorruption {
    /// The allocator has not been initialized.
    Uninitialized,
    /// The prologue block's tags were overwritten.
    BadPrologue,
    /// The heap does not end with an epilogue header where it should.
    BadEpilogue { addr: usize },
    /// A block's payload is not aligned to [`ALIGNMENT`] bytes.
    Misaligned { addr: usize },
    /// A block extends past the end of the heap.
    OutOfBounds { addr: usize, size: usize },
    /// A block is too small to ever be a free block.
    Undersized { addr: usize, size: usize },
    /// A block's header and footer disagree.
    TagMismatch { addr: usize, header: Tag, footer: Tag },
    /// A free block immediately follows another free block.
    AdjacentFree { addr: usize },
    /// A free block is missing from the free block registry.
    Unregistered { addr: usize },
    /// A free block is registered more than once.
    Duplicate { addr: usize },
    /// The registry holds a different number of entries than there are free
    /// blocks.
    RegistryMismatch { listed: usize, free: usize },
}

impl fmt::Display for HeapCorruption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Uninitialized => write!(f, "the allocator is not initialized"),
            Self::BadPrologue => write!(f, "the prologue block is damaged"),
            Self::BadEpilogue { addr } => write!(f, "expected the epilogue at 0x{:x}", addr),
            Self::Misaligned { addr } => write!(f, "block 0x{:x} is misaligned", addr),
            Self::OutOfBounds { addr, size } => {
                write!(f, "block 0x{:x} ({} bytes) overruns the heap", addr, size)
            }
            Self::Undersized { addr, size } => {
                write!(f, "block 0x{:x} is too small ({} bytes)", addr, size)
            }
            Self::TagMismatch {
                addr,
                header,
                footer,
            } => write!(
                f,
                "block 0x{:x} has header {:?} but footer {:?}",
                addr, header, footer
            ),
            Self::AdjacentFree { addr } => {
                write!(f, "free block 0x{:x} follows another free block", addr)
            }
            Self::Unregistered { addr } => write!(f, "free block 0x{:x} is not registered", addr),
            Self::Duplicate { addr } => {
                write!(f, "free block 0x{:x} is registered more than once", addr)
            }
            Self::RegistryMismatch { listed, free } => write!(
                f,
                "the registry lists {} blocks but the heap has {} free blocks",
                listed, free
            ),
        }
    }
}

#[cfg(feature = "std")]
#[cfg_attr(feature = "doc_cfg", doc(cfg(feature = "std")))]
impl std::error::Error for HeapCorruption {}

impl<S: HeapSource, R: FreeRegistry, const CHUNK_SIZE: usize> Allocator<S, R, CHUNK_SIZE> {
    /// Summarize the heap by walking every block.
    ///
    /// The heap is assumed to be consistent. Use [`Self::check`] on a heap
    /// that might not be.
    pub fn stats(&self) -> HeapStats {
        let heap = if let Some(heap) = &self.heap {
            heap
        } else {
            return HeapStats::default();
        };

        let mut stats = HeapStats {
            heap_size: heap.len,
            ..HeapStats::default()
        };

        // Safety: The heap is consistent
        unsafe {
            let mut block = heap.prologue.next();
            while block.size() != 0 {
                stats.record(block);
                block = block.next();
            }
        }

        stats
    }

    /// Walk the heap and the registry, verifying every invariant the
    /// allocator relies on.
    ///
    /// This is meant for tests and debugging; it takes time quadratic in the
    /// number of free blocks.
    pub fn check(&self) -> Result<HeapStats, HeapCorruption> {
        let heap = self.heap.as_ref().ok_or(HeapCorruption::Uninitialized)?;

        // Safety: Each block's extent is verified before it is trusted
        unsafe {
            let prologue_tag = Tag::pack(R::MIN_BLOCK_SIZE, true);
            if heap.prologue.header() != prologue_tag || heap.prologue.footer() != prologue_tag {
                return Err(HeapCorruption::BadPrologue);
            }

            let stats = Self::walk(heap)?;

            // Count the registry's entries, bailing out on a cycle
            let mut listed = 0;
            self.registry.visit(&mut |_| {
                listed += 1;
                if listed > stats.free_blocks {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            });
            if listed != stats.free_blocks {
                return Err(HeapCorruption::RegistryMismatch {
                    listed,
                    free: stats.free_blocks,
                });
            }

            // Every free block must be registered exactly once. Together
            // with the count check above, this means the registry holds
            // nothing else.
            let mut block = heap.prologue.next();
            while block.size() != 0 {
                if !block.is_used() {
                    let mut occurrences = 0;
                    self.registry.visit(&mut |b| {
                        occurrences += (b == block) as usize;
                        ControlFlow::Continue(())
                    });
                    match occurrences {
                        0 => return Err(HeapCorruption::Unregistered { addr: block.addr() }),
                        1 => {}
                        _ => return Err(HeapCorruption::Duplicate { addr: block.addr() }),
                    }
                }
                block = block.next();
            }

            Ok(stats)
        }
    }

    /// Walk the blocks of `heap`, checking the tags and the block extents.
    unsafe fn walk(heap: &Heap) -> Result<HeapStats, HeapCorruption> {
        let end = addr(heap.base.as_ptr()) + heap.len;
        let mut stats = HeapStats {
            heap_size: heap.len,
            ..HeapStats::default()
        };

        let mut prev_free = false;
        let mut block = heap.prologue.next();
        loop {
            let block_addr = block.addr();
            if block_addr > end {
                return Err(HeapCorruption::BadEpilogue { addr: end });
            }
            if block_addr % ALIGNMENT != 0 {
                return Err(HeapCorruption::Misaligned { addr: block_addr });
            }

            let header = block.header();
            let size = header.size();
            if size == 0 {
                if block_addr != end || !header.is_used() {
                    return Err(HeapCorruption::BadEpilogue { addr: end });
                }
                break;
            }
            if size > end - block_addr {
                return Err(HeapCorruption::OutOfBounds {
                    addr: block_addr,
                    size,
                });
            }
            if size < R::MIN_BLOCK_SIZE {
                return Err(HeapCorruption::Undersized {
                    addr: block_addr,
                    size,
                });
            }

            let footer = block.footer();
            if footer != header {
                return Err(HeapCorruption::TagMismatch {
                    addr: block_addr,
                    header,
                    footer,
                });
            }

            let free = !header.is_used();
            if free && prev_free {
                return Err(HeapCorruption::AdjacentFree { addr: block_addr });
            }
            prev_free = free;

            stats.record(block);
            block = block.next();
        }

        Ok(stats)
    }
}

impl HeapStats {
    #[inline]
    unsafe fn record(&mut self, block: Block) {
        let size = block.size();
        if block.is_used() {
            self.used_blocks += 1;
            self.used_bytes += size;
        } else {
            self.free_blocks += 1;
            self.free_bytes += size;
            self.largest_free = self.largest_free.max(size);
        }
    }
}
