//! The allocator core
use core::{fmt, ptr::NonNull};

use crate::{
    block::{align_up, Block, Tag, ALIGNMENT, MAX_BLOCK_SIZE, OVERHEAD},
    coalesce::coalesce,
    heap::HeapSource,
    registry::{FreeRegistry, SegregatedFreeList},
    utils::{addr, nonnull_slice_from_raw_parts},
};

mod check;
pub use self::check::{HeapCorruption, HeapStats};

/// The default number of bytes by which the heap grows when no free block
/// fits a request.
pub const DEFAULT_CHUNK_SIZE: usize = 1 << 12;

/// A managed heap can't grow past this size because every block must be
/// describable by a [`Tag`].
const MAX_HEAP_SIZE: usize = MAX_BLOCK_SIZE;

#[doc = svgbobdoc::transform!(
/// A boundary-tag allocator managing one growable heap obtained from `S`,
/// keeping its free blocks in `R`.
///
/// # Heap Layout
///
/// <center>
/// ```svgbob
///   base
///    |
///    v
///   ,---+---------------+---------+---------+-- - - --+---------+---,
///   | 0 |   prologue    | block 1 | block 2 |         | block n | E |
///   '---+---------------+---------+---------+-- - - --+---------+---'
///                                                                 ^
///                                                       epilogue header
/// ```
/// </center>
///
/// The prologue is a permanently allocated block of
/// [`R::MIN_BLOCK_SIZE`] bytes, and the epilogue is a zero-sized allocated
/// header. Whenever the heap grows, the new region's header takes the old
/// epilogue's place and a new epilogue is written at the new end.
///
/// # Properties
///
///  - No two physically adjacent blocks are ever both free.
///  - Every payload address and every block size is a multiple of
///    [`ALIGNMENT`] bytes.
///  - The heap grows by at least `CHUNK_SIZE` bytes at a time, and spans less
///    than 4 GiB.
///
/// # Concurrency
///
/// None of the methods are reentrant. An `Allocator` can be moved to another
/// thread but it is not [`Sync`].
///
/// [`R::MIN_BLOCK_SIZE`]: FreeRegistry::MIN_BLOCK_SIZE
)]
#[derive(Debug)]
pub struct Allocator<S, R = SegregatedFreeList, const CHUNK_SIZE: usize = DEFAULT_CHUNK_SIZE> {
    source: S,
    registry: R,
    heap: Option<Heap>,
}

/// The extent of an initialized heap.
#[derive(Debug, Clone, Copy)]
struct Heap {
    base: NonNull<u8>,
    /// The number of bytes from `base` to the end of the epilogue header
    len: usize,
    prologue: Block,
}

// Safety: All memory block headers directly or indirectly referenced by a
//         particular instance of `Allocator` are logically owned by that
//         `Allocator` and have no interior mutability.
unsafe impl<S: Send, R: Send, const CHUNK_SIZE: usize> Send for Allocator<S, R, CHUNK_SIZE> {}

/// The error returned by [`Allocator::initialize`] when the heap source
/// can't provide the initial heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutOfMemory;

impl fmt::Display for OutOfMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("the heap source could not provide the initial heap")
    }
}

#[cfg(feature = "std")]
#[cfg_attr(feature = "doc_cfg", doc(cfg(feature = "std")))]
impl std::error::Error for OutOfMemory {}

impl<S: HeapSource, R: FreeRegistry, const CHUNK_SIZE: usize> Allocator<S, R, CHUNK_SIZE> {
    /// Evaluates successfully if the parameters are valid.
    const VALID: () = assert!(
        CHUNK_SIZE % ALIGNMENT == 0
            && CHUNK_SIZE >= R::MIN_BLOCK_SIZE
            && CHUNK_SIZE <= MAX_HEAP_SIZE,
        "`CHUNK_SIZE` must be an aligned block size"
    );

    /// Construct an uninitialized allocator. [`Self::initialize`] must be
    /// called before anything can be allocated.
    pub const fn new(source: S) -> Self {
        let () = Self::VALID;
        Self {
            source,
            registry: R::INIT,
            heap: None,
        }
    }

    /// Lay out a new heap and grow it by `CHUNK_SIZE` bytes.
    ///
    /// The new heap starts wherever the heap source currently ends. Calling
    /// this again abandons every block of the previous heap.
    ///
    /// # Examples
    ///
    /// ```
    /// use tagalloc::{Allocator, ArenaHeap, FreeList};
    /// use std::mem::MaybeUninit;
    ///
    /// let mut pool = [MaybeUninit::uninit(); 4096];
    /// let mut tiny: Allocator<_, FreeList> = Allocator::new(ArenaHeap::new(&mut pool));
    /// assert!(tiny.initialize().is_err());
    ///
    /// let mut pool = [MaybeUninit::uninit(); 8192];
    /// let mut alloc: Allocator<_, FreeList> = Allocator::new(ArenaHeap::new(&mut pool));
    /// assert!(alloc.initialize().is_ok());
    /// ```
    pub fn initialize(&mut self) -> Result<(), OutOfMemory> {
        self.heap = None;

        let prologue_size = R::MIN_BLOCK_SIZE;
        // padding word + prologue + epilogue header
        let len = prologue_size + OVERHEAD;
        let base = self.source.grow(len).ok_or(OutOfMemory)?;
        debug_assert_eq!(addr(base.as_ptr()) % ALIGNMENT, 0);

        // Safety: `base..base + len` is owned by us now
        let prologue = unsafe {
            // The padding reads as a zero-sized footer, which makes the
            // prologue its own predecessor.
            base.as_ptr().cast::<u32>().write(0);
            let prologue = Block::from_payload(NonNull::new_unchecked(base.as_ptr().add(OVERHEAD)));
            prologue.set_tags(prologue_size, true);
            prologue.next().set_header(Tag::EPILOGUE);
            prologue
        };

        self.registry.reset(base);
        self.heap = Some(Heap {
            base,
            len,
            prologue,
        });
        log::debug!("initialize: heap at {:p}", base);

        // Safety: The heap was just initialized
        if unsafe { self.extend_heap(CHUNK_SIZE) }.is_none() {
            self.heap = None;
            return Err(OutOfMemory);
        }
        Ok(())
    }

    /// Whether [`Self::initialize`] has succeeded.
    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.heap.is_some()
    }

    /// Grow the heap by `len` bytes and coalesce the new region with the
    /// preceding block. Returns the resulting (registered) free block.
    ///
    /// # Safety
    ///
    /// The heap must be in a consistent state.
    unsafe fn extend_heap(&mut self, len: usize) -> Option<Block> {
        debug_assert_eq!(len % ALIGNMENT, 0);
        debug_assert!(len >= R::MIN_BLOCK_SIZE);
        let heap = self.heap.as_mut()?;

        let new_len = if let Some(x) = heap.len.checked_add(len).filter(|&x| x <= MAX_HEAP_SIZE) {
            x
        } else {
            log::debug!("extend_heap({}): the heap would exceed its size limit", len);
            return None;
        };

        let region = if let Some(x) = self.source.grow(len) {
            x
        } else {
            log::debug!("extend_heap({}): the heap source is exhausted", len);
            return None;
        };
        debug_assert_eq!(
            addr(region.as_ptr()),
            addr(heap.base.as_ptr()) + heap.len,
            "the heap source is not contiguous"
        );
        heap.len = new_len;

        // The new block's header replaces the old epilogue
        let block = Block::from_payload(region);
        block.set_tags(len, false);
        block.next().set_header(Tag::EPILOGUE);
        log::trace!("extend_heap({}) = {:?}", len, block);

        Some(coalesce(&mut self.registry, heap.prologue, block))
    }

    /// The size of a block that can hold `size` bytes of payload.
    #[inline]
    fn adjusted_size(size: usize) -> Option<usize> {
        let asize = align_up(size.checked_add(OVERHEAD)?)?.max(R::MIN_BLOCK_SIZE);
        if asize > MAX_BLOCK_SIZE {
            log::debug!("{} bytes won't fit in a block", size);
            return None;
        }
        Some(asize)
    }

    /// Attempt to allocate `size` bytes.
    ///
    /// Returns the starting address of the payload on success; `None` if
    /// `size` is zero, the allocator is not initialized, or the heap can't
    /// grow enough. A failure leaves the allocator unchanged.
    ///
    /// # Examples
    ///
    /// ```
    /// use tagalloc::{Allocator, ArenaHeap};
    /// use std::mem::MaybeUninit;
    ///
    /// let mut pool = [MaybeUninit::uninit(); 65536];
    /// let mut alloc: Allocator<_> = Allocator::new(ArenaHeap::new(&mut pool));
    /// alloc.initialize().unwrap();
    ///
    /// let ptr = alloc.allocate(100).unwrap();
    /// assert_eq!(ptr.as_ptr() as usize % 8, 0);
    /// assert!(alloc.allocate(0).is_none());
    /// unsafe { alloc.release(ptr) };
    /// ```
    pub fn allocate(&mut self, size: usize) -> Option<NonNull<u8>> {
        if size == 0 {
            return None;
        }
        let first = self.heap.as_ref()?.prologue;
        let asize = Self::adjusted_size(size)?;

        // Safety: The heap is initialized and consistent
        unsafe {
            let block = if let Some(block) = self.registry.find_fit(asize) {
                block
            } else {
                self.extend_heap(asize.max(CHUNK_SIZE))?
            };
            Some(self.place(first, block, asize))
        }
    }

    /// Similar to [`Self::allocate`] but zero-fills the whole payload.
    pub fn allocate_zeroed(&mut self, size: usize) -> Option<NonNull<u8>> {
        let ptr = self.allocate(size)?;
        // Safety: `ptr` is a live allocation of ours
        unsafe {
            let len = Block::from_payload(ptr).payload_size();
            ptr.as_ptr().write_bytes(0, len);
        }
        Some(ptr)
    }

    /// Turn the free, registered `block` into a used block of `asize` bytes,
    /// splitting off the rest as a new free block if it is large enough to
    /// be one.
    ///
    /// # Safety
    ///
    /// `block` must be a registered free block of at least `asize` bytes, and
    /// `first` must be the prologue.
    unsafe fn place(&mut self, first: Block, block: Block, asize: usize) -> NonNull<u8> {
        let csize = block.size();
        debug_assert!(!block.is_used());
        debug_assert!(csize >= asize);

        self.registry.remove(block);

        let remainder = csize - asize;
        if remainder < R::MIN_BLOCK_SIZE {
            // The remainder would be an unusable fragment
            block.set_tags(csize, true);
            log::trace!("place({:?}, {}): consumed {} bytes", block, asize, csize);
        } else {
            block.set_tags(asize, true);
            let rest = block.next();
            rest.set_tags(remainder, false);
            coalesce(&mut self.registry, first, rest);
            log::trace!("place({:?}, {}): split off {:?}", block, asize, rest);
        }

        block.payload()
    }

    /// Deallocate a previously allocated memory block.
    ///
    /// # Time Complexity
    ///
    /// This method completes in constant time with [`FreeList`]. With
    /// [`SegregatedFreeList`] it is linear in the length of the size class
    /// the merged block lands in.
    ///
    /// # Safety
    ///
    /// `ptr` must denote a memory block previously allocated via `self` that
    /// has not been released since.
    ///
    /// [`FreeList`]: crate::FreeList
    pub unsafe fn release(&mut self, ptr: NonNull<u8>) {
        let first = if let Some(heap) = &self.heap {
            heap.prologue
        } else {
            debug_assert!(false, "release on an uninitialized allocator");
            return;
        };

        let block = Block::from_payload(ptr);
        debug_assert!(block.is_used(), "{:?} is not an allocated block", block);
        debug_assert_eq!(block.header(), block.footer());

        block.set_tags(block.size(), false);
        coalesce(&mut self.registry, first, block);
    }

    /// Move a previously allocated memory block into a new block of
    /// `new_size` bytes.
    ///
    /// The first `min(new_size, usable size)` bytes are copied to the new
    /// block, and the old block is released. Returns the new payload address
    /// on success. On failure (including `new_size == 0`) `None` is returned
    /// and the old block is left untouched.
    ///
    /// # Time Complexity
    ///
    /// Unlike other methods, this method will complete in linear time
    /// (`O(old_size)`).
    ///
    /// # Safety
    ///
    /// `ptr` must denote a memory block previously allocated via `self` that
    /// has not been released since.
    pub unsafe fn resize(&mut self, ptr: NonNull<u8>, new_size: usize) -> Option<NonNull<u8>> {
        // The old block stays allocated until the data is safe, so the two
        // blocks never overlap.
        let new_ptr = self.allocate(new_size)?;

        let len = Block::from_payload(ptr).payload_size().min(new_size);
        core::ptr::copy_nonoverlapping(ptr.as_ptr(), new_ptr.as_ptr(), len);

        self.release(ptr);
        Some(new_ptr)
    }

    /// Get the number of bytes the owner of an allocation may use.
    ///
    /// # Safety
    ///
    /// `ptr` must denote a live memory block allocated via `self`.
    #[inline]
    pub unsafe fn usable_size(&self, ptr: NonNull<u8>) -> usize {
        Block::from_payload(ptr).payload_size()
    }

    /// The memory managed by this allocator, including the prologue and the
    /// epilogue. `None` if the allocator is not initialized.
    pub fn heap_span(&self) -> Option<NonNull<[u8]>> {
        self.heap
            .as_ref()
            .map(|heap| nonnull_slice_from_raw_parts(heap.base, heap.len))
    }

    /// Get a reference to the heap source.
    #[inline]
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Get a mutable reference to the heap source.
    ///
    /// # Safety
    ///
    /// The caller must not grow the source; the allocator assumes it is the
    /// only one doing that.
    #[inline]
    pub unsafe fn source_mut_unchecked(&mut self) -> &mut S {
        &mut self.source
    }

    /// Get a reference to the free block registry.
    #[inline]
    pub fn registry(&self) -> &R {
        &self.registry
    }
}

impl<S: HeapSource + const_default1::ConstDefault, R: FreeRegistry, const CHUNK_SIZE: usize>
    const_default1::ConstDefault for Allocator<S, R, CHUNK_SIZE>
{
    const DEFAULT: Self = Self::new(S::DEFAULT);
}
