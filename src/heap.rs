//! Growable memory sources backing an allocator
use core::{marker::PhantomData, mem::MaybeUninit, ptr::NonNull};

use crate::{block::ALIGNMENT, utils::addr};

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        mod unix;
        #[cfg_attr(feature = "doc_cfg", doc(cfg(unix)))]
        pub use self::unix::MmapHeap;
    }
}

/// A contiguous range of memory that can only grow at its end.
///
/// # Safety
///
/// A successful call to [`grow`] must return the previous end of the range
/// (or its start, on the first call), and the returned bytes must be
/// readable, writable, and exclusively owned by the caller until `self` is
/// dropped. The range never moves or shrinks, so the returned addresses stay
/// valid. The start of the range must be aligned to [`ALIGNMENT`] bytes.
///
/// [`grow`]: Self::grow
pub unsafe trait HeapSource {
    /// Extend the range by `len` bytes. Returns the start of the new region
    /// on success; `None` if the range cannot grow any further, in which case
    /// the range is unchanged.
    fn grow(&mut self, len: usize) -> Option<NonNull<u8>>;
}

/// A [`HeapSource`] carving an application-supplied buffer in the manner of
/// `sbrk`. Growth fails once the buffer is used up.
///
/// # Examples
///
/// ```
/// use tagalloc::{ArenaHeap, HeapSource};
/// use std::mem::MaybeUninit;
///
/// let mut pool = [MaybeUninit::uninit(); 64];
/// let mut heap = ArenaHeap::new(&mut pool);
/// let cap = heap.capacity();
/// let a = heap.grow(16).unwrap();
/// let b = heap.grow(16).unwrap();
/// assert_eq!(b.as_ptr() as usize - a.as_ptr() as usize, 16);
/// assert!(heap.grow(cap).is_none());
/// ```
#[derive(Debug)]
pub struct ArenaHeap<'pool> {
    start: NonNull<u8>,
    capacity: usize,
    len: usize,
    _phantom: PhantomData<&'pool mut [MaybeUninit<u8>]>,
}

// Safety: `ArenaHeap` is a unique borrow of the buffer
unsafe impl Send for ArenaHeap<'_> {}

impl<'pool> ArenaHeap<'pool> {
    /// Construct an `ArenaHeap` over `pool`. The bytes up to the first
    /// [`ALIGNMENT`]-byte boundary of `pool` are left unused.
    pub fn new(pool: &'pool mut [MaybeUninit<u8>]) -> Self {
        let unaligned = addr(pool.as_ptr());
        let skip = unaligned.wrapping_neg() & (ALIGNMENT - 1);
        let capacity = pool.len().saturating_sub(skip);
        let skip = skip.min(pool.len());

        // Safety: `skip <= pool.len()`, and a slice pointer is never null
        let start = unsafe { NonNull::new_unchecked(pool.as_mut_ptr().add(skip) as *mut u8) };

        Self {
            start,
            capacity,
            len: 0,
            _phantom: PhantomData,
        }
    }

    /// The number of bytes this heap can grow to.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The number of bytes handed out so far.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

unsafe impl HeapSource for ArenaHeap<'_> {
    fn grow(&mut self, len: usize) -> Option<NonNull<u8>> {
        let new_len = self.len.checked_add(len).filter(|&x| x <= self.capacity)?;
        // Safety: `self.len <= self.capacity`, so this stays in `pool`
        let region = unsafe { NonNull::new_unchecked(self.start.as_ptr().add(self.len)) };
        self.len = new_len;
        Some(region)
    }
}
