//! Boundary tags and the address arithmetic of the managed heap
use core::{fmt, ptr::NonNull};

use crate::utils::addr;

/// The alignment of every block size and every payload address.
pub const ALIGNMENT: usize = 8;

/// The size of a boundary tag.
pub const TAG_SIZE: usize = core::mem::size_of::<Tag>();

/// The bytes a block spends on its header and footer.
pub const OVERHEAD: usize = TAG_SIZE * 2;

/// The largest size a [`Tag`] can describe.
pub const MAX_BLOCK_SIZE: usize = u32::MAX as usize & !(ALIGNMENT - 1);

/// The bit of a [`Tag`] indicating whether the block is allocated or not.
const TAG_USED: u32 = 1;
/// The bits of a [`Tag`] that are not part of the size. The size is always
/// a multiple of [`ALIGNMENT`], so they are free for flags.
const TAG_FLAGS_MASK: u32 = (ALIGNMENT - 1) as u32;

const _: () = assert!(
    ALIGNMENT.is_power_of_two() && ALIGNMENT > TAG_USED as usize && OVERHEAD % ALIGNMENT == 0,
    "`ALIGNMENT` must leave room for the tag flags"
);

/// Round `size` up to a multiple of [`ALIGNMENT`]. Returns `None` on
/// overflow.
#[inline]
pub const fn align_up(size: usize) -> Option<usize> {
    match size.checked_add(ALIGNMENT - 1) {
        Some(x) => Some(x & !(ALIGNMENT - 1)),
        None => None,
    }
}

/// A boundary tag: a block's size and allocated bit packed into one word.
///
/// Every block carries two identical copies, one immediately before the
/// payload (the header) and one at the very end of the block (the footer).
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tag(u32);

impl Tag {
    /// The tag terminating the heap. It describes a zero-sized, allocated
    /// block.
    pub const EPILOGUE: Self = Self::pack(0, true);

    /// Pack a size and an allocated bit.
    ///
    /// `size` must be a multiple of [`ALIGNMENT`] not greater than
    /// [`MAX_BLOCK_SIZE`].
    #[inline]
    pub const fn pack(size: usize, used: bool) -> Self {
        debug_assert!(size % ALIGNMENT == 0, "block size is not aligned");
        debug_assert!(size <= MAX_BLOCK_SIZE, "block size does not fit in a tag");
        Self(size as u32 | used as u32)
    }

    /// The size of the whole block, including both tags.
    #[inline]
    pub const fn size(self) -> usize {
        (self.0 & !TAG_FLAGS_MASK) as usize
    }

    #[inline]
    pub const fn is_used(self) -> bool {
        (self.0 & TAG_USED) != 0
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tag")
            .field("size", &self.size())
            .field("used", &self.is_used())
            .finish()
    }
}

#[doc = svgbobdoc::transform!(
/// A memory block, identified by the address of its payload.
///
/// # Layout
///
/// <center>
/// ```svgbob
///      header                    payload                          footer
///   ,-----------,-------------------------------------------,-----------,
///   | size|used | links while free, caller's data otherwise | size|used |
///   '-----------'-------------------------------------------'-----------'
///   ^           ^                                           ^           ^
///   |           |                                           |           |
///   payload - 4 payload                     payload + size - 8          next payload - 4
/// ```
/// </center>
///
/// All methods are plain pointer arithmetic. The ones that read a tag are
/// `unsafe` because they trust the caller that the block is a real block of
/// an initialized heap.
)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[repr(transparent)]
pub struct Block(NonNull<u8>);

impl Block {
    /// Get the block whose payload starts at `payload`.
    ///
    /// # Safety
    ///
    /// `payload` must be the payload address of a block of an initialized
    /// heap (or of a block about to be created by [`Self::set_tags`]).
    #[inline]
    pub const unsafe fn from_payload(payload: NonNull<u8>) -> Self {
        Self(payload)
    }

    #[inline]
    pub const fn payload(self) -> NonNull<u8> {
        self.0
    }

    #[inline]
    pub fn addr(self) -> usize {
        addr(self.0.as_ptr())
    }

    #[inline]
    fn header_ptr(self) -> *mut Tag {
        self.0.as_ptr().wrapping_sub(TAG_SIZE).cast()
    }

    /// # Safety
    ///
    /// The header word must be readable.
    #[inline]
    pub unsafe fn header(self) -> Tag {
        self.header_ptr().read()
    }

    /// Overwrite the header alone. Used for the epilogue, which has no
    /// footer.
    ///
    /// # Safety
    ///
    /// The header word must be writable.
    #[inline]
    pub unsafe fn set_header(self, tag: Tag) {
        self.header_ptr().write(tag);
    }

    /// # Safety
    ///
    /// See [`Self::header`].
    #[inline]
    pub unsafe fn size(self) -> usize {
        self.header().size()
    }

    /// # Safety
    ///
    /// See [`Self::header`].
    #[inline]
    pub unsafe fn is_used(self) -> bool {
        self.header().is_used()
    }

    /// The number of bytes usable by the block's owner.
    ///
    /// # Safety
    ///
    /// The header must describe a real (non-epilogue) block.
    #[inline]
    pub unsafe fn payload_size(self) -> usize {
        debug_assert!(self.size() >= OVERHEAD);
        self.size() - OVERHEAD
    }

    /// The footer is located by the size recorded in the header, never by
    /// the footer itself.
    #[inline]
    unsafe fn footer_ptr(self) -> *mut Tag {
        self.0.as_ptr().add(self.size()).sub(OVERHEAD).cast()
    }

    /// # Safety
    ///
    /// The whole block described by the header must be readable.
    #[inline]
    pub unsafe fn footer(self) -> Tag {
        self.footer_ptr().read()
    }

    /// Write matching header and footer tags.
    ///
    /// # Safety
    ///
    /// `self.payload() - TAG_SIZE .. self.payload() + size - TAG_SIZE` must be
    /// writable and owned by the caller.
    #[inline]
    pub unsafe fn set_tags(self, size: usize, used: bool) {
        let tag = Tag::pack(size, used);
        self.set_header(tag);
        self.footer_ptr().write(tag);
    }

    /// Get the physically next block.
    ///
    /// # Safety
    ///
    /// The header must be telling the truth. The result is the epilogue if
    /// `self` is the last block.
    #[inline]
    pub unsafe fn next(self) -> Self {
        Self(NonNull::new_unchecked(self.0.as_ptr().add(self.size())))
    }

    /// The footer of the physically previous block.
    ///
    /// # Safety
    ///
    /// The word `OVERHEAD` bytes before the payload must be readable.
    #[inline]
    pub unsafe fn prev_footer(self) -> Tag {
        self.0.as_ptr().sub(OVERHEAD).cast::<Tag>().read()
    }

    /// Get the physically previous block.
    ///
    /// For the first block of a heap the previous "footer" is the padding
    /// word, which reads as size zero, so the result is `self`.
    ///
    /// # Safety
    ///
    /// See [`Self::prev_footer`]. The previous footer must be telling the
    /// truth.
    #[inline]
    pub unsafe fn prev(self) -> Self {
        Self(NonNull::new_unchecked(
            self.0.as_ptr().sub(self.prev_footer().size()),
        ))
    }

    /// A pointer to the `index`-th `T`-sized link slot in the payload.
    /// Free registries keep their list links here while the block is free.
    #[inline]
    pub(crate) fn link_slot<T>(self, index: usize) -> *mut T {
        self.0.as_ptr().cast::<T>().wrapping_add(index)
    }
}
