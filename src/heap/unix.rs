use core::ptr::NonNull;

use super::HeapSource;

/// A [`HeapSource`] backed by an anonymous memory mapping.
///
/// [`MmapHeap::reserve`] reserves an address-space window up front without
/// committing any memory. [`grow`] then commits whole pages with `mprotect`
/// as the break advances, so the heap never moves. The window is unmapped
/// when the `MmapHeap` is dropped.
///
/// [`grow`]: HeapSource::grow
#[derive(Debug)]
pub struct MmapHeap {
    start: NonNull<u8>,
    /// The size of the reserved window, a multiple of the page size.
    reserved: usize,
    /// The size of the read-write prefix of the window.
    committed: usize,
    len: usize,
    page_size_m1: usize,
}

// Safety: The mapping is exclusively owned by `MmapHeap`
unsafe impl Send for MmapHeap {}

impl MmapHeap {
    /// Reserve a window of at least `capacity` bytes. Returns `None` if the
    /// operating system refuses the mapping.
    pub fn reserve(capacity: usize) -> Option<Self> {
        let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if page_size <= 0 || !(page_size as usize).is_power_of_two() {
            return None;
        }
        let page_size_m1 = page_size as usize - 1;
        let reserved = capacity.checked_add(page_size_m1)? & !page_size_m1;
        if reserved == 0 {
            return None;
        }

        let ptr = unsafe {
            libc::mmap(
                core::ptr::null_mut(),
                reserved,
                libc::PROT_NONE,
                libc::MAP_ANONYMOUS | libc::MAP_PRIVATE,
                -1,
                0,
            )
        };

        if ptr == libc::MAP_FAILED {
            log::debug!("mmap({}) failed", reserved);
            return None;
        }

        Some(Self {
            start: NonNull::new(ptr as *mut u8)?,
            reserved,
            committed: 0,
            len: 0,
            page_size_m1,
        })
    }

    /// The size of the reserved window.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.reserved
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

unsafe impl HeapSource for MmapHeap {
    fn grow(&mut self, len: usize) -> Option<NonNull<u8>> {
        let new_len = self.len.checked_add(len).filter(|&x| x <= self.reserved)?;

        if new_len > self.committed {
            // `reserved` is page-aligned, so this can't exceed it
            let new_committed = (new_len + self.page_size_m1) & !self.page_size_m1;
            let result = unsafe {
                libc::mprotect(
                    self.start.as_ptr().add(self.committed) as *mut _,
                    new_committed - self.committed,
                    libc::PROT_READ | libc::PROT_WRITE,
                )
            };
            if result != 0 {
                log::debug!("mprotect failed while growing to {} bytes", new_len);
                return None;
            }
            self.committed = new_committed;
        }

        // Safety: `self.len <= self.reserved`
        let region = unsafe { NonNull::new_unchecked(self.start.as_ptr().add(self.len)) };
        self.len = new_len;
        Some(region)
    }
}

impl Drop for MmapHeap {
    fn drop(&mut self) {
        unsafe { libc::munmap(self.start.as_ptr() as *mut _, self.reserved) };
    }
}
