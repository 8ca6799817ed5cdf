use core::ptr::NonNull;

/// Polyfill for <https://github.com/rust-lang/rust/issues/95228>
#[rustversion::since(1.84)]
#[inline]
pub fn addr<T>(ptr: *const T) -> usize {
    ptr.addr()
}

/// Polyfill for <https://github.com/rust-lang/rust/issues/95228>
#[rustversion::before(1.84)]
#[inline]
pub fn addr<T>(ptr: *const T) -> usize {
    ptr as usize
}

/// Polyfill for <https://github.com/rust-lang/rust/issues/71941>
#[rustversion::since(1.70)]
#[inline]
pub fn nonnull_slice_from_raw_parts<T>(ptr: NonNull<T>, len: usize) -> NonNull<[T]> {
    NonNull::slice_from_raw_parts(ptr, len)
}

/// Polyfill for <https://github.com/rust-lang/rust/issues/71941>
#[rustversion::before(1.70)]
#[inline]
pub fn nonnull_slice_from_raw_parts<T>(ptr: NonNull<T>, len: usize) -> NonNull<[T]> {
    unsafe { NonNull::new_unchecked(core::ptr::slice_from_raw_parts_mut(ptr.as_ptr(), len)) }
}
