#![cfg(unix)]
use tagalloc::{Allocator, HeapSource, MmapHeap, SegregatedFreeList};

#[test]
fn reserve_and_grow() {
    let mut heap = MmapHeap::reserve(1 << 20).unwrap();
    assert!(heap.capacity() >= 1 << 20);
    assert!(heap.is_empty());

    let a = heap.grow(100).unwrap();
    let b = heap.grow(5000).unwrap();
    assert_eq!(b.as_ptr() as usize - a.as_ptr() as usize, 100);
    assert_eq!(heap.len(), 5100);

    // The committed pages are writable
    unsafe {
        a.as_ptr().write_bytes(0xcc, 5100);
        assert_eq!(b.as_ptr().add(4999).read(), 0xcc);
    }

    assert!(heap.grow(1 << 21).is_none());
    assert_eq!(heap.len(), 5100);
}

#[test]
fn allocator_on_mmap() {
    let _ = env_logger::builder().is_test(true).try_init();

    let heap = MmapHeap::reserve(16 << 20).unwrap();
    let mut alloc: Allocator<_, SegregatedFreeList> = Allocator::new(heap);
    alloc.initialize().unwrap();

    let mut ptrs = Vec::new();
    for i in 0..200 {
        let size = 64 << (i % 10);
        let ptr = alloc.allocate(size).unwrap();
        unsafe { ptr.as_ptr().write_bytes(i as u8, size) };
        ptrs.push((ptr, size, i as u8));
    }
    alloc.check().unwrap();

    for &(ptr, size, fill) in ptrs.iter().rev() {
        let bytes = unsafe { std::slice::from_raw_parts(ptr.as_ptr(), size) };
        assert!(bytes.iter().all(|&b| b == fill));
        unsafe { alloc.release(ptr) };
    }

    let stats = alloc.check().unwrap();
    assert_eq!(stats.used_blocks, 0);
    assert_eq!(stats.free_blocks, 1);
    assert_eq!(stats.heap_size, alloc.source().len());
}
