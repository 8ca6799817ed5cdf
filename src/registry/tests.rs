extern crate std;

use quickcheck_macros::quickcheck;
use core::mem::MaybeUninit;
use std::{boxed::Box, collections::BTreeSet, vec::Vec};

use super::*;
use crate::block::Tag;

const ARENA_LEN: usize = 16384;

#[repr(align(8))]
struct Align<T>(T);

/// A heap-shaped region holding free blocks of the given sizes, back to back.
struct Fixture {
    _mem: Box<Align<[MaybeUninit<u8>; ARENA_LEN]>>,
    base: NonNull<u8>,
    blocks: Vec<Block>,
}

impl Fixture {
    fn new(sizes: &[usize]) -> Self {
        let mut mem = Box::new(Align([MaybeUninit::new(0u8); ARENA_LEN]));
        let base = NonNull::new(mem.0.as_mut_ptr() as *mut u8).unwrap();
        assert!(sizes.iter().sum::<usize>() + 16 <= ARENA_LEN);

        let mut blocks = Vec::new();
        unsafe {
            let mut block = Block::from_payload(NonNull::new_unchecked(base.as_ptr().add(8)));
            for &size in sizes {
                block.set_tags(size, false);
                blocks.push(block);
                block = block.next();
            }
            block.set_header(Tag::EPILOGUE);
        }

        Self {
            _mem: mem,
            base,
            blocks,
        }
    }

    fn bytes(&self) -> Vec<u8> {
        unsafe { std::slice::from_raw_parts(self.base.as_ptr(), ARENA_LEN) }.to_vec()
    }
}

fn collect(registry: &impl FreeRegistry) -> Vec<Block> {
    let mut blocks = Vec::new();
    unsafe {
        registry.visit(&mut |block| {
            blocks.push(block);
            ControlFlow::Continue(())
        })
    };
    blocks
}

fn sizes_of(blocks: &[Block]) -> Vec<usize> {
    blocks.iter().map(|b| unsafe { b.size() }).collect()
}

#[test]
fn list_insert_is_lifo() {
    let fx = Fixture::new(&[32, 64, 48]);
    let b = &fx.blocks;
    let mut list = FreeList::INIT;
    list.reset(fx.base);

    unsafe {
        for &block in b {
            list.insert(block);
        }
        assert_eq!(collect(&list), [b[2], b[1], b[0]]);
        assert_eq!(list.head(), Some(b[2]));

        // first fit from the head, not best fit
        assert_eq!(list.find_fit(24), Some(b[2]));
        assert_eq!(list.find_fit(40), Some(b[2]));
        assert_eq!(list.find_fit(56), Some(b[1]));
        assert_eq!(list.find_fit(65), None);
    }
}

#[test]
fn list_remove_head_middle_tail() {
    let fx = Fixture::new(&[32, 40, 48, 56]);
    let b = &fx.blocks;
    let mut list = FreeList::INIT;
    list.reset(fx.base);

    unsafe {
        for &block in b {
            list.insert(block);
        }
        // [b3, b2, b1, b0]
        list.remove(b[3]);
        assert_eq!(collect(&list), [b[2], b[1], b[0]]);
        list.remove(b[1]);
        assert_eq!(collect(&list), [b[2], b[0]]);
        list.remove(b[0]);
        assert_eq!(collect(&list), [b[2]]);
        list.remove(b[2]);
        assert!(collect(&list).is_empty());
        assert_eq!(list, FreeList::INIT);
        assert_eq!(list.find_fit(24), None);
    }
}

#[test]
fn segregated_class_of() {
    type S = SegregatedFreeList<20>;
    assert_eq!(S::class_of(0), 0);
    assert_eq!(S::class_of(1), 0);
    assert_eq!(S::class_of(16), 4);
    assert_eq!(S::class_of(24), 4);
    assert_eq!(S::class_of(31), 4);
    assert_eq!(S::class_of(32), 5);
    assert_eq!(S::class_of(4096), 12);
    assert_eq!(S::class_of(usize::MAX), 19);

    // The last class is a catch-all
    type T = SegregatedFreeList<4>;
    assert_eq!(T::class_of(4), 2);
    assert_eq!(T::class_of(8), 3);
    assert_eq!(T::class_of(4096), 3);

    type U = SegregatedFreeList<1>;
    assert_eq!(U::class_of(4096), 0);
}

#[test]
fn segregated_classes_are_sorted() {
    let fx = Fixture::new(&[48, 40, 56, 32, 128, 16]);
    let mut seg: SegregatedFreeList = SegregatedFreeList::INIT;
    seg.reset(fx.base);

    unsafe {
        for &block in &fx.blocks {
            seg.insert(block);
        }
        assert_eq!(sizes_of(&collect(&seg)), [16, 32, 40, 48, 56, 128]);
    }
    assert!(!seg.is_class_empty(4));
    assert!(!seg.is_class_empty(5));
    assert!(seg.is_class_empty(6));
    assert!(!seg.is_class_empty(7));
}

#[test]
fn segregated_find_fit_climbs_classes() {
    let fx = Fixture::new(&[24, 200, 40]);
    let b = &fx.blocks;
    let mut seg: SegregatedFreeList = SegregatedFreeList::INIT;
    seg.reset(fx.base);

    unsafe {
        for &block in b {
            seg.insert(block);
        }
        assert_eq!(seg.find_fit(16), Some(b[0]));
        assert_eq!(seg.find_fit(30), Some(b[2]));
        assert_eq!(seg.find_fit(41), Some(b[1]));
        assert_eq!(seg.find_fit(200), Some(b[1]));
        assert_eq!(seg.find_fit(201), None);

        seg.remove(b[1]);
        assert_eq!(seg.find_fit(41), None);
        assert!(seg.is_class_empty(7));
    }
}

macro_rules! gen_test {
    ($mod:ident, $($tt:tt)*) => {
        mod $mod {
            use super::*;
            type TheRegistry = $($tt)*;

            const SIZES: &[usize] = &[32, 48, 64, 96, 40, 24];

            #[test]
            fn insert_remove_round_trip() {
                let _ = env_logger::builder().is_test(true).try_init();

                let fx = Fixture::new(SIZES);
                let b = &fx.blocks;
                let mut registry = TheRegistry::INIT;
                registry.reset(fx.base);

                unsafe {
                    for &block in &b[..4] {
                        registry.insert(block);
                    }

                    for &extra in &b[4..] {
                        let snapshot = registry.clone();
                        let order = collect(&registry);
                        let mut bytes = fx.bytes();

                        registry.insert(extra);
                        assert!(collect(&registry).contains(&extra));
                        registry.remove(extra);

                        assert_eq!(registry, snapshot);
                        assert_eq!(collect(&registry), order);

                        // The links of the other blocks are restored too.
                        // Only the payload of `extra` may differ.
                        let start = extra.addr() - fx.base.as_ptr() as usize;
                        let end = start + extra.payload_size();
                        let mut after = fx.bytes();
                        bytes[start..end].fill(0);
                        after[start..end].fill(0);
                        assert!(bytes == after, "registry links were not restored");
                    }
                }
            }

            #[quickcheck]
            fn random(bytecode: Vec<u8>) {
                let _ = env_logger::builder().is_test(true).try_init();

                let min = TheRegistry::MIN_BLOCK_SIZE;
                let sizes: Vec<usize> = (0..64).map(|i| min + 8 * ((i * 7) % 40)).collect();
                let fx = Fixture::new(&sizes);
                let mut registry = TheRegistry::INIT;
                registry.reset(fx.base);
                let mut model = BTreeSet::new();

                let mut it = bytecode.chunks(2);
                while let Some(&[i, probe]) = it.next() {
                    let block = fx.blocks[i as usize % fx.blocks.len()];
                    unsafe {
                        if model.remove(&block) {
                            log::trace!("remove {:?}", block);
                            registry.remove(block);
                        } else {
                            log::trace!("insert {:?}", block);
                            registry.insert(block);
                            model.insert(block);
                        }

                        let listed = collect(&registry);
                        assert_eq!(listed.len(), model.len());
                        assert_eq!(listed.iter().cloned().collect::<BTreeSet<_>>(), model);

                        let probe = min + 8 * (probe as usize % 48);
                        let any_fits = model.iter().any(|b| b.size() >= probe);
                        match registry.find_fit(probe) {
                            Some(found) => {
                                assert!(model.contains(&found));
                                assert!(found.size() >= probe);
                            }
                            None => assert!(!any_fits, "missed a fit for {}", probe),
                        }
                    }
                }
            }
        }
    };
}

gen_test!(free_list, FreeList);
gen_test!(segregated_20, SegregatedFreeList<20>);
gen_test!(segregated_6, SegregatedFreeList<6>);
gen_test!(segregated_1, SegregatedFreeList<1>);
