extern crate std;

use std::{collections::BTreeMap, ops::Range, ptr::NonNull};

use crate::{block::ALIGNMENT, utils::addr};

/// Tracks which bytes are free, used, or unknown to the allocator under test
/// and panics as soon as the allocator hands out a byte twice.
#[derive(Debug)]
pub struct ShadowAllocator {
    regions: BTreeMap<usize, SaRegion>,
}

#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub enum SaRegion {
    Free,
    Used,
    Invalid,
}

impl Default for ShadowAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl ShadowAllocator {
    pub fn new() -> Self {
        Self {
            regions: Some((0, SaRegion::Invalid)).into_iter().collect(),
        }
    }

    /// Flip every byte of `range` from `old_region` to `new_region`,
    /// panicking unless the whole range is currently `old_region`.
    ///
    /// `regions` maps each address where the state changes to the state
    /// starting there, so the range's endpoints may need entries inserted
    /// or merged away.
    pub fn convert_range(
        &mut self,
        range: Range<usize>,
        old_region: SaRegion,
        new_region: SaRegion,
    ) {
        if range.len() == 0 {
            return;
        }

        assert_ne!(old_region, new_region);
        log::trace!(
            "sa: converting {:?} from {:?} to {:?}",
            range,
            old_region,
            new_region
        );

        let (&start_addr, &region) = self.regions.range(0..range.end).rev().next().unwrap();
        if start_addr > range.start {
            panic!("there's a discontinuity in range {:?}", range);
        } else if region != old_region {
            panic!(
                "range {:?} is {:?} (expected {:?})",
                range, region, old_region
            );
        }

        // Start a run at `range.start`
        if start_addr == range.start {
            *self.regions.get_mut(&start_addr).unwrap() = new_region;
        } else {
            self.regions.insert(range.start, new_region);
        }

        // Merge with the preceding run
        if let Some((_, &region)) = self.regions.range(0..range.start).rev().next() {
            if region == new_region {
                self.regions.remove(&range.start);
            }
        }

        if let Some(&end_region) = self.regions.get(&range.end) {
            // Merge with the following run
            if end_region == new_region {
                self.regions.remove(&range.end);
            }
        } else {
            // The rest of the old run resumes at `range.end`
            self.regions.insert(range.end, old_region);
        }
    }

    /// Record memory handed to the allocator by its heap source.
    pub fn insert_free_block(&mut self, start: NonNull<u8>, len: usize) {
        let start = addr(start.as_ptr());
        self.convert_range(start..start + len, SaRegion::Invalid, SaRegion::Free);
    }

    pub fn allocate(&mut self, start: NonNull<u8>, len: usize) {
        let start = addr(start.as_ptr());
        assert!(
            start % ALIGNMENT == 0,
            "0x{:x} is not properly aligned ({} bytes alignment required)",
            start,
            ALIGNMENT
        );
        self.convert_range(start..start + len, SaRegion::Free, SaRegion::Used);
    }

    pub fn deallocate(&mut self, start: NonNull<u8>, len: usize) {
        let start = addr(start.as_ptr());
        self.convert_range(start..start + len, SaRegion::Used, SaRegion::Free);
    }
}

#[test]
fn shadow_tracks_ranges() {
    let at = |x: usize| NonNull::new(x as *mut u8).unwrap();
    let mut sa = ShadowAllocator::new();
    sa.insert_free_block(at(0x1000), 0x100);
    sa.allocate(at(0x1000), 0x10);
    sa.allocate(at(0x1010), 0x20);
    sa.deallocate(at(0x1000), 0x10);
    sa.allocate(at(0x1000), 0x8);
}

#[test]
#[should_panic]
fn shadow_rejects_overlap() {
    let at = |x: usize| NonNull::new(x as *mut u8).unwrap();
    let mut sa = ShadowAllocator::new();
    sa.insert_free_block(at(0x1000), 0x100);
    sa.allocate(at(0x1000), 0x10);
    sa.allocate(at(0x1008), 0x10);
}
