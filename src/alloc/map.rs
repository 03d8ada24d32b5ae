//! The allocation size map: one running maximum per hashed call site.
//!
//! The table is written from inside `malloc()`, so nothing in here may
//! allocate, lock or panic on the update path. Slots are plain `usize`s as far
//! as an outside reader is concerned: `AllocMap` is `#[repr(transparent)]` over
//! `[AtomicUsize; MAP_SIZE]`, which has the layout of `[usize; MAP_SIZE]`.

use std::sync::atomic::{AtomicUsize, Ordering};

use bytemuck::Zeroable;

/// Number of slots in the map. Must stay a power of two, since
/// [`call_site_index()`] masks instead of taking a modulus.
pub const MAP_SIZE: usize = 16 * 1024;

const _: () = assert!(MAP_SIZE.is_power_of_two());

/// Hash a return address into a slot of the map.
///
/// `(addr >> 4) ^ (addr << 8)`, truncated to `MAP_SIZE - 1`. This is
/// deliberately cheap and collides a lot; two call sites sharing a slot is
/// expected.
#[inline(always)]
pub const fn call_site_index(addr: usize) -> usize {
    let key = (addr >> 4) ^ (addr << 8);
    key & (MAP_SIZE - 1)
}

#[repr(transparent)]
pub struct AllocMap {
    slots: [AtomicUsize; MAP_SIZE],
}

// SAFETY: an all-zero `AllocMap` is the same as `AllocMap::new()`, and
// `AtomicUsize` is `Zeroable` with the `zeroable_atomics` feature.
unsafe impl Zeroable for AllocMap {}

impl AllocMap {
    pub const fn new() -> Self {
        Self {
            slots: [const { AtomicUsize::new(0) }; MAP_SIZE],
        }
    }

    /// A fresh map on the heap. The map is 128KiB on 64-bit targets, which is
    /// too much to build on the stack and move.
    pub fn boxed() -> Box<Self> {
        bytemuck::zeroed_box()
    }

    /// Record that `call_site` asked for `size` bytes. Never allocates.
    ///
    /// Relaxed `fetch_max()` is lock-free; concurrent writers may still see
    /// each other late, which only matters to readers polling mid-run.
    #[inline(always)]
    pub fn observe(&self, call_site: usize, size: usize) {
        self.slot(call_site_index(call_site))
            .fetch_max(size, Ordering::Relaxed);
    }

    #[inline(always)]
    fn slot(&self, index: usize) -> &AtomicUsize {
        debug_assert!(index < MAP_SIZE);
        // SAFETY: every caller passes an index masked by `call_site_index()`
        // or bounded by `MAP_SIZE`.
        unsafe { self.slots.get_unchecked(index) }
    }

    /// Current value of slot `index`, or `None` if out of range.
    pub fn get(&self, index: usize) -> Option<usize> {
        self.slots
            .get(index)
            .map(|slot| slot.load(Ordering::Relaxed))
    }

    /// Current value of the slot `call_site` hashes to.
    pub fn get_for(&self, call_site: usize) -> usize {
        self.slot(call_site_index(call_site))
            .load(Ordering::Relaxed)
    }

    /// Iterate over `(index, size)` for every slot, including empty ones.
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .map(|(i, slot)| (i, slot.load(Ordering::Relaxed)))
    }

    /// Zero every slot. Meant to be called by a harness between runs, not
    /// while the target is allocating.
    pub fn reset(&self) {
        for slot in self.slots.iter() {
            slot.store(0, Ordering::Relaxed);
        }
    }

    /// Base address of the table, as an external reader would see it.
    pub fn as_ptr(&self) -> *const usize {
        self.slots.as_ptr() as *const usize
    }

    #[allow(clippy::len_without_is_empty)]
    pub const fn len(&self) -> usize {
        MAP_SIZE
    }
}

impl Default for AllocMap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::mem;

    use super::*;

    #[test]
    fn index_matches_shift_xor_mask() {
        // (0x1234 >> 4) ^ (0x1234 << 8) = 0x123 ^ 0x123400 = 0x123523
        assert_eq!(call_site_index(0x1234), 0x123523 & (MAP_SIZE - 1));
        assert_eq!(call_site_index(0x1234), 0x3523);
        assert_eq!(call_site_index(0), 0);
    }

    #[test]
    fn index_is_pure_and_in_range() {
        let addrs = [
            0usize,
            1,
            0x10,
            0xdead_beef,
            usize::MAX,
            usize::MAX >> 1,
            call_site_index as usize,
        ];
        for addr in addrs {
            let i = call_site_index(addr);
            assert_eq!(i, call_site_index(addr));
            assert!(i < MAP_SIZE);
        }
    }

    #[test]
    fn slots_keep_running_maximum() {
        let map = AllocMap::boxed();
        map.observe(0x1000, 100);
        map.observe(0x1000, 50);
        assert_eq!(map.get_for(0x1000), 100);

        let map = AllocMap::boxed();
        map.observe(0x1000, 50);
        map.observe(0x1000, 100);
        assert_eq!(map.get_for(0x1000), 100);
    }

    #[test]
    fn distinct_slots_are_independent() {
        let (a, b) = (0x1000, 0x2000);
        assert_ne!(call_site_index(a), call_site_index(b));

        let map = AllocMap::boxed();
        map.observe(a, 7);
        map.observe(b, 9000);
        assert_eq!(map.get_for(a), 7);
        assert_eq!(map.get_for(b), 9000);
        assert_eq!(map.iter().filter(|&(_, size)| size != 0).count(), 2);
    }

    #[test]
    fn reset_zeroes_everything() {
        let map = AllocMap::boxed();
        map.observe(0xabc0, 12);
        map.reset();
        assert!(map.iter().all(|(_, size)| size == 0));
    }

    #[test]
    fn layout_is_a_plain_usize_array() {
        assert_eq!(mem::size_of::<AllocMap>(), mem::size_of::<[usize; MAP_SIZE]>());
        assert_eq!(mem::align_of::<AllocMap>(), mem::align_of::<usize>());

        let map = AllocMap::boxed();
        map.observe(0x1234, 77);
        // SAFETY: `as_ptr()` points at `MAP_SIZE` initialized `usize`s.
        let raw = unsafe { std::slice::from_raw_parts(map.as_ptr(), MAP_SIZE) };
        assert_eq!(raw[0x3523], 77);
    }

    #[test]
    fn get_out_of_range_is_none() {
        let map = AllocMap::boxed();
        assert_eq!(map.get(MAP_SIZE), None);
        assert_eq!(map.get(MAP_SIZE - 1), Some(0));
    }
}
