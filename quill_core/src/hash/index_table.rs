//! Open-addressed Robin-Hood hash table mapping string keys to indices.
//!
//! The table interns identifiers: the caller owns a list of interned
//! strings, and each slot stores only the `u32` index of its key in that
//! list. Key content never lives in the table.
//!
//! # Memory layout
//!
//! One allocation holds everything:
//!
//! ```text
//! [ entries (grow downward) | control header | metadata (grows upward) ]
//! ```
//!
//! Entries are addressed *below* the control header (slot `s` lives `s + 1`
//! entries before it) and metadata bytes sit directly after it, so the first
//! cache line touched on a lookup carries the shift/mask fields *and* the
//! home slot's metadata byte.
//!
//! # Metadata encoding
//!
//! One byte per slot: `0` is empty, `p > 0` is occupied at probe distance
//! `p` from its ideal slot (distance 1 *is* the ideal slot). A sentinel
//! byte of 1 one past the last real slot terminates every probe walk.
//!
//! # Synchronization
//!
//! None. Each table is confined to one thread or guarded by a higher-level
//! lock; see the VM's concurrency rules.

use std::alloc::{self, Layout};
use std::hash::{Hash, Hasher};
use std::mem;
use std::ptr::{self, NonNull};

use rustc_hash::FxHasher;

use crate::intern::InternedString;

use super::{LOAD_FACTOR, MAX_PROBE_DISTANCE, MIN_SIZE_LOG2};

// =============================================================================
// Control Header
// =============================================================================

/// Header stored between the entries and metadata regions.
#[repr(C)]
struct Control {
    /// Occupied slot count.
    cur_items: u32,
    /// Occupancy that triggers a grow on the next insert. Zeroed early by
    /// the probe-distance overflow guard.
    max_items: u32,
    /// log2 of the official slot count.
    official_size_log2: u8,
    /// `64 - official_size_log2`; the top hash bits select the home slot.
    key_right_shift: u8,
    /// Probe distance that forces `max_items = 0` when reached.
    max_probe_distance: u8,
    /// Extra slots allocated past the official region.
    max_probe_distance_limit: u8,
}

type Entry = u32;

const ENTRY_SIZE: usize = mem::size_of::<Entry>();

/// Round the metadata region up so the total allocation stays
/// pointer-aligned.
#[inline]
fn round_size_up(size: usize) -> usize {
    let align = mem::size_of::<usize>();
    (size + align - 1) & !(align - 1)
}

#[inline]
fn ceil_log2(v: u32) -> u8 {
    v.next_power_of_two().trailing_zeros() as u8
}

/// 64-bit hash of an interned key's content.
#[inline]
fn hash_key(key: &InternedString) -> u64 {
    let mut hasher = FxHasher::default();
    key.as_str().hash(&mut hasher);
    hasher.finish()
}

// =============================================================================
// IndexHashTable
// =============================================================================

/// Robin-Hood hash table of `(string key -> u32 index)` over a caller-owned
/// key list.
///
/// ```ignore
/// let names = vec![intern("a"), intern("b")];
/// let mut table = IndexHashTable::new();
/// table.insert_nocheck(&names, 0);
/// table.insert_nocheck(&names, 1);
/// assert_eq!(table.fetch(&names, &names[1]), Some(1));
/// ```
pub struct IndexHashTable {
    /// Base of the single backing allocation (start of the entries region).
    base: NonNull<u8>,
    /// Byte offset of the control header inside the allocation.
    control_offset: usize,
    /// Total allocation size, kept for deallocation.
    total_size: usize,
}

// The table owns its allocation outright; it is only !Send because of the
// raw pointer.
unsafe impl Send for IndexHashTable {}

impl IndexHashTable {
    /// Create a table at the minimum size.
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Create a table sized for `expected_entries` keys without growing.
    pub fn with_capacity(expected_entries: u32) -> Self {
        let size_log2 = if expected_entries == 0 {
            MIN_SIZE_LOG2
        } else {
            // Minimum official size that holds the expected entries at the
            // target load factor.
            let min_needed = (expected_entries as f64 * (1.0 / LOAD_FACTOR)) as u32;
            ceil_log2(min_needed).max(MIN_SIZE_LOG2)
        };
        Self::allocate(64 - size_log2, size_log2)
    }

    fn allocate(key_right_shift: u8, official_size_log2: u8) -> Self {
        let official_size = 1u32 << official_size_log2;
        let max_items = (official_size as f64 * LOAD_FACTOR) as u32;

        // -1 because probe distance 1 is the ideal slot itself: a key whose
        // home is the last official bucket still lands inside the official
        // allocation, and distance 255 is the 254th slot beyond it.
        let limit = u32::from(MAX_PROBE_DISTANCE - 1).min(max_items - 1) as u8;

        let allocated_items = official_size as usize + limit as usize;
        let entries_size = allocated_items * ENTRY_SIZE;
        let metadata_size = round_size_up(allocated_items + 1);
        let total_size = entries_size + mem::size_of::<Control>() + metadata_size;

        let layout = Layout::from_size_align(total_size, mem::align_of::<Control>())
            .expect("index hash layout");
        let raw = unsafe { alloc::alloc(layout) };
        let Some(base) = NonNull::new(raw) else {
            alloc::handle_alloc_error(layout);
        };

        let table = IndexHashTable {
            base,
            control_offset: entries_size,
            total_size,
        };
        unsafe {
            ptr::write(
                table.control_ptr(),
                Control {
                    cur_items: 0,
                    max_items,
                    official_size_log2,
                    key_right_shift,
                    max_probe_distance: limit,
                    max_probe_distance_limit: limit,
                },
            );
            let metadata = table.metadata_ptr();
            ptr::write_bytes(metadata, 0, metadata_size);
            // Sentinel: a probe walking off the end sees an occupied slot at
            // its ideal position and stops.
            *metadata.add(allocated_items) = 1;
        }
        table
    }

    // =========================================================================
    // Layout Accessors
    // =========================================================================

    #[inline]
    fn control_ptr(&self) -> *mut Control {
        unsafe { self.base.as_ptr().add(self.control_offset).cast::<Control>() }
    }

    #[inline]
    fn control(&self) -> &Control {
        unsafe { &*self.control_ptr() }
    }

    #[inline]
    fn control_mut(&mut self) -> &mut Control {
        unsafe { &mut *self.control_ptr() }
    }

    #[inline]
    fn metadata_ptr(&self) -> *mut u8 {
        unsafe {
            self.base
                .as_ptr()
                .add(self.control_offset + mem::size_of::<Control>())
        }
    }

    /// Entries grow downward from the control header: slot `s` lives
    /// `s + 1` entries below it.
    #[inline]
    fn entry_ptr(&self, slot: usize) -> *mut Entry {
        unsafe { self.control_ptr().cast::<Entry>().sub(slot + 1) }
    }

    #[inline]
    fn official_size(&self) -> usize {
        1usize << self.control().official_size_log2
    }

    #[inline]
    fn allocated_items(&self) -> usize {
        self.official_size() + self.control().max_probe_distance_limit as usize
    }

    #[inline]
    fn home_slot(&self, key: &InternedString) -> usize {
        (hash_key(key) >> self.control().key_right_shift) as usize
    }

    // =========================================================================
    // Public Operations
    // =========================================================================

    /// Number of keys in the table.
    #[inline]
    pub fn len(&self) -> usize {
        self.control().cur_items as usize
    }

    /// Check if the table holds no keys.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert `idx`, keyed by `keys[idx]`.
    ///
    /// The caller guarantees the key is not already present; inserting a
    /// duplicate index is a fatal logic error and panics.
    pub fn insert_nocheck(&mut self, keys: &[InternedString], idx: u32) {
        if self.control().cur_items >= self.control().max_items {
            self.grow(keys);
        }
        self.insert_internal(keys, idx);
    }

    /// Look up the index previously inserted for `key`.
    pub fn fetch(&self, keys: &[InternedString], key: &InternedString) -> Option<u32> {
        let mut slot = self.home_slot(key);
        let mut probe_distance: u8 = 1;
        loop {
            let md = unsafe { *self.metadata_ptr().add(slot) };
            // Anything below our distance would have been displaced by our
            // insert; the key is absent. Covers empty slots and the sentinel.
            if md < probe_distance {
                return None;
            }
            if md == probe_distance {
                let idx = unsafe { *self.entry_ptr(slot) };
                if keys[idx as usize] == *key {
                    return Some(idx);
                }
            }
            probe_distance += 1;
            slot += 1;
        }
    }

    // =========================================================================
    // Insertion
    // =========================================================================

    fn insert_internal(&mut self, keys: &[InternedString], idx: u32) {
        if self.control().cur_items >= self.control().max_items {
            panic!("index hash: grow re-entered while adding {idx}");
        }

        let max_probe_distance = self.control().max_probe_distance;
        let mut slot = self.home_slot(&keys[idx as usize]);
        let mut probe_distance: u8 = 1;

        loop {
            let md = unsafe { *self.metadata_ptr().add(slot) };

            if md < probe_distance {
                // This is our slot. Occupied or not, it is our rightful
                // place.
                if md != 0 {
                    // Make room. We never implement the "stealing" by
                    // swapping and re-inserting: probe distances after this
                    // point are already in order, so shifting everything
                    // along by one keeps the invariant.
                    let metadata = self.metadata_ptr();
                    let mut gap = slot;
                    let mut old_probe_distance = md;
                    loop {
                        let new_probe_distance = 1 + old_probe_distance;
                        if new_probe_distance == max_probe_distance {
                            // Force a resize on the next insert, *before*
                            // it touches the table, so this loop never has
                            // to handle overflow itself.
                            self.control_mut().max_items = 0;
                        }
                        gap += 1;
                        unsafe {
                            old_probe_distance = *metadata.add(gap);
                            *metadata.add(gap) = new_probe_distance;
                        }
                        if old_probe_distance == 0 {
                            break;
                        }
                    }
                    let entries_to_move = gap - slot;
                    // Entries grow downward, so one slot forward in probe
                    // order is one entry down in memory.
                    unsafe {
                        let block = self.entry_ptr(slot + entries_to_move - 1);
                        ptr::copy(block, block.sub(1), entries_to_move);
                    }
                }

                // Same guard as the make-room loop: landing at the limit
                // means the next insertion must resize first.
                if probe_distance == max_probe_distance {
                    self.control_mut().max_items = 0;
                }

                self.control_mut().cur_items += 1;
                unsafe {
                    *self.metadata_ptr().add(slot) = probe_distance;
                    *self.entry_ptr(slot) = idx;
                }
                return;
            }

            if md == probe_distance {
                let occupant = unsafe { *self.entry_ptr(slot) };
                if occupant == idx {
                    // TODO: audit callers before deciding whether a silent
                    // overwrite would ever be legitimate here.
                    panic!("index hash: duplicate insert for {idx}");
                }
            }

            probe_distance += 1;
            slot += 1;
            debug_assert!(probe_distance <= max_probe_distance.saturating_add(1));
            debug_assert!(slot < self.allocated_items() + 1);
        }
    }

    /// Replace the backing allocation with one twice the official size and
    /// re-insert every occupied slot.
    fn grow(&mut self, keys: &[InternedString]) {
        let key_right_shift = self.control().key_right_shift - 1;
        let official_size_log2 = self.control().official_size_log2 + 1;
        let old = mem::replace(self, Self::allocate(key_right_shift, official_size_log2));

        for slot in 0..old.allocated_items() {
            unsafe {
                if *old.metadata_ptr().add(slot) != 0 {
                    self.insert_internal(keys, *old.entry_ptr(slot));
                }
            }
        }
        // `old` drops here, freeing the previous allocation.
    }

    // =========================================================================
    // Test Support
    // =========================================================================

    /// Verify the Robin-Hood ordering and that every occupied slot is
    /// reachable from its key's home slot through a gap-free run.
    #[cfg(test)]
    fn check_invariant(&self, keys: &[InternedString]) {
        let mut prev_md: u8 = 0;
        for slot in 0..self.allocated_items() {
            let md = unsafe { *self.metadata_ptr().add(slot) };
            if md != 0 {
                // Probe distances never skip: a slot's distance exceeds its
                // predecessor's by at most one.
                if prev_md != 0 {
                    assert!(
                        md <= prev_md + 1,
                        "probe distance jumped from {prev_md} to {md} at slot {slot}"
                    );
                }
                // A displaced occupant sits in a gap-free run from its home:
                // the slot before it cannot be empty.
                if md > 1 {
                    assert_ne!(
                        prev_md, 0,
                        "slot {slot} at distance {md} follows an empty slot"
                    );
                }
                // The occupant's recorded distance matches its actual
                // displacement from home.
                let idx = unsafe { *self.entry_ptr(slot) };
                let home = self.home_slot(&keys[idx as usize]);
                assert_eq!(
                    md as usize,
                    slot - home + 1,
                    "slot {slot} occupant {idx} disagrees with its home {home}"
                );
            }
            prev_md = md;
        }
    }

    #[cfg(test)]
    fn official_size_log2(&self) -> u8 {
        self.control().official_size_log2
    }
}

impl Default for IndexHashTable {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for IndexHashTable {
    fn drop(&mut self) {
        let layout = Layout::from_size_align(self.total_size, mem::align_of::<Control>())
            .expect("index hash layout");
        unsafe {
            alloc::dealloc(self.base.as_ptr(), layout);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intern::intern;

    fn keys_for(names: &[&str]) -> Vec<InternedString> {
        names.iter().map(|n| intern(n)).collect()
    }

    fn numbered_keys(count: usize, prefix: &str) -> Vec<InternedString> {
        (0..count)
            .map(|i| intern(&format!("{prefix}{i}")))
            .collect()
    }

    fn insert_all(table: &mut IndexHashTable, keys: &[InternedString]) {
        for idx in 0..keys.len() as u32 {
            table.insert_nocheck(keys, idx);
        }
    }

    // -------------------------------------------------------------------------
    // Basic Operations
    // -------------------------------------------------------------------------

    #[test]
    fn test_empty_table() {
        let table = IndexHashTable::new();
        let keys = keys_for(&["missing"]);
        assert!(table.is_empty());
        assert_eq!(table.len(), 0);
        assert_eq!(table.fetch(&keys, &keys[0]), None);
    }

    #[test]
    fn test_insert_and_fetch_small() {
        let keys = keys_for(&["a", "b", "c", "d", "e"]);
        let mut table = IndexHashTable::new();
        insert_all(&mut table, &keys);

        assert_eq!(table.len(), 5);
        for (idx, key) in keys.iter().enumerate() {
            assert_eq!(table.fetch(&keys, key), Some(idx as u32));
        }
        table.check_invariant(&keys);
    }

    #[test]
    fn test_fetch_miss() {
        let keys = keys_for(&["present"]);
        let mut table = IndexHashTable::new();
        table.insert_nocheck(&keys, 0);

        let absent = intern("absent");
        assert_eq!(table.fetch(&keys, &absent), None);
    }

    #[test]
    #[should_panic(expected = "duplicate insert")]
    fn test_duplicate_insert_is_fatal() {
        let keys = keys_for(&["twice"]);
        let mut table = IndexHashTable::new();
        table.insert_nocheck(&keys, 0);
        table.insert_nocheck(&keys, 0);
    }

    // -------------------------------------------------------------------------
    // Growth
    // -------------------------------------------------------------------------

    #[test]
    fn test_growth_from_undersized_table() {
        let keys = numbered_keys(100, "grow_");
        let mut table = IndexHashTable::with_capacity(4);
        let initial_log2 = table.official_size_log2();

        insert_all(&mut table, &keys);

        assert!(table.official_size_log2() > initial_log2, "no resize occurred");
        assert_eq!(table.len(), 100);
        for (idx, key) in keys.iter().enumerate() {
            assert_eq!(table.fetch(&keys, key), Some(idx as u32));
        }
        table.check_invariant(&keys);
    }

    #[test]
    fn test_growth_independent_of_initial_size() {
        let keys = numbered_keys(300, "indep_");

        let mut results = Vec::new();
        for capacity in [0u32, 4, 64, 512] {
            let mut table = IndexHashTable::with_capacity(capacity);
            insert_all(&mut table, &keys);
            table.check_invariant(&keys);

            let mapping: Vec<Option<u32>> =
                keys.iter().map(|k| table.fetch(&keys, k)).collect();
            results.push(mapping);
        }

        for mapping in &results[1..] {
            assert_eq!(mapping, &results[0]);
        }
        for (idx, fetched) in results[0].iter().enumerate() {
            assert_eq!(*fetched, Some(idx as u32));
        }
    }

    #[test]
    fn test_with_capacity_respects_minimum() {
        let table = IndexHashTable::with_capacity(1);
        assert_eq!(table.official_size_log2(), MIN_SIZE_LOG2);
    }

    #[test]
    fn test_with_capacity_sizes_for_load_factor() {
        // 100 entries at 0.75 load overflow 2^7 official slots: 2^8.
        let table = IndexHashTable::with_capacity(100);
        assert_eq!(table.official_size_log2(), 8);
    }

    // -------------------------------------------------------------------------
    // Invariants Under Load
    // -------------------------------------------------------------------------

    #[test]
    fn test_invariant_holds_while_filling() {
        let keys = numbered_keys(512, "fill_");
        let mut table = IndexHashTable::new();

        for idx in 0..keys.len() as u32 {
            table.insert_nocheck(&keys, idx);
            if idx % 64 == 0 {
                table.check_invariant(&keys);
            }
        }
        table.check_invariant(&keys);
        assert_eq!(table.len(), 512);
    }

    #[test]
    fn test_large_table_round_trip() {
        let keys = numbered_keys(2000, "big_");
        let mut table = IndexHashTable::with_capacity(2000);
        insert_all(&mut table, &keys);

        assert_eq!(table.len(), 2000);
        for (idx, key) in keys.iter().enumerate() {
            assert_eq!(table.fetch(&keys, key), Some(idx as u32));
        }
        table.check_invariant(&keys);
    }
}
