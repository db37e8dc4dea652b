//! The callsite interning store.
//!
//! Interned shapes are partitioned by arity: shapes of arity `a` live in
//! bucket `a`, so the scan in `try_intern` only ever walks shapes of the
//! same length. Most shapes have arity <= 4, which keeps the buckets small
//! and cache-resident, and flag comparison is a word-aligned slice compare.
//!
//! The store hands out `&'static Callsite`: a shape that wins interning is
//! moved into the store for the life of the process, and the nine common
//! shapes are static storage the store merely points at.

use std::array;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use smallvec::SmallVec;

use quill_core::intern::InternedString;

use super::{
    callsites_equal, ArgFlags, Callsite, CallsiteError, CallsiteRef, CallsiteResult,
    COMMON_SHAPES,
};

/// Maximum arity the store interns; also the bucket growth step.
pub const INTERN_ARITY_LIMIT: usize = 8;

// =============================================================================
// Callsite Store
// =============================================================================

/// Per-arity buckets of interned shapes. Guarded by the store mutex.
struct InternBuckets {
    by_arity: [Vec<&'static Callsite>; INTERN_ARITY_LIMIT],
}

/// Process-wide deduplication store for callsite descriptors.
///
/// ## Usage
///
/// ```ignore
/// let store = CallsiteStore::new();
/// store.initialize_common();
///
/// let mut cs = CallsiteRef::from(Callsite::new(vec![ArgFlags::OBJ], 1, None));
/// store.try_intern(&mut cs);
/// assert!(cs.is_interned());
/// ```
pub struct CallsiteStore {
    interns: Mutex<InternBuckets>,
    stats: CallsiteStats,
}

impl Default for CallsiteStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CallsiteStore {
    /// Create an empty store.
    pub fn new() -> Self {
        CallsiteStore {
            interns: Mutex::new(InternBuckets {
                by_arity: array::from_fn(|_| Vec::new()),
            }),
            stats: CallsiteStats::new(),
        }
    }

    /// Intern the nine static common shapes.
    ///
    /// Called once at VM startup; afterwards the commons are
    /// indistinguishable from dynamically interned shapes.
    pub fn initialize_common(&self) {
        for &shape in COMMON_SHAPES.iter() {
            self.intern_static(shape);
        }
    }

    fn intern_static(&self, shape: &'static Callsite) {
        let mut interns = self.interns.lock();
        let bucket = &mut interns.by_arity[shape.flag_count() as usize];
        if !bucket
            .iter()
            .any(|&existing| callsites_equal(existing, shape))
        {
            reserve_in_steps(bucket);
            bucket.push(shape);
            shape.mark_interned();
        }
    }

    /// Number of interned shapes across all arities.
    pub fn interned_count(&self) -> usize {
        self.interns
            .lock()
            .by_arity
            .iter()
            .map(|bucket| bucket.len())
            .sum()
    }

    /// Statistics counters.
    #[inline]
    pub fn stats(&self) -> &CallsiteStats {
        &self.stats
    }

    // =========================================================================
    // Interning
    // =========================================================================

    /// Intern `cs` in place: either adopt an existing equal shape (the
    /// owned original is freed) or move the owned shape into the store.
    ///
    /// No-ops, leaving the caller its owned copy: flattening shapes, arity
    /// at or past [`INTERN_ARITY_LIMIT`], named arguments without known
    /// names, and handles that are already interned.
    pub fn try_intern(&self, cs: &mut CallsiteRef) {
        if cs.is_interned() {
            return;
        }

        // Can't intern anything with flattening.
        if cs.has_flattening() {
            self.stats.record_uninternable();
            return;
        }

        // Also can't intern past the max arity.
        let num_flags = cs.flag_count() as usize;
        if num_flags >= INTERN_ARITY_LIMIT {
            self.stats.record_uninternable();
            return;
        }

        // Nameds are internable only when we know the names.
        if cs.num_nameds() > 0 && cs.arg_names().is_none() {
            self.stats.record_uninternable();
            return;
        }

        let mut interns = self.interns.lock();
        let bucket = &mut interns.by_arity[num_flags];

        // Search for a match; the first one wins.
        let existing = bucket
            .iter()
            .copied()
            .find(|&candidate| callsites_equal(candidate, cs.as_callsite()));
        if let Some(existing) = existing {
            // Got a match: free the shape we were handed and replace it
            // with the interned one.
            self.stats.record_hit();
            *cs = CallsiteRef::Interned(existing);
            return;
        }

        // Not found: the store takes ownership for the life of the
        // process.
        let owned = cs
            .take_owned()
            .expect("uninterned CallsiteRef must be owned");
        let shape: &'static Callsite = Box::leak(owned);
        shape.mark_interned();
        reserve_in_steps(bucket);
        bucket.push(shape);
        self.stats.record_miss();
        *cs = CallsiteRef::Interned(shape);
    }

    // =========================================================================
    // Derivation Operators
    // =========================================================================

    /// New shape with the positional at `idx` removed, interned if
    /// possible. Named arguments are copied verbatim.
    pub fn drop_positional(&self, cs: &Callsite, idx: u32) -> CallsiteResult<CallsiteRef> {
        if idx >= cs.num_pos() {
            return Err(CallsiteError::OutOfRange {
                index: idx,
                num_pos: cs.num_pos(),
            });
        }
        if cs.has_flattening() {
            return Err(CallsiteError::HasFlattening);
        }

        let mut flags: SmallVec<[ArgFlags; INTERN_ARITY_LIMIT]> =
            SmallVec::with_capacity(cs.flag_count() as usize - 1);
        for (from, &flag) in cs.arg_flags().iter().enumerate() {
            if from as u32 != idx {
                flags.push(flag);
            }
        }

        let derived = Callsite::new(flags.into_vec(), cs.num_pos() - 1, copy_nameds(cs));
        debug_assert_eq!(derived.arg_count(), cs.arg_count() - 1);

        let mut derived = CallsiteRef::from(derived);
        self.try_intern(&mut derived);
        self.stats.record_derivation();
        Ok(derived)
    }

    /// New shape with `flag` inserted as a positional at `idx`, interned
    /// if possible. `flag` must be a positional kind; `idx` may equal the
    /// positional count to append after the last positional.
    pub fn insert_positional(
        &self,
        cs: &Callsite,
        idx: u32,
        flag: ArgFlags,
    ) -> CallsiteResult<CallsiteRef> {
        if idx > cs.num_pos() {
            return Err(CallsiteError::OutOfRange {
                index: idx,
                num_pos: cs.num_pos(),
            });
        }
        if cs.has_flattening() {
            return Err(CallsiteError::HasFlattening);
        }
        debug_assert!(flag.is_positional());

        let mut flags: SmallVec<[ArgFlags; INTERN_ARITY_LIMIT]> =
            SmallVec::with_capacity(cs.flag_count() as usize + 1);
        for (from, &existing) in cs.arg_flags().iter().enumerate() {
            if from as u32 == idx {
                flags.push(flag);
            }
            flags.push(existing);
        }
        if idx == cs.flag_count() {
            flags.push(flag);
        }

        let derived = Callsite::new(flags.into_vec(), cs.num_pos() + 1, copy_nameds(cs));
        debug_assert_eq!(derived.arg_count(), cs.arg_count() + 1);

        let mut derived = CallsiteRef::from(derived);
        self.try_intern(&mut derived);
        self.stats.record_derivation();
        Ok(derived)
    }
}

/// Copy the named-argument handles of one callsite for another.
fn copy_nameds(cs: &Callsite) -> Option<Vec<InternedString>> {
    cs.arg_names().map(<[InternedString]>::to_vec)
}

/// Grow bucket capacity in fixed steps rather than amortized doubling; the
/// buckets stay small, and a step bounds the slack per arity.
fn reserve_in_steps(bucket: &mut Vec<&'static Callsite>) {
    if bucket.len() % INTERN_ARITY_LIMIT == 0 {
        bucket.reserve(INTERN_ARITY_LIMIT);
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Interning statistics for profiling.
#[derive(Debug, Default)]
pub struct CallsiteStats {
    /// `try_intern` calls resolved to an existing shape.
    intern_hits: AtomicU64,

    /// `try_intern` calls that installed a new shape.
    intern_misses: AtomicU64,

    /// `try_intern` calls rejected by the preconditions.
    uninternable: AtomicU64,

    /// Derivation operator invocations.
    derivations: AtomicU64,
}

impl CallsiteStats {
    /// Create new zeroed statistics.
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    fn record_hit(&self) {
        self.intern_hits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    fn record_miss(&self) {
        self.intern_misses.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    fn record_uninternable(&self) {
        self.uninternable.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    fn record_derivation(&self) {
        self.derivations.fetch_add(1, Ordering::Relaxed);
    }

    /// `try_intern` calls resolved to an existing shape.
    #[inline]
    pub fn intern_hits(&self) -> u64 {
        self.intern_hits.load(Ordering::Relaxed)
    }

    /// `try_intern` calls that installed a new shape.
    #[inline]
    pub fn intern_misses(&self) -> u64 {
        self.intern_misses.load(Ordering::Relaxed)
    }

    /// `try_intern` calls rejected by the preconditions.
    #[inline]
    pub fn uninternable(&self) -> u64 {
        self.uninternable.load(Ordering::Relaxed)
    }

    /// Derivation operator invocations.
    #[inline]
    pub fn derivations(&self) -> u64 {
        self.derivations.load(Ordering::Relaxed)
    }
}

// =============================================================================
// Tests
// =============================================================================
