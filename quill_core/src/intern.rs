//! Global string interning.
//!
//! The VM stores identifiers (argument names, symbol table keys) exactly
//! once; everything else holds a cheap handle. Because the pool guarantees
//! one allocation per distinct content, handle equality and hashing are
//! pointer operations, which is what makes interned-name comparison in the
//! callsite store branch-free.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;
use rustc_hash::FxHashSet;

// =============================================================================
// InternedString
// =============================================================================

/// A handle to a string in the global intern pool.
///
/// Cloning is an `Arc` bump. Two handles compare equal iff they were
/// interned from equal content.
#[derive(Clone)]
pub struct InternedString(Arc<str>);

impl InternedString {
    /// View the interned content.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Stable address of the interned content, usable as an identity key.
    #[inline]
    pub fn as_ptr(&self) -> *const u8 {
        self.0.as_ptr()
    }

    /// Length of the interned content in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if the interned content is the empty string.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl PartialEq for InternedString {
    /// Pointer comparison; the pool guarantees one allocation per content.
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for InternedString {}

impl Hash for InternedString {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_usize(Arc::as_ptr(&self.0) as *const u8 as usize);
    }
}

impl AsRef<str> for InternedString {
    #[inline]
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for InternedString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for InternedString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InternedString({:?})", self.as_str())
    }
}

// =============================================================================
// Intern Pool
// =============================================================================

/// The process-wide pool. Reads vastly outnumber writes, so a read lock
/// covers the common already-interned case.
struct InternPool {
    strings: RwLock<FxHashSet<Arc<str>>>,
}

static POOL: OnceLock<InternPool> = OnceLock::new();

fn pool() -> &'static InternPool {
    POOL.get_or_init(|| InternPool {
        strings: RwLock::new(FxHashSet::default()),
    })
}

/// Intern a string, returning the canonical handle for its content.
pub fn intern(s: &str) -> InternedString {
    let pool = pool();

    // Fast path: already interned.
    if let Some(existing) = pool.strings.read().get(s) {
        return InternedString(Arc::clone(existing));
    }

    // Slow path: re-check under the write lock; a racing writer may have
    // inserted between the two lock acquisitions.
    let mut strings = pool.strings.write();
    if let Some(existing) = strings.get(s) {
        return InternedString(Arc::clone(existing));
    }
    let entry: Arc<str> = Arc::from(s);
    strings.insert(Arc::clone(&entry));
    InternedString(entry)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_round_trip() {
        let handle = intern("positional");
        assert_eq!(handle.as_str(), "positional");
        assert_eq!(handle.len(), 10);
        assert!(!handle.is_empty());
    }

    #[test]
    fn test_intern_deduplicates() {
        let a = intern("dedup-me");
        let b = intern("dedup-me");
        assert_eq!(a, b);
        assert_eq!(a.as_ptr(), b.as_ptr());
    }

    #[test]
    fn test_intern_distinct_content() {
        let a = intern("left");
        let b = intern("right");
        assert_ne!(a, b);
    }

    #[test]
    fn test_intern_empty_string() {
        let a = intern("");
        assert!(a.is_empty());
        assert_eq!(a, intern(""));
    }

    #[test]
    fn test_intern_hash_matches_identity() {
        use std::collections::hash_map::DefaultHasher;

        let a = intern("hash-key");
        let b = intern("hash-key");

        let mut ha = DefaultHasher::new();
        let mut hb = DefaultHasher::new();
        a.hash(&mut ha);
        b.hash(&mut hb);
        assert_eq!(ha.finish(), hb.finish());
    }

    #[test]
    fn test_intern_across_threads() {
        let handles: Vec<_> = (0..8)
            .map(|_| std::thread::spawn(|| intern("racing-intern")))
            .collect();

        let first = intern("racing-intern");
        for handle in handles {
            let interned = handle.join().unwrap();
            assert_eq!(interned, first);
            assert_eq!(interned.as_ptr(), first.as_ptr());
        }
    }
}
