//! Stop-the-world orchestration of mutator threads.
//!
//! One mutator runs per OS thread, cooperating at explicit safepoints. When
//! a nursery runs dry the allocating thread races to coordinate a cycle:
//!
//! 1. Snapshot the registered thread count under the registry lock
//! 2. `CAS(expected_gc_threads, 0 -> N)`; the winner coordinates
//! 3. The coordinator signals every other thread and waits for all `N`
//!    enlistments
//! 4. Each enlisted thread collects its own nursery
//! 5. The coordinator hands stolen threads back to their blocked state and
//!    clears the counters, reopening the election
//!
//! Threads blocked in native code are marked [`GcStatus::Stolen`] and
//! enlisted on their behalf; the coordinator takes responsibility for their
//! roots, so a blocked thread never stalls a cycle.
//!
//! The enlistment rendezvous busy-waits with a bounded spin before
//! yielding. A production embedding would swap in a futex or condvar; the
//! protocol itself would not change.

use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;

use crate::config::GcConfig;
use crate::nursery::Nursery;
use crate::stats::OrchestratorStats;

// =============================================================================
// GcStatus
// =============================================================================

/// State of a mutator thread with respect to collection cycles.
///
/// All transitions are CAS on the mutator's status word:
///
/// | From | To | Trigger |
/// |------|----|---------|
/// | `None` | `Interrupt` | coordinator signals a running thread |
/// | `None` | `Unable` | thread about to block in native code |
/// | `Unable` | `Stolen` | coordinator claims a blocked thread's roots |
/// | `Unable` | `None` | thread unblocks with no cycle underway |
/// | `Stolen` | `Unable` | coordinator finishes the cycle |
/// | `Interrupt` | `None` | thread completes its participation |
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcStatus {
    /// Running normally; polls safepoints.
    None = 0,
    /// Signalled to join a cycle at the next safepoint.
    Interrupt = 1,
    /// Blocked in native code; cannot participate.
    Unable = 2,
    /// Blocked, with a coordinator responsible for its roots this cycle.
    Stolen = 3,
}

impl GcStatus {
    /// Convert from the raw status word.
    #[inline]
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(GcStatus::None),
            1 => Some(GcStatus::Interrupt),
            2 => Some(GcStatus::Unable),
            3 => Some(GcStatus::Stolen),
            _ => None,
        }
    }
}

// =============================================================================
// Mutator
// =============================================================================

/// Per-thread mutator context: the status word the protocol runs on, plus
/// the thread's nursery.
#[derive(Debug)]
pub struct Mutator {
    /// Registry identity.
    id: u64,
    /// Atomic [`GcStatus`] word.
    gc_status: AtomicU32,
    /// This thread's allocation space.
    nursery: Nursery,
}

impl Mutator {
    fn new(id: u64, nursery_size: usize) -> Self {
        Mutator {
            id,
            gc_status: AtomicU32::new(GcStatus::None as u32),
            nursery: Nursery::new(nursery_size),
        }
    }

    /// Registry identity of this mutator.
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Current status. A word outside the status range means the word was
    /// corrupted, which is fatal.
    #[inline]
    pub fn gc_status(&self) -> GcStatus {
        let raw = self.gc_status.load(Ordering::Acquire);
        match GcStatus::from_u32(raw) {
            Some(status) => status,
            None => panic!("invalid GC status word {raw} on thread {}", self.id),
        }
    }

    /// This mutator's nursery.
    #[inline]
    pub fn nursery(&self) -> &Nursery {
        &self.nursery
    }

    #[inline]
    fn cas_status(&self, from: GcStatus, to: GcStatus) -> bool {
        self.gc_status
            .compare_exchange(from as u32, to as u32, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

// =============================================================================
// NurseryCollector
// =============================================================================

/// The seam to the actual collector.
///
/// Runs once per enlisted mutator per cycle, on that mutator's own thread
/// (or on the coordinator's thread for stolen mutators), with every counted
/// thread rendezvoused. `limit` is the nursery allocation frontier at cycle
/// entry and bounds the sweep of uncopied objects.
pub trait NurseryCollector: Send + Sync {
    /// Collect `mutator`'s nursery.
    fn collect(&self, mutator: &Mutator, limit: *mut u8);
}

/// Collector that discards the entire nursery.
///
/// Stands in for a copying collector when survivors are managed elsewhere
/// (tests, embeddings with arena semantics).
#[derive(Debug, Default)]
pub struct ResetCollector;

impl NurseryCollector for ResetCollector {
    fn collect(&self, mutator: &Mutator, _limit: *mut u8) {
        mutator.nursery().reset();
    }
}

// =============================================================================
// GcOrchestrator
// =============================================================================

/// Coordinates every registered mutator into stop-the-world nursery
/// collection cycles.
pub struct GcOrchestrator {
    /// Registered mutators. Locked only to snapshot a stable thread count
    /// during election and to restore stolen threads afterwards.
    mutators: Mutex<Vec<Arc<Mutator>>>,

    /// Threads enlisted in the in-flight cycle.
    starting_gc: AtomicU32,

    /// Enlistment target for the in-flight cycle; zero doubles as the
    /// "no cycle running" election flag.
    expected_gc_threads: AtomicU32,

    /// Monotone cycle counter; incremented once, by the coordinator.
    gc_seq_number: AtomicU64,

    /// Next mutator registry id.
    next_mutator_id: AtomicU64,

    /// The collector invoked for each enlisted mutator.
    collector: Box<dyn NurseryCollector>,

    /// Tunables.
    config: GcConfig,

    /// Protocol counters.
    stats: OrchestratorStats,
}

impl GcOrchestrator {
    /// Create an orchestrator with the given configuration and collector.
    pub fn new(config: GcConfig, collector: Box<dyn NurseryCollector>) -> Self {
        GcOrchestrator {
            mutators: Mutex::new(Vec::new()),
            starting_gc: AtomicU32::new(0),
            expected_gc_threads: AtomicU32::new(0),
            gc_seq_number: AtomicU64::new(0),
            next_mutator_id: AtomicU64::new(0),
            collector,
            config,
            stats: OrchestratorStats::new(),
        }
    }

    // =========================================================================
    // Registry
    // =========================================================================

    /// Register the calling thread as a mutator.
    ///
    /// The mutator participates in every cycle elected after this call;
    /// cycles already in flight do not count it.
    pub fn register_mutator(&self) -> Arc<Mutator> {
        let id = self.next_mutator_id.fetch_add(1, Ordering::Relaxed);
        let mutator = Arc::new(Mutator::new(id, self.config.nursery_size));
        self.mutators.lock().push(Arc::clone(&mutator));
        mutator
    }

    /// Remove a mutator from the registry.
    ///
    /// Must not be called while a cycle that counted the mutator is in
    /// flight.
    pub fn unregister_mutator(&self, id: u64) {
        let mut mutators = self.mutators.lock();
        if let Some(pos) = mutators.iter().position(|m| m.id() == id) {
            mutators.swap_remove(pos);
        }
    }

    /// Number of registered mutators.
    pub fn mutator_count(&self) -> usize {
        self.mutators.lock().len()
    }

    // =========================================================================
    // Observation
    // =========================================================================

    /// Cycle counter; increments exactly once per completed cycle.
    #[inline]
    pub fn seq_number(&self) -> u64 {
        self.gc_seq_number.load(Ordering::Acquire)
    }

    /// Threads enlisted in the in-flight cycle (zero between cycles).
    #[inline]
    pub fn enlisted_threads(&self) -> u32 {
        self.starting_gc.load(Ordering::Acquire)
    }

    /// Enlistment target of the in-flight cycle (zero between cycles).
    #[inline]
    pub fn expected_threads(&self) -> u32 {
        self.expected_gc_threads.load(Ordering::Acquire)
    }

    /// Protocol counters.
    #[inline]
    pub fn stats(&self) -> &OrchestratorStats {
        &self.stats
    }

    // =========================================================================
    // Allocation
    // =========================================================================

    /// Allocate from `tc`'s nursery, entering a collection cycle on
    /// exhaustion.
    ///
    /// Panics if the request cannot fit even in an empty nursery.
    pub fn allocate(&self, tc: &Mutator, size: usize) -> NonNull<u8> {
        if let Some(ptr) = tc.nursery().alloc(size) {
            return ptr;
        }
        // Slow path: this thread triggers (or joins) a cycle.
        self.enter_from_allocator(tc);
        match tc.nursery().alloc(size) {
            Some(ptr) => ptr,
            None => panic!("allocation of {size} bytes exceeds nursery capacity"),
        }
    }

    // =========================================================================
    // Safepoints
    // =========================================================================

    /// Safepoint poll. Joins the in-flight cycle if this thread has been
    /// signalled; returns whether a collection was joined.
    #[inline]
    pub fn safepoint(&self, tc: &Mutator) -> bool {
        if tc.gc_status() == GcStatus::Interrupt {
            self.enter_from_interrupt(tc);
            true
        } else {
            false
        }
    }

    /// Bracket entry for a call that may block in native code.
    ///
    /// After this returns, a coordinator may steal the thread's
    /// participation instead of waiting for it. If a signal already
    /// arrived, the thread first serves the cycle, then blocks.
    pub fn mark_thread_blocked(&self, tc: &Mutator) {
        loop {
            if tc.cas_status(GcStatus::None, GcStatus::Unable) {
                self.stats.record_blocked();
                return;
            }
            // The only legal way that CAS fails is a pending interrupt;
            // anything else means the status word is corrupt.
            match tc.gc_status() {
                GcStatus::Interrupt => self.enter_from_interrupt(tc),
                status => panic!(
                    "invalid GC status {:?} while blocking thread {}",
                    status,
                    tc.id()
                ),
            }
        }
    }

    /// Bracket exit after a native-code block.
    ///
    /// If a cycle stole this thread's participation, waits for the
    /// coordinator to hand the status back rather than re-entering the
    /// running state mid-cycle.
    pub fn mark_thread_unblocked(&self, tc: &Mutator) {
        while !tc.cas_status(GcStatus::Unable, GcStatus::None) {
            self.stats.record_unblock_retry();
            thread::yield_now();
        }
    }

    // =========================================================================
    // Cycle Entry
    // =========================================================================

    /// Entry point from the allocator on nursery exhaustion. Elects this
    /// thread coordinator if no cycle is underway, otherwise joins the one
    /// in flight.
    pub fn enter_from_allocator(&self, tc: &Mutator) {
        // Snapshot a stable thread count under the registry lock.
        let mutators = self.mutators.lock();
        let expected = mutators.len() as u32;

        if self
            .expected_gc_threads
            .compare_exchange(0, expected, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            // Won the race: this thread coordinates the cycle.
            self.stats.record_election();
            self.gc_seq_number.fetch_add(1, Ordering::AcqRel);

            // Count ourselves in.
            self.starting_gc.fetch_add(1, Ordering::AcqRel);

            for target in mutators.iter() {
                if target.id() != tc.id() {
                    self.signal_one_thread(target);
                }
            }

            // Every counted thread has been signalled; release the lock so
            // new threads can keep spawning. They were not counted and sit
            // this cycle out.
            drop(mutators);

            self.wait_for_enlistment();
            self.run_local_collection(tc);
            self.finish_cycle();
        } else {
            // Another thread won the election; join its cycle.
            drop(mutators);
            self.enter_from_interrupt(tc);
        }
    }

    /// Entry point for a thread that observed an interrupt at a safepoint
    /// (or lost the coordinator election).
    pub fn enter_from_interrupt(&self, tc: &Mutator) {
        self.stats.record_interrupt();

        // Count us in to the cycle.
        self.starting_gc.fetch_add(1, Ordering::AcqRel);

        self.wait_for_enlistment();
        self.run_local_collection(tc);

        // Participation complete. Only an interrupt is ours to clear; the
        // election loser arrives here with its status still `None`.
        let _ = tc.cas_status(GcStatus::Interrupt, GcStatus::None);
    }

    // =========================================================================
    // Internal Protocol Steps
    // =========================================================================

    /// Notify one thread that a cycle is starting.
    ///
    /// The target's status may change between attempts (a racing block or
    /// unblock), so loop until one of the transitions lands.
    fn signal_one_thread(&self, target: &Mutator) {
        loop {
            // Running to interrupted: the common case. The target enlists
            // itself at its next safepoint.
            if target.cas_status(GcStatus::None, GcStatus::Interrupt) {
                self.stats.record_signal();
                return;
            }

            // Otherwise it is blocked; steal its participation. It is now
            // sufficiently opted in that we enlist on its behalf.
            if target.cas_status(GcStatus::Unable, GcStatus::Stolen) {
                self.starting_gc.fetch_add(1, Ordering::AcqRel);
                self.stats.record_steal();
                return;
            }
        }
    }

    /// Spin until every counted thread has enlisted.
    fn wait_for_enlistment(&self) {
        let mut spins = 0u32;
        while self.starting_gc.load(Ordering::Acquire)
            != self.expected_gc_threads.load(Ordering::Acquire)
        {
            if spins < self.config.max_enlist_spins {
                std::hint::spin_loop();
                spins += 1;
            } else {
                thread::yield_now();
            }
        }
    }

    /// Run the collector for this thread's nursery.
    fn run_local_collection(&self, tc: &Mutator) {
        // The frontier at entry bounds the later sweep of uncopied objects.
        let limit = tc.nursery().alloc_ptr();
        self.collector.collect(tc, limit);
    }

    /// Coordinator-only epilogue: hand stolen threads back to their blocked
    /// state, then clear the counters.
    fn finish_cycle(&self) {
        let mutators = self.mutators.lock();
        for mutator in mutators.iter() {
            let _ = mutator.cas_status(GcStatus::Stolen, GcStatus::Unable);
        }
        drop(mutators);

        self.stats.record_cycle();
        self.starting_gc.store(0, Ordering::Release);
        // The expected count doubles as the election flag; clearing it last
        // reopens the next cycle.
        self.expected_gc_threads.store(0, Ordering::Release);
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn test_orchestrator(nursery_size: usize) -> GcOrchestrator {
        let config = GcConfig {
            nursery_size,
            ..Default::default()
        };
        GcOrchestrator::new(config, Box::new(ResetCollector))
    }

    // -------------------------------------------------------------------------
    // Registry
    // -------------------------------------------------------------------------

    #[test]
    fn test_register_unregister() {
        let orch = test_orchestrator(4096);
        assert_eq!(orch.mutator_count(), 0);

        let a = orch.register_mutator();
        let b = orch.register_mutator();
        assert_eq!(orch.mutator_count(), 2);
        assert_ne!(a.id(), b.id());

        orch.unregister_mutator(a.id());
        assert_eq!(orch.mutator_count(), 1);
    }

    #[test]
    fn test_new_mutator_is_running() {
        let orch = test_orchestrator(4096);
        let m = orch.register_mutator();
        assert_eq!(m.gc_status(), GcStatus::None);
    }

    // -------------------------------------------------------------------------
    // Status Transitions
    // -------------------------------------------------------------------------

    #[test]
    fn test_block_unblock_round_trip() {
        let orch = test_orchestrator(4096);
        let m = orch.register_mutator();

        orch.mark_thread_blocked(&m);
        assert_eq!(m.gc_status(), GcStatus::Unable);

        orch.mark_thread_unblocked(&m);
        assert_eq!(m.gc_status(), GcStatus::None);
        assert_eq!(orch.stats().blocked_marks(), 1);
    }

    #[test]
    #[should_panic(expected = "invalid GC status")]
    fn test_double_block_is_fatal() {
        let orch = test_orchestrator(4096);
        let m = orch.register_mutator();

        orch.mark_thread_blocked(&m);
        orch.mark_thread_blocked(&m);
    }

    #[test]
    fn test_safepoint_without_signal_is_noop() {
        let orch = test_orchestrator(4096);
        let m = orch.register_mutator();
        assert!(!orch.safepoint(&m));
        assert_eq!(orch.seq_number(), 0);
    }

    // -------------------------------------------------------------------------
    // Single-Thread Cycles
    // -------------------------------------------------------------------------

    #[test]
    fn test_solo_cycle() {
        let orch = test_orchestrator(4096);
        let m = orch.register_mutator();

        orch.enter_from_allocator(&m);

        assert_eq!(orch.seq_number(), 1);
        assert_eq!(orch.enlisted_threads(), 0);
        assert_eq!(orch.expected_threads(), 0);
        assert_eq!(m.gc_status(), GcStatus::None);
        assert_eq!(orch.stats().elections_won(), 1);
        assert_eq!(orch.stats().cycles_completed(), 1);
    }

    #[test]
    fn test_seq_number_increments_per_cycle() {
        let orch = test_orchestrator(4096);
        let m = orch.register_mutator();

        for expected_seq in 1..=5 {
            orch.enter_from_allocator(&m);
            assert_eq!(orch.seq_number(), expected_seq);
        }
        assert_eq!(orch.stats().elections_won(), 5);
    }

    #[test]
    fn test_cycle_steals_blocked_thread() {
        let orch = test_orchestrator(4096);
        let coordinator = orch.register_mutator();
        let blocked = orch.register_mutator();

        orch.mark_thread_blocked(&blocked);

        // The coordinator can complete a two-thread cycle alone: the
        // blocked thread's enlistment is stolen.
        orch.enter_from_allocator(&coordinator);

        assert_eq!(orch.seq_number(), 1);
        assert_eq!(orch.enlisted_threads(), 0);
        assert_eq!(orch.expected_threads(), 0);
        assert_eq!(blocked.gc_status(), GcStatus::Unable);
        assert_eq!(orch.stats().threads_stolen(), 1);

        orch.mark_thread_unblocked(&blocked);
        assert_eq!(blocked.gc_status(), GcStatus::None);
    }

    // -------------------------------------------------------------------------
    // Allocation Slow Path
    // -------------------------------------------------------------------------

    #[test]
    fn test_allocate_fast_path() {
        let orch = test_orchestrator(4096);
        let m = orch.register_mutator();

        let ptr = orch.allocate(&m, 64);
        assert!(m.nursery().contains(ptr.as_ptr()));
        assert_eq!(orch.seq_number(), 0);
    }

    #[test]
    fn test_allocate_triggers_collection_on_exhaustion() {
        let orch = test_orchestrator(4096);
        let m = orch.register_mutator();

        orch.allocate(&m, 4096);
        assert_eq!(m.nursery().free(), 0);

        // Nursery is full: the next allocation must run a cycle.
        let ptr = orch.allocate(&m, 64);
        assert!(m.nursery().contains(ptr.as_ptr()));
        assert_eq!(orch.seq_number(), 1);
    }

    #[test]
    #[should_panic(expected = "exceeds nursery capacity")]
    fn test_allocate_oversized_is_fatal() {
        let orch = test_orchestrator(4096);
        let m = orch.register_mutator();
        orch.allocate(&m, 8192);
    }
}
