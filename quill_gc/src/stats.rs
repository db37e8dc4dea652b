//! Counters for GC orchestration.
//!
//! Tracks elections, signalling and rendezvous behavior. All counters are
//! updated atomically and read with relaxed ordering; they are diagnostics,
//! not synchronization.

use std::sync::atomic::{AtomicU64, Ordering};

/// Statistics for the stop-the-world protocol.
#[derive(Debug, Default)]
pub struct OrchestratorStats {
    /// Completed collection cycles.
    cycles_completed: AtomicU64,

    /// Coordinator elections won (one per cycle).
    elections_won: AtomicU64,

    /// Running threads signalled with an interrupt.
    threads_signaled: AtomicU64,

    /// Blocked threads whose participation was stolen.
    threads_stolen: AtomicU64,

    /// Threads that enlisted through the interrupted path.
    interrupts_entered: AtomicU64,

    /// Threads that entered a native-code block.
    blocked_marks: AtomicU64,

    /// Unblock attempts that had to wait out an in-flight cycle.
    unblock_retries: AtomicU64,
}

impl OrchestratorStats {
    /// Create new zeroed statistics.
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn record_cycle(&self) {
        self.cycles_completed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_election(&self) {
        self.elections_won.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_signal(&self) {
        self.threads_signaled.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_steal(&self) {
        self.threads_stolen.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_interrupt(&self) {
        self.interrupts_entered.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_blocked(&self) {
        self.blocked_marks.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_unblock_retry(&self) {
        self.unblock_retries.fetch_add(1, Ordering::Relaxed);
    }

    // =========================================================================
    // Getters
    // =========================================================================

    /// Completed collection cycles.
    #[inline]
    pub fn cycles_completed(&self) -> u64 {
        self.cycles_completed.load(Ordering::Relaxed)
    }

    /// Coordinator elections won.
    #[inline]
    pub fn elections_won(&self) -> u64 {
        self.elections_won.load(Ordering::Relaxed)
    }

    /// Running threads signalled with an interrupt.
    #[inline]
    pub fn threads_signaled(&self) -> u64 {
        self.threads_signaled.load(Ordering::Relaxed)
    }

    /// Blocked threads whose participation was stolen.
    #[inline]
    pub fn threads_stolen(&self) -> u64 {
        self.threads_stolen.load(Ordering::Relaxed)
    }

    /// Threads that enlisted through the interrupted path.
    #[inline]
    pub fn interrupts_entered(&self) -> u64 {
        self.interrupts_entered.load(Ordering::Relaxed)
    }

    /// Threads that entered a native-code block.
    #[inline]
    pub fn blocked_marks(&self) -> u64 {
        self.blocked_marks.load(Ordering::Relaxed)
    }

    /// Unblock attempts that had to wait out an in-flight cycle.
    #[inline]
    pub fn unblock_retries(&self) -> u64 {
        self.unblock_retries.load(Ordering::Relaxed)
    }
}

impl std::fmt::Display for OrchestratorStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "GC Orchestrator Statistics:")?;
        writeln!(f, "  Cycles Completed:   {}", self.cycles_completed())?;
        writeln!(f, "  Elections Won:      {}", self.elections_won())?;
        writeln!(f, "  Threads Signalled:  {}", self.threads_signaled())?;
        writeln!(f, "  Threads Stolen:     {}", self.threads_stolen())?;
        writeln!(f, "  Interrupt Entries:  {}", self.interrupts_entered())?;
        writeln!(f, "  Blocked Marks:      {}", self.blocked_marks())?;
        writeln!(f, "  Unblock Retries:    {}", self.unblock_retries())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_start_zeroed() {
        let stats = OrchestratorStats::new();
        assert_eq!(stats.cycles_completed(), 0);
        assert_eq!(stats.elections_won(), 0);
        assert_eq!(stats.threads_stolen(), 0);
    }

    #[test]
    fn test_stats_record() {
        let stats = OrchestratorStats::new();
        stats.record_cycle();
        stats.record_cycle();
        stats.record_election();
        stats.record_steal();

        assert_eq!(stats.cycles_completed(), 2);
        assert_eq!(stats.elections_won(), 1);
        assert_eq!(stats.threads_stolen(), 1);
    }

    #[test]
    fn test_stats_display() {
        let stats = OrchestratorStats::new();
        stats.record_cycle();

        let rendered = format!("{}", stats);
        assert!(rendered.contains("GC Orchestrator Statistics"));
        assert!(rendered.contains("Cycles Completed:   1"));
    }
}
