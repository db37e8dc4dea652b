//! VM instance state.
//!
//! A `VmInstance` is the process-wide root: the callsite interning store
//! (with the common shapes interned) and the GC orchestrator that mutator
//! threads register with. Everything hangs off an instance; there is no
//! other global state in the runtime.

use std::sync::Arc;

use quill_gc::{GcConfig, GcOrchestrator, Mutator, NurseryCollector, ResetCollector};

use crate::callsite::CallsiteStore;

/// Process-wide VM state.
pub struct VmInstance {
    /// Callsite interning store.
    callsites: CallsiteStore,

    /// Stop-the-world GC coordination.
    orchestrator: Arc<GcOrchestrator>,
}

impl VmInstance {
    /// Create an instance with default GC configuration.
    pub fn new() -> Self {
        Self::with_config(GcConfig::default(), Box::new(ResetCollector))
    }

    /// Create an instance with explicit GC configuration and collector.
    pub fn with_config(config: GcConfig, collector: Box<dyn NurseryCollector>) -> Self {
        let callsites = CallsiteStore::new();
        callsites.initialize_common();

        VmInstance {
            callsites,
            orchestrator: Arc::new(GcOrchestrator::new(config, collector)),
        }
    }

    /// The callsite interning store.
    #[inline]
    pub fn callsites(&self) -> &CallsiteStore {
        &self.callsites
    }

    /// The GC orchestrator.
    #[inline]
    pub fn orchestrator(&self) -> &Arc<GcOrchestrator> {
        &self.orchestrator
    }

    /// Register the calling thread as a mutator of this instance.
    #[inline]
    pub fn register_mutator(&self) -> Arc<Mutator> {
        self.orchestrator.register_mutator()
    }
}

impl Default for VmInstance {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callsite::{get_common, is_common, CommonShape};

    #[test]
    fn test_instance_interns_commons_at_startup() {
        let vm = VmInstance::new();
        assert_eq!(vm.callsites().interned_count(), CommonShape::COUNT);

        for id in 0..CommonShape::COUNT as u32 {
            let cs = get_common(id).unwrap();
            assert!(is_common(cs));
            assert!(cs.is_interned());
        }
    }

    #[test]
    fn test_instance_mutator_registration() {
        let vm = VmInstance::new();
        let mutator = vm.register_mutator();

        assert_eq!(vm.orchestrator().mutator_count(), 1);
        let ptr = vm.orchestrator().allocate(&mutator, 64);
        assert!(mutator.nursery().contains(ptr.as_ptr()));
    }
}
