//! Orchestrator configuration.
//!
//! All values are tunable; the defaults suit typical interpreter workloads.

/// Configuration for the GC orchestrator.
///
/// # Example
///
/// ```ignore
/// use quill_gc::GcConfig;
///
/// // Small nurseries for latency-sensitive embedding
/// let config = GcConfig {
///     nursery_size: 512 * 1024,
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct GcConfig {
    /// Size of each mutator's nursery in bytes.
    ///
    /// Larger nurseries reduce collection frequency but lengthen each
    /// rendezvous.
    ///
    /// Default: 4MB
    pub nursery_size: usize,

    /// Busy-spin iterations in the enlistment rendezvous before falling
    /// back to yielding the OS scheduler.
    ///
    /// Default: 1000
    pub max_enlist_spins: u32,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            nursery_size: 4 * 1024 * 1024, // 4MB
            max_enlist_spins: 1000,
        }
    }
}

impl GcConfig {
    /// Configuration optimized for low memory usage.
    pub fn low_memory() -> Self {
        Self {
            nursery_size: 256 * 1024, // 256KB
            ..Default::default()
        }
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.nursery_size < 4096 {
            return Err(ConfigError::NurseryTooSmall);
        }
        Ok(())
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// Nursery size is too small (minimum 4KB).
    NurseryTooSmall,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::NurseryTooSmall => write!(f, "nursery size must be at least 4KB"),
        }
    }
}

impl std::error::Error for ConfigError {}
