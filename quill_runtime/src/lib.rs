//! Runtime object model for the Quill VM.
//!
//! This crate provides:
//! - Callsite descriptors: immutable call shapes (argument kinds, named
//!   argument handles, flattening)
//! - The process-wide callsite interning store and its derivation
//!   operators
//! - VM instance state tying the stores to the GC orchestrator
//!
//! Interning gives equal call shapes a single address, so the interpreter
//! and any later compilation tiers compare shapes by pointer.

#![deny(unsafe_op_in_unsafe_fn)]

pub mod callsite;
pub mod instance;

// Re-export commonly used items
pub use callsite::{
    callsites_equal, get_common, is_common, ArgFlags, Callsite, CallsiteError, CallsiteRef,
    CallsiteResult, CallsiteStats, CallsiteStore, CommonShape, INTERN_ARITY_LIMIT,
};
pub use instance::VmInstance;
