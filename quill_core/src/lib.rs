//! Core data structures for the Quill virtual machine.
//!
//! This crate provides:
//! - Global string interning (`intern`) with pointer-equality handles
//! - The index hash table (`hash`), a Robin-Hood table that maps
//!   externally-owned string keys to small integer indices
//!
//! Everything here is a leaf: no other workspace crate is a dependency,
//! and the structures make no assumptions about the object model above.

#![deny(unsafe_op_in_unsafe_fn)]

pub mod hash;
pub mod intern;

// Re-exports for convenient access
pub use hash::IndexHashTable;
pub use intern::{intern, InternedString};
