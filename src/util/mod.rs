//! Shared helpers

pub mod hash;

pub use hash::base36_truncated_hash;
