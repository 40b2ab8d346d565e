//! Public facade crate for `paperdeck`.
//!
//! This crate intentionally contains no IO or provider-specific logic.
//! It re-exports the backend-agnostic types/traits from `paperdeck-core`.

pub use paperdeck_core::*;
