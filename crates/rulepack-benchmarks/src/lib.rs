//! Rulepack benchmarking suite
//!
//! Benchmarks for version and manifest parsing and for archive packing,
//! hashing and extraction.

pub mod common;

pub use common::*;
