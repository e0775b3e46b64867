//! Shared utilities used across the crate.

pub mod graph;
