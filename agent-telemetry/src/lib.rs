//! Observability utilities for the memory tiers.

#![warn(missing_docs, clippy::pedantic)]

pub mod tracing_support;

pub use tracing_support::init_tracing;
