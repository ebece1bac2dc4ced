//! Command orchestration layer.
//!
//! Mutating operations live on the async services; `apply_engine_query`
//! serves read-only lookups straight from the store.

pub mod engine_query;
