//! Resilience machinery behind the client
//!
//! Each module is re-exported from `lib.rs` under its own name
//! (`resilient_llm::cache`, `resilient_llm::circuit_breaker`, ...).

pub mod cache;
pub mod circuit_breaker;
pub mod fallback;
pub mod store;
pub mod tokens;
