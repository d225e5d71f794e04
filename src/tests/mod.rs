// Test modules for resilient-llm crate
//
// Each source module has a corresponding test file that focuses on
// behavior verification.

// Test helper utilities
pub mod helpers;

pub mod cache;
