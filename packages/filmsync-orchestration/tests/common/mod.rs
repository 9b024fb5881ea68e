//! Common test utilities for filmsync-orchestration
//!
//! Deterministic fakes for the storage ports plus fixture builders, shared
//! by the integration suites.

#![allow(dead_code)]

mod fakes;
mod fixtures;

// Re-export all utilities
pub use fakes::*;
pub use fixtures::*;
