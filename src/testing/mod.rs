//! Testing utilities and mock implementations
//!
//! Scripted executors for exercising pools, the engine and the orchestrator
//! without spawning real processes.

pub mod mocks;

pub use mocks::*;
