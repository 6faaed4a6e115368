//! Shared utilities for layer implementations
//!
//! This module provides the seeded random number generator used for weight
//! initialization and the finite-difference gradient checking harness.
pub mod gradient_check;
pub mod rng;

pub use rng::SimpleRng;
