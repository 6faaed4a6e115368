//! Convolutional network layers with hand-derived gradients
//!
//! This library provides the computational core of a small convolutional
//! network trainer: layers with explicit forward and backward passes, the
//! softmax cross-entropy loss and L2 regularization. Model assembly, training
//! loops and optimizers live outside the crate and drive it through the
//! [`layers::Layer`] trait and the [`loss`] functions.
//!
//! # Modules
//!
//! - `layers`: Layer trait, Param storage and the ReLU, FullyConnected,
//!   Convolutional, MaxPooling and Flattener layers
//! - `loss`: softmax, cross-entropy and L2 regularization
//! - `utils`: seeded RNG and finite-difference gradient checking
//! - `error`: error types shared by all modules

pub mod error;
pub mod layers;
pub mod loss;
pub mod utils;

pub use error::{LayerError, Result};
