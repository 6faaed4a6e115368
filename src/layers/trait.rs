//! Layer trait definition for neural network layers
//!
//! This module defines the core Layer trait that all layer types implement.
//! The trait provides a common interface for forward propagation, backward
//! propagation and access to trainable parameters.

use crate::error::{LayerError, Result};
use crate::layers::Param;
use ndarray::ArrayD;
use std::collections::BTreeMap;

/// Core trait for neural network layers.
///
/// Every layer (ReLU, FullyConnected, Convolutional, MaxPooling, Flattener)
/// implements this trait so a caller can chain them in a fixed sequence:
/// `forward` front-to-back, then `backward` back-to-front, threading the
/// gradient from one layer to the previous one.
///
/// # Call order
///
/// A layer caches what its backward pass needs during `forward`. That cache
/// is valid for exactly one `backward` call:
///
/// - `backward` without a preceding `forward` fails with
///   [`LayerError::BackwardWithoutForward`].
/// - A second `forward` before `backward` fails with
///   [`LayerError::ForwardPending`]. Call [`Layer::discard_cache`] to drop
///   the cache when only the forward output is needed.
///
/// # Example
///
/// ```
/// use convnet_layers::layers::{FullyConnectedLayer, Layer};
/// use convnet_layers::utils::SimpleRng;
/// use ndarray::ArrayD;
///
/// let mut rng = SimpleRng::new(42);
/// let mut layer = FullyConnectedLayer::new(4, 3, &mut rng).unwrap();
///
/// let input = ArrayD::<f64>::zeros(vec![2, 4]);
/// let output = layer.forward(&input).unwrap();
/// assert_eq!(output.shape(), &[2, 3]);
///
/// let grad_input = layer.backward(&ArrayD::ones(vec![2, 3])).unwrap();
/// assert_eq!(grad_input.shape(), &[2, 4]);
/// ```
pub trait Layer: Send {
    /// Short human-readable layer name used in errors and logs.
    fn name(&self) -> &'static str;

    /// Forward propagation through the layer.
    ///
    /// Computes the output for `input` and caches whatever the matching
    /// `backward` call needs.
    ///
    /// # Errors
    ///
    /// Returns [`LayerError::InvalidShape`] when `input` does not match what
    /// the layer was built for, and [`LayerError::ForwardPending`] when the
    /// previous forward has not been consumed.
    fn forward(&mut self, input: &ArrayD<f64>) -> Result<ArrayD<f64>>;

    /// Backward propagation through the layer.
    ///
    /// Takes the gradient of the loss with respect to the layer output and
    /// returns the gradient with respect to the layer input (same shape as the
    /// forward input). Parameter layers also write into their `Param`
    /// gradients; whether they overwrite or accumulate is layer specific.
    fn backward(&mut self, grad_output: &ArrayD<f64>) -> Result<ArrayD<f64>>;

    /// Trainable parameters by name. Parameter-free layers return an empty map.
    fn params(&self) -> BTreeMap<&'static str, &Param> {
        BTreeMap::new()
    }

    /// Mutable access to the trainable parameters.
    fn params_mut(&mut self) -> BTreeMap<&'static str, &mut Param> {
        BTreeMap::new()
    }

    /// Zero every parameter gradient.
    fn reset_grad(&mut self) {
        for param in self.params_mut().into_values() {
            param.reset_grad();
        }
    }

    /// Drop the forward cache, returning the layer to its ready state.
    fn discard_cache(&mut self);

    /// Output shape produced for an input of `input_shape`.
    fn output_shape(&self, input_shape: &[usize]) -> Result<Vec<usize>>;

    /// Total number of trainable scalars.
    fn parameter_count(&self) -> usize {
        self.params().values().map(|p| p.len()).sum()
    }
}

/// Reject inputs whose rank differs from `rank`.
pub(crate) fn expect_rank(op: &'static str, shape: &[usize], rank: usize) -> Result<()> {
    if shape.len() != rank {
        return Err(LayerError::shape(op, format!("a rank-{rank} tensor"), shape));
    }
    Ok(())
}

/// Reject gradients whose shape differs from the one produced by forward.
pub(crate) fn expect_shape(op: &'static str, shape: &[usize], expected: &[usize]) -> Result<()> {
    if shape != expected {
        return Err(LayerError::shape(op, format!("{expected:?}"), shape));
    }
    Ok(())
}
