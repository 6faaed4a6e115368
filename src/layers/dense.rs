//! Fully connected layer implementation
//!
//! This module provides a FullyConnectedLayer (also known as Dense or Linear)
//! that performs the transformation: output = input × weights + biases

use crate::error::{LayerError, Result};
use crate::layers::r#trait::{expect_rank, expect_shape};
use crate::layers::state::Pass;
use crate::layers::{Layer, Param};
use crate::utils::SimpleRng;
use log::{debug, trace};
use ndarray::{Array2, ArrayD, Axis, Ix2};
use std::collections::BTreeMap;

const NAME: &str = "FullyConnectedLayer";

/// Scale applied to the standard normal initial weights and biases.
const INIT_SCALE: f64 = 0.001;

/// Fully connected layer with weights and biases.
///
/// Performs the affine transformation `y = xW + b` where x is the input
/// `(batch_size, n_input)`, W is `(n_input, n_output)` and b is `(1, n_output)`
/// broadcast over the batch.
///
/// `backward` OVERWRITES the parameter gradients instead of adding to them.
/// Two backward passes without an intervening optimizer step keep only the
/// last one.
///
/// # Example
///
/// ```
/// use convnet_layers::layers::{FullyConnectedLayer, Layer};
/// use convnet_layers::utils::SimpleRng;
///
/// let mut rng = SimpleRng::new(42);
/// let layer = FullyConnectedLayer::new(784, 10, &mut rng).unwrap();
/// assert_eq!(layer.n_input(), 784);
/// assert_eq!(layer.n_output(), 10);
/// assert_eq!(layer.parameter_count(), 784 * 10 + 10);
/// ```
#[derive(Debug)]
pub struct FullyConnectedLayer {
    n_input: usize,
    n_output: usize,
    weights: Param,
    biases: Param,
    pass: Pass<Array2<f64>>,
}

impl FullyConnectedLayer {
    /// Create a new layer with small random weights.
    ///
    /// Weights and biases are drawn from `0.001 · N(0, 1)` so initial
    /// activations stay close to linear.
    ///
    /// # Errors
    ///
    /// [`LayerError::InvalidConfiguration`] when either size is zero.
    pub fn new(n_input: usize, n_output: usize, rng: &mut SimpleRng) -> Result<Self> {
        if n_input == 0 || n_output == 0 {
            return Err(LayerError::config(
                NAME,
                format!("n_input and n_output must be greater than 0, got {n_input}x{n_output}"),
            ));
        }

        let weights = rng.randn(&[n_input, n_output]) * INIT_SCALE;
        let biases = rng.randn(&[1, n_output]) * INIT_SCALE;
        debug!("{NAME}::new n_input={n_input} n_output={n_output}");

        Ok(Self {
            n_input,
            n_output,
            weights: Param::new(weights),
            biases: Param::new(biases),
            pass: Pass::Ready,
        })
    }

    pub fn n_input(&self) -> usize {
        self.n_input
    }

    pub fn n_output(&self) -> usize {
        self.n_output
    }

    pub fn weights(&self) -> &Param {
        &self.weights
    }

    pub fn biases(&self) -> &Param {
        &self.biases
    }

    fn weight_matrix(&self) -> Result<Array2<f64>> {
        Ok(self.weights.value().view().into_dimensionality::<Ix2>()?.to_owned())
    }

    fn bias_row(&self) -> Result<Array2<f64>> {
        Ok(self.biases.value().view().into_dimensionality::<Ix2>()?.to_owned())
    }

    fn check_input(&self, shape: &[usize]) -> Result<()> {
        expect_rank(NAME, shape, 2)?;
        if shape[1] != self.n_input {
            return Err(LayerError::shape(
                NAME,
                format!("(batch, {})", self.n_input),
                shape,
            ));
        }
        Ok(())
    }
}

impl Layer for FullyConnectedLayer {
    fn name(&self) -> &'static str {
        NAME
    }

    fn forward(&mut self, input: &ArrayD<f64>) -> Result<ArrayD<f64>> {
        self.pass.ensure_ready(NAME)?;
        self.check_input(input.shape())?;
        trace!("{NAME} forward {:?}", input.shape());

        let x = input.view().into_dimensionality::<Ix2>()?.to_owned();
        let output = x.dot(&self.weight_matrix()?) + &self.bias_row()?;

        self.pass.store(NAME, x)?;
        Ok(output.into_dyn())
    }

    fn backward(&mut self, grad_output: &ArrayD<f64>) -> Result<ArrayD<f64>> {
        let x = self.pass.take(NAME)?;
        let expected = [x.nrows(), self.n_output];
        if let Err(err) = expect_shape(NAME, grad_output.shape(), &expected) {
            self.pass.restore(x);
            return Err(err);
        }
        trace!("{NAME} backward {:?}", grad_output.shape());

        let d_out = grad_output.view().into_dimensionality::<Ix2>()?;

        let d_weights = x.t().dot(&d_out);
        let d_biases = d_out.sum_axis(Axis(0)).insert_axis(Axis(0));
        self.weights.set_grad(d_weights.into_dyn().view())?;
        self.biases.set_grad(d_biases.into_dyn().view())?;

        let d_input = d_out.dot(&self.weight_matrix()?.t());
        Ok(d_input.into_dyn())
    }

    fn params(&self) -> BTreeMap<&'static str, &Param> {
        BTreeMap::from([("W", &self.weights), ("B", &self.biases)])
    }

    fn params_mut(&mut self) -> BTreeMap<&'static str, &mut Param> {
        BTreeMap::from([("W", &mut self.weights), ("B", &mut self.biases)])
    }

    fn discard_cache(&mut self) {
        self.pass.clear();
    }

    fn output_shape(&self, input_shape: &[usize]) -> Result<Vec<usize>> {
        self.check_input(input_shape)?;
        Ok(vec![input_shape[0], self.n_output])
    }
}
