//! Flattening layer between the spatial and the dense part of a network.

use crate::error::{LayerError, Result};
use crate::layers::r#trait::{expect_rank, expect_shape};
use crate::layers::state::Pass;
use crate::layers::Layer;
use log::trace;
use ndarray::{Array2, Array4, ArrayD, Ix4};

const NAME: &str = "Flattener";

/// Reshapes `(batch, height, width, channels)` into `(batch, C·H·W)`.
///
/// Features are laid out channel-major: the flat index of `(h, w, c)` is
/// `c·H·W + h·W + w`. `backward` applies the exact inverse layout.
#[derive(Debug, Default)]
pub struct Flattener {
    pass: Pass<[usize; 4]>,
}

impl Flattener {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Layer for Flattener {
    fn name(&self) -> &'static str {
        NAME
    }

    fn forward(&mut self, input: &ArrayD<f64>) -> Result<ArrayD<f64>> {
        self.pass.ensure_ready(NAME)?;
        expect_rank(NAME, input.shape(), 4)?;
        trace!("{NAME} forward {:?}", input.shape());

        let x = input.view().into_dimensionality::<Ix4>()?;
        let (batch, height, width, channels) = x.dim();
        let channel_major = x.permuted_axes([0, 3, 1, 2]);
        let output = Array2::from_shape_vec(
            (batch, channels * height * width),
            channel_major.iter().copied().collect(),
        )?;

        self.pass.store(NAME, [batch, height, width, channels])?;
        Ok(output.into_dyn())
    }

    fn backward(&mut self, grad_output: &ArrayD<f64>) -> Result<ArrayD<f64>> {
        let shape = self.pass.take(NAME)?;
        let [batch, height, width, channels] = shape;
        if let Err(err) = expect_shape(NAME, grad_output.shape(), &[batch, channels * height * width]) {
            self.pass.restore(shape);
            return Err(err);
        }
        trace!("{NAME} backward {:?}", grad_output.shape());

        let channel_major = Array4::from_shape_vec(
            (batch, channels, height, width),
            grad_output.iter().copied().collect(),
        )?;
        let d_input = channel_major.permuted_axes([0, 2, 3, 1]);
        Ok(d_input.as_standard_layout().into_owned().into_dyn())
    }

    fn discard_cache(&mut self) {
        self.pass.clear();
    }

    fn output_shape(&self, input_shape: &[usize]) -> Result<Vec<usize>> {
        expect_rank(NAME, input_shape, 4)?;
        let features: usize = input_shape[1..].iter().product();
        if features == 0 {
            return Err(LayerError::shape(NAME, "non-empty spatial dimensions", input_shape));
        }
        Ok(vec![input_shape[0], features])
    }
}
