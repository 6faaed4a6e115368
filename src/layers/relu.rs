//! Rectified linear activation layer.

use crate::error::Result;
use crate::layers::r#trait::expect_shape;
use crate::layers::state::Pass;
use crate::layers::Layer;
use log::trace;
use ndarray::{ArrayD, Zip};

const NAME: &str = "ReluLayer";

/// Elementwise `max(x, 0)`.
///
/// Forward caches a boolean mask of the strictly positive inputs; backward
/// lets the gradient through only where the mask is set, so an input of
/// exactly zero blocks gradient.
#[derive(Debug, Default)]
pub struct ReluLayer {
    pass: Pass<ArrayD<bool>>,
}

impl ReluLayer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Layer for ReluLayer {
    fn name(&self) -> &'static str {
        NAME
    }

    fn forward(&mut self, input: &ArrayD<f64>) -> Result<ArrayD<f64>> {
        self.pass.ensure_ready(NAME)?;
        trace!("{NAME} forward {:?}", input.shape());

        let mask = input.mapv(|v| v > 0.0);
        let output = Zip::from(input)
            .and(&mask)
            .map_collect(|&v, &keep| if keep { v } else { 0.0 });

        self.pass.store(NAME, mask)?;
        Ok(output)
    }

    fn backward(&mut self, grad_output: &ArrayD<f64>) -> Result<ArrayD<f64>> {
        let mask = self.pass.take(NAME)?;
        if let Err(err) = expect_shape(NAME, grad_output.shape(), mask.shape()) {
            self.pass.restore(mask);
            return Err(err);
        }
        trace!("{NAME} backward {:?}", grad_output.shape());

        Ok(Zip::from(grad_output)
            .and(&mask)
            .map_collect(|&g, &keep| if keep { g } else { 0.0 }))
    }

    fn discard_cache(&mut self) {
        self.pass.clear();
    }

    fn output_shape(&self, input_shape: &[usize]) -> Result<Vec<usize>> {
        Ok(input_shape.to_vec())
    }
}
