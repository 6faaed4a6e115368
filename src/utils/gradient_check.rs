//! Numerical gradient checking using central finite differences.
//!
//! Compares the analytic gradient a function or layer reports against
//! `(f(x + δ) - f(x - δ)) / 2δ` for every element of `x`.

use crate::error::{LayerError, Result};
use crate::layers::{Layer, Param};
use crate::utils::SimpleRng;
use log::{debug, warn};
use ndarray::{ArrayD, IxDyn};

/// Step and tolerance for a finite-difference check.
///
/// An element passes when `|analytic - numeric| <= 1e-8 + tolerance · |numeric|`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GradientCheck {
    pub delta: f64,
    pub tolerance: f64,
}

impl Default for GradientCheck {
    fn default() -> Self {
        Self {
            delta: 1e-5,
            tolerance: 1e-4,
        }
    }
}

const ABSOLUTE_TOLERANCE: f64 = 1e-8;

impl GradientCheck {
    /// Check the gradient `f` reports at `x`.
    ///
    /// `f` returns `(value, gradient)`; the gradient must have the shape of
    /// its argument. Returns `Ok(false)` at the first mismatching element and
    /// logs it at warn level.
    pub fn check<F>(&self, mut f: F, x: &ArrayD<f64>) -> Result<bool>
    where
        F: FnMut(&ArrayD<f64>) -> Result<(f64, ArrayD<f64>)>,
    {
        let (_, analytic) = f(x)?;
        if analytic.shape() != x.shape() {
            return Err(LayerError::shape(
                "GradientCheck::check",
                format!("a gradient of shape {:?}", x.shape()),
                analytic.shape(),
            ));
        }

        let shape = IxDyn(x.shape());
        let analytic: Vec<f64> = analytic.iter().copied().collect();
        let mut values: Vec<f64> = x.iter().copied().collect();

        for (i, &expected) in analytic.iter().enumerate() {
            let original = values[i];

            values[i] = original + self.delta;
            let (plus, _) = f(&ArrayD::from_shape_vec(shape.clone(), values.clone())?)?;
            values[i] = original - self.delta;
            let (minus, _) = f(&ArrayD::from_shape_vec(shape.clone(), values.clone())?)?;
            values[i] = original;

            let numeric = (plus - minus) / (2.0 * self.delta);
            if (expected - numeric).abs() > ABSOLUTE_TOLERANCE + self.tolerance * numeric.abs() {
                warn!(
                    "gradients differ at flat index {i}: analytic {expected}, numeric {numeric}"
                );
                return Ok(false);
            }
        }

        debug!("gradient check passed for {} elements", analytic.len());
        Ok(true)
    }

    /// Check a layer's input gradient.
    ///
    /// The scalar objective is `Σ output ⊙ R` with a fixed random `R`, whose
    /// gradient with respect to the output is `R` itself. Any pending forward
    /// cache is discarded first; parameter gradients are zeroed afterwards.
    pub fn check_layer(
        &self,
        layer: &mut dyn Layer,
        x: &ArrayD<f64>,
        rng: &mut SimpleRng,
    ) -> Result<bool> {
        layer.discard_cache();
        let output_shape = layer.output_shape(x.shape())?;
        let output_weight = rng.randn(&output_shape);

        let passed = self.check(
            |probe| {
                let output = layer.forward(probe)?;
                let loss = (&output * &output_weight).sum();
                let grad = layer.backward(&output_weight)?;
                Ok((loss, grad))
            },
            x,
        )?;

        layer.reset_grad();
        Ok(passed)
    }

    /// Check the gradient a layer reports for its parameter `param_name`.
    ///
    /// Gradients are reset before every evaluation so layers that accumulate
    /// are measured for a single pass. The parameter value is restored and its
    /// gradient zeroed afterwards.
    pub fn check_layer_param(
        &self,
        layer: &mut dyn Layer,
        x: &ArrayD<f64>,
        param_name: &str,
        rng: &mut SimpleRng,
    ) -> Result<bool> {
        layer.discard_cache();
        let initial = param_mut(layer, param_name)?.value().clone();
        let output_shape = layer.output_shape(x.shape())?;
        let output_weight = rng.randn(&output_shape);

        let passed = self.check(
            |w| {
                param_mut(layer, param_name)?.assign_value(w.view())?;
                layer.reset_grad();
                let output = layer.forward(x)?;
                let loss = (&output * &output_weight).sum();
                layer.backward(&output_weight)?;
                let grad = param_mut(layer, param_name)?.grad().clone();
                Ok((loss, grad))
            },
            &initial,
        );

        // restore even when the check itself failed
        param_mut(layer, param_name)?.assign_value(initial.view())?;
        layer.discard_cache();
        layer.reset_grad();
        passed
    }
}

fn param_mut<'a>(layer: &'a mut (dyn Layer + '_), name: &str) -> Result<&'a mut Param> {
    let layer_name = layer.name();
    layer
        .params_mut()
        .remove(name)
        .ok_or_else(|| LayerError::config(layer_name, format!("no parameter named '{name}'")))
}

/// [`GradientCheck::check`] with the default step and tolerance.
pub fn check_gradient<F>(f: F, x: &ArrayD<f64>) -> Result<bool>
where
    F: FnMut(&ArrayD<f64>) -> Result<(f64, ArrayD<f64>)>,
{
    GradientCheck::default().check(f, x)
}

/// [`GradientCheck::check_layer`] with the default step and tolerance.
pub fn check_layer_gradient(
    layer: &mut dyn Layer,
    x: &ArrayD<f64>,
    rng: &mut SimpleRng,
) -> Result<bool> {
    GradientCheck::default().check_layer(layer, x, rng)
}

/// [`GradientCheck::check_layer_param`] with the default step and tolerance.
pub fn check_layer_param_gradient(
    layer: &mut dyn Layer,
    x: &ArrayD<f64>,
    param_name: &str,
    rng: &mut SimpleRng,
) -> Result<bool> {
    GradientCheck::default().check_layer_param(layer, x, param_name, rng)
}
