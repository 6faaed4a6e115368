//! Trainable parameter storage.

use crate::error::{LayerError, Result};
use ndarray::{ArrayD, ArrayViewD, ArrayViewMutD};

/// Trainable parameter of a layer.
///
/// Pairs a value array with a gradient array of the same shape. The gradient
/// starts at zero. Neither array can be replaced through the public API, so the
/// two shapes never diverge.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    value: ArrayD<f64>,
    grad: ArrayD<f64>,
}

impl Param {
    /// Wrap `value` with a zeroed gradient of matching shape.
    pub fn new(value: ArrayD<f64>) -> Self {
        let grad = ArrayD::zeros(value.raw_dim());
        Self { value, grad }
    }

    pub fn value(&self) -> &ArrayD<f64> {
        &self.value
    }

    pub fn grad(&self) -> &ArrayD<f64> {
        &self.grad
    }

    /// Mutable view of the value. Shape cannot change through a view.
    pub fn value_mut(&mut self) -> ArrayViewMutD<'_, f64> {
        self.value.view_mut()
    }

    /// Mutable view of the gradient accumulator.
    pub fn grad_mut(&mut self) -> ArrayViewMutD<'_, f64> {
        self.grad.view_mut()
    }

    pub fn shape(&self) -> &[usize] {
        self.value.shape()
    }

    pub fn len(&self) -> usize {
        self.value.len()
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    /// Copy `value` into the parameter. Shapes must match exactly.
    pub fn assign_value(&mut self, value: ArrayViewD<'_, f64>) -> Result<()> {
        if value.shape() != self.value.shape() {
            return Err(LayerError::shape(
                "Param::assign_value",
                format!("{:?}", self.value.shape()),
                value.shape(),
            ));
        }
        self.value.assign(&value);
        Ok(())
    }

    /// Overwrite the gradient.
    pub(crate) fn set_grad(&mut self, grad: ArrayViewD<'_, f64>) -> Result<()> {
        if grad.shape() != self.grad.shape() {
            return Err(LayerError::shape(
                "Param::set_grad",
                format!("{:?}", self.grad.shape()),
                grad.shape(),
            ));
        }
        self.grad.assign(&grad);
        Ok(())
    }

    /// Add `grad` into the accumulator.
    pub(crate) fn accumulate_grad(&mut self, grad: ArrayViewD<'_, f64>) -> Result<()> {
        if grad.shape() != self.grad.shape() {
            return Err(LayerError::shape(
                "Param::accumulate_grad",
                format!("{:?}", self.grad.shape()),
                grad.shape(),
            ));
        }
        self.grad += &grad;
        Ok(())
    }

    pub fn reset_grad(&mut self) {
        self.grad.fill(0.0);
    }
}
