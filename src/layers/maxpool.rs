//! Max-pooling layer.

use crate::error::{LayerError, Result};
use crate::layers::r#trait::{expect_rank, expect_shape};
use crate::layers::state::Pass;
use crate::layers::Layer;
use log::{debug, trace};
use ndarray::{s, Array2, Array4, ArrayD, ArrayView4, Axis, Ix4, Zip};

const NAME: &str = "MaxPoolingLayer";

/// Spatial max pooling over `(batch, height, width, channels)` inputs.
///
/// Windows start at `0, stride, 2·stride, …` along height and width and cover
/// `pool_size` pixels, clipped at the right and bottom edges. The output has
/// `ceil(H / stride) × ceil(W / stride)` positions.
///
/// In the backward pass every position equal to its window's maximum receives
/// the full upstream gradient, so tied maxima each get a copy. Overlapping
/// windows (`stride < pool_size`) add up.
///
/// # Example
///
/// ```
/// use convnet_layers::layers::{Layer, MaxPoolingLayer};
/// use ndarray::Array;
///
/// let mut pool = MaxPoolingLayer::new(2, 2).unwrap();
/// let x = Array::from_shape_vec((1, 2, 2, 1), vec![1.0, 2.0, 3.0, 4.0])
///     .unwrap()
///     .into_dyn();
/// let y = pool.forward(&x).unwrap();
/// assert_eq!(y.into_raw_vec(), vec![4.0]);
/// ```
#[derive(Debug)]
pub struct MaxPoolingLayer {
    pool_size: usize,
    stride: usize,
    pass: Pass<Array4<f64>>,
}

impl MaxPoolingLayer {
    /// # Errors
    ///
    /// [`LayerError::InvalidConfiguration`] when `pool_size` or `stride` is
    /// zero.
    pub fn new(pool_size: usize, stride: usize) -> Result<Self> {
        if pool_size == 0 || stride == 0 {
            return Err(LayerError::config(
                NAME,
                format!("pool_size and stride must be greater than 0, got {pool_size} and {stride}"),
            ));
        }
        debug!("{NAME}::new pool_size={pool_size} stride={stride}");
        Ok(Self {
            pool_size,
            stride,
            pass: Pass::Ready,
        })
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Index range of the window starting at `start` along an axis of `len`.
    fn window(&self, start: usize, len: usize) -> std::ops::Range<usize> {
        start..(start + self.pool_size).min(len)
    }

    fn output_hw(&self, shape: &[usize]) -> Result<(usize, usize)> {
        expect_rank(NAME, shape, 4)?;
        if shape[1] == 0 || shape[2] == 0 {
            return Err(LayerError::shape(NAME, "non-empty height and width", shape));
        }
        Ok((shape[1].div_ceil(self.stride), shape[2].div_ceil(self.stride)))
    }
}

/// Larger of two values; a NaN on either side wins.
fn nan_max(acc: f64, v: f64) -> f64 {
    if v.is_nan() || v > acc {
        v
    } else {
        acc
    }
}

/// Per `(batch, channel)` maximum of a window.
///
/// A window holding a NaN pools to NaN. No position compares equal to it, so
/// such a window routes no gradient.
fn window_max(window: &ArrayView4<'_, f64>) -> Array2<f64> {
    window
        .fold_axis(Axis(1), f64::NEG_INFINITY, |&acc, &v| nan_max(acc, v))
        .fold_axis(Axis(1), f64::NEG_INFINITY, |&acc, &v| nan_max(acc, v))
}

impl Layer for MaxPoolingLayer {
    fn name(&self) -> &'static str {
        NAME
    }

    fn forward(&mut self, input: &ArrayD<f64>) -> Result<ArrayD<f64>> {
        self.pass.ensure_ready(NAME)?;
        let (out_h, out_w) = self.output_hw(input.shape())?;
        trace!("{NAME} forward {:?}", input.shape());

        let x = input.view().into_dimensionality::<Ix4>()?.to_owned();
        let (batch, height, width, channels) = x.dim();
        let mut output = Array4::<f64>::zeros((batch, out_h, out_w, channels));

        for (oy, y) in (0..height).step_by(self.stride).enumerate() {
            for (ox, xs) in (0..width).step_by(self.stride).enumerate() {
                let window = x.slice(s![.., self.window(y, height), self.window(xs, width), ..]);
                output
                    .slice_mut(s![.., oy, ox, ..])
                    .assign(&window_max(&window));
            }
        }

        self.pass.store(NAME, x)?;
        Ok(output.into_dyn())
    }

    fn backward(&mut self, grad_output: &ArrayD<f64>) -> Result<ArrayD<f64>> {
        let x = self.pass.take(NAME)?;
        let (batch, height, width, channels) = x.dim();
        let (out_h, out_w) = self.output_hw(x.shape())?;
        if let Err(err) = expect_shape(NAME, grad_output.shape(), &[batch, out_h, out_w, channels]) {
            self.pass.restore(x);
            return Err(err);
        }
        trace!("{NAME} backward {:?}", grad_output.shape());

        let d_out = grad_output.view().into_dimensionality::<Ix4>()?;
        let mut d_input = Array4::<f64>::zeros(x.raw_dim());

        for (oy, y) in (0..height).step_by(self.stride).enumerate() {
            for (ox, xs) in (0..width).step_by(self.stride).enumerate() {
                let rows = self.window(y, height);
                let cols = self.window(xs, width);
                let window = x.slice(s![.., rows.clone(), cols.clone(), ..]);
                let maxima = window_max(&window);
                let d_slice = d_out.slice(s![.., oy, ox, ..]);

                let mut target = d_input.slice_mut(s![.., rows, cols, ..]);
                Zip::indexed(&mut target)
                    .and(&window)
                    .for_each(|(b, _, _, c), grad, &value| {
                        if value == maxima[[b, c]] {
                            *grad += d_slice[[b, c]];
                        }
                    });
            }
        }

        Ok(d_input.into_dyn())
    }

    fn discard_cache(&mut self) {
        self.pass.clear();
    }

    fn output_shape(&self, input_shape: &[usize]) -> Result<Vec<usize>> {
        let (out_h, out_w) = self.output_hw(input_shape)?;
        Ok(vec![input_shape[0], out_h, out_w, input_shape[3]])
    }
}
