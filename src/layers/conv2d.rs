//! 2D Convolutional layer implementation
//!
//! This module provides a ConvolutionalLayer that slides a bank of square
//! filters over a `(batch, height, width, channels)` input with stride 1 and
//! symmetric zero padding.

use crate::error::{LayerError, Result};
use crate::layers::r#trait::{expect_rank, expect_shape};
use crate::layers::state::Pass;
use crate::layers::{Layer, Param};
use crate::utils::SimpleRng;
use log::{debug, trace};
use ndarray::{s, Array1, Array2, Array4, ArrayD, ArrayView4, Axis, Ix1, Ix4};
use std::collections::BTreeMap;

const NAME: &str = "ConvolutionalLayer";

/// 2D Convolutional layer with learnable filters.
///
/// Each output position is an affine transform of the input window under it,
/// so the convolution is computed as one `(batch, f²·in) × (f²·in, out)`
/// matrix product per output location, the same primitive the fully
/// connected layer uses.
///
/// # Weight layout
///
/// Weights have shape `(filter_size, filter_size, in_channels, out_channels)`.
/// The first axis is the horizontal kernel offset and the second the vertical
/// one:
///
/// ```text
/// out[b, y, x, o] = B[o] + Σ W[kx, ky, c, o] · X_pad[b, y + ky, x + kx, c]
/// ```
///
/// # Gradients
///
/// Unlike [`FullyConnectedLayer`](crate::layers::FullyConnectedLayer),
/// `backward` ADDS into the parameter gradients. Call
/// [`Layer::reset_grad`] before every new backward pass.
///
/// # Example
///
/// ```
/// use convnet_layers::layers::{ConvolutionalLayer, Layer};
/// use convnet_layers::utils::SimpleRng;
///
/// let mut rng = SimpleRng::new(42);
/// // 1 input channel, 8 filters, 3x3 kernel, padding=1
/// let layer = ConvolutionalLayer::new(1, 8, 3, 1, &mut rng).unwrap();
/// assert_eq!(layer.output_shape(&[4, 28, 28, 1]).unwrap(), vec![4, 28, 28, 8]);
/// ```
#[derive(Debug)]
pub struct ConvolutionalLayer {
    in_channels: usize,
    out_channels: usize,
    filter_size: usize,
    padding: usize,
    weights: Param, // [filter_size, filter_size, in_channels, out_channels]
    biases: Param,  // [out_channels]
    // Padded copy of the last forward input
    pass: Pass<Array4<f64>>,
}

impl ConvolutionalLayer {
    /// Create a new ConvolutionalLayer.
    ///
    /// Weights are drawn from a standard normal distribution; biases start at
    /// zero.
    ///
    /// # Arguments
    ///
    /// * `in_channels` - Number of input channels
    /// * `out_channels` - Number of output feature maps (filters)
    /// * `filter_size` - Side of the square kernel (e.g. 3 for 3×3)
    /// * `padding` - Zero pixels added on every side of height and width
    /// * `rng` - Random number generator for weight initialization
    ///
    /// # Errors
    ///
    /// [`LayerError::InvalidConfiguration`] when a channel count or the filter
    /// size is zero.
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        filter_size: usize,
        padding: usize,
        rng: &mut SimpleRng,
    ) -> Result<Self> {
        if in_channels == 0 || out_channels == 0 {
            return Err(LayerError::config(
                NAME,
                "in_channels and out_channels must be greater than 0",
            ));
        }
        if filter_size == 0 {
            return Err(LayerError::config(NAME, "filter_size must be greater than 0"));
        }

        let weights = rng.randn(&[filter_size, filter_size, in_channels, out_channels]);
        debug!(
            "{NAME}::new in={in_channels} out={out_channels} filter={filter_size} padding={padding}"
        );

        Ok(Self {
            in_channels,
            out_channels,
            filter_size,
            padding,
            weights: Param::new(weights),
            biases: Param::new(ArrayD::zeros(vec![out_channels])),
            pass: Pass::Ready,
        })
    }

    pub fn in_channels(&self) -> usize {
        self.in_channels
    }

    pub fn out_channels(&self) -> usize {
        self.out_channels
    }

    pub fn filter_size(&self) -> usize {
        self.filter_size
    }

    pub fn padding(&self) -> usize {
        self.padding
    }

    /// Weights reshaped to `(in_channels · f², out_channels)`.
    ///
    /// Rows are ordered channel first, then kx, then ky, matching
    /// [`flatten_window`].
    fn weight_matrix(&self) -> Result<Array2<f64>> {
        let w = self.weights.value().view().into_dimensionality::<Ix4>()?;
        let rows = self.in_channels * self.filter_size * self.filter_size;
        let ordered = w.permuted_axes([2, 0, 1, 3]);
        Ok(Array2::from_shape_vec(
            (rows, self.out_channels),
            ordered.iter().copied().collect(),
        )?)
    }

    /// Validate the input and return the output spatial size.
    fn output_hw(&self, shape: &[usize]) -> Result<(usize, usize)> {
        expect_rank(NAME, shape, 4)?;
        if shape[3] != self.in_channels {
            return Err(LayerError::shape(
                NAME,
                format!("(batch, height, width, {})", self.in_channels),
                shape,
            ));
        }
        let padded_h = shape[1] + 2 * self.padding;
        let padded_w = shape[2] + 2 * self.padding;
        if padded_h < self.filter_size || padded_w < self.filter_size {
            return Err(LayerError::shape(
                NAME,
                format!(
                    "padded height and width of at least {} (filter_size)",
                    self.filter_size
                ),
                shape,
            ));
        }
        Ok((
            padded_h - self.filter_size + 1,
            padded_w - self.filter_size + 1,
        ))
    }
}

/// Flatten a `(batch, ky, kx, c)` window into `(batch, c · f²)` rows.
fn flatten_window(window: ArrayView4<'_, f64>) -> Result<Array2<f64>> {
    let (batch, f_y, f_x, channels) = window.dim();
    let ordered = window.permuted_axes([0, 3, 2, 1]);
    Ok(Array2::from_shape_vec(
        (batch, channels * f_x * f_y),
        ordered.iter().copied().collect(),
    )?)
}

/// Inverse of [`flatten_window`] for a square window.
fn unflatten_window(rows: &Array2<f64>, channels: usize, filter_size: usize) -> Result<Array4<f64>> {
    let cube = Array4::from_shape_vec(
        (rows.nrows(), channels, filter_size, filter_size),
        rows.iter().copied().collect(),
    )?;
    Ok(cube.permuted_axes([0, 3, 2, 1]))
}

impl Layer for ConvolutionalLayer {
    fn name(&self) -> &'static str {
        NAME
    }

    fn forward(&mut self, input: &ArrayD<f64>) -> Result<ArrayD<f64>> {
        self.pass.ensure_ready(NAME)?;
        let (out_h, out_w) = self.output_hw(input.shape())?;
        trace!("{NAME} forward {:?}", input.shape());

        let input = input.view().into_dimensionality::<Ix4>()?;
        let (batch, height, width, channels) = input.dim();
        let p = self.padding;
        let f = self.filter_size;

        let padded = if p > 0 {
            let mut padded = Array4::<f64>::zeros((batch, height + 2 * p, width + 2 * p, channels));
            padded
                .slice_mut(s![.., p..p + height, p..p + width, ..])
                .assign(&input);
            padded
        } else {
            input.to_owned()
        };

        let w = self.weight_matrix()?;
        let bias = self.biases.value().view().into_dimensionality::<Ix1>()?;
        let mut output = Array4::<f64>::zeros((batch, out_h, out_w, self.out_channels));

        for y in 0..out_h {
            for x in 0..out_w {
                let rows = flatten_window(padded.slice(s![.., y..y + f, x..x + f, ..]))?;
                let mut out = rows.dot(&w);
                out += &bias;
                output.slice_mut(s![.., y, x, ..]).assign(&out);
            }
        }

        self.pass.store(NAME, padded)?;
        Ok(output.into_dyn())
    }

    fn backward(&mut self, grad_output: &ArrayD<f64>) -> Result<ArrayD<f64>> {
        let padded = self.pass.take(NAME)?;
        let (batch, padded_h, padded_w, channels) = padded.dim();
        let f = self.filter_size;
        let p = self.padding;
        let (out_h, out_w) = (padded_h - f + 1, padded_w - f + 1);

        let expected = [batch, out_h, out_w, self.out_channels];
        if let Err(err) = expect_shape(NAME, grad_output.shape(), &expected) {
            self.pass.restore(padded);
            return Err(err);
        }
        trace!("{NAME} backward {:?}", grad_output.shape());

        let d_out = grad_output.view().into_dimensionality::<Ix4>()?;
        let w = self.weight_matrix()?;

        let mut d_w = Array2::<f64>::zeros((channels * f * f, self.out_channels));
        let mut d_b = Array1::<f64>::zeros(self.out_channels);
        let mut d_padded = Array4::<f64>::zeros(padded.raw_dim());

        for y in 0..out_h {
            for x in 0..out_w {
                let d_slice = d_out.slice(s![.., y, x, ..]);
                let rows = flatten_window(padded.slice(s![.., y..y + f, x..x + f, ..]))?;

                d_w += &rows.t().dot(&d_slice);
                d_b += &d_slice.sum_axis(Axis(0));

                let d_rows = d_slice.dot(&w.t());
                let d_window = unflatten_window(&d_rows, channels, f)?;
                let mut target = d_padded.slice_mut(s![.., y..y + f, x..x + f, ..]);
                target += &d_window;
            }
        }

        // rows are (c, kx, ky); the weight tensor is (kx, ky, c)
        let d_w = Array4::from_shape_vec(
            (channels, f, f, self.out_channels),
            d_w.iter().copied().collect(),
        )?
        .permuted_axes([1, 2, 0, 3]);
        self.weights.accumulate_grad(d_w.view().into_dyn())?;
        self.biases.accumulate_grad(d_b.view().into_dyn())?;

        let d_input = if p > 0 {
            d_padded
                .slice(s![.., p..padded_h - p, p..padded_w - p, ..])
                .to_owned()
        } else {
            d_padded
        };
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
        let (out_h, out_w) = self.output_hw(input_shape)?;
        Ok(vec![input_shape[0], out_h, out_w, self.out_channels])
    }
}
