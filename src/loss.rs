//! Loss primitives: softmax, cross-entropy and L2 regularization.
//!
//! Predictions are either a single score vector of rank 1 or a batch of
//! score rows of rank 2. The matching target is a [`TargetIndex`].

use crate::error::{LayerError, Result};
use ndarray::{ArrayD, Axis};

/// Index of the true class for one sample or for every row of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetIndex {
    /// Single sample; pairs with rank-1 predictions.
    Scalar(usize),
    /// One class per row; pairs with rank-2 predictions of the same batch size.
    Batch(Vec<usize>),
}

impl From<usize> for TargetIndex {
    fn from(index: usize) -> Self {
        TargetIndex::Scalar(index)
    }
}

impl From<Vec<usize>> for TargetIndex {
    fn from(indices: Vec<usize>) -> Self {
        TargetIndex::Batch(indices)
    }
}

impl From<&[usize]> for TargetIndex {
    fn from(indices: &[usize]) -> Self {
        TargetIndex::Batch(indices.to_vec())
    }
}

/// `(row, class)` pairs selected by `target` for predictions of `shape`.
///
/// For a scalar target the row is always 0 and refers to the vector itself.
fn target_cells(op: &'static str, shape: &[usize], target: &TargetIndex) -> Result<Vec<(usize, usize)>> {
    let cells: Vec<(usize, usize)> = match (target, shape.len()) {
        (TargetIndex::Scalar(index), 1) => vec![(0, *index)],
        (TargetIndex::Batch(indices), 2) => {
            if indices.len() != shape[0] {
                return Err(LayerError::shape(
                    op,
                    format!("a batch of {} rows to match the targets", indices.len()),
                    shape,
                ));
            }
            indices.iter().copied().enumerate().collect()
        }
        (TargetIndex::Scalar(_), _) => {
            return Err(LayerError::shape(op, "rank-1 predictions for a scalar target", shape))
        }
        (TargetIndex::Batch(_), _) => {
            return Err(LayerError::shape(op, "rank-2 predictions for a batch target", shape))
        }
    };

    let classes = shape[shape.len() - 1];
    if let Some(&(_, index)) = cells.iter().find(|&&(_, index)| index >= classes) {
        return Err(LayerError::InvalidTarget { index, classes });
    }
    Ok(cells)
}

fn expect_scores(op: &'static str, shape: &[usize]) -> Result<()> {
    let ok = matches!(shape.len(), 1 | 2) && shape.last().is_some_and(|&n| n > 0);
    if !ok {
        return Err(LayerError::shape(op, "(classes) or (batch, classes)", shape));
    }
    Ok(())
}

/// Softmax along the last axis.
///
/// The row maximum is subtracted before exponentiation so large scores do not
/// overflow. A rank-2 input is normalized row by row.
pub fn softmax(predictions: &ArrayD<f64>) -> Result<ArrayD<f64>> {
    expect_scores("softmax", predictions.shape())?;

    let mut probs = predictions.clone();
    let last = Axis(probs.ndim() - 1);
    for mut row in probs.lanes_mut(last) {
        let max = row.fold(f64::NEG_INFINITY, |acc, &v| acc.max(v));
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        row.mapv_inplace(|v| v / sum);
    }
    Ok(probs)
}

/// Cross-entropy of probabilities against the true classes.
///
/// Returns `-ln p[target]` for a single sample and the sum of that quantity
/// over rows for a batch.
pub fn cross_entropy_loss(probs: &ArrayD<f64>, target: &TargetIndex) -> Result<f64> {
    const OP: &str = "cross_entropy_loss";
    expect_scores(OP, probs.shape())?;
    let cells = target_cells(OP, probs.shape(), target)?;

    let loss: f64 = match target {
        TargetIndex::Scalar(_) => cells.iter().map(|&(_, c)| -probs[[c]].ln()).sum(),
        TargetIndex::Batch(_) => cells.iter().map(|&(r, c)| -probs[[r, c]].ln()).sum(),
    };
    Ok(loss)
}

/// Softmax followed by cross-entropy, with the gradient over predictions.
///
/// The gradient is `softmax(predictions) - one_hot(target)` and has the same
/// shape as `predictions`.
///
/// # Example
///
/// ```
/// use convnet_layers::loss::{softmax_with_cross_entropy, TargetIndex};
/// use ndarray::arr2;
///
/// let preds = arr2(&[[0.0, 0.0], [0.0, 0.0]]).into_dyn();
/// let (loss, grad) = softmax_with_cross_entropy(&preds, &TargetIndex::Batch(vec![0, 1])).unwrap();
/// assert!((loss - 2.0 * 2f64.ln()).abs() < 1e-12);
/// assert_eq!(grad, arr2(&[[-0.5, 0.5], [0.5, -0.5]]).into_dyn());
/// ```
pub fn softmax_with_cross_entropy(
    predictions: &ArrayD<f64>,
    target: &TargetIndex,
) -> Result<(f64, ArrayD<f64>)> {
    const OP: &str = "softmax_with_cross_entropy";
    expect_scores(OP, predictions.shape())?;
    let cells = target_cells(OP, predictions.shape(), target)?;

    let probs = softmax(predictions)?;
    let loss = cross_entropy_loss(&probs, target)?;

    let mut d_predictions = probs;
    match target {
        TargetIndex::Scalar(_) => {
            for &(_, c) in &cells {
                d_predictions[[c]] -= 1.0;
            }
        }
        TargetIndex::Batch(_) => {
            for &(r, c) in &cells {
                d_predictions[[r, c]] -= 1.0;
            }
        }
    }
    Ok((loss, d_predictions))
}

/// L2 penalty `λ·Σ W²` and its gradient `2λ·W`.
pub fn l2_regularization(weights: &ArrayD<f64>, reg_strength: f64) -> (f64, ArrayD<f64>) {
    let loss = reg_strength * weights.iter().map(|w| w * w).sum::<f64>();
    let grad = weights * (2.0 * reg_strength);
    (loss, grad)
}
