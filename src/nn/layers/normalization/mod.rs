//! Normalization primitives. Batch and layer normalization share the same arithmetic and only
//! differ in the axis the statistics are computed along:
//! * batch normalization: `Axis(0)`, one mean/variance per feature, taken across the batch
//! * layer normalization: `Axis(1)`, one mean/variance per sample, taken across its features
//!
//! Both then scale and shift every feature with the learned `gamma` and `beta`.

pub mod batch_norm_layer;
pub mod layer_norm_layer;

use ndarray::Axis;
use tracing::warn;
use crate::nn::errors::{fmt_shape, LayerError, LayerResult};
use crate::utils::{Array1F, Array2F, Float};

/// Common interface of the normalization layers, used by the composite layers to stay generic
/// over which normalization sits between the affine transform and the activation.
pub trait NormLayerOps {
    /// How forward borrows the normalization parameters: mutably when it keeps running state.
    type Param<'a>;
    type Cache;

    fn forward(
        x: &Array2F,
        gamma: &Array1F,
        beta: &Array1F,
        param: Self::Param<'_>,
    ) -> LayerResult<(Array2F, Self::Cache)>;

    /// Returns `(dx, dgamma, dbeta)`
    fn backward(dout: &Array2F, cache: Self::Cache) -> LayerResult<(Array2F, Array1F, Array1F)>;
}

#[derive(Clone, Debug)]
pub struct NormCache {
    x_hat: Array2F,
    gamma: Array1F,
    /// Keeps the reduced axis with length 1 so it broadcasts against `x_hat`
    inv_std: Array2F,
}

fn check_scale_shift(operation: &'static str, features: usize, gamma: &Array1F, beta: &Array1F) -> LayerResult<()> {
    for param in [gamma, beta] {
        if param.len() != features {
            return Err(LayerError::shape_mismatch(operation, fmt_shape(&[features]), fmt_shape(param.shape())));
        }
    }
    Ok(())
}

/// Biased mean and variance along `axis`, with that axis kept.
fn moments(operation: &'static str, x: &Array2F, axis: Axis) -> LayerResult<(Array2F, Array2F)> {
    let mean = x.mean_axis(axis).ok_or_else(|| {
        LayerError::shape_mismatch(operation, format!("a non-empty axis {}", axis.index()), fmt_shape(x.shape()))
    })?;
    let var = x.var_axis(axis, 0.0);
    Ok((mean.insert_axis(axis), var.insert_axis(axis)))
}

fn ensure_finite(operation: &'static str, what: &str, array: &Array2F) -> LayerResult<()> {
    if array.iter().all(|o| o.is_finite()) {
        return Ok(());
    }

    let reason = format!("{} contains NaN or infinite values", what);
    warn!(operation, %reason, "rejecting normalization output");
    Err(LayerError::NumericalInstability { operation, reason })
}

/// Normalizes `x` with the given statistics, then applies `gamma` and `beta`.
fn normalize(
    operation: &'static str,
    x: &Array2F,
    mean: &Array2F,
    var: &Array2F,
    gamma: &Array1F,
    beta: &Array1F,
    eps: Float,
) -> LayerResult<(Array2F, NormCache)> {
    let inv_std = var.mapv(|v| 1.0 / (v + eps).sqrt());
    ensure_finite(operation, "inverse standard deviation", &inv_std)?;

    let mut x_hat = x - mean;
    x_hat *= &inv_std;
    ensure_finite(operation, "normalized input", &x_hat)?;

    let mut out = &x_hat * gamma;
    out += beta;

    Ok((out, NormCache { x_hat, gamma: gamma.clone(), inv_std }))
}

impl NormCache {
    fn check_upstream(&self, operation: &'static str, dout: &Array2F) -> LayerResult<()> {
        if dout.shape() != self.x_hat.shape() {
            return Err(LayerError::shape_mismatch(operation, fmt_shape(self.x_hat.shape()), fmt_shape(dout.shape())));
        }
        Ok(())
    }

    /// Backward through `gamma * x_hat + beta`. Returns `(dx_hat, dgamma, dbeta)`; the parameter
    /// gradients are always summed over the batch.
    fn scale_shift_backward(&self, dout: &Array2F) -> (Array2F, Array1F, Array1F) {
        let dgamma = (dout * &self.x_hat).sum_axis(Axis(0));
        let dbeta = dout.sum_axis(Axis(0));
        let dx_hat = dout * &self.gamma;
        (dx_hat, dgamma, dbeta)
    }

    /// Backward through the normalization when the statistics were computed from `x` along `axis`:
    /// `dx = inv_std / n * (n * dx_hat - sum(dx_hat) - x_hat * sum(dx_hat * x_hat))`
    fn batch_stats_backward(&self, dx_hat: Array2F, axis: Axis) -> Array2F {
        let n = self.x_hat.len_of(axis) as Float;
        let sum_dx_hat = dx_hat.sum_axis(axis).insert_axis(axis);
        let sum_dx_hat_x_hat = (&dx_hat * &self.x_hat).sum_axis(axis).insert_axis(axis);

        let mut dx = dx_hat * n;
        dx -= &sum_dx_hat;
        dx -= &(&self.x_hat * &sum_dx_hat_x_hat);
        dx *= &self.inv_std;
        dx / n
    }

    /// Backward through the normalization when the statistics are constants (running statistics).
    fn fixed_stats_backward(&self, dx_hat: Array2F) -> Array2F {
        dx_hat * &self.inv_std
    }
}
