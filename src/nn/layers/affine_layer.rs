use ndarray::Axis;
use crate::nn::errors::{fmt_shape, LayerError, LayerResult};
use crate::utils::{shape_length, Array1F, Array2F, ArrayDynF};

const FORWARD: &str = "affine_forward";
const BACKWARD: &str = "affine_backward";

/// Affine (fully connected) layer: `out = x · w + b`.
///
/// The first axis of `x` is the batch, every other axis is flattened into the input features,
/// so a `(N, d_1, ..., d_k)` input needs `w` of shape `(d_1 * ... * d_k, M)` and `b` of length `M`.
pub struct AffineLayer;

/// Everything the backward pass needs: the flattened input, its original shape and the weights.
#[derive(Clone, Debug)]
pub struct AffineCache {
    x_shape: Vec<usize>,
    x_flat: Array2F,
    weights: Array2F,
}

impl AffineLayer {
    pub fn forward(x: &ArrayDynF, w: &Array2F, b: &Array1F) -> LayerResult<(Array2F, AffineCache)> {
        let x_shape = x.shape().to_vec();
        let batch_size = *x_shape
            .first()
            .ok_or_else(|| LayerError::shape_mismatch(FORWARD, "an input with a batch axis", fmt_shape(&x_shape)))?;
        let in_values = shape_length(&x_shape[1..]);

        if in_values != w.nrows() {
            return Err(LayerError::shape_mismatch(
                FORWARD,
                format!("{} input values per sample", w.nrows()),
                fmt_shape(&x_shape),
            ));
        }
        if b.len() != w.ncols() {
            return Err(LayerError::shape_mismatch(
                FORWARD,
                format!("{} biases", w.ncols()),
                fmt_shape(b.shape()),
            ));
        }

        let x_flat = x
            .as_standard_layout()
            .into_owned()
            .into_shape((batch_size, in_values))
            .map_err(|e| LayerError::shape_mismatch(FORWARD, format!("[{}, {}]", batch_size, in_values), e))?;

        let mut out = x_flat.dot(w);
        out += b;

        Ok((out, AffineCache { x_shape, x_flat, weights: w.clone() }))
    }

    /// Returns `(dx, dw, db)`. `dx` has the shape of the original (unflattened) input.
    pub fn backward(dout: &Array2F, cache: AffineCache) -> LayerResult<(ArrayDynF, Array2F, Array1F)> {
        let AffineCache { x_shape, x_flat, weights } = cache;

        let expected = [x_flat.nrows(), weights.ncols()];
        if dout.shape() != expected {
            return Err(LayerError::shape_mismatch(BACKWARD, fmt_shape(&expected), fmt_shape(dout.shape())));
        }

        let dx = dout
            .dot(&weights.t())
            .into_shape(x_shape.clone())
            .map_err(|e| LayerError::shape_mismatch(BACKWARD, fmt_shape(&x_shape), e))?;
        let dw = x_flat.t().dot(dout);
        let db = dout.sum_axis(Axis(0));

        Ok((dx, dw, db))
    }
}
