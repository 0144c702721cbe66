use ndarray::Dimension;
use crate::nn::errors::{fmt_shape, LayerError, LayerResult};
use crate::utils::ArrayF;

const BACKWARD: &str = "relu_backward";

/// Apply the Rectified Linear Unit (ReLu) activation function. That means:
/// * For x > 0: x
/// * For x <= 0: 0
pub struct ReluLayer;

#[derive(Clone, Debug)]
pub struct ReluCache<D: Dimension> {
    inputs: ArrayF<D>,
}

impl ReluLayer {
    /// Takes the inputs by value because they are kept as the cache.
    pub fn forward<D: Dimension>(inputs: ArrayF<D>) -> (ArrayF<D>, ReluCache<D>) {
        let out = inputs.mapv(|o| if o > 0.0 { o } else { 0.0 });
        (out, ReluCache { inputs })
    }

    pub fn backward<D: Dimension>(dout: &ArrayF<D>, cache: ReluCache<D>) -> LayerResult<ArrayF<D>> {
        let ReluCache { inputs } = cache;
        if dout.shape() != inputs.shape() {
            return Err(LayerError::shape_mismatch(BACKWARD, fmt_shape(inputs.shape()), fmt_shape(dout.shape())));
        }

        // The cached inputs are consumed and reused as the gradient buffer
        let mut dx = inputs;
        dx.zip_mut_with(dout, |o, &g| *o = if *o > 0.0 { g } else { 0.0 });
        Ok(dx)
    }
}
