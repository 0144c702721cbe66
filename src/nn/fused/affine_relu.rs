use tracing::trace;
use crate::nn::errors::LayerResult;
use crate::nn::fused::{AffineReluCache, FusedCache, FusedKind};
use crate::nn::layers::{AffineLayer, ReluLayer};
use crate::utils::{Array1F, Array2F, ArrayDynF};

/// `(dx, dw, db)`
pub type AffineGrads = (ArrayDynF, Array2F, Array1F);

/// Affine transform followed by a ReLU.
pub fn affine_relu_forward(x: &ArrayDynF, w: &Array2F, b: &Array1F) -> LayerResult<(Array2F, FusedCache)> {
    let (a, fc) = AffineLayer::forward(x, w, b)?;
    let (out, relu) = ReluLayer::forward(a);

    trace!(kind = %FusedKind::AffineRelu, shape = ?out.shape(), "fused forward");
    Ok((out, FusedCache::AffineRelu(AffineReluCache { fc, relu })))
}

/// Backward pass for [affine_relu_forward]. Fails with `InvalidCacheKind` for any other cache.
pub fn affine_relu_backward(dout: &Array2F, cache: FusedCache) -> LayerResult<AffineGrads> {
    let AffineReluCache { fc, relu } = cache.into_affine_relu()?;

    let da = ReluLayer::backward(dout, relu)?;
    let grads = AffineLayer::backward(&da, fc)?;

    trace!(kind = %FusedKind::AffineRelu, "fused backward");
    Ok(grads)
}
