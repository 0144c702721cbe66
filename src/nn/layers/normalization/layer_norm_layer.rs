use ndarray::Axis;
use crate::nn::errors::LayerResult;
use crate::nn::layers::normalization::*;
use crate::nn::norm_config::LayerNormParam;
use crate::utils::{Array1F, Array2F};

const FORWARD: &str = "layernorm_forward";
const BACKWARD: &str = "layernorm_backward";

/// Layer normalization over inputs of shape `(N, D)`. Every sample is normalized with the mean and
/// biased variance of its own `D` features, so samples never influence each other and there is
/// no difference between training and evaluation.
pub struct LayerNormLayer;

#[derive(Clone, Debug)]
pub struct LayerNormCache {
    norm: NormCache,
}

impl LayerNormLayer {
    pub fn forward(
        x: &Array2F,
        gamma: &Array1F,
        beta: &Array1F,
        ln_param: &LayerNormParam,
    ) -> LayerResult<(Array2F, LayerNormCache)> {
        check_scale_shift(FORWARD, x.ncols(), gamma, beta)?;

        let (mean, var) = moments(FORWARD, x, Axis(1))?;
        let (out, norm) = normalize(FORWARD, x, &mean, &var, gamma, beta, ln_param.eps)?;
        Ok((out, LayerNormCache { norm }))
    }

    pub fn backward(dout: &Array2F, cache: LayerNormCache) -> LayerResult<(Array2F, Array1F, Array1F)> {
        let LayerNormCache { norm } = cache;
        norm.check_upstream(BACKWARD, dout)?;

        let (dx_hat, dgamma, dbeta) = norm.scale_shift_backward(dout);
        let dx = norm.batch_stats_backward(dx_hat, Axis(1));
        Ok((dx, dgamma, dbeta))
    }
}

impl NormLayerOps for LayerNormLayer {
    type Param<'a> = &'a LayerNormParam;
    type Cache = LayerNormCache;

    fn forward(
        x: &Array2F,
        gamma: &Array1F,
        beta: &Array1F,
        ln_param: &LayerNormParam,
    ) -> LayerResult<(Array2F, LayerNormCache)> {
        LayerNormLayer::forward(x, gamma, beta, ln_param)
    }

    fn backward(dout: &Array2F, cache: LayerNormCache) -> LayerResult<(Array2F, Array1F, Array1F)> {
        LayerNormLayer::backward(dout, cache)
    }
}
