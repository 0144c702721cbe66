use ndarray_rand::rand_distr::Normal;
use ndarray_rand::RandomExt;
use crate::nn::errors::{fmt_shape, LayerError, LayerResult};
use crate::nn::fused::*;
use crate::nn::norm_config::{BatchNormParam, LayerNormParam, NormMode};
use crate::utils::{Array1F, Array2F, ArrayDynF, Float, GenericResult};

/// One fused layer of a network together with the parameters it owns. Normalized variants also
/// own their normalization state, so running statistics can only be updated through `&mut self`.
#[derive(Clone, Debug)]
pub enum FusedLayer {
    /// Affine transform followed by a ReLU
    /// ### Trainable
    /// * Weights
    /// * Biases
    AffineRelu { weights: Array2F, biases: Array1F },

    /// Affine transform, batch normalization and ReLU
    /// ### Trainable
    /// * Weights
    /// * Biases
    /// * Gamma (scale) and Beta (shift)
    AffineBnRelu {
        weights: Array2F,
        biases: Array1F,
        gamma: Array1F,
        beta: Array1F,
        bn_param: BatchNormParam,
    },

    /// Affine transform, layer normalization and ReLU
    /// ### Trainable
    /// * Weights
    /// * Biases
    /// * Gamma (scale) and Beta (shift)
    AffineLnRelu {
        weights: Array2F,
        biases: Array1F,
        gamma: Array1F,
        beta: Array1F,
        ln_param: LayerNormParam,
    },
}

/// Gradients of a [FusedLayer]. `dgamma` and `dbeta` are only present for normalized layers.
#[derive(Clone, Debug)]
pub struct FusedGrads {
    pub dx: ArrayDynF,
    pub dw: Array2F,
    pub db: Array1F,
    pub dgamma: Option<Array1F>,
    pub dbeta: Option<Array1F>,
}

impl FusedLayer {
    /// Build a layer from existing weights and biases. Normalized layers start with `gamma = 1`,
    /// `beta = 0` and default normalization parameters.
    pub fn new(kind: FusedKind, weights: Array2F, biases: Array1F) -> LayerResult<Self> {
        let out_values = weights.ncols();
        if biases.len() != out_values {
            return Err(LayerError::shape_mismatch("fused_layer_new", fmt_shape(&[out_values]), fmt_shape(biases.shape())));
        }

        let layer = match kind {
            FusedKind::AffineRelu => FusedLayer::AffineRelu { weights, biases },
            FusedKind::AffineBnRelu => FusedLayer::AffineBnRelu {
                weights,
                biases,
                gamma: Array1F::ones(out_values),
                beta: Array1F::zeros(out_values),
                bn_param: BatchNormParam::default(),
            },
            FusedKind::AffineLnRelu => FusedLayer::AffineLnRelu {
                weights,
                biases,
                gamma: Array1F::ones(out_values),
                beta: Array1F::zeros(out_values),
                ln_param: LayerNormParam::default(),
            },
        };
        Ok(layer)
    }

    /// 'He normal' initialization of the weights, zero biases.
    pub fn new_random(kind: FusedKind, in_values: usize, out_values: usize) -> GenericResult<Self> {
        let std_dev = (2.0 / in_values as Float).sqrt();
        let dist = Normal::new(0.0, std_dev)?;
        let weights = Array2F::random((in_values, out_values), dist);
        Ok(Self::new(kind, weights, Array1F::zeros(out_values))?)
    }

    pub fn kind(&self) -> FusedKind {
        match self {
            FusedLayer::AffineRelu { .. } => FusedKind::AffineRelu,
            FusedLayer::AffineBnRelu { .. } => FusedKind::AffineBnRelu,
            FusedLayer::AffineLnRelu { .. } => FusedKind::AffineLnRelu,
        }
    }

    /// Switch batch normalization between training and evaluation. Other layers have no mode.
    pub fn set_mode(&mut self, mode: NormMode) {
        if let FusedLayer::AffineBnRelu { bn_param, .. } = self {
            bn_param.mode = mode;
        }
    }

    pub fn forward(&mut self, x: &ArrayDynF) -> LayerResult<(Array2F, FusedCache)> {
        match self {
            FusedLayer::AffineRelu { weights, biases } => affine_relu_forward(x, weights, biases),
            FusedLayer::AffineBnRelu { weights, biases, gamma, beta, bn_param } => {
                affine_bn_relu_forward(x, weights, biases, gamma, beta, bn_param)
            }
            FusedLayer::AffineLnRelu { weights, biases, gamma, beta, ln_param } => {
                affine_ln_relu_forward(x, weights, biases, gamma, beta, ln_param)
            }
        }
    }

    /// Backward pass for a cache produced by [FusedLayer::forward] on a layer of the same kind.
    pub fn backward(&self, dout: &Array2F, cache: FusedCache) -> LayerResult<FusedGrads> {
        match self.kind() {
            FusedKind::AffineRelu => {
                let (dx, dw, db) = affine_relu_backward(dout, cache)?;
                Ok(FusedGrads { dx, dw, db, dgamma: None, dbeta: None })
            }
            FusedKind::AffineBnRelu => {
                let (dx, dw, db, dgamma, dbeta) = affine_bn_relu_backward(dout, cache)?;
                Ok(FusedGrads { dx, dw, db, dgamma: Some(dgamma), dbeta: Some(dbeta) })
            }
            FusedKind::AffineLnRelu => {
                let (dx, dw, db, dgamma, dbeta) = affine_ln_relu_backward(dout, cache)?;
                Ok(FusedGrads { dx, dw, db, dgamma: Some(dgamma), dbeta: Some(dbeta) })
            }
        }
    }
}
