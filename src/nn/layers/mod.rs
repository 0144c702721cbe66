pub mod affine_layer;
pub mod activation;
pub mod normalization;

pub use activation::relu_layer::{ReluCache, ReluLayer};
pub use affine_layer::{AffineCache, AffineLayer};
pub use normalization::batch_norm_layer::{BatchNormCache, BatchNormLayer};
pub use normalization::layer_norm_layer::{LayerNormCache, LayerNormLayer};
pub use normalization::NormLayerOps;
