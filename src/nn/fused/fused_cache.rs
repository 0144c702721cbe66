use std::fmt;
use ndarray::Ix2;
use crate::nn::errors::{LayerError, LayerResult};
use crate::nn::layers::{AffineCache, BatchNormCache, LayerNormCache, ReluCache};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FusedKind {
    AffineRelu,
    AffineBnRelu,
    AffineLnRelu,
}

impl fmt::Display for FusedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FusedKind::AffineRelu => "affine-relu",
            FusedKind::AffineBnRelu => "affine-bn-relu",
            FusedKind::AffineLnRelu => "affine-ln-relu",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug)]
pub struct AffineReluCache {
    pub(super) fc: AffineCache,
    pub(super) relu: ReluCache<Ix2>,
}

/// Sub-caches of an affine-norm-relu layer, in forward order.
#[derive(Clone, Debug)]
pub struct AffineNormReluCache<C> {
    pub(super) fc: AffineCache,
    pub(super) norm: C,
    pub(super) relu: ReluCache<Ix2>,
}

/// Data kept by a composite forward pass for the matching backward pass. Each composite layer
/// only accepts its own variant; the cache is consumed by the backward pass.
#[derive(Clone, Debug)]
pub enum FusedCache {
    AffineRelu(AffineReluCache),
    AffineBnRelu(AffineNormReluCache<BatchNormCache>),
    AffineLnRelu(AffineNormReluCache<LayerNormCache>),
}

impl FusedCache {
    pub fn kind(&self) -> FusedKind {
        match self {
            FusedCache::AffineRelu(_) => FusedKind::AffineRelu,
            FusedCache::AffineBnRelu(_) => FusedKind::AffineBnRelu,
            FusedCache::AffineLnRelu(_) => FusedKind::AffineLnRelu,
        }
    }

    /// Number of primitive caches bundled, one per primitive layer run in the forward pass
    pub fn sub_cache_count(&self) -> usize {
        match self {
            FusedCache::AffineRelu(_) => 2,
            FusedCache::AffineBnRelu(_) | FusedCache::AffineLnRelu(_) => 3,
        }
    }

    pub(super) fn into_affine_relu(self) -> LayerResult<AffineReluCache> {
        match self {
            FusedCache::AffineRelu(cache) => Ok(cache),
            other => Err(other.wrong_kind(FusedKind::AffineRelu)),
        }
    }

    pub(super) fn wrong_kind(&self, expected: FusedKind) -> LayerError {
        LayerError::InvalidCacheKind { expected, got: self.kind() }
    }
}
