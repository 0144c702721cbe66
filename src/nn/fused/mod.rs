//! Composite layers: an affine transform, optionally followed by a normalization, followed by a
//! ReLU. Forward passes bundle the caches of the primitives into one [FusedCache]; backward passes
//! consume it and apply the primitives' backward passes in reverse order.

mod fused_cache;
mod affine_relu;
mod affine_norm_relu;
mod fused_layer;

pub use affine_norm_relu::*;
pub use affine_relu::*;
pub use fused_cache::*;
pub use fused_layer::*;
