pub mod errors;
pub mod norm_config;
pub mod layers;
pub mod fused;
pub mod gradient_check;

#[cfg(test)]
pub(crate) mod test_utils;
