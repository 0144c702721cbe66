use ndarray::{Dimension, ShapeBuilder};
use ndarray_rand::rand::rngs::SmallRng;
use ndarray_rand::rand::SeedableRng;
use ndarray_rand::rand_distr::StandardNormal;
use ndarray_rand::RandomExt;
use crate::utils::ArrayF;

/// Standard normal array, reproducible through `seed`.
pub fn random_array<Sh, D>(shape: Sh, seed: u64) -> ArrayF<D>
where
    Sh: ShapeBuilder<Dim = D>,
    D: Dimension,
{
    let mut rng = SmallRng::seed_from_u64(seed);
    ArrayF::random_using(shape, StandardNormal, &mut rng)
}
