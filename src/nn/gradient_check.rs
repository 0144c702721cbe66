//! Finite difference helpers used to validate backward passes against their forward passes.

use anyhow::bail;
use ndarray::{Dimension, IntoDimension};
use crate::utils::{ArrayF, Float, GenericResult};

/// Numerical gradient of `f` with respect to `x`, contracted with the upstream gradient `df`,
/// using centred differences: `(f(x + h) - f(x - h)) / 2h` for every element of `x`.
///
/// `x` is perturbed in place and restored after every evaluation, so `f` must read its input
/// only through the argument it receives.
pub fn eval_numerical_gradient<D, E, Func>(
    mut f: Func,
    x: &mut ArrayF<D>,
    df: &ArrayF<E>,
    h: Float,
) -> GenericResult<ArrayF<D>>
where
    D: Dimension,
    E: Dimension,
    Func: FnMut(&ArrayF<D>) -> GenericResult<ArrayF<E>>,
{
    let mut grad = ArrayF::<D>::zeros(x.raw_dim());
    let indices: Vec<D> = x.indexed_iter().map(|(i, _)| i.into_dimension()).collect();

    for index in indices {
        let old_value = x[index.clone()];

        x[index.clone()] = old_value + h;
        let pos = f(&*x)?;
        x[index.clone()] = old_value - h;
        let neg = f(&*x)?;
        x[index.clone()] = old_value;

        if pos.shape() != df.shape() || neg.shape() != df.shape() {
            bail!("Output shape {:?} differs from the upstream gradient shape {:?}", pos.shape(), df.shape());
        }

        let contracted: Float = pos.iter()
            .zip(neg.iter())
            .zip(df.iter())
            .map(|((p, n), d)| (p - n) * d)
            .sum();
        grad[index] = contracted / (2.0 * h);
    }

    Ok(grad)
}

/// Largest elementwise relative error `|x - y| / max(1e-8, |x| + |y|)`.
pub fn rel_error<D: Dimension>(x: &ArrayF<D>, y: &ArrayF<D>) -> Float {
    x.iter()
        .zip(y.iter())
        .map(|(a, b)| (a - b).abs() / (a.abs() + b.abs()).max(1e-8))
        .fold(0.0, Float::max)
}
