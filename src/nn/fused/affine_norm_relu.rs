use tracing::trace;
use crate::nn::errors::LayerResult;
use crate::nn::fused::{AffineNormReluCache, FusedCache, FusedKind};
use crate::nn::layers::{AffineLayer, BatchNormLayer, LayerNormLayer, NormLayerOps, ReluLayer};
use crate::nn::norm_config::{BatchNormParam, LayerNormParam};
use crate::utils::{Array1F, Array2F, ArrayDynF};

/// `(dx, dw, db, dgamma, dbeta)`
pub type AffineNormGrads = (ArrayDynF, Array2F, Array1F, Array1F, Array1F);

/// A normalization layer that can sit inside an affine-norm-relu composite, together with the
/// [FusedCache] variant that carries its cache.
pub trait FusedNorm: NormLayerOps {
    const KIND: FusedKind;

    fn wrap_cache(cache: AffineNormReluCache<Self::Cache>) -> FusedCache;

    fn unwrap_cache(cache: FusedCache) -> LayerResult<AffineNormReluCache<Self::Cache>>;
}

impl FusedNorm for BatchNormLayer {
    const KIND: FusedKind = FusedKind::AffineBnRelu;

    fn wrap_cache(cache: AffineNormReluCache<Self::Cache>) -> FusedCache {
        FusedCache::AffineBnRelu(cache)
    }

    fn unwrap_cache(cache: FusedCache) -> LayerResult<AffineNormReluCache<Self::Cache>> {
        match cache {
            FusedCache::AffineBnRelu(cache) => Ok(cache),
            other => Err(other.wrong_kind(Self::KIND)),
        }
    }
}

impl FusedNorm for LayerNormLayer {
    const KIND: FusedKind = FusedKind::AffineLnRelu;

    fn wrap_cache(cache: AffineNormReluCache<Self::Cache>) -> FusedCache {
        FusedCache::AffineLnRelu(cache)
    }

    fn unwrap_cache(cache: FusedCache) -> LayerResult<AffineNormReluCache<Self::Cache>> {
        match cache {
            FusedCache::AffineLnRelu(cache) => Ok(cache),
            other => Err(other.wrong_kind(Self::KIND)),
        }
    }
}

/// Affine transform, then the normalization `N`, then a ReLU.
pub fn affine_norm_relu_forward<N: FusedNorm>(
    x: &ArrayDynF,
    w: &Array2F,
    b: &Array1F,
    gamma: &Array1F,
    beta: &Array1F,
    norm_param: N::Param<'_>,
) -> LayerResult<(Array2F, FusedCache)> {
    let (a, fc) = AffineLayer::forward(x, w, b)?;
    let (norm_out, norm) = N::forward(&a, gamma, beta, norm_param)?;
    let (out, relu) = ReluLayer::forward(norm_out);

    trace!(kind = %N::KIND, shape = ?out.shape(), "fused forward");
    Ok((out, N::wrap_cache(AffineNormReluCache { fc, norm, relu })))
}

pub fn affine_norm_relu_backward<N: FusedNorm>(dout: &Array2F, cache: FusedCache) -> LayerResult<AffineNormGrads> {
    let AffineNormReluCache { fc, norm, relu } = N::unwrap_cache(cache)?;

    let dnorm_out = ReluLayer::backward(dout, relu)?;
    let (da, dgamma, dbeta) = N::backward(&dnorm_out, norm)?;
    let (dx, dw, db) = AffineLayer::backward(&da, fc)?;

    trace!(kind = %N::KIND, "fused backward");
    Ok((dx, dw, db, dgamma, dbeta))
}

/// Affine transform, batch normalization and ReLU. In train mode the running statistics in
/// `bn_param` are updated.
pub fn affine_bn_relu_forward(
    x: &ArrayDynF,
    w: &Array2F,
    b: &Array1F,
    gamma: &Array1F,
    beta: &Array1F,
    bn_param: &mut BatchNormParam,
) -> LayerResult<(Array2F, FusedCache)> {
    affine_norm_relu_forward::<BatchNormLayer>(x, w, b, gamma, beta, bn_param)
}

pub fn affine_bn_relu_backward(dout: &Array2F, cache: FusedCache) -> LayerResult<AffineNormGrads> {
    affine_norm_relu_backward::<BatchNormLayer>(dout, cache)
}

/// Affine transform, layer normalization and ReLU.
pub fn affine_ln_relu_forward(
    x: &ArrayDynF,
    w: &Array2F,
    b: &Array1F,
    gamma: &Array1F,
    beta: &Array1F,
    ln_param: &LayerNormParam,
) -> LayerResult<(Array2F, FusedCache)> {
    affine_norm_relu_forward::<LayerNormLayer>(x, w, b, gamma, beta, ln_param)
}

pub fn affine_ln_relu_backward(dout: &Array2F, cache: FusedCache) -> LayerResult<AffineNormGrads> {
    affine_norm_relu_backward::<LayerNormLayer>(dout, cache)
}

#[cfg(test)]
mod tests {
    use ndarray::{array, s, Axis};
    use crate::nn::errors::LayerError;
    use crate::nn::fused::affine_relu_forward;
    use crate::nn::gradient_check::{eval_numerical_gradient, rel_error};
    use crate::nn::norm_config::NormMode;
    use crate::nn::test_utils::random_array;
    use crate::utils::{arrays_almost_equal, GenericResult};
    use super::*;

    struct Setup {
        x: ArrayDynF,
        w: Array2F,
        b: Array1F,
        gamma: Array1F,
        beta: Array1F,
        dout: Array2F,
    }

    fn setup(seed: u64) -> Setup {
        Setup {
            x: random_array((4, 2, 3), seed).into_dyn(),
            w: random_array((6, 5), seed + 1),
            b: random_array(5, seed + 2),
            gamma: random_array::<_, ndarray::Ix1>(5, seed + 3).mapv(|o| o.abs() + 0.5),
            beta: random_array(5, seed + 4),
            dout: random_array((4, 5), seed + 5),
        }
    }

    #[test]
    fn test_bn_backward_matches_numerical() {
        let Setup { x, w, b, gamma, beta, dout } = setup(100);
        let mut bn_param = BatchNormParam::new_train();

        let (_, cache) = affine_bn_relu_forward(&x, &w, &b, &gamma, &beta, &mut bn_param).unwrap();
        assert_eq!(cache.kind(), FusedKind::AffineBnRelu);
        assert_eq!(cache.sub_cache_count(), 3);
        let (dx, dw, db, dgamma, dbeta) = affine_bn_relu_backward(&dout, cache).unwrap();

        let mut forward = |x: &ArrayDynF, w: &Array2F, b: &Array1F, gamma: &Array1F, beta: &Array1F| -> GenericResult<Array2F> {
            Ok(affine_bn_relu_forward(x, w, b, gamma, beta, &mut bn_param)?.0)
        };
        let dx_num = eval_numerical_gradient(|x| forward(x, &w, &b, &gamma, &beta), &mut x.clone(), &dout, 1e-5).unwrap();
        let dw_num = eval_numerical_gradient(|w| forward(&x, w, &b, &gamma, &beta), &mut w.clone(), &dout, 1e-5).unwrap();
        let db_num = eval_numerical_gradient(|b| forward(&x, &w, b, &gamma, &beta), &mut b.clone(), &dout, 1e-5).unwrap();
        let dgamma_num = eval_numerical_gradient(|gamma| forward(&x, &w, &b, gamma, &beta), &mut gamma.clone(), &dout, 1e-5).unwrap();
        let dbeta_num = eval_numerical_gradient(|beta| forward(&x, &w, &b, &gamma, beta), &mut beta.clone(), &dout, 1e-5).unwrap();

        assert!(rel_error(&dx, &dx_num) < 1e-5);
        assert!(rel_error(&dw, &dw_num) < 1e-5);
        // The batch mean cancels any shift of the affine output, so db is zero up to rounding
        assert!(db.iter().zip(db_num.iter()).all(|(a, n)| (a - n).abs() < 1e-8));
        assert!(rel_error(&dgamma, &dgamma_num) < 1e-5);
        assert!(rel_error(&dbeta, &dbeta_num) < 1e-5);
    }

    #[test]
    fn test_ln_backward_matches_numerical() {
        let Setup { x, w, b, gamma, beta, dout } = setup(200);
        let ln_param = LayerNormParam::default();

        let (_, cache) = affine_ln_relu_forward(&x, &w, &b, &gamma, &beta, &ln_param).unwrap();
        assert_eq!(cache.kind(), FusedKind::AffineLnRelu);
        assert_eq!(cache.sub_cache_count(), 3);
        let (dx, dw, db, dgamma, dbeta) = affine_ln_relu_backward(&dout, cache).unwrap();

        let forward = |x: &ArrayDynF, w: &Array2F, b: &Array1F, gamma: &Array1F, beta: &Array1F| -> GenericResult<Array2F> {
            Ok(affine_ln_relu_forward(x, w, b, gamma, beta, &ln_param)?.0)
        };
        let dx_num = eval_numerical_gradient(|x| forward(x, &w, &b, &gamma, &beta), &mut x.clone(), &dout, 1e-5).unwrap();
        let dw_num = eval_numerical_gradient(|w| forward(&x, w, &b, &gamma, &beta), &mut w.clone(), &dout, 1e-5).unwrap();
        let db_num = eval_numerical_gradient(|b| forward(&x, &w, b, &gamma, &beta), &mut b.clone(), &dout, 1e-5).unwrap();
        let dgamma_num = eval_numerical_gradient(|gamma| forward(&x, &w, &b, gamma, &beta), &mut gamma.clone(), &dout, 1e-5).unwrap();
        let dbeta_num = eval_numerical_gradient(|beta| forward(&x, &w, &b, &gamma, beta), &mut beta.clone(), &dout, 1e-5).unwrap();

        assert!(rel_error(&dx, &dx_num) < 1e-5);
        assert!(rel_error(&dw, &dw_num) < 1e-5);
        assert!(rel_error(&db, &db_num) < 1e-5);
        assert!(rel_error(&dgamma, &dgamma_num) < 1e-5);
        assert!(rel_error(&dbeta, &dbeta_num) < 1e-5);
    }

    #[test]
    fn test_generic_ln_path_borrows_param() {
        let Setup { x, w, b, gamma, beta, .. } = setup(250);
        let ln_param = LayerNormParam::default();

        let (generic, _) = affine_norm_relu_forward::<LayerNormLayer>(&x, &w, &b, &gamma, &beta, &ln_param).unwrap();
        let (wrapped, _) = affine_ln_relu_forward(&x, &w, &b, &gamma, &beta, &ln_param).unwrap();

        assert_eq!(generic, wrapped);
    }

    #[test]
    fn test_param_grads_match_shapes_for_any_batch_size() {
        for batch_size in [1, 2, 7] {
            let x = random_array((batch_size, 3), batch_size as u64).into_dyn();
            let w: Array2F = random_array((3, 4), 50);
            let b = Array1F::zeros(4);
            let gamma = Array1F::ones(4);
            let beta = Array1F::zeros(4);
            let dout = Array2F::ones((batch_size, 4));
            let mut bn_param = BatchNormParam::new_train();

            let (_, cache) = affine_bn_relu_forward(&x, &w, &b, &gamma, &beta, &mut bn_param).unwrap();
            let (dx, dw, db, dgamma, dbeta) = affine_bn_relu_backward(&dout, cache).unwrap();

            assert_eq!(dx.shape(), x.shape());
            assert_eq!(dw.shape(), w.shape());
            assert_eq!(db.shape(), b.shape());
            assert_eq!(dgamma.shape(), gamma.shape());
            assert_eq!(dbeta.shape(), beta.shape());
        }
    }

    #[test]
    fn test_eval_mode_is_deterministic() {
        let Setup { x, w, b, gamma, beta, dout } = setup(300);
        let mut bn_param = BatchNormParam::new_train();
        affine_bn_relu_forward(&x, &w, &b, &gamma, &beta, &mut bn_param).unwrap();

        bn_param.mode = NormMode::Eval;
        let stats = (bn_param.running_mean.clone(), bn_param.running_var.clone());

        let (first, cache) = affine_bn_relu_forward(&x, &w, &b, &gamma, &beta, &mut bn_param).unwrap();
        affine_bn_relu_backward(&dout, cache).unwrap();
        let (second, _) = affine_bn_relu_forward(&x, &w, &b, &gamma, &beta, &mut bn_param).unwrap();

        assert_eq!(first, second);
        assert_eq!((bn_param.running_mean.clone(), bn_param.running_var.clone()), stats);
    }

    #[test]
    fn test_train_mode_running_stats_are_deterministic() {
        let batches: Vec<ArrayDynF> = (0..3).map(|i| random_array((5, 6), 400 + i).into_dyn()).collect();
        let Setup { w, b, gamma, beta, .. } = setup(410);

        let run = || {
            let mut bn_param = BatchNormParam::new_train().with_momentum(0.8);
            let mut history = Vec::new();
            for x in batches.iter() {
                affine_bn_relu_forward(x, &w, &b, &gamma, &beta, &mut bn_param).unwrap();
                history.push(bn_param.running_mean.clone().unwrap());
            }
            (history, bn_param)
        };

        let (history, bn_param) = run();
        let (history_again, _) = run();
        assert_eq!(history, history_again);
        assert_ne!(history[0], history[1]);

        // Replay the moving average from the affine outputs
        let mut expected_mean = Array1F::zeros(5);
        for x in batches.iter() {
            let x2: Array2F = x.clone().into_dimensionality().unwrap();
            let a = x2.dot(&w) + &b;
            expected_mean = expected_mean * 0.8 + a.mean_axis(Axis(0)).unwrap() * 0.2;
        }
        assert!(arrays_almost_equal(bn_param.running_mean.as_ref().unwrap(), &expected_mean));
    }

    #[test]
    fn test_ln_is_invariant_to_batch_order() {
        let Setup { x, w, b, gamma, beta, .. } = setup(500);
        let ln_param = LayerNormParam::default();
        let permutation = [2, 0, 3, 1];
        let permuted = x.select(Axis(0), &permutation);

        let (out, _) = affine_ln_relu_forward(&x, &w, &b, &gamma, &beta, &ln_param).unwrap();
        let (permuted_out, _) = affine_ln_relu_forward(&permuted, &w, &b, &gamma, &beta, &ln_param).unwrap();

        for (position, &sample) in permutation.iter().enumerate() {
            assert!(arrays_almost_equal(&permuted_out.row(position).to_owned(), &out.row(sample).to_owned()));
        }

        // Changing the other samples leaves the first one untouched
        let mut changed = x.clone();
        changed.slice_mut(s![1.., .., ..]).mapv_inplace(|o| o * 3.0 - 1.0);
        let (changed_out, _) = affine_ln_relu_forward(&changed, &w, &b, &gamma, &beta, &ln_param).unwrap();
        assert!(arrays_almost_equal(&changed_out.row(0).to_owned(), &out.row(0).to_owned()));
    }

    #[test]
    fn test_bn_depends_on_other_samples() {
        let Setup { x, w, b, gamma, .. } = setup(600);
        // Keeps every unit active so the ReLU can't hide the change
        let beta = Array1F::from_elem(5, 10.0);

        let (out, _) = affine_bn_relu_forward(&x, &w, &b, &gamma, &beta, &mut BatchNormParam::new_train()).unwrap();

        let mut changed = x.clone();
        changed.slice_mut(s![1.., .., ..]).mapv_inplace(|o| o * 3.0 - 1.0);
        let (changed_out, _) = affine_bn_relu_forward(&changed, &w, &b, &gamma, &beta, &mut BatchNormParam::new_train()).unwrap();

        assert!(!arrays_almost_equal(&changed_out.row(0).to_owned(), &out.row(0).to_owned()));
    }

    #[test]
    fn test_cache_kind_is_checked() {
        let Setup { x, w, b, gamma, beta, dout } = setup(700);

        let (_, cache) = affine_ln_relu_forward(&x, &w, &b, &gamma, &beta, &LayerNormParam::default()).unwrap();
        assert_eq!(
            affine_bn_relu_backward(&dout, cache).unwrap_err(),
            LayerError::InvalidCacheKind { expected: FusedKind::AffineBnRelu, got: FusedKind::AffineLnRelu }
        );

        let (_, cache) = affine_relu_forward(&x, &w, &b).unwrap();
        assert_eq!(
            affine_ln_relu_backward(&dout, cache).unwrap_err(),
            LayerError::InvalidCacheKind { expected: FusedKind::AffineLnRelu, got: FusedKind::AffineRelu }
        );
    }

    #[test]
    fn test_errors_propagate_unchanged() {
        let Setup { x, w, b, beta, .. } = setup(800);

        let result = affine_ln_relu_forward(&x, &w, &b, &Array1F::ones(3), &beta, &LayerNormParam::default());
        assert!(matches!(result, Err(LayerError::ShapeMismatch { operation: "layernorm_forward", .. })));

        // Identical samples give a zero batch variance, so a zero epsilon divides by zero
        let same = Array2F::ones((3, 6)).into_dyn();
        let mut bn_param = BatchNormParam::new_train().with_eps(0.0);
        let result = affine_bn_relu_forward(&same, &w, &b, &Array1F::ones(5), &beta, &mut bn_param);
        assert!(matches!(result, Err(LayerError::NumericalInstability { operation: "batchnorm_forward", .. })));
    }
}
