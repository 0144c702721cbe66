use ndarray::Axis;
use tracing::debug;
use crate::nn::errors::{fmt_shape, LayerError, LayerResult};
use crate::nn::layers::normalization::*;
use crate::nn::norm_config::{BatchNormParam, NormMode};
use crate::utils::{Array1F, Array2F, Float};

const FORWARD: &str = "batchnorm_forward";
const BACKWARD: &str = "batchnorm_backward";

/// Batch normalization over inputs of shape `(N, D)`.
///
/// In train mode every feature is normalized with the mean and biased variance of the current
/// batch, and the running statistics in [BatchNormParam] are updated:
/// `running = momentum * running + (1 - momentum) * batch_statistic`.
/// In eval mode the running statistics are used and left untouched.
pub struct BatchNormLayer;

#[derive(Clone, Debug)]
pub struct BatchNormCache {
    mode: NormMode,
    norm: NormCache,
}

fn check_running_stat<'a>(stat: &'a Option<Array1F>, name: &str, features: usize) -> LayerResult<Option<&'a Array1F>> {
    match stat {
        Some(stat) if stat.len() != features => Err(LayerError::shape_mismatch(
            FORWARD,
            format!("{} of shape {}", name, fmt_shape(&[features])),
            fmt_shape(stat.shape()),
        )),
        stat => Ok(stat.as_ref()),
    }
}

/// Running statistics are stored as zeros on the first successful train-mode batch.
fn update_running_stat(stat: &mut Option<Array1F>, name: &str, batch_stat: &Array2F, momentum: Float) {
    let stat = stat.get_or_insert_with(|| {
        debug!(name, features = batch_stat.ncols(), "allocating batch norm running statistic");
        Array1F::zeros(batch_stat.ncols())
    });
    stat.mapv_inplace(|o| o * momentum);
    stat.scaled_add(1.0 - momentum, &batch_stat.index_axis(Axis(0), 0));
}

/// A missing running statistic reads as zeros.
fn running_stat_row(stat: Option<&Array1F>, features: usize) -> Array2F {
    match stat {
        Some(stat) => stat.view().insert_axis(Axis(0)).to_owned(),
        None => Array2F::zeros((1, features)),
    }
}

impl NormLayerOps for BatchNormLayer {
    type Param<'a> = &'a mut BatchNormParam;
    type Cache = BatchNormCache;

    fn forward(
        x: &Array2F,
        gamma: &Array1F,
        beta: &Array1F,
        bn_param: &mut BatchNormParam,
    ) -> LayerResult<(Array2F, BatchNormCache)> {
        let features = x.ncols();
        check_scale_shift(FORWARD, features, gamma, beta)?;

        let BatchNormParam { mode, eps, momentum, running_mean, running_var } = bn_param;
        let current_mean = check_running_stat(running_mean, "running_mean", features)?;
        let current_var = check_running_stat(running_var, "running_var", features)?;

        match mode {
            NormMode::Train => {
                let (mean, var) = moments(FORWARD, x, Axis(0))?;
                let (out, norm) = normalize(FORWARD, x, &mean, &var, gamma, beta, *eps)?;

                // Only touch the running statistics once the batch went through
                update_running_stat(running_mean, "running_mean", &mean, *momentum);
                update_running_stat(running_var, "running_var", &var, *momentum);

                Ok((out, BatchNormCache { mode: NormMode::Train, norm }))
            }
            NormMode::Eval => {
                let mean = running_stat_row(current_mean, features);
                let var = running_stat_row(current_var, features);
                let (out, norm) = normalize(FORWARD, x, &mean, &var, gamma, beta, *eps)?;

                Ok((out, BatchNormCache { mode: NormMode::Eval, norm }))
            }
        }
    }

    fn backward(dout: &Array2F, cache: BatchNormCache) -> LayerResult<(Array2F, Array1F, Array1F)> {
        let BatchNormCache { mode, norm } = cache;
        norm.check_upstream(BACKWARD, dout)?;

        let (dx_hat, dgamma, dbeta) = norm.scale_shift_backward(dout);
        let dx = match mode {
            NormMode::Train => norm.batch_stats_backward(dx_hat, Axis(0)),
            NormMode::Eval => norm.fixed_stats_backward(dx_hat),
        };

        Ok((dx, dgamma, dbeta))
    }
}
