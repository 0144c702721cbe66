use crate::utils::{Array1F, Float};

pub const DEFAULT_EPS: Float = 1e-5;
pub const DEFAULT_MOMENTUM: Float = 0.9;

/// Whether batch normalization uses the statistics of the current batch (and updates the running
/// ones) or the running statistics collected during training.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NormMode {
    Train,
    Eval,
}

/// Configuration and running statistics of a batch normalization layer. Owned by the layer; the
/// forward pass updates `running_mean` and `running_var` in train mode.
#[derive(Clone, Debug, PartialEq)]
pub struct BatchNormParam {
    pub mode: NormMode,
    pub eps: Float,
    /// Weight of the previous running value in the exponential moving average
    pub momentum: Float,
    /// Allocated as zeros on the first forward pass
    pub running_mean: Option<Array1F>,
    pub running_var: Option<Array1F>,
}

impl BatchNormParam {
    pub fn new_train() -> Self {
        Self::default()
    }

    pub fn new_eval() -> Self {
        Self {
            mode: NormMode::Eval,
            ..Self::default()
        }
    }

    pub fn with_momentum(mut self, momentum: Float) -> Self {
        self.momentum = momentum;
        self
    }

    pub fn with_eps(mut self, eps: Float) -> Self {
        self.eps = eps;
        self
    }

    pub fn is_training(&self) -> bool {
        self.mode == NormMode::Train
    }
}

impl Default for BatchNormParam {
    fn default() -> Self {
        Self {
            mode: NormMode::Train,
            eps: DEFAULT_EPS,
            momentum: DEFAULT_MOMENTUM,
            running_mean: None,
            running_var: None,
        }
    }
}

/// Layer normalization keeps no statistics between calls, so only epsilon is configurable.
#[derive(Clone, Debug, PartialEq)]
pub struct LayerNormParam {
    pub eps: Float,
}

impl Default for LayerNormParam {
    fn default() -> Self {
        Self { eps: DEFAULT_EPS }
    }
}
