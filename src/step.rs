use crate::component::PARAMS_PER_COMPONENT;

use rand::Rng;

/// Randomized perturbation applied between basin-hopping trials.
///
/// Positions take the full step while shapes, correlations and weights move
/// on tighter, empirically tuned scales. The exact ratios (`s`, `min(s/20,
/// 0.05)`, `min(s/5, 0.1)`, `min(s/3, 0.5)`) are kept as-is: fitted-model
/// compatibility depends on the resulting hop trajectory distribution.
#[derive(Clone, Copy, Debug)]
pub struct StepSampler {
    stepsize: f64,
}

impl StepSampler {
    pub fn new(stepsize: f64) -> Self {
        Self { stepsize }
    }

    pub fn stepsize(&self) -> f64 {
        self.stepsize
    }

    /// Perturbs the stride-6 parameter vector in place.
    pub fn take_step<R: Rng>(&self, params: &mut [f64], rng: &mut R) {
        let s = self.stepsize;
        let shape_step = f64::min(s / 20.0, 0.05);
        let corr_step = f64::min(s / 5.0, 0.1);
        let weight_step = f64::min(s / 3.0, 0.5);
        for component in params.chunks_exact_mut(PARAMS_PER_COMPONENT) {
            component[0] += rng.random_range(-s..s);
            component[1] += rng.random_range(-s..s);
            component[2] += rng.random_range(-shape_step..shape_step);
            component[3] += rng.random_range(-shape_step..shape_step);
            component[4] += rng.random_range(-corr_step..corr_step);
            component[5] += rng.random_range(-weight_step..weight_step);
        }
    }
}
