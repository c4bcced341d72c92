//! Constrained local refinement and the basin-hopping loop built on top of it.
//!
//! Local refinement is SLSQP with analytic gradients, hard box bounds and the
//! flux-preservation equality `Σ c_k = cut_flux` (expressed as an opposing
//! pair of `≤ 0` inequalities, both with constant Jacobians). Basin-hopping
//! wraps it in a fixed-temperature Metropolis loop over randomized
//! perturbations from [crate::StepSampler].

use crate::component::PARAMS_PER_COMPONENT;
use crate::model::loss_and_gradient;
use crate::step::StepSampler;

use ndarray::{ArrayView1, ArrayView2};
use rand::Rng;
use slsqp::{minimize, Func, StopTols};

/// Outcome of one restart: the refined parameter vector, its loss, and
/// whether the local solver reported convergence.
///
/// Non-convergence is not escalated; a suboptimal result simply competes in
/// the best-of-N reduction.
#[derive(Clone, Debug)]
pub struct OptimizationResult {
    pub params: Vec<f64>,
    pub loss: f64,
    pub converged: bool,
}

#[derive(Clone, Copy, Debug)]
pub struct BasinHoppingConfig {
    /// Number of perturb-refine outer iterations.
    pub n_hop_iters: usize,
    /// Fixed Metropolis acceptance temperature (not annealed).
    pub temperature: f64,
    /// Evaluation budget of each SLSQP run.
    pub max_local_evals: usize,
}

impl Default for BasinHoppingConfig {
    fn default() -> Self {
        Self {
            n_hop_iters: 350,
            temperature: 0.01,
            max_local_evals: 200,
        }
    }
}

/// One SLSQP run from `x0`, bounded by `bounds` and constrained to
/// `Σ c_k = cut_flux`.
pub fn refine_local(
    x0: &[f64],
    x: ArrayView1<'_, f64>,
    y: ArrayView1<'_, f64>,
    target: ArrayView2<'_, f64>,
    bounds: &[(f64, f64)],
    cut_flux: f64,
    max_evals: usize,
) -> OptimizationResult {
    let objective = |p: &[f64], gradient: Option<&mut [f64]>, _: &mut ()| -> f64 {
        match loss_and_gradient(p, x, y, target) {
            Ok((loss, grad)) => {
                if let Some(g) = gradient {
                    g.copy_from_slice(&grad);
                }
                loss
            }
            // out-of-domain trial points (line search overshoot) are repelled
            Err(_) => {
                if let Some(g) = gradient {
                    g.iter_mut().for_each(|v| *v = 0.0);
                }
                f64::INFINITY
            }
        }
    };

    // Equality via an opposing pair of `≤ 0` inequalities; the Jacobian of
    // both is the weight-slot indicator pattern.
    let weight_slot = |i: usize| i % PARAMS_PER_COMPONENT == PARAMS_PER_COMPONENT - 1;
    let flux_sum =
        |p: &[f64]| -> f64 { p.iter().skip(5).step_by(PARAMS_PER_COMPONENT).sum() };
    let flux_excess = move |p: &[f64], gradient: Option<&mut [f64]>, _: &mut ()| -> f64 {
        if let Some(g) = gradient {
            for (i, v) in g.iter_mut().enumerate() {
                *v = if weight_slot(i) { 1.0 } else { 0.0 };
            }
        }
        flux_sum(p) - cut_flux
    };
    let flux_deficit = move |p: &[f64], gradient: Option<&mut [f64]>, _: &mut ()| -> f64 {
        if let Some(g) = gradient {
            for (i, v) in g.iter_mut().enumerate() {
                *v = if weight_slot(i) { -1.0 } else { 0.0 };
            }
        }
        cut_flux - flux_sum(p)
    };
    let cons: Vec<&dyn Func<()>> = vec![&flux_excess, &flux_deficit];

    let stop_tol = StopTols {
        ftol_rel: 1e-10,
        ..StopTols::default()
    };

    match minimize(
        objective,
        x0,
        bounds,
        &cons,
        (),
        max_evals,
        Some(stop_tol),
    ) {
        Ok((_, params, loss)) => OptimizationResult {
            params,
            loss,
            converged: true,
        },
        Err((_, params, loss)) => OptimizationResult {
            params,
            loss,
            converged: false,
        },
    }
}

/// Global search: repeatedly perturb the current local optimum, re-refine,
/// and accept via the Metropolis criterion at fixed temperature. Returns the
/// best local optimum seen.
#[allow(clippy::too_many_arguments)]
pub fn basinhopping<R: Rng>(
    x0: &[f64],
    x: ArrayView1<'_, f64>,
    y: ArrayView1<'_, f64>,
    target: ArrayView2<'_, f64>,
    bounds: &[(f64, f64)],
    cut_flux: f64,
    step: &StepSampler,
    config: &BasinHoppingConfig,
    rng: &mut R,
) -> OptimizationResult {
    let mut current = refine_local(x0, x, y, target, bounds, cut_flux, config.max_local_evals);
    let mut best = current.clone();

    for _ in 0..config.n_hop_iters {
        let mut trial_x = current.params.clone();
        step.take_step(&mut trial_x, rng);
        let trial = refine_local(
            &trial_x,
            x,
            y,
            target,
            bounds,
            cut_flux,
            config.max_local_evals,
        );

        let accept = if config.temperature > 0.0 {
            let weight = f64::exp(-(trial.loss - current.loss) / config.temperature);
            rng.random::<f64>() < weight
        } else {
            trial.loss < current.loss
        };
        if trial.loss < best.loss {
            best = trial.clone();
        }
        if accept {
            current = trial;
        }
    }

    best
}
