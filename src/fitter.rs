//! Global PSF fit: parallel randomized-restart basin-hopping over the
//! empirical cutout, best-of-N reduction, and halo post-processing.

use crate::basinhopping::{basinhopping, BasinHoppingConfig, OptimizationResult};
use crate::component::{unpack_components, FittedPsfModel, GaussianComponent};
use crate::cutout::EmpiricalPsfCutout;
use crate::error::PsfError;
use crate::model::mog_image;
use crate::step::StepSampler;

use log::{debug, info};
use ndarray::Array1;
use rand::prelude::*;
use rand_distr::StandardNormal;
use std::sync::mpsc;

/// Enclosed-flux fraction the halo component is solved for.
const HALO_ENCLOSED: f64 = 0.99;
/// Reference aperture half-width, detector pixels.
const HALO_APERTURE: f64 = 20.0;

/// Configuration of one global fitting call.
#[derive(Clone, Debug)]
pub struct FitConfig {
    /// Number of core mixture components.
    pub n_components: usize,
    /// Worker threads running restarts.
    pub n_workers: usize,
    /// Independent basin-hopping restarts; only the lowest-loss one survives.
    pub n_restarts: usize,
    pub hopping: BasinHoppingConfig,
    /// Base step of the perturbation sampler; also scales the positional
    /// spread of random initial guesses.
    pub step_size: f64,
    /// Base seed; every restart derives its own generator from it. `None`
    /// seeds from OS entropy.
    pub seed: Option<u64>,
    /// Optional warm-start parameter vector used by every restart instead of
    /// random initialization.
    pub warm_start: Option<Vec<f64>>,
}

impl FitConfig {
    pub fn new(n_components: usize, step_size: f64) -> Self {
        Self {
            n_components,
            n_workers: 10,
            n_restarts: 20,
            hopping: BasinHoppingConfig::default(),
            step_size,
            seed: None,
            warm_start: None,
        }
    }
}

/// Running-minimum reduction over completed restarts; strict `<` keeps the
/// first-seen result on ties.
pub fn best_of<I>(results: I) -> Option<OptimizationResult>
where
    I: IntoIterator<Item = OptimizationResult>,
{
    let mut best: Option<OptimizationResult> = None;
    for result in results {
        match &best {
            Some(current) if result.loss >= current.loss => {}
            _ => best = Some(result),
        }
    }
    best
}

fn random_init<R: Rng>(
    rng: &mut R,
    n_components: usize,
    x_center: f64,
    y_center: f64,
    step_size: f64,
) -> Vec<f64> {
    let mut x0 = Vec::with_capacity(6 * n_components);
    for _ in 0..n_components {
        let zx: f64 = rng.sample(StandardNormal);
        let zy: f64 = rng.sample(StandardNormal);
        x0.push(x_center + 3.0 * step_size * zx);
        x0.push(y_center + 3.0 * step_size * zy);
        x0.push(rng.random_range(0.05..0.3));
        x0.push(rng.random_range(0.05..0.3));
        x0.push(rng.random_range(0.0..0.3));
        x0.push(rng.random::<f64>());
    }
    x0
}

/// Solves the halo shape and weight and appends it to the fitted core.
///
/// The halo is isotropic, zero-mean, `ρ = 0`, with
/// `σ = 10√2·√(−1/ln(1 − 0.99))` so a unit-weight component keeps 99% of its
/// mass within a 20-pixel radius; its weight tops the core model flux over
/// the ±20 px reference aperture up to one.
fn append_halo(core_params: &[f64]) -> Result<FittedPsfModel, PsfError> {
    let aperture = Array1::range(-HALO_APERTURE, HALO_APERTURE + 0.5, 1.0);
    let core_aperture_flux = mog_image(core_params, aperture.view(), aperture.view())?.sum();

    let halo_sigma = 10.0 * f64::sqrt(2.0) * f64::sqrt(-1.0 / f64::ln(1.0 - HALO_ENCLOSED));
    let halo = GaussianComponent {
        mu_x: 0.0,
        mu_y: 0.0,
        sigma_x: halo_sigma,
        sigma_y: halo_sigma,
        rho: 0.0,
        weight: 1.0 - core_aperture_flux,
    };

    let mut components = unpack_components(core_params)?;
    let n_core = components.len();
    components.push(halo);
    FittedPsfModel::new(components, n_core)
}

/// Fits an `n_components` Gaussian mixture to the empirical PSF cutout.
///
/// Restarts are embarrassingly parallel: each worker thread runs complete
/// basin-hopping searches with a generator seeded per restart, results fan in
/// over a bounded channel and only the global minimum is retained.
pub fn fit_psf_model(
    cutout: &EmpiricalPsfCutout,
    config: &FitConfig,
) -> Result<FittedPsfModel, PsfError> {
    if config.n_components == 0 {
        return Err(PsfError::EmptyModel);
    }
    if config.n_restarts == 0 || config.n_workers == 0 {
        return Err(PsfError::NoRestarts);
    }

    let x = cutout.x.view();
    let y = cutout.y.view();
    let target = cutout.image.view();
    let x_center = (cutout.x[0] + cutout.x[cutout.x.len() - 1]) / 2.0;
    let y_center = (cutout.y[0] + cutout.y[cutout.y.len() - 1]) / 2.0;

    let bounds: Vec<(f64, f64)> = (0..config.n_components)
        .flat_map(|_| {
            [
                (cutout.x[0], cutout.x[cutout.x.len() - 1]),
                (cutout.y[0], cutout.y[cutout.y.len() - 1]),
                (0.1, 3.0),
                (0.1, 3.0),
                (-0.9, 0.9),
                (f64::NEG_INFINITY, f64::INFINITY),
            ]
        })
        .collect();

    let step = StepSampler::new(config.step_size);
    let base_seed = config.seed.unwrap_or_else(|| rand::rng().random());

    let best = std::thread::scope(|scope| {
        let (tx, rx) = mpsc::sync_channel::<(usize, OptimizationResult)>(config.n_workers);
        for worker in 0..config.n_workers {
            let tx = tx.clone();
            let bounds = &bounds;
            let step = &step;
            scope.spawn(move || {
                for restart in (worker..config.n_restarts).step_by(config.n_workers) {
                    let mut rng = StdRng::seed_from_u64(base_seed.wrapping_add(restart as u64));
                    let x0 = match &config.warm_start {
                        Some(warm) => warm.clone(),
                        None => random_init(
                            &mut rng,
                            config.n_components,
                            x_center,
                            y_center,
                            config.step_size,
                        ),
                    };
                    let result = basinhopping(
                        &x0,
                        x,
                        y,
                        target,
                        bounds,
                        cutout.cut_flux,
                        step,
                        &config.hopping,
                        &mut rng,
                    );
                    if tx.send((restart, result)).is_err() {
                        break;
                    }
                }
            });
        }
        drop(tx);

        best_of(rx.iter().map(|(restart, result)| {
            debug!(
                "restart {restart}: loss = {:.6e}, converged = {}",
                result.loss, result.converged
            );
            result
        }))
    })
    .ok_or(PsfError::NoRestarts)?;

    info!(
        "global fit done: loss = {:.6e}, converged = {}, core flux = {:.6}",
        best.loss,
        best.converged,
        best.params.iter().skip(5).step_by(6).sum::<f64>()
    );

    append_halo(&best.params)
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::model::mog_image;

    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use ndarray::{Array1, Array2};

    fn mock_result(loss: f64, tag: f64) -> OptimizationResult {
        OptimizationResult {
            params: vec![tag],
            loss,
            converged: true,
        }
    }

    #[test]
    fn best_of_returns_minimum_first_seen() {
        let results = vec![
            mock_result(5.2, 0.0),
            mock_result(1.1, 1.0),
            mock_result(3.4, 2.0),
            mock_result(1.1, 3.0),
        ];
        let best = best_of(results).unwrap();
        assert_eq!(best.loss, 1.1);
        // tie broken in favor of the first-seen result
        assert_eq!(best.params, vec![1.0]);
    }

    #[test]
    fn best_of_empty_is_none() {
        assert!(best_of(std::iter::empty()).is_none());
    }

    #[test]
    fn halo_tops_aperture_flux_up_to_one() {
        // compact core holding 95% of the flux, like a real cropped PSF fit
        let core = [0.1, -0.2, 0.8, 0.9, 0.1, 0.95];
        let model = append_halo(&core).unwrap();
        assert_eq!(model.components().len(), 2);
        assert_eq!(model.n_core(), 1);

        let halo = model.components()[1];
        assert_eq!(halo.mu_x, 0.0);
        assert_eq!(halo.rho, 0.0);
        assert_relative_eq!(halo.sigma_x, 6.590102289822609, max_relative = 1e-12);

        let aperture = Array1::range(-20.0, 20.5, 1.0);
        let params = crate::pack_components(model.components());
        let total = mog_image(&params, aperture.view(), aperture.view())
            .unwrap()
            .sum();
        assert_abs_diff_eq!(total, 1.0, epsilon = 1e-3);
    }

    #[test]
    fn fit_recovers_single_component_and_conserves_flux() {
        let axis = Array1::linspace(-3.0, 3.0, 13);
        let truth = [0.3, -0.2, 0.5, 0.6, 0.15, 0.9];
        let target = mog_image(&truth, axis.view(), axis.view()).unwrap();
        let cutout = EmpiricalPsfCutout {
            image: target,
            x: axis.clone(),
            y: axis,
            total_flux: 1.0,
            cut_flux: 0.9,
        };

        let mut config = FitConfig::new(1, 1.0);
        config.n_workers = 2;
        config.n_restarts = 4;
        config.hopping = BasinHoppingConfig {
            n_hop_iters: 3,
            temperature: 0.01,
            max_local_evals: 300,
        };
        config.seed = Some(42);

        let model = fit_psf_model(&cutout, &config).unwrap();
        assert_eq!(model.components().len(), 2);
        assert_abs_diff_eq!(model.core_flux(), 0.9, epsilon = 1e-6);

        let core = model.core_components()[0];
        assert_abs_diff_eq!(core.mu_x, truth[0], epsilon = 0.05);
        assert_abs_diff_eq!(core.mu_y, truth[1], epsilon = 0.05);
    }

    #[test]
    fn zero_restarts_is_an_error() {
        let cutout = EmpiricalPsfCutout {
            image: Array2::zeros((3, 3)),
            x: Array1::linspace(-1.0, 1.0, 3),
            y: Array1::linspace(-1.0, 1.0, 3),
            total_flux: 1.0,
            cut_flux: 1.0,
        };
        let mut config = FitConfig::new(1, 1.0);
        config.n_restarts = 0;
        assert!(matches!(
            fit_psf_model(&cutout, &config),
            Err(PsfError::NoRestarts)
        ));
    }
}
