//! Sum-of-squared-residuals loss of a Gaussian-mixture PSF model and its
//! analytic gradient.
//!
//! Each component is parameterized directly by `(μx, μy, σx, σy, ρ, c)` so
//! positive-definiteness stays enforceable through box bounds on `σ` and `ρ`.
//! With `u = (x−μx)/σx`, `v = (y−μy)/σy`, `Ω = 1−ρ²` and
//! `Q = u² + v² − 2ρuv` the component density is
//!
//! ```text
//! f = c / (2π σx σy √Ω) · exp(−Q / 2Ω)
//! ∂f/∂μx = f·C/(σx·Ω),          C = u − ρv
//! ∂f/∂μy = f·D/(σy·Ω),          D = v − ρu
//! ∂f/∂σx = f·u·C/(σx·Ω) − f/σx
//! ∂f/∂σy = f·v·D/(σy·Ω) − f/σy
//! ∂f/∂ρ  = f·(ρ·(1 − Q/Ω) + uv)/Ω
//! ∂f/∂c  = f/c, computed as the weightless density to stay finite at c = 0
//! ```
//!
//! Components share no parameters, so the loss gradient separates per
//! component: `∂L/∂θ_k = 2·Σ_pixels (model − target)·∂f_k/∂θ_k`.

use crate::component::{unpack_components, PARAMS_PER_COMPONENT};
use crate::error::PsfError;

use itertools::izip;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Zip};
use std::f64::consts::TAU;

/// Renders the stride-6 parameter vector as a model image on the outer grid
/// of `x` and `y`, shape `(y.len(), x.len())`.
pub fn mog_image(
    params: &[f64],
    x: ArrayView1<'_, f64>,
    y: ArrayView1<'_, f64>,
) -> Result<Array2<f64>, PsfError> {
    let components = unpack_components(params)?;
    let mut image = Array2::zeros((y.len(), x.len()));
    for component in &components {
        component.validate()?;
        let omega = 1.0 - component.rho * component.rho;
        let norm = 1.0 / (TAU * component.sigma_x * component.sigma_y * omega.sqrt());
        let u = x.mapv(|v| (v - component.mu_x) / component.sigma_x);
        let v = y.mapv(|w| (w - component.mu_y) / component.sigma_y);
        Zip::from(image.rows_mut()).and(&v).for_each(|row, &v| {
            Zip::from(row).and(&u).for_each(|out, &u| {
                let q = u * u + v * v - 2.0 * component.rho * u * v;
                *out += component.weight * norm * f64::exp(-0.5 * q / omega);
            });
        });
    }
    Ok(image)
}

/// Sum-of-squared-residuals loss against `target` and its analytic gradient
/// with respect to every parameter of the stride-6 vector.
pub fn loss_and_gradient(
    params: &[f64],
    x: ArrayView1<'_, f64>,
    y: ArrayView1<'_, f64>,
    target: ArrayView2<'_, f64>,
) -> Result<(f64, Vec<f64>), PsfError> {
    let components = unpack_components(params)?;
    if components.is_empty() {
        return Err(PsfError::EmptyModel);
    }

    // First pass: weightless densities (≡ ∂f/∂c) per component and the model.
    let mut densities = Vec::with_capacity(components.len());
    let mut model = Array2::zeros((y.len(), x.len()));
    for component in &components {
        component.validate()?;
        let omega = 1.0 - component.rho * component.rho;
        let norm = 1.0 / (TAU * component.sigma_x * component.sigma_y * omega.sqrt());
        let u = x.mapv(|v| (v - component.mu_x) / component.sigma_x);
        let v = y.mapv(|w| (w - component.mu_y) / component.sigma_y);
        let mut density = Array2::zeros((y.len(), x.len()));
        Zip::from(density.rows_mut()).and(&v).for_each(|row, &v| {
            Zip::from(row).and(&u).for_each(|out, &u| {
                let q = u * u + v * v - 2.0 * component.rho * u * v;
                *out = norm * f64::exp(-0.5 * q / omega);
            });
        });
        model.scaled_add(component.weight, &density);
        densities.push(density);
    }

    let residual = &model - &target;
    let loss = residual.iter().map(|r| r * r).sum();

    // Second pass: per-component fused accumulation of all six partial sums.
    let mut gradient = vec![0.0; params.len()];
    for (component, density, grad) in izip!(
        &components,
        &densities,
        gradient.chunks_exact_mut(PARAMS_PER_COMPONENT)
    ) {
        let omega = 1.0 - component.rho * component.rho;
        let u_axis: Array1<f64> = x.mapv(|v| (v - component.mu_x) / component.sigma_x);
        let v_axis: Array1<f64> = y.mapv(|w| (w - component.mu_y) / component.sigma_y);
        let mut sums = [0.0; PARAMS_PER_COMPONENT];
        Zip::from(residual.rows())
            .and(density.rows())
            .and(&v_axis)
            .for_each(|residual_row, density_row, &v| {
                Zip::from(residual_row)
                    .and(density_row)
                    .and(&u_axis)
                    .for_each(|&dz, &density, &u| {
                        let f = component.weight * density;
                        let c_term = u - component.rho * v;
                        let d_term = v - component.rho * u;
                        let q = u * u + v * v - 2.0 * component.rho * u * v;
                        sums[0] += dz * f * c_term / (component.sigma_x * omega);
                        sums[1] += dz * f * d_term / (component.sigma_y * omega);
                        sums[2] += dz * (f * u * c_term / (component.sigma_x * omega)
                            - f / component.sigma_x);
                        sums[3] += dz * (f * v * d_term / (component.sigma_y * omega)
                            - f / component.sigma_y);
                        sums[4] +=
                            dz * f * (component.rho * (1.0 - q / omega) + u * v) / omega;
                        sums[5] += dz * density;
                    });
            });
        for (g, s) in grad.iter_mut().zip(sums) {
            *g = 2.0 * s;
        }
    }

    Ok((loss, gradient))
}
