//! Analytic image synthesis from a fitted PSF mixture.
//!
//! Galaxy light profiles are expressed as fixed Gaussian mixtures (Hogg &
//! Lang 2013) and convolved with the PSF mixture in closed form: a Gaussian
//! convolved with a Gaussian is a Gaussian whose covariance is the sum of the
//! two, so the convolved image is just the `N_psf × N_profile` pair mixture.
//! No numerical convolution, no pixel noise.

use crate::component::GaussianComponent;
use crate::error::PsfError;
use crate::gaussian::Gaussian2d;

use ndarray::{Array1, Array2};

/// Floor applied to negative pixels produced by floating-point cancellation
/// in mixture summation; downstream noise models require non-negative rates.
pub const FLUX_FLOOR: f64 = 1e-8;

/// Hogg & Lang (2013) mixture-of-Gaussian approximations of Sersic profiles,
/// given with unit intensity at the half-light radius; weights are
/// re-normalized to sum to one before use. Variances are in units of the
/// half-light radius.
const CM_EXP: [f64; 8] = [
    0.00077, 0.01077, 0.07313, 0.37188, 1.39727, 3.56054, 4.74340, 1.78732,
];
const VM_EXP_SQRT: [f64; 8] = [
    0.02393, 0.06490, 0.13580, 0.25096, 0.42942, 0.69672, 1.08879, 1.67294,
];
const CM_DEV: [f64; 10] = [
    0.00139, 0.00941, 0.04441, 0.16162, 0.48121, 1.20357, 2.54182, 4.46441, 6.22821, 6.15393,
];
const VM_DEV_SQRT: [f64; 10] = [
    0.00087, 0.00296, 0.00792, 0.01902, 0.04289, 0.09351, 0.20168, 0.44126, 1.01833, 2.74555,
];

/// Sersic profile family of the simulated galaxy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProfileType {
    /// Exponential disk, Sersic n = 1.
    Exponential,
    /// De Vaucouleurs, Sersic n = 4.
    DeVaucouleurs,
}

impl ProfileType {
    pub fn sersic_index(&self) -> f64 {
        match self {
            Self::Exponential => 1.0,
            Self::DeVaucouleurs => 4.0,
        }
    }

    /// Normalized profile mixture: `(weight, variance)` pairs in half-light
    /// radius units; weights sum to one.
    fn mixture(&self) -> Vec<(f64, f64)> {
        let (weights, sigmas): (&[f64], &[f64]) = match self {
            Self::Exponential => (&CM_EXP, &VM_EXP_SQRT),
            Self::DeVaucouleurs => (&CM_DEV, &VM_DEV_SQRT),
        };
        let total: f64 = weights.iter().sum();
        weights
            .iter()
            .zip(sigmas)
            .map(|(&c, &s)| (c / total, s * s))
            .collect()
    }
}

/// Externally supplied galaxy description consumed by [render_galaxy].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GalaxyProfileParams {
    pub profile: ProfileType,
    /// Axis ratio b/a of the disk, in (0, 1].
    pub ellipticity: f64,
    /// Position angle of the disk, degrees.
    pub position_angle: f64,
    /// Half-light radius, arcsec.
    pub half_light_radius: f64,
    /// Maximum physical extent used to size the image, arcsec.
    pub offset_radius: f64,
    /// Total magnitude.
    pub mag: f64,
    /// Sub-pixel offset of the galaxy center, pixels.
    pub offset_x: f64,
    pub offset_y: f64,
}

impl GalaxyProfileParams {
    /// Unit covariance of the disk: `R Rᵀ` for the rotation-scaling matrix of
    /// a unit semi-major axis and semi-minor axis `b`.
    fn unit_covariance(&self) -> [[f64; 2]; 2] {
        let theta = self.position_angle.to_radians();
        let (sin, cos) = theta.sin_cos();
        let b2 = self.ellipticity * self.ellipticity;
        [
            [sin * sin + b2 * cos * cos, sin * cos * (b2 - 1.0)],
            [sin * cos * (b2 - 1.0), cos * cos + b2 * sin * sin],
        ]
    }
}

/// Photometric calibration: magnitude to count rate at the given zero point.
pub fn mag_to_flux(mag: f64, zeropoint: f64) -> f64 {
    10f64.powf(-0.4 * (mag - zeropoint))
}

/// Analytic convolution of two weighted Gaussian mixtures: every pair
/// contributes the product of the weights, the sum of the means and the sum
/// of the covariances.
pub fn convolve_mixtures(
    first: &[(f64, Gaussian2d)],
    second: &[(f64, Gaussian2d)],
) -> Result<Vec<(f64, Gaussian2d)>, PsfError> {
    let mut pairs = Vec::with_capacity(first.len() * second.len());
    for &(weight_a, a) in first {
        for &(weight_b, b) in second {
            let gaussian = Gaussian2d::new(
                [a.mean[0] + b.mean[0], a.mean[1] + b.mean[1]],
                [
                    [a.cov[0][0] + b.cov[0][0], a.cov[0][1] + b.cov[0][1]],
                    [a.cov[1][0] + b.cov[1][0], a.cov[1][1] + b.cov[1][1]],
                ],
            )?;
            pairs.push((weight_a * weight_b, gaussian));
        }
    }
    Ok(pairs)
}

/// Image side length from the maximum physical extent: `ceil(2.2·r/scale)`,
/// forced odd so the center lands on a pixel, never below 25.
fn image_side(offset_radius: f64, pixel_scale: f64) -> usize {
    let side = (2.2 * offset_radius / pixel_scale).ceil() as usize;
    let side = if side % 2 == 0 { side + 1 } else { side };
    side.max(25)
}

fn clamp_floor(image: &mut Array2<f64>) {
    image.mapv_inplace(|v| if v < 0.0 { FLUX_FLOOR } else { v });
}

fn psf_as_weighted_gaussians(
    psf: &[GaussianComponent],
    scale: f64,
) -> Result<Vec<(f64, Gaussian2d)>, PsfError> {
    psf.iter()
        .map(|component| {
            component.validate()?;
            let cov = component.covariance();
            let gaussian = Gaussian2d::new(
                [component.mu_x * scale, component.mu_y * scale],
                [
                    [cov[0][0] * scale * scale, cov[0][1] * scale * scale],
                    [cov[1][0] * scale * scale, cov[1][1] * scale * scale],
                ],
            )?;
            Ok((component.weight, gaussian))
        })
        .collect()
}

/// Renders the galaxy light profile convolved with the PSF mixture,
/// flux-normalized to `10^(−0.4(mag − zeropoint))` counts.
///
/// All geometry is carried in half-light-radius units so the profile mixture
/// tables apply unchanged; the per-pixel values are scaled back by
/// `(pixel_scale / half_light_radius)²`.
pub fn render_galaxy(
    pixel_scale: f64,
    zeropoint: f64,
    psf: &[GaussianComponent],
    params: &GalaxyProfileParams,
) -> Result<Array2<f64>, PsfError> {
    if psf.is_empty() {
        return Err(PsfError::EmptyModel);
    }
    let side = image_side(params.offset_radius, pixel_scale);
    let center = (side - 1) as f64 / 2.0;
    let to_hlr = pixel_scale / params.half_light_radius;

    // PSF components are defined in pixels; convert into half-light units.
    let psf_mixture = psf_as_weighted_gaussians(psf, to_hlr)?;

    let unit_cov = params.unit_covariance();
    let galaxy_mean = [
        (params.offset_x + center) * to_hlr,
        (params.offset_y + center) * to_hlr,
    ];
    let profile_mixture: Vec<(f64, Gaussian2d)> = params
        .profile
        .mixture()
        .into_iter()
        .map(|(weight, variance)| {
            let gaussian = Gaussian2d::new(
                galaxy_mean,
                [
                    [variance * unit_cov[0][0], variance * unit_cov[0][1]],
                    [variance * unit_cov[1][0], variance * unit_cov[1][1]],
                ],
            )?;
            Ok((weight, gaussian))
        })
        .collect::<Result<_, PsfError>>()?;

    let convolved = convolve_mixtures(&psf_mixture, &profile_mixture)?;

    let x = Array1::from_iter((0..side).map(|i| i as f64 * to_hlr));
    let y = Array1::from_iter((0..side).map(|j| j as f64 * to_hlr));
    let flux = mag_to_flux(params.mag, zeropoint);

    let mut image = Array2::zeros((side, side));
    for (weight, gaussian) in convolved {
        let density = gaussian.density_grid(x.view(), y.view())?;
        image.scaled_add(flux * weight * to_hlr * to_hlr, &density);
    }
    clamp_floor(&mut image);
    Ok(image)
}

/// Adds a PSF-shaped point source at a sub-pixel offset from the image
/// center, in pure pixel coordinates (no half-light rescaling).
pub fn add_point_source(
    image: &mut Array2<f64>,
    psf: &[GaussianComponent],
    zeropoint: f64,
    offset_x: f64,
    offset_y: f64,
    mag: f64,
) -> Result<(), PsfError> {
    if psf.is_empty() {
        return Err(PsfError::EmptyModel);
    }
    let (rows, cols) = image.dim();
    let x_center = (cols - 1) as f64 / 2.0;
    let y_center = (rows - 1) as f64 / 2.0;
    let x = Array1::from_iter((0..cols).map(|i| i as f64));
    let y = Array1::from_iter((0..rows).map(|j| j as f64));
    let flux = mag_to_flux(mag, zeropoint);

    for component in psf {
        component.validate()?;
        let gaussian = Gaussian2d::new(
            [
                component.mu_x + offset_x + x_center,
                component.mu_y + offset_y + y_center,
            ],
            component.covariance(),
        )?;
        let density = gaussian.density_grid(x.view(), y.view())?;
        image.scaled_add(flux * component.weight, &density);
    }
    clamp_floor(image);
    Ok(())
}
