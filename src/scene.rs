//! Scene composition and naive difference photometry.
//!
//! A supernova observation is a reference (galaxy-only) exposure, an epoch
//! exposure with the point source added, and their difference. Fluxes are
//! read off the difference image with a fixed box aperture, corrected for
//! the PSF flux falling outside the box at the source's sub-pixel phase.

use crate::component::{pack_components, GaussianComponent};
use crate::error::PsfError;
use crate::model::mog_image;
use crate::synthesis::{add_point_source, render_galaxy, GalaxyProfileParams, ProfileType};

use ndarray::{s, Array1, Array2};
use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

/// Half-width of the square difference-photometry aperture, pixels.
const APERTURE_HALF_WIDTH: i64 = 5;

/// Smallest reported source flux, counts. Substituted when the template
/// oracle has no defined magnitude at the requested phase.
const DETECTION_FLOOR: f64 = 0.01;

/// Fractional photometric noise floor added in quadrature with shot noise.
const PHOTOMETRY_FLOOR: f64 = 0.005;

/// Source of template supernova fluxes per band and epoch. Implementations
/// wrap a spectral time-series model; a non-finite or non-positive return
/// marks the phase as undefined and is replaced by [DETECTION_FLOOR].
pub trait BandFlux {
    fn band_flux(&self, band: &str, time: f64, zeropoint: f64) -> f64;
}

/// One row of a synthetic light curve, in the column order the downstream
/// light-curve fitters consume.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LightCurvePoint {
    pub time: f64,
    pub band: String,
    pub flux: f64,
    pub flux_err: f64,
    pub zeropoint: f64,
}

/// A single-epoch observation of a galaxy with a transient point source.
#[derive(Clone, Debug, PartialEq)]
pub struct SceneObservation {
    /// Galaxy-only exposure.
    pub reference: Array2<f64>,
    /// Galaxy plus supernova.
    pub epoch: Array2<f64>,
    /// `epoch - reference`.
    pub difference: Array2<f64>,
}

impl SceneObservation {
    /// Renders the reference and epoch frames and their difference. The
    /// supernova offsets are in pixels from the image center.
    pub fn build(
        pixel_scale: f64,
        zeropoint: f64,
        psf: &[GaussianComponent],
        galaxy: &GalaxyProfileParams,
        sn_offset_x: f64,
        sn_offset_y: f64,
        sn_mag: f64,
    ) -> Result<Self, PsfError> {
        let reference = render_galaxy(pixel_scale, zeropoint, psf, galaxy)?;
        let mut epoch = reference.clone();
        add_point_source(&mut epoch, psf, zeropoint, sn_offset_x, sn_offset_y, sn_mag)?;
        let difference = &epoch - &reference;
        Ok(Self {
            reference,
            epoch,
            difference,
        })
    }
}

/// Box-aperture flux of a point source in a difference image.
///
/// Sums an 11×11 pixel box around the source position and divides by the PSF
/// mixture summed over the same box at the source's sub-pixel phase, so the
/// flux lost outside the aperture cancels.
pub fn measure_diff_flux(
    difference: &Array2<f64>,
    psf: &[GaussianComponent],
    offset_x: f64,
    offset_y: f64,
) -> Result<f64, PsfError> {
    if psf.is_empty() {
        return Err(PsfError::EmptyModel);
    }
    let (rows, cols) = difference.dim();
    let x_center = (cols - 1) as f64 / 2.0;
    let y_center = (rows - 1) as f64 / 2.0;
    let x_index = (offset_x + x_center).floor() as i64;
    let y_index = (offset_y + y_center).floor() as i64;

    let n = APERTURE_HALF_WIDTH;
    let x0 = (x_index - n).max(0) as usize;
    let x1 = ((x_index + n + 1).max(0) as usize).min(cols);
    let y0 = (y_index - n).max(0) as usize;
    let y1 = ((y_index + n + 1).max(0) as usize).min(rows);
    let box_sum = difference.slice(s![y0..y1, x0..x1]).sum();

    // PSF box sum at the fractional-pixel phase of the source
    let phase_x = offset_x.rem_euclid(1.0);
    let phase_y = offset_y.rem_euclid(1.0);
    let delta_x = Array1::from_iter((-n..=n).map(|d| d as f64 + phase_x));
    let delta_y = Array1::from_iter((-n..=n).map(|d| d as f64 + phase_y));
    let params = pack_components(psf);
    let psf_box_sum = mog_image(&params, delta_x.view(), delta_y.view())?.sum();

    Ok(box_sum / psf_box_sum)
}

/// Synthetic light curve straight from the template oracle, bypassing image
/// synthesis: per epoch and band, the template flux perturbed by shot noise
/// plus a fractional photometry floor.
pub fn observe_light_curve<O: BandFlux, R: Rng + ?Sized>(
    oracle: &O,
    bands: &[(&str, f64)],
    times: &[f64],
    rng: &mut R,
) -> Vec<LightCurvePoint> {
    let mut points = Vec::with_capacity(times.len() * bands.len());
    for &time in times {
        for &(band, zeropoint) in bands {
            let template = oracle.band_flux(band, time, zeropoint);
            let template = if template.is_finite() && template > 0.0 {
                template
            } else {
                DETECTION_FLOOR
            };
            let flux_err =
                f64::sqrt(template + (PHOTOMETRY_FLOOR * template).powi(2));
            let noise: f64 = rng.sample(StandardNormal);
            points.push(LightCurvePoint {
                time,
                band: band.to_owned(),
                flux: template + flux_err * noise,
                flux_err,
                zeropoint,
            });
        }
    }
    points
}

/// Largest supernova offset from the galaxy center, arcsec: the radius
/// enclosing 75% of the profile light, from the inverse regularized
/// incomplete gamma function at `2n` with `b_n ≈ 2n - 1/3`.
pub fn offset_radius(profile: ProfileType, half_light_radius: f64) -> f64 {
    // gammaincinv(2n, 0.75) for n = 1 and n = 4
    let (inv_gamma, n): (f64, f64) = match profile {
        ProfileType::Exponential => (2.692_634_528_889_696_5, 1.0),
        ProfileType::DeVaucouleurs => (9.684_430_110_292_265, 4.0),
    };
    (inv_gamma / (2.0 * n - 1.0 / 3.0)).powf(n) * half_light_radius
}

#[cfg(test)]
mod tests {
    use super::*;

    use approx::assert_relative_eq;
    use crate::synthesis::mag_to_flux;
    use rand::prelude::*;

    fn centered_psf() -> Vec<GaussianComponent> {
        vec![GaussianComponent::new(0.0, 0.0, 1.2, 1.0, 0.1, 0.8).unwrap()]
    }

    #[test]
    fn offset_radius_matches_sersic_quantiles() {
        assert_relative_eq!(
            offset_radius(ProfileType::Exponential, 1.0),
            1.615_580_717,
            max_relative = 1e-8
        );
        assert_relative_eq!(
            offset_radius(ProfileType::DeVaucouleurs, 1.0),
            2.546_067_727_790,
            max_relative = 1e-10
        );
        assert_relative_eq!(
            offset_radius(ProfileType::Exponential, 0.4),
            0.4 * 1.615_580_717,
            max_relative = 1e-8
        );
    }

    #[test]
    fn box_flux_recovers_point_source() {
        // aperture loss outside the box must cancel against the psf box sum
        let psf = centered_psf();
        let mut image = Array2::zeros((41, 41));
        add_point_source(&mut image, &psf, 25.0, 0.3, -0.6, 23.0).unwrap();
        let flux = measure_diff_flux(&image, &psf, 0.3, -0.6).unwrap();
        assert_relative_eq!(flux, mag_to_flux(23.0, 25.0), max_relative = 1e-10);
    }

    #[test]
    fn difference_image_isolates_the_supernova() {
        let galaxy = GalaxyProfileParams {
            profile: ProfileType::Exponential,
            ellipticity: 0.6,
            position_angle: 45.0,
            half_light_radius: 0.5,
            offset_radius: offset_radius(ProfileType::Exponential, 0.5),
            mag: 20.0,
            offset_x: 0.1,
            offset_y: 0.2,
        };
        let psf = centered_psf();
        let scene =
            SceneObservation::build(0.11, 24.5, &psf, &galaxy, 2.4, -1.7, 22.0).unwrap();
        assert_eq!(scene.reference.dim(), scene.difference.dim());
        // the galaxy cancels exactly; only the point source remains, scaled
        // by the 0.8 weight of the crop-only PSF
        let sn_flux = mag_to_flux(22.0, 24.5);
        assert_relative_eq!(scene.difference.sum(), 0.8 * sn_flux, max_relative = 1e-10);
        let measured = measure_diff_flux(&scene.difference, &psf, 2.4, -1.7).unwrap();
        assert_relative_eq!(measured, sn_flux, max_relative = 1e-10);
    }

    struct FlatTemplate {
        bright: f64,
    }

    impl BandFlux for FlatTemplate {
        fn band_flux(&self, band: &str, _time: f64, _zeropoint: f64) -> f64 {
            match band {
                "j129" => self.bright,
                _ => f64::NAN,
            }
        }
    }

    #[test]
    fn light_curve_floors_undefined_phases() {
        let oracle = FlatTemplate { bright: 100.0 };
        let mut rng = StdRng::seed_from_u64(7);
        let times = [0.0, 5.0, 10.0];
        let bands = [("j129", 25.0), ("h158", 25.5)];
        let points = observe_light_curve(&oracle, &bands, &times, &mut rng);
        assert_eq!(points.len(), 6);
        for point in &points {
            match point.band.as_str() {
                "j129" => {
                    assert_relative_eq!(point.flux_err, 10.0125, max_relative = 1e-4);
                    assert!((point.flux - 100.0).abs() < 6.0 * point.flux_err);
                }
                "h158" => {
                    // NaN template falls back to the detection floor
                    assert_relative_eq!(point.flux_err, 0.1, max_relative = 1e-4);
                    assert!((point.flux - 0.01).abs() < 6.0 * point.flux_err);
                    assert_eq!(point.zeropoint, 25.5);
                }
                other => panic!("unexpected band {other}"),
            }
        }
    }
}
