use crate::error::PsfError;

use ndarray::{s, Array1, Array2, ArrayView2};

/// Tolerance for recognizing detector-pixel-center samples on the
/// oversampled grid; the coordinates are small binary fractions, so this only
/// has to absorb the centering subtraction.
const CENTER_TOL: f64 = 1e-9;

/// Cropped, threshold-clipped empirical PSF image with its coordinate grids
/// and the flux scalars driving the flux-preservation constraint.
///
/// Derived once per filter from the effective PSF; consumed only by the
/// fitting step.
#[derive(Clone, Debug)]
pub struct EmpiricalPsfCutout {
    pub image: Array2<f64>,
    pub x: Array1<f64>,
    pub y: Array1<f64>,
    /// Detector-pixel-sampled flux of the full image.
    pub total_flux: f64,
    /// Detector-pixel-sampled flux inside the crop after thresholding; the
    /// fit constrains `Σ c_k` to this value.
    pub cut_flux: f64,
}

fn is_pixel_center(coord: f64) -> bool {
    let frac = coord - coord.floor();
    (frac - 0.5).abs() < CENTER_TOL
}

fn pixel_center_sum(image: ArrayView2<'_, f64>, x: &Array1<f64>, y: &Array1<f64>) -> f64 {
    let mut sum = 0.0;
    for (j, &yv) in y.iter().enumerate() {
        if !is_pixel_center(yv) {
            continue;
        }
        for (i, &xv) in x.iter().enumerate() {
            if is_pixel_center(xv) {
                sum += image[[j, i]];
            }
        }
    }
    sum
}

impl EmpiricalPsfCutout {
    /// Prepares a fitting cutout from an effective PSF image still sampled on
    /// the oversampled grid.
    ///
    /// Coordinates are detector pixels (`index / oversamp`), re-centered on
    /// the image middle. Pixels fainter than `threshold` are zeroed, not the
    /// cutout's concern to validate further: insufficient flux above the
    /// threshold is a caller precondition.
    pub fn from_reduced_psf(
        image: ArrayView2<'_, f64>,
        oversamp: usize,
        max_pix_offset: f64,
        threshold: f64,
    ) -> Result<Self, PsfError> {
        if oversamp < 2 {
            return Err(PsfError::BadOversampling(oversamp));
        }
        let (rows, cols) = image.dim();
        let x_full: Array1<f64> =
            Array1::from_iter((0..cols).map(|i| i as f64 / oversamp as f64));
        let y_full: Array1<f64> =
            Array1::from_iter((0..rows).map(|j| j as f64 / oversamp as f64));
        // the full-image flux is sampled on the raw grid: centering may shift
        // the half-integer samples off the detector-pixel centers entirely
        let total_flux = pixel_center_sum(image, &x_full, &y_full);

        let x_center = (x_full[0] + x_full[cols - 1]) / 2.0;
        let y_center = (y_full[0] + y_full[rows - 1]) / 2.0;
        let x_full = x_full.mapv(|v| v - x_center);
        let y_full = y_full.mapv(|v| v - y_center);

        let x_keep: Vec<usize> = x_full
            .iter()
            .enumerate()
            .filter(|(_, &v)| v.abs() <= max_pix_offset)
            .map(|(i, _)| i)
            .collect();
        let y_keep: Vec<usize> = y_full
            .iter()
            .enumerate()
            .filter(|(_, &v)| v.abs() <= max_pix_offset)
            .map(|(j, _)| j)
            .collect();
        let (Some(&x0), Some(&x1), Some(&y0), Some(&y1)) = (
            x_keep.first(),
            x_keep.last(),
            y_keep.first(),
            y_keep.last(),
        ) else {
            return Err(PsfError::EmptyCutout { max_pix_offset });
        };

        let mut cropped = image.slice(s![y0..=y1, x0..=x1]).to_owned();
        cropped.mapv_inplace(|v| if v < threshold { 0.0 } else { v });
        let x = x_full.slice(s![x0..=x1]).to_owned();
        let y = y_full.slice(s![y0..=y1]).to_owned();

        let cut_flux = pixel_center_sum(cropped.view(), &x, &y);

        Ok(Self {
            image: cropped,
            x,
            y,
            total_flux,
            cut_flux,
        })
    }

    /// Fraction of the detector-sampled flux surviving the crop + threshold.
    pub fn cut_fraction(&self) -> f64 {
        self.cut_flux / self.total_flux
    }
}
