use crate::error::PsfError;

use ndarray::{Array2, ArrayView1, Zip};
use std::f64::consts::TAU;

/// A single 2-D Gaussian density with an explicit covariance matrix.
///
/// Used by the analytic mixture-convolution routines, where covariances of
/// PSF and galaxy-profile components are summed and no `(σx, σy, ρ)`
/// factorization is available for the result.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Gaussian2d {
    pub mean: [f64; 2],
    pub cov: [[f64; 2]; 2],
}

impl Gaussian2d {
    pub fn new(mean: [f64; 2], cov: [[f64; 2]; 2]) -> Result<Self, PsfError> {
        let gaussian = Self { mean, cov };
        gaussian.det()?;
        Ok(gaussian)
    }

    fn det(&self) -> Result<f64, PsfError> {
        let det = self.cov[0][0] * self.cov[1][1] - self.cov[0][1] * self.cov[1][0];
        if det > 0.0 && self.cov[0][0] > 0.0 {
            Ok(det)
        } else {
            Err(PsfError::NonPositiveDefinite { det })
        }
    }

    /// Density on the outer grid of `x` and `y`, shape `(y.len(), x.len())`.
    ///
    /// The quadratic form is expanded into scalar coefficients of the inverse
    /// covariance and evaluated with fused `Zip` passes over the grid; no
    /// per-pixel matrix solves.
    pub fn density_grid(
        &self,
        x: ArrayView1<'_, f64>,
        y: ArrayView1<'_, f64>,
    ) -> Result<Array2<f64>, PsfError> {
        let det = self.det()?;
        let norm = 1.0 / (TAU * det.sqrt());
        let inv_xx = self.cov[1][1] / det;
        let inv_yy = self.cov[0][0] / det;
        let inv_xy = -self.cov[0][1] / det;

        let dx = x.mapv(|v| v - self.mean[0]);
        let dy = y.mapv(|v| v - self.mean[1]);

        let mut density = Array2::zeros((y.len(), x.len()));
        Zip::from(density.rows_mut())
            .and(&dy)
            .for_each(|row, &dy| {
                Zip::from(row).and(&dx).for_each(|out, &dx| {
                    let mahalanobis_sq =
                        inv_xx * dx * dx + 2.0 * inv_xy * dx * dy + inv_yy * dy * dy;
                    *out = norm * f64::exp(-0.5 * mahalanobis_sq);
                });
            });
        Ok(density)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use approx::assert_relative_eq;
    use ndarray::Array1;

    #[test]
    fn isotropic_matches_product_of_1d_normals() {
        let sigma = 0.8;
        let gaussian = Gaussian2d::new([0.1, -0.3], [[sigma * sigma, 0.0], [0.0, sigma * sigma]])
            .unwrap();
        let x = Array1::linspace(-2.0, 2.0, 9);
        let y = Array1::linspace(-2.0, 2.0, 7);
        let density = gaussian.density_grid(x.view(), y.view()).unwrap();
        assert_eq!(density.shape(), [7, 9]);

        let normal_1d = |u: f64, mu: f64| {
            f64::exp(-0.5 * ((u - mu) / sigma).powi(2)) / (sigma * f64::sqrt(2.0 * std::f64::consts::PI))
        };
        for (j, &yv) in y.iter().enumerate() {
            for (i, &xv) in x.iter().enumerate() {
                assert_relative_eq!(
                    density[[j, i]],
                    normal_1d(xv, 0.1) * normal_1d(yv, -0.3),
                    max_relative = 1e-12
                );
            }
        }
    }

    #[test]
    fn correlated_peak_is_at_mean() {
        let gaussian = Gaussian2d::new([0.5, 0.5], [[1.0, 0.6], [0.6, 2.0]]).unwrap();
        let axis = Array1::linspace(-3.0, 3.5, 40);
        let density = gaussian.density_grid(axis.view(), axis.view()).unwrap();
        let (peak_idx, _) = density
            .indexed_iter()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .unwrap();
        let peak_x = axis[peak_idx.1];
        let peak_y = axis[peak_idx.0];
        assert_relative_eq!(peak_x, 0.5, epsilon = 0.1);
        assert_relative_eq!(peak_y, 0.5, epsilon = 0.1);
    }

    #[test]
    fn singular_covariance_is_domain_error() {
        let result = Gaussian2d::new([0.0, 0.0], [[1.0, 1.0], [1.0, 1.0]]);
        assert!(matches!(result, Err(PsfError::NonPositiveDefinite { .. })));
        // negative determinant
        let result = Gaussian2d::new([0.0, 0.0], [[1.0, 2.0], [2.0, 1.0]]);
        assert!(matches!(result, Err(PsfError::NonPositiveDefinite { .. })));
    }

    #[test]
    fn integrates_to_unity() {
        let gaussian = Gaussian2d::new([0.0, 0.0], [[0.5, 0.2], [0.2, 0.8]]).unwrap();
        let step = 0.05;
        let axis = Array1::range(-8.0, 8.0, step);
        let density = gaussian.density_grid(axis.view(), axis.view()).unwrap();
        assert_relative_eq!(density.sum() * step * step, 1.0, epsilon = 1e-6);
    }
}
