use crate::error::PsfError;

use ndarray::{s, Array2, ArrayView2};

/// Downsamples an oversampled PSF response to detector-pixel resolution.
///
/// Every output pixel is the sum of the oversampled block `[i − k/2, i + k/2)`
/// centered on it (truncating integer division, so no edge sample is counted
/// twice). The outermost oversampled pixels cannot host a full block, hence
/// the output is smaller by `2k − 1` along each axis.
pub fn effective_psf(image: ArrayView2<'_, f64>, oversamp: usize) -> Result<Array2<f64>, PsfError> {
    if oversamp < 2 {
        return Err(PsfError::BadOversampling(oversamp));
    }
    let (rows, cols) = image.dim();
    if rows < 2 * oversamp || cols < 2 * oversamp {
        return Err(PsfError::ImageTooSmall {
            rows,
            cols,
            oversamp,
        });
    }
    let half = oversamp / 2;
    let mut reduced = Array2::zeros((rows - 2 * oversamp + 1, cols - 2 * oversamp + 1));
    for i in oversamp..rows - oversamp + 1 {
        for j in oversamp..cols - oversamp + 1 {
            reduced[[i - oversamp, j - oversamp]] =
                image.slice(s![i - half..i + half, j - half..j + half]).sum();
        }
    }
    Ok(reduced)
}

#[cfg(test)]
mod tests {
    use super::*;

    use approx::assert_relative_eq;
    use ndarray::Array2;

    #[test]
    fn ones_image_sums_to_block_area() {
        for oversamp in [2usize, 4, 6] {
            let image = Array2::<f64>::ones((31, 27));
            let reduced = effective_psf(image.view(), oversamp).unwrap();
            assert_eq!(
                reduced.shape(),
                [31 - 2 * oversamp + 1, 27 - 2 * oversamp + 1]
            );
            let block_area = (oversamp * oversamp) as f64;
            for &value in &reduced {
                assert_relative_eq!(value, block_area);
            }
        }
    }

    #[test]
    fn block_sum_does_not_double_count() {
        // A single hot oversampled pixel contributes to exactly k x k outputs.
        let oversamp = 4;
        let mut image = Array2::<f64>::zeros((25, 25));
        image[[12, 12]] = 1.0;
        let reduced = effective_psf(image.view(), oversamp).unwrap();
        let touched = reduced.iter().filter(|&&v| v != 0.0).count();
        assert_eq!(touched, oversamp * oversamp);
        assert_relative_eq!(reduced.sum(), (oversamp * oversamp) as f64);
    }

    #[test]
    fn too_small_image_is_rejected() {
        let image = Array2::<f64>::ones((7, 7));
        assert!(matches!(
            effective_psf(image.view(), 4),
            Err(PsfError::ImageTooSmall { .. })
        ));
        assert!(matches!(
            effective_psf(image.view(), 1),
            Err(PsfError::BadOversampling(1))
        ));
    }
}
