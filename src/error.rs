/// Error returned from PSF model construction, fitting and image synthesis.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum PsfError {
    #[error("covariance matrix is not positive-definite (det = {det})")]
    NonPositiveDefinite { det: f64 },

    #[error("sigma must be positive, got {value}")]
    NonPositiveSigma { value: f64 },

    #[error("correlation must lie strictly inside (-1, 1), got {value}")]
    CorrelationOutOfRange { value: f64 },

    #[error("parameter vector length {len} is not a multiple of {stride}")]
    BadParameterLength { len: usize, stride: usize },

    #[error("mixture model must have at least one component")]
    EmptyModel,

    #[error("oversampling factor must be at least 2, got {0}")]
    BadOversampling(usize),

    #[error("image of shape ({rows}, {cols}) is too small for oversampling factor {oversamp}")]
    ImageTooSmall {
        rows: usize,
        cols: usize,
        oversamp: usize,
    },

    #[error("empty cutout: no pixels within max offset {max_pix_offset}")]
    EmptyCutout { max_pix_offset: f64 },

    #[error("fit produced no result: no restarts were run")]
    NoRestarts,

    #[error("per-filter models have inconsistent component counts")]
    InconsistentStore,
}
