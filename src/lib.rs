#![doc = include_str!("../README.md")]

mod basinhopping;
pub use basinhopping::{basinhopping, refine_local, BasinHoppingConfig, OptimizationResult};

mod component;
pub use component::{
    pack_components, unpack_components, FittedPsfModel, GaussianComponent, PsfModelStore,
    PARAMS_PER_COMPONENT,
};

mod cutout;
pub use cutout::EmpiricalPsfCutout;

mod epsf;
pub use epsf::effective_psf;

mod error;
pub use error::PsfError;

mod fitter;
pub use fitter::{best_of, fit_psf_model, FitConfig};

mod gaussian;
pub use gaussian::Gaussian2d;

mod model;
pub use model::{loss_and_gradient, mog_image};

mod scene;
pub use scene::{
    measure_diff_flux, observe_light_curve, offset_radius, BandFlux, LightCurvePoint,
    SceneObservation,
};

mod step;
pub use step::StepSampler;

mod synthesis;
pub use synthesis::{
    add_point_source, convolve_mixtures, mag_to_flux, render_galaxy, GalaxyProfileParams,
    ProfileType, FLUX_FLOOR,
};

pub use ndarray;
