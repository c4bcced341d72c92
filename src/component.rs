use crate::error::PsfError;

use ndarray::{Array2, Array3, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

/// Number of free scalars per Gaussian component: `[μx, μy, σx, σy, ρ, c]`.
///
/// All flat-vector consumers rely on this stride and field order; changing
/// either breaks compatibility with persisted fitted models.
pub const PARAMS_PER_COMPONENT: usize = 6;

/// One weighted bivariate-normal component of a Gaussian mixture.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GaussianComponent {
    pub mu_x: f64,
    pub mu_y: f64,
    pub sigma_x: f64,
    pub sigma_y: f64,
    pub rho: f64,
    pub weight: f64,
}

impl GaussianComponent {
    pub fn new(
        mu_x: f64,
        mu_y: f64,
        sigma_x: f64,
        sigma_y: f64,
        rho: f64,
        weight: f64,
    ) -> Result<Self, PsfError> {
        let component = Self {
            mu_x,
            mu_y,
            sigma_x,
            sigma_y,
            rho,
            weight,
        };
        component.validate()?;
        Ok(component)
    }

    /// Checks the positive-definiteness preconditions: `σ > 0`, `-1 < ρ < 1`.
    pub fn validate(&self) -> Result<(), PsfError> {
        for sigma in [self.sigma_x, self.sigma_y] {
            if !(sigma > 0.0) {
                return Err(PsfError::NonPositiveSigma { value: sigma });
            }
        }
        if !(self.rho.abs() < 1.0) {
            return Err(PsfError::CorrelationOutOfRange { value: self.rho });
        }
        Ok(())
    }

    /// Covariance matrix `[[σx², ρσxσy], [ρσxσy, σy²]]`.
    pub fn covariance(&self) -> [[f64; 2]; 2] {
        let off_diag = self.rho * self.sigma_x * self.sigma_y;
        [
            [self.sigma_x * self.sigma_x, off_diag],
            [off_diag, self.sigma_y * self.sigma_y],
        ]
    }

    pub fn as_array(&self) -> [f64; PARAMS_PER_COMPONENT] {
        [
            self.mu_x,
            self.mu_y,
            self.sigma_x,
            self.sigma_y,
            self.rho,
            self.weight,
        ]
    }

    pub fn from_array(a: [f64; PARAMS_PER_COMPONENT]) -> Self {
        Self {
            mu_x: a[0],
            mu_y: a[1],
            sigma_x: a[2],
            sigma_y: a[3],
            rho: a[4],
            weight: a[5],
        }
    }
}

/// Flattens components into the stride-6 optimizer parameter vector.
pub fn pack_components(components: &[GaussianComponent]) -> Vec<f64> {
    components
        .iter()
        .flat_map(|component| component.as_array())
        .collect()
}

/// Inverse of [pack_components]; fails when the length is not a multiple of 6.
pub fn unpack_components(params: &[f64]) -> Result<Vec<GaussianComponent>, PsfError> {
    if params.len() % PARAMS_PER_COMPONENT != 0 {
        return Err(PsfError::BadParameterLength {
            len: params.len(),
            stride: PARAMS_PER_COMPONENT,
        });
    }
    Ok(params
        .chunks_exact(PARAMS_PER_COMPONENT)
        .map(|chunk| {
            GaussianComponent::from_array(
                chunk.try_into().expect("chunks_exact yields stride-6 slices"),
            )
        })
        .collect())
}

/// A fitted PSF mixture: `n_core` components found by the global fit plus one
/// synthetic halo component appended after fitting.
///
/// Read-only after creation; the synthesis routines are its only consumers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FittedPsfModel {
    components: Vec<GaussianComponent>,
    n_core: usize,
}

impl FittedPsfModel {
    pub fn new(components: Vec<GaussianComponent>, n_core: usize) -> Result<Self, PsfError> {
        if components.is_empty() || n_core > components.len() {
            return Err(PsfError::EmptyModel);
        }
        Ok(Self { components, n_core })
    }

    pub fn components(&self) -> &[GaussianComponent] {
        &self.components
    }

    pub fn core_components(&self) -> &[GaussianComponent] {
        &self.components[..self.n_core]
    }

    pub fn n_core(&self) -> usize {
        self.n_core
    }

    /// Sum of the core component weights, i.e. the flux inside the fitted crop.
    pub fn core_flux(&self) -> f64 {
        self.core_components()
            .iter()
            .map(|component| component.weight)
            .sum()
    }

    /// `(N_comp + 1, 6)` array in persisted field order.
    pub fn to_array(&self) -> Array2<f64> {
        let mut array = Array2::zeros((self.components.len(), PARAMS_PER_COMPONENT));
        for (mut row, component) in array.rows_mut().into_iter().zip(&self.components) {
            row.assign(&ndarray::arr1(&component.as_array()));
        }
        array
    }

    /// Reads a persisted `(N_comp + 1, 6)` array; the last row is the halo.
    pub fn from_array(array: ArrayView2<'_, f64>) -> Result<Self, PsfError> {
        if array.ncols() != PARAMS_PER_COMPONENT || array.nrows() == 0 {
            return Err(PsfError::BadParameterLength {
                len: array.len(),
                stride: PARAMS_PER_COMPONENT,
            });
        }
        let components: Vec<_> = array
            .rows()
            .into_iter()
            .map(|row| {
                let mut a = [0.0; PARAMS_PER_COMPONENT];
                for (dst, src) in a.iter_mut().zip(row.iter()) {
                    *dst = *src;
                }
                GaussianComponent::from_array(a)
            })
            .collect();
        let n_core = components.len() - 1;
        Self::new(components, n_core)
    }
}

/// Per-filter store of fitted PSF models, the sole artifact handed to image
/// synthesis. Persists as a `(numFilters, N_comp + 1, 6)` array.
#[derive(Clone, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct PsfModelStore {
    models: Vec<FittedPsfModel>,
}

impl PsfModelStore {
    pub fn new(models: Vec<FittedPsfModel>) -> Result<Self, PsfError> {
        if let Some(first) = models.first() {
            if models
                .iter()
                .any(|m| m.components.len() != first.components.len())
            {
                return Err(PsfError::InconsistentStore);
            }
        }
        Ok(Self { models })
    }

    pub fn models(&self) -> &[FittedPsfModel] {
        &self.models
    }

    pub fn get(&self, filter_index: usize) -> Option<&FittedPsfModel> {
        self.models.get(filter_index)
    }

    pub fn to_array(&self) -> Array3<f64> {
        let n_rows = self
            .models
            .first()
            .map(|m| m.components.len())
            .unwrap_or(0);
        let mut array = Array3::zeros((self.models.len(), n_rows, PARAMS_PER_COMPONENT));
        for (mut plane, model) in array.axis_iter_mut(Axis(0)).zip(&self.models) {
            plane.assign(&model.to_array());
        }
        array
    }

    pub fn from_array(array: &Array3<f64>) -> Result<Self, PsfError> {
        let models = array
            .axis_iter(Axis(0))
            .map(FittedPsfModel::from_array)
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(models)
    }
}
