//! Point distribution models and the parametric shape transform.
//!
//! The transform's parameter vector holds the four global similarity
//! parameters first, then the shape weights. Its Jacobian with respect to
//! the parameters is constant, so every fitting algorithm can precompute it.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::error::{ensure_len, Error, Result};
use crate::types::Shape;

/// Number of global (similarity) parameters in front of the shape weights.
pub const N_GLOBAL_PARAMETERS: usize = 4;

/// Linear deformable shape model learned by PCA.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointDistributionModel {
    mean: Shape,
    /// `2n x k`, one column per component, rows interleaved `x, y`.
    components: DMatrix<f64>,
    eigenvalues: DVector<f64>,
    noise_variance: f64,
}

impl PointDistributionModel {
    pub fn new(
        mean: Shape,
        components: DMatrix<f64>,
        eigenvalues: DVector<f64>,
        noise_variance: f64,
    ) -> Result<Self> {
        ensure_len("shape components rows", mean.num_landmarks() * 2, components.nrows())?;
        ensure_len("shape eigenvalues", components.ncols(), eigenvalues.len())?;
        if let Some(bad) = eigenvalues.iter().find(|&&e| !(e.is_finite() && e > 0.0)) {
            return Err(Error::InvalidModel(format!(
                "Shape eigenvalues must be positive, got {bad}"
            )));
        }
        if !(noise_variance.is_finite() && noise_variance > 0.0) {
            return Err(Error::InvalidModel(format!(
                "Shape noise variance must be positive, got {noise_variance}"
            )));
        }
        Ok(Self {
            mean,
            components,
            eigenvalues,
            noise_variance,
        })
    }

    pub fn mean(&self) -> &Shape {
        &self.mean
    }

    pub fn components(&self) -> &DMatrix<f64> {
        &self.components
    }

    pub fn eigenvalues(&self) -> &DVector<f64> {
        &self.eigenvalues
    }

    pub fn noise_variance(&self) -> f64 {
        self.noise_variance
    }

    pub fn n_points(&self) -> usize {
        self.mean.num_landmarks()
    }

    pub fn n_components(&self) -> usize {
        self.components.ncols()
    }

    /// Shape for the given component weights, without any global pose.
    pub fn instance(&self, weights: &DVector<f64>) -> Shape {
        let v = self.mean.as_vector() + &self.components * weights;
        Shape::from_vector(&v)
    }
}

/// A PDM whose shape components are orthonormalized together with a
/// linearized 2D similarity basis (scale/rotation pair plus translations).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrthoPdm {
    model: PointDistributionModel,
    mean: DVector<f64>,
    /// `2n x (4 + k)`; also the Jacobian `d_dp`.
    basis: DMatrix<f64>,
}

impl OrthoPdm {
    pub fn new(model: PointDistributionModel) -> Result<Self> {
        let n = model.n_points();
        let n_params = N_GLOBAL_PARAMETERS + model.n_components();
        if 2 * n < n_params {
            return Err(Error::InvalidModel(format!(
                "{n} landmarks cannot support {n_params} shape parameters"
            )));
        }

        let mean = model.mean().as_vector();
        let centroid = model.mean().centroid();
        let stacked = DMatrix::from_fn(2 * n, n_params, |row, col| {
            let p = model.mean()[row / 2] - centroid;
            let is_x = row % 2 == 0;
            match col {
                0 => {
                    if is_x {
                        p.x
                    } else {
                        p.y
                    }
                }
                1 => {
                    if is_x {
                        -p.y
                    } else {
                        p.x
                    }
                }
                2 => {
                    if is_x {
                        1.0
                    } else {
                        0.0
                    }
                }
                3 => {
                    if is_x {
                        0.0
                    } else {
                        1.0
                    }
                }
                _ => model.components()[(row, col - N_GLOBAL_PARAMETERS)],
            }
        });

        let scale = stacked.norm().max(1.0);
        let qr = stacked.qr();
        let r = qr.r();
        for i in 0..n_params {
            if r[(i, i)].abs() <= 1e-10 * scale {
                return Err(Error::InvalidModel(format!(
                    "Shape basis column {i} is linearly dependent on the previous ones"
                )));
            }
        }
        let basis = qr.q();

        Ok(Self { model, mean, basis })
    }

    pub fn model(&self) -> &PointDistributionModel {
        &self.model
    }

    pub fn n_points(&self) -> usize {
        self.model.n_points()
    }

    pub fn n_parameters(&self) -> usize {
        self.basis.ncols()
    }

    /// Jacobian of the landmark coordinates with respect to the parameters.
    pub fn d_dp(&self) -> &DMatrix<f64> {
        &self.basis
    }

    pub fn instance(&self, params: &DVector<f64>) -> Shape {
        Shape::from_vector(&(&self.mean + &self.basis * params))
    }

    /// Least-squares parameters of `shape`.
    pub fn project(&self, shape: &Shape) -> DVector<f64> {
        self.basis.tr_mul(&(shape.as_vector() - &self.mean))
    }

    /// Diagonal of the Tikhonov prior: zero on the global parameters,
    /// `weight / eigenvalue` on each shape weight.
    pub fn prior_weights(&self, weight: f64) -> DVector<f64> {
        let eig = self.model.eigenvalues();
        DVector::from_fn(self.n_parameters(), |i, _| {
            if i < N_GLOBAL_PARAMETERS {
                0.0
            } else {
                weight / eig[i - N_GLOBAL_PARAMETERS]
            }
        })
    }
}

/// Parametric transform driven by an [`OrthoPdm`].
///
/// Holds the current parameters and the shape they produce. It is cheap to
/// create and is owned by a single fitting run.
#[derive(Debug, Clone)]
pub struct Transform<'a> {
    pdm: &'a OrthoPdm,
    params: DVector<f64>,
    target: Shape,
}

impl<'a> Transform<'a> {
    pub fn new(pdm: &'a OrthoPdm) -> Self {
        let params = DVector::zeros(pdm.n_parameters());
        let target = pdm.instance(&params);
        Self {
            pdm,
            params,
            target,
        }
    }

    /// Moves the transform to the parameters closest to `shape`.
    pub fn set_target(&mut self, shape: &Shape) -> Result<()> {
        ensure_len("target landmarks", self.pdm.n_points(), shape.num_landmarks())?;
        self.params = self.pdm.project(shape);
        self.target = self.pdm.instance(&self.params);
        Ok(())
    }

    pub fn target(&self) -> &Shape {
        &self.target
    }

    pub fn as_vector(&self) -> DVector<f64> {
        self.params.clone()
    }

    pub fn from_vector_inplace(&mut self, params: &DVector<f64>) {
        debug_assert_eq!(params.len(), self.pdm.n_parameters());
        self.params.copy_from(params);
        self.target = self.pdm.instance(&self.params);
    }

    pub fn n_parameters(&self) -> usize {
        self.pdm.n_parameters()
    }

    pub fn d_dp(&self) -> &DMatrix<f64> {
        self.pdm.d_dp()
    }
}
