//! Appearance terms: project-out and alternating reconstruction.

use nalgebra::{DMatrix, DVector};

use crate::error::{Error, Result};
use crate::features::ImageAccess;
use crate::model::UnifiedModel;
use crate::types::Shape;

const PINV_EPS: f64 = 1e-10;

/// Pseudo-inverse of the masked appearance basis, `k x masked`.
fn masked_pseudo_inverse(u: &DMatrix<f64>) -> Result<DMatrix<f64>> {
    if u.ncols() == 0 {
        return Ok(DMatrix::zeros(0, u.nrows()));
    }
    u.clone().pseudo_inverse(PINV_EPS).map_err(Error::PseudoInverse)
}

/// Appearance term with the model subspace projected out of the Jacobian.
///
/// Appearance variation never has to be estimated, so the Jacobian and
/// Hessian are fixed for the lifetime of the algorithm.
#[derive(Debug, Clone)]
pub(crate) struct ProjectOut {
    masked_mean: DVector<f64>,
    j_aam: DMatrix<f64>,
    h_aam: DMatrix<f64>,
}

impl ProjectOut {
    pub(crate) fn new(model: &UnifiedModel) -> Result<Self> {
        let interface = model.interface();
        let appearance = model.appearance();

        let u = interface.mask_rows(appearance.components());
        let pinv_u = masked_pseudo_inverse(&u)?;

        let nabla_t = interface.gradient(appearance.mean());
        let dw_dp = interface.dw_dp(model.shape().d_dp());
        let j = interface.steepest_descent_images(&nabla_t, &dw_dp);

        let j_aam = &j - &u * (&pinv_u * &j);
        let h_aam = j_aam.tr_mul(&j);

        Ok(Self {
            masked_mean: interface.mask_vector(appearance.mean()),
            j_aam,
            h_aam,
        })
    }

    pub(crate) fn hessian(&self) -> &DMatrix<f64> {
        &self.h_aam
    }

    /// `J_aam^T e` for the residual between the mean and the warped image.
    pub(crate) fn linearize<I: ImageAccess>(
        &self,
        model: &UnifiedModel,
        image: &I,
        target: &Shape,
    ) -> Result<DVector<f64>> {
        let interface = model.interface();
        let warped = interface.warp(image, target)?;
        let e_aam = &self.masked_mean - interface.mask_vector(&warped);
        Ok(self.j_aam.tr_mul(&e_aam))
    }
}

/// One alternating step: the reconstructed appearance and the Gauss-Newton
/// terms built from it.
pub(crate) struct AlternatingStep {
    pub(crate) appearance_parameters: DVector<f64>,
    pub(crate) h_aam: DMatrix<f64>,
    pub(crate) jr_aam: DVector<f64>,
}

/// Appearance term that reconstructs the template from the warped image
/// every iteration and linearizes around the reconstruction.
#[derive(Debug, Clone)]
pub(crate) struct Alternating {
    masked_mean: DVector<f64>,
    pinv_u: DMatrix<f64>,
    dw_dp: DMatrix<f64>,
    /// Multiplies the steepest-descent images on the Jacobian side.
    jacobian_weight: f64,
}

impl Alternating {
    pub(crate) fn new(model: &UnifiedModel, jacobian_weight: f64) -> Result<Self> {
        let interface = model.interface();
        let appearance = model.appearance();
        let u = interface.mask_rows(appearance.components());
        Ok(Self {
            masked_mean: interface.mask_vector(appearance.mean()),
            pinv_u: masked_pseudo_inverse(&u)?,
            dw_dp: interface.dw_dp(model.shape().d_dp()),
            jacobian_weight,
        })
    }

    pub(crate) fn n_components(&self) -> usize {
        self.pinv_u.nrows()
    }

    pub(crate) fn linearize<I: ImageAccess>(
        &self,
        model: &UnifiedModel,
        image: &I,
        target: &Shape,
    ) -> Result<AlternatingStep> {
        let interface = model.interface();
        let appearance = model.appearance();

        let warped = interface.warp(image, target)?;
        let masked_i = interface.mask_vector(&warped);

        // run-local reconstruction; the model's mean is never touched
        let c = &self.pinv_u * (&masked_i - &self.masked_mean);
        let template = appearance.instance(&c);

        let e_aam = interface.mask_vector(&template) - &masked_i;

        let nabla_t = interface.gradient(&template);
        let j = interface.steepest_descent_images(&nabla_t, &self.dw_dp);
        let j_aam = &j * self.jacobian_weight;
        let h_aam = j_aam.tr_mul(&j);
        let jr_aam = j_aam.tr_mul(&e_aam);

        Ok(AlternatingStep {
            appearance_parameters: c,
            h_aam,
            jr_aam,
        })
    }
}
