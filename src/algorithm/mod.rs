//! Unified AAM/CLM fitting algorithms.
//!
//! Every algorithm precomputes its fixed matrices when constructed, then
//! iterates Gauss-Newton updates of the shape parameters in [`run`]. The
//! four variants differ in how they treat appearance (project-out vs.
//! alternating reconstruction) and part responses (kernel-weighted mean
//! shift vs. correlation-filter response in the Fourier domain).
//!
//! [`run`]: UnifiedAlgorithm::run

mod aam;
mod lk_inverse;
mod rlms;

use log::{debug, info};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::classifier::PartClassifier;
use crate::error::{Error, Result};
use crate::features::ImageAccess;
use crate::model::UnifiedModel;
use crate::result::FittingResult;
use crate::shape_model::{OrthoPdm, Transform};
use crate::types::Shape;

pub use lk_inverse::{AicLkInverse, PicLkInverse};
pub use rlms::{fill_non_finite, kernel_weights, mean_shift_target, AicRlms, PicRlms};

/// Which member of the algorithm family to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlgorithmKind {
    /// Project-out appearance, kernel-weighted mean-shift parts.
    PicRlms,
    /// Alternating appearance, kernel-weighted mean-shift parts.
    AicRlms,
    /// Project-out appearance, Fourier-domain correlation-filter parts.
    PicLkInverse,
    /// Alternating appearance, Fourier-domain correlation-filter parts.
    AicLkInverse,
}

impl AlgorithmKind {
    pub const ALL: [AlgorithmKind; 4] = [
        AlgorithmKind::PicRlms,
        AlgorithmKind::AicRlms,
        AlgorithmKind::PicLkInverse,
        AlgorithmKind::AicLkInverse,
    ];

    /// Value substituted for non-finite part responses.
    ///
    /// AIC_RLMS uses 1.0 where the others use 0.5; both values are kept as
    /// found, the difference has no known rationale.
    pub fn non_finite_fill(self) -> f64 {
        match self {
            AlgorithmKind::AicRlms => 1.0,
            AlgorithmKind::PicRlms | AlgorithmKind::PicLkInverse | AlgorithmKind::AicLkInverse => {
                0.5
            }
        }
    }

    pub fn is_alternating(self) -> bool {
        matches!(self, AlgorithmKind::AicRlms | AlgorithmKind::AicLkInverse)
    }

    pub fn is_fourier(self) -> bool {
        matches!(self, AlgorithmKind::PicLkInverse | AlgorithmKind::AicLkInverse)
    }
}

/// Construction-time parameters shared by every variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitterConfig {
    /// Variance of the Gaussian kernel/template, in pixels squared.
    pub covariance: f64,
    /// Trust ratio between shape-model noise and kernel bandwidth.
    pub scale: f64,
    /// Kernel lookup resolution, samples per pixel.
    pub factor: usize,
    /// Convergence threshold on the landmark displacement norm.
    pub eps: f64,
    /// Frequencies kept by the Fourier variants (row-major over a patch).
    pub sampling_mask: Option<Vec<bool>>,
}

impl Default for FitterConfig {
    fn default() -> Self {
        Self {
            covariance: 2.0,
            scale: 10.0,
            factor: 100,
            eps: 1e-5,
            sampling_mask: None,
        }
    }
}

/// Per-run options.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RunOptions {
    pub max_iters: usize,
    /// Use noise-variance weights plus the shape prior instead of `a`.
    pub prior: bool,
    /// Appearance weight of the no-prior update; parts get `1 - a`.
    pub a: f64,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            max_iters: 20,
            prior: false,
            a: 0.5,
        }
    }
}

impl RunOptions {
    pub fn with_max_iters(mut self, max_iters: usize) -> Self {
        self.max_iters = max_iters;
        self
    }

    pub fn with_prior(mut self, prior: bool) -> Self {
        self.prior = prior;
        self
    }

    pub fn with_mixing(mut self, a: f64) -> Self {
        self.a = a;
        self
    }
}

/// The capability every fitting algorithm provides.
pub trait UnifiedAlgorithm {
    fn kind(&self) -> AlgorithmKind;

    fn model(&self) -> &UnifiedModel;

    /// Fits the model to `image` starting from `initial_shape`.
    fn run<I: ImageAccess>(
        &self,
        image: &I,
        initial_shape: &Shape,
        gt_shape: Option<&Shape>,
        options: &RunOptions,
    ) -> Result<FittingResult>;
}

/// One of the four algorithms, selected at construction.
pub enum Fitter<'m, C> {
    PicRlms(PicRlms<'m, C>),
    AicRlms(AicRlms<'m, C>),
    PicLkInverse(PicLkInverse<'m>),
    AicLkInverse(AicLkInverse<'m>),
}

impl<'m, C: PartClassifier> Fitter<'m, C> {
    /// Builds the requested algorithm and runs its precomputation.
    ///
    /// The Fourier variants need a classifier that exposes a
    /// [`FilterBank`](crate::FilterBank).
    pub fn new(
        kind: AlgorithmKind,
        model: &'m UnifiedModel,
        classifier: &'m C,
        config: FitterConfig,
    ) -> Result<Self> {
        let filter_bank = move || {
            classifier.filter_bank().ok_or_else(|| {
                Error::InvalidModel(format!("{kind:?} requires correlation filter classifiers"))
            })
        };
        Ok(match kind {
            AlgorithmKind::PicRlms => Fitter::PicRlms(PicRlms::new(model, classifier, config)?),
            AlgorithmKind::AicRlms => Fitter::AicRlms(AicRlms::new(model, classifier, config)?),
            AlgorithmKind::PicLkInverse => {
                Fitter::PicLkInverse(PicLkInverse::new(model, filter_bank()?, config)?)
            }
            AlgorithmKind::AicLkInverse => {
                Fitter::AicLkInverse(AicLkInverse::new(model, filter_bank()?, config)?)
            }
        })
    }
}

impl<'m, C: PartClassifier> UnifiedAlgorithm for Fitter<'m, C> {
    fn kind(&self) -> AlgorithmKind {
        match self {
            Fitter::PicRlms(a) => a.kind(),
            Fitter::AicRlms(a) => a.kind(),
            Fitter::PicLkInverse(a) => a.kind(),
            Fitter::AicLkInverse(a) => a.kind(),
        }
    }

    fn model(&self) -> &UnifiedModel {
        match self {
            Fitter::PicRlms(a) => a.model(),
            Fitter::AicRlms(a) => a.model(),
            Fitter::PicLkInverse(a) => a.model(),
            Fitter::AicLkInverse(a) => a.model(),
        }
    }

    fn run<I: ImageAccess>(
        &self,
        image: &I,
        initial_shape: &Shape,
        gt_shape: Option<&Shape>,
        options: &RunOptions,
    ) -> Result<FittingResult> {
        match self {
            Fitter::PicRlms(a) => a.run(image, initial_shape, gt_shape, options),
            Fitter::AicRlms(a) => a.run(image, initial_shape, gt_shape, options),
            Fitter::PicLkInverse(a) => a.run(image, initial_shape, gt_shape, options),
            Fitter::AicLkInverse(a) => a.run(image, initial_shape, gt_shape, options),
        }
    }
}

/// Diagonal Tikhonov prior on the shape weights.
#[derive(Debug, Clone)]
pub(crate) struct Prior {
    j: DVector<f64>,
    h: DMatrix<f64>,
}

impl Prior {
    pub(crate) fn new(pdm: &OrthoPdm, weight: f64) -> Self {
        let j = pdm.prior_weights(weight);
        let h = DMatrix::from_diagonal(&j);
        Self { j, h }
    }
}

/// How the appearance and part terms are combined.
pub(crate) enum Weighting<'a> {
    /// `a` on appearance, `1 - a` on parts.
    Mixed { a: f64 },
    /// Noise-variance weights plus the prior centred at `params`.
    Prior {
        rho2: f64,
        sigma2: f64,
        prior: &'a Prior,
        params: &'a DVector<f64>,
    },
}

impl<'a> Weighting<'a> {
    pub(crate) fn select(
        options: &RunOptions,
        rho2: f64,
        sigma2: f64,
        prior: &'a Prior,
        params: &'a DVector<f64>,
    ) -> Self {
        if options.prior {
            Weighting::Prior {
                rho2,
                sigma2,
                prior,
                params,
            }
        } else {
            Weighting::Mixed { a: options.a }
        }
    }
}

/// Solves the combined Gauss-Newton system for the parameter update.
pub(crate) fn gauss_newton_update(
    h_aam: &DMatrix<f64>,
    jr_aam: &DVector<f64>,
    h_clm: &DMatrix<f64>,
    jr_clm: &DVector<f64>,
    weighting: Weighting<'_>,
    iteration: usize,
) -> Result<DVector<f64>> {
    let (h, b, sign) = match weighting {
        Weighting::Mixed { a } => (
            h_aam * a + h_clm * (1.0 - a),
            jr_aam * a + jr_clm * (1.0 - a),
            1.0,
        ),
        Weighting::Prior {
            rho2,
            sigma2,
            prior,
            params,
        } => (
            h_aam * rho2 + h_clm * sigma2 + &prior.h,
            prior.j.component_mul(params) - jr_aam * rho2 - jr_clm * sigma2,
            -1.0,
        ),
    };

    h.lu()
        .solve(&b)
        .filter(|dp| dp.iter().all(|v| v.is_finite()))
        .map(|dp| dp * sign)
        .ok_or(Error::IllConditioned { iteration })
}

/// Drives the iteration shared by every variant.
///
/// `step` returns the parameter update for the current transform. The
/// returned trajectory starts with the initial parameters; the flag tells
/// whether the displacement fell below `eps` before the budget ran out.
pub(crate) fn iterate<F>(
    kind: AlgorithmKind,
    pdm: &OrthoPdm,
    initial_shape: &Shape,
    options: &RunOptions,
    eps: f64,
    mut step: F,
) -> Result<(Vec<DVector<f64>>, bool)>
where
    F: FnMut(usize, &Transform<'_>) -> Result<DVector<f64>>,
{
    let mut transform = Transform::new(pdm);
    transform.set_target(initial_shape)?;
    let mut shape_parameters = vec![transform.as_vector()];

    for iteration in 0..options.max_iters {
        let dp = step(iteration, &transform)?;

        let previous = transform.target().clone();
        let params = transform.as_vector() + dp;
        transform.from_vector_inplace(&params);
        shape_parameters.push(params);

        let error = previous.displacement_norm(transform.target()).abs();
        debug!("{kind:?} iteration {iteration}: landmark displacement {error:.3e}");
        if error < eps {
            info!("{kind:?} converged after {} iterations", iteration + 1);
            return Ok((shape_parameters, true));
        }
    }
    Ok((shape_parameters, false))
}
