//! Regularized landmark mean-shift (RLMS) variants.
//!
//! Part responses are multiplied by a Gaussian kernel centred on the
//! current landmark, normalized into a weight map, and the weighted
//! centroid of the patch pixels becomes the landmark's target.

use log::debug;
use nalgebra::{DMatrix, DVector};

use super::aam::{Alternating, ProjectOut};
use super::{
    gauss_newton_update, iterate, AlgorithmKind, FitterConfig, Prior, RunOptions,
    UnifiedAlgorithm, Weighting,
};
use crate::classifier::PartClassifier;
use crate::error::{ensure_len, Result};
use crate::features::ImageAccess;
use crate::grid::{GaussianDensity, KernelGrid, SamplingGrid};
use crate::model::UnifiedModel;
use crate::parts::build_parts_image;
use crate::result::FittingResult;
use crate::types::{Point, Shape};

/// Replaces every non-finite value with `value`; returns how many changed.
pub fn fill_non_finite(response: &mut [f64], value: f64) -> usize {
    let mut count = 0;
    for r in response.iter_mut().filter(|r| !r.is_finite()) {
        *r = value;
        count += 1;
    }
    count
}

/// Product of response and kernel, normalized to sum to one.
///
/// A product that sums to zero carries no information; the kernel alone
/// is used instead, so the landmark stays where the kernel is centred.
pub fn kernel_weights(response: &[f64], kernel: &[f64]) -> Vec<f64> {
    debug_assert_eq!(response.len(), kernel.len());
    let weights: Vec<f64> = response.iter().zip(kernel).map(|(r, k)| r * k).collect();
    let total: f64 = weights.iter().sum();
    if total != 0.0 && total.is_finite() {
        return weights.into_iter().map(|w| w / total).collect();
    }

    let total: f64 = kernel.iter().sum();
    if total > 0.0 && total.is_finite() {
        kernel.iter().map(|k| k / total).collect()
    } else {
        vec![1.0 / kernel.len() as f64; kernel.len()]
    }
}

/// Weighted centroid of the patch pixel positions around `centre`.
pub fn mean_shift_target(weights: &[f64], centre: Point, grid: &SamplingGrid) -> Point {
    weights
        .iter()
        .zip(grid.offsets())
        .fold(Point::zero(), |acc, (w, g)| acc + (centre + *g) * *w)
}

/// Direct-space part term shared by both RLMS variants.
#[derive(Debug, Clone)]
struct MeanShift {
    grid: SamplingGrid,
    kernel: KernelGrid,
    parts_shape: (usize, usize),
    normalize_parts: bool,
    fill: f64,
}

impl MeanShift {
    /// Correlation-filter classifiers are checked against the reference
    /// frame here, since their responses are only sized at run time.
    fn new<C: PartClassifier>(
        model: &UnifiedModel,
        classifier: &C,
        density: &GaussianDensity,
        factor: usize,
        fill: f64,
    ) -> Result<Self> {
        let interface = model.interface();
        let parts_shape = model.parts_shape();
        if let Some(bank) = classifier.filter_bank() {
            bank.check_frame(model.num_landmarks(), interface.n_channels(), parts_shape)?;
        }
        let grid = SamplingGrid::new(parts_shape);
        let kernel = KernelGrid::new(density, &grid, factor);
        Ok(Self {
            grid,
            kernel,
            parts_shape,
            normalize_parts: interface.normalize_parts(),
            fill,
        })
    }

    /// Mean-shift targets minus the current landmarks, interleaved `x, y`.
    fn residual<I: ImageAccess, C: PartClassifier>(
        &self,
        image: &I,
        target: &Shape,
        classifier: &C,
    ) -> Result<DVector<f64>> {
        let parts = build_parts_image(
            image,
            target,
            self.parts_shape,
            &[Point::zero()],
            self.normalize_parts,
        );
        let responses = classifier.respond(&parts);
        ensure_len("classifier responses", target.num_landmarks(), responses.len())?;

        let mut e_clm = DVector::zeros(2 * target.num_landmarks());
        let mut substituted = 0;
        for (l, (point, mut response)) in target.points.iter().zip(responses).enumerate() {
            ensure_len("response map", self.grid.len(), response.len())?;
            substituted += fill_non_finite(&mut response, self.fill);

            let centre = point.round();
            let kernel = self.kernel.weights(centre - *point);
            let weights = kernel_weights(&response, &kernel);
            let shifted = mean_shift_target(&weights, centre, &self.grid);

            e_clm[2 * l] = shifted.x - point.x;
            e_clm[2 * l + 1] = shifted.y - point.y;
        }
        if substituted > 0 {
            debug!("replaced {substituted} non-finite part responses with {}", self.fill);
        }
        Ok(e_clm)
    }
}

/// Project-Out Inverse Compositional appearance with RLMS parts.
pub struct PicRlms<'m, C> {
    model: &'m UnifiedModel,
    classifier: &'m C,
    eps: f64,
    appearance: ProjectOut,
    mean_shift: MeanShift,
    j_clm: DMatrix<f64>,
    h_clm: DMatrix<f64>,
    prior: Prior,
    rho2: f64,
    sigma2: f64,
}

impl<'m, C: PartClassifier> PicRlms<'m, C> {
    pub fn new(model: &'m UnifiedModel, classifier: &'m C, config: FitterConfig) -> Result<Self> {
        let appearance = ProjectOut::new(model)?;
        let sigma2 = model.appearance().noise_variance();

        let pdm = model.shape();
        let rho2 = pdm.model().noise_variance();
        let density = GaussianDensity::isotropic(config.scale * rho2)?;
        let mean_shift = MeanShift::new(
            model,
            classifier,
            &density,
            config.factor,
            AlgorithmKind::PicRlms.non_finite_fill(),
        )?;

        let j_clm = pdm.d_dp().clone();
        let h_clm = j_clm.tr_mul(&j_clm);

        Ok(Self {
            model,
            classifier,
            eps: config.eps,
            appearance,
            mean_shift,
            j_clm,
            h_clm,
            prior: Prior::new(pdm, rho2 * sigma2),
            rho2,
            sigma2,
        })
    }
}

impl<'m, C: PartClassifier> UnifiedAlgorithm for PicRlms<'m, C> {
    fn kind(&self) -> AlgorithmKind {
        AlgorithmKind::PicRlms
    }

    fn model(&self) -> &UnifiedModel {
        self.model
    }

    fn run<I: ImageAccess>(
        &self,
        image: &I,
        initial_shape: &Shape,
        gt_shape: Option<&Shape>,
        options: &RunOptions,
    ) -> Result<FittingResult> {
        let pdm = self.model.shape();
        let (shape_parameters, converged) = iterate(
            self.kind(),
            pdm,
            initial_shape,
            options,
            self.eps,
            |iteration, transform| {
                let target = transform.target();
                let jr_aam = self.appearance.linearize(self.model, image, target)?;

                let e_clm = self.mean_shift.residual(image, target, self.classifier)?;
                let jr_clm = self.j_clm.tr_mul(&e_clm);

                let params = transform.as_vector();
                let weighting =
                    Weighting::select(options, self.rho2, self.sigma2, &self.prior, &params);
                gauss_newton_update(
                    self.appearance.hessian(),
                    &jr_aam,
                    &self.h_clm,
                    &jr_clm,
                    weighting,
                    iteration,
                )
            },
        )?;

        Ok(FittingResult::new(
            self.kind(),
            pdm,
            shape_parameters,
            None,
            gt_shape.cloned(),
            converged,
        ))
    }
}

/// Alternating Inverse Compositional appearance with RLMS parts.
///
/// Both Jacobians are scaled by `1 / rho2` and the kernel bandwidth is
/// `covariance / rho2`; the prior weighs each shape weight by its inverse
/// eigenvalue.
pub struct AicRlms<'m, C> {
    model: &'m UnifiedModel,
    classifier: &'m C,
    eps: f64,
    appearance: Alternating,
    mean_shift: MeanShift,
    j_clm: DMatrix<f64>,
    h_clm: DMatrix<f64>,
    prior: Prior,
}

impl<'m, C: PartClassifier> AicRlms<'m, C> {
    pub fn new(model: &'m UnifiedModel, classifier: &'m C, config: FitterConfig) -> Result<Self> {
        let pdm = model.shape();
        let rho2 = pdm.model().noise_variance();
        let appearance = Alternating::new(model, 1.0 / rho2)?;

        let density = GaussianDensity::isotropic(config.covariance / rho2)?;
        let mean_shift = MeanShift::new(
            model,
            classifier,
            &density,
            config.factor,
            AlgorithmKind::AicRlms.non_finite_fill(),
        )?;

        let d_dp = pdm.d_dp();
        let j_clm = d_dp / rho2;
        let h_clm = j_clm.tr_mul(d_dp);

        Ok(Self {
            model,
            classifier,
            eps: config.eps,
            appearance,
            mean_shift,
            j_clm,
            h_clm,
            prior: Prior::new(pdm, 1.0),
        })
    }
}

impl<'m, C: PartClassifier> UnifiedAlgorithm for AicRlms<'m, C> {
    fn kind(&self) -> AlgorithmKind {
        AlgorithmKind::AicRlms
    }

    fn model(&self) -> &UnifiedModel {
        self.model
    }

    fn run<I: ImageAccess>(
        &self,
        image: &I,
        initial_shape: &Shape,
        gt_shape: Option<&Shape>,
        options: &RunOptions,
    ) -> Result<FittingResult> {
        let pdm = self.model.shape();
        let mut appearance_parameters = vec![DVector::zeros(self.appearance.n_components())];
        let (shape_parameters, converged) = iterate(
            self.kind(),
            pdm,
            initial_shape,
            options,
            self.eps,
            |iteration, transform| {
                let target = transform.target();
                let step = self.appearance.linearize(self.model, image, target)?;
                appearance_parameters.push(step.appearance_parameters);

                let e_clm = self.mean_shift.residual(image, target, self.classifier)?;
                let jr_clm = self.j_clm.tr_mul(&e_clm);

                // noise ratios are already folded into the Jacobians
                let params = transform.as_vector();
                let weighting = Weighting::select(options, 1.0, 1.0, &self.prior, &params);
                gauss_newton_update(
                    &step.h_aam,
                    &step.jr_aam,
                    &self.h_clm,
                    &jr_clm,
                    weighting,
                    iteration,
                )
            },
        )?;

        Ok(FittingResult::new(
            self.kind(),
            pdm,
            shape_parameters,
            Some(appearance_parameters),
            gt_shape.cloned(),
            converged,
        ))
    }
}
