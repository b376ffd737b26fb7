use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use crate::algorithm::AlgorithmKind;
use crate::metrics::normalized_error;
use crate::shape_model::OrthoPdm;
use crate::types::Shape;

/// Outcome of a single fitting run.
///
/// The shape-parameter trajectory always starts with the parameters of the
/// initial shape, so it holds `n_iters() + 1` entries. Alternating variants
/// also record the reconstructed appearance weights, starting from zero.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FittingResult {
    kind: AlgorithmKind,
    shape_parameters: Vec<DVector<f64>>,
    appearance_parameters: Option<Vec<DVector<f64>>>,
    shapes: Vec<Shape>,
    gt_shape: Option<Shape>,
    converged: bool,
}

impl FittingResult {
    pub(crate) fn new(
        kind: AlgorithmKind,
        pdm: &OrthoPdm,
        shape_parameters: Vec<DVector<f64>>,
        appearance_parameters: Option<Vec<DVector<f64>>>,
        gt_shape: Option<Shape>,
        converged: bool,
    ) -> Self {
        let shapes = shape_parameters.iter().map(|p| pdm.instance(p)).collect();
        Self {
            kind,
            shape_parameters,
            appearance_parameters,
            shapes,
            gt_shape,
            converged,
        }
    }

    pub fn kind(&self) -> AlgorithmKind {
        self.kind
    }

    pub fn shape_parameters(&self) -> &[DVector<f64>] {
        &self.shape_parameters
    }

    pub fn appearance_parameters(&self) -> Option<&[DVector<f64>]> {
        self.appearance_parameters.as_deref()
    }

    /// Landmarks after every iteration, starting with the initial shape.
    pub fn shapes(&self) -> &[Shape] {
        &self.shapes
    }

    pub fn initial_shape(&self) -> &Shape {
        &self.shapes[0]
    }

    pub fn final_shape(&self) -> &Shape {
        &self.shapes[self.shapes.len() - 1]
    }

    pub fn gt_shape(&self) -> Option<&Shape> {
        self.gt_shape.as_ref()
    }

    /// Number of updates applied.
    pub fn n_iters(&self) -> usize {
        self.shapes.len() - 1
    }

    /// Whether the run stopped because the update fell below the threshold.
    pub fn converged(&self) -> bool {
        self.converged
    }

    /// Normalized error of every recorded shape against the ground truth.
    pub fn errors(&self) -> Option<Vec<f64>> {
        let gt = self.gt_shape.as_ref()?;
        self.shapes.iter().map(|s| normalized_error(s, gt)).collect()
    }

    pub fn initial_error(&self) -> Option<f64> {
        normalized_error(self.initial_shape(), self.gt_shape.as_ref()?)
    }

    pub fn final_error(&self) -> Option<f64> {
        normalized_error(self.final_shape(), self.gt_shape.as_ref()?)
    }
}
