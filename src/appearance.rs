//! Appearance side of the unified model.
//!
//! The reference frame is a parts image: one patch per landmark, sampled at
//! the current shape. Every pixel of a landmark's patch moves with that
//! landmark, so the warp Jacobian of the frame is the shape Jacobian.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::error::{ensure_len, Error, Result};
use crate::features::{gradient, ImageAccess};
use crate::parts::build_parts_image;
use crate::types::{Point, Shape};

/// Linear (PCA) appearance model over the reference frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PcaAppearanceModel {
    mean: DVector<f64>,
    /// `n_pixels x k`, one column per component.
    components: DMatrix<f64>,
    noise_variance: f64,
}

impl PcaAppearanceModel {
    pub fn new(mean: DVector<f64>, components: DMatrix<f64>, noise_variance: f64) -> Result<Self> {
        ensure_len("appearance components rows", mean.len(), components.nrows())?;
        if !(noise_variance.is_finite() && noise_variance > 0.0) {
            return Err(Error::InvalidModel(format!(
                "Appearance noise variance must be positive, got {noise_variance}"
            )));
        }
        Ok(Self {
            mean,
            components,
            noise_variance,
        })
    }

    /// Mean template.
    pub fn mean(&self) -> &DVector<f64> {
        &self.mean
    }

    pub fn components(&self) -> &DMatrix<f64> {
        &self.components
    }

    pub fn noise_variance(&self) -> f64 {
        self.noise_variance
    }

    pub fn n_pixels(&self) -> usize {
        self.mean.len()
    }

    pub fn n_components(&self) -> usize {
        self.components.ncols()
    }

    pub fn instance(&self, weights: &DVector<f64>) -> DVector<f64> {
        &self.mean + &self.components * weights
    }
}

/// Steepest-descent ingredients: template gradient along x and y.
#[derive(Debug, Clone)]
pub struct TemplateGradient {
    pub dx: DVector<f64>,
    pub dy: DVector<f64>,
}

/// Parts-based reference frame: warping, gradients and Jacobians.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartsInterface {
    n_landmarks: usize,
    n_channels: usize,
    parts_shape: (usize, usize),
    normalize_parts: bool,
    /// Indices of the frame pixels that take part in fitting.
    image_vec_mask: Vec<usize>,
}

impl PartsInterface {
    /// `sampling_mask`, when given, selects pixels of a single patch
    /// (row-major, `height * width` entries); it is tiled over every
    /// landmark and channel.
    pub fn new(
        n_landmarks: usize,
        n_channels: usize,
        parts_shape: (usize, usize),
        normalize_parts: bool,
        sampling_mask: Option<&[bool]>,
    ) -> Result<Self> {
        let (height, width) = parts_shape;
        if height == 0 || width == 0 || n_channels == 0 {
            return Err(Error::InvalidModel(format!(
                "Parts shape {height}x{width} with {n_channels} channels is empty"
            )));
        }
        let plane = height * width;
        let keep: Vec<usize> = match sampling_mask {
            Some(mask) => {
                ensure_len("sampling mask", plane, mask.len())?;
                mask.iter()
                    .enumerate()
                    .filter_map(|(i, &m)| m.then_some(i))
                    .collect()
            }
            None => (0..plane).collect(),
        };
        if keep.is_empty() {
            return Err(Error::InvalidModel("Sampling mask selects no pixels".into()));
        }

        let image_vec_mask = (0..n_landmarks * n_channels)
            .flat_map(|block| keep.iter().map(move |&k| block * plane + k))
            .collect();

        Ok(Self {
            n_landmarks,
            n_channels,
            parts_shape,
            normalize_parts,
            image_vec_mask,
        })
    }

    pub fn n_landmarks(&self) -> usize {
        self.n_landmarks
    }

    pub fn n_channels(&self) -> usize {
        self.n_channels
    }

    pub fn parts_shape(&self) -> (usize, usize) {
        self.parts_shape
    }

    pub fn normalize_parts(&self) -> bool {
        self.normalize_parts
    }

    /// Length of a full (unmasked) frame vector.
    pub fn n_pixels(&self) -> usize {
        self.n_landmarks * self.n_channels * self.parts_shape.0 * self.parts_shape.1
    }

    pub fn image_vec_mask(&self) -> &[usize] {
        &self.image_vec_mask
    }

    /// Samples `image` into the reference frame at `target`.
    pub fn warp<I: ImageAccess>(&self, image: &I, target: &Shape) -> Result<DVector<f64>> {
        ensure_len("image channels", self.n_channels, image.n_channels())?;
        ensure_len("warp landmarks", self.n_landmarks, target.num_landmarks())?;
        let parts = build_parts_image(
            image,
            target,
            self.parts_shape,
            &[Point::zero()],
            self.normalize_parts,
        );
        Ok(parts.into_vector())
    }

    /// Gradient of a full frame vector, patch by patch.
    pub fn gradient(&self, template: &DVector<f64>) -> TemplateGradient {
        let (h, w) = self.parts_shape;
        let plane = h * w;
        let mut dx = DVector::zeros(template.len());
        let mut dy = DVector::zeros(template.len());
        for (block, patch) in template.as_slice().chunks_exact(plane).enumerate() {
            let (gx, gy) = gradient(patch, h, w);
            let start = block * plane;
            dx.rows_mut(start, plane).copy_from_slice(&gx);
            dy.rows_mut(start, plane).copy_from_slice(&gy);
        }
        TemplateGradient { dx, dy }
    }

    /// Warp Jacobian, `2n x P` with interleaved `x, y` rows.
    pub fn dw_dp(&self, d_dp: &DMatrix<f64>) -> DMatrix<f64> {
        d_dp.clone()
    }

    /// Steepest-descent images over the masked pixels: `masked x P`.
    pub fn steepest_descent_images(
        &self,
        nabla: &TemplateGradient,
        dw_dp: &DMatrix<f64>,
    ) -> DMatrix<f64> {
        let per_landmark = self.n_channels * self.parts_shape.0 * self.parts_shape.1;
        let n_params = dw_dp.ncols();
        let mut sdi = DMatrix::zeros(self.image_vec_mask.len(), n_params);
        for (row, &idx) in self.image_vec_mask.iter().enumerate() {
            let landmark = idx / per_landmark;
            let (gx, gy) = (nabla.dx[idx], nabla.dy[idx]);
            for p in 0..n_params {
                sdi[(row, p)] =
                    gx * dw_dp[(2 * landmark, p)] + gy * dw_dp[(2 * landmark + 1, p)];
            }
        }
        sdi
    }

    pub fn mask_vector(&self, v: &DVector<f64>) -> DVector<f64> {
        DVector::from_iterator(
            self.image_vec_mask.len(),
            self.image_vec_mask.iter().map(|&i| v[i]),
        )
    }

    pub fn mask_rows(&self, m: &DMatrix<f64>) -> DMatrix<f64> {
        m.select_rows(self.image_vec_mask.iter())
    }
}
