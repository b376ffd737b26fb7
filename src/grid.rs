//! Sampling grids and Gaussian kernels over a patch.
//!
//! The sampling grid gives the offset of every patch pixel from the patch
//! centre. It is used both as literal pixel offsets (where a landmark's
//! patch samples the image) and as evaluation points for the Gaussian
//! density that weights part responses.

use std::f64::consts::PI;

use crate::error::{Error, Result};
use crate::types::Point;

/// Offsets of every cell of an `height x width` patch from its centre.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplingGrid {
    height: usize,
    width: usize,
    offsets: Vec<Point>,
}

impl SamplingGrid {
    /// Builds the grid for a `(height, width)` patch shape.
    ///
    /// Cell `(r, c)` sits at `(c - (width-1)/2, r - (height-1)/2)`, so odd
    /// sizes give integer offsets and the centroid is always the origin.
    pub fn new(parts_shape: (usize, usize)) -> Self {
        let (height, width) = parts_shape;
        let cy = (height as f64 - 1.0) / 2.0;
        let cx = (width as f64 - 1.0) / 2.0;
        let mut offsets = Vec::with_capacity(height * width);
        for r in 0..height {
            for c in 0..width {
                offsets.push(Point::new(c as f64 - cx, r as f64 - cy));
            }
        }
        Self {
            height,
            width,
            offsets,
        }
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    pub fn get(&self, row: usize, col: usize) -> Point {
        self.offsets[row * self.width + col]
    }

    /// Row-major offsets.
    pub fn offsets(&self) -> &[Point] {
        &self.offsets
    }

    /// The grid as an `(height, width, 2)` array of `[x, y]` pairs.
    pub fn to_array(&self) -> Vec<Vec<[f64; 2]>> {
        self.offsets
            .chunks(self.width.max(1))
            .map(|row| row.iter().map(|p| [p.x, p.y]).collect())
            .collect()
    }
}

/// Builds the sampling grid for a patch shape.
pub fn build_sampling_grid(parts_shape: (usize, usize)) -> SamplingGrid {
    SamplingGrid::new(parts_shape)
}

/// Zero-mean isotropic bivariate normal density.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GaussianDensity {
    variance: f64,
}

impl GaussianDensity {
    /// Covariance is `variance * I`.
    pub fn isotropic(variance: f64) -> Result<Self> {
        if !(variance.is_finite() && variance > 0.0) {
            return Err(Error::InvalidModel(format!(
                "Gaussian kernel variance must be positive, got {variance}"
            )));
        }
        Ok(Self { variance })
    }

    pub fn variance(&self) -> f64 {
        self.variance
    }

    /// Marginal density along one axis.
    pub fn pdf_1d(&self, t: f64) -> f64 {
        (-t * t / (2.0 * self.variance)).exp() / (2.0 * PI * self.variance).sqrt()
    }

    pub fn pdf(&self, p: Point) -> f64 {
        (-(p.x * p.x + p.y * p.y) / (2.0 * self.variance)).exp() / (2.0 * PI * self.variance)
    }
}

/// The response map a part classifier is trained to produce: the density
/// evaluated over the grid, shifted by `offset`. Row-major.
pub fn desired_response(density: &GaussianDensity, grid: &SamplingGrid, offset: Point) -> Vec<f64> {
    grid.offsets()
        .iter()
        .map(|&g| density.pdf(g + offset))
        .collect()
}

/// Lookup table of a Gaussian density over an up-sampled patch grid.
///
/// The table holds `factor` samples per pixel. A landmark whose position
/// is `shift` pixels away from the centre of its patch reads its kernel
/// weights with the shift quantized to `1 / factor`. The density is
/// separable, so one table per axis is enough.
#[derive(Debug, Clone)]
pub struct KernelGrid {
    factor: usize,
    grid: SamplingGrid,
    row_table: Vec<f64>,
    col_table: Vec<f64>,
    row_half: i64,
    col_half: i64,
}

impl KernelGrid {
    pub fn new(density: &GaussianDensity, grid: &SamplingGrid, factor: usize) -> Self {
        let factor = factor.max(1);
        let row_half = (factor * (grid.height() + 1) / 2) as i64;
        let col_half = (factor * (grid.width() + 1) / 2) as i64;
        let table = |half: i64| -> Vec<f64> {
            (-half..=half)
                .map(|i| density.pdf_1d(i as f64 / factor as f64))
                .collect()
        };
        Self {
            factor,
            grid: grid.clone(),
            row_table: table(row_half),
            col_table: table(col_half),
            row_half,
            col_half,
        }
    }

    pub fn factor(&self) -> usize {
        self.factor
    }

    /// Kernel weights over the patch for a sub-pixel `shift`, i.e. the
    /// density at `offset + shift` for every grid offset. Row-major.
    pub fn weights(&self, shift: Point) -> Vec<f64> {
        let f = self.factor as f64;
        let qx = (shift.x * f).round() as i64;
        let qy = (shift.y * f).round() as i64;
        let lookup = |table: &[f64], half: i64, t: f64, q: i64| -> f64 {
            let idx = ((t * f).round() as i64 + q + half).clamp(0, 2 * half);
            table[idx as usize]
        };
        self.grid
            .offsets()
            .iter()
            .map(|g| {
                lookup(&self.row_table, self.row_half, g.y, qy)
                    * lookup(&self.col_table, self.col_half, g.x, qx)
            })
            .collect()
    }
}
