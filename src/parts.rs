use nalgebra::DVector;

use crate::features::{sample_bilinear, ImageAccess};
use crate::grid::SamplingGrid;
use crate::types::{Point, Shape};

/// A stack of patches ("parts") sampled around each landmark.
///
/// Layout is `(n_landmarks, n_offsets, n_channels, height, width)`, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct PartsImage {
    n_landmarks: usize,
    n_offsets: usize,
    n_channels: usize,
    height: usize,
    width: usize,
    pixels: Vec<f64>,
}

impl PartsImage {
    pub fn n_landmarks(&self) -> usize {
        self.n_landmarks
    }

    pub fn n_offsets(&self) -> usize {
        self.n_offsets
    }

    pub fn n_channels(&self) -> usize {
        self.n_channels
    }

    pub fn parts_shape(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    pub fn pixels(&self) -> &[f64] {
        &self.pixels
    }

    /// One row-major `height x width` patch.
    pub fn patch(&self, landmark: usize, offset: usize, channel: usize) -> &[f64] {
        let plane = self.height * self.width;
        let start = ((landmark * self.n_offsets + offset) * self.n_channels + channel) * plane;
        &self.pixels[start..start + plane]
    }

    /// All channels of one landmark/offset, channel-major.
    pub fn part(&self, landmark: usize, offset: usize) -> &[f64] {
        let len = self.n_channels * self.height * self.width;
        let start = (landmark * self.n_offsets + offset) * len;
        &self.pixels[start..start + len]
    }

    pub fn into_vector(self) -> DVector<f64> {
        DVector::from_vec(self.pixels)
    }
}

/// Extracts a patch around every landmark (and every offset from it).
///
/// Each patch is centred on the pixel nearest to `point + offset`; pixels
/// falling outside the image read as zero. With `normalize`, each part
/// is standardized to zero mean and unit deviation across its channels.
pub fn build_parts_image<I: ImageAccess>(
    image: &I,
    shape: &Shape,
    parts_shape: (usize, usize),
    offsets: &[Point],
    normalize: bool,
) -> PartsImage {
    let grid = SamplingGrid::new(parts_shape);
    let (height, width) = parts_shape;
    let n_channels = image.n_channels();
    let n_offsets = offsets.len();
    let part_len = n_channels * height * width;

    let mut pixels = Vec::with_capacity(shape.num_landmarks() * n_offsets * part_len);
    for point in &shape.points {
        for offset in offsets {
            let centre = (*point + *offset).round();
            let start = pixels.len();
            for channel in 0..n_channels {
                for g in grid.offsets() {
                    let p = centre + *g;
                    pixels.push(sample_bilinear(image, p.x, p.y, channel));
                }
            }
            if normalize {
                normalize_part(&mut pixels[start..]);
            }
        }
    }

    PartsImage {
        n_landmarks: shape.num_landmarks(),
        n_offsets,
        n_channels,
        height,
        width,
        pixels,
    }
}

fn normalize_part(part: &mut [f64]) {
    if part.is_empty() {
        return;
    }
    let n = part.len() as f64;
    let mean = part.iter().sum::<f64>() / n;
    let var = part.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
    let std = var.sqrt();
    for v in part.iter_mut() {
        *v -= mean;
        if std > 0.0 {
            *v /= std;
        }
    }
}
