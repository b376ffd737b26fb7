use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::error::{ensure_len, Error, Result};
use crate::fourier::{fft2_real, ifft2};
use crate::parts::PartsImage;

/// A bank of per-landmark part classifiers.
///
/// `respond` returns one row-major response map per landmark, each the size
/// of a patch. Higher values mean the landmark is more likely at that pixel.
pub trait PartClassifier {
    fn respond(&self, parts: &PartsImage) -> Vec<Vec<f64>>;

    /// Frequency-domain filters, for classifiers that are correlation filters.
    fn filter_bank(&self) -> Option<&FilterBank> {
        None
    }
}

impl<F> PartClassifier for F
where
    F: Fn(&PartsImage) -> Vec<Vec<f64>>,
{
    fn respond(&self, parts: &PartsImage) -> Vec<Vec<f64>> {
        self(parts)
    }
}

/// Correlation filters stored in the frequency domain.
///
/// Layout is `(n_landmarks, n_offsets, n_channels, height, width)`. Fitting
/// only uses the filters of the first offset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterBank {
    n_landmarks: usize,
    n_offsets: usize,
    n_channels: usize,
    height: usize,
    width: usize,
    filters: Vec<Complex64>,
}

impl FilterBank {
    pub fn new(
        filters: Vec<Complex64>,
        n_landmarks: usize,
        n_offsets: usize,
        n_channels: usize,
        parts_shape: (usize, usize),
    ) -> Result<Self> {
        let (height, width) = parts_shape;
        ensure_len(
            "filter bank",
            n_landmarks * n_offsets * n_channels * height * width,
            filters.len(),
        )?;
        Ok(Self {
            n_landmarks,
            n_offsets,
            n_channels,
            height,
            width,
            filters,
        })
    }

    /// Builds the bank from spatial-domain filters with the same layout.
    pub fn from_spatial(
        spatial: &[f64],
        n_landmarks: usize,
        n_offsets: usize,
        n_channels: usize,
        parts_shape: (usize, usize),
    ) -> Result<Self> {
        let (height, width) = parts_shape;
        let plane = height * width;
        ensure_len(
            "spatial filters",
            n_landmarks * n_offsets * n_channels * plane,
            spatial.len(),
        )?;
        let filters = spatial
            .chunks_exact(plane)
            .flat_map(|f| fft2_real(f, height, width))
            .collect();
        Self::new(filters, n_landmarks, n_offsets, n_channels, parts_shape)
    }

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

    /// Checks that the bank covers a reference frame of `n_landmarks`
    /// patches of `parts_shape` with `n_channels` channels.
    pub fn check_frame(
        &self,
        n_landmarks: usize,
        n_channels: usize,
        parts_shape: (usize, usize),
    ) -> Result<()> {
        ensure_len("filter height", parts_shape.0, self.height)?;
        ensure_len("filter width", parts_shape.1, self.width)?;
        ensure_len("filter landmarks", n_landmarks, self.n_landmarks)?;
        ensure_len("filter channels", n_channels, self.n_channels)?;
        if self.n_offsets == 0 {
            return Err(Error::InvalidModel("Filter bank has no offsets".into()));
        }
        Ok(())
    }

    /// Spectrum of one filter.
    pub fn filter(&self, landmark: usize, offset: usize, channel: usize) -> &[Complex64] {
        let plane = self.height * self.width;
        let start = ((landmark * self.n_offsets + offset) * self.n_channels + channel) * plane;
        &self.filters[start..start + plane]
    }

    /// `sum_c F_c * X_c` for one landmark, given the spectra of its channels.
    pub fn response_spectrum(&self, landmark: usize, spectra: &[Vec<Complex64>]) -> Vec<Complex64> {
        let plane = self.height * self.width;
        let mut response = vec![Complex64::new(0.0, 0.0); plane];
        for (channel, x) in spectra.iter().enumerate().take(self.n_channels) {
            for ((r, f), x) in response
                .iter_mut()
                .zip(self.filter(landmark, 0, channel))
                .zip(x)
            {
                *r += f * x;
            }
        }
        response
    }

    /// Spectra of every channel of one landmark's first-offset patch.
    pub fn part_spectra(&self, parts: &PartsImage, landmark: usize) -> Vec<Vec<Complex64>> {
        (0..parts.n_channels())
            .map(|c| fft2_real(parts.patch(landmark, 0, c), self.height, self.width))
            .collect()
    }
}

impl PartClassifier for FilterBank {
    fn respond(&self, parts: &PartsImage) -> Vec<Vec<f64>> {
        (0..parts.n_landmarks())
            .map(|l| {
                let spectrum = self.response_spectrum(l, &self.part_spectra(parts, l));
                ifft2(&spectrum, self.height, self.width)
                    .into_iter()
                    .map(|v| v.re)
                    .collect()
            })
            .collect()
    }

    fn filter_bank(&self) -> Option<&FilterBank> {
        Some(self)
    }
}

/// Filters' spatial-domain counterpart: `Re(ifft2(F))` for one filter.
pub(crate) fn spatial_filter(bank: &FilterBank, landmark: usize, channel: usize) -> Vec<f64> {
    let (h, w) = bank.parts_shape();
    ifft2(bank.filter(landmark, 0, channel), h, w)
        .into_iter()
        .map(|v| v.re)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FeatureImage;
    use crate::parts::build_parts_image;
    use crate::types::{Point, Shape};

    fn delta_filter(parts_shape: (usize, usize)) -> Vec<f64> {
        let mut f = vec![0.0; parts_shape.0 * parts_shape.1];
        f[0] = 1.0;
        f
    }

    #[test]
    fn delta_filter_reproduces_patch() {
        let parts_shape = (5, 5);
        let bank = FilterBank::from_spatial(&delta_filter(parts_shape), 1, 1, 1, parts_shape).unwrap();
        let image = FeatureImage::from_fn(12, 12, |x, y| ((x * 3 + y) % 7) as f32);
        let shape = Shape::new(vec![Point::new(6.0, 6.0)]);
        let parts = build_parts_image(&image, &shape, parts_shape, &[Point::zero()], false);

        let responses = bank.respond(&parts);
        assert_eq!(responses.len(), 1);
        for (r, p) in responses[0].iter().zip(parts.patch(0, 0, 0)) {
            assert!((r - p).abs() < 1e-9);
        }
    }

    #[test]
    fn spatial_filter_round_trips() {
        let parts_shape = (3, 4);
        let spatial: Vec<f64> = (0..12).map(|i| i as f64 * 0.25).collect();
        let bank = FilterBank::from_spatial(&spatial, 1, 1, 1, parts_shape).unwrap();
        let back = spatial_filter(&bank, 0, 0);
        for (a, b) in back.iter().zip(&spatial) {
            assert!((a - b).abs() < 1e-9);
        }
    }

    #[test]
    fn closures_are_classifiers() {
        let clf = |parts: &PartsImage| vec![vec![1.0; 9]; parts.n_landmarks()];
        let image = FeatureImage::from_fn(8, 8, |_, _| 0.0);
        let shape = Shape::new(vec![Point::new(3.0, 3.0), Point::new(4.0, 4.0)]);
        let parts = build_parts_image(&image, &shape, (3, 3), &[Point::zero()], false);
        assert_eq!(clf.respond(&parts).len(), 2);
        assert!(clf.filter_bank().is_none());
    }

    #[test]
    fn rejects_wrong_filter_length() {
        let result = FilterBank::new(vec![Complex64::new(0.0, 0.0); 8], 1, 1, 1, (3, 3));
        assert!(result.is_err());
    }

    #[test]
    fn frame_check_reports_each_dimension() {
        let bank = FilterBank::from_spatial(&vec![0.0; 3 * 49], 3, 1, 1, (7, 7)).unwrap();
        assert!(bank.check_frame(3, 1, (7, 7)).is_ok());

        for (n_landmarks, n_channels, parts_shape) in
            [(5, 1, (7, 7)), (3, 2, (7, 7)), (3, 1, (9, 9)), (3, 1, (7, 5))]
        {
            let result = bank.check_frame(n_landmarks, n_channels, parts_shape);
            assert!(matches!(result, Err(Error::DimensionMismatch { .. })));
        }
    }
}
