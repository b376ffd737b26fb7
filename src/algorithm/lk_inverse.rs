//! Correlation-filter part term evaluated in the Fourier domain.

use log::debug;
use nalgebra::{DMatrix, DVector};
use num_complex::Complex64;

use super::aam::{Alternating, ProjectOut};
use super::{
    gauss_newton_update, iterate, AlgorithmKind, FitterConfig, Prior, RunOptions,
    UnifiedAlgorithm, Weighting,
};
use crate::classifier::{spatial_filter, FilterBank};
use crate::error::{ensure_len, Error, Result};
use crate::features::ImageAccess;
use crate::fourier::{circular_gradient, fft2_real};
use crate::grid::{desired_response, GaussianDensity, SamplingGrid};
use crate::model::UnifiedModel;
use crate::parts::build_parts_image;
use crate::result::FittingResult;
use crate::types::{Point, Shape};

/// Replaces non-finite frequencies with `value + 0i`; returns how many changed.
fn fill_non_finite_spectrum(spectrum: &mut [Complex64], value: f64) -> usize {
    let mut count = 0;
    for z in spectrum.iter_mut().filter(|z| !z.is_finite()) {
        *z = Complex64::new(value, 0.0);
        count += 1;
    }
    count
}

/// Fourier part term shared by both LK-inverse variants.
///
/// The residual is the gap between the desired Gaussian response and the
/// filter response, both as spectra restricted to the kept frequencies.
/// Its Jacobian puts the gradient on the filter side, so the per-filter
/// part `fft2(grad f) * dW/dp` is fixed and only the patch spectra change.
/// The filter gradient wraps around the patch like the convolution does.
struct FourierTerm<'m> {
    bank: &'m FilterBank,
    parts_shape: (usize, usize),
    normalize_parts: bool,
    /// Indices of the kept frequencies in a row-major patch spectrum.
    frequencies: Vec<usize>,
    template: DVector<Complex64>,
    /// One `frequencies x P` matrix per landmark and channel.
    filter_jacobians: Vec<DMatrix<Complex64>>,
    fill: f64,
}

impl<'m> FourierTerm<'m> {
    fn new(
        model: &UnifiedModel,
        bank: &'m FilterBank,
        config: &FitterConfig,
        fill: f64,
    ) -> Result<Self> {
        let interface = model.interface();
        let (height, width) = model.parts_shape();
        bank.check_frame(model.num_landmarks(), interface.n_channels(), (height, width))?;

        let plane = height * width;
        let frequencies: Vec<usize> = match &config.sampling_mask {
            Some(mask) => {
                ensure_len("frequency mask", plane, mask.len())?;
                mask.iter()
                    .enumerate()
                    .filter_map(|(i, &m)| m.then_some(i))
                    .collect()
            }
            None => (0..plane).collect(),
        };
        if frequencies.is_empty() {
            return Err(Error::InvalidModel("Frequency mask selects nothing".into()));
        }

        let density = GaussianDensity::isotropic(config.covariance)?;
        let grid = SamplingGrid::new((height, width));
        let spectrum = fft2_real(&desired_response(&density, &grid, Point::zero()), height, width);
        let template =
            DVector::from_iterator(frequencies.len(), frequencies.iter().map(|&k| spectrum[k]));

        let dw_dp = interface.dw_dp(model.shape().d_dp());
        let n_params = dw_dp.ncols();
        let mut filter_jacobians = Vec::with_capacity(bank.n_landmarks() * bank.n_channels());
        for landmark in 0..bank.n_landmarks() {
            for channel in 0..bank.n_channels() {
                let (gx, gy) =
                    circular_gradient(&spatial_filter(bank, landmark, channel), height, width);
                let gx = fft2_real(&gx, height, width);
                let gy = fft2_real(&gy, height, width);
                filter_jacobians.push(DMatrix::from_fn(frequencies.len(), n_params, |r, p| {
                    let k = frequencies[r];
                    gx[k] * dw_dp[(2 * landmark, p)] + gy[k] * dw_dp[(2 * landmark + 1, p)]
                }));
            }
        }

        Ok(Self {
            bank,
            parts_shape: (height, width),
            normalize_parts: interface.normalize_parts(),
            frequencies,
            template,
            filter_jacobians,
            fill,
        })
    }

    /// `(Re(J^H J), Re(J^H e))` summed over landmarks.
    fn linearize<I: ImageAccess>(
        &self,
        image: &I,
        target: &Shape,
        n_params: usize,
    ) -> Result<(DMatrix<f64>, DVector<f64>)> {
        let parts = build_parts_image(
            image,
            target,
            self.parts_shape,
            &[Point::zero()],
            self.normalize_parts,
        );
        ensure_len("image channels", self.bank.n_channels(), parts.n_channels())?;
        ensure_len("target landmarks", self.bank.n_landmarks(), parts.n_landmarks())?;

        let n_channels = self.bank.n_channels();
        let n_freq = self.frequencies.len();
        let mut h_clm = DMatrix::zeros(n_params, n_params);
        let mut jr_clm = DVector::zeros(n_params);
        let mut substituted = 0;

        for landmark in 0..parts.n_landmarks() {
            let spectra = self.bank.part_spectra(&parts, landmark);
            let mut response = self.bank.response_spectrum(landmark, &spectra);
            substituted += fill_non_finite_spectrum(&mut response, self.fill);

            let e = DVector::from_fn(n_freq, |r, _| {
                self.template[r] - response[self.frequencies[r]]
            });

            let mut j = DMatrix::<Complex64>::zeros(n_freq, n_params);
            for (channel, x) in spectra.iter().enumerate() {
                let jf = &self.filter_jacobians[landmark * n_channels + channel];
                for (r, &k) in self.frequencies.iter().enumerate() {
                    let xk = x[k];
                    for p in 0..n_params {
                        j[(r, p)] += xk * jf[(r, p)];
                    }
                }
            }

            h_clm += j.ad_mul(&j).map(|z| z.re);
            jr_clm += j.ad_mul(&e).map(|z| z.re);
        }
        if substituted > 0 {
            debug!("replaced {substituted} non-finite response frequencies with {}", self.fill);
        }
        Ok((h_clm, jr_clm))
    }
}

/// Project-Out Inverse Compositional appearance with Fourier parts.
pub struct PicLkInverse<'m> {
    model: &'m UnifiedModel,
    eps: f64,
    appearance: ProjectOut,
    parts: FourierTerm<'m>,
    prior: Prior,
    rho2: f64,
    sigma2: f64,
}

impl<'m> PicLkInverse<'m> {
    pub fn new(model: &'m UnifiedModel, filters: &'m FilterBank, config: FitterConfig) -> Result<Self> {
        let appearance = ProjectOut::new(model)?;
        let parts = FourierTerm::new(
            model,
            filters,
            &config,
            AlgorithmKind::PicLkInverse.non_finite_fill(),
        )?;

        let pdm = model.shape();
        let rho2 = pdm.model().noise_variance();
        let sigma2 = model.appearance().noise_variance();
        Ok(Self {
            model,
            eps: config.eps,
            appearance,
            parts,
            prior: Prior::new(pdm, rho2 * sigma2),
            rho2,
            sigma2,
        })
    }

    pub fn filter_bank(&self) -> &FilterBank {
        self.parts.bank
    }
}

impl<'m> UnifiedAlgorithm for PicLkInverse<'m> {
    fn kind(&self) -> AlgorithmKind {
        AlgorithmKind::PicLkInverse
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
        let n_params = pdm.n_parameters();
        let (shape_parameters, converged) = iterate(
            self.kind(),
            pdm,
            initial_shape,
            options,
            self.eps,
            |iteration, transform| {
                let target = transform.target();
                let jr_aam = self.appearance.linearize(self.model, image, target)?;
                let (h_clm, jr_clm) = self.parts.linearize(image, target, n_params)?;

                let params = transform.as_vector();
                let weighting =
                    Weighting::select(options, self.rho2, self.sigma2, &self.prior, &params);
                gauss_newton_update(
                    self.appearance.hessian(),
                    &jr_aam,
                    &h_clm,
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

/// Alternating Inverse Compositional appearance with Fourier parts.
///
/// Shape noise enters scaled by `scale`, which loosens the parts' hold on
/// the shape relative to the appearance term.
pub struct AicLkInverse<'m> {
    model: &'m UnifiedModel,
    eps: f64,
    appearance: Alternating,
    parts: FourierTerm<'m>,
    prior: Prior,
    rho2: f64,
    sigma2: f64,
}

impl<'m> AicLkInverse<'m> {
    pub fn new(model: &'m UnifiedModel, filters: &'m FilterBank, config: FitterConfig) -> Result<Self> {
        let appearance = Alternating::new(model, 1.0)?;
        let parts = FourierTerm::new(
            model,
            filters,
            &config,
            AlgorithmKind::AicLkInverse.non_finite_fill(),
        )?;

        let pdm = model.shape();
        let rho2 = config.scale * pdm.model().noise_variance();
        let sigma2 = model.appearance().noise_variance();
        Ok(Self {
            model,
            eps: config.eps,
            appearance,
            parts,
            prior: Prior::new(pdm, rho2 * sigma2),
            rho2,
            sigma2,
        })
    }

    pub fn filter_bank(&self) -> &FilterBank {
        self.parts.bank
    }
}

impl<'m> UnifiedAlgorithm for AicLkInverse<'m> {
    fn kind(&self) -> AlgorithmKind {
        AlgorithmKind::AicLkInverse
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
        let n_params = pdm.n_parameters();
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
                let (h_clm, jr_clm) = self.parts.linearize(image, target, n_params)?;

                let params = transform.as_vector();
                let weighting =
                    Weighting::select(options, self.rho2, self.sigma2, &self.prior, &params);
                gauss_newton_update(
                    &step.h_aam,
                    &step.jr_aam,
                    &h_clm,
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::appearance::PcaAppearanceModel;
    use crate::model::UnifiedModelBuilder;
    use crate::shape_model::PointDistributionModel;
    use std::f64::consts::PI;

    fn square_model(parts_shape: (usize, usize)) -> UnifiedModel {
        let mean = Shape::new(vec![
            Point::new(-6.0, -6.0),
            Point::new(6.0, -6.0),
            Point::new(6.0, 6.0),
            Point::new(-6.0, 6.0),
        ]);
        let pdm =
            PointDistributionModel::new(mean, DMatrix::zeros(8, 0), DVector::zeros(0), 0.5).unwrap();
        let n_pixels = 4 * parts_shape.0 * parts_shape.1;
        let appearance =
            PcaAppearanceModel::new(DVector::zeros(n_pixels), DMatrix::zeros(n_pixels, 0), 0.1)
                .unwrap();
        UnifiedModelBuilder::new()
            .appearance_model(appearance)
            .shape_model(pdm)
            .parts_shape(parts_shape)
            .build()
            .unwrap()
    }

    fn delta_bank(n_landmarks: usize, parts_shape: (usize, usize)) -> FilterBank {
        let plane = parts_shape.0 * parts_shape.1;
        let mut spatial = vec![0.0; n_landmarks * plane];
        for l in 0..n_landmarks {
            spatial[l * plane] = 1.0;
        }
        FilterBank::from_spatial(&spatial, n_landmarks, 1, 1, parts_shape).unwrap()
    }

    #[test]
    fn spectrum_fill_replaces_nan_and_inf() {
        let mut spectrum = vec![
            Complex64::new(1.0, 2.0),
            Complex64::new(f64::NAN, 0.0),
            Complex64::new(0.0, f64::INFINITY),
        ];
        assert_eq!(fill_non_finite_spectrum(&mut spectrum, 0.5), 2);
        assert_eq!(spectrum[1], Complex64::new(0.5, 0.0));
        assert_eq!(spectrum[2], Complex64::new(0.5, 0.0));
        assert_eq!(spectrum[0], Complex64::new(1.0, 2.0));
    }

    #[test]
    fn frequency_mask_selects_template_entries() {
        let model = square_model((4, 4));
        let bank = delta_bank(4, (4, 4));
        let mut mask = vec![false; 16];
        mask[0] = true;
        mask[5] = true;
        let config = FitterConfig {
            sampling_mask: Some(mask),
            ..FitterConfig::default()
        };
        let term = FourierTerm::new(&model, &bank, &config, 0.5).unwrap();
        assert_eq!(term.frequencies, vec![0, 5]);
        assert_eq!(term.template.len(), 2);
        assert_eq!(term.filter_jacobians.len(), 4);
        assert_eq!(term.filter_jacobians[0].shape(), (2, 4));
        // DC term of the template is the mass of the density on the grid
        assert!(term.template[0].re > 0.0);
    }

    #[test]
    fn mismatched_bank_is_rejected() {
        let model = square_model((5, 5));
        let bank = delta_bank(3, (5, 5));
        let result = PicLkInverse::new(&model, &bank, FitterConfig::default());
        assert!(matches!(result, Err(Error::DimensionMismatch { .. })));

        let bank = delta_bank(4, (3, 3));
        let result = AicLkInverse::new(&model, &bank, FitterConfig::default());
        assert!(matches!(result, Err(Error::DimensionMismatch { .. })));
    }

    #[test]
    fn delta_filter_jacobian_is_circular_derivative() {
        // wrap-around central differences of an impulse have the spectrum
        // i sin(2 pi k / n) along each axis
        let (h, w) = (4, 5);
        let model = square_model((h, w));
        let bank = delta_bank(4, (h, w));
        let term = FourierTerm::new(&model, &bank, &FitterConfig::default(), 0.5).unwrap();
        let d_dp = model.shape().d_dp();

        for landmark in 0..4 {
            let jf = &term.filter_jacobians[landmark];
            for k in 0..h * w {
                let (ky, kx) = (k / w, k % w);
                let dx = Complex64::new(0.0, (2.0 * PI * kx as f64 / w as f64).sin());
                let dy = Complex64::new(0.0, (2.0 * PI * ky as f64 / h as f64).sin());
                for p in 0..4 {
                    let expected = dx * d_dp[(2 * landmark, p)] + dy * d_dp[(2 * landmark + 1, p)];
                    assert!((jf[(k, p)] - expected).norm() < 1e-9);
                }
            }
        }
    }

    #[test]
    fn linearized_hessian_is_symmetric() {
        let model = square_model((5, 5));
        let bank = delta_bank(4, (5, 5));
        let term = FourierTerm::new(&model, &bank, &FitterConfig::default(), 0.5).unwrap();
        let image = crate::features::FeatureImage::from_fn(40, 40, |x, y| {
            ((x as f32 * 0.3).sin() + (y as f32 * 0.2).cos()) * 0.5
        });
        let target = model
            .shape()
            .instance(&DVector::from_vec(vec![0.0, 0.0, 20.0, 20.0]));
        let (h, b) = term.linearize(&image, &target, 4).unwrap();
        assert_eq!(b.len(), 4);
        for r in 0..4 {
            assert!(h[(r, r)] >= 0.0);
            for c in 0..4 {
                assert!((h[(r, c)] - h[(c, r)]).abs() <= 1e-9 * h.norm().max(1.0));
            }
        }
    }
}
