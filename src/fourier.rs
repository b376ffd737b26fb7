//! Two-dimensional discrete Fourier transforms over row-major planes.
//!
//! Patches are small (typically 17x17), so lengths that are not a power of
//! two fall back to a direct DFT.

use std::f64::consts::PI;

use num_complex::Complex64;

pub fn is_power_of_2(n: usize) -> bool {
    n != 0 && n & (n - 1) == 0
}

/// Forward 2D DFT of a `height x width` plane.
pub fn fft2(data: &[Complex64], height: usize, width: usize) -> Vec<Complex64> {
    transform_2d(data, height, width, false)
}

/// Inverse 2D DFT, scaled by `1 / (height * width)`.
pub fn ifft2(data: &[Complex64], height: usize, width: usize) -> Vec<Complex64> {
    let scale = 1.0 / (height * width) as f64;
    let mut out = transform_2d(data, height, width, true);
    for v in out.iter_mut() {
        *v *= scale;
    }
    out
}

pub fn fft2_real(data: &[f64], height: usize, width: usize) -> Vec<Complex64> {
    let complex: Vec<Complex64> = data.iter().map(|&v| Complex64::new(v, 0.0)).collect();
    fft2(&complex, height, width)
}

/// Central-difference gradient of a plane treated as periodic.
///
/// Products of spectra are circular convolutions, so derivatives of a
/// filter that feed a spectral product must wrap around the patch edges.
/// Returns `(d/dx, d/dy)`.
pub fn circular_gradient(data: &[f64], height: usize, width: usize) -> (Vec<f64>, Vec<f64>) {
    debug_assert_eq!(data.len(), height * width);
    let at = |r: usize, c: usize| data[r * width + c];
    let mut gx = Vec::with_capacity(data.len());
    let mut gy = Vec::with_capacity(data.len());
    for r in 0..height {
        let (up, down) = ((r + height - 1) % height, (r + 1) % height);
        for c in 0..width {
            let (left, right) = ((c + width - 1) % width, (c + 1) % width);
            gx.push((at(r, right) - at(r, left)) / 2.0);
            gy.push((at(down, c) - at(up, c)) / 2.0);
        }
    }
    (gx, gy)
}

fn transform_2d(data: &[Complex64], height: usize, width: usize, inverse: bool) -> Vec<Complex64> {
    debug_assert_eq!(data.len(), height * width);
    let mut out = Vec::with_capacity(data.len());
    for row in data.chunks_exact(width) {
        out.extend(dft_1d(row, inverse));
    }

    let mut column = vec![Complex64::new(0.0, 0.0); height];
    for c in 0..width {
        for r in 0..height {
            column[r] = out[r * width + c];
        }
        for (r, v) in dft_1d(&column, inverse).into_iter().enumerate() {
            out[r * width + c] = v;
        }
    }
    out
}

fn dft_1d(input: &[Complex64], inverse: bool) -> Vec<Complex64> {
    if is_power_of_2(input.len()) {
        let mut data = input.to_vec();
        fft_radix2_inplace(&mut data, inverse);
        data
    } else {
        dft_direct(input, inverse)
    }
}

fn dft_direct(input: &[Complex64], inverse: bool) -> Vec<Complex64> {
    let n = input.len();
    let sign = if inverse { 1.0 } else { -1.0 };
    let twiddles: Vec<Complex64> = (0..n)
        .map(|k| Complex64::from_polar(1.0, sign * 2.0 * PI * k as f64 / n as f64))
        .collect();
    (0..n)
        .map(|k| {
            input
                .iter()
                .enumerate()
                .map(|(j, &x)| x * twiddles[(j * k) % n])
                .sum()
        })
        .collect()
}

/// Iterative Cooley-Tukey; `data.len()` must be a power of two.
fn fft_radix2_inplace(data: &mut [Complex64], inverse: bool) {
    let n = data.len();
    if n <= 1 {
        return;
    }

    let mut j = 0;
    for i in 1..n {
        let mut bit = n >> 1;
        while j & bit != 0 {
            j ^= bit;
            bit >>= 1;
        }
        j ^= bit;
        if i < j {
            data.swap(i, j);
        }
    }

    let sign = if inverse { 1.0 } else { -1.0 };
    let mut len = 2;
    while len <= n {
        let w_len = Complex64::from_polar(1.0, sign * 2.0 * PI / len as f64);
        for start in (0..n).step_by(len) {
            let mut w = Complex64::new(1.0, 0.0);
            for k in 0..len / 2 {
                let u = data[start + k];
                let v = data[start + k + len / 2] * w;
                data[start + k] = u + v;
                data[start + k + len / 2] = u - v;
                w *= w_len;
            }
        }
        len <<= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: &[Complex64], b: &[Complex64]) {
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b) {
            assert!((x - y).norm() < 1e-9, "{x} != {y}");
        }
    }

    #[test]
    fn radix2_matches_direct() {
        let input: Vec<Complex64> = (0..8)
            .map(|i| Complex64::new(i as f64 * 0.5 - 1.0, (i * i) as f64 * 0.1))
            .collect();
        let mut fast = input.clone();
        fft_radix2_inplace(&mut fast, false);
        assert_close(&fast, &dft_direct(&input, false));
    }

    #[test]
    fn impulse_has_flat_spectrum() {
        let (h, w) = (5, 3);
        let mut data = vec![0.0; h * w];
        data[0] = 1.0;
        let spectrum = fft2_real(&data, h, w);
        assert!(spectrum.iter().all(|v| (v - Complex64::new(1.0, 0.0)).norm() < 1e-12));
    }

    #[test]
    fn inverse_recovers_input() {
        for &(h, w) in &[(4, 4), (5, 7), (17, 17)] {
            let data: Vec<Complex64> = (0..h * w)
                .map(|i| Complex64::new((i as f64 * 0.37).sin(), (i as f64 * 0.11).cos()))
                .collect();
            let back = ifft2(&fft2(&data, h, w), h, w);
            assert_close(&back, &data);
        }
    }

    #[test]
    fn dc_term_is_sum() {
        let data: Vec<f64> = (0..12).map(|i| i as f64).collect();
        let spectrum = fft2_real(&data, 3, 4);
        assert!((spectrum[0].re - 66.0).abs() < 1e-9);
        assert!(spectrum[0].im.abs() < 1e-9);
    }

    #[test]
    fn circular_gradient_wraps_edges() {
        let (h, w) = (4, 5);
        let mut data = vec![0.0; h * w];
        data[0] = 1.0;
        let (gx, gy) = circular_gradient(&data, h, w);

        // the impulse at the origin is seen from the far column and row
        assert_eq!(gx[1], -0.5);
        assert_eq!(gx[w - 1], 0.5);
        assert_eq!(gy[w], -0.5);
        assert_eq!(gy[(h - 1) * w], 0.5);
        assert!(gx.iter().sum::<f64>().abs() < 1e-12);
        assert!(gy.iter().sum::<f64>().abs() < 1e-12);
    }

    #[test]
    fn circular_gradient_of_periodic_signal() {
        let (h, w) = (8, 16);
        let signal = |c: f64| (2.0 * std::f64::consts::PI * c / w as f64).sin();
        let data: Vec<f64> = (0..h * w).map(|i| signal((i % w) as f64)).collect();
        let (gx, gy) = circular_gradient(&data, h, w);
        for (i, g) in gx.iter().enumerate() {
            let c = (i % w) as f64;
            let exact = (signal(c + 1.0) - signal(c - 1.0)) / 2.0;
            assert!((g - exact).abs() < 1e-12);
        }
        assert!(gy.iter().all(|g| g.abs() < 1e-12));
    }
}
