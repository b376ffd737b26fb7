/// Trait for accessing pixel intensities from a (possibly multi-channel) image.
pub trait ImageAccess {
    /// Get the intensity at (x, y) in the given channel. Returns 0 for
    /// out-of-bounds pixels. Coordinates are in image space.
    fn get_pixel(&self, x: i32, y: i32, channel: usize) -> f32;

    /// Image dimensions.
    fn width(&self) -> u32;
    fn height(&self) -> u32;

    /// Number of feature channels. Grayscale images have one.
    fn n_channels(&self) -> usize {
        1
    }
}

/// A dense feature image with channel-major f32 storage.
///
/// Raw grayscale or colour pixels are just feature images with one or three
/// channels; dense descriptors computed elsewhere can be wrapped the same way.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureImage {
    data: Vec<f32>,
    width: u32,
    height: u32,
    channels: usize,
}

impl FeatureImage {
    /// `data` is laid out channel by channel, each channel row-major.
    pub fn new(data: Vec<f32>, width: u32, height: u32, channels: usize) -> Self {
        debug_assert_eq!(data.len(), (width * height) as usize * channels);
        Self {
            data,
            width,
            height,
            channels,
        }
    }

    /// Single-channel image from a pixel function.
    pub fn from_fn<F>(width: u32, height: u32, f: F) -> Self
    where
        F: Fn(u32, u32) -> f32,
    {
        let mut data = Vec::with_capacity((width * height) as usize);
        for y in 0..height {
            for x in 0..width {
                data.push(f(x, y));
            }
        }
        Self {
            data,
            width,
            height,
            channels: 1,
        }
    }

    pub fn channel(&self, channel: usize) -> &[f32] {
        let len = (self.width * self.height) as usize;
        &self.data[channel * len..(channel + 1) * len]
    }
}

impl ImageAccess for FeatureImage {
    fn get_pixel(&self, x: i32, y: i32, channel: usize) -> f32 {
        if x < 0 || y < 0 || x >= self.width as i32 || y >= self.height as i32 {
            return 0.0;
        }
        let plane = (self.width * self.height) as usize;
        self.data[channel * plane + (y as u32 * self.width + x as u32) as usize]
    }

    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn n_channels(&self) -> usize {
        self.channels
    }
}

impl From<&image::GrayImage> for FeatureImage {
    fn from(img: &image::GrayImage) -> Self {
        let data = img.as_raw().iter().map(|&v| v as f32 / 255.0).collect();
        Self::new(data, img.width(), img.height(), 1)
    }
}

impl From<&image::RgbImage> for FeatureImage {
    fn from(img: &image::RgbImage) -> Self {
        let plane = (img.width() * img.height()) as usize;
        let mut data = vec![0.0f32; plane * 3];
        for (i, px) in img.pixels().enumerate() {
            for c in 0..3 {
                data[c * plane + i] = px.0[c] as f32 / 255.0;
            }
        }
        Self::new(data, img.width(), img.height(), 3)
    }
}

/// Sample a pixel with bilinear interpolation for sub-pixel accuracy.
#[inline]
pub(crate) fn sample_bilinear<I: ImageAccess>(image: &I, x: f64, y: f64, channel: usize) -> f64 {
    let x0 = x.floor() as i32;
    let y0 = y.floor() as i32;
    let x1 = x0 + 1;
    let y1 = y0 + 1;

    let fx = x - x0 as f64;
    let fy = y - y0 as f64;

    let p00 = image.get_pixel(x0, y0, channel) as f64;
    let p10 = image.get_pixel(x1, y0, channel) as f64;
    let p01 = image.get_pixel(x0, y1, channel) as f64;
    let p11 = image.get_pixel(x1, y1, channel) as f64;

    let top = p00 * (1.0 - fx) + p10 * fx;
    let bottom = p01 * (1.0 - fx) + p11 * fx;
    top * (1.0 - fy) + bottom * fy
}

/// Finite-difference gradient of a row-major `height x width` plane.
///
/// Central differences inside, one-sided differences on the border.
/// Returns `(d/dx, d/dy)`.
pub fn gradient(data: &[f64], height: usize, width: usize) -> (Vec<f64>, Vec<f64>) {
    debug_assert_eq!(data.len(), height * width);
    let mut gx = vec![0.0; data.len()];
    let mut gy = vec![0.0; data.len()];
    let at = |r: usize, c: usize| data[r * width + c];

    for r in 0..height {
        for c in 0..width {
            let idx = r * width + c;
            if width > 1 {
                gx[idx] = if c == 0 {
                    at(r, 1) - at(r, 0)
                } else if c == width - 1 {
                    at(r, c) - at(r, c - 1)
                } else {
                    (at(r, c + 1) - at(r, c - 1)) / 2.0
                };
            }
            if height > 1 {
                gy[idx] = if r == 0 {
                    at(1, c) - at(0, c)
                } else if r == height - 1 {
                    at(r, c) - at(r - 1, c)
                } else {
                    (at(r + 1, c) - at(r - 1, c)) / 2.0
                };
            }
        }
    }
    (gx, gy)
}
