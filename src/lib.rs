//! # unified-face
//!
//! Pure Rust face alignment with unified AAM/CLM fitting.
//!
//! This crate provides:
//! - **Models**: PCA appearance over a parts-based reference frame plus a
//!   point distribution model with a global similarity pose
//! - **Part classifiers**: any closure over patches, or frequency-domain
//!   correlation filters ([`FilterBank`])
//! - **Fitting**: four Gauss-Newton algorithms that combine an appearance
//!   residual with a part-response residual
//!
//! Implements the algorithms from "Unifying Holistic and Parts-Based
//! Deformable Model Fitting" (Alabort-i-Medina & Zafeiriou, 2015): every
//! iteration solves one linear system built from both residuals.
//!
//! ## Algorithm Overview
//!
//! 1. Project the initial shape onto the shape model
//! 2. For each iteration:
//!    - Warp the image into the reference frame and measure the appearance
//!      residual (project-out, or alternating reconstruction)
//!    - Extract a patch per landmark and measure the part residual
//!      (kernel-weighted mean shift, or correlation-filter response in the
//!      Fourier domain)
//!    - Solve the combined Gauss-Newton system for a parameter update
//!    - Stop once the landmarks move less than `eps`
//! 3. Return the shape trajectory as a [`FittingResult`]
//!
//! ## Quick Start
//!
//! ```rust
//! use nalgebra::{DMatrix, DVector};
//! use unified_face::{
//!     AlgorithmKind, FeatureImage, Fitter, FitterConfig, PartsImage, PcaAppearanceModel,
//!     Point, PointDistributionModel, RunOptions, Shape, UnifiedAlgorithm, UnifiedModelBuilder,
//! };
//!
//! let mean = Shape::new(vec![
//!     Point::new(-8.0, -8.0),
//!     Point::new(8.0, -8.0),
//!     Point::new(8.0, 8.0),
//!     Point::new(-8.0, 8.0),
//! ]);
//! let shape_model =
//!     PointDistributionModel::new(mean, DMatrix::zeros(8, 0), DVector::zeros(0), 0.5).unwrap();
//!
//! let n_pixels = 4 * 7 * 7;
//! let appearance =
//!     PcaAppearanceModel::new(DVector::zeros(n_pixels), DMatrix::zeros(n_pixels, 0), 0.1)
//!         .unwrap();
//!
//! let model = UnifiedModelBuilder::new()
//!     .appearance_model(appearance)
//!     .shape_model(shape_model)
//!     .parts_shape((7, 7))
//!     .build()
//!     .unwrap();
//!
//! // Any closure producing one response map per landmark is a classifier
//! let classifier = |parts: &PartsImage| {
//!     (0..parts.n_landmarks())
//!         .map(|l| parts.patch(l, 0, 0).to_vec())
//!         .collect::<Vec<_>>()
//! };
//!
//! let fitter = Fitter::new(AlgorithmKind::PicRlms, &model, &classifier, FitterConfig::default())
//!     .unwrap();
//!
//! let image = FeatureImage::from_fn(64, 64, |x, y| ((x + y) % 7) as f32 / 7.0);
//! let initial = Shape::new(vec![
//!     Point::new(24.0, 24.0),
//!     Point::new(40.0, 24.0),
//!     Point::new(40.0, 40.0),
//!     Point::new(24.0, 40.0),
//! ]);
//!
//! let result = fitter
//!     .run(&image, &initial, None, &RunOptions::default().with_max_iters(5))
//!     .unwrap();
//! println!("{} iterations", result.n_iters());
//! ```
//!
//! ## Custom Image Types
//!
//! Implement the [`ImageAccess`] trait for your own image types:
//!
//! ```rust
//! use unified_face::ImageAccess;
//!
//! struct MyImage { /* ... */ }
//!
//! impl ImageAccess for MyImage {
//!     fn get_pixel(&self, x: i32, y: i32, channel: usize) -> f32 {
//!         // Return the feature value at (x, y)
//!         // Return 0 for out-of-bounds
//!         0.0
//!     }
//!     fn width(&self) -> u32 { 640 }
//!     fn height(&self) -> u32 { 480 }
//! }
//! ```

pub mod algorithm;
mod appearance;
mod classifier;
mod error;
mod features;
pub mod fourier;
mod grid;
mod metrics;
mod model;
mod parts;
mod result;
mod shape_model;
mod types;

pub use algorithm::{
    AicLkInverse, AicRlms, AlgorithmKind, Fitter, FitterConfig, PicLkInverse, PicRlms,
    RunOptions, UnifiedAlgorithm,
};
pub use appearance::{PartsInterface, PcaAppearanceModel, TemplateGradient};
pub use classifier::{FilterBank, PartClassifier};
pub use error::{Error, Result};
pub use features::{gradient, FeatureImage, ImageAccess};
pub use grid::{build_sampling_grid, desired_response, GaussianDensity, KernelGrid, SamplingGrid};
pub use metrics::{face_size, normalized_error, point_to_point_error};
pub use model::{UnifiedModel, UnifiedModelBuilder};
pub use parts::{build_parts_image, PartsImage};
pub use result::FittingResult;
pub use shape_model::{OrthoPdm, PointDistributionModel, Transform, N_GLOBAL_PARAMETERS};
pub use types::{BoundingBox, Point, Shape};
