//! End-to-end fitting on a synthetic image of Gaussian blobs.
//!
//! Every landmark of the ground-truth shape sits on the peak of a blob, the
//! appearance mean is the image warped at the ground truth, and the default
//! part classifier answers with the patch itself, so the response peaks
//! exactly where the landmark should be.

use nalgebra::{DMatrix, DVector};
use unified_face::{
    point_to_point_error, AlgorithmKind, Error, FeatureImage, FilterBank, Fitter, FitterConfig,
    PartsImage, PartsInterface, PcaAppearanceModel, Point, PointDistributionModel, RunOptions,
    Shape, Transform, UnifiedAlgorithm, UnifiedModel,
};

const PARTS_SHAPE: (usize, usize) = (9, 9);
const BLOB_VARIANCE: f64 = 1.5;

fn mean_shape() -> Shape {
    Shape::new(vec![
        Point::new(-10.0, -8.0),
        Point::new(10.0, -8.0),
        Point::new(0.0, 2.0),
        Point::new(-7.0, 10.0),
        Point::new(7.0, 10.0),
    ])
}

fn translated(shape: &Shape, dx: f64, dy: f64) -> Shape {
    Shape::new(shape.points.iter().map(|p| *p + Point::new(dx, dy)).collect())
}

fn gt_shape() -> Shape {
    translated(&mean_shape(), 40.0, 40.0)
}

fn shape_model() -> PointDistributionModel {
    let mut mode = DVector::zeros(10);
    mode[5] = -1.0;
    mode[7] = 1.0;
    mode[9] = 1.0;
    let mode = mode.normalize();
    PointDistributionModel::new(
        mean_shape(),
        DMatrix::from_column_slice(10, 1, mode.as_slice()),
        DVector::from_vec(vec![4.0]),
        0.5,
    )
    .unwrap()
}

fn blob_image() -> FeatureImage {
    let gt = gt_shape();
    FeatureImage::from_fn(80, 80, |x, y| {
        gt.points
            .iter()
            .map(|p| {
                let (dx, dy) = (x as f64 - p.x, y as f64 - p.y);
                (-(dx * dx + dy * dy) / (2.0 * BLOB_VARIANCE)).exp()
            })
            .sum::<f64>() as f32
    })
}

fn unified_model(image: &FeatureImage) -> UnifiedModel {
    let interface = PartsInterface::new(5, 1, PARTS_SHAPE, false, None).unwrap();
    let mean = interface.warp(image, &gt_shape()).unwrap();
    let n_pixels = mean.len();
    let component = DMatrix::from_fn(n_pixels, 1, |r, _| (r % 5) as f64 - 2.0).normalize();
    let appearance = PcaAppearanceModel::new(mean, component, 0.1).unwrap();
    UnifiedModel::new(appearance, shape_model(), interface).unwrap()
}

/// Responds with each landmark's own patch.
fn patch_classifier(parts: &PartsImage) -> Vec<Vec<f64>> {
    (0..parts.n_landmarks())
        .map(|l| parts.patch(l, 0, 0).to_vec())
        .collect()
}

fn nan_classifier(parts: &PartsImage) -> Vec<Vec<f64>> {
    let (h, w) = parts.parts_shape();
    vec![vec![f64::NAN; h * w]; parts.n_landmarks()]
}

fn zero_filters() -> FilterBank {
    let plane = PARTS_SHAPE.0 * PARTS_SHAPE.1;
    FilterBank::from_spatial(&vec![0.0; 5 * plane], 5, 1, 1, PARTS_SHAPE).unwrap()
}

fn delta_filters() -> FilterBank {
    let plane = PARTS_SHAPE.0 * PARTS_SHAPE.1;
    let mut spatial = vec![0.0; 5 * plane];
    for l in 0..5 {
        spatial[l * plane] = 1.0;
    }
    FilterBank::from_spatial(&spatial, 5, 1, 1, PARTS_SHAPE).unwrap()
}

fn max_shift(a: &Shape, b: &Shape) -> f64 {
    a.points
        .iter()
        .zip(&b.points)
        .map(|(p, q)| p.distance(q))
        .fold(0.0, f64::max)
}

#[test]
fn transform_round_trip() {
    let image = blob_image();
    let model = unified_model(&image);
    let pdm = model.shape();

    let params = DVector::from_vec(vec![0.3, -0.1, 12.0, -4.0, 0.7]);
    let shape = pdm.instance(&params);
    let mut transform = Transform::new(pdm);
    transform.set_target(&shape).unwrap();

    for (a, b) in transform.as_vector().iter().zip(params.iter()) {
        assert!((a - b).abs() < 1e-9);
    }
    assert!(max_shift(transform.target(), &shape) < 1e-9);
}

#[test]
fn mean_shift_variants_stay_put_on_ground_truth() {
    let image = blob_image();
    let model = unified_model(&image);
    let gt = gt_shape();
    let classifier = patch_classifier;
    let options = RunOptions::default().with_max_iters(1);

    for kind in [AlgorithmKind::PicRlms, AlgorithmKind::AicRlms] {
        let fitter = Fitter::new(kind, &model, &classifier, FitterConfig::default()).unwrap();
        let result = fitter.run(&image, &gt, Some(&gt), &options).unwrap();

        assert_eq!(result.kind(), kind);
        assert_eq!(result.shape_parameters().len(), 2);
        assert!(max_shift(result.initial_shape(), result.final_shape()) < 1e-6);
        assert!(result.final_error().unwrap() < 1e-6);
    }
}

#[test]
fn fourier_variants_stay_put_on_ground_truth() {
    let image = blob_image();
    let model = unified_model(&image);
    let gt = gt_shape();
    let filters = zero_filters();
    let options = RunOptions::default().with_max_iters(1);

    for kind in [AlgorithmKind::PicLkInverse, AlgorithmKind::AicLkInverse] {
        let fitter = Fitter::new(kind, &model, &filters, FitterConfig::default()).unwrap();
        let result = fitter.run(&image, &gt, Some(&gt), &options).unwrap();

        assert_eq!(result.shape_parameters().len(), 2);
        assert!(max_shift(result.initial_shape(), result.final_shape()) < 1e-6);
    }
}

#[test]
fn alternating_variants_record_appearance() {
    let image = blob_image();
    let model = unified_model(&image);
    let gt = gt_shape();
    let filters = delta_filters();
    let options = RunOptions::default().with_max_iters(2).with_prior(true);

    for kind in AlgorithmKind::ALL {
        let fitter = Fitter::new(kind, &model, &filters, FitterConfig::default()).unwrap();
        let result = fitter.run(&image, &gt, None, &options).unwrap();

        assert!(result.n_iters() <= 2);
        assert!(result
            .shape_parameters()
            .iter()
            .all(|p| p.iter().all(|v| v.is_finite())));
        match result.appearance_parameters() {
            Some(c) => {
                assert!(kind.is_alternating());
                assert_eq!(c.len(), result.shape_parameters().len());
                assert_eq!(c[0].len(), 1);
                assert!(c[0].iter().all(|v| *v == 0.0));
            }
            None => assert!(!kind.is_alternating()),
        }
    }
}

#[test]
fn peaked_responses_pull_landmarks_home() {
    let image = blob_image();
    let model = unified_model(&image);
    let gt = gt_shape();
    let initial = translated(&gt, 1.4, -0.8);
    let classifier = patch_classifier;
    // parts only: the appearance term is piecewise constant in the shift
    let options = RunOptions::default().with_max_iters(50).with_mixing(0.0);

    for kind in [AlgorithmKind::PicRlms, AlgorithmKind::AicRlms] {
        let fitter = Fitter::new(kind, &model, &classifier, FitterConfig::default()).unwrap();
        let result = fitter.run(&image, &initial, Some(&gt), &options).unwrap();

        assert!(result.converged(), "{kind:?} did not converge");
        assert!(result.n_iters() < 50);
        assert_eq!(result.shape_parameters().len(), result.n_iters() + 1);
        assert_eq!(result.shapes().len(), result.n_iters() + 1);
        assert!(max_shift(result.final_shape(), &gt) < 0.5);
        assert!(result.final_error().unwrap() < result.initial_error().unwrap());
    }
}

#[test]
fn correlation_filters_pull_landmarks_home() {
    let image = blob_image();
    let model = unified_model(&image);
    let gt = gt_shape();
    let initial = translated(&gt, 1.4, -0.8);
    // peaks at index 0, so the response wraps around the patch border
    let filters = delta_filters();

    for kind in [AlgorithmKind::PicLkInverse, AlgorithmKind::AicLkInverse] {
        for prior in [false, true] {
            let options = RunOptions::default()
                .with_max_iters(50)
                .with_mixing(0.0)
                .with_prior(prior);
            let fitter = Fitter::new(kind, &model, &filters, FitterConfig::default()).unwrap();
            let result = fitter.run(&image, &initial, Some(&gt), &options).unwrap();

            let error = point_to_point_error(result.final_shape(), &gt).unwrap();
            assert!(error < 1.0, "{kind:?} (prior {prior}) ended {error} px away");
            assert!(max_shift(result.final_shape(), &gt) < 1.5);
            assert!(result.final_error().unwrap() < result.initial_error().unwrap());
        }
    }
}

#[test]
fn early_stop_on_ground_truth() {
    let image = blob_image();
    let model = unified_model(&image);
    let gt = gt_shape();
    let classifier = patch_classifier;

    let fitter = Fitter::new(
        AlgorithmKind::PicRlms,
        &model,
        &classifier,
        FitterConfig::default(),
    )
    .unwrap();
    let result = fitter.run(&image, &gt, None, &RunOptions::default()).unwrap();

    assert!(result.converged());
    assert_eq!(result.n_iters(), 1);
    assert_eq!(result.shape_parameters().len(), 2);
}

#[test]
fn non_finite_responses_are_neutral() {
    let image = blob_image();
    let model = unified_model(&image);
    let gt = gt_shape();
    let classifier = nan_classifier;
    let options = RunOptions::default().with_max_iters(3).with_mixing(0.0);

    for kind in [AlgorithmKind::PicRlms, AlgorithmKind::AicRlms] {
        let fitter = Fitter::new(kind, &model, &classifier, FitterConfig::default()).unwrap();
        let result = fitter.run(&image, &gt, None, &options).unwrap();
        assert!(max_shift(result.final_shape(), &gt) < 1e-6);
    }
}

#[test]
fn fourier_variants_need_filters() {
    let image = blob_image();
    let model = unified_model(&image);
    let classifier = patch_classifier;

    for kind in [AlgorithmKind::PicLkInverse, AlgorithmKind::AicLkInverse] {
        let result = Fitter::new(kind, &model, &classifier, FitterConfig::default());
        assert!(matches!(result, Err(Error::InvalidModel(_))));
    }
}

#[test]
fn mismatched_filter_bank_is_rejected() {
    let image = blob_image();
    let model = unified_model(&image);
    let filters = FilterBank::from_spatial(&vec![0.0; 3 * 49], 3, 1, 1, (7, 7)).unwrap();

    for kind in AlgorithmKind::ALL {
        let result = Fitter::new(kind, &model, &filters, FitterConfig::default());
        assert!(
            matches!(result, Err(Error::DimensionMismatch { .. })),
            "{kind:?} accepted a 3-landmark 7x7 filter bank"
        );
    }
}

#[test]
fn wrong_landmark_count_is_rejected() {
    let image = blob_image();
    let model = unified_model(&image);
    let classifier = patch_classifier;
    let fitter = Fitter::new(
        AlgorithmKind::AicRlms,
        &model,
        &classifier,
        FitterConfig::default(),
    )
    .unwrap();

    let short = Shape::new(vec![Point::new(10.0, 10.0); 3]);
    let result = fitter.run(&image, &short, None, &RunOptions::default());
    assert!(matches!(result, Err(Error::DimensionMismatch { .. })));
}

#[test]
fn concurrent_runs_share_one_fitter() {
    let image = blob_image();
    let model = unified_model(&image);
    let gt = gt_shape();
    let initial = translated(&gt, -1.0, 1.0);
    let classifier = patch_classifier;
    let fitter = Fitter::new(
        AlgorithmKind::AicRlms,
        &model,
        &classifier,
        FitterConfig::default(),
    )
    .unwrap();
    let options = RunOptions::default().with_max_iters(5);

    let (a, b) = std::thread::scope(|s| {
        let a = s.spawn(|| fitter.run(&image, &initial, None, &options).unwrap());
        let b = s.spawn(|| fitter.run(&image, &initial, None, &options).unwrap());
        (a.join().unwrap(), b.join().unwrap())
    });
    assert_eq!(a.shapes(), b.shapes());
    assert_eq!(a.appearance_parameters(), b.appearance_parameters());
}
