//! Fitting error measures.
//!
//! Errors compare a fitted shape with a ground-truth annotation. The
//! normalized error divides by the ground-truth face size so results are
//! comparable across image resolutions.

use crate::types::Shape;

/// Mean Euclidean distance between corresponding landmarks.
///
/// Returns `None` when the shapes have different landmark counts or no
/// landmarks at all.
pub fn point_to_point_error(shape: &Shape, gt_shape: &Shape) -> Option<f64> {
    if shape.num_landmarks() != gt_shape.num_landmarks() || shape.num_landmarks() == 0 {
        return None;
    }
    let total: f64 = shape
        .points
        .iter()
        .zip(&gt_shape.points)
        .map(|(a, b)| a.distance(b))
        .sum();
    Some(total / shape.num_landmarks() as f64)
}

/// Size of a face: mean of its bounding box width and height.
pub fn face_size(shape: &Shape) -> f64 {
    let bounds = shape.bounds();
    (bounds.width + bounds.height) / 2.0
}

/// Point-to-point error divided by the ground truth's [`face_size`].
pub fn normalized_error(shape: &Shape, gt_shape: &Shape) -> Option<f64> {
    let size = face_size(gt_shape);
    if size <= 0.0 {
        return None;
    }
    point_to_point_error(shape, gt_shape).map(|e| e / size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Point;

    fn square(offset: f64) -> Shape {
        Shape::new(vec![
            Point::new(offset, offset),
            Point::new(10.0 + offset, offset),
            Point::new(10.0 + offset, 10.0 + offset),
            Point::new(offset, 10.0 + offset),
        ])
    }

    #[test]
    fn test_identical_shapes() {
        assert_eq!(point_to_point_error(&square(0.0), &square(0.0)), Some(0.0));
    }

    #[test]
    fn test_translated_shape() {
        // every landmark moves by sqrt(2)
        let error = point_to_point_error(&square(1.0), &square(0.0)).unwrap();
        assert!((error - 2f64.sqrt()).abs() < 1e-12);

        let normalized = normalized_error(&square(1.0), &square(0.0)).unwrap();
        assert!((normalized - 2f64.sqrt() / 10.0).abs() < 1e-12);
    }

    #[test]
    fn test_mismatched_shapes() {
        let three = Shape::new(vec![Point::zero(); 3]);
        assert!(point_to_point_error(&three, &square(0.0)).is_none());
        assert!(normalized_error(&square(0.0), &three).is_none());
    }
}
