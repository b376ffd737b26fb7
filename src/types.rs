use nalgebra::DVector;
use serde::{Deserialize, Serialize};

/// A 2D point. `x` runs along image columns, `y` along image rows.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub const fn zero() -> Self {
        Self { x: 0.0, y: 0.0 }
    }

    pub fn distance(&self, other: &Point) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    /// Nearest pixel centre.
    pub fn round(&self) -> Self {
        Self {
            x: self.x.round(),
            y: self.y.round(),
        }
    }
}

impl std::ops::Add for Point {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self {
            x: self.x + rhs.x,
            y: self.y + rhs.y,
        }
    }
}

impl std::ops::Sub for Point {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self {
            x: self.x - rhs.x,
            y: self.y - rhs.y,
        }
    }
}

impl std::ops::Mul<f64> for Point {
    type Output = Self;

    fn mul(self, rhs: f64) -> Self::Output {
        Self {
            x: self.x * rhs,
            y: self.y * rhs,
        }
    }
}

/// An axis-aligned bounding box defined by top-left corner, width, and height.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// A set of landmark points.
///
/// Flattened vectors interleave coordinates as `[x0, y0, x1, y1, ...]`,
/// which is also the row order of every shape Jacobian in this crate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shape {
    pub points: Vec<Point>,
}

impl Shape {
    pub fn new(points: Vec<Point>) -> Self {
        Self { points }
    }

    pub fn num_landmarks(&self) -> usize {
        self.points.len()
    }

    /// Create a zeroed shape with n landmarks.
    pub fn zeros(n: usize) -> Self {
        Self {
            points: vec![Point::zero(); n],
        }
    }

    /// Flatten shape to a vector of [x0, y0, x1, y1, ...] coordinates.
    pub fn to_flat_vec(&self) -> Vec<f64> {
        let mut v = Vec::with_capacity(self.points.len() * 2);
        for p in &self.points {
            v.push(p.x);
            v.push(p.y);
        }
        v
    }

    /// Create shape from a flat slice of [x0, y0, x1, y1, ...] coordinates.
    pub fn from_flat_vec(v: &[f64]) -> Self {
        debug_assert!(v.len() % 2 == 0);
        let points: Vec<Point> = v
            .chunks_exact(2)
            .map(|chunk| Point::new(chunk[0], chunk[1]))
            .collect();
        Self { points }
    }

    pub fn as_vector(&self) -> DVector<f64> {
        DVector::from_vec(self.to_flat_vec())
    }

    pub fn from_vector(v: &DVector<f64>) -> Self {
        Self::from_flat_vec(v.as_slice())
    }

    pub fn centroid(&self) -> Point {
        if self.points.is_empty() {
            return Point::zero();
        }
        let sum = self
            .points
            .iter()
            .fold(Point::zero(), |acc, p| acc + *p);
        sum * (1.0 / self.points.len() as f64)
    }

    /// Tight bounding box around the landmarks.
    pub fn bounds(&self) -> BoundingBox {
        let mut min = Point::new(f64::INFINITY, f64::INFINITY);
        let mut max = Point::new(f64::NEG_INFINITY, f64::NEG_INFINITY);
        for p in &self.points {
            min.x = min.x.min(p.x);
            min.y = min.y.min(p.y);
            max.x = max.x.max(p.x);
            max.y = max.y.max(p.y);
        }
        if self.points.is_empty() {
            return BoundingBox::new(0.0, 0.0, 0.0, 0.0);
        }
        BoundingBox::new(min.x, min.y, max.x - min.x, max.y - min.y)
    }

    /// Euclidean norm of the per-coordinate difference between two shapes.
    pub fn displacement_norm(&self, other: &Shape) -> f64 {
        debug_assert_eq!(self.points.len(), other.points.len());
        self.points
            .iter()
            .zip(other.points.iter())
            .map(|(a, b)| {
                let d = *a - *b;
                d.x * d.x + d.y * d.y
            })
            .sum::<f64>()
            .sqrt()
    }
}

impl std::ops::Index<usize> for Shape {
    type Output = Point;

    fn index(&self, idx: usize) -> &Self::Output {
        &self.points[idx]
    }
}

impl std::ops::IndexMut<usize> for Shape {
    fn index_mut(&mut self, idx: usize) -> &mut Self::Output {
        &mut self.points[idx]
    }
}
