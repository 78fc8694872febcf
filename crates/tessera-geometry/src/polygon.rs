//! Measurements on the vertex sets of tessellation regions.

use delaunator::{triangulate, Point};
use nalgebra::{Matrix2, Vector2};
use tessera_core::Position;

/// Hulls with less area than this fraction of their bounding box are flat
const FLAT_HULL_TOLERANCE: f64 = 1.0e-12;

/// Convex hull of `points` in counter-clockwise order, taken from the
/// hull of their triangulation. Empty when the points span no triangle.
pub fn convex_hull(points: &[Position]) -> Vec<Position> {
    if points.len() < 3 {
        return Vec::new();
    }
    let sites: Vec<Point> = points.iter().map(|p| Point { x: p.x, y: p.y }).collect();
    let tri = triangulate(&sites);
    if tri.triangles.is_empty() {
        return Vec::new();
    }
    tri.hull.iter().map(|&i| points[i]).collect()
}

/// Shoelace area of a simple polygon given in order
pub fn shoelace_area(polygon: &[Position]) -> f64 {
    let n = polygon.len();
    let twice: f64 = (0..n)
        .map(|i| {
            let a = polygon[i];
            let b = polygon[(i + 1) % n];
            a.x * b.y - b.x * a.y
        })
        .sum();
    twice.abs() / 2.0
}

/// Area of the convex hull of `points`, or `None` when no proper hull exists
/// (fewer than three distinct points, or all of them collinear)
pub fn convex_hull_area(points: &[Position]) -> Option<f64> {
    let hull = convex_hull(points);
    if hull.len() < 3 {
        return None;
    }
    let area = shoelace_area(&hull);

    let (mut w, mut h) = (0.0_f64, 0.0_f64);
    for p in &hull {
        w = w.max((p.x - hull[0].x).abs());
        h = h.max((p.y - hull[0].y).abs());
    }
    if area <= FLAT_HULL_TOLERANCE * (w * h).max(f64::MIN_POSITIVE) {
        return None;
    }
    Some(area)
}

/// Sample covariance of a point set
pub fn covariance(points: &[Position]) -> Option<Matrix2<f64>> {
    if points.len() < 2 {
        return None;
    }
    let n = points.len() as f64;
    let mean = points.iter().fold(Vector2::zeros(), |acc, p| acc + p.coords) / n;
    let mut cov = Matrix2::zeros();
    for p in points {
        let d = p.coords - mean;
        cov += d * d.transpose();
    }
    Some(cov / (n - 1.0))
}

/// Unit eigenvector of the largest covariance eigenvalue.
///
/// The covariance is taken about the vertex mean, so the result does not
/// depend on which reference point the vertices were expressed against.
pub fn principal_axis(points: &[Position]) -> Option<Vector2<f64>> {
    let cov = covariance(points)?;
    if cov.iter().any(|v| !v.is_finite()) {
        return None;
    }
    let eigen = cov.symmetric_eigen();
    let axis: Vector2<f64> = eigen.eigenvectors.column(eigen.eigenvalues.imax()).into_owned();
    let norm = axis.norm();
    if norm == 0.0 || !norm.is_finite() {
        return None;
    }
    Some(axis / norm)
}
