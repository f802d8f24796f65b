//! Point types and small vector helpers

use nalgebra::{Point3, Vector3};

/// A 3D point with floating point coordinates
pub type Point3f = Point3<f32>;

/// A 3D vector with floating point components
pub type Vector3f = Vector3<f32>;

/// Hashable key for exact position equality.
///
/// `-0.0` and `0.0` compare equal as floats, so both map to the same key.
pub fn position_key(p: &Point3f) -> [u32; 3] {
    [
        (p.x + 0.0).to_bits(),
        (p.y + 0.0).to_bits(),
        (p.z + 0.0).to_bits(),
    ]
}

/// Normalize `v`, or return zero for a zero-length vector.
pub fn normalize_or_zero(v: Vector3f) -> Vector3f {
    v.try_normalize(0.0).unwrap_or_else(Vector3f::zeros)
}

/// Unit normal of the triangle `(p0, p1, p2)` using `(p1 - p0) x (p2 - p1)`.
///
/// Collinear triangles yield a zero vector.
pub fn triangle_normal(p0: &Point3f, p1: &Point3f, p2: &Point3f) -> Vector3f {
    let e1 = p1 - p0;
    let e2 = p2 - p1;
    normalize_or_zero(e1.cross(&e2))
}
