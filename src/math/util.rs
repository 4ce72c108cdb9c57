use super::{Point3d, Vector3d};
use cgmath::prelude::*;
use cgmath::{Basis3, Deg, Rad};

/// Squared magnitudes below this are treated as the zero vector.
const EPSILON2: f64 = 1e-12;

/// The vertical axis.
pub const UP: Vector3d = Vector3d::new(0.0, 1.0, 0.0);

/// Projects a vector onto the ground plane.
pub fn flatten(vec: Vector3d) -> Vector3d {
    Vector3d::new(vec.x, 0.0, vec.z)
}

/// Normalises a vector, returning the zero vector if it has no length.
pub fn normalize_or_zero(vec: Vector3d) -> Vector3d {
    if vec.magnitude2() < EPSILON2 {
        Vector3d::zero()
    } else {
        vec.normalize()
    }
}

/// The unsigned angle between two vectors in degrees, in `[0, 180]`.
/// Zero if either vector has no length.
pub fn angle_between(a: Vector3d, b: Vector3d) -> f64 {
    if a.magnitude2() < EPSILON2 || b.magnitude2() < EPSILON2 {
        return 0.0;
    }
    let cos = (a.dot(b) / (a.magnitude() * b.magnitude())).clamp(-1.0, 1.0);
    Deg::from(Rad(cos.acos())).0
}

/// The heading error in degrees between `forward` and the direction from
/// `from` to `target`, measured on the ground plane.
///
/// Positive when the target lies to the right of `forward`, i.e. when the
/// y component of `forward × direction` is non-negative.
pub fn heading_error(forward: Vector3d, from: Point3d, target: Point3d) -> f64 {
    let forward = flatten(forward);
    let dir = normalize_or_zero(flatten(target - from));
    let angle = angle_between(forward, dir);
    if forward.cross(dir).y < 0.0 {
        -angle
    } else {
        angle
    }
}

/// Rotates a vector about the vertical axis by `degrees`.
pub fn rotate_about_up(vec: Vector3d, degrees: f64) -> Vector3d {
    Basis3::from_angle_y(Deg(degrees)).rotate_vector(vec)
}

/// Projects a point onto an axis through `origin`.
///
/// # Parameters
/// * `point` - The point to project
/// * `origin` - The origin of the axis
/// * `axis` - The unit vector of the axis
pub fn project_on_axis(point: Point3d, origin: Point3d, axis: Vector3d) -> f64 {
    (point - origin).dot(axis)
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn heading_error_sign() {
        let origin = Point3d::new(0.0, 0.0, 0.0);
        let forward = Vector3d::new(0.0, 0.0, 1.0);

        assert_approx_eq!(heading_error(forward, origin, Point3d::new(0.0, 0.0, 5.0)), 0.0);
        assert_approx_eq!(heading_error(forward, origin, Point3d::new(5.0, 0.0, 5.0)), 45.0);
        assert_approx_eq!(heading_error(forward, origin, Point3d::new(-5.0, 0.0, 5.0)), -45.0);
        assert_approx_eq!(heading_error(forward, origin, Point3d::new(0.0, 0.0, -5.0)), 180.0);
    }

    #[test]
    fn heading_error_ignores_height() {
        let origin = Point3d::new(0.0, 0.0, 0.0);
        let forward = Vector3d::new(0.0, 0.3, 1.0);
        assert_approx_eq!(heading_error(forward, origin, Point3d::new(0.0, 10.0, 5.0)), 0.0);
    }

    #[test]
    fn rotation_matches_heading_sign() {
        let forward = Vector3d::new(0.0, 0.0, 1.0);
        let turned = rotate_about_up(forward, 90.0);
        assert_approx_eq!(turned.x, 1.0);
        assert_approx_eq!(turned.z, 0.0);

        let origin = Point3d::new(0.0, 0.0, 0.0);
        assert_approx_eq!(heading_error(forward, origin, origin + turned), 90.0);
    }

    #[test]
    fn degenerate_angles() {
        let zero = Vector3d::zero();
        assert_eq!(angle_between(zero, Vector3d::unit_x()), 0.0);
        assert_eq!(normalize_or_zero(zero), zero);
    }
}
