//! Quaternion / 3x3 helpers supporting rigid shape matching.
//!
//! Shape matching needs to recover the rotation factor `R` of the matrix
//! `A = Σ_i (predicted_i − centroid) · ref_iᵀ`. Per substep only a single
//! Jacobi-style refinement step is taken (Müller et al., "A Robust Method to
//! Extract the Rotation from a 3x3 Matrix"), starting from the rigid body's
//! previously stored quaternion rather than re-deriving it from scratch.

use cgmath::{InnerSpace, Matrix3, Quaternion, Rad, Rotation3, Zero};

const EPSILON: f32 = 1e-9;

/// Performs one refinement iteration of the iterative polar decomposition,
/// nudging `q` toward the rotation factor of `a`. Call once per substep;
/// repeated calls across substeps converge the same way repeated inner
/// iterations would within a single substep.
pub fn extract_rotation_step(a: Matrix3<f32>, q: Quaternion<f32>) -> Quaternion<f32> {
    let r = Matrix3::from(q);

    let omega_num = r.x.cross(a.x) + r.y.cross(a.y) + r.z.cross(a.z);
    let denom = r.x.dot(a.x) + r.y.dot(a.y) + r.z.dot(a.z) + EPSILON;
    let omega = omega_num / denom;

    let w = omega.magnitude();
    if w < EPSILON {
        return q;
    }

    let axis = omega / w;
    let delta = Quaternion::from_axis_angle(axis, Rad(w));
    (delta * q).normalize()
}

/// Computes the shape-matching covariance-like matrix `A = Σ_i p_iᵀ · ref_i`
/// for a rigid body, where `p_i = predicted_i − centroid`.
pub fn covariance_matrix<I>(centered_predicted: I, reference: I) -> Matrix3<f32>
where
    I: IntoIterator<Item = cgmath::Vector3<f32>>,
{
    let mut a = Matrix3::zero();
    let mut ref_iter = reference.into_iter();
    for p in centered_predicted {
        if let Some(r) = ref_iter.next() {
            a.x += p * r.x;
            a.y += p * r.y;
            a.z += p * r.z;
        }
    }
    a
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use cgmath::{vec3, Vector3};

    #[test]
    fn identity_covariance_keeps_identity_quaternion() {
        // Reference shape and predicted shape coincide exactly: A is symmetric
        // PSD, its rotation factor is the identity, so one refinement step
        // starting from identity must remain (near) identity.
        let points = [vec3(1.0, 0.0, 0.0), vec3(0.0, 1.0, 0.0), vec3(0.0, 0.0, 1.0), vec3(-1.0, -1.0, -1.0)];
        let a = covariance_matrix(points.to_vec(), points.to_vec());
        let q = extract_rotation_step(a, Quaternion::new(1.0, 0.0, 0.0, 0.0));
        let identity = Quaternion::new(1.0, 0.0, 0.0, 0.0);
        assert_relative_eq!(q.s, identity.s, epsilon = 1e-4);
        assert_relative_eq!(q.v.magnitude(), 0.0, epsilon = 1e-4);
    }

    #[test]
    fn converges_toward_known_rotation() {
        // Rotate a reference shape by 90 degrees about Z and verify repeated
        // single-step refinements converge toward that rotation.
        let reference = vec![vec3(1.0, 0.0, 0.0), vec3(0.0, 1.0, 0.0), vec3(1.0, 1.0, 0.0), vec3(-1.0, 0.5, 0.0)];
        let true_rotation = Quaternion::from_axis_angle(Vector3::unit_z(), Rad(std::f32::consts::FRAC_PI_2));
        let rotated: Vec<_> = reference.iter().map(|p| true_rotation * p).collect();

        let mut q = Quaternion::new(1.0, 0.0, 0.0, 0.0);
        for _ in 0..32 {
            let a = covariance_matrix(rotated.clone(), reference.clone());
            q = extract_rotation_step(a, q);
        }

        let dot = (q.s * true_rotation.s + q.v.dot(true_rotation.v)).abs();
        assert!(dot > 0.999, "expected convergence, got dot={}", dot);
    }
}
