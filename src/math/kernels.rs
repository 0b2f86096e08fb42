//! SPH smoothing kernels used by the fluid density/lambda pass and by Akinci
//! cohesion. These are plain, deterministic host functions; the GPU shaders
//! under `shaders/kernels.glsl` implement the identical formulas bit-for-bit
//! so that host-side unit tests here double as the reference for the device
//! code.

use cgmath::{InnerSpace, Vector3, Zero};

/// Poly6 kernel: `(315 / (64·π·h⁹)) · (h² − |r|²)³` for `|r| < h`, else 0.
pub fn poly6(r: Vector3<f32>, h: f32) -> f32 {
    let r2 = r.magnitude2();
    let h2 = h * h;
    if r2 >= h2 {
        return 0.0;
    }
    let diff = h2 - r2;
    (315.0 / (64.0 * std::f32::consts::PI * h.powi(9))) * diff * diff * diff
}

/// Gradient of the spiky kernel: `−(45 / (π·h⁶)) · (h − |r|)² · r̂` for `0 < |r| < h`, else 0.
pub fn spiky_gradient(r: Vector3<f32>, h: f32) -> Vector3<f32> {
    let r_len = r.magnitude();
    if r_len <= 0.0 || r_len >= h {
        return Vector3::zero();
    }
    let diff = h - r_len;
    let scale = -(45.0 / (std::f32::consts::PI * h.powi(6))) * diff * diff;
    (r / r_len) * scale
}

/// Gradient of the poly6 kernel itself (as opposed to the spiky gradient,
/// which is normally preferred for pressure-like gradients because poly6's
/// gradient vanishes at the origin). Akinci cohesion/surface normals need
/// this one specifically: `∇poly6(r,h) = −6·(315/(64·π·h⁹))·(h²−|r|²)²·r`.
pub fn poly6_gradient(r: Vector3<f32>, h: f32) -> Vector3<f32> {
    let r2 = r.magnitude2();
    let h2 = h * h;
    if r2 >= h2 {
        return Vector3::zero();
    }
    let diff = h2 - r2;
    let scale = -6.0 * (315.0 / (64.0 * std::f32::consts::PI * h.powi(9))) * diff * diff;
    r * scale
}

/// Akinci cohesion kernel: piecewise cubic with compact support `h`, used by
/// the surface-tension/cohesion pass. Normalized so that integrating the
/// kernel over its support yields unit mass, per Akinci et al. 2013.
pub fn cohesion_kernel(r: Vector3<f32>, h: f32) -> f32 {
    let r_len = r.magnitude();
    if r_len <= 0.0 || r_len > h {
        return 0.0;
    }
    let scale = 32.0 / (std::f32::consts::PI * h.powi(9));
    let term = (h - r_len).powi(3) * r_len.powi(3);
    if 2.0 * r_len > h {
        scale * term
    } else {
        scale * (2.0 * term - h.powi(6) / 64.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use cgmath::vec3;

    #[test]
    fn poly6_zero_outside_support() {
        let h = 1.0;
        assert_eq!(poly6(vec3(1.5, 0.0, 0.0), h), 0.0);
        assert_eq!(poly6(vec3(1.0, 0.0, 0.0), h), 0.0);
    }

    #[test]
    fn poly6_peak_at_origin() {
        let h = 1.0;
        let at_origin = poly6(Vector3::zero(), h);
        let near_origin = poly6(vec3(0.1, 0.0, 0.0), h);
        assert!(at_origin > near_origin);
        assert_relative_eq!(at_origin, 315.0 / (64.0 * std::f32::consts::PI), epsilon = 1e-4);
    }

    #[test]
    fn poly6_is_positive_and_symmetric() {
        let h = 2.0;
        let a = poly6(vec3(0.3, 0.4, 0.0), h);
        let b = poly6(vec3(-0.3, -0.4, 0.0), h);
        assert!(a > 0.0);
        assert_relative_eq!(a, b, epsilon = 1e-6);
    }

    #[test]
    fn spiky_gradient_zero_outside_support_and_at_origin() {
        let h = 1.0;
        assert_eq!(spiky_gradient(vec3(1.2, 0.0, 0.0), h), Vector3::zero());
        assert_eq!(spiky_gradient(Vector3::zero(), h), Vector3::zero());
    }

    #[test]
    fn spiky_gradient_points_away_from_neighbor() {
        // r = p_i - p_j; gradient w.r.t. p_i should point along r (away from neighbor).
        let h = 1.0;
        let r = vec3(0.3, 0.0, 0.0);
        let grad = spiky_gradient(r, h);
        assert!(grad.x < 0.0, "spiky gradient sign convention: {:?}", grad);
        assert_relative_eq!(grad.y, 0.0, epsilon = 1e-6);
        assert_relative_eq!(grad.z, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn poly6_gradient_zero_outside_support_and_at_origin() {
        let h = 1.0;
        assert_eq!(poly6_gradient(vec3(1.5, 0.0, 0.0), h), Vector3::zero());
        assert_eq!(poly6_gradient(Vector3::zero(), h), Vector3::zero());
    }

    #[test]
    fn poly6_gradient_points_toward_neighbor() {
        // r = p_i - p_j; poly6 decreases with |r|, so its gradient w.r.t. p_i
        // must point back toward the neighbor (negative x for positive r.x).
        let h = 1.0;
        let grad = poly6_gradient(vec3(0.3, 0.0, 0.0), h);
        assert!(grad.x < 0.0, "poly6 gradient sign convention: {:?}", grad);
    }

    #[test]
    fn cohesion_kernel_zero_outside_support() {
        let h = 1.0;
        assert_eq!(cohesion_kernel(vec3(1.1, 0.0, 0.0), h), 0.0);
        assert_eq!(cohesion_kernel(Vector3::zero(), h), 0.0);
    }

    #[test]
    fn cohesion_kernel_continuous_at_half_support() {
        let h = 1.0;
        let eps = 1e-4;
        let just_below = cohesion_kernel(vec3(h / 2.0 - eps, 0.0, 0.0), h);
        let just_above = cohesion_kernel(vec3(h / 2.0 + eps, 0.0, 0.0), h);
        assert_relative_eq!(just_below, just_above, epsilon = 1e-2);
    }

    #[test]
    fn cohesion_kernel_positive_within_support() {
        let h = 1.0;
        assert!(cohesion_kernel(vec3(0.2, 0.0, 0.0), h) > 0.0);
        assert!(cohesion_kernel(vec3(0.7, 0.0, 0.0), h) > 0.0);
    }
}
