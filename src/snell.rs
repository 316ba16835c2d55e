//! Snell's law and the vector geometry of reflection and refraction.
//!
//! This module holds the direction and polarization algebra shared by the
//! dielectric, metal and coated boundary models:
//! - Snell's law for real indices, with total internal reflection detection
//! - Complex cosines for absorbing media and evanescent waves
//! - Decomposition of the polarization against the plane of incidence
//! - Specular reflection and refraction of momentum and polarization
//!
//! # Conventions
//!
//! The facet normal passed to these functions points back into the incident
//! medium, so that `cosθ1 = -k·n` is positive for a photon arriving at the
//! surface.

use nalgebra::{Complex, Vector3};

use crate::config::VEC_LENGTH_THRESHOLD;
use crate::facet::orthogonal;

#[cfg(test)]
mod tests {

    use super::*;
    use std::f64::consts::PI;

    #[test]
    fn normal_incidence_same_media() {
        let stt = sin_theta_t(0.0, 1.0, 1.0);
        assert!(stt.abs() < 1e-12)
    }

    #[test]
    fn angle30_incidence() {
        let theta_i: f64 = 30.0 * PI / 180.0;
        let theta_t = sin_theta_t(theta_i.sin(), 1.0, 1.31).asin();
        let abs_difference = (theta_t - 0.3916126).abs();
        assert!(abs_difference < 0.001)
    }

    #[test]
    fn total_internal_reflection_beyond_critical_angle() {
        let theta_i: f64 = 45f64.to_radians();
        let stt = sin_theta_t(theta_i.sin(), 1.5, 1.0);
        assert!(stt > 1.0);
        assert!(is_total_internal_reflection(stt));
        assert!(!is_total_internal_reflection(sin_theta_t(0.5, 1.5, 1.0)));
    }

    #[test]
    fn complex_cos_of_real_sine() {
        let c = complex_cos(Complex::new(0.6, 0.0), 1.0);
        assert!((c - Complex::new(0.8, 0.0)).norm() < 1e-12);
        let c = complex_cos(Complex::new(0.6, 0.0), -1.0);
        assert!((c + Complex::new(0.8, 0.0)).norm() < 1e-12);
        // evanescent: sine above one gives an imaginary cosine
        let c = complex_cos(Complex::new(1.25, 0.0), 1.0);
        assert!(c.re.abs() < 1e-12 && (c.im.abs() - 0.75).abs() < 1e-12);
    }

    #[test]
    fn reflection_preserves_angle() {
        let normal = Vector3::z();
        let prop = Vector3::new(1.0, 0.0, -1.0).normalize();
        let refl = reflection_vector(&prop, &normal);
        assert!((refl - Vector3::new(1.0, 0.0, 1.0).normalize()).norm() < 1e-12);
    }

    #[test]
    fn refraction_obeys_snell() {
        let normal = Vector3::z(); // points back into the incident medium
        let theta_i: f64 = 40f64.to_radians();
        let prop = Vector3::new(theta_i.sin(), 0.0, -theta_i.cos());
        let (n1, n2) = (1.0, 1.5);
        let sin2 = sin_theta_t(theta_i.sin(), n1, n2);
        let cos2 = (1.0 - sin2 * sin2).sqrt();
        let refr = refraction_vector(&prop, &normal, theta_i.cos(), cos2, n1, n2);
        assert!((refr.norm() - 1.0).abs() < 1e-12);
        assert!((refr.x - sin2).abs() < 1e-9, "refr: {}", refr);
        assert!(refr.z < 0.0);
    }

    #[test]
    fn incidence_plane_decomposition() {
        let normal = Vector3::z();
        let prop = Vector3::new(1.0, 0.0, -1.0).normalize();
        // polarization along y is perpendicular to the x-z plane of incidence
        let plane = IncidencePlane::new(&prop, &normal, &Vector3::y());
        assert!((plane.e_perp.abs() - 1.0).abs() < 1e-12);
        assert!(plane.e_parl.abs() < 1e-12);
        // at normal incidence the whole field counts as parallel
        let plane = IncidencePlane::new(&-Vector3::z(), &normal, &Vector3::x());
        assert_eq!(plane.e_perp, 0.0);
        assert_eq!(plane.e_parl, 1.0);
        assert_eq!(plane.a_trans, Vector3::x());
    }

    #[test]
    fn reflected_polarization_stays_transverse() {
        let normal = Vector3::z();
        let prop = Vector3::new(1.0, 0.0, -1.0).normalize();
        let pol = Vector3::new(1.0, 0.0, 1.0).normalize();
        let refl = reflection_vector(&prop, &normal);
        let new_pol = reflect_polarization(&pol, &normal);
        assert!(refl.dot(&new_pol).abs() < 1e-12);
    }
}

/// Sine of the transmitted angle from Snell's law, `n1·sinθ1 / n2`.
///
/// This is not necessarily a sine: values of one or more signal total
/// internal reflection.
pub fn sin_theta_t(sin_theta_i: f64, n1: f64, n2: f64) -> f64 {
    sin_theta_i * n1 / n2
}

/// True when Snell's law has no real solution.
pub fn is_total_internal_reflection(sin_theta_t: f64) -> bool {
    sin_theta_t >= 1.0
}

/// `sign · sqrt(1 - sin²)` on the principal branch.
pub fn complex_cos(sin: Complex<f64>, sign: f64) -> Complex<f64> {
    sign * (Complex::new(1.0, 0.0) - sin * sin).sqrt()
}

/// Specular reflection of `prop` about `normal`.
pub fn reflection_vector(prop: &Vector3<f64>, normal: &Vector3<f64>) -> Vector3<f64> {
    let w = prop.dot(normal);
    (prop - 2.0 * w * normal).normalize()
}

/// Mirror image of the polarization about `normal`, `-E + 2(E·n)n`.
pub fn reflect_polarization(pol: &Vector3<f64>, normal: &Vector3<f64>) -> Vector3<f64> {
    -pol + 2.0 * pol.dot(normal) * normal
}

/// Refracted propagation vector for a photon going from `n1` to `n2`.
///
/// `cos1` and `cos2` are the cosines of the incident and transmitted angles,
/// measured against `normal` which points back into the incident medium.
pub fn refraction_vector(
    prop: &Vector3<f64>,
    normal: &Vector3<f64>,
    cos1: f64,
    cos2: f64,
    n1: f64,
    n2: f64,
) -> Vector3<f64> {
    let alpha = cos1 - cos2 * (n2 / n1);
    (prop + alpha * normal).normalize()
}

/// Decomposition of the incident polarization against the plane of
/// incidence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IncidencePlane {
    /// Unit vector perpendicular to the plane of incidence.
    pub a_trans: Vector3<f64>,
    /// Field component along `a_trans` (TE).
    pub e_perp: f64,
    /// Field component along `prop × a_trans` (TM).
    pub e_parl: f64,
}

impl IncidencePlane {
    /// Decomposes `pol` for a photon travelling along `prop` onto a surface
    /// with normal `normal`.
    ///
    /// At normal incidence the plane is undefined; the whole field is then
    /// taken as parallel and `a_trans` is the polarization itself.
    pub fn new(prop: &Vector3<f64>, normal: &Vector3<f64>, pol: &Vector3<f64>) -> Self {
        let cross = prop.cross(normal);
        if cross.norm() > VEC_LENGTH_THRESHOLD {
            let a_trans = cross.normalize();
            let e_perp = pol.dot(&a_trans);
            let e_parl = pol.dot(&prop.cross(&a_trans).normalize());
            Self {
                a_trans,
                e_perp,
                e_parl,
            }
        } else {
            Self {
                a_trans: *pol,
                e_perp: 0.0,
                e_parl: 1.0,
            }
        }
    }

    /// Polarization of an outgoing photon travelling along `new_prop` with
    /// field amplitudes `e2_perp`, `e2_parl`.
    pub fn outgoing_polarization(
        &self,
        new_prop: &Vector3<f64>,
        e2_perp: f64,
        e2_parl: f64,
    ) -> Vector3<f64> {
        let e2_abs = (e2_perp * e2_perp + e2_parl * e2_parl).sqrt();
        if e2_abs <= VEC_LENGTH_THRESHOLD {
            return orthogonal(new_prop).normalize();
        }
        let a_paral = new_prop.cross(&self.a_trans);
        let a_paral = if a_paral.norm() > VEC_LENGTH_THRESHOLD {
            a_paral.normalize()
        } else {
            orthogonal(new_prop).normalize()
        };
        (e2_parl / e2_abs) * a_paral + (e2_perp / e2_abs) * self.a_trans
    }
}
