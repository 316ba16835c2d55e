//! Micro-facet normals for rough surfaces.
//!
//! Real surfaces are not perfect planes. Rough finishes are modelled by
//! replacing the geometric normal with a randomly tilted facet normal before
//! applying the reflection/refraction algebra. Two facet distributions are
//! supported:
//! - **Glisur**: the normal is smeared by a random vector in the unit ball,
//!   scaled by `1 - polish`
//! - **Unified**: the tilt angle `α` follows `g(α; 0, σα)·sin α` on
//!   `[0, π/2)`, with a uniform azimuth
//!
//! Both only accept facets the incoming photon can actually hit, i.e. facets
//! facing the photon. Every accept/reject loop is capped at
//! [`MAX_SAMPLING_TRIALS`]; `None` means the cap was reached.

use std::f64::consts::{FRAC_PI_2, PI};

use nalgebra::Vector3;
use rand::Rng;
use rand_distr::{Distribution, StandardNormal, UnitSphere};
use serde::{Deserialize, Serialize};

use crate::config::MAX_SAMPLING_TRIALS;

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn rotate_uz_maps_z_onto_axis() {
        let axis = Vector3::new(1.0, 2.0, -0.5).normalize();
        let rotated = rotate_uz(&Vector3::z(), &axis);
        assert!((rotated - axis).norm() < 1e-12);
        let rotated = rotate_uz(&Vector3::z(), &-Vector3::z());
        assert!((rotated + Vector3::z()).norm() < 1e-12);
    }

    #[test]
    fn orthogonal_is_orthogonal() {
        for v in [
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(0.3, -2.0, 0.1),
            Vector3::new(0.0, 0.0, 5.0),
        ] {
            let o = orthogonal(&v);
            assert!(o.norm() > 0.0);
            assert!(o.dot(&v).abs() < 1e-12);
        }
    }

    #[test]
    fn smooth_surfaces_return_geometric_normal() {
        let mut rng = StdRng::seed_from_u64(1);
        let normal = Vector3::z();
        let momentum = -Vector3::z();
        let unified = FacetModel::Unified { sigma_alpha: 0.0 };
        let glisur = FacetModel::Glisur { polish: 1.0 };
        assert_eq!(unified.sample(&momentum, &normal, &mut rng), Some(normal));
        assert_eq!(glisur.sample(&momentum, &normal, &mut rng), Some(normal));
    }

    #[test]
    fn facets_face_the_photon() {
        let mut rng = StdRng::seed_from_u64(2);
        let normal = Vector3::z();
        let momentum = Vector3::new(0.8, 0.0, -0.6);
        for model in [
            FacetModel::Unified { sigma_alpha: 0.3 },
            FacetModel::Glisur { polish: 0.2 },
        ] {
            for _ in 0..1000 {
                let facet = model.sample(&momentum, &normal, &mut rng).unwrap();
                assert!((facet.norm() - 1.0).abs() < 1e-9);
                assert!(momentum.dot(&facet) < 0.0);
                assert!(facet.dot(&normal) > 0.0);
            }
        }
    }

    #[test]
    fn unified_tilt_grows_with_sigma() {
        let mut rng = StdRng::seed_from_u64(3);
        let normal = Vector3::z();
        let momentum = -Vector3::z();
        let mean_tilt = |sigma: f64, rng: &mut StdRng| {
            let model = FacetModel::Unified { sigma_alpha: sigma };
            (0..2000)
                .map(|_| model.sample(&momentum, &normal, rng).unwrap().z.acos())
                .sum::<f64>()
                / 2000.0
        };
        let small = mean_tilt(0.05, &mut rng);
        let large = mean_tilt(0.4, &mut rng);
        assert!(small < large);
        assert!(small < 0.15, "small: {}", small);
    }

    #[test]
    fn lambertian_follows_cosine_law() {
        let mut rng = StdRng::seed_from_u64(4);
        let normal = Vector3::new(0.0, 1.0, 0.0);
        let n = 20000;
        let mut mean_cos = 0.0;
        for _ in 0..n {
            let v = lambertian(&normal, &mut rng).unwrap();
            let c = v.dot(&normal);
            assert!(c >= 0.0);
            mean_cos += c;
        }
        mean_cos /= n as f64;
        // <cos> = 2/3 for a cosine-weighted hemisphere
        assert!((mean_cos - 2.0 / 3.0).abs() < 0.01, "mean cos: {}", mean_cos);
    }
}

/// Distribution of micro-facet normals.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FacetModel {
    /// Smear the normal by `(1 - polish)` times a random vector in the unit
    /// ball. `polish = 1` is a perfect surface.
    Glisur { polish: f64 },
    /// Gaussian tilt with standard deviation `sigma_alpha` (radians).
    Unified { sigma_alpha: f64 },
}

impl Default for FacetModel {
    fn default() -> Self {
        FacetModel::Glisur { polish: 1.0 }
    }
}

impl FacetModel {
    pub fn is_unified(&self) -> bool {
        matches!(self, FacetModel::Unified { .. })
    }

    /// Samples a facet normal around `normal` for a photon travelling along
    /// `momentum`. The result is a unit vector with `momentum · facet < 0`.
    pub fn sample<R: Rng>(
        &self,
        momentum: &Vector3<f64>,
        normal: &Vector3<f64>,
        rng: &mut R,
    ) -> Option<Vector3<f64>> {
        match *self {
            FacetModel::Unified { sigma_alpha } => unified(momentum, normal, sigma_alpha, rng),
            FacetModel::Glisur { polish } => glisur(momentum, normal, polish, rng),
        }
    }
}

fn unified<R: Rng>(
    momentum: &Vector3<f64>,
    normal: &Vector3<f64>,
    sigma_alpha: f64,
    rng: &mut R,
) -> Option<Vector3<f64>> {
    if sigma_alpha == 0.0 {
        return Some(*normal);
    }
    let f_max = (4.0 * sigma_alpha).min(1.0);

    for _ in 0..MAX_SAMPLING_TRIALS {
        // alpha ~ g(alpha; 0, sigma) * sin(alpha) on [0, pi/2)
        let (alpha, sin_alpha) = (0..MAX_SAMPLING_TRIALS).find_map(|_| {
            let z: f64 = StandardNormal.sample(rng);
            let alpha = sigma_alpha * z;
            let sin_alpha = alpha.sin();
            let accept = rng.random::<f64>() * f_max <= sin_alpha && alpha < FRAC_PI_2;
            accept.then_some((alpha, sin_alpha))
        })?;

        let phi = rng.random::<f64>() * 2.0 * PI;
        let local = Vector3::new(sin_alpha * phi.cos(), sin_alpha * phi.sin(), alpha.cos());
        let facet = rotate_uz(&local, normal);
        if momentum.dot(&facet) < 0.0 {
            return Some(facet);
        }
    }
    None
}

fn glisur<R: Rng>(
    momentum: &Vector3<f64>,
    normal: &Vector3<f64>,
    polish: f64,
    rng: &mut R,
) -> Option<Vector3<f64>> {
    if polish >= 1.0 {
        return Some(*normal);
    }
    for _ in 0..MAX_SAMPLING_TRIALS {
        let smear = (0..MAX_SAMPLING_TRIALS).find_map(|_| {
            let smear = Vector3::new(
                2.0 * rng.random::<f64>() - 1.0,
                2.0 * rng.random::<f64>() - 1.0,
                2.0 * rng.random::<f64>() - 1.0,
            );
            (smear.norm_squared() <= 1.0).then_some(smear)
        })?;
        let facet = normal + (1.0 - polish) * smear;
        if momentum.dot(&facet) < 0.0 {
            return Some(facet.normalize());
        }
    }
    None
}

/// Cosine-weighted random direction in the hemisphere around `normal`.
pub fn lambertian<R: Rng>(normal: &Vector3<f64>, rng: &mut R) -> Option<Vector3<f64>> {
    for _ in 0..MAX_SAMPLING_TRIALS {
        let [x, y, z]: [f64; 3] = UnitSphere.sample(rng);
        let mut v = Vector3::new(x, y, z);
        let mut ndotv = normal.dot(&v);
        if ndotv < 0.0 {
            v = -v;
            ndotv = -ndotv;
        }
        if rng.random::<f64>() < ndotv {
            return Some(v);
        }
    }
    None
}

/// Rotates `v` from a frame whose z axis is the unit vector `axis` into the
/// global frame.
pub fn rotate_uz(v: &Vector3<f64>, axis: &Vector3<f64>) -> Vector3<f64> {
    let (u1, u2, u3) = (axis.x, axis.y, axis.z);
    let up = u1 * u1 + u2 * u2;
    if up > 0.0 {
        let up = up.sqrt();
        let (px, py, pz) = (v.x, v.y, v.z);
        Vector3::new(
            (u1 * u3 * px - u2 * py) / up + u1 * pz,
            (u2 * u3 * px + u1 * py) / up + u2 * pz,
            -up * px + u3 * pz,
        )
    } else if u3 < 0.0 {
        Vector3::new(-v.x, v.y, -v.z)
    } else {
        *v
    }
}

/// Some vector orthogonal to `v`, built from its two largest components.
pub fn orthogonal(v: &Vector3<f64>) -> Vector3<f64> {
    let (x, y, z) = (v.x.abs(), v.y.abs(), v.z.abs());
    if x < y {
        if x < z {
            Vector3::new(0.0, v.z, -v.y)
        } else {
            Vector3::new(v.y, -v.x, 0.0)
        }
    } else if y < z {
        Vector3::new(-v.z, 0.0, v.x)
    } else {
        Vector3::new(v.y, -v.x, 0.0)
    }
}
