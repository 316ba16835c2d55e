//! Measured angular look-up tables.
//!
//! Two measured reflectance models replace the Fresnel physics for surfaces
//! whose scattering has been characterised in the lab:
//! - [`CoarseLut`]: a density over exit angles `(θ, φ)` in 4° × 5° bins for
//!   each integer incidence angle (91 × 45 × 37 values)
//! - [`FineLut`]: per incidence degree, a long list of measured
//!   `(azimuth, elevation)` pairs for reflection and for transmission, plus
//!   a 90-entry reflectivity curve
//!
//! Neither uses Snell's law: the exit direction comes from the tables alone.
//! Sampling is by rejection (coarse) or uniform choice of a measured pair
//! (fine); both give up after [`MAX_SAMPLING_TRIALS`] attempts and return
//! `None`, which the caller treats as absorption.

use std::path::Path;

use nalgebra::{Rotation3, Unit, Vector3};
use ndarray::{Array3, ShapeBuilder};
use rand::Rng;

use crate::config::{CAR_TOLERANCE, MAX_SAMPLING_TRIALS};
use crate::error::{SetupError, SetupResult};
use crate::facet::orthogonal;

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    fn single_bin_coarse(incident: usize, theta: usize, phi: usize) -> CoarseLut {
        let mut values = vec![0.0; COARSE_LEN];
        values[incident + theta * INCIDENT_BINS + phi * THETA_BINS * INCIDENT_BINS] = 1.0;
        CoarseLut::from_flat(values, None).unwrap()
    }

    #[test]
    fn coarse_layout_matches_flat_index() {
        let lut = single_bin_coarse(30, 15, 18);
        assert_eq!(lut.value(30, 15, 18), 1.0);
        assert_eq!(lut.value(30, 18, 15), 0.0);
        assert_eq!(lut.value(31, 15, 18), 0.0);
    }

    #[test]
    fn coarse_rejects_wrong_size() {
        assert!(CoarseLut::from_flat(vec![0.0; 10], None).is_err());
        assert!(CoarseLut::from_flat(vec![0.0; COARSE_LEN], Some(vec![0.5; 3])).is_err());
    }

    #[test]
    fn coarse_specular_bin_reflects_specularly() {
        let mut rng = StdRng::seed_from_u64(11);
        // theta bin 15 is -30 deg, phi bin 18 is 0 deg
        let lut = single_bin_coarse(30, 15, 18);
        let global = Vector3::z();
        let a: f64 = 30f64.to_radians();
        let old = Vector3::new(a.sin(), 0.0, -a.cos());
        let new = lut.sample_direction(&old, &global, &mut rng).unwrap();
        let specular = Vector3::new(a.sin(), 0.0, a.cos());
        assert!((new - specular).norm() < 1e-9, "new: {}", new);
    }

    #[test]
    fn coarse_reproduces_table_shape() {
        let mut rng = StdRng::seed_from_u64(12);
        let mut values = vec![0.0; COARSE_LEN];
        let incident = 20;
        // two exit bins with a 3:1 density ratio
        let index = |t: usize, p: usize| incident + t * INCIDENT_BINS + p * THETA_BINS * INCIDENT_BINS;
        values[index(10, 18)] = 0.9;
        values[index(30, 18)] = 0.3;
        let lut = CoarseLut::from_flat(values, None).unwrap();
        let n = 4000;
        let mut first = 0;
        for _ in 0..n {
            let (t, p) = lut.sample_bins(incident, &mut rng).unwrap();
            assert_eq!(p, 18);
            if t == 10 {
                first += 1;
            } else {
                assert_eq!(t, 30);
            }
        }
        let fraction = first as f64 / n as f64;
        assert!((fraction - 0.75).abs() < 0.03, "fraction: {}", fraction);
    }

    #[test]
    fn coarse_without_data_gives_up() {
        let mut rng = StdRng::seed_from_u64(13);
        let lut = CoarseLut::from_flat(vec![0.0; COARSE_LEN], None).unwrap();
        assert!(lut.sample_bins(10, &mut rng).is_none());
    }

    #[test]
    fn coarse_reflectance_per_angle() {
        let mut reflectance = vec![0.5; INCIDENT_BINS];
        reflectance[0] = 0.9;
        let lut = CoarseLut::from_flat(vec![0.0; COARSE_LEN], Some(reflectance)).unwrap();
        assert_eq!(lut.reflectance(0), Some(0.9));
        assert_eq!(lut.reflectance(45), Some(0.5));
        assert_eq!(lut.reflectance(200), Some(0.5));
    }

    fn fine_lut(bins: usize, elevation: f32) -> FineLut {
        let mut distribution = vec![0.0f32; 4 * INCIDENT_BINS * bins];
        for pair in distribution.chunks_mut(2) {
            pair[0] = 0.5; // azimuth
            pair[1] = elevation;
        }
        FineLut::new(bins, vec![0.8; FINE_REFLECTIVITY_BINS], distribution).unwrap()
    }

    #[test]
    fn fine_rejects_wrong_sizes() {
        assert!(FineLut::new(4, vec![0.8; 10], vec![0.0; 4 * INCIDENT_BINS * 4]).is_err());
        assert!(FineLut::new(4, vec![0.8; FINE_REFLECTIVITY_BINS], vec![0.0; 7]).is_err());
        assert!(FineLut::new(0, vec![0.8; FINE_REFLECTIVITY_BINS], vec![]).is_err());
    }

    #[test]
    fn fine_incident_bin_is_clamped() {
        assert_eq!(FineLut::incident_bin(0.0), 0);
        assert_eq!(FineLut::incident_bin(45.7f64.to_radians()), 45);
        assert_eq!(FineLut::incident_bin(89.9f64.to_radians()), 89);
        assert_eq!(FineLut::incident_bin(std::f64::consts::FRAC_PI_2), 89);
    }

    #[test]
    fn fine_reflection_uses_measured_elevation() {
        let mut rng = StdRng::seed_from_u64(14);
        let lut = fine_lut(4, 0.3);
        let (azimuth, elevation) = lut.sample_reflection(10, &mut rng).unwrap();
        assert_eq!(azimuth, 0.5f32 as f64);
        assert_eq!(elevation, 0.3f32 as f64);
        let global = Vector3::z();
        let old = Vector3::new(0.3, 0.1, -0.9).normalize();
        let new = FineLut::direction(&global, &old, azimuth, elevation);
        assert!((new.norm() - 1.0).abs() < 1e-9);
        assert!((new.dot(&global) - elevation.cos()).abs() < 1e-9);
    }

    #[test]
    fn fine_skips_empty_pairs() {
        let mut rng = StdRng::seed_from_u64(15);
        let bins = 4;
        let mut distribution = vec![0.0f32; 4 * INCIDENT_BINS * bins];
        // only k = 3 has data for incident 10 (reflection block)
        let index = 2 * 3 - 1 + 9 * bins * 2;
        distribution[index - 1] = 1.0;
        distribution[index] = 0.2;
        let lut = FineLut::new(bins, vec![0.8; FINE_REFLECTIVITY_BINS], distribution).unwrap();
        for _ in 0..20 {
            assert_eq!(lut.sample_reflection(10, &mut rng), Some((1.0, 0.2f32 as f64)));
        }
        assert!(lut.sample_transmission(10, &mut rng).is_none());
    }

    #[test]
    fn parses_whitespace_separated_values() {
        let values = parse_values("1 2.5\n -3e-1\t4\n", "inline").unwrap();
        assert_eq!(values, vec![1.0, 2.5, -0.3, 4.0]);
        assert!(parse_values("1 two", "inline").is_err());
    }
}

/// Incidence bins (0° to 90° inclusive) shared by both table layouts.
pub const INCIDENT_BINS: usize = 91;
/// Exit polar bins of the coarse table, 4° wide starting at -90°.
pub const THETA_BINS: usize = 45;
/// Exit azimuth bins of the coarse table, 5° wide starting at -90°.
pub const PHI_BINS: usize = 37;
const COARSE_LEN: usize = INCIDENT_BINS * THETA_BINS * PHI_BINS;
/// Reflectivity entries of the fine table, one per incidence degree.
pub const FINE_REFLECTIVITY_BINS: usize = 90;

/// Coarse measured angular distribution.
#[derive(Debug, Clone, PartialEq)]
pub struct CoarseLut {
    /// Density indexed by `[incident, theta, phi]`.
    table: Array3<f64>,
    /// Optional reflectance per incidence degree.
    reflectance: Option<Vec<f64>>,
}

impl CoarseLut {
    /// Builds the table from its flat serialization, in which the incidence
    /// index varies fastest: `incident + θ·91 + φ·45·91`.
    pub fn from_flat(values: Vec<f64>, reflectance: Option<Vec<f64>>) -> SetupResult<Self> {
        if values.len() != COARSE_LEN {
            return Err(SetupError::InvalidTable {
                name: "coarse LUT".to_string(),
                reason: format!("expected {} values, found {}", COARSE_LEN, values.len()),
            });
        }
        if let Some(r) = &reflectance {
            if r.len() != INCIDENT_BINS {
                return Err(SetupError::InvalidTable {
                    name: "coarse LUT reflectance".to_string(),
                    reason: format!("expected {} values, found {}", INCIDENT_BINS, r.len()),
                });
            }
        }
        let table = Array3::from_shape_vec((INCIDENT_BINS, THETA_BINS, PHI_BINS).f(), values)
            .map_err(|e| SetupError::InvalidTable {
                name: "coarse LUT".to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self { table, reflectance })
    }

    /// Loads a whitespace-separated table file, with an optional reflectance
    /// file of 91 values.
    pub fn from_files(table: &Path, reflectance: Option<&Path>) -> SetupResult<Self> {
        let values = read_values(table)?;
        let reflectance = reflectance.map(read_values).transpose()?;
        Self::from_flat(values, reflectance)
    }

    pub fn value(&self, incident: usize, theta: usize, phi: usize) -> f64 {
        self.table[[incident, theta, phi]]
    }

    /// Measured reflectance at `incident` degrees, if the table carries one.
    pub fn reflectance(&self, incident: usize) -> Option<f64> {
        self.reflectance
            .as_ref()
            .map(|r| r[incident.min(INCIDENT_BINS - 1)])
    }

    /// Draws an exit bin pair by rejection against the measured density.
    pub fn sample_bins<R: Rng>(&self, incident: usize, rng: &mut R) -> Option<(usize, usize)> {
        let incident = incident.min(INCIDENT_BINS - 1);
        (0..MAX_SAMPLING_TRIALS).find_map(|_| {
            let theta = rng.random_range(0..THETA_BINS - 1);
            let phi = rng.random_range(0..PHI_BINS - 1);
            let density = self.table[[incident, theta, phi]];
            (rng.random::<f64>() < density).then_some((theta, phi))
        })
    }

    /// Exit angles in radians of a bin pair.
    pub fn exit_angles(theta: usize, phi: usize) -> (f64, f64) {
        (
            (-90.0 + 4.0 * theta as f64).to_radians(),
            (-90.0 + 5.0 * phi as f64).to_radians(),
        )
    }

    /// Samples a reflected direction for a photon travelling along `old`
    /// onto a surface whose normal `global` points back at it.
    ///
    /// The reversed momentum is tilted to the sampled polar angle within the
    /// plane of incidence, then turned by the sampled azimuth. Directions
    /// that do not leave the surface are resampled.
    pub fn sample_direction<R: Rng>(
        &self,
        old: &Vector3<f64>,
        global: &Vector3<f64>,
        rng: &mut R,
    ) -> Option<Vector3<f64>> {
        let incidence = old.angle(&-global);
        let incident = incidence.to_degrees().round() as usize;

        for _ in 0..MAX_SAMPLING_TRIALS {
            let (theta_bin, phi_bin) = self.sample_bins(incident, rng)?;
            let (theta, phi) = Self::exit_angles(theta_bin, phi_bin);

            let reversed = -old;
            let mut perp_theta = reversed.cross(global);
            if perp_theta.norm() < CAR_TOLERANCE {
                perp_theta = orthogonal(&reversed);
            }
            let tilt = Rotation3::from_axis_angle(&Unit::new_normalize(perp_theta), incidence - theta);
            let tilted = tilt * reversed;
            let perp_phi = perp_theta.cross(&tilted);
            let turn = Rotation3::from_axis_angle(&Unit::new_normalize(perp_phi), -phi);
            let new = (turn * tilted).normalize();
            if new.dot(global) > 0.0 {
                return Some(new);
            }
        }
        None
    }
}

/// Fine measured angular distribution.
#[derive(Debug, Clone, PartialEq)]
pub struct FineLut {
    bins: usize,
    reflectivity: Vec<f64>,
    /// `(azimuth, elevation)` pairs: the reflection block for incidence
    /// degrees 1..=90, followed by the transmission block.
    distribution: Vec<f32>,
}

impl FineLut {
    /// `bins` is the number of measured pairs per incidence degree.
    pub fn new(bins: usize, reflectivity: Vec<f64>, distribution: Vec<f32>) -> SetupResult<Self> {
        let invalid = |reason: String| SetupError::InvalidTable {
            name: "fine LUT".to_string(),
            reason,
        };
        if bins == 0 {
            return Err(invalid("zero bins per incidence angle".to_string()));
        }
        if reflectivity.len() != FINE_REFLECTIVITY_BINS {
            return Err(invalid(format!(
                "expected {} reflectivity values, found {}",
                FINE_REFLECTIVITY_BINS,
                reflectivity.len()
            )));
        }
        let expected = 2 * Self::block_len(bins);
        if distribution.len() != expected {
            return Err(invalid(format!(
                "expected {} distribution values, found {}",
                expected,
                distribution.len()
            )));
        }
        Ok(Self {
            bins,
            reflectivity,
            distribution,
        })
    }

    /// Loads the distribution and reflectivity files.
    pub fn from_files(bins: usize, distribution: &Path, reflectivity: &Path) -> SetupResult<Self> {
        let distribution = read_values(distribution)?.into_iter().map(|v| v as f32).collect();
        Self::new(bins, read_values(reflectivity)?, distribution)
    }

    fn block_len(bins: usize) -> usize {
        INCIDENT_BINS * bins * 2
    }

    pub fn bins(&self) -> usize {
        self.bins
    }

    /// Incidence degree used to index the table, rounded down and capped
    /// at 89.
    pub fn incident_bin(incidence: f64) -> usize {
        (incidence.to_degrees().floor().max(0.0) as usize).min(FINE_REFLECTIVITY_BINS - 1)
    }

    pub fn reflectivity(&self, incident: usize) -> f64 {
        self.reflectivity[incident.min(FINE_REFLECTIVITY_BINS - 1)]
    }

    /// Measured reflected `(azimuth, elevation)` for `incident ≥ 1`.
    pub fn sample_reflection<R: Rng>(&self, incident: usize, rng: &mut R) -> Option<(f64, f64)> {
        let base = incident.saturating_sub(1) * self.bins * 2;
        self.sample_pair(base, rng)
    }

    /// Measured transmitted `(azimuth, elevation)`.
    pub fn sample_transmission<R: Rng>(&self, incident: usize, rng: &mut R) -> Option<(f64, f64)> {
        let base = incident * self.bins * 2 + Self::block_len(self.bins);
        self.sample_pair(base, rng)
    }

    /// Pairs that are exactly `(0, 0)` carry no data and are redrawn.
    fn sample_pair<R: Rng>(&self, base: usize, rng: &mut R) -> Option<(f64, f64)> {
        (0..MAX_SAMPLING_TRIALS).find_map(|_| {
            let k = rng.random_range(1..=self.bins);
            let index = 2 * k - 1 + base;
            let azimuth = *self.distribution.get(index - 1)?;
            let elevation = *self.distribution.get(index)?;
            (azimuth != 0.0 || elevation != 0.0).then_some((azimuth as f64, elevation as f64))
        })
    }

    /// Direction at `elevation` from `axis` and `azimuth` measured from the
    /// plane of incidence of `old`.
    pub fn direction(axis: &Vector3<f64>, old: &Vector3<f64>, azimuth: f64, elevation: f64) -> Vector3<f64> {
        let v = axis.cross(old);
        let v = if v.norm() < CAR_TOLERANCE {
            orthogonal(axis).normalize()
        } else {
            v.normalize()
        };
        let sin_el = elevation.sin();
        let u = v.cross(axis) * (sin_el * azimuth.cos());
        let w = axis * elevation.cos();
        (u + v * (sin_el * azimuth.sin()) + w).normalize()
    }
}

/// Reads a whitespace-separated list of numbers.
pub fn read_values(path: &Path) -> SetupResult<Vec<f64>> {
    let content = std::fs::read_to_string(path)?;
    parse_values(&content, &path.display().to_string())
}

fn parse_values(content: &str, source: &str) -> SetupResult<Vec<f64>> {
    content
        .split_whitespace()
        .map(|token| {
            token.parse::<f64>().map_err(|e| SetupError::Parse {
                path: source.to_string(),
                reason: format!("'{}': {}", token, e),
            })
        })
        .collect()
}
