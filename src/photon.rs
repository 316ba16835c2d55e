//! Photon state and interaction outcomes.
//!
//! [`PhotonState`] is the part of an optical photon the boundary process
//! reads and updates: direction, polarization, energy, velocity and whether
//! it is still alive. [`Outcome`] tags what happened at the boundary. It is a
//! sum type over the interaction families (reflected, refracted, transmitted,
//! absorbed, detected, skipped), each carrying the fine-grained kind as data;
//! [`Outcome::name`] gives the conventional name of every kind.

use std::fmt;

use nalgebra::Vector3;
use serde::Serialize;

use crate::config::{C_LIGHT, HC_EV_MM, MM_TO_NM};
use crate::surface::MeasuredFinish;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wavelength_energy_round_trip() {
        let photon = PhotonState::from_wavelength_nm(Vector3::z(), Vector3::x(), 400.0);
        assert!((photon.energy - 3.0996).abs() < 1e-3);
        assert!((photon.wavelength_nm() - 400.0).abs() < 1e-9);
        assert!((photon.wavelength() - 400e-6).abs() < 1e-15);
        assert_eq!(photon.velocity, C_LIGHT);
        assert!(photon.alive);
        assert_eq!(photon.status, Outcome::Undefined);
    }

    #[test]
    fn outcome_names() {
        assert_eq!(Outcome::Reflected(ReflectionKind::TotalInternal).name(), "TotalInternalReflection");
        assert_eq!(Outcome::Refracted(RefractionKind::Fresnel).name(), "FresnelRefraction");
        assert_eq!(Outcome::Refracted(RefractionKind::CoatedFrustrated).name(), "CoatedFrustratedTransmission");
        assert_eq!(Outcome::Transmitted(TransmissionKind::Dichroic).name(), "Dichroic");
        assert_eq!(Outcome::Skipped(SkipReason::StepTooSmall).name(), "StepTooSmall");
        assert_eq!(
            Outcome::Reflected(ReflectionKind::Measured(MeasuredFinish::GroundTioAir)).name(),
            "GroundTiOAirReflection"
        );
        assert_eq!(Outcome::Absorbed.to_string(), "Absorption");
    }

    #[test]
    fn outcome_families() {
        assert_eq!(Outcome::Reflected(ReflectionKind::Backscatter).family(), Family::Reflected);
        assert_eq!(Outcome::Refracted(RefractionKind::Coated).family(), Family::Refracted);
        assert_eq!(Outcome::Skipped(SkipReason::SameMaterial).family(), Family::Skipped);
        assert!(Outcome::Detected.is_terminal());
        assert!(Outcome::NoRefractiveIndex.is_terminal());
        assert!(!Outcome::Transmitted(TransmissionKind::Plain).is_terminal());
        assert!(Outcome::Transmitted(TransmissionKind::Plain).enters_next_medium());
        assert!(Outcome::Refracted(RefractionKind::Fresnel).enters_next_medium());
        assert!(!Outcome::Reflected(ReflectionKind::Fresnel).enters_next_medium());
    }
}

/// Optical photon as seen by the boundary process.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhotonState {
    /// Unit propagation direction.
    pub momentum: Vector3<f64>,
    /// Unit polarization, perpendicular to `momentum`.
    pub polarization: Vector3<f64>,
    /// Photon energy in eV.
    pub energy: f64,
    /// Propagation speed in mm/ns.
    pub velocity: f64,
    /// Outcome of the last boundary interaction.
    pub status: Outcome,
    /// Energy deposited when the photon was killed, in eV.
    pub deposited_energy: f64,
    pub alive: bool,
}

impl PhotonState {
    pub fn new(momentum: Vector3<f64>, polarization: Vector3<f64>, energy: f64) -> Self {
        Self {
            momentum,
            polarization,
            energy,
            velocity: C_LIGHT,
            status: Outcome::Undefined,
            deposited_energy: 0.0,
            alive: true,
        }
    }

    pub fn from_wavelength_nm(momentum: Vector3<f64>, polarization: Vector3<f64>, wavelength: f64) -> Self {
        Self::new(momentum, polarization, HC_EV_MM * MM_TO_NM / wavelength)
    }

    /// Vacuum wavelength in mm.
    pub fn wavelength(&self) -> f64 {
        HC_EV_MM / self.energy
    }

    pub fn wavelength_nm(&self) -> f64 {
        self.wavelength() * MM_TO_NM
    }

    /// Stops the photon, depositing `energy` eV.
    pub fn kill(&mut self, energy: f64) {
        self.alive = false;
        self.deposited_energy = energy;
    }
}

/// Why the boundary process did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SkipReason {
    NotAtBoundary,
    SameMaterial,
    StepTooSmall,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReflectionKind {
    TotalInternal,
    Fresnel,
    Lambertian,
    SpecularLobe,
    SpecularSpike,
    Backscatter,
    Coated,
    Measured(MeasuredFinish),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RefractionKind {
    Fresnel,
    Coated,
    /// Tunnelling through a coating beyond its critical angle.
    CoatedFrustrated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransmissionKind {
    /// Straight through, direction unchanged.
    Plain,
    Dichroic,
}

/// Result of one boundary interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Outcome {
    #[default]
    Undefined,
    Skipped(SkipReason),
    /// The medium being left has no refractive index; the photon is killed.
    NoRefractiveIndex,
    Reflected(ReflectionKind),
    Refracted(RefractionKind),
    Transmitted(TransmissionKind),
    Absorbed,
    Detected,
}

/// Coarse grouping of outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Family {
    Undefined,
    Skipped,
    Killed,
    Reflected,
    Refracted,
    Transmitted,
    Absorbed,
    Detected,
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Family::Undefined => "undefined",
            Family::Skipped => "skipped",
            Family::Killed => "killed",
            Family::Reflected => "reflected",
            Family::Refracted => "refracted",
            Family::Transmitted => "transmitted",
            Family::Absorbed => "absorbed",
            Family::Detected => "detected",
        };
        f.write_str(name)
    }
}

impl Outcome {
    pub fn family(&self) -> Family {
        match self {
            Outcome::Undefined => Family::Undefined,
            Outcome::Skipped(_) => Family::Skipped,
            Outcome::NoRefractiveIndex => Family::Killed,
            Outcome::Reflected(_) => Family::Reflected,
            Outcome::Refracted(_) => Family::Refracted,
            Outcome::Transmitted(_) => Family::Transmitted,
            Outcome::Absorbed => Family::Absorbed,
            Outcome::Detected => Family::Detected,
        }
    }

    /// Conventional name of the outcome.
    pub fn name(&self) -> &'static str {
        match self {
            Outcome::Undefined => "Undefined",
            Outcome::Skipped(SkipReason::NotAtBoundary) => "NotAtBoundary",
            Outcome::Skipped(SkipReason::SameMaterial) => "SameMaterial",
            Outcome::Skipped(SkipReason::StepTooSmall) => "StepTooSmall",
            Outcome::NoRefractiveIndex => "NoRefractiveIndex",
            Outcome::Reflected(kind) => match kind {
                ReflectionKind::TotalInternal => "TotalInternalReflection",
                ReflectionKind::Fresnel => "FresnelReflection",
                ReflectionKind::Lambertian => "LambertianReflection",
                ReflectionKind::SpecularLobe => "SpecularLobeReflection",
                ReflectionKind::SpecularSpike => "SpecularSpikeReflection",
                ReflectionKind::Backscatter => "Backscatter",
                ReflectionKind::Coated => "CoatedReflection",
                ReflectionKind::Measured(finish) => finish.reflection_name(),
            },
            Outcome::Refracted(RefractionKind::Fresnel) => "FresnelRefraction",
            Outcome::Refracted(RefractionKind::Coated) => "CoatedRefraction",
            Outcome::Refracted(RefractionKind::CoatedFrustrated) => "CoatedFrustratedTransmission",
            Outcome::Transmitted(TransmissionKind::Plain) => "Transmission",
            Outcome::Transmitted(TransmissionKind::Dichroic) => "Dichroic",
            Outcome::Absorbed => "Absorption",
            Outcome::Detected => "Detection",
        }
    }

    /// True when the photon is killed at the boundary.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Outcome::Absorbed | Outcome::Detected | Outcome::NoRefractiveIndex)
    }

    /// True when the photon ends up in the second medium.
    pub fn enters_next_medium(&self) -> bool {
        matches!(self, Outcome::Refracted(_) | Outcome::Transmitted(_))
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
