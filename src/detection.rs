//! Hand-off of detected photons.
//!
//! When a boundary interaction ends in detection, the process builds a
//! [`Hit`] and passes it to a [`DetectionSink`]. The sink stands in for the
//! sensitive detector of a full simulation: it may record, filter or apply
//! a detector response.

use nalgebra::Vector3;
use serde::Serialize;

use crate::photon::{Outcome, PhotonState};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collector_keeps_hits_in_order() {
        let mut collector = HitCollector::new();
        let photon = PhotonState::from_wavelength_nm(Vector3::z(), Vector3::x(), 400.0);
        for i in 0..3 {
            collector.record(Hit::new("cathode", Vector3::new(i as f64, 0.0, 0.0), &photon, Outcome::Detected));
        }
        assert_eq!(collector.len(), 3);
        assert_eq!(collector.hits()[2].position.x, 2.0);
        assert!((collector.hits()[0].wavelength_nm - 400.0).abs() < 1e-9);
        let hits = collector.into_hits();
        assert_eq!(hits[0].outcome, "Detection");
    }

    #[test]
    fn hits_serialize_with_vector_fields() {
        let photon = PhotonState::new(Vector3::z(), Vector3::x(), 3.0);
        let hit = Hit::new("cathode", Vector3::new(1.0, 2.0, 3.0), &photon, Outcome::Detected);
        let json = serde_json::to_value(&hit).unwrap();
        assert_eq!(json["position"], serde_json::json!([1.0, 2.0, 3.0]));
        assert_eq!(json["momentum"], serde_json::json!([0.0, 0.0, 1.0]));
        assert_eq!(json["outcome"], "Detection");
    }

    #[test]
    fn null_sink_drops_hits() {
        let mut sink = NullSink;
        let photon = PhotonState::new(Vector3::z(), Vector3::x(), 3.0);
        sink.record(Hit::new("x", Vector3::zeros(), &photon, Outcome::Detected));
    }
}

/// A detected photon.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Hit {
    pub interface: String,
    pub position: Vector3<f64>,
    pub momentum: Vector3<f64>,
    pub polarization: Vector3<f64>,
    /// Photon energy in eV.
    pub energy: f64,
    pub wavelength_nm: f64,
    /// Energy deposited in the sensor, in eV.
    pub deposited_energy: f64,
    pub outcome: &'static str,
}

impl Hit {
    pub fn new(interface: &str, position: Vector3<f64>, photon: &PhotonState, outcome: Outcome) -> Self {
        Self {
            interface: interface.to_string(),
            position,
            momentum: photon.momentum,
            polarization: photon.polarization,
            energy: photon.energy,
            wavelength_nm: photon.wavelength_nm(),
            deposited_energy: photon.deposited_energy,
            outcome: outcome.name(),
        }
    }
}

/// Receiver of detected photons.
pub trait DetectionSink {
    fn record(&mut self, hit: Hit);
}

/// Keeps every hit.
#[derive(Debug, Clone, Default)]
pub struct HitCollector {
    hits: Vec<Hit>,
}

impl HitCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hits(&self) -> &[Hit] {
        &self.hits
    }

    pub fn into_hits(self) -> Vec<Hit> {
        self.hits
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
}

impl DetectionSink for HitCollector {
    fn record(&mut self, hit: Hit) {
        self.hits.push(hit);
    }
}

/// Discards every hit.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl DetectionSink for NullSink {
    fn record(&mut self, _hit: Hit) {}
}
