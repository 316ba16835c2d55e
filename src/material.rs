//! Optical media and energy-dependent material properties.
//!
//! A [`Medium`] carries the tabulated optical properties of one material:
//! refractive index, absorption length, group velocity and, for metals, the
//! real and imaginary parts of a complex refractive index. All properties are
//! [`PropertyVector`]s, tabulated against photon energy and linearly
//! interpolated. Media are loaded once at startup and shared read-only
//! between worker threads.

use nalgebra::Complex;
use serde::{Deserialize, Serialize};

use crate::config::{C_LIGHT, HC_EV_MM};
use crate::error::{SetupError, SetupResult};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_property() {
        let p = PropertyVector::constant(1.33);
        assert_eq!(p.value(1.0), 1.33);
        assert_eq!(p.value(10.0), 1.33);
    }

    #[test]
    fn interpolates_and_clamps() {
        let p = PropertyVector::new(vec![2.0, 3.0, 4.0], vec![1.0, 2.0, 4.0]).unwrap();
        assert!((p.value(2.5) - 1.5).abs() < 1e-12);
        assert!((p.value(3.5) - 3.0).abs() < 1e-12);
        assert_eq!(p.value(1.0), 1.0);
        assert_eq!(p.value(9.0), 4.0);
    }

    #[test]
    fn rejects_bad_tables() {
        assert!(PropertyVector::new(vec![], vec![]).is_err());
        assert!(PropertyVector::new(vec![1.0, 2.0], vec![1.0]).is_err());
        assert!(PropertyVector::new(vec![2.0, 1.0], vec![1.0, 1.0]).is_err());
    }

    #[test]
    fn deserializes_constant_and_table() {
        let p: PropertyVector = serde_json::from_str("1.5").unwrap();
        assert_eq!(p.value(3.0), 1.5);
        let p: PropertyVector =
            serde_json::from_str(r#"{"energies": [1.0, 2.0], "values": [0.0, 1.0]}"#).unwrap();
        assert!((p.value(1.5) - 0.5).abs() < 1e-12);
        assert!(serde_json::from_str::<PropertyVector>(r#"{"energies": [], "values": []}"#).is_err());
    }

    #[test]
    fn group_velocity_without_dispersion() {
        let water = Medium::new("water").with_rindex(PropertyVector::constant(1.33));
        let vg = water.group_velocity(3.0).unwrap();
        assert!((vg - C_LIGHT / 1.33).abs() < 1e-9);
    }

    #[test]
    fn group_velocity_with_normal_dispersion() {
        // index rising with energy slows the group below the phase velocity
        let glass = Medium::new("glass")
            .with_rindex(PropertyVector::new(vec![2.0, 4.0], vec![1.45, 1.50]).unwrap());
        let vg = glass.group_velocity(3.0).unwrap();
        assert!(vg < C_LIGHT / glass.rindex(3.0).unwrap());
        assert!(vg > 0.0);
    }

    #[test]
    fn tabulated_group_velocity_wins() {
        let m = Medium::new("m")
            .with_rindex(PropertyVector::constant(1.5))
            .with_groupvel(PropertyVector::constant(150.0));
        assert_eq!(m.group_velocity(2.0), Some(150.0));
    }

    #[test]
    fn imaginary_index_from_absorption_length() {
        let m = Medium::new("m").with_abslength(PropertyVector::constant(1.0));
        let energy = 3.0;
        let k = m.imaginary_index(energy);
        let wavelength = HC_EV_MM / energy;
        assert!((k - wavelength / (4.0 * std::f64::consts::PI)).abs() < 1e-15);
        assert_eq!(Medium::new("vacuum").imaginary_index(energy), 0.0);
    }
}

/// Wire form of a property: either a constant or an energy table.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum PropertySpec {
    Constant(f64),
    Table { energies: Vec<f64>, values: Vec<f64> },
}

/// A material property tabulated against photon energy (eV).
///
/// Values between nodes are linearly interpolated; outside the table the
/// nearest end value is used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "PropertySpec")]
pub struct PropertyVector {
    energies: Vec<f64>,
    values: Vec<f64>,
}

impl TryFrom<PropertySpec> for PropertyVector {
    type Error = SetupError;

    fn try_from(spec: PropertySpec) -> SetupResult<Self> {
        match spec {
            PropertySpec::Constant(value) => Ok(Self::constant(value)),
            PropertySpec::Table { energies, values } => Self::new(energies, values),
        }
    }
}

impl PropertyVector {
    /// Creates a property from energy nodes and values. Energies must be
    /// strictly increasing.
    pub fn new(energies: Vec<f64>, values: Vec<f64>) -> SetupResult<Self> {
        if energies.is_empty() {
            return Err(SetupError::InvalidProperty("empty table".to_string()));
        }
        if energies.len() != values.len() {
            return Err(SetupError::InvalidProperty(format!(
                "{} energies but {} values",
                energies.len(),
                values.len()
            )));
        }
        if energies.windows(2).any(|w| w[1] <= w[0]) {
            return Err(SetupError::InvalidProperty(
                "energies must be strictly increasing".to_string(),
            ));
        }
        if energies.iter().chain(values.iter()).any(|v| !v.is_finite()) {
            return Err(SetupError::InvalidProperty(
                "non-finite entry in table".to_string(),
            ));
        }
        Ok(Self { energies, values })
    }

    /// A property with the same value at every energy.
    pub fn constant(value: f64) -> Self {
        Self {
            energies: vec![0.0],
            values: vec![value],
        }
    }

    pub fn energies(&self) -> &[f64] {
        &self.energies
    }

    /// Value at `energy`.
    pub fn value(&self, energy: f64) -> f64 {
        let n = self.energies.len();
        if n == 1 || energy <= self.energies[0] {
            return self.values[0];
        }
        if energy >= self.energies[n - 1] {
            return self.values[n - 1];
        }
        let upper = self.energies.partition_point(|&e| e <= energy);
        let (e0, e1) = (self.energies[upper - 1], self.energies[upper]);
        let (v0, v1) = (self.values[upper - 1], self.values[upper]);
        v0 + (v1 - v0) * (energy - e0) / (e1 - e0)
    }

    /// Index of the table segment containing `energy`, clamped to the ends.
    fn segment(&self, energy: f64) -> Option<(usize, usize)> {
        let n = self.energies.len();
        if n < 2 {
            return None;
        }
        let upper = self.energies.partition_point(|&e| e <= energy).clamp(1, n - 1);
        Some((upper - 1, upper))
    }
}

/// An optical medium.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Medium {
    pub name: String,
    #[serde(default)]
    pub rindex: Option<PropertyVector>,
    #[serde(default)]
    pub abslength: Option<PropertyVector>,
    #[serde(default)]
    pub groupvel: Option<PropertyVector>,
    #[serde(default)]
    pub real_rindex: Option<PropertyVector>,
    #[serde(default)]
    pub imag_rindex: Option<PropertyVector>,
}

impl Medium {
    /// A medium with no optical properties.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rindex: None,
            abslength: None,
            groupvel: None,
            real_rindex: None,
            imag_rindex: None,
        }
    }

    pub fn with_rindex(mut self, rindex: PropertyVector) -> Self {
        self.rindex = Some(rindex);
        self
    }

    pub fn with_abslength(mut self, abslength: PropertyVector) -> Self {
        self.abslength = Some(abslength);
        self
    }

    pub fn with_groupvel(mut self, groupvel: PropertyVector) -> Self {
        self.groupvel = Some(groupvel);
        self
    }

    pub fn with_complex_rindex(mut self, real: PropertyVector, imag: PropertyVector) -> Self {
        self.real_rindex = Some(real);
        self.imag_rindex = Some(imag);
        self
    }

    /// Real refractive index at `energy`, if tabulated.
    pub fn rindex(&self, energy: f64) -> Option<f64> {
        self.rindex.as_ref().map(|p| p.value(energy))
    }

    /// Complex refractive index at `energy`, if both parts are tabulated.
    pub fn complex_rindex(&self, energy: f64) -> Option<Complex<f64>> {
        match (&self.real_rindex, &self.imag_rindex) {
            (Some(re), Some(im)) => Some(Complex::new(re.value(energy), im.value(energy))),
            _ => None,
        }
    }

    /// Imaginary index derived from the absorption length, `k = λ / (4π L)`.
    /// Zero when no (or a zero) absorption length is tabulated.
    pub fn imaginary_index(&self, energy: f64) -> f64 {
        self.abslength
            .as_ref()
            .map(|p| imaginary_index_from_abslength(energy, p.value(energy)))
            .unwrap_or(0.0)
    }

    /// Group velocity at `energy` in mm/ns.
    ///
    /// Uses the tabulated `groupvel` property when present, otherwise derives
    /// it from the refractive-index dispersion: `v = c / (n + dn/d ln E)`.
    /// Anomalous results (negative, or faster than the phase velocity) fall
    /// back to the phase velocity.
    pub fn group_velocity(&self, energy: f64) -> Option<f64> {
        if let Some(groupvel) = &self.groupvel {
            return Some(groupvel.value(energy));
        }
        let rindex = self.rindex.as_ref()?;
        let n = rindex.value(energy);
        if n <= 0.0 {
            return None;
        }
        let phase = C_LIGHT / n;
        let Some((lo, hi)) = rindex.segment(energy) else {
            return Some(phase);
        };
        let (e0, e1) = (rindex.energies[lo], rindex.energies[hi]);
        let dn_dlog_e = (rindex.values[hi] - rindex.values[lo]) / (e1 / e0).ln();
        let vg = C_LIGHT / (n + dn_dlog_e);
        if vg < 0.0 || vg > phase || !vg.is_finite() {
            Some(phase)
        } else {
            Some(vg)
        }
    }
}

/// `k = λ / (4π L)` for an absorption length `L` in mm. Zero for `L = 0`.
pub fn imaginary_index_from_abslength(energy: f64, abslength: f64) -> f64 {
    if abslength == 0.0 {
        return 0.0;
    }
    let wavelength = HC_EV_MM / energy;
    wavelength / (4.0 * std::f64::consts::PI * abslength)
}
