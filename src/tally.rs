//! Outcome bookkeeping for a Monte Carlo scan.
//!
//! A [`Tally`] counts boundary outcomes by family and by conventional name,
//! histograms the polar exit angle of surviving photons, and sums the energy
//! deposited by killed photons. Per-photon tallies from parallel workers are
//! combined with `+`.
//!
//! # Exit angles
//!
//! The polar angle is measured from the `+z` axis, the side the photons come
//! from in a scan, so reflected photons land in `[0°, 90°)` and photons that
//! crossed the boundary in `(90°, 180°]`.

use std::collections::BTreeMap;
use std::{fmt, ops::*};

use nalgebra::Vector3;
use serde::Serialize;

use crate::photon::{Family, Outcome, PhotonState};


/// Outcome counts and exit-angle histogram.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tally {
    pub photons: usize,
    /// Events aborted by a geometry error.
    pub aborted: usize,
    pub families: BTreeMap<Family, usize>,
    pub outcomes: BTreeMap<&'static str, usize>,
    /// Polar exit-angle histogram over `[0°, 180°]`.
    pub exit_angles: Vec<usize>,
    /// Energy deposited by killed photons, in eV.
    pub deposited_energy: f64,
}

impl Tally {
    pub fn new(num_bins: usize) -> Self {
        Self {
            photons: 0,
            aborted: 0,
            families: BTreeMap::new(),
            outcomes: BTreeMap::new(),
            exit_angles: vec![0; num_bins.max(1)],
            deposited_energy: 0.0,
        }
    }

    /// Adds one photon after its boundary interaction.
    pub fn record(&mut self, photon: &PhotonState, outcome: Outcome) {
        self.photons += 1;
        *self.families.entry(outcome.family()).or_default() += 1;
        *self.outcomes.entry(outcome.name()).or_default() += 1;
        if photon.alive {
            let bin = self.angle_bin(&photon.momentum);
            self.exit_angles[bin] += 1;
        } else {
            self.deposited_energy += photon.deposited_energy;
        }
    }

    pub fn record_aborted(&mut self) {
        self.photons += 1;
        self.aborted += 1;
    }

    pub fn count(&self, family: Family) -> usize {
        self.families.get(&family).copied().unwrap_or(0)
    }

    pub fn count_named(&self, name: &str) -> usize {
        self.outcomes.get(name).copied().unwrap_or(0)
    }

    /// Share of all photons that ended in `family`.
    pub fn fraction(&self, family: Family) -> f64 {
        if self.photons == 0 {
            return 0.0;
        }
        self.count(family) as f64 / self.photons as f64
    }

    /// Bin centres of the exit-angle histogram, in degrees.
    pub fn bin_centers(&self) -> Vec<f64> {
        let width = 180.0 / self.exit_angles.len() as f64;
        (0..self.exit_angles.len())
            .map(|i| (i as f64 + 0.5) * width)
            .collect()
    }

    fn angle_bin(&self, momentum: &Vector3<f64>) -> usize {
        let theta = momentum.angle(&Vector3::z()).to_degrees();
        let n = self.exit_angles.len();
        ((theta / 180.0 * n as f64) as usize).min(n - 1)
    }
}

impl Add for Tally {
    type Output = Self;

    fn add(mut self, other: Self) -> Self {
        self += other;
        self
    }
}

impl AddAssign for Tally {
    fn add_assign(&mut self, other: Self) {
        self.photons += other.photons;
        self.aborted += other.aborted;
        for (family, count) in other.families {
            *self.families.entry(family).or_default() += count;
        }
        for (name, count) in other.outcomes {
            *self.outcomes.entry(name).or_default() += count;
        }
        if self.exit_angles.len() < other.exit_angles.len() {
            self.exit_angles.resize(other.exit_angles.len(), 0);
        }
        for (bin, count) in self.exit_angles.iter_mut().zip(other.exit_angles) {
            *bin += count;
        }
        self.deposited_energy += other.deposited_energy;
    }
}

impl fmt::Display for Tally {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Tally:")?;
        writeln!(f, "  Photons:          {}", self.photons)?;
        for (family, count) in &self.families {
            writeln!(f, "  {:<18}{:>8} ({:.4})", format!("{}:", family), count, self.fraction(*family))?;
        }
        writeln!(f, "  Outcomes:")?;
        for (name, count) in &self.outcomes {
            writeln!(f, "    {:<32}{:>8}", name, count)?;
        }
        writeln!(f, "  Aborted:          {}", self.aborted)?;
        writeln!(f, "  Deposited (eV):   {:.6}", self.deposited_energy)
    }
}
