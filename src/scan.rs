//! Monte Carlo scan of a single interface.
//!
//! A [`Scan`] shoots a beam of identical photons at a flat interface lying in
//! the `z = 0` plane and collects what the boundary process does with them.
//! Photons come from `+z` in `medium1` at the configured incidence angle, in
//! the `xz` plane.
//!
//! # Key Features
//!
//! - Parallel photon processing with rayon
//! - One seeded generator per photon, so results do not depend on the
//!   thread count
//! - Progress tracking with indicatif
//! - On-the-fly reduction of tallies and hits

use std::sync::Arc;
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};
use nalgebra::{Rotation3, Unit, Vector3};
use rand::{rngs::StdRng, Rng, SeedableRng};
use rayon::prelude::*;
use tracing::{debug, info};

use crate::boundary::{BoundaryProcess, Crossing, OpticalInterface};
use crate::detection::{Hit, HitCollector};
use crate::error::SetupResult;
use crate::history::PhotonHistory;
use crate::material::Medium;
use crate::photon::PhotonState;
use crate::settings::Settings;
use crate::tally::Tally;


/// A configured interface and beam.
#[derive(Debug)]
pub struct Scan {
    pub interface: OpticalInterface,
    pub ambient: Option<Arc<Medium>>,
    pub process: BoundaryProcess,
    incidence_angle: f64,
    polarization_angle: f64,
    wavelength: f64,
    num_photons: usize,
    num_bins: usize,
    seed: u64,
}

/// Everything a scan produced.
#[derive(Debug, Clone)]
pub struct ScanResult {
    pub tally: Tally,
    pub hits: Vec<Hit>,
    pub duration: Duration,
}

impl ScanResult {
    fn empty(num_bins: usize) -> Self {
        Self {
            tally: Tally::new(num_bins),
            hits: Vec::new(),
            duration: Duration::ZERO,
        }
    }

    fn merge(mut self, other: Self) -> Self {
        self.tally += other.tally;
        self.hits.extend(other.hits);
        self
    }
}

impl Scan {
    /// Builds the interface from `settings`, loading any surface tables.
    pub fn new(settings: &Settings) -> SetupResult<Self> {
        let mut interface = OpticalInterface::new(
            "scan",
            Arc::new(settings.medium1.clone()),
            Arc::new(settings.medium2.clone()),
        );
        if let Some(surface) = &settings.surface {
            interface.name = surface.name.clone();
            interface = interface.with_surface(surface.build()?)?;
        }
        let seed = settings.seed.unwrap_or_else(|| rand::rng().random());

        Ok(Self {
            interface,
            ambient: settings.ambient.clone().map(Arc::new),
            process: BoundaryProcess::new(),
            incidence_angle: settings.incidence_angle.to_radians(),
            polarization_angle: settings.polarization_angle.to_radians(),
            wavelength: settings.wavelength,
            num_photons: settings.num_photons,
            num_bins: settings.num_bins,
            seed,
        })
    }

    /// The photon every trial starts from.
    pub fn incident_photon(&self) -> PhotonState {
        let (sin, cos) = self.incidence_angle.sin_cos();
        let momentum = Vector3::new(sin, 0.0, -cos);
        let te = Vector3::y();
        let rotation = Rotation3::from_axis_angle(&Unit::new_normalize(momentum), self.polarization_angle);
        PhotonState::from_wavelength_nm(momentum, rotation * te, self.wavelength)
    }

    /// Runs every photon through the boundary once.
    ///
    /// **Context**: A boundary interaction is cheap, so useful statistics
    /// need many photons. They are independent and run in parallel.
    ///
    /// **How it Works**: Each photon gets its own generator seeded from the
    /// scan seed and its index, and a history that holds the ambient medium
    /// if one is configured. Tallies and hits are reduced on the fly.
    /// Events aborted by a geometry error are counted, not propagated.
    pub fn run(&self) -> ScanResult {
        let start = Instant::now();
        info!(photons = self.num_photons, interface = %self.interface.name, "running scan");

        let pb = ProgressBar::new(self.num_photons as u64);
        let style = ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] {bar:40.green/blue} {pos:>7}/{len:7} {msg} ETA: {eta_precise}",
        )
        .map(|style| style.progress_chars("█▇▆▅▄▃▂▁"))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
        pb.set_style(style);
        pb.set_message("photons".to_string());

        let crossing = Crossing::new(-Vector3::z());
        let incident = self.incident_photon();

        let mut result = (0..self.num_photons)
            .into_par_iter()
            .map(|index| {
                let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(index as u64));
                let mut history = PhotonHistory::new();
                if let Some(ambient) = &self.ambient {
                    history.push(ambient.clone());
                }
                let mut sink = HitCollector::new();
                let mut item = ScanResult::empty(self.num_bins);

                match self
                    .process
                    .react(&incident, &self.interface, &crossing, &mut history, &mut rng, &mut sink)
                {
                    Ok((photon, outcome)) => item.tally.record(&photon, outcome),
                    Err(err) => {
                        debug!(photon = index, error = %err, "event aborted");
                        item.tally.record_aborted();
                    }
                }
                item.hits = sink.into_hits();

                pb.inc(1);
                item
            })
            .reduce(|| ScanResult::empty(self.num_bins), ScanResult::merge);

        pb.finish_and_clear();
        result.duration = start.elapsed();
        info!(
            duration = ?result.duration,
            aborted = result.tally.aborted,
            hits = result.hits.len(),
            "scan finished"
        );
        result
    }
}
