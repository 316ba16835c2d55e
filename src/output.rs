use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Local;
use itertools::Itertools;
use serde::Serialize;

use crate::detection::Hit;
use crate::scan::ScanResult;
use crate::settings::Settings;
use crate::tally::Tally;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::photon::{Outcome, PhotonState, ReflectionKind};
    use nalgebra::Vector3;
    use std::time::Duration;

    #[test]
    fn writes_histogram_and_hits() {
        let dir = std::env::temp_dir().join(format!("opboundary-output-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();

        let mut tally = Tally::new(4);
        let photon = PhotonState::new(Vector3::z(), Vector3::x(), 3.0);
        tally.record(&photon, Outcome::Reflected(ReflectionKind::Fresnel));
        let hit = Hit::new("cathode", Vector3::new(1.0, 2.0, 3.0), &photon, Outcome::Detected);

        write_exit_angles(&dir.join("exit_angles.dat"), &tally).unwrap();
        write_hits(&dir.join("hits.dat"), &[hit]).unwrap();

        let angles = fs::read_to_string(dir.join("exit_angles.dat")).unwrap();
        let lines: Vec<_> = angles.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "22.5 1");

        let hits = fs::read_to_string(dir.join("hits.dat")).unwrap();
        assert!(hits.lines().nth(1).unwrap().starts_with("cathode 1 2 3"));

        let result = ScanResult {
            tally,
            hits: Vec::new(),
            duration: Duration::from_millis(3),
        };
        let summary = Summary::new(&result);
        let json = serde_json::to_string(&summary).unwrap();
        assert!(json.contains("\"FresnelReflection\":1"));
        fs::remove_dir_all(&dir).unwrap();
    }
}

/// Machine-readable summary of a scan.
#[derive(Debug, Serialize)]
struct Summary<'a> {
    timestamp: String,
    duration_seconds: f64,
    hits: usize,
    tally: &'a Tally,
}

impl<'a> Summary<'a> {
    fn new(result: &'a ScanResult) -> Self {
        Self {
            timestamp: Local::now().to_rfc3339(),
            duration_seconds: result.duration.as_secs_f64(),
            hits: result.hits.len(),
            tally: &result.tally,
        }
    }
}

/// Writes the results of a scan to the configured output directory.
pub fn writeup(settings: &Settings, result: &ScanResult) -> Result<()> {
    let dir = &settings.directory;
    fs::create_dir_all(dir).with_context(|| format!("creating output directory {}", dir.display()))?;

    let summary = serde_json::to_string_pretty(&Summary::new(result))?;
    fs::write(dir.join("tally.json"), summary)?;

    write_exit_angles(&dir.join("exit_angles.dat"), &result.tally)?;
    write_hits(&dir.join("hits.dat"), &result.hits)?;

    let settings_toml = toml::to_string(settings).context("serializing settings")?;
    fs::write(dir.join("settings.toml"), settings_toml)?;

    Ok(())
}

/// Exit-angle histogram, one `centre count` row per bin.
fn write_exit_angles(path: &Path, tally: &Tally) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    for (center, count) in tally.bin_centers().iter().zip(&tally.exit_angles) {
        writeln!(writer, "{} {}", center, count)?;
    }
    writer.flush()?;
    Ok(())
}

fn write_hits(path: &Path, hits: &[Hit]) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    writeln!(
        writer,
        "# interface x y z px py pz ex ey ez energy wavelength deposited outcome"
    )?;
    for hit in hits {
        let numbers = hit
            .position
            .iter()
            .chain(hit.momentum.iter())
            .chain(hit.polarization.iter())
            .chain([hit.energy, hit.wavelength_nm, hit.deposited_energy].iter())
            .join(" ");
        writeln!(writer, "{} {} {}", hit.interface, numbers, hit.outcome)?;
    }
    writer.flush()?;
    Ok(())
}
