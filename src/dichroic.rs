//! Dichroic filter transmittance.
//!
//! A dichroic surface transmits or reflects depending on wavelength and
//! incidence angle. The measured transmittance (in percent) is tabulated on a
//! wavelength × angle grid and bilinearly interpolated, clamped to the grid
//! edges.

use std::path::Path;

use ndarray::Array2;
use serde::Deserialize;

use crate::error::{SetupError, SetupResult};


#[derive(Deserialize)]
struct DichroicSpec {
    wavelengths: Vec<f64>,
    angles: Vec<f64>,
    transmittance: Vec<Vec<f64>>,
}

impl TryFrom<DichroicSpec> for DichroicTable {
    type Error = SetupError;

    fn try_from(spec: DichroicSpec) -> SetupResult<Self> {
        Self::new(spec.wavelengths, spec.angles, spec.transmittance)
    }
}

/// Transmittance in percent over wavelength (nm) and incidence angle (deg).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "DichroicSpec")]
pub struct DichroicTable {
    wavelengths: Vec<f64>,
    angles: Vec<f64>,
    /// Indexed by `[angle, wavelength]`.
    values: Array2<f64>,
}

impl DichroicTable {
    /// `rows` holds one row of transmittance values per angle node.
    pub fn new(wavelengths: Vec<f64>, angles: Vec<f64>, rows: Vec<Vec<f64>>) -> SetupResult<Self> {
        let invalid = |reason: String| SetupError::InvalidTable {
            name: "dichroic".to_string(),
            reason,
        };
        for (axis, nodes) in [("wavelength", &wavelengths), ("angle", &angles)] {
            if nodes.is_empty() {
                return Err(invalid(format!("no {} nodes", axis)));
            }
            if nodes.windows(2).any(|w| w[1] <= w[0]) {
                return Err(invalid(format!("{} nodes must be strictly increasing", axis)));
            }
        }
        if rows.len() != angles.len() || rows.iter().any(|r| r.len() != wavelengths.len()) {
            return Err(invalid(format!(
                "expected {} rows of {} values",
                angles.len(),
                wavelengths.len()
            )));
        }
        let flat: Vec<f64> = rows.into_iter().flatten().collect();
        let values = Array2::from_shape_vec((angles.len(), wavelengths.len()), flat)
            .map_err(|e| invalid(e.to_string()))?;
        Ok(Self {
            wavelengths,
            angles,
            values,
        })
    }

    /// Loads a table from a `.json` file or from the plain-text layout
    /// `nx ny, x nodes, y nodes, ny rows of nx values`.
    pub fn from_file(path: &Path) -> SetupResult<Self> {
        let content = std::fs::read_to_string(path)?;
        if path.extension().is_some_and(|e| e == "json") {
            return Ok(serde_json::from_str(&content)?);
        }
        Self::from_text(&content, &path.display().to_string())
    }

    fn from_text(content: &str, source: &str) -> SetupResult<Self> {
        let values: Vec<f64> = content
            .split_whitespace()
            .map(|t| t.parse::<f64>())
            .collect::<Result<_, _>>()
            .map_err(|e| SetupError::Parse {
                path: source.to_string(),
                reason: e.to_string(),
            })?;
        Self::from_values(&values, source)
    }

    fn from_values(values: &[f64], source: &str) -> SetupResult<Self> {
        let truncated = || SetupError::Parse {
            path: source.to_string(),
            reason: "truncated dichroic table".to_string(),
        };
        let (nx, ny) = match values {
            [nx, ny, ..] => (*nx as usize, *ny as usize),
            _ => return Err(truncated()),
        };
        if nx == 0 || ny == 0 || values.len() != 2 + nx + ny + nx * ny {
            return Err(truncated());
        }
        let wavelengths = values[2..2 + nx].to_vec();
        let angles = values[2 + nx..2 + nx + ny].to_vec();
        let rows = values[2 + nx + ny..].chunks(nx).map(|r| r.to_vec()).collect();
        Self::new(wavelengths, angles, rows)
    }

    /// Transmitted fraction (0..=1) at `wavelength` nm and `angle` degrees.
    pub fn transmittance(&self, wavelength: f64, angle: f64) -> f64 {
        let (i0, i1, fy) = bracket(&self.angles, angle);
        let (j0, j1, fx) = bracket(&self.wavelengths, wavelength);
        let v00 = self.values[[i0, j0]];
        let v01 = self.values[[i0, j1]];
        let v10 = self.values[[i1, j0]];
        let v11 = self.values[[i1, j1]];
        let low = v00 + (v01 - v00) * fx;
        let high = v10 + (v11 - v10) * fx;
        (low + (high - low) * fy) * 0.01
    }
}

/// Neighbouring node indices and the interpolation fraction, clamped.
fn bracket(nodes: &[f64], x: f64) -> (usize, usize, f64) {
    let n = nodes.len();
    if n == 1 || x <= nodes[0] {
        return (0, 0, 0.0);
    }
    if x >= nodes[n - 1] {
        return (n - 1, n - 1, 0.0);
    }
    let upper = nodes.partition_point(|&v| v <= x);
    let lower = upper - 1;
    (lower, upper, (x - nodes[lower]) / (nodes[upper] - nodes[lower]))
}
