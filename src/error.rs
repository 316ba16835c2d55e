//! Error types.
//!
//! Per-photon failures (missing refractive index, exhausted sampling loops,
//! empty measured tables) are not errors: they end as absorption outcomes.
//! What remains are contract violations by the geometry collaborator, which
//! abort the current event, and configuration errors caught at setup.

use nalgebra::Vector3;
use thiserror::Error;

/// Result type for setup operations.
pub type SetupResult<T> = Result<T, SetupError>;

/// Geometry contract violations. Fatal for the current event, not the run.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BoundaryError {
    /// The navigator returned a zero-length or non-finite normal.
    #[error("invalid surface normal {normal:?} at interface '{interface}'")]
    InvalidNormal {
        interface: String,
        normal: Vector3<f64>,
    },

    /// The exit normal points back into the volume the photon is leaving.
    #[error(
        "surface normal at interface '{interface}' points against the photon momentum (dot = {dot})"
    )]
    NormalAgainstMomentum { interface: String, dot: f64 },
}

/// Configuration errors. Fatal at setup time.
#[derive(Error, Debug)]
pub enum SetupError {
    /// A surface model needs a table or property it was not given.
    #[error("surface '{surface}' requires {what}")]
    MissingData { surface: String, what: String },

    /// A tabulated property is malformed.
    #[error("invalid property table: {0}")]
    InvalidProperty(String),

    /// A measured table has the wrong shape.
    #[error("invalid table '{name}': {reason}")]
    InvalidTable { name: String, reason: String },

    /// A data file could not be parsed.
    #[error("failed to parse '{path}': {reason}")]
    Parse { path: String, reason: String },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
