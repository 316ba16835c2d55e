//! Physical constants and numeric tolerances.
//!
//! Units throughout the crate: energies in eV, lengths in mm, times in ns.
//! Wavelengths handed to tables that are tabulated in nm are converted at the
//! call site with [`MM_TO_NM`].

/// Planck constant times speed of light, in eV·mm.
pub const HC_EV_MM: f64 = 1.239_841_984e-3;
/// Speed of light in vacuum, in mm/ns.
pub const C_LIGHT: f64 = 299.792_458;
/// Millimetres to nanometres.
pub const MM_TO_NM: f64 = 1e6;
/// Geometric surface tolerance, in mm. Steps shorter than this are not
/// treated as boundary crossings.
pub const CAR_TOLERANCE: f64 = 1e-9;
/// Steps shorter than this multiple of [`CAR_TOLERANCE`] trigger a warning.
pub const SMALL_STEP_FACTOR: f64 = 10.0;
/// Maximum number of small-step warnings emitted per process.
pub const MAX_STEP_WARNINGS: u32 = 10;
/// Maximum number of attempts for any rejection-sampling or geometric
/// accept/reject loop before the photon is given up on and absorbed.
pub const MAX_SAMPLING_TRIALS: usize = 100_000;
/// Minimum vector length to be considered non-degenerate.
pub const VEC_LENGTH_THRESHOLD: f64 = 1e-12;
/// Tolerance for unit-length and perpendicularity checks.
pub const COLINEAR_THRESHOLD: f64 = 1e-6;
