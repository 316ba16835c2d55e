//! Fresnel equations for complex refractive indices.
//!
//! This module implements the single-interface Fresnel amplitudes and their
//! conversion into interaction probabilities. Both the ideal dielectric model
//! and the thin-film coating model are built on these primitives.
//!
//! The Fresnel calculations provide:
//! - Reflection and transmission amplitudes for TE (s) and TM (p) waves
//! - Complex refractive index support for absorbing media
//! - Poynting-flux corrected transmittance
//! - Polarization-weighted reflectivity/transmittance/absorption triples
//!
//! # Conventions
//!
//! TE is the component of the electric field perpendicular to the plane of
//! incidence, TM the component in the plane. Cosines are complex so that
//! evanescent and absorbing cases are carried through unchanged.

use nalgebra::Complex;


/// Complex Fresnel amplitudes for one interface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FresnelCoefficients {
    pub r_te: Complex<f64>,
    pub r_tm: Complex<f64>,
    pub t_te: Complex<f64>,
    pub t_tm: Complex<f64>,
}

impl FresnelCoefficients {
    /// Computes the Fresnel amplitudes for light going from index `n1` into
    /// index `n2`.
    ///
    /// **Context**: The amplitudes of the reflected and transmitted fields at
    /// an interface depend on polarization, incidence angle and the two
    /// (possibly absorbing) media. Absorbing media and frustrated total
    /// internal reflection make both indices and cosines complex.
    ///
    /// **How it Works**: Evaluates the classic Fresnel formulas with the
    /// products `n1·cosθ1`, `n2·cosθ2` for TE and the swapped products
    /// `n1·cosθ2`, `n2·cosθ1` for TM.
    pub fn new(
        n1: Complex<f64>,
        n2: Complex<f64>,
        cos1: Complex<f64>,
        cos2: Complex<f64>,
    ) -> Self {
        let n1_cos1 = n1 * cos1;
        let n2_cos2 = n2 * cos2;
        let n1_cos2 = n1 * cos2;
        let n2_cos1 = n2 * cos1;

        let denom_te = n1_cos1 + n2_cos2;
        let denom_tm = n1_cos2 + n2_cos1;

        Self {
            r_te: (n1_cos1 - n2_cos2) / denom_te,
            r_tm: (n2_cos1 - n1_cos2) / denom_tm,
            t_te: 2.0 * n1_cos1 / denom_te,
            t_tm: 2.0 * n1_cos1 / denom_tm,
        }
    }
}

/// Fractions of the incident intensity carried by the TE and TM components.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PolarizationSplit {
    pub te: f64,
    pub tm: f64,
}

impl PolarizationSplit {
    /// Split from the field components perpendicular (`e_perp`) and parallel
    /// (`e_parl`) to the plane of incidence.
    pub fn new(e_perp: f64, e_parl: f64) -> Self {
        let total = e_perp * e_perp + e_parl * e_parl;
        if total <= 0.0 {
            return Self::unpolarized();
        }
        Self {
            te: e_perp * e_perp / total,
            tm: e_parl * e_parl / total,
        }
    }

    pub fn unpolarized() -> Self {
        Self { te: 0.5, tm: 0.5 }
    }
}

/// Outcome of sampling a [`LayerResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerChoice {
    Transmit,
    Reflect,
    Absorb,
}

/// Reflectivity, transmittance and absorption of an interface or stack.
/// The three are non-negative and sum to one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayerResult {
    pub reflectivity: f64,
    pub transmittance: f64,
    pub absorption: f64,
}

impl LayerResult {
    /// Converts amplitudes into probabilities.
    ///
    /// Reflectivity is `|r|²`, transmittance `Re(n2·cosθ2 / (n1·cosθ1))·|t|²`,
    /// each weighted by the polarization split; absorption takes the rest.
    /// Rounding excursions outside `[0, 1]` are clipped so the triple stays a
    /// valid distribution.
    pub fn from_coefficients(
        coefficients: &FresnelCoefficients,
        n1: Complex<f64>,
        n2: Complex<f64>,
        cos1: Complex<f64>,
        cos2: Complex<f64>,
        split: PolarizationSplit,
    ) -> Self {
        let reflectivity = split.te * coefficients.r_te.norm_sqr()
            + split.tm * coefficients.r_tm.norm_sqr();

        let incident_flux = n1 * cos1;
        let transmittance = if incident_flux.norm() == 0.0 {
            0.0
        } else {
            let prefactor = ((n2 * cos2) / incident_flux).re;
            prefactor
                * (split.te * coefficients.t_te.norm_sqr()
                    + split.tm * coefficients.t_tm.norm_sqr())
        };

        Self::normalized(reflectivity, transmittance)
    }

    /// Builds a triple from a reflectivity and transmittance, clipping
    /// negative values and rescaling when their sum exceeds one.
    pub fn normalized(reflectivity: f64, transmittance: f64) -> Self {
        let mut reflectivity = if reflectivity.is_finite() { reflectivity.max(0.0) } else { 0.0 };
        let mut transmittance = if transmittance.is_finite() { transmittance.max(0.0) } else { 0.0 };
        let total = reflectivity + transmittance;
        if total > 1.0 {
            reflectivity /= total;
            transmittance /= total;
        }
        Self {
            reflectivity,
            transmittance,
            absorption: (1.0 - reflectivity - transmittance).max(0.0),
        }
    }

    /// Categorical choice for a uniform variate `u` in `[0, 1)`, checked in
    /// the order transmission, reflection, absorption.
    pub fn choose(&self, u: f64) -> LayerChoice {
        if u < self.transmittance {
            LayerChoice::Transmit
        } else if u < self.transmittance + self.reflectivity {
            LayerChoice::Reflect
        } else {
            LayerChoice::Absorb
        }
    }
}
