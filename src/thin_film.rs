//! Thin-film coatings.
//!
//! A coated surface is a three-layer system: the incident medium, a thin
//! absorbing coating (e.g. a photocathode) and the substrate behind it. The
//! two single-interface amplitude sets are combined with the Airy sum over
//! multiple internal reflections:
//!
//! ```text
//! r = (r1 + r2·e^{2iβ}) / (1 + r1·r2·e^{2iβ})
//! t = t1·t2·e^{iβ} / (1 + r1·r2·e^{2iβ})
//! β = k0·Nc·d·cosθc
//! ```
//!
//! Absorption in the coating is what is left of `1 - R - T`.

use std::f64::consts::PI;

use nalgebra::Complex;

use crate::config::HC_EV_MM;
use crate::fresnel::{FresnelCoefficients, LayerResult, PolarizationSplit};
use crate::snell::complex_cos;


/// Combines two interfaces separated by a layer with phase thickness `beta`.
pub fn three_layer(
    first: &FresnelCoefficients,
    second: &FresnelCoefficients,
    beta: Complex<f64>,
) -> FresnelCoefficients {
    let i = Complex::new(0.0_f64, 1.0);
    let exp2 = (i * beta * 2.0).exp();
    let exp = (i * beta).exp();

    let denom_te = 1.0 + first.r_te * second.r_te * exp2;
    let denom_tm = 1.0 + first.r_tm * second.r_tm * exp2;

    FresnelCoefficients {
        r_te: (first.r_te + second.r_te * exp2) / denom_te,
        r_tm: (first.r_tm + second.r_tm * exp2) / denom_tm,
        t_te: first.t_te * second.t_te * exp / denom_te,
        t_tm: first.t_tm * second.t_tm * exp / denom_tm,
    }
}

/// Complex angle terms through the stack.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StackAngles {
    pub cos1: Complex<f64>,
    /// Sine in the coating; a real part of one or more means the wave is
    /// evanescent inside the coating.
    pub sin_coating: Complex<f64>,
    pub cos_coating: Complex<f64>,
    pub sin2: Complex<f64>,
    pub cos2: Complex<f64>,
}

/// Incident medium, coating and substrate at one photon energy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThinFilmStack {
    pub n1: Complex<f64>,
    pub coating: Complex<f64>,
    pub n2: Complex<f64>,
    /// Coating thickness, in mm.
    pub thickness: f64,
    /// Vacuum wavelength, in mm.
    pub wavelength: f64,
}

impl ThinFilmStack {
    pub fn new(n1: Complex<f64>, coating: Complex<f64>, n2: Complex<f64>, thickness: f64, energy: f64) -> Self {
        Self {
            n1,
            coating,
            n2,
            thickness,
            wavelength: HC_EV_MM / energy,
        }
    }

    /// Propagates the incidence angle through the stack with Snell's law.
    ///
    /// `cos1` is the real incidence cosine; its sign picks the branch of the
    /// transmitted cosines. When the photon arrived from an absorbing
    /// `ambient` medium (index `(n_before, N_before)`), the incidence cosine
    /// is recomputed from the ambient side.
    pub fn angles(&self, cos1: f64, ambient: Option<(f64, Complex<f64>)>) -> StackAngles {
        let sign = if cos1 > 0.0 { 1.0 } else { -1.0 };
        let sin1 = (1.0 - cos1 * cos1).max(0.0).sqrt();
        let sin1_c = Complex::new(sin1, 0.0);
        let sin_coating = sin1_c * self.n1 / self.coating;
        let sin2 = sin_coating * self.coating / self.n2;

        let cos1 = match ambient {
            Some((n_before, n_before_c)) if n_before != 0.0 => {
                let sin_layer0 = self.n1.re * sin1 / n_before;
                let s = n_before_c * sin_layer0 / self.n1;
                (Complex::new(1.0, 0.0) - s * s).sqrt()
            }
            _ => Complex::new(cos1, 0.0),
        };

        StackAngles {
            cos1,
            sin_coating,
            cos_coating: complex_cos(sin_coating, sign),
            sin2,
            cos2: complex_cos(sin2, sign),
        }
    }

    /// Combined amplitudes of the stack.
    pub fn coefficients(&self, angles: &StackAngles) -> FresnelCoefficients {
        let k0 = 2.0 * PI / self.wavelength;
        let first = FresnelCoefficients::new(self.n1, self.coating, angles.cos1, angles.cos_coating);
        let second = FresnelCoefficients::new(self.coating, self.n2, angles.cos_coating, angles.cos2);
        let beta = k0 * self.coating * self.thickness * angles.cos_coating;
        three_layer(&first, &second, beta)
    }

    /// Reflectivity, transmittance and absorption of the stack.
    pub fn evaluate(&self, angles: &StackAngles, split: PolarizationSplit) -> LayerResult {
        let coefficients = self.coefficients(angles);
        LayerResult::from_coefficients(&coefficients, self.n1, self.n2, angles.cos1, angles.cos2, split)
    }
}
