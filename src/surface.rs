//! Optical surface descriptions.
//!
//! A [`SurfaceDescriptor`] is attached to an interface when the boundary is
//! anything other than a bare dielectric-dielectric step. It selects the
//! interaction model, the finish and the micro-facet distribution, and
//! carries the tabulated surface properties and measured tables the model
//! needs.
//!
//! Descriptors are built once at setup (directly, or from a
//! [`SurfaceConfig`] read from the settings file) and validated there:
//! models that cannot run without a table fail with [`SetupError`] before
//! any photon is tracked.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use nalgebra::Complex;
use serde::{Deserialize, Serialize};

use crate::dichroic::DichroicTable;
use crate::error::{SetupError, SetupResult};
use crate::facet::FacetModel;
use crate::lut::{CoarseLut, FineLut};
use crate::material::{imaginary_index_from_abslength, PropertyVector};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finishes_parse_from_names() {
        assert_eq!("polished".parse::<Finish>().unwrap(), Finish::Polished);
        assert_eq!(
            "ground_back_painted".parse::<Finish>().unwrap(),
            Finish::GroundBackPainted
        );
        assert_eq!(
            "etched_tyvek_air".parse::<Finish>().unwrap(),
            Finish::Measured(MeasuredFinish::EtchedTyvekAir)
        );
        assert!("shiny".parse::<Finish>().is_err());
    }

    #[test]
    fn every_measured_finish_round_trips() {
        assert_eq!(MeasuredFinish::ALL.len(), 24);
        for finish in MeasuredFinish::ALL {
            let parsed: MeasuredFinish = finish.key().parse().unwrap();
            assert_eq!(parsed, finish);
            assert!(finish.reflection_name().ends_with("Reflection"));
        }
        assert_eq!(
            MeasuredFinish::GroundVm2000Glue.reflection_name(),
            "GroundVM2000GlueReflection"
        );
    }

    #[test]
    fn finish_predicates() {
        assert!(Finish::PolishedBackPainted.is_back_painted());
        assert!(Finish::GroundBackPainted.is_back_painted());
        assert!(!Finish::GroundFrontPainted.is_back_painted());
        assert!(Finish::GroundFrontPainted.is_front_painted());
        assert!(!Finish::Polished.is_painted());
    }

    #[test]
    fn coating_index_prefers_imaginary_table() {
        let mut properties = SurfaceProperties {
            rindex: Some(PropertyVector::constant(2.7)),
            abslength: Some(PropertyVector::constant(1e-4)),
            ..Default::default()
        };
        let n = properties.coating_rindex(3.0).unwrap();
        assert_eq!(n.re, 2.7);
        assert!(n.im > 0.0);
        properties.imag_rindex = Some(PropertyVector::constant(1.4));
        assert_eq!(properties.coating_rindex(3.0).unwrap().im, 1.4);
        assert!(SurfaceProperties::default().coating_rindex(3.0).is_none());
    }

    #[test]
    fn metal_complex_index_needs_both_parts() {
        let mut properties = SurfaceProperties {
            real_rindex: Some(PropertyVector::constant(1.2)),
            ..Default::default()
        };
        assert!(properties.complex_rindex(3.0).is_none());
        properties.imag_rindex = Some(PropertyVector::constant(7.0));
        assert_eq!(properties.complex_rindex(3.0), Some(Complex::new(1.2, 7.0)));
    }

    #[test]
    fn validation_requires_model_data() {
        let coated = SurfaceDescriptor::new("cathode", SurfaceModel::Coated, Finish::Polished);
        assert!(matches!(coated.validate(), Err(SetupError::MissingData { .. })));

        let dichroic = SurfaceDescriptor::new("filter", SurfaceModel::Dichroic, Finish::Polished);
        assert!(dichroic.validate().is_err());

        let coarse = SurfaceDescriptor::new(
            "lut",
            SurfaceModel::MeasuredCoarse,
            Finish::Measured(MeasuredFinish::PolishedAir),
        );
        assert!(coarse.validate().is_err());

        let fine = SurfaceDescriptor::new("davis", SurfaceModel::MeasuredFine, Finish::Polished);
        assert!(fine.validate().is_err());

        let metal = SurfaceDescriptor::new("mirror", SurfaceModel::Statistical, Finish::Polished)
            .with_properties(SurfaceProperties {
                reflectivity: Some(PropertyVector::constant(0.9)),
                ..Default::default()
            });
        assert!(metal.validate().is_ok());
    }

    #[test]
    fn validation_rejects_bad_probabilities() {
        let surface = SurfaceDescriptor::new("s", SurfaceModel::Statistical, Finish::Ground)
            .with_properties(SurfaceProperties {
                reflectivity: Some(PropertyVector::constant(1.5)),
                ..Default::default()
            });
        assert!(matches!(surface.validate(), Err(SetupError::InvalidProperty(_))));

        let surface = SurfaceDescriptor::new("s", SurfaceModel::Ideal, Finish::Ground)
            .with_facet(FacetModel::Unified { sigma_alpha: -0.1 });
        assert!(surface.validate().is_err());
    }

    #[test]
    fn surface_config_from_toml() {
        let config: SurfaceConfig = toml::from_str(
            r#"
            name = "reflector"
            model = "statistical"
            finish = "ground"
            facet = { type = "unified", sigma_alpha = 0.1 }

            [properties]
            reflectivity = 0.95
            specular_lobe = 0.2
            specular_spike = { energies = [2.0, 4.0], values = [0.1, 0.3] }
            "#,
        )
        .unwrap();
        let surface = config.build().unwrap();
        assert_eq!(surface.model, SurfaceModel::Statistical);
        assert_eq!(surface.finish, Finish::Ground);
        assert!(surface.facet.is_unified());
        assert_eq!(surface.properties.reflectivity.as_ref().unwrap().value(3.0), 0.95);
        assert!((surface.properties.specular_spike.as_ref().unwrap().value(3.0) - 0.2).abs() < 1e-12);
    }
}

/// Interaction model of a surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SurfaceModel {
    /// Dielectric-dielectric Fresnel optics, with painted finishes.
    #[default]
    Ideal,
    /// Dielectric-metal: reflect or absorb, with rough-surface reflection
    /// types.
    Statistical,
    /// Measured coarse angular table.
    MeasuredCoarse,
    /// Measured fine angular table.
    MeasuredFine,
    /// Wavelength- and angle-dependent filter.
    Dichroic,
    /// Thin absorbing film on a substrate.
    Coated,
}

/// Surface finishes characterised in the LBNL measurement campaign, each
/// used with the coarse measured table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MeasuredFinish {
    PolishedLumirrorAir,
    PolishedLumirrorGlue,
    PolishedAir,
    PolishedTeflonAir,
    PolishedTioAir,
    PolishedTyvekAir,
    PolishedVm2000Air,
    PolishedVm2000Glue,
    EtchedLumirrorAir,
    EtchedLumirrorGlue,
    EtchedAir,
    EtchedTeflonAir,
    EtchedTioAir,
    EtchedTyvekAir,
    EtchedVm2000Air,
    EtchedVm2000Glue,
    GroundLumirrorAir,
    GroundLumirrorGlue,
    GroundAir,
    GroundTeflonAir,
    GroundTioAir,
    GroundTyvekAir,
    GroundVm2000Air,
    GroundVm2000Glue,
}

use MeasuredFinish::*;

static MEASURED_FINISHES: [(MeasuredFinish, &str, &str); 24] = [
    (PolishedLumirrorAir, "polished_lumirror_air", "PolishedLumirrorAirReflection"),
    (PolishedLumirrorGlue, "polished_lumirror_glue", "PolishedLumirrorGlueReflection"),
    (PolishedAir, "polished_air", "PolishedAirReflection"),
    (PolishedTeflonAir, "polished_teflon_air", "PolishedTeflonAirReflection"),
    (PolishedTioAir, "polished_tio_air", "PolishedTiOAirReflection"),
    (PolishedTyvekAir, "polished_tyvek_air", "PolishedTyvekAirReflection"),
    (PolishedVm2000Air, "polished_vm2000_air", "PolishedVM2000AirReflection"),
    (PolishedVm2000Glue, "polished_vm2000_glue", "PolishedVM2000GlueReflection"),
    (EtchedLumirrorAir, "etched_lumirror_air", "EtchedLumirrorAirReflection"),
    (EtchedLumirrorGlue, "etched_lumirror_glue", "EtchedLumirrorGlueReflection"),
    (EtchedAir, "etched_air", "EtchedAirReflection"),
    (EtchedTeflonAir, "etched_teflon_air", "EtchedTeflonAirReflection"),
    (EtchedTioAir, "etched_tio_air", "EtchedTiOAirReflection"),
    (EtchedTyvekAir, "etched_tyvek_air", "EtchedTyvekAirReflection"),
    (EtchedVm2000Air, "etched_vm2000_air", "EtchedVM2000AirReflection"),
    (EtchedVm2000Glue, "etched_vm2000_glue", "EtchedVM2000GlueReflection"),
    (GroundLumirrorAir, "ground_lumirror_air", "GroundLumirrorAirReflection"),
    (GroundLumirrorGlue, "ground_lumirror_glue", "GroundLumirrorGlueReflection"),
    (GroundAir, "ground_air", "GroundAirReflection"),
    (GroundTeflonAir, "ground_teflon_air", "GroundTeflonAirReflection"),
    (GroundTioAir, "ground_tio_air", "GroundTiOAirReflection"),
    (GroundTyvekAir, "ground_tyvek_air", "GroundTyvekAirReflection"),
    (GroundVm2000Air, "ground_vm2000_air", "GroundVM2000AirReflection"),
    (GroundVm2000Glue, "ground_vm2000_glue", "GroundVM2000GlueReflection"),
];

impl MeasuredFinish {
    pub const ALL: [MeasuredFinish; 24] = [
        PolishedLumirrorAir,
        PolishedLumirrorGlue,
        PolishedAir,
        PolishedTeflonAir,
        PolishedTioAir,
        PolishedTyvekAir,
        PolishedVm2000Air,
        PolishedVm2000Glue,
        EtchedLumirrorAir,
        EtchedLumirrorGlue,
        EtchedAir,
        EtchedTeflonAir,
        EtchedTioAir,
        EtchedTyvekAir,
        EtchedVm2000Air,
        EtchedVm2000Glue,
        GroundLumirrorAir,
        GroundLumirrorGlue,
        GroundAir,
        GroundTeflonAir,
        GroundTioAir,
        GroundTyvekAir,
        GroundVm2000Air,
        GroundVm2000Glue,
    ];

    fn entry(&self) -> &'static (MeasuredFinish, &'static str, &'static str) {
        &MEASURED_FINISHES[*self as usize]
    }

    /// Configuration key, e.g. `ground_tyvek_air`.
    pub fn key(&self) -> &'static str {
        self.entry().1
    }

    /// Name of the reflection outcome produced on this finish.
    pub fn reflection_name(&self) -> &'static str {
        self.entry().2
    }
}

impl FromStr for MeasuredFinish {
    type Err = SetupError;

    fn from_str(s: &str) -> SetupResult<Self> {
        MEASURED_FINISHES
            .iter()
            .find(|(_, key, _)| *key == s)
            .map(|(finish, _, _)| *finish)
            .ok_or_else(|| SetupError::InvalidProperty(format!("unknown finish '{}'", s)))
    }
}

/// Finish of a surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Finish {
    #[default]
    Polished,
    PolishedFrontPainted,
    PolishedBackPainted,
    Ground,
    GroundFrontPainted,
    GroundBackPainted,
    Measured(MeasuredFinish),
}

impl Finish {
    pub fn is_back_painted(&self) -> bool {
        matches!(self, Finish::PolishedBackPainted | Finish::GroundBackPainted)
    }

    pub fn is_front_painted(&self) -> bool {
        matches!(self, Finish::PolishedFrontPainted | Finish::GroundFrontPainted)
    }

    pub fn is_painted(&self) -> bool {
        self.is_back_painted() || self.is_front_painted()
    }

    pub fn key(&self) -> &'static str {
        match self {
            Finish::Polished => "polished",
            Finish::PolishedFrontPainted => "polished_front_painted",
            Finish::PolishedBackPainted => "polished_back_painted",
            Finish::Ground => "ground",
            Finish::GroundFrontPainted => "ground_front_painted",
            Finish::GroundBackPainted => "ground_back_painted",
            Finish::Measured(finish) => finish.key(),
        }
    }
}

impl FromStr for Finish {
    type Err = SetupError;

    fn from_str(s: &str) -> SetupResult<Self> {
        let finish = match s {
            "polished" => Finish::Polished,
            "polished_front_painted" => Finish::PolishedFrontPainted,
            "polished_back_painted" => Finish::PolishedBackPainted,
            "ground" => Finish::Ground,
            "ground_front_painted" => Finish::GroundFrontPainted,
            "ground_back_painted" => Finish::GroundBackPainted,
            other => Finish::Measured(other.parse()?),
        };
        Ok(finish)
    }
}

impl TryFrom<String> for Finish {
    type Error = SetupError;

    fn try_from(s: String) -> SetupResult<Self> {
        s.parse()
    }
}

impl From<Finish> for String {
    fn from(finish: Finish) -> Self {
        finish.key().to_string()
    }
}

impl fmt::Display for Finish {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Tabulated and constant properties of a surface. Every property is
/// optional; defaults are applied when the interaction is set up.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SurfaceProperties {
    /// Probability of reflection. Default 1.
    pub reflectivity: Option<PropertyVector>,
    /// Probability that an absorbed photon is detected. Default 0.
    pub efficiency: Option<PropertyVector>,
    /// Probability of straight-through transmission. Default 0.
    pub transmittance: Option<PropertyVector>,
    /// Index of the paint layer (back-painted finishes) or of the coating.
    pub rindex: Option<PropertyVector>,
    /// Absorption length of the coating, in mm.
    pub abslength: Option<PropertyVector>,
    /// Real part of a complex surface index.
    pub real_rindex: Option<PropertyVector>,
    /// Imaginary part of a complex surface index, or of the coating index.
    pub imag_rindex: Option<PropertyVector>,
    pub specular_lobe: Option<PropertyVector>,
    pub specular_spike: Option<PropertyVector>,
    pub backscatter: Option<PropertyVector>,
    /// RMS roughness in mm for the dielectric roughness criterion.
    pub surface_roughness: f64,
    /// Coating thickness in mm.
    pub coated_thickness: f64,
}

impl SurfaceProperties {
    /// Complex index from `real_rindex` and `imag_rindex`, when both exist.
    pub fn complex_rindex(&self, energy: f64) -> Option<Complex<f64>> {
        match (&self.real_rindex, &self.imag_rindex) {
            (Some(re), Some(im)) => Some(Complex::new(re.value(energy), im.value(energy))),
            _ => None,
        }
    }

    /// Complex index of a coating layer. The imaginary part comes from
    /// `imag_rindex`, else from `abslength`, else zero.
    pub fn coating_rindex(&self, energy: f64) -> Option<Complex<f64>> {
        let re = self.rindex.as_ref()?.value(energy);
        let im = match (&self.imag_rindex, &self.abslength) {
            (Some(imag), _) => imag.value(energy),
            (None, Some(abslength)) => imaginary_index_from_abslength(energy, abslength.value(energy)),
            (None, None) => 0.0,
        };
        Some(Complex::new(re, im))
    }

    fn probabilities(&self) -> [(&'static str, &Option<PropertyVector>); 6] {
        [
            ("reflectivity", &self.reflectivity),
            ("efficiency", &self.efficiency),
            ("transmittance", &self.transmittance),
            ("specular_lobe", &self.specular_lobe),
            ("specular_spike", &self.specular_spike),
            ("backscatter", &self.backscatter),
        ]
    }
}

/// Optical surface attached to an interface.
#[derive(Debug, Clone, PartialEq)]
pub struct SurfaceDescriptor {
    pub name: String,
    pub model: SurfaceModel,
    pub finish: Finish,
    pub facet: FacetModel,
    pub properties: SurfaceProperties,
    pub coarse_lut: Option<Arc<CoarseLut>>,
    pub fine_lut: Option<Arc<FineLut>>,
    pub dichroic: Option<Arc<DichroicTable>>,
}

impl SurfaceDescriptor {
    pub fn new(name: impl Into<String>, model: SurfaceModel, finish: Finish) -> Self {
        Self {
            name: name.into(),
            model,
            finish,
            facet: FacetModel::default(),
            properties: SurfaceProperties::default(),
            coarse_lut: None,
            fine_lut: None,
            dichroic: None,
        }
    }

    pub fn with_facet(mut self, facet: FacetModel) -> Self {
        self.facet = facet;
        self
    }

    pub fn with_properties(mut self, properties: SurfaceProperties) -> Self {
        self.properties = properties;
        self
    }

    pub fn with_coarse_lut(mut self, lut: Arc<CoarseLut>) -> Self {
        self.coarse_lut = Some(lut);
        self
    }

    pub fn with_fine_lut(mut self, lut: Arc<FineLut>) -> Self {
        self.fine_lut = Some(lut);
        self
    }

    pub fn with_dichroic(mut self, table: Arc<DichroicTable>) -> Self {
        self.dichroic = Some(table);
        self
    }

    /// Checks that the model has the data it needs and that probabilities
    /// and facet parameters are in range.
    pub fn validate(&self) -> SetupResult<()> {
        let missing = |what: &str| SetupError::MissingData {
            surface: self.name.clone(),
            what: what.to_string(),
        };
        match self.model {
            SurfaceModel::Coated if self.properties.rindex.is_none() => {
                return Err(missing("a coating refractive index (rindex)"));
            }
            SurfaceModel::Dichroic if self.dichroic.is_none() => {
                return Err(missing("a dichroic transmittance table"));
            }
            SurfaceModel::MeasuredCoarse if self.coarse_lut.is_none() => {
                return Err(missing("a coarse angular table"));
            }
            SurfaceModel::MeasuredCoarse if !matches!(self.finish, Finish::Measured(_)) => {
                return Err(missing("a measured finish"));
            }
            SurfaceModel::MeasuredFine if self.fine_lut.is_none() => {
                return Err(missing("a fine angular table"));
            }
            _ => {}
        }

        for (name, property) in self.properties.probabilities() {
            let Some(property) = property else { continue };
            if property.energies().iter().any(|&e| !(0.0..=1.0).contains(&property.value(e))) {
                return Err(SetupError::InvalidProperty(format!(
                    "{} of surface '{}' must lie in [0, 1]",
                    name, self.name
                )));
            }
        }

        match self.facet {
            FacetModel::Unified { sigma_alpha } if !(sigma_alpha >= 0.0) => Err(
                SetupError::InvalidProperty(format!("sigma_alpha of surface '{}' must be non-negative", self.name)),
            ),
            FacetModel::Glisur { polish } if !(0.0..=1.0).contains(&polish) => Err(
                SetupError::InvalidProperty(format!("polish of surface '{}' must lie in [0, 1]", self.name)),
            ),
            _ => Ok(()),
        }
    }
}

/// Settings-file form of a surface. Tables are given as file paths.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SurfaceConfig {
    pub name: String,
    pub model: SurfaceModel,
    pub finish: Finish,
    pub facet: FacetModel,
    pub properties: SurfaceProperties,
    /// Coarse table file and optional 91-value reflectance file.
    pub coarse_lut: Option<PathBuf>,
    pub coarse_reflectance: Option<PathBuf>,
    /// Fine table distribution and reflectivity files, with the number of
    /// measured pairs per incidence degree.
    pub fine_lut: Option<PathBuf>,
    pub fine_reflectivity: Option<PathBuf>,
    pub fine_bins: Option<usize>,
    /// Dichroic table file (`.json` or plain text).
    pub dichroic: Option<PathBuf>,
}

impl SurfaceConfig {
    /// Loads the referenced tables and validates the result.
    pub fn build(&self) -> SetupResult<SurfaceDescriptor> {
        let mut surface = SurfaceDescriptor::new(self.name.clone(), self.model, self.finish)
            .with_facet(self.facet)
            .with_properties(self.properties.clone());

        if let Some(path) = &self.coarse_lut {
            let lut = CoarseLut::from_files(path, self.coarse_reflectance.as_deref())?;
            surface = surface.with_coarse_lut(Arc::new(lut));
        }
        if let Some(path) = &self.fine_lut {
            let reflectivity = self.fine_reflectivity.as_deref().ok_or_else(|| SetupError::MissingData {
                surface: self.name.clone(),
                what: "a fine reflectivity file".to_string(),
            })?;
            let bins = self.fine_bins.unwrap_or(DEFAULT_FINE_BINS);
            surface = surface.with_fine_lut(Arc::new(FineLut::from_files(bins, path, reflectivity)?));
        }
        if let Some(path) = &self.dichroic {
            surface = surface.with_dichroic(Arc::new(DichroicTable::from_file(path)?));
        }

        surface.validate()?;
        Ok(surface)
    }
}

/// Measured pairs per incidence degree in the published fine tables.
pub const DEFAULT_FINE_BINS: usize = 20_000;
