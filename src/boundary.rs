//! The optical boundary process.
//!
//! [`BoundaryProcess::react`] is called once per boundary crossing of an
//! optical photon. It looks at the two media and the optional surface, then
//! decides what the photon does: reflect, refract, pass straight through,
//! get absorbed or get detected. The updated photon comes back together with
//! an [`Outcome`].
//!
//! Supported surface models:
//! - **Ideal**: dielectric-dielectric Fresnel optics with optional roughness,
//!   front-painted and back-painted finishes
//! - **Statistical**: dielectric-metal reflection with Lambertian, lobe,
//!   spike and backscatter reflection types and complex-index reflectivity
//! - **MeasuredCoarse / MeasuredFine**: measured angular tables
//! - **Dichroic**: (wavelength, angle) transmittance filter
//! - **Coated**: thin absorbing film on a substrate, where absorption in the
//!   film counts as detection
//!
//! # Conventions
//!
//! The caller supplies the outward normal of the volume being left. Inside
//! the process the normal is flipped so that it points back into the
//! incident medium (`global_normal`), and a photon arriving at the surface
//! has `momentum · global_normal < 0`.
//!
//! All per-call state lives in a [`ReactionContext`] owned by the call, so a
//! single [`BoundaryProcess`] can be shared by any number of threads.

use std::f64::consts::PI;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use nalgebra::{Complex, Vector3};
use rand::Rng;
use tracing::{debug, trace, warn};

use crate::config::{
    CAR_TOLERANCE, HC_EV_MM, MAX_SAMPLING_TRIALS, MAX_STEP_WARNINGS, MM_TO_NM, SMALL_STEP_FACTOR,
    VEC_LENGTH_THRESHOLD,
};
use crate::detection::{DetectionSink, Hit};
use crate::error::{BoundaryError, SetupResult};
use crate::facet::{lambertian, orthogonal, FacetModel};
use crate::fresnel::{FresnelCoefficients, LayerChoice, PolarizationSplit};
use crate::history::PhotonHistory;
use crate::lut::FineLut;
use crate::material::{Medium, PropertyVector};
use crate::photon::{
    Outcome, PhotonState, ReflectionKind, RefractionKind, SkipReason, TransmissionKind,
};
use crate::snell::{
    is_total_internal_reflection, reflect_polarization, reflection_vector,
    refraction_vector, sin_theta_t, IncidencePlane,
};
use crate::surface::{Finish, SurfaceDescriptor, SurfaceModel};
use crate::thin_film::ThinFilmStack;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::{HitCollector, NullSink};
    use rand::{rngs::StdRng, SeedableRng};

    fn medium(name: &str, n: f64) -> Arc<Medium> {
        Arc::new(Medium::new(name).with_rindex(PropertyVector::constant(n)))
    }

    fn photon() -> PhotonState {
        PhotonState::from_wavelength_nm(-Vector3::z(), Vector3::x(), 400.0)
    }

    fn react(
        process: &BoundaryProcess,
        interface: &OpticalInterface,
        crossing: &Crossing,
        history: &mut PhotonHistory,
    ) -> Result<(PhotonState, Outcome), BoundaryError> {
        let mut rng = StdRng::seed_from_u64(7);
        process.react(&photon(), interface, crossing, history, &mut rng, &mut NullSink)
    }

    #[test]
    fn skips_when_not_at_boundary() {
        let interface = OpticalInterface::new("i", medium("water", 1.33), medium("air", 1.0));
        let mut history = PhotonHistory::new();
        let crossing = Crossing::new(-Vector3::z()).not_at_boundary();
        let (state, outcome) = react(&BoundaryProcess::new(), &interface, &crossing, &mut history).unwrap();
        assert_eq!(outcome, Outcome::Skipped(SkipReason::NotAtBoundary));
        assert_eq!(state.momentum, photon().momentum);
        assert!(history.is_empty());
    }

    #[test]
    fn identical_media_are_skipped() {
        let water = medium("water", 1.33);
        let interface = OpticalInterface::new("i", water.clone(), water);
        let mut history = PhotonHistory::new();
        let (_, outcome) =
            react(&BoundaryProcess::new(), &interface, &Crossing::new(-Vector3::z()), &mut history).unwrap();
        assert_eq!(outcome, Outcome::Skipped(SkipReason::SameMaterial));
    }

    #[test]
    fn short_step_takes_next_group_velocity() {
        let interface = OpticalInterface::new("i", medium("water", 1.33), medium("glass", 1.5));
        let mut history = PhotonHistory::new();
        let crossing = Crossing::new(-Vector3::z()).with_step_length(CAR_TOLERANCE / 2.0);
        let (state, outcome) = react(&BoundaryProcess::new(), &interface, &crossing, &mut history).unwrap();
        assert_eq!(outcome, Outcome::Skipped(SkipReason::StepTooSmall));
        assert!((state.velocity - crate::config::C_LIGHT / 1.5).abs() < 1e-9);
        assert_eq!(state.momentum, photon().momentum);
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn small_step_warnings_are_capped() {
        let process = BoundaryProcess::new();
        let interface = OpticalInterface::new("i", medium("water", 1.33), medium("air", 1.0));
        let crossing = Crossing::new(-Vector3::z()).with_step_length(5.0 * CAR_TOLERANCE);
        for _ in 0..25 {
            let mut history = PhotonHistory::new();
            react(&process, &interface, &crossing, &mut history).unwrap();
        }
        assert_eq!(process.step_warnings(), MAX_STEP_WARNINGS);
    }

    #[test]
    fn degenerate_normals_abort_the_event() {
        let interface = OpticalInterface::new("lens", medium("water", 1.33), medium("air", 1.0));
        let process = BoundaryProcess::new();
        for normal in [Vector3::zeros(), Vector3::new(f64::NAN, 0.0, 1.0)] {
            let mut history = PhotonHistory::new();
            let err = react(&process, &interface, &Crossing::new(normal), &mut history).unwrap_err();
            assert!(matches!(err, BoundaryError::InvalidNormal { ref interface, .. } if interface == "lens"));
        }
        let mut history = PhotonHistory::new();
        let err = react(&process, &interface, &Crossing::new(Vector3::z()), &mut history).unwrap_err();
        assert!(matches!(err, BoundaryError::NormalAgainstMomentum { .. }));
    }

    #[test]
    fn missing_index_kills_the_photon() {
        let interface = OpticalInterface::new("i", Arc::new(Medium::new("void")), medium("air", 1.0));
        let mut history = PhotonHistory::new();
        let (state, outcome) =
            react(&BoundaryProcess::new(), &interface, &Crossing::new(-Vector3::z()), &mut history).unwrap();
        assert_eq!(outcome, Outcome::NoRefractiveIndex);
        assert!(!state.alive);
        assert_eq!(state.deposited_energy, photon().energy);

        let interface = OpticalInterface::new("i", medium("air", 1.0), Arc::new(Medium::new("void")));
        let (state, outcome) =
            react(&BoundaryProcess::new(), &interface, &Crossing::new(-Vector3::z()), &mut history).unwrap();
        assert_eq!(outcome, Outcome::NoRefractiveIndex);
        assert!(!state.alive);
    }

    #[test]
    fn paint_layer_settles_the_outcome() {
        let painted = |reflectivity: f64, transmittance: f64| {
            let surface = SurfaceDescriptor::new("paint", SurfaceModel::Ideal, Finish::PolishedBackPainted)
                .with_properties(crate::surface::SurfaceProperties {
                    reflectivity: Some(PropertyVector::constant(reflectivity)),
                    transmittance: Some(PropertyVector::constant(transmittance)),
                    rindex: Some(PropertyVector::constant(1.5)),
                    ..Default::default()
                });
            OpticalInterface::new("i", medium("glass", 1.5), medium("air", 1.0))
                .with_surface(surface)
                .unwrap()
        };

        let mut history = PhotonHistory::new();
        let crossing = Crossing::new(-Vector3::z());
        let (state, outcome) =
            react(&BoundaryProcess::new(), &painted(0.0, 1.0), &crossing, &mut history).unwrap();
        assert_eq!(outcome, Outcome::Transmitted(TransmissionKind::Plain));
        assert!(state.alive);
        assert_eq!(state.momentum, photon().momentum);

        let (state, outcome) =
            react(&BoundaryProcess::new(), &painted(0.0, 0.0), &crossing, &mut history).unwrap();
        assert_eq!(outcome, Outcome::Absorbed);
        assert!(!state.alive);
    }

    #[test]
    fn detection_reaches_the_sink() {
        let surface = SurfaceDescriptor::new("sensor", SurfaceModel::Statistical, Finish::Polished)
            .with_properties(crate::surface::SurfaceProperties {
                reflectivity: Some(PropertyVector::constant(0.0)),
                efficiency: Some(PropertyVector::constant(1.0)),
                ..Default::default()
            });
        let interface = OpticalInterface::new("i", medium("glass", 1.5), medium("metal", 1.0))
            .with_surface(surface)
            .unwrap();
        let mut sink = HitCollector::new();
        let mut rng = StdRng::seed_from_u64(3);
        let crossing = Crossing::new(-Vector3::z()).with_position(Vector3::new(1.0, 2.0, 3.0));
        let (state, outcome) = BoundaryProcess::new()
            .react(&photon(), &interface, &crossing, &mut PhotonHistory::new(), &mut rng, &mut sink)
            .unwrap();
        assert_eq!(outcome, Outcome::Detected);
        assert!(!state.alive);
        assert_eq!(sink.len(), 1);
        assert_eq!(sink.hits()[0].interface, "i");
        assert_eq!(sink.hits()[0].position, Vector3::new(1.0, 2.0, 3.0));
        assert_eq!(sink.hits()[0].deposited_energy, photon().energy);
    }
}

/// Two adjacent media and the optional surface between them.
#[derive(Debug, Clone)]
pub struct OpticalInterface {
    pub name: String,
    /// Medium the photon is leaving.
    pub medium1: Arc<Medium>,
    /// Medium the photon is entering.
    pub medium2: Arc<Medium>,
    pub surface: Option<Arc<SurfaceDescriptor>>,
}

impl OpticalInterface {
    pub fn new(name: impl Into<String>, medium1: Arc<Medium>, medium2: Arc<Medium>) -> Self {
        Self {
            name: name.into(),
            medium1,
            medium2,
            surface: None,
        }
    }

    /// Attaches a surface after validating it.
    pub fn with_surface(mut self, surface: SurfaceDescriptor) -> SetupResult<Self> {
        surface.validate()?;
        self.surface = Some(Arc::new(surface));
        Ok(self)
    }

    /// The same interface crossed in the other direction.
    pub fn reversed(&self) -> Self {
        Self {
            name: self.name.clone(),
            medium1: self.medium2.clone(),
            medium2: self.medium1.clone(),
            surface: self.surface.clone(),
        }
    }
}

/// Geometry of one boundary crossing, as reported by the navigator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Crossing {
    /// Outward normal of the volume being left, at the crossing point.
    pub exit_normal: Vector3<f64>,
    /// Length of the step that ended on the boundary, in mm.
    pub step_length: f64,
    pub position: Vector3<f64>,
    /// False when the step ended for a reason other than the geometry.
    pub at_boundary: bool,
}

impl Crossing {
    pub fn new(exit_normal: Vector3<f64>) -> Self {
        Self {
            exit_normal,
            step_length: 1.0,
            position: Vector3::zeros(),
            at_boundary: true,
        }
    }

    pub fn with_step_length(mut self, step_length: f64) -> Self {
        self.step_length = step_length;
        self
    }

    pub fn with_position(mut self, position: Vector3<f64>) -> Self {
        self.position = position;
        self
    }

    pub fn not_at_boundary(mut self) -> Self {
        self.at_boundary = false;
        self
    }
}

/// The boundary reaction engine.
///
/// Holds no per-photon state; the only shared mutable state is the counter
/// of small-step warnings.
#[derive(Debug, Default)]
pub struct BoundaryProcess {
    step_warnings: AtomicU32,
}

impl BoundaryProcess {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of small-step warnings emitted so far.
    pub fn step_warnings(&self) -> u32 {
        self.step_warnings.load(Ordering::Relaxed).min(MAX_STEP_WARNINGS)
    }

    /// Interacts `photon` with `interface`.
    ///
    /// **Context**: Called by the tracking loop whenever a step of an optical
    /// photon ends. Recoverable per-photon problems (missing refractive
    /// index, exhausted sampling, measured tables without data) end in an
    /// absorption-type outcome. Only a broken geometry contract, an invalid
    /// or inward-pointing normal, is returned as an error and should abort
    /// the current event.
    ///
    /// **How it Works**: Skips steps that did not end on a real boundary,
    /// appends the medium being left to `history`, validates the normal,
    /// resolves refractive indices and surface properties, then dispatches to
    /// the surface model. The result is normalized, the group velocity of the
    /// destination medium is applied to photons that cross, and detections
    /// are handed to `sink`.
    pub fn react<R: Rng, S: DetectionSink + ?Sized>(
        &self,
        photon: &PhotonState,
        interface: &OpticalInterface,
        crossing: &Crossing,
        history: &mut PhotonHistory,
        rng: &mut R,
        sink: &mut S,
    ) -> Result<(PhotonState, Outcome), BoundaryError> {
        let energy = photon.energy;
        let skip = |reason: SkipReason| {
            let mut state = *photon;
            state.status = Outcome::Skipped(reason);
            (state, state.status)
        };

        if !crossing.at_boundary {
            return Ok(skip(SkipReason::NotAtBoundary));
        }
        let (medium1, medium2) = (&interface.medium1, &interface.medium2);
        if Arc::ptr_eq(medium1, medium2) || medium1 == medium2 {
            return Ok(skip(SkipReason::SameMaterial));
        }
        history.push(medium1.clone());

        if crossing.step_length <= CAR_TOLERANCE {
            let (mut state, outcome) = skip(SkipReason::StepTooSmall);
            if let Some(velocity) = medium2.group_velocity(energy) {
                state.velocity = velocity;
            }
            return Ok((state, outcome));
        }
        if crossing.step_length <= SMALL_STEP_FACTOR * CAR_TOLERANCE {
            self.warn_small_step(interface, crossing.step_length);
        }

        let normal = crossing.exit_normal;
        if !normal.iter().all(|c| c.is_finite()) || normal.norm() < VEC_LENGTH_THRESHOLD {
            return Err(BoundaryError::InvalidNormal {
                interface: interface.name.clone(),
                normal,
            });
        }
        let exit_normal = normal.normalize();
        let momentum = photon.momentum.normalize();
        let dot = momentum.dot(&exit_normal);
        if dot < 0.0 {
            return Err(BoundaryError::NormalAgainstMomentum {
                interface: interface.name.clone(),
                dot,
            });
        }

        let Some(rindex1) = medium1.rindex(energy) else {
            return Ok(no_refractive_index(photon));
        };

        let history: &PhotonHistory = history;
        let mut ctx = ReactionContext::new(
            rng,
            interface,
            history,
            photon,
            momentum,
            -exit_normal,
            rindex1,
        );

        if let Some(surface) = interface.surface.as_deref() {
            if ctx.load_surface(surface).is_none() {
                return Ok(no_refractive_index(photon));
            }
        }

        let result = match ctx.model {
            SurfaceModel::Ideal => ctx.ideal(),
            SurfaceModel::Statistical => ctx.dielectric_metal(),
            SurfaceModel::MeasuredCoarse => ctx.measured_coarse(),
            SurfaceModel::MeasuredFine => ctx.measured_fine(),
            SurfaceModel::Dichroic => ctx.dichroic(),
            SurfaceModel::Coated => ctx.coated(),
        };
        match result {
            Ok(Reaction::Done) => {}
            Ok(Reaction::NoRefractiveIndex) => return Ok(no_refractive_index(photon)),
            Err(Exhausted) => {
                debug!(
                    interface = %interface.name,
                    trials = MAX_SAMPLING_TRIALS,
                    "sampling loop exhausted, absorbing photon"
                );
                ctx.give_up();
            }
        }

        let state = ctx.into_state(photon);
        trace!(
            interface = %interface.name,
            outcome = %state.status,
            momentum = ?state.momentum,
            polarization = ?state.polarization,
            "boundary reaction"
        );
        if state.status == Outcome::Detected {
            sink.record(Hit::new(&interface.name, crossing.position, &state, state.status));
        }
        Ok((state, state.status))
    }

    fn warn_small_step(&self, interface: &OpticalInterface, step_length: f64) {
        let count = self.step_warnings.fetch_add(1, Ordering::Relaxed) + 1;
        if count > MAX_STEP_WARNINGS {
            return;
        }
        warn!(
            interface = %interface.name,
            step_length,
            threshold = CAR_TOLERANCE,
            "optical photon step is barely above the boundary tolerance, boundary scattering may be incorrect"
        );
        if count == MAX_STEP_WARNINGS {
            warn!("further small-step warnings suppressed");
        }
    }
}

fn no_refractive_index(photon: &PhotonState) -> (PhotonState, Outcome) {
    let mut state = *photon;
    state.status = Outcome::NoRefractiveIndex;
    state.kill(photon.energy);
    (state, state.status)
}

/// A capped sampling loop ran out of trials.
#[derive(Debug)]
struct Exhausted;

/// How a model finished, when it did not run out of trials.
enum Reaction {
    Done,
    NoRefractiveIndex,
}

type Sampled<T = Reaction> = Result<T, Exhausted>;

/// Progress through a back-painted layer.
enum LayerState {
    EvaluatingInterface,
    CrossedIntoNextLayer,
    Terminal(Outcome),
}

/// Working state of one reaction.
struct ReactionContext<'a, R> {
    rng: &'a mut R,
    history: &'a PhotonHistory,
    surface: Option<&'a SurfaceDescriptor>,
    model: SurfaceModel,
    finish: Finish,
    facet_model: FacetModel,

    energy: f64,
    material1: &'a Medium,
    material2: &'a Medium,
    rindex1: f64,
    rindex2: f64,

    reflectivity: f64,
    efficiency: f64,
    transmittance: f64,
    surface_roughness: f64,
    prob_lobe: f64,
    prob_spike: f64,
    prob_backscatter: f64,
    /// Complex index of a metal surface, when tabulated.
    surface_rindex: Option<Complex<f64>>,
    te_reflects: bool,
    tm_reflects: bool,

    old_momentum: Vector3<f64>,
    old_polarization: Vector3<f64>,
    new_momentum: Vector3<f64>,
    new_polarization: Vector3<f64>,
    global_normal: Vector3<f64>,
    facet_normal: Vector3<f64>,

    status: Outcome,
    deposited: f64,
    killed: bool,
}

impl<'a, R: Rng> ReactionContext<'a, R> {
    fn new(
        rng: &'a mut R,
        interface: &'a OpticalInterface,
        history: &'a PhotonHistory,
        photon: &PhotonState,
        momentum: Vector3<f64>,
        global_normal: Vector3<f64>,
        rindex1: f64,
    ) -> Self {
        Self {
            rng,
            history,
            surface: None,
            model: SurfaceModel::Ideal,
            finish: Finish::Polished,
            facet_model: FacetModel::default(),
            energy: photon.energy,
            material1: &interface.medium1,
            material2: &interface.medium2,
            rindex1,
            rindex2: 0.0,
            reflectivity: 1.0,
            efficiency: 0.0,
            transmittance: 0.0,
            surface_roughness: 0.0,
            prob_lobe: 0.0,
            prob_spike: 0.0,
            prob_backscatter: 0.0,
            surface_rindex: None,
            te_reflects: true,
            tm_reflects: true,
            old_momentum: momentum,
            old_polarization: photon.polarization,
            new_momentum: momentum,
            new_polarization: photon.polarization,
            global_normal,
            facet_normal: global_normal,
            status: Outcome::Undefined,
            deposited: 0.0,
            killed: false,
        }
    }

    /// Resolves the surface properties at the photon energy. `None` when a
    /// back-painted finish has no paint index.
    fn load_surface(&mut self, surface: &'a SurfaceDescriptor) -> Option<()> {
        let energy = self.energy;
        let properties = &surface.properties;
        self.surface = Some(surface);
        self.model = surface.model;
        self.finish = surface.finish;
        self.facet_model = surface.facet;

        if surface.finish.is_back_painted() {
            self.rindex2 = properties.rindex.as_ref()?.value(energy);
        }

        self.surface_rindex = properties.complex_rindex(energy);
        if let Some(reflectivity) = &properties.reflectivity {
            self.reflectivity = reflectivity.value(energy);
        } else if let Some(n2) = self.surface_rindex {
            if self.calculate_reflectivity(n2).is_err() {
                // flags stay at both-reflect
                debug!(surface = %surface.name, "reflectivity polarization flags not resolved");
            }
        }
        if let Some(efficiency) = &properties.efficiency {
            self.efficiency = efficiency.value(energy);
        }
        if let Some(transmittance) = &properties.transmittance {
            self.transmittance = transmittance.value(energy);
        }
        self.surface_roughness = properties.surface_roughness;

        if self.facet_model.is_unified() {
            let value = |p: &Option<PropertyVector>| p.as_ref().map_or(0.0, |p| p.value(energy));
            self.prob_lobe = value(&properties.specular_lobe);
            self.prob_spike = value(&properties.specular_spike);
            self.prob_backscatter = value(&properties.backscatter);
        }
        Some(())
    }

    fn uniform(&mut self) -> f64 {
        self.rng.random::<f64>()
    }

    /// Bernoulli trial with success probability `p`.
    fn chance(&mut self, p: f64) -> bool {
        self.uniform() < p
    }

    fn sample_facet(&mut self) -> Sampled<Vector3<f64>> {
        self.facet_model
            .sample(&self.old_momentum, &self.global_normal, &mut *self.rng)
            .ok_or(Exhausted)
    }

    fn sin_cos_incidence(&self) -> (f64, f64) {
        let cos1 = -self.old_momentum.dot(&self.facet_normal);
        let sin1 = if cos1.abs() < 1.0 - CAR_TOLERANCE {
            (1.0 - cos1 * cos1).sqrt()
        } else {
            0.0
        };
        (sin1, cos1)
    }

    /// Polarization decomposition against the current facet. At (near)
    /// normal incidence the whole field counts as parallel.
    fn incidence_plane(&self, sin1: f64) -> IncidencePlane {
        if sin1 > 0.0 {
            IncidencePlane::new(&self.old_momentum, &self.facet_normal, &self.old_polarization)
        } else {
            IncidencePlane {
                a_trans: self.old_polarization,
                e_perp: 0.0,
                e_parl: 1.0,
            }
        }
    }

    fn swap_media(&mut self) {
        std::mem::swap(&mut self.material1, &mut self.material2);
        std::mem::swap(&mut self.rindex1, &mut self.rindex2);
    }

    fn transmit(&mut self) {
        self.status = Outcome::Transmitted(TransmissionKind::Plain);
        self.new_momentum = self.old_momentum;
        self.new_polarization = self.old_polarization;
    }

    fn backscatter(&mut self) {
        self.new_momentum = -self.old_momentum;
        self.new_polarization = -self.old_polarization;
    }

    fn do_absorption(&mut self) {
        self.status = Outcome::Absorbed;
        self.deposited = 0.0;
        if self.chance(self.efficiency) {
            self.status = Outcome::Detected;
            self.deposited = self.energy;
        }
        self.new_momentum = self.old_momentum;
        self.new_polarization = self.old_polarization;
        self.killed = true;
    }

    /// Absorbs the photon after a capped loop ran out of trials.
    fn give_up(&mut self) {
        self.status = Outcome::Absorbed;
        self.deposited = 0.0;
        self.new_momentum = self.old_momentum;
        self.new_polarization = self.old_polarization;
        self.killed = true;
    }

    /// Lambertian, lobe or spike reflection depending on the status and
    /// finish.
    fn do_reflection(&mut self) -> Sampled<()> {
        if self.status == Outcome::Reflected(ReflectionKind::Lambertian) {
            self.new_momentum = lambertian(&self.global_normal, &mut *self.rng).ok_or(Exhausted)?;
            self.facet_normal = (self.new_momentum - self.old_momentum).normalize();
        } else if self.finish == Finish::Ground {
            self.status = Outcome::Reflected(ReflectionKind::SpecularLobe);
            if self.surface_rindex.is_none() {
                self.facet_normal = self.sample_facet()?;
            }
            self.new_momentum = reflection_vector(&self.old_momentum, &self.facet_normal);
        } else {
            self.status = Outcome::Reflected(ReflectionKind::SpecularSpike);
            self.facet_normal = self.global_normal;
            self.new_momentum = reflection_vector(&self.old_momentum, &self.facet_normal);
        }
        self.new_polarization = reflect_polarization(&self.old_polarization, &self.facet_normal);
        Ok(())
    }

    fn choose_reflection(&mut self) {
        let u = self.uniform();
        let kind = if u < self.prob_spike {
            self.facet_normal = self.global_normal;
            ReflectionKind::SpecularSpike
        } else if u < self.prob_spike + self.prob_lobe {
            ReflectionKind::SpecularLobe
        } else if u < self.prob_spike + self.prob_lobe + self.prob_backscatter {
            ReflectionKind::Backscatter
        } else {
            ReflectionKind::Lambertian
        };
        self.status = Outcome::Reflected(kind);
    }

    /// Reflects according to the status chosen so far: Lambertian,
    /// backscatter, or specular about the current facet.
    fn reflect_by_status(&mut self) -> Sampled<()> {
        match self.status {
            Outcome::Reflected(ReflectionKind::Lambertian) => self.do_reflection()?,
            Outcome::Reflected(ReflectionKind::Backscatter) => self.backscatter(),
            _ => {
                self.new_momentum = reflection_vector(&self.old_momentum, &self.facet_normal);
                self.new_polarization = reflect_polarization(&self.old_polarization, &self.facet_normal);
            }
        }
        Ok(())
    }

    /// Reflectivity of a surface with complex index `n2`, weighted by the
    /// polarization of the photon. Also decides which of the TE and TM
    /// components survive the reflection.
    fn calculate_reflectivity(&mut self, n2: Complex<f64>) -> Sampled<()> {
        self.facet_normal = if self.finish == Finish::Ground {
            self.sample_facet()?
        } else {
            self.global_normal
        };
        let (sin1, _) = self.sin_cos_incidence();
        let plane = self.incidence_plane(sin1);

        let cos_angle = self.old_momentum.dot(&self.facet_normal)
            / (self.old_momentum.norm() * self.facet_normal.norm());
        let incidence = PI - cos_angle.clamp(-1.0, 1.0).acos();
        let n1 = self
            .material1
            .complex_rindex(self.energy)
            .unwrap_or(Complex::new(self.rindex1, 0.0));
        let sin_i = incidence.sin();
        let cos_i = Complex::new(incidence.cos(), 0.0);
        let cos_t = (Complex::new(1.0, 0.0) - sin_i * sin_i * (n1 * n1) / (n2 * n2)).sqrt();

        let c = FresnelCoefficients::new(n1, n2, cos_i, cos_t);
        let split = PolarizationSplit::new(plane.e_perp, plane.e_parl);
        let r_te = split.te * c.r_te.norm_sqr();
        let r_tm = split.tm * c.r_tm.norm_sqr();
        let reflectivity = r_te + r_tm;
        self.reflectivity = reflectivity;

        for _ in 0..MAX_SAMPLING_TRIALS {
            self.te_reflects = self.uniform() * reflectivity <= r_te;
            self.tm_reflects = self.uniform() * reflectivity <= r_tm;
            if self.te_reflects || self.tm_reflects {
                return Ok(());
            }
        }
        Err(Exhausted)
    }

    /// Ideal dielectric surface, with painted finishes.
    fn ideal(&mut self) -> Sampled {
        if !self.finish.is_painted() {
            match self.material2.rindex(self.energy) {
                Some(n) => self.rindex2 = n,
                None => return Ok(Reaction::NoRefractiveIndex),
            }
        }
        if self.finish.is_back_painted() {
            return self.dielectric_dielectric();
        }

        let u = self.uniform();
        if u > self.reflectivity + self.transmittance {
            self.do_absorption();
        } else if u > self.reflectivity {
            self.transmit();
        } else {
            match self.finish {
                Finish::PolishedFrontPainted => self.do_reflection()?,
                Finish::GroundFrontPainted => {
                    self.status = Outcome::Reflected(ReflectionKind::Lambertian);
                    self.do_reflection()?;
                }
                _ => return self.dielectric_dielectric(),
            }
        }
        Ok(Reaction::Done)
    }

    /// Fresnel reflection and refraction between two dielectrics.
    ///
    /// **Context**: Rough facets can send a photon back into the surface, in
    /// which case it interacts again with a new facet. Behind a back-painted
    /// finish the photon may cross a thin gap, reflect off the paint and
    /// re-enter.
    ///
    /// **How it Works**: A state machine alternates between evaluating the
    /// interface (repeated until the photon leaves it) and, for back-painted
    /// finishes, the paint layer behind it, which absorbs, transmits or
    /// reflects the photon back onto the interface.
    fn dielectric_dielectric(&mut self) -> Sampled {
        let mut inside = false;
        let mut swap = false;

        self.facet_normal = if self.finish == Finish::Polished {
            self.global_normal
        } else {
            self.sample_facet()?
        };
        let cos1 = -self.old_momentum.dot(&self.facet_normal);

        let mut roughness_pass = true;
        if self.surface_roughness != 0.0 && self.rindex1 > self.rindex2 {
            let wavelength = HC_EV_MM / self.energy;
            let criterion = (-(4.0 * PI * self.surface_roughness * self.rindex1 * cos1 / wavelength).powi(2)).exp();
            roughness_pass = self.chance(criterion);
        }

        let mut state = LayerState::EvaluatingInterface;
        for _ in 0..MAX_SAMPLING_TRIALS {
            state = match state {
                LayerState::EvaluatingInterface => {
                    self.evaluate_interface(roughness_pass, &mut inside, &mut swap)?;
                    if inside && !swap && self.finish.is_back_painted() {
                        LayerState::CrossedIntoNextLayer
                    } else {
                        LayerState::Terminal(self.status)
                    }
                }
                LayerState::CrossedIntoNextLayer => {
                    let u = self.uniform();
                    if u > self.reflectivity + self.transmittance {
                        self.do_absorption();
                        LayerState::Terminal(self.status)
                    } else if u > self.reflectivity {
                        self.transmit();
                        LayerState::Terminal(self.status)
                    } else {
                        if self.status != Outcome::Refracted(RefractionKind::Fresnel) {
                            self.global_normal = -self.global_normal;
                        } else {
                            swap = !swap;
                            self.swap_media();
                        }
                        if self.finish == Finish::GroundBackPainted {
                            self.status = Outcome::Reflected(ReflectionKind::Lambertian);
                        }
                        self.do_reflection()?;
                        self.global_normal = -self.global_normal;
                        self.old_momentum = self.new_momentum;
                        self.old_polarization = self.new_polarization;
                        LayerState::EvaluatingInterface
                    }
                }
                LayerState::Terminal(outcome) => {
                    self.status = outcome;
                    return Ok(Reaction::Done);
                }
            };
        }
        Err(Exhausted)
    }

    /// One pass over the interface: repeated facet interactions until the
    /// photon leaves it.
    fn evaluate_interface(&mut self, roughness_pass: bool, inside: &mut bool, swap: &mut bool) -> Sampled<()> {
        let refraction = Outcome::Refracted(RefractionKind::Fresnel);
        let mut through = false;

        for _ in 0..MAX_SAMPLING_TRIALS {
            if through {
                *swap = !*swap;
                through = false;
                self.global_normal = -self.global_normal;
                self.swap_media();
            }

            self.facet_normal = if self.finish == Finish::Polished {
                self.global_normal
            } else {
                self.sample_facet()?
            };
            let (sin1, cos1) = self.sin_cos_incidence();
            let sin2 = if sin1 > 0.0 {
                sin_theta_t(sin1, self.rindex1, self.rindex2)
            } else {
                0.0
            };
            let rough_choice = self.facet_model.is_unified() && self.finish != Finish::Polished;

            if is_total_internal_reflection(sin2) {
                *swap = false;
                self.status = if roughness_pass {
                    Outcome::Reflected(ReflectionKind::TotalInternal)
                } else {
                    Outcome::Reflected(ReflectionKind::Lambertian)
                };
                if rough_choice {
                    self.choose_reflection();
                }
                self.reflect_by_status()?;
            } else {
                let cos2 = cos1.signum() * (1.0 - sin2 * sin2).sqrt();
                let plane = self.incidence_plane(sin1);
                let (n1, n2) = (self.rindex1, self.rindex2);
                let real = |x: f64| Complex::new(x, 0.0);
                let c = FresnelCoefficients::new(real(n1), real(n2), real(cos1), real(cos2));
                let e2_perp = c.t_te.re * plane.e_perp;
                let e2_parl = c.t_tm.re * plane.e_parl;
                let s1 = n1 * cos1;
                let s2 = n2 * cos2 * (e2_perp * e2_perp + e2_parl * e2_parl);
                let trans = if self.transmittance > 0.0 {
                    self.transmittance
                } else if cos1 != 0.0 {
                    s2 / s1
                } else {
                    0.0
                };

                if !self.chance(trans) {
                    *swap = false;
                    self.status = if roughness_pass {
                        Outcome::Reflected(ReflectionKind::Fresnel)
                    } else {
                        Outcome::Reflected(ReflectionKind::Lambertian)
                    };
                    if rough_choice {
                        self.choose_reflection();
                    }
                    match self.status {
                        Outcome::Reflected(ReflectionKind::Lambertian) => self.do_reflection()?,
                        Outcome::Reflected(ReflectionKind::Backscatter) => self.backscatter(),
                        _ => {
                            self.new_momentum = reflection_vector(&self.old_momentum, &self.facet_normal);
                            self.new_polarization = if sin1 > 0.0 {
                                plane.outgoing_polarization(
                                    &self.new_momentum,
                                    c.r_te.re * plane.e_perp,
                                    c.r_tm.re * plane.e_parl,
                                )
                            } else if n2 > n1 {
                                -self.old_polarization
                            } else {
                                self.old_polarization
                            };
                        }
                    }
                } else {
                    *inside = !*inside;
                    through = true;
                    self.status = refraction;
                    if sin1 > 0.0 {
                        self.new_momentum =
                            refraction_vector(&self.old_momentum, &self.facet_normal, cos1, cos2, n1, n2);
                        self.new_polarization = plane.outgoing_polarization(&self.new_momentum, e2_perp, e2_parl);
                    } else {
                        self.new_momentum = self.old_momentum;
                        self.new_polarization = self.old_polarization;
                    }
                }
            }

            self.old_momentum = self.new_momentum.normalize();
            self.old_polarization = self.new_polarization.normalize();

            let along_normal = self.new_momentum.dot(&self.global_normal);
            let done = if self.status == refraction {
                along_normal <= 0.0
            } else {
                along_normal >= -CAR_TOLERANCE
            };
            if done {
                return Ok(());
            }
        }
        Err(Exhausted)
    }

    /// Dielectric-metal surface: reflect or absorb, possibly several times
    /// on a rough surface until the photon leaves.
    fn dielectric_metal(&mut self) -> Sampled {
        for n in 1..=MAX_SAMPLING_TRIALS {
            let u = self.uniform();
            if n == 1 && u > self.reflectivity {
                if u > self.reflectivity + self.transmittance {
                    self.do_absorption();
                } else {
                    self.transmit();
                }
                return Ok(Reaction::Done);
            }

            if let Some(n2) = self.surface_rindex {
                if n > 1 {
                    self.calculate_reflectivity(n2)?;
                    if !self.chance(self.reflectivity) {
                        self.do_absorption();
                        return Ok(Reaction::Done);
                    }
                }
            }

            if matches!(self.facet_model, FacetModel::Glisur { .. }) || self.finish == Finish::Polished {
                self.do_reflection()?;
            } else {
                if n == 1 {
                    self.choose_reflection();
                }
                match self.status {
                    Outcome::Reflected(ReflectionKind::Lambertian) => self.do_reflection()?,
                    Outcome::Reflected(ReflectionKind::Backscatter) => self.backscatter(),
                    _ => {
                        if self.status == Outcome::Reflected(ReflectionKind::SpecularLobe)
                            && self.surface_rindex.is_none()
                        {
                            self.facet_normal = self.sample_facet()?;
                        }
                        self.new_momentum = reflection_vector(&self.old_momentum, &self.facet_normal);
                        self.new_polarization = self.metal_polarization();
                    }
                }
            }

            self.old_momentum = self.new_momentum;
            self.old_polarization = self.new_polarization;
            if self.new_momentum.dot(&self.global_normal) >= 0.0 {
                return Ok(Reaction::Done);
            }
        }
        Err(Exhausted)
    }

    /// Polarization after a specular metal reflection, keeping only the
    /// components that survived [`Self::calculate_reflectivity`].
    fn metal_polarization(&self) -> Vector3<f64> {
        if self.te_reflects && self.tm_reflects {
            return reflect_polarization(&self.old_polarization, &self.facet_normal);
        }
        let (sin1, _) = self.sin_cos_incidence();
        let a_trans = if sin1 > 0.0 {
            self.old_momentum.cross(&self.facet_normal).normalize()
        } else {
            self.old_polarization
        };
        if self.te_reflects {
            -a_trans
        } else {
            let a_paral = self.new_momentum.cross(&a_trans);
            if a_paral.norm() > VEC_LENGTH_THRESHOLD {
                -a_paral.normalize()
            } else {
                -orthogonal(&self.new_momentum).normalize()
            }
        }
    }

    /// Polarization mirrored about the bisector of the old and new
    /// directions.
    fn polarization_towards_new_momentum(&self) -> Vector3<f64> {
        let bisector = self.new_momentum - self.old_momentum;
        if bisector.norm() < VEC_LENGTH_THRESHOLD {
            return self.old_polarization;
        }
        reflect_polarization(&self.old_polarization, &bisector.normalize())
    }

    /// Coarse measured table.
    fn measured_coarse(&mut self) -> Sampled {
        let (Some(lut), Finish::Measured(finish)) =
            (self.surface.and_then(|s| s.coarse_lut.as_deref()), self.finish)
        else {
            return Err(Exhausted);
        };

        let incidence = self.old_momentum.angle(&-self.global_normal);
        let incident = incidence.to_degrees().round() as usize;
        let reflectivity = lut.reflectance(incident).unwrap_or(self.reflectivity);

        let u = self.uniform();
        if u > reflectivity {
            if u > reflectivity + self.transmittance {
                self.do_absorption();
            } else {
                self.transmit();
            }
            return Ok(Reaction::Done);
        }

        self.status = Outcome::Reflected(ReflectionKind::Measured(finish));
        self.new_momentum = lut
            .sample_direction(&self.old_momentum, &self.global_normal, &mut *self.rng)
            .ok_or(Exhausted)?;
        self.facet_normal = (self.new_momentum - self.old_momentum).normalize();
        self.new_polarization = reflect_polarization(&self.old_polarization, &self.facet_normal);
        Ok(Reaction::Done)
    }

    /// Fine measured table.
    fn measured_fine(&mut self) -> Sampled {
        let Some(lut) = self.surface.and_then(|s| s.fine_lut.as_deref()) else {
            return Err(Exhausted);
        };

        let u = self.uniform();
        let incidence = self.old_momentum.angle(&-self.global_normal);
        let incident = FineLut::incident_bin(incidence);

        if u > lut.reflectivity(incident) {
            if self.efficiency > 0.0 {
                self.do_absorption();
                return Ok(Reaction::Done);
            }
            self.transmit();
            if incident == 0 {
                return Ok(Reaction::Done);
            }
            let (azimuth, elevation) = lut.sample_transmission(incident, &mut *self.rng).ok_or(Exhausted)?;
            self.new_momentum = FineLut::direction(&-self.global_normal, &self.old_momentum, azimuth, elevation);
            self.new_polarization = self.polarization_towards_new_momentum();
            return Ok(Reaction::Done);
        }

        self.status = Outcome::Reflected(ReflectionKind::SpecularLobe);
        self.new_polarization = self.old_polarization;
        if incident == 0 {
            self.new_momentum = -self.old_momentum;
            return Ok(Reaction::Done);
        }
        for _ in 0..MAX_SAMPLING_TRIALS {
            let (azimuth, elevation) = lut.sample_reflection(incident, &mut *self.rng).ok_or(Exhausted)?;
            self.new_momentum = FineLut::direction(&self.global_normal, &self.old_momentum, azimuth, elevation);
            if self.new_momentum.dot(&self.global_normal) > 0.0 {
                return Ok(Reaction::Done);
            }
        }
        Err(Exhausted)
    }

    /// Dichroic filter: transmit straight through with the tabulated
    /// probability, otherwise reflect like a metal.
    fn dichroic(&mut self) -> Sampled {
        let Some(table) = self.surface.and_then(|s| s.dichroic.as_deref()) else {
            return Err(Exhausted);
        };
        let incidence = (self.old_momentum.angle(&-self.global_normal).to_degrees() + 0.5).floor();
        let wavelength = HC_EV_MM * MM_TO_NM / self.energy;
        self.transmittance = table.transmittance(wavelength, incidence);

        if self.chance(self.transmittance) {
            self.status = Outcome::Transmitted(TransmissionKind::Dichroic);
            self.new_momentum = self.old_momentum;
            self.new_polarization = self.old_polarization;
            return Ok(Reaction::Done);
        }

        if matches!(self.facet_model, FacetModel::Glisur { .. }) || self.finish == Finish::Polished {
            self.do_reflection()?;
            return Ok(Reaction::Done);
        }
        self.choose_reflection();
        match self.status {
            Outcome::Reflected(ReflectionKind::Lambertian) => self.do_reflection()?,
            Outcome::Reflected(ReflectionKind::Backscatter) => self.backscatter(),
            _ => {
                let lobe = self.status == Outcome::Reflected(ReflectionKind::SpecularLobe);
                let mut left = false;
                for _ in 0..MAX_SAMPLING_TRIALS {
                    if lobe {
                        self.facet_normal = self.sample_facet()?;
                    }
                    self.new_momentum = reflection_vector(&self.old_momentum, &self.facet_normal);
                    if self.new_momentum.dot(&self.global_normal) > 0.0 {
                        left = true;
                        break;
                    }
                }
                if !left {
                    return Err(Exhausted);
                }
                self.new_polarization = reflect_polarization(&self.old_polarization, &self.facet_normal);
            }
        }
        Ok(Reaction::Done)
    }

    /// Thin absorbing coating between the two media. Absorption in the
    /// coating is a detection.
    fn coated(&mut self) -> Sampled {
        let energy = self.energy;
        let Some(surface) = self.surface else {
            return Err(Exhausted);
        };
        let Some(coating) = surface.properties.coating_rindex(energy) else {
            return Ok(Reaction::NoRefractiveIndex);
        };
        let Some(rindex2) = self.material2.rindex(energy) else {
            return Ok(Reaction::NoRefractiveIndex);
        };
        self.rindex2 = rindex2;
        let thickness = surface.properties.coated_thickness;

        let mut n1 = Complex::new(self.rindex1, self.material1.imaginary_index(energy));
        let mut n2 = Complex::new(self.rindex2, self.material2.imaginary_index(energy));
        let ambient = if self.history.len() > 1 {
            self.history.nth_previous(1).map(|before| {
                let n_before = before.rindex(energy).unwrap_or(0.0);
                (n_before, Complex::new(n_before, before.imaginary_index(energy)))
            })
        } else {
            None
        };

        let mut through = false;
        for _ in 0..MAX_SAMPLING_TRIALS {
            if through {
                through = false;
                self.global_normal = -self.global_normal;
                self.swap_media();
                std::mem::swap(&mut n1, &mut n2);
            }

            self.facet_normal = if self.finish == Finish::Polished {
                self.global_normal
            } else {
                self.sample_facet()?
            };
            let (sin1, cos1) = self.sin_cos_incidence();
            let (r1, r2) = (self.rindex1, self.rindex2);
            let sin_coating = if sin1 > 0.0 { (sin1 * n1 / coating).re } else { 0.0 };
            let sin2 = (sin_coating * coating / n2).re;
            let cos2 = cos1.signum() * (1.0 - sin2 * sin2).max(0.0).sqrt();
            let plane = self.incidence_plane(sin1);

            let real = |x: f64| Complex::new(x, 0.0);
            let single = FresnelCoefficients::new(real(r1), real(r2), real(cos1), real(cos2));
            let stack = ThinFilmStack::new(n1, coating, n2, thickness, energy);
            let angles = stack.angles(cos1, ambient);
            let result = stack.evaluate(&angles, PolarizationSplit::new(plane.e_perp, plane.e_parl));
            let frustrated = is_total_internal_reflection(sin_coating);

            let u = self.uniform();
            match result.choose(u) {
                LayerChoice::Reflect => {
                    self.status = if frustrated {
                        Outcome::Reflected(ReflectionKind::TotalInternal)
                    } else {
                        Outcome::Reflected(ReflectionKind::Coated)
                    };
                    self.new_momentum = reflection_vector(&self.old_momentum, &self.facet_normal);
                    self.new_polarization = if sin1 > 0.0 {
                        plane.outgoing_polarization(
                            &self.new_momentum,
                            single.r_te.re * plane.e_perp,
                            single.r_tm.re * plane.e_parl,
                        )
                    } else if r2 > r1 {
                        -self.old_polarization
                    } else {
                        self.old_polarization
                    };
                }
                LayerChoice::Transmit => {
                    through = true;
                    self.status = if frustrated {
                        Outcome::Refracted(RefractionKind::CoatedFrustrated)
                    } else {
                        Outcome::Refracted(RefractionKind::Coated)
                    };
                    if sin1 > 0.0 {
                        self.new_momentum =
                            refraction_vector(&self.old_momentum, &self.facet_normal, cos1, cos2, r1, r2);
                        self.new_polarization = plane.outgoing_polarization(
                            &self.new_momentum,
                            single.t_te.re * plane.e_perp,
                            single.t_tm.re * plane.e_parl,
                        );
                    } else {
                        self.new_momentum = self.old_momentum;
                        self.new_polarization = self.old_polarization;
                    }
                }
                LayerChoice::Absorb => {
                    self.status = Outcome::Detected;
                    self.deposited = 0.0;
                    self.new_momentum = self.old_momentum;
                    self.new_polarization = self.old_polarization;
                    self.killed = true;
                    return Ok(Reaction::Done);
                }
            }

            self.old_momentum = self.new_momentum.normalize();
            self.old_polarization = self.new_polarization.normalize();
            let along_normal = self.new_momentum.dot(&self.global_normal);
            let done = if matches!(self.status, Outcome::Refracted(_)) {
                along_normal <= 0.0
            } else {
                along_normal >= -CAR_TOLERANCE
            };
            if done {
                return Ok(Reaction::Done);
            }
        }
        Err(Exhausted)
    }

    /// Normalizes the result and writes it into a copy of `photon`.
    fn into_state(self, photon: &PhotonState) -> PhotonState {
        let momentum = self.new_momentum.normalize();
        let polarization = self.new_polarization - self.new_polarization.dot(&momentum) * momentum;
        let polarization = if polarization.norm() > VEC_LENGTH_THRESHOLD {
            polarization.normalize()
        } else {
            orthogonal(&momentum).normalize()
        };

        let mut state = *photon;
        state.momentum = momentum;
        state.polarization = polarization;
        state.status = self.status;
        if self.status.enters_next_medium() {
            if let Some(velocity) = self.material2.group_velocity(self.energy) {
                state.velocity = velocity;
            }
        }
        if self.killed {
            state.kill(self.deposited);
        }
        state
    }
}
