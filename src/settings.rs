use anyhow::{anyhow, ensure, Context, Result};
use clap::Parser;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::material::Medium;
use crate::surface::SurfaceConfig;


/// Runtime configuration of a scan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    /// Vacuum wavelength in nm.
    pub wavelength: f64,
    /// Angle between the incoming photons and the surface normal, in degrees.
    pub incidence_angle: f64,
    /// Rotation of the polarization away from TE about the momentum, in
    /// degrees.
    #[serde(default)]
    pub polarization_angle: f64,
    pub num_photons: usize,
    pub seed: Option<u64>,
    /// Number of exit-angle bins over `[0°, 180°]`.
    #[serde(default = "default_num_bins")]
    pub num_bins: usize,
    /// Output directory.
    #[serde(default = "default_directory")]
    pub directory: PathBuf,
    /// Medium the photons come from.
    pub medium1: Medium,
    /// Medium behind the surface.
    pub medium2: Medium,
    /// Medium the photons crossed before reaching `medium1`.
    #[serde(default)]
    pub ambient: Option<Medium>,
    #[serde(default)]
    pub surface: Option<SurfaceConfig>,
}

fn default_num_bins() -> usize {
    180
}

fn default_directory() -> PathBuf {
    PathBuf::from("opboundary_run")
}

pub fn load_default_config() -> Result<Settings> {
    let root = retrieve_project_root()?;
    let default_config_file = root.join("config/default.toml");

    let settings = Config::builder()
        .add_source(File::from(default_config_file).required(true))
        .build()
        .context("loading configuration")?;
    let config: Settings = settings.try_deserialize().context("deserializing configuration")?;

    validate_config(&config)?;
    Ok(config)
}

pub fn load_config() -> Result<Settings> {
    let root = retrieve_project_root()?;

    let default_config_file = root.join("config/default.toml");
    let local_config = root.join("config/local.toml");

    let config_file = if local_config.exists() {
        info!(path = ?local_config, "using local configuration");
        local_config
    } else {
        info!(path = ?default_config_file, "using default configuration");
        default_config_file
    };

    let mut config = read_config_with_env(&config_file)?;

    let args = CliArgs::parse();
    apply_cli(&mut config, &args);

    validate_config(&config)?;
    info!("{}", config);

    Ok(config)
}

/// Reads `config_file`, then applies environment overrides. Variables use
/// the prefix `OPBOUND` and `__` between keys, e.g. `OPBOUND__NUM_PHOTONS`
/// or `OPBOUND__MEDIUM1__NAME`.
fn read_config_with_env(config_file: &Path) -> Result<Settings> {
    let settings = Config::builder()
        .add_source(File::from(config_file).required(true))
        .add_source(Environment::with_prefix("opbound").separator("__").try_parsing(true))
        .build()
        .context("loading configuration")?;
    settings.try_deserialize().context("deserializing configuration")
}

/// Command-line values take precedence over the configuration files.
pub fn apply_cli(config: &mut Settings, args: &CliArgs) {
    if let Some(wavelength) = args.w {
        config.wavelength = wavelength;
    }
    if let Some(angle) = args.angle {
        config.incidence_angle = angle;
    }
    if let Some(pol) = args.pol {
        config.polarization_angle = pol;
    }
    if let Some(n) = args.num {
        config.num_photons = n;
    }
    if let Some(seed) = args.seed {
        config.seed = Some(seed);
    }
    if let Some(bins) = args.bins {
        config.num_bins = bins;
    }
    if let Some(dir) = &args.dir {
        config.directory = dir.clone();
    }
}

/// Retrieve the project root directory.
/// Tries, in order: the CARGO_MANIFEST_DIR environment variable, the
/// OPBOUND_ROOT_DIR environment variable, then the nearest directory above
/// the executable that contains a "config" subdirectory.
fn retrieve_project_root() -> Result<PathBuf> {
    if let Ok(manifest_dir) = env::var("CARGO_MANIFEST_DIR") {
        return Ok(PathBuf::from(manifest_dir));
    }
    if let Ok(path) = env::var("OPBOUND_ROOT_DIR") {
        return Ok(PathBuf::from(path));
    }

    let exe_path = env::current_exe().context("locating the executable")?;
    exe_path
        .ancestors()
        .skip(1)
        .find(|dir| dir.join("config").is_dir())
        .map(Path::to_path_buf)
        .ok_or_else(|| anyhow!("could not find a project directory containing config/"))
}

pub fn validate_config(config: &Settings) -> Result<()> {
    ensure!(config.wavelength > 0.0, "wavelength must be greater than 0");
    ensure!(
        (0.0..90.0).contains(&config.incidence_angle),
        "incidence angle must lie in [0, 90) degrees, got {}",
        config.incidence_angle
    );
    ensure!(config.num_photons > 0, "number of photons must be greater than 0");
    ensure!(config.num_bins > 0, "number of exit-angle bins must be greater than 0");
    ensure!(config.medium1 != config.medium2, "medium1 and medium2 must differ");
    Ok(())
}

#[derive(Parser, Debug)]
#[command(version, about = "opboundary - Monte Carlo optical photon boundary interactions")]
pub struct CliArgs {
    /// Vacuum wavelength in nm.
    #[arg(short, long)]
    w: Option<f64>,

    /// Angle of incidence in degrees.
    #[arg(short, long)]
    angle: Option<f64>,

    /// Polarization angle in degrees, measured from TE.
    #[arg(long)]
    pol: Option<f64>,

    /// Number of photons to shoot at the surface.
    #[arg(short, long)]
    num: Option<usize>,

    /// Random seed for the scan.
    #[arg(short, long)]
    seed: Option<u64>,

    /// Number of exit-angle bins.
    #[arg(long)]
    bins: Option<usize>,

    /// Output directory.
    #[arg(short, long)]
    dir: Option<PathBuf>,
}

impl fmt::Display for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let surface = self
            .surface
            .as_ref()
            .map(|s| format!("{} ({:?}, {})", s.name, s.model, s.finish))
            .unwrap_or_else(|| "none".to_string());
        write!(
            f,
            "Settings:
  - Wavelength: {:.3} nm
  - Incidence Angle: {:.3} deg
  - Polarization Angle: {:.3} deg
  - Photons: {}
  - Seed: {:?}
  - Media: {} -> {}
  - Ambient: {}
  - Surface: {}
  ",
            self.wavelength,
            self.incidence_angle,
            self.polarization_angle,
            self.num_photons,
            self.seed,
            self.medium1.name,
            self.medium2.name,
            self.ambient.as_ref().map_or("none", |m| m.name.as_str()),
            surface,
        )
    }
}
