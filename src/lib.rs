//! Monte Carlo optical-photon boundary interactions.
//!
//! The [`boundary::BoundaryProcess`] decides what an optical photon does when
//! it reaches the boundary between two media: Fresnel reflection or
//! refraction, reflection off rough or painted finishes, measured angular
//! tables, dichroic filtering, or absorption and detection in a thin-film
//! photocathode coating.

pub mod boundary;
pub mod config;
pub mod detection;
pub mod dichroic;
pub mod error;
pub mod facet;
pub mod fresnel;
pub mod history;
pub mod lut;
pub mod material;
pub mod output;
pub mod photon;
pub mod scan;
pub mod settings;
pub mod snell;
pub mod surface;
pub mod tally;
pub mod thin_film;
