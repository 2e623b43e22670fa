//! Orchestration Layer
//!
//! This crate wires a configured Monte-Carlo PDF particle engine together:
//! - Configuration parsing and validation (JSON)
//! - Domain setup: boundary patch resolution, injector construction,
//!   mixing-model selection
//! - Step driver enforcing the per-step phase sequence

#![warn(missing_docs)]

pub mod config;
pub mod domain;
pub mod runner;

pub use config::{ConfigError, EngineConfig};
pub use domain::{setup_domain, Domain, SetupError};
pub use runner::{StepDriver, StepError, StepStats};

use kernel::PolyMesh;
use thiserror::Error;

/// Failures of the full engine setup pipeline.
#[derive(Debug, Error)]
pub enum CreateError {
    /// Configuration could not be loaded or validated.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The configuration does not match the mesh.
    #[error(transparent)]
    Setup(#[from] SetupError),
}

/// Create a ready-to-step engine from a configuration file and a mesh.
///
/// This performs the full setup pipeline:
/// 1. Load and validate the configuration
/// 2. Resolve boundary patches and build one injector per open boundary
/// 3. Construct the configured mixing model
/// 4. Decompose the mesh into tetrahedra and wrap everything in a
///    [`StepDriver`]
///
/// # Example
/// ```no_run
/// use glam::DVec3;
/// use kernel::PolyMesh;
/// use orchestrator::create_engine;
///
/// let mesh = PolyMesh::hex_block(DVec3::ZERO, DVec3::ONE, 8, 8, 8);
/// let mut driver = create_engine("config/channel.json", &mesh)?;
/// // ... per step: driver.advance(&flow, |cloud| { /* advect */ })
/// # Ok::<(), orchestrator::CreateError>(())
/// ```
pub fn create_engine(config_path: &str, mesh: &PolyMesh) -> Result<StepDriver, CreateError> {
    tracing::info!("Creating engine from config: {}", config_path);

    let config = EngineConfig::load(config_path)?;
    tracing::info!("Configuration loaded: {}", config.name);

    let domain = setup_domain(&config, mesh)?;

    let driver = StepDriver::new(mesh, domain, config.time_step);
    tracing::info!(
        "Engine ready: {} cells decomposed into {} tetrahedra",
        mesh.n_cells(),
        driver.decomposition().len()
    );
    Ok(driver)
}
