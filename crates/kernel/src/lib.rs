//! Monte-Carlo PDF Particle Engine Kernel
//!
//! This crate provides the stochastic-particle core of a Monte-Carlo
//! probability-density-function (PDF) solver for turbulent reactive flow.
//! It is designed to be separable and compute-focused: the surrounding
//! solver owns the mesh, the mean-flow fields and the particle tracking;
//! this crate owns the numerics on top of them.
//!
//! # Modules
//! - [`mesh`] -- Polyhedral mesh snapshot consumed from the flow solver.
//! - [`tet`] -- Tetrahedral cell decomposition and hint-based point location.
//! - [`distribution`] -- Analytic wall-normal inflow velocity distribution.
//! - [`boundary`] -- Open-boundary particle injection (two-phase correct).
//! - [`mixing`] -- Mixing models (IEM) behind a name-keyed registry.
//! - [`particle`] -- Particle state and the particle collection.
//! - [`particle_io`] -- Explicit field-by-field persistence contract.
//! - [`flow`] -- Mean-field statistics consumed from the flow solver.
//! - [`math`] -- erf, Gaussian draws, symmetric tensors, face frames.

#![warn(missing_docs)]

pub mod boundary;
pub mod distribution;
pub mod flow;
pub mod math;
pub mod mesh;
pub mod mixing;
pub mod particle;
pub mod particle_io;
pub mod tet;

pub use boundary::{BoundaryError, InPlaneSpread, InjectionStats, OpenBoundaryInjector, Phase};
pub use distribution::{DistributionError, InletRandom};
pub use flow::{FlowField, FlowFieldError, PatchFlow};
pub use math::SymTensor3;
pub use mesh::{Patch, PolyMesh};
pub use mixing::{build_mixing_model, IemMixing, MixingError, MixingModel};
pub use particle::{CellMeans, Particle, ParticleCloud};
pub use particle_io::{Encoding, ParticleIoError};
pub use tet::TetDecomposition;
