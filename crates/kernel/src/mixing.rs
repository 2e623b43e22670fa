//! Molecular mixing models: per-particle relaxation toward local means.
//!
//! A mixing model is a two-method strategy object: `update_internals`
//! recomputes the per-cell statistics once per step, `correct` then mutates
//! exactly one particle given those frozen statistics. Corrections across
//! particles are independent, so the per-particle pass may run on worker
//! threads (`correct` takes `&self`).
//!
//! Concrete models are selected by name through a registry of constructors,
//! resolved once at configuration time.

use thiserror::Error;

use crate::flow::FlowField;
use crate::particle::{Particle, ParticleCloud};

/// Mixing model contract.
///
/// Callers must invoke [`update_internals`] exactly once per step, before any
/// [`correct`] call of that step; the statistics are frozen in between
/// (compute-then-freeze, no locking during the particle pass).
///
/// [`update_internals`]: MixingModel::update_internals
/// [`correct`]: MixingModel::correct
pub trait MixingModel: Send + Sync {
    /// Recompute the cell-local statistics for the coming mixing pass.
    fn update_internals(&mut self, cloud: &ParticleCloud, flow: &FlowField);

    /// Relax one particle's carried state toward the cell-local mean.
    fn correct(&self, p: &mut Particle);
}

impl std::fmt::Debug for dyn MixingModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("dyn MixingModel")
    }
}

/// Errors of mixing-model selection and construction.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MixingError {
    /// The requested model name is not registered.
    #[error("unknown mixing model {name:?}, available: {available}")]
    UnknownModel {
        /// The requested name.
        name: String,
        /// Comma-separated registered names.
        available: String,
    },
    /// The model constant is unusable.
    #[error("mixing constant Cmix must be finite and > 0, got {cmix}")]
    InvalidConstant {
        /// Offending constant.
        cmix: f64,
    },
}

// ---------------------------------------------------------------------------
// IEM
// ---------------------------------------------------------------------------

/// Interaction-by-exchange-with-the-mean (IEM) mixing model.
///
/// ```text
/// z <- z - min(1, (Cmix/2) * omega * dt_p) * (z - <z>)
/// ```
///
/// `omega` is the cell's turbulent mixing frequency, `dt_p` the particle's
/// own sub-step, so the relaxation strength stays consistent for particles
/// with individually adapted time steps. The decay factor saturates at 1:
/// in the fast-mixing limit the state lands exactly on the mean instead of
/// overshooting.
pub struct IemMixing {
    /// Cmix / 2, precomputed at construction.
    cmix2: f64,
    cell_mean_z: Vec<f64>,
    cell_mix_freq: Vec<f64>,
    ready: bool,
}

impl IemMixing {
    /// Registered name of this model.
    pub const NAME: &'static str = "IEM";

    /// Build with the given mixing constant `Cmix`.
    pub fn new(cmix: f64) -> Result<Self, MixingError> {
        if !cmix.is_finite() || cmix <= 0.0 {
            return Err(MixingError::InvalidConstant { cmix });
        }
        Ok(Self {
            cmix2: 0.5 * cmix,
            cell_mean_z: Vec::new(),
            cell_mix_freq: Vec::new(),
            ready: false,
        })
    }
}

impl MixingModel for IemMixing {
    fn update_internals(&mut self, cloud: &ParticleCloud, flow: &FlowField) {
        let n_cells = flow.cell_mix_freq.len();
        self.cell_mean_z = cloud.cell_means(n_cells).z;
        self.cell_mix_freq = flow.cell_mix_freq.clone();
        self.ready = true;
    }

    fn correct(&self, p: &mut Particle) {
        debug_assert!(self.ready, "update_internals must run before correct");
        if p.is_ghost() || p.cell >= self.cell_mean_z.len() {
            return;
        }
        let omega = self.cell_mix_freq[p.cell];
        let decay = (self.cmix2 * omega * p.dt).min(1.0);
        p.z -= decay * (p.z - self.cell_mean_z[p.cell]);
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

type Constructor = fn(f64) -> Result<Box<dyn MixingModel>, MixingError>;

/// Registered (name, constructor) pairs.
const REGISTRY: &[(&str, Constructor)] = &[(IemMixing::NAME, |cmix| {
    IemMixing::new(cmix).map(|m| Box::new(m) as Box<dyn MixingModel>)
})];

/// Construct a mixing model by registered name.
pub fn build_mixing_model(name: &str, cmix: f64) -> Result<Box<dyn MixingModel>, MixingError> {
    for (registered, constructor) in REGISTRY {
        if *registered == name {
            return constructor(cmix);
        }
    }
    Err(MixingError::UnknownModel {
        name: name.to_string(),
        available: REGISTRY
            .iter()
            .map(|(n, _)| *n)
            .collect::<Vec<_>>()
            .join(", "),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::PolyMesh;
    use glam::DVec3;

    fn two_particle_cloud() -> ParticleCloud {
        let mut cloud = ParticleCloud::new();
        for z in [0.0, 2.0] {
            cloud.push(Particle {
                position: DVec3::splat(0.5),
                cell: 0,
                mass: 1.0,
                u_pdf: DVec3::ZERO,
                u_particle: DVec3::ZERO,
                u_filtered: DVec3::ZERO,
                z,
                rho: 1.0,
                dt: 0.01,
                shift: DVec3::ZERO,
                ghost: 0,
            });
        }
        cloud
    }

    fn flow_with_omega(omega: f64) -> FlowField {
        let mesh = PolyMesh::hex_block(DVec3::ZERO, DVec3::ONE, 1, 1, 1);
        FlowField::uniform(&mesh, DVec3::ZERO, 1.0, omega, 1.0, 0.0)
    }

    #[test]
    fn vanishing_rate_leaves_state_unchanged() {
        let cloud = two_particle_cloud();
        let flow = flow_with_omega(1.0e-12);
        let mut model = IemMixing::new(2.0).unwrap();
        model.update_internals(&cloud, &flow);

        let mut p = cloud.particles()[0].clone();
        let before = p.z;
        model.correct(&mut p);
        assert!((p.z - before).abs() < 1.0e-12);
    }

    #[test]
    fn saturated_rate_converges_to_mean() {
        let cloud = two_particle_cloud();
        let flow = flow_with_omega(1.0e9); // Cmix/2 * omega * dt >> 1
        let mut model = IemMixing::new(2.0).unwrap();
        model.update_internals(&cloud, &flow);

        // Cell mean of z over {0, 2} with equal masses is 1.
        let mut p = cloud.particles()[0].clone();
        model.correct(&mut p);
        assert!(
            (p.z - 1.0).abs() < 1.0e-12,
            "saturated mixing must land on the mean, got {}",
            p.z
        );
    }

    #[test]
    fn relaxation_is_monotone_in_rate() {
        let cloud = two_particle_cloud();
        let mut previous_distance = f64::INFINITY;
        for omega in [1.0, 10.0, 100.0] {
            let flow = flow_with_omega(omega);
            let mut model = IemMixing::new(2.0).unwrap();
            model.update_internals(&cloud, &flow);
            let mut p = cloud.particles()[1].clone();
            model.correct(&mut p);
            let distance = (p.z - 1.0).abs();
            assert!(distance < previous_distance);
            previous_distance = distance;
        }
    }

    #[test]
    fn registry_resolves_and_rejects() {
        assert!(build_mixing_model("IEM", 2.0).is_ok());
        let err = build_mixing_model("NoSuchModel", 2.0).unwrap_err();
        assert!(matches!(err, MixingError::UnknownModel { .. }));
        assert!(matches!(
            build_mixing_model("IEM", -1.0),
            Err(MixingError::InvalidConstant { .. })
        ));
    }
}
