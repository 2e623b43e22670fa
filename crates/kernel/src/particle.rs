//! Stochastic particle state and the particle collection.
//!
//! A particle is a plain struct — no behaviour-carrying base class. The
//! injector creates them, external advection moves them, the mixing model
//! relaxes their carried state, and the persistence layer
//! ([`crate::particle_io`]) defines what crosses the restart boundary.

use glam::DVec3;

/// State of one stochastic particle.
///
/// `position` and `cell` form the base tracking block owned by the external
/// particle-tracking collaborator; the remaining fields are the PDF-method
/// payload. `shift` and `ghost` are per-step transient bookkeeping: they are
/// never restored from persisted state.
#[derive(Debug, Clone, PartialEq)]
pub struct Particle {
    /// Position in global coordinates.
    pub position: DVec3,
    /// Index of the containing cell.
    pub cell: usize,
    /// Particle mass. Must stay positive while the particle is active.
    pub mass: f64,
    /// Velocity carried for the modeled PDF state.
    pub u_pdf: DVec3,
    /// Instantaneous particle velocity.
    pub u_particle: DVec3,
    /// Secondary filtered velocity estimate.
    pub u_filtered: DVec3,
    /// Carried scalar state (e.g. mixture fraction).
    pub z: f64,
    /// Local density.
    pub rho: f64,
    /// Particle-local time step (sub-step, not the global step).
    pub dt: f64,
    /// Residual displacement for sub-stepping / boundary correction.
    pub shift: DVec3,
    /// Non-zero while the particle is provisional ("ghost") bookkeeping.
    pub ghost: i32,
}

impl Particle {
    /// True while the particle is provisional bookkeeping.
    pub fn is_ghost(&self) -> bool {
        self.ghost != 0
    }
}

/// Mass-weighted per-cell moments of the particle population.
///
/// Cells without particles keep zero mass; their means are meaningless and
/// must not be read (no particle lives there to be corrected).
#[derive(Debug, Clone)]
pub struct CellMeans {
    /// Total particle mass per cell.
    pub mass: Vec<f64>,
    /// Mass-weighted mean carried scalar per cell.
    pub z: Vec<f64>,
    /// Mass-weighted mean PDF-state velocity per cell.
    pub u_pdf: Vec<DVec3>,
}

/// Flat particle collection.
///
/// Deliberately thin: tracking across faces, parallel decomposition and
/// culling policy belong to the surrounding cloud machinery. What lives here
/// is what the engine itself needs — append/merge of injection buffers and
/// the per-cell moment reduction consumed by the mixing pass.
#[derive(Debug, Clone, Default)]
pub struct ParticleCloud {
    particles: Vec<Particle>,
}

impl ParticleCloud {
    /// Create an empty cloud.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of particles.
    pub fn len(&self) -> usize {
        self.particles.len()
    }

    /// True if the cloud holds no particles.
    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }

    /// Append one particle.
    pub fn push(&mut self, p: Particle) {
        self.particles.push(p);
    }

    /// Merge a buffer of particles (e.g. one worker's injection output).
    pub fn extend(&mut self, buffer: Vec<Particle>) {
        self.particles.extend(buffer);
    }

    /// Keep only the particles for which `keep` returns true.
    pub fn retain<F: FnMut(&Particle) -> bool>(&mut self, keep: F) {
        self.particles.retain(keep);
    }

    /// Like [`retain`](Self::retain), but `keep` may also mutate each
    /// particle (used when relocation updates the cell while culling).
    pub fn retain_mut<F: FnMut(&mut Particle) -> bool>(&mut self, keep: F) {
        self.particles.retain_mut(keep);
    }

    /// Immutable view of the particles.
    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }

    /// Mutable view of the particles.
    pub fn particles_mut(&mut self) -> &mut [Particle] {
        &mut self.particles
    }

    /// Mass-weighted per-cell means of the carried state.
    ///
    /// Ghost particles are excluded: they are provisional bookkeeping and
    /// must not bias the statistics.
    pub fn cell_means(&self, n_cells: usize) -> CellMeans {
        let mut mass = vec![0.0f64; n_cells];
        let mut z = vec![0.0f64; n_cells];
        let mut u_pdf = vec![DVec3::ZERO; n_cells];

        for p in &self.particles {
            if p.is_ghost() || p.cell >= n_cells {
                continue;
            }
            mass[p.cell] += p.mass;
            z[p.cell] += p.mass * p.z;
            u_pdf[p.cell] += p.mass * p.u_pdf;
        }
        for c in 0..n_cells {
            if mass[c] > 0.0 {
                z[c] /= mass[c];
                u_pdf[c] /= mass[c];
            }
        }

        CellMeans { mass, z, u_pdf }
    }
}
