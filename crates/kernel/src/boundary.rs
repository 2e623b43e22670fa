//! Open-boundary particle injection.
//!
//! An injector owns one inlet/outlet patch. Per face it precomputes the
//! face-normal coordinate frame and an area-weighted cumulative probability
//! vector over the face's fan triangulation; per flow update it lazily builds
//! the face-local mean velocity, spread, and wall-normal sampling
//! distribution. Each step's `AfterMove` phase then injects the particle
//! flux expected from the local density, mean normal velocity, face area and
//! time step, sampling positions uniformly by area and velocities from the
//! face-local distributions.
//!
//! In-plane velocity components are drawn as independent centered Gaussians
//! at the isotropic in-plane spread; the deviatoric (correlated) part of the
//! Reynolds stress is not used. This is a deliberate, documented
//! simplification, not a defect.
//!
//! Outlet behaviour (absorbing particles that crossed the patch) is owned by
//! the surrounding cloud machinery; faces whose mean normal velocity points
//! outward simply inject nothing here.

use glam::{DMat3, DVec3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use thiserror::Error;
use tracing::debug;

use crate::distribution::{DistributionError, InletRandom};
use crate::flow::FlowField;
use crate::math::{face_frame, standard_normal};
use crate::mesh::PolyMesh;
use crate::particle::{Particle, ParticleCloud};

/// Two-phase call gate of the per-step boundary correction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Before particle advection: boundary does nothing.
    BeforeMove,
    /// After particle advection: inject the expected inflow.
    AfterMove,
}

/// Policy for the in-plane velocity spread.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InPlaneSpread {
    /// Isotropic estimate from the transformed Reynolds stress.
    FromStress,
    /// Fixed RMS value overriding the stress field.
    Fixed(f64),
}

/// Failures of boundary cache construction and sampling.
#[derive(Debug, Error)]
pub enum BoundaryError {
    /// Sampling was requested before the caches were built.
    #[error("boundary {patch:?}: statistics not built; call build_caches after each flow update")]
    NotReady {
        /// Patch name.
        patch: String,
    },
    /// The flow snapshot carries no data for this patch.
    #[error("boundary {patch:?}: flow snapshot provides no patch data")]
    MissingFlow {
        /// Patch name.
        patch: String,
    },
    /// The flow snapshot's patch arrays have the wrong length.
    #[error("boundary {patch:?}: flow data has {found} faces, patch has {expected}")]
    FaceCount {
        /// Patch name.
        patch: String,
        /// Faces in the patch.
        expected: usize,
        /// Faces in the flow data.
        found: usize,
    },
    /// The flow snapshot's cell arrays do not cover this patch's owner cells.
    #[error("boundary {patch:?}: flow snapshot does not cover owner cell {cell}")]
    MissingCellData {
        /// Patch name.
        patch: String,
        /// Offending owner cell.
        cell: usize,
    },
    /// The face density is unusable.
    #[error("boundary {patch:?} face {face}: density must be finite and > 0, got {rho}")]
    InvalidDensity {
        /// Patch name.
        patch: String,
        /// Face index within the patch.
        face: usize,
        /// Offending density.
        rho: f64,
    },
    /// The velocity distribution rejected its parameters (e.g. negative
    /// variance after transforming the stress tensor).
    #[error("boundary {patch:?} face {face}: {source}")]
    Distribution {
        /// Patch name.
        patch: String,
        /// Face index within the patch.
        face: usize,
        /// Underlying parameter failure.
        #[source]
        source: DistributionError,
    },
}

/// Frozen per-face geometry, valid until the mesh changes.
struct FaceGeometry {
    /// Owner cell (the cell particles enter).
    owner: usize,
    /// Face area.
    area: f64,
    /// Global -> face-local rotation (local x = inward normal).
    fwd: DMat3,
    /// Face-local -> global rotation (transpose of `fwd`).
    rev: DMat3,
    /// Fan triangles (point A, point B, face centroid), zero-area ones dropped.
    tris: Vec<[DVec3; 3]>,
    /// Cumulative normalized triangle areas: starts at 0, ends at 1,
    /// non-decreasing; `tris.len() + 1` entries.
    cum_weights: Vec<f64>,
}

/// Per-face statistics built from one flow snapshot.
struct FaceCaches {
    /// Mean velocity in face-local coordinates.
    u_local: DVec3,
    /// Mean velocity in global coordinates (initializes carried state).
    u_mean_global: DVec3,
    /// Isotropic in-plane RMS spread.
    sigma_t: f64,
    /// Mean density.
    rho: f64,
    /// Mean carried scalar of the owner cell.
    z_mean: f64,
    /// Wall-normal inflow velocity distribution.
    inlet: InletRandom,
}

/// Per-step injection bookkeeping of one patch.
#[derive(Debug, Clone, Copy, Default)]
pub struct InjectionStats {
    /// Particles actually injected.
    pub injected: usize,
    /// Expected (fractional) particle count before rounding.
    pub expected: f64,
}

/// Pick the fan triangle covering a cumulative draw.
///
/// Returns the first interval whose upper cumulative weight exceeds `u`;
/// e.g. weights `[0, 0.3, 0.7, 1.0]` and `u = 0.5` select triangle 1
/// (the interval `[0.3, 0.7)`).
fn select_triangle(cum_weights: &[f64], u: f64) -> usize {
    let idx = cum_weights.partition_point(|&w| w <= u);
    (idx.saturating_sub(1)).min(cum_weights.len().saturating_sub(2))
}

/// Particle injector for one open-boundary patch.
///
/// Construction freezes the per-face geometry and seeds one random generator
/// per face, deterministically from `base_seed` and the global face id — the
/// same configuration always reproduces the same particle stream, and each
/// generator is exclusively owned by its face (no sharing across workers).
pub struct OpenBoundaryInjector {
    patch_name: String,
    patch_index: usize,
    particle_mass: f64,
    in_plane: InPlaneSpread,
    faces: Vec<FaceGeometry>,
    rngs: Vec<StdRng>,
    /// Two-state cache: `None` until `build_caches`, dropped by `invalidate`.
    caches: Option<Vec<FaceCaches>>,
}

impl OpenBoundaryInjector {
    /// Build an injector for `mesh.patches()[patch_index]`.
    pub fn new(
        mesh: &PolyMesh,
        patch_index: usize,
        particle_mass: f64,
        in_plane: InPlaneSpread,
        base_seed: u64,
    ) -> Self {
        assert!(
            particle_mass > 0.0 && particle_mass.is_finite(),
            "particle mass must be positive"
        );
        let patch = &mesh.patches()[patch_index];

        let mut faces = Vec::with_capacity(patch.len);
        let mut rngs = Vec::with_capacity(patch.len);
        for f in patch.faces() {
            let (fwd, rev) = face_frame(mesh.face_normal(f));
            let fc = mesh.face_centroid(f);

            let loop_ = mesh.face_points(f);
            let mut tris = Vec::with_capacity(loop_.len());
            let mut areas = Vec::with_capacity(loop_.len());
            for e in 0..loop_.len() {
                let a = mesh.point(loop_[e]);
                let b = mesh.point(loop_[(e + 1) % loop_.len()]);
                let area = 0.5 * (b - a).cross(fc - a).length();
                if area > f64::MIN_POSITIVE {
                    tris.push([a, b, fc]);
                    areas.push(area);
                }
            }
            let total: f64 = areas.iter().sum();
            assert!(total > 0.0, "degenerate face {f} in patch {:?}", patch.name);

            let mut cum_weights = Vec::with_capacity(tris.len() + 1);
            cum_weights.push(0.0);
            let mut running = 0.0;
            for &a in &areas {
                running += a / total;
                cum_weights.push(running);
            }
            // Pin the top end against accumulation drift.
            *cum_weights.last_mut().unwrap() = 1.0;

            faces.push(FaceGeometry {
                owner: mesh.face_owner(f),
                area: mesh.face_area(f),
                fwd,
                rev,
                tris,
                cum_weights,
            });
            rngs.push(StdRng::seed_from_u64(face_seed(base_seed, f)));
        }

        Self {
            patch_name: patch.name.clone(),
            patch_index,
            particle_mass,
            in_plane,
            faces,
            rngs,
            caches: None,
        }
    }

    /// Name of the patch this injector serves.
    pub fn patch_name(&self) -> &str {
        &self.patch_name
    }

    /// Index of the patch this injector serves.
    pub fn patch_index(&self) -> usize {
        self.patch_index
    }

    /// Number of faces in the patch.
    pub fn n_faces(&self) -> usize {
        self.faces.len()
    }

    /// True once `build_caches` has run since the last invalidation.
    pub fn is_ready(&self) -> bool {
        self.caches.is_some()
    }

    /// Drop the cached statistics (call after every flow-field update).
    pub fn invalidate(&mut self) {
        self.caches = None;
    }

    /// Build the per-face statistics from a flow snapshot.
    ///
    /// Fails with a configuration error — and leaves the injector not-ready —
    /// if the snapshot is missing, mis-sized, or carries unusable parameters;
    /// injection for the step is then skipped by the caller rather than
    /// proceeding with undefined state.
    pub fn build_caches(&mut self, flow: &FlowField) -> Result<(), BoundaryError> {
        self.caches = None;

        let pf = flow
            .patch_flow(self.patch_index)
            .ok_or_else(|| BoundaryError::MissingFlow {
                patch: self.patch_name.clone(),
            })?;
        if pf.velocity.len() != self.faces.len()
            || pf.stress.len() != self.faces.len()
            || pf.density.len() != self.faces.len()
        {
            return Err(BoundaryError::FaceCount {
                patch: self.patch_name.clone(),
                expected: self.faces.len(),
                found: pf.velocity.len(),
            });
        }

        let mut caches = Vec::with_capacity(self.faces.len());
        for (i, g) in self.faces.iter().enumerate() {
            let u_mean_global = pf.velocity[i];
            let u_local = g.fwd * u_mean_global;
            let r_local = pf.stress[i].congruence(&g.fwd);

            // Negative variances surface as non-finite spreads and are
            // rejected by the distribution constructor below.
            let sigma_n = checked_sqrt(r_local.xx);
            let sigma_t = match self.in_plane {
                InPlaneSpread::FromStress => checked_sqrt(0.5 * (r_local.yy + r_local.zz)),
                InPlaneSpread::Fixed(s) => s,
            };
            if !sigma_t.is_finite() || sigma_t < 0.0 {
                return Err(BoundaryError::Distribution {
                    patch: self.patch_name.clone(),
                    face: i,
                    source: DistributionError::InvalidSpread { spread: sigma_t },
                });
            }

            let rho = pf.density[i];
            if !rho.is_finite() || rho <= 0.0 {
                return Err(BoundaryError::InvalidDensity {
                    patch: self.patch_name.clone(),
                    face: i,
                    rho,
                });
            }

            let z_mean = *flow.cell_scalar.get(g.owner).ok_or_else(|| {
                BoundaryError::MissingCellData {
                    patch: self.patch_name.clone(),
                    cell: g.owner,
                }
            })?;

            let inlet = InletRandom::new(u_local.x, sigma_n).map_err(|source| {
                BoundaryError::Distribution {
                    patch: self.patch_name.clone(),
                    face: i,
                    source,
                }
            })?;

            caches.push(FaceCaches {
                u_local,
                u_mean_global,
                sigma_t,
                rho,
                z_mean,
                inlet,
            });
        }

        debug!(
            patch = %self.patch_name,
            faces = self.faces.len(),
            "boundary statistics built"
        );
        self.caches = Some(caches);
        Ok(())
    }

    /// Uniform-by-area random point on face `local_face`.
    ///
    /// Locates the covering fan triangle through the cumulative weight
    /// vector, then places a uniform point inside it from two further draws,
    /// reflected across the diagonal when their sum exceeds 1.
    pub fn random_point(&self, local_face: usize, rng: &mut StdRng) -> DVec3 {
        point_on_face(&self.faces[local_face], rng)
    }

    /// Random inflow velocity on face `local_face`, global coordinates.
    pub fn random_velocity(
        &self,
        local_face: usize,
        rng: &mut StdRng,
    ) -> Result<DVec3, BoundaryError> {
        let caches = self.caches.as_ref().ok_or_else(|| BoundaryError::NotReady {
            patch: self.patch_name.clone(),
        })?;
        Ok(velocity_on_face(
            &self.faces[local_face],
            &caches[local_face],
            rng,
        ))
    }

    /// Per-step boundary correction.
    ///
    /// `BeforeMove` is a no-op by contract; `AfterMove` injects the expected
    /// inflow on every face and merges the per-face buffers into `cloud`.
    /// Callers must invoke each phase exactly once per step per boundary.
    pub fn correct(
        &mut self,
        phase: Phase,
        dt: f64,
        cloud: &mut ParticleCloud,
    ) -> Result<InjectionStats, BoundaryError> {
        if phase == Phase::BeforeMove {
            return Ok(InjectionStats::default());
        }

        let caches = self.caches.as_ref().ok_or_else(|| BoundaryError::NotReady {
            patch: self.patch_name.clone(),
        })?;

        let particle_mass = self.particle_mass;
        // Faces are independent: each task reads its own frozen geometry and
        // caches and owns its own generator; buffers merge after the barrier.
        let buffers: Vec<(Vec<Particle>, f64)> = self
            .faces
            .par_iter()
            .zip(caches.par_iter())
            .zip(self.rngs.par_iter_mut())
            .map(|((g, cache), rng)| inject_face(g, cache, rng, dt, particle_mass))
            .collect();

        let mut stats = InjectionStats::default();
        for (buffer, expected) in buffers {
            stats.injected += buffer.len();
            stats.expected += expected;
            cloud.extend(buffer);
        }

        debug!(
            patch = %self.patch_name,
            injected = stats.injected,
            expected = stats.expected,
            "open-boundary injection"
        );
        Ok(stats)
    }
}

/// Deterministic per-face RNG seed (splitmix-style multiplicative mixing).
fn face_seed(base_seed: u64, global_face: usize) -> u64 {
    base_seed ^ (global_face as u64).wrapping_mul(0x9e3779b97f4a7c15)
}

/// sqrt that propagates negative input as NaN instead of a silent clamp, so
/// invalid variances are caught by parameter validation downstream.
fn checked_sqrt(variance: f64) -> f64 {
    if variance >= 0.0 {
        variance.sqrt()
    } else {
        f64::NAN
    }
}

fn point_on_face(g: &FaceGeometry, rng: &mut StdRng) -> DVec3 {
    let u: f64 = rng.random();
    let tri = select_triangle(&g.cum_weights, u);
    let [a, b, c] = g.tris[tri];
    let mut r1: f64 = rng.random();
    let mut r2: f64 = rng.random();
    if r1 + r2 > 1.0 {
        r1 = 1.0 - r1;
        r2 = 1.0 - r2;
    }
    a + r1 * (b - a) + r2 * (c - a)
}

fn velocity_on_face(g: &FaceGeometry, cache: &FaceCaches, rng: &mut StdRng) -> DVec3 {
    // The wall-normal draw carries its mean already; in-plane components are
    // fluctuations around the in-plane mean (isotropic approximation).
    let vn = cache.inlet.sample(rng.random());
    let vt1 = cache.u_local.y + cache.sigma_t * standard_normal(rng);
    let vt2 = cache.u_local.z + cache.sigma_t * standard_normal(rng);
    g.rev * DVec3::new(vn, vt1, vt2)
}

/// Inject one face's expected inflow; returns the local buffer.
fn inject_face(
    g: &FaceGeometry,
    cache: &FaceCaches,
    rng: &mut StdRng,
    dt: f64,
    particle_mass: f64,
) -> (Vec<Particle>, f64) {
    // Faces with mean outflow inject nothing; absorption is the cloud's job.
    let u_n = cache.u_local.x.max(0.0);
    let expected = cache.rho * u_n * g.area * dt / particle_mass;
    if expected <= 0.0 {
        return (Vec::new(), 0.0);
    }

    let mut count = expected.floor() as usize;
    let fraction = expected - count as f64;
    if rng.random::<f64>() < fraction {
        count += 1;
    }

    let mut buffer = Vec::with_capacity(count);
    for _ in 0..count {
        let position = point_on_face(g, rng);
        let velocity = velocity_on_face(g, cache, rng);
        // The particle entered at a uniform time during the step; the part
        // of u*dt it has already travelled is handed to the tracker as shift.
        let eta: f64 = rng.random();
        buffer.push(Particle {
            position,
            cell: g.owner,
            mass: particle_mass,
            u_pdf: cache.u_mean_global,
            u_particle: velocity,
            u_filtered: cache.u_mean_global,
            z: cache.z_mean,
            rho: cache.rho,
            dt,
            shift: velocity * (dt * eta),
            ghost: 0,
        });
    }
    (buffer, expected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::PolyMesh;

    fn cube_mesh() -> PolyMesh {
        PolyMesh::hex_block(DVec3::ZERO, DVec3::ONE, 1, 1, 1)
    }

    fn inlet_on(mesh: &PolyMesh, patch: &str) -> OpenBoundaryInjector {
        let idx = mesh.patch_index(patch).unwrap();
        OpenBoundaryInjector::new(mesh, idx, 1.0e-3, InPlaneSpread::FromStress, 7)
    }

    #[test]
    fn triangle_selection_intervals() {
        let cum = [0.0, 0.3, 0.7, 1.0];
        assert_eq!(select_triangle(&cum, 0.0), 0);
        assert_eq!(select_triangle(&cum, 0.29), 0);
        assert_eq!(select_triangle(&cum, 0.3), 1);
        assert_eq!(select_triangle(&cum, 0.5), 1);
        assert_eq!(select_triangle(&cum, 0.7), 2);
        assert_eq!(select_triangle(&cum, 0.999), 2);
    }

    #[test]
    fn cumulative_weights_are_normalized() {
        let mesh = cube_mesh();
        let injector = inlet_on(&mesh, "x_min");
        let g = &injector.faces[0];
        assert_eq!(g.cum_weights.len(), g.tris.len() + 1);
        assert_eq!(g.cum_weights[0], 0.0);
        assert_eq!(*g.cum_weights.last().unwrap(), 1.0);
        for w in g.cum_weights.windows(2) {
            assert!(w[1] >= w[0], "cumulative weights must be non-decreasing");
        }
        // A square face fans into four equal triangles.
        assert!((g.cum_weights[1] - 0.25).abs() < 1.0e-12);
        assert!((g.cum_weights[2] - 0.50).abs() < 1.0e-12);
    }

    #[test]
    fn random_points_stay_on_the_face() {
        let mesh = cube_mesh();
        let injector = inlet_on(&mesh, "x_min");
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..500 {
            let p = injector.random_point(0, &mut rng);
            assert!(p.x.abs() < 1.0e-12, "point must lie in the x=0 plane");
            assert!((0.0..=1.0).contains(&p.y));
            assert!((0.0..=1.0).contains(&p.z));
        }
    }

    #[test]
    fn before_move_is_a_no_op() {
        let mesh = cube_mesh();
        let mut injector = inlet_on(&mesh, "x_min");
        let mut cloud = ParticleCloud::new();
        // No caches built: BeforeMove must still succeed and do nothing.
        let stats = injector.correct(Phase::BeforeMove, 0.01, &mut cloud).unwrap();
        assert_eq!(stats.injected, 0);
        assert!(cloud.is_empty());
    }

    #[test]
    fn sampling_before_build_is_not_ready() {
        let mesh = cube_mesh();
        let mut injector = inlet_on(&mesh, "x_min");
        let mut rng = StdRng::seed_from_u64(1);
        assert!(matches!(
            injector.random_velocity(0, &mut rng),
            Err(BoundaryError::NotReady { .. })
        ));
        let mut cloud = ParticleCloud::new();
        assert!(matches!(
            injector.correct(Phase::AfterMove, 0.01, &mut cloud),
            Err(BoundaryError::NotReady { .. })
        ));
    }

    #[test]
    fn invalidate_drops_the_caches() {
        let mesh = cube_mesh();
        let mut injector = inlet_on(&mesh, "x_min");
        let flow = FlowField::uniform(&mesh, DVec3::new(2.0, 0.0, 0.0), 1.0, 10.0, 0.3, 0.1);
        injector.build_caches(&flow).unwrap();
        assert!(injector.is_ready());
        injector.invalidate();
        assert!(!injector.is_ready());
    }

    #[test]
    fn missing_patch_flow_is_a_configuration_error() {
        let mesh = cube_mesh();
        let mut injector = inlet_on(&mesh, "x_min");
        let mut flow = FlowField::uniform(&mesh, DVec3::X, 1.0, 10.0, 0.3, 0.1);
        flow.patch[injector.patch_index()] = None;
        assert!(matches!(
            injector.build_caches(&flow),
            Err(BoundaryError::MissingFlow { .. })
        ));
        assert!(!injector.is_ready());
    }

    #[test]
    fn bad_density_is_rejected() {
        let mesh = cube_mesh();
        let mut injector = inlet_on(&mesh, "x_min");
        let mut flow = FlowField::uniform(&mesh, DVec3::X, 1.0, 10.0, 0.3, 0.1);
        flow.patch[injector.patch_index()].as_mut().unwrap().density[0] = -1.0;
        assert!(matches!(
            injector.build_caches(&flow),
            Err(BoundaryError::InvalidDensity { .. })
        ));
    }

    #[test]
    fn same_seed_reproduces_the_stream() {
        let mesh = cube_mesh();
        let flow = FlowField::uniform(&mesh, DVec3::new(2.0, 0.0, 0.0), 1.0, 10.0, 0.3, 0.1);

        let run = || {
            let mut injector = inlet_on(&mesh, "x_min");
            injector.build_caches(&flow).unwrap();
            let mut cloud = ParticleCloud::new();
            injector.correct(Phase::AfterMove, 0.01, &mut cloud).unwrap();
            cloud
        };
        let a = run();
        let b = run();
        assert_eq!(a.particles(), b.particles());
        assert!(!a.is_empty());
    }
}
