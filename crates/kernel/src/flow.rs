//! Flow-field statistics consumed from the mesh-based solver.
//!
//! The engine never computes these fields; it receives them through this
//! narrow data interface after every flow update and must be told (via cache
//! invalidation) when they change. Cell arrays are indexed by global cell id,
//! patch arrays by face-within-patch.

use glam::DVec3;
use thiserror::Error;

use crate::math::SymTensor3;
use crate::mesh::PolyMesh;

/// Per-face boundary statistics of one patch.
#[derive(Debug, Clone)]
pub struct PatchFlow {
    /// Mean velocity per patch face, global coordinates.
    pub velocity: Vec<DVec3>,
    /// Reynolds stress per patch face, global coordinates.
    pub stress: Vec<SymTensor3>,
    /// Mean density per patch face.
    pub density: Vec<f64>,
}

/// Mean-field snapshot from the flow solver.
#[derive(Debug, Clone, Default)]
pub struct FlowField {
    /// Mean velocity per cell.
    pub cell_velocity: Vec<DVec3>,
    /// Mean density per cell.
    pub cell_density: Vec<f64>,
    /// Turbulent mixing frequency (omega) per cell.
    pub cell_mix_freq: Vec<f64>,
    /// Mean carried scalar per cell.
    pub cell_scalar: Vec<f64>,
    /// Boundary statistics per patch (indexed like `mesh.patches()`),
    /// `None` where the solver provided nothing for that patch.
    pub patch: Vec<Option<PatchFlow>>,
}

/// Shape mismatches between a flow snapshot and the mesh it claims to cover.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FlowFieldError {
    /// A cell-indexed array has the wrong length.
    #[error("flow field: {field} has {found} entries, mesh has {expected} cells")]
    CellCount {
        /// Name of the offending array.
        field: &'static str,
        /// Expected entry count.
        expected: usize,
        /// Actual entry count.
        found: usize,
    },
    /// A patch array has the wrong length.
    #[error("flow field: patch {patch:?} {field} has {found} entries, patch has {expected} faces")]
    PatchFaceCount {
        /// Patch name.
        patch: String,
        /// Name of the offending array.
        field: &'static str,
        /// Expected entry count.
        expected: usize,
        /// Actual entry count.
        found: usize,
    },
}

impl FlowField {
    /// Check every array length against the mesh.
    pub fn validate(&self, mesh: &PolyMesh) -> Result<(), FlowFieldError> {
        let n = mesh.n_cells();
        let cell_checks: [(&'static str, usize); 4] = [
            ("cell_velocity", self.cell_velocity.len()),
            ("cell_density", self.cell_density.len()),
            ("cell_mix_freq", self.cell_mix_freq.len()),
            ("cell_scalar", self.cell_scalar.len()),
        ];
        for (field, found) in cell_checks {
            if found != n {
                return Err(FlowFieldError::CellCount {
                    field,
                    expected: n,
                    found,
                });
            }
        }

        for (i, patch_flow) in self.patch.iter().enumerate() {
            let Some(pf) = patch_flow else { continue };
            let patch = &mesh.patches()[i];
            let checks: [(&'static str, usize); 3] = [
                ("velocity", pf.velocity.len()),
                ("stress", pf.stress.len()),
                ("density", pf.density.len()),
            ];
            for (field, found) in checks {
                if found != patch.len {
                    return Err(FlowFieldError::PatchFaceCount {
                        patch: patch.name.clone(),
                        field,
                        expected: patch.len,
                        found,
                    });
                }
            }
        }
        Ok(())
    }

    /// Boundary statistics of patch `i`, if the solver provided them.
    pub fn patch_flow(&self, i: usize) -> Option<&PatchFlow> {
        self.patch.get(i).and_then(|p| p.as_ref())
    }

    /// Spatially uniform snapshot — the standard test fixture.
    ///
    /// All cells carry `(velocity, density, mix_freq, scalar)`; every patch
    /// gets the same face velocity, isotropic stress `sigma^2 * I`, and
    /// density.
    pub fn uniform(
        mesh: &PolyMesh,
        velocity: DVec3,
        density: f64,
        mix_freq: f64,
        scalar: f64,
        sigma: f64,
    ) -> Self {
        let n = mesh.n_cells();
        let patch = mesh
            .patches()
            .iter()
            .map(|p| {
                Some(PatchFlow {
                    velocity: vec![velocity; p.len],
                    stress: vec![SymTensor3::diagonal(sigma * sigma); p.len],
                    density: vec![density; p.len],
                })
            })
            .collect();
        Self {
            cell_velocity: vec![velocity; n],
            cell_density: vec![density; n],
            cell_mix_freq: vec![mix_freq; n],
            cell_scalar: vec![scalar; n],
            patch,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_snapshot_validates() {
        let mesh = PolyMesh::hex_block(DVec3::ZERO, DVec3::ONE, 2, 2, 2);
        let flow = FlowField::uniform(&mesh, DVec3::X, 1.0, 10.0, 0.5, 0.1);
        assert!(flow.validate(&mesh).is_ok());
    }

    #[test]
    fn wrong_cell_count_is_reported() {
        let mesh = PolyMesh::hex_block(DVec3::ZERO, DVec3::ONE, 2, 2, 2);
        let mut flow = FlowField::uniform(&mesh, DVec3::X, 1.0, 10.0, 0.5, 0.1);
        flow.cell_density.pop();
        assert!(matches!(
            flow.validate(&mesh),
            Err(FlowFieldError::CellCount { field: "cell_density", .. })
        ));
    }

    #[test]
    fn wrong_patch_count_is_reported() {
        let mesh = PolyMesh::hex_block(DVec3::ZERO, DVec3::ONE, 2, 2, 2);
        let mut flow = FlowField::uniform(&mesh, DVec3::X, 1.0, 10.0, 0.5, 0.1);
        flow.patch[0].as_mut().unwrap().velocity.pop();
        assert!(matches!(
            flow.validate(&mesh),
            Err(FlowFieldError::PatchFaceCount { .. })
        ));
    }
}
