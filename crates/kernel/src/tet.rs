//! Tetrahedral decomposition of a polyhedral mesh and point location.
//!
//! Every cell is split into tetrahedra of the form {face point A, face point
//! B, face centroid, cell centroid}: each face is fan-triangulated around its
//! centroid, and each fan triangle extruded to the cell centroid fills one
//! wedge of the cell. The wedges of one cell tile its volume exactly.
//!
//! Point location walks a three-stage ladder: the hint cell's tetrahedra,
//! then the hint's neighbour cells, then a global scan. During advection the
//! hint almost always hits, so the expected cost is O(tets per cell).

use glam::DVec3;
use tracing::debug;

use crate::mesh::PolyMesh;

/// Relative tolerance of the signed-volume inside test.
///
/// Scaled by the tetrahedron's own volume so that points numerically on a
/// shared face are accepted by both neighbouring tetrahedra instead of
/// rejected by both.
const INSIDE_REL_TOL: f64 = 1.0e-8;

/// Signed volume of tetrahedron (a, b, c, d).
///
/// Positive when `d` lies on the side the right-hand-rule normal of
/// (a, b, c) points to.
#[inline]
fn signed_volume(a: DVec3, b: DVec3, c: DVec3, d: DVec3) -> f64 {
    (b - a).cross(c - a).dot(d - a) / 6.0
}

/// Fixed tetrahedral decomposition of a mesh.
///
/// Tetrahedra are stored flat, ordered by (cell, face-within-cell,
/// edge-within-face). The ordering is stable across rebuilds of the same
/// mesh, and each cell's tetrahedra form one contiguous index range —
/// downstream code may cache indices between mesh-update events. The
/// decomposition itself is immutable once built; call [`rebuild`] after mesh
/// motion or topology change.
///
/// [`rebuild`]: TetDecomposition::rebuild
pub struct TetDecomposition {
    /// Cached vertex positions {point A, point B, face centroid, cell centroid}.
    verts: Vec<[DVec3; 4]>,
    /// Owning cell per tetrahedron.
    tet_cell: Vec<usize>,
    /// Face the tetrahedron stands on.
    tet_face: Vec<usize>,
    /// The two face points spanning the tetrahedron's base edge.
    tet_points: Vec<(usize, usize)>,
    /// Signed volume per tetrahedron (sign encodes vertex orientation).
    signed_vol: Vec<f64>,
    /// Per-cell offsets into the flat tet arrays (length `n_cells + 1`).
    cell_offsets: Vec<usize>,
    /// Snapshot of cell adjacency for the neighbour fallback.
    cell_cell_offsets: Vec<usize>,
    cell_cell_indices: Vec<usize>,
}

impl TetDecomposition {
    /// Decompose `mesh` into face-point-pair/face-centroid/cell-centroid
    /// tetrahedra.
    pub fn build(mesh: &PolyMesh) -> Self {
        let n_cells = mesh.n_cells();
        let mut verts = Vec::new();
        let mut tet_cell = Vec::new();
        let mut tet_face = Vec::new();
        let mut tet_points = Vec::new();
        let mut signed_vol = Vec::new();
        let mut cell_offsets = Vec::with_capacity(n_cells + 1);
        cell_offsets.push(0);

        for c in 0..n_cells {
            let cc = mesh.cell_centroid(c);
            for &f in mesh.cell_faces(c) {
                let fc = mesh.face_centroid(f);
                let loop_ = mesh.face_points(f);
                for e in 0..loop_.len() {
                    let pa = loop_[e];
                    let pb = loop_[(e + 1) % loop_.len()];
                    let a = mesh.point(pa);
                    let b = mesh.point(pb);
                    verts.push([a, b, fc, cc]);
                    tet_cell.push(c);
                    tet_face.push(f);
                    tet_points.push((pa, pb));
                    signed_vol.push(signed_volume(a, b, fc, cc));
                }
            }
            cell_offsets.push(verts.len());
        }

        let mut cell_cell_offsets = Vec::with_capacity(n_cells + 1);
        let mut cell_cell_indices = Vec::new();
        cell_cell_offsets.push(0);
        for c in 0..n_cells {
            cell_cell_indices.extend_from_slice(mesh.cell_cells(c));
            cell_cell_offsets.push(cell_cell_indices.len());
        }

        debug!(
            cells = n_cells,
            tetrahedra = verts.len(),
            "tetrahedral decomposition built"
        );

        Self {
            verts,
            tet_cell,
            tet_face,
            tet_points,
            signed_vol,
            cell_offsets,
            cell_cell_offsets,
            cell_cell_indices,
        }
    }

    /// Rebuild in place after mesh motion or topology change.
    pub fn rebuild(&mut self, mesh: &PolyMesh) {
        *self = Self::build(mesh);
    }

    /// Total number of tetrahedra.
    pub fn len(&self) -> usize {
        self.verts.len()
    }

    /// True if the decomposition is empty.
    pub fn is_empty(&self) -> bool {
        self.verts.is_empty()
    }

    /// Number of cells the decomposition was built from.
    pub fn n_cells(&self) -> usize {
        self.cell_offsets.len() - 1
    }

    /// Contiguous tetrahedron index range of cell `c`.
    pub fn cell_tets(&self, c: usize) -> std::ops::Range<usize> {
        self.cell_offsets[c]..self.cell_offsets[c + 1]
    }

    /// Owning cell of tetrahedron `t`.
    pub fn tet_cell(&self, t: usize) -> usize {
        self.tet_cell[t]
    }

    /// Face tetrahedron `t` stands on.
    pub fn tet_face(&self, t: usize) -> usize {
        self.tet_face[t]
    }

    /// The two face points of tetrahedron `t`, in face perimeter order.
    pub fn tet_points(&self, t: usize) -> (usize, usize) {
        self.tet_points[t]
    }

    /// Unsigned volume of tetrahedron `t`.
    pub fn volume(&self, t: usize) -> f64 {
        self.signed_vol[t].abs()
    }

    /// Vertex positions of tetrahedron `t`.
    pub fn vertices(&self, t: usize) -> [DVec3; 4] {
        self.verts[t]
    }

    /// Point-in-tetrahedron test with a volume-scaled tolerance band.
    ///
    /// `p` is inside when the four sub-tetrahedra obtained by replacing each
    /// vertex with `p` all carry the same orientation as the tetrahedron
    /// itself, to within `INSIDE_REL_TOL` of its volume. Degenerate
    /// tetrahedra (collinear base edges produce zero volume) never contain
    /// anything.
    pub fn contains(&self, t: usize, p: DVec3) -> bool {
        let v = self.signed_vol[t];
        if v.abs() <= f64::MIN_POSITIVE {
            return false;
        }
        let [a, b, c, d] = self.verts[t];
        let sign = v.signum();
        let band = -INSIDE_REL_TOL * v.abs();

        sign * signed_volume(p, b, c, d) >= band
            && sign * signed_volume(a, p, c, d) >= band
            && sign * signed_volume(a, b, p, d) >= band
            && sign * signed_volume(a, b, c, p) >= band
    }

    /// Find the tetrahedron containing `p`.
    ///
    /// Search order: the hint cell's tetrahedra, the hint's face-neighbour
    /// cells, then every tetrahedron. `None` means the point is genuinely
    /// outside the decomposed domain (within the tolerance band) — callers
    /// must treat that as a recoverable outcome, e.g. a particle that left
    /// through an outlet, not as a fatal error.
    pub fn find(&self, p: DVec3, cell_hint: Option<usize>) -> Option<usize> {
        if let Some(hint) = cell_hint {
            if hint < self.n_cells() {
                if let Some(t) = self.scan_cell(hint, p) {
                    return Some(t);
                }
                let neighbours =
                    &self.cell_cell_indices[self.cell_cell_offsets[hint]..self.cell_cell_offsets[hint + 1]];
                for &n in neighbours {
                    if let Some(t) = self.scan_cell(n, p) {
                        return Some(t);
                    }
                }
            }
        }

        // Correctness fallback: exhaustive scan over all tetrahedra.
        (0..self.len()).find(|&t| self.contains(t, p))
    }

    fn scan_cell(&self, c: usize, p: DVec3) -> Option<usize> {
        self.cell_tets(c).find(|&t| self.contains(t, p))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_cube() -> PolyMesh {
        PolyMesh::hex_block(DVec3::ZERO, DVec3::ONE, 1, 1, 1)
    }

    #[test]
    fn cube_tet_count_and_ordering() {
        let mesh = unit_cube();
        let dec = TetDecomposition::build(&mesh);
        // 6 faces x 4 perimeter edges per face.
        assert_eq!(dec.len(), 24);
        assert_eq!(dec.cell_tets(0), 0..24);
        for t in 0..dec.len() {
            assert_eq!(dec.tet_cell(t), 0);
        }
    }

    #[test]
    fn cube_tets_tile_volume() {
        let mesh = unit_cube();
        let dec = TetDecomposition::build(&mesh);
        let total: f64 = (0..dec.len()).map(|t| dec.volume(t)).sum();
        assert!(
            (total - 1.0).abs() < 1.0e-12,
            "tet volumes should tile the cube, sum = {total}"
        );
    }

    #[test]
    fn centroid_is_found_in_owning_cell() {
        let mesh = PolyMesh::hex_block(DVec3::ZERO, DVec3::ONE, 2, 2, 2);
        let dec = TetDecomposition::build(&mesh);
        for c in 0..mesh.n_cells() {
            let t = dec
                .find(mesh.cell_centroid(c), Some(c))
                .expect("cell centroid must be located");
            assert_eq!(dec.tet_cell(t), c);
        }
    }

    #[test]
    fn outside_point_is_not_found() {
        let mesh = unit_cube();
        let dec = TetDecomposition::build(&mesh);
        assert_eq!(dec.find(DVec3::new(10.0, 10.0, 10.0), Some(0)), None);
        assert_eq!(dec.find(DVec3::new(-0.5, 0.5, 0.5), None), None);
    }

    #[test]
    fn on_face_point_is_accepted() {
        let mesh = PolyMesh::hex_block(DVec3::ZERO, DVec3::ONE, 2, 1, 1);
        let dec = TetDecomposition::build(&mesh);
        // Exactly on the internal face between the two cells.
        let p = DVec3::new(0.5, 0.25, 0.75);
        assert!(dec.find(p, Some(0)).is_some());
        assert!(dec.find(p, Some(1)).is_some());
    }

    #[test]
    fn stale_hint_recovers_through_neighbours() {
        let mesh = PolyMesh::hex_block(DVec3::ZERO, DVec3::ONE, 3, 1, 1);
        let dec = TetDecomposition::build(&mesh);
        // Point in cell 1, hint says cell 0 (its neighbour).
        let p = mesh.cell_centroid(1);
        let t = dec.find(p, Some(0)).expect("neighbour fallback must find it");
        assert_eq!(dec.tet_cell(t), 1);

        // Point in cell 2, hint says cell 0: neighbour walk misses, global
        // scan must still resolve it.
        let p = mesh.cell_centroid(2);
        let t = dec.find(p, Some(0)).expect("global fallback must find it");
        assert_eq!(dec.tet_cell(t), 2);
    }

    #[test]
    fn rebuild_matches_fresh_build() {
        let mesh = unit_cube();
        let mut dec = TetDecomposition::build(&mesh);
        let before: Vec<(usize, usize)> = (0..dec.len()).map(|t| dec.tet_points(t)).collect();
        dec.rebuild(&mesh);
        let after: Vec<(usize, usize)> = (0..dec.len()).map(|t| dec.tet_points(t)).collect();
        assert_eq!(before, after, "ordering must be stable across rebuilds");
    }
}
