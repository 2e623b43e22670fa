//! Polyhedral mesh data consumed by the particle engine.
//!
//! The engine does not own mesh generation or motion; it consumes a narrow
//! snapshot of what the surrounding flow solver provides: point coordinates,
//! faces as ordered point loops, owner/neighbour connectivity, boundary
//! patches, and derived centroids/areas/volumes. Offset + flat-index (CSR)
//! arrays are used throughout rather than nested `Vec`s so the data layout
//! stays contiguous and cheap to iterate.

use glam::DVec3;

/// Named contiguous range of boundary faces.
#[derive(Debug, Clone)]
pub struct Patch {
    /// Patch name used by boundary configuration to select faces.
    pub name: String,
    /// First global face index of the patch.
    pub start: usize,
    /// Number of faces in the patch.
    pub len: usize,
}

impl Patch {
    /// Global face indices covered by this patch.
    pub fn faces(&self) -> std::ops::Range<usize> {
        self.start..self.start + self.len
    }
}

/// Immutable polyhedral mesh snapshot.
///
/// Faces are ordered point loops whose right-hand-rule normal points out of
/// the owner cell. Internal faces come first in the global face list,
/// boundary faces are grouped per patch at the end (so each patch is a
/// contiguous face range). Rebuild the dependent structures (tetrahedral
/// decomposition, boundary frames) whenever the solver hands over a new
/// snapshot after mesh motion.
pub struct PolyMesh {
    points: Vec<DVec3>,
    face_point_offsets: Vec<usize>,
    face_point_indices: Vec<usize>,
    face_owner: Vec<usize>,
    face_neighbour: Vec<Option<usize>>,
    cell_face_offsets: Vec<usize>,
    cell_face_indices: Vec<usize>,
    cell_cell_offsets: Vec<usize>,
    cell_cell_indices: Vec<usize>,
    patches: Vec<Patch>,

    face_centroid: Vec<DVec3>,
    face_area_vec: Vec<DVec3>,
    cell_centroid: Vec<DVec3>,
    cell_volume: Vec<f64>,
}

impl PolyMesh {
    /// Assemble a mesh from its primitive description.
    ///
    /// `faces` holds each face's ordered point loop, `owner`/`neighbour` the
    /// cells on either side (`None` for boundary faces). Patch ranges must
    /// cover only boundary faces. Derived geometry (centroids, area vectors,
    /// volumes) is computed here, once.
    pub fn new(
        points: Vec<DVec3>,
        faces: Vec<Vec<usize>>,
        owner: Vec<usize>,
        neighbour: Vec<Option<usize>>,
        patches: Vec<Patch>,
    ) -> Self {
        let n_faces = faces.len();
        assert_eq!(owner.len(), n_faces, "one owner per face");
        assert_eq!(neighbour.len(), n_faces, "one neighbour entry per face");

        let n_cells = owner
            .iter()
            .copied()
            .chain(neighbour.iter().filter_map(|n| *n))
            .max()
            .map_or(0, |c| c + 1);

        // Flatten face point loops into CSR form.
        let mut face_point_offsets = Vec::with_capacity(n_faces + 1);
        let mut face_point_indices = Vec::new();
        face_point_offsets.push(0);
        for loop_ in &faces {
            assert!(loop_.len() >= 3, "face needs at least 3 points");
            face_point_indices.extend_from_slice(loop_);
            face_point_offsets.push(face_point_indices.len());
        }

        for patch in &patches {
            for f in patch.faces() {
                assert!(f < n_faces, "patch {:?} face out of range", patch.name);
                assert!(
                    neighbour[f].is_none(),
                    "patch {:?} covers internal face {f}",
                    patch.name
                );
            }
        }

        // Face geometry: fan-triangulate around the point average, then
        // area-weight the triangle centroids.
        let mut face_centroid = vec![DVec3::ZERO; n_faces];
        let mut face_area_vec = vec![DVec3::ZERO; n_faces];
        for f in 0..n_faces {
            let loop_ = &face_point_indices[face_point_offsets[f]..face_point_offsets[f + 1]];
            let est: DVec3 =
                loop_.iter().map(|&p| points[p]).sum::<DVec3>() / loop_.len() as f64;

            let mut area_sum = 0.0;
            let mut weighted_ctr = DVec3::ZERO;
            let mut area_vec = DVec3::ZERO;
            for e in 0..loop_.len() {
                let a = points[loop_[e]];
                let b = points[loop_[(e + 1) % loop_.len()]];
                let tri_vec = 0.5 * (b - a).cross(est - a);
                let tri_area = tri_vec.length();
                area_vec += tri_vec;
                area_sum += tri_area;
                weighted_ctr += tri_area * (a + b + est) / 3.0;
            }
            face_area_vec[f] = area_vec;
            face_centroid[f] = if area_sum > f64::MIN_POSITIVE {
                weighted_ctr / area_sum
            } else {
                est
            };
        }

        // Cell -> face incidence (CSR).
        let mut cell_face_counts = vec![0usize; n_cells];
        for f in 0..n_faces {
            cell_face_counts[owner[f]] += 1;
            if let Some(n) = neighbour[f] {
                cell_face_counts[n] += 1;
            }
        }
        let mut cell_face_offsets = vec![0usize; n_cells + 1];
        for c in 0..n_cells {
            cell_face_offsets[c + 1] = cell_face_offsets[c] + cell_face_counts[c];
        }
        let mut cell_face_indices = vec![0usize; cell_face_offsets[n_cells]];
        let mut write_heads = cell_face_offsets.clone();
        for f in 0..n_faces {
            cell_face_indices[write_heads[owner[f]]] = f;
            write_heads[owner[f]] += 1;
            if let Some(n) = neighbour[f] {
                cell_face_indices[write_heads[n]] = f;
                write_heads[n] += 1;
            }
        }

        // Cell -> cell adjacency through internal faces (CSR).
        let mut cell_cell_counts = vec![0usize; n_cells];
        for f in 0..n_faces {
            if let Some(n) = neighbour[f] {
                cell_cell_counts[owner[f]] += 1;
                cell_cell_counts[n] += 1;
            }
        }
        let mut cell_cell_offsets = vec![0usize; n_cells + 1];
        for c in 0..n_cells {
            cell_cell_offsets[c + 1] = cell_cell_offsets[c] + cell_cell_counts[c];
        }
        let mut cell_cell_indices = vec![0usize; cell_cell_offsets[n_cells]];
        let mut write_heads = cell_cell_offsets.clone();
        for f in 0..n_faces {
            if let Some(n) = neighbour[f] {
                cell_cell_indices[write_heads[owner[f]]] = n;
                write_heads[owner[f]] += 1;
                cell_cell_indices[write_heads[n]] = owner[f];
                write_heads[n] += 1;
            }
        }

        // Cell geometry: pyramid decomposition toward the face-centroid
        // average. Pyramid volume is (Sf . (cf - est)) / 3 with Sf oriented
        // out of the cell; the centroid of each pyramid sits 3/4 of the way
        // toward the face centroid.
        let mut cell_centroid = vec![DVec3::ZERO; n_cells];
        let mut cell_volume = vec![0.0f64; n_cells];
        for c in 0..n_cells {
            let c_faces = &cell_face_indices[cell_face_offsets[c]..cell_face_offsets[c + 1]];
            let est: DVec3 =
                c_faces.iter().map(|&f| face_centroid[f]).sum::<DVec3>() / c_faces.len() as f64;

            let mut vol = 0.0;
            let mut weighted_ctr = DVec3::ZERO;
            for &f in c_faces {
                let sign = if owner[f] == c { 1.0 } else { -1.0 };
                let sf = sign * face_area_vec[f];
                let pyr_vol = sf.dot(face_centroid[f] - est) / 3.0;
                let pyr_ctr = 0.75 * face_centroid[f] + 0.25 * est;
                vol += pyr_vol;
                weighted_ctr += pyr_vol * pyr_ctr;
            }
            cell_volume[c] = vol;
            cell_centroid[c] = if vol.abs() > f64::MIN_POSITIVE {
                weighted_ctr / vol
            } else {
                est
            };
        }

        Self {
            points,
            face_point_offsets,
            face_point_indices,
            face_owner: owner,
            face_neighbour: neighbour,
            cell_face_offsets,
            cell_face_indices,
            cell_cell_offsets,
            cell_cell_indices,
            patches,
            face_centroid,
            face_area_vec,
            cell_centroid,
            cell_volume,
        }
    }

    /// Number of cells.
    pub fn n_cells(&self) -> usize {
        self.cell_face_offsets.len() - 1
    }

    /// Number of faces (internal + boundary).
    pub fn n_faces(&self) -> usize {
        self.face_owner.len()
    }

    /// Number of points.
    pub fn n_points(&self) -> usize {
        self.points.len()
    }

    /// Coordinates of point `p`.
    pub fn point(&self, p: usize) -> DVec3 {
        self.points[p]
    }

    /// Ordered point loop of face `f`.
    pub fn face_points(&self, f: usize) -> &[usize] {
        &self.face_point_indices[self.face_point_offsets[f]..self.face_point_offsets[f + 1]]
    }

    /// Owner cell of face `f`.
    pub fn face_owner(&self, f: usize) -> usize {
        self.face_owner[f]
    }

    /// Neighbour cell of face `f`, `None` on the boundary.
    pub fn face_neighbour(&self, f: usize) -> Option<usize> {
        self.face_neighbour[f]
    }

    /// Area-weighted centroid of face `f`.
    pub fn face_centroid(&self, f: usize) -> DVec3 {
        self.face_centroid[f]
    }

    /// Face area vector (magnitude = area, direction = out of owner).
    pub fn face_area_vec(&self, f: usize) -> DVec3 {
        self.face_area_vec[f]
    }

    /// Scalar face area.
    pub fn face_area(&self, f: usize) -> f64 {
        self.face_area_vec[f].length()
    }

    /// Unit normal of face `f`, pointing out of the owner cell.
    pub fn face_normal(&self, f: usize) -> DVec3 {
        self.face_area_vec[f].normalize()
    }

    /// Bounding faces of cell `c`.
    pub fn cell_faces(&self, c: usize) -> &[usize] {
        &self.cell_face_indices[self.cell_face_offsets[c]..self.cell_face_offsets[c + 1]]
    }

    /// Cells sharing a face with cell `c`.
    pub fn cell_cells(&self, c: usize) -> &[usize] {
        &self.cell_cell_indices[self.cell_cell_offsets[c]..self.cell_cell_offsets[c + 1]]
    }

    /// Volume centroid of cell `c`.
    pub fn cell_centroid(&self, c: usize) -> DVec3 {
        self.cell_centroid[c]
    }

    /// Volume of cell `c`.
    pub fn cell_volume(&self, c: usize) -> f64 {
        self.cell_volume[c]
    }

    /// All boundary patches.
    pub fn patches(&self) -> &[Patch] {
        &self.patches
    }

    /// Look up a patch by name.
    pub fn patch_index(&self, name: &str) -> Option<usize> {
        self.patches.iter().position(|p| p.name == name)
    }

    /// True if `f` is a boundary face.
    pub fn is_boundary_face(&self, f: usize) -> bool {
        self.face_neighbour[f].is_none()
    }
}

// ---------------------------------------------------------------------------
// Procedural block mesh
// ---------------------------------------------------------------------------

impl PolyMesh {
    /// Build an axis-aligned hexahedral block mesh covering
    /// `[min, max]` with `nx * ny * nz` cells and the six side patches
    /// `x_min`, `x_max`, `y_min`, `y_max`, `z_min`, `z_max`.
    ///
    /// This is the procedural fixture used by tests and benches; production
    /// meshes come from the surrounding solver.
    pub fn hex_block(min: DVec3, max: DVec3, nx: usize, ny: usize, nz: usize) -> Self {
        assert!(nx > 0 && ny > 0 && nz > 0, "hex_block needs at least one cell per axis");
        assert!(
            max.x > min.x && max.y > min.y && max.z > min.z,
            "hex_block bounds must be ordered"
        );

        let d = (max - min) / DVec3::new(nx as f64, ny as f64, nz as f64);
        let pid = |i: usize, j: usize, k: usize| i + (nx + 1) * (j + (ny + 1) * k);
        let cid = |i: usize, j: usize, k: usize| i + nx * (j + ny * k);

        let mut points = Vec::with_capacity((nx + 1) * (ny + 1) * (nz + 1));
        for k in 0..=nz {
            for j in 0..=ny {
                for i in 0..=nx {
                    points.push(min + DVec3::new(i as f64 * d.x, j as f64 * d.y, k as f64 * d.z));
                }
            }
        }
        // Point ids above run i fastest; pid() must match that layout.
        debug_assert_eq!(points.len(), (nx + 1) * (ny + 1) * (nz + 1));

        let mut faces: Vec<Vec<usize>> = Vec::new();
        let mut owner: Vec<usize> = Vec::new();
        let mut neighbour: Vec<Option<usize>> = Vec::new();

        // Internal faces, x-normal planes.
        for i in 1..nx {
            for j in 0..ny {
                for k in 0..nz {
                    faces.push(vec![
                        pid(i, j, k),
                        pid(i, j + 1, k),
                        pid(i, j + 1, k + 1),
                        pid(i, j, k + 1),
                    ]);
                    owner.push(cid(i - 1, j, k));
                    neighbour.push(Some(cid(i, j, k)));
                }
            }
        }
        // Internal faces, y-normal planes.
        for j in 1..ny {
            for i in 0..nx {
                for k in 0..nz {
                    faces.push(vec![
                        pid(i, j, k),
                        pid(i, j, k + 1),
                        pid(i + 1, j, k + 1),
                        pid(i + 1, j, k),
                    ]);
                    owner.push(cid(i, j - 1, k));
                    neighbour.push(Some(cid(i, j, k)));
                }
            }
        }
        // Internal faces, z-normal planes.
        for k in 1..nz {
            for i in 0..nx {
                for j in 0..ny {
                    faces.push(vec![
                        pid(i, j, k),
                        pid(i + 1, j, k),
                        pid(i + 1, j + 1, k),
                        pid(i, j + 1, k),
                    ]);
                    owner.push(cid(i, j, k - 1));
                    neighbour.push(Some(cid(i, j, k)));
                }
            }
        }

        let mut patches = Vec::with_capacity(6);
        let begin_patch = |name: &str, faces: &Vec<Vec<usize>>| Patch {
            name: name.to_string(),
            start: faces.len(),
            len: 0,
        };

        // x_min: outward normal -x.
        let mut patch = begin_patch("x_min", &faces);
        for j in 0..ny {
            for k in 0..nz {
                faces.push(vec![
                    pid(0, j, k),
                    pid(0, j, k + 1),
                    pid(0, j + 1, k + 1),
                    pid(0, j + 1, k),
                ]);
                owner.push(cid(0, j, k));
                neighbour.push(None);
            }
        }
        patch.len = faces.len() - patch.start;
        patches.push(patch);

        // x_max: outward normal +x.
        let mut patch = begin_patch("x_max", &faces);
        for j in 0..ny {
            for k in 0..nz {
                faces.push(vec![
                    pid(nx, j, k),
                    pid(nx, j + 1, k),
                    pid(nx, j + 1, k + 1),
                    pid(nx, j, k + 1),
                ]);
                owner.push(cid(nx - 1, j, k));
                neighbour.push(None);
            }
        }
        patch.len = faces.len() - patch.start;
        patches.push(patch);

        // y_min: outward normal -y.
        let mut patch = begin_patch("y_min", &faces);
        for i in 0..nx {
            for k in 0..nz {
                faces.push(vec![
                    pid(i, 0, k),
                    pid(i + 1, 0, k),
                    pid(i + 1, 0, k + 1),
                    pid(i, 0, k + 1),
                ]);
                owner.push(cid(i, 0, k));
                neighbour.push(None);
            }
        }
        patch.len = faces.len() - patch.start;
        patches.push(patch);

        // y_max: outward normal +y.
        let mut patch = begin_patch("y_max", &faces);
        for i in 0..nx {
            for k in 0..nz {
                faces.push(vec![
                    pid(i, ny, k),
                    pid(i, ny, k + 1),
                    pid(i + 1, ny, k + 1),
                    pid(i + 1, ny, k),
                ]);
                owner.push(cid(i, ny - 1, k));
                neighbour.push(None);
            }
        }
        patch.len = faces.len() - patch.start;
        patches.push(patch);

        // z_min: outward normal -z.
        let mut patch = begin_patch("z_min", &faces);
        for i in 0..nx {
            for j in 0..ny {
                faces.push(vec![
                    pid(i, j, 0),
                    pid(i, j + 1, 0),
                    pid(i + 1, j + 1, 0),
                    pid(i + 1, j, 0),
                ]);
                owner.push(cid(i, j, 0));
                neighbour.push(None);
            }
        }
        patch.len = faces.len() - patch.start;
        patches.push(patch);

        // z_max: outward normal +z.
        let mut patch = begin_patch("z_max", &faces);
        for i in 0..nx {
            for j in 0..ny {
                faces.push(vec![
                    pid(i, j, nz),
                    pid(i + 1, j, nz),
                    pid(i + 1, j + 1, nz),
                    pid(i, j + 1, nz),
                ]);
                owner.push(cid(i, j, nz - 1));
                neighbour.push(None);
            }
        }
        patch.len = faces.len() - patch.start;
        patches.push(patch);

        Self::new(points, faces, owner, neighbour, patches)
    }
}
