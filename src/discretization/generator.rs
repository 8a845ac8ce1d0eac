use super::mesh::{Cell, Face, Mesh, MeshError, Patch, PatchKind};
use glam::DVec3;

/// Sides of a box, in the order used by [`BoxSpec::sides`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    XMin = 0,
    XMax = 1,
    YMin = 2,
    YMax = 3,
    ZMin = 4,
    ZMax = 5,
}

#[derive(Clone, Debug)]
pub struct SideSpec {
    pub name: String,
    pub kind: PatchKind,
}

/// A structured block of hexahedra. Sides sharing a name become one patch.
///
/// `skew` shears the block (`x += skew * y`), producing non-orthogonal
/// faces between cells stacked in y.
#[derive(Clone, Debug)]
pub struct BoxSpec {
    pub origin: DVec3,
    pub extent: DVec3,
    pub divisions: [usize; 3],
    pub sides: [SideSpec; 6],
    pub skew: f64,
}

impl BoxSpec {
    pub fn new(origin: DVec3, extent: DVec3, divisions: [usize; 3]) -> Self {
        let wall = || SideSpec {
            name: "walls".to_string(),
            kind: PatchKind::Wall,
        };
        Self {
            origin,
            extent,
            divisions,
            sides: [wall(), wall(), wall(), wall(), wall(), wall()],
            skew: 0.0,
        }
    }

    /// `n` cells along x between patches `left` and `right`; the four
    /// lateral sides form the `sides` patch.
    pub fn line(n: usize, length: f64) -> Self {
        Self::new(DVec3::ZERO, DVec3::new(length, 1.0, 1.0), [n, 1, 1])
            .with_side(Side::XMin, "left", PatchKind::Open)
            .with_side(Side::XMax, "right", PatchKind::Open)
            .with_side(Side::YMin, "sides", PatchKind::Symmetry)
            .with_side(Side::YMax, "sides", PatchKind::Symmetry)
            .with_side(Side::ZMin, "sides", PatchKind::Symmetry)
            .with_side(Side::ZMax, "sides", PatchKind::Symmetry)
    }

    pub fn with_side(mut self, side: Side, name: &str, kind: PatchKind) -> Self {
        self.sides[side as usize] = SideSpec {
            name: name.to_string(),
            kind,
        };
        self
    }

    pub fn with_skew(mut self, skew: f64) -> Self {
        self.skew = skew;
        self
    }

    fn spacing(&self) -> DVec3 {
        self.extent
            / DVec3::new(
                self.divisions[0] as f64,
                self.divisions[1] as f64,
                self.divisions[2] as f64,
            )
    }

    fn point(&self, i: usize, j: usize, k: usize) -> DVec3 {
        let d = self.spacing();
        let y = j as f64 * d.y;
        DVec3::new(
            self.origin.x + i as f64 * d.x + self.skew * y,
            self.origin.y + y,
            self.origin.z + k as f64 * d.z,
        )
    }

    /// Centroid of global cell `(i, j, k)`; `i` may lie outside a slab.
    fn cell_centre(&self, i: usize, j: usize, k: usize) -> DVec3 {
        let d = self.spacing();
        let y = (j as f64 + 0.5) * d.y;
        DVec3::new(
            self.origin.x + (i as f64 + 0.5) * d.x + self.skew * y,
            self.origin.y + y,
            self.origin.z + (k as f64 + 0.5) * d.z,
        )
    }
}

/// Processor interface replacing one x side of a slab.
struct Interface {
    rank: usize,
    neighbour_rank: usize,
    /// Global x index of the neighbouring cell layer.
    neighbour_layer: usize,
}

struct Block<'a> {
    spec: &'a BoxSpec,
    i_begin: usize,
    i_end: usize,
}

impl Block<'_> {
    fn nx(&self) -> usize {
        self.i_end - self.i_begin
    }

    fn cell(&self, i: usize, j: usize, k: usize) -> usize {
        let [_, ny, _] = self.spec.divisions;
        (i - self.i_begin) + self.nx() * (j + ny * k)
    }

    fn point(&self, i: usize, j: usize, k: usize) -> usize {
        let [_, ny, _] = self.spec.divisions;
        (i - self.i_begin) + (self.nx() + 1) * (j + (ny + 1) * k)
    }

    /// Quad face with outward orientation relative to `owner`.
    fn face(&self, points: &[DVec3], quad: [usize; 4], owner_centre: DVec3, owner: usize, neighbour: Option<usize>) -> Face {
        let [a, b, c, d] = quad.map(|p| points[p]);
        let centroid = (a + b + c + d) * 0.25;
        let mut area = 0.5 * (c - a).cross(d - b);
        let mut point_ids = quad.to_vec();
        if area.dot(centroid - owner_centre) < 0.0 {
            area = -area;
            point_ids.reverse();
        }
        Face {
            area,
            centroid,
            owner,
            neighbour,
            point_ids,
        }
    }

    fn x_quad(&self, i: usize, j: usize, k: usize) -> [usize; 4] {
        [
            self.point(i, j, k),
            self.point(i, j + 1, k),
            self.point(i, j + 1, k + 1),
            self.point(i, j, k + 1),
        ]
    }

    fn y_quad(&self, i: usize, j: usize, k: usize) -> [usize; 4] {
        [
            self.point(i, j, k),
            self.point(i, j, k + 1),
            self.point(i + 1, j, k + 1),
            self.point(i + 1, j, k),
        ]
    }

    fn z_quad(&self, i: usize, j: usize, k: usize) -> [usize; 4] {
        [
            self.point(i, j, k),
            self.point(i + 1, j, k),
            self.point(i + 1, j + 1, k),
            self.point(i, j + 1, k),
        ]
    }

    fn build(&self, lower: Option<Interface>, upper: Option<Interface>) -> Result<Mesh, MeshError> {
        let spec = self.spec;
        let [_, ny, nz] = spec.divisions;
        let (ib, ie) = (self.i_begin, self.i_end);

        let mut points = Vec::with_capacity((self.nx() + 1) * (ny + 1) * (nz + 1));
        for k in 0..=nz {
            for j in 0..=ny {
                for i in ib..=ie {
                    points.push(spec.point(i, j, k));
                }
            }
        }

        // Parallelepiped cells: the shear keeps the volume of the unsheared cell.
        let d = spec.spacing();
        let volume = d.x * d.y * d.z;
        let mut cells = Vec::with_capacity(self.nx() * ny * nz);
        for k in 0..nz {
            for j in 0..ny {
                for i in ib..ie {
                    let id = cells.len();
                    cells.push(Cell::new(id, volume, spec.cell_centre(i, j, k)));
                }
            }
        }

        let mut faces = Vec::new();
        for k in 0..nz {
            for j in 0..ny {
                for i in ib..ie {
                    let own = self.cell(i, j, k);
                    let c = cells[own].centroid;
                    if i + 1 < ie {
                        faces.push(self.face(&points, self.x_quad(i + 1, j, k), c, own, Some(self.cell(i + 1, j, k))));
                    }
                    if j + 1 < ny {
                        faces.push(self.face(&points, self.y_quad(i, j + 1, k), c, own, Some(self.cell(i, j + 1, k))));
                    }
                    if k + 1 < nz {
                        faces.push(self.face(&points, self.z_quad(i, j, k + 1), c, own, Some(self.cell(i, j, k + 1))));
                    }
                }
            }
        }

        let side_faces = |side: Side| -> Vec<Face> {
            let mut out = Vec::new();
            match side {
                Side::XMin | Side::XMax => {
                    let (i_cell, i_plane) = if side == Side::XMin { (ib, ib) } else { (ie - 1, ie) };
                    for k in 0..nz {
                        for j in 0..ny {
                            let own = self.cell(i_cell, j, k);
                            out.push(self.face(&points, self.x_quad(i_plane, j, k), cells[own].centroid, own, None));
                        }
                    }
                }
                Side::YMin | Side::YMax => {
                    let (j_cell, j_plane) = if side == Side::YMin { (0, 0) } else { (ny - 1, ny) };
                    for k in 0..nz {
                        for i in ib..ie {
                            let own = self.cell(i, j_cell, k);
                            out.push(self.face(&points, self.y_quad(i, j_plane, k), cells[own].centroid, own, None));
                        }
                    }
                }
                Side::ZMin | Side::ZMax => {
                    let (k_cell, k_plane) = if side == Side::ZMin { (0, 0) } else { (nz - 1, nz) };
                    for j in 0..ny {
                        for i in ib..ie {
                            let own = self.cell(i, j, k_cell);
                            out.push(self.face(&points, self.z_quad(i, j, k_plane), cells[own].centroid, own, None));
                        }
                    }
                }
            }
            out
        };

        const SIDES: [Side; 6] = [Side::XMin, Side::XMax, Side::YMin, Side::YMax, Side::ZMin, Side::ZMax];
        let replaced = |side: Side| match side {
            Side::XMin => lower.is_some(),
            Side::XMax => upper.is_some(),
            _ => false,
        };

        let mut patches = Vec::new();
        let mut names: Vec<&str> = Vec::new();
        for s in &spec.sides {
            if !names.contains(&s.name.as_str()) {
                names.push(&s.name);
            }
        }
        for name in names {
            let start = faces.len();
            let mut kind = None;
            for side in SIDES {
                let s = &spec.sides[side as usize];
                if s.name == name {
                    kind.get_or_insert_with(|| s.kind.clone());
                    if !replaced(side) {
                        faces.extend(side_faces(side));
                    }
                }
            }
            patches.push(Patch {
                name: name.to_string(),
                kind: kind.unwrap_or(PatchKind::Wall),
                start,
                size: faces.len() - start,
            });
        }

        for (side, interface) in [(Side::XMin, lower), (Side::XMax, upper)] {
            let Some(interface) = interface else { continue };
            let start = faces.len();
            faces.extend(side_faces(side));
            let mut neighbour_centres = Vec::with_capacity(ny * nz);
            for k in 0..nz {
                for j in 0..ny {
                    neighbour_centres.push(spec.cell_centre(interface.neighbour_layer, j, k));
                }
            }
            patches.push(Patch {
                name: format!("procBoundary{}to{}", interface.rank, interface.neighbour_rank),
                kind: PatchKind::Processor {
                    neighbour_rank: interface.neighbour_rank,
                    neighbour_centres,
                },
                start,
                size: faces.len() - start,
            });
        }

        Mesh::new(points, faces, cells, patches)
    }
}

/// Build a structured hexahedral mesh for a single partition.
pub fn create_box_mesh(spec: &BoxSpec) -> Result<Mesh, MeshError> {
    if spec.divisions.contains(&0) {
        return Err(MeshError::NoDivisions(spec.divisions));
    }
    Block {
        spec,
        i_begin: 0,
        i_end: spec.divisions[0],
    }
    .build(None, None)
}

/// Split the block into `n_parts` slabs along x, one mesh per rank.
///
/// Neighbouring slabs are joined by `procBoundary{a}to{b}` patches whose
/// faces are listed in the same order on both sides.
pub fn decompose_box(spec: &BoxSpec, n_parts: usize) -> Result<Vec<Mesh>, MeshError> {
    if spec.divisions.contains(&0) {
        return Err(MeshError::NoDivisions(spec.divisions));
    }
    let nx = spec.divisions[0];
    if n_parts == 0 || n_parts > nx {
        return Err(MeshError::Decomposition {
            cells: nx,
            parts: n_parts,
        });
    }

    let mut meshes = Vec::with_capacity(n_parts);
    for rank in 0..n_parts {
        let i_begin = rank * nx / n_parts;
        let i_end = (rank + 1) * nx / n_parts;
        let lower = (rank > 0).then(|| Interface {
            rank,
            neighbour_rank: rank - 1,
            neighbour_layer: i_begin - 1,
        });
        let upper = (rank + 1 < n_parts).then(|| Interface {
            rank,
            neighbour_rank: rank + 1,
            neighbour_layer: i_end,
        });
        meshes.push(Block { spec, i_begin, i_end }.build(lower, upper)?);
    }
    Ok(meshes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_mesh_has_expected_topology() {
        let mesh = create_box_mesh(&BoxSpec::line(2, 1.0)).unwrap();
        assert_eq!(mesh.n_cells(), 2);
        assert_eq!(mesh.n_internal_faces(), 1);
        let names: Vec<&str> = mesh.patches.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["left", "right", "sides"]);
        assert_eq!(mesh.patches[2].size, 8);
        assert!((mesh.cells[0].centroid.x - 0.25).abs() < 1e-14);
        assert!((mesh.total_volume() - 1.0).abs() < 1e-14);
    }

    #[test]
    fn face_areas_close_every_cell() {
        let spec = BoxSpec::new(DVec3::ZERO, DVec3::new(1.0, 2.0, 0.5), [3, 4, 2]).with_skew(0.3);
        let mesh = create_box_mesh(&spec).unwrap();
        for cell in &mesh.cells {
            let sum: DVec3 = cell
                .face_ids
                .iter()
                .map(|&f| {
                    let face = &mesh.faces[f];
                    if face.owner == cell.id { face.area } else { -face.area }
                })
                .sum();
            assert!(sum.length() < 1e-12, "cell {} is open: {sum:?}", cell.id);
        }
    }

    #[test]
    fn skewed_mesh_carries_correction_vectors() {
        let spec = BoxSpec::new(DVec3::ZERO, DVec3::ONE, [2, 2, 1]).with_skew(0.5);
        let mesh = create_box_mesh(&spec).unwrap();
        let worst = mesh
            .internal_faces()
            .map(|f| mesh.geometry(f).corr_vec.length())
            .fold(0.0, f64::max);
        assert!(worst > 1e-3);
    }

    #[test]
    fn slabs_share_processor_interfaces() {
        let spec = BoxSpec::new(DVec3::ZERO, DVec3::new(3.0, 1.0, 1.0), [6, 2, 1]);
        let parts = decompose_box(&spec, 3).unwrap();
        assert_eq!(parts.iter().map(|m| m.n_cells()).sum::<usize>(), 12);

        let middle = &parts[1];
        let procs: Vec<&Patch> = middle.patches.iter().filter(|p| p.is_coupled()).collect();
        assert_eq!(procs.len(), 2);
        assert_eq!(procs[0].name, "procBoundary1to0");
        assert_eq!(procs[1].name, "procBoundary1to2");

        let down = parts[0].patch_index("procBoundary0to1").unwrap();
        let up = middle.patch_index("procBoundary1to0").unwrap();
        for (fa, fb) in parts[0].patches[down].faces().zip(middle.patches[up].faces()) {
            let (a, b) = (&parts[0].faces[fa], &middle.faces[fb]);
            assert!((a.centroid - b.centroid).length() < 1e-12);
            assert!((a.area + b.area).length() < 1e-12);
        }
    }

    #[test]
    fn rejects_too_many_slabs() {
        let spec = BoxSpec::line(2, 1.0);
        assert!(matches!(decompose_box(&spec, 3), Err(MeshError::Decomposition { .. })));
    }
}
