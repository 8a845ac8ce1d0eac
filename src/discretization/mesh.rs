use glam::DVec3;
use std::ops::Range;
use thiserror::Error;

/// Lower bound on `n·d / |d|` used by the non-orthogonal delta coefficient.
const NON_ORTH_DELTA_LIMIT: f64 = 0.05;

#[derive(Debug, Error, PartialEq)]
pub enum MeshError {
    #[error("face {face}: owner {owner} is outside 0..{n_cells}")]
    OwnerOutOfRange {
        face: usize,
        owner: usize,
        n_cells: usize,
    },
    #[error("face {face}: neighbour {neighbour} is outside 0..{n_cells}")]
    NeighbourOutOfRange {
        face: usize,
        neighbour: usize,
        n_cells: usize,
    },
    #[error("face {face}: cell {cell} is its own neighbour")]
    SelfNeighbour { face: usize, cell: usize },
    #[error("face {face}: owner {owner} must be lower than neighbour {neighbour}")]
    NotUpperTriangular {
        face: usize,
        owner: usize,
        neighbour: usize,
    },
    #[error("internal face {face} follows the first boundary face")]
    InternalAfterBoundary { face: usize },
    #[error("patch '{name}' starts at face {start}, expected {expected}")]
    PatchNotContiguous {
        name: String,
        start: usize,
        expected: usize,
    },
    #[error("patches cover faces up to {covered} but the mesh has {n_faces} faces")]
    PatchCoverage { covered: usize, n_faces: usize },
    #[error("cell {0} has no faces")]
    EmptyCell(usize),
    #[error("cell {cell} has non-positive volume {volume}")]
    NonPositiveVolume { cell: usize, volume: f64 },
    #[error("face {face}: point {point} is outside 0..{n_points}")]
    PointOutOfRange {
        face: usize,
        point: usize,
        n_points: usize,
    },
    #[error("processor patch '{name}' has {found} neighbour centres for {expected} faces")]
    ProcessorCentres {
        name: String,
        expected: usize,
        found: usize,
    },
    #[error("box mesh needs at least one division per direction, got {0:?}")]
    NoDivisions([usize; 3]),
    #[error("cannot split {cells} cells into {parts} slabs")]
    Decomposition { cells: usize, parts: usize },
}

/// The computational grid of one partition.
///
/// Internal faces come first and are ordered so that `owner < neighbour`;
/// boundary faces follow, grouped into contiguous patches.
#[derive(Clone, Debug)]
pub struct Mesh {
    pub points: Vec<DVec3>,
    pub cells: Vec<Cell>,
    pub faces: Vec<Face>,
    pub patches: Vec<Patch>,
    n_internal_faces: usize,
    geometry: Vec<FaceGeometry>,
}

/// A single control volume.
#[derive(Clone, Debug)]
pub struct Cell {
    pub id: usize,
    pub volume: f64,
    pub centroid: DVec3,
    pub face_ids: Vec<usize>,
}

impl Cell {
    pub fn new(id: usize, volume: f64, centroid: DVec3) -> Self {
        Self {
            id,
            volume,
            centroid,
            face_ids: Vec::new(),
        }
    }
}

/// An interface between two cells, or between a cell and the boundary.
#[derive(Clone, Debug)]
pub struct Face {
    /// Area vector, pointing out of the owner.
    pub area: DVec3,
    pub centroid: DVec3,
    pub owner: usize,
    pub neighbour: Option<usize>,
    pub point_ids: Vec<usize>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum PatchKind {
    Wall,
    Open,
    Symmetry,
    /// Interface to another partition. `neighbour_centres` holds, per face,
    /// the centroid of the cell on the other side.
    Processor {
        neighbour_rank: usize,
        neighbour_centres: Vec<DVec3>,
    },
}

#[derive(Clone, Debug)]
pub struct Patch {
    pub name: String,
    pub kind: PatchKind,
    pub start: usize,
    pub size: usize,
}

impl Patch {
    pub fn faces(&self) -> Range<usize> {
        self.start..self.start + self.size
    }

    pub fn is_coupled(&self) -> bool {
        matches!(self.kind, PatchKind::Processor { .. })
    }

    pub fn neighbour_rank(&self) -> Option<usize> {
        match self.kind {
            PatchKind::Processor { neighbour_rank, .. } => Some(neighbour_rank),
            _ => None,
        }
    }
}

/// Per-face interpolation and gradient coefficients, computed once.
#[derive(Clone, Copy, Debug)]
pub struct FaceGeometry {
    /// Owner interpolation weight; 1 on non-coupled boundary faces.
    pub weight: f64,
    /// `1 / max(n·d, 0.05|d|)`.
    pub delta_coeff: f64,
    /// `n - d·delta_coeff`; zero on non-coupled boundary faces.
    pub corr_vec: DVec3,
    pub mag_sf: f64,
    pub normal: DVec3,
}

impl Mesh {
    pub fn new(
        points: Vec<DVec3>,
        faces: Vec<Face>,
        mut cells: Vec<Cell>,
        patches: Vec<Patch>,
    ) -> Result<Self, MeshError> {
        let n_cells = cells.len();
        let n_points = points.len();

        let mut n_internal_faces = faces.len();
        for (f, face) in faces.iter().enumerate() {
            if face.owner >= n_cells {
                return Err(MeshError::OwnerOutOfRange {
                    face: f,
                    owner: face.owner,
                    n_cells,
                });
            }
            match face.neighbour {
                Some(n) => {
                    if f > n_internal_faces {
                        return Err(MeshError::InternalAfterBoundary { face: f });
                    }
                    if n >= n_cells {
                        return Err(MeshError::NeighbourOutOfRange {
                            face: f,
                            neighbour: n,
                            n_cells,
                        });
                    }
                    if n == face.owner {
                        return Err(MeshError::SelfNeighbour { face: f, cell: n });
                    }
                    if face.owner > n {
                        return Err(MeshError::NotUpperTriangular {
                            face: f,
                            owner: face.owner,
                            neighbour: n,
                        });
                    }
                }
                None => n_internal_faces = n_internal_faces.min(f),
            }
            if let Some(&p) = face.point_ids.iter().find(|&&p| p >= n_points) {
                return Err(MeshError::PointOutOfRange {
                    face: f,
                    point: p,
                    n_points,
                });
            }
        }

        let mut expected = n_internal_faces;
        for patch in &patches {
            if patch.start != expected {
                return Err(MeshError::PatchNotContiguous {
                    name: patch.name.clone(),
                    start: patch.start,
                    expected,
                });
            }
            if let PatchKind::Processor {
                neighbour_centres, ..
            } = &patch.kind
            {
                if neighbour_centres.len() != patch.size {
                    return Err(MeshError::ProcessorCentres {
                        name: patch.name.clone(),
                        expected: patch.size,
                        found: neighbour_centres.len(),
                    });
                }
            }
            expected += patch.size;
        }
        if expected != faces.len() {
            return Err(MeshError::PatchCoverage {
                covered: expected,
                n_faces: faces.len(),
            });
        }

        for cell in cells.iter_mut() {
            cell.face_ids.clear();
        }
        for (f, face) in faces.iter().enumerate() {
            cells[face.owner].face_ids.push(f);
            if let Some(n) = face.neighbour {
                cells[n].face_ids.push(f);
            }
        }
        for (c, cell) in cells.iter().enumerate() {
            if cell.face_ids.is_empty() {
                return Err(MeshError::EmptyCell(c));
            }
            if !(cell.volume > 0.0) {
                return Err(MeshError::NonPositiveVolume {
                    cell: c,
                    volume: cell.volume,
                });
            }
        }

        let mut mesh = Self {
            points,
            cells,
            faces,
            patches,
            n_internal_faces,
            geometry: Vec::new(),
        };
        mesh.geometry = mesh.compute_geometry();
        Ok(mesh)
    }

    fn compute_geometry(&self) -> Vec<FaceGeometry> {
        let mut geometry = Vec::with_capacity(self.faces.len());
        for (f, face) in self.faces.iter().enumerate() {
            let sf = face.area;
            let mag_sf = sf.length();
            let normal = sf / mag_sf;
            let c_own = self.cells[face.owner].centroid;

            let neighbour_centre = match face.neighbour {
                Some(n) => Some(self.cells[n].centroid),
                None => self.coupled_centre(f),
            };

            let g = match neighbour_centre {
                Some(c_nei) => {
                    let d = c_nei - c_own;
                    let denom = sf.dot(d);
                    let weight = if denom.abs() > f64::MIN_POSITIVE {
                        sf.dot(c_nei - face.centroid) / denom
                    } else {
                        0.5
                    };
                    let delta_coeff = 1.0 / normal.dot(d).max(NON_ORTH_DELTA_LIMIT * d.length());
                    FaceGeometry {
                        weight,
                        delta_coeff,
                        corr_vec: normal - d * delta_coeff,
                        mag_sf,
                        normal,
                    }
                }
                None => {
                    let d = face.centroid - c_own;
                    let delta_coeff = 1.0 / normal.dot(d).max(NON_ORTH_DELTA_LIMIT * d.length());
                    FaceGeometry {
                        weight: 1.0,
                        delta_coeff,
                        corr_vec: DVec3::ZERO,
                        mag_sf,
                        normal,
                    }
                }
            };
            geometry.push(g);
        }
        geometry
    }

    fn coupled_centre(&self, face: usize) -> Option<DVec3> {
        let patch = self.patches.iter().find(|p| p.faces().contains(&face))?;
        match &patch.kind {
            PatchKind::Processor {
                neighbour_centres, ..
            } => Some(neighbour_centres[face - patch.start]),
            _ => None,
        }
    }

    pub fn n_cells(&self) -> usize {
        self.cells.len()
    }

    pub fn n_faces(&self) -> usize {
        self.faces.len()
    }

    pub fn n_internal_faces(&self) -> usize {
        self.n_internal_faces
    }

    pub fn internal_faces(&self) -> Range<usize> {
        0..self.n_internal_faces
    }

    pub fn is_internal(&self, face: usize) -> bool {
        face < self.n_internal_faces
    }

    pub fn geometry(&self, face: usize) -> &FaceGeometry {
        &self.geometry[face]
    }

    pub fn patch_index(&self, name: &str) -> Option<usize> {
        self.patches.iter().position(|p| p.name == name)
    }

    /// Owner cells of the faces of a patch, in patch order.
    pub fn patch_face_cells(&self, patch: usize) -> impl Iterator<Item = usize> + '_ {
        self.patches[patch].faces().map(|f| self.faces[f].owner)
    }

    pub fn volumes(&self) -> Vec<f64> {
        self.cells.iter().map(|c| c.volume).collect()
    }

    pub fn total_volume(&self) -> f64 {
        self.cells.iter().map(|c| c.volume).sum()
    }

    /// Distance between owner and neighbour centroids of internal faces.
    pub fn cell_spacings(&self) -> impl Iterator<Item = f64> + '_ {
        self.faces[..self.n_internal_faces].iter().filter_map(|face| {
            face.neighbour
                .map(|n| (self.cells[n].centroid - self.cells[face.owner].centroid).length())
        })
    }
}
