use super::{CyclicTransform, Mesh, Patch, PatchKind};
use crate::{Float, FvResult, Vector3};

#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::EnumIter, strum::Display)]
pub enum Side {
    XMin,
    XMax,
    YMin,
    YMax,
    ZMin,
    ZMax,
}

impl Side {
    fn axis(self) -> usize {
        match self {
            Self::XMin | Self::XMax => 0,
            Self::YMin | Self::YMax => 1,
            Self::ZMin | Self::ZMax => 2,
        }
    }

    fn is_max(self) -> bool {
        matches!(self, Self::XMax | Self::YMax | Self::ZMax)
    }

    fn default_name(self) -> &'static str {
        match self {
            Self::XMin => "xMin",
            Self::XMax => "xMax",
            Self::YMin => "yMin",
            Self::YMax => "yMax",
            Self::ZMin => "zMin",
            Self::ZMax => "zMax",
        }
    }
}

/// A single hexahedral block, optionally sheared in x proportionally to y.
///
/// Several sides may share a patch name; their faces are then gathered into one patch.
#[derive(Clone, Debug)]
pub struct BlockMesh {
    n: [usize; 3],
    lengths: [Float; 3],
    origin: Vector3,
    skew: Float,
    sides: [(String, PatchKind); 6],
}

impl BlockMesh {
    pub fn new(n: [usize; 3], lengths: [Float; 3]) -> Self {
        use strum::IntoEnumIterator;

        let sides = Side::iter()
            .map(|side| (side.default_name().to_owned(), PatchKind::Patch))
            .collect::<Vec<_>>();
        Self {
            n,
            lengths,
            origin: Vector3::zeros(),
            skew: 0.,
            sides: [0, 1, 2, 3, 4, 5].map(|i| sides[i].clone()),
        }
    }

    /// A 2-D block one cell thick in z, with empty front and back.
    pub fn two_dimensional(n: [usize; 2], lengths: [Float; 2]) -> Self {
        let thickness = lengths[0] / n[0] as Float;
        Self::new([n[0], n[1], 1], [lengths[0], lengths[1], thickness])
            .with_side(Side::ZMin, "frontAndBack", PatchKind::Empty)
            .with_side(Side::ZMax, "frontAndBack", PatchKind::Empty)
    }

    pub fn with_origin(self, origin: Vector3) -> Self {
        Self { origin, ..self }
    }

    /// Shifts points in x by `skew` times their height.
    pub fn with_skew(self, skew: Float) -> Self {
        Self { skew, ..self }
    }

    pub fn with_side(mut self, side: Side, name: &str, kind: PatchKind) -> Self {
        self.sides[side as usize] = (name.to_owned(), kind);
        self
    }

    /// Couples two opposite sides through a translational cyclic pair.
    pub fn with_cyclic(self, min_side: Side, min_name: &str, max_name: &str) -> Self {
        let axis = min_side.axis();
        let mut separation = Vector3::zeros();
        separation[axis] = self.lengths[axis];
        let max_side = match axis {
            0 => Side::XMax,
            1 => Side::YMax,
            _ => Side::ZMax,
        };
        self.with_side(
            min_side,
            min_name,
            PatchKind::Cyclic {
                neighbour_patch: max_name.to_owned(),
                transform: CyclicTransform::Translational {
                    separation: -separation,
                },
            },
        )
        .with_side(
            max_side,
            max_name,
            PatchKind::Cyclic {
                neighbour_patch: min_name.to_owned(),
                transform: CyclicTransform::Translational { separation },
            },
        )
    }

    pub fn build(&self) -> FvResult<Mesh> {
        let [nx, ny, nz] = self.n;
        let [dx, dy, dz] = [0, 1, 2].map(|d| self.lengths[d] / self.n[d] as Float);
        let point_index = |i: usize, j: usize, k: usize| i + (nx + 1) * (j + (ny + 1) * k);
        let cell_index = |i: usize, j: usize, k: usize| i + nx * (j + ny * k);

        let mut points = Vec::with_capacity((nx + 1) * (ny + 1) * (nz + 1));
        for k in 0..=nz {
            for j in 0..=ny {
                for i in 0..=nx {
                    let y = j as Float * dy;
                    points.push(
                        self.origin
                            + Vector3::new(i as Float * dx + self.skew * y, y, k as Float * dz),
                    );
                }
            }
        }

        // Quads on the planes normal to each axis, oriented along the positive axis.
        let quad = |axis: usize, i: usize, j: usize, k: usize| -> Vec<usize> {
            match axis {
                0 => vec![
                    point_index(i, j, k),
                    point_index(i, j + 1, k),
                    point_index(i, j + 1, k + 1),
                    point_index(i, j, k + 1),
                ],
                1 => vec![
                    point_index(i, j, k),
                    point_index(i, j, k + 1),
                    point_index(i + 1, j, k + 1),
                    point_index(i + 1, j, k),
                ],
                _ => vec![
                    point_index(i, j, k),
                    point_index(i + 1, j, k),
                    point_index(i + 1, j + 1, k),
                    point_index(i, j + 1, k),
                ],
            }
        };

        let mut faces = Vec::new();
        let mut owner = Vec::new();
        let mut neighbour = Vec::new();
        for k in 0..nz {
            for j in 0..ny {
                for i in 0..nx {
                    let cell = cell_index(i, j, k);
                    if i + 1 < nx {
                        faces.push(quad(0, i + 1, j, k));
                        owner.push(cell);
                        neighbour.push(cell_index(i + 1, j, k));
                    }
                    if j + 1 < ny {
                        faces.push(quad(1, i, j + 1, k));
                        owner.push(cell);
                        neighbour.push(cell_index(i, j + 1, k));
                    }
                    if k + 1 < nz {
                        faces.push(quad(2, i, j, k + 1));
                        owner.push(cell);
                        neighbour.push(cell_index(i, j, k + 1));
                    }
                }
            }
        }

        let side_faces = |side: Side| -> Vec<(Vec<usize>, usize)> {
            let axis = side.axis();
            let plane = if side.is_max() { self.n[axis] } else { 0 };
            let layer = if side.is_max() { self.n[axis] - 1 } else { 0 };
            let (first, second) = match axis {
                0 => (1, 2),
                1 => (0, 2),
                _ => (0, 1),
            };
            let mut result = Vec::new();
            for b in 0..self.n[second] {
                for a in 0..self.n[first] {
                    let mut ijk = [0; 3];
                    ijk[axis] = plane;
                    ijk[first] = a;
                    ijk[second] = b;
                    let mut vertices = quad(axis, ijk[0], ijk[1], ijk[2]);
                    if !side.is_max() {
                        vertices.reverse();
                    }
                    ijk[axis] = layer;
                    result.push((vertices, cell_index(ijk[0], ijk[1], ijk[2])));
                }
            }
            result
        };

        let mut patches = Vec::new();
        let mut names: Vec<&str> = Vec::new();
        for (name, _) in &self.sides {
            if !names.contains(&name.as_str()) {
                names.push(name.as_str());
            }
        }
        use strum::IntoEnumIterator;
        for name in names {
            let start = faces.len();
            let mut kind = PatchKind::Patch;
            for side in Side::iter().filter(|&side| self.sides[side as usize].0 == name) {
                kind = self.sides[side as usize].1.clone();
                for (vertices, cell) in side_faces(side) {
                    faces.push(vertices);
                    owner.push(cell);
                }
            }
            patches.push(Patch::new(name, kind, start, faces.len() - start));
        }

        Mesh::new(points, faces, owner, neighbour, patches)
    }
}

impl Mesh {
    /// A 1-D line of `n_cells` unit-section cells between patches `left` and `right`.
    pub fn line(n_cells: usize, length: Float) -> FvResult<Self> {
        BlockMesh::new([n_cells, 1, 1], [length, 1., 1.])
            .with_side(Side::XMin, "left", PatchKind::Patch)
            .with_side(Side::XMax, "right", PatchKind::Patch)
            .with_side(Side::YMin, "sides", PatchKind::Empty)
            .with_side(Side::YMax, "sides", PatchKind::Empty)
            .with_side(Side::ZMin, "sides", PatchKind::Empty)
            .with_side(Side::ZMax, "sides", PatchKind::Empty)
            .build()
    }
}
