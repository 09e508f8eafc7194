mod blocks;
mod ldu;
mod topo_change;

use std::sync::atomic::{AtomicU64, Ordering};

use ndarray as nd;

pub use blocks::{BlockMesh, Side};
pub use ldu::LduAddressing;
pub use topo_change::{map_or_fallback, TopoChangeMap};

use crate::parallel::Comm;
use crate::{Float, FvError, FvResult, Tensor, Vector3};

static GENERATION: AtomicU64 = AtomicU64::new(1);

fn next_generation() -> u64 {
    GENERATION.fetch_add(1, Ordering::Relaxed)
}

/// Maps coordinates on a cyclic patch's neighbour onto the patch itself.
#[derive(Clone, Debug, PartialEq)]
pub enum CyclicTransform {
    None,
    Translational {
        separation: Vector3,
    },
    /// Rotation by `angle` radians about `axis` through `centre`.
    Rotational {
        axis: Vector3,
        centre: Vector3,
        angle: Float,
    },
}

impl CyclicTransform {
    pub fn rotation(&self) -> Option<Tensor> {
        match self {
            Self::Rotational { axis, angle, .. } => Some(
                nalgebra::Rotation3::from_axis_angle(&nalgebra::Unit::new_normalize(*axis), *angle)
                    .into_inner(),
            ),
            _ => None,
        }
    }

    pub fn apply_to_point(&self, point: Vector3) -> Vector3 {
        match self {
            Self::None => point,
            Self::Translational { separation } => point + separation,
            Self::Rotational { centre, .. } => {
                let rotation = self.rotation().unwrap_or_else(Tensor::identity);
                rotation * (point - centre) + centre
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum PatchKind {
    Patch,
    Wall,
    SymmetryPlane,
    /// Faces normal to a direction that is not solved for. Has no finite-volume faces.
    Empty,
    Cyclic {
        neighbour_patch: String,
        transform: CyclicTransform,
    },
    /// Faces shared with the subdomain on another rank.
    Processor {
        neighb_rank: usize,
        tag: usize,
        neighbour_cell_centres: Vec<Vector3>,
    },
}

impl PatchKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Patch => "patch",
            Self::Wall => "wall",
            Self::SymmetryPlane => "symmetryPlane",
            Self::Empty => "empty",
            Self::Cyclic { .. } => "cyclic",
            Self::Processor { .. } => "processor",
        }
    }

    pub fn is_coupled(&self) -> bool {
        matches!(self, Self::Cyclic { .. } | Self::Processor { .. })
    }

    /// Patch field type that every field must use on this kind of patch, if any.
    pub fn constraint_type(&self) -> Option<&'static str> {
        match self {
            Self::Patch | Self::Wall => None,
            _ => Some(self.type_name()),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Patch {
    name: String,
    kind: PatchKind,
    start: usize,
    n_faces: usize,
    index: usize,
}

impl Patch {
    pub fn new(name: impl Into<String>, kind: PatchKind, start: usize, n_faces: usize) -> Self {
        Self {
            name: name.into(),
            kind,
            start,
            n_faces,
            index: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &PatchKind {
        &self.kind
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn start(&self) -> usize {
        self.start
    }

    /// Number of mesh faces in the patch.
    pub fn n_faces(&self) -> usize {
        self.n_faces
    }

    /// Number of finite-volume faces, zero for empty patches.
    pub fn size(&self) -> usize {
        if self.kind == PatchKind::Empty {
            0
        } else {
            self.n_faces
        }
    }

    pub fn face_range(&self) -> std::ops::Range<usize> {
        self.start..self.start + self.n_faces
    }

    pub fn is_coupled(&self) -> bool {
        self.kind.is_coupled()
    }
}

/// Per-patch finite-volume geometry, sized by `Patch::size`.
#[derive(Clone, Debug)]
pub struct PatchGeometry {
    pub face_cells: Vec<usize>,
    pub sf: nd::Array1<Vector3>,
    pub mag_sf: nd::Array1<Float>,
    pub nf: nd::Array1<Vector3>,
    pub cf: nd::Array1<Vector3>,
    /// Owner cell centre to face centre projected on the normal, or to the neighbour cell centre
    /// for coupled patches.
    pub delta: nd::Array1<Vector3>,
    pub weights: nd::Array1<Float>,
    pub delta_coeffs: nd::Array1<Float>,
    pub non_orth_delta_coeffs: nd::Array1<Float>,
    pub non_orth_correction_vectors: nd::Array1<Vector3>,
    pub neighbour_patch: Option<usize>,
    /// Rotation applied to values taken from the neighbour side of a cyclic patch.
    pub rotation: Option<Tensor>,
}

/// An unstructured polyhedral mesh with its derived finite-volume geometry.
#[derive(Clone, derivative::Derivative)]
#[derivative(Debug)]
pub struct Mesh {
    generation: u64,
    #[derivative(Debug = "ignore")]
    points: Vec<Vector3>,
    #[derivative(Debug = "ignore")]
    faces: Vec<Vec<usize>>,
    #[derivative(Debug = "ignore")]
    owner: Vec<usize>,
    #[derivative(Debug = "ignore")]
    neighbour: Vec<usize>,
    #[derivative(Debug = "ignore")]
    cells: Vec<Vec<usize>>,
    patches: Vec<Patch>,

    #[derivative(Debug = "ignore")]
    cell_centres: nd::Array1<Vector3>,
    #[derivative(Debug = "ignore")]
    cell_volumes: nd::Array1<Float>,
    #[derivative(Debug = "ignore")]
    sf: nd::Array1<Vector3>,
    #[derivative(Debug = "ignore")]
    mag_sf: nd::Array1<Float>,
    #[derivative(Debug = "ignore")]
    cf: nd::Array1<Vector3>,
    #[derivative(Debug = "ignore")]
    weights: nd::Array1<Float>,
    #[derivative(Debug = "ignore")]
    delta_coeffs: nd::Array1<Float>,
    #[derivative(Debug = "ignore")]
    non_orth_delta_coeffs: nd::Array1<Float>,
    #[derivative(Debug = "ignore")]
    non_orth_correction_vectors: nd::Array1<Vector3>,
    #[derivative(Debug = "ignore")]
    patch_geometry: Vec<PatchGeometry>,
    #[derivative(Debug = "ignore")]
    addressing: LduAddressing,
    solution_directions: [bool; 3],
    topo_change: Option<TopoChangeMap>,
    #[derivative(Debug = "ignore")]
    comm: Comm,
}

impl Mesh {
    /// Builds a mesh from its primitive description.
    ///
    /// Internal faces come first, in upper-triangular order, followed by the patches in order.
    /// Each face's points are ordered so that its normal points out of its owner cell.
    pub fn new(
        points: Vec<Vector3>,
        faces: Vec<Vec<usize>>,
        owner: Vec<usize>,
        neighbour: Vec<usize>,
        mut patches: Vec<Patch>,
    ) -> FvResult<Self> {
        let n_faces = faces.len();
        let n_internal_faces = neighbour.len();
        if owner.len() != n_faces {
            return Err(FvError::size_mismatch("owner", n_faces, owner.len()));
        }
        if n_internal_faces > n_faces {
            return Err(FvError::InvalidMesh(
                "more neighbours than faces".to_owned(),
            ));
        }
        for (face, vertices) in faces.iter().enumerate() {
            if vertices.len() < 3 || vertices.iter().any(|&point| point >= points.len()) {
                return Err(FvError::InvalidMesh(format!("face {face} is malformed")));
            }
        }
        let n_cells = owner
            .iter()
            .chain(neighbour.iter())
            .max()
            .map_or(0, |&cell| cell + 1);

        for face in 0..n_internal_faces {
            if owner[face] >= neighbour[face] {
                return Err(FvError::InvalidMesh(format!(
                    "internal face {face} has owner {} not below neighbour {}",
                    owner[face], neighbour[face]
                )));
            }
            if face > 0
                && (owner[face], neighbour[face]) <= (owner[face - 1], neighbour[face - 1])
            {
                return Err(FvError::InvalidMesh(format!(
                    "internal face {face} is not in upper-triangular order"
                )));
            }
        }

        let mut next_start = n_internal_faces;
        for (index, patch) in patches.iter_mut().enumerate() {
            if patch.start != next_start {
                return Err(FvError::InvalidMesh(format!(
                    "patch {} starts at face {} instead of {next_start}",
                    patch.name, patch.start
                )));
            }
            next_start += patch.n_faces;
            patch.index = index;
        }
        if next_start != n_faces {
            return Err(FvError::InvalidMesh(format!(
                "patches cover {} boundary faces out of {}",
                next_start - n_internal_faces,
                n_faces - n_internal_faces
            )));
        }

        let mut cells = vec![Vec::new(); n_cells];
        for (face, &cell) in owner.iter().enumerate() {
            cells[cell].push(face);
        }
        for (face, &cell) in neighbour.iter().enumerate() {
            cells[cell].push(face);
        }

        let (all_cf, all_sf): (Vec<_>, Vec<_>) = faces
            .iter()
            .map(|vertices| face_centre_and_area(&points, vertices))
            .unzip();
        let (cell_centres, cell_volumes) =
            cell_centres_and_volumes(n_cells, &owner, &neighbour, &all_cf, &all_sf);

        let mut mesh = Self {
            generation: next_generation(),
            addressing: LduAddressing::new(
                n_cells,
                owner[..n_internal_faces].to_vec(),
                neighbour.clone(),
            ),
            points,
            faces,
            owner,
            neighbour,
            cells,
            patches,
            cell_centres,
            cell_volumes,
            sf: nd::Array1::from(all_sf[..n_internal_faces].to_vec()),
            mag_sf: all_sf[..n_internal_faces].iter().map(|sf| sf.norm()).collect(),
            cf: nd::Array1::from(all_cf[..n_internal_faces].to_vec()),
            weights: nd::Array1::zeros(0),
            delta_coeffs: nd::Array1::zeros(0),
            non_orth_delta_coeffs: nd::Array1::zeros(0),
            non_orth_correction_vectors: nd::Array1::from(vec![]),
            patch_geometry: Vec::new(),
            solution_directions: [true; 3],
            topo_change: None,
            comm: Comm::serial(),
        };
        mesh.make_internal_interpolation();
        mesh.patch_geometry = (0..mesh.patches.len())
            .map(|patch| mesh.make_patch_geometry(patch, &all_cf, &all_sf))
            .collect::<FvResult<_>>()?;
        mesh.solution_directions = mesh.find_solution_directions();
        Ok(mesh)
    }

    /// Attaches the communicator of the rank this mesh lives on.
    pub fn with_comm(self, comm: Comm) -> Self {
        Self { comm, ..self }
    }

    fn make_internal_interpolation(&mut self) {
        let n = self.neighbour.len();
        let mut weights = nd::Array1::zeros(n);
        let mut delta_coeffs = nd::Array1::zeros(n);
        let mut non_orth_delta_coeffs = nd::Array1::zeros(n);
        let mut corrections = nd::Array1::from_elem(n, Vector3::zeros());
        for face in 0..n {
            let own = self.cell_centres[self.owner[face]];
            let nei = self.cell_centres[self.neighbour[face]];
            let nf = self.sf[face] / self.mag_sf[face];
            let sfd_own = nf.dot(&(self.cf[face] - own)).abs();
            let sfd_nei = nf.dot(&(nei - self.cf[face])).abs();
            weights[face] = sfd_nei / (sfd_own + sfd_nei);

            let delta = nei - own;
            delta_coeffs[face] = 1. / delta.norm();
            non_orth_delta_coeffs[face] = 1. / nf.dot(&delta).max(0.05 * delta.norm());
            corrections[face] = nf - delta * non_orth_delta_coeffs[face];
        }
        self.weights = weights;
        self.delta_coeffs = delta_coeffs;
        self.non_orth_delta_coeffs = non_orth_delta_coeffs;
        self.non_orth_correction_vectors = corrections;
    }

    fn make_patch_geometry(
        &self,
        patch_index: usize,
        all_cf: &[Vector3],
        all_sf: &[Vector3],
    ) -> FvResult<PatchGeometry> {
        let patch = &self.patches[patch_index];
        let faces = if patch.kind == PatchKind::Empty {
            patch.start..patch.start
        } else {
            patch.face_range()
        };
        let face_cells = self.owner[faces.clone()].to_vec();
        let sf = nd::Array1::from(all_sf[faces.clone()].to_vec());
        let cf = nd::Array1::from(all_cf[faces.clone()].to_vec());
        let mag_sf = sf.mapv(|sf: Vector3| sf.norm());
        let nf = nd::Zip::from(&sf)
            .and(&mag_sf)
            .map_collect(|&sf, &mag_sf| sf / mag_sf);
        let own = face_cells
            .iter()
            .map(|&cell| self.cell_centres[cell])
            .collect::<Vec<_>>();

        let mut neighbour_patch = None;
        let mut rotation = None;
        let neighbour_centres = match &patch.kind {
            PatchKind::Cyclic {
                neighbour_patch: neighbour_name,
                transform,
            } => {
                let neighbour_index = self.find_patch(neighbour_name).ok_or_else(|| {
                    FvError::InvalidMesh(format!(
                        "cyclic patch {} refers to unknown patch {neighbour_name}",
                        patch.name
                    ))
                })?;
                let neighbour = &self.patches[neighbour_index];
                if neighbour.n_faces != patch.n_faces {
                    return Err(FvError::InvalidMesh(format!(
                        "cyclic patches {} and {} differ in size",
                        patch.name, neighbour.name
                    )));
                }
                let tolerance = 1e-6 * self.bounding_box_span();
                for (face, neighbour_face) in patch.face_range().zip(neighbour.face_range()) {
                    let mapped = transform.apply_to_point(all_cf[neighbour_face]);
                    if (mapped - all_cf[face]).norm() > tolerance {
                        return Err(FvError::InvalidMesh(format!(
                            "face {face} of cyclic patch {} does not match its neighbour",
                            patch.name
                        )));
                    }
                }
                neighbour_patch = Some(neighbour_index);
                rotation = transform.rotation();
                Some(
                    neighbour
                        .face_range()
                        .map(|face| transform.apply_to_point(self.cell_centres[self.owner[face]]))
                        .collect::<Vec<_>>(),
                )
            }
            PatchKind::Processor {
                neighbour_cell_centres,
                ..
            } => {
                if neighbour_cell_centres.len() != patch.n_faces {
                    return Err(FvError::size_mismatch(
                        format!("neighbour cell centres of patch {}", patch.name),
                        patch.n_faces,
                        neighbour_cell_centres.len(),
                    ));
                }
                Some(neighbour_cell_centres.clone())
            }
            _ => None,
        };

        let n = face_cells.len();
        let mut delta = nd::Array1::from_elem(n, Vector3::zeros());
        let mut weights = nd::Array1::ones(n);
        let mut delta_coeffs = nd::Array1::zeros(n);
        let mut non_orth_delta_coeffs = nd::Array1::zeros(n);
        let mut corrections = nd::Array1::from_elem(n, Vector3::zeros());
        for face in 0..n {
            if let Some(neighbour_centres) = &neighbour_centres {
                let d = neighbour_centres[face] - own[face];
                let sfd_own = nf[face].dot(&(cf[face] - own[face])).abs();
                let sfd_nei = nf[face].dot(&(neighbour_centres[face] - cf[face])).abs();
                weights[face] = sfd_nei / (sfd_own + sfd_nei);
                delta[face] = d;
                delta_coeffs[face] = 1. / d.norm();
                non_orth_delta_coeffs[face] = 1. / nf[face].dot(&d).max(0.05 * d.norm());
                corrections[face] = nf[face] - d * non_orth_delta_coeffs[face];
            } else {
                let d = cf[face] - own[face];
                let normal_distance = nf[face].dot(&d).max(0.05 * d.norm());
                delta[face] = nf[face] * normal_distance;
                delta_coeffs[face] = 1. / normal_distance;
                non_orth_delta_coeffs[face] = 1. / normal_distance;
            }
        }

        Ok(PatchGeometry {
            face_cells,
            sf,
            mag_sf,
            nf,
            cf,
            delta,
            weights,
            delta_coeffs,
            non_orth_delta_coeffs,
            non_orth_correction_vectors: corrections,
            neighbour_patch,
            rotation,
        })
    }

    fn bounding_box_span(&self) -> Float {
        let (min, max) = self.points.iter().fold(
            (Vector3::repeat(Float::MAX), Vector3::repeat(Float::MIN)),
            |(min, max), point| (min.inf(point), max.sup(point)),
        );
        (max - min).norm()
    }

    /// Directions normal to empty patches are not solved for.
    fn find_solution_directions(&self) -> [bool; 3] {
        let mut empty_area = Vector3::zeros();
        let mut total_area = 0.;
        for patch in self.patches.iter().filter(|patch| patch.kind == PatchKind::Empty) {
            for face in patch.face_range() {
                let sf = face_centre_and_area(&self.points, &self.faces[face]).1;
                empty_area += sf.abs();
                total_area += sf.norm();
            }
        }
        if total_area == 0. {
            return [true; 3];
        }
        let direction = empty_area / total_area;
        [0, 1, 2].map(|d| direction[d] < 1e-6)
    }

    /// Records that this mesh replaced `old` through a topology change.
    ///
    /// `cell_map` gives the old cell each new cell takes its values from and
    /// `patch_face_maps` the old patch face for each new patch face, if any.
    pub fn topo_change(
        mut self,
        old: &Mesh,
        cell_map: Vec<usize>,
        patch_face_maps: Vec<Vec<Option<usize>>>,
    ) -> FvResult<Self> {
        let map = TopoChangeMap::new(old, &self, cell_map, patch_face_maps)?;
        log::info!(
            "Topology change from mesh generation {} to {}",
            map.old_generation(),
            self.generation
        );
        self.topo_change = Some(map);
        Ok(self)
    }

    pub fn topo_change_map(&self) -> Option<&TopoChangeMap> {
        self.topo_change.as_ref()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Fails with `StaleTopology` if `generation` is not this mesh's generation.
    pub fn check_generation(&self, what: &str, generation: u64) -> FvResult<()> {
        if generation == self.generation {
            Ok(())
        } else {
            Err(FvError::StaleTopology {
                what: what.to_owned(),
                expected: generation,
                actual: self.generation,
            })
        }
    }

    pub fn comm(&self) -> &Comm {
        &self.comm
    }

    pub fn n_cells(&self) -> usize {
        self.cells.len()
    }

    pub fn n_faces(&self) -> usize {
        self.faces.len()
    }

    pub fn n_internal_faces(&self) -> usize {
        self.neighbour.len()
    }

    pub fn points(&self) -> &[Vector3] {
        &self.points
    }

    pub fn faces(&self) -> &[Vec<usize>] {
        &self.faces
    }

    /// Owner cell of every face.
    pub fn owner(&self) -> &[usize] {
        &self.owner
    }

    /// Neighbour cell of every internal face.
    pub fn neighbour(&self) -> &[usize] {
        &self.neighbour
    }

    /// Faces of every cell.
    pub fn cells(&self) -> &[Vec<usize>] {
        &self.cells
    }

    pub fn patches(&self) -> &[Patch] {
        &self.patches
    }

    pub fn patch(&self, index: usize) -> &Patch {
        &self.patches[index]
    }

    pub fn find_patch(&self, name: &str) -> Option<usize> {
        self.patches.iter().position(|patch| patch.name == name)
    }

    pub fn patch_geometry(&self, index: usize) -> &PatchGeometry {
        &self.patch_geometry[index]
    }

    pub fn addressing(&self) -> &LduAddressing {
        &self.addressing
    }

    pub fn cell_centres(&self) -> &nd::Array1<Vector3> {
        &self.cell_centres
    }

    pub fn cell_volumes(&self) -> &nd::Array1<Float> {
        &self.cell_volumes
    }

    /// Face area vectors of the internal faces.
    pub fn sf(&self) -> &nd::Array1<Vector3> {
        &self.sf
    }

    pub fn mag_sf(&self) -> &nd::Array1<Float> {
        &self.mag_sf
    }

    /// Face centres of the internal faces.
    pub fn cf(&self) -> &nd::Array1<Vector3> {
        &self.cf
    }

    pub fn weights(&self) -> &nd::Array1<Float> {
        &self.weights
    }

    pub fn delta_coeffs(&self) -> &nd::Array1<Float> {
        &self.delta_coeffs
    }

    pub fn non_orth_delta_coeffs(&self) -> &nd::Array1<Float> {
        &self.non_orth_delta_coeffs
    }

    pub fn non_orth_correction_vectors(&self) -> &nd::Array1<Vector3> {
        &self.non_orth_correction_vectors
    }

    pub fn solution_directions(&self) -> [bool; 3] {
        self.solution_directions
    }

    /// Total volume over all ranks.
    pub fn total_volume(&self) -> Float {
        self.comm.sum(self.cell_volumes.sum())
    }
}

fn face_centre_and_area(points: &[Vector3], vertices: &[usize]) -> (Vector3, Vector3) {
    let p = |i: usize| points[vertices[i % vertices.len()]];
    if vertices.len() == 3 {
        return (
            (p(0) + p(1) + p(2)) / 3.,
            0.5 * (p(1) - p(0)).cross(&(p(2) - p(0))),
        );
    }
    let estimate =
        vertices.iter().map(|&vertex| points[vertex]).sum::<Vector3>() / vertices.len() as Float;
    let mut sum_n = Vector3::zeros();
    let mut sum_a = 0.;
    let mut sum_ac = Vector3::zeros();
    for i in 0..vertices.len() {
        let c = p(i) + p(i + 1) + estimate;
        let n = (p(i + 1) - p(i)).cross(&(estimate - p(i)));
        let a = n.norm();
        sum_n += n;
        sum_a += a;
        sum_ac += c * a;
    }
    let centre = if sum_a < crate::VSMALL {
        estimate
    } else {
        sum_ac / (3. * sum_a)
    };
    (centre, 0.5 * sum_n)
}

/// Decomposes each cell into pyramids on its faces.
fn cell_centres_and_volumes(
    n_cells: usize,
    owner: &[usize],
    neighbour: &[usize],
    cf: &[Vector3],
    sf: &[Vector3],
) -> (nd::Array1<Vector3>, nd::Array1<Float>) {
    let mut estimate = vec![Vector3::zeros(); n_cells];
    let mut n_cell_faces = vec![0usize; n_cells];
    for (face, &cell) in owner.iter().enumerate() {
        estimate[cell] += cf[face];
        n_cell_faces[cell] += 1;
    }
    for (face, &cell) in neighbour.iter().enumerate() {
        estimate[cell] += cf[face];
        n_cell_faces[cell] += 1;
    }
    for (centre, &n) in estimate.iter_mut().zip(&n_cell_faces) {
        *centre /= n.max(1) as Float;
    }

    let mut centres = nd::Array1::from_elem(n_cells, Vector3::zeros());
    let mut volumes = nd::Array1::<Float>::zeros(n_cells);
    let mut add_pyramid = |cell: usize, face: usize, sign: Float| {
        let pyramid_volume = sign * sf[face].dot(&(cf[face] - estimate[cell]));
        let pyramid_centre = 0.75 * cf[face] + 0.25 * estimate[cell];
        centres[cell] += pyramid_centre * pyramid_volume;
        volumes[cell] += pyramid_volume;
    };
    for (face, &cell) in owner.iter().enumerate() {
        add_pyramid(cell, face, 1.);
    }
    for (face, &cell) in neighbour.iter().enumerate() {
        add_pyramid(cell, face, -1.);
    }
    for cell in 0..n_cells {
        if volumes[cell].abs() > crate::VSMALL {
            centres[cell] /= volumes[cell];
        } else {
            centres[cell] = estimate[cell];
        }
        volumes[cell] /= 3.;
    }
    (centres, volumes)
}
