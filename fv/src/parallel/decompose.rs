use std::collections::BTreeSet;

use itertools::Itertools;
use ndarray as nd;

use crate::mesh::{Patch, PatchKind};
use crate::{Float, FvError, FvResult, Mesh, Value};

/// The part of a mesh assigned to one rank.
#[derive(Clone, Debug)]
pub struct SubDomain {
    pub rank: usize,
    pub mesh: Mesh,
    /// Global cell of each local cell.
    pub cell_addressing: Vec<usize>,
    /// For each local patch, the global patch it came from, or `None` for processor patches.
    pub patch_addressing: Vec<Option<usize>>,
    /// For each local patch, the face of the global patch each local face came from.
    pub patch_face_addressing: Vec<Vec<Option<usize>>>,
}

impl SubDomain {
    /// Picks this rank's cells out of a field on the undecomposed mesh.
    pub fn restrict<T: Value>(&self, global: &nd::Array1<T>) -> FvResult<nd::Array1<T>> {
        self.cell_addressing
            .iter()
            .map(|&cell| {
                global.get(cell).copied().ok_or_else(|| {
                    FvError::size_mismatch("undecomposed field", cell + 1, global.len())
                })
            })
            .collect()
    }
}

/// Splits `mesh` into `n_ranks` slabs of equal cell count along `axis`.
///
/// Faces between slabs become processor patches. Cyclic pairs must not straddle slabs.
pub fn decompose(mesh: &Mesh, n_ranks: usize, axis: usize) -> FvResult<Vec<SubDomain>> {
    let n_cells = mesh.n_cells();
    if n_ranks == 0 || n_ranks > n_cells {
        return Err(FvError::invalid(
            "decomposition",
            "numberOfSubdomains",
            format!("{n_ranks} subdomains for {n_cells} cells"),
        ));
    }
    let centres = mesh.cell_centres();
    let mut cell_rank = vec![0; n_cells];
    for (position, cell) in (0..n_cells)
        .sorted_by(|&a, &b| {
            centres[a][axis]
                .partial_cmp(&centres[b][axis])
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.cmp(&b))
        })
        .enumerate()
    {
        cell_rank[cell] = position * n_ranks / n_cells;
    }
    log::info!("Decomposing {n_cells} cells into {n_ranks} slabs along axis {axis}");
    (0..n_ranks)
        .map(|rank| sub_domain(mesh, &cell_rank, rank, n_ranks))
        .collect()
}

fn sub_domain(
    mesh: &Mesh,
    cell_rank: &[usize],
    rank: usize,
    n_ranks: usize,
) -> FvResult<SubDomain> {
    let cell_addressing = (0..mesh.n_cells())
        .filter(|&cell| cell_rank[cell] == rank)
        .collect::<Vec<_>>();
    let mut local_cell = vec![None; mesh.n_cells()];
    for (local, &global) in cell_addressing.iter().enumerate() {
        local_cell[global] = Some(local);
    }
    let mut local_point = vec![None; mesh.points().len()];
    let mut points = Vec::new();
    let mut local_face = |vertices: &[usize], flip: bool| -> Vec<usize> {
        let mut face = vertices
            .iter()
            .map(|&vertex| {
                *local_point[vertex].get_or_insert_with(|| {
                    points.push(mesh.points()[vertex]);
                    points.len() - 1
                })
            })
            .collect::<Vec<_>>();
        if flip {
            face.reverse();
        }
        face
    };

    let mut faces = Vec::new();
    let mut owner = Vec::new();
    let mut neighbour = Vec::new();
    for face in 0..mesh.n_internal_faces() {
        if let (Some(own), Some(nei)) = (
            local_cell[mesh.owner()[face]],
            local_cell[mesh.neighbour()[face]],
        ) {
            faces.push(local_face(&mesh.faces()[face], false));
            owner.push(own);
            neighbour.push(nei);
        }
    }

    let mut patches = Vec::new();
    let mut patch_addressing = Vec::new();
    let mut patch_face_addressing = Vec::new();
    let mut selected = Vec::new();
    for patch in mesh.patches() {
        let start = faces.len();
        let mut face_map = Vec::new();
        let mut kept = BTreeSet::new();
        for (patch_face, face) in patch.face_range().enumerate() {
            if let Some(own) = local_cell[mesh.owner()[face]] {
                faces.push(local_face(&mesh.faces()[face], false));
                owner.push(own);
                kept.insert(patch_face);
                if patch.size() > 0 {
                    face_map.push(Some(patch_face));
                }
            }
        }
        patches.push(Patch::new(
            patch.name(),
            patch.kind().clone(),
            start,
            faces.len() - start,
        ));
        patch_addressing.push(Some(patch.index()));
        patch_face_addressing.push(face_map);
        selected.push(kept);
    }
    for patch in mesh.patches() {
        if let Some(neighbour_patch) = mesh.patch_geometry(patch.index()).neighbour_patch {
            if selected[patch.index()] != selected[neighbour_patch] {
                return Err(FvError::InvalidMesh(format!(
                    "cyclic patch {} would be split across subdomains",
                    patch.name()
                )));
            }
        }
    }

    let centres = mesh.cell_centres();
    for other in (0..n_ranks).filter(|&other| other != rank) {
        let start = faces.len();
        let mut neighbour_cell_centres = Vec::new();
        for face in 0..mesh.n_internal_faces() {
            let (global_owner, global_neighbour) = (mesh.owner()[face], mesh.neighbour()[face]);
            let (mine, theirs, flip) = if cell_rank[global_owner] == rank
                && cell_rank[global_neighbour] == other
            {
                (global_owner, global_neighbour, false)
            } else if cell_rank[global_owner] == other && cell_rank[global_neighbour] == rank {
                (global_neighbour, global_owner, true)
            } else {
                continue;
            };
            faces.push(local_face(&mesh.faces()[face], flip));
            owner.push(local_cell[mine].unwrap_or_default());
            neighbour_cell_centres.push(centres[theirs]);
        }
        if faces.len() > start {
            let n_faces = faces.len() - start;
            patches.push(Patch::new(
                format!("procBoundary{rank}to{other}"),
                PatchKind::Processor {
                    neighb_rank: other,
                    tag: 0,
                    neighbour_cell_centres,
                },
                start,
                n_faces,
            ));
            patch_addressing.push(None);
            patch_face_addressing.push(vec![None; n_faces]);
        }
    }

    let mesh = Mesh::new(points, faces, owner, neighbour, patches)?;
    Ok(SubDomain {
        rank,
        mesh,
        cell_addressing,
        patch_addressing,
        patch_face_addressing,
    })
}

/// Assembles per-rank cell values into a field on the undecomposed mesh.
pub fn reconstruct<T: Value>(
    n_cells: usize,
    sub_domains: &[SubDomain],
    pieces: &[nd::Array1<T>],
) -> FvResult<nd::Array1<T>> {
    let mut result = nd::Array1::from_elem(n_cells, T::zero());
    for (sub_domain, piece) in sub_domains.iter().zip(pieces) {
        if piece.len() != sub_domain.cell_addressing.len() {
            return Err(FvError::size_mismatch(
                format!("field on rank {}", sub_domain.rank),
                sub_domain.cell_addressing.len(),
                piece.len(),
            ));
        }
        for (&global, &value) in sub_domain.cell_addressing.iter().zip(piece) {
            result[global] = value;
        }
    }
    Ok(result)
}
