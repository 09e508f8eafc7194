use ndarray as nd;

use super::Mesh;
use crate::{FvError, FvResult, Value};

/// How cells and patch faces of a new mesh derive from those of the mesh it replaced.
#[derive(Clone, Debug)]
pub struct TopoChangeMap {
    old_generation: u64,
    cell_map: Vec<usize>,
    patch_face_maps: Vec<Vec<Option<usize>>>,
}

impl TopoChangeMap {
    pub(super) fn new(
        old: &Mesh,
        new: &Mesh,
        cell_map: Vec<usize>,
        patch_face_maps: Vec<Vec<Option<usize>>>,
    ) -> FvResult<Self> {
        if cell_map.len() != new.n_cells() {
            return Err(FvError::size_mismatch(
                "cell map",
                new.n_cells(),
                cell_map.len(),
            ));
        }
        if let Some(&cell) = cell_map.iter().find(|&&cell| cell >= old.n_cells()) {
            return Err(FvError::InvalidMesh(format!(
                "cell map refers to cell {cell} beyond the old mesh"
            )));
        }
        if patch_face_maps.len() != new.patches().len() {
            return Err(FvError::size_mismatch(
                "patch face maps",
                new.patches().len(),
                patch_face_maps.len(),
            ));
        }
        for (patch, map) in new.patches().iter().zip(&patch_face_maps) {
            if map.len() != patch.size() {
                return Err(FvError::size_mismatch(
                    format!("face map of patch {}", patch.name()),
                    patch.size(),
                    map.len(),
                ));
            }
        }
        Ok(Self {
            old_generation: old.generation(),
            cell_map,
            patch_face_maps,
        })
    }

    pub fn old_generation(&self) -> u64 {
        self.old_generation
    }

    pub fn cell_map(&self) -> &[usize] {
        &self.cell_map
    }

    pub fn patch_face_map(&self, patch: usize) -> &[Option<usize>] {
        &self.patch_face_maps[patch]
    }

    pub fn map_cells<T: Value>(&self, old: &nd::Array1<T>) -> nd::Array1<T> {
        self.cell_map.iter().map(|&cell| old[cell]).collect()
    }
}

/// Gathers `old[map[i]]`, or `fallback[i]` where a new entry has no source.
pub fn map_or_fallback<T: Value>(
    old: &nd::Array1<T>,
    map: &[Option<usize>],
    fallback: &nd::Array1<T>,
) -> nd::Array1<T> {
    map.iter()
        .zip(fallback)
        .map(|(source, &fallback)| source.map_or(fallback, |source| old[source]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Float;

    #[test]
    fn test_refinement_map() {
        let coarse = Mesh::line(2, 2.).unwrap();
        let fine = Mesh::line(4, 2.).unwrap();
        let patch_maps = fine
            .patches()
            .iter()
            .map(|patch| (0..patch.size()).map(Some).collect())
            .collect();
        let fine = fine.topo_change(&coarse, vec![0, 0, 1, 1], patch_maps).unwrap();
        let map = fine.topo_change_map().unwrap();
        assert_eq!(map.old_generation(), coarse.generation());
        let mapped = map.map_cells(&nd::arr1(&[1., 3.]));
        assert_eq!(mapped, nd::arr1(&[1., 1., 3., 3.]));

        let fallback: nd::Array1<Float> = nd::arr1(&[7., 8.]);
        let values = map_or_fallback(&nd::arr1(&[5.]), &[None, Some(0)], &fallback);
        assert_eq!(values, nd::arr1(&[7., 5.]));
    }

    #[test]
    fn test_rejects_bad_cell_map() {
        let coarse = Mesh::line(2, 2.).unwrap();
        let fine = Mesh::line(4, 2.).unwrap();
        let result = fine.topo_change(&coarse, vec![0, 1, 2, 3], vec![vec![], vec![], vec![]]);
        assert!(result.is_err());
    }
}
