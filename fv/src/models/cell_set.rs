use serde_json::{Map, Value as Json};

use crate::dictionary::{read_string, required};
use crate::{Float, FvError, FvResult, Mesh, Value, Vector3};

/// The cells a model or constraint acts on, selected by `selectionMode`.
#[derive(Clone, Debug, PartialEq)]
pub enum CellSet {
    All,
    /// Cells by index on the local mesh.
    Cells(Vec<usize>),
    /// Cells whose centres lie inside an axis-aligned box.
    Box { min: Vector3, max: Vector3 },
    /// The cell nearest to each point, across all ranks.
    Points(Vec<Vector3>),
}

fn read_vector(entry: &Json, dictionary: &str, key: &str) -> FvResult<Vector3> {
    Vector3::from_json(entry).ok_or_else(|| FvError::invalid(dictionary, key, "expected a vector"))
}

impl CellSet {
    pub fn from_dict(dict: &Map<String, Json>, dictionary: &str) -> FvResult<Self> {
        let mode = read_string(dict, dictionary, "selectionMode")?;
        match mode {
            "all" => Ok(Self::All),
            "cells" => {
                let cells = required(dict, dictionary, "cells")?
                    .as_array()
                    .and_then(|cells| {
                        cells
                            .iter()
                            .map(|cell| cell.as_u64().map(|cell| cell as usize))
                            .collect::<Option<Vec<_>>>()
                    })
                    .ok_or_else(|| FvError::invalid(dictionary, "cells", "expected cell indices"))?;
                Ok(Self::Cells(cells))
            }
            "box" => {
                let corners = required(dict, dictionary, "box")?
                    .as_array()
                    .filter(|corners| corners.len() == 2)
                    .ok_or_else(|| FvError::invalid(dictionary, "box", "expected two corners"))?;
                Ok(Self::Box {
                    min: read_vector(&corners[0], dictionary, "box")?,
                    max: read_vector(&corners[1], dictionary, "box")?,
                })
            }
            "points" => {
                let points = required(dict, dictionary, "points")?
                    .as_array()
                    .ok_or_else(|| FvError::invalid(dictionary, "points", "expected a list"))?
                    .iter()
                    .map(|point| read_vector(point, dictionary, "points"))
                    .collect::<FvResult<Vec<_>>>()?;
                Ok(Self::Points(points))
            }
            _ => Err(FvError::UnknownType {
                kind: "selectionMode",
                name: mode.to_owned(),
                valid: ["all", "cells", "box", "points"].map(str::to_owned).to_vec(),
            }),
        }
    }

    /// The selected cells of the local mesh.
    pub fn cells(&self, mesh: &Mesh) -> FvResult<Vec<usize>> {
        let centres = mesh.cell_centres();
        match self {
            Self::All => Ok((0..mesh.n_cells()).collect()),
            Self::Cells(cells) => {
                if let Some(&cell) = cells.iter().find(|&&cell| cell >= mesh.n_cells()) {
                    return Err(FvError::invalid(
                        "cells",
                        cell.to_string(),
                        format!("mesh has {} cells", mesh.n_cells()),
                    ));
                }
                Ok(cells.clone())
            }
            Self::Box { min, max } => Ok((0..mesh.n_cells())
                .filter(|&cell| {
                    let centre = centres[cell];
                    (0..3).all(|d| centre[d] >= min[d] && centre[d] <= max[d])
                })
                .collect()),
            Self::Points(points) => {
                let mut cells = Vec::new();
                for point in points {
                    let nearest = (0..mesh.n_cells())
                        .map(|cell| (cell, (centres[cell] - point).norm()))
                        .min_by(|a, b| a.1.total_cmp(&b.1));
                    let distance = nearest.map_or(Float::INFINITY, |(_, distance)| distance);
                    let global = mesh.comm().min(distance);
                    if let Some((cell, _)) = nearest.filter(|_| distance == global) {
                        cells.push(cell);
                    }
                }
                Ok(cells)
            }
        }
    }

    /// Total volume of the selected cells on all ranks.
    pub fn volume(&self, mesh: &Mesh) -> FvResult<Float> {
        let volumes = mesh.cell_volumes();
        let local = self.cells(mesh)?.iter().map(|&cell| volumes[cell]).sum();
        Ok(mesh.comm().sum(local))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::BlockMesh;
    use approx::assert_relative_eq;

    #[test]
    fn test_selections() {
        let mesh = BlockMesh::two_dimensional([4, 4], [1., 1.]).build().unwrap();
        let dict = serde_json::json!({"selectionMode": "box", "box": [[0, 0, -1], [0.5, 0.5, 1]]});
        let set = CellSet::from_dict(dict.as_object().unwrap(), "source").unwrap();
        assert_eq!(set.cells(&mesh).unwrap(), vec![0, 1, 4, 5]);
        assert_relative_eq!(set.volume(&mesh).unwrap(), 0.25 * 0.25, max_relative = 1e-12);

        let dict = serde_json::json!({"selectionMode": "points", "points": [[0.9, 0.1, 0.1]]});
        let set = CellSet::from_dict(dict.as_object().unwrap(), "source").unwrap();
        assert_eq!(set.cells(&mesh).unwrap(), vec![3]);

        assert_eq!(CellSet::All.cells(&mesh).unwrap().len(), 16);
        assert!(CellSet::Cells(vec![16]).cells(&mesh).is_err());
        let dict = serde_json::json!({"selectionMode": "cellZone"});
        assert!(matches!(
            CellSet::from_dict(dict.as_object().unwrap(), "source"),
            Err(FvError::UnknownType { .. })
        ));
    }
}
