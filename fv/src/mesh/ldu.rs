use itertools::Itertools;

/// Lower/upper addressing of the internal faces of a mesh or a coarse agglomeration level.
///
/// Faces are in upper-triangular order: sorted by `lower`, then by `upper`. `losort` lists the
/// faces sorted by `upper` so that both sides of every cell can be walked without searching.
#[derive(Clone, Debug, Default)]
pub struct LduAddressing {
    n_cells: usize,
    lower: Vec<usize>,
    upper: Vec<usize>,
    losort: Vec<usize>,
    owner_start: Vec<usize>,
    losort_start: Vec<usize>,
}

impl LduAddressing {
    pub fn new(n_cells: usize, lower: Vec<usize>, upper: Vec<usize>) -> Self {
        assert_eq!(lower.len(), upper.len());

        let losort = (0..upper.len())
            .sorted_by_key(|&face| upper[face])
            .collect::<Vec<_>>();
        let owner_start = start_addressing(n_cells, lower.iter().copied());
        let losort_start = start_addressing(n_cells, losort.iter().map(|&face| upper[face]));

        Self {
            n_cells,
            lower,
            upper,
            losort,
            owner_start,
            losort_start,
        }
    }

    pub fn size(&self) -> usize {
        self.n_cells
    }

    pub fn n_faces(&self) -> usize {
        self.lower.len()
    }

    pub fn lower(&self) -> &[usize] {
        &self.lower
    }

    pub fn upper(&self) -> &[usize] {
        &self.upper
    }

    pub fn losort(&self) -> &[usize] {
        &self.losort
    }

    /// Start of the faces owned by each cell, with a trailing end marker.
    pub fn owner_start(&self) -> &[usize] {
        &self.owner_start
    }

    /// Start into `losort` of the faces neighbouring each cell, with a trailing end marker.
    pub fn losort_start(&self) -> &[usize] {
        &self.losort_start
    }
}

/// Prefix sums of a sorted list of cell indices.
fn start_addressing(n_cells: usize, sorted_cells: impl Iterator<Item = usize>) -> Vec<usize> {
    let mut start = vec![0; n_cells + 1];
    for cell in sorted_cells {
        start[cell + 1] += 1;
    }
    for cell in 0..n_cells {
        start[cell + 1] += start[cell];
    }
    start
}
