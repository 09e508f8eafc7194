//! Algebraic multigrid on agglomerated cells.
//!
//! Each coarse level is built by pairing every cell with its most strongly connected neighbour,
//! and its operator is the sum of the fine coefficients over each pair of clusters. Coarse levels
//! only see this rank's cells: processor interfaces are dropped below the finest level and
//! cyclic interfaces become ordinary coarse faces.

use std::collections::BTreeMap;

use ndarray as nd;

use super::controls::{GamgControls, PreconditionerKind, SmootherKind, SolverControls};
use super::interface::LduInterface;
use super::krylov::{keep_going, pbicgstab, pcg};
use super::performance::SolverPerformance;
use super::smoother::Smoother;
use super::LduMatrix;
use crate::mesh::LduAddressing;
use crate::parallel::Comm;
use crate::{Float, FvResult, VSMALL};

const MAX_LEVELS: usize = 50;

/// Coarsest levels whose smallest LU pivot is this small relative to the largest are treated
/// as singular.
const PIVOT_RATIO: Float = 1e-12;

#[derive(Clone, derivative::Derivative)]
#[derivative(Debug)]
struct CoarseLevel {
    /// Cell of this level that each cell of the next finer level belongs to.
    #[derivative(Debug = "ignore")]
    restrict_map: Vec<usize>,
    matrix: LduMatrix<'static>,
    smoother: Smoother,
}

#[derive(Clone, derivative::Derivative)]
#[derivative(Debug)]
enum CoarsestSolver {
    Direct(
        #[derivative(Debug = "ignore")]
        nalgebra::linalg::LU<Float, nalgebra::Dyn, nalgebra::Dyn>,
    ),
    Iterative(SolverControls),
}

/// The agglomeration hierarchy of a matrix with the smoothers of every level.
#[derive(Clone, Debug)]
pub struct GamgHierarchy {
    controls: GamgControls,
    finest_smoother: Smoother,
    levels: Vec<CoarseLevel>,
    coarsest: CoarsestSolver,
}

impl GamgHierarchy {
    pub fn new(
        matrix: &LduMatrix<'_>,
        smoother: SmootherKind,
        controls: &GamgControls,
    ) -> FvResult<Self> {
        let finest_smoother = Smoother::new(smoother, matrix)?;
        let mut levels: Vec<CoarseLevel> = Vec::new();
        while levels.len() < MAX_LEVELS {
            let current: &LduMatrix<'_> = levels.last().map_or(matrix, |level| &level.matrix);
            let n_cells = current.n_cells();
            if !levels.is_empty() && n_cells <= controls.n_cells_in_coarsest_level {
                break;
            }
            let (restrict_map, coarse) = match merge(current, controls.merge_levels, levels.len())?
            {
                Some(merged) => merged,
                // The first coarse level always exists so that every rank runs the same
                // sequence of finest-level operations.
                None if levels.is_empty() => {
                    let identity = (0..n_cells).collect::<Vec<_>>();
                    let coarse = coarsen(current, &identity, n_cells)?;
                    (identity, coarse)
                }
                None => break,
            };
            let level_smoother = Smoother::new(smoother, &coarse)?;
            levels.push(CoarseLevel {
                restrict_map,
                matrix: coarse,
                smoother: level_smoother,
            });
        }
        let coarsest = match levels.last() {
            Some(level) => CoarsestSolver::new(&level.matrix, controls.direct_solve_limit),
            None => CoarsestSolver::new(matrix, 0),
        };
        log::debug!(
            "GAMG agglomeration: {} cells on the finest level, {:?} on the coarse levels",
            matrix.n_cells(),
            levels
                .iter()
                .map(|level| level.matrix.n_cells())
                .collect::<Vec<_>>()
        );
        Ok(Self {
            controls: controls.clone(),
            finest_smoother,
            levels,
            coarsest,
        })
    }

    pub fn n_levels(&self) -> usize {
        self.levels.len() + 1
    }

    pub fn n_cells(&self, level: usize) -> usize {
        self.levels[level - 1].matrix.n_cells()
    }

    /// Approximates `A⁻¹·residual` by `nVcycles` cycles starting from zero.
    pub fn precondition(
        &self,
        matrix: &LduMatrix<'_>,
        residual: &nd::Array1<Float>,
    ) -> FvResult<nd::Array1<Float>> {
        let mut psi = self.v_cycle(matrix, residual)?;
        for _ in 1..self.controls.n_vcycles {
            let remaining = matrix.residual(&psi, residual)?;
            psi += &self.v_cycle(matrix, &remaining)?;
        }
        Ok(psi)
    }

    /// One V-cycle for the correction `e` solving `A·e = residual`.
    pub fn v_cycle(
        &self,
        matrix: &LduMatrix<'_>,
        residual: &nd::Array1<Float>,
    ) -> FvResult<nd::Array1<Float>> {
        self.cycle(matrix, &self.finest_smoother, 0, residual)
    }

    fn cycle(
        &self,
        matrix: &LduMatrix<'_>,
        smoother: &Smoother,
        level: usize,
        residual: &nd::Array1<Float>,
    ) -> FvResult<nd::Array1<Float>> {
        let Some(coarse) = self.levels.get(level) else {
            return self.coarsest.solve(matrix, residual);
        };
        let mut correction = nd::Array1::zeros(matrix.n_cells());
        let n_post_sweeps = if level == 0 {
            self.controls.n_finest_sweeps
        } else {
            self.controls.n_post_sweeps
        };

        let remaining = if self.controls.n_pre_sweeps > 0 {
            smoother.smooth(matrix, &mut correction, residual, self.controls.n_pre_sweeps)?;
            matrix.residual(&correction, residual)?
        } else {
            residual.clone()
        };
        let coarse_residual = restrict(
            &coarse.restrict_map,
            coarse.matrix.n_cells(),
            &remaining,
        );
        let coarse_correction =
            self.cycle(&coarse.matrix, &coarse.smoother, level + 1, &coarse_residual)?;
        let mut prolonged = coarse
            .restrict_map
            .iter()
            .map(|&cell| coarse_correction[cell])
            .collect::<nd::Array1<Float>>();
        if matrix.is_symmetric() {
            scale_correction(matrix, &mut prolonged, &remaining)?;
        }
        correction += &prolonged;
        smoother.smooth(matrix, &mut correction, residual, n_post_sweeps)?;
        Ok(correction)
    }
}

/// Scales a prolonged correction to minimise the energy norm of the error along it.
fn scale_correction(
    matrix: &LduMatrix<'_>,
    correction: &mut nd::Array1<Float>,
    residual: &nd::Array1<Float>,
) -> FvResult<()> {
    let a_correction = matrix.amul(correction)?;
    let sums = matrix.comm().sum_many(&[
        correction.dot(residual),
        correction.dot(&a_correction),
    ]);
    if sums[1].abs() > VSMALL {
        *correction *= sums[0] / sums[1];
    }
    Ok(())
}

fn restrict(map: &[usize], n_coarse: usize, fine: &nd::Array1<Float>) -> nd::Array1<Float> {
    let mut coarse = nd::Array1::zeros(n_coarse);
    for (&cell, &value) in map.iter().zip(fine) {
        coarse[cell] += value;
    }
    coarse
}

/// Runs `merge_levels` passes of pairwise agglomeration, composing the cell maps. `None` when
/// the first pass cannot reduce the number of cells.
fn merge(
    matrix: &LduMatrix<'_>,
    merge_levels: usize,
    level: usize,
) -> FvResult<Option<(Vec<usize>, LduMatrix<'static>)>> {
    let mut map = (0..matrix.n_cells()).collect::<Vec<_>>();
    let mut coarse: Option<LduMatrix<'static>> = None;
    for pass in 0..merge_levels {
        let source: &LduMatrix<'_> = coarse.as_ref().unwrap_or(matrix);
        let (pass_map, n_coarse) = agglomerate(source, (level + pass) % 2 == 1);
        if n_coarse == source.n_cells() {
            break;
        }
        for cell in map.iter_mut() {
            *cell = pass_map[*cell];
        }
        let next = coarsen(source, &pass_map, n_coarse)?;
        coarse = Some(next);
    }
    Ok(coarse.map(|coarse| (map, coarse)))
}

/// Pairs each cell with its unpaired neighbour of largest coefficient magnitude. Cells with no
/// unpaired neighbour join their strongest neighbour's cluster, or stay alone if isolated.
fn agglomerate(matrix: &LduMatrix<'_>, reverse: bool) -> (Vec<usize>, usize) {
    let addressing = matrix.addressing();
    let (l, u, losort) = (addressing.lower(), addressing.upper(), addressing.losort());
    let (owner_start, losort_start) = (addressing.owner_start(), addressing.losort_start());
    let (upper, lower) = (matrix.upper(), matrix.lower());
    let weight = |face: usize| upper[face].abs().max(lower[face].abs());

    let n_cells = matrix.n_cells();
    let mut coarse_cell: Vec<Option<usize>> = vec![None; n_cells];
    let mut n_coarse = 0;
    let order: Box<dyn Iterator<Item = usize>> = if reverse {
        Box::new((0..n_cells).rev())
    } else {
        Box::new(0..n_cells)
    };
    for cell in order {
        if coarse_cell[cell].is_some() {
            continue;
        }
        let neighbours = (owner_start[cell]..owner_start[cell + 1])
            .map(|face| (u[face], weight(face)))
            .chain(
                losort[losort_start[cell]..losort_start[cell + 1]]
                    .iter()
                    .map(|&face| (l[face], weight(face))),
            );
        let mut free: Option<(usize, Float)> = None;
        let mut taken: Option<(usize, Float)> = None;
        for (neighbour, weight) in neighbours {
            let best = if coarse_cell[neighbour].is_none() {
                &mut free
            } else {
                &mut taken
            };
            match best {
                Some((_, best_weight)) if weight <= *best_weight => {}
                _ => *best = Some((neighbour, weight)),
            }
        }
        match (free, taken) {
            (Some((neighbour, _)), _) => {
                coarse_cell[cell] = Some(n_coarse);
                coarse_cell[neighbour] = Some(n_coarse);
                n_coarse += 1;
            }
            (None, Some((neighbour, _))) => coarse_cell[cell] = coarse_cell[neighbour],
            (None, None) => {
                coarse_cell[cell] = Some(n_coarse);
                n_coarse += 1;
            }
        }
    }
    let map = coarse_cell
        .into_iter()
        .map(|cell| cell.unwrap_or_default())
        .collect();
    (map, n_coarse)
}

/// The operator on the clusters of `map`: coefficients summed over fine faces between each pair
/// of clusters, and faces inside a cluster added to its diagonal.
fn coarsen(
    matrix: &LduMatrix<'_>,
    map: &[usize],
    n_coarse: usize,
) -> FvResult<LduMatrix<'static>> {
    let mut diag = nd::Array1::zeros(n_coarse);
    for (&cell, &value) in map.iter().zip(matrix.diag()) {
        diag[cell] += value;
    }
    let mut faces: BTreeMap<(usize, usize), (Float, Float)> = BTreeMap::new();
    let mut add = |row: usize, column: usize, value: Float| {
        let (row, column) = (map[row], map[column]);
        if row == column {
            diag[row] += value;
        } else if row < column {
            faces.entry((row, column)).or_default().0 += value;
        } else {
            faces.entry((column, row)).or_default().1 += value;
        }
    };

    let addressing = matrix.addressing();
    let (upper, lower) = (matrix.upper(), matrix.lower());
    for (face, (&l, &u)) in addressing
        .lower()
        .iter()
        .zip(addressing.upper())
        .enumerate()
    {
        add(l, u, upper[face]);
        add(u, l, lower[face]);
    }
    for coupled in matrix.interfaces() {
        if let LduInterface::Cyclic {
            face_cells,
            neighbour_cells,
            scale,
        } = &coupled.interface
        {
            for ((&cell, &neighbour), &coeff) in
                face_cells.iter().zip(*neighbour_cells).zip(&coupled.coeffs)
            {
                add(cell, neighbour, -coeff * scale);
            }
        }
    }

    let symmetric = faces.values().all(|(upper, lower)| upper == lower);
    let (coarse_lower, coarse_upper): (Vec<_>, Vec<_>) = faces.keys().copied().unzip();
    let upper = faces.values().map(|&(upper, _)| upper).collect();
    let lower = (!symmetric).then(|| faces.values().map(|&(_, lower)| lower).collect());
    LduMatrix::owned(
        LduAddressing::new(n_coarse, coarse_lower, coarse_upper),
        &Comm::serial(),
        diag,
        upper,
        lower,
    )
}

impl CoarsestSolver {
    fn new(matrix: &LduMatrix<'_>, direct_solve_limit: usize) -> Self {
        let n_cells = matrix.n_cells();
        if n_cells > 0 && n_cells <= direct_solve_limit && matrix.interfaces().is_empty() {
            let lu = dense(matrix).lu();
            let pivots = lu.u().diagonal().map(Float::abs);
            if pivots.min() > PIVOT_RATIO * pivots.max() {
                return Self::Direct(lu);
            }
            log::debug!("Coarsest GAMG level is singular, solving it iteratively");
        }
        let preconditioner = if matrix.is_symmetric() {
            PreconditionerKind::Dic
        } else {
            PreconditionerKind::Dilu
        };
        Self::Iterative(
            SolverControls::default()
                .with_preconditioner(preconditioner)
                .with_tolerance(1e-15)
                .with_rel_tol(1e-3)
                .with_max_iter(n_cells.max(10)),
        )
    }

    fn solve(
        &self,
        matrix: &LduMatrix<'_>,
        residual: &nd::Array1<Float>,
    ) -> FvResult<nd::Array1<Float>> {
        match self {
            Self::Direct(lu) => {
                let rhs = nalgebra::DVector::from_iterator(residual.len(), residual.iter().copied());
                let solution = lu.solve(&rhs).ok_or_else(|| {
                    crate::FvError::Singular("coarsest GAMG level".to_owned())
                })?;
                Ok(solution.iter().copied().collect())
            }
            Self::Iterative(controls) => {
                let mut psi = nd::Array1::zeros(residual.len());
                if matrix.is_symmetric() {
                    pcg(matrix, &mut psi, residual, controls, "coarsest")?;
                } else {
                    pbicgstab(matrix, &mut psi, residual, controls, "coarsest")?;
                }
                Ok(psi)
            }
        }
    }
}

fn dense(matrix: &LduMatrix<'_>) -> nalgebra::DMatrix<Float> {
    let n_cells = matrix.n_cells();
    let mut dense = nalgebra::DMatrix::zeros(n_cells, n_cells);
    for (cell, &value) in matrix.diag().iter().enumerate() {
        dense[(cell, cell)] = value;
    }
    let addressing = matrix.addressing();
    let (upper, lower) = (matrix.upper(), matrix.lower());
    for (face, (&l, &u)) in addressing
        .lower()
        .iter()
        .zip(addressing.upper())
        .enumerate()
    {
        dense[(l, u)] += upper[face];
        dense[(u, l)] += lower[face];
    }
    dense
}

/// Solves by repeated V-cycles on the residual.
pub fn gamg(
    matrix: &LduMatrix<'_>,
    psi: &mut nd::Array1<Float>,
    source: &nd::Array1<Float>,
    controls: &SolverControls,
    field: &str,
) -> FvResult<SolverPerformance> {
    let mut performance = SolverPerformance::new("GAMG", field);
    let a_psi = matrix.amul(psi)?;
    let mut residual = source - &a_psi;
    let norm_factor = matrix.norm_factor(psi, source, &a_psi);
    performance.initial_residual = matrix.g_sum_mag(&residual) / norm_factor;
    performance.final_residual = performance.initial_residual;
    if !keep_going(&mut performance, controls) {
        return Ok(performance);
    }

    let hierarchy = GamgHierarchy::new(matrix, controls.smoother, &controls.gamg)?;
    loop {
        *psi += &hierarchy.v_cycle(matrix, &residual)?;
        residual = matrix.residual(psi, source)?;
        performance.final_residual = matrix.g_sum_mag(&residual) / norm_factor;
        performance.n_iterations += 1;
        if !keep_going(&mut performance, controls) {
            break;
        }
    }
    Ok(performance)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::controls::SolverKind;
    use crate::test_util::{assert_all_close, grid_addressing, grid_matrix};

    #[test]
    fn test_pairwise_agglomeration() {
        let addressing = LduAddressing::new(6, vec![0, 1, 2, 3, 4], vec![1, 2, 3, 4, 5]);
        let matrix = LduMatrix::new(
            &addressing,
            &Comm::serial(),
            nd::Array1::from_elem(6, 2.),
            nd::arr1(&[-1., -1., -1., -1., -1.]),
            None,
        )
        .unwrap();
        let (map, n_coarse) = agglomerate(&matrix, false);
        assert_eq!(map, vec![0, 0, 1, 1, 2, 2]);
        assert_eq!(n_coarse, 3);

        // Cell 0 pairs with its strongly connected neighbour, leaving 1 to pair with 3.
        let addressing = LduAddressing::new(4, vec![0, 0, 1], vec![1, 2, 3]);
        let strong = LduMatrix::new(
            &addressing,
            &Comm::serial(),
            nd::Array1::from_elem(4, 20.),
            nd::arr1(&[-1., -10., -1.]),
            None,
        )
        .unwrap();
        let (map, n_coarse) = agglomerate(&strong, false);
        assert_eq!(map, vec![0, 1, 0, 1]);
        assert_eq!(n_coarse, 2);
    }

    #[test]
    fn test_coarse_operator_is_galerkin_product() {
        let addressing = grid_addressing(4);
        let matrix = grid_matrix(&addressing, Some(-0.5));
        let (map, n_coarse) = agglomerate(&matrix, false);
        let coarse = coarsen(&matrix, &map, n_coarse).unwrap();

        let coarse_psi = nd::Array1::from_shape_fn(n_coarse, |cell| 1. + cell as Float);
        let fine_psi = map
            .iter()
            .map(|&cell| coarse_psi[cell])
            .collect::<nd::Array1<Float>>();
        let expected = restrict(&map, n_coarse, &matrix.amul(&fine_psi).unwrap());
        assert_all_close(&coarse.amul(&coarse_psi).unwrap(), &expected).abs_tol(Some(1e-12));
    }

    #[test]
    fn test_hierarchy() {
        let addressing = grid_addressing(16);
        let matrix = grid_matrix(&addressing, None);
        let hierarchy =
            GamgHierarchy::new(&matrix, SmootherKind::GaussSeidel, &GamgControls::default())
                .unwrap();
        assert!(hierarchy.n_levels() > 2);
        for level in 1..hierarchy.n_levels() - 1 {
            assert!(hierarchy.n_cells(level + 1) < hierarchy.n_cells(level));
        }
        assert!(hierarchy.n_cells(hierarchy.n_levels() - 1) <= 10);
        assert!(matches!(hierarchy.coarsest, CoarsestSolver::Direct(_)));
    }

    #[test]
    fn test_gamg_matches_pcg() {
        let addressing = grid_addressing(12);
        let matrix = grid_matrix(&addressing, None);
        let source = nd::Array1::from_shape_fn(144, |cell| ((cell % 7) as Float - 3.) * 0.5);

        let pcg_controls = SolverControls::default()
            .with_preconditioner(PreconditionerKind::Diagonal)
            .with_tolerance(1e-10);
        let mut pcg_psi = nd::Array1::zeros(144);
        let performance = pcg(&matrix, &mut pcg_psi, &source, &pcg_controls, "p").unwrap();
        assert!(performance.converged);

        let gamg_controls = SolverControls::default()
            .with_solver(SolverKind::Gamg)
            .with_tolerance(1e-10);
        let mut gamg_psi = nd::Array1::zeros(144);
        let performance = gamg(&matrix, &mut gamg_psi, &source, &gamg_controls, "p").unwrap();
        assert!(performance.converged);
        assert_eq!(performance.solver, "GAMG");
        assert_all_close(&gamg_psi, &pcg_psi).abs_tol(Some(1e-7));
    }

    #[test]
    fn test_gamg_preconditioned_cg() {
        let addressing = grid_addressing(10);
        let matrix = grid_matrix(&addressing, None);
        let exact = nd::Array1::from_shape_fn(100, |cell| (cell as Float * 0.1).cos());
        let source = matrix.amul(&exact).unwrap();
        let controls = SolverControls::default()
            .with_preconditioner(PreconditionerKind::Gamg)
            .with_tolerance(1e-11);
        let mut psi = nd::Array1::zeros(100);
        let performance = pcg(&matrix, &mut psi, &source, &controls, "p").unwrap();
        assert!(performance.converged);
        assert_eq!(performance.solver, "GAMGPCG");
        assert_all_close(&psi, &exact).abs_tol(Some(1e-8));
    }
}
