use ndarray as nd;

use super::controls::SmootherKind;
use super::interface::update_interfaces;
use super::preconditioner::{apply_factorisation, dic_reciprocal_diag, dilu_reciprocal_diag};
use super::LduMatrix;
use crate::{Float, FvResult};

/// Stationary iteration used by `smoothSolver` and on every multigrid level.
#[derive(Clone, Debug)]
pub struct Smoother {
    kind: SmootherKind,
    reciprocal_diag: Option<nd::Array1<Float>>,
}

impl Smoother {
    pub fn new(kind: SmootherKind, matrix: &LduMatrix<'_>) -> FvResult<Self> {
        let reciprocal_diag = match kind {
            SmootherKind::Dic | SmootherKind::DICGaussSeidel => Some(dic_reciprocal_diag(matrix)?),
            SmootherKind::Dilu => Some(dilu_reciprocal_diag(matrix)?),
            SmootherKind::GaussSeidel | SmootherKind::SymGaussSeidel => None,
        };
        Ok(Self {
            kind,
            reciprocal_diag,
        })
    }

    pub fn kind(&self) -> SmootherKind {
        self.kind
    }

    pub fn smooth(
        &self,
        matrix: &LduMatrix<'_>,
        psi: &mut nd::Array1<Float>,
        source: &nd::Array1<Float>,
        n_sweeps: usize,
    ) -> FvResult<()> {
        for _ in 0..n_sweeps {
            if let Some(reciprocal_diag) = &self.reciprocal_diag {
                let residual = matrix.residual(psi, source)?;
                *psi += &apply_factorisation(matrix, reciprocal_diag, &residual);
            }
            match self.kind {
                SmootherKind::GaussSeidel | SmootherKind::DICGaussSeidel => {
                    gauss_seidel_sweep(matrix, psi, source, false)?
                }
                SmootherKind::SymGaussSeidel => {
                    gauss_seidel_sweep(matrix, psi, source, false)?;
                    gauss_seidel_sweep(matrix, psi, source, true)?;
                }
                SmootherKind::Dic | SmootherKind::Dilu => {}
            }
        }
        Ok(())
    }
}

/// One Gauss-Seidel pass over the cells, with the coupled interfaces lagged.
fn gauss_seidel_sweep(
    matrix: &LduMatrix<'_>,
    psi: &mut nd::Array1<Float>,
    source: &nd::Array1<Float>,
    reverse: bool,
) -> FvResult<()> {
    let mut interface_part = nd::Array1::zeros(psi.len());
    update_interfaces(matrix.interfaces(), psi, &mut interface_part)?;
    let b_prime = source - &interface_part;

    let addressing = matrix.addressing();
    let (l, u, losort) = (addressing.lower(), addressing.upper(), addressing.losort());
    let (owner_start, losort_start) = (addressing.owner_start(), addressing.losort_start());
    let (diag, upper, lower) = (matrix.diag(), matrix.upper(), matrix.lower());
    let sweep = |cell: usize, psi: &mut nd::Array1<Float>| {
        let mut value = b_prime[cell];
        for face in owner_start[cell]..owner_start[cell + 1] {
            value -= upper[face] * psi[u[face]];
        }
        for &face in &losort[losort_start[cell]..losort_start[cell + 1]] {
            value -= lower[face] * psi[l[face]];
        }
        psi[cell] = value / diag[cell];
    };
    if reverse {
        (0..matrix.n_cells()).rev().for_each(|cell| sweep(cell, psi));
    } else {
        (0..matrix.n_cells()).for_each(|cell| sweep(cell, psi));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::LduAddressing;
    use crate::parallel::Comm;
    use approx::assert_abs_diff_eq;
    use strum::IntoEnumIterator;

    #[test]
    fn test_smoothers_converge_on_diagonally_dominant_system() {
        let addressing = LduAddressing::new(5, vec![0, 1, 2, 3], vec![1, 2, 3, 4]);
        let matrix = LduMatrix::new(
            &addressing,
            &Comm::serial(),
            nd::arr1(&[3., 2.5, 2.5, 2.5, 3.]),
            nd::arr1(&[-1., -1., -1., -1.]),
            None,
        )
        .unwrap();
        let exact = nd::arr1(&[1., -2., 0.5, 3., 1.]);
        let source = matrix.amul(&exact).unwrap();
        for kind in SmootherKind::iter() {
            let smoother = Smoother::new(kind, &matrix).unwrap();
            let mut psi = nd::Array1::zeros(5);
            smoother.smooth(&matrix, &mut psi, &source, 200).unwrap();
            for (a, b) in psi.iter().zip(&exact) {
                assert_abs_diff_eq!(*a, *b, epsilon = 1e-8);
            }
        }
    }
}
