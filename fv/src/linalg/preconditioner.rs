use ndarray as nd;

use super::controls::{PreconditionerKind, SolverControls};
use super::gamg::GamgHierarchy;
use super::LduMatrix;
use crate::{Float, FvError, FvResult, VSMALL};

fn invert(mut diag: nd::Array1<Float>, what: &str) -> FvResult<nd::Array1<Float>> {
    if let Some(cell) = diag.iter().position(|d| d.abs() < VSMALL || !d.is_finite()) {
        return Err(FvError::Singular(format!(
            "{what} factorisation: zero pivot in row {cell}"
        )));
    }
    diag.mapv_inplace(|d| 1. / d);
    Ok(diag)
}

/// Reciprocal diagonal of the incomplete Cholesky factorisation with no fill-in.
pub fn dic_reciprocal_diag(matrix: &LduMatrix<'_>) -> FvResult<nd::Array1<Float>> {
    let addressing = matrix.addressing();
    let upper = matrix.upper();
    let mut diag = matrix.diag().clone();
    for (face, (&l, &u)) in addressing
        .lower()
        .iter()
        .zip(addressing.upper())
        .enumerate()
    {
        diag[u] -= upper[face] * upper[face] / diag[l];
    }
    invert(diag, "DIC")
}

/// Reciprocal diagonal of the incomplete LU factorisation with no fill-in.
pub fn dilu_reciprocal_diag(matrix: &LduMatrix<'_>) -> FvResult<nd::Array1<Float>> {
    let addressing = matrix.addressing();
    let (upper, lower) = (matrix.upper(), matrix.lower());
    let mut diag = matrix.diag().clone();
    for (face, (&l, &u)) in addressing
        .lower()
        .iter()
        .zip(addressing.upper())
        .enumerate()
    {
        diag[u] -= upper[face] * lower[face] / diag[l];
    }
    invert(diag, "DILU")
}

/// Applies the DIC or DILU factorisation to a residual by forward and backward substitution.
pub(super) fn apply_factorisation(
    matrix: &LduMatrix<'_>,
    reciprocal_diag: &nd::Array1<Float>,
    residual: &nd::Array1<Float>,
) -> nd::Array1<Float> {
    let addressing = matrix.addressing();
    let (l, u, losort) = (addressing.lower(), addressing.upper(), addressing.losort());
    let (upper, lower) = (matrix.upper(), matrix.lower());
    let mut w = reciprocal_diag * residual;
    for &face in losort {
        w[u[face]] -= reciprocal_diag[u[face]] * lower[face] * w[l[face]];
    }
    for face in (0..l.len()).rev() {
        w[l[face]] -= reciprocal_diag[l[face]] * upper[face] * w[u[face]];
    }
    w
}

/// Approximate inverse applied to residuals inside the Krylov solvers.
#[derive(Debug)]
pub enum Preconditioner {
    None,
    Diagonal(nd::Array1<Float>),
    Dic(nd::Array1<Float>),
    Dilu(nd::Array1<Float>),
    Gamg(Box<GamgHierarchy>),
}

impl Preconditioner {
    pub fn new(matrix: &LduMatrix<'_>, controls: &SolverControls) -> FvResult<Self> {
        Ok(match controls.preconditioner {
            PreconditionerKind::None => Self::None,
            PreconditionerKind::Diagonal => {
                Self::Diagonal(invert(matrix.diag().clone(), "diagonal")?)
            }
            PreconditionerKind::Dic => Self::Dic(dic_reciprocal_diag(matrix)?),
            PreconditionerKind::Dilu => Self::Dilu(dilu_reciprocal_diag(matrix)?),
            PreconditionerKind::Gamg => Self::Gamg(Box::new(GamgHierarchy::new(
                matrix,
                controls.smoother,
                &controls.gamg,
            )?)),
        })
    }

    pub fn precondition(
        &self,
        matrix: &LduMatrix<'_>,
        residual: &nd::Array1<Float>,
    ) -> FvResult<nd::Array1<Float>> {
        Ok(match self {
            Self::None => residual.clone(),
            Self::Diagonal(reciprocal_diag) => reciprocal_diag * residual,
            Self::Dic(reciprocal_diag) | Self::Dilu(reciprocal_diag) => {
                apply_factorisation(matrix, reciprocal_diag, residual)
            }
            Self::Gamg(hierarchy) => hierarchy.precondition(matrix, residual)?,
        })
    }
}
