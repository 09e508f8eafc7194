//! Scalar sparse matrices in face (LDU) addressing and the iterative solvers for them.

mod controls;
mod gamg;
mod interface;
mod krylov;
mod ldu_matrix;
mod performance;
mod preconditioner;
mod smoother;

use ndarray as nd;

pub use controls::{
    parse_kind, GamgControls, PreconditionerKind, SmootherKind, SolverControls, SolverKind,
};
pub use gamg::{gamg, GamgHierarchy};
pub use interface::{update_interfaces, CoupledInterface, LduInterface};
pub use krylov::{pbicgstab, pcg};
pub use ldu_matrix::LduMatrix;
pub use performance::SolverPerformance;
pub use preconditioner::{dic_reciprocal_diag, dilu_reciprocal_diag, Preconditioner};
pub use smoother::Smoother;

use crate::{Float, FvResult};

/// Solves `matrix·psi = source` with the solver selected by `controls`, starting from `psi`.
///
/// Non-convergence is logged and reported in the returned performance; it is only an error
/// when the controls ask for `fatalOnNonConvergence`.
pub fn solve(
    matrix: &LduMatrix<'_>,
    psi: &mut nd::Array1<Float>,
    source: &nd::Array1<Float>,
    controls: &SolverControls,
    field: &str,
) -> FvResult<SolverPerformance> {
    let performance = match controls.solver {
        SolverKind::Pcg => pcg(matrix, psi, source, controls, field)?,
        SolverKind::PBiCGStab => pbicgstab(matrix, psi, source, controls, field)?,
        SolverKind::SmoothSolver => smooth_solver(matrix, psi, source, controls, field)?,
        SolverKind::Gamg => gamg(matrix, psi, source, controls, field)?,
        SolverKind::Diagonal => diagonal(matrix, psi, source, field)?,
    };
    log::info!("{performance}");
    if !performance.converged {
        log::warn!(
            "{} did not converge for {} in {} iterations",
            performance.solver,
            field,
            performance.n_iterations
        );
    }
    if controls.fatal_on_non_convergence {
        performance.require_converged()?;
    }
    Ok(performance)
}

/// Repeats `nSweeps` sweeps of the smoother until converged.
pub fn smooth_solver(
    matrix: &LduMatrix<'_>,
    psi: &mut nd::Array1<Float>,
    source: &nd::Array1<Float>,
    controls: &SolverControls,
    field: &str,
) -> FvResult<SolverPerformance> {
    let mut performance = SolverPerformance::new("smoothSolver", field);
    let a_psi = matrix.amul(psi)?;
    let norm_factor = matrix.norm_factor(psi, source, &a_psi);
    performance.initial_residual = matrix.g_sum_mag(&(source - &a_psi)) / norm_factor;
    performance.final_residual = performance.initial_residual;
    if !krylov::keep_going(&mut performance, controls) {
        return Ok(performance);
    }

    let smoother = Smoother::new(controls.smoother, matrix)?;
    let n_sweeps = controls.n_sweeps.max(1);
    loop {
        smoother.smooth(matrix, psi, source, n_sweeps)?;
        performance.final_residual =
            matrix.g_sum_mag(&matrix.residual(psi, source)?) / norm_factor;
        performance.n_iterations += n_sweeps;
        if !krylov::keep_going(&mut performance, controls) {
            break;
        }
    }
    Ok(performance)
}

/// Exact solution of a matrix that has only a diagonal.
pub fn diagonal(
    matrix: &LduMatrix<'_>,
    psi: &mut nd::Array1<Float>,
    source: &nd::Array1<Float>,
    field: &str,
) -> FvResult<SolverPerformance> {
    nd::Zip::from(psi)
        .and(source)
        .and(matrix.diag())
        .for_each(|psi, &source, &diag| *psi = source / diag);
    let mut performance = SolverPerformance::new("diagonal", field);
    performance.converged = true;
    Ok(performance)
}
