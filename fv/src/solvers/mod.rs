//! Reference solvers assembling and solving complete equation sets with the operators of this
//! crate.

mod diffusion;
mod incompressible;
mod scalar_transport;

use std::path::Path;

pub use diffusion::SteadyDiffusion;
pub use incompressible::IncompressiblePimple;
pub use scalar_transport::ScalarTransport;

use crate::control::{Residuals, SolutionControls, StopFlag, Time};
use crate::linalg::SolverPerformance;
use crate::models::{FvConstraints, FvModels};
use crate::schemes::FvSchemes;
use crate::{Float, FvMatrix, FvResult, Mesh, Value, Vector3, VolField};

/// Everything the assembly of an equation reads besides the fields themselves.
#[derive(Clone, Copy, Debug)]
pub struct SolveContext<'a> {
    pub mesh: &'a Mesh,
    pub schemes: &'a FvSchemes,
    pub solution: &'a SolutionControls,
    pub models: &'a FvModels,
    pub constraints: &'a FvConstraints,
}

/// Under-relaxes `equation` by the factor configured for `psi`, if any.
pub fn relax_equation<T: Value>(
    ctx: &SolveContext<'_>,
    equation: &mut FvMatrix<T>,
    psi: &VolField<T>,
    final_iter: bool,
) -> FvResult<()> {
    match ctx
        .solution
        .equation_relaxation_factor(psi.name(), final_iter)
    {
        Some(alpha) => equation.relax(ctx.mesh, psi, alpha),
        None => Ok(()),
    }
}

/// Applies the constraints, solves with the (`Final`) settings for `psi`, records the
/// performance and constrains the result.
pub fn solve_equation<T: Value>(
    ctx: &SolveContext<'_>,
    equation: &mut FvMatrix<T>,
    psi: &mut VolField<T>,
    final_iter: bool,
    residuals: &mut Residuals,
) -> FvResult<SolverPerformance> {
    ctx.constraints.constrain(ctx.mesh, equation, psi)?;
    let controls = ctx.solution.solver_controls(psi.name(), final_iter)?;
    let performance = equation.solve(ctx.mesh, psi, &controls)?;
    residuals.record(psi.name(), &performance);
    ctx.constraints.constrain_field(ctx.mesh, psi)?;
    Ok(performance)
}

/// A case solver owning its fields.
pub trait Solver {
    fn name(&self) -> &str;

    /// Advances `time` and solves the new step; false once the run is over.
    fn step(&mut self, ctx: &SolveContext<'_>, time: &mut Time, stop: &StopFlag)
        -> FvResult<bool>;

    /// Writes every solved field as `<directory>/<field>.json`.
    fn write(&self, mesh: &Mesh, directory: &Path) -> FvResult<()>;

    /// The solved scalar field called `name`, if there is one.
    fn scalar_field(&self, _name: &str) -> Option<&VolField<Float>> {
        None
    }

    fn vector_field(&self, _name: &str) -> Option<&VolField<Vector3>> {
        None
    }
}

/// Steps `solver` until it is done; returns the number of steps taken.
pub fn run(
    solver: &mut dyn Solver,
    ctx: &SolveContext<'_>,
    time: &mut Time,
    stop: &StopFlag,
) -> FvResult<usize> {
    log::info!("Starting {}", solver.name());
    let mut n_steps = 0;
    while solver.step(ctx, time, stop)? {
        n_steps += 1;
    }
    log::info!("{} finished after {n_steps} steps at time {}", solver.name(), time.value());
    Ok(n_steps)
}

/// Ends a transient run at the end time or on request; otherwise advances `time`.
fn advance_transient(ctx: &SolveContext<'_>, time: &mut Time, stop: &StopFlag) -> bool {
    if !time.run() {
        return false;
    }
    if time.time_index() > 0 && stop.requested(ctx.mesh.comm()) {
        return false;
    }
    time.advance();
    true
}

fn write_field<T: Value>(mesh: &Mesh, field: &VolField<T>, directory: &Path) -> FvResult<()> {
    std::fs::create_dir_all(directory).map_err(|error| crate::FvError::io(directory, error))?;
    field.write_file(mesh, directory.join(format!("{}.json", field.name())))
}
