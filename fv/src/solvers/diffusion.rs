use std::path::Path;

use super::{relax_equation, solve_equation, write_field, SolveContext, Solver};
use crate::control::{Residuals, SimpleControl, SolutionControls, StopFlag, Time};
use crate::fvm::{self, Diffusivity};
use crate::{Dimensioned, Float, FvResult, Mesh, VolField};

/// Steady diffusion `-laplacian(D, T) == sources`, iterated until the residual control of the
/// `SIMPLE` settings is met.
#[derive(Debug)]
pub struct SteadyDiffusion {
    t: VolField<Float>,
    diffusivity: Dimensioned<Float>,
    control: SimpleControl,
    residuals: Residuals,
}

impl SteadyDiffusion {
    pub fn new(
        t: VolField<Float>,
        diffusivity: Dimensioned<Float>,
        solution: &SolutionControls,
    ) -> FvResult<Self> {
        Ok(Self {
            t,
            diffusivity,
            control: SimpleControl::new(solution)?,
            residuals: Residuals::new(),
        })
    }

    pub fn field(&self) -> &VolField<Float> {
        &self.t
    }

    pub fn converged(&self) -> bool {
        self.control.converged()
    }
}

impl Solver for SteadyDiffusion {
    fn name(&self) -> &str {
        "steadyDiffusion"
    }

    fn step(&mut self, ctx: &SolveContext<'_>, time: &mut Time, stop: &StopFlag) -> FvResult<bool> {
        let mesh = ctx.mesh;
        self.control.read(ctx.solution)?;
        if !self
            .control
            .outer_loop(time, &mut self.residuals, stop, mesh.comm())
        {
            return Ok(false);
        }
        while self.control.correct_non_orthogonal() {
            let final_iter = self.control.final_non_orthogonal_iter();
            let mut equation = (-fvm::laplacian(
                mesh,
                ctx.schemes,
                Diffusivity::Uniform(&self.diffusivity),
                &self.t,
            )?)
            .equals(&ctx.models.source(mesh, &self.t)?)?;
            // Steady iterations always relax with the plain factors.
            relax_equation(ctx, &mut equation, &self.t, false)?;
            solve_equation(ctx, &mut equation, &mut self.t, final_iter, &mut self.residuals)?;
        }
        Ok(true)
    }

    fn write(&self, mesh: &Mesh, directory: &Path) -> FvResult<()> {
        write_field(mesh, &self.t, directory)
    }

    fn scalar_field(&self, name: &str) -> Option<&VolField<Float>> {
        (self.t.name() == name).then_some(&self.t)
    }
}
