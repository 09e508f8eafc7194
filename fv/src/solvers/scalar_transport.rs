use std::path::Path;

use super::{advance_transient, relax_equation, solve_equation, write_field, SolveContext, Solver};
use crate::control::{Residuals, SimpleControl, StopFlag, Time};
use crate::fvm::{self, Diffusivity};
use crate::patch_field::BoundaryEnv;
use crate::{Dimensioned, Float, FvResult, Mesh, SurfaceField, VolField};

/// Transport of a passive scalar by a fixed flux:
/// `ddt(T) + div(phi, T) - laplacian(D, T) == sources`.
#[derive(Debug)]
pub struct ScalarTransport {
    t: VolField<Float>,
    phi: SurfaceField<Float>,
    diffusivity: Dimensioned<Float>,
    residuals: Residuals,
}

impl ScalarTransport {
    pub fn new(t: VolField<Float>, phi: SurfaceField<Float>, diffusivity: Dimensioned<Float>) -> Self {
        Self {
            t,
            phi,
            diffusivity,
            residuals: Residuals::new(),
        }
    }

    pub fn field(&self) -> &VolField<Float> {
        &self.t
    }

    pub fn phi(&self) -> &SurfaceField<Float> {
        &self.phi
    }

    pub fn residuals(&self) -> &Residuals {
        &self.residuals
    }
}

impl Solver for ScalarTransport {
    fn name(&self) -> &str {
        "scalarTransport"
    }

    fn step(&mut self, ctx: &SolveContext<'_>, time: &mut Time, stop: &StopFlag) -> FvResult<bool> {
        if !advance_transient(ctx, time, stop) {
            return Ok(false);
        }
        let mesh = ctx.mesh;
        self.t.store_old_times(time.time_index());
        self.residuals.reset();
        let env = BoundaryEnv {
            phi: Some(&self.phi),
            time: time.value(),
        };
        let mut control = SimpleControl::new(ctx.solution)?;
        while control.correct_non_orthogonal() {
            self.t.update_coeffs(mesh, env)?;
            let final_iter = control.final_non_orthogonal_iter();
            let mut equation = (fvm::ddt(mesh, ctx.schemes, time, &self.t)?
                + fvm::div(mesh, ctx.schemes, &self.phi, &self.t)?
                - fvm::laplacian(
                    mesh,
                    ctx.schemes,
                    Diffusivity::Uniform(&self.diffusivity),
                    &self.t,
                )?)
            .equals(&ctx.models.source(mesh, &self.t)?)?;
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::SolutionControls;
    use crate::dimensions::{DIMLESS, KINEMATIC_VISCOSITY, VOLUMETRIC_FLUX};
    use crate::models::{FvConstraints, FvModels};
    use crate::schemes::{FvSchemes, Section};
    use approx::assert_relative_eq;

    fn solution() -> SolutionControls {
        SolutionControls::from_json(&serde_json::json!({
            "solvers": {"T": {"solver": "PBiCGStab", "preconditioner": "DILU", "tolerance": 1e-12}}
        }))
        .unwrap()
    }

    #[test]
    fn test_pure_convection_conserves_the_total() {
        // Uniform flow to the right on a line closed at both ends by zero gradient: the
        // boundary fluxes are zero, so the total amount of T stays put.
        let mesh = Mesh::line(20, 1.).unwrap();
        let t = VolField::builder(&mesh, "T", DIMLESS)
            .from_fn(|centre| if centre.x < 0.3 { 1. } else { 0. })
            .build()
            .unwrap();
        let mut phi = SurfaceField::uniform(&mesh, "phi", VOLUMETRIC_FLUX, 0.1);
        for patch in 0..mesh.patches().len() {
            phi.boundary_mut(patch).fill(0.);
        }
        let d = Dimensioned::new("D", KINEMATIC_VISCOSITY, 0.);
        let schemes = FvSchemes::default().with_scheme(Section::Div, "div(phi,T)", "Gauss upwind");
        let (solution, models, constraints) =
            (solution(), FvModels::new(), FvConstraints::new());
        let ctx = SolveContext {
            mesh: &mesh,
            schemes: &schemes,
            solution: &solution,
            models: &models,
            constraints: &constraints,
        };
        let mut solver = ScalarTransport::new(t, phi, d);
        let total = |solver: &ScalarTransport| (solver.field().internal() * mesh.cell_volumes()).sum();
        let before = total(&solver);
        let mut time = Time::new(0., 1., 0.1).unwrap();
        let n_steps = crate::solvers::run(&mut solver, &ctx, &mut time, &StopFlag::new()).unwrap();
        assert_eq!(n_steps, 10);
        assert_relative_eq!(total(&solver), before, max_relative = 1e-9);
        // Upwinding keeps the profile within its initial bounds.
        assert!(solver.field().min() >= -1e-12);
        assert!(solver.field().max() <= 1. + 1e-12);
        assert!(solver.residuals().last("T").is_some());
    }
}
