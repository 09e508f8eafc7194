use std::path::Path;

use super::{advance_transient, relax_equation, solve_equation, write_field, SolveContext, Solver};
use crate::control::{PimpleControl, Residuals, StopFlag, Time};
use crate::fvm::{self, Diffusivity};
use crate::patch_field::BoundaryEnv;
use crate::{
    fvc, Dimensioned, Float, FvError, FvMatrix, FvResult, Mesh, SurfaceField, Vector3, VolField,
};

/// Transient incompressible laminar flow with the PIMPLE pressure-velocity coupling.
///
/// Momentum `ddt(U) + div(phi, U) - laplacian(nu, U) == sources - grad(p)` is predicted from
/// the current pressure; each pressure corrector then solves
/// `laplacian(1/A, p) == div(phiHbyA)` and corrects the flux and velocity with the new
/// pressure gradient.
#[derive(Debug)]
pub struct IncompressiblePimple {
    u: VolField<Vector3>,
    p: VolField<Float>,
    phi: SurfaceField<Float>,
    nu: Dimensioned<Float>,
    pimple: PimpleControl,
    residuals: Residuals,
    cell_addressing: Option<Vec<usize>>,
    continuity_error: Float,
    cumulative_continuity_error: Float,
}

impl IncompressiblePimple {
    /// Starts from the flux of the interpolated initial velocity.
    pub fn new(
        ctx: &SolveContext<'_>,
        u: VolField<Vector3>,
        p: VolField<Float>,
        nu: Dimensioned<Float>,
    ) -> FvResult<Self> {
        let mut phi = fvc::flux(ctx.mesh, ctx.schemes, &u)?;
        phi.rename("phi");
        Ok(Self {
            u,
            p,
            phi,
            nu,
            pimple: PimpleControl::new(ctx.solution)?,
            residuals: Residuals::new(),
            cell_addressing: None,
            continuity_error: 0.,
            cumulative_continuity_error: 0.,
        })
    }

    /// Maps the `pRefCell` of the undecomposed mesh through the global cell of each local
    /// cell.
    pub fn with_cell_addressing(self, cell_addressing: Vec<usize>) -> Self {
        Self {
            cell_addressing: Some(cell_addressing),
            ..self
        }
    }

    pub fn velocity(&self) -> &VolField<Vector3> {
        &self.u
    }

    pub fn pressure(&self) -> &VolField<Float> {
        &self.p
    }

    pub fn phi(&self) -> &SurfaceField<Float> {
        &self.phi
    }

    pub fn residuals(&self) -> &Residuals {
        &self.residuals
    }

    /// `deltaT` times the mean magnitude of the flux divergence after the last corrector.
    pub fn continuity_error(&self) -> Float {
        self.continuity_error
    }

    pub fn pimple(&self) -> &PimpleControl {
        &self.pimple
    }

    /// The local reference cell, on the rank holding it.
    fn pressure_reference(&self, mesh: &Mesh) -> FvResult<(Option<usize>, Float)> {
        let (global, value) = self.pimple.reference();
        let local = match &self.cell_addressing {
            Some(addressing) => addressing.iter().position(|&cell| cell == global),
            None => (global < mesh.n_cells()).then_some(global),
        };
        let needs_reference = self.p.needs_reference(mesh);
        let n_found = mesh.comm().sum_usize(usize::from(local.is_some()));
        if needs_reference && n_found != 1 {
            return Err(FvError::invalid(
                self.pimple.algorithm(),
                "pRefCell",
                format!("cell {global} is not in the mesh"),
            ));
        }
        Ok((local, value))
    }

    fn momentum_equation(
        &mut self,
        ctx: &SolveContext<'_>,
        time: &Time,
    ) -> FvResult<FvMatrix<Vector3>> {
        let mesh = ctx.mesh;
        let final_iter = self.pimple.final_iter();
        let env = BoundaryEnv {
            phi: Some(&self.phi),
            time: time.value(),
        };
        self.u.update_coeffs(mesh, env)?;
        let mut u_eqn = (fvm::ddt(mesh, ctx.schemes, time, &self.u)?
            + fvm::div(mesh, ctx.schemes, &self.phi, &self.u)?
            - fvm::laplacian(mesh, ctx.schemes, Diffusivity::Uniform(&self.nu), &self.u)?)
        .equals(&ctx.models.source(mesh, &self.u)?)?;
        relax_equation(ctx, &mut u_eqn, &self.u, final_iter)?;
        ctx.constraints.constrain(mesh, &mut u_eqn, &mut self.u)?;
        if self.pimple.momentum_predictor() {
            let grad_p = fvc::grad(mesh, ctx.schemes, &self.p)?;
            let mut predictor = u_eqn.clone().add_field(mesh, &grad_p)?;
            solve_equation(ctx, &mut predictor, &mut self.u, final_iter, &mut self.residuals)?;
        }
        Ok(u_eqn)
    }

    fn pressure_corrector(
        &mut self,
        ctx: &SolveContext<'_>,
        time: &Time,
        u_eqn: &FvMatrix<Vector3>,
        phi_old: &SurfaceField<Float>,
        reference: (Option<usize>, Float),
    ) -> FvResult<()> {
        let mesh = ctx.mesh;
        let mut r_au = u_eqn.a(mesh)?.reciprocal();
        r_au.rename("rAU");
        let mut h_by_a = &r_au * &u_eqn.h(mesh, &self.u)?;
        h_by_a.rename("HbyA");
        // Velocity conditions that fix the value hold for HbyA as well.
        for patch in 0..mesh.patches().len() {
            if !self.u.boundary_field(patch).assignable() {
                h_by_a
                    .boundary_field_mut(patch)
                    .force_assign(self.u.boundary_value(patch));
            }
        }
        let ddt_corr = fvc::ddt_corr(mesh, ctx.schemes, time, &self.u, phi_old)?;
        let r_au_f = fvc::interpolate(mesh, ctx.schemes, &r_au)?;
        let mut phi_h_by_a =
            fvc::flux(mesh, ctx.schemes, &h_by_a)?.try_add(&(&r_au_f * &ddt_corr))?;
        phi_h_by_a.rename("phiHbyA");

        self.p.store_prev_iter();
        while self.pimple.correct_non_orthogonal() {
            let mut p_eqn = fvm::laplacian(mesh, ctx.schemes, Diffusivity::Vol(&r_au), &self.p)?
                .equals_field(mesh, &fvc::div(mesh, &phi_h_by_a)?)?;
            p_eqn.set_reference(mesh, &mut self.p, reference.0, reference.1)?;
            let final_inner = self.pimple.final_inner_iter();
            solve_equation(ctx, &mut p_eqn, &mut self.p, final_inner, &mut self.residuals)?;
            if self.pimple.final_non_orthogonal_iter() {
                self.phi = phi_h_by_a.try_sub(&p_eqn.flux(mesh, &self.p)?)?;
                self.phi.rename("phi");
            }
        }
        self.continuity_errors(mesh, time)?;

        if let Some(alpha) = ctx
            .solution
            .field_relaxation_factor(self.p.name(), self.pimple.final_iter())
        {
            self.p.relax(alpha);
        }
        let grad_p = fvc::grad(mesh, ctx.schemes, &self.p)?;
        let corrected = h_by_a.try_sub(&(&r_au * &grad_p))?;
        self.u.assign(mesh, &corrected)?;
        let env = BoundaryEnv {
            phi: Some(&self.phi),
            time: time.value(),
        };
        self.u.correct_boundary_conditions_with(mesh, env)?;
        ctx.constraints.constrain_field(mesh, &mut self.u)?;
        Ok(())
    }

    fn continuity_errors(&mut self, mesh: &Mesh, time: &Time) -> FvResult<()> {
        let divergence = fvc::div(mesh, &self.phi)?;
        let delta_t = time.delta_t();
        self.continuity_error = delta_t * divergence.mag(mesh)?.weighted_average(mesh);
        let global = delta_t * divergence.weighted_average(mesh);
        self.cumulative_continuity_error += global;
        log::info!(
            "time step continuity errors : sum local = {:e}, global = {global:e}, \
             cumulative = {:e}",
            self.continuity_error,
            self.cumulative_continuity_error
        );
        Ok(())
    }
}

impl Solver for IncompressiblePimple {
    fn name(&self) -> &str {
        "incompressiblePimple"
    }

    fn step(&mut self, ctx: &SolveContext<'_>, time: &mut Time, stop: &StopFlag) -> FvResult<bool> {
        if !advance_transient(ctx, time, stop) {
            return Ok(false);
        }
        let mesh = ctx.mesh;
        self.pimple.read(ctx.solution)?;
        self.u.store_old_times(time.time_index());
        let mut phi_old = self.phi.clone();
        phi_old.rename("phi_0");
        let reference = self.pressure_reference(mesh)?;
        while self.pimple.outer_loop(&mut self.residuals, stop, mesh.comm()) {
            let u_eqn = self.momentum_equation(ctx, time)?;
            while self.pimple.correct() {
                self.pressure_corrector(ctx, time, &u_eqn, &phi_old, reference)?;
            }
        }
        Ok(true)
    }

    fn write(&self, mesh: &Mesh, directory: &Path) -> FvResult<()> {
        write_field(mesh, &self.u, directory)?;
        write_field(mesh, &self.p, directory)
    }

    fn scalar_field(&self, name: &str) -> Option<&VolField<Float>> {
        (self.p.name() == name).then_some(&self.p)
    }

    fn vector_field(&self, name: &str) -> Option<&VolField<Vector3>> {
        (self.u.name() == name).then_some(&self.u)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::SolutionControls;
    use crate::dimensions::{KINEMATIC_PRESSURE, KINEMATIC_VISCOSITY, VELOCITY};
    use crate::mesh::BlockMesh;
    use crate::models::{FvConstraints, FvModels};
    use crate::schemes::FvSchemes;

    fn piso(p_ref_cell: usize) -> SolutionControls {
        SolutionControls::from_json(&serde_json::json!({
            "solvers": {
                "p": {"solver": "PCG", "preconditioner": "DIC", "tolerance": 1e-8, "relTol": 0.05},
                "pFinal": {"solver": "PCG", "preconditioner": "DIC", "tolerance": 1e-8},
                "U": {"solver": "PBiCGStab", "preconditioner": "DILU", "tolerance": 1e-8}
            },
            "PISO": {"nCorrectors": 2, "pRefCell": p_ref_cell, "pRefValue": 0}
        }))
        .unwrap()
    }

    #[test]
    fn test_lid_driven_cavity_stays_divergence_free() {
        let mesh = BlockMesh::two_dimensional([8, 8], [1., 1.]).build().unwrap();
        let wall = Vector3::zeros();
        let u = VolField::builder(&mesh, "U", VELOCITY)
            .fixed_value("xMin", wall)
            .fixed_value("xMax", wall)
            .fixed_value("yMin", wall)
            .fixed_value("yMax", Vector3::new(1., 0., 0.))
            .build()
            .unwrap();
        let p = VolField::builder(&mesh, "p", KINEMATIC_PRESSURE).build().unwrap();
        let nu = Dimensioned::new("nu", KINEMATIC_VISCOSITY, 0.01);
        let solution = piso(0);
        let (schemes, models, constraints) =
            (FvSchemes::default(), FvModels::new(), FvConstraints::new());
        let ctx = SolveContext {
            mesh: &mesh,
            schemes: &schemes,
            solution: &solution,
            models: &models,
            constraints: &constraints,
        };
        let mut solver = IncompressiblePimple::new(&ctx, u, p, nu).unwrap();
        assert_eq!(solver.pimple().algorithm(), "PISO");
        let mut time = Time::new(0., 0.05, 0.005).unwrap();
        let n_steps = crate::solvers::run(&mut solver, &ctx, &mut time, &StopFlag::new()).unwrap();
        assert_eq!(n_steps, 10);

        assert!(solver.continuity_error() < 1e-6);
        // The level is pinned in the reference cell.
        assert!(solver.pressure().internal()[0].abs() < 1e-6);
        assert!(solver.velocity().g_max_mag(&mesh) < 1.05);
        // The lid drags the top row along.
        let top_row: Float = (56..64).map(|cell| solver.velocity().internal()[cell].x).sum();
        assert!(top_row > 0.);
        assert!(solver.residuals().last("p").is_some());
    }

    #[test]
    fn test_reference_cell_outside_the_mesh() {
        let mesh = BlockMesh::two_dimensional([2, 2], [1., 1.]).build().unwrap();
        let u = VolField::builder(&mesh, "U", VELOCITY).build().unwrap();
        let p = VolField::builder(&mesh, "p", KINEMATIC_PRESSURE).build().unwrap();
        let nu = Dimensioned::new("nu", KINEMATIC_VISCOSITY, 0.01);
        let solution = piso(10);
        let (schemes, models, constraints) =
            (FvSchemes::default(), FvModels::new(), FvConstraints::new());
        let ctx = SolveContext {
            mesh: &mesh,
            schemes: &schemes,
            solution: &solution,
            models: &models,
            constraints: &constraints,
        };
        let mut solver = IncompressiblePimple::new(&ctx, u, p, nu).unwrap();
        let mut time = Time::new(0., 1., 0.1).unwrap();
        assert!(solver.step(&ctx, &mut time, &StopFlag::new()).is_err());
    }
}
