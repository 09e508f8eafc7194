//! Canned cases, from a line of cells to a lid-driven cavity, each ready to run serially or
//! as one slab of a decomposed run.

use std::path::Path;

use crate::control::{SolutionControls, StopFlag, Time};
use crate::dimensions::{DIMLESS, KINEMATIC_PRESSURE, KINEMATIC_VISCOSITY, VELOCITY};
use crate::mesh::{BlockMesh, PatchKind, Side};
use crate::models::{FvConstraints, FvModels};
use crate::parallel::{decompose, Comm};
use crate::schemes::{FvSchemes, Section};
use crate::solvers::{
    self, IncompressiblePimple, ScalarTransport, SolveContext, Solver, SteadyDiffusion,
};
use crate::{fvc, Dimensioned, Float, FvError, FvResult, Mesh, Vector3, VolField};

#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::EnumString, strum::Display, strum::EnumIter)]
#[strum(serialize_all = "camelCase")]
pub enum CaseName {
    LineDiffusion,
    SkewedLaplace,
    ConvectedPulse,
    LidDrivenCavity,
    PeriodicChannel,
}

/// Where a case lives: on the whole mesh, or on the slab of it belonging to the rank of a
/// communicator.
#[derive(Clone, Debug, Default)]
pub enum Partition {
    #[default]
    Serial,
    Parallel(Comm),
}

/// A mesh with its fields, settings and run time.
pub struct Case {
    pub name: CaseName,
    pub mesh: Mesh,
    /// Global cell of each local cell when the case is one part of a decomposed run.
    pub cell_addressing: Option<Vec<usize>>,
    pub schemes: FvSchemes,
    pub solution: SolutionControls,
    pub models: FvModels,
    pub constraints: FvConstraints,
    pub time: Time,
    pub solver: Box<dyn Solver>,
}

impl Case {
    pub fn new(name: CaseName, n_cells: usize, partition: &Partition) -> FvResult<Self> {
        match name {
            CaseName::LineDiffusion => line_diffusion(n_cells, partition),
            CaseName::SkewedLaplace => skewed_laplace(n_cells, partition),
            CaseName::ConvectedPulse => convected_pulse(n_cells, partition),
            CaseName::LidDrivenCavity => lid_driven_cavity(n_cells, partition),
            CaseName::PeriodicChannel => periodic_channel(n_cells, partition),
        }
    }

    /// Replaces the solution settings; the solvers pick them up at their next step.
    pub fn with_solution(self, solution: SolutionControls) -> Self {
        Self { solution, ..self }
    }

    /// Runs to `end_time` instead, from the current time with the same step.
    pub fn with_end_time(self, end_time: Float) -> FvResult<Self> {
        let time = Time::new(self.time.value(), end_time, self.time.delta_t())?;
        Ok(Self { time, ..self })
    }

    fn split(&mut self) -> (SolveContext<'_>, &mut Time, &mut dyn Solver) {
        let Self {
            mesh,
            schemes,
            solution,
            models,
            constraints,
            time,
            solver,
            ..
        } = self;
        let ctx = SolveContext {
            mesh,
            schemes,
            solution,
            models,
            constraints,
        };
        (ctx, time, solver.as_mut())
    }

    /// Steps the solver to the end of the run; returns the number of steps taken.
    pub fn run(&mut self, stop: &StopFlag) -> FvResult<usize> {
        let (ctx, time, solver) = self.split();
        solvers::run(solver, &ctx, time, stop)
    }

    /// One step of the solver; false once the run is over.
    pub fn step(&mut self, stop: &StopFlag) -> FvResult<bool> {
        let (ctx, time, solver) = self.split();
        solver.step(&ctx, time, stop)
    }

    /// Writes the fields into `directory`, or into `directory/processor<rank>` for one part
    /// of a decomposed run.
    pub fn write(&self, directory: &Path) -> FvResult<()> {
        let comm = self.mesh.comm();
        if comm.is_parallel() {
            let directory = directory.join(format!("processor{}", comm.rank()));
            self.solver.write(&self.mesh, &directory)
        } else {
            self.solver.write(&self.mesh, directory)
        }
    }
}

/// The local part of `global`, split into slabs along `axis` for a parallel run.
fn local_mesh(
    global: Mesh,
    partition: &Partition,
    axis: usize,
) -> FvResult<(Mesh, Option<Vec<usize>>)> {
    let comm = match partition {
        Partition::Serial => return Ok((global, None)),
        Partition::Parallel(comm) => comm,
    };
    let sub_domain = decompose(&global, comm.size(), axis)?
        .into_iter()
        .nth(comm.rank())
        .ok_or_else(|| {
            FvError::invalid("decomposition", "rank", format!("no slab for rank {}", comm.rank()))
        })?;
    Ok((
        sub_domain.mesh.with_comm(comm.clone()),
        Some(sub_domain.cell_addressing),
    ))
}

fn diffusion_solution(n_non_orthogonal_correctors: usize) -> FvResult<SolutionControls> {
    SolutionControls::from_json(&serde_json::json!({
        "solvers": {"T": {"solver": "PCG", "preconditioner": "DIC", "tolerance": 1e-10}},
        "SIMPLE": {
            "nNonOrthogonalCorrectors": n_non_orthogonal_correctors,
            "residualControl": {"T": 1e-7}
        }
    }))
}

/// Steady diffusion on a line of unit length between `T = 0` and `T = 10`.
pub fn line_diffusion(n_cells: usize, partition: &Partition) -> FvResult<Case> {
    let (mesh, cell_addressing) = local_mesh(Mesh::line(n_cells, 1.)?, partition, 0)?;
    let t = VolField::builder(&mesh, "T", DIMLESS)
        .fixed_value("left", 0.)
        .fixed_value("right", 10.)
        .build()?;
    let solution = diffusion_solution(0)?;
    let d = Dimensioned::new("D", KINEMATIC_VISCOSITY, 1.);
    let solver = SteadyDiffusion::new(t, d, &solution)?;
    Ok(Case {
        name: CaseName::LineDiffusion,
        mesh,
        cell_addressing,
        schemes: FvSchemes::default(),
        solution,
        models: FvModels::new(),
        constraints: FvConstraints::new(),
        time: Time::steady(100),
        solver: Box::new(solver),
    })
}

/// Steady diffusion across a square sheared by 30 percent of its height, with explicit
/// non-orthogonal correction.
pub fn skewed_laplace(n_cells: usize, partition: &Partition) -> FvResult<Case> {
    let global = BlockMesh::two_dimensional([n_cells, n_cells], [1., 1.])
        .with_skew(0.3)
        .build()?;
    let (mesh, cell_addressing) = local_mesh(global, partition, 1)?;
    let t = VolField::builder(&mesh, "T", DIMLESS)
        .fixed_value("xMin", 0.)
        .fixed_value("xMax", 1.)
        .build()?;
    let solution = diffusion_solution(2)?;
    let d = Dimensioned::new("D", KINEMATIC_VISCOSITY, 1.);
    let solver = SteadyDiffusion::new(t, d, &solution)?;
    Ok(Case {
        name: CaseName::SkewedLaplace,
        mesh,
        cell_addressing,
        schemes: FvSchemes::default(),
        solution,
        models: FvModels::new(),
        constraints: FvConstraints::new(),
        time: Time::steady(100),
        solver: Box::new(solver),
    })
}

/// A square pulse carried along a line by a unit velocity, with a TVD scheme.
pub fn convected_pulse(n_cells: usize, partition: &Partition) -> FvResult<Case> {
    let (mesh, cell_addressing) = local_mesh(Mesh::line(n_cells, 1.)?, partition, 0)?;
    let u = VolField::builder(&mesh, "U", VELOCITY)
        .uniform(Vector3::new(1., 0., 0.))
        .fixed_value("left", Vector3::new(1., 0., 0.))
        .build()?;
    let t = VolField::builder(&mesh, "T", DIMLESS)
        .from_fn(|centre| if (0.1..0.3).contains(&centre.x) { 1. } else { 0. })
        .fixed_value("left", 0.)
        .build()?;
    let schemes = FvSchemes::default().with_scheme(Section::Div, "div(phi,T)", "Gauss vanLeer");
    let mut phi = fvc::flux(&mesh, &schemes, &u)?;
    phi.rename("phi");
    let solution = SolutionControls::from_json(&serde_json::json!({
        "solvers": {"T": {"solver": "PBiCGStab", "preconditioner": "DILU", "tolerance": 1e-10}}
    }))?;
    let d = Dimensioned::new("D", KINEMATIC_VISCOSITY, 0.);
    let delta_t = 0.5 / n_cells as Float;
    Ok(Case {
        name: CaseName::ConvectedPulse,
        mesh,
        cell_addressing,
        schemes,
        solution,
        models: FvModels::new(),
        constraints: FvConstraints::new(),
        time: Time::new(0., 0.5, delta_t)?,
        solver: Box::new(ScalarTransport::new(t, phi, d)),
    })
}

fn piso_solution(n_correctors: usize) -> FvResult<SolutionControls> {
    SolutionControls::from_json(&serde_json::json!({
        "solvers": {
            "p": {"solver": "PCG", "preconditioner": "DIC", "tolerance": 1e-7, "relTol": 0.05},
            "pFinal": {"solver": "PCG", "preconditioner": "DIC", "tolerance": 1e-7},
            "U": {"solver": "smoothSolver", "smoother": "symGaussSeidel", "tolerance": 1e-7}
        },
        "PISO": {"nCorrectors": n_correctors, "pRefCell": 0, "pRefValue": 0}
    }))
}

fn incompressible_case(
    name: CaseName,
    mesh: Mesh,
    cell_addressing: Option<Vec<usize>>,
    u: VolField<Vector3>,
    nu: Float,
    models: FvModels,
    time: Time,
) -> FvResult<Case> {
    let p = VolField::builder(&mesh, "p", KINEMATIC_PRESSURE).build()?;
    let schemes = FvSchemes::default();
    let solution = piso_solution(2)?;
    let constraints = FvConstraints::new();
    let ctx = SolveContext {
        mesh: &mesh,
        schemes: &schemes,
        solution: &solution,
        models: &models,
        constraints: &constraints,
    };
    let nu = Dimensioned::new("nu", KINEMATIC_VISCOSITY, nu);
    let mut solver = IncompressiblePimple::new(&ctx, u, p, nu)?;
    if let Some(addressing) = &cell_addressing {
        solver = solver.with_cell_addressing(addressing.clone());
    }
    Ok(Case {
        name,
        mesh,
        cell_addressing,
        schemes,
        solution,
        models,
        constraints,
        time,
        solver: Box::new(solver),
    })
}

/// A unit square whose lid moves at unit speed, at Reynolds number 100.
pub fn lid_driven_cavity(n_cells: usize, partition: &Partition) -> FvResult<Case> {
    let global = BlockMesh::two_dimensional([n_cells, n_cells], [1., 1.])
        .with_side(Side::XMin, "fixedWalls", PatchKind::Wall)
        .with_side(Side::XMax, "fixedWalls", PatchKind::Wall)
        .with_side(Side::YMin, "fixedWalls", PatchKind::Wall)
        .with_side(Side::YMax, "movingWall", PatchKind::Wall)
        .build()?;
    let (mesh, cell_addressing) = local_mesh(global, partition, 0)?;
    let u = VolField::builder(&mesh, "U", VELOCITY)
        .fixed_value("fixedWalls", Vector3::zeros())
        .fixed_value("movingWall", Vector3::new(1., 0., 0.))
        .build()?;
    // Courant number 1/2 at the lid speed.
    let delta_t = 0.5 / n_cells as Float;
    let time = Time::new(0., 0.5, delta_t)?;
    incompressible_case(
        CaseName::LidDrivenCavity,
        mesh,
        cell_addressing,
        u,
        0.01,
        FvModels::new(),
        time,
    )
}

/// Flow between two walls, periodic in x and driven by a uniform body force.
///
/// The steady state is the parabola `U = y(1 - y)/(2 nu)`.
pub fn periodic_channel(n_cells: usize, partition: &Partition) -> FvResult<Case> {
    let global = BlockMesh::two_dimensional([n_cells, n_cells], [1., 1.])
        .with_cyclic(Side::XMin, "inlet", "outlet")
        .with_side(Side::YMin, "walls", PatchKind::Wall)
        .with_side(Side::YMax, "walls", PatchKind::Wall)
        .build()?;
    let (mesh, cell_addressing) = local_mesh(global, partition, 1)?;
    let u = VolField::builder(&mesh, "U", VELOCITY)
        .fixed_value("walls", Vector3::zeros())
        .build()?;
    let models = FvModels::from_json(&serde_json::json!({
        "drivingForce": {
            "type": "semiImplicitSource",
            "selectionMode": "all",
            "volumeMode": "specific",
            "sources": {"U": {"explicit": [1, 0, 0], "implicit": 0}}
        }
    }))?;
    let time = Time::new(0., 5., 0.05)?;
    incompressible_case(
        CaseName::PeriodicChannel,
        mesh,
        cell_addressing,
        u,
        0.1,
        models,
        time,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use strum::IntoEnumIterator;

    #[test]
    fn test_case_names() {
        for name in CaseName::iter() {
            assert_eq!(name.to_string().parse::<CaseName>().unwrap(), name);
        }
        assert_eq!("lidDrivenCavity".parse::<CaseName>().unwrap(), CaseName::LidDrivenCavity);
    }

    #[test]
    fn test_line_diffusion() {
        let mut case = Case::new(CaseName::LineDiffusion, 10, &Partition::Serial).unwrap();
        case.run(&StopFlag::new()).unwrap();
        let t = case.solver.scalar_field("T").unwrap();
        for (i, &value) in t.internal().iter().enumerate() {
            assert_abs_diff_eq!(value, 10. * (i as Float + 0.5) / 10., epsilon = 1e-6);
        }
    }

    #[test]
    fn test_periodic_channel_develops_a_parabola() {
        let mut case = Case::new(CaseName::PeriodicChannel, 8, &Partition::Serial)
            .unwrap()
            .with_end_time(10.)
            .unwrap();
        case.run(&StopFlag::new()).unwrap();
        let u = case.solver.vector_field("U").unwrap();
        for (value, centre) in u.internal().iter().zip(case.mesh.cell_centres()) {
            let exact = centre.y * (1. - centre.y) / (2. * 0.1);
            assert_abs_diff_eq!(value.x, exact, epsilon = 0.05 * 1.25);
            assert!(value.y.abs() < 1e-6);
        }
    }
}
