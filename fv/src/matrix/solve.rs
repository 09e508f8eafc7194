use ndarray as nd;

use super::{component_name, FvMatrix};
use crate::linalg::{
    self, CoupledInterface, LduInterface, LduMatrix, SolverControls, SolverPerformance,
};
use crate::{Float, FvError, FvResult, Mesh, Value, VolField};

impl<T: Value> FvMatrix<T> {
    /// The source with the boundary contributions of non-coupled patches added.
    pub(super) fn total_source(&self, mesh: &Mesh, psi: &VolField<T>) -> nd::Array1<T> {
        let mut source = self.source.clone();
        for (patch, coeffs) in self.boundary_coeffs.iter().enumerate() {
            if psi.boundary_field(patch).coupled() {
                continue;
            }
            let face_cells = &mesh.patch_geometry(patch).face_cells;
            for (&cell, &coeff) in face_cells.iter().zip(coeffs) {
                source[cell] += coeff;
            }
        }
        source
    }

    /// The scalar system of component `c`, with coupled patches as matrix interfaces and the
    /// explicit remainder of rotated couplings in the source.
    fn component_system<'a>(
        &self,
        mesh: &'a Mesh,
        psi: &VolField<T>,
        internal: &'a nd::Array1<T>,
        source: &nd::Array1<T>,
        c: usize,
    ) -> FvResult<(LduMatrix<'a>, nd::Array1<Float>)> {
        let mut diag = self.diag.clone();
        let mut source = source.mapv(|value| value.component(c));
        let mut interfaces = Vec::new();
        for (patch, internal_coeffs) in self.internal_coeffs.iter().enumerate() {
            let geometry = mesh.patch_geometry(patch);
            for (&cell, coeff) in geometry.face_cells.iter().zip(internal_coeffs) {
                diag[cell] += coeff.component(c);
            }
            let field = psi.boundary_field(patch);
            if !field.coupled() {
                continue;
            }
            let coeffs = self.boundary_coeffs[patch].mapv(|coeff| coeff.component(c));
            let ctx = crate::patch_field::PatchContext::new(mesh, patch, internal);
            let Some(interface) = field.interface(&ctx, c) else {
                continue;
            };
            if let (
                LduInterface::Cyclic {
                    neighbour_cells,
                    scale,
                    ..
                },
                Some(_),
                Some(neighbour_values),
            ) = (&interface, geometry.rotation, field.patch_neighbour_field())
            {
                for face in 0..geometry.face_cells.len() {
                    let implicit = scale * internal[neighbour_cells[face]].component(c);
                    source[geometry.face_cells[face]] +=
                        coeffs[face] * (neighbour_values[face].component(c) - implicit);
                }
            }
            interfaces.push(CoupledInterface::new(interface, coeffs));
        }
        let matrix = LduMatrix::new(
            mesh.addressing(),
            mesh.comm(),
            diag,
            self.upper.clone(),
            self.lower.clone(),
        )?
        .with_interfaces(interfaces);
        Ok((matrix, source))
    }

    fn check_solvable(&self, mesh: &Mesh, psi: &VolField<T>) -> FvResult<()> {
        if self.n_terms == 0 {
            return Err(FvError::EmptyEquation {
                field: self.psi_name.clone(),
            });
        }
        self.check_mesh(mesh)?;
        self.check_field(psi)
    }

    /// Solves for `psi` component by component and refreshes its boundary values.
    ///
    /// A pending relaxation factor is applied first. Components in directions the mesh does
    /// not resolve are left untouched. When no boundary condition fixes the level of `psi`,
    /// the equation must either carry a term like `ddt` or have been pinned with
    /// [`Self::set_reference`]; otherwise it fails with `Singular`. Collective.
    pub fn solve(
        &mut self,
        mesh: &Mesh,
        psi: &mut VolField<T>,
        controls: &SolverControls,
    ) -> FvResult<SolverPerformance> {
        self.check_solvable(mesh, psi)?;
        if let Some(alpha) = self.relaxation_factor.take() {
            self.relax(mesh, psi, alpha)?;
        }
        let internal = psi.internal().clone();
        let source = self.total_source(mesh, psi);
        let mut solved = internal.clone();
        let mut performance: Option<SolverPerformance> = None;
        let needs_reference = psi.needs_reference(mesh);
        for c in 0..T::N_COMPONENTS {
            if !T::component_active(c, mesh.solution_directions()) {
                continue;
            }
            let (matrix, source) = self.component_system(mesh, psi, &internal, &source, c)?;
            let mut values = internal.mapv(|value| value.component(c));
            let field = component_name::<T>(&self.psi_name, c);
            if needs_reference && floating(&matrix) {
                return Err(FvError::Singular(format!(
                    "{field}, whose level no boundary condition or reference value fixes"
                )));
            }
            let component = linalg::solve(&matrix, &mut values, &source, controls, &field)?;
            for (value, &solution) in solved.iter_mut().zip(&values) {
                value.set_component(c, solution);
            }
            performance = Some(match performance {
                Some(performance) => performance.merge(&component),
                None => component,
            });
        }
        *psi.internal_mut() = solved;
        psi.correct_boundary_conditions(mesh)?;
        Ok(performance.unwrap_or_else(|| {
            let mut performance = SolverPerformance::new("none", &self.psi_name);
            performance.converged = true;
            performance
        }))
    }

    /// `source - A·psi` of each active component, boundary contributions included.
    pub fn residual(&self, mesh: &Mesh, psi: &VolField<T>) -> FvResult<nd::Array1<T>> {
        self.check_solvable(mesh, psi)?;
        let internal = psi.internal().clone();
        let source = self.total_source(mesh, psi);
        let mut residual = nd::Array1::from_elem(mesh.n_cells(), T::zero());
        for c in 0..T::N_COMPONENTS {
            if !T::component_active(c, mesh.solution_directions()) {
                continue;
            }
            let (matrix, source) = self.component_system(mesh, psi, &internal, &source, c)?;
            let values = internal.mapv(|value| value.component(c));
            let component = matrix.residual(&values, &source)?;
            for (value, &r) in residual.iter_mut().zip(&component) {
                value.set_component(c, r);
            }
        }
        Ok(residual)
    }
}

/// Whether uniform values lie in the null space of `matrix`, i.e. every row sums to zero.
/// Collective.
fn floating(matrix: &LduMatrix<'_>) -> bool {
    let row_sums = matrix.g_sum_mag(&matrix.sum_a());
    row_sums <= 1e-10 * matrix.g_sum_mag(matrix.diag())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dimensions::{DIMLESS, VOLUME};
    use crate::linalg::SolverKind;
    use crate::mesh::{BlockMesh, Side};
    use crate::matrix::line_equation;
    use crate::test_util::assert_all_close;
    use crate::Vector3;

    #[test]
    fn test_solve_line() {
        let mesh = Mesh::line(10, 1.).unwrap();
        let mut psi = VolField::builder(&mesh, "T", DIMLESS)
            .fixed_value("left", 0.)
            .fixed_value("right", 1.)
            .build()
            .unwrap();
        let mut matrix = line_equation(&mesh, &psi);
        let controls = SolverControls::default().with_tolerance(1e-12);
        let performance = matrix.solve(&mesh, &mut psi, &controls).unwrap();
        assert!(performance.converged);
        let exact = nd::Array1::from_shape_fn(10, |cell| (cell as Float + 0.5) / 10.);
        assert_all_close(psi.internal(), &exact).abs_tol(Some(1e-9));
        let residual = matrix.residual(&mesh, &psi).unwrap();
        assert!(residual.iter().all(|r| r.abs() < 1e-8));
    }

    #[test]
    fn test_empty_and_mismatched_equations() {
        let mesh = Mesh::line(4, 1.).unwrap();
        let mut psi = VolField::builder(&mesh, "T", DIMLESS).build().unwrap();
        let mut empty = FvMatrix::new(&mesh, &psi, VOLUME);
        assert!(matches!(
            empty.solve(&mesh, &mut psi, &SolverControls::default()),
            Err(FvError::EmptyEquation { .. })
        ));
        let mut other = VolField::builder(&mesh, "p", DIMLESS).build().unwrap();
        let mut matrix = line_equation(&mesh, &psi);
        assert!(matches!(
            matrix.solve(&mesh, &mut other, &SolverControls::default()),
            Err(FvError::FieldMismatch { .. })
        ));
    }

    #[test]
    fn test_vector_components_in_two_dimensions() {
        let mesh = BlockMesh::two_dimensional([3, 3], [1., 1.]).build().unwrap();
        let mut u = VolField::builder(&mesh, "U", DIMLESS)
            .uniform(Vector3::new(0., 0., 7.))
            .build()
            .unwrap();
        let mut matrix = FvMatrix::term(&mesh, &u, VOLUME);
        matrix.diag_mut().fill(2.);
        matrix.source_mut().fill(Vector3::new(2., 4., 6.));
        let controls = SolverControls::default().with_solver(SolverKind::Diagonal);
        matrix.solve(&mesh, &mut u, &controls).unwrap();
        for value in u.internal() {
            assert_eq!(*value, Vector3::new(1., 2., 7.));
        }
    }

    #[test]
    fn test_cyclic_coupling() {
        // A periodic line: the solution of a pure diffusion problem with one pinned cell is
        // uniform.
        let mesh = BlockMesh::new([6, 1, 1], [6., 1., 1.])
            .with_cyclic(Side::XMin, "left", "right")
            .with_side(Side::YMin, "sides", crate::mesh::PatchKind::Empty)
            .with_side(Side::YMax, "sides", crate::mesh::PatchKind::Empty)
            .with_side(Side::ZMin, "sides", crate::mesh::PatchKind::Empty)
            .with_side(Side::ZMax, "sides", crate::mesh::PatchKind::Empty)
            .build()
            .unwrap();
        let mut psi = VolField::builder(&mesh, "T", DIMLESS)
            .from_fn(|centre| centre.x)
            .build()
            .unwrap();
        psi.correct_boundary_conditions(&mesh).unwrap();
        let mut matrix = FvMatrix::term(&mesh, &psi, VOLUME);
        matrix.upper_mut().fill(-1.);
        matrix.diag_mut().fill(2.);
        for name in ["left", "right"] {
            let patch = mesh.find_patch(name).unwrap();
            // Coupled patches carry the diagonal part in the internal coefficients.
            matrix.diag_mut()[mesh.patch_geometry(patch).face_cells[0]] -= 1.;
            matrix.internal_coeffs_mut(patch).fill(1.);
            matrix.boundary_coeffs_mut(patch).fill(1.);
        }
        matrix.set_values(&mesh, &mut psi, &[0], &[3.]).unwrap();
        let controls = SolverControls::default()
            .with_solver(SolverKind::PBiCGStab)
            .with_tolerance(1e-12);
        matrix.solve(&mesh, &mut psi, &controls).unwrap();
        assert_all_close(psi.internal(), &nd::Array1::from_elem(6, 3.)).abs_tol(Some(1e-8));
    }

    #[test]
    fn test_floating_level_needs_reference() {
        let mesh = Mesh::line(6, 1.).unwrap();
        let mut psi = VolField::builder(&mesh, "p", DIMLESS).build().unwrap();
        let mut matrix = FvMatrix::term(&mesh, &psi, VOLUME);
        matrix.upper_mut().fill(-1.);
        for face in 0..mesh.n_internal_faces() {
            matrix.diag_mut()[face] += 1.;
            matrix.diag_mut()[face + 1] += 1.;
        }
        let controls = SolverControls::default().with_tolerance(1e-12);
        assert!(matches!(
            matrix.clone().solve(&mesh, &mut psi, &controls),
            Err(FvError::Singular(_))
        ));

        // A time derivative alone fixes the level.
        let mut damped = matrix.clone();
        damped.diag_mut().mapv_inplace(|diag| diag + 0.1);
        damped.solve(&mesh, &mut psi, &controls).unwrap();

        matrix.set_reference(&mesh, &mut psi, Some(2), 1.).unwrap();
        matrix.solve(&mesh, &mut psi, &controls).unwrap();
        assert_all_close(psi.internal(), &nd::Array1::from_elem(6, 1.)).abs_tol(Some(1e-8));
    }
}
