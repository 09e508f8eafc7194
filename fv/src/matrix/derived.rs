use ndarray as nd;

use super::FvMatrix;
use crate::dimensions::VOLUME;
use crate::{Float, FvError, FvResult, Mesh, SurfaceField, Value, VolField};

impl<T: Value> FvMatrix<T> {
    /// Sum of the magnitudes of the off-diagonal coefficients in each row.
    fn sum_mag_off_diag(&self, n_cells: usize, mesh: &Mesh) -> nd::Array1<Float> {
        let mut sum = nd::Array1::zeros(n_cells);
        let (owner, neighbour) = (mesh.owner(), mesh.neighbour());
        let lower = self.lower();
        for face in 0..self.upper.len() {
            sum[owner[face]] += self.upper[face].abs();
            sum[neighbour[face]] += lower[face].abs();
        }
        sum
    }

    /// The boundary contribution to the diagonal used by relaxation: the average of the
    /// internal coefficients on ordinary patches, their first component on coupled ones.
    fn boundary_diag(&self, mesh: &Mesh, psi: &VolField<T>) -> nd::Array1<Float> {
        let mut diag = nd::Array1::zeros(mesh.n_cells());
        for (patch, coeffs) in self.internal_coeffs.iter().enumerate() {
            let coupled = psi.boundary_field(patch).coupled();
            let face_cells = &mesh.patch_geometry(patch).face_cells;
            for (&cell, coeff) in face_cells.iter().zip(coeffs) {
                diag[cell] += if coupled {
                    coeff.component(0)
                } else {
                    coeff.cmpt_av()
                };
            }
        }
        diag
    }

    /// Under-relaxes the equation in place.
    ///
    /// The diagonal is first made at least as large as the sum of the off-diagonal magnitudes,
    /// then divided by `alpha`; the source gains the diagonal increase times the current
    /// values, so that the solution of the relaxed system at convergence is unchanged.
    pub fn relax(&mut self, mesh: &Mesh, psi: &VolField<T>, alpha: Float) -> FvResult<()> {
        if alpha.is_nan() || alpha <= 0. || alpha > 1. {
            return Err(FvError::invalid(
                "relaxationFactors",
                &self.psi_name,
                format!("factor {alpha} is outside (0, 1]"),
            ));
        }
        self.check_mesh(mesh)?;
        self.check_field(psi)?;
        let n_cells = mesh.n_cells();
        let mut sum_off = self.sum_mag_off_diag(n_cells, mesh);
        for (patch, coeffs) in self.boundary_coeffs.iter().enumerate() {
            if !psi.boundary_field(patch).coupled() {
                continue;
            }
            let face_cells = &mesh.patch_geometry(patch).face_cells;
            for (&cell, coeff) in face_cells.iter().zip(coeffs) {
                sum_off[cell] += coeff.component(0).abs();
            }
        }
        let boundary_diag = self.boundary_diag(mesh, psi);
        let values = psi.internal();
        for cell in 0..n_cells {
            let diag = self.diag[cell] + boundary_diag[cell];
            let sign = if diag < 0. { -1. } else { 1. };
            let relaxed = sign * diag.abs().max(sum_off[cell]) / alpha - boundary_diag[cell];
            self.source[cell] += values[cell] * (relaxed - self.diag[cell]);
            self.diag[cell] = relaxed;
        }
        log::debug!("Relaxed equation for {} with factor {alpha}", self.psi_name);
        Ok(())
    }

    /// Fixes `psi` to `values` in `cells` by eliminating those cells from the system.
    ///
    /// The rows of the fixed cells reduce to `diag·psi = diag·value`; their couplings move to
    /// the sources of the neighbouring rows.
    pub fn set_values(
        &mut self,
        mesh: &Mesh,
        psi: &mut VolField<T>,
        cells: &[usize],
        values: &[T],
    ) -> FvResult<()> {
        if cells.len() != values.len() {
            return Err(FvError::size_mismatch(
                format!("values fixed in {}", self.psi_name),
                cells.len(),
                values.len(),
            ));
        }
        self.check_mesh(mesh)?;
        self.check_field(psi)?;
        let n_internal_faces = mesh.n_internal_faces();
        let (owner, neighbour) = (mesh.owner(), mesh.neighbour());
        for (&cell, &value) in cells.iter().zip(values) {
            if cell >= mesh.n_cells() {
                return Err(FvError::invalid(
                    "cells",
                    cell.to_string(),
                    format!("mesh has {} cells", mesh.n_cells()),
                ));
            }
            psi.internal_mut()[cell] = value;
            self.source[cell] = value * self.diag[cell];
            for &face in &mesh.cells()[cell] {
                if face < n_internal_faces {
                    if owner[face] == cell {
                        let coeff = self.lower()[face];
                        self.source[neighbour[face]] -= value * coeff;
                    } else {
                        let coeff = self.upper[face];
                        self.source[owner[face]] -= value * coeff;
                    }
                    self.upper[face] = 0.;
                    if let Some(lower) = &mut self.lower {
                        lower[face] = 0.;
                    }
                    continue;
                }
                let Some(patch) = mesh
                    .patches()
                    .iter()
                    .find(|patch| patch.size() > 0 && patch.face_range().contains(&face))
                else {
                    continue;
                };
                let local = face - patch.start();
                self.internal_coeffs[patch.index()][local] = T::zero();
                self.boundary_coeffs[patch.index()][local] = T::zero();
            }
        }
        Ok(())
    }

    /// Pins `psi` in `cell` to `value` if no boundary condition fixes its level.
    ///
    /// In parallel every rank calls this; only the rank holding the reference cell passes
    /// `Some`.
    pub fn set_reference(
        &mut self,
        mesh: &Mesh,
        psi: &mut VolField<T>,
        cell: Option<usize>,
        value: T,
    ) -> FvResult<()> {
        if !psi.needs_reference(mesh) {
            return Ok(());
        }
        match cell {
            Some(cell) => self.set_values(mesh, psi, &[cell], &[value]),
            None => Ok(()),
        }
    }

    fn cmpt_av_boundary_diag(&self, mesh: &Mesh) -> nd::Array1<Float> {
        let mut diag = nd::Array1::zeros(mesh.n_cells());
        for (patch, coeffs) in self.internal_coeffs.iter().enumerate() {
            let face_cells = &mesh.patch_geometry(patch).face_cells;
            for (&cell, coeff) in face_cells.iter().zip(coeffs) {
                diag[cell] += coeff.cmpt_av();
            }
        }
        diag
    }

    /// The central coefficient per unit volume, boundary contributions included.
    pub fn a(&self, mesh: &Mesh) -> FvResult<VolField<Float>> {
        self.check_mesh(mesh)?;
        let boundary_diag = self.cmpt_av_boundary_diag(mesh);
        let values = nd::Zip::from(&self.diag)
            .and(&boundary_diag)
            .and(mesh.cell_volumes())
            .map_collect(|&diag, &boundary, &volume| (diag + boundary) / volume);
        VolField::extrapolated(
            mesh,
            format!("A({})", self.psi_name),
            self.dimensions / self.psi_dimensions / VOLUME,
            values,
        )
    }

    /// Everything but the central coefficient applied to `psi`, per unit volume: the
    /// neighbour contributions, the source, and the boundary sources.
    pub fn h(&self, mesh: &Mesh, psi: &VolField<T>) -> FvResult<VolField<T>> {
        self.check_mesh(mesh)?;
        self.check_field(psi)?;
        let values = psi.internal();
        let mut h = self.source.clone();
        for (patch, coeffs) in self.internal_coeffs.iter().enumerate() {
            let face_cells = &mesh.patch_geometry(patch).face_cells;
            for (&cell, &coeff) in face_cells.iter().zip(coeffs) {
                let excess = T::uniform(coeff.cmpt_av()) - coeff;
                h[cell] += excess.cmpt_multiply(values[cell]);
            }
        }
        let (owner, neighbour) = (mesh.owner(), mesh.neighbour());
        let lower = self.lower();
        for face in 0..self.upper.len() {
            let (own, nei) = (owner[face], neighbour[face]);
            h[own] -= values[nei] * self.upper[face];
            h[nei] -= values[own] * lower[face];
        }
        for (patch, coeffs) in self.boundary_coeffs.iter().enumerate() {
            let field = psi.boundary_field(patch);
            let face_cells = &mesh.patch_geometry(patch).face_cells;
            match field.patch_neighbour_field().filter(|_| field.coupled()) {
                Some(neighbour_values) => {
                    for ((&cell, &coeff), &value) in
                        face_cells.iter().zip(coeffs).zip(neighbour_values)
                    {
                        h[cell] += coeff.cmpt_multiply(value);
                    }
                }
                None if field.coupled() => {}
                None => {
                    for (&cell, &coeff) in face_cells.iter().zip(coeffs) {
                        h[cell] += coeff;
                    }
                }
            }
        }
        nd::Zip::from(&mut h)
            .and(mesh.cell_volumes())
            .for_each(|h, &volume| *h = *h / volume);
        VolField::extrapolated(
            mesh,
            format!("H({})", self.psi_name),
            self.dimensions / VOLUME,
            h,
        )
    }

    /// Negated off-diagonal row sums plus the coupled boundary coefficients, per unit volume.
    pub fn h1(&self, mesh: &Mesh, psi: &VolField<T>) -> FvResult<VolField<Float>> {
        self.check_mesh(mesh)?;
        self.check_field(psi)?;
        let mut h1 = nd::Array1::<Float>::zeros(mesh.n_cells());
        let (owner, neighbour) = (mesh.owner(), mesh.neighbour());
        let lower = self.lower();
        for face in 0..self.upper.len() {
            h1[owner[face]] -= self.upper[face];
            h1[neighbour[face]] -= lower[face];
        }
        for (patch, coeffs) in self.boundary_coeffs.iter().enumerate() {
            if !psi.boundary_field(patch).coupled() {
                continue;
            }
            let face_cells = &mesh.patch_geometry(patch).face_cells;
            for (&cell, coeff) in face_cells.iter().zip(coeffs) {
                h1[cell] += coeff.cmpt_av();
            }
        }
        h1 /= mesh.cell_volumes();
        VolField::extrapolated(
            mesh,
            format!("H(1)({})", self.psi_name),
            self.dimensions / self.psi_dimensions / VOLUME,
            h1,
        )
    }

    /// Face fluxes implied by the matrix coefficients for `psi`, including any explicit face
    /// flux correction.
    pub fn flux(&self, mesh: &Mesh, psi: &VolField<T>) -> FvResult<SurfaceField<T>> {
        self.check_mesh(mesh)?;
        self.check_field(psi)?;
        let values = psi.internal();
        let (owner, neighbour) = (mesh.owner(), mesh.neighbour());
        let lower = self.lower();
        let internal = nd::Array1::from_shape_fn(self.upper.len(), |face| {
            values[neighbour[face]] * self.upper[face] - values[owner[face]] * lower[face]
        });
        let boundary = (0..mesh.patches().len())
            .map(|patch| {
                let field = psi.boundary_field(patch);
                let face_cells = &mesh.patch_geometry(patch).face_cells;
                let internal_coeffs = &self.internal_coeffs[patch];
                let boundary_coeffs = &self.boundary_coeffs[patch];
                let neighbour_values = field.patch_neighbour_field().filter(|_| field.coupled());
                nd::Array1::from_shape_fn(face_cells.len(), |face| {
                    let inside = internal_coeffs[face].cmpt_multiply(values[face_cells[face]]);
                    match neighbour_values {
                        Some(neighbour_values) => {
                            inside - boundary_coeffs[face].cmpt_multiply(neighbour_values[face])
                        }
                        None => inside - boundary_coeffs[face],
                    }
                })
            })
            .collect();
        let flux = SurfaceField::new(
            mesh,
            format!("flux({})", self.psi_name),
            self.dimensions,
            internal,
            boundary,
        )?;
        match &self.face_flux_correction {
            Some(correction) => flux.try_add(correction),
            None => Ok(flux),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dimensions::DIMLESS;
    use crate::linalg::SolverControls;
    use crate::matrix::line_equation;
    use approx::assert_abs_diff_eq;

    fn line_field(mesh: &Mesh) -> VolField<Float> {
        VolField::builder(mesh, "T", DIMLESS)
            .fixed_value("left", 0.)
            .fixed_value("right", 1.)
            .build()
            .unwrap()
    }

    fn tight() -> SolverControls {
        SolverControls::default().with_tolerance(1e-13)
    }

    fn exact(cell: usize) -> Float {
        (cell as Float + 0.5) / 10.
    }

    #[test]
    fn test_relax_keeps_solution() {
        let mesh = Mesh::line(10, 1.).unwrap();
        let mut psi = line_field(&mesh);
        line_equation(&mesh, &psi)
            .solve(&mesh, &mut psi, &tight())
            .unwrap();

        let mut matrix = line_equation(&mesh, &psi);
        matrix.relax(&mesh, &psi, 0.5).unwrap();
        // Interior rows are exactly diagonally dominant, so only the factor applies.
        assert_abs_diff_eq!(matrix.diag()[5], 40., epsilon = 1e-12);
        matrix.solve(&mesh, &mut psi, &tight()).unwrap();
        for (cell, &value) in psi.internal().iter().enumerate() {
            assert_abs_diff_eq!(value, exact(cell), epsilon = 1e-9);
        }

        assert!(matrix.relax(&mesh, &psi, 0.).is_err());
        assert!(matrix.relax(&mesh, &psi, 1.5).is_err());
    }

    #[test]
    fn test_pending_relaxation() {
        let mesh = Mesh::line(10, 1.).unwrap();
        let mut psi = line_field(&mesh);
        // Iterating the relaxed equation converges to the unrelaxed solution.
        for _ in 0..200 {
            let mut matrix = line_equation(&mesh, &psi);
            matrix.set_relaxation_factor(0.7);
            matrix.solve(&mesh, &mut psi, &tight()).unwrap();
        }
        for (cell, &value) in psi.internal().iter().enumerate() {
            assert_abs_diff_eq!(value, exact(cell), epsilon = 1e-8);
        }
    }

    #[test]
    fn test_set_values() {
        let mesh = Mesh::line(10, 1.).unwrap();
        let mut psi = line_field(&mesh);
        let mut matrix = line_equation(&mesh, &psi);
        matrix.set_values(&mesh, &mut psi, &[4], &[0.7]).unwrap();
        assert_eq!(matrix.upper()[3], 0.);
        assert_eq!(matrix.upper()[4], 0.);
        matrix.solve(&mesh, &mut psi, &tight()).unwrap();
        assert_abs_diff_eq!(psi.internal()[4], 0.7, epsilon = 1e-12);
        // Linear between the left boundary and the fixed cell centre at 0.45.
        assert_abs_diff_eq!(psi.internal()[2], 0.7 * 0.25 / 0.45, epsilon = 1e-9);
        assert!(matrix
            .set_values(&mesh, &mut psi, &[4, 5], &[0.])
            .is_err());
        assert!(matrix.set_values(&mesh, &mut psi, &[10], &[0.]).is_err());
    }

    #[test]
    fn test_set_reference() {
        let mesh = Mesh::line(6, 1.).unwrap();
        let mut psi = VolField::builder(&mesh, "p", DIMLESS)
            .from_fn(|centre| centre.x)
            .build()
            .unwrap();
        assert!(psi.needs_reference(&mesh));
        let mut matrix = FvMatrix::term(&mesh, &psi, VOLUME);
        matrix.upper_mut().fill(-1.);
        for face in 0..mesh.n_internal_faces() {
            matrix.diag_mut()[face] += 1.;
            matrix.diag_mut()[face + 1] += 1.;
        }
        matrix.set_reference(&mesh, &mut psi, Some(0), 2.).unwrap();
        matrix.solve(&mesh, &mut psi, &tight()).unwrap();
        for &value in psi.internal() {
            assert_abs_diff_eq!(value, 2., epsilon = 1e-9);
        }

        let mut fixed = line_field(&mesh);
        let mut matrix = line_equation(&mesh, &fixed);
        let diag = matrix.diag().clone();
        matrix.set_reference(&mesh, &mut fixed, Some(0), 2.).unwrap();
        assert_eq!(matrix.diag(), &diag);
        assert_eq!(fixed.internal()[0], 0.);
    }

    #[test]
    fn test_h_by_a_recovers_solution() {
        let mesh = Mesh::line(10, 1.).unwrap();
        let mut psi = line_field(&mesh);
        let mut matrix = line_equation(&mesh, &psi);
        matrix.solve(&mesh, &mut psi, &tight()).unwrap();
        let a = matrix.a(&mesh).unwrap();
        let h = matrix.h(&mesh, &psi).unwrap();
        assert_eq!(a.dimensions(), DIMLESS);
        for cell in 0..10 {
            assert_abs_diff_eq!(
                h.internal()[cell] / a.internal()[cell],
                psi.internal()[cell],
                epsilon = 1e-9
            );
        }
        // Off-diagonal coefficients are all -10 per unit length: interior rows sum to 20.
        let h1 = matrix.h1(&mesh, &psi).unwrap();
        assert_abs_diff_eq!(h1.internal()[5], 200., epsilon = 1e-9);
    }

    #[test]
    fn test_flux_is_conservative() {
        let mesh = Mesh::line(10, 1.).unwrap();
        let mut psi = line_field(&mesh);
        let mut matrix = line_equation(&mesh, &psi);
        matrix.solve(&mesh, &mut psi, &tight()).unwrap();
        let flux = matrix.flux(&mesh, &psi).unwrap();
        for &value in flux.internal() {
            assert_abs_diff_eq!(value, -1., epsilon = 1e-9);
        }
        let left = mesh.find_patch("left").unwrap();
        let right = mesh.find_patch("right").unwrap();
        assert_abs_diff_eq!(flux.boundary(left)[0], 1., epsilon = 1e-9);
        assert_abs_diff_eq!(flux.boundary(right)[0], -1., epsilon = 1e-9);
    }
}
