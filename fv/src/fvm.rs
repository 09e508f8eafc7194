//! Implicit operators: each returns the matrix of one term of an equation for `psi`.

use ndarray as nd;

use crate::control::Time;
use crate::dimensions::{AREA, TIME, VOLUME};
use crate::schemes::{uncorrected_sn_grad, FvSchemes, InterpolationScheme};
use crate::{
    DimensionSet, Dimensioned, Float, FvMatrix, FvResult, Mesh, SurfaceField, Value, VolField,
};

/// The diffusivity of a Laplacian term.
#[derive(Clone, Copy, Debug)]
pub enum Diffusivity<'a> {
    Uniform(&'a Dimensioned<Float>),
    Vol(&'a VolField<Float>),
    Surface(&'a SurfaceField<Float>),
}

impl Diffusivity<'_> {
    pub fn name(&self) -> &str {
        match self {
            Self::Uniform(gamma) => &gamma.name,
            Self::Vol(gamma) => gamma.name(),
            Self::Surface(gamma) => gamma.name(),
        }
    }

    pub fn dimensions(&self) -> DimensionSet {
        match self {
            Self::Uniform(gamma) => gamma.dimensions,
            Self::Vol(gamma) => gamma.dimensions(),
            Self::Surface(gamma) => gamma.dimensions(),
        }
    }

    /// Face values, interpolating cell values with `scheme`.
    pub fn face_values(
        &self,
        mesh: &Mesh,
        scheme: &InterpolationScheme,
    ) -> FvResult<SurfaceField<Float>> {
        match self {
            Self::Uniform(gamma) => Ok(SurfaceField::uniform(
                mesh,
                gamma.name.clone(),
                gamma.dimensions,
                gamma.value,
            )),
            Self::Vol(gamma) => scheme.interpolate(mesh, None, gamma),
            Self::Surface(gamma) => {
                gamma.check_mesh(mesh)?;
                Ok((*gamma).clone())
            }
        }
    }

    /// `gamma_f*|Sf|` on every face.
    pub(crate) fn times_face_areas(
        &self,
        mesh: &Mesh,
        scheme: &InterpolationScheme,
    ) -> FvResult<SurfaceField<Float>> {
        Ok(&self.face_values(mesh, scheme)? * &SurfaceField::face_area_magnitudes(mesh))
    }
}

/// Per cell, the sum of the face values of `field` leaving the cell.
pub(crate) fn signed_face_sum<T: Value>(mesh: &Mesh, field: &SurfaceField<T>) -> nd::Array1<T> {
    let mut sum = nd::Array1::from_elem(mesh.n_cells(), T::zero());
    let (owner, neighbour) = (mesh.owner(), mesh.neighbour());
    for (face, &value) in field.internal().iter().enumerate() {
        sum[owner[face]] += value;
        sum[neighbour[face]] -= value;
    }
    for patch in 0..mesh.patches().len() {
        let face_cells = &mesh.patch_geometry(patch).face_cells;
        for (&cell, &value) in face_cells.iter().zip(field.boundary(patch)) {
            sum[cell] += value;
        }
    }
    sum
}

/// `diag[l] -= lower`, `diag[u] -= upper`: the diagonal that makes every row sum to zero.
fn neg_sum_diag<T: Value>(mesh: &Mesh, matrix: &mut FvMatrix<T>) {
    let (owner, neighbour) = (mesh.owner(), mesh.neighbour());
    let upper = matrix.upper().clone();
    let lower = matrix.lower().clone();
    let diag = matrix.diag_mut();
    for face in 0..upper.len() {
        diag[owner[face]] -= lower[face];
        diag[neighbour[face]] -= upper[face];
    }
}

/// Moves an explicit face flux correction to the source and keeps it for [`FvMatrix::flux`].
fn add_face_flux_correction<T: Value>(
    mesh: &Mesh,
    matrix: &mut FvMatrix<T>,
    correction: SurfaceField<T>,
) {
    let divergence = signed_face_sum(mesh, &correction);
    *matrix.source_mut() -= &divergence;
    matrix.set_face_flux_correction(correction);
}

fn time_levels<T: Value>(psi: &VolField<T>) -> (&VolField<T>, &VolField<T>) {
    let old = psi.old_time();
    (old, old.old_time())
}

/// `d(psi)/dt`.
pub fn ddt<T: Value>(
    mesh: &Mesh,
    schemes: &FvSchemes,
    time: &Time,
    psi: &VolField<T>,
) -> FvResult<FvMatrix<T>> {
    psi.check_mesh(mesh)?;
    let scheme = schemes.ddt(&format!("ddt({})", psi.name()))?;
    let coeffs = scheme.coeffs(time, psi.n_old_times());
    let mut matrix = FvMatrix::term(mesh, psi, psi.dimensions() * VOLUME / TIME);
    let (old, old_old) = time_levels(psi);
    let volumes = mesh.cell_volumes();
    *matrix.diag_mut() = volumes * (coeffs.r_delta_t * coeffs.coeff);
    let source = nd::Zip::from(volumes)
        .and(old.internal())
        .and(old_old.internal())
        .map_collect(|&volume, &old, &old_old| {
            (old * coeffs.coeff_0 - old_old * coeffs.coeff_00) * (coeffs.r_delta_t * volume)
        });
    *matrix.source_mut() = source;
    Ok(matrix)
}

/// `d(rho*psi)/dt` with a density that has its own time levels.
pub fn ddt_rho<T: Value>(
    mesh: &Mesh,
    schemes: &FvSchemes,
    time: &Time,
    rho: &VolField<Float>,
    psi: &VolField<T>,
) -> FvResult<FvMatrix<T>> {
    psi.check_mesh(mesh)?;
    rho.check_mesh(mesh)?;
    let scheme = schemes.ddt(&format!("ddt({},{})", rho.name(), psi.name()))?;
    let coeffs = scheme.coeffs(time, psi.n_old_times().min(rho.n_old_times()));
    let mut matrix = FvMatrix::term(
        mesh,
        psi,
        rho.dimensions() * psi.dimensions() * VOLUME / TIME,
    );
    let (old, old_old) = time_levels(psi);
    let (rho_old, rho_old_old) = time_levels(rho);
    let volumes = mesh.cell_volumes();
    *matrix.diag_mut() = nd::Zip::from(volumes)
        .and(rho.internal())
        .map_collect(|&volume, &rho| coeffs.r_delta_t * coeffs.coeff * rho * volume);
    let mut source = nd::Array1::from_elem(mesh.n_cells(), T::zero());
    for cell in 0..mesh.n_cells() {
        let current = old.internal()[cell] * (coeffs.coeff_0 * rho_old.internal()[cell]);
        let previous =
            old_old.internal()[cell] * (coeffs.coeff_00 * rho_old_old.internal()[cell]);
        source[cell] = (current - previous) * (coeffs.r_delta_t * volumes[cell]);
    }
    *matrix.source_mut() = source;
    Ok(matrix)
}

/// Convection `div(phi, psi)` with face values from the `div(phi,psi)` scheme.
///
/// The implicit part uses the scheme's weights; higher-order corrections are explicit.
pub fn div<T: Value>(
    mesh: &Mesh,
    schemes: &FvSchemes,
    phi: &SurfaceField<Float>,
    psi: &VolField<T>,
) -> FvResult<FvMatrix<T>> {
    psi.check_mesh(mesh)?;
    phi.check_mesh(mesh)?;
    let scheme = schemes.div(&format!("div({},{})", phi.name(), psi.name()))?;
    let weights = scheme.interpolation.weights(mesh, Some(phi), psi)?;
    let mut matrix = FvMatrix::term(mesh, psi, phi.dimensions() * psi.dimensions());

    let lower = nd::Zip::from(weights.internal())
        .and(phi.internal())
        .map_collect(|&w, &phi| -w * phi);
    *matrix.upper_mut() = &lower + phi.internal();
    *matrix.lower_mut() = lower;
    neg_sum_diag(mesh, &mut matrix);

    for patch in 0..mesh.patches().len() {
        let field = psi.boundary_field(patch);
        let ctx = psi.patch_context(mesh, patch);
        let patch_weights = weights.boundary(patch);
        let flux = phi.boundary(patch);
        let internal_coeffs = field.value_internal_coeffs(&ctx, patch_weights)?;
        let boundary_coeffs = field.value_boundary_coeffs(&ctx, patch_weights)?;
        *matrix.internal_coeffs_mut(patch) = nd::Zip::from(&internal_coeffs)
            .and(flux)
            .map_collect(|&coeff, &flux| coeff * flux);
        *matrix.boundary_coeffs_mut(patch) = nd::Zip::from(&boundary_coeffs)
            .and(flux)
            .map_collect(|&coeff, &flux| coeff * -flux);
    }

    if let Some(correction) = scheme.interpolation.correction(mesh, Some(phi), psi)? {
        add_face_flux_correction(mesh, &mut matrix, phi * &correction);
    }
    if scheme.bounded {
        let div_phi = crate::fvc::div(mesh, phi)?;
        matrix = matrix.try_sub(&sp(mesh, &div_phi, psi)?)?;
    }
    Ok(matrix)
}

/// Diffusion `laplacian(gamma, psi)`, with the explicit non-orthogonal correction of the
/// scheme's face-normal gradient.
pub fn laplacian<T: Value>(
    mesh: &Mesh,
    schemes: &FvSchemes,
    gamma: Diffusivity<'_>,
    psi: &VolField<T>,
) -> FvResult<FvMatrix<T>> {
    psi.check_mesh(mesh)?;
    let scheme = schemes.laplacian(&format!("laplacian({},{})", gamma.name(), psi.name()))?;
    let gamma_mag_sf = gamma.times_face_areas(mesh, &scheme.interpolation)?;
    let mut matrix = FvMatrix::term(
        mesh,
        psi,
        gamma.dimensions() * psi.dimensions() / AREA * VOLUME,
    );

    *matrix.upper_mut() = gamma_mag_sf.internal() * mesh.non_orth_delta_coeffs();
    neg_sum_diag(mesh, &mut matrix);

    for patch in 0..mesh.patches().len() {
        let field = psi.boundary_field(patch);
        let ctx = psi.patch_context(mesh, patch);
        let gamma_b = gamma_mag_sf.boundary(patch);
        let internal_coeffs = field.gradient_internal_coeffs(&ctx)?;
        let boundary_coeffs = field.gradient_boundary_coeffs(&ctx)?;
        *matrix.internal_coeffs_mut(patch) = nd::Zip::from(&internal_coeffs)
            .and(gamma_b)
            .map_collect(|&coeff, &gamma| coeff * gamma);
        *matrix.boundary_coeffs_mut(patch) = nd::Zip::from(&boundary_coeffs)
            .and(gamma_b)
            .map_collect(|&coeff, &gamma| coeff * -gamma);
    }

    if scheme.sn_grad.corrected() {
        let uncorrected = uncorrected_sn_grad(mesh, psi)?;
        let correction = scheme.sn_grad.correction(mesh, psi, &uncorrected)?;
        add_face_flux_correction(mesh, &mut matrix, &gamma_mag_sf * &correction);
    }
    Ok(matrix)
}

/// Implicit source `coeff*psi`.
pub fn sp<T: Value>(
    mesh: &Mesh,
    coeff: &VolField<Float>,
    psi: &VolField<T>,
) -> FvResult<FvMatrix<T>> {
    psi.check_mesh(mesh)?;
    coeff.check_mesh(mesh)?;
    let mut matrix = FvMatrix::term(mesh, psi, coeff.dimensions() * psi.dimensions() * VOLUME);
    *matrix.diag_mut() = coeff.internal() * mesh.cell_volumes();
    Ok(matrix)
}

/// `coeff*psi`, implicit where `coeff` is positive and explicit where it is negative, so that
/// the diagonal is never weakened.
pub fn su_sp<T: Value>(
    mesh: &Mesh,
    coeff: &VolField<Float>,
    psi: &VolField<T>,
) -> FvResult<FvMatrix<T>> {
    psi.check_mesh(mesh)?;
    coeff.check_mesh(mesh)?;
    let mut matrix = FvMatrix::term(mesh, psi, coeff.dimensions() * psi.dimensions() * VOLUME);
    let volumes = mesh.cell_volumes();
    *matrix.diag_mut() = nd::Zip::from(coeff.internal())
        .and(volumes)
        .map_collect(|&coeff, &volume| coeff.max(0.) * volume);
    let source = nd::Zip::from(coeff.internal())
        .and(volumes)
        .and(psi.internal())
        .map_collect(|&coeff, &volume, &value| value * (-coeff.min(0.) * volume));
    *matrix.source_mut() = source;
    Ok(matrix)
}

/// Explicit source `su` in the equation for `psi`.
pub fn su<T: Value>(mesh: &Mesh, su: &VolField<T>, psi: &VolField<T>) -> FvResult<FvMatrix<T>> {
    psi.check_mesh(mesh)?;
    su.check_mesh(mesh)?;
    let mut matrix = FvMatrix::term(mesh, psi, su.dimensions() * VOLUME);
    *matrix.source_mut() = nd::Zip::from(su.internal())
        .and(mesh.cell_volumes())
        .map_collect(|&value, &volume| -(value * volume));
    Ok(matrix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dimensions::{DIMLESS, KINEMATIC_VISCOSITY, VELOCITY};
    use crate::linalg::SolverControls;
    use crate::mesh::BlockMesh;
    use crate::schemes::Section;
    use crate::Vector3;
    use approx::assert_abs_diff_eq;

    /// Flux of a uniform velocity `u` in x, named `phi`.
    fn uniform_flux(mesh: &Mesh, u: Float) -> SurfaceField<Float> {
        let velocity = SurfaceField::uniform(mesh, "U", VELOCITY, Vector3::new(u, 0., 0.));
        let mut phi = velocity.dot_areas(mesh).unwrap();
        phi.rename("phi");
        phi
    }

    fn nu() -> Dimensioned<Float> {
        Dimensioned::new("nu", KINEMATIC_VISCOSITY, 1.)
    }

    #[test]
    fn test_laplacian_rows_are_conservative() {
        let mesh = BlockMesh::new([3, 3, 2], [1., 2., 1.])
            .with_skew(0.3)
            .build()
            .unwrap();
        let psi = VolField::builder(&mesh, "T", DIMLESS)
            .from_fn(|centre| centre.x * centre.y)
            .build()
            .unwrap();
        let schemes = FvSchemes::default().with_scheme(
            Section::Laplacian,
            "default",
            "Gauss linear uncorrected",
        );
        let nu = nu();
        let matrix = laplacian(&mesh, &schemes, Diffusivity::Uniform(&nu), &psi).unwrap();
        // Zero-gradient boundaries contribute nothing, so A·psi sums to zero for any psi.
        let mut total = 0.;
        for cell in 0..mesh.n_cells() {
            total += matrix.diag()[cell] * psi.internal()[cell];
        }
        for face in 0..mesh.n_internal_faces() {
            let (own, nei) = (mesh.owner()[face], mesh.neighbour()[face]);
            total += matrix.upper()[face] * psi.internal()[nei];
            total += matrix.lower()[face] * psi.internal()[own];
        }
        assert_abs_diff_eq!(total, 0., epsilon = 1e-12);
        assert_eq!(matrix.dimensions(), KINEMATIC_VISCOSITY * DIMLESS / AREA * VOLUME);
    }

    #[test]
    fn test_steady_diffusion_on_line() {
        let mesh = Mesh::line(8, 2.).unwrap();
        let mut psi = VolField::builder(&mesh, "T", DIMLESS)
            .fixed_value("left", 1.)
            .fixed_value("right", 5.)
            .build()
            .unwrap();
        let nu = nu();
        let mut equation =
            laplacian(&mesh, &FvSchemes::default(), Diffusivity::Uniform(&nu), &psi).unwrap();
        let controls = SolverControls::default().with_tolerance(1e-12);
        equation.solve(&mesh, &mut psi, &controls).unwrap();
        for (&centre, &value) in mesh.cell_centres().iter().zip(psi.internal()) {
            assert_abs_diff_eq!(value, 1. + 2. * centre.x, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_convection_upwind_coefficients() {
        let mesh = Mesh::line(4, 4.).unwrap();
        let psi = VolField::builder(&mesh, "T", DIMLESS)
            .fixed_value("left", 1.)
            .build()
            .unwrap();
        let phi = uniform_flux(&mesh, 2.);
        let schemes = FvSchemes::default().with_scheme(Section::Div, "div(phi,T)", "Gauss upwind");
        let matrix = div(&mesh, &schemes, &phi, &psi).unwrap();
        assert_eq!(matrix.upper(), &nd::arr1(&[0., 0., 0.]));
        assert_eq!(matrix.lower(), &nd::arr1(&[-2., -2., -2.]));
        assert_eq!(matrix.diag(), &nd::arr1(&[2., 2., 2., 0.]));
        let left = mesh.find_patch("left").unwrap();
        let right = mesh.find_patch("right").unwrap();
        // Inflow through the fixed-value inlet goes to the source; the outlet is implicit.
        assert_eq!(matrix.internal_coeffs(left)[0], 0.);
        assert_eq!(matrix.boundary_coeffs(left)[0], 2.);
        assert_eq!(matrix.internal_coeffs(right)[0], 2.);
        assert_eq!(matrix.boundary_coeffs(right)[0], 0.);
    }

    #[test]
    fn test_upwind_convection_carries_inlet_value() {
        let mesh = Mesh::line(20, 1.).unwrap();
        let mut psi = VolField::builder(&mesh, "T", DIMLESS)
            .fixed_value("left", 1.)
            .build()
            .unwrap();
        let phi = uniform_flux(&mesh, 1.);
        let schemes = FvSchemes::default().with_scheme(Section::Div, "div(phi,T)", "Gauss upwind");
        // Pure convection of an inlet value through a zero-gradient outlet.
        let mut equation = div(&mesh, &schemes, &phi, &psi).unwrap();
        let controls = SolverControls::default()
            .with_solver(crate::linalg::SolverKind::PBiCGStab)
            .with_tolerance(1e-12);
        equation.solve(&mesh, &mut psi, &controls).unwrap();
        for &value in psi.internal() {
            assert_abs_diff_eq!(value, 1., epsilon = 1e-8);
        }
    }

    #[test]
    fn test_sources() {
        let mesh = Mesh::line(2, 2.).unwrap();
        let psi = VolField::builder(&mesh, "T", DIMLESS)
            .uniform(3.)
            .build()
            .unwrap();
        let coeff = VolField::calculated(&mesh, "k", DIMLESS, nd::arr1(&[2., -1.])).unwrap();
        let matrix = su_sp(&mesh, &coeff, &psi).unwrap();
        assert_eq!(matrix.diag(), &nd::arr1(&[2., 0.]));
        assert_eq!(matrix.source(), &nd::arr1(&[0., 3.]));
        let matrix = sp(&mesh, &coeff, &psi).unwrap();
        assert_eq!(matrix.diag(), &nd::arr1(&[2., -1.]));
        let matrix = su(&mesh, &coeff, &psi).unwrap();
        assert_eq!(matrix.source(), &nd::arr1(&[-2., 1.]));
    }

    #[test]
    fn test_euler_ddt() {
        let mesh = Mesh::line(3, 3.).unwrap();
        let mut psi = VolField::builder(&mesh, "U", DIMLESS)
            .uniform(Vector3::new(1., 0., 0.))
            .build()
            .unwrap();
        psi.store_old_times(1);
        let time = Time::new(0., 1., 0.5).unwrap();
        let matrix = ddt(&mesh, &FvSchemes::default(), &time, &psi).unwrap();
        assert_eq!(matrix.diag(), &nd::arr1(&[2., 2., 2.]));
        assert_eq!(matrix.source()[1], Vector3::new(2., 0., 0.));
        assert_eq!(matrix.dimensions(), DIMLESS * VOLUME / TIME);
    }
}
