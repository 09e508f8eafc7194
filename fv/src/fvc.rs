//! Explicit operators: each evaluates a term from current field values.

use ndarray as nd;
use num_traits::Zero;

use crate::control::Time;
use crate::dimensions::{AREA, LENGTH, TIME, VOLUME};
use crate::fvm::{signed_face_sum, Diffusivity};
use crate::schemes::{DdtScheme, FvSchemes};
use crate::{
    Dimensioned, Float, FvError, FvResult, Gradable, Mesh, SurfaceField, Tensor, Value, Vector3,
    VolField, SMALL,
};

/// Cell gradient from the `grad(psi)` scheme.
///
/// On non-coupled patches the tangential part comes from the adjacent cell and the normal part
/// from the boundary condition.
pub fn grad<T: Gradable>(
    mesh: &Mesh,
    schemes: &FvSchemes,
    psi: &VolField<T>,
) -> FvResult<VolField<T::Grad>> {
    let name = format!("grad({})", psi.name());
    let scheme = schemes.grad(&name)?;
    let gradients = scheme.component_gradients(mesh, psi)?;
    let unit = |c: usize| T::from_fn(|d| if d == c { 1. } else { 0. });
    let internal = nd::Array1::from_shape_fn(mesh.n_cells(), |cell| {
        (0..T::N_COMPONENTS).fold(T::Grad::zero(), |sum, c| {
            sum + T::outer(&gradients[c].internal()[cell], unit(c))
        })
    });
    let mut gradient = VolField::calculated(mesh, name, psi.dimensions() / LENGTH, internal)?;
    gradient.correct_boundary_conditions(mesh)?;
    for patch in 0..mesh.patches().len() {
        let field = psi.boundary_field(patch);
        if field.coupled() {
            continue;
        }
        let geometry = mesh.patch_geometry(patch);
        let sn_grad = field.sn_grad(&psi.patch_context(mesh, patch))?;
        let values = nd::Array1::from_shape_fn(geometry.face_cells.len(), |face| {
            let inside = gradient.internal()[geometry.face_cells[face]];
            let n = geometry.nf[face];
            inside + T::outer(&n, sn_grad[face] - T::dot_grad(&n, &inside))
        });
        gradient.assign_boundary(patch, &values);
    }
    Ok(gradient)
}

/// Sum of the outgoing face values of each cell, per unit volume.
pub fn surface_integrate<T: Value>(
    mesh: &Mesh,
    field: &SurfaceField<T>,
) -> FvResult<VolField<T>> {
    field.check_mesh(mesh)?;
    let mut sum = signed_face_sum(mesh, field);
    nd::Zip::from(&mut sum)
        .and(mesh.cell_volumes())
        .for_each(|value, &volume| *value = *value / volume);
    VolField::extrapolated(
        mesh,
        format!("surfaceIntegrate({})", field.name()),
        field.dimensions() / VOLUME,
        sum,
    )
}

/// Sum of the face values around each cell, without orientation.
pub fn surface_sum<T: Value>(mesh: &Mesh, field: &SurfaceField<T>) -> FvResult<VolField<T>> {
    field.check_mesh(mesh)?;
    let mut sum = nd::Array1::from_elem(mesh.n_cells(), T::zero());
    let (owner, neighbour) = (mesh.owner(), mesh.neighbour());
    for (face, &value) in field.internal().iter().enumerate() {
        sum[owner[face]] += value;
        sum[neighbour[face]] += value;
    }
    for patch in 0..mesh.patches().len() {
        let face_cells = &mesh.patch_geometry(patch).face_cells;
        for (&cell, &value) in face_cells.iter().zip(field.boundary(patch)) {
            sum[cell] += value;
        }
    }
    VolField::extrapolated(
        mesh,
        format!("surfaceSum({})", field.name()),
        field.dimensions(),
        sum,
    )
}

/// Divergence of a face flux.
pub fn div(mesh: &Mesh, phi: &SurfaceField<Float>) -> FvResult<VolField<Float>> {
    let mut result = surface_integrate(mesh, phi)?;
    result.rename(format!("div({})", phi.name()));
    Ok(result)
}

/// Explicit convection `div(phi, psi)` with the `div(phi,psi)` scheme.
pub fn div_convection<T: Value>(
    mesh: &Mesh,
    schemes: &FvSchemes,
    phi: &SurfaceField<Float>,
    psi: &VolField<T>,
) -> FvResult<VolField<T>> {
    let name = format!("div({},{})", phi.name(), psi.name());
    let scheme = schemes.div(&name)?;
    let face_values = scheme.interpolation.interpolate(mesh, Some(phi), psi)?;
    let mut result = surface_integrate(mesh, &(phi * &face_values))?;
    if scheme.bounded {
        let div_phi = div(mesh, phi)?;
        result = result.try_sub(&(&div_phi * psi))?;
    }
    result.rename(name);
    Ok(result)
}

/// Explicit diffusion `laplacian(gamma, psi)` with the `laplacian(gamma,psi)` scheme.
pub fn laplacian<T: Value>(
    mesh: &Mesh,
    schemes: &FvSchemes,
    gamma: Diffusivity<'_>,
    psi: &VolField<T>,
) -> FvResult<VolField<T>> {
    let name = format!("laplacian({},{})", gamma.name(), psi.name());
    let scheme = schemes.laplacian(&name)?;
    let gamma_mag_sf = gamma.times_face_areas(mesh, &scheme.interpolation)?;
    let sn_grad = scheme.sn_grad.sn_grad(mesh, psi)?;
    let mut result = surface_integrate(mesh, &(&gamma_mag_sf * &sn_grad))?;
    result.rename(name);
    Ok(result)
}

/// Explicit time derivative from the stored old-time levels of `psi`.
pub fn ddt<T: Value>(
    mesh: &Mesh,
    schemes: &FvSchemes,
    time: &Time,
    psi: &VolField<T>,
) -> FvResult<VolField<T>> {
    psi.check_mesh(mesh)?;
    let name = format!("ddt({})", psi.name());
    let coeffs = schemes.ddt(&name)?.coeffs(time, psi.n_old_times());
    let old = psi.old_time();
    let old_old = old.old_time();
    let values = nd::Zip::from(psi.internal())
        .and(old.internal())
        .and(old_old.internal())
        .map_collect(|&value, &old, &old_old| {
            (value * coeffs.coeff - old * coeffs.coeff_0 + old_old * coeffs.coeff_00)
                * coeffs.r_delta_t
        });
    VolField::extrapolated(mesh, name, psi.dimensions() / TIME, values)
}

/// Face values from the `interpolate(psi)` scheme.
pub fn interpolate<T: Value>(
    mesh: &Mesh,
    schemes: &FvSchemes,
    psi: &VolField<T>,
) -> FvResult<SurfaceField<T>> {
    schemes
        .interpolation(&format!("interpolate({})", psi.name()))?
        .interpolate(mesh, None, psi)
}

/// Face-normal gradient from the `snGrad(psi)` scheme.
pub fn sn_grad<T: Value>(
    mesh: &Mesh,
    schemes: &FvSchemes,
    psi: &VolField<T>,
) -> FvResult<SurfaceField<T>> {
    schemes
        .sn_grad(&format!("snGrad({})", psi.name()))?
        .sn_grad(mesh, psi)
}

/// Volumetric face flux `U_f·Sf` of a velocity field.
pub fn flux(
    mesh: &Mesh,
    schemes: &FvSchemes,
    u: &VolField<Vector3>,
) -> FvResult<SurfaceField<Float>> {
    let mut phi = interpolate(mesh, schemes, u)?.dot_areas(mesh)?;
    phi.rename(format!("flux({})", u.name()));
    Ok(phi)
}

/// Cell vectors whose face projections best match a face flux, in the least-squares sense
/// weighted by `1/|Sf|`.
pub fn reconstruct(mesh: &Mesh, phi: &SurfaceField<Float>) -> FvResult<VolField<Vector3>> {
    phi.check_mesh(mesh)?;
    let n_cells = mesh.n_cells();
    let mut tensors = nd::Array1::from_elem(n_cells, Tensor::zeros());
    let mut vectors = nd::Array1::from_elem(n_cells, Vector3::zeros());
    let mut add_face = |cell: usize, sf: &Vector3, mag_sf: Float, flux: Float| {
        tensors[cell] += sf * sf.transpose() / mag_sf;
        vectors[cell] += sf * (flux / mag_sf);
    };
    let (owner, neighbour) = (mesh.owner(), mesh.neighbour());
    for face in 0..mesh.n_internal_faces() {
        let (sf, mag_sf, flux) = (&mesh.sf()[face], mesh.mag_sf()[face], phi.internal()[face]);
        add_face(owner[face], sf, mag_sf, flux);
        add_face(neighbour[face], sf, mag_sf, flux);
    }
    for patch in 0..mesh.patches().len() {
        let geometry = mesh.patch_geometry(patch);
        for (face, &cell) in geometry.face_cells.iter().enumerate() {
            add_face(
                cell,
                &geometry.sf[face],
                geometry.mag_sf[face],
                phi.boundary(patch)[face],
            );
        }
    }
    let solution_directions = mesh.solution_directions();
    let values = tensors
        .iter()
        .zip(&vectors)
        .map(|(tensor, vector)| {
            let mut tensor = *tensor;
            for (direction, &solved) in solution_directions.iter().enumerate() {
                if !solved {
                    tensor[(direction, direction)] += 1.;
                }
            }
            tensor
                .try_inverse()
                .map(|inverse| inverse * vector)
                .ok_or_else(|| FvError::Singular(format!("reconstruct({})", phi.name())))
        })
        .collect::<FvResult<nd::Array1<_>>>()?;
    let mut result = VolField::calculated(
        mesh,
        format!("reconstruct({})", phi.name()),
        phi.dimensions() / AREA,
        values,
    )?;
    result.correct_boundary_conditions(mesh)?;
    Ok(result)
}

/// Volume integral over the whole domain, summed over all ranks.
pub fn domain_integrate<T: Value>(mesh: &Mesh, psi: &VolField<T>) -> FvResult<Dimensioned<T>> {
    psi.check_mesh(mesh)?;
    let weighted = VolField::calculated(
        mesh,
        format!("({}*V)", psi.name()),
        psi.dimensions() * VOLUME,
        nd::Zip::from(psi.internal())
            .and(mesh.cell_volumes())
            .map_collect(|&value, &volume| value * volume),
    )?;
    Ok(Dimensioned::new(
        format!("domainIntegrate({})", psi.name()),
        psi.dimensions() * VOLUME,
        weighted.g_sum(mesh),
    ))
}

/// Time-derivative consistency correction of the face flux for the momentum interpolation.
///
/// `phi_old` is the flux of the previous time step; its difference from the interpolated old
/// velocity is fed back, damped where it is large compared with the flux itself. The
/// correction vanishes on non-coupled patches and for steady schemes.
pub fn ddt_corr(
    mesh: &Mesh,
    schemes: &FvSchemes,
    time: &Time,
    u: &VolField<Vector3>,
    phi_old: &SurfaceField<Float>,
) -> FvResult<SurfaceField<Float>> {
    phi_old.check_mesh(mesh)?;
    let name = format!("ddtCorr({},{})", u.name(), phi_old.name());
    let dimensions = phi_old.dimensions() / TIME;
    let scheme = schemes.ddt(&format!("ddt({})", u.name()))?;
    if scheme == DdtScheme::SteadyState {
        return Ok(SurfaceField::zeros(mesh, name, dimensions));
    }
    let r_delta_t = time.r_delta_t();
    let phi_corr = phi_old.try_sub(&flux(mesh, schemes, u.old_time())?)?;
    let coupling = |corr: Float, phi: Float| {
        let coeff = 1. - (corr.abs() / (phi.abs() + SMALL)).min(1.);
        coeff * r_delta_t * corr
    };
    let mut result = phi_corr.zip_with(phi_old, name, dimensions, coupling)?;
    for patch in 0..mesh.patches().len() {
        if !mesh.patch(patch).is_coupled() {
            result.boundary_mut(patch).fill(0.);
        }
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dimensions::{DIMLESS, KINEMATIC_VISCOSITY, VELOCITY};
    use crate::mesh::BlockMesh;
    use crate::schemes::Section;
    use approx::assert_abs_diff_eq;

    fn linear_field(mesh: &Mesh) -> VolField<Float> {
        let mut psi = VolField::builder(mesh, "psi", DIMLESS)
            .from_fn(|centre| 2. * centre.x + 3. * centre.y)
            .build()
            .unwrap();
        // Boundary values from the exact field.
        for patch in 0..mesh.patches().len() {
            let values = mesh
                .patch_geometry(patch)
                .cf
                .mapv(|cf| 2. * cf.x + 3. * cf.y);
            psi.boundary_field_mut(patch).force_assign(&values);
        }
        psi
    }

    #[test]
    fn test_gauss_gradient_of_linear_field() {
        let mesh = BlockMesh::two_dimensional([4, 3], [2., 1.5]).build().unwrap();
        let psi = linear_field(&mesh);
        let schemes = FvSchemes::default();
        let gradient = grad(&mesh, &schemes, &psi).unwrap();
        for value in gradient.internal() {
            assert_abs_diff_eq!(value.x, 2., epsilon = 1e-10);
            assert_abs_diff_eq!(value.y, 3., epsilon = 1e-10);
        }
        assert_eq!(gradient.dimensions(), DIMLESS / LENGTH);

        let schemes = schemes.with_scheme(Section::Grad, "grad(psi)", "leastSquares");
        let gradient = grad(&mesh, &schemes, &psi).unwrap();
        for value in gradient.internal() {
            assert_abs_diff_eq!(value.x, 2., epsilon = 1e-10);
        }
    }

    #[test]
    fn test_velocity_gradient_is_a_tensor() {
        let mesh = BlockMesh::two_dimensional([3, 3], [1., 1.]).build().unwrap();
        let mut u = VolField::builder(&mesh, "U", VELOCITY)
            .from_fn(|centre| Vector3::new(centre.y, 0., 0.))
            .build()
            .unwrap();
        for patch in 0..mesh.patches().len() {
            let values = mesh
                .patch_geometry(patch)
                .cf
                .mapv(|cf| Vector3::new(cf.y, 0., 0.));
            u.boundary_field_mut(patch).force_assign(&values);
        }
        let gradient = grad(&mesh, &FvSchemes::default(), &u).unwrap();
        // d(Ux)/dy is the (y, x) entry.
        for value in gradient.internal() {
            assert_abs_diff_eq!(value[(1, 0)], 1., epsilon = 1e-10);
            assert_abs_diff_eq!(value[(0, 1)], 0., epsilon = 1e-10);
        }
    }

    #[test]
    fn test_divergence_of_uniform_flow() {
        let mesh = BlockMesh::two_dimensional([3, 2], [3., 2.]).build().unwrap();
        let u = SurfaceField::uniform(&mesh, "U", VELOCITY, Vector3::new(1., 2., 0.));
        let phi = u.dot_areas(&mesh).unwrap();
        let divergence = div(&mesh, &phi).unwrap();
        for &value in divergence.internal() {
            assert_abs_diff_eq!(value, 0., epsilon = 1e-12);
        }
        // Each cell has one outflow face per direction.
        let sum = surface_sum(&mesh, &phi.map_to("|phi|", phi.dimensions(), Float::abs)).unwrap();
        assert_abs_diff_eq!(sum.internal()[0], 2. * (1. + 2.), epsilon = 1e-12);
    }

    #[test]
    fn test_reconstruct_uniform_velocity() {
        let mesh = BlockMesh::two_dimensional([3, 3], [1.5, 1.5])
            .with_skew(0.2)
            .build()
            .unwrap();
        let velocity = Vector3::new(0.5, -1., 0.);
        let phi = SurfaceField::uniform(&mesh, "U", VELOCITY, velocity)
            .dot_areas(&mesh)
            .unwrap();
        let u = reconstruct(&mesh, &phi).unwrap();
        for value in u.internal() {
            assert_abs_diff_eq!(value.x, 0.5, epsilon = 1e-10);
            assert_abs_diff_eq!(value.y, -1., epsilon = 1e-10);
            assert_abs_diff_eq!(value.z, 0., epsilon = 1e-10);
        }
        assert_eq!(u.dimensions(), VELOCITY);
    }

    #[test]
    fn test_laplacian_of_quadratic() {
        let mesh = Mesh::line(10, 1.).unwrap();
        let mut psi = VolField::builder(&mesh, "T", DIMLESS)
            .from_fn(|centre| centre.x * centre.x)
            .fixed_value("left", 0.)
            .fixed_value("right", 1.)
            .build()
            .unwrap();
        psi.correct_boundary_conditions(&mesh).unwrap();
        let nu = Dimensioned::new("nu", KINEMATIC_VISCOSITY, 1.);
        let result =
            laplacian(&mesh, &FvSchemes::default(), Diffusivity::Uniform(&nu), &psi).unwrap();
        for cell in 1..9 {
            assert_abs_diff_eq!(result.internal()[cell], 2., epsilon = 1e-9);
        }
        let integral = domain_integrate(&mesh, &psi).unwrap();
        // Midpoint sum of x^2 over ten cells.
        let expected = (0..10)
            .map(|cell| ((cell as Float + 0.5) / 10.).powi(2) / 10.)
            .sum::<Float>();
        assert_abs_diff_eq!(integral.value, expected, epsilon = 1e-12);
    }

    #[test]
    fn test_ddt_and_ddt_corr() {
        let mesh = Mesh::line(4, 1.).unwrap();
        let mut u = VolField::builder(&mesh, "U", VELOCITY)
            .uniform(Vector3::new(1., 0., 0.))
            .build()
            .unwrap();
        u.store_old_times(1);
        u.internal_mut().fill(Vector3::new(3., 0., 0.));
        let time = Time::new(0., 1., 0.5).unwrap();
        let schemes = FvSchemes::default();
        let ddt_u = ddt(&mesh, &schemes, &time, &u).unwrap();
        assert_abs_diff_eq!(ddt_u.internal()[2].x, 4., epsilon = 1e-12);

        // The old flux disagrees with the old velocity by 0.5 on every face.
        let phi_old = SurfaceField::uniform(&mesh, "phi", VELOCITY * AREA, 1.5);
        let correction = ddt_corr(&mesh, &schemes, &time, &u, &phi_old).unwrap();
        // coefficient 1 - 0.5/1.5, times 1/delta_t, times 0.5.
        assert_abs_diff_eq!(correction.internal()[1], (2. / 3.) * 2. * 0.5, epsilon = 1e-12);
        let left = mesh.find_patch("left").unwrap();
        assert_eq!(correction.boundary(left)[0], 0.);

        let steady = schemes.with_scheme(Section::Ddt, "ddt(U)", "steadyState");
        let correction = ddt_corr(&mesh, &steady, &time, &u, &phi_old).unwrap();
        assert_eq!(correction.max_mag(), 0.);
    }
}
