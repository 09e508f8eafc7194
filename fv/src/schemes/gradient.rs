use ndarray as nd;

use super::SchemeTokens;
use crate::dimensions::LENGTH;
use crate::linalg::parse_kind;
use crate::{Float, FvError, FvResult, Mesh, Tensor, Value, Vector3, VolField, VSMALL};

#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::EnumString, strum::Display, strum::EnumIter)]
enum GradName {
    Gauss,
    #[strum(serialize = "leastSquares")]
    LeastSquares,
    #[strum(serialize = "cellLimited")]
    CellLimited,
}

/// Cell-centred gradient reconstruction.
#[derive(Clone, Debug, PartialEq)]
pub enum GradScheme {
    /// Green-Gauss with linearly interpolated face values.
    GaussLinear,
    /// Inverse-distance-squared weighted least squares over face neighbours.
    LeastSquares,
    /// Scales the gradient of `scheme` so that face extrapolations stay within the range of
    /// the neighbouring cells, widened by `1/coefficient - 1` of that range.
    CellLimited {
        scheme: Box<GradScheme>,
        coefficient: Float,
    },
}

impl GradScheme {
    pub(super) fn parse(tokens: &mut SchemeTokens<'_>) -> FvResult<Self> {
        match parse_kind::<GradName>("gradScheme", tokens.word()?)? {
            GradName::Gauss => {
                let interpolation = tokens.word()?;
                if interpolation != "linear" {
                    return Err(FvError::UnknownType {
                        kind: "Gauss gradient interpolation",
                        name: interpolation.to_owned(),
                        valid: vec!["linear".to_owned()],
                    });
                }
                Ok(Self::GaussLinear)
            }
            GradName::LeastSquares => Ok(Self::LeastSquares),
            GradName::CellLimited => {
                let scheme = Box::new(Self::parse(tokens)?);
                let coefficient = tokens.coefficient()?;
                Ok(Self::CellLimited {
                    scheme,
                    coefficient,
                })
            }
        }
    }

    /// Cell gradient of a scalar field whose boundary values are up to date.
    pub fn gradient(&self, mesh: &Mesh, psi: &VolField<Float>) -> FvResult<nd::Array1<Vector3>> {
        psi.check_mesh(mesh)?;
        match self {
            Self::GaussLinear => Ok(gauss_linear(mesh, psi)),
            Self::LeastSquares => least_squares(mesh, psi),
            Self::CellLimited {
                scheme,
                coefficient,
            } => {
                let mut gradient = scheme.gradient(mesh, psi)?;
                cell_limit(mesh, psi, *coefficient, &mut gradient);
                Ok(gradient)
            }
        }
    }

    /// Gradient of each component of `psi` as a field of its own, with the neighbour values of
    /// coupled patches exchanged so that face-based schemes can use both sides.
    pub fn component_gradients<T: Value>(
        &self,
        mesh: &Mesh,
        psi: &VolField<T>,
    ) -> FvResult<Vec<VolField<Vector3>>> {
        (0..T::N_COMPONENTS)
            .map(|d| {
                let component = psi.component(mesh, d)?;
                let gradient = self.gradient(mesh, &component)?;
                let mut field = VolField::calculated(
                    mesh,
                    format!("grad({})", component.name()),
                    psi.dimensions() / LENGTH,
                    gradient,
                )?;
                field.correct_boundary_conditions(mesh)?;
                Ok(field)
            })
            .collect()
    }
}

fn gauss_linear(mesh: &Mesh, psi: &VolField<Float>) -> nd::Array1<Vector3> {
    let internal = psi.internal();
    let (owner, neighbour) = (mesh.owner(), mesh.neighbour());
    let mut gradient = nd::Array1::from_elem(mesh.n_cells(), Vector3::zeros());
    for face in 0..mesh.n_internal_faces() {
        let (own, nei) = (owner[face], neighbour[face]);
        let w = mesh.weights()[face];
        let flux = mesh.sf()[face] * (w * internal[own] + (1. - w) * internal[nei]);
        gradient[own] += flux;
        gradient[nei] -= flux;
    }
    for patch in 0..mesh.patches().len() {
        let geometry = mesh.patch_geometry(patch);
        for ((&cell, sf), &value) in geometry
            .face_cells
            .iter()
            .zip(&geometry.sf)
            .zip(psi.boundary_value(patch))
        {
            gradient[cell] += sf * value;
        }
    }
    nd::Zip::from(&mut gradient)
        .and(mesh.cell_volumes())
        .for_each(|gradient, &volume| *gradient /= volume);
    gradient
}

/// Values across each face of a patch: the neighbour cells of coupled patches, the boundary
/// values otherwise.
fn patch_neighbour_values<'a>(psi: &'a VolField<Float>, patch: usize) -> &'a nd::Array1<Float> {
    let field = psi.boundary_field(patch);
    field
        .patch_neighbour_field()
        .unwrap_or_else(|| field.value())
}

fn least_squares(mesh: &Mesh, psi: &VolField<Float>) -> FvResult<nd::Array1<Vector3>> {
    let internal = psi.internal();
    let centres = mesh.cell_centres();
    let (owner, neighbour) = (mesh.owner(), mesh.neighbour());

    let mut dd = nd::Array1::from_elem(mesh.n_cells(), Tensor::zeros());
    for face in 0..mesh.n_internal_faces() {
        let d = centres[neighbour[face]] - centres[owner[face]];
        let wdd = (d * d.transpose()) / d.norm_squared();
        dd[owner[face]] += wdd;
        dd[neighbour[face]] += wdd;
    }
    for patch in 0..mesh.patches().len() {
        let geometry = mesh.patch_geometry(patch);
        for (&cell, d) in geometry.face_cells.iter().zip(&geometry.delta) {
            dd[cell] += (d * d.transpose()) / d.norm_squared();
        }
    }
    let solution_directions = mesh.solution_directions();
    let inverse = dd
        .iter()
        .map(|dd| {
            let mut dd = *dd;
            for (direction, &solved) in solution_directions.iter().enumerate() {
                if !solved {
                    dd[(direction, direction)] += 1.;
                }
            }
            dd.try_inverse().ok_or_else(|| {
                FvError::Singular(format!("least-squares gradient of {}", psi.name()))
            })
        })
        .collect::<FvResult<Vec<_>>>()?;

    let mut gradient = nd::Array1::from_elem(mesh.n_cells(), Vector3::zeros());
    for face in 0..mesh.n_internal_faces() {
        let (own, nei) = (owner[face], neighbour[face]);
        let d = centres[nei] - centres[own];
        let weighted = d * ((internal[nei] - internal[own]) / d.norm_squared());
        gradient[own] += inverse[own] * weighted;
        gradient[nei] += inverse[nei] * weighted;
    }
    for patch in 0..mesh.patches().len() {
        let geometry = mesh.patch_geometry(patch);
        for ((&cell, d), &value) in geometry
            .face_cells
            .iter()
            .zip(&geometry.delta)
            .zip(patch_neighbour_values(psi, patch))
        {
            gradient[cell] += inverse[cell] * (d * ((value - internal[cell]) / d.norm_squared()));
        }
    }
    Ok(gradient)
}

/// Minmod limiting of `gradient` against the extrema of each cell and its face neighbours.
pub fn cell_limit(
    mesh: &Mesh,
    psi: &VolField<Float>,
    coefficient: Float,
    gradient: &mut nd::Array1<Vector3>,
) {
    if coefficient <= 0. {
        return;
    }
    let internal = psi.internal();
    let (owner, neighbour) = (mesh.owner(), mesh.neighbour());
    let mut max_delta = internal.clone();
    let mut min_delta = internal.clone();
    for face in 0..mesh.n_internal_faces() {
        let (own, nei) = (owner[face], neighbour[face]);
        max_delta[own] = max_delta[own].max(internal[nei]);
        min_delta[own] = min_delta[own].min(internal[nei]);
        max_delta[nei] = max_delta[nei].max(internal[own]);
        min_delta[nei] = min_delta[nei].min(internal[own]);
    }
    for patch in 0..mesh.patches().len() {
        let geometry = mesh.patch_geometry(patch);
        for (&cell, &value) in geometry
            .face_cells
            .iter()
            .zip(patch_neighbour_values(psi, patch))
        {
            max_delta[cell] = max_delta[cell].max(value);
            min_delta[cell] = min_delta[cell].min(value);
        }
    }
    max_delta -= internal;
    min_delta -= internal;
    if coefficient < 1. {
        let widening = 1. / coefficient - 1.;
        nd::Zip::from(&mut max_delta)
            .and(&mut min_delta)
            .for_each(|max, min| {
                let range = *max - *min;
                *max += widening * range;
                *min -= widening * range;
            });
    }

    let centres = mesh.cell_centres();
    let mut limiter = nd::Array1::<Float>::ones(mesh.n_cells());
    let mut limit_face = |cell: usize, cf: &Vector3| {
        let extrapolate = (cf - centres[cell]).dot(&gradient[cell]);
        if extrapolate > max_delta[cell] + VSMALL {
            limiter[cell] = limiter[cell].min(max_delta[cell] / extrapolate);
        } else if extrapolate < min_delta[cell] - VSMALL {
            limiter[cell] = limiter[cell].min(min_delta[cell] / extrapolate);
        }
    };
    for face in 0..mesh.n_internal_faces() {
        limit_face(owner[face], &mesh.cf()[face]);
        limit_face(neighbour[face], &mesh.cf()[face]);
    }
    for patch in 0..mesh.patches().len() {
        let geometry = mesh.patch_geometry(patch);
        for (&cell, cf) in geometry.face_cells.iter().zip(&geometry.cf) {
            limit_face(cell, cf);
        }
    }
    nd::Zip::from(gradient)
        .and(&limiter)
        .for_each(|gradient, &limiter| *gradient *= limiter);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dimensions::DIMLESS;
    use crate::mesh::BlockMesh;
    use approx::assert_abs_diff_eq;

    fn linear_field(mesh: &Mesh) -> VolField<Float> {
        let mut psi = VolField::builder(mesh, "psi", DIMLESS)
            .from_fn(|centre| 2. * centre.x + 3. * centre.y)
            .build()
            .unwrap();
        psi.correct_boundary_conditions(mesh).unwrap();
        psi
    }

    #[test]
    fn test_linear_field_gradient() {
        let mesh = BlockMesh::two_dimensional([4, 4], [1., 1.]).build().unwrap();
        let psi = linear_field(&mesh);
        for scheme in [
            GradScheme::GaussLinear,
            GradScheme::LeastSquares,
            GradScheme::CellLimited {
                scheme: Box::new(GradScheme::GaussLinear),
                coefficient: 1.,
            },
        ] {
            let gradient = scheme.gradient(&mesh, &psi).unwrap();
            for j in 1..3 {
                for i in 1..3 {
                    let g = gradient[i + 4 * j];
                    assert_abs_diff_eq!(g.x, 2., epsilon = 1e-10);
                    assert_abs_diff_eq!(g.y, 3., epsilon = 1e-10);
                    assert_abs_diff_eq!(g.z, 0., epsilon = 1e-10);
                }
            }
        }
    }

    #[test]
    fn test_cell_limited_removes_overshoot() {
        let mesh = Mesh::line(5, 5.).unwrap();
        let mut psi = VolField::builder(&mesh, "psi", DIMLESS)
            .internal(nd::arr1(&[0., 0., 0., 1., 1.]))
            .build()
            .unwrap();
        psi.correct_boundary_conditions(&mesh).unwrap();
        let unlimited = GradScheme::GaussLinear.gradient(&mesh, &psi).unwrap();
        assert_abs_diff_eq!(unlimited[2].x, 0.5, epsilon = 1e-12);
        let limited = GradScheme::CellLimited {
            scheme: Box::new(GradScheme::GaussLinear),
            coefficient: 1.,
        }
        .gradient(&mesh, &psi)
        .unwrap();
        assert_abs_diff_eq!(limited[2].x, 0., epsilon = 1e-12);
        assert_abs_diff_eq!(limited[3].x, 0., epsilon = 1e-12);
    }

    #[test]
    fn test_component_gradients() {
        let mesh = BlockMesh::two_dimensional([3, 3], [3., 3.]).build().unwrap();
        let mut u = VolField::builder(&mesh, "U", crate::dimensions::VELOCITY)
            .from_fn(|centre| Vector3::new(centre.y, -centre.x, 0.))
            .build()
            .unwrap();
        u.correct_boundary_conditions(&mesh).unwrap();
        let gradients = GradScheme::LeastSquares
            .component_gradients(&mesh, &u)
            .unwrap();
        assert_eq!(gradients.len(), 3);
        assert_eq!(gradients[0].dimensions(), DIMLESS / crate::dimensions::TIME);
        assert_abs_diff_eq!(gradients[0].internal()[4].y, 1., epsilon = 1e-10);
        assert_abs_diff_eq!(gradients[1].internal()[4].x, -1., epsilon = 1e-10);
    }
}
