use ndarray as nd;

use super::{GradScheme, InterpolationScheme, SchemeTokens};
use crate::dimensions::LENGTH;
use crate::linalg::parse_kind;
use crate::{Float, FvError, FvResult, Mesh, SurfaceField, Value, Vector3, VolField, SMALL};

#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::EnumString, strum::Display, strum::EnumIter)]
enum SnGradName {
    #[strum(serialize = "corrected")]
    Corrected,
    #[strum(serialize = "uncorrected")]
    Uncorrected,
    #[strum(serialize = "limited")]
    Limited,
}

/// Face-normal gradient.
///
/// The implicit part `nonOrthDeltaCoeffs*(psi_N - psi_P)` is shared by all variants; they
/// differ in how much of the explicit non-orthogonal correction they add.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SnGradScheme {
    Corrected,
    Uncorrected,
    /// Correction limited to `coefficient/(1 - coefficient)` of the uncorrected gradient.
    Limited { coefficient: Float },
}

impl SnGradScheme {
    pub(super) fn parse(tokens: &mut SchemeTokens<'_>) -> FvResult<Self> {
        Ok(match parse_kind::<SnGradName>("snGradScheme", tokens.word()?)? {
            SnGradName::Corrected => Self::Corrected,
            SnGradName::Uncorrected => Self::Uncorrected,
            SnGradName::Limited => {
                tokens.skip("corrected");
                Self::Limited {
                    coefficient: tokens.coefficient()?,
                }
            }
        })
    }

    pub fn corrected(self) -> bool {
        match self {
            Self::Corrected => true,
            Self::Uncorrected => false,
            Self::Limited { coefficient } => coefficient > 0.,
        }
    }

    pub fn sn_grad<T: Value>(self, mesh: &Mesh, psi: &VolField<T>) -> FvResult<SurfaceField<T>> {
        let uncorrected = uncorrected_sn_grad(mesh, psi)?;
        if !self.corrected() {
            return Ok(uncorrected);
        }
        let mut result = uncorrected.try_add(&self.correction(mesh, psi, &uncorrected)?)?;
        result.rename(format!("snGrad({})", psi.name()));
        Ok(result)
    }

    /// The explicit non-orthogonal correction, given the uncorrected gradient it may be limited
    /// against.
    pub fn correction<T: Value>(
        self,
        mesh: &Mesh,
        psi: &VolField<T>,
        uncorrected: &SurfaceField<T>,
    ) -> FvResult<SurfaceField<T>> {
        let mut correction = full_correction(mesh, psi)?;
        if let Self::Limited { coefficient } = self {
            if coefficient < 1. {
                let limit = |corrected: &mut T, &uncorrected: &T| {
                    let limiter = (coefficient * uncorrected.mag()
                        / ((1. - coefficient) * corrected.mag() + SMALL))
                        .min(1.);
                    *corrected *= limiter;
                };
                nd::Zip::from(correction.internal_mut())
                    .and(uncorrected.internal())
                    .for_each(&limit);
                for patch in 0..mesh.patches().len() {
                    nd::Zip::from(correction.boundary_mut(patch))
                        .and(uncorrected.boundary(patch))
                        .for_each(&limit);
                }
            }
        }
        Ok(correction)
    }
}

/// `nonOrthDeltaCoeffs*(psi_N - psi_P)` on internal faces; each boundary condition's own
/// normal gradient on patches.
pub fn uncorrected_sn_grad<T: Value>(mesh: &Mesh, psi: &VolField<T>) -> FvResult<SurfaceField<T>> {
    psi.check_mesh(mesh)?;
    let values = psi.internal();
    let (owner, neighbour) = (mesh.owner(), mesh.neighbour());
    let internal = nd::Zip::indexed(mesh.non_orth_delta_coeffs())
        .map_collect(|face, &coeff| (values[neighbour[face]] - values[owner[face]]) * coeff);
    let boundary = (0..mesh.patches().len())
        .map(|patch| {
            psi.boundary_field(patch)
                .sn_grad(&psi.patch_context(mesh, patch))
        })
        .collect::<FvResult<Vec<_>>>()?;
    SurfaceField::new(
        mesh,
        format!("snGrad({})", psi.name()),
        psi.dimensions() / LENGTH,
        internal,
        boundary,
    )
}

/// `k·grad(psi)_f` with `k` the non-orthogonal correction vectors and the cell gradients from
/// Gauss linear, interpolated linearly. Zero on non-coupled patches.
fn full_correction<T: Value>(mesh: &Mesh, psi: &VolField<T>) -> FvResult<SurfaceField<T>> {
    let gradients = GradScheme::GaussLinear.component_gradients(mesh, psi)?;
    let (owner, neighbour) = (mesh.owner(), mesh.neighbour());
    let internal = nd::Zip::indexed(mesh.non_orth_correction_vectors()).map_collect(|face, k| {
        let (own, nei) = (owner[face], neighbour[face]);
        face_correction(
            k,
            mesh.weights()[face],
            |c| gradients[c].internal()[own],
            |c| gradients[c].internal()[nei],
        )
    });
    let boundary = (0..mesh.patches().len())
        .map(|patch| {
            let geometry = mesh.patch_geometry(patch);
            let n_faces = geometry.face_cells.len();
            if !psi.boundary_field(patch).coupled() {
                return nd::Array1::from_elem(n_faces, T::zero());
            }
            (0..n_faces)
                .map(|face| {
                    let own = geometry.face_cells[face];
                    face_correction(
                        &geometry.non_orth_correction_vectors[face],
                        geometry.weights[face],
                        |c| gradients[c].internal()[own],
                        |c| {
                            gradients[c]
                                .boundary_field(patch)
                                .patch_neighbour_field()
                                .map_or(gradients[c].internal()[own], |values| values[face])
                        },
                    )
                })
                .collect()
        })
        .collect();
    SurfaceField::new(
        mesh,
        format!("snGradCorr({})", psi.name()),
        psi.dimensions() / LENGTH,
        internal,
        boundary,
    )
}

fn face_correction<T: Value>(
    k: &Vector3,
    w: Float,
    grad_p: impl Fn(usize) -> Vector3,
    grad_n: impl Fn(usize) -> Vector3,
) -> T {
    T::from_fn(|c| k.dot(&(grad_p(c) * w + grad_n(c) * (1. - w))))
}

/// Laplacian scheme: `Gauss <interpolation of the diffusivity> <snGrad>`.
#[derive(Clone, Debug, PartialEq)]
pub struct LaplacianScheme {
    pub interpolation: InterpolationScheme,
    pub sn_grad: SnGradScheme,
}

impl LaplacianScheme {
    pub(super) fn parse(tokens: &mut SchemeTokens<'_>) -> FvResult<Self> {
        tokens.expect("Gauss")?;
        let interpolation = InterpolationScheme::parse(tokens, &|term| {
            Err(FvError::invalid(
                "laplacianSchemes",
                term,
                "diffusivity interpolation cannot depend on a gradient",
            ))
        })?;
        if interpolation.needs_flux() {
            return Err(FvError::invalid(
                "laplacianSchemes",
                format!("{interpolation:?}"),
                "diffusivity interpolation cannot depend on a flux",
            ));
        }
        Ok(Self {
            interpolation,
            sn_grad: SnGradScheme::parse(tokens)?,
        })
    }
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
    fn test_line_sn_grad() {
        let mesh = Mesh::line(4, 2.).unwrap();
        let mut psi = VolField::builder(&mesh, "T", DIMLESS)
            .from_fn(|centre| centre.x)
            .fixed_value("left", 0.)
            .fixed_value("right", 1.)
            .build()
            .unwrap();
        psi.correct_boundary_conditions(&mesh).unwrap();
        let sn_grad = SnGradScheme::Corrected.sn_grad(&mesh, &psi).unwrap();
        for &value in sn_grad.internal() {
            assert_abs_diff_eq!(value, 1., epsilon = 1e-12);
        }
        let right = mesh.find_patch("right").unwrap();
        // The last cell centre sits at 1.75, a quarter cell from the face.
        assert_abs_diff_eq!(sn_grad.boundary(right)[0], (1. - 1.75) / 0.25, epsilon = 1e-12);
        assert_eq!(sn_grad.dimensions(), DIMLESS / LENGTH);
    }

    #[test]
    fn test_skewed_mesh_correction() {
        let mesh = BlockMesh::two_dimensional([4, 4], [4., 4.])
            .with_skew(0.5)
            .build()
            .unwrap();
        let psi = linear_field(&mesh);
        let exact_gradient = Vector3::new(2., 3., 0.);
        let interior = |cell: usize| (1..3).contains(&(cell % 4)) && (1..3).contains(&(cell / 4));

        let corrected = SnGradScheme::Corrected.sn_grad(&mesh, &psi).unwrap();
        let uncorrected = SnGradScheme::Uncorrected.sn_grad(&mesh, &psi).unwrap();
        let limited = SnGradScheme::Limited { coefficient: 0.5 }
            .sn_grad(&mesh, &psi)
            .unwrap();
        let mut n_checked = 0;
        let mut n_non_orthogonal = 0;
        for face in 0..mesh.n_internal_faces() {
            if !(interior(mesh.owner()[face]) && interior(mesh.neighbour()[face])) {
                continue;
            }
            let exact = (mesh.sf()[face] / mesh.mag_sf()[face]).dot(&exact_gradient);
            assert_abs_diff_eq!(corrected.internal()[face], exact, epsilon = 1e-10);
            let error = (uncorrected.internal()[face] - exact).abs();
            if error > 1e-6 {
                n_non_orthogonal += 1;
                let limited_error = (limited.internal()[face] - exact).abs();
                assert!(limited_error < error);
            }
            n_checked += 1;
        }
        assert!(n_checked > 0);
        assert!(n_non_orthogonal > 0);
    }

    #[test]
    fn test_uncorrected_skips_correction() {
        let mesh = BlockMesh::two_dimensional([3, 3], [1., 1.]).build().unwrap();
        let psi = linear_field(&mesh);
        assert!(!SnGradScheme::Uncorrected.corrected());
        assert!(!SnGradScheme::Limited { coefficient: 0. }.corrected());
        let corrected = SnGradScheme::Corrected.sn_grad(&mesh, &psi).unwrap();
        let uncorrected = SnGradScheme::Uncorrected.sn_grad(&mesh, &psi).unwrap();
        // Orthogonal meshes have no correction.
        for (&a, &b) in corrected.internal().iter().zip(uncorrected.internal()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-12);
        }
    }
}
