use ndarray as nd;

use super::{GradScheme, SchemeTokens};
use crate::dimensions::DIMLESS;
use crate::linalg::parse_kind;
use crate::{Float, FvError, FvResult, Mesh, SurfaceField, Value, Vector3, VolField, SMALL};

#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::EnumString, strum::Display, strum::EnumIter)]
enum InterpolationName {
    #[strum(serialize = "linear")]
    Linear,
    #[strum(serialize = "upwind")]
    Upwind,
    #[strum(serialize = "linearUpwind")]
    LinearUpwind,
    #[strum(serialize = "limitedLinear")]
    LimitedLinear,
    #[strum(serialize = "vanLeer")]
    VanLeer,
    Minmod,
    #[strum(serialize = "MUSCL")]
    Muscl,
    SuperBee,
}

/// TVD limiters as functions of the gradient ratio `r`; all lie in `[0, 2]` and equal 1 at
/// `r = 1`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Limiter {
    /// Linear where `r > coefficient/2`, blending to upwind below.
    LimitedLinear { coefficient: Float },
    VanLeer,
    Minmod,
    Muscl,
    SuperBee,
}

impl Limiter {
    pub fn limit(self, r: Float) -> Float {
        match self {
            Self::LimitedLinear { coefficient } => (2. / coefficient.max(SMALL) * r).clamp(0., 1.),
            Self::VanLeer => (r + r.abs()) / (1. + r.abs()),
            Self::Minmod => r.clamp(0., 1.),
            Self::Muscl => (2. * r).min(0.5 * r + 0.5).clamp(0., 2.),
            Self::SuperBee => (2. * r).min(1.).max(r.min(2.)).max(0.),
        }
    }
}

fn sign(value: Float) -> Float {
    if value >= 0. {
        1.
    } else {
        -1.
    }
}

/// The ratio `r = 2 d·∇ψ_C/(ψ_N - ψ_P) - 1` seen from the upwind cell C, with `d` the vector
/// from P to N.
fn gradient_ratio(
    flux: Float,
    psi_p: Float,
    psi_n: Float,
    d_grad_p: Float,
    d_grad_n: Float,
) -> Float {
    let grad_f = psi_n - psi_p;
    let grad_c = if flux > 0. { d_grad_p } else { d_grad_n };
    if grad_c.abs() >= 1000. * grad_f.abs() {
        2. * 1000. * sign(grad_c) * sign(grad_f) - 1.
    } else {
        2. * (grad_c / grad_f) - 1.
    }
}

fn upwind_weight(flux: Float) -> Float {
    if flux >= 0. {
        1.
    } else {
        0.
    }
}

/// Face interpolation of cell values.
///
/// Weights are on the owner side: `psi_f = w*psi_P + (1 - w)*psi_N`. Everything but `linear`
/// needs the face flux to find the upwind side.
#[derive(Clone, Debug, PartialEq)]
pub enum InterpolationScheme {
    Linear,
    Upwind,
    /// Upwind plus the explicit correction `(C_f - C_upwind)·∇ψ_upwind`.
    LinearUpwind(GradScheme),
    /// Blend of linear and upwind weights by a TVD limiter.
    Limited(Limiter),
}

impl InterpolationScheme {
    pub(super) fn parse(
        tokens: &mut SchemeTokens<'_>,
        grad_scheme: &dyn Fn(&str) -> FvResult<GradScheme>,
    ) -> FvResult<Self> {
        Ok(
            match parse_kind::<InterpolationName>("interpolationScheme", tokens.word()?)? {
                InterpolationName::Linear => Self::Linear,
                InterpolationName::Upwind => Self::Upwind,
                InterpolationName::LinearUpwind => Self::LinearUpwind(grad_scheme(tokens.word()?)?),
                InterpolationName::LimitedLinear => Self::Limited(Limiter::LimitedLinear {
                    coefficient: tokens.coefficient()?,
                }),
                InterpolationName::VanLeer => Self::Limited(Limiter::VanLeer),
                InterpolationName::Minmod => Self::Limited(Limiter::Minmod),
                InterpolationName::Muscl => Self::Limited(Limiter::Muscl),
                InterpolationName::SuperBee => Self::Limited(Limiter::SuperBee),
            },
        )
    }

    pub fn needs_flux(&self) -> bool {
        !matches!(self, Self::Linear)
    }

    /// Whether the scheme adds an explicit correction to the weighted interpolation.
    pub fn corrected(&self) -> bool {
        matches!(self, Self::LinearUpwind(_))
    }

    fn flux<'a>(&self, phi: Option<&'a SurfaceField<Float>>) -> FvResult<&'a SurfaceField<Float>> {
        phi.ok_or_else(|| {
            FvError::invalid(
                "interpolationSchemes",
                format!("{self:?}"),
                "scheme needs a face flux",
            )
        })
    }

    pub fn weights<T: Value>(
        &self,
        mesh: &Mesh,
        phi: Option<&SurfaceField<Float>>,
        psi: &VolField<T>,
    ) -> FvResult<SurfaceField<Float>> {
        let linear = linear_weights(mesh)?;
        if !self.needs_flux() {
            return Ok(linear);
        }
        let phi = self.flux(phi)?;
        phi.check_mesh(mesh)?;
        let upwind = phi.map_to("upwindWeights", DIMLESS, upwind_weight);
        match self {
            Self::Linear | Self::Upwind | Self::LinearUpwind(_) => Ok(upwind),
            Self::Limited(limiter) => {
                let limiter = limiter_field(mesh, phi, psi, *limiter)?;
                let blended = limiter.zip_with(&linear, "limiter*linear", DIMLESS, |l, w| l * w)?;
                let upwind_part =
                    limiter.zip_with(&upwind, "(1-limiter)*upwind", DIMLESS, |l, u| (1. - l) * u)?;
                blended.try_add(&upwind_part)
            }
        }
    }

    /// The explicit part added to the weighted interpolation, if the scheme has one.
    pub fn correction<T: Value>(
        &self,
        mesh: &Mesh,
        phi: Option<&SurfaceField<Float>>,
        psi: &VolField<T>,
    ) -> FvResult<Option<SurfaceField<T>>> {
        let Self::LinearUpwind(grad_scheme) = self else {
            return Ok(None);
        };
        let phi = self.flux(phi)?;
        let gradients = grad_scheme.component_gradients(mesh, psi)?;
        let centres = mesh.cell_centres();
        let (owner, neighbour) = (mesh.owner(), mesh.neighbour());
        let extrapolate = |d: Vector3, grads: &dyn Fn(usize) -> Vector3| {
            T::from_fn(|c| d.dot(&grads(c)))
        };

        let internal = (0..mesh.n_internal_faces())
            .map(|face| {
                let cell = if phi.internal()[face] > 0. {
                    owner[face]
                } else {
                    neighbour[face]
                };
                extrapolate(mesh.cf()[face] - centres[cell], &|c| {
                    gradients[c].internal()[cell]
                })
            })
            .collect::<nd::Array1<T>>();
        let boundary = (0..mesh.patches().len())
            .map(|patch| {
                let geometry = mesh.patch_geometry(patch);
                if !psi.boundary_field(patch).coupled() {
                    return nd::Array1::from_elem(geometry.face_cells.len(), T::zero());
                }
                let flux = phi.boundary(patch);
                (0..geometry.face_cells.len())
                    .map(|face| {
                        let own = geometry.face_cells[face];
                        let cf = geometry.cf[face];
                        if flux[face] > 0. {
                            extrapolate(cf - centres[own], &|c| gradients[c].internal()[own])
                        } else {
                            extrapolate(cf - centres[own] - geometry.delta[face], &|c| {
                                gradients[c]
                                    .boundary_field(patch)
                                    .patch_neighbour_field()
                                    .map_or(gradients[c].internal()[own], |values| values[face])
                            })
                        }
                    })
                    .collect()
            })
            .collect();
        SurfaceField::new(
            mesh,
            format!("correction({})", psi.name()),
            psi.dimensions(),
            internal,
            boundary,
        )
        .map(Some)
    }

    pub fn interpolate<T: Value>(
        &self,
        mesh: &Mesh,
        phi: Option<&SurfaceField<Float>>,
        psi: &VolField<T>,
    ) -> FvResult<SurfaceField<T>> {
        let weights = self.weights(mesh, phi, psi)?;
        let mut result = weighted_interpolate(mesh, psi, &weights)?;
        if let Some(correction) = self.correction(mesh, phi, psi)? {
            result = result.try_add(&correction)?;
            result.rename(format!("interpolate({})", psi.name()));
        }
        Ok(result)
    }
}

/// Geometric weights: distance-based on internal and coupled faces, 1 on other patches.
pub fn linear_weights(mesh: &Mesh) -> FvResult<SurfaceField<Float>> {
    SurfaceField::new(
        mesh,
        "weights",
        DIMLESS,
        mesh.weights().clone(),
        (0..mesh.patches().len())
            .map(|patch| mesh.patch_geometry(patch).weights.clone())
            .collect(),
    )
}

/// `w*psi_P + (1 - w)*psi_N` on internal and coupled faces; the boundary values elsewhere.
pub fn weighted_interpolate<T: Value>(
    mesh: &Mesh,
    psi: &VolField<T>,
    weights: &SurfaceField<Float>,
) -> FvResult<SurfaceField<T>> {
    psi.check_mesh(mesh)?;
    weights.check_mesh(mesh)?;
    let values = psi.internal();
    let (owner, neighbour) = (mesh.owner(), mesh.neighbour());
    let internal = nd::Zip::indexed(weights.internal()).map_collect(|face, &w| {
        values[owner[face]] * w + values[neighbour[face]] * (1. - w)
    });
    let boundary = (0..mesh.patches().len())
        .map(|patch| {
            let field = psi.boundary_field(patch);
            match field.patch_neighbour_field() {
                Some(neighbour_values) if field.coupled() => {
                    let face_cells = &mesh.patch_geometry(patch).face_cells;
                    nd::Zip::indexed(weights.boundary(patch))
                        .and(neighbour_values)
                        .map_collect(|face, &w, &neighbour| {
                            values[face_cells[face]] * w + neighbour * (1. - w)
                        })
                }
                _ => field.value().clone(),
            }
        })
        .collect();
    SurfaceField::new(
        mesh,
        format!("interpolate({})", psi.name()),
        psi.dimensions(),
        internal,
        boundary,
    )
}

/// Limiter on every face, the minimum over the components of `psi`; 1 on non-coupled patches.
fn limiter_field<T: Value>(
    mesh: &Mesh,
    phi: &SurfaceField<Float>,
    psi: &VolField<T>,
    limiter: Limiter,
) -> FvResult<SurfaceField<Float>> {
    let gradients = GradScheme::GaussLinear.component_gradients(mesh, psi)?;
    let centres = mesh.cell_centres();
    let values = psi.internal();
    let (owner, neighbour) = (mesh.owner(), mesh.neighbour());
    let face_limiter = |flux: Float,
                        psi_p: T,
                        psi_n: T,
                        d: Vector3,
                        grad_p: &dyn Fn(usize) -> Vector3,
                        grad_n: &dyn Fn(usize) -> Vector3| {
        (0..T::N_COMPONENTS)
            .map(|c| {
                limiter.limit(gradient_ratio(
                    flux,
                    psi_p.component(c),
                    psi_n.component(c),
                    d.dot(&grad_p(c)),
                    d.dot(&grad_n(c)),
                ))
            })
            .fold(Float::INFINITY, Float::min)
    };

    let internal = nd::Zip::indexed(phi.internal()).map_collect(|face, &flux| {
        let (own, nei) = (owner[face], neighbour[face]);
        face_limiter(
            flux,
            values[own],
            values[nei],
            centres[nei] - centres[own],
            &|c| gradients[c].internal()[own],
            &|c| gradients[c].internal()[nei],
        )
    });
    let boundary = (0..mesh.patches().len())
        .map(|patch| {
            let geometry = mesh.patch_geometry(patch);
            let field = psi.boundary_field(patch);
            let neighbour_values = match field.patch_neighbour_field() {
                Some(neighbour_values) if field.coupled() => neighbour_values,
                _ => return nd::Array1::ones(geometry.face_cells.len()),
            };
            nd::Zip::indexed(phi.boundary(patch)).map_collect(|face, &flux| {
                let own = geometry.face_cells[face];
                face_limiter(
                    flux,
                    values[own],
                    neighbour_values[face],
                    geometry.delta[face],
                    &|c| gradients[c].internal()[own],
                    &|c| {
                        gradients[c]
                            .boundary_field(patch)
                            .patch_neighbour_field()
                            .map_or(gradients[c].internal()[own], |values| values[face])
                    },
                )
            })
        })
        .collect();
    SurfaceField::new(mesh, "limiter", DIMLESS, internal, boundary)
}

/// Convection term scheme: `Gauss <interpolation>`, optionally `bounded`, which removes the
/// `div(phi)*psi` part so that steady solutions stay bounded while continuity is unconverged.
#[derive(Clone, Debug, PartialEq)]
pub struct ConvectionScheme {
    pub bounded: bool,
    pub interpolation: InterpolationScheme,
}

impl ConvectionScheme {
    pub(super) fn parse(
        tokens: &mut SchemeTokens<'_>,
        grad_scheme: &dyn Fn(&str) -> FvResult<GradScheme>,
    ) -> FvResult<Self> {
        let bounded = tokens.skip("bounded");
        tokens.expect("Gauss")?;
        Ok(Self {
            bounded,
            interpolation: InterpolationScheme::parse(tokens, grad_scheme)?,
        })
    }
}
