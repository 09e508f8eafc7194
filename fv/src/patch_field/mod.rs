//! Boundary conditions attached to each patch of a volume field.
//!
//! Every condition exposes the mixed form `value = f*refValue + (1-f)*(internal +
//! refGrad/deltaCoeffs)`; fixed-value, zero-gradient and fixed-gradient conditions are
//! specialisations of it. The linearisation used by the implicit operators follows from the same
//! three quantities.

macro_rules! patch_field_accessors {
    ($type_name:literal) => {
        fn type_name(&self) -> &'static str {
            $type_name
        }

        fn patch(&self) -> usize {
            self.patch
        }

        fn clone_box(&self) -> Box<dyn FvPatchField<T>> {
            Box::new(self.clone())
        }

        fn value(&self) -> &nd::Array1<T> {
            &self.value
        }

        fn value_mut(&mut self) -> &mut nd::Array1<T> {
            &mut self.value
        }

        fn coeffs(&self) -> &MixedCoeffs<T> {
            &self.coeffs
        }
    };
}

mod basic;
mod constraint;
mod coupled;
mod registry;

use std::fmt::Debug;

use ndarray as nd;

pub use basic::{
    CalculatedPatchField, ExtrapolatedCalculatedPatchField, FixedGradientPatchField,
    FixedValuePatchField, InletOutletPatchField, MixedPatchField, ZeroGradientPatchField,
};
pub use constraint::{EmptyPatchField, SymmetryPlanePatchField};
pub use coupled::{CyclicPatchField, ProcessorPatchField};
pub use registry::{FromDict, PatchFieldConstructor, PatchFieldRegistry};

use crate::linalg::LduInterface;
use crate::mesh::{Patch, PatchGeometry};
use crate::{Float, FvResult, Mesh, SurfaceField, Value};

/// Quantities outside the field itself that conditions may depend on.
#[derive(Clone, Copy, Debug, Default)]
pub struct BoundaryEnv<'a> {
    pub phi: Option<&'a SurfaceField<Float>>,
    pub time: Float,
}

/// Everything a patch field may read when it updates or evaluates.
pub struct PatchContext<'a, T: Value> {
    pub mesh: &'a Mesh,
    pub patch: usize,
    pub internal: &'a nd::Array1<T>,
    pub env: BoundaryEnv<'a>,
}

impl<'a, T: Value> PatchContext<'a, T> {
    pub fn new(mesh: &'a Mesh, patch: usize, internal: &'a nd::Array1<T>) -> Self {
        Self {
            mesh,
            patch,
            internal,
            env: BoundaryEnv::default(),
        }
    }

    pub fn with_env(self, env: BoundaryEnv<'a>) -> Self {
        Self { env, ..self }
    }

    pub fn patch_info(&self) -> &'a Patch {
        self.mesh.patch(self.patch)
    }

    pub fn geometry(&self) -> &'a PatchGeometry {
        self.mesh.patch_geometry(self.patch)
    }

    pub fn size(&self) -> usize {
        self.patch_info().size()
    }

    pub fn delta_coeffs(&self) -> &'a nd::Array1<Float> {
        &self.geometry().delta_coeffs
    }

    /// Values of the cells adjacent to the patch.
    pub fn patch_internal_field(&self) -> nd::Array1<T> {
        self.geometry()
            .face_cells
            .iter()
            .map(|&cell| self.internal[cell])
            .collect()
    }

    /// The volumetric flux through the patch, if one was supplied.
    pub fn patch_flux(&self) -> Option<&'a nd::Array1<Float>> {
        self.env.phi.map(|phi| phi.boundary(self.patch))
    }
}

/// Reference value, reference gradient and value fraction of the mixed form.
#[derive(Clone, Debug)]
pub struct MixedCoeffs<T: Value> {
    pub ref_value: nd::Array1<T>,
    pub ref_grad: nd::Array1<T>,
    pub value_fraction: nd::Array1<Float>,
}

impl<T: Value> MixedCoeffs<T> {
    pub fn new(
        ref_value: nd::Array1<T>,
        ref_grad: nd::Array1<T>,
        value_fraction: nd::Array1<Float>,
    ) -> Self {
        Self {
            ref_value,
            ref_grad,
            value_fraction,
        }
    }

    pub fn fixed_value(values: nd::Array1<T>) -> Self {
        let n = values.len();
        Self::new(
            values,
            nd::Array1::from_elem(n, T::zero()),
            nd::Array1::ones(n),
        )
    }

    pub fn fixed_gradient(gradient: nd::Array1<T>) -> Self {
        let n = gradient.len();
        Self::new(
            nd::Array1::from_elem(n, T::zero()),
            gradient,
            nd::Array1::zeros(n),
        )
    }

    pub fn evaluate(
        &self,
        internal: &nd::Array1<T>,
        delta_coeffs: &nd::Array1<Float>,
    ) -> nd::Array1<T> {
        nd::Zip::from(&self.ref_value)
            .and(&self.ref_grad)
            .and(&self.value_fraction)
            .and(internal)
            .and(delta_coeffs)
            .map_collect(|&ref_value, &ref_grad, &f, &internal, &delta_coeffs| {
                ref_value * f + (internal + ref_grad / delta_coeffs) * (1. - f)
            })
    }

    pub fn sn_grad(
        &self,
        internal: &nd::Array1<T>,
        delta_coeffs: &nd::Array1<Float>,
    ) -> nd::Array1<T> {
        nd::Zip::from(&self.ref_value)
            .and(&self.ref_grad)
            .and(&self.value_fraction)
            .and(internal)
            .and(delta_coeffs)
            .map_collect(|&ref_value, &ref_grad, &f, &internal, &delta_coeffs| {
                (ref_value - internal) * (f * delta_coeffs) + ref_grad * (1. - f)
            })
    }

    pub fn value_internal_coeffs(&self) -> nd::Array1<T> {
        self.value_fraction.mapv(|f| T::one() * (1. - f))
    }

    pub fn value_boundary_coeffs(&self, delta_coeffs: &nd::Array1<Float>) -> nd::Array1<T> {
        nd::Zip::from(&self.ref_value)
            .and(&self.ref_grad)
            .and(&self.value_fraction)
            .and(delta_coeffs)
            .map_collect(|&ref_value, &ref_grad, &f, &delta_coeffs| {
                ref_value * f + ref_grad * ((1. - f) / delta_coeffs)
            })
    }

    pub fn gradient_internal_coeffs(&self, delta_coeffs: &nd::Array1<Float>) -> nd::Array1<T> {
        nd::Zip::from(&self.value_fraction)
            .and(delta_coeffs)
            .map_collect(|&f, &delta_coeffs| T::one() * (-f * delta_coeffs))
    }

    pub fn gradient_boundary_coeffs(&self, delta_coeffs: &nd::Array1<Float>) -> nd::Array1<T> {
        nd::Zip::from(&self.ref_value)
            .and(&self.ref_grad)
            .and(&self.value_fraction)
            .and(delta_coeffs)
            .map_collect(|&ref_value, &ref_grad, &f, &delta_coeffs| {
                ref_value * (f * delta_coeffs) + ref_grad * (1. - f)
            })
    }

    /// Coefficients on the faces of a remapped patch; new faces take the adjacent cell value.
    pub fn mapped(&self, face_map: &[Option<usize>], internal: &nd::Array1<T>) -> Self {
        let zeros = nd::Array1::from_elem(face_map.len(), T::zero());
        let mean_fraction = if self.value_fraction.is_empty() {
            0.
        } else {
            self.value_fraction.mean().unwrap_or(0.)
        };
        Self::new(
            crate::mesh::map_or_fallback(&self.ref_value, face_map, internal),
            crate::mesh::map_or_fallback(&self.ref_grad, face_map, &zeros),
            crate::mesh::map_or_fallback(
                &self.value_fraction,
                face_map,
                &nd::Array1::from_elem(face_map.len(), mean_fraction),
            ),
        )
    }
}

/// A boundary condition on one patch of a volume field.
///
/// Conditions are evaluated in two passes so that coupled conditions can post their sends
/// before any rank blocks on a receive: `init_evaluate` on every patch, then `evaluate`.
pub trait FvPatchField<T: Value>: Send + Sync + Debug {
    fn type_name(&self) -> &'static str;
    fn patch(&self) -> usize;
    fn clone_box(&self) -> Box<dyn FvPatchField<T>>;

    fn value(&self) -> &nd::Array1<T>;
    fn value_mut(&mut self) -> &mut nd::Array1<T>;
    fn coeffs(&self) -> &MixedCoeffs<T>;

    /// Whether the condition fixes the boundary value outright.
    fn fixes_value(&self) -> bool {
        false
    }

    fn coupled(&self) -> bool {
        false
    }

    /// Whether the condition is imposed by the kind of patch rather than chosen per field.
    fn constraint(&self) -> bool {
        false
    }

    /// Whether the boundary value may be overwritten by field algebra.
    fn assignable(&self) -> bool {
        true
    }

    /// Overwrites the boundary value, and the fixed value where there is one.
    fn force_assign(&mut self, values: &nd::Array1<T>) {
        self.value_mut().assign(values);
    }

    fn update_coeffs(&mut self, _ctx: &PatchContext<'_, T>) -> FvResult<()> {
        Ok(())
    }

    fn init_evaluate(&mut self, _ctx: &PatchContext<'_, T>) -> FvResult<()> {
        Ok(())
    }

    fn evaluate(&mut self, ctx: &PatchContext<'_, T>) -> FvResult<()> {
        let value = self
            .coeffs()
            .evaluate(&ctx.patch_internal_field(), ctx.delta_coeffs());
        *self.value_mut() = value;
        Ok(())
    }

    fn sn_grad(&self, ctx: &PatchContext<'_, T>) -> FvResult<nd::Array1<T>> {
        Ok(self
            .coeffs()
            .sn_grad(&ctx.patch_internal_field(), ctx.delta_coeffs()))
    }

    /// Implicit part of the face value for convection, given the interpolation weights.
    fn value_internal_coeffs(
        &self,
        _ctx: &PatchContext<'_, T>,
        _weights: &nd::Array1<Float>,
    ) -> FvResult<nd::Array1<T>> {
        Ok(self.coeffs().value_internal_coeffs())
    }

    fn value_boundary_coeffs(
        &self,
        ctx: &PatchContext<'_, T>,
        _weights: &nd::Array1<Float>,
    ) -> FvResult<nd::Array1<T>> {
        Ok(self.coeffs().value_boundary_coeffs(ctx.delta_coeffs()))
    }

    /// Implicit part of the face-normal gradient for diffusion.
    fn gradient_internal_coeffs(&self, ctx: &PatchContext<'_, T>) -> FvResult<nd::Array1<T>> {
        Ok(self.coeffs().gradient_internal_coeffs(ctx.delta_coeffs()))
    }

    fn gradient_boundary_coeffs(&self, ctx: &PatchContext<'_, T>) -> FvResult<nd::Array1<T>> {
        Ok(self.coeffs().gradient_boundary_coeffs(ctx.delta_coeffs()))
    }

    /// Neighbour-side cell values of a coupled condition as of its last evaluation.
    fn patch_neighbour_field(&self) -> Option<&nd::Array1<T>> {
        None
    }

    fn patch_neighbour_field_mut(&mut self) -> Option<&mut nd::Array1<T>> {
        None
    }

    /// The matrix interface through which a coupled condition links the cells on both sides.
    fn interface<'a>(
        &self,
        _ctx: &PatchContext<'a, T>,
        _component: usize,
    ) -> Option<LduInterface<'a>> {
        None
    }

    /// The condition carried over to a remapped patch described by `ctx`.
    fn auto_map(
        &self,
        ctx: &PatchContext<'_, T>,
        face_map: &[Option<usize>],
    ) -> FvResult<Box<dyn FvPatchField<T>>>;

    fn write(&self) -> serde_json::Map<String, serde_json::Value>;
}

impl<T: Value> Clone for Box<dyn FvPatchField<T>> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_mixed_specialisations() {
        let delta_coeffs = nd::arr1(&[2.]);
        let internal = nd::arr1(&[1.]);

        let fixed = MixedCoeffs::fixed_value(nd::arr1(&[3.]));
        assert_eq!(fixed.evaluate(&internal, &delta_coeffs)[0], 3.);
        assert_eq!(fixed.sn_grad(&internal, &delta_coeffs)[0], 4.);
        assert_eq!(fixed.value_internal_coeffs()[0], 0.);
        assert_eq!(fixed.gradient_internal_coeffs(&delta_coeffs)[0], -2.);
        assert_eq!(fixed.gradient_boundary_coeffs(&delta_coeffs)[0], 6.);

        let gradient = MixedCoeffs::fixed_gradient(nd::arr1(&[4.]));
        assert_eq!(gradient.evaluate(&internal, &delta_coeffs)[0], 3.);
        assert_eq!(gradient.value_internal_coeffs()[0], 1.);
        assert_eq!(gradient.value_boundary_coeffs(&delta_coeffs)[0], 2.);
        assert_eq!(gradient.gradient_boundary_coeffs(&delta_coeffs)[0], 4.);

        let half = MixedCoeffs::new(nd::arr1(&[3.]), nd::arr1(&[0.]), nd::arr1(&[0.5]));
        assert_relative_eq!(half.evaluate(&internal, &delta_coeffs)[0], 2.);
    }

    #[test]
    fn test_linearisation_reproduces_value() {
        // value = valueInternalCoeffs * internal + valueBoundaryCoeffs for any mixed condition.
        let delta_coeffs = nd::arr1(&[4., 0.5]);
        let internal = nd::arr1(&[1.5, -2.]);
        let coeffs = MixedCoeffs::new(
            nd::arr1(&[3., 1.]),
            nd::arr1(&[-1., 2.]),
            nd::arr1(&[0.3, 0.8]),
        );
        let value = coeffs.evaluate(&internal, &delta_coeffs);
        let linear = &coeffs.value_internal_coeffs() * &internal
            + coeffs.value_boundary_coeffs(&delta_coeffs);
        for (a, b) in value.iter().zip(&linear) {
            assert_relative_eq!(*a, *b, max_relative = 1e-12);
        }
        let sn_grad = coeffs.sn_grad(&internal, &delta_coeffs);
        let linear = &coeffs.gradient_internal_coeffs(&delta_coeffs) * &internal
            + coeffs.gradient_boundary_coeffs(&delta_coeffs);
        for (a, b) in sn_grad.iter().zip(&linear) {
            assert_relative_eq!(*a, *b, max_relative = 1e-12);
        }
    }
}
