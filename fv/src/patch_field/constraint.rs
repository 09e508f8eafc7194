use ndarray as nd;
use serde_json::{Map, Value as Json};

use super::basic::with_type;
use super::{FromDict, FvPatchField, MixedCoeffs, PatchContext};
use crate::{Float, FvResult, Tensor, Value};

/// Condition on a patch normal to an unsolved direction; carries no faces.
#[derive(Clone, Debug)]
pub struct EmptyPatchField<T: Value> {
    patch: usize,
    value: nd::Array1<T>,
    coeffs: MixedCoeffs<T>,
}

impl<T: Value> EmptyPatchField<T> {
    pub fn new(ctx: &PatchContext<'_, T>) -> Self {
        Self {
            patch: ctx.patch,
            value: nd::Array1::from_elem(0, T::zero()),
            coeffs: MixedCoeffs::fixed_gradient(nd::Array1::from_elem(0, T::zero())),
        }
    }
}

impl<T: Value> FromDict<T> for EmptyPatchField<T> {
    fn from_dict(ctx: &PatchContext<'_, T>, _dict: &Map<String, Json>) -> FvResult<Self> {
        Ok(Self::new(ctx))
    }
}

impl<T: Value> FvPatchField<T> for EmptyPatchField<T> {
    patch_field_accessors!("empty");

    fn constraint(&self) -> bool {
        true
    }

    fn evaluate(&mut self, _ctx: &PatchContext<'_, T>) -> FvResult<()> {
        Ok(())
    }

    fn auto_map(
        &self,
        ctx: &PatchContext<'_, T>,
        _face_map: &[Option<usize>],
    ) -> FvResult<Box<dyn FvPatchField<T>>> {
        Ok(Box::new(Self::new(ctx)))
    }

    fn write(&self) -> Map<String, Json> {
        with_type(self.type_name(), [])
    }
}

/// Mirror condition: the boundary value is the mean of the cell value and its reflection.
#[derive(Clone, Debug)]
pub struct SymmetryPlanePatchField<T: Value> {
    patch: usize,
    value: nd::Array1<T>,
    coeffs: MixedCoeffs<T>,
}

fn reflected<T: Value>(ctx: &PatchContext<'_, T>) -> nd::Array1<T> {
    nd::Zip::from(&ctx.patch_internal_field())
        .and(&ctx.geometry().nf)
        .map_collect(|&internal, &nf| {
            let reflection = Tensor::identity() - 2. * nf * nf.transpose();
            internal.transform(&reflection)
        })
}

impl<T: Value> SymmetryPlanePatchField<T> {
    pub fn new(ctx: &PatchContext<'_, T>) -> Self {
        let mut field = Self {
            patch: ctx.patch,
            value: nd::Array1::from_elem(ctx.size(), T::zero()),
            coeffs: MixedCoeffs::fixed_value(nd::Array1::from_elem(ctx.size(), T::zero())),
        };
        field.update_value(ctx);
        field
    }

    fn update_value(&mut self, ctx: &PatchContext<'_, T>) {
        let value = (&ctx.patch_internal_field() + &reflected(ctx)).mapv(|value| value * 0.5);
        self.coeffs.ref_value.assign(&value);
        self.value = value;
    }

    fn transform_diag(ctx: &PatchContext<'_, T>) -> nd::Array1<T> {
        ctx.geometry().nf.mapv(|nf| T::sn_grad_transform_diag(&nf))
    }
}

impl<T: Value> FromDict<T> for SymmetryPlanePatchField<T> {
    fn from_dict(ctx: &PatchContext<'_, T>, _dict: &Map<String, Json>) -> FvResult<Self> {
        Ok(Self::new(ctx))
    }
}

impl<T: Value> FvPatchField<T> for SymmetryPlanePatchField<T> {
    patch_field_accessors!("symmetryPlane");

    fn constraint(&self) -> bool {
        true
    }

    fn evaluate(&mut self, ctx: &PatchContext<'_, T>) -> FvResult<()> {
        self.update_value(ctx);
        Ok(())
    }

    fn sn_grad(&self, ctx: &PatchContext<'_, T>) -> FvResult<nd::Array1<T>> {
        Ok(nd::Zip::from(&reflected(ctx))
            .and(&ctx.patch_internal_field())
            .and(ctx.delta_coeffs())
            .map_collect(|&reflected, &internal, &delta_coeffs| {
                (reflected - internal) * (0.5 * delta_coeffs)
            }))
    }

    fn value_internal_coeffs(
        &self,
        ctx: &PatchContext<'_, T>,
        _weights: &nd::Array1<Float>,
    ) -> FvResult<nd::Array1<T>> {
        Ok(Self::transform_diag(ctx).mapv(|diag| T::one() - diag))
    }

    fn value_boundary_coeffs(
        &self,
        ctx: &PatchContext<'_, T>,
        weights: &nd::Array1<Float>,
    ) -> FvResult<nd::Array1<T>> {
        let internal_coeffs = self.value_internal_coeffs(ctx, weights)?;
        Ok(nd::Zip::from(&self.value)
            .and(&internal_coeffs)
            .and(&ctx.patch_internal_field())
            .map_collect(|&value, &coeff, &internal| value - coeff.cmpt_multiply(internal)))
    }

    fn gradient_internal_coeffs(&self, ctx: &PatchContext<'_, T>) -> FvResult<nd::Array1<T>> {
        Ok(nd::Zip::from(&Self::transform_diag(ctx))
            .and(ctx.delta_coeffs())
            .map_collect(|&diag, &delta_coeffs| -diag * delta_coeffs))
    }

    fn gradient_boundary_coeffs(&self, ctx: &PatchContext<'_, T>) -> FvResult<nd::Array1<T>> {
        let internal_coeffs = self.gradient_internal_coeffs(ctx)?;
        Ok(nd::Zip::from(&self.sn_grad(ctx)?)
            .and(&internal_coeffs)
            .and(&ctx.patch_internal_field())
            .map_collect(|&sn_grad, &coeff, &internal| sn_grad - coeff.cmpt_multiply(internal)))
    }

    fn auto_map(
        &self,
        ctx: &PatchContext<'_, T>,
        _face_map: &[Option<usize>],
    ) -> FvResult<Box<dyn FvPatchField<T>>> {
        Ok(Box::new(Self::new(ctx)))
    }

    fn write(&self) -> Map<String, Json> {
        with_type(self.type_name(), [])
    }
}
