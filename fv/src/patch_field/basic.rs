use ndarray as nd;
use serde_json::{json, Map, Value as Json};

use super::{FromDict, FvPatchField, MixedCoeffs, PatchContext};
use crate::dictionary::{read_field, write_field};
use crate::mesh::map_or_fallback;
use crate::{Float, FvError, FvResult, Value};

pub(super) fn dictionary_name<T: Value>(ctx: &PatchContext<'_, T>) -> String {
    format!("boundaryField/{}", ctx.patch_info().name())
}

fn unsupported<T: Value>(
    field: &dyn FvPatchField<T>,
    ctx: &PatchContext<'_, T>,
    operation: &'static str,
) -> FvError {
    FvError::Unsupported {
        operation,
        type_name: field.type_name(),
        patch: ctx.patch_info().name().to_owned(),
    }
}

pub(super) fn with_type(
    type_name: &str,
    entries: impl IntoIterator<Item = (&'static str, Json)>,
) -> Map<String, Json> {
    let mut dict = Map::new();
    dict.insert("type".to_owned(), json!(type_name));
    for (key, value) in entries {
        dict.insert(key.to_owned(), value);
    }
    dict
}

/// Value set by field algebra; cannot enter an implicit operator.
#[derive(Clone, Debug)]
pub struct CalculatedPatchField<T: Value> {
    patch: usize,
    value: nd::Array1<T>,
    coeffs: MixedCoeffs<T>,
}

impl<T: Value> CalculatedPatchField<T> {
    pub fn new(ctx: &PatchContext<'_, T>, value: nd::Array1<T>) -> Self {
        Self::from_values(ctx.patch, value)
    }

    pub fn from_values(patch: usize, value: nd::Array1<T>) -> Self {
        Self {
            patch,
            coeffs: MixedCoeffs::fixed_value(value.clone()),
            value,
        }
    }
}

impl<T: Value> FromDict<T> for CalculatedPatchField<T> {
    fn from_dict(ctx: &PatchContext<'_, T>, dict: &Map<String, Json>) -> FvResult<Self> {
        let value = if dict.contains_key("value") {
            read_field(dict, &dictionary_name(ctx), "value", ctx.size())?
        } else {
            ctx.patch_internal_field()
        };
        Ok(Self::new(ctx, value))
    }
}

impl<T: Value> FvPatchField<T> for CalculatedPatchField<T> {
    patch_field_accessors!("calculated");

    fn force_assign(&mut self, values: &nd::Array1<T>) {
        self.value.assign(values);
        self.coeffs.ref_value.assign(values);
    }

    fn evaluate(&mut self, _ctx: &PatchContext<'_, T>) -> FvResult<()> {
        self.coeffs.ref_value.assign(&self.value);
        Ok(())
    }

    fn sn_grad(&self, ctx: &PatchContext<'_, T>) -> FvResult<nd::Array1<T>> {
        Ok(nd::Zip::from(&self.value)
            .and(&ctx.patch_internal_field())
            .and(ctx.delta_coeffs())
            .map_collect(|&value, &internal, &delta_coeffs| (value - internal) * delta_coeffs))
    }

    fn value_internal_coeffs(
        &self,
        ctx: &PatchContext<'_, T>,
        _weights: &nd::Array1<Float>,
    ) -> FvResult<nd::Array1<T>> {
        Err(unsupported(self, ctx, "valueInternalCoeffs"))
    }

    fn value_boundary_coeffs(
        &self,
        ctx: &PatchContext<'_, T>,
        _weights: &nd::Array1<Float>,
    ) -> FvResult<nd::Array1<T>> {
        Err(unsupported(self, ctx, "valueBoundaryCoeffs"))
    }

    fn gradient_internal_coeffs(&self, ctx: &PatchContext<'_, T>) -> FvResult<nd::Array1<T>> {
        Err(unsupported(self, ctx, "gradientInternalCoeffs"))
    }

    fn gradient_boundary_coeffs(&self, ctx: &PatchContext<'_, T>) -> FvResult<nd::Array1<T>> {
        Err(unsupported(self, ctx, "gradientBoundaryCoeffs"))
    }

    fn auto_map(
        &self,
        ctx: &PatchContext<'_, T>,
        face_map: &[Option<usize>],
    ) -> FvResult<Box<dyn FvPatchField<T>>> {
        let value = map_or_fallback(&self.value, face_map, &ctx.patch_internal_field());
        Ok(Box::new(Self::new(ctx, value)))
    }

    fn write(&self) -> Map<String, Json> {
        with_type(self.type_name(), [("value", write_field(&self.value))])
    }
}

/// Calculated value that evaluates to the adjacent cell value.
///
/// Used for derived fields such as `1/A`, whose boundary values must stay meaningful under
/// interpolation.
#[derive(Clone, Debug)]
pub struct ExtrapolatedCalculatedPatchField<T: Value> {
    patch: usize,
    value: nd::Array1<T>,
    coeffs: MixedCoeffs<T>,
}

impl<T: Value> ExtrapolatedCalculatedPatchField<T> {
    pub fn new(ctx: &PatchContext<'_, T>) -> Self {
        Self {
            patch: ctx.patch,
            value: ctx.patch_internal_field(),
            coeffs: MixedCoeffs::fixed_gradient(nd::Array1::from_elem(ctx.size(), T::zero())),
        }
    }
}

impl<T: Value> FromDict<T> for ExtrapolatedCalculatedPatchField<T> {
    fn from_dict(ctx: &PatchContext<'_, T>, _dict: &Map<String, Json>) -> FvResult<Self> {
        Ok(Self::new(ctx))
    }
}

impl<T: Value> FvPatchField<T> for ExtrapolatedCalculatedPatchField<T> {
    patch_field_accessors!("extrapolatedCalculated");

    fn evaluate(&mut self, ctx: &PatchContext<'_, T>) -> FvResult<()> {
        self.value = ctx.patch_internal_field();
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
        with_type(self.type_name(), [("value", write_field(&self.value))])
    }
}

#[derive(Clone, Debug)]
pub struct FixedValuePatchField<T: Value> {
    patch: usize,
    value: nd::Array1<T>,
    coeffs: MixedCoeffs<T>,
}

impl<T: Value> FixedValuePatchField<T> {
    pub fn new(ctx: &PatchContext<'_, T>, value: nd::Array1<T>) -> FvResult<Self> {
        if value.len() != ctx.size() {
            return Err(FvError::size_mismatch(
                format!("fixed value on patch {}", ctx.patch_info().name()),
                ctx.size(),
                value.len(),
            ));
        }
        Ok(Self {
            patch: ctx.patch,
            coeffs: MixedCoeffs::fixed_value(value.clone()),
            value,
        })
    }

    pub fn uniform(ctx: &PatchContext<'_, T>, value: T) -> Self {
        let value = nd::Array1::from_elem(ctx.size(), value);
        Self {
            patch: ctx.patch,
            coeffs: MixedCoeffs::fixed_value(value.clone()),
            value,
        }
    }
}

impl<T: Value> FromDict<T> for FixedValuePatchField<T> {
    fn from_dict(ctx: &PatchContext<'_, T>, dict: &Map<String, Json>) -> FvResult<Self> {
        Self::new(
            ctx,
            read_field(dict, &dictionary_name(ctx), "value", ctx.size())?,
        )
    }
}

impl<T: Value> FvPatchField<T> for FixedValuePatchField<T> {
    patch_field_accessors!("fixedValue");

    fn fixes_value(&self) -> bool {
        true
    }

    fn assignable(&self) -> bool {
        false
    }

    fn force_assign(&mut self, values: &nd::Array1<T>) {
        self.value.assign(values);
        self.coeffs.ref_value.assign(values);
    }

    fn auto_map(
        &self,
        ctx: &PatchContext<'_, T>,
        face_map: &[Option<usize>],
    ) -> FvResult<Box<dyn FvPatchField<T>>> {
        let value = map_or_fallback(&self.value, face_map, &ctx.patch_internal_field());
        Ok(Box::new(Self::new(ctx, value)?))
    }

    fn write(&self) -> Map<String, Json> {
        with_type(self.type_name(), [("value", write_field(&self.value))])
    }
}

#[derive(Clone, Debug)]
pub struct ZeroGradientPatchField<T: Value> {
    patch: usize,
    value: nd::Array1<T>,
    coeffs: MixedCoeffs<T>,
}

impl<T: Value> ZeroGradientPatchField<T> {
    pub fn new(ctx: &PatchContext<'_, T>) -> Self {
        Self {
            patch: ctx.patch,
            value: ctx.patch_internal_field(),
            coeffs: MixedCoeffs::fixed_gradient(nd::Array1::from_elem(ctx.size(), T::zero())),
        }
    }
}

impl<T: Value> FromDict<T> for ZeroGradientPatchField<T> {
    fn from_dict(ctx: &PatchContext<'_, T>, _dict: &Map<String, Json>) -> FvResult<Self> {
        Ok(Self::new(ctx))
    }
}

impl<T: Value> FvPatchField<T> for ZeroGradientPatchField<T> {
    patch_field_accessors!("zeroGradient");

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

#[derive(Clone, Debug)]
pub struct FixedGradientPatchField<T: Value> {
    patch: usize,
    value: nd::Array1<T>,
    coeffs: MixedCoeffs<T>,
}

impl<T: Value> FixedGradientPatchField<T> {
    pub fn new(ctx: &PatchContext<'_, T>, gradient: nd::Array1<T>) -> FvResult<Self> {
        if gradient.len() != ctx.size() {
            return Err(FvError::size_mismatch(
                format!("fixed gradient on patch {}", ctx.patch_info().name()),
                ctx.size(),
                gradient.len(),
            ));
        }
        let coeffs = MixedCoeffs::fixed_gradient(gradient);
        Ok(Self {
            patch: ctx.patch,
            value: coeffs.evaluate(&ctx.patch_internal_field(), ctx.delta_coeffs()),
            coeffs,
        })
    }

    pub fn gradient(&self) -> &nd::Array1<T> {
        &self.coeffs.ref_grad
    }
}

impl<T: Value> FromDict<T> for FixedGradientPatchField<T> {
    fn from_dict(ctx: &PatchContext<'_, T>, dict: &Map<String, Json>) -> FvResult<Self> {
        Self::new(
            ctx,
            read_field(dict, &dictionary_name(ctx), "gradient", ctx.size())?,
        )
    }
}

impl<T: Value> FvPatchField<T> for FixedGradientPatchField<T> {
    patch_field_accessors!("fixedGradient");

    fn auto_map(
        &self,
        ctx: &PatchContext<'_, T>,
        face_map: &[Option<usize>],
    ) -> FvResult<Box<dyn FvPatchField<T>>> {
        let zeros = nd::Array1::from_elem(face_map.len(), T::zero());
        let gradient = map_or_fallback(&self.coeffs.ref_grad, face_map, &zeros);
        Ok(Box::new(Self::new(ctx, gradient)?))
    }

    fn write(&self) -> Map<String, Json> {
        with_type(
            self.type_name(),
            [
                ("gradient", write_field(&self.coeffs.ref_grad)),
                ("value", write_field(&self.value)),
            ],
        )
    }
}

#[derive(Clone, Debug)]
pub struct MixedPatchField<T: Value> {
    patch: usize,
    value: nd::Array1<T>,
    coeffs: MixedCoeffs<T>,
}

impl<T: Value> MixedPatchField<T> {
    pub fn new(ctx: &PatchContext<'_, T>, coeffs: MixedCoeffs<T>) -> FvResult<Self> {
        for (what, len) in [
            ("refValue", coeffs.ref_value.len()),
            ("refGradient", coeffs.ref_grad.len()),
            ("valueFraction", coeffs.value_fraction.len()),
        ] {
            if len != ctx.size() {
                return Err(FvError::size_mismatch(
                    format!("{what} on patch {}", ctx.patch_info().name()),
                    ctx.size(),
                    len,
                ));
            }
        }
        Ok(Self {
            patch: ctx.patch,
            value: coeffs.evaluate(&ctx.patch_internal_field(), ctx.delta_coeffs()),
            coeffs,
        })
    }

    pub fn coeffs_mut(&mut self) -> &mut MixedCoeffs<T> {
        &mut self.coeffs
    }
}

impl<T: Value> FromDict<T> for MixedPatchField<T> {
    fn from_dict(ctx: &PatchContext<'_, T>, dict: &Map<String, Json>) -> FvResult<Self> {
        let dictionary = dictionary_name(ctx);
        let coeffs = MixedCoeffs::new(
            read_field(dict, &dictionary, "refValue", ctx.size())?,
            read_field(dict, &dictionary, "refGradient", ctx.size())?,
            read_field(dict, &dictionary, "valueFraction", ctx.size())?,
        );
        Self::new(ctx, coeffs)
    }
}

impl<T: Value> FvPatchField<T> for MixedPatchField<T> {
    patch_field_accessors!("mixed");

    fn assignable(&self) -> bool {
        false
    }

    fn auto_map(
        &self,
        ctx: &PatchContext<'_, T>,
        face_map: &[Option<usize>],
    ) -> FvResult<Box<dyn FvPatchField<T>>> {
        let coeffs = self.coeffs.mapped(face_map, &ctx.patch_internal_field());
        Ok(Box::new(Self::new(ctx, coeffs)?))
    }

    fn write(&self) -> Map<String, Json> {
        with_type(
            self.type_name(),
            [
                ("refValue", write_field(&self.coeffs.ref_value)),
                ("refGradient", write_field(&self.coeffs.ref_grad)),
                ("valueFraction", write_field(&self.coeffs.value_fraction)),
                ("value", write_field(&self.value)),
            ],
        )
    }
}

/// Fixed value where the flux enters the domain, zero gradient where it leaves.
#[derive(Clone, Debug)]
pub struct InletOutletPatchField<T: Value> {
    patch: usize,
    value: nd::Array1<T>,
    coeffs: MixedCoeffs<T>,
    phi_name: String,
}

impl<T: Value> InletOutletPatchField<T> {
    pub fn new(ctx: &PatchContext<'_, T>, inlet_value: nd::Array1<T>) -> FvResult<Self> {
        if inlet_value.len() != ctx.size() {
            return Err(FvError::size_mismatch(
                format!("inlet value on patch {}", ctx.patch_info().name()),
                ctx.size(),
                inlet_value.len(),
            ));
        }
        let n = inlet_value.len();
        Ok(Self {
            patch: ctx.patch,
            value: ctx.patch_internal_field(),
            coeffs: MixedCoeffs::new(
                inlet_value,
                nd::Array1::from_elem(n, T::zero()),
                nd::Array1::zeros(n),
            ),
            phi_name: "phi".to_owned(),
        })
    }

    pub fn with_phi_name(self, phi_name: impl Into<String>) -> Self {
        Self {
            phi_name: phi_name.into(),
            ..self
        }
    }
}

impl<T: Value> FromDict<T> for InletOutletPatchField<T> {
    fn from_dict(ctx: &PatchContext<'_, T>, dict: &Map<String, Json>) -> FvResult<Self> {
        let dictionary = dictionary_name(ctx);
        let mut field = Self::new(
            ctx,
            read_field(dict, &dictionary, "inletValue", ctx.size())?,
        )?;
        if dict.contains_key("value") {
            field.value = read_field(dict, &dictionary, "value", ctx.size())?;
        }
        if let Some(phi) = dict.get("phi") {
            let phi = phi
                .as_str()
                .ok_or_else(|| FvError::invalid(&dictionary, "phi", "expected a field name"))?;
            field = field.with_phi_name(phi);
        }
        Ok(field)
    }
}

impl<T: Value> FvPatchField<T> for InletOutletPatchField<T> {
    patch_field_accessors!("inletOutlet");

    fn update_coeffs(&mut self, ctx: &PatchContext<'_, T>) -> FvResult<()> {
        let flux = ctx
            .patch_flux()
            .ok_or_else(|| FvError::missing(dictionary_name(ctx), self.phi_name.as_str()))?;
        self.coeffs.value_fraction = flux.mapv(|flux| if flux >= 0. { 0. } else { 1. });
        Ok(())
    }

    fn auto_map(
        &self,
        ctx: &PatchContext<'_, T>,
        face_map: &[Option<usize>],
    ) -> FvResult<Box<dyn FvPatchField<T>>> {
        let coeffs = self.coeffs.mapped(face_map, &ctx.patch_internal_field());
        let mut field = Self::new(ctx, coeffs.ref_value)?.with_phi_name(self.phi_name.clone());
        field.coeffs.value_fraction = coeffs.value_fraction;
        field.value = map_or_fallback(&self.value, face_map, &ctx.patch_internal_field());
        Ok(Box::new(field))
    }

    fn write(&self) -> Map<String, Json> {
        with_type(
            self.type_name(),
            [
                ("phi", json!(self.phi_name)),
                ("inletValue", write_field(&self.coeffs.ref_value)),
                ("value", write_field(&self.value)),
            ],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::SurfaceField;
    use crate::patch_field::BoundaryEnv;
    use crate::{dimensions, Mesh};
    use approx::assert_relative_eq;

    #[test]
    fn test_fixed_value_ignores_interior() {
        let mesh = Mesh::line(4, 1.).unwrap();
        let internal = nd::arr1(&[1., 2., 3., 4.]);
        let left = mesh.find_patch("left").unwrap();
        let ctx = PatchContext::new(&mesh, left, &internal);
        let mut field = FixedValuePatchField::uniform(&ctx, 5.);
        field.evaluate(&ctx).unwrap();
        assert_eq!(field.value()[0], 5.);
        assert!(field.fixes_value());
        // Cell centre sits 1/8 from the face.
        assert_relative_eq!(field.sn_grad(&ctx).unwrap()[0], 32.);
    }

    #[test]
    fn test_fixed_gradient_extrapolates() {
        let mesh = Mesh::line(4, 1.).unwrap();
        let internal = nd::arr1(&[1., 2., 3., 4.]);
        let right = mesh.find_patch("right").unwrap();
        let ctx = PatchContext::new(&mesh, right, &internal);
        let dict = serde_json::json!({"gradient": 8.});
        let mut field =
            FixedGradientPatchField::from_dict(&ctx, dict.as_object().unwrap()).unwrap();
        field.evaluate(&ctx).unwrap();
        assert_relative_eq!(field.value()[0], 5.);
    }

    #[test]
    fn test_calculated_cannot_be_linearised() {
        let mesh = Mesh::line(2, 1.).unwrap();
        let internal = nd::arr1(&[1., 2.]);
        let ctx = PatchContext::new(&mesh, 0, &internal);
        let field = CalculatedPatchField::new(&ctx, nd::arr1(&[0.]));
        assert!(matches!(
            field.gradient_internal_coeffs(&ctx),
            Err(FvError::Unsupported { .. })
        ));
    }

    #[test]
    fn test_inlet_outlet_switches_on_flux_sign() {
        let mesh = Mesh::line(2, 1.).unwrap();
        let internal = nd::arr1(&[1., 2.]);
        let right = mesh.find_patch("right").unwrap();
        let ctx = PatchContext::new(&mesh, right, &internal);
        let mut field = InletOutletPatchField::new(&ctx, nd::arr1(&[7.])).unwrap();
        assert!(matches!(
            field.update_coeffs(&ctx),
            Err(FvError::MissingEntry { .. })
        ));

        let mut phi = SurfaceField::uniform(&mesh, "phi", dimensions::VOLUMETRIC_FLUX, 0.);
        for (flux, expected) in [(1., 2.), (-1., 7.)] {
            phi.boundary_mut(right).fill(flux);
            let ctx = PatchContext::new(&mesh, right, &internal).with_env(BoundaryEnv {
                phi: Some(&phi),
                time: 0.,
            });
            field.update_coeffs(&ctx).unwrap();
            field.evaluate(&ctx).unwrap();
            assert_eq!(field.value()[0], expected);
        }
    }
}
