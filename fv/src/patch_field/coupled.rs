use ndarray as nd;
use serde_json::{Map, Value as Json};

use super::basic::{dictionary_name, with_type};
use super::{FromDict, FvPatchField, MixedCoeffs, PatchContext};
use crate::dictionary::write_field;
use crate::linalg::LduInterface;
use crate::mesh::PatchKind;
use crate::value::{flatten, unflatten};
use crate::{Float, FvError, FvResult, Value};

/// Boundary value interpolated between the cells on both sides, with the mixed view
/// `refValue = neighbour`, `valueFraction = 1 - w`.
fn interpolated<T: Value>(
    ctx: &PatchContext<'_, T>,
    neighbour: &nd::Array1<T>,
) -> (nd::Array1<T>, MixedCoeffs<T>) {
    let weights = &ctx.geometry().weights;
    let internal = ctx.patch_internal_field();
    let value = nd::Zip::from(&internal)
        .and(neighbour)
        .and(weights)
        .map_collect(|&internal, &neighbour, &w| internal * w + neighbour * (1. - w));
    let coeffs = MixedCoeffs::new(
        neighbour.clone(),
        nd::Array1::from_elem(neighbour.len(), T::zero()),
        weights.mapv(|w| 1. - w),
    );
    (value, coeffs)
}

fn coupled_sn_grad<T: Value>(
    ctx: &PatchContext<'_, T>,
    neighbour: &nd::Array1<T>,
) -> nd::Array1<T> {
    nd::Zip::from(neighbour)
        .and(&ctx.patch_internal_field())
        .and(&ctx.geometry().non_orth_delta_coeffs)
        .map_collect(|&neighbour, &internal, &delta_coeffs| {
            (neighbour - internal) * delta_coeffs
        })
}

/// Periodic condition taking the neighbour values from the paired patch.
#[derive(Clone, Debug)]
pub struct CyclicPatchField<T: Value> {
    patch: usize,
    value: nd::Array1<T>,
    coeffs: MixedCoeffs<T>,
    neighbour_field: nd::Array1<T>,
}

impl<T: Value> CyclicPatchField<T> {
    pub fn new(ctx: &PatchContext<'_, T>) -> FvResult<Self> {
        let neighbour_field = Self::neighbour_values(ctx)?;
        let (value, coeffs) = interpolated(ctx, &neighbour_field);
        Ok(Self {
            patch: ctx.patch,
            value,
            coeffs,
            neighbour_field,
        })
    }

    fn neighbour_values(ctx: &PatchContext<'_, T>) -> FvResult<nd::Array1<T>> {
        let geometry = ctx.geometry();
        let neighbour_patch = geometry.neighbour_patch.ok_or_else(|| {
            FvError::invalid(
                dictionary_name(ctx),
                "type",
                "cyclic condition on a patch without a cyclic neighbour",
            )
        })?;
        Ok(ctx
            .mesh
            .patch_geometry(neighbour_patch)
            .face_cells
            .iter()
            .map(|&cell| match &geometry.rotation {
                Some(rotation) => ctx.internal[cell].transform(rotation),
                None => ctx.internal[cell],
            })
            .collect())
    }
}

impl<T: Value> FromDict<T> for CyclicPatchField<T> {
    fn from_dict(ctx: &PatchContext<'_, T>, _dict: &Map<String, Json>) -> FvResult<Self> {
        Self::new(ctx)
    }
}

impl<T: Value> FvPatchField<T> for CyclicPatchField<T> {
    patch_field_accessors!("cyclic");

    fn coupled(&self) -> bool {
        true
    }

    fn constraint(&self) -> bool {
        true
    }

    fn evaluate(&mut self, ctx: &PatchContext<'_, T>) -> FvResult<()> {
        self.neighbour_field = Self::neighbour_values(ctx)?;
        (self.value, self.coeffs) = interpolated(ctx, &self.neighbour_field);
        Ok(())
    }

    fn sn_grad(&self, ctx: &PatchContext<'_, T>) -> FvResult<nd::Array1<T>> {
        Ok(coupled_sn_grad(ctx, &Self::neighbour_values(ctx)?))
    }

    fn value_internal_coeffs(
        &self,
        _ctx: &PatchContext<'_, T>,
        weights: &nd::Array1<Float>,
    ) -> FvResult<nd::Array1<T>> {
        Ok(weights.mapv(|w| T::one() * w))
    }

    fn value_boundary_coeffs(
        &self,
        _ctx: &PatchContext<'_, T>,
        weights: &nd::Array1<Float>,
    ) -> FvResult<nd::Array1<T>> {
        Ok(weights.mapv(|w| T::one() * (1. - w)))
    }

    fn gradient_internal_coeffs(&self, ctx: &PatchContext<'_, T>) -> FvResult<nd::Array1<T>> {
        Ok(ctx
            .geometry()
            .non_orth_delta_coeffs
            .mapv(|delta_coeffs| T::one() * -delta_coeffs))
    }

    fn gradient_boundary_coeffs(&self, ctx: &PatchContext<'_, T>) -> FvResult<nd::Array1<T>> {
        Ok(ctx
            .geometry()
            .non_orth_delta_coeffs
            .mapv(|delta_coeffs| T::one() * delta_coeffs))
    }

    fn patch_neighbour_field(&self) -> Option<&nd::Array1<T>> {
        Some(&self.neighbour_field)
    }

    fn patch_neighbour_field_mut(&mut self) -> Option<&mut nd::Array1<T>> {
        Some(&mut self.neighbour_field)
    }

    fn interface<'a>(
        &self,
        ctx: &PatchContext<'a, T>,
        component: usize,
    ) -> Option<LduInterface<'a>> {
        let geometry = ctx.geometry();
        let neighbour_patch = geometry.neighbour_patch?;
        // Only the part of the rotated neighbour value along the same component is implicit.
        let scale = geometry.rotation.map_or(1., |rotation| {
            T::from_fn(|d| if d == component { 1. } else { 0. })
                .transform(&rotation)
                .component(component)
        });
        Some(LduInterface::Cyclic {
            face_cells: &geometry.face_cells,
            neighbour_cells: &ctx.mesh.patch_geometry(neighbour_patch).face_cells,
            scale,
        })
    }

    fn auto_map(
        &self,
        ctx: &PatchContext<'_, T>,
        _face_map: &[Option<usize>],
    ) -> FvResult<Box<dyn FvPatchField<T>>> {
        Ok(Box::new(Self::new(ctx)?))
    }

    fn write(&self) -> Map<String, Json> {
        with_type(self.type_name(), [("value", write_field(&self.value))])
    }
}

/// Condition on a cut between two ranks; neighbour values arrive by message.
#[derive(Clone, Debug)]
pub struct ProcessorPatchField<T: Value> {
    patch: usize,
    value: nd::Array1<T>,
    coeffs: MixedCoeffs<T>,
    neighbour_field: nd::Array1<T>,
    neighb_rank: usize,
    tag: usize,
}

impl<T: Value> ProcessorPatchField<T> {
    /// Starts from the local cell values; the first evaluation exchanges the real ones.
    pub fn new(ctx: &PatchContext<'_, T>) -> FvResult<Self> {
        let PatchKind::Processor {
            neighb_rank, tag, ..
        } = ctx.patch_info().kind()
        else {
            return Err(FvError::invalid(
                dictionary_name(ctx),
                "type",
                "processor condition on a patch that is not a processor boundary",
            ));
        };
        let neighbour_field = ctx.patch_internal_field();
        let (value, coeffs) = interpolated(ctx, &neighbour_field);
        Ok(Self {
            patch: ctx.patch,
            value,
            coeffs,
            neighbour_field,
            neighb_rank: *neighb_rank,
            tag: *tag,
        })
    }

    pub fn neighb_rank(&self) -> usize {
        self.neighb_rank
    }
}

impl<T: Value> FromDict<T> for ProcessorPatchField<T> {
    fn from_dict(ctx: &PatchContext<'_, T>, _dict: &Map<String, Json>) -> FvResult<Self> {
        Self::new(ctx)
    }
}

impl<T: Value> FvPatchField<T> for ProcessorPatchField<T> {
    patch_field_accessors!("processor");

    fn coupled(&self) -> bool {
        true
    }

    fn constraint(&self) -> bool {
        true
    }

    fn init_evaluate(&mut self, ctx: &PatchContext<'_, T>) -> FvResult<()> {
        log::trace!(
            "Sending {} faces to rank {} on tag {}",
            ctx.size(),
            self.neighb_rank,
            self.tag
        );
        ctx.mesh.comm().send(
            self.neighb_rank,
            self.tag,
            flatten(&ctx.patch_internal_field()),
        )
    }

    fn evaluate(&mut self, ctx: &PatchContext<'_, T>) -> FvResult<()> {
        let data = ctx.mesh.comm().receive(self.neighb_rank, self.tag)?;
        let neighbour_field = nd::Array1::from(unflatten::<T>(&data));
        if neighbour_field.len() != ctx.size() {
            return Err(FvError::size_mismatch(
                format!("message from rank {}", self.neighb_rank),
                ctx.size(),
                neighbour_field.len(),
            ));
        }
        self.neighbour_field = neighbour_field;
        (self.value, self.coeffs) = interpolated(ctx, &self.neighbour_field);
        Ok(())
    }

    fn sn_grad(&self, ctx: &PatchContext<'_, T>) -> FvResult<nd::Array1<T>> {
        Ok(coupled_sn_grad(ctx, &self.neighbour_field))
    }

    fn value_internal_coeffs(
        &self,
        _ctx: &PatchContext<'_, T>,
        weights: &nd::Array1<Float>,
    ) -> FvResult<nd::Array1<T>> {
        Ok(weights.mapv(|w| T::one() * w))
    }

    fn value_boundary_coeffs(
        &self,
        _ctx: &PatchContext<'_, T>,
        weights: &nd::Array1<Float>,
    ) -> FvResult<nd::Array1<T>> {
        Ok(weights.mapv(|w| T::one() * (1. - w)))
    }

    fn gradient_internal_coeffs(&self, ctx: &PatchContext<'_, T>) -> FvResult<nd::Array1<T>> {
        Ok(ctx
            .geometry()
            .non_orth_delta_coeffs
            .mapv(|delta_coeffs| T::one() * -delta_coeffs))
    }

    fn gradient_boundary_coeffs(&self, ctx: &PatchContext<'_, T>) -> FvResult<nd::Array1<T>> {
        Ok(ctx
            .geometry()
            .non_orth_delta_coeffs
            .mapv(|delta_coeffs| T::one() * delta_coeffs))
    }

    fn patch_neighbour_field(&self) -> Option<&nd::Array1<T>> {
        Some(&self.neighbour_field)
    }

    fn patch_neighbour_field_mut(&mut self) -> Option<&mut nd::Array1<T>> {
        Some(&mut self.neighbour_field)
    }

    fn interface<'a>(
        &self,
        ctx: &PatchContext<'a, T>,
        _component: usize,
    ) -> Option<LduInterface<'a>> {
        Some(LduInterface::Processor {
            face_cells: &ctx.geometry().face_cells,
            comm: ctx.mesh.comm(),
            neighb_rank: self.neighb_rank,
            tag: self.tag,
        })
    }

    fn auto_map(
        &self,
        ctx: &PatchContext<'_, T>,
        _face_map: &[Option<usize>],
    ) -> FvResult<Box<dyn FvPatchField<T>>> {
        Ok(Box::new(Self::new(ctx)?))
    }

    fn write(&self) -> Map<String, Json> {
        with_type(self.type_name(), [("value", write_field(&self.value))])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::{BlockMesh, Side};
    use approx::assert_relative_eq;

    #[test]
    fn test_cyclic_takes_paired_cells() {
        let mesh = BlockMesh::two_dimensional([4, 1], [4., 1.])
            .with_cyclic(Side::XMin, "inlet", "outlet")
            .build()
            .unwrap();
        let inlet = mesh.find_patch("inlet").unwrap();
        let internal = nd::arr1(&[1., 2., 3., 4.]);
        let ctx = PatchContext::new(&mesh, inlet, &internal);
        let mut field = CyclicPatchField::new(&ctx).unwrap();
        field.evaluate(&ctx).unwrap();
        assert_eq!(field.patch_neighbour_field().unwrap()[0], 4.);
        assert_relative_eq!(field.value()[0], 2.5);
        assert_relative_eq!(field.sn_grad(&ctx).unwrap()[0], 3.);
        // The mixed view reproduces the interpolated value.
        let view = field
            .coeffs()
            .evaluate(&ctx.patch_internal_field(), ctx.delta_coeffs());
        assert_relative_eq!(view[0], 2.5);
    }

    #[test]
    fn test_processor_needs_processor_patch() {
        let mesh = crate::Mesh::line(2, 1.).unwrap();
        let internal = nd::arr1(&[1., 2.]);
        let ctx = PatchContext::new(&mesh, 0, &internal);
        assert!(matches!(
            ProcessorPatchField::new(&ctx),
            Err(FvError::InvalidEntry { .. })
        ));
    }
}
