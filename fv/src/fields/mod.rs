//! Cell-centred volume fields with their boundary conditions, and face-centred surface fields.
//!
//! Fields do not hold on to their mesh; every operation that needs geometry takes the mesh as
//! an argument and checks that the field was built on that mesh (or on one it was remapped to).

mod io;
mod ops;
mod surface;

use ndarray as nd;
use serde_json::Value as Json;

pub use surface::SurfaceField;

use crate::parallel::SubDomain;
use crate::patch_field::{
    BoundaryEnv, CalculatedPatchField, ExtrapolatedCalculatedPatchField, FvPatchField,
    PatchContext, PatchFieldRegistry,
};
use crate::{DimensionSet, Float, FvError, FvResult, Mesh, Value, Vector3};

/// Number of old time levels kept: enough for second-order backward differencing.
const MAX_OLD_TIMES: usize = 2;

#[derive(Clone, derivative::Derivative)]
#[derivative(Debug)]
pub struct VolField<T: Value> {
    name: String,
    dimensions: DimensionSet,
    generation: u64,
    #[derivative(Debug = "ignore")]
    internal: nd::Array1<T>,
    boundary: Vec<Box<dyn FvPatchField<T>>>,
    time_index: usize,
    #[derivative(Debug = "ignore")]
    old_time: Option<Box<VolField<T>>>,
    #[derivative(Debug = "ignore")]
    prev_iter: Option<Box<VolField<T>>>,
}

impl<T: Value> VolField<T> {
    /// Assembles a field from its parts, checking the sizes against the mesh.
    pub fn from_parts(
        mesh: &Mesh,
        name: impl Into<String>,
        dimensions: DimensionSet,
        internal: nd::Array1<T>,
        boundary: Vec<Box<dyn FvPatchField<T>>>,
    ) -> FvResult<Self> {
        let name = name.into();
        if internal.len() != mesh.n_cells() {
            return Err(FvError::size_mismatch(
                format!("internal field of {name}"),
                mesh.n_cells(),
                internal.len(),
            ));
        }
        if boundary.len() != mesh.patches().len() {
            return Err(FvError::size_mismatch(
                format!("boundary field of {name}"),
                mesh.patches().len(),
                boundary.len(),
            ));
        }
        for (patch, field) in mesh.patches().iter().zip(&boundary) {
            if field.value().len() != patch.size() {
                return Err(FvError::size_mismatch(
                    format!("{name} on patch {}", patch.name()),
                    patch.size(),
                    field.value().len(),
                ));
            }
        }
        Ok(Self {
            name,
            dimensions,
            generation: mesh.generation(),
            internal,
            boundary,
            time_index: 0,
            old_time: None,
            prev_iter: None,
        })
    }

    pub fn builder<'m>(
        mesh: &'m Mesh,
        name: impl Into<String>,
        dimensions: DimensionSet,
    ) -> VolFieldBuilder<'m, T> {
        VolFieldBuilder::new(mesh, name, dimensions)
    }

    /// A field whose boundary values are whatever the algebra producing it sets.
    ///
    /// Constraint patches keep their condition.
    pub fn calculated(
        mesh: &Mesh,
        name: impl Into<String>,
        dimensions: DimensionSet,
        internal: nd::Array1<T>,
    ) -> FvResult<Self> {
        Self::derived(mesh, name, dimensions, internal, |ctx| {
            Box::new(CalculatedPatchField::new(ctx, ctx.patch_internal_field()))
        })
    }

    /// Like [`Self::calculated`], with boundary values following the adjacent cells.
    pub fn extrapolated(
        mesh: &Mesh,
        name: impl Into<String>,
        dimensions: DimensionSet,
        internal: nd::Array1<T>,
    ) -> FvResult<Self> {
        Self::derived(mesh, name, dimensions, internal, |ctx| {
            Box::new(ExtrapolatedCalculatedPatchField::new(ctx))
        })
    }

    fn derived(
        mesh: &Mesh,
        name: impl Into<String>,
        dimensions: DimensionSet,
        internal: nd::Array1<T>,
        make: impl Fn(&PatchContext<'_, T>) -> Box<dyn FvPatchField<T>>,
    ) -> FvResult<Self> {
        let registry = PatchFieldRegistry::with_defaults();
        let boundary = (0..mesh.patches().len())
            .map(|patch| {
                let ctx = PatchContext::new(mesh, patch, &internal);
                Ok(match registry.constraint(&ctx)? {
                    Some(field) => field,
                    None => make(&ctx),
                })
            })
            .collect::<FvResult<Vec<_>>>()?;
        Self::from_parts(mesh, name, dimensions, internal, boundary)
    }

    pub fn uniform_calculated(
        mesh: &Mesh,
        name: impl Into<String>,
        dimensions: DimensionSet,
        value: T,
    ) -> FvResult<Self> {
        Self::calculated(
            mesh,
            name,
            dimensions,
            nd::Array1::from_elem(mesh.n_cells(), value),
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rename(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn dimensions(&self) -> DimensionSet {
        self.dimensions
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn internal(&self) -> &nd::Array1<T> {
        &self.internal
    }

    pub fn internal_mut(&mut self) -> &mut nd::Array1<T> {
        &mut self.internal
    }

    pub fn boundary(&self) -> &[Box<dyn FvPatchField<T>>] {
        &self.boundary
    }

    pub fn boundary_field(&self, patch: usize) -> &dyn FvPatchField<T> {
        self.boundary[patch].as_ref()
    }

    pub fn boundary_field_mut(&mut self, patch: usize) -> &mut dyn FvPatchField<T> {
        self.boundary[patch].as_mut()
    }

    pub fn boundary_value(&self, patch: usize) -> &nd::Array1<T> {
        self.boundary[patch].value()
    }

    /// Fails with `StaleTopology` unless the field was built on `mesh`.
    pub fn check_mesh(&self, mesh: &Mesh) -> FvResult<()> {
        mesh.check_generation(&format!("field {}", self.name), self.generation)
    }

    pub fn patch_context<'a>(&'a self, mesh: &'a Mesh, patch: usize) -> PatchContext<'a, T> {
        PatchContext::new(mesh, patch, &self.internal)
    }

    /// Recomputes the coefficients of conditions that depend on other fields.
    pub fn update_coeffs(&mut self, mesh: &Mesh, env: BoundaryEnv<'_>) -> FvResult<()> {
        self.check_mesh(mesh)?;
        for (patch, field) in self.boundary.iter_mut().enumerate() {
            field.update_coeffs(&PatchContext::new(mesh, patch, &self.internal).with_env(env))?;
        }
        Ok(())
    }

    pub fn correct_boundary_conditions(&mut self, mesh: &Mesh) -> FvResult<()> {
        self.correct_boundary_conditions_with(mesh, BoundaryEnv::default())
    }

    /// Evaluates every condition: all sends are posted before any receive blocks.
    pub fn correct_boundary_conditions_with(
        &mut self,
        mesh: &Mesh,
        env: BoundaryEnv<'_>,
    ) -> FvResult<()> {
        self.check_mesh(mesh)?;
        for (patch, field) in self.boundary.iter_mut().enumerate() {
            field.init_evaluate(&PatchContext::new(mesh, patch, &self.internal).with_env(env))?;
        }
        for (patch, field) in self.boundary.iter_mut().enumerate() {
            field.evaluate(&PatchContext::new(mesh, patch, &self.internal).with_env(env))?;
        }
        Ok(())
    }

    /// True when no condition on any rank fixes the level of the field.
    pub fn needs_reference(&self, mesh: &Mesh) -> bool {
        let fixes_level = self.boundary.iter().any(|field| field.fixes_value());
        !mesh.comm().any(fixes_level)
    }

    pub fn time_index(&self) -> usize {
        self.time_index
    }

    /// Pushes the current values onto the old-time chain when `time_index` moves on.
    pub fn store_old_times(&mut self, time_index: usize) {
        if time_index == self.time_index {
            return;
        }
        let mut old = self.clone();
        old.prev_iter = None;
        truncate_old_times(&mut old, MAX_OLD_TIMES - 1);
        self.old_time = Some(Box::new(old));
        self.time_index = time_index;
    }

    /// The field at the previous time level, or the field itself if none was stored.
    pub fn old_time(&self) -> &Self {
        self.old_time.as_deref().unwrap_or(self)
    }

    pub fn n_old_times(&self) -> usize {
        self.old_time
            .as_ref()
            .map_or(0, |old| 1 + old.n_old_times())
    }

    pub fn store_prev_iter(&mut self) {
        let mut previous = self.clone();
        previous.old_time = None;
        previous.prev_iter = None;
        self.prev_iter = Some(Box::new(previous));
    }

    pub fn prev_iter(&self) -> &Self {
        self.prev_iter.as_deref().unwrap_or(self)
    }

    /// Under-relaxes towards the values stored by [`Self::store_prev_iter`].
    pub fn relax(&mut self, alpha: Float) {
        if alpha >= 1. {
            return;
        }
        let Some(previous) = self.prev_iter.as_deref() else {
            log::warn!("Relaxing {} without a previous iteration", self.name);
            return;
        };
        nd::Zip::from(&mut self.internal)
            .and(&previous.internal)
            .for_each(|value, &previous| *value = previous + (*value - previous) * alpha);
        for (field, previous) in self.boundary.iter_mut().zip(&previous.boundary) {
            let relaxed = nd::Zip::from(field.value())
                .and(previous.value())
                .map_collect(|&value, &previous| previous + (value - previous) * alpha);
            field.force_assign(&relaxed);
        }
    }

    /// Sets the boundary values of every patch whose condition allows it.
    pub fn assign_boundary(&mut self, patch: usize, values: &nd::Array1<T>) {
        if self.boundary[patch].assignable() {
            self.boundary[patch].force_assign(values);
        }
    }

    /// This rank's share of the field on the subdomain `sub_domain`.
    pub fn decompose(&self, mesh: &Mesh, sub_domain: &SubDomain) -> FvResult<Self> {
        self.check_mesh(mesh)?;
        let internal = sub_domain
            .cell_addressing
            .iter()
            .map(|&cell| self.internal[cell])
            .collect::<nd::Array1<T>>();
        let sub_mesh = &sub_domain.mesh;
        let registry = PatchFieldRegistry::with_defaults();
        let boundary = sub_mesh
            .patches()
            .iter()
            .map(|patch| {
                let ctx = PatchContext::new(sub_mesh, patch.index(), &internal);
                match sub_domain.patch_addressing[patch.index()] {
                    Some(global) => self.boundary[global]
                        .auto_map(&ctx, &sub_domain.patch_face_addressing[patch.index()]),
                    None => registry.constraint(&ctx)?.ok_or_else(|| {
                        FvError::InvalidMesh(format!(
                            "patch {} of rank {} has no source patch",
                            patch.name(),
                            sub_domain.rank
                        ))
                    }),
                }
            })
            .collect::<FvResult<Vec<_>>>()?;
        let mut field =
            Self::from_parts(sub_mesh, &self.name, self.dimensions, internal, boundary)?;
        field.time_index = self.time_index;
        if let Some(old) = &self.old_time {
            field.old_time = Some(Box::new(old.decompose(mesh, sub_domain)?));
        }
        Ok(field)
    }

    /// Carries the field over to `mesh` after a topology change, using its change map.
    pub fn topo_change(self, mesh: &Mesh) -> FvResult<Self> {
        if self.generation == mesh.generation() {
            return Ok(self);
        }
        let map = mesh
            .topo_change_map()
            .filter(|map| map.old_generation() == self.generation)
            .ok_or_else(|| FvError::StaleTopology {
                what: format!("field {}", self.name),
                expected: self.generation,
                actual: mesh.generation(),
            })?;
        let internal = map.map_cells(&self.internal);
        let boundary = (0..mesh.patches().len())
            .map(|patch| {
                let ctx = PatchContext::new(mesh, patch, &internal);
                let face_map = map.patch_face_map(patch);
                match self.boundary.get(patch) {
                    Some(field) => field.auto_map(&ctx, face_map),
                    None => Ok(Box::new(CalculatedPatchField::new(
                        &ctx,
                        ctx.patch_internal_field(),
                    )) as Box<dyn FvPatchField<T>>),
                }
            })
            .collect::<FvResult<Vec<_>>>()?;
        log::debug!("Mapped field {} onto mesh generation {}", self.name, mesh.generation());
        let mut field = Self::from_parts(mesh, self.name, self.dimensions, internal, boundary)?;
        field.time_index = self.time_index;
        field.old_time = self
            .old_time
            .map(|old| old.topo_change(mesh).map(Box::new))
            .transpose()?;
        Ok(field)
    }
}

fn truncate_old_times<T: Value>(field: &mut VolField<T>, depth: usize) {
    match (&mut field.old_time, depth) {
        (old_time, 0) => *old_time = None,
        (Some(old), depth) => truncate_old_times(old, depth - 1),
        (None, _) => {}
    }
}

/// Builds a field patch by patch, by condition name or from a `boundaryField` entry.
///
/// Constraint patches get their condition automatically; other patches default to
/// `zeroGradient`.
pub struct VolFieldBuilder<'m, T: Value> {
    mesh: &'m Mesh,
    name: String,
    dimensions: DimensionSet,
    internal: nd::Array1<T>,
    patches: Vec<(String, serde_json::Map<String, Json>)>,
    registry: PatchFieldRegistry<T>,
}

impl<'m, T: Value> VolFieldBuilder<'m, T> {
    fn new(mesh: &'m Mesh, name: impl Into<String>, dimensions: DimensionSet) -> Self {
        Self {
            mesh,
            name: name.into(),
            dimensions,
            internal: nd::Array1::from_elem(mesh.n_cells(), T::zero()),
            patches: Vec::new(),
            registry: PatchFieldRegistry::with_defaults(),
        }
    }

    pub fn uniform(self, value: T) -> Self {
        Self {
            internal: nd::Array1::from_elem(self.mesh.n_cells(), value),
            ..self
        }
    }

    pub fn internal(self, internal: nd::Array1<T>) -> Self {
        Self { internal, ..self }
    }

    /// Initial values as a function of the cell centre.
    pub fn from_fn(self, f: impl Fn(&Vector3) -> T) -> Self {
        let internal = self.mesh.cell_centres().map(f);
        Self { internal, ..self }
    }

    pub fn registry(self, registry: PatchFieldRegistry<T>) -> Self {
        Self { registry, ..self }
    }

    /// Sets the condition of `patch` from a `boundaryField`-style dictionary.
    pub fn patch(mut self, patch: &str, dict: Json) -> Self {
        let dict = match dict {
            Json::Object(dict) => dict,
            other => {
                let mut dict = serde_json::Map::new();
                dict.insert("type".to_owned(), other);
                dict
            }
        };
        self.patches.push((patch.to_owned(), dict));
        self
    }

    pub fn fixed_value(self, patch: &str, value: T) -> Self {
        self.patch(
            patch,
            serde_json::json!({"type": "fixedValue", "value": value.to_json()}),
        )
    }

    pub fn zero_gradient(self, patch: &str) -> Self {
        self.patch(patch, serde_json::json!({"type": "zeroGradient"}))
    }

    pub fn fixed_gradient(self, patch: &str, gradient: T) -> Self {
        self.patch(
            patch,
            serde_json::json!({"type": "fixedGradient", "gradient": gradient.to_json()}),
        )
    }

    pub fn inlet_outlet(self, patch: &str, inlet_value: T) -> Self {
        self.patch(
            patch,
            serde_json::json!({"type": "inletOutlet", "inletValue": inlet_value.to_json()}),
        )
    }

    pub fn build(self) -> FvResult<VolField<T>> {
        let mesh = self.mesh;
        for (name, _) in &self.patches {
            if mesh.find_patch(name).is_none() {
                return Err(FvError::invalid(
                    format!("boundaryField of {}", self.name),
                    name.as_str(),
                    "no such patch",
                ));
            }
        }
        let boundary = mesh
            .patches()
            .iter()
            .map(|patch| {
                let ctx = PatchContext::new(mesh, patch.index(), &self.internal);
                let spec = self
                    .patches
                    .iter()
                    .rev()
                    .find(|(name, _)| name == patch.name());
                match spec {
                    Some((_, dict)) => self.registry.construct(&ctx, dict),
                    None => match self.registry.constraint(&ctx)? {
                        Some(field) => Ok(field),
                        None => self.registry.by_name(&ctx, "zeroGradient", &Default::default()),
                    },
                }
            })
            .collect::<FvResult<Vec<_>>>()?;
        VolField::from_parts(mesh, self.name, self.dimensions, self.internal, boundary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dimensions::{DIMLESS, KINEMATIC_PRESSURE};
    use approx::assert_relative_eq;

    fn line_field(mesh: &Mesh) -> VolField<Float> {
        VolField::builder(mesh, "T", DIMLESS)
            .from_fn(|centre| centre.x)
            .fixed_value("left", 0.)
            .fixed_gradient("right", 2.)
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder() {
        let mesh = Mesh::line(4, 1.).unwrap();
        let mut field = line_field(&mesh);
        assert_eq!(field.boundary_field(0).type_name(), "fixedValue");
        assert_eq!(field.boundary_field(1).type_name(), "fixedGradient");
        assert_eq!(field.boundary_field(2).type_name(), "empty");
        field.correct_boundary_conditions(&mesh).unwrap();
        assert_relative_eq!(field.boundary_value(1)[0], 0.875 + 2. * 0.125);
        assert!(!field.needs_reference(&mesh));

        let result = VolField::<Float>::builder(&mesh, "T", DIMLESS)
            .zero_gradient("nowhere")
            .build();
        assert!(matches!(result, Err(FvError::InvalidEntry { .. })));
    }

    #[test]
    fn test_pure_neumann_needs_reference() {
        let mesh = Mesh::line(4, 1.).unwrap();
        let field = VolField::<Float>::builder(&mesh, "p", KINEMATIC_PRESSURE)
            .build()
            .unwrap();
        assert!(field.needs_reference(&mesh));
    }

    #[test]
    fn test_old_times() {
        let mesh = Mesh::line(2, 1.).unwrap();
        let mut field = VolField::<Float>::builder(&mesh, "T", DIMLESS)
            .uniform(1.)
            .build()
            .unwrap();
        assert_eq!(field.old_time().internal()[0], 1.);
        for step in 1..=4 {
            field.store_old_times(step);
            field.store_old_times(step);
            field.internal_mut().fill(1. + step as Float);
        }
        assert_eq!(field.n_old_times(), 2);
        assert_eq!(field.old_time().internal()[0], 4.);
        assert_eq!(field.old_time().old_time().internal()[0], 3.);
    }

    #[test]
    fn test_relax() {
        let mesh = Mesh::line(2, 1.).unwrap();
        let mut field = VolField::<Float>::builder(&mesh, "p", DIMLESS)
            .uniform(1.)
            .build()
            .unwrap();
        field.store_prev_iter();
        field.internal_mut().fill(3.);
        field.relax(0.25);
        assert_relative_eq!(field.internal()[1], 1.5);
    }

    #[test]
    fn test_topo_change() {
        let coarse = Mesh::line(2, 2.).unwrap();
        let field = line_field(&coarse);
        let fine = Mesh::line(4, 2.).unwrap();
        let other = Mesh::line(4, 2.).unwrap();
        assert!(matches!(
            field.clone().topo_change(&other),
            Err(FvError::StaleTopology { .. })
        ));

        let patch_maps = fine
            .patches()
            .iter()
            .map(|patch| (0..patch.size()).map(Some).collect())
            .collect();
        let fine = fine
            .topo_change(&coarse, vec![0, 0, 1, 1], patch_maps)
            .unwrap();
        assert!(field.check_mesh(&fine).is_err());
        let mapped = field.topo_change(&fine).unwrap();
        mapped.check_mesh(&fine).unwrap();
        assert_eq!(mapped.internal(), &nd::arr1(&[0.5, 0.5, 1.5, 1.5]));
        assert_eq!(mapped.boundary_field(0).type_name(), "fixedValue");
    }
}
