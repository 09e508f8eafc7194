use std::collections::BTreeMap;

use serde_json::{Map, Value as Json};

use super::basic::dictionary_name;
use super::{
    CalculatedPatchField, CyclicPatchField, EmptyPatchField, ExtrapolatedCalculatedPatchField,
    FixedGradientPatchField, FixedValuePatchField, FvPatchField, InletOutletPatchField,
    MixedPatchField, PatchContext, ProcessorPatchField, SymmetryPlanePatchField,
    ZeroGradientPatchField,
};
use crate::dictionary::read_string;
use crate::{FvError, FvResult, Value};

pub type PatchFieldConstructor<T> =
    fn(&PatchContext<'_, T>, &Map<String, Json>) -> FvResult<Box<dyn FvPatchField<T>>>;

/// Patch fields that can be built from their entry in a `boundaryField` dictionary.
pub trait FromDict<T: Value>: FvPatchField<T> + Sized + 'static {
    fn from_dict(ctx: &PatchContext<'_, T>, dict: &Map<String, Json>) -> FvResult<Self>;
}

fn construct<T: Value, P: FromDict<T>>(
    ctx: &PatchContext<'_, T>,
    dict: &Map<String, Json>,
) -> FvResult<Box<dyn FvPatchField<T>>> {
    Ok(Box::new(P::from_dict(ctx, dict)?))
}

/// Maps patch field type names to their constructors.
#[derive(Clone, Debug)]
pub struct PatchFieldRegistry<T: Value> {
    constructors: BTreeMap<String, PatchFieldConstructor<T>>,
}

impl<T: Value> Default for PatchFieldRegistry<T> {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl<T: Value> PatchFieldRegistry<T> {
    pub fn empty() -> Self {
        Self {
            constructors: BTreeMap::new(),
        }
    }

    /// All conditions this crate provides.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry
            .register("calculated", construct::<T, CalculatedPatchField<T>>)
            .register(
                "extrapolatedCalculated",
                construct::<T, ExtrapolatedCalculatedPatchField<T>>,
            )
            .register("fixedValue", construct::<T, FixedValuePatchField<T>>)
            .register("zeroGradient", construct::<T, ZeroGradientPatchField<T>>)
            .register("fixedGradient", construct::<T, FixedGradientPatchField<T>>)
            .register("mixed", construct::<T, MixedPatchField<T>>)
            .register("inletOutlet", construct::<T, InletOutletPatchField<T>>)
            .register("empty", construct::<T, EmptyPatchField<T>>)
            .register("symmetryPlane", construct::<T, SymmetryPlanePatchField<T>>)
            .register("cyclic", construct::<T, CyclicPatchField<T>>)
            .register("processor", construct::<T, ProcessorPatchField<T>>);
        registry
    }

    pub fn register(&mut self, name: &str, constructor: PatchFieldConstructor<T>) -> &mut Self {
        self.constructors.insert(name.to_owned(), constructor);
        self
    }

    pub fn names(&self) -> Vec<String> {
        self.constructors.keys().cloned().collect()
    }

    /// Builds the condition described by `dict`, whose `type` entry selects the constructor.
    ///
    /// Constraint patches (empty, symmetry, coupled) only accept their own condition type.
    pub fn construct(
        &self,
        ctx: &PatchContext<'_, T>,
        dict: &Map<String, Json>,
    ) -> FvResult<Box<dyn FvPatchField<T>>> {
        let dictionary = dictionary_name(ctx);
        let type_name = read_string(dict, &dictionary, "type")?;
        if let Some(constraint) = ctx.patch_info().kind().constraint_type() {
            if type_name != constraint {
                return Err(FvError::invalid(
                    dictionary,
                    "type",
                    format!("{constraint} patches only accept the {constraint} condition"),
                ));
            }
        }
        self.by_name(ctx, type_name, dict)
    }

    /// The condition a constraint patch imposes on every field, if it is one.
    pub fn constraint(
        &self,
        ctx: &PatchContext<'_, T>,
    ) -> FvResult<Option<Box<dyn FvPatchField<T>>>> {
        ctx.patch_info()
            .kind()
            .constraint_type()
            .map(|type_name| self.by_name(ctx, type_name, &Map::new()))
            .transpose()
    }

    pub fn by_name(
        &self,
        ctx: &PatchContext<'_, T>,
        type_name: &str,
        dict: &Map<String, Json>,
    ) -> FvResult<Box<dyn FvPatchField<T>>> {
        let constructor = self
            .constructors
            .get(type_name)
            .ok_or_else(|| FvError::UnknownType {
                kind: "patch field",
                name: type_name.to_owned(),
                valid: self.names(),
            })?;
        constructor(ctx, dict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Float, Mesh};
    use ndarray as nd;

    #[test]
    fn test_construct_by_name() {
        let mesh = Mesh::line(3, 3.).unwrap();
        let internal = nd::Array1::<Float>::zeros(3);
        let left = mesh.find_patch("left").unwrap();
        let ctx = PatchContext::new(&mesh, left, &internal);
        let registry = PatchFieldRegistry::<Float>::with_defaults();

        let dict = serde_json::json!({"type": "fixedValue", "value": 2.0});
        let field = registry.construct(&ctx, dict.as_object().unwrap()).unwrap();
        assert_eq!(field.type_name(), "fixedValue");
        assert_eq!(field.value()[0], 2.);
        assert_eq!(field.write(), *dict.as_object().unwrap());

        let dict = serde_json::json!({"type": "fixedValue"});
        assert!(matches!(
            registry.construct(&ctx, dict.as_object().unwrap()),
            Err(FvError::MissingEntry { .. })
        ));

        let dict = serde_json::json!({"type": "noSuchCondition"});
        match registry.construct(&ctx, dict.as_object().unwrap()) {
            Err(FvError::UnknownType { valid, .. }) => {
                assert!(valid.contains(&"zeroGradient".to_owned()))
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_constraint_patches_force_their_type() {
        let mesh = Mesh::line(3, 3.).unwrap();
        let internal = nd::Array1::<Float>::zeros(3);
        let sides = mesh.find_patch("sides").unwrap();
        let ctx = PatchContext::new(&mesh, sides, &internal);
        let registry = PatchFieldRegistry::<Float>::with_defaults();

        let dict = serde_json::json!({"type": "zeroGradient"});
        assert!(matches!(
            registry.construct(&ctx, dict.as_object().unwrap()),
            Err(FvError::InvalidEntry { .. })
        ));
        let constraint = registry.constraint(&ctx).unwrap().unwrap();
        assert_eq!(constraint.type_name(), "empty");
        assert!(constraint.value().is_empty());
    }
}
