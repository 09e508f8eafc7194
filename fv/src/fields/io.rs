//! Field files: JSON documents with `dimensions`, `internalField` and `boundaryField` entries.

use std::path::Path;

use serde_json::{Map, Value as Json};

use super::VolField;
use crate::dictionary::{as_dict, lookup, read_field, required, write_field};
use crate::patch_field::{PatchContext, PatchFieldRegistry};
use crate::{DimensionSet, FvError, FvResult, Mesh, Value};

fn read_dimensions(dict: &Map<String, Json>, dictionary: &str) -> FvResult<DimensionSet> {
    let invalid =
        || FvError::invalid(dictionary, "dimensions", "expected 3 to 7 integer exponents");
    let exponents = required(dict, dictionary, "dimensions")?
        .as_array()
        .ok_or_else(invalid)?;
    if !(3..=7).contains(&exponents.len()) {
        return Err(invalid());
    }
    let mut dimensions = DimensionSet::default();
    for (slot, exponent) in dimensions.0.iter_mut().zip(exponents) {
        *slot = exponent
            .as_i64()
            .and_then(|exponent| i32::try_from(exponent).ok())
            .ok_or_else(invalid)?;
    }
    Ok(dimensions)
}

impl<T: Value> VolField<T> {
    /// Reads a field document with the default condition registry.
    pub fn read(mesh: &Mesh, name: &str, document: &Json) -> FvResult<Self> {
        Self::read_with(mesh, name, document, &PatchFieldRegistry::with_defaults())
    }

    /// Reads a field document, building each patch condition from its `type` entry.
    ///
    /// Constraint patches may be left out of `boundaryField`; every other patch must match a
    /// key, possibly through a pattern such as `".*"`.
    pub fn read_with(
        mesh: &Mesh,
        name: &str,
        document: &Json,
        registry: &PatchFieldRegistry<T>,
    ) -> FvResult<Self> {
        let dict = as_dict(document, name)?;
        let dimensions = read_dimensions(dict, name)?;
        let internal = read_field::<T>(dict, name, "internalField", mesh.n_cells())?;
        let boundary_name = format!("{name}/boundaryField");
        let boundary_dict = as_dict(required(dict, name, "boundaryField")?, &boundary_name)?;
        let boundary = mesh
            .patches()
            .iter()
            .map(|patch| {
                let ctx = PatchContext::new(mesh, patch.index(), &internal);
                // Patterns never select the condition of a constraint patch.
                let entry = if patch.kind().constraint_type().is_some() {
                    boundary_dict.get(patch.name())
                } else {
                    lookup(boundary_dict, patch.name())
                };
                match entry {
                    Some(entry) => registry.construct(
                        &ctx,
                        as_dict(entry, &format!("{boundary_name}/{}", patch.name()))?,
                    ),
                    None => registry
                        .constraint(&ctx)?
                        .ok_or_else(|| FvError::missing(&boundary_name, patch.name())),
                }
            })
            .collect::<FvResult<Vec<_>>>()?;
        log::debug!("Read field {name} with {} patches", boundary.len());
        Self::from_parts(mesh, name, dimensions, internal, boundary)
    }

    pub fn read_file(mesh: &Mesh, name: &str, path: impl AsRef<Path>) -> FvResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|error| FvError::io(path, error))?;
        Self::read(mesh, name, &serde_json::from_str(&text)?)
    }

    pub fn to_json(&self, mesh: &Mesh) -> Json {
        let boundary = mesh
            .patches()
            .iter()
            .zip(&self.boundary)
            .map(|(patch, field)| (patch.name().to_owned(), Json::Object(field.write())))
            .collect::<Map<_, _>>();
        serde_json::json!({
            "dimensions": self.dimensions.0,
            "internalField": write_field(&self.internal),
            "boundaryField": boundary,
        })
    }

    pub fn write_file(&self, mesh: &Mesh, path: impl AsRef<Path>) -> FvResult<()> {
        let path = path.as_ref();
        let text = serde_json::to_string_pretty(&self.to_json(mesh))?;
        std::fs::write(path, text).map_err(|error| FvError::io(path, error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dimensions::{KINEMATIC_PRESSURE, VELOCITY};
    use crate::{Float, Vector3};
    use indoc::indoc;

    #[test]
    fn test_read_field() {
        let mesh = Mesh::line(3, 3.).unwrap();
        let document: Json = serde_json::from_str(indoc! {r#"
            {
                "dimensions": [0, 1, -1],
                "internalField": [1.0, 0.0, 0.0],
                "boundaryField": {
                    "left": {"type": "fixedValue", "value": [2.0, 0.0, 0.0]},
                    ".*": {"type": "zeroGradient"}
                }
            }
        "#})
        .unwrap();
        let u = VolField::<Vector3>::read(&mesh, "U", &document).unwrap();
        assert_eq!(u.dimensions(), VELOCITY);
        assert_eq!(u.internal()[2], Vector3::new(1., 0., 0.));
        assert_eq!(u.boundary_field(0).type_name(), "fixedValue");
        assert_eq!(u.boundary_field(1).type_name(), "zeroGradient");
        assert_eq!(u.boundary_field(2).type_name(), "empty");

        let written = u.to_json(&mesh);
        let reread = VolField::<Vector3>::read(&mesh, "U", &written).unwrap();
        assert_eq!(reread.internal(), u.internal());
        assert_eq!(reread.boundary_value(0)[0], Vector3::new(2., 0., 0.));
    }

    #[test]
    fn test_missing_patch() {
        let mesh = Mesh::line(3, 3.).unwrap();
        let document = serde_json::json!({
            "dimensions": [0, 2, -2, 0, 0, 0, 0],
            "internalField": 0.0,
            "boundaryField": {"left": {"type": "zeroGradient"}}
        });
        match VolField::<Float>::read(&mesh, "p", &document) {
            Err(FvError::MissingEntry { key, .. }) => assert_eq!(key, "right"),
            other => panic!("unexpected {other:?}"),
        }
        let mut document = document;
        document["boundaryField"]["right"] = serde_json::json!({"type": "zeroGradient"});
        let p = VolField::<Float>::read(&mesh, "p", &document).unwrap();
        assert_eq!(p.dimensions(), KINEMATIC_PRESSURE);
    }

    #[test]
    fn test_write_file() {
        let mesh = Mesh::line(2, 1.).unwrap();
        let field = VolField::<Float>::builder(&mesh, "T", DimensionSet::default())
            .uniform(3.)
            .fixed_value("left", 1.)
            .build()
            .unwrap();
        let path = std::env::temp_dir().join(format!("fv-io-{}.json", std::process::id()));
        field.write_file(&mesh, &path).unwrap();
        let read = VolField::<Float>::read_file(&mesh, "T", &path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(read.internal(), field.internal());
        assert!(matches!(
            VolField::<Float>::read_file(&mesh, "T", &path),
            Err(FvError::Io { .. })
        ));
    }
}
