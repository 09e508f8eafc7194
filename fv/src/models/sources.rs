use std::collections::BTreeMap;

use serde_json::{Map, Value as Json};

use super::CellSet;
use crate::dictionary::{as_dict, read_string};
use crate::linalg::parse_kind;
use crate::{Float, FvError, FvResult, Mesh};

/// Source densities of one model for one field on the local mesh: per selected cell, the
/// explicit part `su` (all components, laid out cell by cell) and the implicit coefficient
/// `sp`, so that the source is `su + sp*psi` per unit volume.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ModelSource {
    pub cells: Vec<usize>,
    pub su: Vec<Float>,
    pub sp: Vec<Float>,
}

/// A source term added to the equations of the fields it applies to.
pub trait FvModel: std::fmt::Debug + Send + Sync {
    fn name(&self) -> &str;

    fn type_name(&self) -> &'static str;

    fn applies_to(&self, field: &str) -> bool;

    /// The source for `field`, whose values have `n_components` components.
    fn source(&self, mesh: &Mesh, field: &str, n_components: usize) -> FvResult<ModelSource>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::EnumString, strum::Display, strum::EnumIter)]
#[strum(serialize_all = "camelCase")]
pub enum VolumeMode {
    /// Values are totals over the selected cells.
    Absolute,
    /// Values are per unit volume.
    Specific,
}

/// Parses a source value of either one number or a list of components.
fn components(entry: &Json, dictionary: &str, key: &str) -> FvResult<Vec<Float>> {
    match entry {
        Json::Number(number) => Ok(vec![number.as_f64().unwrap_or_default()]),
        Json::Array(items) => items
            .iter()
            .map(Json::as_f64)
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| FvError::invalid(dictionary, key, "expected numbers")),
        _ => Err(FvError::invalid(dictionary, key, "expected a number or a list")),
    }
}

#[derive(Clone, Debug, PartialEq)]
struct FieldSource {
    explicit: Vec<Float>,
    implicit: Float,
}

/// Constant explicit and implicit sources on a set of cells.
///
/// ```json
/// {"type": "semiImplicitSource", "selectionMode": "all", "volumeMode": "specific",
///  "sources": {"U": {"explicit": [1, 0, 0], "implicit": 0}}}
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct SemiImplicitSource {
    name: String,
    cells: CellSet,
    volume_mode: VolumeMode,
    sources: BTreeMap<String, FieldSource>,
}

impl SemiImplicitSource {
    pub const TYPE_NAME: &'static str = "semiImplicitSource";

    pub fn from_dict(name: &str, dict: &Map<String, Json>) -> FvResult<Self> {
        let volume_mode = match dict.get("volumeMode") {
            Some(_) => parse_kind("volumeMode", read_string(dict, name, "volumeMode")?)?,
            None => VolumeMode::Absolute,
        };
        let sources_name = format!("{name}/sources");
        let sources = as_dict(
            dict.get("sources")
                .ok_or_else(|| FvError::missing(name, "sources"))?,
            &sources_name,
        )?
        .iter()
        .map(|(field, entry)| {
            let entry_name = format!("{sources_name}/{field}");
            let entry = as_dict(entry, &entry_name)?;
            let explicit = match entry.get("explicit") {
                Some(value) => components(value, &entry_name, "explicit")?,
                None => Vec::new(),
            };
            let implicit = match entry.get("implicit") {
                Some(value) => value
                    .as_f64()
                    .ok_or_else(|| FvError::invalid(&entry_name, "implicit", "expected a number"))?,
                None => 0.,
            };
            Ok((field.clone(), FieldSource { explicit, implicit }))
        })
        .collect::<FvResult<_>>()?;
        Ok(Self {
            name: name.to_owned(),
            cells: CellSet::from_dict(dict, name)?,
            volume_mode,
            sources,
        })
    }
}

impl FvModel for SemiImplicitSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }

    fn applies_to(&self, field: &str) -> bool {
        self.sources.contains_key(field)
    }

    fn source(&self, mesh: &Mesh, field: &str, n_components: usize) -> FvResult<ModelSource> {
        let Some(source) = self.sources.get(field) else {
            return Ok(ModelSource::default());
        };
        let explicit = match source.explicit.len() {
            0 => vec![0.; n_components],
            n if n == n_components => source.explicit.clone(),
            n => {
                return Err(FvError::invalid(
                    format!("{}/sources/{field}", self.name),
                    "explicit",
                    format!("{n} components for a field with {n_components}"),
                ))
            }
        };
        let scale = match self.volume_mode {
            VolumeMode::Specific => 1.,
            VolumeMode::Absolute => 1. / self.cells.volume(mesh)?.max(crate::VSMALL),
        };
        let cells = self.cells.cells(mesh)?;
        Ok(ModelSource {
            su: cells
                .iter()
                .flat_map(|_| explicit.iter().map(|value| value * scale))
                .collect(),
            sp: vec![source.implicit * scale; cells.len()],
            cells,
        })
    }
}

fn semi_implicit_source(name: &str, dict: &Map<String, Json>) -> FvResult<Box<dyn FvModel>> {
    Ok(Box::new(SemiImplicitSource::from_dict(name, dict)?))
}

pub type FvModelConstructor = fn(&str, &Map<String, Json>) -> FvResult<Box<dyn FvModel>>;

/// Maps model type names to constructors.
#[derive(Clone, Debug)]
pub struct FvModelRegistry {
    constructors: BTreeMap<String, FvModelConstructor>,
}

impl Default for FvModelRegistry {
    fn default() -> Self {
        let mut registry = Self {
            constructors: BTreeMap::new(),
        };
        registry.register(SemiImplicitSource::TYPE_NAME, semi_implicit_source);
        registry
    }
}

impl FvModelRegistry {
    pub fn register(&mut self, type_name: &str, constructor: FvModelConstructor) -> &mut Self {
        self.constructors.insert(type_name.to_owned(), constructor);
        self
    }

    pub fn construct(&self, name: &str, dict: &Map<String, Json>) -> FvResult<Box<dyn FvModel>> {
        let type_name = read_string(dict, name, "type")?;
        let constructor = lookup_constructor(&self.constructors, "fvModel", type_name)?;
        constructor(name, dict)
    }
}

pub(super) fn lookup_constructor<C: Copy>(
    constructors: &BTreeMap<String, C>,
    kind: &'static str,
    type_name: &str,
) -> FvResult<C> {
    constructors
        .get(type_name)
        .copied()
        .ok_or_else(|| FvError::UnknownType {
            kind,
            name: type_name.to_owned(),
            valid: constructors.keys().cloned().collect(),
        })
}

/// The models of a case, read from a dictionary of named model entries.
#[derive(Debug, Default)]
pub struct FvModels {
    models: Vec<Box<dyn FvModel>>,
}

impl FvModels {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(document: &Json) -> FvResult<Self> {
        Self::from_json_with(document, &FvModelRegistry::default())
    }

    pub fn from_json_with(document: &Json, registry: &FvModelRegistry) -> FvResult<Self> {
        let models = as_dict(document, "fvModels")?
            .iter()
            .map(|(name, entry)| registry.construct(name, as_dict(entry, name)?))
            .collect::<FvResult<Vec<_>>>()?;
        for model in &models {
            log::info!("Selecting fvModel {} of type {}", model.name(), model.type_name());
        }
        Ok(Self { models })
    }

    pub fn with_model(mut self, model: Box<dyn FvModel>) -> Self {
        self.models.push(model);
        self
    }

    pub fn models(&self) -> &[Box<dyn FvModel>] {
        &self.models
    }

    pub fn find(&self, name: &str) -> Option<&dyn FvModel> {
        self.models
            .iter()
            .find(|model| model.name() == name)
            .map(|model| model.as_ref())
    }

    pub fn applies_to(&self, field: &str) -> bool {
        self.models.iter().any(|model| model.applies_to(field))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::BlockMesh;
    use approx::assert_relative_eq;

    #[test]
    fn test_semi_implicit_source() {
        let mesh = BlockMesh::two_dimensional([2, 2], [1., 1.]).build().unwrap();
        let document = serde_json::json!({
            "heater": {
                "type": "semiImplicitSource",
                "selectionMode": "cells",
                "cells": [0, 3],
                "volumeMode": "absolute",
                "sources": {"T": {"explicit": 2.0, "implicit": -1.0}}
            }
        });
        let models = FvModels::from_json(&document).unwrap();
        assert!(models.applies_to("T"));
        assert!(!models.applies_to("U"));
        let source = models.find("heater").unwrap().source(&mesh, "T", 1).unwrap();
        assert_eq!(source.cells, vec![0, 3]);
        // Two cells of 0.5*0.5*0.5.
        let volume = 2. * 0.125;
        assert_relative_eq!(source.su[0], 2. / volume);
        assert_relative_eq!(source.sp[1], -1. / volume);
        assert!(models
            .find("heater")
            .unwrap()
            .source(&mesh, "T", 3)
            .is_err());
    }

    #[test]
    fn test_unknown_model() {
        let document = serde_json::json!({"m": {"type": "radiation"}});
        match FvModels::from_json(&document) {
            Err(FvError::UnknownType { valid, .. }) => {
                assert_eq!(valid, vec!["semiImplicitSource".to_owned()])
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
