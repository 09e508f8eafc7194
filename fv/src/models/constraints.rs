use std::collections::BTreeMap;

use serde_json::{Map, Value as Json};

use super::sources::lookup_constructor;
use super::CellSet;
use crate::dictionary::{as_dict, read_scalar, read_string};
use crate::{Float, FvError, FvResult, Mesh};

/// Cells of the local mesh and the values, laid out cell by cell, an equation is fixed to.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FixedValues {
    pub cells: Vec<usize>,
    pub values: Vec<Float>,
}

/// A constraint on the equation of a field before it is solved, or on the field after.
pub trait FvConstraint: std::fmt::Debug + Send + Sync {
    fn name(&self) -> &str;

    fn type_name(&self) -> &'static str;

    fn constrains(&self, field: &str) -> bool;

    /// Values the equation for `field` is fixed to, if any.
    fn fixed_values(
        &self,
        _mesh: &Mesh,
        _field: &str,
        _n_components: usize,
    ) -> FvResult<Option<FixedValues>> {
        Ok(None)
    }

    /// Adjusts the solved values of `field`, laid out cell by cell; returns whether any
    /// changed.
    fn constrain_field(
        &self,
        _mesh: &Mesh,
        _field: &str,
        _n_components: usize,
        _values: &mut [Float],
    ) -> FvResult<bool> {
        Ok(false)
    }
}

/// Fixes fields to given values on a set of cells by eliminating them from the equation.
///
/// ```json
/// {"type": "fixedValueConstraint", "selectionMode": "box", "box": [[0, 0, 0], [0.1, 0.1, 1]],
///  "fieldValues": {"T": 300, "U": [0, 0, 0]}}
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct FixedValueConstraint {
    name: String,
    cells: CellSet,
    field_values: BTreeMap<String, Vec<Float>>,
}

impl FixedValueConstraint {
    pub const TYPE_NAME: &'static str = "fixedValueConstraint";

    pub fn from_dict(name: &str, dict: &Map<String, Json>) -> FvResult<Self> {
        let values_name = format!("{name}/fieldValues");
        let field_values = as_dict(
            dict.get("fieldValues")
                .ok_or_else(|| FvError::missing(name, "fieldValues"))?,
            &values_name,
        )?
        .iter()
        .map(|(field, value)| {
            let components = match value {
                Json::Number(number) => number.as_f64().map(|value| vec![value]),
                Json::Array(items) => items.iter().map(Json::as_f64).collect(),
                _ => None,
            }
            .ok_or_else(|| FvError::invalid(&values_name, field, "expected a value"))?;
            Ok((field.clone(), components))
        })
        .collect::<FvResult<_>>()?;
        Ok(Self {
            name: name.to_owned(),
            cells: CellSet::from_dict(dict, name)?,
            field_values,
        })
    }
}

impl FvConstraint for FixedValueConstraint {
    fn name(&self) -> &str {
        &self.name
    }

    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }

    fn constrains(&self, field: &str) -> bool {
        self.field_values.contains_key(field)
    }

    fn fixed_values(
        &self,
        mesh: &Mesh,
        field: &str,
        n_components: usize,
    ) -> FvResult<Option<FixedValues>> {
        let Some(value) = self.field_values.get(field) else {
            return Ok(None);
        };
        if value.len() != n_components {
            return Err(FvError::invalid(
                format!("{}/fieldValues", self.name),
                field,
                format!("{} components for a field with {n_components}", value.len()),
            ));
        }
        let cells = self.cells.cells(mesh)?;
        let values = cells.iter().flat_map(|_| value.iter().copied()).collect();
        Ok(Some(FixedValues { cells, values }))
    }
}

/// Clips a field after it is solved: scalars to `[min, max]`, other values to a magnitude of
/// at most `max`.
///
/// ```json
/// {"type": "limitBounds", "field": "T", "min": 0, "max": 1}
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct LimitBounds {
    name: String,
    field: String,
    min: Option<Float>,
    max: Option<Float>,
}

impl LimitBounds {
    pub const TYPE_NAME: &'static str = "limitBounds";

    pub fn new(name: &str, field: &str, min: Option<Float>, max: Option<Float>) -> Self {
        Self {
            name: name.to_owned(),
            field: field.to_owned(),
            min,
            max,
        }
    }

    pub fn from_dict(name: &str, dict: &Map<String, Json>) -> FvResult<Self> {
        let optional = |key: &str| {
            dict.get(key)
                .map(|_| read_scalar(dict, name, key))
                .transpose()
        };
        let limits = Self::new(
            name,
            read_string(dict, name, "field")?,
            optional("min")?,
            optional("max")?,
        );
        if let (Some(min), Some(max)) = (limits.min, limits.max) {
            if min > max {
                return Err(FvError::invalid(
                    name,
                    "min",
                    format!("minimum {min} above maximum {max}"),
                ));
            }
        }
        Ok(limits)
    }
}

impl FvConstraint for LimitBounds {
    fn name(&self) -> &str {
        &self.name
    }

    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }

    fn constrains(&self, field: &str) -> bool {
        self.field == field
    }

    fn constrain_field(
        &self,
        _mesh: &Mesh,
        field: &str,
        n_components: usize,
        values: &mut [Float],
    ) -> FvResult<bool> {
        if field != self.field {
            return Ok(false);
        }
        let mut changed = false;
        if n_components == 1 {
            let (min, max) = (
                self.min.unwrap_or(Float::NEG_INFINITY),
                self.max.unwrap_or(Float::INFINITY),
            );
            for value in values.iter_mut() {
                let clipped = value.clamp(min, max);
                changed |= clipped != *value;
                *value = clipped;
            }
        } else if let Some(max) = self.max {
            for value in values.chunks_exact_mut(n_components) {
                let mag = value.iter().map(|c| c * c).sum::<Float>().sqrt();
                if mag > max {
                    value.iter_mut().for_each(|c| *c *= max / mag);
                    changed = true;
                }
            }
        }
        Ok(changed)
    }
}

pub type FvConstraintConstructor =
    fn(&str, &Map<String, Json>) -> FvResult<Box<dyn FvConstraint>>;

fn fixed_value_constraint(
    name: &str,
    dict: &Map<String, Json>,
) -> FvResult<Box<dyn FvConstraint>> {
    Ok(Box::new(FixedValueConstraint::from_dict(name, dict)?))
}

fn limit_bounds(name: &str, dict: &Map<String, Json>) -> FvResult<Box<dyn FvConstraint>> {
    Ok(Box::new(LimitBounds::from_dict(name, dict)?))
}

/// Maps constraint type names to constructors.
#[derive(Clone, Debug)]
pub struct FvConstraintRegistry {
    constructors: BTreeMap<String, FvConstraintConstructor>,
}

impl Default for FvConstraintRegistry {
    fn default() -> Self {
        let mut registry = Self {
            constructors: BTreeMap::new(),
        };
        registry
            .register(FixedValueConstraint::TYPE_NAME, fixed_value_constraint)
            .register(LimitBounds::TYPE_NAME, limit_bounds);
        registry
    }
}

impl FvConstraintRegistry {
    pub fn register(&mut self, type_name: &str, constructor: FvConstraintConstructor) -> &mut Self {
        self.constructors.insert(type_name.to_owned(), constructor);
        self
    }

    pub fn construct(
        &self,
        name: &str,
        dict: &Map<String, Json>,
    ) -> FvResult<Box<dyn FvConstraint>> {
        let type_name = read_string(dict, name, "type")?;
        let constructor = lookup_constructor(&self.constructors, "fvConstraint", type_name)?;
        constructor(name, dict)
    }
}

/// The constraints of a case, read from a dictionary of named constraint entries.
#[derive(Debug, Default)]
pub struct FvConstraints {
    constraints: Vec<Box<dyn FvConstraint>>,
}

impl FvConstraints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(document: &Json) -> FvResult<Self> {
        Self::from_json_with(document, &FvConstraintRegistry::default())
    }

    pub fn from_json_with(document: &Json, registry: &FvConstraintRegistry) -> FvResult<Self> {
        let constraints = as_dict(document, "fvConstraints")?
            .iter()
            .map(|(name, entry)| registry.construct(name, as_dict(entry, name)?))
            .collect::<FvResult<Vec<_>>>()?;
        for constraint in &constraints {
            log::info!(
                "Selecting fvConstraint {} of type {}",
                constraint.name(),
                constraint.type_name()
            );
        }
        Ok(Self { constraints })
    }

    pub fn with_constraint(mut self, constraint: Box<dyn FvConstraint>) -> Self {
        self.constraints.push(constraint);
        self
    }

    pub fn constraints(&self) -> &[Box<dyn FvConstraint>] {
        &self.constraints
    }

    pub fn constrains(&self, field: &str) -> bool {
        self.constraints
            .iter()
            .any(|constraint| constraint.constrains(field))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::BlockMesh;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_fixed_values() {
        let mesh = BlockMesh::two_dimensional([2, 2], [1., 1.]).build().unwrap();
        let document = serde_json::json!({
            "inlet": {
                "type": "fixedValueConstraint",
                "selectionMode": "cells",
                "cells": [1],
                "fieldValues": {"T": 300, "U": [1, 0, 0]}
            }
        });
        let constraints = FvConstraints::from_json(&document).unwrap();
        assert!(constraints.constrains("U"));
        let constraint = &constraints.constraints()[0];
        let fixed = constraint.fixed_values(&mesh, "U", 3).unwrap().unwrap();
        assert_eq!(fixed.cells, vec![1]);
        assert_eq!(fixed.values, vec![1., 0., 0.]);
        assert!(constraint.fixed_values(&mesh, "p", 1).unwrap().is_none());
        assert!(constraint.fixed_values(&mesh, "T", 3).is_err());
    }

    #[test]
    fn test_limit_bounds() {
        let mesh = BlockMesh::two_dimensional([2, 2], [1., 1.]).build().unwrap();
        let limits = LimitBounds::new("limitT", "T", Some(0.), Some(1.));
        let mut values = [-0.5, 0.5, 2.];
        assert!(limits.constrain_field(&mesh, "T", 1, &mut values).unwrap());
        assert_eq!(values, [0., 0.5, 1.]);
        assert!(!limits.constrain_field(&mesh, "T", 1, &mut values).unwrap());

        let limits = LimitBounds::new("limitU", "U", None, Some(1.));
        let mut values = [3., 4., 0., 0.1, 0., 0.];
        assert!(limits.constrain_field(&mesh, "U", 3, &mut values).unwrap());
        for (value, expected) in values.iter().zip([0.6, 0.8, 0., 0.1, 0., 0.]) {
            assert_abs_diff_eq!(*value, expected, epsilon = 1e-12);
        }

        let dict = serde_json::json!({"type": "limitBounds", "field": "T", "min": 2, "max": 1});
        assert!(LimitBounds::from_dict("l", dict.as_object().unwrap()).is_err());
    }
}
