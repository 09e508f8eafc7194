//! Sources and constraints a case adds to its equations, passed explicitly to the solvers
//! that assemble them.

mod cell_set;
mod constraints;
mod sources;

use ndarray as nd;

pub use cell_set::CellSet;
pub use constraints::{
    FixedValueConstraint, FixedValues, FvConstraint, FvConstraintConstructor,
    FvConstraintRegistry, FvConstraints, LimitBounds,
};
pub use sources::{
    FvModel, FvModelConstructor, FvModelRegistry, FvModels, ModelSource, SemiImplicitSource,
    VolumeMode,
};

use crate::dimensions::{TIME, VOLUME};
use crate::value::{flatten, unflatten};
use crate::{FvMatrix, FvResult, Mesh, Value, VolField};

impl FvModels {
    /// The sources of all models for `psi` as an equation: `su + sp*psi` integrated over each
    /// cell. Use as `lhs.equals(&models.source(mesh, &psi)?)`.
    pub fn source<T: Value>(&self, mesh: &Mesh, psi: &VolField<T>) -> FvResult<FvMatrix<T>> {
        psi.check_mesh(mesh)?;
        let mut matrix = FvMatrix::term(mesh, psi, psi.dimensions() * VOLUME / TIME);
        let volumes = mesh.cell_volumes();
        for model in self.models() {
            if !model.applies_to(psi.name()) {
                continue;
            }
            let source = model.source(mesh, psi.name(), T::N_COMPONENTS)?;
            let su = unflatten::<T>(&source.su);
            for ((&cell, su), &sp) in source.cells.iter().zip(&su).zip(&source.sp) {
                matrix.diag_mut()[cell] += sp * volumes[cell];
                matrix.source_mut()[cell] -= *su * volumes[cell];
            }
        }
        Ok(matrix)
    }
}

impl FvConstraints {
    /// Fixes values in the equation for `psi`; returns whether any constraint applied.
    pub fn constrain<T: Value>(
        &self,
        mesh: &Mesh,
        matrix: &mut FvMatrix<T>,
        psi: &mut VolField<T>,
    ) -> FvResult<bool> {
        let mut constrained = false;
        for constraint in self.constraints() {
            let Some(fixed) = constraint.fixed_values(mesh, psi.name(), T::N_COMPONENTS)? else {
                continue;
            };
            matrix.set_values(mesh, psi, &fixed.cells, &unflatten::<T>(&fixed.values))?;
            constrained = true;
        }
        Ok(constrained)
    }

    /// Adjusts the solved `psi`, refreshing its boundary values when anything changed.
    pub fn constrain_field<T: Value>(&self, mesh: &Mesh, psi: &mut VolField<T>) -> FvResult<bool> {
        if !self.constrains(psi.name()) {
            return Ok(false);
        }
        let mut values = flatten(psi.internal());
        let mut changed = false;
        for constraint in self.constraints() {
            changed |= constraint.constrain_field(mesh, psi.name(), T::N_COMPONENTS, &mut values)?;
        }
        if changed {
            *psi.internal_mut() = nd::Array1::from(unflatten::<T>(&values));
            psi.correct_boundary_conditions(mesh)?;
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::Time;
    use crate::dimensions::{DIMLESS, KINEMATIC_VISCOSITY};
    use crate::fvm::{self, Diffusivity};
    use crate::linalg::SolverControls;
    use crate::schemes::FvSchemes;
    use crate::{Dimensioned, Float};
    use approx::assert_relative_eq;

    fn solver() -> SolverControls {
        SolverControls::default().with_tolerance(1e-12)
    }

    #[test]
    fn test_uniform_source_balances_implicit_sink() {
        // T = su/(-sp) everywhere when the only terms are the model's.
        let mesh = Mesh::line(5, 1.).unwrap();
        let mut t = VolField::builder(&mesh, "T", DIMLESS).uniform(0.).build().unwrap();
        let models = FvModels::new().with_model(Box::new(
            SemiImplicitSource::from_dict(
                "source",
                serde_json::json!({
                    "selectionMode": "all",
                    "volumeMode": "specific",
                    "sources": {"T": {"explicit": 2.0, "implicit": -4.0}}
                })
                .as_object()
                .unwrap(),
            )
            .unwrap(),
        ));
        let mut time = Time::new(0., 1., 1e6).unwrap();
        time.advance();
        t.store_old_times(time.time_index());
        let schemes = FvSchemes::default();
        let mut equation = fvm::ddt(&mesh, &schemes, &time, &t)
            .unwrap()
            .equals(&models.source(&mesh, &t).unwrap())
            .unwrap();
        equation.solve(&mesh, &mut t, &solver()).unwrap();
        for &value in t.internal() {
            assert_relative_eq!(value, 0.5, max_relative = 1e-5);
        }
    }

    #[test]
    fn test_fixed_value_constraint_and_limits() {
        let mesh = Mesh::line(10, 1.).unwrap();
        let mut t = VolField::builder(&mesh, "T", DIMLESS)
            .fixed_value("left", 0.)
            .fixed_value("right", 0.)
            .build()
            .unwrap();
        let constraints = FvConstraints::from_json(&serde_json::json!({
            "hot": {
                "type": "fixedValueConstraint",
                "selectionMode": "cells",
                "cells": [4],
                "fieldValues": {"T": 2.0}
            },
            "limit": {"type": "limitBounds", "field": "T", "max": 1.5}
        }))
        .unwrap();
        let d = Dimensioned::new("D", KINEMATIC_VISCOSITY, 1.);
        let schemes = FvSchemes::default();
        let mut equation =
            -fvm::laplacian(&mesh, &schemes, Diffusivity::Uniform(&d), &t).unwrap();
        assert!(constraints.constrain(&mesh, &mut equation, &mut t).unwrap());
        equation.solve(&mesh, &mut t, &solver()).unwrap();
        assert_relative_eq!(t.internal()[4], 2.);
        // Linear on either side of the fixed cell.
        assert_relative_eq!(t.internal()[2], 2. * 2.5 / 4.5, max_relative = 1e-8);

        assert!(constraints.constrain_field(&mesh, &mut t).unwrap());
        let max = t.internal().iter().copied().fold(Float::MIN, Float::max);
        assert_relative_eq!(max, 1.5);
    }
}
