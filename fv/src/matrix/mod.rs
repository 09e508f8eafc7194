//! Discretised equations: a scalar LDU matrix shared by all components, a source and the
//! boundary coefficients of every patch.
//!
//! An `FvMatrix` stands for `A·psi - source`. Implicit terms add to the coefficients, explicit
//! ones to the source, and `M == f` moves `f` to the right-hand side, so that solving finds
//! `psi` with `A·psi = source`.

mod derived;
mod ops;
mod solve;

use ndarray as nd;

use crate::dimensions::VOLUME;
use crate::{
    DimensionSet, Dimensioned, Float, FvError, FvResult, Mesh, SurfaceField, Value, VolField,
};

#[derive(Clone, derivative::Derivative)]
#[derivative(Debug)]
pub struct FvMatrix<T: Value> {
    psi_name: String,
    psi_dimensions: DimensionSet,
    dimensions: DimensionSet,
    generation: u64,
    n_terms: usize,
    relaxation_factor: Option<Float>,
    #[derivative(Debug = "ignore")]
    diag: nd::Array1<Float>,
    #[derivative(Debug = "ignore")]
    upper: nd::Array1<Float>,
    #[derivative(Debug = "ignore")]
    lower: Option<nd::Array1<Float>>,
    #[derivative(Debug = "ignore")]
    source: nd::Array1<T>,
    #[derivative(Debug = "ignore")]
    internal_coeffs: Vec<nd::Array1<T>>,
    #[derivative(Debug = "ignore")]
    boundary_coeffs: Vec<nd::Array1<T>>,
    #[derivative(Debug = "ignore")]
    face_flux_correction: Option<SurfaceField<T>>,
}

impl<T: Value> FvMatrix<T> {
    /// An equation for `psi` without any terms; `dimensions` are those of each term
    /// integrated over a cell.
    pub fn new(mesh: &Mesh, psi: &VolField<T>, dimensions: DimensionSet) -> Self {
        let n_faces = mesh.n_internal_faces();
        let per_patch = || {
            mesh.patches()
                .iter()
                .map(|patch| nd::Array1::from_elem(patch.size(), T::zero()))
                .collect::<Vec<_>>()
        };
        Self {
            psi_name: psi.name().to_owned(),
            psi_dimensions: psi.dimensions(),
            dimensions,
            generation: psi.generation(),
            n_terms: 0,
            relaxation_factor: None,
            diag: nd::Array1::zeros(mesh.n_cells()),
            upper: nd::Array1::zeros(n_faces),
            lower: None,
            source: nd::Array1::from_elem(mesh.n_cells(), T::zero()),
            internal_coeffs: per_patch(),
            boundary_coeffs: per_patch(),
            face_flux_correction: None,
        }
    }

    /// A single operator term, to be filled in by the operator.
    pub(crate) fn term(mesh: &Mesh, psi: &VolField<T>, dimensions: DimensionSet) -> Self {
        Self {
            n_terms: 1,
            ..Self::new(mesh, psi, dimensions)
        }
    }

    pub fn psi_name(&self) -> &str {
        &self.psi_name
    }

    pub fn dimensions(&self) -> DimensionSet {
        self.dimensions
    }

    pub fn psi_dimensions(&self) -> DimensionSet {
        self.psi_dimensions
    }

    /// Number of operator terms combined into this equation.
    pub fn n_terms(&self) -> usize {
        self.n_terms
    }

    pub fn check_mesh(&self, mesh: &Mesh) -> FvResult<()> {
        mesh.check_generation(&format!("equation for {}", self.psi_name), self.generation)
    }

    pub(crate) fn check_field(&self, psi: &VolField<T>) -> FvResult<()> {
        if psi.name() != self.psi_name {
            return Err(FvError::FieldMismatch {
                matrix: self.psi_name.clone(),
                field: psi.name().to_owned(),
            });
        }
        if psi.generation() != self.generation {
            return Err(FvError::StaleTopology {
                what: format!("field {}", psi.name()),
                expected: self.generation,
                actual: psi.generation(),
            });
        }
        Ok(())
    }

    pub fn diag(&self) -> &nd::Array1<Float> {
        &self.diag
    }

    pub fn diag_mut(&mut self) -> &mut nd::Array1<Float> {
        &mut self.diag
    }

    pub fn upper(&self) -> &nd::Array1<Float> {
        &self.upper
    }

    pub fn upper_mut(&mut self) -> &mut nd::Array1<Float> {
        &mut self.upper
    }

    /// The coefficients of the owner cells in the neighbours' rows; the upper ones when the
    /// matrix is symmetric.
    pub fn lower(&self) -> &nd::Array1<Float> {
        self.lower.as_ref().unwrap_or(&self.upper)
    }

    /// Makes the matrix asymmetric if it was not already.
    pub fn lower_mut(&mut self) -> &mut nd::Array1<Float> {
        let upper = &self.upper;
        self.lower.get_or_insert_with(|| upper.clone())
    }

    pub fn is_symmetric(&self) -> bool {
        self.lower.is_none()
    }

    pub fn source(&self) -> &nd::Array1<T> {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut nd::Array1<T> {
        &mut self.source
    }

    /// Per patch face, the coefficient of the adjacent cell value added to its row.
    pub fn internal_coeffs(&self, patch: usize) -> &nd::Array1<T> {
        &self.internal_coeffs[patch]
    }

    pub fn internal_coeffs_mut(&mut self, patch: usize) -> &mut nd::Array1<T> {
        &mut self.internal_coeffs[patch]
    }

    /// Per patch face, the part added to the source; on coupled patches, the coefficient of
    /// the value across the interface.
    pub fn boundary_coeffs(&self, patch: usize) -> &nd::Array1<T> {
        &self.boundary_coeffs[patch]
    }

    pub fn boundary_coeffs_mut(&mut self, patch: usize) -> &mut nd::Array1<T> {
        &mut self.boundary_coeffs[patch]
    }

    /// Explicit face fluxes of corrections applied through the source, such as the
    /// non-orthogonal part of a Laplacian.
    pub fn face_flux_correction(&self) -> Option<&SurfaceField<T>> {
        self.face_flux_correction.as_ref()
    }

    pub(crate) fn set_face_flux_correction(&mut self, correction: SurfaceField<T>) {
        self.face_flux_correction = Some(correction);
    }

    /// Relaxation applied by the next [`Self::solve`].
    pub fn set_relaxation_factor(&mut self, alpha: Float) {
        self.relaxation_factor = Some(alpha);
    }

    pub fn relaxation_factor(&self) -> Option<Float> {
        self.relaxation_factor
    }

    fn check_source_dimensions(&self, dimensions: DimensionSet, operation: &str) -> FvResult<()> {
        self.dimensions.check(&(dimensions * VOLUME), operation)
    }

    fn add_to_source(&mut self, mesh: &Mesh, values: &nd::Array1<T>, sign: Float) {
        nd::Zip::from(&mut self.source)
            .and(values)
            .and(mesh.cell_volumes())
            .for_each(|source, &value, &volume| *source += value * (sign * volume));
    }

    /// `M == field`: moves the field, integrated over each cell, to the right-hand side.
    pub fn equals_field(mut self, mesh: &Mesh, field: &VolField<T>) -> FvResult<Self> {
        self.check_source_dimensions(field.dimensions(), "==")?;
        field.check_mesh(mesh)?;
        self.add_to_source(mesh, field.internal(), 1.);
        Ok(self)
    }

    /// `M == value` for a uniform right-hand side.
    pub fn equals_value(mut self, mesh: &Mesh, value: &Dimensioned<T>) -> FvResult<Self> {
        self.check_source_dimensions(value.dimensions, "==")?;
        let values = nd::Array1::from_elem(mesh.n_cells(), value.value);
        self.add_to_source(mesh, &values, 1.);
        Ok(self)
    }

    /// `M + field`: an explicit term on the left-hand side.
    pub fn add_field(mut self, mesh: &Mesh, field: &VolField<T>) -> FvResult<Self> {
        self.check_source_dimensions(field.dimensions(), "+")?;
        field.check_mesh(mesh)?;
        self.add_to_source(mesh, field.internal(), -1.);
        Ok(self)
    }

    /// `M - field`.
    pub fn sub_field(mut self, mesh: &Mesh, field: &VolField<T>) -> FvResult<Self> {
        self.check_source_dimensions(field.dimensions(), "-")?;
        field.check_mesh(mesh)?;
        self.add_to_source(mesh, field.internal(), 1.);
        Ok(self)
    }

    /// `M == other`: the difference of two equations for the same field.
    pub fn equals(self, other: &Self) -> FvResult<Self> {
        self.try_sub(other)
    }
}

/// Name of one component of a field, as used in solver logs and residual bookkeeping.
pub fn component_name<T: Value>(name: &str, component: usize) -> String {
    const VECTOR: [&str; 3] = ["x", "y", "z"];
    const TENSOR: [&str; 9] = ["xx", "xy", "xz", "yx", "yy", "yz", "zx", "zy", "zz"];
    match T::N_COMPONENTS {
        1 => name.to_owned(),
        3 => format!("{name}{}", VECTOR[component]),
        9 => format!("{name}{}", TENSOR[component]),
        _ => format!("{name}{component}"),
    }
}

/// `-d²psi/dx² = 0` on a unit line, assembled by hand with fixed values 0 and 1 at the ends.
#[cfg(test)]
fn line_equation(mesh: &Mesh, psi: &VolField<Float>) -> FvMatrix<Float> {
    let mut matrix = FvMatrix::term(mesh, psi, VOLUME);
    let dx = 1. / mesh.n_cells() as Float;
    matrix.upper_mut().fill(-1. / dx);
    for face in 0..mesh.n_internal_faces() {
        matrix.diag_mut()[face] += 1. / dx;
        matrix.diag_mut()[face + 1] += 1. / dx;
    }
    for (patch, value) in [("left", 0.), ("right", 1.)] {
        let patch = mesh.find_patch(patch).unwrap();
        matrix.internal_coeffs_mut(patch).fill(2. / dx);
        matrix.boundary_coeffs_mut(patch).fill(2. / dx * value);
    }
    matrix
}
