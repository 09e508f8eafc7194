#![deny(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]

pub mod control;
pub mod dictionary;
pub mod dimensions;
pub mod error;
pub mod examples;
pub mod fields;
pub mod fvc;
pub mod fvm;
pub mod linalg;
pub mod matrix;
pub mod mesh;
pub mod models;
pub mod parallel;
pub mod patch_field;
pub mod schemes;
pub mod solvers;
#[cfg(test)]
mod test_util;
pub mod value;

pub type Float = f64;
pub type Vector3 = nalgebra::Vector3<Float>;
pub type Tensor = nalgebra::Matrix3<Float>;

pub use dimensions::{DimensionSet, Dimensioned};
pub use error::{FvError, FvResult};
pub use fields::{SurfaceField, VolField};
pub use matrix::FvMatrix;
pub use mesh::Mesh;
pub use value::{Gradable, Value};

pub type VolScalarField = VolField<Float>;
pub type VolVectorField = VolField<Vector3>;
pub type VolTensorField = VolField<Tensor>;
pub type SurfaceScalarField = SurfaceField<Float>;
pub type SurfaceVectorField = SurfaceField<Vector3>;

pub const SMALL: Float = 1e-15;
pub const VSMALL: Float = 1e-300;
pub const GREAT: Float = 1e15;
