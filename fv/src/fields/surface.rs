use std::ops::{Add, AddAssign, Mul, MulAssign, Neg, Sub, SubAssign};

use ndarray as nd;

use crate::dimensions::AREA;
use crate::{DimensionSet, Float, FvError, FvResult, Mesh, Value, Vector3};

/// Values on the faces of a mesh: one per internal face plus one array per patch.
///
/// Surface fields carry no boundary conditions; their patch values are set by whatever
/// computes them, usually an interpolation of a volume field.
#[derive(Clone, derivative::Derivative)]
#[derivative(Debug)]
pub struct SurfaceField<T: Value> {
    name: String,
    dimensions: DimensionSet,
    generation: u64,
    #[derivative(Debug = "ignore")]
    internal: nd::Array1<T>,
    #[derivative(Debug = "ignore")]
    boundary: Vec<nd::Array1<T>>,
}

impl<T: Value> SurfaceField<T> {
    pub fn new(
        mesh: &Mesh,
        name: impl Into<String>,
        dimensions: DimensionSet,
        internal: nd::Array1<T>,
        boundary: Vec<nd::Array1<T>>,
    ) -> FvResult<Self> {
        let name = name.into();
        if internal.len() != mesh.n_internal_faces() {
            return Err(FvError::size_mismatch(
                format!("internal faces of {name}"),
                mesh.n_internal_faces(),
                internal.len(),
            ));
        }
        if boundary.len() != mesh.patches().len() {
            return Err(FvError::size_mismatch(
                format!("boundary of {name}"),
                mesh.patches().len(),
                boundary.len(),
            ));
        }
        for (patch, values) in mesh.patches().iter().zip(&boundary) {
            if values.len() != patch.size() {
                return Err(FvError::size_mismatch(
                    format!("{name} on patch {}", patch.name()),
                    patch.size(),
                    values.len(),
                ));
            }
        }
        Ok(Self {
            name,
            dimensions,
            generation: mesh.generation(),
            internal,
            boundary,
        })
    }

    pub fn uniform(
        mesh: &Mesh,
        name: impl Into<String>,
        dimensions: DimensionSet,
        value: T,
    ) -> Self {
        Self {
            name: name.into(),
            dimensions,
            generation: mesh.generation(),
            internal: nd::Array1::from_elem(mesh.n_internal_faces(), value),
            boundary: mesh
                .patches()
                .iter()
                .map(|patch| nd::Array1::from_elem(patch.size(), value))
                .collect(),
        }
    }

    pub fn zeros(mesh: &Mesh, name: impl Into<String>, dimensions: DimensionSet) -> Self {
        Self::uniform(mesh, name, dimensions, T::zero())
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

    pub fn boundary(&self, patch: usize) -> &nd::Array1<T> {
        &self.boundary[patch]
    }

    pub fn boundary_mut(&mut self, patch: usize) -> &mut nd::Array1<T> {
        &mut self.boundary[patch]
    }

    pub fn boundaries(&self) -> &[nd::Array1<T>] {
        &self.boundary
    }

    pub fn check_mesh(&self, mesh: &Mesh) -> FvResult<()> {
        mesh.check_generation(&format!("surface field {}", self.name), self.generation)
    }

    fn check_compatible<U: Value>(
        &self,
        other: &SurfaceField<U>,
        operation: &str,
    ) -> FvResult<()> {
        if self.generation != other.generation {
            return Err(FvError::StaleTopology {
                what: format!("surface field {} in {operation}", other.name),
                expected: other.generation,
                actual: self.generation,
            });
        }
        Ok(())
    }

    /// Face by face map to another value type.
    pub fn map_to<R: Value>(
        &self,
        name: impl Into<String>,
        dimensions: DimensionSet,
        f: impl Fn(T) -> R,
    ) -> SurfaceField<R> {
        SurfaceField {
            name: name.into(),
            dimensions,
            generation: self.generation,
            internal: self.internal.mapv(&f),
            boundary: self.boundary.iter().map(|values| values.mapv(&f)).collect(),
        }
    }

    /// Face by face combination with another surface field on the same mesh.
    pub fn zip_with<U: Value, R: Value>(
        &self,
        other: &SurfaceField<U>,
        name: impl Into<String>,
        dimensions: DimensionSet,
        f: impl Fn(T, U) -> R,
    ) -> FvResult<SurfaceField<R>> {
        self.check_compatible(other, "zip")?;
        let zip = |a: &nd::Array1<T>, b: &nd::Array1<U>| {
            nd::Zip::from(a).and(b).map_collect(|&a, &b| f(a, b))
        };
        Ok(SurfaceField {
            name: name.into(),
            dimensions,
            generation: self.generation,
            internal: zip(&self.internal, &other.internal),
            boundary: self
                .boundary
                .iter()
                .zip(&other.boundary)
                .map(|(a, b)| zip(a, b))
                .collect(),
        })
    }

    pub fn try_add(&self, other: &Self) -> FvResult<Self> {
        self.dimensions.check(&other.dimensions, "+")?;
        self.zip_with(
            other,
            format!("({} + {})", self.name, other.name),
            self.dimensions,
            |a, b| a + b,
        )
    }

    pub fn try_sub(&self, other: &Self) -> FvResult<Self> {
        self.dimensions.check(&other.dimensions, "-")?;
        self.zip_with(
            other,
            format!("({} - {})", self.name, other.name),
            self.dimensions,
            |a, b| a - b,
        )
    }

    /// Largest face value magnitude on this rank.
    pub fn max_mag(&self) -> Float {
        self.internal
            .iter()
            .chain(self.boundary.iter().flatten())
            .map(|value| value.mag())
            .fold(0., Float::max)
    }
}

impl SurfaceField<Vector3> {
    /// The face area vectors of `mesh`.
    pub fn face_areas(mesh: &Mesh) -> Self {
        Self {
            name: "Sf".to_owned(),
            dimensions: AREA,
            generation: mesh.generation(),
            internal: mesh.sf().clone(),
            boundary: (0..mesh.patches().len())
                .map(|patch| mesh.patch_geometry(patch).sf.clone())
                .collect(),
        }
    }

    /// Projection onto the face area vectors, e.g. velocity to volumetric flux.
    pub fn dot_areas(&self, mesh: &Mesh) -> FvResult<SurfaceField<Float>> {
        self.check_mesh(mesh)?;
        self.zip_with(
            &Self::face_areas(mesh),
            format!("({} & Sf)", self.name),
            self.dimensions * AREA,
            |value, sf| value.dot(&sf),
        )
    }
}

impl SurfaceField<Float> {
    /// The face area magnitudes `|Sf|` of `mesh`.
    pub fn face_area_magnitudes(mesh: &Mesh) -> Self {
        Self {
            name: "magSf".to_owned(),
            dimensions: AREA,
            generation: mesh.generation(),
            internal: mesh.mag_sf().clone(),
            boundary: (0..mesh.patches().len())
                .map(|patch| mesh.patch_geometry(patch).mag_sf.clone())
                .collect(),
        }
    }
}

fn fail(error: FvError) -> ! {
    panic!("{error}")
}

impl<T: Value> Add<&SurfaceField<T>> for &SurfaceField<T> {
    type Output = SurfaceField<T>;

    fn add(self, rhs: &SurfaceField<T>) -> SurfaceField<T> {
        self.try_add(rhs).unwrap_or_else(|error| fail(error))
    }
}

impl<T: Value> Sub<&SurfaceField<T>> for &SurfaceField<T> {
    type Output = SurfaceField<T>;

    fn sub(self, rhs: &SurfaceField<T>) -> SurfaceField<T> {
        self.try_sub(rhs).unwrap_or_else(|error| fail(error))
    }
}

impl<T: Value> Neg for &SurfaceField<T> {
    type Output = SurfaceField<T>;

    fn neg(self) -> SurfaceField<T> {
        self.map_to(format!("-{}", self.name), self.dimensions, |value| -value)
    }
}

impl<T: Value> Mul<Float> for &SurfaceField<T> {
    type Output = SurfaceField<T>;

    fn mul(self, rhs: Float) -> SurfaceField<T> {
        self.map_to(
            format!("({rhs}*{})", self.name),
            self.dimensions,
            |value| value * rhs,
        )
    }
}

impl<T: Value> Mul<&SurfaceField<T>> for &SurfaceField<Float> {
    type Output = SurfaceField<T>;

    fn mul(self, rhs: &SurfaceField<T>) -> SurfaceField<T> {
        self.zip_with(
            rhs,
            format!("({}*{})", self.name, rhs.name),
            self.dimensions * rhs.dimensions,
            |scale, value| value * scale,
        )
        .unwrap_or_else(|error| fail(error))
    }
}

impl<T: Value> AddAssign<&SurfaceField<T>> for SurfaceField<T> {
    fn add_assign(&mut self, rhs: &SurfaceField<T>) {
        let sum = self.try_add(rhs).unwrap_or_else(|error| fail(error));
        self.internal = sum.internal;
        self.boundary = sum.boundary;
    }
}

impl<T: Value> SubAssign<&SurfaceField<T>> for SurfaceField<T> {
    fn sub_assign(&mut self, rhs: &SurfaceField<T>) {
        let difference = self.try_sub(rhs).unwrap_or_else(|error| fail(error));
        self.internal = difference.internal;
        self.boundary = difference.boundary;
    }
}

impl<T: Value> MulAssign<Float> for SurfaceField<T> {
    fn mul_assign(&mut self, rhs: Float) {
        self.internal.mapv_inplace(|value| value * rhs);
        for values in &mut self.boundary {
            values.mapv_inplace(|value| value * rhs);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dimensions::{VELOCITY, VOLUMETRIC_FLUX};
    use approx::assert_relative_eq;

    #[test]
    fn test_flux_from_face_velocity() {
        let mesh = Mesh::line(4, 2.).unwrap();
        let u = SurfaceField::uniform(&mesh, "U", VELOCITY, Vector3::new(2., 1., 0.));
        let phi = u.dot_areas(&mesh).unwrap();
        assert_eq!(phi.dimensions(), VOLUMETRIC_FLUX);
        assert_eq!(phi.internal().len(), 3);
        let area = mesh.mag_sf()[0];
        assert_relative_eq!(phi.internal()[0], 2. * area);
        let right = mesh.find_patch("right").unwrap();
        assert_relative_eq!(phi.boundary(right)[0], 2. * area);
        let left = mesh.find_patch("left").unwrap();
        assert_relative_eq!(phi.boundary(left)[0], -2. * area);
    }

    #[test]
    fn test_arithmetic() {
        let mesh = Mesh::line(3, 3.).unwrap();
        let mut a = SurfaceField::uniform(&mesh, "a", VOLUMETRIC_FLUX, 1.);
        let b = SurfaceField::uniform(&mesh, "b", VOLUMETRIC_FLUX, 2.);
        a += &b;
        a *= 2.;
        assert_eq!(a.internal()[1], 6.);
        assert_eq!((&a - &b).boundary(0)[0], 4.);
        assert_eq!(a.max_mag(), 6.);
        let c = SurfaceField::uniform(&mesh, "c", VELOCITY, 1.);
        assert!(matches!(
            a.try_add(&c),
            Err(FvError::DimensionMismatch { .. })
        ));
    }
}
