use std::ops::{Add, AddAssign, Div, Mul, MulAssign, Neg, Sub, SubAssign};

use ndarray as nd;

use super::VolField;
use crate::patch_field::{CalculatedPatchField, FvPatchField};
use crate::value::{flatten, unflatten};
use crate::{DimensionSet, Float, FvError, FvResult, Mesh, Value};

fn fail(error: FvError) -> ! {
    panic!("{error}")
}

impl<T: Value> VolField<T> {
    fn check_compatible<U: Value>(&self, other: &VolField<U>, operation: &str) -> FvResult<()> {
        if self.generation != other.generation {
            return Err(FvError::StaleTopology {
                what: format!("field {} in {operation}", other.name),
                expected: other.generation,
                actual: self.generation,
            });
        }
        Ok(())
    }

    /// Applies `f` to cell, boundary and coupled neighbour values, keeping this field's
    /// constraint conditions and making every other patch calculated.
    fn combine<U: Value>(
        &self,
        other: &VolField<U>,
        name: String,
        dimensions: DimensionSet,
        f: impl Fn(T, U) -> T,
    ) -> Self {
        let internal = nd::Zip::from(&self.internal)
            .and(&other.internal)
            .map_collect(|&a, &b| f(a, b));
        let boundary = self
            .boundary
            .iter()
            .zip(&other.boundary)
            .map(|(a, b)| {
                let value = nd::Zip::from(a.value())
                    .and(b.value())
                    .map_collect(|&a, &b| f(a, b));
                if !a.constraint() {
                    return Box::new(CalculatedPatchField::from_values(a.patch(), value))
                        as Box<dyn FvPatchField<T>>;
                }
                let mut field = a.clone();
                field.value_mut().assign(&value);
                if let (Some(a), Some(b)) = (a.patch_neighbour_field(), b.patch_neighbour_field())
                {
                    let neighbour = nd::Zip::from(a).and(b).map_collect(|&a, &b| f(a, b));
                    if let Some(target) = field.patch_neighbour_field_mut() {
                        target.assign(&neighbour);
                    }
                }
                field
            })
            .collect();
        Self {
            name,
            dimensions,
            generation: self.generation,
            internal,
            boundary,
            time_index: self.time_index,
            old_time: None,
            prev_iter: None,
        }
    }

    fn map_same(&self, name: String, dimensions: DimensionSet, f: impl Fn(T) -> T) -> Self {
        self.combine(self, name, dimensions, |a, _| f(a))
    }

    /// A field of another value type computed value by value; needs the mesh to set up the
    /// new boundary conditions.
    pub fn map_to<R: Value>(
        &self,
        mesh: &Mesh,
        name: impl Into<String>,
        dimensions: DimensionSet,
        f: impl Fn(T) -> R,
    ) -> FvResult<VolField<R>> {
        self.check_mesh(mesh)?;
        let mut result = VolField::calculated(mesh, name, dimensions, self.internal.mapv(&f))?;
        for (target, source) in result.boundary.iter_mut().zip(&self.boundary) {
            target.value_mut().assign(&source.value().mapv(&f));
            if let (Some(target), Some(source)) = (
                target.patch_neighbour_field_mut(),
                source.patch_neighbour_field(),
            ) {
                target.assign(&source.mapv(&f));
            }
        }
        Ok(result)
    }

    pub fn component(&self, mesh: &Mesh, d: usize) -> FvResult<VolField<Float>> {
        self.map_to(
            mesh,
            format!("{}.component({d})", self.name),
            self.dimensions,
            |value| value.component(d),
        )
    }

    pub fn mag(&self, mesh: &Mesh) -> FvResult<VolField<Float>> {
        self.map_to(
            mesh,
            format!("mag({})", self.name),
            self.dimensions,
            T::mag,
        )
    }

    pub fn try_add(&self, other: &Self) -> FvResult<Self> {
        self.dimensions.check(&other.dimensions, "+")?;
        self.check_compatible(other, "+")?;
        Ok(self.combine(
            other,
            format!("({} + {})", self.name, other.name),
            self.dimensions,
            |a, b| a + b,
        ))
    }

    pub fn try_sub(&self, other: &Self) -> FvResult<Self> {
        self.dimensions.check(&other.dimensions, "-")?;
        self.check_compatible(other, "-")?;
        Ok(self.combine(
            other,
            format!("({} - {})", self.name, other.name),
            self.dimensions,
            |a, b| a - b,
        ))
    }

    pub fn scaled(&self, factor: Float) -> Self {
        self.map_same(
            format!("({factor}*{})", self.name),
            self.dimensions,
            |value| value * factor,
        )
    }

    /// Sum over all ranks of the cell values.
    pub fn g_sum(&self, mesh: &Mesh) -> T {
        let local = self.internal.iter().fold(T::zero(), |sum, &value| sum + value);
        unflatten::<T>(&mesh.comm().sum_many(&flatten([&local])))
            .first()
            .copied()
            .unwrap_or(local)
    }

    /// Volume-weighted mean over all ranks.
    pub fn weighted_average(&self, mesh: &Mesh) -> T {
        let weighted = nd::Zip::from(&self.internal)
            .and(mesh.cell_volumes())
            .fold(T::zero(), |sum, &value, &volume| sum + value * volume);
        let mut data = flatten([&weighted]);
        data.push(mesh.cell_volumes().sum());
        let reduced = mesh.comm().sum_many(&data);
        let total_volume = reduced[T::N_COMPONENTS];
        T::from_fn(|d| reduced[d] / total_volume)
    }

    /// Largest cell value magnitude over all ranks.
    pub fn g_max_mag(&self, mesh: &Mesh) -> Float {
        let local = self
            .internal
            .iter()
            .map(|value| value.mag())
            .fold(0., Float::max);
        mesh.comm().max(local)
    }
}

impl VolField<Float> {
    pub fn max(&self) -> Float {
        self.internal.iter().copied().fold(Float::NEG_INFINITY, Float::max)
    }

    pub fn min(&self) -> Float {
        self.internal.iter().copied().fold(Float::INFINITY, Float::min)
    }

    pub fn g_max(&self, mesh: &Mesh) -> Float {
        mesh.comm().max(self.max())
    }

    pub fn g_min(&self, mesh: &Mesh) -> Float {
        mesh.comm().min(self.min())
    }

    /// Reciprocal of the field, with dimensions inverted.
    pub fn reciprocal(&self) -> Self {
        self.map_same(
            format!("(1|{})", self.name),
            self.dimensions.reciprocal(),
            |value| 1. / value,
        )
    }
}

impl<T: Value> Add<&VolField<T>> for &VolField<T> {
    type Output = VolField<T>;

    fn add(self, rhs: &VolField<T>) -> VolField<T> {
        self.try_add(rhs).unwrap_or_else(|error| fail(error))
    }
}

impl<T: Value> Sub<&VolField<T>> for &VolField<T> {
    type Output = VolField<T>;

    fn sub(self, rhs: &VolField<T>) -> VolField<T> {
        self.try_sub(rhs).unwrap_or_else(|error| fail(error))
    }
}

impl<T: Value> Neg for &VolField<T> {
    type Output = VolField<T>;

    fn neg(self) -> VolField<T> {
        self.map_same(format!("-{}", self.name), self.dimensions, |value| -value)
    }
}

impl<T: Value> Mul<Float> for &VolField<T> {
    type Output = VolField<T>;

    fn mul(self, rhs: Float) -> VolField<T> {
        self.scaled(rhs)
    }
}

impl<T: Value> Mul<&VolField<T>> for Float {
    type Output = VolField<T>;

    fn mul(self, rhs: &VolField<T>) -> VolField<T> {
        rhs.scaled(self)
    }
}

/// Scalar field times a field of any value type.
impl<T: Value> Mul<&VolField<T>> for &VolField<Float> {
    type Output = VolField<T>;

    fn mul(self, rhs: &VolField<T>) -> VolField<T> {
        rhs.check_compatible(self, "*")
            .unwrap_or_else(|error| fail(error));
        rhs.combine(
            self,
            format!("({}*{})", self.name, rhs.name),
            self.dimensions * rhs.dimensions,
            |value, scale| value * scale,
        )
    }
}

impl<T: Value> Div<&VolField<Float>> for &VolField<T> {
    type Output = VolField<T>;

    fn div(self, rhs: &VolField<Float>) -> VolField<T> {
        self.check_compatible(rhs, "/")
            .unwrap_or_else(|error| fail(error));
        self.combine(
            rhs,
            format!("({}|{})", self.name, rhs.name),
            self.dimensions / rhs.dimensions,
            |value, scale| value / scale,
        )
    }
}

impl<T: Value> AddAssign<&VolField<T>> for VolField<T> {
    fn add_assign(&mut self, rhs: &VolField<T>) {
        let sum = self.try_add(rhs).unwrap_or_else(|error| fail(error));
        self.assign_computed(sum);
    }
}

impl<T: Value> SubAssign<&VolField<T>> for VolField<T> {
    fn sub_assign(&mut self, rhs: &VolField<T>) {
        let difference = self.try_sub(rhs).unwrap_or_else(|error| fail(error));
        self.assign_computed(difference);
    }
}

impl<T: Value> MulAssign<Float> for VolField<T> {
    fn mul_assign(&mut self, rhs: Float) {
        self.internal.mapv_inplace(|value| value * rhs);
        for field in &mut self.boundary {
            let scaled = field.value().mapv(|value| value * rhs);
            field.force_assign(&scaled);
            if let Some(neighbour) = field.patch_neighbour_field_mut() {
                neighbour.mapv_inplace(|value| value * rhs);
            }
        }
    }
}

impl<T: Value> VolField<T> {
    /// Takes over the values of `result` while keeping this field's conditions, name and
    /// time levels.
    fn assign_computed(&mut self, result: Self) {
        for (own, computed) in self.boundary.iter_mut().zip(&result.boundary) {
            own.force_assign(computed.value());
            if let (Some(target), Some(source)) = (
                own.patch_neighbour_field_mut(),
                computed.patch_neighbour_field(),
            ) {
                target.assign(source);
            }
        }
        self.internal = result.internal;
    }

    /// `field = result`: takes over the cell values and the boundary values of patches whose
    /// conditions allow assignment. Name, conditions and time levels are kept.
    pub fn assign(&mut self, mesh: &Mesh, result: &Self) -> FvResult<()> {
        self.check_mesh(mesh)?;
        self.check_compatible(result, "=")?;
        self.dimensions.check(&result.dimensions, "=")?;
        self.internal.assign(&result.internal);
        for patch in 0..self.boundary.len() {
            self.assign_boundary(patch, result.boundary[patch].value());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dimensions::{DIMLESS, LENGTH, TIME, VELOCITY};
    use crate::Vector3;
    use approx::assert_relative_eq;

    #[test]
    fn test_arithmetic() {
        let mesh = Mesh::line(3, 3.).unwrap();
        let a = VolField::builder(&mesh, "a", LENGTH)
            .from_fn(|centre| centre.x)
            .fixed_value("left", 0.)
            .build()
            .unwrap();
        let b = VolField::uniform_calculated(&mesh, "b", LENGTH, 1.).unwrap();
        let sum = &a + &b;
        assert_eq!(sum.internal(), &nd::arr1(&[1.5, 2.5, 3.5]));
        assert_eq!(sum.boundary_field(0).type_name(), "calculated");
        assert_eq!(sum.boundary_value(0)[0], 1.);
        assert_eq!(sum.boundary_field(2).type_name(), "empty");

        let mut c = a.clone();
        c += &b;
        assert_eq!(c.name(), "a");
        assert_eq!(c.boundary_field(0).type_name(), "fixedValue");
        c *= 2.;
        assert_eq!(c.internal()[0], 3.);

        let t = VolField::uniform_calculated(&mesh, "t", TIME, 2.).unwrap();
        let speed = &a / &t;
        assert_eq!(speed.dimensions(), VELOCITY);
        assert_relative_eq!(speed.internal()[2], 1.25);
        assert_relative_eq!(a.weighted_average(&mesh), 1.5);
        assert_eq!(a.max(), 2.5);
    }

    #[test]
    #[should_panic(expected = "dimensions")]
    fn test_dimension_mismatch_panics() {
        let mesh = Mesh::line(3, 3.).unwrap();
        let a = VolField::uniform_calculated(&mesh, "a", LENGTH, 1.).unwrap();
        let b = VolField::uniform_calculated(&mesh, "b", DIMLESS, 1.).unwrap();
        let _ = &a + &b;
    }

    #[test]
    fn test_try_add_reports_dimensions() {
        let mesh = Mesh::line(3, 3.).unwrap();
        let a = VolField::uniform_calculated(&mesh, "a", LENGTH, 1.).unwrap();
        let b = VolField::uniform_calculated(&mesh, "b", DIMLESS, 1.).unwrap();
        assert!(matches!(
            a.try_add(&b),
            Err(FvError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_components() {
        let mesh = Mesh::line(2, 2.).unwrap();
        let u = VolField::uniform_calculated(&mesh, "U", VELOCITY, Vector3::new(3., 4., 0.))
            .unwrap();
        assert_eq!(u.component(&mesh, 1).unwrap().internal()[0], 4.);
        assert_relative_eq!(u.mag(&mesh).unwrap().internal()[1], 5.);
        assert_relative_eq!(u.g_max_mag(&mesh), 5.);
    }
}
