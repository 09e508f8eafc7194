use std::ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign};

use ndarray as nd;

use super::FvMatrix;
use crate::{Float, FvError, FvResult, SurfaceField, Value};

fn fail(error: FvError) -> ! {
    panic!("{error}")
}

fn add_optional<T: Value>(
    a: Option<&SurfaceField<T>>,
    b: Option<&SurfaceField<T>>,
    sign: Float,
) -> FvResult<Option<SurfaceField<T>>> {
    Ok(match (a, b) {
        (Some(a), Some(b)) => Some(a.try_add(&(b * sign))?),
        (Some(a), None) => Some(a.clone()),
        (None, Some(b)) => Some(b * sign),
        (None, None) => None,
    })
}

impl<T: Value> FvMatrix<T> {
    fn check_compatible(&self, other: &Self, operation: &str) -> FvResult<()> {
        if self.psi_name != other.psi_name {
            return Err(FvError::FieldMismatch {
                matrix: self.psi_name.clone(),
                field: other.psi_name.clone(),
            });
        }
        if self.generation != other.generation {
            return Err(FvError::StaleTopology {
                what: format!("equation for {} in {operation}", other.psi_name),
                expected: self.generation,
                actual: other.generation,
            });
        }
        self.dimensions.check(&other.dimensions, operation)
    }

    /// `self + sign*other`, term by term.
    fn combine(&self, other: &Self, sign: Float, operation: &str) -> FvResult<Self> {
        self.check_compatible(other, operation)?;
        let lower = match (&self.lower, &other.lower) {
            (None, None) => None,
            _ => Some(self.lower() + &(other.lower() * sign)),
        };
        let per_patch = |a: &[nd::Array1<T>], b: &[nd::Array1<T>]| {
            a.iter()
                .zip(b)
                .map(|(a, b)| {
                    nd::Zip::from(a)
                        .and(b)
                        .map_collect(|&a, &b| a + b * sign)
                })
                .collect()
        };
        Ok(Self {
            psi_name: self.psi_name.clone(),
            psi_dimensions: self.psi_dimensions,
            dimensions: self.dimensions,
            generation: self.generation,
            n_terms: self.n_terms + other.n_terms,
            relaxation_factor: self.relaxation_factor.or(other.relaxation_factor),
            diag: &self.diag + &(&other.diag * sign),
            upper: &self.upper + &(&other.upper * sign),
            lower,
            source: nd::Zip::from(&self.source)
                .and(&other.source)
                .map_collect(|&a, &b| a + b * sign),
            internal_coeffs: per_patch(&self.internal_coeffs, &other.internal_coeffs),
            boundary_coeffs: per_patch(&self.boundary_coeffs, &other.boundary_coeffs),
            face_flux_correction: add_optional(
                self.face_flux_correction.as_ref(),
                other.face_flux_correction.as_ref(),
                sign,
            )?,
        })
    }

    pub fn try_add(&self, other: &Self) -> FvResult<Self> {
        self.combine(other, 1., "+")
    }

    pub fn try_sub(&self, other: &Self) -> FvResult<Self> {
        self.combine(other, -1., "-")
    }

    /// Every coefficient and the source multiplied by `factor`.
    pub fn scaled(&self, factor: Float) -> Self {
        let scale = |values: &[nd::Array1<T>]| {
            values
                .iter()
                .map(|values| values.mapv(|value| value * factor))
                .collect()
        };
        Self {
            psi_name: self.psi_name.clone(),
            psi_dimensions: self.psi_dimensions,
            dimensions: self.dimensions,
            generation: self.generation,
            n_terms: self.n_terms,
            relaxation_factor: self.relaxation_factor,
            diag: &self.diag * factor,
            upper: &self.upper * factor,
            lower: self.lower.as_ref().map(|lower| lower * factor),
            source: self.source.mapv(|value| value * factor),
            internal_coeffs: scale(&self.internal_coeffs),
            boundary_coeffs: scale(&self.boundary_coeffs),
            face_flux_correction: self
                .face_flux_correction
                .as_ref()
                .map(|correction| correction * factor),
        }
    }
}

impl<T: Value> Add<&FvMatrix<T>> for &FvMatrix<T> {
    type Output = FvMatrix<T>;

    fn add(self, rhs: &FvMatrix<T>) -> FvMatrix<T> {
        self.try_add(rhs).unwrap_or_else(|error| fail(error))
    }
}

impl<T: Value> Add<FvMatrix<T>> for FvMatrix<T> {
    type Output = FvMatrix<T>;

    fn add(self, rhs: FvMatrix<T>) -> FvMatrix<T> {
        &self + &rhs
    }
}

impl<T: Value> Sub<&FvMatrix<T>> for &FvMatrix<T> {
    type Output = FvMatrix<T>;

    fn sub(self, rhs: &FvMatrix<T>) -> FvMatrix<T> {
        self.try_sub(rhs).unwrap_or_else(|error| fail(error))
    }
}

impl<T: Value> Sub<FvMatrix<T>> for FvMatrix<T> {
    type Output = FvMatrix<T>;

    fn sub(self, rhs: FvMatrix<T>) -> FvMatrix<T> {
        &self - &rhs
    }
}

impl<T: Value> Neg for FvMatrix<T> {
    type Output = FvMatrix<T>;

    fn neg(self) -> FvMatrix<T> {
        self.scaled(-1.)
    }
}

impl<T: Value> Mul<FvMatrix<T>> for Float {
    type Output = FvMatrix<T>;

    fn mul(self, rhs: FvMatrix<T>) -> FvMatrix<T> {
        rhs.scaled(self)
    }
}

impl<T: Value> AddAssign<&FvMatrix<T>> for FvMatrix<T> {
    fn add_assign(&mut self, rhs: &FvMatrix<T>) {
        *self = &*self + rhs;
    }
}

impl<T: Value> SubAssign<&FvMatrix<T>> for FvMatrix<T> {
    fn sub_assign(&mut self, rhs: &FvMatrix<T>) {
        *self = &*self - rhs;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dimensions::{DIMLESS, VOLUME};
    use crate::{Mesh, VolField};

    fn field(mesh: &Mesh, name: &str) -> VolField<Float> {
        VolField::builder(mesh, name, DIMLESS).uniform(1.).build().unwrap()
    }

    #[test]
    fn test_combination() {
        let mesh = Mesh::line(3, 3.).unwrap();
        let psi = field(&mesh, "T");
        let mut a = FvMatrix::term(&mesh, &psi, VOLUME);
        a.diag_mut().fill(2.);
        a.upper_mut().fill(-1.);
        let mut b = FvMatrix::term(&mesh, &psi, VOLUME);
        b.diag_mut().fill(1.);
        b.lower_mut().fill(0.5);
        b.source_mut().fill(3.);

        let sum = &a + &b;
        assert_eq!(sum.n_terms(), 2);
        assert_eq!(sum.diag(), &nd::arr1(&[3., 3., 3.]));
        assert_eq!(sum.upper(), &nd::arr1(&[-1., -1.]));
        assert_eq!(sum.lower(), &nd::arr1(&[-0.5, -0.5]));
        assert!(!sum.is_symmetric());

        let difference = a.clone().equals(&b).unwrap();
        assert_eq!(difference.diag(), &nd::arr1(&[1., 1., 1.]));
        assert_eq!(difference.source(), &nd::arr1(&[-3., -3., -3.]));
        assert_eq!((2. * -a).diag(), &nd::arr1(&[-4., -4., -4.]));
    }

    #[test]
    fn test_incompatible_equations() {
        let mesh = Mesh::line(3, 3.).unwrap();
        let a = FvMatrix::term(&mesh, &field(&mesh, "T"), VOLUME);
        let b = FvMatrix::term(&mesh, &field(&mesh, "p"), VOLUME);
        assert!(matches!(a.try_add(&b), Err(FvError::FieldMismatch { .. })));
        let c = FvMatrix::term(&mesh, &field(&mesh, "T"), DIMLESS);
        assert!(matches!(
            a.try_sub(&c),
            Err(FvError::DimensionMismatch { .. })
        ));
    }
}
