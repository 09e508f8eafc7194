use std::fmt;
use std::ops::{Div, Mul};

use serde::{Deserialize, Serialize};

use crate::{FvError, FvResult, Value};

/// Physical dimensions as exponents of [mass, length, time, temperature, moles, current,
/// luminous intensity].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DimensionSet(pub [i32; 7]);

impl DimensionSet {
    pub const fn new(mass: i32, length: i32, time: i32) -> Self {
        Self([mass, length, time, 0, 0, 0, 0])
    }

    pub fn is_dimensionless(&self) -> bool {
        self.0.iter().all(|&exponent| exponent == 0)
    }

    pub fn pow(self, n: i32) -> Self {
        Self(self.0.map(|exponent| exponent * n))
    }

    pub fn reciprocal(self) -> Self {
        Self(self.0.map(|exponent| -exponent))
    }

    /// Fails with `DimensionMismatch` unless both sets are identical.
    pub fn check(&self, other: &Self, operation: &str) -> FvResult<()> {
        if self == other {
            Ok(())
        } else {
            Err(FvError::DimensionMismatch {
                operation: operation.to_owned(),
                left: *self,
                right: *other,
            })
        }
    }
}

impl fmt::Display for DimensionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [m, l, t, th, n, i, j] = self.0;
        write!(f, "[{m} {l} {t} {th} {n} {i} {j}]")
    }
}

impl Mul for DimensionSet {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self {
        let mut exponents = self.0;
        exponents
            .iter_mut()
            .zip(rhs.0)
            .for_each(|(left, right)| *left += right);
        Self(exponents)
    }
}

impl Div for DimensionSet {
    type Output = Self;

    fn div(self, rhs: Self) -> Self {
        self * rhs.reciprocal()
    }
}

pub const DIMLESS: DimensionSet = DimensionSet::new(0, 0, 0);
pub const MASS: DimensionSet = DimensionSet::new(1, 0, 0);
pub const LENGTH: DimensionSet = DimensionSet::new(0, 1, 0);
pub const TIME: DimensionSet = DimensionSet::new(0, 0, 1);
pub const AREA: DimensionSet = DimensionSet::new(0, 2, 0);
pub const VOLUME: DimensionSet = DimensionSet::new(0, 3, 0);
pub const VELOCITY: DimensionSet = DimensionSet::new(0, 1, -1);
pub const DENSITY: DimensionSet = DimensionSet::new(1, -3, 0);
/// Pressure divided by density, as solved for in incompressible flow.
pub const KINEMATIC_PRESSURE: DimensionSet = DimensionSet::new(0, 2, -2);
pub const KINEMATIC_VISCOSITY: DimensionSet = DimensionSet::new(0, 2, -1);
pub const VOLUMETRIC_FLUX: DimensionSet = DimensionSet::new(0, 3, -1);

/// A named value carrying physical dimensions.
#[derive(Clone, Debug, PartialEq)]
pub struct Dimensioned<T: Value> {
    pub name: String,
    pub dimensions: DimensionSet,
    pub value: T,
}

impl<T: Value> Dimensioned<T> {
    pub fn new(name: impl Into<String>, dimensions: DimensionSet, value: T) -> Self {
        Self {
            name: name.into(),
            dimensions,
            value,
        }
    }

    pub fn dimensionless(name: impl Into<String>, value: T) -> Self {
        Self::new(name, DIMLESS, value)
    }
}
