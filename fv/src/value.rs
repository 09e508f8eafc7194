use std::fmt::Debug;
use std::ops::{Add, AddAssign, Div, Mul, MulAssign, Neg, Sub, SubAssign};

use crate::{Float, Tensor, Vector3};

/// Field value types: scalars, vectors and tensors.
///
/// All field and matrix code is generic over this trait; component-wise access is what lets
/// the segregated solver treat every type as a set of scalar problems.
pub trait Value:
    Copy
    + Debug
    + PartialEq
    + Send
    + Sync
    + 'static
    + num_traits::Zero
    + Add<Output = Self>
    + Sub<Output = Self>
    + Neg<Output = Self>
    + Mul<Float, Output = Self>
    + Div<Float, Output = Self>
    + AddAssign
    + SubAssign
    + MulAssign<Float>
{
    const N_COMPONENTS: usize;
    const TYPE_NAME: &'static str;

    fn component(&self, d: usize) -> Float;
    fn set_component(&mut self, d: usize, value: Float);
    fn from_fn(f: impl FnMut(usize) -> Float) -> Self;

    /// Applies a rotation. Scalars are invariant.
    fn transform(self, rotation: &Tensor) -> Self;

    /// Diagonal of the implicit part of a mirror-plane gradient with unit normal `n`.
    fn sn_grad_transform_diag(n: &Vector3) -> Self;

    /// Whether component `d` lies in the solved directions of the mesh.
    fn component_active(d: usize, solution_directions: [bool; 3]) -> bool;

    fn uniform(value: Float) -> Self {
        Self::from_fn(|_| value)
    }

    fn one() -> Self {
        Self::uniform(1.)
    }

    fn cmpt_multiply(self, other: Self) -> Self {
        Self::from_fn(|d| self.component(d) * other.component(d))
    }

    fn cmpt_mag(self) -> Self {
        Self::from_fn(|d| self.component(d).abs())
    }

    fn cmpt_max(self) -> Float {
        (0..Self::N_COMPONENTS)
            .map(|d| self.component(d))
            .fold(Float::NEG_INFINITY, Float::max)
    }

    fn cmpt_min(self) -> Float {
        (0..Self::N_COMPONENTS)
            .map(|d| self.component(d))
            .fold(Float::INFINITY, Float::min)
    }

    fn cmpt_av(self) -> Float {
        (0..Self::N_COMPONENTS)
            .map(|d| self.component(d))
            .sum::<Float>()
            / Self::N_COMPONENTS as Float
    }

    fn mag_sqr(self) -> Float {
        (0..Self::N_COMPONENTS)
            .map(|d| self.component(d).powi(2))
            .sum()
    }

    fn mag(self) -> Float {
        self.mag_sqr().sqrt()
    }

    /// Parses a number (scalars) or a flat array of components.
    fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Number(number) if Self::N_COMPONENTS == 1 => {
                number.as_f64().map(Self::uniform)
            }
            serde_json::Value::Array(items) if items.len() == Self::N_COMPONENTS => {
                let components = items
                    .iter()
                    .map(serde_json::Value::as_f64)
                    .collect::<Option<Vec<_>>>()?;
                Some(Self::from_fn(|d| components[d]))
            }
            _ => None,
        }
    }

    fn to_json(self) -> serde_json::Value {
        if Self::N_COMPONENTS == 1 {
            serde_json::json!(self.component(0))
        } else {
            serde_json::json!((0..Self::N_COMPONENTS)
                .map(|d| self.component(d))
                .collect::<Vec<_>>())
        }
    }
}

impl Value for Float {
    const N_COMPONENTS: usize = 1;
    const TYPE_NAME: &'static str = "scalar";

    fn component(&self, _d: usize) -> Float {
        *self
    }

    fn set_component(&mut self, _d: usize, value: Float) {
        *self = value;
    }

    fn from_fn(mut f: impl FnMut(usize) -> Float) -> Self {
        f(0)
    }

    fn transform(self, _rotation: &Tensor) -> Self {
        self
    }

    fn sn_grad_transform_diag(_n: &Vector3) -> Self {
        0.
    }

    fn component_active(_d: usize, _solution_directions: [bool; 3]) -> bool {
        true
    }
}

impl Value for Vector3 {
    const N_COMPONENTS: usize = 3;
    const TYPE_NAME: &'static str = "vector";

    fn component(&self, d: usize) -> Float {
        self[d]
    }

    fn set_component(&mut self, d: usize, value: Float) {
        self[d] = value;
    }

    fn from_fn(mut f: impl FnMut(usize) -> Float) -> Self {
        Vector3::new(f(0), f(1), f(2))
    }

    fn transform(self, rotation: &Tensor) -> Self {
        rotation * self
    }

    fn sn_grad_transform_diag(n: &Vector3) -> Self {
        n.abs()
    }

    fn component_active(d: usize, solution_directions: [bool; 3]) -> bool {
        solution_directions[d]
    }
}

impl Value for Tensor {
    const N_COMPONENTS: usize = 9;
    const TYPE_NAME: &'static str = "tensor";

    /// Row-major component order: xx, xy, xz, yx, ...
    fn component(&self, d: usize) -> Float {
        self[(d / 3, d % 3)]
    }

    fn set_component(&mut self, d: usize, value: Float) {
        self[(d / 3, d % 3)] = value;
    }

    fn from_fn(mut f: impl FnMut(usize) -> Float) -> Self {
        Tensor::from_fn(|i, j| f(3 * i + j))
    }

    fn transform(self, rotation: &Tensor) -> Self {
        rotation * self * rotation.transpose()
    }

    fn sn_grad_transform_diag(n: &Vector3) -> Self {
        let diag = n.abs();
        diag * diag.transpose()
    }

    fn component_active(d: usize, solution_directions: [bool; 3]) -> bool {
        solution_directions[d / 3] && solution_directions[d % 3]
    }
}

/// Lays values out component by component for messages between ranks.
pub fn flatten<'a, T: Value>(values: impl IntoIterator<Item = &'a T>) -> Vec<Float> {
    values
        .into_iter()
        .flat_map(|value| (0..T::N_COMPONENTS).map(move |d| value.component(d)))
        .collect()
}

pub fn unflatten<T: Value>(data: &[Float]) -> Vec<T> {
    data.chunks_exact(T::N_COMPONENTS)
        .map(|chunk| T::from_fn(|d| chunk[d]))
        .collect()
}

/// Value types with a gradient type of one rank higher.
pub trait Gradable: Value {
    type Grad: Value;

    /// Outer product `d ⊗ value`.
    fn outer(d: &Vector3, value: Self) -> Self::Grad;

    /// Inner product `d · grad`.
    fn dot_grad(d: &Vector3, grad: &Self::Grad) -> Self;
}

impl Gradable for Float {
    type Grad = Vector3;

    fn outer(d: &Vector3, value: Self) -> Vector3 {
        d * value
    }

    fn dot_grad(d: &Vector3, grad: &Vector3) -> Self {
        d.dot(grad)
    }
}

impl Gradable for Vector3 {
    type Grad = Tensor;

    fn outer(d: &Vector3, value: Self) -> Tensor {
        d * value.transpose()
    }

    fn dot_grad(d: &Vector3, grad: &Tensor) -> Self {
        grad.transpose() * d
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_components() {
        let mut v = Vector3::new(1., -2., 3.);
        assert_eq!(v.component(1), -2.);
        v.set_component(1, 5.);
        assert_eq!(v, Vector3::new(1., 5., 3.));
        assert_eq!(v.cmpt_max(), 5.);
        assert_eq!(Vector3::new(-1., 2., -3.).cmpt_mag(), Vector3::new(1., 2., 3.));

        let t = Tensor::from_fn(|i, j| (3 * i + j) as Float);
        assert_eq!(t.component(5), 5.);
        assert_eq!(Tensor::from_fn(|i, j| t[(i, j)]), t);
        assert_eq!(Tensor::N_COMPONENTS, 9);
    }

    #[test]
    fn test_reflection() {
        let n = Vector3::new(0., 1., 0.);
        let reflect = Tensor::identity() - 2. * n * n.transpose();
        assert_eq!(
            Vector3::new(1., 2., 3.).transform(&reflect),
            Vector3::new(1., -2., 3.)
        );
        assert_eq!((4.0 as Float).transform(&reflect), 4.);
    }

    #[test]
    fn test_gradient_products() {
        let d = Vector3::new(1., 0., 0.);
        let u = Vector3::new(2., 3., 4.);
        let grad = <Vector3 as Gradable>::outer(&d, u);
        assert_eq!(grad[(0, 1)], 3.);
        assert_eq!(Vector3::dot_grad(&d, &grad), u);
        assert_eq!(Float::dot_grad(&d, &Float::outer(&d, 7.)), 7.);
    }

    #[test]
    fn test_flatten() {
        let values = vec![Vector3::new(1., 2., 3.), Vector3::new(4., 5., 6.)];
        let data = flatten(&values);
        assert_eq!(data, vec![1., 2., 3., 4., 5., 6.]);
        assert_eq!(unflatten::<Vector3>(&data), values);
    }

    #[test]
    fn test_json() {
        let value = serde_json::json!([1.0, 2.0, 3.0]);
        assert_eq!(Vector3::from_json(&value), Some(Vector3::new(1., 2., 3.)));
        assert_eq!(Float::from_json(&serde_json::json!(2.5)), Some(2.5));
        assert_eq!(Float::from_json(&value), None);
        assert_eq!(Vector3::new(1., 2., 3.).to_json(), value);
    }
}
