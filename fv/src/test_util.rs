use ndarray as nd;

use crate::linalg::LduMatrix;
use crate::mesh::LduAddressing;
use crate::parallel::Comm;
use crate::Float;

pub struct AllCloseAssertion<'a, 'b, D: nd::Dimension> {
    left: &'a nd::Array<Float, D>,
    right: &'b nd::Array<Float, D>,

    rel_tol: Option<Float>,
    abs_tol: Option<Float>,
}

impl<'a, 'b, D: nd::Dimension> AllCloseAssertion<'a, 'b, D> {
    #[allow(dead_code)]
    pub fn rel_tol(&mut self, rel_tol: Option<Float>) -> &mut Self {
        self.rel_tol = rel_tol;
        self
    }

    pub fn abs_tol(&mut self, abs_tol: Option<Float>) -> &mut Self {
        self.abs_tol = abs_tol;
        self
    }
}

impl<'a, 'b, D: nd::Dimension> Drop for AllCloseAssertion<'a, 'b, D> {
    #[track_caller]
    fn drop(&mut self) {
        if self.rel_tol.is_none() && self.abs_tol.is_none() {
            panic!("At least one tolerance must be specified");
        }
        if self.left.shape() != self.right.shape() {
            panic!(
                "Shapes differ: {:?} and {:?}",
                self.left.shape(),
                self.right.shape()
            );
        }
        let mut num_failures = 0;
        self.left
            .indexed_iter()
            .zip(self.right.iter())
            .for_each(|((index, left), right)| {
                let mut checker = approx::Relative::default();
                if let Some(rel_tol) = self.rel_tol {
                    checker = checker.max_relative(rel_tol);
                }
                if let Some(abs_tol) = self.abs_tol {
                    checker = checker.epsilon(abs_tol);
                }

                if !checker.eq(left, right) {
                    if num_failures < 20 {
                        eprintln!("At {index:?}, left = {left}, right = {right}");
                    }
                    num_failures += 1;
                }
            });
        if num_failures > 0 {
            panic!(
                "Didn't match at {num_failures}/{} elements",
                self.left.len()
            )
        }
    }
}

#[track_caller]
pub fn assert_all_close<'a, 'b, D: nd::Dimension>(
    left: &'a nd::Array<Float, D>,
    right: &'b nd::Array<Float, D>,
) -> AllCloseAssertion<'a, 'b, D> {
    AllCloseAssertion {
        left,
        right,
        rel_tol: Some(1e-7),
        abs_tol: Some(0.),
    }
}

/// Face addressing of an `n` by `n` grid of cells, faces ordered by owner.
pub fn grid_addressing(n: usize) -> LduAddressing {
    let mut faces = Vec::new();
    for j in 0..n {
        for i in 0..n {
            let cell = i + n * j;
            if i + 1 < n {
                faces.push((cell, cell + 1));
            }
            if j + 1 < n {
                faces.push((cell, cell + n));
            }
        }
    }
    faces.sort();
    let (lower, upper) = faces.into_iter().unzip();
    LduAddressing::new(n * n, lower, upper)
}

/// A diagonally dominant five-point operator, symmetric unless `lower` is given.
pub fn grid_matrix(addressing: &LduAddressing, lower: Option<Float>) -> LduMatrix<'_> {
    let n_faces = addressing.n_faces();
    let mut diag = nd::Array1::from_elem(addressing.size(), 0.1);
    for (&l, &u) in addressing.lower().iter().zip(addressing.upper()) {
        diag[l] += 1.;
        diag[u] += 1.;
    }
    LduMatrix::new(
        addressing,
        &Comm::serial(),
        diag,
        nd::Array1::from_elem(n_faces, -1.),
        lower.map(|lower| nd::Array1::from_elem(n_faces, lower)),
    )
    .unwrap()
}
