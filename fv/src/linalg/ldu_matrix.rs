use std::borrow::Cow;

use ndarray as nd;

use super::interface::{update_interfaces, CoupledInterface};
use crate::mesh::LduAddressing;
use crate::parallel::Comm;
use crate::{Float, FvError, FvResult};

/// Added to the residual normalisation so that a zero right-hand side with a zero solution
/// still gives a finite residual.
const NORM_FACTOR_FLOOR: Float = 1e-20;

/// A scalar sparse matrix with one coefficient per face on each side of the diagonal.
///
/// `upper[face]` multiplies the `upper` cell's value in the `lower` cell's row and `lower[face]`
/// the other way round; a matrix without its own `lower` is symmetric. Coupled interfaces add
/// the rows' dependence on cells across cyclic and processor patches.
#[derive(Clone, derivative::Derivative)]
#[derivative(Debug)]
pub struct LduMatrix<'a> {
    #[derivative(Debug = "ignore")]
    addressing: Cow<'a, LduAddressing>,
    comm: Comm,
    #[derivative(Debug = "ignore")]
    diag: nd::Array1<Float>,
    #[derivative(Debug = "ignore")]
    upper: nd::Array1<Float>,
    #[derivative(Debug = "ignore")]
    lower: Option<nd::Array1<Float>>,
    interfaces: Vec<CoupledInterface<'a>>,
}

impl<'a> LduMatrix<'a> {
    pub fn new(
        addressing: &'a LduAddressing,
        comm: &Comm,
        diag: nd::Array1<Float>,
        upper: nd::Array1<Float>,
        lower: Option<nd::Array1<Float>>,
    ) -> FvResult<Self> {
        Self::from_parts(Cow::Borrowed(addressing), comm.clone(), diag, upper, lower)
    }

    /// A matrix owning its addressing, as built for the coarse levels of multigrid.
    pub fn owned(
        addressing: LduAddressing,
        comm: &Comm,
        diag: nd::Array1<Float>,
        upper: nd::Array1<Float>,
        lower: Option<nd::Array1<Float>>,
    ) -> FvResult<LduMatrix<'static>> {
        LduMatrix::from_parts(Cow::Owned(addressing), comm.clone(), diag, upper, lower)
    }

    fn from_parts(
        addressing: Cow<'a, LduAddressing>,
        comm: Comm,
        diag: nd::Array1<Float>,
        upper: nd::Array1<Float>,
        lower: Option<nd::Array1<Float>>,
    ) -> FvResult<Self> {
        if diag.len() != addressing.size() {
            return Err(FvError::size_mismatch("diagonal", addressing.size(), diag.len()));
        }
        for (what, coeffs) in [("upper", Some(&upper)), ("lower", lower.as_ref())] {
            if let Some(coeffs) = coeffs {
                if coeffs.len() != addressing.n_faces() {
                    return Err(FvError::size_mismatch(what, addressing.n_faces(), coeffs.len()));
                }
            }
        }
        Ok(Self {
            addressing,
            comm,
            diag,
            upper,
            lower,
            interfaces: Vec::new(),
        })
    }

    pub fn with_interfaces(self, interfaces: Vec<CoupledInterface<'a>>) -> Self {
        Self { interfaces, ..self }
    }

    pub fn addressing(&self) -> &LduAddressing {
        &self.addressing
    }

    pub fn comm(&self) -> &Comm {
        &self.comm
    }

    pub fn n_cells(&self) -> usize {
        self.diag.len()
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

    pub fn lower(&self) -> &nd::Array1<Float> {
        self.lower.as_ref().unwrap_or(&self.upper)
    }

    pub fn is_symmetric(&self) -> bool {
        self.lower.is_none()
    }

    pub fn interfaces(&self) -> &[CoupledInterface<'a>] {
        &self.interfaces
    }

    /// Row by row product over the face addressing, without the interfaces.
    fn face_product(
        &self,
        psi: &nd::Array1<Float>,
        owned: &nd::Array1<Float>,
        neighbouring: &nd::Array1<Float>,
    ) -> nd::Array1<Float> {
        let addressing = self.addressing.as_ref();
        let (lower, upper) = (addressing.lower(), addressing.upper());
        let (losort, owner_start, losort_start) = (
            addressing.losort(),
            addressing.owner_start(),
            addressing.losort_start(),
        );
        let diag = &self.diag;
        let mut result = nd::Array1::zeros(self.n_cells());
        nd::Zip::indexed(&mut result).par_for_each(|cell, out| {
            let mut sum = diag[cell] * psi[cell];
            for face in owner_start[cell]..owner_start[cell + 1] {
                sum += owned[face] * psi[upper[face]];
            }
            for &face in &losort[losort_start[cell]..losort_start[cell + 1]] {
                sum += neighbouring[face] * psi[lower[face]];
            }
            *out = sum;
        });
        result
    }

    /// `A·psi`, including the coupled interfaces.
    pub fn amul(&self, psi: &nd::Array1<Float>) -> FvResult<nd::Array1<Float>> {
        let mut result = self.face_product(psi, &self.upper, self.lower());
        update_interfaces(&self.interfaces, psi, &mut result)?;
        Ok(result)
    }

    /// `Aᵀ·psi`, including the coupled interfaces.
    pub fn tmul(&self, psi: &nd::Array1<Float>) -> FvResult<nd::Array1<Float>> {
        let mut result = self.face_product(psi, self.lower(), &self.upper);
        update_interfaces(&self.interfaces, psi, &mut result)?;
        Ok(result)
    }

    /// `source - A·psi`.
    pub fn residual(
        &self,
        psi: &nd::Array1<Float>,
        source: &nd::Array1<Float>,
    ) -> FvResult<nd::Array1<Float>> {
        Ok(source - &self.amul(psi)?)
    }

    /// Row sums of the matrix, interfaces included.
    pub fn sum_a(&self) -> nd::Array1<Float> {
        let mut sum = self.diag.clone();
        let lower_coeffs = self.lower();
        for (face, (&l, &u)) in self
            .addressing
            .lower()
            .iter()
            .zip(self.addressing.upper())
            .enumerate()
        {
            sum[l] += self.upper[face];
            sum[u] += lower_coeffs[face];
        }
        for coupled in &self.interfaces {
            for (&cell, &coeff) in coupled.interface.face_cells().iter().zip(&coupled.coeffs) {
                sum[cell] -= coeff;
            }
        }
        sum
    }

    /// Sum of the off-diagonal magnitudes of each row, without the interfaces.
    pub fn sum_mag_off_diag(&self) -> nd::Array1<Float> {
        let mut sum = nd::Array1::zeros(self.n_cells());
        let lower_coeffs = self.lower();
        for (face, (&l, &u)) in self
            .addressing
            .lower()
            .iter()
            .zip(self.addressing.upper())
            .enumerate()
        {
            sum[l] += self.upper[face].abs();
            sum[u] += lower_coeffs[face].abs();
        }
        sum
    }

    /// Normalisation of residuals, making them independent of the scale of the equation.
    pub fn norm_factor(
        &self,
        psi: &nd::Array1<Float>,
        source: &nd::Array1<Float>,
        a_psi: &nd::Array1<Float>,
    ) -> Float {
        let totals = self.comm.sum_many(&[psi.sum(), psi.len() as Float]);
        let x_ref = if totals[1] > 0. {
            totals[0] / totals[1]
        } else {
            0.
        };
        let sum_a = self.sum_a();
        let local = nd::Zip::from(a_psi)
            .and(source)
            .and(&sum_a)
            .fold(0., |total, &a_psi, &source, &sum_a| {
                total + (a_psi - x_ref * sum_a).abs() + (source - x_ref * sum_a).abs()
            });
        self.comm.sum(local) + NORM_FACTOR_FLOOR
    }

    /// Sum over all ranks of the magnitudes of `values`.
    pub fn g_sum_mag(&self, values: &nd::Array1<Float>) -> Float {
        self.comm.sum(values.iter().map(|value| value.abs()).sum())
    }

    /// Sum over all ranks of `a·b`.
    pub fn g_sum_prod(&self, a: &nd::Array1<Float>, b: &nd::Array1<Float>) -> Float {
        self.comm.sum(a.dot(b))
    }
}
