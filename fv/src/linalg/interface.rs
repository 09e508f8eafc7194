use ndarray as nd;

use crate::parallel::Comm;
use crate::{Float, FvError, FvResult};

/// A coupled boundary through which a matrix row reaches cells that are not its face
/// neighbours: the paired side of a cyclic patch or the cells of another rank.
#[derive(Clone, Debug)]
pub enum LduInterface<'a> {
    Cyclic {
        face_cells: &'a [usize],
        neighbour_cells: &'a [usize],
        /// Part of the transformed neighbour value that stays in the solved component.
        scale: Float,
    },
    Processor {
        face_cells: &'a [usize],
        comm: &'a Comm,
        neighb_rank: usize,
        tag: usize,
    },
}

impl<'a> LduInterface<'a> {
    pub fn face_cells(&self) -> &'a [usize] {
        match self {
            Self::Cyclic { face_cells, .. } | Self::Processor { face_cells, .. } => *face_cells,
        }
    }

    /// Posts the values the other side needs; receives wait until every interface has sent.
    pub fn init_interface_matrix_update(&self, psi: &nd::Array1<Float>) -> FvResult<()> {
        match self {
            Self::Cyclic { .. } => Ok(()),
            Self::Processor {
                face_cells,
                comm,
                neighb_rank,
                tag,
            } => {
                let data = face_cells.iter().map(|&cell| psi[cell]).collect();
                comm.send(*neighb_rank, *tag, data)
            }
        }
    }

    /// Subtracts `coeffs` times the neighbour-side values from the rows next to the interface.
    pub fn update_interface_matrix(
        &self,
        psi: &nd::Array1<Float>,
        result: &mut nd::Array1<Float>,
        coeffs: &nd::Array1<Float>,
    ) -> FvResult<()> {
        match self {
            Self::Cyclic {
                face_cells,
                neighbour_cells,
                scale,
            } => {
                for ((&cell, &neighbour), &coeff) in
                    face_cells.iter().zip(*neighbour_cells).zip(coeffs)
                {
                    result[cell] -= coeff * scale * psi[neighbour];
                }
                Ok(())
            }
            Self::Processor {
                face_cells,
                comm,
                neighb_rank,
                tag,
            } => {
                let neighbour = comm.receive(*neighb_rank, *tag)?;
                if neighbour.len() != face_cells.len() {
                    return Err(FvError::Parallel(format!(
                        "expected {} interface values from rank {neighb_rank}, got {}",
                        face_cells.len(),
                        neighbour.len()
                    )));
                }
                for ((&cell, &value), &coeff) in face_cells.iter().zip(&neighbour).zip(coeffs) {
                    result[cell] -= coeff * value;
                }
                Ok(())
            }
        }
    }
}

/// An interface together with its coefficients for one matrix component.
#[derive(Clone, Debug)]
pub struct CoupledInterface<'a> {
    pub interface: LduInterface<'a>,
    pub coeffs: nd::Array1<Float>,
}

impl<'a> CoupledInterface<'a> {
    pub fn new(interface: LduInterface<'a>, coeffs: nd::Array1<Float>) -> Self {
        Self { interface, coeffs }
    }
}

/// Adds the contribution of every interface to `result`, posting all sends before any receive.
pub fn update_interfaces(
    interfaces: &[CoupledInterface<'_>],
    psi: &nd::Array1<Float>,
    result: &mut nd::Array1<Float>,
) -> FvResult<()> {
    for coupled in interfaces {
        coupled.interface.init_interface_matrix_update(psi)?;
    }
    for coupled in interfaces {
        coupled
            .interface
            .update_interface_matrix(psi, result, &coupled.coeffs)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parallel::run_parallel;

    #[test]
    fn test_cyclic_update() {
        let face_cells = [0];
        let neighbour_cells = [2];
        let interfaces = [CoupledInterface::new(
            LduInterface::Cyclic {
                face_cells: &face_cells,
                neighbour_cells: &neighbour_cells,
                scale: 1.,
            },
            nd::arr1(&[2.]),
        )];
        let psi = nd::arr1(&[1., 2., 3.]);
        let mut result = nd::Array1::zeros(3);
        update_interfaces(&interfaces, &psi, &mut result).unwrap();
        assert_eq!(result, nd::arr1(&[-6., 0., 0.]));
    }

    #[test]
    fn test_processor_update() {
        let results = run_parallel(2, |comm| {
            let face_cells = [comm.rank()];
            let interfaces = [CoupledInterface::new(
                LduInterface::Processor {
                    face_cells: &face_cells,
                    comm: &comm,
                    neighb_rank: 1 - comm.rank(),
                    tag: 0,
                },
                nd::arr1(&[1.]),
            )];
            let psi = nd::arr1(&[10. + comm.rank() as Float, 20. + comm.rank() as Float]);
            let mut result = nd::Array1::zeros(2);
            update_interfaces(&interfaces, &psi, &mut result).unwrap();
            result
        });
        // Rank 0 sends psi[0] = 10 and receives psi[1] = 21 from rank 1.
        assert_eq!(results[0], nd::arr1(&[-21., 0.]));
        assert_eq!(results[1], nd::arr1(&[0., -10.]));
    }
}
