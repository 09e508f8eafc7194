use serde_json::Map;

use super::{ResidualControl, Residuals, SolutionControls, StopFlag, Time};
use crate::dictionary::{key_matches, read_count_or};
use crate::parallel::Comm;
use crate::{Float, FvResult};

/// Iterations of a steady solution, one per pseudo time step, ending at the end time or once
/// the initial residual of every controlled field is below its tolerance.
#[derive(Clone, Debug)]
pub struct SimpleControl {
    n_non_orthogonal_correctors: usize,
    residual_control: Vec<(String, ResidualControl)>,
    reference_cell: usize,
    reference_value: Float,
    corr_non_orthogonal: usize,
    converged: bool,
    stopped: bool,
}

impl SimpleControl {
    pub fn new(solution: &SolutionControls) -> FvResult<Self> {
        let mut control = Self {
            n_non_orthogonal_correctors: 0,
            residual_control: Vec::new(),
            reference_cell: 0,
            reference_value: 0.,
            corr_non_orthogonal: 0,
            converged: false,
            stopped: false,
        };
        control.read(solution)?;
        Ok(control)
    }

    pub fn read(&mut self, solution: &SolutionControls) -> FvResult<()> {
        let empty = Map::new();
        let dict = solution.algorithm("SIMPLE")?.unwrap_or(&empty);
        self.n_non_orthogonal_correctors =
            read_count_or(dict, "SIMPLE", "nNonOrthogonalCorrectors", 0)?;
        self.residual_control = ResidualControl::read_all(dict, "SIMPLE")?;
        self.reference_cell = read_count_or(dict, "SIMPLE", "pRefCell", 0)?;
        self.reference_value = dict.get("pRefValue").and_then(|v| v.as_f64()).unwrap_or(0.);
        Ok(())
    }

    pub fn n_non_orthogonal_correctors(&self) -> usize {
        self.n_non_orthogonal_correctors
    }

    pub fn reference(&self) -> (usize, Float) {
        (self.reference_cell, self.reference_value)
    }

    pub fn converged(&self) -> bool {
        self.converged
    }

    pub fn stopped(&self) -> bool {
        self.stopped
    }

    /// Starts the next iteration; false once converged, stopped or out of time.
    pub fn outer_loop(
        &mut self,
        time: &mut Time,
        residuals: &mut Residuals,
        stop: &StopFlag,
        comm: &Comm,
    ) -> bool {
        if time.time_index() > 0 {
            if self.criteria_satisfied(residuals) {
                log::info!(
                    "SIMPLE solution converged in {} iterations",
                    time.time_index()
                );
                self.converged = true;
                return false;
            }
            if stop.requested(comm) {
                self.stopped = true;
                return false;
            }
        }
        residuals.reset();
        time.step()
    }

    fn criteria_satisfied(&self, residuals: &Residuals) -> bool {
        if self.residual_control.is_empty() {
            return false;
        }
        let mut checked = false;
        let mut achieved = true;
        for field in residuals.fields() {
            let Some((_, control)) = self
                .residual_control
                .iter()
                .find(|(pattern, _)| key_matches(pattern, field))
            else {
                continue;
            };
            if let Some(performance) = residuals.initial(field) {
                checked = true;
                achieved &= performance.initial_residual < control.tolerance;
            }
        }
        checked && achieved
    }

    /// Next solve of an equation needing non-orthogonal correction; runs
    /// `nNonOrthogonalCorrectors + 1` times.
    pub fn correct_non_orthogonal(&mut self) -> bool {
        self.corr_non_orthogonal += 1;
        if self.corr_non_orthogonal <= self.n_non_orthogonal_correctors + 1 {
            true
        } else {
            self.corr_non_orthogonal = 0;
            false
        }
    }

    pub fn final_non_orthogonal_iter(&self) -> bool {
        self.corr_non_orthogonal == self.n_non_orthogonal_correctors + 1
    }
}
