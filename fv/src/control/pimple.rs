use std::collections::BTreeMap;

use serde_json::Map;

use super::{ResidualControl, Residuals, SolutionControls, StopFlag};
use crate::dictionary::{key_matches, read_count_or, read_switch_or};
use crate::parallel::Comm;
use crate::{Float, FvResult};

/// Outer, pressure and non-orthogonal corrector loops of a transient pressure-velocity
/// solution.
///
/// ```ignore
/// while pimple.outer_loop(&mut residuals, &stop, comm) {
///     // momentum predictor
///     while pimple.correct() {
///         while pimple.correct_non_orthogonal() {
///             // pressure equation
///         }
///     }
/// }
/// ```
///
/// With a `residualControl`, the time step ends early once every criterion holds: one more
/// outer iteration is run as the final one, with the `Final` solver settings and relaxation.
#[derive(Clone, Debug)]
pub struct PimpleControl {
    algorithm: String,
    n_outer_correctors: usize,
    n_correctors: usize,
    n_non_orthogonal_correctors: usize,
    momentum_predictor: bool,
    residual_control: Vec<(String, ResidualControl)>,
    reference_cell: usize,
    reference_value: Float,
    corr: usize,
    corr_piso: usize,
    corr_non_orthogonal: usize,
    converged: bool,
    stopped: bool,
    first_residuals: BTreeMap<String, Float>,
}

impl PimpleControl {
    /// Reads the `PIMPLE` dictionary, or `PISO` when there is none.
    pub fn new(solution: &SolutionControls) -> FvResult<Self> {
        let mut control = Self {
            algorithm: "PIMPLE".to_owned(),
            n_outer_correctors: 1,
            n_correctors: 1,
            n_non_orthogonal_correctors: 0,
            momentum_predictor: true,
            residual_control: Vec::new(),
            reference_cell: 0,
            reference_value: 0.,
            corr: 0,
            corr_piso: 0,
            corr_non_orthogonal: 0,
            converged: false,
            stopped: false,
            first_residuals: BTreeMap::new(),
        };
        control.read(solution)?;
        Ok(control)
    }

    /// Takes over changed settings while keeping the loop state.
    pub fn read(&mut self, solution: &SolutionControls) -> FvResult<()> {
        let empty = Map::new();
        let (algorithm, dict) = match solution.algorithm("PIMPLE")? {
            Some(dict) => ("PIMPLE", dict),
            None => match solution.algorithm("PISO")? {
                Some(dict) => ("PISO", dict),
                None => ("PIMPLE", &empty),
            },
        };
        self.algorithm = algorithm.to_owned();
        self.n_outer_correctors = read_count_or(dict, algorithm, "nOuterCorrectors", 1)?.max(1);
        self.n_correctors = read_count_or(dict, algorithm, "nCorrectors", 1)?;
        self.n_non_orthogonal_correctors =
            read_count_or(dict, algorithm, "nNonOrthogonalCorrectors", 0)?;
        self.momentum_predictor = read_switch_or(dict, algorithm, "momentumPredictor", true)?;
        self.residual_control = ResidualControl::read_all(dict, algorithm)?;
        self.reference_cell = read_count_or(dict, algorithm, "pRefCell", 0)?;
        self.reference_value = dict.get("pRefValue").and_then(|v| v.as_f64()).unwrap_or(0.);
        Ok(())
    }

    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    pub fn n_outer_correctors(&self) -> usize {
        self.n_outer_correctors
    }

    pub fn n_correctors(&self) -> usize {
        self.n_correctors
    }

    pub fn n_non_orthogonal_correctors(&self) -> usize {
        self.n_non_orthogonal_correctors
    }

    pub fn momentum_predictor(&self) -> bool {
        self.momentum_predictor
    }

    /// The cell, numbered on the undecomposed mesh, and value pinning the pressure level.
    pub fn reference(&self) -> (usize, Float) {
        (self.reference_cell, self.reference_value)
    }

    /// The current outer iteration, counted from 1.
    pub fn corr(&self) -> usize {
        self.corr
    }

    pub fn first_iter(&self) -> bool {
        self.corr == 1
    }

    /// Whether this outer iteration is the last of the time step.
    pub fn final_iter(&self) -> bool {
        self.converged || self.corr >= self.n_outer_correctors
    }

    pub fn final_corrector(&self) -> bool {
        self.corr_piso >= self.n_correctors
    }

    pub fn final_non_orthogonal_iter(&self) -> bool {
        self.corr_non_orthogonal == self.n_non_orthogonal_correctors + 1
    }

    /// The last pressure solve of the time step.
    pub fn final_inner_iter(&self) -> bool {
        self.final_iter() && self.final_corrector() && self.final_non_orthogonal_iter()
    }

    /// Whether a stop request ended the last outer loop.
    pub fn stopped(&self) -> bool {
        self.stopped
    }

    /// Starts the next outer iteration; false once the time step is done.
    ///
    /// Resets `residuals` for the new iteration after checking the criteria against them.
    pub fn outer_loop(&mut self, residuals: &mut Residuals, stop: &StopFlag, comm: &Comm) -> bool {
        self.corr += 1;
        if self.corr > 1 && stop.requested(comm) {
            self.stopped = true;
            self.finish();
            return false;
        }
        if self.corr == self.n_outer_correctors + 1 {
            if !self.residual_control.is_empty() && self.n_outer_correctors > 1 {
                log::info!(
                    "{}: not converged within {} iterations",
                    self.algorithm,
                    self.n_outer_correctors
                );
            }
            self.finish();
            return false;
        }
        if self.converged {
            log::info!("{}: converged in {} iterations", self.algorithm, self.corr - 1);
            self.finish();
            return false;
        }
        if self.corr > 1 && self.criteria_satisfied(residuals) {
            self.converged = true;
        }
        residuals.reset();
        log::info!("{}: iteration {}", self.algorithm, self.corr);
        true
    }

    fn finish(&mut self) {
        self.corr = 0;
        self.converged = false;
        self.first_residuals.clear();
    }

    /// Every field with a criterion has either an initial residual below its tolerance or one
    /// that dropped by `relTol` since the first outer iteration.
    fn criteria_satisfied(&mut self, residuals: &Residuals) -> bool {
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
            let Some(performance) = residuals.initial(field) else {
                continue;
            };
            let residual = performance.initial_residual;
            let first = *self
                .first_residuals
                .entry(field.to_owned())
                .or_insert(residual);
            let relative = residual / first.max(crate::VSMALL);
            let absolute_check = residual < control.tolerance;
            let relative_check = control.rel_tol > 0. && relative < control.rel_tol;
            log::debug!(
                "{}: {field} residual = {residual:e}, relative = {relative:e}",
                self.algorithm
            );
            checked = true;
            achieved &= absolute_check || relative_check;
        }
        checked && achieved
    }

    /// Next pressure corrector; false once `nCorrectors` have run.
    pub fn correct(&mut self) -> bool {
        self.corr_piso += 1;
        if self.corr_piso <= self.n_correctors {
            true
        } else {
            self.corr_piso = 0;
            false
        }
    }

    /// Next solve of the pressure equation within a corrector; runs
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::SolverPerformance;

    fn pimple(document: serde_json::Value) -> PimpleControl {
        PimpleControl::new(&SolutionControls::from_json(&document).unwrap()).unwrap()
    }

    fn record(residuals: &mut Residuals, field: &str, initial_residual: Float) {
        let mut performance = SolverPerformance::new("PCG", field);
        performance.initial_residual = initial_residual;
        residuals.record(field, &performance);
    }

    #[test]
    fn test_fixed_number_of_iterations() {
        let mut control = pimple(serde_json::json!({
            "PIMPLE": {"nOuterCorrectors": 3, "nCorrectors": 2, "nNonOrthogonalCorrectors": 1}
        }));
        let (mut residuals, stop, comm) = (Residuals::new(), StopFlag::new(), Comm::serial());
        let mut finals = Vec::new();
        let mut n_pressure_solves = 0;
        let mut n_final_inner = 0;
        while control.outer_loop(&mut residuals, &stop, &comm) {
            finals.push(control.final_iter());
            while control.correct() {
                while control.correct_non_orthogonal() {
                    n_pressure_solves += 1;
                    if control.final_inner_iter() {
                        n_final_inner += 1;
                    }
                }
            }
        }
        assert_eq!(finals, [false, false, true]);
        assert_eq!(n_pressure_solves, 3 * 2 * 2);
        assert_eq!(n_final_inner, 1);
        // The next time step starts over.
        assert!(control.outer_loop(&mut residuals, &stop, &comm));
        assert!(control.first_iter());
    }

    #[test]
    fn test_converged_outer_loop_runs_a_final_iteration() {
        let mut control = pimple(serde_json::json!({
            "PIMPLE": {"nOuterCorrectors": 50, "residualControl": {"p": {"tolerance": 1e-3, "relTol": 0}}}
        }));
        let (mut residuals, stop, comm) = (Residuals::new(), StopFlag::new(), Comm::serial());
        let mut iterations = 0;
        let mut residual = 1.;
        while control.outer_loop(&mut residuals, &stop, &comm) {
            iterations += 1;
            record(&mut residuals, "p", residual);
            residual /= 10.;
            if iterations == 10 {
                break;
            }
        }
        // Residuals 1, 0.1, 0.01, 0.001, 1e-4: the fifth passes, then one final iteration.
        assert_eq!(iterations, 6);
    }

    #[test]
    fn test_relative_criterion() {
        let mut control = pimple(serde_json::json!({
            "PIMPLE": {"nOuterCorrectors": 50, "residualControl": {"(U|p)": {"tolerance": 0, "relTol": 0.5}}}
        }));
        let (mut residuals, stop, comm) = (Residuals::new(), StopFlag::new(), Comm::serial());
        let mut iterations = 0;
        let mut saw_final = false;
        while control.outer_loop(&mut residuals, &stop, &comm) {
            iterations += 1;
            saw_final |= control.final_iter();
            record(&mut residuals, "U", 1. / iterations as Float);
            record(&mut residuals, "p", 1.);
        }
        // p never drops, so all 50 iterations run.
        assert_eq!(iterations, 50);
        assert!(saw_final);
    }

    #[test]
    fn test_stop_request() {
        let mut control = pimple(serde_json::json!({"PIMPLE": {"nOuterCorrectors": 5}}));
        let (mut residuals, stop, comm) = (Residuals::new(), StopFlag::new(), Comm::serial());
        assert!(control.outer_loop(&mut residuals, &stop, &comm));
        stop.request();
        assert!(!control.outer_loop(&mut residuals, &stop, &comm));
        assert!(control.stopped());
    }

    #[test]
    fn test_piso_defaults() {
        let control = pimple(serde_json::json!({
            "PISO": {"nCorrectors": 2, "momentumPredictor": "no", "pRefCell": 3, "pRefValue": 1.5}
        }));
        assert_eq!(control.algorithm(), "PISO");
        assert_eq!(control.n_outer_correctors(), 1);
        assert_eq!(control.n_correctors(), 2);
        assert!(!control.momentum_predictor());
        assert_eq!(control.reference(), (3, 1.5));
    }
}
