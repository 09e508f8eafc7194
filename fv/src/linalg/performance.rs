use std::fmt;

use crate::{Float, FvError, FvResult};

/// Outcome of one linear solve, or of the solves of all components of an equation.
#[derive(Clone, Debug, PartialEq)]
pub struct SolverPerformance {
    pub solver: String,
    pub field: String,
    pub initial_residual: Float,
    pub final_residual: Float,
    pub n_iterations: usize,
    pub converged: bool,
    pub singular: bool,
}

impl SolverPerformance {
    pub fn new(solver: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            solver: solver.into(),
            field: field.into(),
            initial_residual: 0.,
            final_residual: 0.,
            n_iterations: 0,
            converged: false,
            singular: false,
        }
    }

    /// Converged when the residual is below `tolerance`, or has dropped by `rel_tol`.
    pub fn check_convergence(&mut self, tolerance: Float, rel_tol: Float) -> bool {
        self.converged = self.final_residual < tolerance
            || (rel_tol > 0. && self.final_residual < rel_tol * self.initial_residual);
        self.converged
    }

    /// Combines the performance of several components: the worst residuals and most iterations.
    pub fn merge(&self, other: &Self) -> Self {
        Self {
            solver: self.solver.clone(),
            field: self.field.clone(),
            initial_residual: self.initial_residual.max(other.initial_residual),
            final_residual: self.final_residual.max(other.final_residual),
            n_iterations: self.n_iterations.max(other.n_iterations),
            converged: self.converged && other.converged,
            singular: self.singular || other.singular,
        }
    }

    /// Fails with `NotConverged` unless the final residual met the tolerance, whether or not
    /// the solver broke down on the way.
    pub fn require_converged(&self) -> FvResult<()> {
        if self.converged {
            Ok(())
        } else {
            Err(FvError::NotConverged {
                solver: self.solver.clone(),
                field: self.field.clone(),
                final_residual: self.final_residual,
                iterations: self.n_iterations,
            })
        }
    }
}

impl fmt::Display for SolverPerformance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:  Solving for {}, Initial residual = {:e}, Final residual = {:e}, No Iterations {}",
            self.solver, self.field, self.initial_residual, self.final_residual, self.n_iterations
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convergence_and_merge() {
        let mut x = SolverPerformance::new("PCG", "Ux");
        x.initial_residual = 1.;
        x.final_residual = 0.05;
        assert!(!x.check_convergence(1e-6, 0.));
        assert!(x.check_convergence(1e-6, 0.1));
        assert!(x.require_converged().is_ok());

        let mut y = SolverPerformance::new("PCG", "Uy");
        y.initial_residual = 0.5;
        y.final_residual = 0.2;
        y.n_iterations = 7;
        assert!(!y.check_convergence(1e-6, 0.1));
        let merged = x.merge(&y);
        assert_eq!(merged.initial_residual, 1.);
        assert_eq!(merged.n_iterations, 7);
        assert!(matches!(
            merged.require_converged(),
            Err(FvError::NotConverged { iterations: 7, .. })
        ));
        assert!(merged.to_string().starts_with("PCG:  Solving for Ux, Initial residual = 1e0"));
    }

    #[test]
    fn test_breakdown_is_not_convergence() {
        let mut broken = SolverPerformance::new("PBiCGStab", "T");
        broken.initial_residual = 1.;
        broken.final_residual = 1e-3;
        broken.singular = true;
        assert!(!broken.check_convergence(1e-12, 0.));
        assert!(matches!(
            broken.require_converged(),
            Err(FvError::NotConverged { .. })
        ));
        broken.final_residual = 1e-13;
        assert!(broken.check_convergence(1e-12, 0.));
        assert!(broken.require_converged().is_ok());
    }
}
