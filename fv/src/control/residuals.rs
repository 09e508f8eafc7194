use std::collections::BTreeMap;

use crate::linalg::SolverPerformance;

/// First and last solver performance of each field since the last reset.
///
/// Outer loops reset at the start of every outer iteration and compare the recorded
/// residuals against their convergence criteria at the end.
#[derive(Clone, Debug, Default)]
pub struct Residuals {
    fields: BTreeMap<String, (SolverPerformance, SolverPerformance)>,
}

impl Residuals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.fields.clear();
    }

    pub fn record(&mut self, field: &str, performance: &SolverPerformance) {
        self.fields
            .entry(field.to_owned())
            .and_modify(|(_, last)| *last = performance.clone())
            .or_insert_with(|| (performance.clone(), performance.clone()));
    }

    /// Initial residual of the first solve of `field`.
    pub fn initial(&self, field: &str) -> Option<&SolverPerformance> {
        self.fields.get(field).map(|(first, _)| first)
    }

    /// Initial residual of the most recent solve of `field`.
    pub fn last(&self, field: &str) -> Option<&SolverPerformance> {
        self.fields.get(field).map(|(_, last)| last)
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn performance(initial_residual: f64) -> SolverPerformance {
        let mut performance = SolverPerformance::new("PCG", "p");
        performance.initial_residual = initial_residual;
        performance
    }

    #[test]
    fn test_first_and_last() {
        let mut residuals = Residuals::new();
        residuals.record("p", &performance(1.));
        residuals.record("p", &performance(0.1));
        residuals.record("p", &performance(0.01));
        assert_eq!(residuals.initial("p").unwrap().initial_residual, 1.);
        assert_eq!(residuals.last("p").unwrap().initial_residual, 0.01);
        assert_eq!(residuals.fields().collect::<Vec<_>>(), ["p"]);
        residuals.reset();
        assert!(residuals.is_empty());
        assert!(residuals.initial("p").is_none());
    }
}
