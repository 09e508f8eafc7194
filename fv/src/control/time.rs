use serde_json::{Map, Value as Json};

use crate::dictionary::read_scalar;
use crate::{Float, FvError, FvResult};

/// Simulated time, its step size and the index of the current step.
///
/// `delta_t0` is the size of the previous step, needed by second-order schemes when the step
/// size changes.
#[derive(Clone, Debug, PartialEq)]
pub struct Time {
    value: Float,
    end_time: Float,
    delta_t: Float,
    delta_t_save: Float,
    delta_t0: Float,
    time_index: usize,
}

impl Time {
    pub fn new(start_time: Float, end_time: Float, delta_t: Float) -> FvResult<Self> {
        if delta_t <= 0. || delta_t.is_nan() {
            return Err(FvError::invalid(
                "controlDict",
                "deltaT",
                format!("time step must be positive, got {delta_t}"),
            ));
        }
        Ok(Self {
            value: start_time,
            end_time,
            delta_t,
            delta_t_save: delta_t,
            delta_t0: delta_t,
            time_index: 0,
        })
    }

    /// Pseudo-time for steady iterations: one unit per iteration.
    pub fn steady(n_iterations: usize) -> Self {
        Self {
            value: 0.,
            end_time: n_iterations as Float,
            delta_t: 1.,
            delta_t_save: 1.,
            delta_t0: 1.,
            time_index: 0,
        }
    }

    /// Reads `startTime`, `endTime` and `deltaT` from a `controlDict`-style dictionary.
    pub fn from_dict(dict: &Map<String, Json>) -> FvResult<Self> {
        let start_time = match dict.get("startTime") {
            Some(_) => read_scalar(dict, "controlDict", "startTime")?,
            None => 0.,
        };
        Self::new(
            start_time,
            read_scalar(dict, "controlDict", "endTime")?,
            read_scalar(dict, "controlDict", "deltaT")?,
        )
    }

    pub fn value(&self) -> Float {
        self.value
    }

    pub fn end_time(&self) -> Float {
        self.end_time
    }

    pub fn delta_t(&self) -> Float {
        self.delta_t
    }

    pub fn delta_t0(&self) -> Float {
        self.delta_t0
    }

    pub fn r_delta_t(&self) -> Float {
        1. / self.delta_t
    }

    pub fn time_index(&self) -> usize {
        self.time_index
    }

    pub fn set_delta_t(&mut self, delta_t: Float) {
        self.delta_t = delta_t;
    }

    /// Whether another step fits before the end time.
    pub fn run(&self) -> bool {
        self.value < self.end_time - 0.5 * self.delta_t
    }

    pub fn advance(&mut self) {
        self.delta_t0 = self.delta_t_save;
        self.delta_t_save = self.delta_t;
        self.value += self.delta_t;
        self.time_index += 1;
        log::info!("Time = {}", self.value);
    }

    /// Advances when there is time left; for use as `while time.step() { ... }`.
    pub fn step(&mut self) -> bool {
        let running = self.run();
        if running {
            self.advance();
        }
        running
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_stepping() {
        let mut time = Time::new(0., 1., 0.25).unwrap();
        let mut n_steps = 0;
        while time.step() {
            n_steps += 1;
        }
        assert_eq!(n_steps, 4);
        assert_eq!(time.time_index(), 4);
        assert_relative_eq!(time.value(), 1.);
    }

    #[test]
    fn test_previous_step_size() {
        let mut time = Time::new(0., 10., 1.).unwrap();
        time.advance();
        assert_eq!(time.delta_t0(), 1.);
        time.set_delta_t(0.5);
        time.advance();
        assert_eq!(time.delta_t0(), 1.);
        assert_eq!(time.delta_t(), 0.5);
        time.advance();
        assert_eq!(time.delta_t0(), 0.5);
    }

    #[test]
    fn test_from_dict() {
        let dict = serde_json::json!({"endTime": 2, "deltaT": 0.1});
        let time = Time::from_dict(dict.as_object().unwrap()).unwrap();
        assert_eq!(time.value(), 0.);
        assert_eq!(time.end_time(), 2.);
        assert!(Time::new(0., 1., 0.).is_err());
    }
}
