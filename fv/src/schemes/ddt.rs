use crate::control::Time;
use crate::Float;

#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::EnumString, strum::Display, strum::EnumIter)]
pub enum DdtScheme {
    Euler,
    #[strum(serialize = "backward")]
    Backward,
    #[strum(serialize = "steadyState")]
    SteadyState,
}

/// Time derivative as `r_delta_t*(coeff*psi - coeff_0*psi_0 + coeff_00*psi_00)`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DdtCoeffs {
    pub r_delta_t: Float,
    pub coeff: Float,
    pub coeff_0: Float,
    pub coeff_00: Float,
}

impl DdtScheme {
    /// Coefficients for a field with `n_old_times` stored time levels.
    ///
    /// Backward differencing falls back to Euler until two old levels exist.
    pub fn coeffs(self, time: &Time, n_old_times: usize) -> DdtCoeffs {
        let euler = DdtCoeffs {
            r_delta_t: time.r_delta_t(),
            coeff: 1.,
            coeff_0: 1.,
            coeff_00: 0.,
        };
        match self {
            Self::Euler => euler,
            Self::Backward if n_old_times < 2 => euler,
            Self::Backward => {
                let (delta_t, delta_t0) = (time.delta_t(), time.delta_t0());
                let coeff = 1. + delta_t / (delta_t + delta_t0);
                let coeff_00 = delta_t * delta_t / (delta_t0 * (delta_t + delta_t0));
                DdtCoeffs {
                    r_delta_t: time.r_delta_t(),
                    coeff,
                    coeff_0: coeff + coeff_00,
                    coeff_00,
                }
            }
            Self::SteadyState => DdtCoeffs {
                r_delta_t: 0.,
                coeff: 0.,
                coeff_0: 0.,
                coeff_00: 0.,
            },
        }
    }
}
