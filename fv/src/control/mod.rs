//! Time stepping and the outer iterations wrapped around the linear solves.

mod pimple;
mod residuals;
mod simple;
mod solution;
mod stop;
mod time;

pub use pimple::PimpleControl;
pub use residuals::Residuals;
pub use simple::SimpleControl;
pub use solution::{ReloadableControls, ResidualControl, SolutionControls};
pub use stop::StopFlag;
pub use time::Time;
