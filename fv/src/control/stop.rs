use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::parallel::Comm;

/// Asks a running case to stop at the end of the current outer iteration.
///
/// The flag is set from another thread (a signal handler, a driver) or by creating the stop
/// file. Ranks agree on the answer through one reduction per check.
#[derive(Clone, Debug, Default)]
pub struct StopFlag {
    flag: Arc<AtomicBool>,
    stop_file: Option<PathBuf>,
}

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stop_file(self, path: impl Into<PathBuf>) -> Self {
        Self {
            stop_file: Some(path.into()),
            ..self
        }
    }

    pub fn request(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    fn requested_locally(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
            || self
                .stop_file
                .as_ref()
                .is_some_and(|path| path.exists())
    }

    /// Whether any rank was asked to stop.
    pub fn requested(&self, comm: &Comm) -> bool {
        let requested = comm.any(self.requested_locally());
        if requested {
            log::info!("Stop requested, finishing the current step");
        }
        requested
    }
}
