use crate::error::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Shared progress and cancellation handle for a running search.
///
/// Clones point at the same state, so a caller can keep one clone to poll
/// progress or cancel while the optimizer holds another.
#[derive(Clone, Default)]
pub struct OptimizerStatus {
    inner: Arc<Mutex<OptimizerStatusData>>,
    cancelled: Arc<AtomicBool>,
}

#[derive(Default)]
struct OptimizerStatusData {
    phase: String,
    total_evaluations: usize,
    completed_evaluations: usize,
    best_score: Option<f64>,
    deadline: Option<Instant>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct OptimizerStatusSnapshot {
    pub phase: String,
    pub total_evaluations: usize,
    pub completed_evaluations: usize,
    pub best_score: Option<f64>,
    pub cancelled: bool,
}

impl OptimizerStatus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(OptimizerStatusData {
                phase: "Initializing".to_string(),
                ..Default::default()
            })),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Searches still running `timeout` from now stop at their next checkpoint.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        if let Ok(mut data) = self.inner.lock() {
            data.deadline = Instant::now().checked_add(timeout);
        }
        self
    }

    pub fn set_phase<S: Into<String>>(&self, phase: S) {
        if let Ok(mut data) = self.inner.lock() {
            data.phase = phase.into();
        }
    }

    pub fn set_progress(&self, total: usize, completed: usize, best_score: Option<f64>) {
        if let Ok(mut data) = self.inner.lock() {
            data.total_evaluations = total;
            data.completed_evaluations = completed;
            data.best_score = best_score;
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        if self.cancelled.load(Ordering::SeqCst) {
            return true;
        }
        let expired = self
            .inner
            .lock()
            .ok()
            .and_then(|data| data.deadline)
            .map(|deadline| Instant::now() >= deadline)
            .unwrap_or(false);
        if expired {
            self.cancel();
        }
        expired
    }

    /// Checkpoint used between search steps.
    pub fn ensure_active(&self) -> Result<()> {
        if self.is_cancelled() {
            self.set_phase("Cancelled");
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    pub fn snapshot(&self) -> OptimizerStatusSnapshot {
        let cancelled = self.cancelled.load(Ordering::SeqCst);
        if let Ok(data) = self.inner.lock() {
            OptimizerStatusSnapshot {
                phase: data.phase.clone(),
                total_evaluations: data.total_evaluations,
                completed_evaluations: data.completed_evaluations,
                best_score: data.best_score,
                cancelled,
            }
        } else {
            OptimizerStatusSnapshot {
                phase: "Status unavailable".to_string(),
                total_evaluations: 0,
                completed_evaluations: 0,
                best_score: None,
                cancelled,
            }
        }
    }
}
