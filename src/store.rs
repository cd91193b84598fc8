//! Persistence contract for completed runs.

use std::sync::{Arc, Mutex};

use crate::{CompletedRun, Result, RunId, RunTrackError};

/// Destination for completed runs.
///
/// A save is atomic from the engine's point of view: it either stores the
/// whole record and returns its id, or fails without leaving a partial row.
pub trait RunStore: Send {
    fn save_completed_run(&mut self, run: &CompletedRun) -> Result<RunId>;
}

/// In-process store. Clones share the same runs.
#[derive(Debug, Clone, Default)]
pub struct MemoryRunStore {
    runs: Arc<Mutex<Vec<(RunId, CompletedRun)>>>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Saved runs in save order.
    pub fn runs(&self) -> Vec<(RunId, CompletedRun)> {
        self.runs
            .lock()
            .map(|runs| runs.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.runs.lock().map(|runs| runs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RunStore for MemoryRunStore {
    fn save_completed_run(&mut self, run: &CompletedRun) -> Result<RunId> {
        let mut runs = self
            .runs
            .lock()
            .map_err(|_| RunTrackError::PersistenceFailure {
                message: "run store lock poisoned".to_string(),
            })?;
        let id = runs.len() as RunId + 1;
        runs.push((id, run.clone()));
        Ok(id)
    }
}
