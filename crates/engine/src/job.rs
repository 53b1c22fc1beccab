//! Export job execution
//!
//! A dedicated tokio runtime runs each export on its blocking pool and
//! hands back an observable job handle. Jobs are independent: nothing
//! about submission order carries over to completion order, and each
//! writes only its own named output.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{info, warn};

use crate::error::{EngineError, Result};
use crate::export::{ImageExport, TableExport};

/// Lifecycle of one export job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Running,
    Succeeded,
    Failed(String),
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed(_))
    }
}

/// Runs export jobs on a blocking pool until dropped
pub struct ExportRunner {
    rt: tokio::runtime::Runtime,
    next_id: AtomicU64,
}

impl ExportRunner {
    pub fn new() -> Result<Self> {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .thread_name("defolia-export")
            .build()
            .map_err(|e| EngineError::Runtime(e.to_string()))?;
        Ok(Self {
            rt,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn submit_table(&self, job: TableExport) -> JobHandle {
        let description = job.description.clone();
        self.submit(description, move || job.run().map(|_| ()))
    }

    pub fn submit_image(&self, job: ImageExport) -> JobHandle {
        let description = job.description.clone();
        self.submit(description, move || job.run().map(|_| ()))
    }

    fn submit(
        &self,
        description: String,
        work: impl FnOnce() -> Result<()> + Send + 'static,
    ) -> JobHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let state = Arc::new(Mutex::new(JobState::Pending));
        let task_state = state.clone();
        let task_description = description.clone();
        info!(id, job = %description, "export submitted");

        let task = self.rt.spawn_blocking(move || {
            *lock_unpoisoned(&task_state) = JobState::Running;
            match work() {
                Ok(()) => {
                    info!(id, job = %task_description, "export finished");
                    *lock_unpoisoned(&task_state) = JobState::Succeeded;
                }
                Err(e) => {
                    warn!(id, job = %task_description, error = %e, "export failed");
                    *lock_unpoisoned(&task_state) = JobState::Failed(e.to_string());
                }
            }
        });

        JobHandle {
            id,
            description,
            state,
            runtime: self.rt.handle().clone(),
            task,
        }
    }
}

/// Observer for one submitted job
pub struct JobHandle {
    id: u64,
    description: String,
    state: Arc<Mutex<JobState>>,
    runtime: tokio::runtime::Handle,
    task: tokio::task::JoinHandle<()>,
}

impl JobHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Current state, without waiting
    pub fn state(&self) -> JobState {
        lock_unpoisoned(&self.state).clone()
    }

    /// Block until the job reaches a terminal state and return it
    pub fn wait(self) -> JobState {
        if self.runtime.block_on(self.task).is_err() {
            *lock_unpoisoned(&self.state) = JobState::Failed("export task panicked".to_string());
        }
        lock_unpoisoned(&self.state).clone()
    }
}

// a poisoned state lock only ever holds a fully written variant
fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use defolia_core::io::TableFormat;
    use defolia_core::{Feature, FeatureCollection};

    fn table_job(folder: std::path::PathBuf, name: &str) -> TableExport {
        TableExport {
            collection: FeatureCollection::from_features(vec![
                Feature::empty().with_property("year", 2021)
            ]),
            description: name.to_string(),
            folder,
            format: TableFormat::Csv,
            selectors: vec!["year".to_string()],
        }
    }

    #[test]
    fn test_submitted_job_completes() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ExportRunner::new().unwrap();

        let handle = runner.submit_table(table_job(dir.path().to_path_buf(), "area_2021"));
        assert_eq!(handle.description(), "area_2021");

        let state = handle.wait();
        assert_eq!(state, JobState::Succeeded);
        assert!(dir.path().join("area_2021.csv").exists());
    }

    #[test]
    fn test_failed_job_reports_reason() {
        let dir = tempfile::tempdir().unwrap();
        // occupy the folder path with a plain file
        let blocked = dir.path().join("not_a_dir");
        std::fs::write(&blocked, b"x").unwrap();

        let runner = ExportRunner::new().unwrap();
        let handle = runner.submit_table(table_job(blocked.join("deeper"), "blocked"));

        match handle.wait() {
            JobState::Failed(reason) => assert!(!reason.is_empty()),
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[test]
    fn test_jobs_run_independently() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ExportRunner::new().unwrap();

        let first = runner.submit_table(table_job(dir.path().to_path_buf(), "roc_2020"));
        let second = runner.submit_table(table_job(dir.path().to_path_buf(), "roc_2021"));
        assert_ne!(first.id(), second.id());

        assert_eq!(first.wait(), JobState::Succeeded);
        assert_eq!(second.wait(), JobState::Succeeded);
        assert!(dir.path().join("roc_2020.csv").exists());
        assert!(dir.path().join("roc_2021.csv").exists());
    }
}
