// job boundary: a worker that runs simulation requests against an injected
// store. the core never reaches for a global registry.

use crate::error::{QsimError, Result};
use crate::simulate::{run, SimulationRequest, SimulationResult};
use log::{error, info};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed { result: Box<SimulationResult> },
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub request: SimulationRequest,
    pub status: JobStatus,
}

pub trait JobStore: Send + Sync {
    fn get(&self, id: &str) -> Option<JobRecord>;
    fn put(&self, record: JobRecord);
    /// ids in ascending order
    fn list(&self) -> Vec<String>;
}

#[derive(Debug, Default)]
pub struct MemoryJobStore {
    jobs: RwLock<BTreeMap<String, JobRecord>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobStore for MemoryJobStore {
    fn get(&self, id: &str) -> Option<JobRecord> {
        self.jobs.read().get(id).cloned()
    }

    fn put(&self, record: JobRecord) {
        self.jobs.write().insert(record.id.clone(), record);
    }

    fn list(&self) -> Vec<String> {
        self.jobs.read().keys().cloned().collect()
    }
}

pub struct JobWorker {
    store: Arc<dyn JobStore>,
}

impl JobWorker {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// stores the request as pending without running it
    pub fn submit(&self, id: &str, request: SimulationRequest) {
        self.store.put(JobRecord {
            id: id.to_string(),
            request,
            status: JobStatus::Pending,
        });
    }

    /// runs a job previously stored with `submit`
    pub fn run_submitted(&self, id: &str) -> Result<SimulationResult> {
        let record = self
            .store
            .get(id)
            .ok_or_else(|| QsimError::InvalidParameter(format!("no job {}", id)))?;
        self.run(id, record.request)
    }

    /// records the job as running, simulates, and stores the outcome.
    /// simulation errors are stored as `Failed` and also returned.
    pub fn run(&self, id: &str, request: SimulationRequest) -> Result<SimulationResult> {
        let mut record = JobRecord {
            id: id.to_string(),
            request,
            status: JobStatus::Running,
        };
        self.store.put(record.clone());
        info!("job {} started", id);

        let outcome = run(&record.request);
        record.status = match &outcome {
            Ok(result) => JobStatus::Completed {
                result: Box::new(result.clone()),
            },
            Err(e) => {
                error!("job {} failed: {}", id, e);
                JobStatus::Failed { error: e.to_string() }
            }
        };
        self.store.put(record);
        outcome
    }
}
