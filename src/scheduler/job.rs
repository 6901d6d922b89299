use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::scheduler::resource::ResourceDir;

pub type JobId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Succeeded => write!(f, "succeeded"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// A plot process the supervisor has started and not yet reaped.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub pid: Option<u32>,
    pub temp_dir: Arc<ResourceDir>,
    pub dest_dir: Arc<ResourceDir>,
    pub status: JobStatus,
    pub started_at: DateTime<Utc>,
}

impl Job {
    pub fn new(temp_dir: Arc<ResourceDir>, dest_dir: Arc<ResourceDir>) -> Self {
        Self {
            id: Uuid::new_v4(),
            pid: None,
            temp_dir,
            dest_dir,
            status: JobStatus::Pending,
            started_at: Utc::now(),
        }
    }

    /// Record a successful start.
    pub fn mark_running(&mut self, pid: Option<u32>) {
        self.pid = pid;
        self.status = JobStatus::Running;
        self.started_at = Utc::now();
    }

    /// Hold this job's reservation in both of its directories.
    pub fn reserve(&self) {
        self.temp_dir.reserve(self.id);
        self.dest_dir.reserve(self.id);
    }

    /// Give back this job's reservation in both of its directories.
    pub fn release(&self) {
        self.temp_dir.release(&self.id);
        self.dest_dir.release(&self.id);
    }

    pub fn summary(&self) -> JobSummary {
        JobSummary {
            id: self.id,
            pid: self.pid,
            temp_dir: self.temp_dir.path().to_path_buf(),
            dest_dir: self.dest_dir.path().to_path_buf(),
            status: self.status,
            started_at: self.started_at,
        }
    }
}

/// Plain-data view of a [`Job`] for reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobSummary {
    pub id: JobId,
    pub pid: Option<u32>,
    pub temp_dir: PathBuf,
    pub dest_dir: PathBuf,
    pub status: JobStatus,
    pub started_at: DateTime<Utc>,
}
