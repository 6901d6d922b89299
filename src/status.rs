use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use crate::bytesize::ByteSize;
use crate::scheduler::resource::slots_in;
use crate::scheduler::{JobSummary, ResourceDir, ResourcePool};

/// Point-in-time view of one directory.
#[derive(Debug, Clone, Serialize)]
pub struct DirStatus {
    pub path: PathBuf,
    pub total: ByteSize,
    pub used: ByteSize,
    pub available: ByteSize,
    pub reserved: ByteSize,
    pub reservations: usize,
    pub slots_available: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DirStatus {
    /// Reads the disk once so every figure in the row agrees.
    pub fn collect(dir: &ResourceDir) -> Self {
        let reservations = dir.reservation_count();
        let reserved = dir.reservation_size() * reservations as i64;

        match dir.usage() {
            Ok(usage) => Self {
                path: dir.path().to_path_buf(),
                total: usage.total,
                used: usage.used,
                available: usage.available,
                reserved,
                reservations,
                slots_available: slots_in(usage.available - reserved, dir.reservation_size()),
                error: None,
            },
            Err(e) => Self {
                path: dir.path().to_path_buf(),
                total: ByteSize::ZERO,
                used: ByteSize::ZERO,
                available: ByteSize::ZERO,
                reserved,
                reservations,
                slots_available: 0,
                error: Some(e.to_string()),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PoolStatus {
    pub name: String,
    pub dirs: Vec<DirStatus>,
    pub total_available: ByteSize,
    pub total_slots: i64,
}

impl PoolStatus {
    pub fn collect(pool: &ResourcePool) -> Self {
        let dirs: Vec<DirStatus> = pool
            .members()
            .iter()
            .map(|dir| DirStatus::collect(dir))
            .collect();
        Self {
            name: pool.name().to_string(),
            total_available: dirs.iter().map(|d| d.available).sum(),
            total_slots: dirs.iter().map(|d| d.slots_available).sum(),
            dirs,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub running: usize,
    pub max_concurrency: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub jobs: Vec<JobSummary>,
    pub pools: Vec<PoolStatus>,
}

impl fmt::Display for StatusSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Plots running:\t{} of {}", self.running, self.max_concurrency)?;
        writeln!(f, "Plots finished:\t{}", self.succeeded)?;
        writeln!(f, "Plots failed:\t{}", self.failed)?;
        writeln!(f)?;

        for job in &self.jobs {
            let pid = job
                .pid
                .map(|p| p.to_string())
                .unwrap_or_else(|| "-".to_string());
            writeln!(
                f,
                "[{}] {} since {}\t{} -> {}",
                pid,
                job.status,
                job.started_at.format("%Y-%m-%d %H:%M:%S UTC"),
                job.temp_dir.display(),
                job.dest_dir.display()
            )?;
        }
        if !self.jobs.is_empty() {
            writeln!(f)?;
        }

        for pool in &self.pools {
            for dir in &pool.dirs {
                writeln!(f, "{} directory {} status:", pool.name, dir.path.display())?;
                if let Some(err) = &dir.error {
                    writeln!(f, "\terror:\t{}", err)?;
                }
                writeln!(f, "\ttotal space:\t{}", dir.total)?;
                writeln!(f, "\tused space:\t{}", dir.used)?;
                writeln!(f, "\tfree space:\t{}", dir.available)?;
                writeln!(f, "\treserved space:\t{} ({} plots)", dir.reserved, dir.reservations)?;
                writeln!(f, "\tplots available:\t{}", dir.slots_available)?;
                writeln!(f)?;
            }
        }

        for pool in &self.pools {
            let name = pool.name.to_uppercase();
            writeln!(f, "TOTAL {} SPACE AVAILABLE:\t{}", name, pool.total_available)?;
            writeln!(f, "TOTAL {} PLOTS AVAILABLE:\t{}", name, pool.total_slots)?;
        }
        Ok(())
    }
}
