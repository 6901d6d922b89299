use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::bytesize::ByteSize;
use crate::config::Settings;
use crate::disk::DiskStats;
use crate::error::{Exhausted, Result, RunnerError};
use crate::notify::NotifyQueue;
use crate::scheduler::{Job, JobId, JobStatus, JobSummary, ResourceDir, ResourcePool};
use crate::status::{PoolStatus, StatusSnapshot};
use crate::system::max_concurrency;
use crate::worker::{describe_exit, PlotCommandBuilder, ProcessHandle, SpawnedProcess, Spawner};

pub const TEMP_POOL: &str = "temp";
pub const FARM_POOL: &str = "farm";

struct ActiveJob {
    job: Job,
    handle: Box<dyn ProcessHandle>,
    /// Set by the watcher as soon as the exit future resolves, before it
    /// waits for the job table. The pid may already be reused by then.
    exited: Arc<AtomicBool>,
}

/// Owns both directory pools and every plot process started this run.
///
/// The job table's write lock is the coarse lock: selecting from both pools,
/// reserving space and registering the job happen while it is held, so two
/// launches never both admit a directory on the strength of the same
/// reservation count. Watchers take the same lock to reconcile exits.
pub struct Supervisor {
    temp_pool: ResourcePool,
    farm_pool: ResourcePool,
    jobs: RwLock<HashMap<JobId, ActiveJob>>,
    max_concurrency: usize,
    builder: PlotCommandBuilder,
    spawner: Arc<dyn Spawner>,
    notify: NotifyQueue,
    succeeded: AtomicUsize,
    failed: AtomicUsize,
}

impl Supervisor {
    pub fn new(
        temp_pool: ResourcePool,
        farm_pool: ResourcePool,
        max_concurrency: usize,
        builder: PlotCommandBuilder,
        spawner: Arc<dyn Spawner>,
        notify: NotifyQueue,
    ) -> Self {
        Self {
            temp_pool,
            farm_pool,
            jobs: RwLock::new(HashMap::new()),
            max_concurrency,
            builder,
            spawner,
            notify,
            succeeded: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
        }
    }

    /// Build the pools and concurrency ceiling described by `settings`.
    pub fn from_settings(
        settings: &Settings,
        cpu_threads: usize,
        disk: Arc<dyn DiskStats>,
        spawner: Arc<dyn Spawner>,
        notify: NotifyQueue,
    ) -> Result<Self> {
        let job = &settings.job;
        let (temp_pool, farm_pool) = build_pools(settings, disk);

        let max = max_concurrency(
            cpu_threads,
            job.threads,
            settings.memory_budget(),
            job.memory(),
            settings.max_parallel,
        );
        if max == 0 {
            return Err(RunnerError::Config(format!(
                "{} CPU threads and {} of memory leave room for no plots at {} threads and {} each",
                cpu_threads,
                settings.memory_budget(),
                job.threads,
                job.memory()
            )));
        }

        Ok(Self::new(
            temp_pool,
            farm_pool,
            max,
            PlotCommandBuilder::new(job.clone()),
            spawner,
            notify,
        ))
    }

    /// Query every configured directory once. Any failure is fatal: admission
    /// cannot work without disk statistics.
    pub fn check_directories(&self) -> Result<()> {
        for pool in [&self.temp_pool, &self.farm_pool] {
            if pool.count() == 0 {
                return Err(RunnerError::PoolMisconfigured(pool.name().to_string()));
            }
            for dir in pool.members() {
                let usage = dir.usage()?;
                tracing::info!(
                    pool = pool.name(),
                    path = %dir.path().display(),
                    free = %usage.available,
                    plots_available = dir.slots_available(),
                    "Added directory"
                );
            }
        }
        Ok(())
    }

    pub fn temp_pool(&self) -> &ResourcePool {
        &self.temp_pool
    }

    pub fn farm_pool(&self) -> &ResourcePool {
        &self.farm_pool
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    pub fn notifications(&self) -> &NotifyQueue {
        &self.notify
    }

    pub async fn active_count(&self) -> usize {
        self.jobs.read().await.len()
    }

    /// Plots that could still start before hitting the concurrency ceiling.
    pub async fn remaining_capacity(&self) -> usize {
        self.max_concurrency.saturating_sub(self.active_count().await)
    }

    /// Tracked jobs, oldest first.
    pub async fn active_jobs(&self) -> Vec<JobSummary> {
        let mut jobs: Vec<JobSummary> = self
            .jobs
            .read()
            .await
            .values()
            .map(|active| active.job.summary())
            .collect();
        jobs.sort_by_key(|j| j.started_at);
        jobs
    }

    /// Read-only report. Disk queries run after the job table lock is
    /// released.
    pub async fn status_snapshot(&self) -> StatusSnapshot {
        let jobs = self.active_jobs().await;
        StatusSnapshot {
            running: jobs.len(),
            max_concurrency: self.max_concurrency,
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            jobs,
            pools: vec![
                PoolStatus::collect(&self.farm_pool),
                PoolStatus::collect(&self.temp_pool),
            ],
        }
    }

    /// Start one plot if the concurrency ceiling and both pools allow it.
    ///
    /// # Errors
    ///
    /// - [`RunnerError::AdmissionExhausted`] when at the ceiling or when no
    ///   directory in either pool has room
    /// - [`RunnerError::PoolMisconfigured`] when a pool is empty
    /// - [`RunnerError::SpawnFailure`] when the command cannot be started;
    ///   nothing is reserved in that case
    pub async fn launch_one(self: &Arc<Self>) -> Result<JobId> {
        let active = self.active_count().await;
        if active >= self.max_concurrency {
            return Err(self.at_capacity(active));
        }

        let mut jobs = self.jobs.write().await;
        if jobs.len() >= self.max_concurrency {
            return Err(self.at_capacity(jobs.len()));
        }

        tracing::info!("Starting plot process");

        let temp_dir = self.temp_pool.next_usable()?;
        tracing::info!(
            path = %temp_dir.path().display(),
            free = %temp_dir.available_space(),
            "Temp directory selected"
        );

        let farm_dir = self.farm_pool.next_usable()?;
        tracing::info!(
            path = %farm_dir.path().display(),
            free = %farm_dir.available_space(),
            "Farm directory selected"
        );

        let mut job = Job::new(temp_dir, farm_dir);
        let command = self.builder.build(job.temp_dir.path(), job.dest_dir.path());
        tracing::info!(command = %command, "Running plot command");

        let SpawnedProcess { pid, exit, handle } =
            self.spawner.spawn(&command).map_err(|source| {
                tracing::error!(command = %command, error = %source, "Plot command failed to start");
                RunnerError::SpawnFailure {
                    program: command.program.clone(),
                    source,
                }
            })?;

        job.mark_running(pid);
        job.reserve();
        let id = job.id;
        let temp_path = job.temp_dir.path().display().to_string();
        let farm_path = job.dest_dir.path().display().to_string();
        let exited = Arc::new(AtomicBool::new(false));
        jobs.insert(
            id,
            ActiveJob {
                job,
                handle,
                exited: Arc::clone(&exited),
            },
        );
        drop(jobs);

        tracing::info!(
            job_id = %id,
            pid = ?pid,
            temp_dir = %temp_path,
            farm_dir = %farm_path,
            "Now plotting"
        );

        // Queued before the watcher exists, so a plot that dies at once still
        // reports its start first.
        let label = pid_label(pid);
        let status = self.status_snapshot().await;
        self.notify.post(
            format!("plot process {} started", label),
            format!(
                "new plot process {} started:\n\tJOB ID:{}\n\tTEMP DIR:{}\n\tFARM DIR:{}\n\n\
                 CURRENT STATUS:\n\n{}",
                label, id, temp_path, farm_path, status
            ),
        );

        let supervisor = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = exit.await;
            exited.store(true, Ordering::SeqCst);
            supervisor.reconcile(id, outcome).await;
        });

        Ok(id)
    }

    fn at_capacity(&self, active: usize) -> RunnerError {
        RunnerError::AdmissionExhausted(Exhausted::ConcurrencyCap {
            active,
            max: self.max_concurrency,
        })
    }

    /// Watcher half of a job: release its space, forget it, report how it
    /// ended.
    async fn reconcile(&self, id: JobId, outcome: std::io::Result<ExitStatus>) {
        let failure = match &outcome {
            Ok(status) if status.success() => None,
            Ok(status) => Some(describe_exit(status)),
            Err(e) => Some(format!("wait failed: {}", e)),
        };

        let finished = {
            let mut jobs = self.jobs.write().await;
            let Some(mut active) = jobs.remove(&id) else {
                tracing::warn!(job_id = %id, "Exited job was not tracked");
                return;
            };
            active.job.release();
            if failure.is_none() {
                active.job.status = JobStatus::Succeeded;
                self.succeeded.fetch_add(1, Ordering::Relaxed);
            } else {
                active.job.status = JobStatus::Failed;
                self.failed.fetch_add(1, Ordering::Relaxed);
            }
            active.job
        };

        let label = pid_label(finished.pid);
        let elapsed = chrono::Utc::now() - finished.started_at;
        let status = self.status_snapshot().await;

        match failure {
            None => {
                tracing::info!(
                    job_id = %id,
                    pid = ?finished.pid,
                    status = %finished.status,
                    minutes = elapsed.num_minutes(),
                    "Plot process finished"
                );
                self.notify.post(
                    format!("plot process {} finished", label),
                    format!(
                        "plot process {} finished successfully\n\nCURRENT STATUS:\n\n{}",
                        label, status
                    ),
                );
            }
            Some(detail) => {
                let err = RunnerError::JobExit {
                    pid: finished.pid,
                    detail,
                };
                tracing::warn!(
                    job_id = %id,
                    status = %finished.status,
                    minutes = elapsed.num_minutes(),
                    error = %err,
                    "Plot process finished with error"
                );
                self.notify.post(
                    format!("plot process {} finished with error", label),
                    format!(
                        "plot process {} finished with error:\n{}\n\nCURRENT STATUS:\n\n{}",
                        label, err, status
                    ),
                );
            }
        }
    }

    /// Signal every tracked process to terminate. Does not wait; watchers
    /// reconcile the exits. Returns how many were signalled.
    ///
    /// Jobs whose exit was already observed are skipped. A process reaped in
    /// the instant between that check and the signal can still be hit by
    /// pid; that window is accepted.
    pub async fn kill_all(&self) -> usize {
        let jobs = self.jobs.read().await;
        let mut signalled = 0;
        for (id, active) in jobs.iter() {
            if active.exited.load(Ordering::SeqCst) {
                tracing::debug!(job_id = %id, pid = ?active.job.pid, "Plot process already exited");
                continue;
            }
            match active.handle.terminate() {
                Ok(()) => {
                    signalled += 1;
                    tracing::info!(job_id = %id, pid = ?active.job.pid, "Killed plot process");
                }
                Err(e) => {
                    tracing::error!(
                        job_id = %id,
                        pid = ?active.job.pid,
                        error = %e,
                        "Failed to kill plot process"
                    );
                }
            }
        }
        signalled
    }
}

/// The temp and farm pools for `settings`, members in configured order.
pub fn build_pools(settings: &Settings, disk: Arc<dyn DiskStats>) -> (ResourcePool, ResourcePool) {
    let pool = |name: &str, dirs: &[PathBuf], reservation: ByteSize| {
        let pool = ResourcePool::new(name);
        pool.add_members(
            dirs.iter()
                .map(|path| Arc::new(ResourceDir::new(path.clone(), reservation, Arc::clone(&disk)))),
        );
        pool
    };

    (
        pool(TEMP_POOL, &settings.temp_dirs, settings.job.temp_reservation),
        pool(FARM_POOL, &settings.dest_dirs, settings.job.dest_reservation),
    )
}

fn pid_label(pid: Option<u32>) -> String {
    pid.map(|p| p.to_string())
        .unwrap_or_else(|| "?".to_string())
}
