use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use crate::bytesize::ByteSize;
use crate::disk::{DiskStats, DiskUsage};
use crate::error::{Result, RunnerError};
use crate::scheduler::job::JobId;

/// A directory that plots are written to, plus the space earmarked for jobs
/// that are still running there.
///
/// Reservations are advisory: they say nothing about how much a job has
/// actually written, so availability is re-read from the filesystem on every
/// call instead of being tracked here.
pub struct ResourceDir {
    path: PathBuf,
    reservation_size: ByteSize,
    reservations: RwLock<HashSet<JobId>>,
    disk: Arc<dyn DiskStats>,
}

impl std::fmt::Debug for ResourceDir {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceDir")
            .field("path", &self.path)
            .field("reservation_size", &self.reservation_size)
            .field("reservations", &self.reservation_count())
            .finish()
    }
}

impl ResourceDir {
    pub fn new(
        path: impl Into<PathBuf>,
        reservation_size: ByteSize,
        disk: Arc<dyn DiskStats>,
    ) -> Self {
        Self {
            path: path.into(),
            reservation_size,
            reservations: RwLock::new(HashSet::new()),
            disk,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn reservation_size(&self) -> ByteSize {
        self.reservation_size
    }

    /// Full disk statistics for this directory's filesystem.
    pub fn usage(&self) -> Result<DiskUsage> {
        self.disk
            .usage(&self.path)
            .map_err(|source| RunnerError::DiskQuery {
                path: self.path.clone(),
                source,
            })
    }

    /// Free space as reported by the filesystem right now. A failed query
    /// counts as no space at all.
    pub fn available_space(&self) -> ByteSize {
        match self.usage() {
            Ok(usage) => usage.available,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Disk query failed, treating as full");
                ByteSize::ZERO
            }
        }
    }

    pub fn reservation_count(&self) -> usize {
        self.reservations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn reserved_space(&self) -> ByteSize {
        self.reservation_size * self.reservation_count() as i64
    }

    /// Available space minus outstanding reservations. Negative when
    /// reservations overshoot what is actually free.
    pub fn usable_space(&self) -> ByteSize {
        self.available_space() - self.reserved_space()
    }

    /// Whole reservation units that still fit, never below zero.
    pub fn slots_available(&self) -> i64 {
        slots_in(self.usable_space(), self.reservation_size)
    }

    /// Room for at least one more full reservation after subtracting what is
    /// already claimed.
    pub fn has_room(&self) -> bool {
        self.usable_space() > self.reservation_size
    }

    pub fn is_reserved_by(&self, id: &JobId) -> bool {
        self.reservations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(id)
    }

    /// Returns false if `id` already held a reservation here.
    pub fn reserve(&self, id: JobId) -> bool {
        self.reservations
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id)
    }

    /// Returns false if `id` held no reservation here.
    pub fn release(&self, id: &JobId) -> bool {
        self.reservations
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
    }
}

pub(crate) fn slots_in(usable: ByteSize, unit: ByteSize) -> i64 {
    (usable / unit).max(0)
}
