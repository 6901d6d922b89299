use std::path::Path;

use serde::Serialize;

use crate::bytesize::ByteSize;

/// Space figures for the filesystem holding a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DiskUsage {
    pub total: ByteSize,
    pub used: ByteSize,
    pub available: ByteSize,
}

impl DiskUsage {
    pub fn new(total: ByteSize, available: ByteSize) -> Self {
        Self {
            total,
            used: total - available,
            available,
        }
    }
}

/// Source of disk statistics.
///
/// Implementations must be cheap enough to call on every admission check;
/// the supervisor never caches their answers.
pub trait DiskStats: Send + Sync {
    fn usage(&self, path: &Path) -> std::io::Result<DiskUsage>;
}

/// `statvfs(2)` backed disk statistics.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatvfsDisk;

impl DiskStats for StatvfsDisk {
    #[allow(clippy::unnecessary_cast)]
    fn usage(&self, path: &Path) -> std::io::Result<DiskUsage> {
        let stat = nix::sys::statvfs::statvfs(path)?;
        let frsize = stat.fragment_size() as u64;
        let total = (stat.blocks() as u64).saturating_mul(frsize);
        let available = (stat.blocks_available() as u64).saturating_mul(frsize);
        Ok(DiskUsage::new(
            ByteSize::from_u64(total),
            ByteSize::from_u64(available),
        ))
    }
}
