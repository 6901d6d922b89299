use std::path::PathBuf;

use thiserror::Error;

/// Why a launch attempt found no room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exhausted {
    /// Every member of the named pool failed its admission predicate.
    NoAdmissibleDir { pool: String },
    /// The active job table is already at the concurrency ceiling.
    ConcurrencyCap { active: usize, max: usize },
}

impl std::fmt::Display for Exhausted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Exhausted::NoAdmissibleDir { pool } => {
                write!(f, "no {} directory has room for another plot", pool)
            }
            Exhausted::ConcurrencyCap { active, max } => {
                write!(f, "{} of {} plot slots in use", active, max)
            }
        }
    }
}

#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("Pool `{0}` has no directories configured")]
    PoolMisconfigured(String),

    #[error("Admission exhausted: {0}")]
    AdmissionExhausted(Exhausted),

    #[error("Failed to start `{program}`: {source}")]
    SpawnFailure {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Plot process {pid:?} exited abnormally: {detail}")]
    JobExit { pid: Option<u32>, detail: String },

    #[error("Could not get disk status of {}: {source}", path.display())]
    DiskQuery {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Failed to parse config {}: {source}", path.display())]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RunnerError {
    /// Transient errors are the expected steady state once the fleet is
    /// saturated; the scheduling loop retries them on the next tick.
    pub fn is_transient(&self) -> bool {
        matches!(self, RunnerError::AdmissionExhausted(_))
    }
}

pub type Result<T> = std::result::Result<T, RunnerError>;
