use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::bytesize::ByteSize;
use crate::error::{Result, RunnerError};

/// Per-plot parameters handed to `chia plots create`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    /// Name or path of the chia executable
    pub chia_bin: String,
    /// chia-blockchain checkout whose `activate` script is sourced first
    pub chia_dir: Option<PathBuf>,
    /// Plot size (`-k`)
    pub k_size: u32,
    /// Threads per plot (`-r`)
    pub threads: usize,
    /// Memory buffer per plot in MB (`-b`)
    pub memory_mb: u64,
    /// Space held in a temp directory while a plot is being built
    pub temp_reservation: ByteSize,
    /// Space held in a farm directory for the finished plot
    pub dest_reservation: ByteSize,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            chia_bin: "chia".to_string(),
            chia_dir: None,
            k_size: 32,
            threads: 2,
            memory_mb: 3200,
            temp_reservation: ByteSize::from_gib(356.0),
            dest_reservation: ByteSize::from_gib(101.6),
        }
    }
}

impl JobConfig {
    pub fn memory(&self) -> ByteSize {
        ByteSize::from_mb(self.memory_mb as f64)
    }
}

/// SMTP relay and addresses for notification mail.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MailConfig {
    pub from: String,
    pub to: Vec<String>,
    pub host: String,
    /// 465 means implicit TLS; any other port upgrades with STARTTLS
    pub port: u16,
    pub user: Option<String>,
    pub password: Option<String>,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            from: String::new(),
            to: Vec::new(),
            host: String::new(),
            port: 587,
            user: None,
            password: None,
        }
    }
}

/// Everything fixed for the lifetime of a run.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Temporary plotting directories, in rotation order
    pub temp_dirs: Vec<PathBuf>,
    /// Farm directories that receive finished plots, in rotation order
    pub dest_dirs: Vec<PathBuf>,
    /// Memory budget for all plots together, in MB
    pub max_memory_mb: u64,
    /// Optional ceiling on concurrent plots, applied below the CPU/memory budget
    pub max_parallel: Option<usize>,
    /// Seconds between launch attempts
    pub tick_interval_secs: u64,
    pub log_file: Option<PathBuf>,
    pub job: JobConfig,
    pub mail: Option<MailConfig>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            temp_dirs: Vec::new(),
            dest_dirs: Vec::new(),
            max_memory_mb: 0,
            max_parallel: None,
            tick_interval_secs: 60,
            log_file: None,
            job: JobConfig::default(),
            mail: None,
        }
    }
}

impl Settings {
    /// Load settings from a TOML file. Missing keys take their defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|source| RunnerError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn memory_budget(&self) -> ByteSize {
        ByteSize::from_mb(self.max_memory_mb as f64)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    /// Reject settings the supervisor cannot start with.
    pub fn validate(&self) -> Result<()> {
        if self.max_memory_mb == 0 {
            return Err(RunnerError::Config(
                "max memory must be set (--max-mem)".to_string(),
            ));
        }
        if self.temp_dirs.is_empty() {
            return Err(RunnerError::Config(
                "at least one temp directory is required (--temp-dirs)".to_string(),
            ));
        }
        if self.dest_dirs.is_empty() {
            return Err(RunnerError::Config(
                "at least one farm directory is required (--dest-dirs)".to_string(),
            ));
        }
        if self.job.threads == 0 || self.job.memory_mb == 0 {
            return Err(RunnerError::Config(
                "per-plot threads and memory must be positive".to_string(),
            ));
        }
        if self.job.temp_reservation.bytes() <= 0 || self.job.dest_reservation.bytes() <= 0 {
            return Err(RunnerError::Config(format!(
                "reservation sizes must be positive (temp {}, dest {})",
                self.job.temp_reservation, self.job.dest_reservation
            )));
        }
        if let Some(mail) = &self.mail {
            if mail.host.is_empty() || mail.from.is_empty() || mail.to.is_empty() {
                return Err(RunnerError::Config(
                    "mail needs an SMTP host, a sender and at least one recipient".to_string(),
                ));
            }
        }
        if self.tick_interval_secs == 0 {
            return Err(RunnerError::Config(
                "tick interval must be at least one second".to_string(),
            ));
        }
        Ok(())
    }
}

/// Split a comma separated directory list, dropping empty entries.
pub fn parse_dir_list(list: &str) -> Vec<PathBuf> {
    list.split(',')
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(PathBuf::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn valid() -> Settings {
        Settings {
            temp_dirs: vec![PathBuf::from("/mnt/nvme0")],
            dest_dirs: vec![PathBuf::from("/mnt/farm0")],
            max_memory_mb: 16_000,
            ..Settings::default()
        }
    }

    #[test]
    fn job_config_default() {
        let cfg = JobConfig::default();
        assert_eq!(cfg.chia_bin, "chia");
        assert!(cfg.chia_dir.is_none());
        assert_eq!(cfg.k_size, 32);
        assert_eq!(cfg.threads, 2);
        assert_eq!(cfg.memory_mb, 3200);
        assert_eq!(cfg.memory(), ByteSize::from_mb(3200.0));
        assert_eq!(cfg.temp_reservation, ByteSize::from_gib(356.0));
        assert_eq!(cfg.dest_reservation, ByteSize::from_gib(101.6));
    }

    #[test]
    fn settings_default() {
        let cfg = Settings::default();
        assert!(cfg.temp_dirs.is_empty());
        assert!(cfg.dest_dirs.is_empty());
        assert_eq!(cfg.max_memory_mb, 0);
        assert_eq!(cfg.tick_interval(), Duration::from_secs(60));
        assert!(cfg.mail.is_none());
    }

    #[test]
    fn validate_accepts_complete_settings() {
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn validate_rejects_missing_pieces() {
        let mut cfg = valid();
        cfg.max_memory_mb = 0;
        assert!(matches!(cfg.validate(), Err(RunnerError::Config(_))));

        let mut cfg = valid();
        cfg.temp_dirs.clear();
        assert!(matches!(cfg.validate(), Err(RunnerError::Config(_))));

        let mut cfg = valid();
        cfg.dest_dirs.clear();
        assert!(matches!(cfg.validate(), Err(RunnerError::Config(_))));

        let mut cfg = valid();
        cfg.job.threads = 0;
        assert!(matches!(cfg.validate(), Err(RunnerError::Config(_))));

        let mut cfg = valid();
        cfg.tick_interval_secs = 0;
        assert!(matches!(cfg.validate(), Err(RunnerError::Config(_))));

        let mut cfg = valid();
        cfg.mail = Some(MailConfig {
            from: "plots@example.com".to_string(),
            to: vec!["me@example.com".to_string()],
            ..MailConfig::default()
        });
        assert!(matches!(cfg.validate(), Err(RunnerError::Config(_))));
    }

    #[test]
    fn validate_rejects_unusable_reservation_sizes() {
        let mut cfg = valid();
        cfg.job.dest_reservation = ByteSize::ZERO;
        assert!(matches!(cfg.validate(), Err(RunnerError::Config(_))));

        let mut cfg = valid();
        cfg.job.temp_reservation = "-5GiB".parse().unwrap();
        assert!(matches!(cfg.validate(), Err(RunnerError::Config(_))));

        let mut cfg = valid();
        cfg.job.dest_reservation = ByteSize::new(1);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn load_from_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
temp_dirs = ["/mnt/nvme0", "/mnt/nvme1"]
dest_dirs = ["/mnt/farm0"]
max_memory_mb = 32000
tick_interval_secs = 30

[job]
threads = 4
temp_reservation = "300GiB"

[mail]
from = "plots@example.com"
to = ["me@example.com"]
host = "smtp.example.com"
user = "plots"
password = "hunter2"
"#
        )
        .unwrap();

        let cfg = Settings::load_from(file.path()).unwrap();
        assert_eq!(cfg.temp_dirs.len(), 2);
        assert_eq!(cfg.dest_dirs, vec![PathBuf::from("/mnt/farm0")]);
        assert_eq!(cfg.max_memory_mb, 32000);
        assert_eq!(cfg.tick_interval(), Duration::from_secs(30));
        assert_eq!(cfg.job.threads, 4);
        assert_eq!(cfg.job.memory_mb, 3200);
        assert_eq!(cfg.job.temp_reservation, ByteSize::from_gib(300.0));
        let mail = cfg.mail.as_ref().unwrap();
        assert_eq!(mail.to, vec!["me@example.com".to_string()]);
        assert_eq!(mail.host, "smtp.example.com");
        assert_eq!(mail.port, 587);
        assert_eq!(mail.user.as_deref(), Some("plots"));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn load_from_reports_parse_errors() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "max_memory_mb = \"lots\"").unwrap();
        let err = Settings::load_from(file.path()).unwrap_err();
        assert!(matches!(err, RunnerError::ConfigParse { .. }));
    }

    #[test]
    fn dir_list_parsing() {
        assert_eq!(
            parse_dir_list(" /a, /b ,,/c"),
            vec![PathBuf::from("/a"), PathBuf::from("/b"), PathBuf::from("/c")]
        );
        assert!(parse_dir_list("").is_empty());
    }
}
