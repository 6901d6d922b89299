use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use plotrunner::config::{parse_dir_list, MailConfig, Settings};
use plotrunner::disk::StatvfsDisk;
use plotrunner::notify::{LogNotifier, Notifier, NotifyQueue, SmtpNotifier};
use plotrunner::shutdown::install_shutdown_handler;
use plotrunner::status::{PoolStatus, StatusSnapshot};
use plotrunner::supervisor::build_pools;
use plotrunner::system::{max_concurrency, SystemFacts};
use plotrunner::worker::ProcessSpawner;
use plotrunner::{Runner, Supervisor};

/// How long to wait for queued notifications before exiting.
const NOTIFY_FLUSH_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(name = "plotrunner")]
#[command(version)]
#[command(about = "Keeps chia plotters busy without overfilling temp or farm disks")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start plots until interrupted
    Run(SettingsArgs),

    /// Print disk and slot status for the configured directories
    Status {
        #[command(flatten)]
        settings: SettingsArgs,

        /// Output format
        #[arg(long, short = 'o', default_value = "table")]
        output: OutputFormat,
    },
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

// =============================================================================
// Settings Arguments (flags override the config file)
// =============================================================================

#[derive(Parser, Debug)]
struct SettingsArgs {
    /// TOML config file
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Memory budget for all plots in MB
    #[arg(long, short = 'm')]
    max_mem: Option<u64>,

    /// Comma delimited list of temporary plotting dirs
    #[arg(long, short = 't')]
    temp_dirs: Option<String>,

    /// Comma delimited list of farming dirs
    #[arg(long, short = 'd')]
    dest_dirs: Option<String>,

    /// Memory per plot in MB
    #[arg(long)]
    plot_mem: Option<u64>,

    /// CPU threads per plot
    #[arg(long)]
    plot_threads: Option<usize>,

    /// Never run more than this many plots at once
    #[arg(long)]
    max_parallel: Option<usize>,

    /// chia-blockchain directory holding the `activate` script
    #[arg(long)]
    chia_dir: Option<PathBuf>,

    /// Seconds between launch attempts
    #[arg(long)]
    interval: Option<u64>,

    /// Also append logs to this file
    #[arg(long)]
    log: Option<PathBuf>,

    /// SMTP relay for notification mail
    #[arg(long)]
    smtp_host: Option<String>,

    /// SMTP port (465 for implicit TLS, otherwise STARTTLS)
    #[arg(long)]
    smtp_port: Option<u16>,

    /// SMTP user name
    #[arg(long)]
    smtp_user: Option<String>,

    /// SMTP password
    #[arg(long)]
    smtp_pass: Option<String>,

    /// Sender address for notification mail
    #[arg(long)]
    email_from: Option<String>,

    /// Comma delimited list of notification recipients
    #[arg(long)]
    email_to: Option<String>,
}

impl SettingsArgs {
    fn resolve(self) -> Result<Settings, Box<dyn std::error::Error>> {
        let mut settings = match &self.config {
            Some(path) => Settings::load_from(path)?,
            None => Settings::default(),
        };

        if let Some(mb) = self.max_mem.filter(|mb| *mb > 0) {
            settings.max_memory_mb = mb;
        }
        if let Some(dirs) = self.temp_dirs.as_deref() {
            settings.temp_dirs = parse_dir_list(dirs);
        }
        if let Some(dirs) = self.dest_dirs.as_deref() {
            settings.dest_dirs = parse_dir_list(dirs);
        }
        if let Some(mb) = self.plot_mem.filter(|mb| *mb > 0) {
            settings.job.memory_mb = mb;
        }
        if let Some(threads) = self.plot_threads.filter(|t| *t > 0) {
            settings.job.threads = threads;
        }
        if self.max_parallel.is_some() {
            settings.max_parallel = self.max_parallel;
        }
        if self.chia_dir.is_some() {
            settings.job.chia_dir = self.chia_dir;
        }
        if let Some(secs) = self.interval {
            settings.tick_interval_secs = secs;
        }
        if self.log.is_some() {
            settings.log_file = self.log;
        }

        let mail_flags = self.smtp_host.is_some()
            || self.smtp_port.is_some()
            || self.smtp_user.is_some()
            || self.smtp_pass.is_some()
            || self.email_from.is_some()
            || self.email_to.is_some();
        if mail_flags {
            let mail = settings.mail.get_or_insert_with(MailConfig::default);
            if let Some(host) = self.smtp_host {
                mail.host = host;
            }
            if let Some(port) = self.smtp_port {
                mail.port = port;
            }
            if self.smtp_user.is_some() {
                mail.user = self.smtp_user;
            }
            if self.smtp_pass.is_some() {
                mail.password = self.smtp_pass;
            }
            if let Some(from) = self.email_from {
                mail.from = from;
            }
            if let Some(to) = self.email_to.as_deref() {
                mail.to = to
                    .split(',')
                    .map(str::trim)
                    .filter(|addr| !addr.is_empty())
                    .map(str::to_string)
                    .collect();
            }
        }

        Ok(settings)
    }
}

// =============================================================================
// Logging
// =============================================================================

fn init_logging(log_file: Option<&PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let file_layer = match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(file_layer)
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    Ok(())
}

// =============================================================================
// Commands
// =============================================================================

async fn run_supervisor(settings: Settings) -> Result<(), Box<dyn std::error::Error>> {
    init_logging(settings.log_file.as_ref())?;

    let facts = SystemFacts::probe();
    tracing::info!(
        cpu_threads = facts.cpu_threads,
        free_memory = %facts.available_memory,
        total_memory = %facts.total_memory,
        "Starting plotrunner"
    );

    let notifier: Arc<dyn Notifier> = match &settings.mail {
        Some(mail) => Arc::new(SmtpNotifier::new(mail).map_err(|e| {
            tracing::error!(error = %e, "Invalid mail settings");
            e
        })?),
        None => Arc::new(LogNotifier),
    };
    let notify = NotifyQueue::start(notifier);

    let supervisor = match settings.validate().and_then(|()| {
        let supervisor = Supervisor::from_settings(
            &settings,
            facts.cpu_threads,
            Arc::new(StatvfsDisk),
            Arc::new(ProcessSpawner),
            notify.clone(),
        )?;
        supervisor.check_directories()?;
        Ok(supervisor)
    }) {
        Ok(supervisor) => Arc::new(supervisor),
        Err(e) => {
            tracing::error!(error = %e, "Startup failed");
            notify.post("plotrunner fatal error", format!("[FATAL] {}", e));
            flush(&notify).await;
            return Err(e.into());
        }
    };

    tracing::info!(
        max_parallel_plots = supervisor.max_concurrency(),
        "Supervisor ready"
    );

    let shutdown = CancellationToken::new();
    install_shutdown_handler(shutdown.clone())?;

    let runner = Runner::new(Arc::clone(&supervisor), settings.tick_interval());
    let result = runner.run(shutdown).await;
    flush(&notify).await;
    result?;

    tracing::info!("plotrunner stopped");
    Ok(())
}

async fn flush(notify: &NotifyQueue) {
    if tokio::time::timeout(NOTIFY_FLUSH_TIMEOUT, notify.flush())
        .await
        .is_err()
    {
        tracing::warn!("Timed out delivering notifications");
    }
}

fn print_status(
    settings: Settings,
    output: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    if settings.temp_dirs.is_empty() && settings.dest_dirs.is_empty() {
        return Err("no directories configured (--temp-dirs, --dest-dirs or --config)".into());
    }

    let facts = SystemFacts::probe();
    let (temp_pool, farm_pool) = build_pools(&settings, Arc::new(StatvfsDisk));
    let snapshot = StatusSnapshot {
        running: 0,
        max_concurrency: max_concurrency(
            facts.cpu_threads,
            settings.job.threads,
            settings.memory_budget(),
            settings.job.memory(),
            settings.max_parallel,
        ),
        succeeded: 0,
        failed: 0,
        jobs: Vec::new(),
        pools: vec![PoolStatus::collect(&farm_pool), PoolStatus::collect(&temp_pool)],
    };

    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&snapshot)?),
        OutputFormat::Table => print!("{}", snapshot),
    }
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    match args.command {
        Commands::Run(settings_args) => {
            run_supervisor(settings_args.resolve()?).await?;
        }
        Commands::Status { settings, output } => {
            print_status(settings.resolve()?, &output)?;
        }
    }

    Ok(())
}
