use std::fmt;
use std::path::Path;

use crate::config::JobConfig;

/// A fully resolved command line, ready to spawn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlotCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl fmt::Display for PlotCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Builds `chia plots create` invocations for a temp/farm directory pair.
#[derive(Debug, Clone)]
pub struct PlotCommandBuilder {
    config: JobConfig,
}

impl PlotCommandBuilder {
    pub fn new(config: JobConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &JobConfig {
        &self.config
    }

    fn plot_args(&self, temp_dir: &Path, dest_dir: &Path) -> Vec<String> {
        vec![
            "plots".to_string(),
            "create".to_string(),
            "-k".to_string(),
            self.config.k_size.to_string(),
            "-r".to_string(),
            self.config.threads.to_string(),
            "-b".to_string(),
            self.config.memory_mb.to_string(),
            "-t".to_string(),
            temp_dir.display().to_string(),
            "-d".to_string(),
            dest_dir.display().to_string(),
        ]
    }

    /// Without a chia directory the executable is run directly. With one,
    /// the virtualenv is activated in a bash shell first.
    pub fn build(&self, temp_dir: &Path, dest_dir: &Path) -> PlotCommand {
        let args = self.plot_args(temp_dir, dest_dir);

        let Some(chia_dir) = &self.config.chia_dir else {
            return PlotCommand {
                program: self.config.chia_bin.clone(),
                args,
            };
        };

        let activate = chia_dir.join("activate");
        let plot = std::iter::once(self.config.chia_bin.as_str())
            .chain(args.iter().map(String::as_str))
            .map(shell_quote)
            .collect::<Vec<_>>()
            .join(" ");
        let script = format!(
            "source {}; {}",
            shell_quote(&activate.display().to_string()),
            plot
        );

        PlotCommand {
            program: "/bin/bash".to_string(),
            args: vec!["-c".to_string(), script],
        }
    }
}

/// Quote for a POSIX shell. Plain words are left alone.
fn shell_quote(word: &str) -> String {
    let plain = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,+@%".contains(c));
    if plain {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}
