//! Turning a directory pair into a running plot process.
//!
//! - [`PlotCommandBuilder`]: renders the `chia plots create` command line
//! - [`Spawner`]: starts it, yielding a pid, an exit future and a
//!   [`ProcessHandle`] for termination
//!
//! # Execution Flow
//!
//! 1. The supervisor picks a temp and a farm directory
//! 2. [`PlotCommandBuilder::build`] produces a [`PlotCommand`]
//! 3. [`Spawner::spawn`] starts it with stdio detached
//! 4. A watcher task awaits [`SpawnedProcess::exit`] while the supervisor
//!    keeps the handle for shutdown

pub mod command;
pub mod process;

pub use command::{PlotCommand, PlotCommandBuilder};
pub use process::{
    describe_exit, ExitFuture, ProcessHandle, ProcessSpawner, SpawnedProcess, Spawner,
};
