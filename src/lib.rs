pub mod bytesize;
pub mod config;
pub mod disk;
pub mod error;
pub mod notify;
pub mod runner;
pub mod scheduler;
pub mod shutdown;
pub mod status;
pub mod supervisor;
pub mod system;
pub mod worker;

pub use bytesize::ByteSize;
pub use error::{Result, RunnerError};
pub use runner::Runner;
pub use supervisor::Supervisor;
