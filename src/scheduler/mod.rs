//! Directory bookkeeping for plot placement.
//!
//! - [`ResourceDir`]: one directory and the jobs holding space in it
//! - [`ResourcePool`]: round-robin selection over directories, gated by an
//!   admission rule
//! - [`Job`]: a started plot process and the two directories it occupies

pub mod job;
pub mod pool;
pub mod resource;

pub use job::{Job, JobId, JobStatus, JobSummary};
pub use pool::{room_for_one_more, Admission, ResourcePool};
pub use resource::ResourceDir;
