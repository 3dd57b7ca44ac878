//! Asynchronous job execution.
//!
//! - [`engine`]: start/poll entry point, process spawn and per-job watcher
//! - [`store`]: state and log files under the async directory
//! - [`guard`]: single-flight marker per hook path
//! - [`recovery`]: restart reconciliation and retention-based cleanup

pub mod engine;
pub mod guard;
pub mod recovery;
pub mod store;

pub use engine::{AsyncEngine, JobFailure};
pub use guard::{ActiveHook, RunGuard};
pub use recovery::ArtifactOutcome;
pub use store::{JobState, JobStore};
