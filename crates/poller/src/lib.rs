//! Change-detection polling engine.
//!
//! This crate provides:
//! - `ChangeDetector`: fingerprint comparison against stored snapshots
//! - `ErrorRecoveryManager`: bounded retry of storage calls on fresh sessions
//! - `Poller`: one fetch/detect/dispatch/persist cycle for one instance
//! - `Scheduler`: per-instance tokio tasks supervised from the instance table

pub mod detector;
pub mod poller;
pub mod recovery;
pub mod scheduler;

pub use detector::{classify, ChangeDecision, ChangeDetector};
pub use poller::{CycleOutcome, CycleReport, Poller, Resource};
pub use recovery::ErrorRecoveryManager;
pub use scheduler::{run_instance_loop, PollerContext, Scheduler};
