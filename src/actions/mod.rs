//! Device-level actions driven by the orchestrator.
//!
//! - `switch`: the per-switch configuration pipeline
//! - `singleton`: create-or-conflict handling for device-unique objects
//! - `cluster`: MCT management cluster create/update/delete/clear
//! - `fanout`: per-target task spawning with a drained error channel

pub mod cluster;
pub mod fanout;
pub mod singleton;
pub mod switch;

// Re-export commonly used types
pub use cluster::{ClusterOp, ClusterReconciler, PollSettings, MAX_CLUSTER_MEMBERS};
pub use fanout::{fan_out, report, ErrorSink};
pub use singleton::{ensure_singleton, Singleton};
pub use switch::DeviceActionSequencer;
