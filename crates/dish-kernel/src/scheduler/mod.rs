//! The compilation scheduler.
//!
//! ```text
//!   interpreter ── Compile ──▶ ┌───────────┐ ── compile ──▶ PipelineCompiler
//!               ── Exit ─────▶ │ Scheduler │
//!               ── Done ─────▶ └───────────┘
//!               ◀── OK / ERROR / All finished
//! ```
//!
//! Each admitted pipeline holds the keys of the files, descriptors, and
//! edges it reads and writes. A pipeline that would read or write something
//! a running pipeline writes, or write something one reads, waits until
//! everything running has exited.

mod engine;
pub mod keys;
pub mod protocol;

pub use engine::{ProcessRecord, Scheduler, SchedulerError};
pub use keys::{derive_keys, ConflictKey, KeySet, PipelineKeys};
pub use protocol::{ProcessId, ProtocolError, Request, Response};
