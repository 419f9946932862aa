//! dish-kernel: the core of dish.
//!
//! This crate provides:
//!
//! - **Distribute**: Partitioning a pipeline graph into linear segments and
//!   closing them with remote pipes
//! - **Scheduler**: The compilation scheduler and its control protocol
//! - **Compiler**: The compiler seam and the default snapshot compiler
//! - **Emit**: Rendering a graph as a runnable bash script
//! - **Transport**: One-shot TCP streams behind remote pipe nodes
//! - **Channel**: Control channels (named FIFOs, in-memory)
//! - **Vars**: Shell variable snapshots
//! - **Config / Paths**: TOML configuration and XDG path helpers

pub mod channel;
pub mod compiler;
pub mod config;
pub mod distribute;
pub mod emit;
pub mod paths;
pub mod scheduler;
pub mod transport;
pub mod vars;

pub use channel::{ChannelError, ControlChannel, FifoChannel, MemoryChannel};
pub use compiler::{CompileContext, CompileError, CompileRequest, CompiledPipeline, PipelineCompiler, SnapshotCompiler};
pub use config::{DishConfig, RemoteConfig};
pub use distribute::{add_remote_pipes, split_ir, DistributeError, DistributedGraph, Partition, PortAllocator};
pub use scheduler::{ProcessId, Request, Response, Scheduler, SchedulerError};
pub use vars::{ShellVar, ShellVars, VarsError};

// XDG path primitives (embedders compose their own paths)
pub use paths::{home_dir, xdg_config_home, xdg_runtime_dir};
