//! Pure data types for dish: the dataflow IR of one shell pipeline.
//!
//! This crate is a leaf dependency with no async runtime, no I/O.
//! It exists so that the syntax-to-IR translator and the code generator can
//! exchange graphs with the compiler daemon without pulling dish-kernel's
//! dependency tree.
//!
//! - **Fid**: a uniquely identified data channel with its resource binding
//! - **Node**: a command or a remote pipe, with ordered input/output edges
//! - **Ir**: the graph itself, with source/sink queries and edge rewiring
//! - **FileIdGen**: the monotonic identifier generator threaded through
//!   every graph rewrite

pub mod fid;
pub mod ir;
pub mod node;

// Flat re-exports for convenience
pub use fid::*;
pub use ir::*;
pub use node::*;
