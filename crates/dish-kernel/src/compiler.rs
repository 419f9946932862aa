//! The compiler seam.
//!
//! The scheduler hands each Compile request to a `PipelineCompiler` together
//! with a `CompileContext`. The compiler returns the graph it compiled
//! (used for conflict keys) and the scripts it wrote.
//!
//! `SnapshotCompiler` is the default: the translator has already written the
//! pipeline's IR as JSON, so compiling means loading it, expanding snapshot
//! variables in command arguments, optionally cutting it into worker
//! subgraphs, and emitting scripts.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use dish_types::{FileIdGen, Ir, IrError, Node, NodeKind};

use crate::config::DishConfig;
use crate::distribute::{add_remote_pipes, split_ir, DistributeError, PortAllocator};
use crate::emit::{EmitError, ScriptEmitter};
use crate::vars::ShellVars;

/// Paths named by one Compile request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileRequest {
    /// Where the runnable script goes.
    pub script: PathBuf,
    /// The interpreter's variable snapshot.
    pub vars: PathBuf,
    /// The pipeline's IR snapshot.
    pub ir: PathBuf,
}

/// Everything a compiler may consult besides the request itself.
#[derive(Debug, Clone)]
pub struct CompileContext {
    pub config: Arc<DishConfig>,
    pub vars: ShellVars,
}

/// A successful compilation.
#[derive(Debug, Clone)]
pub struct CompiledPipeline {
    /// The whole pipeline, before any distribution. Its input and output
    /// edges are what the pipeline reads and writes.
    pub ir: Ir,
    /// The script the interpreter runs.
    pub script: PathBuf,
    /// Scripts for worker machines, in subgraph order.
    pub workers: Vec<PathBuf>,
}

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("cannot read IR snapshot {path}: {source}")]
    ReadSnapshot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid IR snapshot {path}: {source}")]
    ParseSnapshot {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("malformed graph: {0}")]
    Graph(#[from] IrError),

    #[error("distribution failed: {0}")]
    Distribute(#[from] DistributeError),

    #[error(transparent)]
    Emit(#[from] EmitError),

    #[error("{0}")]
    Failed(String),
}

#[async_trait]
pub trait PipelineCompiler: Send + Sync {
    async fn compile(&self, request: &CompileRequest, ctx: &CompileContext) -> Result<CompiledPipeline, CompileError>;
}

/// Compiles pipelines from their IR snapshots.
#[derive(Debug)]
pub struct SnapshotCompiler {
    ports: PortAllocator,
}

impl SnapshotCompiler {
    pub fn new(config: &DishConfig) -> Self {
        Self {
            ports: PortAllocator::new(config.remote.base_port),
        }
    }
}

/// Load and validate an IR snapshot.
pub async fn load_snapshot(path: &Path) -> Result<Ir, CompileError> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| CompileError::ReadSnapshot {
            path: path.to_path_buf(),
            source,
        })?;
    let ir: Ir = serde_json::from_str(&text).map_err(|source| CompileError::ParseSnapshot {
        path: path.to_path_buf(),
        source,
    })?;
    ir.validate()?;
    Ok(ir)
}

/// Replace command arguments with their expansion against `vars`.
/// Returns how many arguments changed.
fn expand_args(ir: &mut Ir, vars: &ShellVars) -> usize {
    let mut changed = 0;
    let rewritten: Vec<Node> = ir
        .nodes()
        .filter_map(|node| {
            let NodeKind::Command { name, args } = node.kind() else {
                return None;
            };
            let expanded: Vec<String> = args.iter().map(|arg| vars.expand(arg)).collect();
            let count = args.iter().zip(&expanded).filter(|(a, b)| a != b).count();
            if count == 0 {
                return None;
            }
            changed += count;
            let kind = NodeKind::Command {
                name: name.clone(),
                args: expanded,
            };
            Some(Node::new(node.id(), kind, node.inputs().to_vec(), node.outputs().to_vec()))
        })
        .collect();
    for node in rewritten {
        ir.add_node(node);
    }
    changed
}

/// `pipeline.sh` → `pipeline.sh.worker3`
pub fn worker_script_path(script: &Path, index: usize) -> PathBuf {
    let mut name = script.as_os_str().to_os_string();
    name.push(format!(".worker{index}"));
    PathBuf::from(name)
}

#[async_trait]
impl PipelineCompiler for SnapshotCompiler {
    async fn compile(&self, request: &CompileRequest, ctx: &CompileContext) -> Result<CompiledPipeline, CompileError> {
        let config = &ctx.config;
        let mut ir = load_snapshot(&request.ir).await?;
        let expanded = expand_args(&mut ir, &ctx.vars);
        tracing::debug!(
            nodes = ir.node_count(),
            edges = ir.edge_count(),
            vars = ctx.vars.len(),
            expanded,
            "loaded IR snapshot"
        );

        let emitter = ScriptEmitter::from_config(config);
        let mut workers = Vec::new();

        if config.distributed {
            let partition = split_ir(&ir, FileIdGen::continuing(&ir))?;
            let dist = add_remote_pipes(partition, &self.ports, &config.remote.host)?;
            for (index, sub) in dist.subgraphs.iter().enumerate() {
                let path = worker_script_path(&request.script, index);
                if !config.dry_run {
                    emitter.write(sub, &path)?;
                }
                workers.push(path);
            }
            if !config.dry_run {
                emitter.write(&dist.coordinator, &request.script)?;
            }
        } else if !config.dry_run {
            emitter.write(&ir, &request.script)?;
        }

        Ok(CompiledPipeline {
            ir,
            script: request.script.clone(),
            workers,
        })
    }
}
