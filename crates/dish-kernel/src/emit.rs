//! Rendering a graph as a runnable bash script.
//!
//! ```text
//!   #!/usr/bin/env bash
//!   mkdir -p '/run/dish/fifos'
//!   fifos=$(mktemp -d '/run/dish/fifos'/dish.XXXXXX)
//!   trap 'rm -rf "$fifos"' EXIT
//!   mkfifo "$fifos/f2"
//!   cat in.txt > "$fifos/f2" &
//!   grep x < "$fifos/f2" &
//!   wait
//! ```
//!
//! Every node becomes one background job, in topological order. Unbound
//! edges between two nodes become named pipes in a fresh per-run directory;
//! an unbound output nothing reads goes to /dev/null. Input 0 and output 0
//! are redirections; further edges are positional operands.
//! Remote pipe nodes become invocations of the configured pipe command.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use thiserror::Error;

use dish_types::{Direction, FileId, Ir, IrError, Node, NodeId, NodeKind, Resource};

use crate::config::DishConfig;

/// Background jobs lose stdin to /dev/null; the script keeps a copy here.
const STDIN_COPY_FD: i32 = 9;

#[derive(Debug, Error)]
pub enum EmitError {
    #[error(transparent)]
    Ir(#[from] IrError),

    #[error("{node} uses network edge {edge} outside a remote pipe")]
    NetworkEdge { node: NodeId, edge: FileId },

    #[error("{node} reads unbound edge {edge}, which nothing writes")]
    UnproducedEdge { node: NodeId, edge: FileId },

    #[error("failed to write script {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Renders graphs to bash.
#[derive(Debug, Clone)]
pub struct ScriptEmitter {
    fifo_dir: PathBuf,
    pipe_command: String,
}

impl ScriptEmitter {
    pub fn new(fifo_dir: impl Into<PathBuf>, pipe_command: impl Into<String>) -> Self {
        Self {
            fifo_dir: fifo_dir.into(),
            pipe_command: pipe_command.into(),
        }
    }

    pub fn from_config(config: &DishConfig) -> Self {
        Self::new(&config.fifo_dir, &config.remote.pipe_command)
    }

    /// Render `ir` as a script. The graph must be acyclic.
    pub fn render(&self, ir: &Ir) -> Result<String, EmitError> {
        let order = ir.topo_order()?;
        let fifos: Vec<FileId> = ir
            .all_fids()
            .filter(|fid| fid.is_ephemeral())
            .map(|fid| fid.ident())
            .filter(|id| ir.get_edge(*id).is_some_and(|e| e.from.is_some() && e.to.is_some()))
            .collect();
        let reads_stdin = ir.nodes().any(|node| {
            node.inputs().iter().any(|id| {
                matches!(ir.get_fid(*id).map(|f| f.resource()), Some(Resource::Descriptor { fd: 0 }))
            })
        });

        let mut script = String::from("#!/usr/bin/env bash\n");
        if reads_stdin {
            let _ = writeln!(script, "exec {STDIN_COPY_FD}<&0");
        }
        if !fifos.is_empty() {
            let dir = shell_quote(&self.fifo_dir.to_string_lossy());
            let _ = writeln!(script, "mkdir -p {dir}");
            let _ = writeln!(script, "fifos=$(mktemp -d {dir}/dish.XXXXXX)");
            script.push_str("trap 'rm -rf \"$fifos\"' EXIT\n");
            let names: Vec<String> = fifos.iter().map(|id| fifo_ref(*id)).collect();
            let _ = writeln!(script, "mkfifo {}", names.join(" "));
        }

        for id in order {
            let node = ir.get_node(id).ok_or(IrError::UnknownNode(id))?;
            let line = self.render_node(ir, node)?;
            let _ = writeln!(script, "{line} &");
        }
        script.push_str("wait\n");
        Ok(script)
    }

    /// Render `ir` and write it to `path` as an executable file.
    pub fn write(&self, ir: &Ir, path: &Path) -> Result<(), EmitError> {
        let script = self.render(ir)?;
        let io_err = |source| EmitError::Io {
            path: path.to_path_buf(),
            source,
        };
        std::fs::write(path, script).map_err(io_err)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).map_err(io_err)?;
        }

        tracing::debug!(path = %path.display(), nodes = ir.node_count(), "wrote script");
        Ok(())
    }

    fn render_node(&self, ir: &Ir, node: &Node) -> Result<String, EmitError> {
        let mut words: Vec<String> = Vec::new();
        match node.kind() {
            NodeKind::Command { name, args } => {
                words.push(shell_quote(name));
                words.extend(args.iter().map(|a| shell_quote(a)));
                for id in node.inputs().iter().skip(1).chain(node.outputs().iter().skip(1)) {
                    words.push(operand(ir, node.id(), *id)?);
                }
                if let Some(id) = node.inputs().first() {
                    words.extend(redirect_in(ir, node.id(), *id)?);
                }
                if let Some(id) = node.outputs().first() {
                    words.extend(redirect_out(ir, node.id(), *id)?);
                }
            }
            NodeKind::RemotePipe {
                host,
                port,
                direction,
            } => {
                words.push(self.pipe_command.clone());
                words.push(direction.to_string());
                words.push("--host".to_string());
                words.push(shell_quote(host));
                words.push("--port".to_string());
                words.push(port.to_string());
                if let Some(id) = node.local_edges().first() {
                    let redirect = match direction {
                        Direction::Write => redirect_in(ir, node.id(), *id)?,
                        Direction::Read => redirect_out(ir, node.id(), *id)?,
                    };
                    words.extend(redirect);
                }
            }
        }
        Ok(words.join(" "))
    }
}

fn fifo_ref(id: FileId) -> String {
    format!("\"$fifos/f{}\"", id.0)
}

fn resource_of(ir: &Ir, id: FileId) -> Result<&Resource, EmitError> {
    ir.get_fid(id)
        .map(|fid| fid.resource())
        .ok_or(EmitError::Ir(IrError::UnknownEdge(id)))
}

/// An edge as a file operand.
fn operand(ir: &Ir, node: NodeId, id: FileId) -> Result<String, EmitError> {
    match resource_of(ir, id)? {
        Resource::Unbound => match ir.get_edge(id) {
            Some(entry) if entry.from.is_none() => Err(EmitError::UnproducedEdge { node, edge: id }),
            Some(entry) if entry.to.is_none() => Ok("/dev/null".to_string()),
            _ => Ok(fifo_ref(id)),
        },
        Resource::Path { path } => Ok(shell_quote(path)),
        Resource::Descriptor { fd } => Ok(format!("/dev/fd/{fd}")),
        Resource::Network { .. } => Err(EmitError::NetworkEdge { node, edge: id }),
    }
}

fn redirect_in(ir: &Ir, node: NodeId, id: FileId) -> Result<Option<String>, EmitError> {
    match resource_of(ir, id)? {
        Resource::Descriptor { fd: 0 } => Ok(Some(format!("<&{STDIN_COPY_FD}"))),
        Resource::Descriptor { fd } => Ok(Some(format!("<&{fd}"))),
        // The network side of a receive pipe is the pipe itself.
        Resource::Network { .. } => Ok(None),
        _ => Ok(Some(format!("< {}", operand(ir, node, id)?))),
    }
}

fn redirect_out(ir: &Ir, node: NodeId, id: FileId) -> Result<Option<String>, EmitError> {
    match resource_of(ir, id)? {
        Resource::Descriptor { fd: 1 } => Ok(None),
        Resource::Descriptor { fd } => Ok(Some(format!(">&{fd}"))),
        Resource::Network { .. } => Ok(None),
        _ => Ok(Some(format!("> {}", operand(ir, node, id)?))),
    }
}

/// Quote a word for bash, leaving plainly safe words alone.
pub fn shell_quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./=:,+@%".contains(c));
    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', "'\\''"))
    }
}
