//! Control channels between the interpreter and the scheduler.
//!
//! Requests and responses are single lines of text. The scheduler pulls
//! requests with `recv` and answers with `send`; `None` from `recv` means
//! no more requests can ever arrive.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("{op} {path}: {source}")]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot create fifo {path}: {source}")]
    Mkfifo {
        path: PathBuf,
        #[source]
        source: nix::Error,
    },

    #[error("{0} exists and is not a fifo")]
    NotAFifo(PathBuf),

    #[error("peer hung up")]
    Closed,
}

/// The scheduler's side of a control channel.
#[async_trait]
pub trait ControlChannel: Send {
    /// Next request line, without its terminator.
    async fn recv(&mut self) -> Result<Option<String>, ChannelError>;

    /// Deliver one response.
    async fn send(&mut self, message: &str) -> Result<(), ChannelError>;
}

// ═══════════════════════════════════════════════════════════════════════════
// Named FIFOs
// ═══════════════════════════════════════════════════════════════════════════

/// A pair of named pipes.
///
/// The request FIFO is opened once per batch and read until every writer has
/// closed it; one batch may hold several requests. The response FIFO is
/// opened, written, and closed once per response.
#[derive(Debug)]
pub struct FifoChannel {
    input: PathBuf,
    output: PathBuf,
    pending: VecDeque<String>,
}

impl FifoChannel {
    /// Use existing FIFOs.
    pub fn new(input: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            pending: VecDeque::new(),
        }
    }

    /// Create the FIFOs (and their directories) if absent, then use them.
    pub fn create(input: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Result<Self, ChannelError> {
        let channel = Self::new(input, output);
        ensure_fifo(&channel.input)?;
        ensure_fifo(&channel.output)?;
        Ok(channel)
    }

    pub fn input(&self) -> &Path {
        &self.input
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    async fn read_batch(&mut self) -> Result<(), ChannelError> {
        let io_err = |source| ChannelError::Io {
            op: "read",
            path: self.input.clone(),
            source,
        };
        let mut file = tokio::fs::File::open(&self.input).await.map_err(io_err)?;
        let mut batch = String::new();
        file.read_to_string(&mut batch).await.map_err(io_err)?;
        self.pending.extend(
            batch
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string),
        );
        Ok(())
    }
}

#[async_trait]
impl ControlChannel for FifoChannel {
    async fn recv(&mut self) -> Result<Option<String>, ChannelError> {
        // A writer that opens and closes without writing yields an empty
        // batch; keep waiting for a real one.
        while self.pending.is_empty() {
            self.read_batch().await?;
        }
        Ok(self.pending.pop_front())
    }

    async fn send(&mut self, message: &str) -> Result<(), ChannelError> {
        let io_err = |source| ChannelError::Io {
            op: "write",
            path: self.output.clone(),
            source,
        };
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .open(&self.output)
            .await
            .map_err(io_err)?;
        file.write_all(message.as_bytes()).await.map_err(io_err)?;
        file.flush().await.map_err(io_err)?;
        Ok(())
    }
}

/// Make `path` a FIFO, creating parent directories as needed.
pub fn ensure_fifo(path: &Path) -> Result<(), ChannelError> {
    use std::os::unix::fs::FileTypeExt;

    match std::fs::metadata(path) {
        Ok(meta) if meta.file_type().is_fifo() => return Ok(()),
        Ok(_) => return Err(ChannelError::NotAFifo(path.to_path_buf())),
        Err(_) => {}
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| ChannelError::Io {
            op: "create",
            path: parent.to_path_buf(),
            source,
        })?;
    }
    nix::unistd::mkfifo(path, nix::sys::stat::Mode::S_IRWXU).map_err(|source| ChannelError::Mkfifo {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::debug!(path = %path.display(), "created fifo");
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════
// In-memory
// ═══════════════════════════════════════════════════════════════════════════

/// An in-process channel, for embedding the scheduler and for tests.
#[derive(Debug)]
pub struct MemoryChannel {
    requests: mpsc::UnboundedReceiver<String>,
    responses: mpsc::UnboundedSender<String>,
}

/// The interpreter's end of a `MemoryChannel`.
#[derive(Debug)]
pub struct MemoryPeer {
    requests: Option<mpsc::UnboundedSender<String>>,
    responses: mpsc::UnboundedReceiver<String>,
}

impl MemoryChannel {
    pub fn pair() -> (MemoryChannel, MemoryPeer) {
        let (req_tx, req_rx) = mpsc::unbounded_channel();
        let (resp_tx, resp_rx) = mpsc::unbounded_channel();
        (
            MemoryChannel {
                requests: req_rx,
                responses: resp_tx,
            },
            MemoryPeer {
                requests: Some(req_tx),
                responses: resp_rx,
            },
        )
    }
}

#[async_trait]
impl ControlChannel for MemoryChannel {
    async fn recv(&mut self) -> Result<Option<String>, ChannelError> {
        Ok(self.requests.recv().await)
    }

    async fn send(&mut self, message: &str) -> Result<(), ChannelError> {
        self.responses
            .send(message.to_string())
            .map_err(|_| ChannelError::Closed)
    }
}

impl MemoryPeer {
    /// Queue a request line.
    pub fn request(&self, line: impl Into<String>) -> Result<(), ChannelError> {
        let sender = self.requests.as_ref().ok_or(ChannelError::Closed)?;
        sender.send(line.into()).map_err(|_| ChannelError::Closed)
    }

    /// Another handle for queueing requests, usable without the peer.
    pub fn sender(&self) -> Result<mpsc::UnboundedSender<String>, ChannelError> {
        self.requests.clone().ok_or(ChannelError::Closed)
    }

    /// Stop sending requests; the scheduler sees the channel close once it
    /// has drained what was queued.
    pub fn hang_up(&mut self) {
        self.requests = None;
    }

    /// Wait for the next response.
    pub async fn response(&mut self) -> Option<String> {
        self.responses.recv().await
    }

    /// A response, if one is already waiting.
    pub fn try_response(&mut self) -> Option<String> {
        self.responses.try_recv().ok()
    }
}
