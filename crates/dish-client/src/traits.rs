//! Common trait for scheduler clients.

use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;

use dish_kernel::channel::ChannelError;
use dish_kernel::scheduler::{ProcessId, ProtocolError, Response};

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors that can occur when talking to the scheduler.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The scheduler answered with `ERROR:`.
    #[error("scheduler rejected request: {0}")]
    Rejected(String),

    /// The scheduler answered something that doesn't fit the request.
    #[error("unexpected response: {0:?}")]
    Unexpected(Response),

    /// The reply could not be decoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Reading or writing a control channel failed.
    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),

    /// The scheduler is gone.
    #[error("not connected")]
    NotConnected,
}

/// Common interface for talking to a scheduler.
#[async_trait]
pub trait SchedulerClient: Send + Sync {
    /// Ask for a pipeline to be compiled. Returns once it is admitted.
    async fn compile(&self, script: &Path, vars: &Path, ir: &Path) -> ClientResult<ProcessId>;

    /// Report that an admitted pipeline has finished. There is no reply.
    async fn exit(&self, pid: ProcessId) -> ClientResult<()>;

    /// Wait for everything to finish and stop the scheduler.
    async fn done(&self) -> ClientResult<()>;
}

/// Turn a Compile reply into a process id.
pub(crate) fn expect_admitted(response: Response) -> ClientResult<ProcessId> {
    match response {
        Response::Ok { pid, .. } => Ok(pid),
        Response::Error(message) => Err(ClientError::Rejected(message)),
        other => Err(ClientError::Unexpected(other)),
    }
}

/// Check a Done reply.
pub(crate) fn expect_finished(response: Response) -> ClientResult<()> {
    match response {
        Response::AllFinished => Ok(()),
        Response::Error(message) => Err(ClientError::Rejected(message)),
        other => Err(ClientError::Unexpected(other)),
    }
}
