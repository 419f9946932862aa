//! Embedded client running a scheduler in-process.
//!
//! The scheduler runs on its own task, fed by a `MemoryChannel`. Requests
//! that expect a reply hold the response lock from send to reply, so each
//! reply reaches the caller that asked for it. Exit needs no reply and never
//! waits on that lock: a Compile blocked on a conflict must not keep the
//! Exit it is waiting for from getting through.

use std::path::Path;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use dish_kernel::channel::{MemoryChannel, MemoryPeer};
use dish_kernel::compiler::{CompileRequest, PipelineCompiler};
use dish_kernel::config::DishConfig;
use dish_kernel::scheduler::{ProcessId, Request, Response, Scheduler, SchedulerError};

use crate::traits::{expect_admitted, expect_finished, ClientError, ClientResult, SchedulerClient};

/// A client that owns its scheduler.
///
/// # Example
///
/// ```ignore
/// use dish_client::{EmbeddedClient, SchedulerClient};
/// use dish_kernel::{DishConfig, SnapshotCompiler};
///
/// let config = DishConfig::default();
/// let client = EmbeddedClient::spawn(SnapshotCompiler::new(&config), config);
/// let pid = client.compile(script, vars, ir).await?;
/// client.exit(pid).await?;
/// client.done().await?;
/// ```
pub struct EmbeddedClient {
    requests: Option<mpsc::UnboundedSender<String>>,
    peer: Mutex<MemoryPeer>,
    task: Mutex<Option<JoinHandle<Result<(), SchedulerError>>>>,
}

impl EmbeddedClient {
    /// Start a scheduler on a new task.
    pub fn spawn<C>(compiler: C, config: DishConfig) -> Self
    where
        C: PipelineCompiler + 'static,
    {
        let (mut channel, peer) = MemoryChannel::pair();
        let task = tokio::spawn(async move {
            let mut scheduler = Scheduler::new(compiler, config);
            scheduler.run(&mut channel).await
        });
        Self {
            requests: peer.sender().ok(),
            peer: Mutex::new(peer),
            task: Mutex::new(Some(task)),
        }
    }

    fn send(&self, request: &Request) -> ClientResult<()> {
        let requests = self.requests.as_ref().ok_or(ClientError::NotConnected)?;
        requests
            .send(request.to_string())
            .map_err(|_| ClientError::NotConnected)
    }

    async fn round_trip(&self, request: Request) -> ClientResult<Response> {
        let mut peer = self.peer.lock().await;
        self.send(&request)?;
        let text = peer.response().await.ok_or(ClientError::NotConnected)?;
        Ok(text.parse()?)
    }

    /// Wait for the scheduler task to end and return how it ended.
    pub async fn join(&self) -> ClientResult<Result<(), SchedulerError>> {
        let handle = self.task.lock().await.take().ok_or(ClientError::NotConnected)?;
        handle.await.map_err(|_| ClientError::NotConnected)
    }
}

#[async_trait]
impl SchedulerClient for EmbeddedClient {
    async fn compile(&self, script: &Path, vars: &Path, ir: &Path) -> ClientResult<ProcessId> {
        let request = Request::Compile(CompileRequest {
            script: script.to_path_buf(),
            vars: vars.to_path_buf(),
            ir: ir.to_path_buf(),
        });
        expect_admitted(self.round_trip(request).await?)
    }

    async fn exit(&self, pid: ProcessId) -> ClientResult<()> {
        self.send(&Request::Exit(pid))
    }

    async fn done(&self) -> ClientResult<()> {
        expect_finished(self.round_trip(Request::Done).await?)
    }
}
