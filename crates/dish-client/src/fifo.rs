//! Client for a scheduler served over named pipes.
//!
//! Each request is written as one line to the request FIFO. Compile and
//! Done then open the response FIFO and read one reply to end-of-stream.
//! Replies are not addressed, so one interpreter should own a scheduler.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use dish_kernel::channel::ChannelError;
use dish_kernel::compiler::CompileRequest;
use dish_kernel::paths;
use dish_kernel::scheduler::{ProcessId, Request, Response};

use crate::traits::{expect_admitted, expect_finished, ClientResult, SchedulerClient};

pub struct FifoClient {
    input: PathBuf,
    output: PathBuf,
}

impl FifoClient {
    /// `input` is the scheduler's request FIFO, `output` its response FIFO.
    pub fn new(input: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
        }
    }

    /// The FIFOs a default `dish serve` listens on.
    pub fn with_default_paths() -> Self {
        Self::new(paths::request_fifo(), paths::response_fifo())
    }

    async fn send(&self, request: &Request) -> ClientResult<()> {
        let io_err = |source| ChannelError::Io {
            op: "write",
            path: self.input.clone(),
            source,
        };
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .open(&self.input)
            .await
            .map_err(io_err)?;
        file.write_all(format!("{request}\n").as_bytes()).await.map_err(io_err)?;
        file.flush().await.map_err(io_err)?;
        tracing::debug!(%request, "sent request");
        Ok(())
    }

    async fn receive(&self) -> ClientResult<Response> {
        let io_err = |source| ChannelError::Io {
            op: "read",
            path: self.output.clone(),
            source,
        };
        let mut file = tokio::fs::File::open(&self.output).await.map_err(io_err)?;
        let mut text = String::new();
        file.read_to_string(&mut text).await.map_err(io_err)?;
        Ok(text.parse()?)
    }
}

#[async_trait]
impl SchedulerClient for FifoClient {
    async fn compile(&self, script: &Path, vars: &Path, ir: &Path) -> ClientResult<ProcessId> {
        let request = Request::Compile(CompileRequest {
            script: script.to_path_buf(),
            vars: vars.to_path_buf(),
            ir: ir.to_path_buf(),
        });
        self.send(&request).await?;
        expect_admitted(self.receive().await?)
    }

    async fn exit(&self, pid: ProcessId) -> ClientResult<()> {
        self.send(&Request::Exit(pid)).await
    }

    async fn done(&self) -> ClientResult<()> {
        self.send(&Request::Done).await?;
        expect_finished(self.receive().await?)
    }
}
