//! The request loop.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use super::keys::{derive_keys, find_conflict, ConflictKey, KeySet};
use super::protocol::{ProcessId, Request, Response};
use crate::channel::{ChannelError, ControlChannel};
use crate::compiler::{CompileContext, CompileRequest, PipelineCompiler};
use crate::config::DishConfig;
use crate::vars::ShellVars;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("control channel: {0}")]
    Channel(#[from] ChannelError),

    #[error("control channel closed before Done")]
    ChannelClosed,
}

/// An admitted pipeline. Fixed at admission, dropped on Exit.
#[derive(Debug, Clone)]
pub struct ProcessRecord {
    pub id: ProcessId,
    pub script: PathBuf,
    pub inputs: BTreeSet<ConflictKey>,
    pub outputs: BTreeSet<ConflictKey>,
}

/// Admits compiled pipelines one request at a time.
///
/// A pipeline whose keys collide with a running one is held until every
/// running pipeline has exited, then runs alone: the next Compile waits for
/// it in turn. While waiting only Exit requests are acted on; every other
/// line, malformed ones included, is queued and handled in order once the
/// wait is over. Replies are unaddressed, so nothing may be answered while
/// a Compile's reply is outstanding.
pub struct Scheduler<C> {
    compiler: C,
    config: Arc<DishConfig>,
    running: BTreeMap<ProcessId, ProcessRecord>,
    inputs: KeySet,
    outputs: KeySet,
    exclusive: bool,
    done: bool,
    next_pid: u64,
    /// Raw lines held back by a drain.
    deferred: VecDeque<String>,
}

impl<C: PipelineCompiler> Scheduler<C> {
    pub fn new(compiler: C, config: DishConfig) -> Self {
        Self {
            compiler,
            config: Arc::new(config),
            running: BTreeMap::new(),
            inputs: KeySet::new(),
            outputs: KeySet::new(),
            exclusive: false,
            done: false,
            next_pid: 1,
            deferred: VecDeque::new(),
        }
    }

    pub fn running(&self) -> impl Iterator<Item = &ProcessRecord> {
        self.running.values()
    }

    pub fn running_count(&self) -> usize {
        self.running.len()
    }

    /// True while the last admitted pipeline must run alone.
    pub fn is_exclusive(&self) -> bool {
        self.exclusive
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Serve requests until Done.
    pub async fn run<Ch: ControlChannel>(&mut self, channel: &mut Ch) -> Result<(), SchedulerError> {
        tracing::info!("scheduler started");
        while !self.done {
            let line = match self.deferred.pop_front() {
                Some(line) => line,
                None => channel.recv().await?.ok_or(SchedulerError::ChannelClosed)?,
            };
            match line.parse::<Request>() {
                Ok(request) => self.handle(request, channel).await?,
                Err(e) => {
                    tracing::warn!(line = %line, error = %e, "rejecting request");
                    channel.send(&Response::Error(e.to_string()).to_string()).await?;
                }
            }
        }
        tracing::info!("scheduler finished");
        Ok(())
    }

    async fn handle<Ch: ControlChannel>(&mut self, request: Request, channel: &mut Ch) -> Result<(), SchedulerError> {
        match request {
            Request::Compile(req) => self.handle_compile(req, channel).await,
            Request::Exit(pid) => {
                self.handle_exit(pid);
                Ok(())
            }
            Request::Done => {
                self.drain(channel).await?;
                channel.send(&Response::AllFinished.to_string()).await?;
                self.done = true;
                Ok(())
            }
        }
    }

    #[tracing::instrument(level = "info", skip(self, request, channel), fields(script = %request.script.display()), err)]
    async fn handle_compile<Ch: ControlChannel>(
        &mut self,
        request: CompileRequest,
        channel: &mut Ch,
    ) -> Result<(), SchedulerError> {
        if self.exclusive {
            tracing::debug!("waiting for exclusive pipeline");
            self.drain(channel).await?;
        }

        let pid = ProcessId(self.next_pid);
        self.next_pid += 1;

        let vars = match ShellVars::read(&request.vars) {
            Ok(vars) => vars,
            Err(e) => return self.reject(channel, pid, e.to_string()).await,
        };
        let ctx = CompileContext {
            config: Arc::clone(&self.config),
            vars,
        };
        let compiled = match self.compiler.compile(&request, &ctx).await {
            Ok(compiled) => compiled,
            Err(e) => return self.reject(channel, pid, e.to_string()).await,
        };

        let keys = derive_keys(&compiled.ir);
        tracing::debug!(%pid, inputs = ?keys.inputs, outputs = ?keys.outputs, "derived keys");

        if let Some(key) = find_conflict(&keys, &self.inputs, &self.outputs) {
            tracing::info!(%pid, %key, running = self.running.len(), "conflict, draining");
            self.drain(channel).await?;
            self.exclusive = true;
        }

        self.inputs.add_all(&keys.inputs);
        self.outputs.add_all(&keys.outputs);
        self.running.insert(
            pid,
            ProcessRecord {
                id: pid,
                script: compiled.script,
                inputs: keys.inputs,
                outputs: keys.outputs,
            },
        );
        tracing::info!(%pid, exclusive = self.exclusive, "admitted");

        channel.send(&Response::Ok { pid, request }.to_string()).await?;
        Ok(())
    }

    async fn reject<Ch: ControlChannel>(
        &self,
        channel: &mut Ch,
        pid: ProcessId,
        message: String,
    ) -> Result<(), SchedulerError> {
        tracing::error!(%pid, error = %message, "compilation failed");
        channel.send(&Response::Error(message).to_string()).await?;
        Ok(())
    }

    fn handle_exit(&mut self, pid: ProcessId) {
        let Some(record) = self.running.remove(&pid) else {
            tracing::warn!(%pid, "exit for unknown process");
            return;
        };
        self.inputs.remove_all(&record.inputs);
        self.outputs.remove_all(&record.outputs);
        if self.running.is_empty() {
            self.exclusive = false;
        }
        tracing::info!(%pid, running = self.running.len(), "exited");
    }

    /// Block until nothing is running.
    async fn drain<Ch: ControlChannel>(&mut self, channel: &mut Ch) -> Result<(), SchedulerError> {
        if !self.running.is_empty() {
            tracing::info!(running = self.running.len(), "draining");
        }
        while !self.running.is_empty() {
            let line = channel.recv().await?.ok_or(SchedulerError::ChannelClosed)?;
            match line.parse::<Request>() {
                Ok(Request::Exit(pid)) => self.handle_exit(pid),
                _ => {
                    tracing::warn!(line = %line, "deferring request until drain completes");
                    self.deferred.push_back(line);
                }
            }
        }
        self.exclusive = false;
        Ok(())
    }
}
