//! Async runtime for a synchronization session.
//!
//! One tokio task owns the [`SyncEngine`]. Native values publish into an
//! unbounded queue through [`ChannelObserver`], so native mutators never
//! block on the mirror. Mirror requests arrive through [`SyncHandle`]; only
//! command invocation waits for its own reply.
//!
//! Every time the task wakes up for native events it drains whatever is
//! already queued and emits at most one envelope for the lot.

use crate::config::SyncConfig;
use crate::engine::{MirrorOutcome, MirrorRequest, SyncEngine};
use crate::error::{SyncError, SyncResult};
use crate::observer::ChannelObserver;
use serde_json::Value;
use std::sync::Arc;
use tether_common::{GlueResult, SessionId};
use tether_glue::{Envelope, MirrorValue, NativeEvent, NativeValue, SharedObserver};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info};

enum Command {
    Mirror(MirrorRequest),
    Invoke {
        target: SessionId,
        args: Vec<MirrorValue>,
        reply: oneshot::Sender<GlueResult<Value>>,
    },
    /// Reply once every native event queued so far has been processed
    Flush(oneshot::Sender<()>),
    Shutdown,
}

/// Mirror-side entry point into a running session
#[derive(Clone)]
pub struct SyncHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl SyncHandle {
    fn send_command(&self, command: Command) -> SyncResult<()> {
        self.commands
            .send(command)
            .map_err(|_| SyncError::ChannelClosed("command"))
    }

    /// Enqueue a mirror request without waiting for it to be applied
    pub fn send(&self, request: MirrorRequest) -> SyncResult<()> {
        self.send_command(Command::Mirror(request))
    }

    /// Invoke a native command and wait for its serialized result
    pub async fn invoke(&self, target: SessionId, args: Vec<MirrorValue>) -> SyncResult<Value> {
        let (reply, response) = oneshot::channel();
        self.send_command(Command::Invoke {
            target,
            args,
            reply,
        })?;
        let value = response
            .await
            .map_err(|_| SyncError::ChannelClosed("reply"))??;
        Ok(value)
    }

    /// Wait until the session has caught up with queued native events
    pub async fn flush(&self) -> SyncResult<()> {
        let (done, waiter) = oneshot::channel();
        self.send_command(Command::Flush(done))?;
        waiter.await.map_err(|_| SyncError::ChannelClosed("reply"))
    }

    pub fn shutdown(&self) -> SyncResult<()> {
        self.send_command(Command::Shutdown)
    }
}

/// A running session: the request handle, the outbound envelope stream
/// (starting with the bind envelope) and the task itself
pub struct SyncSession {
    pub handle: SyncHandle,
    pub updates: UnboundedReceiverStream<Envelope>,
    pub task: JoinHandle<SyncResult<()>>,
}

impl SyncSession {
    /// Stop the task and wait for it to finish
    pub async fn join(self) -> SyncResult<()> {
        // The task may already have stopped on an internal fault
        let _ = self.handle.shutdown();
        self.task.await?
    }
}

/// Bind `root` and start its sync task on the current tokio runtime
pub fn spawn(config: SyncConfig, root: NativeValue) -> SyncResult<SyncSession> {
    let (native_tx, native_rx) = mpsc::unbounded_channel();
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

    let observer: SharedObserver = Arc::new(ChannelObserver::new(native_tx));
    let mut engine = SyncEngine::new(config, observer);
    let envelope = engine.bind(&root)?;
    outbound_tx
        .send(envelope)
        .map_err(|_| SyncError::ChannelClosed("outbound"))?;

    let actor = SyncActor {
        engine,
        native_rx,
        command_rx,
        outbound: outbound_tx,
    };
    Ok(SyncSession {
        handle: SyncHandle {
            commands: command_tx,
        },
        updates: UnboundedReceiverStream::new(outbound_rx),
        task: tokio::spawn(actor.run()),
    })
}

struct SyncActor {
    engine: SyncEngine,
    native_rx: mpsc::UnboundedReceiver<NativeEvent>,
    command_rx: mpsc::UnboundedReceiver<Command>,
    outbound: mpsc::UnboundedSender<Envelope>,
}

impl SyncActor {
    async fn run(mut self) -> SyncResult<()> {
        info!("sync session started");
        loop {
            tokio::select! {
                command = self.command_rx.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle(command)?,
                },
                Some(event) = self.native_rx.recv() => self.tick(vec![event])?,
            }
        }
        self.engine.teardown();
        info!("sync session stopped");
        Ok(())
    }

    fn tick(&mut self, mut events: Vec<NativeEvent>) -> SyncResult<()> {
        while let Ok(event) = self.native_rx.try_recv() {
            events.push(event);
        }
        if events.is_empty() {
            return Ok(());
        }
        debug!(events = events.len(), "native tick");
        if let Some(patch) = self.engine.process_native(events)? {
            let envelope = patch.envelope(&self.engine.config().envelope_operation);
            self.emit(envelope)?;
        }
        Ok(())
    }

    fn handle(&mut self, command: Command) -> SyncResult<()> {
        // Mirror requests are planned against a graph that has seen every
        // native change queued before them
        self.tick(Vec::new())?;

        match command {
            Command::Mirror(request) => {
                let reply = self.engine.process_mirror(request)?;
                if let MirrorOutcome::Rejected(err) = &reply.outcome {
                    debug!(error = %err, "mirror request had no native effect");
                }
                if let Some(patch) = reply.patch {
                    let envelope = patch.envelope(&self.engine.config().envelope_operation);
                    self.emit(envelope)?;
                }
            }
            Command::Invoke {
                target,
                args,
                reply,
            } => {
                let result = self.engine.invoke(target, &args);
                if let Err(err) = &result {
                    if err.is_internal_fault() {
                        let err = err.clone();
                        let _ = reply.send(result);
                        return Err(err.into());
                    }
                }
                let _ = reply.send(result);
            }
            Command::Flush(done) => {
                let _ = done.send(());
            }
            Command::Shutdown => {}
        }
        Ok(())
    }

    fn emit(&self, envelope: Envelope) -> SyncResult<()> {
        self.outbound
            .send(envelope)
            .map_err(|_| SyncError::ChannelClosed("outbound"))
    }
}
