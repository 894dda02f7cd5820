//! Engine handle: a backend isolated on its own worker thread.
//!
//! ```text
//! controller ── EngineCommand ──> worker thread (owns the backend)
//! controller <── EngineEvent ──── worker thread
//! ```
//!
//! Every event carries the epoch of the command that produced it, so the
//! controller can tell a live run from a superseded one. The event channel
//! belongs to the controller and outlives individual engines: events from a
//! dropped engine can still arrive and are filtered by epoch.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use crossbeam_channel::{Sender, unbounded};
use palaver_abi::{ContextParams, InferenceBackend, SamplingParams};
use tracing::debug;

use crate::error::{Result, SessionError};

mod worker;

/// Which conversation and which run an in-flight engine operation belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub conversation: String,
    pub epoch: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineEvent {
    pub epoch: u64,
    pub kind: EngineEventKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineEventKind {
    /// Load progress in `0.0..=1.0`.
    LoadProgress(f32),
    Loaded(std::result::Result<(), String>),
    /// One decoded fragment and the seconds the backend spent on it.
    Token { fragment: String, elapsed: f64 },
    /// Generation ended (naturally, by cancellation, or with an error).
    Finished(std::result::Result<String, String>),
}

pub(crate) enum EngineCommand {
    Load {
        epoch: u64,
        model_path: PathBuf,
        context: ContextParams,
    },
    Configure {
        sampling: SamplingParams,
        context: ContextParams,
    },
    Generate {
        epoch: u64,
        prompt: String,
        cancel: Arc<AtomicBool>,
    },
    Shutdown,
}

/// Exclusive owner of one backend instance, bound to one conversation.
pub struct EngineHandle {
    conversation: String,
    cmd_tx: Sender<EngineCommand>,
    last_cancel: Option<Arc<AtomicBool>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl EngineHandle {
    /// Move `backend` onto a new worker thread.
    pub fn spawn(
        conversation: &str,
        backend: Box<dyn InferenceBackend>,
        events: Sender<EngineEvent>,
    ) -> Result<Self> {
        let (cmd_tx, cmd_rx) = unbounded::<EngineCommand>();
        let thread = thread::Builder::new()
            .name(format!("engine-{conversation}"))
            .spawn(move || worker::run(backend, cmd_rx, events))
            .map_err(SessionError::Spawn)?;

        debug!(conversation, "engine worker spawned");
        Ok(Self {
            conversation: conversation.to_string(),
            cmd_tx,
            last_cancel: None,
            thread: Some(thread),
        })
    }

    /// Conversation this engine was created for. Never changes.
    #[inline]
    pub fn conversation(&self) -> &str {
        &self.conversation
    }

    pub fn load(&self, epoch: u64, model_path: PathBuf, context: ContextParams) -> Result<()> {
        self.send(EngineCommand::Load {
            epoch,
            model_path,
            context,
        })
    }

    pub fn configure(&self, sampling: SamplingParams, context: ContextParams) -> Result<()> {
        self.send(EngineCommand::Configure { sampling, context })
    }

    /// Start a generation run. `cancel` is the run's own flag: the backend
    /// polls it between tokens.
    pub fn generate(&mut self, epoch: u64, prompt: String, cancel: Arc<AtomicBool>) -> Result<()> {
        self.last_cancel = Some(Arc::clone(&cancel));
        self.send(EngineCommand::Generate {
            epoch,
            prompt,
            cancel,
        })
    }

    /// Cancel whatever is running, stop the worker and wait for it to exit.
    pub fn shutdown(mut self) {
        self.stop_worker();
        if let Some(t) = self.thread.take() {
            let _ = t.join();
        }
    }

    fn send(&self, cmd: EngineCommand) -> Result<()> {
        self.cmd_tx.send(cmd).map_err(|_| SessionError::EngineGone)
    }

    fn stop_worker(&mut self) {
        if let Some(flag) = self.last_cancel.take() {
            flag.store(true, Ordering::Relaxed);
        }
        let _ = self.cmd_tx.send(EngineCommand::Shutdown);
    }
}

impl Drop for EngineHandle {
    /// Detaches the worker: it exits after the current command returns.
    /// Use [`EngineHandle::shutdown`] to wait for it.
    fn drop(&mut self) {
        if self.thread.is_some() {
            debug!(conversation = %self.conversation, "dropping engine");
            self.stop_worker();
        }
    }
}
