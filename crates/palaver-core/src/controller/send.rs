use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use palaver_abi::{BackendFactory, InferenceBackend};
use tracing::{debug, info, info_span, warn};

use super::{LoadState, SendOutcome, SessionController};
use crate::config::{ConfigSource, ResolvedChat, resolve_chat};
use crate::engine::{Binding, EngineHandle};
use crate::error::{Result, SessionError};
use crate::message::Message;
use crate::stop::StopSequences;

const LOADING_TITLE: &str = "loading...";

/// Config resolved and backend built; nothing in the session touched yet.
struct PreparedLoad {
    resolved: ResolvedChat,
    backend: Box<dyn InferenceBackend>,
}

impl<C: ConfigSource, F: BackendFactory> SessionController<C, F> {
    /// Send user text: appends it as a user message and starts a run,
    /// loading the model first if needed.
    pub fn send(&mut self, text: &str) -> Result<SendOutcome> {
        self.send_with(text, true)
    }

    /// Like [`SessionController::send`]; `append_user_message = false` reuses
    /// the last message as the turn's prompt.
    ///
    /// Fails with [`SessionError::Busy`] while a load or run is in flight, and
    /// with a configuration error (leaving the session untouched) when no
    /// engine can be created.
    pub fn send_with(&mut self, text: &str, append_user_message: bool) -> Result<SendOutcome> {
        if self.snapshot.is_busy() {
            return Err(SessionError::Busy);
        }

        if self
            .engine
            .as_ref()
            .is_some_and(|e| e.conversation() != self.conversation)
        {
            debug!(conversation = %self.conversation, "engine belongs to another conversation; dropping it");
            self.engine = None;
            self.snapshot.load_state = LoadState::Idle;
        }

        if self.engine.is_none() {
            let prepared = self.prepare_load()?;
            self.begin_load(prepared, text)?;
            self.begin_turn(text, append_user_message);
            self.publish();
            return Ok(SendOutcome::Loading);
        }

        self.begin_turn(text, append_user_message);
        self.start_run(text.to_string())?;
        Ok(SendOutcome::Generating)
    }

    /// Resolve the current conversation's model, create a fresh engine for it
    /// and load it; `text` is sent once the load completes.
    ///
    /// Returns [`SessionError::NotFound`] if the chat config, its `model` or
    /// `model_inference` key, or the model path is missing. In that case no
    /// engine is created and no message is appended.
    pub fn load_and_then_send(&mut self, text: &str) -> Result<()> {
        if self.snapshot.is_busy() {
            return Err(SessionError::Busy);
        }
        let prepared = self.prepare_load()?;
        self.begin_load(prepared, text)
    }

    fn prepare_load(&self) -> Result<PreparedLoad> {
        let resolved = resolve_chat(&self.config, &self.conversation)?;
        let kind = resolved.context.model_inference.clone();
        let backend = self
            .factory
            .create(&kind)
            .map_err(|reason| SessionError::UnsupportedInference { kind, reason })?;
        Ok(PreparedLoad { resolved, backend })
    }

    fn begin_turn(&mut self, text: &str, append_user_message: bool) {
        if append_user_message {
            self.append(Message::typed(text));
        }
        self.snapshot.typing += 1;
        self.snapshot.load_progress = 0.0;
    }

    fn begin_load(&mut self, prepared: PreparedLoad, text: &str) -> Result<()> {
        let PreparedLoad { resolved, backend } = prepared;

        // Old engine (if any) goes first; its events are stale from now on.
        self.engine = None;
        let engine = EngineHandle::spawn(&self.conversation, backend, self.events_tx.clone())?;

        let epoch = self.next_epoch();
        engine.load(epoch, resolved.model_path.clone(), resolved.context.clone())?;
        info!(
            conversation = %self.conversation,
            epoch,
            model = %resolved.model_name,
            "loading model"
        );

        self.engine = Some(engine);
        self.binding = Some(Binding {
            conversation: self.conversation.clone(),
            epoch,
        });
        self.cancel = Arc::new(AtomicBool::new(false));
        self.stops = StopSequences::new(resolved.context.reverse_prompt.iter().cloned());
        self.sampling = resolved.sampling;
        self.context = resolved.context;
        self.pending_prompt = Some(text.to_string());

        self.snapshot.load_state = LoadState::Loading;
        self.snapshot.load_progress = 0.0;
        self.title_backup = std::mem::replace(&mut self.snapshot.title, LOADING_TITLE.into());
        self.publish();
        Ok(())
    }

    /// Append the pending message and ask the engine to generate.
    fn start_run(&mut self, text: String) -> Result<()> {
        if self.engine.is_none() {
            return Err(SessionError::EngineGone);
        }

        let epoch = self.next_epoch();
        let cancel = Arc::new(AtomicBool::new(false));
        self.cancel = Arc::clone(&cancel);
        self.binding = Some(Binding {
            conversation: self.conversation.clone(),
            epoch,
        });
        self.metrics.reset();

        let index = self.append(Message::pending());
        self.active_index = Some(index);
        self.snapshot.load_state = LoadState::Ready;
        self.snapshot.predicting = true;

        let _span = info_span!("run", conversation = %self.conversation, epoch).entered();
        debug!(index, "run started");

        let prompt = self.context.format_prompt(&text);
        let sent = match self.engine.as_mut() {
            Some(engine) => engine.generate(epoch, prompt, cancel),
            None => Err(SessionError::EngineGone),
        };
        if let Err(e) = sent {
            warn!(error = %e, "engine rejected generate; dropping it");
            self.engine = None;
            self.snapshot.load_state = LoadState::Idle;
            self.stop_predicting(true);
            return Err(e);
        }

        self.publish();
        Ok(())
    }

    pub(super) fn on_load_finished(&mut self, epoch: u64, result: std::result::Result<(), String>) {
        if !self.is_current(epoch) {
            debug!(epoch, "stale load completion dropped");
            return;
        }

        if let Err(reason) = result {
            self.pending_prompt = None;
            self.engine = None;
            self.finish_load(Some(format!("Load Model {reason}")));
            return;
        }

        self.finish_load(None);
        if let Some(engine) = &self.engine {
            if let Err(e) = engine.configure(self.sampling.clone(), self.context.clone()) {
                warn!(error = %e, "could not configure engine");
            }
        }

        let Some(mut text) = self.pending_prompt.take() else {
            return;
        };
        let system = self.context.system_prompt.clone();
        if !system.is_empty() {
            text = format!("{system}\n{text}");
            if let Some(i) = self.store.last_index() {
                if let Some(m) = self.store.get_mut(i) {
                    m.header = Some(system);
                }
                self.notify_updated(i);
            }
        }

        if let Err(e) = self.start_run(text) {
            warn!(error = %e, "run after load failed to start");
        }
    }

    /// Leave the loading state. An error text is recorded in-band and closes the turn.
    fn finish_load(&mut self, error: Option<String>) {
        self.snapshot.title = std::mem::take(&mut self.title_backup);
        match error {
            Some(text) => {
                warn!(conversation = %self.conversation, %text, "load failed");
                self.snapshot.load_state = LoadState::Idle;
                self.append(Message::error(text));
                self.stop_predicting(true);
            }
            None => {
                self.snapshot.load_state = LoadState::Ready;
                self.snapshot.load_progress = 1.0;
                self.publish();
            }
        }
    }
}
