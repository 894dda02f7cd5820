//! Session controller: the single owner of conversation state.
//!
//! Every operation takes `&mut self` and one thread drives the controller.
//! Engine callbacks arrive on a channel and are applied by
//! [`SessionController::dispatch`] (usually through [`SessionController::pump`]),
//! which serializes them with user calls.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use palaver_abi::{BackendFactory, ContextParams, SamplingParams};
use tracing::{debug, trace};

use crate::config::ConfigSource;
use crate::engine::{Binding, EngineEvent, EngineEventKind, EngineHandle};
use crate::history::HistoryWriter;
use crate::message::Message;
use crate::metrics::RunMetrics;
use crate::stop::StopSequences;
use crate::store::MessageStore;

mod finish;
mod send;
mod state;

pub use state::{LoadState, SendOutcome, SessionNotice, SessionSnapshot};

pub struct SessionController<C: ConfigSource, F: BackendFactory> {
    config: C,
    factory: F,

    conversation: String,
    store: MessageStore,
    /// Index of the message the current run streams into.
    active_index: Option<usize>,

    engine: Option<EngineHandle>,
    /// What the in-flight load/run was started for.
    binding: Option<Binding>,
    epoch: u64,
    /// Cancel flag of the current run. Replaced (never reset) per run, so a
    /// superseded run stays cancelled.
    cancel: Arc<AtomicBool>,
    /// Text waiting for the model load to finish.
    pending_prompt: Option<String>,

    sampling: SamplingParams,
    context: ContextParams,
    stops: StopSequences,
    metrics: RunMetrics,

    snapshot: SessionSnapshot,
    title_backup: String,
    subscribers: Vec<Sender<SessionNotice>>,

    events_tx: Sender<EngineEvent>,
    events_rx: Receiver<EngineEvent>,
    history: HistoryWriter,
}

impl<C: ConfigSource, F: BackendFactory> SessionController<C, F> {
    pub fn new(conversation: &str, config: C, factory: F, history: HistoryWriter) -> Self {
        let (events_tx, events_rx) = unbounded();
        Self {
            config,
            factory,
            conversation: conversation.to_string(),
            store: MessageStore::new(),
            active_index: None,
            engine: None,
            binding: None,
            epoch: 0,
            cancel: Arc::new(AtomicBool::new(false)),
            pending_prompt: None,
            sampling: SamplingParams::default(),
            context: ContextParams::default(),
            stops: StopSequences::default(),
            metrics: RunMetrics::start(),
            snapshot: SessionSnapshot::new(conversation),
            title_backup: String::new(),
            subscribers: Vec::new(),
            events_tx,
            events_rx,
            history,
        }
    }

    /// Start from an existing message list (e.g. loaded from history).
    pub fn with_messages(mut self, messages: Vec<Message>) -> Self {
        self.store = MessageStore::from_messages(messages);
        self
    }

    // ────────────────────────────────────────────────────────────────────────────────
    // Observation
    // ────────────────────────────────────────────────────────────────────────────────

    #[inline]
    pub fn conversation(&self) -> &str {
        &self.conversation
    }

    #[inline]
    pub fn messages(&self) -> &[Message] {
        self.store.as_slice()
    }

    #[inline]
    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    #[inline]
    pub fn snapshot(&self) -> &SessionSnapshot {
        &self.snapshot
    }

    #[inline]
    pub fn metrics(&self) -> &RunMetrics {
        &self.metrics
    }

    #[inline]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    #[inline]
    pub fn active_index(&self) -> Option<usize> {
        self.active_index
    }

    #[inline]
    pub fn has_engine(&self) -> bool {
        self.engine.is_some()
    }

    /// Cancel flag of the current run, as seen by the backend.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn sampling_params(&self) -> &SamplingParams {
        &self.sampling
    }

    pub fn context_params(&self) -> &ContextParams {
        &self.context
    }

    /// Receive every subsequent notice. Dropped receivers are pruned lazily.
    pub fn subscribe(&mut self) -> Receiver<SessionNotice> {
        let (tx, rx) = unbounded();
        let _ = tx.send(SessionNotice::State(self.snapshot.clone()));
        self.subscribers.push(tx);
        rx
    }

    /// Block until all persisted snapshots handed out so far are written.
    pub fn flush_history(&self) {
        self.history.flush();
    }

    // ────────────────────────────────────────────────────────────────────────────────
    // Conversation management
    // ────────────────────────────────────────────────────────────────────────────────

    /// Make `name` the current conversation with `messages` as its history.
    ///
    /// A run in flight is stopped and saved under the old name first. A loaded
    /// engine is kept until the next send, which drops it if it belongs to
    /// another conversation; an engine still loading is dropped now. Anything
    /// either emits is stale from here on.
    pub fn switch_conversation(&mut self, name: &str, messages: Vec<Message>) {
        if self.snapshot.predicting {
            self.stop_predicting(false);
        }
        debug!(from = %self.conversation, to = name, "switching conversation");
        self.cancel.store(true, Ordering::Relaxed);
        self.pending_prompt = None;
        self.active_index = None;
        self.conversation = name.to_string();
        self.store = MessageStore::from_messages(messages);

        self.snapshot.conversation = name.to_string();
        self.snapshot.title = name.to_string();
        self.snapshot.predicting = false;
        self.snapshot.typing = 0;
        if self.snapshot.load_state == LoadState::Loading {
            // A half-loaded engine is never reused; its completion is stale
            // from here on, so configure and the system prompt would be skipped.
            self.engine = None;
            self.binding = None;
            self.title_backup.clear();
            self.snapshot.load_state = LoadState::Idle;
        }
        self.publish();
    }

    /// Drop the engine; the next send reloads the model.
    pub fn reload(&mut self) {
        if self.snapshot.predicting {
            self.stop_predicting(false);
        }
        self.cancel.store(true, Ordering::Relaxed);
        self.binding = None;
        self.pending_prompt = None;
        self.engine = None;
        self.snapshot.load_state = LoadState::Idle;
        self.publish();
    }

    // ────────────────────────────────────────────────────────────────────────────────
    // Event pump
    // ────────────────────────────────────────────────────────────────────────────────

    /// Apply one engine event. This is the only path by which backend output
    /// reaches the message store.
    pub fn dispatch(&mut self, event: EngineEvent) {
        let EngineEvent { epoch, kind } = event;
        match kind {
            EngineEventKind::LoadProgress(p) => {
                if self.is_current(epoch) {
                    self.snapshot.load_progress = p;
                    self.publish();
                } else {
                    trace!(epoch, "stale load progress dropped");
                }
            }
            EngineEventKind::Loaded(result) => self.on_load_finished(epoch, result),
            EngineEventKind::Token { fragment, elapsed } => match self.active_index {
                Some(index) => {
                    self.process_predicted_fragment(epoch, &fragment, elapsed, index);
                }
                None => trace!(epoch, "fragment with no active message dropped"),
            },
            EngineEventKind::Finished(result) => self.on_generation_finished(epoch, result),
        }
    }

    /// Apply every event already queued. Returns how many were applied.
    pub fn pump(&mut self) -> usize {
        let mut n = 0;
        while let Ok(ev) = self.events_rx.try_recv() {
            self.dispatch(ev);
            n += 1;
        }
        n
    }

    /// Wait up to `timeout` for at least one event, then drain the queue.
    pub fn pump_timeout(&mut self, timeout: Duration) -> usize {
        match self.events_rx.recv_timeout(timeout) {
            Ok(ev) => {
                self.dispatch(ev);
                1 + self.pump()
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => 0,
        }
    }

    /// Pump until no load or run is in flight. Returns `false` on timeout.
    pub fn run_until_idle(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.snapshot.is_busy() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            self.pump_timeout(deadline - now);
        }
        true
    }

    // ────────────────────────────────────────────────────────────────────────────────
    // Internal helpers
    // ────────────────────────────────────────────────────────────────────────────────

    /// The event belongs to the latest load/run of the current conversation.
    fn is_current(&self, epoch: u64) -> bool {
        self.binding
            .as_ref()
            .is_some_and(|b| b.epoch == epoch && b.conversation == self.conversation)
    }

    /// Current and not cancelled: output may still be applied.
    fn run_is_live(&self, epoch: u64) -> bool {
        !self.cancel.load(Ordering::Relaxed) && self.is_current(epoch)
    }

    fn next_epoch(&mut self) -> u64 {
        self.epoch += 1;
        self.epoch
    }

    fn notify(&mut self, notice: SessionNotice) {
        self.subscribers.retain(|tx| tx.send(notice.clone()).is_ok());
    }

    fn publish(&mut self) {
        let snap = SessionNotice::State(self.snapshot.clone());
        self.notify(snap);
    }

    fn notify_updated(&mut self, index: usize) {
        if let Some(message) = self.store.get(index).cloned() {
            self.notify(SessionNotice::MessageUpdated { index, message });
        }
    }

    fn append(&mut self, message: Message) -> usize {
        let index = self.store.append(message.clone());
        self.notify(SessionNotice::MessageAppended { index, message });
        index
    }

    /// Queue the whole message list for saving under the current name.
    fn persist(&mut self) {
        let messages = self.store.as_slice().to_vec();
        let count = messages.len();
        self.history.submit(&self.conversation, messages);
        let conversation = self.conversation.clone();
        self.notify(SessionNotice::Saved {
            conversation,
            count,
        });
    }
}
