use std::sync::atomic::Ordering;

use palaver_abi::BackendFactory;
use tracing::{debug, info, trace, warn};

use super::SessionController;
use crate::config::ConfigSource;
use crate::message::{Message, MessageState};
use crate::stop::StopVerdict;

impl<C: ConfigSource, F: BackendFactory> SessionController<C, F> {
    /// User-initiated cancel. No-op when nothing is streaming.
    pub fn stop(&mut self) {
        if self.snapshot.predicting {
            self.stop_predicting(false);
        }
    }

    /// End the current run now.
    ///
    /// Sets the cancel flag (the backend notices at its next token), closes the
    /// active message as `Predicted` with the wall-clock duration and rate, or
    /// as `Error` when `is_error`, clears run counters and queues a save.
    /// The rate computed here is frozen for the rest of the run.
    pub fn stop_predicting(&mut self, is_error: bool) {
        self.cancel.store(true, Ordering::Relaxed);

        let total = self.metrics.elapsed_wall_seconds();
        let rate = self.metrics.rate_over(total);

        if let Some(index) = self.active_index.or(self.store.last_index()) {
            if let Some(message) = self.store.get_mut(index) {
                if message.state.is_active() {
                    message.state = MessageState::Predicted {
                        total_seconds: total,
                    };
                    message.tokens_per_second = rate;
                }
                if is_error {
                    message.state = MessageState::Error;
                }
            }
            self.notify_updated(index);
        }

        debug!(
            conversation = %self.conversation,
            epoch = self.epoch,
            tokens = self.metrics.token_count(),
            total,
            rate,
            is_error,
            "run stopped"
        );

        self.metrics.freeze(rate);
        self.metrics.clear_tokens();
        self.active_index = None;
        self.snapshot.predicting = false;
        self.snapshot.typing = 0;
        self.publish();
        self.persist();
    }

    /// Apply one streamed fragment to the message at `index`.
    ///
    /// Returns `true` if the fragment was appended. Returns `false` when the
    /// fragment belongs to a cancelled or superseded run (nothing is touched),
    /// or when it completed a stop sequence (the run is stopped, with the
    /// matched suffix trimmed off the text when it is shorter than the text).
    pub fn process_predicted_fragment(
        &mut self,
        epoch: u64,
        fragment: &str,
        elapsed: f64,
        index: usize,
    ) -> bool {
        if !self.run_is_live(epoch) {
            trace!(epoch, current = self.epoch, "stale fragment dropped");
            return false;
        }
        let Some(current) = self.store.get(index) else {
            warn!(index, "fragment for missing message dropped");
            return false;
        };

        if let StopVerdict::Stop {
            sequence, trimmed, ..
        } = self.stops.evaluate(fragment, &current.text)
        {
            debug!(?sequence, "stop sequence hit");
            if let Some(text) = trimmed {
                if let Some(m) = self.store.get_mut(index) {
                    m.text = text;
                }
            }
            self.stop_predicting(false);
            return false;
        }

        let mut message = current.clone();
        message.state = MessageState::Predicting;
        message.text.push_str(fragment);
        self.metrics.record(elapsed);
        self.snapshot.typing += 1;

        if self.store.update(index, message).is_err() {
            return false;
        }
        self.notify_updated(index);
        true
    }

    /// Natural end of a run (EOS, token budget, backend error, or the backend
    /// noticing the cancel flag).
    ///
    /// A live run is finalized here; a cancelled one was already finalized by
    /// [`SessionController::stop_predicting`]. Output of a superseded run is
    /// ignored. The message list is queued for saving in every case.
    pub(super) fn on_generation_finished(
        &mut self,
        epoch: u64,
        result: std::result::Result<String, String>,
    ) {
        let total = self.metrics.elapsed_wall_seconds();

        if self.run_is_live(epoch) {
            if let Some(index) = self.active_index.take() {
                let rate = self
                    .metrics
                    .frozen_rate()
                    .unwrap_or_else(|| self.metrics.rate_over(total));
                if let Some(message) = self.store.get_mut(index) {
                    message.state = MessageState::Predicted {
                        total_seconds: total,
                    };
                    message.tokens_per_second = rate;
                }
                self.notify_updated(index);
                info!(
                    conversation = %self.conversation,
                    epoch,
                    tokens = self.metrics.token_count(),
                    total,
                    rate,
                    "run finished"
                );
            }
            self.close_run(result);
        } else if self.is_current(epoch) {
            debug!(epoch, "cancelled run finished");
            self.close_run(result);
        } else {
            debug!(epoch, current = self.epoch, "stale completion ignored");
        }

        self.persist();
    }

    fn close_run(&mut self, result: std::result::Result<String, String>) {
        self.snapshot.predicting = false;
        self.snapshot.typing = 0;
        self.metrics.clear_tokens();
        if let Err(reason) = result {
            warn!(conversation = %self.conversation, %reason, "generation failed");
            self.append(Message::error(format!("Eval {reason}")));
        }
        self.publish();
    }
}
