use serde::Serialize;

use crate::message::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadState {
    /// No load attempted, or the last engine was dropped.
    Idle,
    Loading,
    Ready,
}

/// Observable session fields, published to subscribers on every transition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub conversation: String,
    pub load_state: LoadState,
    pub predicting: bool,
    /// Typing indicator: bumped per send and per applied fragment, zeroed on finish.
    pub typing: usize,
    pub load_progress: f32,
    pub title: String,
}

impl SessionSnapshot {
    pub(crate) fn new(conversation: &str) -> Self {
        Self {
            conversation: conversation.to_string(),
            load_state: LoadState::Idle,
            predicting: false,
            typing: 0,
            load_progress: 0.0,
            title: conversation.to_string(),
        }
    }

    /// A load or generation is in flight.
    #[inline]
    pub fn is_busy(&self) -> bool {
        self.predicting || self.load_state == LoadState::Loading
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionNotice {
    State(SessionSnapshot),
    MessageAppended { index: usize, message: Message },
    MessageUpdated { index: usize, message: Message },
    Saved { conversation: String, count: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// The engine was ready; a run is streaming.
    Generating,
    /// A model load was started; the run begins when it completes.
    Loading,
}
