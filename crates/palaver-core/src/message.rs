use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sender {
    User,
    System,
}

/// Lifecycle of a message.
///
/// `None → Predicting → {Predicted | Error}` for generated messages;
/// user-authored messages are born `Typed` and never change.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessageState {
    Typed,
    None,
    Predicting,
    Predicted { total_seconds: f64 },
    Error,
}

impl MessageState {
    /// `Typed`, `Predicted` and `Error` never transition again.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MessageState::Typed | MessageState::Predicted { .. } | MessageState::Error
        )
    }

    /// Pending or streaming: the state of the run's active message.
    #[inline]
    pub fn is_active(&self) -> bool {
        matches!(self, MessageState::None | MessageState::Predicting)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub sender: Sender,
    pub state: MessageState,
    pub text: String,
    #[serde(default)]
    pub tokens_per_second: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<String>,
}

impl Message {
    /// A user-authored message.
    pub fn typed<S: Into<String>>(text: S) -> Self {
        Self {
            sender: Sender::User,
            state: MessageState::Typed,
            text: text.into(),
            tokens_per_second: 0.0,
            header: None,
        }
    }

    /// An empty system message waiting for the first fragment.
    pub fn pending() -> Self {
        Self {
            sender: Sender::System,
            state: MessageState::None,
            text: String::new(),
            tokens_per_second: 0.0,
            header: None,
        }
    }

    /// A system message reporting a failure in-band.
    pub fn error<S: Into<String>>(text: S) -> Self {
        Self {
            sender: Sender::System,
            state: MessageState::Error,
            text: text.into(),
            tokens_per_second: 0.0,
            header: None,
        }
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}
