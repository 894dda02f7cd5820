//! Ordered, in-place mutable list of conversation messages.
//! Grows by append; the controller rewrites the active message as fragments arrive.

use crate::error::{Result, SessionError};
use crate::message::Message;

#[derive(Default, Debug, Clone, PartialEq)]
pub struct MessageStore {
    messages: Vec<Message>,
}

impl MessageStore {
    #[inline]
    pub fn new() -> Self {
        Self {
            messages: Vec::new(),
        }
    }

    #[inline]
    pub fn from_messages(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    /// Push a message and return its index.
    #[inline]
    pub fn append(&mut self, message: Message) -> usize {
        self.messages.push(message);
        self.messages.len() - 1
    }

    /// Replace the message at `index`.
    pub fn update(&mut self, index: usize, message: Message) -> Result<()> {
        let slot = self
            .messages
            .get_mut(index)
            .ok_or(SessionError::BadIndex(index))?;
        *slot = message;
        Ok(())
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<&Message> {
        self.messages.get(index)
    }

    #[inline]
    pub fn get_mut(&mut self, index: usize) -> Option<&mut Message> {
        self.messages.get_mut(index)
    }

    #[inline]
    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    #[inline]
    pub fn last_mut(&mut self) -> Option<&mut Message> {
        self.messages.last_mut()
    }

    #[inline]
    pub fn last_index(&self) -> Option<usize> {
        self.messages.len().checked_sub(1)
    }

    /// Index of the message that is pending or streaming, if any.
    pub fn active_index(&self) -> Option<usize> {
        self.messages.iter().rposition(|m| m.state.is_active())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// All stored messages (oldest → newest).
    #[inline]
    pub fn as_slice(&self) -> &[Message] {
        &self.messages
    }

    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    #[inline]
    pub fn into_vec(self) -> Vec<Message> {
        self.messages
    }

    /// Remove all history.
    #[inline]
    pub fn clear(&mut self) {
        self.messages.clear();
    }
}
