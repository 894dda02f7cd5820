//! Palaver core: session orchestration around a streaming inference backend.
//!
//! The [`controller::SessionController`] owns the conversation and the engine
//! handle. The backend runs on its own worker thread (see [`engine`]) and all
//! of its callbacks come back as channel events that the controller applies
//! on the caller's thread.

pub mod config;
pub mod controller;
pub mod engine;
pub mod error;
pub mod history;
pub mod message;
pub mod metrics;
pub mod paths;
pub mod stop;
pub mod store;

pub use controller::{LoadState, SendOutcome, SessionController, SessionNotice, SessionSnapshot};
pub use error::{HistoryError, Result, SessionError};
pub use message::{Message, MessageState, Sender};
pub use store::MessageStore;
