//! Conversation persistence.
//!
//! The controller never writes to disk itself: it hands finished snapshots to
//! a [`HistoryWriter`], which applies them one at a time on its own thread.
//! A single FIFO writer means a later turn can never be overwritten by an
//! earlier snapshot.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;

use crossbeam_channel::{Sender, bounded, unbounded};
use tracing::{debug, warn};

use crate::error::HistoryError;
use crate::message::Message;

/// Durable store of ordered message lists keyed by conversation name.
pub trait HistoryStore: Send + Sync {
    fn save(&self, conversation: &str, messages: &[Message]) -> Result<(), HistoryError>;

    /// Missing conversations load as an empty history.
    fn load(&self, conversation: &str) -> Result<Vec<Message>, HistoryError>;

    fn list(&self) -> Result<Vec<String>, HistoryError>;
}

/// `<root>/<conversation>.json`, pretty-printed, replaced atomically.
#[derive(Debug, Clone)]
pub struct JsonHistoryStore {
    root: PathBuf,
}

impl JsonHistoryStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, conversation: &str) -> Result<PathBuf, HistoryError> {
        validate_name(conversation)?;
        Ok(self.root.join(format!("{conversation}.json")))
    }
}

impl HistoryStore for JsonHistoryStore {
    fn save(&self, conversation: &str, messages: &[Message]) -> Result<(), HistoryError> {
        let path = self.path_for(conversation)?;
        fs::create_dir_all(&self.root)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(messages)?)?;
        fs::rename(&tmp, &path)?;
        debug!(conversation, count = messages.len(), path = %path.display(), "history saved");
        Ok(())
    }

    fn load(&self, conversation: &str) -> Result<Vec<Message>, HistoryError> {
        let path = self.path_for(conversation)?;
        let bytes = match fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn list(&self) -> Result<Vec<String>, HistoryError> {
        let read_dir = match fs::read_dir(&self.root) {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut names = Vec::new();
        for entry in read_dir {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}

fn validate_name(name: &str) -> Result<(), HistoryError> {
    if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
        return Err(HistoryError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// In-memory store that keeps every write, in order.
#[derive(Debug, Clone, Default)]
pub struct MemoryHistoryStore {
    writes: Arc<Mutex<Vec<(String, Vec<Message>)>>>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `(conversation, snapshot)` pair saved so far, oldest first.
    pub fn writes(&self) -> Vec<(String, Vec<Message>)> {
        self.writes.lock().map(|w| w.clone()).unwrap_or_default()
    }

    fn latest(&self) -> HashMap<String, Vec<Message>> {
        let mut out = HashMap::new();
        for (name, msgs) in self.writes() {
            out.insert(name, msgs);
        }
        out
    }
}

impl HistoryStore for MemoryHistoryStore {
    fn save(&self, conversation: &str, messages: &[Message]) -> Result<(), HistoryError> {
        validate_name(conversation)?;
        if let Ok(mut w) = self.writes.lock() {
            w.push((conversation.to_string(), messages.to_vec()));
        }
        Ok(())
    }

    fn load(&self, conversation: &str) -> Result<Vec<Message>, HistoryError> {
        Ok(self.latest().remove(conversation).unwrap_or_default())
    }

    fn list(&self) -> Result<Vec<String>, HistoryError> {
        let mut names: Vec<String> = self.latest().into_keys().collect();
        names.sort();
        Ok(names)
    }
}

enum WriteJob {
    Save {
        conversation: String,
        messages: Vec<Message>,
    },
    Flush(Sender<()>),
}

/// Ordered, fire-and-forget persistence on a dedicated thread.
///
/// Dropping the writer drains the queue and joins the thread.
pub struct HistoryWriter {
    tx: Option<Sender<WriteJob>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl HistoryWriter {
    pub fn spawn<S: HistoryStore + 'static>(store: S) -> Self {
        let (tx, rx) = unbounded::<WriteJob>();
        let thread = thread::Builder::new()
            .name("history-writer".into())
            .spawn(move || {
                for job in rx {
                    match job {
                        WriteJob::Save {
                            conversation,
                            messages,
                        } => {
                            if let Err(e) = store.save(&conversation, &messages) {
                                warn!(%conversation, error = %e, "failed to save history");
                            }
                        }
                        WriteJob::Flush(ack) => {
                            let _ = ack.send(());
                        }
                    }
                }
            })
            .ok();
        if thread.is_none() {
            warn!("could not spawn history writer; history will not be saved");
        }

        Self {
            tx: Some(tx),
            thread,
        }
    }

    /// Queue a snapshot. Never blocks on I/O.
    pub fn submit(&self, conversation: &str, messages: Vec<Message>) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(WriteJob::Save {
                conversation: conversation.to_string(),
                messages,
            });
        }
    }

    /// Block until every snapshot submitted before this call has been applied.
    pub fn flush(&self) {
        let Some(tx) = &self.tx else { return };
        if self.thread.is_none() {
            return;
        }
        let (ack_tx, ack_rx) = bounded(1);
        if tx.send(WriteJob::Flush(ack_tx)).is_ok() {
            let _ = ack_rx.recv();
        }
    }
}

impl Drop for HistoryWriter {
    fn drop(&mut self) {
        self.tx.take();
        if let Some(t) = self.thread.take() {
            let _ = t.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageState;

    #[test]
    fn writer_applies_snapshots_in_order() {
        let store = MemoryHistoryStore::new();
        let writer = HistoryWriter::spawn(store.clone());
        for i in 0..20 {
            writer.submit("chat", vec![Message::typed(format!("turn {i}"))]);
        }
        writer.flush();

        let writes = store.writes();
        assert_eq!(writes.len(), 20);
        assert_eq!(writes.last().unwrap().1[0].text, "turn 19");
        assert_eq!(store.load("chat").unwrap()[0].text, "turn 19");
    }

    #[test]
    fn rejects_path_like_names() {
        let store = MemoryHistoryStore::new();
        assert!(store.save("../etc", &[]).is_err());
        assert!(store.save("", &[]).is_err());
    }

    #[test]
    fn memory_store_lists_latest_conversations() {
        let store = MemoryHistoryStore::new();
        store.save("b", &[Message::error("x")]).unwrap();
        store.save("a", &[]).unwrap();
        assert_eq!(store.list().unwrap(), vec!["a", "b"]);
        assert_eq!(store.load("b").unwrap()[0].state, MessageState::Error);
        assert!(store.load("zzz").unwrap().is_empty());
    }
}
