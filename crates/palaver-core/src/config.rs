//! Chat configuration lookup.
//!
//! The controller only needs a handful of lookups; how chats, models and
//! grammars are stored is up to the [`ConfigSource`] implementation.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use palaver_abi::{ChatConfig, ContextParams, SamplingParams};
use tracing::{debug, warn};

use crate::error::{Result, SessionError};
use crate::paths::{chats_dir, grammars_dir, models_dir};

/// Grammar value meaning "no grammar".
pub const NO_GRAMMAR: &str = "<None>";

pub trait ConfigSource {
    fn chat_config(&self, name: &str) -> Option<ChatConfig>;

    fn model_path(&self, short_name: &str) -> Option<PathBuf>;

    fn grammar_path(&self, name: &str) -> PathBuf;

    fn sampling_params(&self, cfg: &ChatConfig) -> SamplingParams {
        SamplingParams::from_config(cfg)
    }

    fn context_params(&self, cfg: &ChatConfig) -> ContextParams {
        ContextParams::from_config(cfg)
    }
}

/// Everything needed to load an engine for one chat.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedChat {
    pub model_name: String,
    pub model_path: PathBuf,
    pub sampling: SamplingParams,
    pub context: ContextParams,
}

/// Resolve a chat into a loadable model. Fails without side effects when the
/// config, its `model` or `model_inference` keys, or the model path is missing.
pub fn resolve_chat<C: ConfigSource + ?Sized>(source: &C, chat: &str) -> Result<ResolvedChat> {
    let cfg = source
        .chat_config(chat)
        .ok_or_else(|| SessionError::NotFound(format!("chat config `{chat}`")))?;

    if !cfg.contains("model_inference") {
        return Err(SessionError::NotFound(format!(
            "`model_inference` in chat `{chat}`"
        )));
    }
    let model_name = cfg
        .str("model")
        .ok_or_else(|| SessionError::NotFound(format!("`model` in chat `{chat}`")))?
        .to_string();

    let model_path = source
        .model_path(&model_name)
        .filter(|p| !p.as_os_str().is_empty())
        .ok_or_else(|| SessionError::NotFound(format!("model file for `{model_name}`")))?;

    let sampling = source.sampling_params(&cfg);
    let mut context = source.context_params(&cfg);
    if context.model_inference.is_empty() {
        return Err(SessionError::NotFound(format!(
            "`model_inference` in chat `{chat}`"
        )));
    }

    if let Some(grammar) = cfg.non_empty_str("grammar").filter(|g| *g != NO_GRAMMAR) {
        context.grammar_path = Some(source.grammar_path(grammar));
    }

    debug!(chat, model = %model_name, path = %model_path.display(), "chat resolved");
    Ok(ResolvedChat {
        model_name,
        model_path,
        sampling,
        context,
    })
}

/// Directory layout under a data root (see [`crate::paths`]):
/// `chats/<name>.json`, `models/<short>`, `grammars/<name>`.
#[derive(Debug, Clone)]
pub struct DirConfigSource {
    root: PathBuf,
}

impl DirConfigSource {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Chat names with a config file, sorted.
    pub fn list_chats(&self) -> Vec<String> {
        let Ok(read_dir) = fs::read_dir(chats_dir(&self.root)) else {
            return Vec::new();
        };
        let mut names: Vec<String> = read_dir
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("json"))
            .filter_map(|p| p.file_stem().and_then(|s| s.to_str()).map(str::to_string))
            .collect();
        names.sort();
        names
    }
}

impl ConfigSource for DirConfigSource {
    fn chat_config(&self, name: &str) -> Option<ChatConfig> {
        let path = chats_dir(&self.root).join(format!("{name}.json"));
        let bytes = fs::read(&path).ok()?;
        match serde_json::from_slice::<ChatConfig>(&bytes) {
            Ok(cfg) => Some(cfg),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "unreadable chat config");
                None
            }
        }
    }

    fn model_path(&self, short_name: &str) -> Option<PathBuf> {
        let candidate = Path::new(short_name);
        if candidate.is_absolute() {
            return candidate.is_file().then(|| candidate.to_path_buf());
        }
        let path = models_dir(&self.root).join(short_name);
        path.is_file().then_some(path)
    }

    fn grammar_path(&self, name: &str) -> PathBuf {
        grammars_dir(&self.root).join(name)
    }
}

/// In-memory configuration, for tests and embedding.
#[derive(Debug, Clone, Default)]
pub struct MemoryConfigSource {
    chats: HashMap<String, ChatConfig>,
    models: HashMap<String, PathBuf>,
    grammar_root: PathBuf,
}

impl MemoryConfigSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chat(mut self, name: &str, cfg: ChatConfig) -> Self {
        self.chats.insert(name.to_string(), cfg);
        self
    }

    pub fn with_model<P: Into<PathBuf>>(mut self, short_name: &str, path: P) -> Self {
        self.models.insert(short_name.to_string(), path.into());
        self
    }

    pub fn with_grammar_root<P: Into<PathBuf>>(mut self, root: P) -> Self {
        self.grammar_root = root.into();
        self
    }
}

impl ConfigSource for MemoryConfigSource {
    fn chat_config(&self, name: &str) -> Option<ChatConfig> {
        self.chats.get(name).cloned()
    }

    fn model_path(&self, short_name: &str) -> Option<PathBuf> {
        self.models.get(short_name).cloned()
    }

    fn grammar_path(&self, name: &str) -> PathBuf {
        self.grammar_root.join(name)
    }
}
