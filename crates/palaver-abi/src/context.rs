use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::config::ChatConfig;

/// Model/context parameters resolved once per model load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextParams {
    /// Backend kind, e.g. `"llama"`. Required for a load.
    pub model_inference: String,
    pub n_ctx: u32,
    pub n_batch: u32,
    pub n_threads: i32,
    pub use_metal: bool,
    pub use_mlock: bool,
    /// Prepended to the first prompt of a loaded session and shown as the
    /// header of the message that triggered the load. Empty means none.
    pub system_prompt: String,
    /// Prompt template; `{{prompt}}` is replaced by the user text.
    pub prompt_format: String,
    /// Stop sequences, evaluated in order.
    pub reverse_prompt: Vec<String>,
    pub grammar_path: Option<PathBuf>,
}

impl Default for ContextParams {
    fn default() -> Self {
        Self {
            model_inference: String::new(),
            n_ctx: 2048,
            n_batch: 512,
            n_threads: num_cpus::get_physical() as i32,
            use_metal: false,
            use_mlock: false,
            system_prompt: String::new(),
            prompt_format: "{{prompt}}".to_string(),
            reverse_prompt: Vec::new(),
            grammar_path: None,
        }
    }
}

impl ContextParams {
    /// Read context knobs from a chat config. The grammar path is *not* resolved
    /// here: that needs the config source's grammar directory.
    pub fn from_config(cfg: &ChatConfig) -> Self {
        let mut p = Self::default();

        if let Some(kind) = cfg.non_empty_str("model_inference") {
            p.model_inference = kind.to_string();
        }
        if let Some(n) = cfg.i64("context").and_then(|v| u32::try_from(v).ok()) {
            p.n_ctx = n.max(1);
        }
        if let Some(n) = cfg.i64("n_batch").and_then(|v| u32::try_from(v).ok()) {
            p.n_batch = n.max(1);
        }
        if let Some(n) = cfg.i64("numberOfThreads").filter(|v| *v > 0) {
            p.n_threads = n as i32;
        }
        if let Some(b) = cfg.bool("use_metal") {
            p.use_metal = b;
        }
        if let Some(b) = cfg.bool("mlock") {
            p.use_mlock = b;
        }
        if let Some(s) = cfg.str("system_prompt") {
            p.system_prompt = s.to_string();
        }
        if let Some(s) = cfg.non_empty_str("prompt_format") {
            p.prompt_format = s.to_string();
        }
        if let Some(raw) = cfg.str("reverse_prompt") {
            p.reverse_prompt = split_reverse_prompt(raw);
        }

        p
    }

    /// Apply the prompt template to `text`.
    pub fn format_prompt(&self, text: &str) -> String {
        if self.prompt_format.contains("{{prompt}}") {
            self.prompt_format.replace("{{prompt}}", text)
        } else {
            text.to_string()
        }
    }
}

/// Split a comma-separated stop list, decoding `\n`, `\t` and `\\` escapes.
/// Empty entries are dropped; order is preserved.
pub fn split_reverse_prompt(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| unescape(s.trim_matches(' ')))
        .filter(|s| !s.is_empty())
        .collect()
}

fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}
