#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use palaver_abi::{BackendFactory, ChatConfig, ContextParams, InferenceBackend, SamplingParams};
use palaver_core::SessionController;
use palaver_core::config::MemoryConfigSource;
use palaver_core::history::{HistoryWriter, MemoryHistoryStore};

pub const CHAT: &str = "chat";
pub const OTHER: &str = "other";
pub const TIMEOUT: Duration = Duration::from_secs(5);

/// What a [`ScriptedBackend`] does when driven.
#[derive(Debug, Clone, Default)]
pub struct Script {
    /// Fragments emitted in order, each with its reported elapsed seconds.
    pub fragments: Vec<(String, f64)>,
    pub load_error: Option<String>,
    pub generate_error: Option<String>,
    /// After the fragments, block until the run is cancelled.
    pub hold: bool,
}

impl Script {
    pub fn emitting(fragments: &[(&str, f64)]) -> Self {
        Self {
            fragments: fragments
                .iter()
                .map(|(f, dt)| (f.to_string(), *dt))
                .collect(),
            ..Self::default()
        }
    }

    pub fn holding(mut self) -> Self {
        self.hold = true;
        self
    }
}

pub type Prompts = Arc<Mutex<Vec<String>>>;

pub struct ScriptedBackend {
    script: Script,
    prompts: Prompts,
}

impl InferenceBackend for ScriptedBackend {
    fn load(
        &mut self,
        _model_path: &Path,
        _params: &ContextParams,
        on_progress: &mut dyn FnMut(f32) -> bool,
    ) -> Result<(), String> {
        on_progress(0.5);
        if let Some(e) = &self.script.load_error {
            return Err(e.clone());
        }
        on_progress(1.0);
        Ok(())
    }

    fn configure(&mut self, _sampling: &SamplingParams, _context: &ContextParams) {}

    fn generate(
        &mut self,
        prompt: &str,
        cancel: &AtomicBool,
        on_token: &mut dyn FnMut(&str, f64) -> bool,
    ) -> Result<String, String> {
        self.prompts.lock().unwrap().push(prompt.to_string());

        let mut out = String::new();
        for (fragment, elapsed) in &self.script.fragments {
            if cancel.load(Ordering::Relaxed) || !on_token(fragment, *elapsed) {
                return Ok(out);
            }
            out.push_str(fragment);
        }
        if self.script.hold {
            while !cancel.load(Ordering::Relaxed) {
                thread::sleep(Duration::from_millis(2));
            }
        }
        match &self.script.generate_error {
            Some(e) => Err(e.clone()),
            None => Ok(out),
        }
    }
}

/// Factory that knows only the `"scripted"` inference kind.
pub fn factory(script: Script, prompts: Prompts) -> impl BackendFactory {
    move |kind: &str| -> Result<Box<dyn InferenceBackend>, String> {
        if kind != "scripted" {
            return Err(format!("no backend for `{kind}`"));
        }
        Ok(Box::new(ScriptedBackend {
            script: script.clone(),
            prompts: Arc::clone(&prompts),
        }))
    }
}

pub fn chat_config() -> ChatConfig {
    ChatConfig::new()
        .with("model", "tiny.gguf")
        .with("model_inference", "scripted")
}

pub fn config_with(cfg: ChatConfig) -> MemoryConfigSource {
    MemoryConfigSource::new()
        .with_chat(OTHER, cfg.clone())
        .with_chat(CHAT, cfg)
        .with_model("tiny.gguf", "/models/tiny.gguf")
}

pub struct Harness<F: BackendFactory> {
    pub ctl: SessionController<MemoryConfigSource, F>,
    pub history: MemoryHistoryStore,
    pub prompts: Prompts,
}

pub fn harness(cfg: ChatConfig, script: Script) -> Harness<impl BackendFactory> {
    let history = MemoryHistoryStore::new();
    let prompts = Prompts::default();
    let ctl = SessionController::new(
        CHAT,
        config_with(cfg),
        factory(script, Arc::clone(&prompts)),
        HistoryWriter::spawn(history.clone()),
    );
    Harness {
        ctl,
        history,
        prompts,
    }
}

/// Pump events until `cond` holds. Panics after [`TIMEOUT`].
pub fn pump_until<F: BackendFactory>(
    ctl: &mut SessionController<MemoryConfigSource, F>,
    mut cond: impl FnMut(&SessionController<MemoryConfigSource, F>) -> bool,
) {
    let deadline = Instant::now() + TIMEOUT;
    while !cond(ctl) {
        assert!(Instant::now() < deadline, "condition not reached in time");
        ctl.pump_timeout(Duration::from_millis(20));
    }
}
