use std::path::Path;
use std::sync::atomic::AtomicBool;

use crate::context::ContextParams;
use crate::sampling::SamplingParams;

/// Backend-agnostic interface for inference engines.
///
/// A backend is driven from a single worker thread owned by the session core.
/// Every method is blocking; progress and tokens are reported through the
/// callbacks while the call is in flight.
pub trait InferenceBackend: Send {
    /// Load model weights from `model_path`.
    ///
    /// `on_progress` receives values in `0.0..=1.0`. Returning `false` from it
    /// asks the backend to abort the load.
    fn load(
        &mut self,
        model_path: &Path,
        params: &ContextParams,
        on_progress: &mut dyn FnMut(f32) -> bool,
    ) -> Result<(), String>;

    /// Apply sampling/context parameters after a successful load.
    fn configure(&mut self, sampling: &SamplingParams, context: &ContextParams);

    /// Generate a continuation of `prompt`.
    ///
    /// `on_token` receives each decoded fragment and the seconds spent producing
    /// it. The backend must poll `cancel` between tokens and stop once it is set
    /// or once `on_token` returns `false`. Returns the full generated text.
    fn generate(
        &mut self,
        prompt: &str,
        cancel: &AtomicBool,
        on_token: &mut dyn FnMut(&str, f64) -> bool,
    ) -> Result<String, String>;

    /// Drop any cached sequence state while keeping the model loaded.
    fn clear_kv_cache(&mut self) {}
}

/// Builds backends for the `model_inference` kind named by a chat config
/// (e.g. `"llama"`, `"gptneox"`).
pub trait BackendFactory {
    fn create(&self, inference: &str) -> Result<Box<dyn InferenceBackend>, String>;
}

impl<F> BackendFactory for F
where
    F: Fn(&str) -> Result<Box<dyn InferenceBackend>, String>,
{
    fn create(&self, inference: &str) -> Result<Box<dyn InferenceBackend>, String> {
        self(inference)
    }
}
