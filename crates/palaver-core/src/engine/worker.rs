use std::panic;
use std::sync::atomic::Ordering;

use crossbeam_channel::{Receiver, Sender};
use palaver_abi::InferenceBackend;
use tracing::{debug, info, info_span, warn};

use super::{EngineCommand, EngineEvent, EngineEventKind};

/// Worker loop: runs commands one at a time until `Shutdown` or until the
/// controller drops its sender. Backend panics become error results.
pub(super) fn run(
    mut backend: Box<dyn InferenceBackend>,
    commands: Receiver<EngineCommand>,
    events: Sender<EngineEvent>,
) {
    for cmd in commands {
        match cmd {
            EngineCommand::Load {
                epoch,
                model_path,
                context,
            } => {
                let _span = info_span!("load", epoch, path = %model_path.display()).entered();
                info!("loading model");

                let mut on_progress = |p: f32| {
                    let ev = EngineEvent {
                        epoch,
                        kind: EngineEventKind::LoadProgress(p.clamp(0.0, 1.0)),
                    };
                    events.send(ev).is_ok()
                };
                let result = panic::catch_unwind(panic::AssertUnwindSafe(|| {
                    backend.load(&model_path, &context, &mut on_progress)
                }))
                .unwrap_or_else(|_| Err("backend panicked during load".to_string()));

                match &result {
                    Ok(()) => info!("model loaded"),
                    Err(e) => warn!(error = %e, "model load failed"),
                }
                let _ = events.send(EngineEvent {
                    epoch,
                    kind: EngineEventKind::Loaded(result),
                });
            }

            EngineCommand::Configure { sampling, context } => {
                backend.configure(&sampling.normalized(), &context);
            }

            EngineCommand::Generate {
                epoch,
                prompt,
                cancel,
            } => {
                let _span = info_span!("generate", epoch).entered();
                debug!(prompt_len = prompt.len(), "generation started");

                let mut on_token = |fragment: &str, elapsed: f64| {
                    if cancel.load(Ordering::Relaxed) {
                        return false;
                    }
                    let ev = EngineEvent {
                        epoch,
                        kind: EngineEventKind::Token {
                            fragment: fragment.to_string(),
                            elapsed,
                        },
                    };
                    events.send(ev).is_ok()
                };
                let result = panic::catch_unwind(panic::AssertUnwindSafe(|| {
                    backend.generate(&prompt, &cancel, &mut on_token)
                }))
                .unwrap_or_else(|_| Err("backend panicked during generation".to_string()));

                debug!(
                    ok = result.is_ok(),
                    cancelled = cancel.load(Ordering::Relaxed),
                    "generation finished"
                );
                let _ = events.send(EngineEvent {
                    epoch,
                    kind: EngineEventKind::Finished(result),
                });
            }

            EngineCommand::Shutdown => break,
        }
    }

    backend.clear_kv_cache();
    debug!("engine worker exiting");
}
