use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use palaver_core::config::{DirConfigSource, resolve_chat};
use palaver_core::history::{HistoryStore, JsonHistoryStore};
use palaver_core::paths::{history_dir, palaver_home};
use palaver_core::{Message, MessageState, Sender};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "palaver", version, about = "Inspect Palaver chats and history")]
struct Cli {
    /// Data root (defaults to the platform data dir + /Palaver)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Resolve a chat config and print the model and parameters it would load with
    Check {
        chat: String,
        /// Print JSON instead of a summary
        #[arg(long)]
        json: bool,
    },
    /// List chats that have a config file
    Chats,
    /// Saved conversations
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },
}

#[derive(Subcommand)]
enum HistoryAction {
    List,
    Show { chat: String },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let root = cli.root.unwrap_or_else(palaver_home);
    debug!(root = %root.display(), "data root");

    match cli.command {
        Command::Check { chat, json } => check(&root, &chat, json),
        Command::Chats => {
            for name in DirConfigSource::new(&root).list_chats() {
                println!("{name}");
            }
            Ok(())
        }
        Command::History { action } => {
            let store = JsonHistoryStore::new(history_dir(&root));
            match action {
                HistoryAction::List => {
                    let names = store
                        .list()
                        .with_context(|| format!("reading {}", store.root().display()))?;
                    for name in names {
                        println!("{name}");
                    }
                    Ok(())
                }
                HistoryAction::Show { chat } => {
                    let messages = store
                        .load(&chat)
                        .with_context(|| format!("loading history for `{chat}`"))?;
                    if messages.is_empty() {
                        return Err(anyhow!("no history for `{chat}`"));
                    }
                    for m in &messages {
                        print_message(m);
                    }
                    Ok(())
                }
            }
        }
    }
}

fn check(root: &std::path::Path, chat: &str, json: bool) -> Result<()> {
    let source = DirConfigSource::new(root);
    let resolved =
        resolve_chat(&source, chat).with_context(|| format!("chat `{chat}` cannot be loaded"))?;

    if json {
        let out = serde_json::json!({
            "model": resolved.model_name,
            "model_path": resolved.model_path,
            "sampling": resolved.sampling,
            "context": resolved.context,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    let ctx = &resolved.context;
    println!("model      {}", resolved.model_path.display());
    println!("inference  {}", ctx.model_inference);
    println!("context    {} (batch {}, {} threads)", ctx.n_ctx, ctx.n_batch, ctx.n_threads);
    if !ctx.reverse_prompt.is_empty() {
        println!("stops      {:?}", ctx.reverse_prompt);
    }
    if let Some(g) = &ctx.grammar_path {
        println!("grammar    {}", g.display());
    }
    let s = resolved.sampling.normalized();
    if s.greedy {
        println!("sampling   greedy");
    } else {
        let temp = s.temperature.map_or("-".into(), |t| format!("{t:.2}"));
        let top_k = s.top_k.map_or("-".into(), |k| k.to_string());
        let top_p = s.top_p.map_or("-".into(), |p| format!("{p:.2}"));
        println!("sampling   temp {temp}, top_k {top_k}, top_p {top_p}");
        if let Some(m) = &s.mirostat {
            println!("mirostat   v{} (tau {:.2}, eta {:.2})", m.version, m.tau, m.eta);
        }
    }
    Ok(())
}

fn print_message(m: &Message) {
    let who = match m.sender {
        Sender::User => "you",
        Sender::System => "bot",
    };
    match m.state {
        MessageState::Predicted { total_seconds } => println!(
            "[{who}] {} ({:.1} tok/s, {:.1}s)",
            m.text, m.tokens_per_second, total_seconds
        ),
        MessageState::Error => println!("[{who}] error: {}", m.text),
        _ => println!("[{who}] {}", m.text),
    }
}
