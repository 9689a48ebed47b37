mod nlu;

use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::Context;
use companion_core::config::CompanionCfg;
use companion_core::context::CoreContext;
use companion_core::io::{EventReceiver, ProactiveEvent};
use companion_core::runtime::{BootState, Companion, ShutdownGuard};
use rustyline::error::ReadlineError;
use tokio::sync::mpsc;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_CONFIG: &str = "companion.json";
const DEFAULT_LOG: &str = "companion.log";
const PROMPT: &str = "You> ";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Tracing: write to a file when RUST_LOG is set so the prompt stays clean
    if std::env::var("RUST_LOG").is_ok() {
        let path = std::env::var("COMPANION_LOG").unwrap_or_else(|_| DEFAULT_LOG.to_owned());
        let file = std::fs::File::create(&path).with_context(|| format!("creating log file {path}"))?;
        tracing_subscriber::registry()
            .with(EnvFilter::from_default_env())
            .with(fmt::layer().json().with_target(true).with_writer(file))
            .init();
    }

    let config_path = std::env::var_os("COMPANION_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));
    let cfg = CompanionCfg::load(&config_path)
        .with_context(|| format!("loading configuration from {}", config_path.display()))?;
    let user = std::env::var("COMPANION_USER").unwrap_or_else(|_| "friend".to_owned());
    let ctx = CoreContext::new(user, cfg.system.data_dir.clone());

    let mut companion = Companion::new(cfg, ctx)?;
    let boot = companion.boot().await?;

    let mut guard = ShutdownGuard::new();
    guard.spawn_signal_listener();
    let events = companion.is_ready().then(|| companion.start_background(&mut guard));

    let result = run_repl(&mut companion, &mut guard, events, boot).await;

    match companion.shutdown(guard).await {
        Ok(Some(path)) => println!("Saved to {}", path.display()),
        Ok(None) => {}
        Err(e) => {
            tracing::error!(error = %e, "final backup failed");
            eprintln!("{}", e.user_message());
        }
    }
    result
}

async fn run_repl(
    companion: &mut Companion,
    guard: &mut ShutdownGuard,
    mut events: Option<EventReceiver>,
    boot: BootState,
) -> anyhow::Result<()> {
    match &boot {
        BootState::Restored(path) => println!("(restored from {})", path.display()),
        BootState::Fresh => println!("Hello. I don't think we've met."),
        BootState::ResetAfterFailure => println!("My saved state was unreadable, so I started fresh."),
        BootState::AwaitingConfirmation => {}
    }
    if let Some(notice) = companion.boot_notice() {
        println!("{notice}");
    }
    println!("/system status for diagnostics, /quit to leave.");

    let token = guard.token();
    let (line_tx, mut line_rx) = mpsc::unbounded_channel::<InputEvent>();
    let (ready_tx, ready_rx) = std::sync::mpsc::channel::<()>();
    spawn_input_thread(line_tx, ready_rx);
    request_next_prompt(&ready_tx);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            event = next_event(&mut events) => {
                let Some(event) = event else {
                    events = None;
                    continue;
                };
                if let ProactiveEvent::Suggestion { task_id, .. } = &event {
                    companion.note_suggestion(*task_id);
                }
                print_event(&event)?;
            }
            line = line_rx.recv() => {
                let Some(line) = line else {
                    break;
                };
                match line {
                    InputEvent::Line(line) => {
                        if line.trim().is_empty() {
                            request_next_prompt(&ready_tx);
                            continue;
                        }
                        if matches!(line.trim(), "/q" | "/exit" | "/quit") {
                            break;
                        }
                        let reply = companion.handle(nlu::interpret(&line)).await;
                        println!("{}", reply.content);
                        // recovery confirmed: start the background work now
                        if events.is_none() && companion.is_ready() && !guard.is_triggered() {
                            events = Some(companion.start_background(guard));
                        }
                        request_next_prompt(&ready_tx);
                    }
                    InputEvent::Interrupted | InputEvent::Eof => break,
                    InputEvent::Error(err) => {
                        eprintln!("input error: {err}");
                        break;
                    }
                }
            }
        }
    }
    drop(ready_tx);
    println!();
    Ok(())
}

/// Next proactive event, or never when the stream is not running.
async fn next_event(events: &mut Option<EventReceiver>) -> Option<ProactiveEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

fn print_event(event: &ProactiveEvent) -> anyhow::Result<()> {
    print!("\r\x1b[2K* {}\n{PROMPT}", event.render());
    io::stdout().flush()?;
    Ok(())
}

fn request_next_prompt(ready_tx: &std::sync::mpsc::Sender<()>) {
    let _ = ready_tx.send(());
}

fn spawn_input_thread(line_tx: mpsc::UnboundedSender<InputEvent>, ready_rx: std::sync::mpsc::Receiver<()>) {
    std::thread::spawn(move || {
        let mut editor = match rustyline::DefaultEditor::new() {
            Ok(editor) => editor,
            Err(e) => {
                let _ = line_tx.send(InputEvent::Error(e.to_string()));
                return;
            }
        };

        while ready_rx.recv().is_ok() {
            match editor.readline(PROMPT) {
                Ok(line) => {
                    let _ = editor.add_history_entry(line.as_str());
                    if line_tx.send(InputEvent::Line(line)).is_err() {
                        break;
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    let _ = line_tx.send(InputEvent::Interrupted);
                    break;
                }
                Err(ReadlineError::Eof) => {
                    let _ = line_tx.send(InputEvent::Eof);
                    break;
                }
                Err(e) => {
                    let _ = line_tx.send(InputEvent::Error(e.to_string()));
                    break;
                }
            }
        }
    });
}

enum InputEvent {
    Line(String),
    Interrupted,
    Eof,
    Error(String),
}
