//! Headless line-oriented front end for the writing assistant.
//!
//! Prompts are read from stdin and the assistant's text is streamed to
//! stdout. Lines starting with `/` are commands. Accepted text is appended to
//! the document file; accepted chapter proposals create `<dir>/<title>.txt`.
//!
//! Tracing goes to stderr and a daily log file so stdout stays the
//! conversation channel.

use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use quill::ollama::{ModelProbe, ProbeConfig, ProbeStatus};
use quill::{
    ChatMessage, CommandOutcome, ConfigPreferenceStore, DocumentSink, EventOutcome,
    MessageCommand, ModelfileTemplateStore, OllamaClient, QuillConfig, SessionOrchestrator,
    SubmitOutcome, app_dirs,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Quill: stream drafts from a local model into a document.
#[derive(Parser)]
#[command(name = "quill", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Document that accepted text is appended to.
    #[arg(short, long, default_value = "draft.txt")]
    document: PathBuf,

    /// Directory where accepted chapters are created.
    #[arg(long, default_value = "chapters")]
    chapters_dir: PathBuf,

    /// Do not write the rolling log file.
    #[arg(long)]
    no_log_file: bool,
}

/// Writes accepted output to plain files.
struct FileDocumentSink {
    document: PathBuf,
    chapters_dir: PathBuf,
}

impl DocumentSink for FileDocumentSink {
    fn insert_text(&mut self, text: &str) -> quill::Result<()> {
        if let Some(parent) = self.document.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.document)?;
        writeln!(file, "{text}\n")?;
        Ok(())
    }

    fn request_create_chapter(&mut self, title: &str) -> quill::Result<()> {
        std::fs::create_dir_all(&self.chapters_dir)?;
        let path = chapter_path(&self.chapters_dir, title);
        let mut file = OpenOptions::new().write(true).create_new(true).open(&path)?;
        writeln!(file, "{title}\n")?;
        info!(path = %path.display(), "chapter created");
        Ok(())
    }
}

fn chapter_path(dir: &Path, title: &str) -> PathBuf {
    let name: String = title
        .chars()
        .map(|c| if matches!(c, '/' | '\\' | ':') { '-' } else { c })
        .collect();
    dir.join(format!("{}.txt", name.trim()))
}

fn init_logging(log_file: bool) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("quill=info"));
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let (file_layer, guard) = if log_file {
        let appender = tracing_appender::rolling::daily(app_dirs::logs_dir(), "quill.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(writer)
            .with_ansi(false);
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();
    guard
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _log_guard = init_logging(!cli.no_log_file);

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(QuillConfig::default_config_path);
    let preferences = ConfigPreferenceStore::open(&config_path)
        .map_err(|e| anyhow::anyhow!("cannot load {}: {e}", config_path.display()))?;
    let config = preferences.config().clone();
    info!(config = %config_path.display(), url = %config.endpoint.url, "quill starting");

    let client = OllamaClient::new(&config.endpoint, config.sampling.clone());
    let templates = ModelfileTemplateStore::new(config.style.effective_templates_dir());
    let sink = FileDocumentSink {
        document: cli.document.clone(),
        chapters_dir: cli.chapters_dir.clone(),
    };
    let mut orch = SessionOrchestrator::new(
        Arc::new(client),
        Box::new(templates),
        Box::new(preferences),
        Box::new(sink),
    )
    .with_agent_mode(config.agent_mode);

    println!("Quill v{}. Type a prompt, or /help.", env!("CARGO_PKG_VERSION"));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let busy = orch.is_busy();
        tokio::select! {
            outcome = orch.pump(), if busy => {
                if let Some(outcome) = outcome {
                    render_outcome(&orch, &outcome);
                }
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if !handle_line(&mut orch, line.trim()).await {
                    break;
                }
            }
        }
    }

    info!("quill shut down cleanly");
    Ok(())
}

/// Returns `false` when the user asked to quit.
async fn handle_line(orch: &mut SessionOrchestrator, line: &str) -> bool {
    let Some(command) = line.strip_prefix('/') else {
        // An empty line resends a prompt restored after a timeout.
        let prompt = if line.is_empty() {
            orch.take_input()
        } else {
            line.to_owned()
        };
        submit(orch, &prompt);
        return true;
    };

    let mut parts = command.split_whitespace();
    let name = parts.next().unwrap_or_default();
    let args: Vec<&str> = parts.collect();
    match name {
        "quit" | "exit" => return false,
        "help" => print_help(),
        "accept" => run_command(orch, MessageCommand::Accept),
        "regen" => run_command(orch, MessageCommand::Regenerate),
        "reject" => run_command(orch, MessageCommand::Reject),
        "clear" => {
            orch.clear();
            println!("conversation cleared");
        }
        "style" => select_style(orch, &args.join(" ")),
        "auto" => match parse_toggle(&args) {
            Some(on) => report(orch.set_auto_style(on), &format!("automatic style {}", on_off(on))),
            None => println!("usage: /auto on|off"),
        },
        "agent" => match parse_toggle(&args) {
            Some(on) => {
                orch.set_agent_mode(on);
                println!("agent mode {}", on_off(on));
            }
            None => println!("usage: /agent on|off"),
        },
        "models" => list_models(orch).await,
        "config" => match args.as_slice() {
            [url] => {
                let model = orch.model();
                report(orch.configure_endpoint(url, model.as_deref()), "endpoint saved");
            }
            [url, model] => report(orch.configure_endpoint(url, Some(*model)), "endpoint saved"),
            _ => println!(
                "usage: /config <url> [model]  (now: {} model={})",
                orch.endpoint_url(),
                orch.model().unwrap_or_else(|| "<none>".into())
            ),
        },
        other => println!("unknown command /{other}; try /help"),
    }
    true
}

fn submit(orch: &mut SessionOrchestrator, prompt: &str) {
    match orch.submit(prompt) {
        SubmitOutcome::Started(token) => {
            info!(%token, style = orch.current_style(), "prompt submitted");
            print!("assistant> ");
            flush();
        }
        SubmitOutcome::Busy => println!("(still generating; wait or /regen an earlier reply)"),
        SubmitOutcome::ModelMissing => print_last_system(orch),
        SubmitOutcome::Ignored => {}
    }
}

fn run_command(orch: &mut SessionOrchestrator, command: MessageCommand) {
    let Some(id) = orch
        .messages()
        .iter()
        .rev()
        .find(|m| m.controls_enabled())
        .map(|m| m.id)
    else {
        println!("(no completed reply to act on)");
        return;
    };
    match orch.dispatch(id, command) {
        Ok(CommandOutcome::Accepted(kind)) => println!("accepted ({kind:?})"),
        Ok(CommandOutcome::Rejected) => println!("rejected"),
        Ok(CommandOutcome::Regenerated(_)) => {
            print!("assistant> ");
            flush();
        }
        Err(e) => {
            warn!(error = %e, "command failed");
            println!("error: {e}");
        }
    }
}

fn select_style(orch: &mut SessionOrchestrator, name: &str) {
    let names = orch.style_names();
    if name.is_empty() {
        println!("styles: {}  (current: {})", names.join(", "), orch.current_style());
        return;
    }
    if !names.iter().any(|n| n == name) {
        println!("unknown style '{name}'; known: {}", names.join(", "));
        return;
    }
    let result = orch
        .set_auto_style(false)
        .and_then(|()| orch.select_style(name));
    report(result, &format!("style {name} (automatic detection off)"));
}

async fn list_models(orch: &SessionOrchestrator) {
    let probe = ModelProbe::new(ProbeConfig::new(orch.endpoint_url()));
    match probe.list_models().await {
        ProbeStatus::Available { models, .. } if models.is_empty() => {
            println!("server is running but has no models installed");
        }
        ProbeStatus::Available { models, .. } => {
            let current = orch.model();
            for model in models {
                let marker = if current.as_deref() == Some(model.name.as_str()) {
                    "*"
                } else {
                    " "
                };
                println!("{marker} {model}");
            }
        }
        other => println!("{other}"),
    }
}

fn render_outcome(orch: &SessionOrchestrator, outcome: &EventOutcome) {
    match outcome {
        EventOutcome::Delta { text, .. } => {
            print!("{text}");
            flush();
        }
        EventOutcome::Completed(id) => {
            println!();
            if let Some(message) = orch.message(*id) {
                render_completed(message);
            }
        }
        EventOutcome::Failed { notice, .. } => {
            println!();
            if let Some(message) = orch.message(*notice) {
                println!("system> {}", message.text());
            }
            if !orch.input().is_empty() {
                println!("(prompt restored: \"{}\"; press enter to resend)", orch.input());
            }
        }
        EventOutcome::Stale => {}
    }
}

fn render_completed(message: &ChatMessage) {
    if message.display_text() != message.text() {
        println!("proposal> {}", message.display_text());
    }
    println!("[/accept  /regen  /reject]");
}

fn print_last_system(orch: &SessionOrchestrator) {
    if let Some(message) = orch.messages().last() {
        println!("system> {}", message.text());
    }
}

fn print_help() {
    println!(
        "commands:\n  \
         /accept /regen /reject   act on the last completed reply\n  \
         /clear                   start a new conversation\n  \
         /style [name]            list styles or select one\n  \
         /auto on|off             automatic style detection\n  \
         /agent on|off            allow chapter proposals\n  \
         /models                  list models on the server\n  \
         /config <url> [model]    set endpoint and model\n  \
         /quit"
    );
}

fn report(result: quill::Result<()>, ok: &str) {
    match result {
        Ok(()) => println!("{ok}"),
        Err(e) => println!("error: {e}"),
    }
}

fn parse_toggle(args: &[&str]) -> Option<bool> {
    match args {
        ["on"] => Some(true),
        ["off"] => Some(false),
        _ => None,
    }
}

fn on_off(on: bool) -> &'static str {
    if on { "on" } else { "off" }
}

fn flush() {
    let _ = std::io::stdout().flush();
}
