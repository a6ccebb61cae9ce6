//! CLI binary for lucero.

use anyhow::Context;
use clap::{Parser, Subcommand};
use lucero::audio::{CpalOutput, PlaybackController};
use lucero::remote::{GeminiChat, GeminiSpeech};
use lucero::store::{FileStore, KeyValueStore, MemoryStore};
use lucero::{
    ChatError, Conversation, ConversationDeps, ConversationSettings, LuceroConfig, Message,
    TurnOutcome,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncBufReadExt;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Lucero: a terminal chat client that speaks its replies.
#[derive(Parser)]
#[command(name = "lucero", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Start with spoken replies turned off.
    #[arg(long)]
    no_voice: bool,

    /// Keep the conversation in memory only.
    #[arg(long)]
    ephemeral: bool,

    /// Write logs to stderr instead of the log file.
    #[arg(long)]
    log_stderr: bool,

    /// Subcommand to run.
    #[command(subcommand)]
    command: Option<Command>,
}

/// Available commands.
#[derive(Subcommand)]
enum Command {
    /// Start a chat with the AI.
    Chat,

    /// List available audio output devices.
    Devices,

    /// Write a config file with the default settings.
    Init {
        /// Replace an existing config file.
        #[arg(long)]
        force: bool,
    },
}

/// What a REPL line asks for.
#[derive(Debug, PartialEq, Eq)]
enum Input<'a> {
    Clear,
    Voice,
    History,
    Help,
    Quit,
    Unknown(&'a str),
    Say(&'a str),
    Blank,
}

fn parse_input(line: &str) -> Input<'_> {
    let line = line.trim();
    match line {
        "" => Input::Blank,
        "/clear" => Input::Clear,
        "/voice" => Input::Voice,
        "/history" => Input::History,
        "/help" => Input::Help,
        "/quit" | "/exit" => Input::Quit,
        cmd if cmd.starts_with('/') => Input::Unknown(cmd),
        text => Input::Say(text),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to a file by default so they never interleave with the chat.
    // Users can override the filter with RUST_LOG=debug.
    let _log_guard = init_logging(cli.log_stderr)?;

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(LuceroConfig::default_config_path);

    match cli.command.unwrap_or(Command::Chat) {
        Command::Chat => {
            let config = load_config(&config_path, cli.config.is_some())?;
            run_chat(config, cli.no_voice, cli.ephemeral).await
        }
        Command::Devices => list_devices(),
        Command::Init { force } => write_default_config(&config_path, force),
    }
}

/// Load the config file. A missing default file means default settings; a
/// missing explicit `--config` file is an error.
fn load_config(path: &std::path::Path, explicit: bool) -> anyhow::Result<LuceroConfig> {
    if !explicit && !path.exists() {
        return Ok(LuceroConfig::default());
    }
    LuceroConfig::from_file(path)
        .with_context(|| format!("cannot load config from {}", path.display()))
}

fn write_default_config(path: &std::path::Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to replace it)", path.display());
    }
    LuceroConfig::default()
        .save_to_file(path)
        .with_context(|| format!("cannot write config to {}", path.display()))?;
    println!("Wrote default config to {}", path.display());
    Ok(())
}

fn init_logging(to_stderr: bool) -> anyhow::Result<Option<WorkerGuard>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("lucero=info"));

    if to_stderr {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
        return Ok(None);
    }

    let dir = lucero::paths::logs_dir();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("cannot create log directory {}", dir.display()))?;
    let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, "lucero.log"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();
    Ok(Some(guard))
}

async fn run_chat(config: LuceroConfig, no_voice: bool, ephemeral: bool) -> anyhow::Result<()> {
    println!("Lucero v{}", env!("CARGO_PKG_VERSION"));

    let chat = GeminiChat::from_config(&config.chat)
        .context("set GEMINI_API_KEY or [chat] api_key in the config file")?;
    let speech = GeminiSpeech::from_config(&config.chat, &config.tts)?;

    let store: Arc<dyn KeyValueStore> = if ephemeral {
        Arc::new(MemoryStore::new())
    } else {
        let dir = config.storage.effective_dir();
        info!("storing conversation in {}", dir.display());
        Arc::new(FileStore::new(dir))
    };

    let mut settings = ConversationSettings::from_config(&config);
    if no_voice {
        settings.speech_enabled = false;
    }

    let deps = ConversationDeps {
        chat: Arc::new(chat),
        speech: Arc::new(speech),
        playback: Arc::new(PlaybackController::new(Arc::new(CpalOutput::new(
            &config.audio,
        )))),
        store,
    };
    let conversation = Arc::new(Conversation::new(deps, settings));

    println!();
    print_history(&conversation.messages());
    println!(
        "\nVoice is {}. Type /help for commands. Press Ctrl+C to quit.\n",
        on_off(conversation.is_speech_enabled())
    );

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                info!("received Ctrl+C, shutting down...");
                None
            }
        };
        let Some(line) = line else { break };

        match parse_input(&line) {
            Input::Blank => {}
            Input::Quit => break,
            Input::Help => print_help(),
            Input::History => print_history(&conversation.messages()),
            Input::Clear => {
                conversation.clear();
                print_history(&conversation.messages());
            }
            Input::Voice => {
                let enabled = conversation.toggle_speech();
                println!("Voice {}.", on_off(enabled));
            }
            Input::Unknown(cmd) => println!("Unknown command {cmd}. Type /help for commands."),
            Input::Say(_) if conversation.is_busy() => {
                println!("Still working on the last message, please wait.");
            }
            Input::Say(text) => {
                println!("Lucero is thinking...");
                let conversation = Arc::clone(&conversation);
                let text = text.to_owned();
                tokio::spawn(async move {
                    match conversation.submit(&text).await {
                        Ok(TurnOutcome::Completed { reply, spoke }) => {
                            let marker = if spoke { " [speaking]" } else { "" };
                            println!("Lucero: {}{marker}\n", reply.text);
                        }
                        Ok(TurnOutcome::Discarded) => {}
                        Err(ChatError::TurnInProgress) => {
                            println!("Still working on the last message, please wait.");
                        }
                        Err(e) => println!("{e}"),
                    }
                });
            }
        }
    }

    conversation.playback().stop();
    println!("Goodbye!");
    Ok(())
}

fn print_history(messages: &[Message]) {
    for message in messages {
        let who = if message.is_user() { "You" } else { "Lucero" };
        println!("{who}: {}", message.text);
    }
}

fn print_help() {
    println!("Commands:");
    println!("  /clear    start a fresh conversation");
    println!("  /voice    turn spoken replies on or off");
    println!("  /history  show the conversation so far");
    println!("  /help     show this help");
    println!("  /quit     exit");
}

fn on_off(enabled: bool) -> &'static str {
    if enabled { "on" } else { "off" }
}

fn list_devices() -> anyhow::Result<()> {
    println!("Output devices:");
    for name in CpalOutput::list_output_devices()? {
        println!("  - {name}");
    }
    Ok(())
}
