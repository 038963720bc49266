//! Conduit CLI: chat with a model that can call MCP tools.

use anyhow::{Context, Result};
use clap::Parser;
use conduit_api::OpenAiProvider;
use conduit_config::{CliOverrides, ConduitConfig};
use conduit_core::{Conversation, ConversationEngine};
use conduit_mcp::McpManager;
use conduit_types::truncate_for_display;
use std::future::Future;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "conduit", version, about = "Chat with a model that can call MCP tools")]
struct Cli {
    /// Send a single prompt and print the response (non-interactive)
    #[arg(short, long)]
    print: Option<String>,

    /// Model (or Azure deployment) to use
    #[arg(long)]
    model: Option<String>,

    /// API key (overrides OPENAI_API_KEY)
    #[arg(long)]
    api_key: Option<String>,

    /// Path to the MCP server declarations (mcp_servers.json)
    #[arg(long)]
    mcp_config: Option<PathBuf>,

    /// Enable verbose/debug logging
    #[arg(long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let dotenv = dotenvy::dotenv();

    // Set up logging
    let log_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_writer(io::stderr)
        .init();

    if let Ok(path) = dotenv {
        tracing::debug!("Loaded environment from {}", path.display());
    }

    let config = ConduitConfig::load(CliOverrides {
        api_key: cli.api_key,
        model: cli.model,
        mcp_config: cli.mcp_config,
    })
    .context("Failed to load configuration")?;

    let mut conversation = create_conversation(&config)?;

    let result = match cli.print {
        Some(prompt) => run_turn(&mut conversation, &prompt).await,
        None => repl(&mut conversation, &config).await,
    };

    conversation.shutdown().await;
    result
}

fn create_conversation(config: &ConduitConfig) -> Result<Conversation> {
    let provider = OpenAiProvider::new(&config.api_key, config.endpoint.clone())
        .context("Failed to create API client")?;
    let engine = ConversationEngine::new(Arc::new(provider), config.model.clone())
        .with_history_window(config.history_window)
        .with_max_tool_rounds(config.max_tool_rounds);

    let servers = config
        .load_mcp_config()
        .context("Failed to load MCP server config")?;
    let manager = McpManager::new(servers, config.tool_collision);

    Ok(Conversation::new(engine, manager))
}

async fn repl(conversation: &mut Conversation, config: &ConduitConfig) -> Result<()> {
    eprintln!(
        "conduit v{} (model: {}, provider: {})",
        env!("CARGO_PKG_VERSION"),
        config.model,
        conversation.engine().provider_name(),
    );
    eprintln!("Type your message. Ctrl+C stops a running answer, or exits at the prompt.\n");

    let mut lines = spawn_line_reader();
    loop {
        eprint!("> ");
        io::stderr().flush()?;

        let input = match next_input(&mut lines, interrupted()).await {
            Input::Line(line) => line,
            Input::Interrupted | Input::Closed => {
                eprintln!();
                break;
            }
        };

        let input = input.trim();
        if input.is_empty() {
            continue;
        }

        if let Some(handled) = handle_slash_command(input, conversation).await {
            match handled {
                SlashResult::Continue => continue,
                SlashResult::Break => break,
                SlashResult::Unknown => {
                    eprintln!("Unknown command: {input}. Type /help for available commands.");
                    continue;
                }
            }
        }

        if let Err(e) = run_turn(conversation, input).await {
            eprintln!("\nError: {e:#}");
        }
        println!();
    }

    Ok(())
}

/// What the prompt got.
enum Input {
    Line(String),
    Interrupted,
    Closed,
}

/// Read stdin on its own thread so the prompt can wait on Ctrl+C as well.
fn spawn_line_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
    rx
}

/// Resolves on Ctrl+C. Never resolves if the handler can't be installed.
async fn interrupted() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}

async fn next_input(
    lines: &mut mpsc::UnboundedReceiver<String>,
    interrupt: impl Future<Output = ()>,
) -> Input {
    tokio::select! {
        biased;
        _ = interrupt => Input::Interrupted,
        line = lines.recv() => match line {
            Some(line) => Input::Line(line),
            None => Input::Closed,
        },
    }
}

enum SlashResult {
    Continue,
    Break,
    Unknown,
}

async fn handle_slash_command(input: &str, conversation: &mut Conversation) -> Option<SlashResult> {
    if !input.starts_with('/') {
        return None;
    }

    let cmd = input.split_whitespace().next().unwrap_or(input);
    match cmd {
        "/quit" | "/exit" => Some(SlashResult::Break),
        "/clear" => {
            conversation.clear();
            eprintln!("Conversation cleared.");
            Some(SlashResult::Continue)
        }
        "/tools" => {
            conversation.connect().await;
            print_tools(conversation);
            Some(SlashResult::Continue)
        }
        "/help" => {
            print_help();
            Some(SlashResult::Continue)
        }
        _ => Some(SlashResult::Unknown),
    }
}

/// Run one turn and stream the answer to stdout. Ctrl+C cancels it.
async fn run_turn(conversation: &mut Conversation, prompt: &str) -> Result<()> {
    let cancel = CancellationToken::new();
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            interrupted().await;
            cancel.cancel();
        })
    };

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let result = conversation
        .send(
            prompt,
            |text| {
                let _ = write!(out, "{text}");
                let _ = out.flush();
            },
            |narration| {
                eprintln!("  [{narration}]");
            },
            &cancel,
        )
        .await;
    ctrl_c.abort();

    match result {
        Ok(Some(_)) => {
            let _ = writeln!(out);
            Ok(())
        }
        Ok(None) => {
            eprintln!("(no response)");
            Ok(())
        }
        Err(e) => Err(e).context("Turn failed"),
    }
}

fn print_tools(conversation: &Conversation) {
    let servers = conversation.servers();
    if servers.is_empty() {
        eprintln!("No MCP servers connected.");
        return;
    }
    for (server, count) in servers {
        eprintln!("  {server}: {count} tool(s)");
    }
    eprintln!();
    for tool in conversation.tools() {
        let description = tool.description.lines().next().unwrap_or("");
        eprintln!("  {:<24} {}", tool.name, truncate_for_display(description, 80));
    }
}

fn print_help() {
    eprintln!("Available commands:");
    eprintln!("  /help     Show this help");
    eprintln!("  /tools    List connected MCP servers and their tools");
    eprintln!("  /clear    Clear the conversation");
    eprintln!("  /quit     Exit");
    eprintln!();
    eprintln!("Ctrl+C stops a running answer; at the prompt it exits.");
}
