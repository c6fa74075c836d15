//! `openorca agent`: interactive or single-message chat mode.

use anyhow::Context;
use openorca_agent::prompts::DEFAULT_SYSTEM_PROMPT;
use openorca_agent::{AgentError, AgentLoop, AgentStreamEvent, LoopSettings, TurnOutcome};
use openorca_config::AppConfig;
use openorca_core::{Conversation, Message, Provider};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const PREVIEW_CHARS: usize = 120;

pub struct AgentOptions {
    pub message: Option<String>,
    pub model: Option<String>,
    pub workspace: PathBuf,
    pub plan: bool,
    pub sandbox: bool,
    pub native_tools: bool,
    pub show_thinking: bool,
    pub verbose: bool,
}

impl AgentOptions {
    fn apply(&self, config: &mut AppConfig) {
        if let Some(model) = &self.model {
            config.provider.model = model.clone();
        }
        config.agent.plan_mode |= self.plan;
        config.agent.sandbox_mode |= self.sandbox;
        config.agent.native_tool_calling &= self.native_tools;
        config.agent.show_thinking |= self.show_thinking;
    }
}

pub async fn run(options: AgentOptions) -> anyhow::Result<()> {
    let mut config = AppConfig::load().context("Failed to load config")?;
    options.apply(&mut config);

    let workspace = options
        .workspace
        .canonicalize()
        .with_context(|| format!("Workspace {} not found", options.workspace.display()))?;
    let provider = openorca_providers::build_from_config(&config.provider)
        .context("Failed to configure provider")?;
    let tools = Arc::new(openorca_tools::default_registry(&workspace));

    if !matches!(provider.health_check().await, Ok(true)) {
        eprintln!(
            "  [Notice] {} is not reachable yet; is the model server running?",
            config.provider.api_url
        );
    }

    let (tx, mut events) = mpsc::channel(256);
    let agent = Arc::new(
        AgentLoop::new(provider, tools, LoopSettings::from_config(&config)).with_events(tx),
    );

    // Ctrl+C stops the current generation; when idle it quits.
    let shutdown = CancellationToken::new();
    {
        let agent = Arc::clone(&agent);
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                if !agent.cancel_current_generation() {
                    shutdown.cancel();
                    break;
                }
                eprintln!("\n  [Cancelled]");
            }
        });
    }

    let mut renderer = Renderer::new(options.verbose);
    let mut conv = Conversation::with_system_prompt(DEFAULT_SYSTEM_PROMPT);

    if let Some(message) = options.message {
        conv.push(Message::user(message));
        turn(&agent, &mut conv, &shutdown, &mut events, &mut renderer).await?;
        return Ok(());
    }

    println!();
    println!("  OpenOrca, interactive mode");
    println!();
    println!("  Endpoint:   {}", config.provider.api_url);
    println!("  Model:      {}", config.provider.model);
    println!("  Workspace:  {}", workspace.display());
    for line in mode_lines(&config) {
        println!("  {line}");
    }
    println!();
    println!("  Commands: /think toggles reasoning, /status, exit.");
    println!("  Ctrl+C stops a response; press it again while idle to quit.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("  You > ");
        std::io::stdout().flush()?;

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = shutdown.cancelled() => None,
        };
        let Some(line) = line else { break };
        let input = line.trim();

        match input {
            "" => continue,
            "exit" | "quit" => break,
            "/think" => {
                let show = !agent.status().show_thinking;
                agent.set_show_thinking(show);
                println!("  Reasoning display {}", if show { "on" } else { "off" });
                continue;
            }
            "/status" => {
                println!("{}", serde_json::to_string_pretty(&agent.status())?);
                continue;
            }
            _ => {}
        }

        conv.push(Message::user(input));
        println!();
        if let Err(e) = turn(&agent, &mut conv, &shutdown, &mut events, &mut renderer).await {
            eprintln!("  [Error] {e}");
        }
        println!();
    }

    println!();
    println!("  Goodbye!");
    Ok(())
}

/// Banner lines for the active safety modes.
fn mode_lines(config: &AppConfig) -> Vec<&'static str> {
    let mut lines = Vec::new();
    if config.agent.plan_mode {
        lines.push("Plan mode:  on (read-only tools)");
    }
    if config.agent.sandbox_mode {
        lines.push("Sandbox:    on (read-only tools)");
    }
    lines
}

/// Run one turn while rendering its events as they arrive.
async fn turn(
    agent: &AgentLoop,
    conv: &mut Conversation,
    shutdown: &CancellationToken,
    events: &mut mpsc::Receiver<AgentStreamEvent>,
    renderer: &mut Renderer,
) -> Result<TurnOutcome, AgentError> {
    let result = {
        let running = agent.run_turn(conv, shutdown);
        tokio::pin!(running);
        loop {
            tokio::select! {
                result = &mut running => break result,
                Some(event) = events.recv() => renderer.render(event),
            }
        }
    };
    while let Ok(event) = events.try_recv() {
        renderer.render(event);
    }
    result
}

/// Prints agent events: answer text to stdout, everything else to stderr.
struct Renderer {
    verbose: bool,
    mid_line: bool,
}

impl Renderer {
    fn new(verbose: bool) -> Self {
        Self {
            verbose,
            mid_line: false,
        }
    }

    fn end_line(&mut self) {
        if self.mid_line {
            println!();
            self.mid_line = false;
        }
    }

    fn render(&mut self, event: AgentStreamEvent) {
        match event {
            AgentStreamEvent::Chunk { content } => {
                print!("{content}");
                let _ = std::io::stdout().flush();
                self.mid_line = !content.ends_with('\n');
            }
            AgentStreamEvent::Thinking { content } => {
                eprint!("\x1b[2m{content}\x1b[0m");
            }
            AgentStreamEvent::ToolCall { name, input, .. } => {
                self.end_line();
                eprintln!("  -> {name} {}", preview(&input.to_string()));
            }
            AgentStreamEvent::ToolResult {
                name,
                output,
                success,
                ..
            } => {
                let mark = if success { "ok" } else { "failed" };
                eprintln!("  <- {name} {mark}: {}", preview(&output));
            }
            AgentStreamEvent::Notice { message } => {
                self.end_line();
                eprintln!("  [Notice] {message}");
            }
            AgentStreamEvent::Done {
                usage,
                iterations,
                tool_calls_made,
                stop_reason,
                ..
            } => {
                self.end_line();
                if self.verbose {
                    let tokens = usage.map(|u| u.total_tokens).unwrap_or_default();
                    eprintln!(
                        "  [{stop_reason}] {iterations} iteration(s), {tool_calls_made} tool call(s), {tokens} tokens"
                    );
                }
            }
            AgentStreamEvent::Error { .. } => {
                // Reported by the caller from the returned error.
                self.end_line();
            }
        }
    }
}

/// First line of `text`, clipped.
fn preview(text: &str) -> String {
    let line = text.lines().next().unwrap_or_default();
    let clipped: String = line.chars().take(PREVIEW_CHARS).collect();
    if clipped.len() < line.len() || text.lines().nth(1).is_some() {
        format!("{clipped} ...")
    } else {
        clipped
    }
}
