//! `capdispatch`: discover a capability server's tools and resources, let a
//! hosted model pick one per request, and invoke it. Also serves and talks to
//! A2A agents.
//!
//! Exit codes: 0 on success, 1 on a failed command, 2 on a configuration error.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use futures::StreamExt;
use tokio::io::BufReader;

use capability_dispatch::a2a::agent_card::{extended_card, public_card};
use capability_dispatch::a2a::client::{extract_text_parts, render_text_part};
use capability_dispatch::a2a::{
    A2aClient, A2aState, AgentExecutor, AgentMode, DispatchExecutor, HelloWorldExecutor,
};
use capability_dispatch::agent_core::{Directive, DirectiveResolver, RefreshPolicy, Session};
use capability_dispatch::config::{AppConfig, ConfigError};
use capability_dispatch::inference::InferenceClient;
use capability_dispatch::mcp_client::{CapabilityKind, CapabilityRegistry, HttpTransport};
use capability_dispatch::{init_tracing, LogOptions};

// ─── CLI ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Parser)]
#[command(name = "capdispatch", version, about = "Model-directed capability dispatch")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Args)]
struct GlobalArgs {
    /// Config file (YAML). Defaults to capdispatch.yaml found upward from the cwd.
    #[arg(long, global = true, env = "CAPDISPATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Write logs to a rotated file in the data directory instead of stderr.
    #[arg(long, global = true)]
    log_file: bool,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    /// Capability server JSON-RPC endpoint.
    #[arg(long, global = true, env = "MCP_SERVER_URL")]
    mcp_url: Option<String>,

    /// Check tool arguments against the tool schema before invoking.
    #[arg(long, global = true)]
    validate_arguments: bool,

    /// Directive used when the model output is unusable, e.g. `resource:list-products`.
    #[arg(long, global = true, value_parser = parse_fallback)]
    fallback: Option<Directive>,

    /// When to re-discover capabilities.
    #[arg(long, global = true, value_enum)]
    refresh: Option<RefreshArg>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List the capabilities the server offers.
    Discover,

    /// Resolve and dispatch one request, then exit.
    Ask {
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },

    /// Read requests from stdin, one per line; write one JSON result per line.
    Repl,

    /// Run the A2A agent server.
    Serve {
        #[arg(long)]
        bind: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        #[arg(long, value_enum)]
        mode: Option<ModeArg>,
        /// URL advertised on the agent card.
        #[arg(long)]
        public_url: Option<String>,
    },

    /// Send a message to an A2A agent and print its replies.
    Send {
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
        /// Agent base URL.
        #[arg(long, env = "A2A_AGENT_URL", default_value = "http://localhost:9999")]
        url: String,
        /// Skip the streaming request even if the agent supports it.
        #[arg(long)]
        no_stream: bool,
        #[arg(long, default_value_t = 30)]
        timeout_secs: u64,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RefreshArg {
    Startup,
    EveryTurn,
}

impl From<RefreshArg> for RefreshPolicy {
    fn from(arg: RefreshArg) -> Self {
        match arg {
            RefreshArg::Startup => RefreshPolicy::Startup,
            RefreshArg::EveryTurn => RefreshPolicy::EveryTurn,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    HelloWorld,
    Dispatch,
}

impl From<ModeArg> for AgentMode {
    fn from(arg: ModeArg) -> Self {
        match arg {
            ModeArg::HelloWorld => AgentMode::HelloWorld,
            ModeArg::Dispatch => AgentMode::Dispatch,
        }
    }
}

/// Parse `kind:name`, e.g. `resource:list-products`. Tools get empty arguments.
fn parse_fallback(value: &str) -> Result<Directive, String> {
    let (kind, name) = value
        .split_once(':')
        .ok_or_else(|| format!("expected <tool|resource>:<name>, got '{value}'"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err("fallback name must not be empty".to_string());
    }
    match kind.trim() {
        "tool" => Ok(Directive::tool(name, serde_json::Map::new())),
        "resource" => Ok(Directive::resource(name)),
        other => Err(format!(
            "fallback kind must be '{}' or '{}', got '{other}'",
            CapabilityKind::Tool,
            CapabilityKind::Resource
        )),
    }
}

// ─── Entry point ─────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(LogOptions {
        to_file: cli.global.log_file,
        json: cli.global.log_json,
    });

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            let is_config = e.downcast_ref::<ConfigError>().is_some();
            tracing::error!(error = %format!("{e:#}"), "command failed");
            eprintln!("error: {e:#}");
            ExitCode::from(if is_config { 2 } else { 1 })
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = load_config(&cli.global)?;

    match cli.command {
        Command::Discover => discover(&config).await,
        Command::Ask { text } => ask(&config, &text.join(" ")).await,
        Command::Repl => repl(&config).await,
        Command::Serve {
            bind,
            port,
            mode,
            public_url,
        } => {
            let mut agent = config.agent.clone();
            if let Some(bind) = bind {
                agent.bind = bind;
            }
            if let Some(port) = port {
                agent.port = port;
            }
            if let Some(mode) = mode {
                agent.mode = mode.into();
            }
            if public_url.is_some() {
                agent.public_url = public_url;
            }
            serve(&AppConfig { agent, ..config }).await
        }
        Command::Send {
            text,
            url,
            no_stream,
            timeout_secs,
        } => send(&url, &text.join(" "), !no_stream, Duration::from_secs(timeout_secs)).await,
    }
}

/// Config file + environment, then CLI flags on top.
fn load_config(args: &GlobalArgs) -> Result<AppConfig, ConfigError> {
    let mut config = AppConfig::load(args.config.as_deref())?;
    if let Some(url) = &args.mcp_url {
        config.mcp.url = Some(url.clone());
    }
    if args.validate_arguments {
        config.session.validate_arguments = true;
    }
    if let Some(fallback) = &args.fallback {
        config.session.fallback = Some(fallback.clone());
    }
    if let Some(refresh) = args.refresh {
        config.session.refresh_policy = refresh.into();
    }
    Ok(config)
}

fn transport(config: &AppConfig) -> anyhow::Result<Arc<HttpTransport>> {
    let url = config.require_mcp_url()?;
    let timeout = Duration::from_secs(config.mcp.request_timeout_secs);
    Ok(Arc::new(HttpTransport::new(url, timeout)?))
}

/// Build a session. Fails on missing settings before any network activity.
fn build_session(config: &AppConfig) -> anyhow::Result<Arc<Session>> {
    config.require_model_credential()?;
    let transport = transport(config)?;
    let model = Arc::new(InferenceClient::from_config(config.model.clone())?);

    Ok(Arc::new(Session::new(
        transport,
        Arc::new(CapabilityRegistry::new()),
        DirectiveResolver::new(model),
        config.dispatcher(),
        config.session_options(),
    )))
}

// ─── Commands ────────────────────────────────────────────────────────────────

async fn discover(config: &AppConfig) -> anyhow::Result<ExitCode> {
    let transport = transport(config)?;
    let registry = CapabilityRegistry::new();
    registry
        .refresh(transport.as_ref())
        .await
        .context("capability discovery failed")?;

    println!("{}", serde_json::to_string_pretty(&registry.snapshot().to_json())?);
    Ok(ExitCode::SUCCESS)
}

async fn ask(config: &AppConfig, text: &str) -> anyhow::Result<ExitCode> {
    let session = build_session(config)?;
    let outcome = session.run_once(text).await?;

    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(if outcome.result.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn repl(config: &AppConfig) -> anyhow::Result<ExitCode> {
    let session = build_session(config)?;
    let stdin = BufReader::new(tokio::io::stdin());
    let mut stdout = tokio::io::stdout();

    session.run_interactive(stdin, &mut stdout).await?;
    Ok(ExitCode::SUCCESS)
}

async fn serve(config: &AppConfig) -> anyhow::Result<ExitCode> {
    let agent = &config.agent;

    let executor: Arc<dyn AgentExecutor> = match agent.mode {
        AgentMode::HelloWorld => Arc::new(HelloWorldExecutor),
        AgentMode::Dispatch => {
            let session = build_session(config)?;
            if config.session.refresh_policy == RefreshPolicy::Startup {
                let count = session.start().await?;
                tracing::info!(capabilities = count, "capabilities discovered");
            }
            Arc::new(DispatchExecutor::new(session))
        }
    };

    let public = public_card(&agent.public_url(), agent.mode);
    let state = A2aState {
        executor,
        extended_card: Arc::new(extended_card(&public)),
        public_card: Arc::new(public),
        extended_card_token: agent.extended_card_token.clone(),
    };

    capability_dispatch::a2a::server::serve(&agent.bind, agent.port, state).await?;
    Ok(ExitCode::SUCCESS)
}

async fn send(url: &str, text: &str, stream: bool, timeout: Duration) -> anyhow::Result<ExitCode> {
    let client = A2aClient::new(url, timeout)?;
    let card = client.fetch_agent_card().await?;
    println!("Resolved agent card:");
    println!("{}", serde_json::to_string_pretty(&card)?);

    let result = client.send_message(&card, text).await?;
    println!("\nResponse:");
    print_text_parts(&result);

    if !(stream && card.capabilities.streaming) {
        return Ok(ExitCode::SUCCESS);
    }

    println!("\nStreaming response:");
    let mut replies = client.send_message_streaming(&card, text).await?;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                tracing::info!("stream interrupted");
                break;
            }
            next = replies.next() => match next {
                Some(Ok(event)) => print_text_parts(&event),
                Some(Err(e)) => return Err(e.into()),
                None => break,
            },
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn print_text_parts(result: &serde_json::Value) {
    for text in extract_text_parts(result) {
        println!("{}", render_text_part(&text));
    }
}
