//! # cbot
//!
//! Command-line front end for the chatbot search embed. Useful for checking
//! a search hub's configuration, replaying what the bot would show for a
//! question, and sending test analytics events.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `cbot query "<text>"` | Run a search and print the displayed results |
//! | `cbot chat "<message>"` | Interpret an agent chat message (`COVEO|search|...`) |
//! | `cbot event <type> <value>` | Send a custom analytics event |
//! | `cbot visitor show\|set\|clear` | Inspect or change the persisted visitor id |
//! | `cbot session clear` | Drop the cached endpoint descriptor |
//!
//! ## Examples
//!
//! ```bash
//! COVEO_TOKEN=xx-... cbot query "reset my password"
//! cbot query "reset my password" --click 0
//! cbot chat "COVEO|search|reset|password"
//! cbot event chatbot escalated --field caseId=500xx
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use tracing::debug;

use coveo_chatbot::analytics::custom_event_fields;
use coveo_chatbot::chat::{parse_message, ChatMessage};
use coveo_chatbot::config::{self, Config};
use coveo_chatbot::endpoint::{self, EndpointIssuer, HttpIssuer, StaticIssuer};
use coveo_chatbot::logging;
use coveo_chatbot::orchestrator::{QueryOrchestrator, QueryState};
use coveo_chatbot::result_view::{display_content, ResultKind};
use coveo_chatbot::store::{FileStore, SharedStore};
use coveo_chatbot::visitor::VisitorIdentity;

/// cbot — search and analytics client for a chat-embedded Coveo experience.
#[derive(Parser)]
#[command(
    name = "cbot",
    about = "cbot — search and analytics client for a chat-embedded Coveo experience",
    version
)]
struct Cli {
    /// Path to configuration file (TOML). A missing file means all defaults.
    #[arg(long, global = true, default_value = "./config/cbot.toml")]
    config: PathBuf,

    /// Log at debug level.
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Log format: `pretty`, `compact`, or `json`.
    #[arg(long, global = true, default_value = "compact")]
    log_format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a search and print the results the bot would display.
    Query {
        /// Query text.
        text: String,

        /// After displaying, report a click on the result with this rank.
        #[arg(long)]
        click: Option<usize>,

        /// Print displayed results as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Interpret a chat message and run the search it asks for.
    Chat {
        /// Raw (possibly HTML-escaped) message content.
        message: String,

        /// Treat the message as coming from the end user rather than the agent.
        #[arg(long)]
        user: bool,
    },

    /// Send a custom analytics event.
    Event {
        /// Event type (`eventType`).
        event_type: String,

        /// Event value (`eventValue`).
        event_value: String,

        /// Extra body fields as `key=value`. Values that parse as JSON are sent as JSON.
        #[arg(long = "field", value_parser = parse_key_val)]
        fields: Vec<(String, String)>,
    },

    /// Inspect or change the persisted visitor id.
    Visitor {
        #[command(subcommand)]
        action: VisitorAction,
    },

    /// Manage the cached session endpoint.
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },
}

#[derive(Subcommand)]
enum VisitorAction {
    Show,
    Set { id: String },
    Clear,
}

#[derive(Subcommand)]
enum SessionAction {
    /// Forget the cached descriptor; the next command requests a new token.
    Clear,
}

/// Parse a `key=value` pair for `--field` arguments.
fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid KEY=VALUE: no '=' found in '{}'", s))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

fn field_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn build_issuer(cfg: &Config) -> Result<Arc<dyn EndpointIssuer>> {
    if let Some(url) = &cfg.session.issuer_url {
        return Ok(Arc::new(HttpIssuer::new(url, cfg.platform.timeout_secs)?));
    }
    if let Some(token) = cfg.static_token() {
        return Ok(Arc::new(StaticIssuer::from_token(
            &token,
            &cfg.platform.default_uri,
        )));
    }
    bail!("No endpoint issuer configured: set session.issuer_url, session.token, or COVEO_TOKEN")
}

fn stores(cfg: &Config) -> (SharedStore, SharedStore) {
    let session: SharedStore = Arc::new(FileStore::new(cfg.session_store_path()));
    let local: SharedStore = Arc::new(FileStore::new(cfg.local_store_path()));
    (session, local)
}

fn build_orchestrator(cfg: &Config) -> Result<QueryOrchestrator> {
    let (session, local) = stores(cfg);
    QueryOrchestrator::new(cfg, session, local, build_issuer(cfg)?)
}

fn print_results(orch: &QueryOrchestrator, as_json: bool) -> Result<()> {
    let shown = orch.results_to_display();
    if as_json {
        println!("{}", serde_json::to_string_pretty(&shown)?);
        return Ok(());
    }
    if shown.is_empty() {
        println!("No results.");
        return Ok(());
    }
    for ranked in &shown {
        let kind = match ResultKind::of(&ranked.result) {
            ResultKind::YouTube => "video",
            ResultKind::Answer => "answer",
            ResultKind::Other => "doc",
        };
        println!(
            "{}. [{}] {}",
            ranked.rank,
            kind,
            display_content(&ranked.result)
        );
        if let Some(uri) = ranked.result.uri().filter(|u| !u.is_empty()) {
            println!("   {}", uri);
        }
    }
    Ok(())
}

async fn run_query(cfg: &Config, text: &str, click: Option<usize>, as_json: bool) -> Result<()> {
    let mut orch = build_orchestrator(cfg)?;
    let state = orch.query(text).await;
    if state != QueryState::ResultsReady {
        orch.flush_events().await;
        bail!("query did not produce results (state: {:?})", state);
    }
    print_results(&orch, as_json)?;

    if click.is_some() && !orch.handle_result_click(click) {
        eprintln!("Warning: no displayed result at rank {}", click.unwrap_or_default());
    }
    orch.flush_events().await;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "warn" };
    logging::init_logging(level, &cli.log_format)?;

    let cfg = config::load_or_default(&cli.config)?;
    debug!(config = %cli.config.display(), "configuration loaded");

    match cli.command {
        Commands::Query { text, click, json } => {
            run_query(&cfg, &text, click, json).await?;
        }
        Commands::Chat { message, user } => match parse_message(&message, !user) {
            ChatMessage::UserQuery(query) => {
                run_query(&cfg, &query, None, false).await?;
            }
            ChatMessage::PlainText(text) => {
                println!("{}", text);
            }
            ChatMessage::Ignored => {
                println!("(ignored)");
            }
        },
        Commands::Event {
            event_type,
            event_value,
            fields,
        } => {
            let mut body = custom_event_fields(&event_type, &event_value);
            let extra: Map<String, Value> = fields
                .into_iter()
                .map(|(k, v)| (k, field_value(&v)))
                .collect();
            body.extend(extra);

            let mut orch = build_orchestrator(&cfg)?;
            let response = orch.log_custom_event(body).await?;
            if response.is_empty() {
                bail!("analytics event was not accepted");
            }
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Commands::Visitor { action } => {
            let (_, local) = stores(&cfg);
            let visitor = VisitorIdentity::new(local);
            match action {
                VisitorAction::Show => match visitor.get() {
                    Some(id) => println!("{}", id),
                    None => println!("(none)"),
                },
                VisitorAction::Set { id } => {
                    visitor.set(&id)?;
                    println!("Visitor id set.");
                }
                VisitorAction::Clear => {
                    visitor.clear()?;
                    println!("Visitor id cleared.");
                }
            }
        }
        Commands::Session { action } => match action {
            SessionAction::Clear => {
                let (session, _) = stores(&cfg);
                endpoint::clear_cached(session.as_ref())?;
                println!("Session endpoint cleared.");
            }
        },
    }

    Ok(())
}
