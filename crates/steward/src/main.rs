//! Inspect steward session stores from the command line.
//!
//! Works against a [`JsonFileStore`] directory. Nothing here talks to a
//! model provider: the commands show what the orchestrator would see and
//! decide.
//!
//! # Examples
//!
//! ```sh
//! # List sessions, most recently updated first
//! steward --store ~/.steward sessions
//!
//! # Print the provider-visible history of a session
//! steward --store ~/.steward transcript --session ses-18c3f2a9b1c-0001
//!
//! # Render the summarization prompt for a session
//! steward --store ~/.steward compact-prompt --session ses-18c3f2a9b1c-0001
//!
//! # Check whether a turn would stop to summarize
//! steward budget --window 200000 --prompt-tokens 170000 --completion-tokens 12000
//!
//! # Render the per-turn <env> block
//! steward env --workdir .
//! ```

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process;
use steward::agent::history::session_messages;
use steward::context::{
    BudgetConfig, BudgetDecision, DynamicContext, StopBudgetEvaluator, SummaryPromptBuilder, TierConfig,
    TieredClassifier,
};
use steward::message::MessageRole;
use steward::store::{JsonFileStore, SessionStore};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Inspect steward session stores.
#[derive(Parser)]
#[command(name = "steward", version)]
struct Cli {
    /// Store directory.
    #[arg(long, default_value = ".steward", global = true)]
    store: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List sessions with their usage.
    Sessions,

    /// Print the history a new turn would start from.
    Transcript {
        #[arg(long)]
        session: String,
    },

    /// Print the tier statistics and summarization prompt for a session.
    CompactPrompt {
        #[arg(long)]
        session: String,

        /// Extra keyword that marks a message as must-keep. Repeatable.
        #[arg(long = "keyword")]
        keywords: Vec<String>,
    },

    /// Evaluate the stop-for-summary rule.
    Budget {
        /// Context window in tokens.
        #[arg(long)]
        window: u64,

        #[arg(long, default_value_t = 0)]
        prompt_tokens: u64,

        #[arg(long, default_value_t = 0)]
        completion_tokens: u64,
    },

    /// Render the per-turn environment block.
    Env {
        #[arg(long, default_value = ".")]
        workdir: PathBuf,
    },
}

fn open_store(path: &Path) -> JsonFileStore {
    match JsonFileStore::open(path) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("Error: failed to open store at {}: {e}", path.display());
            process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> Result<(), String> {
    match cli.command {
        Command::Sessions => {
            let store = open_store(&cli.store);
            let sessions = store.list_sessions().await.map_err(|e| e.to_string())?;
            if sessions.is_empty() {
                println!("No sessions in {}", cli.store.display());
            }
            for s in sessions {
                println!(
                    "{}  {:<40}  {:>8} ctx tokens  ${:.4}  {}",
                    s.id,
                    s.title,
                    s.context_tokens(),
                    s.cost,
                    s.updated_at.format("%Y-%m-%d %H:%M"),
                );
            }
        }
        Command::Transcript { session } => {
            let store = open_store(&cli.store);
            let record = store.get(&session).await.map_err(|e| e.to_string())?;
            let msgs = session_messages(&store, &record).await.map_err(|e| e.to_string())?;
            for msg in msgs {
                let role = match msg.role {
                    MessageRole::System => "system",
                    MessageRole::User => "user",
                    MessageRole::Assistant => "assistant",
                    MessageRole::Tool => "tool",
                };
                let marker = if msg.is_summary { " (summary)" } else { "" };
                println!("── {role}{marker} {}", msg.id);
                let content = msg.content();
                if !content.is_empty() {
                    println!("{content}");
                }
                for call in msg.tool_calls() {
                    println!("→ {}({})", call.name, call.input);
                }
                for result in msg.tool_results() {
                    let flag = if result.is_error { "error" } else { "ok" };
                    println!("← {} [{flag}] {}", result.name, result.content);
                }
                if let Some(finish) = msg.finish() {
                    println!("[{}] {}", finish.reason.as_str(), finish.title);
                }
            }
        }
        Command::CompactPrompt { session, keywords } => {
            let store = open_store(&cli.store);
            let record = store.get(&session).await.map_err(|e| e.to_string())?;
            let msgs = session_messages(&store, &record).await.map_err(|e| e.to_string())?;
            let mut config = TierConfig::default();
            config.preserve_keywords.extend(keywords.iter().map(|k| k.to_lowercase()));
            let excerpt_chars = config.preserve_excerpt_chars;
            let tiered = TieredClassifier::new(config).prepare(&msgs);
            eprintln!("{}", tiered.format_stats());
            println!("{}", SummaryPromptBuilder::new(excerpt_chars).build(&record.todos, &tiered));
        }
        Command::Budget {
            window,
            prompt_tokens,
            completion_tokens,
        } => {
            let evaluator = StopBudgetEvaluator::new(BudgetConfig::default());
            let usage = evaluator.usage(window, prompt_tokens, completion_tokens);
            println!("{}", usage.to_log_string());
            match evaluator.decide(window, prompt_tokens, completion_tokens) {
                BudgetDecision::Continue => println!("continue"),
                BudgetDecision::StopForSummary => println!("stop for summary"),
            }
        }
        Command::Env { workdir } => {
            let workdir = std::fs::canonicalize(&workdir).unwrap_or(workdir);
            println!("{}", DynamicContext::detect(workdir).await.render());
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
