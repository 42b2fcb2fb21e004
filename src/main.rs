use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use text2sql::config::check_positive;
use text2sql::{
    question::read_question, AppConfig, LlmClient, Question, RetryOrchestrator, RetryPolicy,
    RunStatus, SchemaDocument,
};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "text2sql")]
#[command(about = "Generate a validated, read-only SQL query from a natural-language question")]
struct Args {
    /// The question in natural language (read from stdin if omitted)
    question: Option<String>,

    /// Path to the table documentation JSON (or set TEXT2SQL_SCHEMA_PATH)
    #[arg(short, long)]
    schema: Option<PathBuf>,

    /// API key for the completion service (or set GROQ_API_KEY)
    #[arg(long)]
    api_key: Option<String>,

    /// Model name (or set MODEL_NAME)
    #[arg(long)]
    model: Option<String>,

    /// Base URL of an OpenAI-compatible API (or set LLM_BASE_URL)
    #[arg(long)]
    base_url: Option<String>,

    /// Maximum generate/validate attempts
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Per-request timeout in seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Print the full run result as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S%.3f".to_string()))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match run(args).await {
        Ok(status) => match status {
            RunStatus::Succeeded => ExitCode::SUCCESS,
            RunStatus::ExhaustedRetries => ExitCode::from(2),
            RunStatus::Failed => ExitCode::FAILURE,
        },
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<RunStatus> {
    let config = load_config(&args)?;

    let schema = SchemaDocument::load(&config.schema_path)
        .context("Failed to load table documentation")?;

    let question = match args.question {
        Some(ref text) => Question::new(text.as_str())?,
        None => {
            eprint!("Question: ");
            std::io::stderr().flush().ok();
            read_question(std::io::stdin().lock()).context("Failed to read question")?
        }
    };

    let policy = RetryPolicy::from_config(&config)?;
    let client = LlmClient::new(
        config.api_key.clone(),
        config.model.clone(),
        config.base_url.clone(),
        config.call_timeout,
    )?;
    info!(model = client.model(), base_url = %config.base_url, "Completion client ready");

    let orchestrator = RetryOrchestrator::new(Arc::new(client), policy);

    let cancel = CancellationToken::new();
    let ctrl_c_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c_token.cancel();
        }
    });

    let result = orchestrator.run(&question, &schema, &cancel).await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        match result.status {
            RunStatus::Succeeded => {
                if let Some(ref sql) = result.sql_query {
                    println!("{}", sql);
                }
                eprintln!("Query validated after {} attempt(s)", result.attempts);
            }
            RunStatus::ExhaustedRetries | RunStatus::Failed => {
                eprintln!(
                    "No valid query ({}): {}",
                    result.status,
                    result.failure_reason.as_deref().unwrap_or("unknown")
                );
                if let Some(ref sql) = result.sql_query {
                    eprintln!("Last candidate:\n{}", sql);
                }
            }
        }
    }

    Ok(result.status)
}

/// Environment first, then CLI flags on top.
fn load_config(args: &Args) -> Result<AppConfig> {
    let api_key = args.api_key.clone();
    let mut config = AppConfig::from_lookup(|key| match key {
        "GROQ_API_KEY" if api_key.is_some() => api_key.clone(),
        _ => std::env::var(key).ok(),
    })?;

    if let Some(ref model) = args.model {
        config.model = model.clone();
    }
    if let Some(ref base_url) = args.base_url {
        config.base_url = base_url.trim_end_matches('/').to_string();
    }
    if let Some(max_attempts) = args.max_attempts {
        config.max_attempts = check_positive("--max-attempts", max_attempts as u64)? as u32;
    }
    if let Some(timeout_secs) = args.timeout_secs {
        let timeout_secs = check_positive("--timeout-secs", timeout_secs)?;
        config.call_timeout = Duration::from_secs(timeout_secs);
    }
    if let Some(ref schema) = args.schema {
        config.schema_path = schema.clone();
    }

    Ok(config)
}
