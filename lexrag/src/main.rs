use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use futures::StreamExt;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use lexrag::backends::{CrossEncoderReranker, ExampleStore, HttpRetriever, StaticExampleStore};
use lexrag::config::Config;
use lexrag::llm::LlmProvider;
use lexrag::models::{ChatMessage, ModeHint, ProcessOptions, Query};
use lexrag::services::Orchestrator;

#[derive(Parser)]
#[command(name = "lexrag")]
#[command(about = "Grounded answers to questions about Swedish law")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Answer a single question and print the result as JSON
    Ask {
        question: String,

        /// auto, chat, assist or evidence
        #[arg(long, default_value = "auto")]
        mode: ModeHint,

        /// JSON file holding the prior conversation as [{"role", "content"}, ...]
        #[arg(long)]
        history: Option<PathBuf>,

        /// Client identifier used for rate limiting
        #[arg(long)]
        client: Option<String>,

        /// Override the configured retrieval depth
        #[arg(long)]
        top_k: Option<usize>,

        /// Print stream events as NDJSON instead of the final result
        #[arg(long)]
        stream: bool,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "lexrag=info".into());
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    // stdout carries results; logs go to stderr.
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry.with(fmt::layer().with_writer(std::io::stderr)).init();
    }
}

async fn build_orchestrator(config: Config) -> anyhow::Result<Orchestrator> {
    let generator = Arc::new(LlmProvider::new(config.llm.as_ref()));
    if !generator.is_available() {
        tracing::warn!("LLM backend unavailable, every answer will fail. Set LLM_MODEL to configure it.");
    }

    let retriever = Arc::new(HttpRetriever::new(&config.retrieval)?);
    tracing::info!(endpoint = %retriever.endpoint(), "Retrieval backend configured");

    let examples: Arc<dyn ExampleStore> = match &config.few_shot_path {
        Some(path) => Arc::new(StaticExampleStore::from_file(path)?),
        None => Arc::new(StaticExampleStore::default()),
    };

    let reranker = match CrossEncoderReranker::new_async(&config.reranker).await {
        Ok(reranker) => reranker,
        Err(e) => {
            tracing::warn!(error = %e, "Reranker unavailable, continuing without reranking");
            None
        }
    };

    let mut orchestrator = Orchestrator::new(config, retriever, generator, examples);
    if let Some(reranker) = reranker {
        orchestrator = orchestrator.with_reranker(Arc::new(reranker));
    }
    Ok(orchestrator)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    dotenvy::dotenv().ok();
    init_tracing();

    let config = Config::from_env();
    let orchestrator = build_orchestrator(config).await?;

    match args.command {
        Command::Ask {
            question,
            mode,
            history,
            client,
            top_k,
            stream,
        } => {
            let history: Vec<ChatMessage> = match history {
                Some(path) => serde_json::from_str(&std::fs::read_to_string(&path)?)?,
                None => Vec::new(),
            };
            let query = Query::new(question).with_history(history).with_mode(mode);
            let options = ProcessOptions {
                client_id: client,
                filter: None,
                top_k,
            };

            if stream {
                print_stream(&orchestrator, query, options).await?;
            } else {
                let result = orchestrator.process(query, options).await;
                println!("{}", serde_json::to_string_pretty(&result)?);
            }
        }
    }

    Ok(())
}

/// Prints events until the terminal one, or until Ctrl-C drops the stream
/// and cancels the run.
async fn print_stream(
    orchestrator: &Orchestrator,
    query: Query,
    options: ProcessOptions,
) -> anyhow::Result<()> {
    let mut events = orchestrator.stream(query, options);
    let mut stdout = std::io::stdout();

    loop {
        tokio::select! {
            event = events.next() => match event {
                Some(event) => {
                    stdout.write_all(event.to_ndjson_line().as_bytes())?;
                    stdout.flush()?;
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, cancelling request");
                break;
            }
        }
    }

    Ok(())
}
