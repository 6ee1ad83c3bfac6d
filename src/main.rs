//! Report Grader CLI
//!
//! Grades a research report against its task and gold evaluation data.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use report_grader::{
    config::Config,
    inputs::{EvalSpec, Report, Task, load_json},
    llm::LlmClient,
    metrics::MetricKind,
    persistence::save_score_card,
    retrieval::{CachedEmbedder, Embedder, HttpEmbedder},
    scoring::Grader,
    sources::{FsSourceReader, SourceCatalog},
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Report Grader - LLM-judged scoring of research reports
#[derive(Parser)]
#[command(name = "report-grader")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log debug output (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// YAML config file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Score a report
    Score {
        /// Report JSON (report_text, report_insights, metadata)
        #[arg(short, long)]
        report: PathBuf,

        /// Task JSON (persona, dr_question, env_files)
        #[arg(short, long)]
        task: PathBuf,

        /// Evaluation JSON (gold questions, supporting files)
        #[arg(short, long)]
        eval: PathBuf,

        /// Metric to run; repeat for several (default: all)
        #[arg(short, long = "metric")]
        metrics: Vec<MetricKind>,

        /// Directory holding the task's source files
        #[arg(short, long)]
        data_dir: Option<PathBuf>,

        /// Write the score card as JSON
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Persist embeddings between runs
        #[arg(long)]
        embedding_cache: Option<PathBuf>,

        /// Embed locally instead of calling the embedding endpoint
        #[cfg(feature = "local-embeddings")]
        #[arg(long)]
        local_embeddings: bool,

        /// Print every metric's summary
        #[arg(long)]
        details: bool,
    },

    /// List available metrics
    Metrics,

    /// Test judge and embedding connections
    Test,
}

struct ScoreArgs {
    report: PathBuf,
    task: PathBuf,
    eval: PathBuf,
    metrics: Vec<MetricKind>,
    data_dir: Option<PathBuf>,
    output: Option<PathBuf>,
    embedding_cache: Option<PathBuf>,
    details: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Score {
            report,
            task,
            eval,
            metrics,
            data_dir,
            output,
            embedding_cache,
            #[cfg(feature = "local-embeddings")]
            local_embeddings,
            details,
        } => {
            let config = load_config(cli.config.as_deref())?;
            let args = ScoreArgs {
                report,
                task,
                eval,
                metrics,
                data_dir,
                output,
                embedding_cache,
                details,
            };

            #[cfg(feature = "local-embeddings")]
            if local_embeddings {
                let embedder = report_grader::retrieval::LocalEmbedder::load_default()
                    .context("Failed to load local embedding model")?;
                return cmd_score(config, embedder, args).await;
            }

            let embedder = HttpEmbedder::from_config(&config);
            cmd_score(config, embedder, args).await
        }
        Commands::Metrics => {
            cmd_metrics();
            Ok(())
        }
        Commands::Test => cmd_test(cli.config.as_deref()).await,
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "report_grader=debug" } else { "report_grader=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::load_with(path)
            .with_context(|| format!("Failed to load configuration from '{}'", path.display()))?,
        None => Config::load().context("Failed to load configuration")?,
    };
    Ok(config)
}

async fn cmd_score<E: Embedder + 'static>(config: Config, embedder: E, args: ScoreArgs) -> Result<()> {
    config.validate().context("Invalid configuration")?;

    let report: Report = load_json(&args.report).context("Failed to load report")?;
    let task: Task = load_json(&args.task).context("Failed to load task")?;
    let eval: EvalSpec = load_json(&args.eval).context("Failed to load evaluation data")?;

    let mut catalog = match &args.data_dir {
        Some(dir) => SourceCatalog::from_env_files(dir, &task.env_files),
        None => SourceCatalog::new(),
    };
    if let Some(dir) = &args.data_dir {
        catalog
            .scan(dir)
            .with_context(|| format!("Failed to scan data directory '{}'", dir.display()))?;
    }
    tracing::info!(files = catalog.len(), "source catalog ready");

    let embedder = Arc::new(match &args.embedding_cache {
        Some(path) => CachedEmbedder::load(embedder, path).context("Failed to load embedding cache")?,
        None => CachedEmbedder::new(embedder),
    });
    let sources = FsSourceReader::new(catalog).context("Failed to build source reader")?;
    let judge = LlmClient::new(config.llm.clone());

    let kinds = if args.metrics.is_empty() {
        MetricKind::ALL.to_vec()
    } else {
        args.metrics.clone()
    };

    println!(
        "Grading {} claims with {} ({} metrics)...",
        report.report_insights.len(),
        config.llm.model,
        kinds.len()
    );

    let grader = Grader::new(Arc::new(judge), embedder.clone(), Arc::new(sources), config)
        .context("Invalid grading configuration")?;
    let card = grader
        .score(&report, &task, &eval, &kinds)
        .await
        .context("Failed to grade report")?;

    if args.details {
        for (name, result) in &card.results {
            println!("\n## {}\n", name);
            println!("{}", result.summary);
        }
    }
    card.print_summary();

    if let Some(path) = &args.embedding_cache {
        let (hits, misses) = embedder.stats();
        tracing::info!(hits, misses, "embedding cache usage");
        embedder.save(path).context("Failed to save embedding cache")?;
    }

    if let Some(output) = &args.output {
        save_score_card(&card, output).context("Failed to save score card")?;
        println!("Scores saved to: {}", output.display());
    }

    Ok(())
}

fn cmd_metrics() {
    println!("Available metrics");
    println!("{}", "─".repeat(40));
    for kind in MetricKind::ALL {
        println!("  {:<20} {}", kind.as_str(), kind.description());
    }
}

async fn cmd_test(config_path: Option<&Path>) -> Result<()> {
    println!("Testing judge and embedding connections...\n");

    let config = load_config(config_path)?;

    println!("Configuration:");
    println!("  API Base:        {}", config.llm.api_base);
    println!("  Judge model:     {}", config.llm.model);
    println!(
        "  API Key:         {}...",
        config.llm.api_key.chars().take(8).collect::<String>()
    );
    println!("  Embedding model: {}", config.embedding.model);
    println!();

    if let Err(e) = config.validate() {
        println!("Configuration error: {}", e);
        return Ok(());
    }

    let client = LlmClient::new(config.llm.clone());
    println!("Sending judge request...");
    match client.test_connection().await {
        Ok(()) => println!("Judge connection successful!"),
        Err(e) => println!("Judge connection failed: {}", e),
    }

    let embedder = HttpEmbedder::from_config(&config);
    println!("Sending embedding request...");
    match embedder.embed(&["hello".to_string()]).await {
        Ok(vectors) => println!(
            "Embedding connection successful! ({} dimensions)",
            vectors.first().map(Vec::len).unwrap_or_default()
        ),
        Err(e) => println!("Embedding connection failed: {}", e),
    }

    Ok(())
}
