//! Report Grader - LLM-judged grading of generated research reports.
//!
//! A report is a free-text answer to a research question plus a list of
//! atomic claims, each citing the sources it was drawn from. The grader
//! scores it along several independent metrics, each reduced to a score in
//! `[0, 1]`, a human-readable summary and a structured detail document.
//!
//! # Overview
//!
//! - **Factuality**: every claim's cited files, URLs and chat/mail threads are
//!   chunked and embedded; the chunks most similar to the claim are shown to a
//!   judge model, which returns a FACTUAL/UNFACTUAL verdict. Anything short of
//!   a clear FACTUAL counts against the report.
//! - **Insight and distractor recall**: for each gold question the judge picks
//!   the claim, if any, that conveys the expected answer.
//! - **Report quality**: the judge scores the whole report on a five-criterion
//!   rubric, read back through a cascade of progressively looser parsers.
//! - **Retrieval recall**: set overlap between the files the generator used
//!   and the files the task expects.
//!
//! # Quick Start
//!
//! ```no_run
//! use report_grader::{
//!     config::Config,
//!     inputs::{load_json, EvalSpec, Report, Task},
//!     llm::LlmClient,
//!     metrics::MetricKind,
//!     retrieval::HttpEmbedder,
//!     scoring::Grader,
//!     sources::{FsSourceReader, SourceCatalog},
//! };
//! use std::{path::Path, sync::Arc};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     config.validate()?;
//!
//!     let report: Report = load_json(Path::new("report.json"))?;
//!     let task: Task = load_json(Path::new("task.json"))?;
//!     let eval: EvalSpec = load_json(Path::new("eval.json"))?;
//!
//!     let mut catalog = SourceCatalog::new();
//!     catalog.scan(Path::new("data/files"))?;
//!
//!     let grader = Grader::new(
//!         Arc::new(LlmClient::new(config.llm.clone())),
//!         Arc::new(HttpEmbedder::from_config(&config)),
//!         Arc::new(FsSourceReader::new(catalog)?),
//!         config,
//!     )?;
//!
//!     let card = grader.score(&report, &task, &eval, &MetricKind::ALL).await?;
//!     card.print_summary();
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - **Judge** / **Embedder** / **SourceReader**: injected collaborators
//! - **EmbeddingIndex**: chunk, embed and rank evidence for one claim
//! - **CitationVerifier**, **ClaimMatcher**, **RubricScorer**: judge protocols
//! - **Grader**: runs the selected metrics and collects a **ScoreCard**

pub mod config;
pub mod error;
pub mod inputs;
pub mod llm;
pub mod metrics;
pub mod persistence;
pub mod retrieval;
pub mod retry;
pub mod scoring;
pub mod sources;

#[cfg(test)]
mod test_support;

// Re-export commonly used types
pub use config::Config;
pub use error::{GraderError, Result};
pub use inputs::{Claim, EvalSpec, Report, Task};
pub use llm::{Judge, LlmClient};
pub use metrics::{Metric, MetricKind, MetricResult};
pub use persistence::{load_score_card, save_score_card};
pub use retrieval::{Embedder, EmbeddingIndex};
pub use scoring::{Grader, ScoreCard};
pub use sources::{SourceDocument, SourceReader};
