//! Grading orchestration: run the selected metrics over one report.

use crate::config::Config;
use crate::error::Result;
use crate::inputs::{EvalSpec, Report, Task};
use crate::llm::Judge;
use crate::metrics::{
    CitationVerifier, ClaimMatcher, FactualityMetric, Metric, MetricKind, MetricResult,
    RecallMetric, ReportQualityMetric, RetrievalRecallMetric, RubricScorer,
};
use crate::retrieval::Embedder;
use crate::sources::SourceReader;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

/// Every metric's outcome for one report.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScoreCard {
    pub task_id: String,
    /// Metric name to score.
    pub scores: BTreeMap<String, f64>,
    /// Metric name to full result.
    pub results: BTreeMap<String, MetricResult>,
    /// Metric name to wall-clock seconds.
    pub timings_secs: BTreeMap<String, f64>,
    pub total_time_secs: f64,
}

impl ScoreCard {
    pub fn score(&self, kind: MetricKind) -> Option<f64> {
        self.scores.get(kind.as_str()).copied()
    }

    pub fn result(&self, kind: MetricKind) -> Option<&MetricResult> {
        self.results.get(kind.as_str())
    }

    /// Print a score table to stdout.
    pub fn print_summary(&self) {
        println!("\n============ Report Scores ============");
        if !self.task_id.is_empty() {
            println!("Task: {}", self.task_id);
        }
        println!("----------------------------------------");
        for (name, score) in &self.scores {
            let secs = self.timings_secs.get(name).copied().unwrap_or_default();
            println!("{:<20} {:>8.4}   ({:.1}s)", name, score, secs);
        }
        println!("----------------------------------------");
        println!("Total time: {:.1}s", self.total_time_secs);
        println!("========================================\n");
    }
}

/// Owns the grading collaborators and builds metrics on demand.
pub struct Grader {
    judge: Arc<dyn Judge>,
    embedder: Arc<dyn Embedder>,
    sources: Arc<dyn SourceReader>,
    config: Config,
}

impl Grader {
    /// Fails on retrieval settings that cannot chunk.
    pub fn new(
        judge: Arc<dyn Judge>,
        embedder: Arc<dyn Embedder>,
        sources: Arc<dyn SourceReader>,
        config: Config,
    ) -> Result<Self> {
        config.retrieval.stride()?;
        Ok(Self {
            judge,
            embedder,
            sources,
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn metric(&self, kind: MetricKind) -> Result<Box<dyn Metric>> {
        let config = &self.config;
        let metric: Box<dyn Metric> = match kind {
            MetricKind::InsightsRecall => Box::new(RecallMetric::insights(
                ClaimMatcher::new(self.judge.clone(), config),
                config,
            )),
            MetricKind::DistractorRecall => Box::new(RecallMetric::distractors(
                ClaimMatcher::new(self.judge.clone(), config),
                config,
            )),
            MetricKind::Factuality => Box::new(FactualityMetric::new(CitationVerifier::new(
                self.judge.clone(),
                self.embedder.clone(),
                self.sources.clone(),
                config,
            )?)),
            MetricKind::ReportQuality => Box::new(ReportQualityMetric::new(RubricScorer::new(
                self.judge.clone(),
                config,
            ))),
            MetricKind::RetrievalRecall => Box::new(RetrievalRecallMetric::new()),
        };
        Ok(metric)
    }

    /// Run `kinds` in order over `report`, truncated to the configured length.
    pub async fn score(
        &self,
        report: &Report,
        task: &Task,
        eval: &EvalSpec,
        kinds: &[MetricKind],
    ) -> Result<ScoreCard> {
        let start = Instant::now();
        let report = report.truncated(self.config.grading.max_report_chars);
        let mut card = ScoreCard {
            task_id: task.task_id.clone(),
            ..ScoreCard::default()
        };

        for &kind in kinds {
            let metric = self.metric(kind)?;
            let metric_start = Instant::now();
            tracing::info!(metric = %kind, "computing metric");

            let result = metric.compute(&report, task, eval).await;
            let elapsed = metric_start.elapsed().as_secs_f64();
            tracing::info!(metric = %kind, score = result.score, elapsed, "metric done");

            card.scores.insert(kind.to_string(), result.score);
            card.timings_secs.insert(kind.to_string(), elapsed);
            card.results.insert(kind.to_string(), result);
        }

        card.total_time_secs = start.elapsed().as_secs_f64();
        Ok(card)
    }
}
