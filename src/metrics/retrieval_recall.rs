//! Set recall of the files the report generator retrieved.

use super::{Metric, MetricResult};
use crate::inputs::{EvalSpec, Report, Task};
use async_trait::async_trait;
use serde_json::json;
use std::collections::BTreeSet;

const NO_EXPECTED: &str = "No expected file paths provided";

/// Compares `eval.supporting_file_paths` with `report.metadata.document_ids`.
/// Needs no judge.
#[derive(Debug, Default)]
pub struct RetrievalRecallMetric;

impl RetrievalRecallMetric {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Metric for RetrievalRecallMetric {
    fn name(&self) -> &'static str {
        "retrieval_recall"
    }

    async fn compute(&self, report: &Report, _task: &Task, eval: &EvalSpec) -> MetricResult {
        let expected: BTreeSet<&str> = eval.supporting_file_paths.iter().map(String::as_str).collect();
        let retrieved: BTreeSet<&str> = report.metadata.document_ids.iter().map(String::as_str).collect();

        if expected.is_empty() {
            return MetricResult::new(
                0.0,
                NO_EXPECTED,
                json!({
                    "num_expected": 0,
                    "num_retrieved": report.metadata.document_ids.len(),
                    "error": NO_EXPECTED,
                }),
            );
        }

        let hits: Vec<&str> = expected.intersection(&retrieved).copied().collect();
        let missed: Vec<&str> = expected.difference(&retrieved).copied().collect();
        let extra: Vec<&str> = retrieved.difference(&expected).copied().collect();

        let recall = hits.len() as f64 / expected.len() as f64;
        let precision = if retrieved.is_empty() {
            0.0
        } else {
            hits.len() as f64 / retrieved.len() as f64
        };
        let f1_score = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };

        let summary = format!(
            "Recall: {recall:.4}\nRetrieved {}/{} relevant documents\nTotal documents retrieved: {}",
            hits.len(),
            expected.len(),
            retrieved.len()
        );
        tracing::info!(recall, precision, missed = missed.len(), "retrieval recall computed");

        MetricResult::new(
            recall,
            summary,
            json!({
                "num_expected": expected.len(),
                "num_retrieved": retrieved.len(),
                "num_relevant_retrieved": hits.len(),
                "precision": precision,
                "f1_score": f1_score,
                "expected_files": expected,
                "retrieved_files": retrieved,
                "correctly_retrieved": hits,
                "missed_files": missed,
                "extra_files": extra,
            }),
        )
    }
}
