//! Grading metrics.
//!
//! Every metric reduces to a [`MetricResult`]: a score in `[0, 1]`, a human
//! readable summary and a structured detail document. Metrics never fail;
//! judge, parse and source problems are folded into the result.

mod factuality;
mod recall;
mod report_quality;
mod retrieval_recall;

pub use factuality::{CitationVerifier, FactualityMetric, SourceDetail, Verdict, VerdictLabel};
pub use recall::{ClaimMatcher, Comparison, RecallMetric, format_claims};
pub use report_quality::{
    CRITERIA, CriterionScore, ReportQualityMetric, RubricScore, RubricScorer, parse_rubric,
};
pub use retrieval_recall::RetrievalRecallMetric;

use crate::error::GraderError;
use crate::inputs::{EvalSpec, Report, Task};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Uniform output of every metric.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricResult {
    pub score: f64,
    pub summary: String,
    pub metric_result: Value,
}

impl MetricResult {
    pub fn new(score: f64, summary: impl Into<String>, metric_result: Value) -> Self {
        Self {
            score,
            summary: summary.into(),
            metric_result,
        }
    }
}

#[async_trait]
pub trait Metric: Send + Sync {
    fn name(&self) -> &'static str;

    async fn compute(&self, report: &Report, task: &Task, eval: &EvalSpec) -> MetricResult;
}

/// The metrics a grader can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    InsightsRecall,
    DistractorRecall,
    Factuality,
    ReportQuality,
    RetrievalRecall,
}

impl MetricKind {
    pub const ALL: [MetricKind; 5] = [
        MetricKind::InsightsRecall,
        MetricKind::DistractorRecall,
        MetricKind::Factuality,
        MetricKind::ReportQuality,
        MetricKind::RetrievalRecall,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::InsightsRecall => "insights_recall",
            MetricKind::DistractorRecall => "distractor_recall",
            MetricKind::Factuality => "factuality",
            MetricKind::ReportQuality => "report_quality",
            MetricKind::RetrievalRecall => "retrieval_recall",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            MetricKind::InsightsRecall => "share of gold insights the report's claims convey",
            MetricKind::DistractorRecall => "share of distractor facts the report repeats",
            MetricKind::Factuality => "share of claims supported by their cited sources",
            MetricKind::ReportQuality => "mean of five rubric criteria scored by the judge",
            MetricKind::RetrievalRecall => "share of supporting files the generator retrieved",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricKind {
    type Err = GraderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_lowercase();
        MetricKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == name)
            .ok_or_else(|| GraderError::UnknownMetric(s.to_string()))
    }
}

/// Horizontal rule between summary blocks.
pub(crate) const RULE: &str = "--------------------------------\n\n";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_kind_round_trip() {
        for kind in MetricKind::ALL {
            assert_eq!(kind.as_str().parse::<MetricKind>().unwrap(), kind);
            assert_eq!(kind.to_string(), kind.as_str());
        }
        assert_eq!(" Factuality ".parse::<MetricKind>().unwrap(), MetricKind::Factuality);
    }

    #[test]
    fn test_unknown_metric_rejected() {
        assert!(matches!(
            "qa_similarity".parse::<MetricKind>(),
            Err(GraderError::UnknownMetric(name)) if name == "qa_similarity"
        ));
    }
}
