//! Insight and distractor recall via the claim matcher.

use super::{Metric, MetricResult, RULE};
use crate::config::Config;
use crate::error::GraderError;
use crate::inputs::{Claim, EvalSpec, GoldQa, QaType, Report, Task};
use crate::llm::parse::{ParseOutcome, extract_json, value_to_text};
use crate::llm::{Judge, JudgeSettings, Prompts};
use crate::retry::{RetryPolicy, retry};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;

/// How one gold question fared against the report's claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comparison {
    pub question: String,
    #[serde(rename = "expected_insight")]
    pub gold_answer: String,
    #[serde(rename = "predicted_insight")]
    pub predicted_claim: Option<String>,
    #[serde(rename = "expected_supporting_paths", default)]
    pub supporting_paths: Vec<String>,
    /// 1.0 when the judge found a matching claim, else 0.0.
    pub score: f64,
    pub justification: String,
    pub confidence: Option<Value>,
}

/// Fields read from one judge reply.
#[derive(Debug, Clone, PartialEq)]
struct MatchReply {
    matched: bool,
    justification: String,
    confidence: Option<Value>,
    selected: Option<String>,
}

fn parse_match_reply(reply: &str) -> ParseOutcome<MatchReply> {
    let value = match extract_json(reply) {
        Ok(value) => value,
        Err(GraderError::LlmParse(reason)) => return ParseOutcome::malformed(reason),
        Err(e) => return ParseOutcome::malformed(e.to_string()),
    };
    let Some(object) = value.as_object() else {
        return ParseOutcome::malformed("judge reply is not a JSON object");
    };
    let Some(answer) = object.get("answer").and_then(Value::as_str) else {
        return ParseOutcome::malformed("judge reply has no 'answer' field");
    };

    ParseOutcome::Parsed(MatchReply {
        matched: answer.trim().eq_ignore_ascii_case("yes"),
        justification: object.get("justification").map(value_to_text).unwrap_or_default(),
        confidence: object.get("confidence").filter(|v| !v.is_null()).cloned(),
        selected: object
            .get("selected_insight")
            .map(value_to_text)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty()),
    })
}

/// Numbered claim list shared by every gold question of a report.
pub fn format_claims(claims: &[Claim]) -> String {
    if claims.is_empty() {
        return "No claims found in the report.".to_string();
    }
    claims
        .iter()
        .enumerate()
        .map(|(i, c)| format!("Insight {}: {}", i + 1, c.claim))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Asks the judge which claim, if any, answers a gold question.
pub struct ClaimMatcher {
    judge: Arc<dyn Judge>,
    settings: JudgeSettings,
    policy: RetryPolicy,
}

impl ClaimMatcher {
    pub fn new(judge: Arc<dyn Judge>, config: &Config) -> Self {
        Self {
            judge,
            settings: JudgeSettings::from_config(&config.llm),
            policy: RetryPolicy::new(config.grading.max_retries),
        }
    }

    /// Always produces a comparison; exhausted retries score 0.0.
    pub async fn compare(&self, claims_text: &str, question: &str, gold_answer: &str) -> Comparison {
        let prompt = Prompts::fill(
            Prompts::insight_scoring(),
            &[
                ("claims_text", claims_text),
                ("question", question),
                ("gold_insight", gold_answer),
            ],
        );

        let outcome = retry(self.policy, "claim match", |_| {
            let prompt = &prompt;
            async move {
                let reply = self
                    .judge
                    .judge(prompt, &self.settings.model, self.settings.temperature)
                    .await?;
                parse_match_reply(&reply).into_result()
            }
        })
        .await;

        match outcome {
            Ok(reply) => Comparison {
                question: question.to_string(),
                gold_answer: gold_answer.to_string(),
                predicted_claim: reply.selected,
                supporting_paths: Vec::new(),
                score: if reply.matched { 1.0 } else { 0.0 },
                justification: reply.justification,
                confidence: reply.confidence,
            },
            Err(exhausted) => Comparison {
                question: question.to_string(),
                gold_answer: gold_answer.to_string(),
                predicted_claim: None,
                supporting_paths: Vec::new(),
                score: 0.0,
                justification: failure_justification(exhausted.attempts, &exhausted.last_error),
                confidence: None,
            },
        }
    }
}

fn failure_justification(attempts: usize, error: &GraderError) -> String {
    format!("Failed to parse model response after {attempts} retries: {error}")
}

/// Mean match score over the gold questions of one type.
///
/// With [`QaType::Insight`] this is insight recall (higher is better); with
/// [`QaType::Distractor`] it measures how many planted distractors the
/// report repeated.
pub struct RecallMetric {
    matcher: ClaimMatcher,
    qa_type: QaType,
    ignore_not_answerable: bool,
}

impl RecallMetric {
    pub fn insights(matcher: ClaimMatcher, config: &Config) -> Self {
        Self {
            matcher,
            qa_type: QaType::Insight,
            ignore_not_answerable: config.grading.ignore_not_answerable,
        }
    }

    pub fn distractors(matcher: ClaimMatcher, config: &Config) -> Self {
        Self {
            qa_type: QaType::Distractor,
            ..Self::insights(matcher, config)
        }
    }

    fn label(&self) -> &'static str {
        match self.qa_type {
            QaType::Distractor => "distractor",
            _ => "insight",
        }
    }

    fn summary_block(&self, comparison: &Comparison) -> String {
        let mut block = format!(
            "#### Question: {}\n**Expected {}:** {}\n\n",
            comparison.question,
            self.label(),
            comparison.gold_answer
        );
        if self.qa_type == QaType::Insight {
            block.push_str(&format!(
                "**Expected Supporting Paths:** {}\n\n",
                comparison.supporting_paths.join(", ")
            ));
        }
        block.push_str(&format!(
            "**Score:** {:.4}\n\n**Justification:** {}\n\n{}",
            comparison.score, comparison.justification, RULE
        ));
        block
    }
}

fn supporting_paths(qa: &GoldQa) -> Vec<String> {
    qa.supporting_file_paths
        .iter()
        .chain(&qa.supporting_urls)
        .cloned()
        .collect()
}

#[async_trait]
impl Metric for RecallMetric {
    fn name(&self) -> &'static str {
        match self.qa_type {
            QaType::Distractor => "distractor_recall",
            _ => "insights_recall",
        }
    }

    async fn compute(&self, report: &Report, _task: &Task, eval: &EvalSpec) -> MetricResult {
        let claims_text = format_claims(&report.report_insights);

        let mut comparisons = Vec::new();
        for qa in eval.questions(self.qa_type) {
            if self.ignore_not_answerable && !qa.is_answerable() {
                tracing::debug!(question = %qa.question, "skipping question without evidence");
                continue;
            }

            let mut comparison = self.matcher.compare(&claims_text, &qa.question, &qa.answer).await;
            comparison.supporting_paths = supporting_paths(qa);
            comparisons.push(comparison);
        }

        let score = if comparisons.is_empty() {
            0.0
        } else {
            comparisons.iter().map(|c| c.score).sum::<f64>() / comparisons.len() as f64
        };
        let summary: String = comparisons.iter().map(|c| self.summary_block(c)).collect();

        tracing::info!(metric = self.name(), score, questions = comparisons.len(), "recall computed");

        MetricResult::new(score, summary, json!({ "per_question_results": comparisons }))
    }
}
