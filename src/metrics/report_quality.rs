//! Rubric scoring of the whole report against five fixed criteria.

use super::{Metric, MetricResult, RULE};
use crate::config::Config;
use crate::inputs::{EvalSpec, Report, Task};
use crate::llm::parse::ParseOutcome;
use crate::llm::{Judge, JudgeSettings, Prompts};
use crate::retry::{RetryPolicy, retry};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::sync::{Arc, LazyLock};

/// Rubric criteria, in prompt and summary order.
pub const CRITERIA: [&str; 5] = [
    "depth_quality",
    "relevance_to_question",
    "persona_consistency",
    "coherence_conciseness",
    "contradictions",
];

const NEUTRAL_SCORE: f64 = 0.5;
const FALLBACK_JUSTIFICATION: &str = "Failed to evaluate due to parsing errors";

/// Extractors for one criterion, tried in order.
struct CriterionPatterns {
    strict: Regex,
    score_only: Regex,
    loose: Regex,
}

impl CriterionPatterns {
    fn new(tag: &str) -> Self {
        let strict = format!(
            r"(?is)<{tag}>\s*<score>\s*(.*?)\s*</score>\s*<justification>\s*(.*?)\s*</justification>\s*</{tag}>"
        );
        let score_only = format!(r"(?is)<{tag}>.*?<score>\s*(.*?)\s*</score>.*?</{tag}>");
        let loose = format!(r"(?i){tag}.*?(\d+\.?\d*)");
        Self {
            strict: Regex::new(&strict).expect("valid strict criterion pattern"),
            score_only: Regex::new(&score_only).expect("valid score-only criterion pattern"),
            loose: Regex::new(&loose).expect("valid loose criterion pattern"),
        }
    }
}

static PATTERNS: LazyLock<Vec<CriterionPatterns>> =
    LazyLock::new(|| CRITERIA.iter().map(|tag| CriterionPatterns::new(tag)).collect());

/// Score and justification for one criterion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriterionScore {
    /// Normalized to `0.1..=1.0`; 0.0 marks a criterion the judge never scored.
    pub score: f64,
    pub justification: String,
}

/// Raw judge score to `0.1..=1.0`: truncate, clamp to 1..10, divide by ten.
fn normalize(raw: &str) -> Option<f64> {
    let value: f64 = raw.trim().parse().ok()?;
    if !value.is_finite() {
        return None;
    }
    Some(value.trunc().clamp(1.0, 10.0) / 10.0)
}

fn strict_block(patterns: &CriterionPatterns, reply: &str) -> Option<CriterionScore> {
    let caps = patterns.strict.captures(reply)?;
    Some(CriterionScore {
        score: normalize(caps.get(1)?.as_str())?,
        justification: caps.get(2)?.as_str().trim().to_string(),
    })
}

fn score_only_block(patterns: &CriterionPatterns, reply: &str) -> Option<CriterionScore> {
    let caps = patterns.score_only.captures(reply)?;
    Some(CriterionScore {
        score: normalize(caps.get(1)?.as_str())?,
        justification: "No justification provided".to_string(),
    })
}

fn loose_number(patterns: &CriterionPatterns, reply: &str) -> Option<CriterionScore> {
    let caps = patterns.loose.captures(reply)?;
    Some(CriterionScore {
        score: normalize(caps.get(1)?.as_str())?,
        justification: "Extracted from unstructured response".to_string(),
    })
}

type Extractor = fn(&CriterionPatterns, &str) -> Option<CriterionScore>;

const CASCADE: [Extractor; 3] = [strict_block, score_only_block, loose_number];

fn extract_criterion(patterns: &CriterionPatterns, reply: &str) -> Option<CriterionScore> {
    CASCADE.iter().find_map(|extract| extract(patterns, reply))
}

/// All five criteria for one report.
#[derive(Debug, Clone, PartialEq)]
pub struct RubricScore {
    criteria: Vec<(&'static str, CriterionScore)>,
}

impl RubricScore {
    /// Every criterion at 0.5, used when the judge never produced a readable rubric.
    pub fn neutral() -> Self {
        Self {
            criteria: CRITERIA
                .iter()
                .map(|&name| {
                    let score = CriterionScore {
                        score: NEUTRAL_SCORE,
                        justification: FALLBACK_JUSTIFICATION.to_string(),
                    };
                    (name, score)
                })
                .collect(),
        }
    }

    pub fn get(&self, criterion: &str) -> Option<&CriterionScore> {
        self.criteria
            .iter()
            .find(|(name, _)| *name == criterion)
            .map(|(_, score)| score)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &CriterionScore)> {
        self.criteria.iter().map(|(name, score)| (*name, score))
    }

    /// Arithmetic mean of the criterion scores.
    pub fn overall(&self) -> f64 {
        if self.criteria.is_empty() {
            return 0.0;
        }
        self.criteria.iter().map(|(_, c)| c.score).sum::<f64>() / self.criteria.len() as f64
    }

    fn summary(&self) -> String {
        self.iter()
            .map(|(name, c)| {
                format!(
                    "**{name}-score:** {:.4}\n\n**{name}-justification:** {}\n\n\n{RULE}",
                    c.score, c.justification
                )
            })
            .collect()
    }

    fn to_value(&self) -> Value {
        let map: Map<String, Value> = self
            .iter()
            .map(|(name, c)| {
                let entry = json!({ "score": c.score, "justification": c.justification });
                (name.to_string(), entry)
            })
            .collect();
        Value::Object(map)
    }
}

/// Read the rubric out of a judge reply.
///
/// Malformed when fewer than `min_valid` criteria could be extracted.
/// Otherwise every unreadable criterion scores 0.0.
pub fn parse_rubric(reply: &str, min_valid: usize) -> ParseOutcome<RubricScore> {
    let mut valid = 0;
    let criteria = CRITERIA
        .iter()
        .zip(PATTERNS.iter())
        .map(|(&name, patterns)| match extract_criterion(patterns, reply) {
            Some(score) => {
                valid += 1;
                (name, score)
            }
            None => {
                let missing = CriterionScore {
                    score: 0.0,
                    justification: format!("No valid response found for {name}"),
                };
                (name, missing)
            }
        })
        .collect();

    if valid < min_valid.min(CRITERIA.len()) {
        return ParseOutcome::malformed(format!(
            "only {valid}/{} rubric criteria could be read",
            CRITERIA.len()
        ));
    }
    ParseOutcome::Parsed(RubricScore { criteria })
}

/// Asks the judge for a rubric over the full report.
pub struct RubricScorer {
    judge: Arc<dyn Judge>,
    settings: JudgeSettings,
    policy: RetryPolicy,
    min_valid: usize,
}

impl RubricScorer {
    pub fn new(judge: Arc<dyn Judge>, config: &Config) -> Self {
        Self {
            judge,
            settings: JudgeSettings::from_config(&config.llm),
            policy: RetryPolicy::new(config.grading.max_retries),
            min_valid: config.grading.min_valid_criteria,
        }
    }

    /// Never fails: an unreadable judge yields [`RubricScore::neutral`].
    pub async fn score(&self, report_text: &str, persona: &str, dr_question: &str) -> RubricScore {
        let outcome = retry(self.policy, "report quality", |attempt| {
            let template = if attempt == 1 {
                Prompts::report_quality()
            } else {
                Prompts::report_quality_strict()
            };
            let prompt = Prompts::fill(
                template,
                &[
                    ("persona", persona),
                    ("dr_question", dr_question),
                    ("report", report_text),
                ],
            );
            async move {
                let reply = self
                    .judge
                    .judge(&prompt, &self.settings.model, self.settings.temperature)
                    .await?;
                parse_rubric(&reply, self.min_valid).into_result()
            }
        })
        .await;

        outcome.unwrap_or_else(|exhausted| {
            tracing::warn!(
                attempts = exhausted.attempts,
                "falling back to neutral rubric scores"
            );
            RubricScore::neutral()
        })
    }
}

pub struct ReportQualityMetric {
    scorer: RubricScorer,
}

impl ReportQualityMetric {
    pub fn new(scorer: RubricScorer) -> Self {
        Self { scorer }
    }
}

#[async_trait]
impl Metric for ReportQualityMetric {
    fn name(&self) -> &'static str {
        "report_quality"
    }

    async fn compute(&self, report: &Report, task: &Task, _eval: &EvalSpec) -> MetricResult {
        let rubric = self
            .scorer
            .score(&report.report_text, &task.persona_text(), &task.dr_question)
            .await;
        let score = rubric.overall();
        tracing::info!(score, "report quality computed");
        MetricResult::new(score, rubric.summary(), rubric.to_value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedJudge;

    fn tagged(scores: &[&str]) -> String {
        let blocks: String = CRITERIA
            .iter()
            .zip(scores)
            .map(|(tag, score)| {
                format!("<{tag}>\n  <score>{score}</score>\n  <justification>Fine for {tag}.</justification>\n</{tag}>\n")
            })
            .collect();
        format!("<evaluation>\n{blocks}</evaluation>")
    }

    fn scorer(judge: Arc<ScriptedJudge>) -> RubricScorer {
        RubricScorer::new(judge, &Config::default())
    }

    #[test]
    fn test_strict_blocks_parse() {
        let rubric = parse_rubric(&tagged(&["8", "7", "6", "9", "8"]), 5).ok().unwrap();
        let depth = rubric.get("depth_quality").unwrap();
        assert_eq!(depth.score, 0.8);
        assert_eq!(depth.justification, "Fine for depth_quality.");
        assert!((rubric.overall() - 0.76).abs() < 1e-9);
    }

    #[test]
    fn test_scores_are_clamped() {
        let rubric = parse_rubric(&tagged(&["15", "-3", "7.9", "0", "10"]), 5).ok().unwrap();
        assert_eq!(rubric.get("depth_quality").unwrap().score, 1.0);
        assert_eq!(rubric.get("relevance_to_question").unwrap().score, 0.1);
        assert_eq!(rubric.get("persona_consistency").unwrap().score, 0.7);
        assert_eq!(rubric.get("coherence_conciseness").unwrap().score, 0.1);
        assert_eq!(rubric.get("contradictions").unwrap().score, 1.0);
    }

    #[test]
    fn test_cascade_fallbacks() {
        let reply = "<depth_quality><score>6</score></depth_quality>\n\
                     relevance_to_question: 7\n\
                     persona_consistency - 5 out of 10\n\
                     coherence_conciseness 9\n\
                     contradictions: 4";
        let rubric = parse_rubric(reply, 5).ok().unwrap();

        let depth = rubric.get("depth_quality").unwrap();
        assert_eq!(depth.score, 0.6);
        assert_eq!(depth.justification, "No justification provided");

        let relevance = rubric.get("relevance_to_question").unwrap();
        assert_eq!(relevance.score, 0.7);
        assert_eq!(relevance.justification, "Extracted from unstructured response");
        assert_eq!(rubric.get("contradictions").unwrap().score, 0.4);
    }

    #[test]
    fn test_unreadable_strict_score_falls_through() {
        let reply = "<depth_quality><score>high</score><justification>Thorough.</justification></depth_quality>";
        assert_eq!(extract_criterion(&PATTERNS[0], reply), None);

        let reply = "<depth_quality><score>high</score><justification>Thorough, 8 of 10.</justification></depth_quality>";
        let score = extract_criterion(&PATTERNS[0], reply).unwrap();
        assert_eq!(score.score, 0.8);
        assert_eq!(score.justification, "Extracted from unstructured response");
    }

    #[test]
    fn test_too_few_criteria_is_malformed() {
        let reply = "<depth_quality><score>8</score><justification>ok</justification></depth_quality>";
        assert!(!parse_rubric(reply, 5).is_parsed());

        let rubric = parse_rubric(reply, 1).ok().unwrap();
        let missing = rubric.get("contradictions").unwrap();
        assert_eq!(missing.score, 0.0);
        assert_eq!(missing.justification, "No valid response found for contradictions");
        assert!((rubric.overall() - 0.16).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_retry_uses_strict_prompt() {
        let good = tagged(&["8", "8", "8", "8", "8"]);
        let judge = Arc::new(ScriptedJudge::sequence(&["I liked it.", &good]));
        let rubric = scorer(judge.clone()).score("Report body", "CFO", "Why?").await;

        assert_eq!(judge.calls(), 2);
        assert!((rubric.overall() - 0.8).abs() < 1e-9);
        let prompts = judge.prompts();
        assert!(!prompts[0].contains("EXACT format"));
        assert!(prompts[1].contains("EXACT format"));
        assert!(prompts[1].contains("<persona>\nCFO\n</persona>"));
        assert!(prompts[1].contains("<report>\nReport body\n</report>"));
    }

    #[tokio::test]
    async fn test_exhausted_retries_fall_back_to_neutral() {
        let judge = Arc::new(ScriptedJudge::always("no rubric here"));
        let rubric = scorer(judge.clone()).score("r", "p", "q").await;

        assert_eq!(judge.calls(), 3);
        assert_eq!(rubric, RubricScore::neutral());
        assert_eq!(rubric.overall(), 0.5);
        assert_eq!(
            rubric.get("coherence_conciseness").unwrap().justification,
            "Failed to evaluate due to parsing errors"
        );
    }

    #[tokio::test]
    async fn test_report_placeholders_are_not_expanded() {
        let judge = Arc::new(ScriptedJudge::always(&tagged(&["5", "5", "5", "5", "5"])));
        scorer(judge.clone())
            .score("Mentions {persona} literally", "Analyst who types {report}", "Why {dr_question}?")
            .await;
        let prompt = &judge.prompts()[0];
        assert!(prompt.contains("<report>\nMentions {persona} literally\n</report>"));
        assert!(prompt.contains("<persona>\nAnalyst who types {report}\n</persona>"));
        assert!(prompt.contains("<dr_question>\nWhy {dr_question}?\n</dr_question>"));
    }

    #[tokio::test]
    async fn test_metric_result_shape() {
        let judge = Arc::new(ScriptedJudge::always(&tagged(&["10", "8", "6", "4", "2"])));
        let metric = ReportQualityMetric::new(scorer(judge));
        let task = Task {
            persona: json!({"role": "CFO"}),
            dr_question: "How did Q3 go?".to_string(),
            ..Task::default()
        };

        let result = metric
            .compute(&Report::new("Q3 went well.", vec![]), &task, &EvalSpec::default())
            .await;
        assert_eq!(metric.name(), "report_quality");
        assert!((result.score - 0.6).abs() < 1e-9);
        assert_eq!(result.metric_result["depth_quality"]["score"], 1.0);
        assert_eq!(result.metric_result["contradictions"]["justification"], "Fine for contradictions.");
        assert!(result.summary.starts_with(
            "**depth_quality-score:** 1.0000\n\n**depth_quality-justification:** Fine for depth_quality.\n\n\n"
        ));
        assert_eq!(result.summary.matches(RULE).count(), 5);
    }
}
