//! Citation factuality: is each claim supported by the sources it cites?
//!
//! Per claim the verifier reads every citation, indexes the readable content,
//! retrieves the chunks most similar to the claim and asks the judge for a
//! single FACTUAL/UNFACTUAL verdict over that evidence. Anything short of a
//! clear FACTUAL reads as UNFACTUAL.

use super::{Metric, MetricResult, RULE};
use crate::config::{Config, RetrievalConfig};
use crate::error::Result;
use crate::inputs::{Claim, EvalSpec, Report, Task};
use crate::llm::parse::ParseOutcome;
use crate::llm::{Judge, JudgeSettings, Prompts};
use crate::retrieval::{EmbeddingIndex, Embedder, format_evidence};
use crate::retry::{RetryPolicy, retry};
use crate::sources::{Citation, SourceDocument, SourceReader};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::{Arc, LazyLock};

static VERDICT_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)VERDICT\s*:\s*[\*\[\s]*(UNFACTUAL|FACTUAL)\b").expect("valid verdict pattern")
});
static FACTUAL_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<factual>\s*(true|false)\s*</factual>").expect("valid factual tag pattern")
});
static EXPLANATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<explanation>\s*(.*?)\s*</explanation>|EXPLANATION\s*:\s*(.*)")
        .expect("valid explanation pattern")
});

pub(crate) const NO_CITATIONS: &str = "No citations provided to verify the claim";
pub(crate) const NO_CONTENT: &str =
    "No valid content could be retrieved from any of the provided citations";
pub(crate) const NO_RELEVANT_EVIDENCE: &str =
    "None of the retrieved source content is relevant to the claim";
pub(crate) const UNPARSEABLE: &str = "Failed to determine factuality due to parsing errors";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerdictLabel {
    Factual,
    Unfactual,
}

/// Availability of one cited source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDetail {
    pub citation: String,
    pub content_available: bool,
    /// Characters of readable content.
    pub content_length: usize,
}

/// Outcome of verifying one claim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    pub claim: String,
    pub citations: Vec<String>,
    pub label: VerdictLabel,
    pub explanation: String,
    pub source_details: Vec<SourceDetail>,
}

impl Verdict {
    pub fn is_factual(&self) -> bool {
        self.label == VerdictLabel::Factual
    }

    fn unfactual(claim: &Claim, explanation: &str, source_details: Vec<SourceDetail>) -> Self {
        Self {
            claim: claim.claim.clone(),
            citations: claim.citations.clone(),
            label: VerdictLabel::Unfactual,
            explanation: explanation.to_string(),
            source_details,
        }
    }
}

/// Read a verdict from a judge reply.
///
/// Recognizes `VERDICT: FACTUAL|UNFACTUAL` lines and `<factual>true|false</factual>`
/// tags. Any negative marker wins; a reply without markers is malformed.
pub fn parse_verdict(reply: &str) -> ParseOutcome<(VerdictLabel, String)> {
    let mut markers = VERDICT_LINE
        .captures_iter(reply)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().eq_ignore_ascii_case("FACTUAL"))
        .chain(
            FACTUAL_TAG
                .captures_iter(reply)
                .filter_map(|c| c.get(1))
                .map(|m| m.as_str().eq_ignore_ascii_case("true")),
        )
        .peekable();

    if markers.peek().is_none() {
        return ParseOutcome::malformed("judge reply carries no verdict marker");
    }
    let label = if markers.all(|factual| factual) {
        VerdictLabel::Factual
    } else {
        VerdictLabel::Unfactual
    };

    let explanation = EXPLANATION
        .captures(reply)
        .and_then(|c| c.get(1).or_else(|| c.get(2)))
        .map(|m| m.as_str().trim().to_string())
        .filter(|e| !e.is_empty())
        .unwrap_or_else(|| reply.trim().to_string());

    ParseOutcome::Parsed((label, explanation))
}

/// Judges whether a claim is supported by its cited sources.
pub struct CitationVerifier {
    judge: Arc<dyn Judge>,
    embedder: Arc<dyn Embedder>,
    sources: Arc<dyn SourceReader>,
    settings: JudgeSettings,
    retrieval: RetrievalConfig,
    batch_size: usize,
    policy: RetryPolicy,
}

impl CitationVerifier {
    /// Fails on retrieval settings that cannot build an index.
    pub fn new(
        judge: Arc<dyn Judge>,
        embedder: Arc<dyn Embedder>,
        sources: Arc<dyn SourceReader>,
        config: &Config,
    ) -> Result<Self> {
        EmbeddingIndex::new(&config.retrieval, config.embedding.batch_size)?;
        Ok(Self {
            judge,
            embedder,
            sources,
            settings: JudgeSettings::from_config(&config.llm),
            retrieval: config.retrieval.clone(),
            batch_size: config.embedding.batch_size,
            policy: RetryPolicy::new(config.grading.max_retries),
        })
    }

    pub async fn verify(&self, claim: &Claim) -> Verdict {
        if claim.citations.is_empty() {
            return Verdict::unfactual(claim, NO_CITATIONS, Vec::new());
        }

        let (documents, source_details) = self.load_sources(&claim.citations).await;
        if documents.is_empty() {
            return Verdict::unfactual(claim, NO_CONTENT, source_details);
        }

        let evidence = match self.gather_evidence(&claim.claim, &documents).await {
            Ok(Some(evidence)) => evidence,
            Ok(None) => return Verdict::unfactual(claim, NO_RELEVANT_EVIDENCE, source_details),
            Err(e) => return Verdict::unfactual(claim, &e.to_string(), source_details),
        };

        let outcome = retry(self.policy, "factuality verdict", |attempt| {
            let template = if attempt == 1 {
                Prompts::factuality_verdict()
            } else {
                Prompts::factuality_verdict_strict()
            };
            let prompt = Prompts::fill(
                template,
                &[("evidence", evidence.as_str()), ("claim", claim.claim.as_str())],
            );
            async move {
                let reply = self
                    .judge
                    .judge(&prompt, &self.settings.model, self.settings.temperature)
                    .await?;
                parse_verdict(&reply).into_result()
            }
        })
        .await;

        match outcome {
            Ok((label, explanation)) => Verdict {
                claim: claim.claim.clone(),
                citations: claim.citations.clone(),
                label,
                explanation,
                source_details,
            },
            Err(_) => Verdict::unfactual(claim, UNPARSEABLE, source_details),
        }
    }

    async fn load_sources(&self, citations: &[String]) -> (Vec<SourceDocument>, Vec<SourceDetail>) {
        let mut documents = Vec::new();
        let mut details = Vec::with_capacity(citations.len());

        for raw in citations {
            let document = match Citation::parse(raw) {
                Some(citation) => self.sources.read_citation(&citation).await,
                None => None,
            };

            match document.filter(SourceDocument::has_content) {
                Some(document) => {
                    details.push(SourceDetail {
                        citation: raw.clone(),
                        content_available: true,
                        content_length: document.content.chars().count(),
                    });
                    documents.push(document);
                }
                None => {
                    tracing::warn!(citation = %raw, "cited source unavailable");
                    details.push(SourceDetail {
                        citation: raw.clone(),
                        content_available: false,
                        content_length: 0,
                    });
                }
            }
        }

        (documents, details)
    }

    /// Evidence text for the judge, or `None` when nothing clears the floor.
    async fn gather_evidence(
        &self,
        claim: &str,
        documents: &[SourceDocument],
    ) -> Result<Option<String>> {
        let mut index = EmbeddingIndex::new(&self.retrieval, self.batch_size)?;
        index.add_documents(self.embedder.as_ref(), documents).await;

        let retrieved = index
            .retrieve(self.embedder.as_ref(), claim, self.retrieval.top_k)
            .await;
        if retrieved.is_empty() {
            return Ok(None);
        }
        Ok(Some(format_evidence(&retrieved, self.retrieval.evidence_chars)))
    }
}

/// Share of report claims supported by their citations.
pub struct FactualityMetric {
    verifier: CitationVerifier,
}

impl FactualityMetric {
    pub fn new(verifier: CitationVerifier) -> Self {
        Self { verifier }
    }
}

#[async_trait]
impl Metric for FactualityMetric {
    fn name(&self) -> &'static str {
        "factuality"
    }

    async fn compute(&self, report: &Report, _task: &Task, _eval: &EvalSpec) -> MetricResult {
        let claims = &report.report_insights;
        if claims.is_empty() {
            return MetricResult::new(
                0.0,
                "no insights found",
                json!({
                    "factual_claims": [],
                    "unfactual_claims": [],
                    "factuality_percentage": 0.0,
                    "total_claims": 0,
                }),
            );
        }

        let mut verdicts = Vec::with_capacity(claims.len());
        for (i, claim) in claims.iter().enumerate() {
            let verdict = self.verifier.verify(claim).await;
            tracing::debug!(
                claim = i + 1,
                total = claims.len(),
                factual = verdict.is_factual(),
                "claim verified"
            );
            verdicts.push(verdict);
        }

        let (factual, unfactual): (Vec<&Verdict>, Vec<&Verdict>) =
            verdicts.iter().partition(|v| v.is_factual());
        let total = verdicts.len();
        let score = factual.len() as f64 / total as f64;

        let mut summary = format!(
            "**Factuality Score:** {:.4} which is {}/{} claims\n\n{}",
            score,
            factual.len(),
            total,
            RULE
        );
        summary.push_str(&format!("\n\n**Factual Claims:**\n\n{RULE}"));
        for verdict in &factual {
            summary.push_str(&verdict_block(verdict));
        }
        summary.push_str(&format!("\n\n**Unfactual Claims:**\n\n{RULE}"));
        for verdict in &unfactual {
            summary.push_str(&verdict_block(verdict));
        }
        summary.push_str(RULE);
        summary.push_str(&format!(
            "Score: {} which is {}/{} claims",
            score,
            factual.len(),
            total
        ));

        tracing::info!(score, factual = factual.len(), total, "factuality computed");

        MetricResult::new(
            score,
            summary,
            json!({
                "factual_claims": factual.iter().map(|v| &v.claim).collect::<Vec<_>>(),
                "unfactual_claims": unfactual.iter().map(|v| &v.claim).collect::<Vec<_>>(),
                "factuality_percentage": score * 100.0,
                "total_claims": total,
                "detailed_factuality": verdicts,
            }),
        )
    }
}

fn verdict_block(verdict: &Verdict) -> String {
    let citations = if verdict.citations.is_empty() {
        "None".to_string()
    } else {
        verdict.citations.join("; ")
    };

    let mut block = format!(
        "**Claim:** {}\n\n**Citations:** {}\n\n**Factuality:** {}\n\n**Explanation:** {}\n\n",
        verdict.claim,
        citations,
        verdict.is_factual(),
        verdict.explanation
    );
    if !verdict.source_details.is_empty() {
        block.push_str("**Source Details:**\n");
        for detail in &verdict.source_details {
            let status = if detail.content_available { "✓" } else { "✗" };
            block.push_str(&format!(
                "  {} {} (content length: {})\n",
                status, detail.citation, detail.content_length
            ));
        }
        block.push('\n');
    }
    block.push_str(RULE);
    block
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GraderError;
    use crate::test_support::{FailingEmbedder, MemorySources, ScriptedJudge, VocabEmbedder};

    fn verifier(judge: Arc<ScriptedJudge>, sources: MemorySources) -> CitationVerifier {
        CitationVerifier::new(
            judge,
            Arc::new(VocabEmbedder::new()),
            Arc::new(sources),
            &Config::default(),
        )
        .unwrap()
    }

    fn claim(text: &str, citations: &[&str]) -> Claim {
        Claim::new(text, citations.iter().map(|s| s.to_string()).collect())
    }

    /// FACTUAL only when every number in the claim appears in the evidence.
    fn evidence_judge() -> Arc<ScriptedJudge> {
        Arc::new(ScriptedJudge::new(|prompt, _| {
            let evidence = prompt
                .split("Relevant Source Materials:")
                .nth(1)
                .and_then(|rest| rest.split("Atomic Claim:").next())
                .unwrap_or("");
            let claim = prompt
                .split("Atomic Claim: ")
                .nth(1)
                .and_then(|rest| rest.lines().next())
                .unwrap_or("");
            let supported = claim
                .split_whitespace()
                .filter(|w| w.chars().any(|c| c.is_ascii_digit()))
                .all(|w| evidence.contains(w));
            Ok(if supported {
                "VERDICT: FACTUAL\nEXPLANATION: The source states the same figure.".to_string()
            } else {
                "VERDICT: UNFACTUAL\nEXPLANATION: The source reports a different figure.".to_string()
            })
        }))
    }

    #[test]
    fn test_parse_verdict_markers() {
        let parsed = parse_verdict("VERDICT: FACTUAL\nEXPLANATION: matches doc1").ok().unwrap();
        assert_eq!(parsed, (VerdictLabel::Factual, "matches doc1".to_string()));

        let parsed = parse_verdict("verdict: **UNFACTUAL**\nexplanation: wrong year").ok().unwrap();
        assert_eq!(parsed.0, VerdictLabel::Unfactual);

        let parsed = parse_verdict("<factual>true</factual>\n<explanation>ok</explanation>")
            .ok()
            .unwrap();
        assert_eq!(parsed, (VerdictLabel::Factual, "ok".to_string()));

        let mixed = parse_verdict("VERDICT: FACTUAL\n<factual>false</factual>").ok().unwrap();
        assert_eq!(mixed.0, VerdictLabel::Unfactual);

        assert!(!parse_verdict("The claim looks right to me.").is_parsed());
    }

    #[test]
    fn test_verdict_words_need_a_boundary() {
        for reply in [
            "VERDICT: FACTUALLY INCORRECT\nEXPLANATION: the figure differs",
            "VERDICT: FACTUALITY UNCERTAIN\nEXPLANATION: cannot tell",
        ] {
            let label = parse_verdict(reply).ok().map(|(label, _)| label);
            assert_ne!(label, Some(VerdictLabel::Factual), "{reply}");
        }

        let parsed = parse_verdict("VERDICT: FACTUAL.\nEXPLANATION: ok").ok().unwrap();
        assert_eq!(parsed.0, VerdictLabel::Factual);
    }

    #[tokio::test]
    async fn test_evidence_braces_are_not_expanded() {
        let judge = evidence_judge();
        let verifier = verifier(
            judge.clone(),
            MemorySources::new().with_file("doc1", "Revenue grew 10% in Q3 {claim}"),
        );

        verifier.verify(&claim("Revenue grew 10%", &["doc1"])).await;
        assert!(judge.prompts()[0].contains("Content: Revenue grew 10% in Q3 {claim}..."));
    }

    #[tokio::test]
    async fn test_url_citation_is_read() {
        let judge = evidence_judge();
        let sources = Arc::new(
            MemorySources::new().with_url("https://acme.com/q3", "Acme Q3", "Revenue grew 10% in Q3"),
        );
        let verifier = CitationVerifier::new(
            judge.clone(),
            Arc::new(VocabEmbedder::new()),
            sources.clone(),
            &Config::default(),
        )
        .unwrap();

        let verdict = verifier
            .verify(&claim("Revenue grew 10%", &["missing.pdf", "https://acme.com/q3"]))
            .await;
        assert_eq!(verdict.label, VerdictLabel::Factual);
        assert_eq!(sources.reads(), 2);
        assert!(!verdict.source_details[0].content_available);
        assert!(verdict.source_details[1].content_available);
    }

    #[tokio::test]
    async fn test_supported_claim_is_factual() {
        let judge = evidence_judge();
        let verifier = verifier(judge.clone(), MemorySources::new().with_file("doc1", "Revenue grew 10% in Q3"));

        let verdict = verifier.verify(&claim("Revenue grew 10%", &["doc1"])).await;
        assert_eq!(verdict.label, VerdictLabel::Factual);
        assert_eq!(judge.calls(), 1);
        assert!(judge.prompts()[0].contains("Source: doc1\nContent: Revenue grew 10% in Q3..."));
        assert_eq!(
            verdict.source_details,
            vec![SourceDetail {
                citation: "doc1".to_string(),
                content_available: true,
                content_length: 22,
            }]
        );
    }

    #[tokio::test]
    async fn test_contradicted_claim_is_unfactual() {
        let judge = evidence_judge();
        let verifier = verifier(judge.clone(), MemorySources::new().with_file("doc1", "Revenue declined 5%"));

        let verdict = verifier.verify(&claim("Revenue grew 10%", &["doc1"])).await;
        assert_eq!(verdict.label, VerdictLabel::Unfactual);
        assert_eq!(judge.calls(), 1);
    }

    #[tokio::test]
    async fn test_no_citations_skips_judge() {
        let judge = Arc::new(ScriptedJudge::always("VERDICT: FACTUAL"));
        let sources = MemorySources::new().with_file("doc1", "Revenue grew 10%");
        let verifier = verifier(judge.clone(), sources);

        let verdict = verifier.verify(&claim("Revenue grew 10%", &[])).await;
        assert_eq!(verdict.label, VerdictLabel::Unfactual);
        assert_eq!(verdict.explanation, NO_CITATIONS);
        assert_eq!(judge.calls(), 0);
    }

    #[tokio::test]
    async fn test_unavailable_sources_skip_judge() {
        let judge = Arc::new(ScriptedJudge::always("VERDICT: FACTUAL"));
        let verifier = verifier(judge.clone(), MemorySources::new());

        let verdict = verifier
            .verify(&claim("Revenue grew 10%", &["missing.pdf", "none"]))
            .await;
        assert_eq!(verdict.explanation, NO_CONTENT);
        assert_eq!(verdict.source_details.len(), 2);
        assert!(verdict.source_details.iter().all(|d| !d.content_available));
        assert_eq!(judge.calls(), 0);
    }

    #[tokio::test]
    async fn test_irrelevant_evidence_skips_judge() {
        let judge = Arc::new(ScriptedJudge::always("VERDICT: FACTUAL"));
        let verifier = verifier(judge.clone(), MemorySources::new().with_file("weather.txt", "sunny skies all week"));

        let verdict = verifier.verify(&claim("Revenue grew 10%", &["weather.txt"])).await;
        assert_eq!(verdict.explanation, NO_RELEVANT_EVIDENCE);
        assert!(verdict.source_details[0].content_available);
        assert_eq!(judge.calls(), 0);
    }

    #[tokio::test]
    async fn test_embedding_outage_fails_closed() {
        let judge = Arc::new(ScriptedJudge::always("VERDICT: FACTUAL"));
        let verifier = CitationVerifier::new(
            judge.clone(),
            Arc::new(FailingEmbedder::new(16)),
            Arc::new(MemorySources::new().with_file("doc1", "Revenue grew 10%")),
            &Config::default(),
        )
        .unwrap();

        let verdict = verifier.verify(&claim("Revenue grew 10%", &["doc1"])).await;
        assert_eq!(verdict.label, VerdictLabel::Unfactual);
        assert_eq!(judge.calls(), 0);
    }

    #[tokio::test]
    async fn test_malformed_reply_retries_with_strict_prompt() {
        let judge = Arc::new(ScriptedJudge::sequence(&[
            "Looks fine.",
            "VERDICT: FACTUAL\nEXPLANATION: supported",
        ]));
        let verifier = verifier(judge.clone(), MemorySources::new().with_file("doc1", "Revenue grew 10%"));

        let verdict = verifier.verify(&claim("Revenue grew 10%", &["doc1"])).await;
        assert_eq!(verdict.label, VerdictLabel::Factual);
        assert_eq!(judge.calls(), 2);
        assert!(judge.prompts()[1].contains("IMPORTANT: You must respond in the exact format"));
    }

    #[tokio::test]
    async fn test_exhausted_retries_fail_closed() {
        let judge = Arc::new(ScriptedJudge::new(|_, n| {
            if n == 0 {
                Err(GraderError::LlmApi("rate limited".to_string()))
            } else {
                Ok("I cannot tell.".to_string())
            }
        }));
        let verifier = verifier(judge.clone(), MemorySources::new().with_file("doc1", "Revenue grew 10%"));

        let verdict = verifier.verify(&claim("Revenue grew 10%", &["doc1"])).await;
        assert_eq!(verdict.label, VerdictLabel::Unfactual);
        assert_eq!(verdict.explanation, UNPARSEABLE);
        assert_eq!(judge.calls(), 3);
    }

    #[tokio::test]
    async fn test_metric_scores_share_of_factual_claims() {
        let judge = evidence_judge();
        let metric = FactualityMetric::new(verifier(
            judge.clone(),
            MemorySources::new()
                .with_file("doc1", "Revenue grew 10% in Q3")
                .with_file("doc2", "Headcount fell 3% in Q3"),
        ));
        let report = Report::new(
            "",
            vec![
                claim("Revenue grew 10%", &["doc1"]),
                claim("Headcount fell 8%", &["doc2"]),
                claim("Margins doubled", &[]),
                claim("Revenue grew 10% again", &["doc1"]),
            ],
        );

        let result = metric.compute(&report, &Task::default(), &EvalSpec::default()).await;
        assert_eq!(result.score, 0.5);
        assert_eq!(result.metric_result["total_claims"], 4);
        assert_eq!(result.metric_result["factuality_percentage"], 50.0);
        assert_eq!(result.metric_result["unfactual_claims"][1], "Margins doubled");
        assert_eq!(result.metric_result["detailed_factuality"][2]["label"], "unfactual");
        assert!(result.summary.starts_with("**Factuality Score:** 0.5000 which is 2/4 claims"));
        assert!(result.summary.contains("  ✓ doc1 (content length: 22)"));
        assert!(result.summary.ends_with("Score: 0.5 which is 2/4 claims"));
        assert_eq!(judge.calls(), 3);
    }

    #[tokio::test]
    async fn test_metric_without_claims() {
        let judge = Arc::new(ScriptedJudge::always("VERDICT: FACTUAL"));
        let metric = FactualityMetric::new(verifier(judge.clone(), MemorySources::new()));

        let result = metric
            .compute(&Report::default(), &Task::default(), &EvalSpec::default())
            .await;
        assert_eq!(result.score, 0.0);
        assert_eq!(result.summary, "no insights found");
        assert_eq!(result.metric_result["total_claims"], 0);
    }
}
