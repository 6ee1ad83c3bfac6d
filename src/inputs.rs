//! Report, task and evaluation documents.
//!
//! These are produced outside the grader (by the report generator and the
//! benchmark task set) and read from JSON.

use crate::error::{GraderError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fs;
use std::path::Path;

/// An atomic assertion made by the report, with the sources it cites.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    #[serde(alias = "text")]
    pub claim: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub citations: Vec<String>,
}

/// Accept `null` where a list is expected.
fn null_as_empty<'de, D, T>(deserializer: D) -> std::result::Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

impl Claim {
    pub fn new(claim: impl Into<String>, citations: Vec<String>) -> Self {
        Self {
            claim: claim.into(),
            citations,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportMetadata {
    /// Documents the report generator retrieved while writing.
    #[serde(default)]
    pub document_ids: Vec<String>,
}

/// A generated research report.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Report {
    #[serde(default)]
    pub report_text: String,
    #[serde(default, alias = "claims")]
    pub report_insights: Vec<Claim>,
    #[serde(default)]
    pub metadata: ReportMetadata,
}

impl Report {
    pub fn new(report_text: impl Into<String>, report_insights: Vec<Claim>) -> Self {
        Self {
            report_text: report_text.into(),
            report_insights,
            metadata: ReportMetadata::default(),
        }
    }

    /// Copy of the report with `report_text` cut to at most `max_chars`
    /// characters.
    pub fn truncated(&self, max_chars: usize) -> Self {
        let length = self.report_text.chars().count();
        if length <= max_chars {
            return self.clone();
        }

        tracing::warn!(
            length,
            limit = max_chars,
            "report text exceeds limit, keeping only the leading part"
        );
        let end = self
            .report_text
            .char_indices()
            .nth(max_chars)
            .map(|(i, _)| i)
            .unwrap_or(self.report_text.len());

        Self {
            report_text: self.report_text[..end].to_string(),
            ..self.clone()
        }
    }
}

/// A file made available to the report generator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvFile {
    /// Path relative to the data directory.
    pub source: String,
}

/// The research task the report answers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Task {
    #[serde(default)]
    pub task_id: String,
    /// Free-form persona description given to the rubric judge.
    #[serde(default)]
    pub persona: Value,
    #[serde(default)]
    pub dr_question: String,
    #[serde(default)]
    pub env_files: Vec<EnvFile>,
}

impl Task {
    /// Persona rendered as prompt text; strings are used verbatim.
    pub fn persona_text(&self) -> String {
        match &self.persona {
            Value::Null => String::new(),
            Value::String(s) => s.clone(),
            other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QaType {
    Insight,
    Distractor,
    #[serde(other)]
    Other,
}

/// A gold question with its expected answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoldQa {
    pub qa_type: QaType,
    pub question: String,
    pub answer: String,
    #[serde(default)]
    pub supporting_file_paths: Vec<String>,
    #[serde(default)]
    pub supporting_urls: Vec<String>,
}

impl GoldQa {
    pub fn new(qa_type: QaType, question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            qa_type,
            question: question.into(),
            answer: answer.into(),
            supporting_file_paths: Vec::new(),
            supporting_urls: Vec::new(),
        }
    }

    /// Whether any evidence is recorded for this question.
    pub fn is_answerable(&self) -> bool {
        !self.supporting_file_paths.is_empty() || !self.supporting_urls.is_empty()
    }
}

/// Ground truth for one task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvalSpec {
    #[serde(default)]
    pub dr_report_evaluation_qa: Vec<GoldQa>,
    /// Files a good report should have drawn on.
    #[serde(default)]
    pub supporting_file_paths: Vec<String>,
}

impl EvalSpec {
    /// Gold questions of one type, in file order.
    pub fn questions(&self, qa_type: QaType) -> Vec<&GoldQa> {
        self.dr_report_evaluation_qa
            .iter()
            .filter(|qa| qa.qa_type == qa_type)
            .collect()
    }
}

/// Read and deserialize a JSON input document.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    if !path.exists() {
        return Err(GraderError::InputNotFound(path.to_path_buf()));
    }

    let content = fs::read_to_string(path).map_err(|e| GraderError::io(path, e))?;
    serde_json::from_str(&content)
        .map_err(|e| GraderError::Serialization(format!("{}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_claim_accepts_text_alias() {
        let claim: Claim =
            serde_json::from_str(r#"{"text": "Revenue grew 10%", "citations": ["doc1"]}"#).unwrap();
        assert_eq!(claim.claim, "Revenue grew 10%");
        assert_eq!(claim.citations, vec!["doc1"]);

        let claim: Claim = serde_json::from_str(r#"{"claim": "No sources"}"#).unwrap();
        assert!(claim.citations.is_empty());

        let claim: Claim =
            serde_json::from_str(r#"{"claim": "Null sources", "citations": null}"#).unwrap();
        assert!(claim.citations.is_empty());
    }

    #[test]
    fn test_truncated_respects_char_boundaries() {
        let report = Report::new("héllo wörld", vec![]);
        assert_eq!(report.truncated(4).report_text, "héll");
        assert_eq!(report.truncated(100).report_text, "héllo wörld");
    }

    #[test]
    fn test_unknown_qa_type_is_other() {
        let qa: GoldQa = serde_json::from_str(
            r#"{"qa_type": "background", "question": "q", "answer": "a"}"#,
        )
        .unwrap();
        assert_eq!(qa.qa_type, QaType::Other);
        assert!(!qa.is_answerable());
    }

    #[test]
    fn test_eval_questions_filter_by_type() {
        let eval: EvalSpec = serde_json::from_str(
            r#"{"dr_report_evaluation_qa": [
                {"qa_type": "insight", "question": "q1", "answer": "a1", "supporting_file_paths": ["f.txt"]},
                {"qa_type": "distractor", "question": "q2", "answer": "a2"},
                {"qa_type": "insight", "question": "q3", "answer": "a3"}
            ]}"#,
        )
        .unwrap();
        let insights = eval.questions(QaType::Insight);
        assert_eq!(insights.len(), 2);
        assert_eq!(insights[1].question, "q3");
        assert!(insights[0].is_answerable());
        assert_eq!(eval.questions(QaType::Distractor).len(), 1);
    }

    #[test]
    fn test_persona_text() {
        let mut task = Task::default();
        assert_eq!(task.persona_text(), "");
        task.persona = Value::String("CFO".to_string());
        assert_eq!(task.persona_text(), "CFO");
        task.persona = serde_json::json!({"role": "CFO"});
        assert!(task.persona_text().contains("\"role\": \"CFO\""));
    }

    #[test]
    fn test_load_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("report.json");
        fs::write(
            &path,
            r#"{"report_text": "body", "report_insights": [{"claim": "c", "citations": []}],
                "metadata": {"document_ids": ["a.txt"]}}"#,
        )
        .unwrap();

        let report: Report = load_json(&path).unwrap();
        assert_eq!(report.report_insights.len(), 1);
        assert_eq!(report.metadata.document_ids, vec!["a.txt"]);

        let missing = load_json::<Report>(&dir.path().join("nope.json"));
        assert!(matches!(missing, Err(GraderError::InputNotFound(_))));
    }
}
