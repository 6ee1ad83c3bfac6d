//! Deterministic collaborators for unit tests.

use crate::error::{GraderError, Result};
use crate::llm::Judge;
use crate::retrieval::Embedder;
use crate::sources::{Citation, SourceDocument, SourceReader};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

const VOCAB_DIMENSION: usize = 256;

/// Bag-of-words embedder: one dimension per distinct lowercased token.
///
/// Punctuation is stripped except `%`, so "10%" and "5%" stay distinct.
pub struct VocabEmbedder {
    vocab: Mutex<HashMap<String, usize>>,
    calls: AtomicUsize,
    fail_marker: Option<String>,
}

impl VocabEmbedder {
    pub fn new() -> Self {
        Self {
            vocab: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
            fail_marker: None,
        }
    }

    /// Fail any batch containing a text with `marker`.
    pub fn failing_on(mut self, marker: &str) -> Self {
        self.fail_marker = Some(marker.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn vector(&self, text: &str) -> Vec<f32> {
        let mut vocab = self.vocab.lock().unwrap();
        let mut vector = vec![0.0; VOCAB_DIMENSION];
        for token in text.split_whitespace() {
            let token: String = token
                .chars()
                .filter(|c| c.is_alphanumeric() || *c == '%')
                .flat_map(char::to_lowercase)
                .collect();
            if token.is_empty() {
                continue;
            }
            let next = vocab.len();
            let slot = *vocab.entry(token).or_insert(next);
            vector[slot % VOCAB_DIMENSION] += 1.0;
        }
        vector
    }
}

#[async_trait]
impl Embedder for VocabEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(marker) = &self.fail_marker {
            if texts.iter().any(|t| t.contains(marker.as_str())) {
                return Err(GraderError::Embedding("scripted failure".to_string()));
            }
        }
        Ok(texts.iter().map(|t| self.vector(t)).collect())
    }

    fn dimension(&self) -> usize {
        VOCAB_DIMENSION
    }

    fn model_id(&self) -> &str {
        "vocab-test"
    }
}

/// Embedder whose every call fails.
pub struct FailingEmbedder {
    dimension: usize,
}

impl FailingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

#[async_trait]
impl Embedder for FailingEmbedder {
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(GraderError::Embedding("provider unavailable".to_string()))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_id(&self) -> &str {
        "failing-test"
    }
}

type Script = Box<dyn Fn(&str, usize) -> Result<String> + Send + Sync>;

/// Judge driven by a closure of `(prompt, call index)`; records every prompt.
pub struct ScriptedJudge {
    script: Script,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedJudge {
    pub fn new(script: impl Fn(&str, usize) -> Result<String> + Send + Sync + 'static) -> Self {
        Self {
            script: Box::new(script),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Always answer `reply`.
    pub fn always(reply: &str) -> Self {
        let reply = reply.to_string();
        Self::new(move |_, _| Ok(reply.clone()))
    }

    /// Answer from `replies` in order, repeating the last one.
    pub fn sequence(replies: &[&str]) -> Self {
        let replies: Vec<String> = replies.iter().map(|s| s.to_string()).collect();
        Self::new(move |_, n| Ok(replies[n.min(replies.len() - 1)].clone()))
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Judge for ScriptedJudge {
    async fn judge(&self, prompt: &str, _model: &str, _temperature: Option<f32>) -> Result<String> {
        let n = {
            let mut prompts = self.prompts.lock().unwrap();
            prompts.push(prompt.to_string());
            prompts.len() - 1
        };
        (self.script)(prompt, n)
    }
}

/// In-memory sources keyed by file name or URL.
#[derive(Default)]
pub struct MemorySources {
    documents: HashMap<String, SourceDocument>,
    reads: AtomicUsize,
}

impl MemorySources {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file whose title is its name.
    pub fn with_file(mut self, name: &str, content: &str) -> Self {
        self.documents
            .insert(name.to_string(), SourceDocument::file(name, content, name));
        self
    }

    pub fn with_url(mut self, url: &str, title: &str, content: &str) -> Self {
        self.documents
            .insert(url.to_string(), SourceDocument::url(title, content, url));
        self
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    fn lookup(&self, key: &str) -> Option<SourceDocument> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.documents.get(key).cloned()
    }
}

#[async_trait]
impl SourceReader for MemorySources {
    async fn read_file(&self, name: &str) -> Option<SourceDocument> {
        self.lookup(name)
    }

    async fn read_url(&self, url: &str) -> Option<SourceDocument> {
        self.lookup(url)
    }

    async fn read_conversation(&self, citation: &Citation) -> Option<SourceDocument> {
        self.lookup(&citation.to_string())
    }
}
