//! In-memory embedding index for one grading run.

use super::chunker::{Chunk, Chunker};
use super::embeddings::{Embedder, cosine_similarity};
use crate::config::RetrievalConfig;
use crate::error::{GraderError, Result};
use crate::llm::parse::truncate_chars;
use crate::sources::SourceDocument;
use serde::{Deserialize, Serialize};

/// A chunk together with its embedding.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub chunk: Chunk,
    pub embedding: Vec<f32>,
}

/// A retrieved chunk and its cosine similarity to the query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub chunk: Chunk,
    pub similarity: f32,
}

/// Chunks and vectors for one metric computation.
///
/// Each entry pairs a chunk with its vector, so the two can never drift
/// apart in length.
pub struct EmbeddingIndex {
    entries: Vec<IndexEntry>,
    chunker: Chunker,
    batch_size: usize,
    min_similarity: f32,
}

impl EmbeddingIndex {
    /// Create an empty index; fails on an invalid chunk geometry.
    pub fn new(config: &RetrievalConfig, batch_size: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(GraderError::Configuration(
                "embedding batch_size must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            entries: Vec::new(),
            chunker: Chunker::new(config.chunk_size, config.chunk_overlap)?,
            batch_size,
            min_similarity: config.min_similarity,
        })
    }

    /// Chunk every document and embed the chunks batch by batch.
    ///
    /// A batch whose embedding call fails is stored with zero vectors, which
    /// never clear the similarity floor.
    pub async fn add_documents(&mut self, embedder: &dyn Embedder, documents: &[SourceDocument]) {
        let chunks: Vec<Chunk> = documents
            .iter()
            .flat_map(|doc| self.chunker.chunk(&doc.content, &doc.title))
            .collect();

        for batch in chunks.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();

            let embeddings = match embedder.embed(&texts).await {
                Ok(vectors) if vectors.len() == batch.len() => vectors,
                Ok(vectors) => {
                    tracing::warn!(
                        expected = batch.len(),
                        received = vectors.len(),
                        "embedding count mismatch, substituting zero vectors"
                    );
                    zero_vectors(batch.len(), embedder.dimension())
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        batch = batch.len(),
                        "embedding batch failed, substituting zero vectors"
                    );
                    zero_vectors(batch.len(), embedder.dimension())
                }
            };

            for (chunk, embedding) in batch.iter().zip(embeddings) {
                self.entries.push(IndexEntry {
                    chunk: chunk.clone(),
                    embedding,
                });
            }
        }

        tracing::debug!(
            documents = documents.len(),
            chunks = self.entries.len(),
            "embedding index built"
        );
    }

    /// The `k` most similar chunks above the similarity floor, best first.
    ///
    /// Equal similarities keep insertion order. Returns nothing for an empty
    /// index or when the query cannot be embedded.
    pub async fn retrieve(
        &self,
        embedder: &dyn Embedder,
        query: &str,
        k: usize,
    ) -> Vec<RetrievedChunk> {
        if self.entries.is_empty() || k == 0 {
            return Vec::new();
        }

        let query_embedding = match embedder.embed(&[query.to_string()]).await {
            Ok(mut vectors) if !vectors.is_empty() => vectors.swap_remove(0),
            Ok(_) => return Vec::new(),
            Err(e) => {
                tracing::warn!(error = %e, "query embedding failed, nothing retrieved");
                return Vec::new();
            }
        };

        // NaN never clears the floor, so the sort below only sees real numbers.
        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, entry)| (i, cosine_similarity(&query_embedding, &entry.embedding)))
            .filter(|(_, similarity)| *similarity > self.min_similarity)
            .collect();

        // Stable sort keeps insertion order among ties.
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));

        scored
            .into_iter()
            .take(k)
            .map(|(i, similarity)| RetrievedChunk {
                chunk: self.entries[i].chunk.clone(),
                similarity,
            })
            .collect()
    }

    /// Number of chunks in the index.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if index is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get all entries.
    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }
}

fn zero_vectors(count: usize, dimension: usize) -> Vec<Vec<f32>> {
    vec![vec![0.0; dimension]; count]
}

/// Render retrieved chunks as judge evidence: source label plus the first
/// `max_chars` characters of each chunk.
pub fn format_evidence(results: &[RetrievedChunk], max_chars: usize) -> String {
    results
        .iter()
        .map(|r| {
            format!(
                "Source: {}\nContent: {}...",
                r.chunk.source,
                truncate_chars(&r.chunk.text, max_chars)
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FailingEmbedder, VocabEmbedder};

    fn config(chunk_size: usize, chunk_overlap: usize) -> RetrievalConfig {
        RetrievalConfig {
            chunk_size,
            chunk_overlap,
            ..Default::default()
        }
    }

    #[test]
    fn test_invalid_geometry_is_configuration_error() {
        assert!(matches!(
            EmbeddingIndex::new(&config(10, 10), 8),
            Err(GraderError::Configuration(_))
        ));
        assert!(EmbeddingIndex::new(&config(10, 2), 0).is_err());
    }

    #[tokio::test]
    async fn test_empty_index_retrieves_nothing() {
        let embedder = VocabEmbedder::new();
        let index = EmbeddingIndex::new(&config(50, 5), 8).unwrap();
        assert!(index.retrieve(&embedder, "anything", 3).await.is_empty());
        assert_eq!(embedder.calls(), 0);
    }

    #[tokio::test]
    async fn test_retrieve_respects_k_and_floor() {
        let embedder = VocabEmbedder::new();
        let mut index = EmbeddingIndex::new(&config(4, 0), 2).unwrap();
        index
            .add_documents(
                &embedder,
                &[
                    SourceDocument::file("a", "revenue grew ten percent", "a.txt"),
                    SourceDocument::file("b", "revenue grew in europe", "b.txt"),
                    SourceDocument::file("c", "revenue grew strongly overall", "c.txt"),
                    SourceDocument::file("d", "weather was sunny today", "d.txt"),
                ],
            )
            .await;
        assert_eq!(index.len(), 4);

        let results = index.retrieve(&embedder, "revenue grew", 2).await;
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.similarity > 0.3));
        assert!(results[0].similarity >= results[1].similarity);

        let all = index.retrieve(&embedder, "revenue grew", 10).await;
        assert_eq!(all.len(), 3);
        assert!(all.iter().all(|r| r.chunk.source != "d"));
    }

    #[tokio::test]
    async fn test_ties_keep_insertion_order() {
        let embedder = VocabEmbedder::new();
        let mut index = EmbeddingIndex::new(&config(10, 0), 8).unwrap();
        index
            .add_documents(
                &embedder,
                &[
                    SourceDocument::file("first", "net margin expanded", "1.txt"),
                    SourceDocument::file("second", "net margin expanded", "2.txt"),
                ],
            )
            .await;

        let results = index.retrieve(&embedder, "net margin expanded", 2).await;
        let sources: Vec<_> = results.iter().map(|r| r.chunk.source.as_str()).collect();
        assert_eq!(sources, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_nan_similarity_is_skipped() {
        let embedder = VocabEmbedder::new();
        let mut index = EmbeddingIndex::new(&config(10, 0), 8).unwrap();
        index
            .add_documents(
                &embedder,
                &[
                    SourceDocument::file("broken", "revenue grew fast", "1.txt"),
                    SourceDocument::file("weaker", "revenue fell", "2.txt"),
                    SourceDocument::file("exact", "revenue grew", "3.txt"),
                ],
            )
            .await;
        let dimension = index.entries[0].embedding.len();
        index.entries[0].embedding = vec![f32::NAN; dimension];

        let results = index.retrieve(&embedder, "revenue grew", 2).await;
        let sources: Vec<_> = results.iter().map(|r| r.chunk.source.as_str()).collect();
        assert_eq!(sources, vec!["exact", "weaker"]);
        assert!(results.iter().all(|r| !r.similarity.is_nan()));
    }

    #[tokio::test]
    async fn test_failed_batch_gets_zero_vectors() {
        let embedder = VocabEmbedder::new().failing_on("poison");
        let mut index = EmbeddingIndex::new(&config(10, 0), 1).unwrap();
        index
            .add_documents(
                &embedder,
                &[
                    SourceDocument::file("bad", "poison revenue grew", "bad.txt"),
                    SourceDocument::file("good", "revenue grew", "good.txt"),
                ],
            )
            .await;

        assert_eq!(index.len(), 2);
        assert!(index.entries()[0].embedding.iter().all(|x| *x == 0.0));

        let results = index.retrieve(&embedder, "revenue grew", 3).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.source, "good");
    }

    #[tokio::test]
    async fn test_failing_embedder_never_raises() {
        let embedder = FailingEmbedder::new(8);
        let mut index = EmbeddingIndex::new(&config(10, 0), 4).unwrap();
        index
            .add_documents(&embedder, &[SourceDocument::file("a", "some text", "a.txt")])
            .await;
        assert_eq!(index.len(), 1);
        assert_eq!(index.entries()[0].embedding.len(), 8);
        assert!(index.retrieve(&embedder, "some text", 3).await.is_empty());
    }

    #[test]
    fn test_format_evidence_truncates() {
        let results = vec![RetrievedChunk {
            chunk: Chunk {
                text: "abcdefghij".to_string(),
                source: "doc1".to_string(),
                start: 0,
            },
            similarity: 0.9,
        }];
        assert_eq!(format_evidence(&results, 4), "Source: doc1\nContent: abcd...");
    }
}
