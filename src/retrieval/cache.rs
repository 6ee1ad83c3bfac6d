//! Content-addressed embedding cache.
//!
//! Wraps any [`Embedder`]; vectors are keyed by a SHA-256 of the model id and
//! the text, so only unseen texts reach the inner provider. The cache can be
//! persisted between runs as a bincode file.

use super::embeddings::Embedder;
use crate::error::{GraderError, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

type CacheKey = [u8; 32];

pub struct CachedEmbedder<E> {
    inner: E,
    vectors: Mutex<HashMap<CacheKey, Vec<f32>>>,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl<E: Embedder> CachedEmbedder<E> {
    pub fn new(inner: E) -> Self {
        Self {
            inner,
            vectors: Mutex::new(HashMap::new()),
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
        }
    }

    /// Wrap `inner`, preloading vectors from `path` if it exists.
    pub fn load(inner: E, path: &Path) -> Result<Self> {
        let cache = Self::new(inner);
        if !path.exists() {
            return Ok(cache);
        }

        let data = fs::read(path).map_err(|e| GraderError::io(path, e))?;
        let (vectors, _): (HashMap<CacheKey, Vec<f32>>, usize) =
            bincode::serde::decode_from_slice(&data, bincode::config::standard())
                .map_err(|e| GraderError::Serialization(e.to_string()))?;

        tracing::debug!(path = %path.display(), entries = vectors.len(), "embedding cache loaded");
        *cache.lock() = vectors;
        Ok(cache)
    }

    /// Write all cached vectors to `path`.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| GraderError::io(parent, e))?;
            }
        }

        let data = bincode::serde::encode_to_vec(&*self.lock(), bincode::config::standard())
            .map_err(|e| GraderError::Serialization(e.to_string()))?;
        fs::write(path, data).map_err(|e| GraderError::io(path, e))
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// (hits, misses) since construction.
    pub fn stats(&self) -> (usize, usize) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }

    fn key(&self, text: &str) -> CacheKey {
        let mut hasher = Sha256::new();
        hasher.update(self.inner.model_id().as_bytes());
        hasher.update([0u8]);
        hasher.update(text.as_bytes());
        hasher.finalize().into()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<CacheKey, Vec<f32>>> {
        self.vectors.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl<E: Embedder> Embedder for CachedEmbedder<E> {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let keys: Vec<CacheKey> = texts.iter().map(|t| self.key(t)).collect();

        let mut found: Vec<Option<Vec<f32>>> = {
            let cache = self.lock();
            keys.iter().map(|k| cache.get(k).cloned()).collect()
        };

        let missing: Vec<usize> = (0..texts.len()).filter(|&i| found[i].is_none()).collect();
        self.hits
            .fetch_add(texts.len() - missing.len(), Ordering::Relaxed);
        self.misses.fetch_add(missing.len(), Ordering::Relaxed);

        if !missing.is_empty() {
            let batch: Vec<String> = missing.iter().map(|&i| texts[i].clone()).collect();
            let fresh = self.inner.embed(&batch).await?;
            if fresh.len() != batch.len() {
                return Err(GraderError::Embedding(format!(
                    "Expected {} embeddings, got {}",
                    batch.len(),
                    fresh.len()
                )));
            }

            let mut cache = self.lock();
            for (&i, vector) in missing.iter().zip(fresh) {
                cache.insert(keys[i], vector.clone());
                found[i] = Some(vector);
            }
        }

        Ok(found.into_iter().flatten().collect())
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn model_id(&self) -> &str {
        self.inner.model_id()
    }
}
