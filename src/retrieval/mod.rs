//! Evidence retrieval: chunking, embedding and top-k similarity search.

mod cache;
mod chunker;
mod embeddings;
mod index;
#[cfg(feature = "local-embeddings")]
mod local;

pub use cache::CachedEmbedder;
pub use chunker::{Chunk, Chunker};
pub use embeddings::{Embedder, HttpEmbedder, cosine_similarity};
pub use index::{EmbeddingIndex, IndexEntry, RetrievedChunk, format_evidence};
#[cfg(feature = "local-embeddings")]
pub use local::{DEFAULT_LOCAL_MODEL, LocalEmbedder};
