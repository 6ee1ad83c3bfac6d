//! Source documents and the readers that load them.
//!
//! A missing or unreachable source is a normal outcome and reads as `None`;
//! the citation verifier records it as unavailable evidence.

mod citation;
mod documents;
mod fs;

pub use citation::Citation;
pub use fs::{FsSourceReader, SourceCatalog};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    File,
    Url,
}

/// Loaded source material; content is opaque text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDocument {
    pub title: String,
    pub content: String,
    pub kind: SourceKind,
    /// File path or URL the content came from.
    pub origin: String,
}

impl SourceDocument {
    pub fn file(
        title: impl Into<String>,
        content: impl Into<String>,
        origin: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            kind: SourceKind::File,
            origin: origin.into(),
        }
    }

    pub fn url(title: impl Into<String>, content: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            kind: SourceKind::Url,
            origin: url.into(),
        }
    }

    pub fn has_content(&self) -> bool {
        !self.content.trim().is_empty()
    }
}

/// Locates cited material.
#[async_trait]
pub trait SourceReader: Send + Sync {
    /// Read a file by name.
    async fn read_file(&self, name: &str) -> Option<SourceDocument>;

    /// Fetch a web page or remote file.
    async fn read_url(&self, url: &str) -> Option<SourceDocument>;

    /// Chat and email sources; unsupported unless overridden.
    async fn read_conversation(&self, _citation: &Citation) -> Option<SourceDocument> {
        None
    }

    async fn read_citation(&self, citation: &Citation) -> Option<SourceDocument> {
        match citation {
            Citation::Url(url) => self.read_url(url).await,
            Citation::File(name) => self.read_file(name).await,
            Citation::Chat { .. } | Citation::Email { .. } => self.read_conversation(citation).await,
        }
    }
}
