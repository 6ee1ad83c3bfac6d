//! File-system and web source reader.

use super::documents::{self, DocumentFormat};
use super::{Citation, SourceDocument, SourceReader};
use crate::error::{GraderError, Result};
use crate::inputs::EnvFile;
use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;
use walkdir::WalkDir;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36";
const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

const CHAT_PREFIX: &str = "mattermost_chat";
const EMAIL_PREFIX: &str = "roundcube_email";

static HTML_TITLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("valid title pattern"));
static BLANK_RUNS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid blank line pattern"));

/// File names available to a task, mapped to their paths.
#[derive(Debug, Clone, Default)]
pub struct SourceCatalog {
    files: BTreeMap<String, PathBuf>,
}

impl SourceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the task's environment files, resolved under `data_dir`.
    pub fn from_env_files(data_dir: &Path, env_files: &[EnvFile]) -> Self {
        let mut catalog = Self::new();
        for env_file in env_files {
            let path = data_dir.join(&env_file.source);
            if !path.exists() {
                tracing::warn!(path = %path.display(), "environment file not found");
            }
            catalog.insert(path);
        }
        catalog
    }

    /// Register every file below `dir`.
    pub fn scan(&mut self, dir: &Path) -> Result<usize> {
        if !dir.is_dir() {
            return Err(GraderError::InputNotFound(dir.to_path_buf()));
        }

        let mut added = 0;
        for entry in WalkDir::new(dir).into_iter().filter_map(|e| e.ok()) {
            if entry.file_type().is_file() {
                self.insert(entry.path().to_path_buf());
                added += 1;
            }
        }
        tracing::debug!(dir = %dir.display(), files = added, "source directory scanned");
        Ok(added)
    }

    /// Register one file under its file name; later entries win.
    pub fn insert(&mut self, path: PathBuf) {
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            self.files.insert(name.to_string(), path);
        }
    }

    pub fn get(&self, name: &str) -> Option<&Path> {
        self.files.get(name).map(PathBuf::as_path)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// JSONL exports whose file name starts with `prefix`.
    fn exports(&self, prefix: &str) -> Vec<&Path> {
        self.files
            .iter()
            .filter(|(name, _)| name.to_lowercase().starts_with(prefix) && name.ends_with(".jsonl"))
            .map(|(_, path)| path.as_path())
            .collect()
    }
}

/// Reads cited files from a [`SourceCatalog`] and fetches cited URLs.
pub struct FsSourceReader {
    catalog: SourceCatalog,
    client: Client,
}

impl FsSourceReader {
    pub fn new(catalog: SourceCatalog) -> Result<Self> {
        let client = Client::builder()
            .timeout(FETCH_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { catalog, client })
    }

    pub fn catalog(&self) -> &SourceCatalog {
        &self.catalog
    }

    fn read_chat(&self, channel: &str, team: &str, user: &str) -> Option<SourceDocument> {
        let exports = self.catalog.exports(CHAT_PREFIX);
        let mut messages = Vec::new();

        for path in &exports {
            for record in jsonl_records(path) {
                if record.get("type").and_then(Value::as_str) != Some("post") {
                    continue;
                }
                let post = &record["post"];
                let field = |key: &str| post.get(key).and_then(Value::as_str).unwrap_or("").to_lowercase();
                if field("team") == team && field("channel") == channel && field("user") == user {
                    messages.push(format!(
                        "Message: {} (Created: {})",
                        post.get("message").and_then(Value::as_str).unwrap_or(""),
                        post.get("created_at").and_then(Value::as_str).unwrap_or("")
                    ));
                }
            }
        }

        if messages.is_empty() {
            tracing::warn!(channel, team, user, "no matching chat posts");
            return None;
        }
        Some(SourceDocument::file(
            format!("#{channel} ({team}) by {user}"),
            messages.join("\n\n"),
            exports.first().map(|p| p.display().to_string()).unwrap_or_default(),
        ))
    }

    fn read_email(&self, from: &str, to: &[String], subject: &str) -> Option<SourceDocument> {
        let exports = self.catalog.exports(EMAIL_PREFIX);
        let mut emails = Vec::new();

        for path in &exports {
            for record in jsonl_records(path) {
                if record.get("type").and_then(Value::as_str) != Some("email") {
                    continue;
                }
                let text = |key: &str| record.get(key).and_then(Value::as_str).unwrap_or("");
                let recipients: Vec<String> = record
                    .get("to")
                    .and_then(Value::as_array)
                    .map(|list| {
                        list.iter()
                            .filter_map(Value::as_str)
                            .map(str::to_lowercase)
                            .collect()
                    })
                    .unwrap_or_default();

                if text("from").to_lowercase() == from
                    && text("subject").to_lowercase() == subject
                    && to.iter().any(|addr| recipients.contains(addr))
                {
                    emails.push(format!(
                        "From: {} ({})\nSubject: {}\nDate: {}\nBody: {}",
                        text("from_name"),
                        text("from"),
                        text("subject"),
                        text("date"),
                        text("body")
                    ));
                }
            }
        }

        if emails.is_empty() {
            tracing::warn!(from, subject, "no matching emails");
            return None;
        }
        Some(SourceDocument::file(
            subject.to_string(),
            emails.join("\n\n---EMAIL SEPARATOR---\n\n"),
            exports.first().map(|p| p.display().to_string()).unwrap_or_default(),
        ))
    }
}

#[async_trait]
impl SourceReader for FsSourceReader {
    async fn read_file(&self, name: &str) -> Option<SourceDocument> {
        let Some(path) = self.catalog.get(name) else {
            tracing::warn!(file = name, "cited file is not part of the task");
            return None;
        };
        parse_file(path)
    }

    async fn read_url(&self, url: &str) -> Option<SourceDocument> {
        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(url, error = %e, "failed to fetch cited URL");
                return None;
            }
        };
        if !response.status().is_success() {
            tracing::warn!(url, status = %response.status(), "cited URL returned an error");
            return None;
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_lowercase();
        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(url, error = %e, "failed to read response body");
                return None;
            }
        };

        let (title, content) = if let Some(format) = DocumentFormat::from_content_type(&content_type) {
            match documents::extract(format, &body) {
                Ok(extracted) => (extracted.title, extracted.content),
                Err(e) => {
                    tracing::warn!(url, error = %e, "failed to extract downloaded document");
                    return None;
                }
            }
        } else if content_type.contains("html") {
            let raw = String::from_utf8_lossy(&body);
            let text = html2text::from_read(&body[..], 120).unwrap_or_else(|_| raw.to_string());
            (html_title(&raw), text)
        } else {
            (None, String::from_utf8_lossy(&body).to_string())
        };

        let document = SourceDocument::url(title.unwrap_or_else(|| url.to_string()), content, url);
        if !document.has_content() {
            tracing::warn!(url, "cited URL has no readable content");
            return None;
        }
        Some(document)
    }

    async fn read_conversation(&self, citation: &Citation) -> Option<SourceDocument> {
        match citation {
            Citation::Chat {
                channel,
                team,
                user,
            } => self.read_chat(channel, team, user),
            Citation::Email { from, to, subject } => self.read_email(from, to, subject),
            _ => None,
        }
    }
}

/// Parse a local file into a document; `None` when unreadable or empty.
pub(crate) fn parse_file(path: &Path) -> Option<SourceDocument> {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("untitled");
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to read source file");
            return None;
        }
    };

    let (title, content) = if let Some(format) = DocumentFormat::from_extension(&extension) {
        match documents::extract(format, &bytes) {
            Ok(extracted) => (extracted.title.unwrap_or_else(|| name.to_string()), extracted.content),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to extract source document");
                return None;
            }
        }
    } else {
        let raw = String::from_utf8_lossy(&bytes);
        match extension.as_str() {
            "json" => parse_json(&raw, name),
            "jsonl" => (name.to_string(), parse_jsonl(&raw)),
            "md" => parse_markdown(&raw, name),
            _ => (name.to_string(), raw.trim().to_string()),
        }
    };

    let document = SourceDocument::file(
        title,
        BLANK_RUNS.replace_all(&content, "\n\n").into_owned(),
        path.display().to_string(),
    );
    document.has_content().then_some(document)
}

fn parse_json(raw: &str, name: &str) -> (String, String) {
    let Ok(data) = serde_json::from_str::<Value>(raw) else {
        return (name.to_string(), raw.trim().to_string());
    };

    let string_field = |keys: &[&str]| {
        keys.iter()
            .filter_map(|k| data.get(*k).and_then(Value::as_str))
            .map(str::trim)
            .find(|s| !s.is_empty())
            .map(str::to_string)
    };

    let title = string_field(&["title", "name", "heading"]).unwrap_or_else(|| name.to_string());
    let content = string_field(&["description", "summary", "text", "content", "body", "abstract"])
        .unwrap_or_else(|| serde_json::to_string_pretty(&data).unwrap_or_else(|_| raw.to_string()));
    (title, content)
}

/// Chat exports keep only post records; other JSONL is kept whole.
fn parse_jsonl(raw: &str) -> String {
    let lines: Vec<&str> = raw.lines().filter(|l| !l.trim().is_empty()).collect();
    let posts: Vec<&str> = lines
        .iter()
        .copied()
        .filter(|line| {
            serde_json::from_str::<Value>(line)
                .map(|v| v.get("post").is_some() || v.get("direct_post").is_some())
                .unwrap_or(false)
        })
        .collect();

    if posts.is_empty() { lines.join("\n") } else { posts.join("\n") }
}

fn parse_markdown(raw: &str, name: &str) -> (String, String) {
    let title = raw
        .lines()
        .find(|l| !l.trim().is_empty())
        .and_then(|l| l.trim().strip_prefix("# "))
        .map(|t| t.trim().to_string())
        .unwrap_or_else(|| name.to_string());
    (title, raw.trim().to_string())
}

fn html_title(html: &str) -> Option<String> {
    HTML_TITLE
        .captures(html)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|t| !t.is_empty())
}

fn jsonl_records(path: &Path) -> Vec<Value> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to read export");
            return Vec::new();
        }
    };
    content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|l| serde_json::from_str(l).ok())
        .collect()
}
