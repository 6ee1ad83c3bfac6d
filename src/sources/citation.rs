//! Citation normalization.

use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

static FILE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([^/\\:]+\.[^/\\:]+)").expect("valid file name pattern"));

/// A cited source, normalized from the free-form string a report carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Citation {
    Url(String),
    /// File name, without directories.
    File(String),
    /// Chat posts by one user in one channel of one team.
    Chat {
        channel: String,
        team: String,
        user: String,
    },
    /// Emails with a given sender, any of the recipients, and a subject.
    Email {
        from: String,
        to: Vec<String>,
        subject: String,
    },
}

impl Citation {
    /// Normalize a raw citation; `None` when nothing can be resolved.
    ///
    /// Chat citations look like `mattermost_<channel>_<team>_<user>` or
    /// `mattermost-<channel>-<team>-<user>`; email citations like
    /// `roundcube-<from>-<to,to>-<subject>`. Anything else is a URL or a file.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() || raw.eq_ignore_ascii_case("none") {
            return None;
        }
        if raw.starts_with("http://") || raw.starts_with("https://") {
            return Some(Citation::Url(raw.to_string()));
        }

        let lower = raw.to_lowercase();
        if let Some(rest) = lower.strip_prefix("mattermost_") {
            return Self::chat(rest.splitn(3, '_').collect(), raw);
        }
        if let Some(rest) = lower.strip_prefix("mattermost-") {
            return Self::chat(rest.splitn(3, '-').collect(), raw);
        }
        if let Some(rest) = lower.strip_prefix("roundcube-") {
            let parts: Vec<&str> = rest.splitn(3, '-').collect();
            if parts.len() != 3 || parts.iter().any(|p| p.is_empty()) {
                tracing::warn!(citation = raw, "email citation is not roundcube-<from>-<to>-<subject>");
                return None;
            }
            return Some(Citation::Email {
                from: parts[0].to_string(),
                to: parts[1].split(',').map(|s| s.trim().to_string()).collect(),
                subject: parts[2].to_string(),
            });
        }

        let name = FILE_NAME
            .captures(raw)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim())
            .unwrap_or(raw);
        Some(Citation::File(name.to_string()))
    }

    fn chat(parts: Vec<&str>, raw: &str) -> Option<Self> {
        if parts.len() != 3 || parts.iter().any(|p| p.is_empty()) {
            tracing::warn!(citation = raw, "chat citation is not mattermost-<channel>-<team>-<user>");
            return None;
        }
        Some(Citation::Chat {
            channel: parts[0].to_string(),
            team: parts[1].to_string(),
            user: parts[2].to_string(),
        })
    }
}

impl fmt::Display for Citation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Citation::Url(url) => write!(f, "{url}"),
            Citation::File(name) => write!(f, "{name}"),
            Citation::Chat {
                channel,
                team,
                user,
            } => write!(f, "chat #{channel} ({team}) by {user}"),
            Citation::Email { from, subject, .. } => write!(f, "email from {from}: {subject}"),
        }
    }
}
