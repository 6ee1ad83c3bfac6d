//! Persistence layer for saving/loading score cards.
//!
//! Score cards are written as pretty JSON so they can be diffed and read by
//! other tooling.

use crate::error::{GraderError, Result};
use crate::scoring::ScoreCard;
use std::fs;
use std::path::Path;

/// Default filename for a score card.
pub const DEFAULT_SCORES_FILENAME: &str = "scores.json";

/// Save a ScoreCard to a file, creating parent directories as needed.
pub fn save_score_card(card: &ScoreCard, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| GraderError::io(parent, e))?;
        }
    }

    let json = serde_json::to_string_pretty(card)
        .map_err(|e| GraderError::Serialization(e.to_string()))?;
    fs::write(path, json).map_err(|e| GraderError::io(path, e))?;

    tracing::debug!(path = %path.display(), "score card saved");
    Ok(())
}

/// Load a ScoreCard from a file.
pub fn load_score_card(path: &Path) -> Result<ScoreCard> {
    if !path.exists() {
        return Err(GraderError::InputNotFound(path.to_path_buf()));
    }

    let data = fs::read_to_string(path).map_err(|e| GraderError::io(path, e))?;
    serde_json::from_str(&data).map_err(|e| GraderError::Serialization(e.to_string()))
}

/// Check if a score card exists at the given path.
pub fn score_card_exists(path: &Path) -> bool {
    path.is_file()
}
