//! Core data models shared by the core and application crates.
//!
//! These are the persisted shapes: match records written once per parsed
//! replay, documents written once per ingestion event, and the chunks
//! derived from a document's text.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::summary::MatchSummary;

/// Source tag for the generated statistics text of a parsed replay.
pub const SOURCE_MATCH_STATS: &str = "match-stats";
/// Source tag for a free-text note written by the user.
pub const SOURCE_USER_NOTE: &str = "user-note";
/// Source tag for a transcribed voice note.
pub const SOURCE_AUDIO_TRANSCRIPT: &str = "audio-transcript";

/// Outcome of a match from the tracked player's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WinLoss {
    Win,
    Loss,
    Unknown,
}

impl WinLoss {
    pub fn as_str(&self) -> &'static str {
        match self {
            WinLoss::Win => "win",
            WinLoss::Loss => "loss",
            WinLoss::Unknown => "unknown",
        }
    }
}

impl fmt::Display for WinLoss {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WinLoss {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "win" => Ok(WinLoss::Win),
            "loss" => Ok(WinLoss::Loss),
            "unknown" => Ok(WinLoss::Unknown),
            other => anyhow::bail!("Unknown match result: '{}'. Use win, loss, or unknown.", other),
        }
    }
}

/// A match record as handed to the store for insertion.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewMatchRecord {
    pub file_name: String,
    pub start_date: Option<String>,
    pub character: Option<String>,
    pub opponent: Option<String>,
    pub stage: Option<String>,
    pub duration: i64,
    pub stocks_taken: i64,
    pub openings_per_kill: f64,
    pub win_loss: WinLoss,
    /// Hex digest of the replay bytes, computed by the ingestion layer.
    pub content_hash: String,
    /// File modification time (unix seconds), used with `file_name` for dedup.
    pub file_mtime: i64,
}

impl NewMatchRecord {
    pub fn from_summary(
        summary: &MatchSummary,
        file_name: &str,
        content_hash: &str,
        file_mtime: i64,
    ) -> Self {
        Self {
            file_name: file_name.to_string(),
            start_date: summary.start_date.clone(),
            character: summary.character.clone(),
            opponent: summary.opponent.clone(),
            stage: summary.stage.clone(),
            duration: i64::from(summary.duration),
            stocks_taken: i64::from(summary.stocks_taken),
            openings_per_kill: summary.openings_per_kill,
            win_loss: summary.win_loss,
            content_hash: content_hash.to_string(),
            file_mtime,
        }
    }
}

/// A persisted match record. Never mutated after insertion.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchRecord {
    pub id: i64,
    pub file_name: String,
    pub start_date: Option<String>,
    pub character: Option<String>,
    pub opponent: Option<String>,
    pub stage: Option<String>,
    pub duration: i64,
    pub stocks_taken: i64,
    pub openings_per_kill: f64,
    pub win_loss: WinLoss,
    pub content_hash: String,
    pub file_mtime: i64,
    pub created_at: i64,
}

impl MatchRecord {
    pub fn from_new(id: i64, record: &NewMatchRecord, created_at: i64) -> Self {
        Self {
            id,
            file_name: record.file_name.clone(),
            start_date: record.start_date.clone(),
            character: record.character.clone(),
            opponent: record.opponent.clone(),
            stage: record.stage.clone(),
            duration: record.duration,
            stocks_taken: record.stocks_taken,
            openings_per_kill: record.openings_per_kill,
            win_loss: record.win_loss,
            content_hash: record.content_hash.clone(),
            file_mtime: record.file_mtime,
            created_at,
        }
    }
}

/// A text body associated with an optional match.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Document {
    pub id: i64,
    pub match_id: Option<i64>,
    pub source: String,
    pub text: String,
    pub created_at: i64,
}

/// An ordered fragment of a document's text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Chunk {
    pub id: i64,
    pub document_id: i64,
    /// Zero-based position within the document.
    pub chunk_index: i64,
    pub text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_win_loss_parse_case_insensitive() {
        assert_eq!("WIN".parse::<WinLoss>().unwrap(), WinLoss::Win);
        assert_eq!("loss".parse::<WinLoss>().unwrap(), WinLoss::Loss);
        assert!("draw".parse::<WinLoss>().is_err());
    }

    #[test]
    fn test_win_loss_serializes_lowercase() {
        let json = serde_json::to_string(&WinLoss::Unknown).unwrap();
        assert_eq!(json, "\"unknown\"");
    }
}
