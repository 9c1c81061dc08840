//! Match summarization.
//!
//! Derives the stored statistics of a match from a decoded [`RawSession`].
//! Summarization never fails: each field falls back to a default on its own
//! and is listed in [`MatchSummary::degraded`] when it did, so callers can
//! tell "zero because absent" from "zero because computed".
//!
//! The tracked player is always player index 0; index 1 is the opponent.
//!
//! # Field priority
//!
//! | Field | Primary | Fallbacks | Default |
//! |-------|---------|-----------|---------|
//! | duration | rounded last frame | none | 0 |
//! | stocks taken | player 0 kill count | none | 0 |
//! | openings per kill | embedded ratio (> 0) | player-0 conversions ÷ kills, then conversion count ÷ kills | 0.0 |
//! | win/loss | final-frame stocks | ≥ 4 kills vs < 4 | unknown |
//! | start date | metadata `startAt` | none | absent |

use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde::Serialize;
use std::cmp::Ordering;

use crate::models::WinLoss;
use crate::replay::{self, DecodeError, RawSession};

/// Stock count of a standard match, used by the kill-count heuristic.
pub const STANDARD_STOCKS: f64 = 4.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradedField {
    Character,
    Opponent,
    Stage,
    Duration,
    StocksTaken,
    OpeningsPerKill,
    WinLoss,
    StartDate,
}

/// Which step of the openings-per-kill chain produced the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OpkSource {
    EmbeddedRatio,
    PlayerConversions,
    ConversionCount,
    Unavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WinLossBasis {
    FinalFrameStocks,
    KillCount,
    Undetermined,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchSummary {
    /// External character id of the tracked player, as a decimal string.
    pub character: Option<String>,
    pub opponent: Option<String>,
    pub stage: Option<String>,
    /// Frames.
    pub duration: u32,
    pub stocks_taken: u32,
    /// 0.0 means no data.
    pub openings_per_kill: f64,
    pub win_loss: WinLoss,
    /// `YYYY-MM-DDTHH:MM:SS.sssZ`.
    pub start_date: Option<String>,
    pub opk_source: OpkSource,
    pub win_loss_basis: WinLossBasis,
    pub degraded: Vec<DegradedField>,
}

impl MatchSummary {
    pub fn is_degraded(&self, field: DegradedField) -> bool {
        self.degraded.contains(&field)
    }
}

/// Summarize a decoded session.
pub fn summarize(session: &RawSession) -> MatchSummary {
    let mut degraded = Vec::new();
    let mut note = |field: DegradedField, ok: bool| {
        if !ok {
            degraded.push(field);
        }
    };

    let players = &session.settings.players;
    let character = players.first().map(|p| p.character_id.to_string());
    let opponent = players.get(1).map(|p| p.character_id.to_string());
    let stage = Some(session.settings.stage_id.to_string());
    note(DegradedField::Character, character.is_some());
    note(DegradedField::Opponent, opponent.is_some());
    note(DegradedField::Stage, stage.is_some());

    let duration = session.stats.last_frame.and_then(non_negative_round);
    note(DegradedField::Duration, duration.is_some());

    let stocks_taken = session
        .stats
        .player(0)
        .and_then(|p| p.kill_count)
        .and_then(non_negative_round);
    note(DegradedField::StocksTaken, stocks_taken.is_some());

    let (openings_per_kill, opk_source) = openings_per_kill(session);
    note(DegradedField::OpeningsPerKill, opk_source != OpkSource::Unavailable);

    let (win_loss, win_loss_basis) = win_loss(session);
    note(DegradedField::WinLoss, win_loss != WinLoss::Unknown);

    let start_date = session
        .metadata
        .as_ref()
        .and_then(|m| m.start_at.as_deref())
        .and_then(normalize_start_date);
    note(DegradedField::StartDate, start_date.is_some());

    if !degraded.is_empty() {
        tracing::debug!(?degraded, "summary fell back to defaults");
    }

    MatchSummary {
        character,
        opponent,
        stage,
        duration: duration.unwrap_or(0),
        stocks_taken: stocks_taken.unwrap_or(0),
        openings_per_kill,
        win_loss,
        start_date,
        opk_source,
        win_loss_basis,
        degraded,
    }
}

/// Decode and summarize one replay buffer. A decode failure short-circuits.
pub fn summarize_replay(bytes: &[u8]) -> Result<MatchSummary, DecodeError> {
    let session = replay::decode(bytes)?;
    Ok(summarize(&session))
}

/// A decoded session alongside its summary, for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct Inspection {
    pub session: RawSession,
    pub summary: MatchSummary,
}

pub fn inspect_replay(bytes: &[u8]) -> Result<Inspection, DecodeError> {
    let session = replay::decode(bytes)?;
    let summary = summarize(&session);
    Ok(Inspection { session, summary })
}

fn non_negative_round(v: f64) -> Option<u32> {
    if !v.is_finite() {
        return None;
    }
    let r = v.round();
    (r >= 0.0).then(|| r.min(f64::from(u32::MAX)) as u32)
}

fn usable_count(v: Option<f64>) -> Option<f64> {
    v.filter(|v| v.is_finite() && *v > 0.0)
}

fn openings_per_kill(session: &RawSession) -> (f64, OpkSource) {
    let Some(player) = session.stats.player(0) else {
        return (0.0, OpkSource::Unavailable);
    };
    if let Some(ratio) = usable_count(player.openings_per_kill) {
        return (ratio, OpkSource::EmbeddedRatio);
    }
    if let Some(kills) = usable_count(player.kill_count) {
        let own = session
            .stats
            .conversions
            .iter()
            .filter(|c| c.player_index == 0)
            .count();
        if own > 0 {
            return (own as f64 / kills, OpkSource::PlayerConversions);
        }
        if let Some(count) = usable_count(player.conversion_count) {
            return (count / kills, OpkSource::ConversionCount);
        }
    }
    (0.0, OpkSource::Unavailable)
}

fn win_loss(session: &RawSession) -> (WinLoss, WinLossBasis) {
    if let Some((own, theirs)) = final_frame_stocks(session) {
        let outcome = match own.cmp(&theirs) {
            Ordering::Greater => WinLoss::Win,
            Ordering::Less => WinLoss::Loss,
            Ordering::Equal => WinLoss::Unknown,
        };
        return (outcome, WinLossBasis::FinalFrameStocks);
    }

    let kills = |index: usize| {
        session
            .stats
            .player(index)
            .and_then(|p| p.kill_count)
            .filter(|k| k.is_finite())
            .unwrap_or(0.0)
    };
    let (own, theirs) = (kills(0), kills(1));
    if own >= STANDARD_STOCKS && theirs < STANDARD_STOCKS {
        (WinLoss::Win, WinLossBasis::KillCount)
    } else if theirs >= STANDARD_STOCKS && own < STANDARD_STOCKS {
        (WinLoss::Loss, WinLossBasis::KillCount)
    } else {
        (WinLoss::Unknown, WinLossBasis::Undetermined)
    }
}

/// Stocks remaining for players 0 and 1 at the declared last frame, when
/// that frame is positive, present, and carries both values.
fn final_frame_stocks(session: &RawSession) -> Option<(u8, u8)> {
    let last = session
        .stats
        .last_frame
        .filter(|v| v.is_finite() && *v > 0.0 && v.fract() == 0.0)?;
    let frame = session.frame(last as i32)?;
    let stocks = |index: usize| frame.players.get(index).copied().flatten()?.stocks_remaining;
    Some((stocks(0)?, stocks(1)?))
}

/// Normalize a metadata timestamp to UTC with millisecond precision.
/// Returns `None` for anything unparsable.
pub fn normalize_start_date(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let parsed = DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|naive| Utc.from_utc_datetime(&naive))
        })?;
    Some(parsed.to_rfc3339_opts(SecondsFormat::Millis, true))
}
