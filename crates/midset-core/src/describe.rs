//! Descriptive text for a parsed match, stored as its `match-stats`
//! document so statistics are retrievable alongside free-text notes.

use chrono::DateTime;

use crate::models::WinLoss;
use crate::names::{character_name, format_duration, stage_name};
use crate::summary::MatchSummary;

/// Conversion-rate wording for an openings-per-kill value.
pub fn assess_conversion_rate(openings_per_kill: f64) -> Option<&'static str> {
    if openings_per_kill <= 0.0 || !openings_per_kill.is_finite() {
        None
    } else if openings_per_kill < 2.0 {
        Some("good")
    } else if openings_per_kill < 3.0 {
        Some("average")
    } else {
        Some("needs improvement")
    }
}

/// Render the statistics document for match `match_id`.
pub fn describe_match(match_id: i64, summary: &MatchSummary) -> String {
    let opk = if summary.openings_per_kill > 0.0 {
        format!("{:.2}", summary.openings_per_kill)
    } else {
        "N/A".to_string()
    };

    let mut lines = vec![
        format!("Game #{} Statistics:", match_id),
        format!(
            "Matchup: {} vs {}",
            character_name(summary.character.as_deref()),
            character_name(summary.opponent.as_deref())
        ),
        format!("Stage: {}", stage_name(summary.stage.as_deref())),
        format!(
            "Duration: {} ({} frames)",
            format_duration(summary.duration),
            summary.duration
        ),
        format!("Stocks Taken: {}", summary.stocks_taken),
        format!("Openings Per Kill (OPK): {}", opk),
    ];
    if let Some(date) = &summary.start_date {
        lines.push(format!("Date: {}", display_date(date)));
    }
    if summary.win_loss != WinLoss::Unknown {
        lines.push(format!("Result: {}", summary.win_loss));
    }

    let mut assessment = match assess_conversion_rate(summary.openings_per_kill) {
        Some(rating) => format!("This game shows {} conversion rate.", rating),
        None => "No conversion data was recorded for this game.".to_string(),
    };
    match summary.stocks_taken {
        0 => {}
        1 => assessment.push_str(" You took 1 stock."),
        n => assessment.push_str(&format!(" You took {} stocks.", n)),
    }

    format!("{}\n\n{}", lines.join("\n"), assessment)
}

fn display_date(iso: &str) -> String {
    DateTime::parse_from_rfc3339(iso)
        .map(|dt| dt.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|_| iso.to_string())
}
