//! Match listing (`midset matches`) and detail (`midset show`).

use anyhow::{bail, Result};
use sqlx::SqlitePool;

use midset_core::models::{MatchRecord, WinLoss};
use midset_core::names::{character_id, character_name, format_duration, stage_id, stage_name};
use midset_core::store::Store;

use crate::config::Config;
use crate::context::AppContext;
use crate::notes::{list_notes, print_note};
use crate::sqlite_store::{match_from_row, MATCH_COLUMNS};

/// Filters and ordering for [`list_matches`].
#[derive(Debug, Clone)]
pub struct MatchQuery {
    /// Character id or name.
    pub character: Option<String>,
    pub opponent: Option<String>,
    /// Stage id or name.
    pub stage: Option<String>,
    pub result: Option<WinLoss>,
    pub order_by: String,
    pub ascending: bool,
    pub limit: i64,
    pub offset: i64,
}

impl Default for MatchQuery {
    fn default() -> Self {
        Self {
            character: None,
            opponent: None,
            stage: None,
            result: None,
            order_by: "date".to_string(),
            ascending: false,
            limit: 20,
            offset: 0,
        }
    }
}

/// Sort keys accepted by `--order-by`, mapped to their columns.
const ORDER_COLUMNS: [(&str, &str); 5] = [
    ("date", "start_date"),
    ("duration", "duration"),
    ("stocks", "stocks_taken"),
    ("opk", "openings_per_kill"),
    ("id", "id"),
];

fn order_column(key: &str) -> Result<&'static str> {
    match ORDER_COLUMNS.iter().find(|(k, _)| k.eq_ignore_ascii_case(key)) {
        Some((_, column)) => Ok(column),
        None => bail!(
            "Unknown sort key: '{}'. Use date, duration, stocks, opk, or id.",
            key
        ),
    }
}

/// Stored ids are strings; names are resolved to their id first.
fn id_filter(value: &str, lookup: fn(&str) -> Option<usize>) -> String {
    lookup(value).map_or_else(|| value.trim().to_string(), |id| id.to_string())
}

pub async fn list_matches(pool: &SqlitePool, query: &MatchQuery) -> Result<Vec<MatchRecord>> {
    if query.limit < 0 || query.offset < 0 {
        bail!("limit and offset must be >= 0");
    }
    let column = order_column(&query.order_by)?;
    let direction = if query.ascending { "ASC" } else { "DESC" };

    let mut conditions = Vec::new();
    let mut binds = Vec::new();
    if let Some(c) = &query.character {
        conditions.push("character = ?");
        binds.push(id_filter(c, character_id));
    }
    if let Some(o) = &query.opponent {
        conditions.push("opponent = ?");
        binds.push(id_filter(o, character_id));
    }
    if let Some(s) = &query.stage {
        conditions.push("stage = ?");
        binds.push(id_filter(s, stage_id));
    }
    if let Some(r) = query.result {
        conditions.push("win_loss = ?");
        binds.push(r.as_str().to_string());
    }

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };
    // NULL dates sort last in either direction; id breaks ties.
    let sql = format!(
        "SELECT {} FROM matches {} ORDER BY {} IS NULL, {} {}, id {} LIMIT ? OFFSET ?",
        MATCH_COLUMNS, where_clause, column, column, direction, direction
    );

    let mut q = sqlx::query(&sql);
    for value in &binds {
        q = q.bind(value);
    }
    let rows = q
        .bind(query.limit)
        .bind(query.offset)
        .fetch_all(pool)
        .await?;
    rows.iter().map(match_from_row).collect()
}

fn opk_display(opk: f64) -> String {
    if opk > 0.0 {
        format!("{:.2}", opk)
    } else {
        "N/A".to_string()
    }
}

fn date_display(record: &MatchRecord) -> String {
    record
        .start_date
        .as_deref()
        .and_then(|d| chrono::DateTime::parse_from_rfc3339(d).ok())
        .map_or_else(|| "-".to_string(), |dt| dt.format("%Y-%m-%d %H:%M").to_string())
}

pub async fn run_matches(config: &Config, query: &MatchQuery) -> Result<()> {
    let ctx = AppContext::open(config).await?;
    let records = list_matches(ctx.store.pool(), query).await;
    ctx.close().await;
    let records = records?;

    if records.is_empty() {
        println!("No matches.");
        return Ok(());
    }

    for m in &records {
        println!(
            "#{:<5} {:<16}  {} vs {}  {}  {}  stocks {}  opk {}  {}",
            m.id,
            date_display(m),
            character_name(m.character.as_deref()),
            character_name(m.opponent.as_deref()),
            stage_name(m.stage.as_deref()),
            m.win_loss,
            m.stocks_taken,
            opk_display(m.openings_per_kill),
            format_duration(m.duration.clamp(0, i64::from(u32::MAX)) as u32),
        );
    }
    Ok(())
}

pub async fn run_show(config: &Config, id: i64) -> Result<()> {
    let ctx = AppContext::open(config).await?;
    let record = ctx.store.get_match(id).await;
    let notes = list_notes(ctx.store.pool(), Some(id)).await;
    ctx.close().await;

    let Some(m) = record? else {
        bail!("match not found: {}", id);
    };
    let notes = notes?;

    println!("--- Game #{} ---", m.id);
    println!("file:         {}", m.file_name);
    println!("date:         {}", m.start_date.as_deref().unwrap_or("-"));
    println!("character:    {}", character_name(m.character.as_deref()));
    println!("opponent:     {}", character_name(m.opponent.as_deref()));
    println!("stage:        {}", stage_name(m.stage.as_deref()));
    println!(
        "duration:     {} ({} frames)",
        format_duration(m.duration.clamp(0, i64::from(u32::MAX)) as u32),
        m.duration
    );
    println!("stocks taken: {}", m.stocks_taken);
    println!("opk:          {}", opk_display(m.openings_per_kill));
    println!("result:       {}", m.win_loss);
    println!("hash:         {}", m.content_hash);
    println!();

    if notes.is_empty() {
        println!("No notes.");
    } else {
        println!("--- Notes ({}) ---", notes.len());
        for note in &notes {
            print_note(note);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate::create_schema;
    use crate::sqlite_store::SqliteStore;
    use midset_core::models::NewMatchRecord;
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
    use std::str::FromStr;
    use tempfile::TempDir;

    async fn seeded(tmp: &TempDir) -> SqliteStore {
        let path = tmp.path().join("m.sqlite");
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .unwrap()
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .unwrap();
        create_schema(&pool, false).await.unwrap();
        let store = SqliteStore::new(pool);

        let rows = [
            ("a.slp", Some("2024-01-01T10:00:00.000Z"), "2", "9", "31", WinLoss::Win, 2.0),
            ("b.slp", Some("2024-03-01T10:00:00.000Z"), "2", "20", "32", WinLoss::Loss, 4.0),
            ("c.slp", None, "9", "2", "31", WinLoss::Win, 1.5),
        ];
        for (i, (file, date, character, opponent, stage, result, opk)) in rows.iter().enumerate() {
            store
                .insert_match(&NewMatchRecord {
                    file_name: file.to_string(),
                    start_date: date.map(str::to_string),
                    character: Some(character.to_string()),
                    opponent: Some(opponent.to_string()),
                    stage: Some(stage.to_string()),
                    duration: 3600 * (i as i64 + 1),
                    stocks_taken: 2,
                    openings_per_kill: *opk,
                    win_loss: *result,
                    content_hash: "h".to_string(),
                    file_mtime: i as i64,
                })
                .await
                .unwrap();
        }
        store
    }

    fn files(records: &[MatchRecord]) -> Vec<&str> {
        records.iter().map(|m| m.file_name.as_str()).collect()
    }

    #[tokio::test]
    async fn test_default_order_is_newest_first_nulls_last() {
        let tmp = TempDir::new().unwrap();
        let store = seeded(&tmp).await;
        let all = list_matches(store.pool(), &MatchQuery::default()).await.unwrap();
        assert_eq!(files(&all), vec!["b.slp", "a.slp", "c.slp"]);
    }

    #[tokio::test]
    async fn test_filters_accept_names_and_ids() {
        let tmp = TempDir::new().unwrap();
        let store = seeded(&tmp).await;
        let query = MatchQuery {
            character: Some("Fox".to_string()),
            stage: Some("31".to_string()),
            ..MatchQuery::default()
        };
        let got = list_matches(store.pool(), &query).await.unwrap();
        assert_eq!(files(&got), vec!["a.slp"]);

        let query = MatchQuery {
            result: Some(WinLoss::Win),
            order_by: "opk".to_string(),
            ascending: true,
            ..MatchQuery::default()
        };
        let got = list_matches(store.pool(), &query).await.unwrap();
        assert_eq!(files(&got), vec!["c.slp", "a.slp"]);
    }

    #[tokio::test]
    async fn test_limit_offset_and_bad_sort_key() {
        let tmp = TempDir::new().unwrap();
        let store = seeded(&tmp).await;
        let query = MatchQuery {
            order_by: "id".to_string(),
            ascending: true,
            limit: 1,
            offset: 1,
            ..MatchQuery::default()
        };
        let got = list_matches(store.pool(), &query).await.unwrap();
        assert_eq!(files(&got), vec!["b.slp"]);

        let bad = MatchQuery {
            order_by: "file_name; DROP TABLE matches".to_string(),
            ..MatchQuery::default()
        };
        assert!(list_matches(store.pool(), &bad).await.is_err());
    }
}
