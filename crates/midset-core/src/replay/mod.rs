//! Replay decoding.
//!
//! A replay file is a UBJSON document holding a `raw` byte array of game
//! events followed by a `metadata` object. [`decode`] walks the event
//! stream once, collects match settings and per-frame post-state, then runs
//! the embedded analyzer to fill in [`SummaryStats`].
//!
//! Decoding fails only for structurally invalid input. A game with no kills,
//! no conversions, or no metadata block still decodes.

mod analysis;
mod events;
#[cfg(any(test, feature = "fixtures"))]
pub mod fixture;
mod ubjson;

use serde::Serialize;
use serde_json::Value;
use std::fmt;
use thiserror::Error;

pub use analysis::CONVERSION_RESET_FRAMES;
pub use events::SUPPORTED_MAJOR_VERSION;
pub use ubjson::UbjsonError;

use events::{Event, EventStream, GameStartEvent, PostFrameEvent, PLAYER_TYPE_EMPTY};

/// `{"raw":[$U#l`: the fixed container prefix, followed by a u32 length.
const HEADER: &[u8] = b"{U\x03raw[$U#l";
const HEADER_LEN: usize = HEADER.len() + 4;
const METADATA_KEY: &[u8] = b"U\x08metadata";

/// Frame number of the first frame of a game.
pub const FIRST_FRAME: i32 = -123;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("not a replay file: bad header")]
    BadHeader,
    #[error("replay truncated at byte {offset}")]
    Truncated { offset: usize },
    #[error("unsupported replay version {0}")]
    UnsupportedVersion(FormatVersion),
    #[error("replay has no game start event")]
    MissingGameStart,
    #[error("unknown event command 0x{command:02x} at byte {offset}")]
    UnknownCommand { command: u8, offset: usize },
    #[error("malformed replay: {0}")]
    Malformed(String),
    #[error("unreadable replay metadata: {0}")]
    Metadata(#[from] UbjsonError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct FormatVersion {
    pub major: u8,
    pub minor: u8,
    pub build: u8,
}

impl fmt::Display for FormatVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.build)
    }
}

/// A raw number or a ratio, as the analyzer may report either.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NumericOrRatio {
    Direct(f64),
    Ratio { num: f64, den: f64 },
}

impl NumericOrRatio {
    /// The plain value, or `None` when it is not a finite number.
    pub fn resolve(self) -> Option<f64> {
        let v = match self {
            NumericOrRatio::Direct(v) => v,
            NumericOrRatio::Ratio { num, den } => num / den,
        };
        v.is_finite().then_some(v)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayerSettings {
    /// Controller port, 1-based.
    pub port: u8,
    pub character_id: u8,
    pub player_type: u8,
    pub start_stocks: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchSettings {
    pub version: FormatVersion,
    pub stage_id: u16,
    pub is_teams: bool,
    /// Occupied ports in port order. A player's index is its position here.
    pub players: Vec<PlayerSettings>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayerFrame {
    pub stocks_remaining: Option<u8>,
    pub percent: f32,
    pub action_state: u16,
    /// Player index of the last attacker, when it maps to a player.
    pub last_hit_by: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub index: i32,
    /// Post-state per player index; `None` until that player's update arrives.
    pub players: Vec<Option<PlayerFrame>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Conversion {
    /// The attacking player.
    pub player_index: usize,
    pub victim_index: usize,
    pub start_frame: i32,
    pub end_frame: Option<i32>,
    pub start_percent: f32,
    pub end_percent: f32,
    pub did_kill: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayerStats {
    pub player_index: usize,
    pub kill_count: Option<f64>,
    pub conversion_count: Option<f64>,
    pub openings_per_kill: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GameEnd {
    pub method: u8,
    pub lras_initiator: Option<i8>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SummaryStats {
    pub last_frame: Option<f64>,
    pub overall: Vec<PlayerStats>,
    pub conversions: Vec<Conversion>,
    pub game_end: Option<GameEnd>,
}

impl SummaryStats {
    pub fn player(&self, index: usize) -> Option<&PlayerStats> {
        self.overall.iter().find(|p| p.player_index == index)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionMetadata {
    pub start_at: Option<String>,
    pub last_frame: Option<i64>,
    pub played_on: Option<String>,
    pub console_nick: Option<String>,
}

impl SessionMetadata {
    fn from_value(value: &Value) -> Self {
        let text = |key: &str| value.get(key).and_then(Value::as_str).map(str::to_string);
        Self {
            start_at: text("startAt"),
            last_frame: value.get("lastFrame").and_then(Value::as_i64),
            played_on: text("playedOn"),
            console_nick: text("consoleNick"),
        }
    }
}

/// Everything decoded from one replay buffer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawSession {
    pub settings: MatchSettings,
    #[serde(skip)]
    pub frames: Vec<Frame>,
    pub frame_count: usize,
    pub stats: SummaryStats,
    pub metadata: Option<SessionMetadata>,
}

impl RawSession {
    /// The frame with game frame number `index`.
    pub fn frame(&self, index: i32) -> Option<&Frame> {
        self.frames
            .binary_search_by_key(&index, |f| f.index)
            .ok()
            .map(|i| &self.frames[i])
    }
}

/// Decode a replay buffer into a [`RawSession`].
pub fn decode(bytes: &[u8]) -> Result<RawSession, DecodeError> {
    let (raw, rest) = split_container(bytes)?;

    let mut stream = EventStream::new(raw)?;
    let mut start: Option<(MatchSettings, [Option<usize>; 4])> = None;
    let mut frames: Vec<Frame> = Vec::new();
    let mut game_end = None;

    while let Some(event) = stream.next_event()? {
        match event {
            Event::GameStart(gs) => {
                if start.is_none() {
                    start = Some(match_settings(&gs)?);
                }
            }
            Event::PostFrame(pf) => {
                let (settings, ports) = start.as_ref().ok_or(DecodeError::MissingGameStart)?;
                if !pf.is_follower {
                    record_post_frame(&mut frames, settings.players.len(), ports, &pf)?;
                }
            }
            Event::GameEnd(ge) => {
                game_end = Some(GameEnd {
                    method: ge.method,
                    lras_initiator: ge.lras_initiator,
                });
            }
            Event::Other => {}
        }
    }

    let (settings, _) = start.ok_or(DecodeError::MissingGameStart)?;
    let metadata = match rest {
        Some(rest) => parse_metadata(rest)?,
        None => None,
    };

    let analysis = analysis::analyze(settings.players.len(), &frames);
    let last_frame = frames
        .last()
        .map(|f| f64::from(f.index))
        .or_else(|| metadata.as_ref().and_then(|m| m.last_frame).map(|v| v as f64));

    tracing::debug!(
        version = %settings.version,
        players = settings.players.len(),
        frames = frames.len(),
        "decoded replay"
    );

    Ok(RawSession {
        settings,
        frame_count: frames.len(),
        frames,
        stats: SummaryStats {
            last_frame,
            overall: analysis.overall,
            conversions: analysis.conversions,
            game_end,
        },
        metadata,
    })
}

/// Split the container into the raw event bytes and whatever follows them.
/// The tail is `None` for an in-progress file (declared raw length 0).
fn split_container(bytes: &[u8]) -> Result<(&[u8], Option<&[u8]>), DecodeError> {
    if bytes.len() < HEADER.len() {
        return if HEADER.starts_with(bytes) && !bytes.is_empty() {
            Err(DecodeError::Truncated {
                offset: bytes.len(),
            })
        } else {
            Err(DecodeError::BadHeader)
        };
    }
    if &bytes[..HEADER.len()] != HEADER {
        return Err(DecodeError::BadHeader);
    }
    let len_bytes = bytes
        .get(HEADER.len()..HEADER_LEN)
        .ok_or(DecodeError::Truncated {
            offset: bytes.len(),
        })?;
    let raw_len = u32::from_be_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]]) as usize;

    if raw_len == 0 {
        return Ok((&bytes[HEADER_LEN..], None));
    }
    let raw_end = HEADER_LEN + raw_len;
    let raw = bytes
        .get(HEADER_LEN..raw_end)
        .ok_or(DecodeError::Truncated {
            offset: bytes.len(),
        })?;
    Ok((raw, Some(&bytes[raw_end..])))
}

fn parse_metadata(rest: &[u8]) -> Result<Option<SessionMetadata>, DecodeError> {
    let mut reader = ubjson::Reader::new(rest);
    if reader.is_at_end() || reader.eat(b'}') {
        return Ok(None);
    }
    reader.expect_bytes(METADATA_KEY)?;
    let value = reader.value()?;
    Ok(Some(SessionMetadata::from_value(&value)))
}

fn match_settings(gs: &GameStartEvent) -> Result<(MatchSettings, [Option<usize>; 4]), DecodeError> {
    let [major, minor, build] = gs.version;
    let version = FormatVersion { major, minor, build };
    if major > SUPPORTED_MAJOR_VERSION {
        return Err(DecodeError::UnsupportedVersion(version));
    }

    let mut ports = [None; 4];
    let mut players = Vec::new();
    for (port, &(character_id, player_type, start_stocks)) in gs.slots.iter().enumerate() {
        if player_type == PLAYER_TYPE_EMPTY {
            continue;
        }
        ports[port] = Some(players.len());
        players.push(PlayerSettings {
            port: port as u8 + 1,
            character_id,
            player_type,
            start_stocks,
        });
    }

    Ok((
        MatchSettings {
            version,
            stage_id: gs.stage_id,
            is_teams: gs.is_teams,
            players,
        },
        ports,
    ))
}

/// Slot a post-frame update into the frame list, keeping frame numbers
/// strictly increasing. A repeated frame number (rollback) overwrites.
fn record_post_frame(
    frames: &mut Vec<Frame>,
    player_count: usize,
    ports: &[Option<usize>; 4],
    pf: &PostFrameEvent,
) -> Result<(), DecodeError> {
    let player = ports
        .get(pf.port_index as usize)
        .copied()
        .flatten()
        .ok_or_else(|| {
            DecodeError::Malformed(format!(
                "post-frame update for unused port {} at frame {}",
                pf.port_index, pf.frame
            ))
        })?;

    let slot = match frames.last() {
        Some(last) if last.index == pf.frame => frames.len() - 1,
        Some(last) if last.index > pf.frame => {
            match frames.binary_search_by_key(&pf.frame, |f| f.index) {
                Ok(i) => i,
                Err(i) => {
                    frames.insert(i, empty_frame(pf.frame, player_count));
                    i
                }
            }
        }
        _ => {
            frames.push(empty_frame(pf.frame, player_count));
            frames.len() - 1
        }
    };

    frames[slot].players[player] = Some(PlayerFrame {
        stocks_remaining: Some(pf.stocks_remaining),
        percent: pf.percent,
        action_state: pf.action_state,
        last_hit_by: ports.get(pf.last_hit_by as usize).copied().flatten(),
    });
    Ok(())
}

fn empty_frame(index: i32, player_count: usize) -> Frame {
    Frame {
        index,
        players: vec![None; player_count],
    }
}

#[cfg(test)]
mod tests {
    use super::fixture::{FrameState, ReplayBuilder};
    use super::*;

    fn one_vs_one() -> ReplayBuilder {
        ReplayBuilder::new().player(0, 2, 4).player(1, 9, 4).stage(31)
    }

    #[test]
    fn test_decode_settings_and_metadata() {
        let bytes = one_vs_one()
            .post_frame(FIRST_FRAME, 0, FrameState::idle(4))
            .post_frame(FIRST_FRAME, 1, FrameState::idle(4))
            .start_at("2024-01-31T18:05:00Z")
            .played_on("dolphin")
            .build();
        let session = decode(&bytes).unwrap();

        assert_eq!(session.settings.stage_id, 31);
        assert_eq!(session.settings.players.len(), 2);
        assert_eq!(session.settings.players[0].character_id, 2);
        assert_eq!(session.settings.players[0].port, 1);
        assert_eq!(session.settings.players[1].character_id, 9);
        assert_eq!(session.settings.version.major, 3);
        assert_eq!(session.frames.len(), 1);
        assert_eq!(session.stats.last_frame, Some(f64::from(FIRST_FRAME)));

        let meta = session.metadata.unwrap();
        assert_eq!(meta.start_at.as_deref(), Some("2024-01-31T18:05:00Z"));
        assert_eq!(meta.played_on.as_deref(), Some("dolphin"));
    }

    #[test]
    fn test_empty_ports_are_skipped() {
        let bytes = ReplayBuilder::new()
            .player(1, 20, 4)
            .player(3, 2, 4)
            .post_frame(0, 3, FrameState::idle(4))
            .build();
        let session = decode(&bytes).unwrap();
        let ports: Vec<u8> = session.settings.players.iter().map(|p| p.port).collect();
        assert_eq!(ports, vec![2, 4]);
        assert!(session.frames[0].players[0].is_none());
        assert!(session.frames[0].players[1].is_some());
    }

    #[test]
    fn test_frames_are_monotonic_and_last_frame_matches() {
        let bytes = one_vs_one().exchanges(2, 1).build();
        let session = decode(&bytes).unwrap();
        assert!(session.frames.windows(2).all(|w| w[0].index < w[1].index));
        let last = session.frames.last().unwrap().index;
        assert_eq!(session.stats.last_frame, Some(f64::from(last)));
        assert_eq!(session.metadata.unwrap().last_frame, Some(i64::from(last)));
    }

    #[test]
    fn test_rollback_overwrites_frame() {
        let bytes = one_vs_one()
            .post_frame(10, 0, FrameState::idle(4))
            .post_frame(11, 0, FrameState::idle(4))
            .post_frame(10, 0, FrameState::idle(3))
            .build();
        let session = decode(&bytes).unwrap();
        assert_eq!(session.frames.len(), 2);
        let f10 = session.frame(10).unwrap();
        assert_eq!(f10.players[0].unwrap().stocks_remaining, Some(3));
    }

    #[test]
    fn test_followers_are_ignored() {
        let bytes = one_vs_one()
            .post_frame(0, 0, FrameState::idle(4))
            .follower_frame(0, 0, FrameState::idle(1))
            .build();
        let session = decode(&bytes).unwrap();
        assert_eq!(session.frames[0].players[0].unwrap().stocks_remaining, Some(4));
    }

    #[test]
    fn test_embedded_stats_count_kills_and_conversions() {
        let bytes = one_vs_one().exchanges(3, 1).build();
        let stats = decode(&bytes).unwrap().stats;
        let p0 = stats.player(0).unwrap();
        let p1 = stats.player(1).unwrap();
        assert_eq!(p0.kill_count, Some(3.0));
        assert_eq!(p1.kill_count, Some(1.0));
        assert_eq!(p0.conversion_count, Some(3.0));
        assert_eq!(p0.openings_per_kill, Some(1.0));
        assert!(stats.conversions.iter().all(|c| c.did_kill));
    }

    #[test]
    fn test_game_end_is_recorded() {
        let bytes = one_vs_one().exchanges(4, 0).game_end(2, None).build();
        let end = decode(&bytes).unwrap().stats.game_end.unwrap();
        assert_eq!(end.method, 2);
        assert_eq!(end.lras_initiator, None);
    }

    #[test]
    fn test_in_progress_file_has_no_metadata() {
        let bytes = one_vs_one()
            .post_frame(0, 0, FrameState::idle(4))
            .in_progress()
            .build();
        let session = decode(&bytes).unwrap();
        assert!(session.metadata.is_none());
        assert_eq!(session.frames.len(), 1);
    }

    #[test]
    fn test_missing_metadata_block_is_not_an_error() {
        let bytes = one_vs_one()
            .post_frame(0, 0, FrameState::idle(4))
            .without_metadata()
            .build();
        let session = decode(&bytes).unwrap();
        assert!(session.metadata.is_none());
    }

    #[test]
    fn test_oversized_metadata_array_is_rejected() {
        let mut bytes = one_vs_one()
            .post_frame(0, 0, FrameState::idle(4))
            .without_metadata()
            .build();
        bytes.pop();
        bytes.extend_from_slice(METADATA_KEY);
        bytes.extend_from_slice(b"{U\x01x[$Z#l");
        bytes.extend_from_slice(&5_000_000i32.to_be_bytes());
        bytes.extend_from_slice(b"}}");
        assert!(matches!(decode(&bytes), Err(DecodeError::Metadata(_))));
    }

    #[test]
    fn test_bad_header() {
        assert!(matches!(decode(b"not a replay at all"), Err(DecodeError::BadHeader)));
        assert!(matches!(decode(b""), Err(DecodeError::BadHeader)));
    }

    #[test]
    fn test_truncated_raw_stream() {
        let bytes = one_vs_one().exchanges(1, 0).build();
        let cut = &bytes[..bytes.len() / 2];
        assert!(matches!(decode(cut), Err(DecodeError::Truncated { .. })));
        assert!(matches!(
            decode(&bytes[..HEADER.len() + 2]),
            Err(DecodeError::Truncated { .. })
        ));
    }

    #[test]
    fn test_unsupported_version() {
        let bytes = one_vs_one().version(4, 0, 0).build();
        match decode(&bytes) {
            Err(DecodeError::UnsupportedVersion(v)) => assert_eq!(v.to_string(), "4.0.0"),
            other => panic!("expected UnsupportedVersion, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_game_start() {
        let bytes = one_vs_one().omit_game_start().build();
        assert!(matches!(decode(&bytes), Err(DecodeError::MissingGameStart)));
    }

    #[test]
    fn test_unknown_command() {
        let bytes = one_vs_one().undeclared_event(0x99, vec![0; 4]).build();
        assert!(matches!(
            decode(&bytes),
            Err(DecodeError::UnknownCommand { command: 0x99, .. })
        ));
    }

    #[test]
    fn test_declared_unknown_events_are_skipped() {
        let bytes = one_vs_one()
            .declared_event(0x10, vec![0xAA; 16])
            .post_frame(0, 0, FrameState::idle(4))
            .build();
        assert_eq!(decode(&bytes).unwrap().frames.len(), 1);
    }

    #[test]
    fn test_post_frame_for_unused_port_is_malformed() {
        let bytes = one_vs_one().post_frame(0, 2, FrameState::idle(4)).build();
        assert!(matches!(decode(&bytes), Err(DecodeError::Malformed(_))));
    }

    #[test]
    fn test_ratio_resolution() {
        assert_eq!(NumericOrRatio::Direct(2.5).resolve(), Some(2.5));
        assert_eq!(NumericOrRatio::Ratio { num: 6.0, den: 3.0 }.resolve(), Some(2.0));
        assert_eq!(NumericOrRatio::Ratio { num: 6.0, den: 0.0 }.resolve(), None);
        assert_eq!(NumericOrRatio::Direct(f64::NAN).resolve(), None);
    }
}
