//! Synthetic replay builder for tests.
//!
//! Produces byte buffers in the same container and event layout that
//! [`decode`](super::decode) reads, so tests in this crate and in the
//! application crate can exercise the full pipeline without binary assets.

use super::events::{CMD_EVENT_PAYLOADS, CMD_GAME_END, CMD_GAME_START, CMD_POST_FRAME, PLAYER_TYPE_EMPTY};
use super::{FIRST_FRAME, HEADER, METADATA_KEY};

const GAME_START_PAYLOAD: u16 = 0x140;
const POST_FRAME_PAYLOAD: u16 = 0x33;
const GAME_END_PAYLOAD: u16 = 2;

/// Action state used for a player standing still.
pub const ACTION_IDLE: u16 = 0x0E;
/// Action state used for a player in hitstun.
pub const ACTION_DAMAGED: u16 = 0x4B;

/// Frames of neutral play inserted after each kill by [`ReplayBuilder::exchanges`].
const NEUTRAL_FRAMES: i32 = 60;

/// One player's post-frame state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameState {
    pub stocks: u8,
    pub percent: f32,
    pub action_state: u16,
    /// Port (0-based) of the last attacker; 6 means none.
    pub last_hit_by: u8,
}

impl FrameState {
    pub fn idle(stocks: u8) -> Self {
        Self {
            stocks,
            percent: 0.0,
            action_state: ACTION_IDLE,
            last_hit_by: 6,
        }
    }

    pub fn hit(stocks: u8, percent: f32, by_port: u8) -> Self {
        Self {
            stocks,
            percent,
            action_state: ACTION_DAMAGED,
            last_hit_by: by_port,
        }
    }
}

enum MetaValue {
    Text(String),
    Int(i32),
}

pub struct ReplayBuilder {
    version: [u8; 3],
    stage: u16,
    /// `(character, start stocks)` per port.
    slots: [Option<(u8, u8)>; 4],
    game_start: bool,
    declared: Vec<(u8, u16)>,
    events: Vec<Vec<u8>>,
    metadata: Option<Vec<(String, MetaValue)>>,
    in_progress: bool,
    last_frame: Option<i32>,
    stocks: [u8; 4],
}

impl Default for ReplayBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplayBuilder {
    pub fn new() -> Self {
        Self {
            version: [3, 12, 0],
            stage: 31,
            slots: [None; 4],
            game_start: true,
            declared: Vec::new(),
            events: Vec::new(),
            metadata: Some(Vec::new()),
            in_progress: false,
            last_frame: None,
            stocks: [0; 4],
        }
    }

    pub fn version(mut self, major: u8, minor: u8, build: u8) -> Self {
        self.version = [major, minor, build];
        self
    }

    pub fn stage(mut self, stage: u16) -> Self {
        self.stage = stage;
        self
    }

    /// Occupy `port` (0-based) with `character`.
    pub fn player(mut self, port: u8, character: u8, stocks: u8) -> Self {
        self.slots[port as usize] = Some((character, stocks));
        self.stocks[port as usize] = stocks;
        self
    }

    pub fn post_frame(self, frame: i32, port: u8, state: FrameState) -> Self {
        self.push_post_frame(frame, port, false, state)
    }

    pub fn follower_frame(self, frame: i32, port: u8, state: FrameState) -> Self {
        self.push_post_frame(frame, port, true, state)
    }

    /// Append a scripted 1v1 between the first two occupied ports: the
    /// first player takes `first_kills` stocks, then the second player
    /// takes `second_kills`. Each kill is one hit followed by a stock loss
    /// and a stretch of neutral frames.
    pub fn exchanges(mut self, first_kills: u8, second_kills: u8) -> Self {
        let ports: Vec<u8> = (0..4u8).filter(|&p| self.slots[p as usize].is_some()).collect();
        let (a, b) = match ports.as_slice() {
            [a, b, ..] => (*a, *b),
            _ => return self,
        };
        let mut frame = self.last_frame.map_or(FIRST_FRAME, |f| f + 1);
        self = self.neutral(frame, a, b);
        frame += 1;
        for (attacker, victim, kills) in [(a, b, first_kills), (b, a, second_kills)] {
            for _ in 0..kills {
                let stocks = self.stocks[victim as usize];
                let attacker_state = FrameState::idle(self.stocks[attacker as usize]);
                self = self
                    .post_frame(frame, attacker, attacker_state)
                    .post_frame(frame, victim, FrameState::hit(stocks, 120.0, attacker));
                frame += 1;

                let remaining = stocks.saturating_sub(1);
                self.stocks[victim as usize] = remaining;
                self = self
                    .post_frame(frame, attacker, attacker_state)
                    .post_frame(
                        frame,
                        victim,
                        FrameState {
                            last_hit_by: attacker,
                            ..FrameState::idle(remaining)
                        },
                    );
                frame += 1;

                for _ in 0..NEUTRAL_FRAMES {
                    self = self.neutral(frame, a, b);
                    frame += 1;
                }
            }
        }
        self
    }

    fn neutral(self, frame: i32, a: u8, b: u8) -> Self {
        let (sa, sb) = (self.stocks[a as usize], self.stocks[b as usize]);
        self.post_frame(frame, a, FrameState::idle(sa))
            .post_frame(frame, b, FrameState::idle(sb))
    }

    pub fn game_end(mut self, method: u8, lras_initiator: Option<i8>) -> Self {
        let mut payload = vec![CMD_GAME_END, method];
        payload.push(lras_initiator.map_or(0xFF, |v| v as u8));
        self.events.push(payload);
        self
    }

    /// An event for a command declared in the payload table.
    pub fn declared_event(mut self, command: u8, payload: Vec<u8>) -> Self {
        self.declared.push((command, payload.len() as u16));
        let mut event = vec![command];
        event.extend(payload);
        self.events.push(event);
        self
    }

    /// An event for a command missing from the payload table.
    pub fn undeclared_event(mut self, command: u8, payload: Vec<u8>) -> Self {
        let mut event = vec![command];
        event.extend(payload);
        self.events.push(event);
        self
    }

    pub fn omit_game_start(mut self) -> Self {
        self.game_start = false;
        self
    }

    pub fn start_at(self, value: &str) -> Self {
        self.meta("startAt", MetaValue::Text(value.to_string()))
    }

    pub fn played_on(self, value: &str) -> Self {
        self.meta("playedOn", MetaValue::Text(value.to_string()))
    }

    pub fn console_nick(self, value: &str) -> Self {
        self.meta("consoleNick", MetaValue::Text(value.to_string()))
    }

    fn meta(mut self, key: &str, value: MetaValue) -> Self {
        if let Some(meta) = self.metadata.as_mut() {
            meta.push((key.to_string(), value));
        }
        self
    }

    pub fn without_metadata(mut self) -> Self {
        self.metadata = None;
        self
    }

    /// Write the file as a console does mid-game: raw length 0, no metadata.
    pub fn in_progress(mut self) -> Self {
        self.in_progress = true;
        self.metadata = None;
        self
    }

    pub fn build(self) -> Vec<u8> {
        let raw = self.raw_stream();

        let mut out = HEADER.to_vec();
        let declared_len = if self.in_progress { 0 } else { raw.len() as u32 };
        out.extend_from_slice(&declared_len.to_be_bytes());
        out.extend_from_slice(&raw);
        if self.in_progress {
            return out;
        }

        if let Some(mut meta) = self.metadata {
            if let Some(last) = self.last_frame {
                if !meta.iter().any(|(k, _)| k == "lastFrame") {
                    meta.push(("lastFrame".to_string(), MetaValue::Int(last)));
                }
            }
            out.extend_from_slice(METADATA_KEY);
            out.push(b'{');
            for (key, value) in &meta {
                write_key(&mut out, key);
                match value {
                    MetaValue::Text(s) => {
                        out.push(b'S');
                        write_key(&mut out, s);
                    }
                    MetaValue::Int(v) => {
                        out.push(b'l');
                        out.extend_from_slice(&v.to_be_bytes());
                    }
                }
            }
            out.push(b'}');
        }
        out.push(b'}');
        out
    }

    fn raw_stream(&self) -> Vec<u8> {
        let mut table = vec![
            (CMD_GAME_START, GAME_START_PAYLOAD),
            (CMD_POST_FRAME, POST_FRAME_PAYLOAD),
            (CMD_GAME_END, GAME_END_PAYLOAD),
        ];
        table.extend(self.declared.iter().copied());

        let mut raw = vec![CMD_EVENT_PAYLOADS, (1 + 3 * table.len()) as u8];
        for (command, size) in &table {
            raw.push(*command);
            raw.extend_from_slice(&size.to_be_bytes());
        }
        if self.game_start {
            raw.extend(self.game_start_event());
        }
        for event in &self.events {
            raw.extend_from_slice(event);
        }
        raw
    }

    fn game_start_event(&self) -> Vec<u8> {
        let mut p = vec![0u8; 1 + GAME_START_PAYLOAD as usize];
        p[0] = CMD_GAME_START;
        p[1..4].copy_from_slice(&self.version);
        p[0x13..0x15].copy_from_slice(&self.stage.to_be_bytes());
        for (i, slot) in self.slots.iter().enumerate() {
            let base = 0x65 + 0x24 * i;
            match slot {
                Some((character, stocks)) => {
                    p[base] = *character;
                    p[base + 1] = 0;
                    p[base + 2] = *stocks;
                }
                None => p[base + 1] = PLAYER_TYPE_EMPTY,
            }
        }
        p
    }

    fn push_post_frame(mut self, frame: i32, port: u8, follower: bool, state: FrameState) -> Self {
        let mut p = vec![0u8; 1 + POST_FRAME_PAYLOAD as usize];
        p[0] = CMD_POST_FRAME;
        p[0x1..0x5].copy_from_slice(&frame.to_be_bytes());
        p[0x5] = port;
        p[0x6] = u8::from(follower);
        p[0x8..0xA].copy_from_slice(&state.action_state.to_be_bytes());
        p[0x16..0x1A].copy_from_slice(&state.percent.to_be_bytes());
        p[0x20] = state.last_hit_by;
        p[0x21] = state.stocks;
        self.events.push(p);
        self.last_frame = Some(self.last_frame.map_or(frame, |last| last.max(frame)));
        self
    }
}

fn write_key(out: &mut Vec<u8>, key: &str) {
    out.push(b'U');
    out.push(key.len() as u8);
    out.extend_from_slice(key.as_bytes());
}
