//! Raw event stream of a replay: command bytes, the payload-size table,
//! and field extraction for the events the decoder cares about.
//!
//! All multi-byte fields are big-endian. Offsets below count the command
//! byte as offset `0x0`, matching the published format documentation.

use super::DecodeError;

pub(crate) const CMD_EVENT_PAYLOADS: u8 = 0x35;
pub(crate) const CMD_GAME_START: u8 = 0x36;
pub(crate) const CMD_POST_FRAME: u8 = 0x38;
pub(crate) const CMD_GAME_END: u8 = 0x39;

/// Highest major format version this decoder understands.
pub const SUPPORTED_MAJOR_VERSION: u8 = 3;

/// Port slot type marking an unused controller port.
pub(crate) const PLAYER_TYPE_EMPTY: u8 = 3;

const GAME_START_STAGE: usize = 0x13;
const GAME_START_IS_TEAMS: usize = 0x0D;
const GAME_START_PLAYER_BASE: usize = 0x65;
const GAME_START_PLAYER_STRIDE: usize = 0x24;
/// Smallest Game Start payload (including the command byte) that still
/// carries all four player slots.
pub(crate) const GAME_START_MIN_LEN: usize = GAME_START_PLAYER_BASE + 3 * GAME_START_PLAYER_STRIDE + 3;

/// Smallest Post-frame payload (including the command byte) that still
/// carries stocks remaining.
pub(crate) const POST_FRAME_MIN_LEN: usize = 0x22;

#[derive(Debug, Clone, Copy)]
pub(crate) struct GameStartEvent {
    pub version: [u8; 3],
    pub stage_id: u16,
    pub is_teams: bool,
    /// `(character_id, player_type, start_stocks)` per port 0..4.
    pub slots: [(u8, u8, u8); 4],
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct PostFrameEvent {
    pub frame: i32,
    pub port_index: u8,
    pub is_follower: bool,
    pub action_state: u16,
    pub percent: f32,
    pub last_hit_by: u8,
    pub stocks_remaining: u8,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct GameEndEvent {
    pub method: u8,
    pub lras_initiator: Option<i8>,
}

pub(crate) enum Event {
    GameStart(GameStartEvent),
    PostFrame(PostFrameEvent),
    GameEnd(GameEndEvent),
    Other,
}

/// Sequential reader over the raw event stream.
pub(crate) struct EventStream<'a> {
    raw: &'a [u8],
    pos: usize,
    /// Payload length (excluding the command byte) per command.
    sizes: [Option<u16>; 256],
}

impl<'a> EventStream<'a> {
    /// Read the Event Payloads table that must open the stream.
    pub(crate) fn new(raw: &'a [u8]) -> Result<Self, DecodeError> {
        let command = *raw.first().ok_or(DecodeError::Truncated { offset: 0 })?;
        if command != CMD_EVENT_PAYLOADS {
            return Err(DecodeError::Malformed(format!(
                "raw stream starts with 0x{:02x}, expected event payloads",
                command
            )));
        }
        let info_size = *raw.get(1).ok_or(DecodeError::Truncated { offset: 1 })? as usize;
        if info_size == 0 {
            return Err(DecodeError::Malformed("empty event payloads table".to_string()));
        }
        let table = raw
            .get(2..1 + info_size)
            .ok_or(DecodeError::Truncated { offset: 2 })?;

        let mut sizes = [None; 256];
        sizes[CMD_EVENT_PAYLOADS as usize] = Some(info_size as u16);
        for entry in table.chunks_exact(3) {
            sizes[entry[0] as usize] = Some(u16::from_be_bytes([entry[1], entry[2]]));
        }

        Ok(Self {
            raw,
            pos: 1 + info_size,
            sizes,
        })
    }

    /// Next event, or `None` at the end of the stream.
    pub(crate) fn next_event(&mut self) -> Result<Option<Event>, DecodeError> {
        let Some(&command) = self.raw.get(self.pos) else {
            return Ok(None);
        };
        let size = self.sizes[command as usize].ok_or(DecodeError::UnknownCommand {
            command,
            offset: self.pos,
        })? as usize;
        let payload = self
            .raw
            .get(self.pos..self.pos + 1 + size)
            .ok_or(DecodeError::Truncated { offset: self.pos })?;
        let offset = self.pos;
        self.pos += 1 + size;

        let event = match command {
            CMD_GAME_START => Event::GameStart(parse_game_start(payload, offset)?),
            CMD_POST_FRAME => Event::PostFrame(parse_post_frame(payload, offset)?),
            CMD_GAME_END => Event::GameEnd(parse_game_end(payload, offset)?),
            // Pre-frame inputs, message splitters, items, and the rest.
            _ => Event::Other,
        };
        Ok(Some(event))
    }
}

fn parse_game_start(p: &[u8], offset: usize) -> Result<GameStartEvent, DecodeError> {
    if p.len() < GAME_START_MIN_LEN {
        return Err(DecodeError::Malformed(format!(
            "game start at byte {} is {} bytes, need {}",
            offset,
            p.len(),
            GAME_START_MIN_LEN
        )));
    }
    let mut slots = [(0u8, 0u8, 0u8); 4];
    for (i, slot) in slots.iter_mut().enumerate() {
        let base = GAME_START_PLAYER_BASE + GAME_START_PLAYER_STRIDE * i;
        *slot = (p[base], p[base + 1], p[base + 2]);
    }
    Ok(GameStartEvent {
        version: [p[1], p[2], p[3]],
        stage_id: u16::from_be_bytes([p[GAME_START_STAGE], p[GAME_START_STAGE + 1]]),
        is_teams: p[GAME_START_IS_TEAMS] != 0,
        slots,
    })
}

fn parse_post_frame(p: &[u8], offset: usize) -> Result<PostFrameEvent, DecodeError> {
    if p.len() < POST_FRAME_MIN_LEN {
        return Err(DecodeError::Malformed(format!(
            "post-frame update at byte {} is {} bytes, need {}",
            offset,
            p.len(),
            POST_FRAME_MIN_LEN
        )));
    }
    Ok(PostFrameEvent {
        frame: i32::from_be_bytes([p[0x1], p[0x2], p[0x3], p[0x4]]),
        port_index: p[0x5],
        is_follower: p[0x6] != 0,
        action_state: u16::from_be_bytes([p[0x8], p[0x9]]),
        percent: f32::from_be_bytes([p[0x16], p[0x17], p[0x18], p[0x19]]),
        last_hit_by: p[0x20],
        stocks_remaining: p[0x21],
    })
}

fn parse_game_end(p: &[u8], offset: usize) -> Result<GameEndEvent, DecodeError> {
    let method = *p.get(1).ok_or_else(|| {
        DecodeError::Malformed(format!("game end at byte {} has no end method", offset))
    })?;
    Ok(GameEndEvent {
        method,
        // -1 when nobody quit out.
        lras_initiator: p.get(2).map(|&b| b as i8).filter(|&v| v >= 0),
    })
}
