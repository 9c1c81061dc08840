//! Embedded statistics pass over decoded frames.
//!
//! Computes the per-player kill counts and the conversion (opening) list
//! carried in [`SummaryStats`](super::SummaryStats). This covers only the
//! metrics the product uses, not a full stats suite.

use super::{Conversion, Frame, NumericOrRatio, PlayerFrame, PlayerStats};

/// Frames a victim must spend out of hitstun/grabs before a conversion ends.
pub const CONVERSION_RESET_FRAMES: u32 = 45;

const DAMAGE_START: u16 = 0x4B;
const DAMAGE_END: u16 = 0x5B;
const CAPTURE_START: u16 = 0xDF;
const CAPTURE_END: u16 = 0xE8;

pub(crate) fn is_under_pressure(action_state: u16) -> bool {
    (DAMAGE_START..=DAMAGE_END).contains(&action_state)
        || (CAPTURE_START..=CAPTURE_END).contains(&action_state)
}

#[derive(Default)]
struct VictimState {
    prev_percent: Option<f32>,
    prev_stocks: Option<u8>,
    /// Index into the conversion list of the conversion against this player.
    active: Option<usize>,
    calm_frames: u32,
}

pub(crate) struct Analysis {
    pub overall: Vec<PlayerStats>,
    pub conversions: Vec<Conversion>,
}

/// Walk `frames` in order and attribute kills and conversions.
pub(crate) fn analyze(player_count: usize, frames: &[Frame]) -> Analysis {
    let mut kills = vec![0u32; player_count];
    let mut conversions: Vec<Conversion> = Vec::new();
    let mut states: Vec<VictimState> = (0..player_count).map(|_| VictimState::default()).collect();

    for frame in frames {
        for (victim, slot) in frame.players.iter().enumerate().take(player_count) {
            let Some(pf) = slot else { continue };
            let attacker = resolve_attacker(pf, victim, player_count);
            let state = &mut states[victim];

            let lost_stock = matches!(
                (state.prev_stocks, pf.stocks_remaining),
                (Some(prev), Some(now)) if now < prev
            );
            let took_damage = state.prev_percent.is_some_and(|prev| pf.percent > prev);

            if lost_stock {
                if let Some(killer) = attacker {
                    kills[killer] += 1;
                }
                if let Some(idx) = state.active.take() {
                    let conv = &mut conversions[idx];
                    conv.end_frame = Some(frame.index);
                    conv.end_percent = state.prev_percent.unwrap_or(conv.end_percent);
                    conv.did_kill = true;
                }
                state.calm_frames = 0;
            } else if took_damage || is_under_pressure(pf.action_state) {
                state.calm_frames = 0;
                match state.active {
                    Some(idx) => conversions[idx].end_percent = pf.percent,
                    None => {
                        if let Some(player_index) = attacker {
                            state.active = Some(conversions.len());
                            conversions.push(Conversion {
                                player_index,
                                victim_index: victim,
                                start_frame: frame.index,
                                end_frame: None,
                                start_percent: state.prev_percent.unwrap_or(0.0),
                                end_percent: pf.percent,
                                did_kill: false,
                            });
                        }
                    }
                }
            } else if let Some(idx) = state.active {
                state.calm_frames += 1;
                if state.calm_frames > CONVERSION_RESET_FRAMES {
                    conversions[idx].end_frame = Some(frame.index);
                    state.active = None;
                    state.calm_frames = 0;
                }
            }

            state.prev_percent = Some(pf.percent);
            if pf.stocks_remaining.is_some() {
                state.prev_stocks = pf.stocks_remaining;
            }
        }
    }

    let overall = (0..player_count)
        .map(|i| {
            let conversion_count = conversions.iter().filter(|c| c.player_index == i).count();
            PlayerStats {
                player_index: i,
                kill_count: Some(f64::from(kills[i])),
                conversion_count: Some(conversion_count as f64),
                openings_per_kill: NumericOrRatio::Ratio {
                    num: conversion_count as f64,
                    den: f64::from(kills[i]),
                }
                .resolve(),
            }
        })
        .collect();

    Analysis {
        overall,
        conversions,
    }
}

/// The player credited for damage to `victim`: the last-hit-by player when
/// it names someone else, otherwise the only opponent in a 1v1.
fn resolve_attacker(pf: &PlayerFrame, victim: usize, player_count: usize) -> Option<usize> {
    pf.last_hit_by
        .filter(|&a| a != victim && a < player_count)
        .or_else(|| (player_count == 2).then_some(1 - victim))
}
