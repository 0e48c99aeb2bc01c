//! Raid Time Windows
//!
//! A report carries a single "time left" value. Depending on whether the boss
//! is already known, that value is either the time until the egg hatches or
//! the time until the raid ends:
//!
//! ```text
//!   egg:   spawn ── 60m ──▶ battle (= expiry) ── 45m ──▶ end
//!   boss:  spawn ── 60m ──▶ battle ── 45m ──▶ end (= expiry)
//! ```
//!
//! The phase durations are fixed by the game and deliberately not configurable.

use chrono::{DateTime, SubsecRound, TimeDelta, Utc};

use crate::error::{RaidError, Result};
use crate::types::RaidWindow;

/// Minutes between egg spawn and hatch, for an egg report.
pub const EGG_SPAWN_LEAD_MINUTES: i64 = 60;
/// Minutes a hatched raid stays open, for an egg report.
pub const EGG_BATTLE_MINUTES: i64 = 45;
/// Minutes between egg spawn and raid end, for a boss report.
pub const BOSS_SPAWN_LEAD_MINUTES: i64 = 105;
/// Minutes between hatch and raid end, for a boss report.
pub const BOSS_BATTLE_LEAD_MINUTES: i64 = 45;
/// A raid whose spawn lies within this many minutes of now is still active.
pub const ACTIVE_LOOKBACK_MINUTES: i64 = 90;

/// Parse `mm` or `mm:ss` remaining time into an absolute expiry instant.
///
/// `now` is truncated to whole seconds before the offset is added.
///
/// # Errors
/// Returns [`RaidError::InvalidTimeFormat`] for any other shape, including
/// empty parts (`"5:"`), non-digits and more than one separator.
pub fn parse_time_left(text: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let invalid = || RaidError::InvalidTimeFormat {
        input: text.to_string(),
    };

    let parts: Vec<&str> = text.trim().split(':').collect();
    let (minutes, seconds) = match parts.as_slice() {
        [m] => (parse_part(m).ok_or_else(invalid)?, 0),
        [m, s] => (
            parse_part(m).ok_or_else(invalid)?,
            parse_part(s).ok_or_else(invalid)?,
        ),
        _ => return Err(invalid()),
    };

    let offset = TimeDelta::try_seconds(i64::from(minutes) * 60 + i64::from(seconds))
        .ok_or_else(invalid)?;
    now.trunc_subsecs(0)
        .checked_add_signed(offset)
        .ok_or_else(invalid)
}

fn parse_part(part: &str) -> Option<u32> {
    if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    part.parse().ok()
}

/// Earliest spawn instant still considered active at `now`.
#[must_use]
pub fn active_cutoff(now: DateTime<Utc>) -> DateTime<Utc> {
    now - TimeDelta::minutes(ACTIVE_LOOKBACK_MINUTES)
}

impl RaidWindow {
    /// Derive the canonical instants from an expiry.
    ///
    /// For an egg the expiry is the hatch; for a known boss it is the end.
    #[must_use]
    pub fn derive(expiry: DateTime<Utc>, boss_known: bool) -> Self {
        if boss_known {
            Self {
                spawn_at: expiry - TimeDelta::minutes(BOSS_SPAWN_LEAD_MINUTES),
                battle_at: expiry - TimeDelta::minutes(BOSS_BATTLE_LEAD_MINUTES),
                end_at: expiry,
            }
        } else {
            Self {
                spawn_at: expiry - TimeDelta::minutes(EGG_SPAWN_LEAD_MINUTES),
                battle_at: expiry,
                end_at: expiry + TimeDelta::minutes(EGG_BATTLE_MINUTES),
            }
        }
    }

    /// Whether the raid still counts as the gym's current raid.
    #[must_use]
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.spawn_at > active_cutoff(now)
    }

    /// The instant quoted back to the reporter: hatch for eggs, end for bosses.
    #[must_use]
    pub fn boundary(&self, boss_known: bool) -> DateTime<Utc> {
        if boss_known { self.end_at } else { self.battle_at }
    }
}
