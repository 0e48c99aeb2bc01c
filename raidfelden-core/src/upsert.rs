//! Raid Upsert: one active raid per gym.
//!
//! A report for a gym either creates a raid (no raid spawned within the
//! active look-back) or amends the active one in place. Hatching only ever
//! amends.
//!
//! The active-raid lookup and the save are two separate repository calls.
//! Two concurrent reports for the same idle gym can therefore both create a
//! raid; the later report's write wins for any raid they share.

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::error::{RaidError, Result};
use crate::ids::ExternalIdSource;
use crate::repository::RaidRepository;
use crate::types::{Gym, Pokemon, Raid, RaidShape, RaidWindow};

/// How many fresh external ids a create draws before giving up.
pub const MAX_ID_ATTEMPTS: usize = 8;

/// What an upsert did.
#[derive(Debug, Clone, PartialEq)]
pub struct UpsertReport {
    /// The raid as saved.
    pub raid: Raid,
    /// The shape the reporter described (before merging with a stored boss).
    pub reported: RaidShape,
    /// Whether a new raid was created rather than an active one amended.
    pub created: bool,
}

/// Apply a fully resolved report to `gym`.
///
/// The window is derived from the reported shape: the expiry is the hatch
/// for an egg and the end for a known boss.
///
/// A new raid never takes over an external id already in the store; a
/// taken id is discarded and another one drawn.
///
/// # Errors
/// - [`RaidError::ExternalIdConflict`] if [`MAX_ID_ATTEMPTS`] draws were all taken.
/// - Repository failures.
pub fn upsert_raid<R, I>(
    repo: &R,
    ids: &I,
    now: DateTime<Utc>,
    gym: &Gym,
    reported: RaidShape,
    expiry: DateTime<Utc>,
) -> Result<UpsertReport>
where
    R: RaidRepository + ?Sized,
    I: ExternalIdSource + ?Sized,
{
    let window = RaidWindow::derive(expiry, reported.is_boss());

    let (raid, created) = match repo.find_active_raid(gym.id, now)? {
        Some(mut active) => {
            debug!(
                raid = %active.external_id,
                gym = %gym.id,
                "Amending active raid"
            );
            active.shape = active.shape.amend(reported);
            active.window = window;
            (repo.save_raid(&active)?, false)
        }
        None => (create_raid(repo, ids, gym, reported, window)?, true),
    };
    info!(
        raid = %raid.external_id,
        gym = %gym.name,
        level = %raid.shape.level(),
        boss = raid.shape.is_boss(),
        created,
        "Raid recorded"
    );

    Ok(UpsertReport {
        raid,
        reported,
        created,
    })
}

fn create_raid<R, I>(
    repo: &R,
    ids: &I,
    gym: &Gym,
    shape: RaidShape,
    window: RaidWindow,
) -> Result<Raid>
where
    R: RaidRepository + ?Sized,
    I: ExternalIdSource + ?Sized,
{
    let mut raid = Raid {
        external_id: ids.next_id(),
        gym_id: gym.id,
        shape,
        window,
    };
    for attempt in 1..=MAX_ID_ATTEMPTS {
        if repo.insert_raid(&raid)? {
            return Ok(raid);
        }
        warn!(raid = %raid.external_id, attempt, "External raid id already taken");
        if attempt < MAX_ID_ATTEMPTS {
            raid.external_id = ids.next_id();
        }
    }
    Err(RaidError::ExternalIdConflict {
        id: raid.external_id,
    })
}

/// Set the boss of the active raid at `gym`, leaving level and window untouched.
///
/// # Errors
/// - [`RaidError::NoActiveEvent`] if the gym has no active raid.
/// - Repository failures.
pub fn hatch_raid<R>(repo: &R, now: DateTime<Utc>, gym: &Gym, pokemon: &Pokemon) -> Result<Raid>
where
    R: RaidRepository + ?Sized,
{
    let Some(mut active) = repo.find_active_raid(gym.id, now)? else {
        return Err(RaidError::NoActiveEvent {
            gym: gym.name.clone(),
        });
    };

    active.shape = active.shape.hatch(pokemon.id);
    let raid = repo.save_raid(&active)?;
    info!(
        raid = %raid.external_id,
        gym = %gym.name,
        boss = %pokemon.name,
        "Raid hatched"
    );
    Ok(raid)
}
