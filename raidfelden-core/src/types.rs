//! Core type definitions for the raid engine.
//!
//! Gyms and pokemon are owned by the external catalog and never mutated here.
//! [`Raid`] is the only entity this crate creates or amends.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

use crate::error::{RaidError, Result};

// ---------------------------------------------------------------------------
// Identity Types
// ---------------------------------------------------------------------------

/// Catalog identifier of a gym.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GymId(pub i64);

/// Catalog identifier of a pokemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PokemonId(pub i64);

/// Random 64-bit raid identifier, assigned once at creation and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExternalId(pub i64);

/// Key of a suspended resolution chain awaiting a user choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SelectionToken(pub Uuid);

impl SelectionToken {
    /// Create a new random token.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SelectionToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for GymId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for PokemonId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ExternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for SelectionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

/// Which catalog a reference is resolved against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CatalogKind {
    /// Gyms (locations).
    Gym,
    /// Pokemon (raid bosses).
    Pokemon,
}

impl fmt::Display for CatalogKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gym => f.write_str("gym"),
            Self::Pokemon => f.write_str("pokemon"),
        }
    }
}

/// A named geofence restricting which gyms are eligible.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FenceRef(pub String);

impl FenceRef {
    /// Create a fence reference from its name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

/// The fences a report is restricted to. Empty means unrestricted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FenceSet(BTreeSet<FenceRef>);

impl FenceSet {
    /// A set that admits every gym.
    #[must_use]
    pub fn unrestricted() -> Self {
        Self::default()
    }

    /// Whether a gym belonging to `fences` is eligible.
    #[must_use]
    pub fn admits(&self, fences: &[String]) -> bool {
        self.0.is_empty() || fences.iter().any(|f| self.0.contains(&FenceRef(f.clone())))
    }

    /// Number of fences in the set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the set is empty (unrestricted).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for FenceSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(|s| FenceRef(s.into())).collect())
    }
}

/// One entry of a transient, ordered candidate list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// Catalog identifier (gym or pokemon id).
    pub id: i64,
    /// Display name.
    pub name: String,
    /// Fence membership (empty for pokemon).
    #[serde(default)]
    pub fences: Vec<String>,
}

impl Candidate {
    /// Create a candidate without fence membership.
    #[must_use]
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            fences: Vec::new(),
        }
    }
}

/// A physical site that can host at most one active raid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gym {
    /// Catalog identifier.
    pub id: GymId,
    /// Display name.
    pub name: String,
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// Names of the geofences this gym lies in.
    pub fences: Vec<String>,
}

/// A pokemon known to appear as a raid boss.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pokemon {
    /// Catalog identifier.
    pub id: PokemonId,
    /// Display name.
    pub name: String,
    /// The tier this pokemon appears at as a raid boss.
    pub boss_level: RaidLevel,
}

// ---------------------------------------------------------------------------
// Raid
// ---------------------------------------------------------------------------

/// Raid tier, always within 1..=5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct RaidLevel(u8);

impl RaidLevel {
    /// Lowest valid level.
    pub const MIN: u8 = 1;
    /// Highest valid level.
    pub const MAX: u8 = 5;

    /// Validate a level.
    ///
    /// # Errors
    /// Returns [`RaidError::LevelOutOfRange`] outside 1..=5.
    pub fn new(level: i64) -> Result<Self> {
        match u8::try_from(level) {
            Ok(l) if (Self::MIN..=Self::MAX).contains(&l) => Ok(Self(l)),
            _ => Err(RaidError::LevelOutOfRange { level }),
        }
    }

    /// The numeric level.
    #[must_use]
    pub fn get(self) -> u8 {
        self.0
    }
}

impl TryFrom<i64> for RaidLevel {
    type Error = RaidError;

    fn try_from(value: i64) -> Result<Self> {
        Self::new(value)
    }
}

impl From<RaidLevel> for i64 {
    fn from(level: RaidLevel) -> Self {
        i64::from(level.0)
    }
}

impl fmt::Display for RaidLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What is known about a raid: only its tier, or also its boss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum RaidShape {
    /// Egg not yet hatched; boss unknown.
    Egg {
        /// Raid tier.
        level: RaidLevel,
    },
    /// Boss known.
    Boss {
        /// Raid tier.
        level: RaidLevel,
        /// The raid boss.
        pokemon: PokemonId,
    },
}

impl RaidShape {
    /// Raid tier.
    #[must_use]
    pub fn level(self) -> RaidLevel {
        match self {
            Self::Egg { level } | Self::Boss { level, .. } => level,
        }
    }

    /// The boss, if known.
    #[must_use]
    pub fn pokemon(self) -> Option<PokemonId> {
        match self {
            Self::Egg { .. } => None,
            Self::Boss { pokemon, .. } => Some(pokemon),
        }
    }

    /// Whether the boss is known.
    #[must_use]
    pub fn is_boss(self) -> bool {
        matches!(self, Self::Boss { .. })
    }

    /// Merge an incoming report into the stored shape.
    ///
    /// The incoming level always wins. A known boss is only replaced by
    /// another boss, never cleared by an egg report.
    #[must_use]
    pub fn amend(self, incoming: Self) -> Self {
        match (self, incoming) {
            (Self::Boss { pokemon, .. }, Self::Egg { level }) => Self::Boss { level, pokemon },
            (_, incoming) => incoming,
        }
    }

    /// Set the boss, keeping the tier.
    #[must_use]
    pub fn hatch(self, pokemon: PokemonId) -> Self {
        Self::Boss {
            level: self.level(),
            pokemon,
        }
    }
}

/// The three canonical instants of a raid. `spawn_at < battle_at <= end_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaidWindow {
    /// When the egg appeared.
    pub spawn_at: DateTime<Utc>,
    /// When the boss becomes fightable.
    pub battle_at: DateTime<Utc>,
    /// When the raid disappears.
    pub end_at: DateTime<Utc>,
}

/// A raid at a gym.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Raid {
    /// Random identifier, fixed at creation.
    pub external_id: ExternalId,
    /// The gym hosting the raid.
    pub gym_id: GymId,
    /// Tier and (optional) boss.
    pub shape: RaidShape,
    /// Spawn, battle and end instants.
    pub window: RaidWindow,
}
