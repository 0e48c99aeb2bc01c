//! Gym and boss resolvers: the ambiguity protocol bound to each catalog.

use crate::ambiguity::{self, Resolution};
use crate::error::{RaidError, Result};
use crate::repository::RaidRepository;
use crate::types::{CatalogKind, FenceSet, Gym, GymId, Pokemon, PokemonId, RaidLevel};

/// What the reporter named as the raid's subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubjectRef {
    /// A bare integer: an egg of that level (not yet validated).
    Level(i64),
    /// A pokemon name to look up.
    Name(String),
}

impl SubjectRef {
    /// Classify raw subject text. Anything that parses as an integer is a level.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let trimmed = text.trim();
        match trimmed.parse::<i64>() {
            Ok(level) => Self::Level(level),
            Err(_) => Self::Name(trimmed.to_string()),
        }
    }
}

/// Validate a level given in place of a boss name.
///
/// # Errors
/// Returns [`RaidError::LevelOutOfRange`] outside 1..=5.
pub fn egg_level(level: i64) -> Result<RaidLevel> {
    RaidLevel::new(level)
}

/// Resolve a boss name against the pokemon catalog.
///
/// # Errors
/// Propagates repository failures and the errors of [`ambiguity::resolve`].
pub fn resolve_pokemon<R: RaidRepository + ?Sized>(
    repo: &R,
    name: &str,
    interactive_limit: usize,
) -> Result<Resolution> {
    let candidates = repo.find_candidates(CatalogKind::Pokemon, name)?;
    ambiguity::resolve(CatalogKind::Pokemon, name, candidates, interactive_limit)
}

/// Resolve a gym name, only considering gyms inside `fences`.
///
/// The fence filter applies before counting, even to exact matches.
///
/// # Errors
/// Propagates repository failures and the errors of [`ambiguity::resolve`].
pub fn resolve_gym<R: RaidRepository + ?Sized>(
    repo: &R,
    name: &str,
    interactive_limit: usize,
    fences: &FenceSet,
) -> Result<Resolution> {
    let candidates = repo
        .find_candidates(CatalogKind::Gym, name)?
        .into_iter()
        .filter(|c| fences.admits(&c.fences))
        .collect();
    ambiguity::resolve(CatalogKind::Gym, name, candidates, interactive_limit)
}

/// Load a resolved pokemon.
///
/// # Errors
/// [`RaidError::NotFound`] if the catalog entry vanished since resolution.
pub fn load_pokemon<R: RaidRepository + ?Sized>(repo: &R, id: PokemonId) -> Result<Pokemon> {
    repo.pokemon(id)?.ok_or_else(|| RaidError::NotFound {
        kind: CatalogKind::Pokemon,
        query: id.to_string(),
    })
}

/// Load a resolved gym.
///
/// # Errors
/// [`RaidError::NotFound`] if the catalog entry vanished since resolution.
pub fn load_gym<R: RaidRepository + ?Sized>(repo: &R, id: GymId) -> Result<Gym> {
    repo.gym(id)?.ok_or_else(|| RaidError::NotFound {
        kind: CatalogKind::Gym,
        query: id.to_string(),
    })
}
