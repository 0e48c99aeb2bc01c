//! Repository boundary to the catalog and raid store.
//!
//! The engine only ever talks to [`RaidRepository`]. Two implementations ship
//! with the crate: [`crate::persistence::SqliteStore`] for real deployments and
//! [`InMemoryRepository`] for tests and embedding.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::error::{RaidError, Result};
use crate::time_window::active_cutoff;
use crate::types::{Candidate, CatalogKind, Gym, GymId, Pokemon, PokemonId, Raid};

/// Catalog lookups and raid storage consumed by the engine.
///
/// Every method may fail with [`RaidError::PersistenceUnavailable`].
pub trait RaidRepository: Send + Sync {
    /// Entries whose name contains `query`, case-insensitively, in catalog order.
    fn find_candidates(&self, kind: CatalogKind, query: &str) -> Result<Vec<Candidate>>;

    /// Look up a gym by id.
    fn gym(&self, id: GymId) -> Result<Option<Gym>>;

    /// Look up a pokemon by id.
    fn pokemon(&self, id: PokemonId) -> Result<Option<Pokemon>>;

    /// The raid at `gym` whose spawn lies within the active look-back of `now`.
    fn find_active_raid(&self, gym: GymId, now: DateTime<Utc>) -> Result<Option<Raid>>;

    /// Store a new raid unless its external id is taken. Returns `false`,
    /// writing nothing, when it is.
    fn insert_raid(&self, raid: &Raid) -> Result<bool>;

    /// Create or update a raid, keyed by its external id.
    ///
    /// A raid never changes gym: saving over a stored raid at another gym
    /// fails with [`RaidError::ExternalIdConflict`].
    fn save_raid(&self, raid: &Raid) -> Result<Raid>;
}

impl<R: RaidRepository + ?Sized> RaidRepository for Arc<R> {
    fn find_candidates(&self, kind: CatalogKind, query: &str) -> Result<Vec<Candidate>> {
        (**self).find_candidates(kind, query)
    }

    fn gym(&self, id: GymId) -> Result<Option<Gym>> {
        (**self).gym(id)
    }

    fn pokemon(&self, id: PokemonId) -> Result<Option<Pokemon>> {
        (**self).pokemon(id)
    }

    fn find_active_raid(&self, gym: GymId, now: DateTime<Utc>) -> Result<Option<Raid>> {
        (**self).find_active_raid(gym, now)
    }

    fn insert_raid(&self, raid: &Raid) -> Result<bool> {
        (**self).insert_raid(raid)
    }

    fn save_raid(&self, raid: &Raid) -> Result<Raid> {
        (**self).save_raid(raid)
    }
}

/// Case-insensitive substring match used by every repository.
#[must_use]
pub fn name_matches(name: &str, query: &str) -> bool {
    name.to_lowercase().contains(&query.trim().to_lowercase())
}

// ---------------------------------------------------------------------------
// InMemoryRepository
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Tables {
    gyms: Vec<Gym>,
    pokemon: Vec<Pokemon>,
    raids: Vec<Raid>,
}

/// Thread-safe repository held entirely in memory.
///
/// Catalog order is insertion order.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    tables: RwLock<Tables>,
    unavailable: AtomicBool,
}

impl InMemoryRepository {
    /// Create an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a gym to the catalog.
    pub fn insert_gym(&self, gym: Gym) {
        self.tables.write().gyms.push(gym);
    }

    /// Add a pokemon to the catalog.
    pub fn insert_pokemon(&self, pokemon: Pokemon) {
        self.tables.write().pokemon.push(pokemon);
    }

    /// Snapshot of every stored raid.
    #[must_use]
    pub fn raids(&self) -> Vec<Raid> {
        self.tables.read().raids.clone()
    }

    /// Make every subsequent call fail as if the store were unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(RaidError::PersistenceUnavailable(
                "in-memory repository marked unavailable".into(),
            ))
        } else {
            Ok(())
        }
    }
}

impl RaidRepository for InMemoryRepository {
    fn find_candidates(&self, kind: CatalogKind, query: &str) -> Result<Vec<Candidate>> {
        self.check_available()?;
        let tables = self.tables.read();
        let found = match kind {
            CatalogKind::Gym => tables
                .gyms
                .iter()
                .filter(|g| name_matches(&g.name, query))
                .map(|g| Candidate {
                    id: g.id.0,
                    name: g.name.clone(),
                    fences: g.fences.clone(),
                })
                .collect(),
            CatalogKind::Pokemon => tables
                .pokemon
                .iter()
                .filter(|p| name_matches(&p.name, query))
                .map(|p| Candidate::new(p.id.0, p.name.clone()))
                .collect(),
        };
        Ok(found)
    }

    fn gym(&self, id: GymId) -> Result<Option<Gym>> {
        self.check_available()?;
        Ok(self.tables.read().gyms.iter().find(|g| g.id == id).cloned())
    }

    fn pokemon(&self, id: PokemonId) -> Result<Option<Pokemon>> {
        self.check_available()?;
        Ok(self.tables.read().pokemon.iter().find(|p| p.id == id).cloned())
    }

    fn find_active_raid(&self, gym: GymId, now: DateTime<Utc>) -> Result<Option<Raid>> {
        self.check_available()?;
        let cutoff = active_cutoff(now);
        Ok(self
            .tables
            .read()
            .raids
            .iter()
            .filter(|r| r.gym_id == gym && r.window.spawn_at > cutoff)
            .max_by_key(|r| r.window.spawn_at)
            .cloned())
    }

    fn insert_raid(&self, raid: &Raid) -> Result<bool> {
        self.check_available()?;
        let mut tables = self.tables.write();
        if tables.raids.iter().any(|r| r.external_id == raid.external_id) {
            return Ok(false);
        }
        tables.raids.push(raid.clone());
        Ok(true)
    }

    fn save_raid(&self, raid: &Raid) -> Result<Raid> {
        self.check_available()?;
        let mut tables = self.tables.write();
        let raids = &mut tables.raids;
        match raids.iter().position(|r| r.external_id == raid.external_id) {
            Some(i) if raids[i].gym_id != raid.gym_id => {
                return Err(RaidError::ExternalIdConflict {
                    id: raid.external_id,
                });
            }
            Some(i) => raids[i] = raid.clone(),
            None => raids.push(raid.clone()),
        }
        Ok(raid.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ExternalId, RaidLevel, RaidShape, RaidWindow};
    use chrono::TimeDelta;

    fn gym(id: i64, name: &str) -> Gym {
        Gym {
            id: GymId(id),
            name: name.to_string(),
            latitude: 47.0,
            longitude: 8.0,
            fences: vec!["center".to_string()],
        }
    }

    fn raid(external: i64, gym: i64, expiry: DateTime<Utc>) -> Raid {
        Raid {
            external_id: ExternalId(external),
            gym_id: GymId(gym),
            shape: RaidShape::Egg {
                level: RaidLevel::new(3).expect("level"),
            },
            window: RaidWindow::derive(expiry, false),
        }
    }

    #[test]
    fn candidates_are_case_insensitive_and_ordered() {
        let repo = InMemoryRepository::new();
        repo.insert_gym(gym(3, "Fountain Park"));
        repo.insert_gym(gym(1, "Old Fountain"));
        repo.insert_gym(gym(2, "Church"));

        let found = repo
            .find_candidates(CatalogKind::Gym, "FOUNTAIN")
            .expect("find");
        let names: Vec<_> = found.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["Fountain Park", "Old Fountain"]);
        assert_eq!(found[0].fences, ["center"]);
    }

    #[test]
    fn save_updates_by_external_id() {
        let repo = InMemoryRepository::new();
        let now = Utc::now();
        let mut r = raid(10, 1, now);
        repo.save_raid(&r).expect("save");
        r.shape = RaidShape::Egg {
            level: RaidLevel::new(5).expect("level"),
        };
        repo.save_raid(&r).expect("save again");

        let raids = repo.raids();
        assert_eq!(raids.len(), 1);
        assert_eq!(raids[0].shape.level().get(), 5);
    }

    #[test]
    fn taken_external_id_is_never_moved() {
        let repo = InMemoryRepository::new();
        let now = Utc::now();
        assert!(repo.insert_raid(&raid(7, 1, now)).expect("insert"));
        assert!(!repo.insert_raid(&raid(7, 2, now)).expect("insert"));

        let err = repo.save_raid(&raid(7, 2, now)).expect_err("other gym");
        assert!(matches!(
            err,
            RaidError::ExternalIdConflict { id: ExternalId(7) }
        ));
        let raids = repo.raids();
        assert_eq!(raids.len(), 1);
        assert_eq!(raids[0].gym_id, GymId(1));
    }

    #[test]
    fn active_lookup_ignores_old_raids() {
        let repo = InMemoryRepository::new();
        let now = Utc::now();
        repo.save_raid(&raid(1, 1, now - TimeDelta::hours(3)))
            .expect("save");
        assert!(repo.find_active_raid(GymId(1), now).expect("find").is_none());

        repo.save_raid(&raid(2, 1, now)).expect("save");
        let active = repo.find_active_raid(GymId(1), now).expect("find");
        assert_eq!(active.map(|r| r.external_id), Some(ExternalId(2)));
        assert!(repo.find_active_raid(GymId(9), now).expect("find").is_none());
    }

    #[test]
    fn unavailable_repository_fails_every_call() {
        let repo = InMemoryRepository::new();
        repo.set_unavailable(true);
        let err = repo
            .find_candidates(CatalogKind::Pokemon, "x")
            .expect_err("unavailable");
        assert!(matches!(err, RaidError::PersistenceUnavailable(_)));
        repo.set_unavailable(false);
        assert!(repo.find_candidates(CatalogKind::Pokemon, "x").is_ok());
    }
}
