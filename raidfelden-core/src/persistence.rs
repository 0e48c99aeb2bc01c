//! SQLite persistence layer for the raid engine.
//!
//! The schema mirrors the scanner database the bot writes into: instants are
//! stored as unix seconds and a raid's identity is its random external id.
//!
//! ```sql
//! CREATE TABLE gyms       (id INTEGER PRIMARY KEY, name TEXT, lat REAL, lon REAL);
//! CREATE TABLE gym_fences (gym_id INTEGER, fence TEXT, PRIMARY KEY (gym_id, fence));
//! CREATE TABLE pokemon    (id INTEGER PRIMARY KEY, name TEXT, boss_level INTEGER);
//! CREATE TABLE raids      (external_id INTEGER PRIMARY KEY, gym_id INTEGER,
//!                          level INTEGER, pokemon_id INTEGER,
//!                          time_spawn INTEGER, time_battle INTEGER, time_end INTEGER);
//! ```
//!
//! The connection sits behind a mutex. Every repository call takes the lock
//! once and releases it on return, including on error. The lock is not held
//! between the active-raid lookup and the save of one upsert.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::types::Value;
use rusqlite::{Connection, OpenFlags, OptionalExtension, params, params_from_iter};
use tracing::{debug, info};

use crate::config::PersistenceConfig;
use crate::error::{RaidError, Result};
use crate::repository::{RaidRepository, name_matches};
use crate::time_window::active_cutoff;
use crate::types::{
    Candidate, CatalogKind, ExternalId, Gym, GymId, Pokemon, PokemonId, Raid, RaidLevel,
    RaidShape, RaidWindow,
};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS gyms (
        id    INTEGER PRIMARY KEY,
        name  TEXT NOT NULL,
        lat   REAL NOT NULL,
        lon   REAL NOT NULL
    );
    CREATE TABLE IF NOT EXISTS gym_fences (
        gym_id INTEGER NOT NULL REFERENCES gyms(id),
        fence  TEXT NOT NULL,
        PRIMARY KEY (gym_id, fence)
    );
    CREATE TABLE IF NOT EXISTS pokemon (
        id         INTEGER PRIMARY KEY,
        name       TEXT NOT NULL,
        boss_level INTEGER NOT NULL
    );
    CREATE TABLE IF NOT EXISTS raids (
        external_id INTEGER PRIMARY KEY,
        gym_id      INTEGER NOT NULL REFERENCES gyms(id),
        level       INTEGER NOT NULL,
        pokemon_id  INTEGER,
        time_spawn  INTEGER NOT NULL,
        time_battle INTEGER NOT NULL,
        time_end    INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS raids_gym_spawn ON raids (gym_id, time_spawn);
";

/// Raw `raids` row, converted outside the rusqlite row closure.
type RaidRow = (i64, i64, i64, Option<i64>, i64, i64, i64);

// ---------------------------------------------------------------------------
// SqliteStore
// ---------------------------------------------------------------------------

/// Handle to an open SQLite database holding the catalog and raids.
///
/// # Usage
///
/// ```no_run
/// # use raidfelden_core::persistence::SqliteStore;
/// # use raidfelden_core::config::PersistenceConfig;
/// let store = SqliteStore::open("raids.db", &PersistenceConfig::default())?;
/// assert!(store.integrity_check()?);
/// # Ok::<(), raidfelden_core::error::RaidError>(())
/// ```
pub struct SqliteStore {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("db_path", &self.db_path)
            .finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Open (or create) an SQLite database at `path`.
    ///
    /// The schema is created if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`RaidError::PersistenceUnavailable`] on SQLite failures.
    pub fn open<P: AsRef<Path>>(path: P, config: &PersistenceConfig) -> Result<Self> {
        let db_path = path.as_ref().to_path_buf();
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;

        let conn = Connection::open_with_flags(&db_path, flags)?;

        if config.wal_mode {
            conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        }
        conn.execute_batch("PRAGMA synchronous = NORMAL;")?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
        conn.execute_batch(SCHEMA)?;

        info!(
            path = %db_path.display(),
            wal = config.wal_mode,
            "Raid store opened"
        );

        Ok(Self {
            conn: Mutex::new(conn),
            db_path,
        })
    }

    /// Open the database named by `config.database_path`.
    ///
    /// # Errors
    ///
    /// Returns [`RaidError::PersistenceUnavailable`] on SQLite failures.
    pub fn from_config(config: &PersistenceConfig) -> Result<Self> {
        Self::open(&config.database_path, config)
    }

    /// Open an in-memory database (useful for tests).
    ///
    /// # Errors
    ///
    /// Returns [`RaidError::PersistenceUnavailable`] on SQLite failures.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;

        Ok(Self {
            conn: Mutex::new(conn),
            db_path: PathBuf::from(":memory:"),
        })
    }

    // ------------------------------------------------------------------
    // Catalog seeding
    // ------------------------------------------------------------------

    /// Insert or replace a gym and its fence membership.
    ///
    /// # Errors
    ///
    /// Returns [`RaidError::PersistenceUnavailable`] on SQLite failures.
    pub fn insert_gym(&self, gym: &Gym) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO gyms (id, name, lat, lon) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name, lat = excluded.lat, lon = excluded.lon",
            params![gym.id.0, gym.name, gym.latitude, gym.longitude],
        )?;
        tx.execute("DELETE FROM gym_fences WHERE gym_id = ?1", params![gym.id.0])?;
        for fence in &gym.fences {
            tx.execute(
                "INSERT OR IGNORE INTO gym_fences (gym_id, fence) VALUES (?1, ?2)",
                params![gym.id.0, fence],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Insert or replace a raid boss.
    ///
    /// # Errors
    ///
    /// Returns [`RaidError::PersistenceUnavailable`] on SQLite failures.
    pub fn insert_pokemon(&self, pokemon: &Pokemon) -> Result<()> {
        self.conn.lock().execute(
            "INSERT INTO pokemon (id, name, boss_level) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name, boss_level = excluded.boss_level",
            params![pokemon.id.0, pokemon.name, i64::from(pokemon.boss_level)],
        )?;
        Ok(())
    }

    /// Total number of stored raids, active or not.
    ///
    /// # Errors
    ///
    /// Returns [`RaidError::PersistenceUnavailable`] on SQLite failures.
    pub fn raid_count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .lock()
            .query_row("SELECT COUNT(*) FROM raids", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    // ------------------------------------------------------------------
    // Utility
    // ------------------------------------------------------------------

    /// Return the path to the database file (or `:memory:` for in-memory DBs).
    #[must_use]
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Run an integrity check on the database.
    ///
    /// # Errors
    ///
    /// Returns [`RaidError::PersistenceUnavailable`] if the check itself fails.
    pub fn integrity_check(&self) -> Result<bool> {
        let result: String = self
            .conn
            .lock()
            .query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
        Ok(result == "ok")
    }

    fn fences_of(conn: &Connection, gym: i64) -> Result<Vec<String>> {
        let mut stmt =
            conn.prepare_cached("SELECT fence FROM gym_fences WHERE gym_id = ?1 ORDER BY fence")?;
        let fences = stmt
            .query_map(params![gym], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(fences)
    }
}

/// `LIKE` pattern narrowing a name lookup, or `None` when no safe one exists.
///
/// `LIKE` folds ASCII case only. Unicode lowercasing also maps U+0130 and
/// U+212A onto ASCII `i` and `k`, so queries that are not ASCII or contain
/// those letters are matched in Rust alone.
fn like_pattern(query: &str) -> Option<String> {
    let query = query.trim();
    if !query.is_ascii() || query.contains(['i', 'I', 'k', 'K']) {
        return None;
    }
    let mut pattern = String::with_capacity(query.len() + 2);
    pattern.push('%');
    for c in query.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    Some(pattern)
}

fn instant(secs: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| RaidError::PersistenceUnavailable(format!("invalid stored timestamp {secs}")))
}

fn raid_from_row(row: RaidRow) -> Result<Raid> {
    let (external_id, gym_id, level, pokemon_id, spawn, battle, end) = row;
    let level = RaidLevel::new(level)
        .map_err(|e| RaidError::PersistenceUnavailable(format!("corrupt raid {external_id}: {e}")))?;
    let shape = match pokemon_id {
        Some(p) => RaidShape::Boss {
            level,
            pokemon: PokemonId(p),
        },
        None => RaidShape::Egg { level },
    };
    Ok(Raid {
        external_id: ExternalId(external_id),
        gym_id: GymId(gym_id),
        shape,
        window: RaidWindow {
            spawn_at: instant(spawn)?,
            battle_at: instant(battle)?,
            end_at: instant(end)?,
        },
    })
}

impl RaidRepository for SqliteStore {
    fn find_candidates(&self, kind: CatalogKind, query: &str) -> Result<Vec<Candidate>> {
        let start = Instant::now();
        let pattern = like_pattern(query);
        let conn = self.conn.lock();
        let sql = match kind {
            CatalogKind::Gym => {
                "SELECT g.id, g.name, f.fence
                 FROM gyms g LEFT JOIN gym_fences f ON f.gym_id = g.id
                 WHERE ?1 IS NULL OR g.name LIKE ?1 ESCAPE '\\'
                 ORDER BY g.id, f.fence"
            }
            CatalogKind::Pokemon => {
                "SELECT id, name, NULL
                 FROM pokemon
                 WHERE ?1 IS NULL OR name LIKE ?1 ESCAPE '\\'
                 ORDER BY id"
            }
        };
        let mut stmt = conn.prepare_cached(sql)?;
        let rows = stmt.query_map(params![pattern], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
            ))
        })?;

        // Rows arrive grouped by id, one per fence.
        let mut found: Vec<Candidate> = Vec::new();
        for row in rows {
            let (id, name, fence) = row?;
            let same = found.last().is_some_and(|c| c.id == id);
            if !same {
                if !name_matches(&name, query) {
                    continue;
                }
                found.push(Candidate::new(id, name));
            }
            if let (Some(fence), Some(last)) = (fence, found.last_mut()) {
                if last.id == id {
                    last.fences.push(fence);
                }
            }
        }

        debug!(
            %kind,
            query,
            prefiltered = pattern.is_some(),
            matches = found.len(),
            elapsed_us = start.elapsed().as_micros(),
            "Catalog lookup"
        );
        Ok(found)
    }

    fn gym(&self, id: GymId) -> Result<Option<Gym>> {
        let conn = self.conn.lock();
        let row: Option<(String, f64, f64)> = conn
            .prepare_cached("SELECT name, lat, lon FROM gyms WHERE id = ?1")?
            .query_row(params![id.0], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
            .optional()?;
        let Some((name, latitude, longitude)) = row else {
            return Ok(None);
        };
        Ok(Some(Gym {
            id,
            name,
            latitude,
            longitude,
            fences: Self::fences_of(&conn, id.0)?,
        }))
    }

    fn pokemon(&self, id: PokemonId) -> Result<Option<Pokemon>> {
        let conn = self.conn.lock();
        let row: Option<(String, i64)> = conn
            .prepare_cached("SELECT name, boss_level FROM pokemon WHERE id = ?1")?
            .query_row(params![id.0], |row| Ok((row.get(0)?, row.get(1)?)))
            .optional()?;
        let Some((name, level)) = row else {
            return Ok(None);
        };
        let boss_level = RaidLevel::new(level).map_err(|e| {
            RaidError::PersistenceUnavailable(format!("corrupt pokemon {id}: {e}"))
        })?;
        Ok(Some(Pokemon {
            id,
            name,
            boss_level,
        }))
    }

    fn find_active_raid(&self, gym: GymId, now: DateTime<Utc>) -> Result<Option<Raid>> {
        let cutoff = active_cutoff(now).timestamp();
        let row: Option<RaidRow> = self
            .conn
            .lock()
            .prepare_cached(
                "SELECT external_id, gym_id, level, pokemon_id, time_spawn, time_battle, time_end
                 FROM raids
                 WHERE gym_id = ?1 AND time_spawn > ?2
                 ORDER BY time_spawn DESC
                 LIMIT 1",
            )?
            .query_row(params![gym.0, cutoff], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                ))
            })
            .optional()?;
        row.map(raid_from_row).transpose()
    }

    fn insert_raid(&self, raid: &Raid) -> Result<bool> {
        let start = Instant::now();
        let inserted = self
            .conn
            .lock()
            .prepare_cached(
                "INSERT INTO raids
                    (external_id, gym_id, level, pokemon_id, time_spawn, time_battle, time_end)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(external_id) DO NOTHING",
            )?
            .execute(raid_params(raid))?;

        debug!(
            raid = %raid.external_id,
            gym = %raid.gym_id,
            inserted = inserted == 1,
            elapsed_us = start.elapsed().as_micros(),
            "Inserted raid"
        );
        Ok(inserted == 1)
    }

    fn save_raid(&self, raid: &Raid) -> Result<Raid> {
        let start = Instant::now();
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let written = tx.execute(
            "INSERT INTO raids
                (external_id, gym_id, level, pokemon_id, time_spawn, time_battle, time_end)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(external_id) DO UPDATE SET
                level = excluded.level,
                pokemon_id = excluded.pokemon_id,
                time_spawn = excluded.time_spawn,
                time_battle = excluded.time_battle,
                time_end = excluded.time_end
             WHERE raids.gym_id = excluded.gym_id",
            raid_params(raid),
        )?;
        if written == 0 {
            return Err(RaidError::ExternalIdConflict {
                id: raid.external_id,
            });
        }
        tx.commit()?;

        debug!(
            raid = %raid.external_id,
            gym = %raid.gym_id,
            elapsed_us = start.elapsed().as_micros(),
            "Saved raid"
        );
        Ok(raid.clone())
    }
}

fn raid_params(raid: &Raid) -> impl rusqlite::Params {
    params_from_iter([
        Value::Integer(raid.external_id.0),
        Value::Integer(raid.gym_id.0),
        Value::Integer(i64::from(raid.shape.level())),
        raid.shape.pokemon().map_or(Value::Null, |p| Value::Integer(p.0)),
        Value::Integer(raid.window.spawn_at.timestamp()),
        Value::Integer(raid.window.battle_at.timestamp()),
        Value::Integer(raid.window.end_at.timestamp()),
    ])
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0)
            .single()
            .expect("valid time")
    }

    fn seeded() -> SqliteStore {
        let store = SqliteStore::open_in_memory().expect("open");
        store
            .insert_gym(&Gym {
                id: GymId(1),
                name: "Arena A".into(),
                latitude: 47.37,
                longitude: 8.54,
                fences: vec!["center".into(), "north".into()],
            })
            .expect("gym");
        store
            .insert_gym(&Gym {
                id: GymId(2),
                name: "Arena B".into(),
                latitude: 47.38,
                longitude: 8.55,
                fences: vec![],
            })
            .expect("gym");
        store
            .insert_pokemon(&Pokemon {
                id: PokemonId(248),
                name: "Tyranitar".into(),
                boss_level: RaidLevel::new(4).expect("level"),
            })
            .expect("pokemon");
        store
    }

    fn raid(external: i64, expiry: DateTime<Utc>) -> Raid {
        Raid {
            external_id: ExternalId(external),
            gym_id: GymId(1),
            shape: RaidShape::Egg {
                level: RaidLevel::new(3).expect("level"),
            },
            window: RaidWindow::derive(expiry, false),
        }
    }

    #[test]
    fn round_trip_gym_with_fences() {
        let store = seeded();
        let gym = store.gym(GymId(1)).expect("load").expect("Some");
        assert_eq!(gym.name, "Arena A");
        assert_eq!(gym.fences, ["center", "north"]);
        assert!(store.gym(GymId(99)).expect("load").is_none());
    }

    #[test]
    fn candidates_in_id_order() {
        let store = seeded();
        let found = store.find_candidates(CatalogKind::Gym, "arena").expect("find");
        let ids: Vec<_> = found.iter().map(|c| c.id).collect();
        assert_eq!(ids, [1, 2]);
        assert_eq!(found[0].fences, ["center", "north"]);

        let bosses = store
            .find_candidates(CatalogKind::Pokemon, "TYRAN")
            .expect("find");
        assert_eq!(bosses, [Candidate::new(248, "Tyranitar")]);
    }

    #[test]
    fn raid_round_trip_and_upsert() {
        let store = seeded();
        let mut r = raid(-42, t0());
        store.save_raid(&r).expect("save");

        r.shape = r.shape.hatch(PokemonId(248));
        store.save_raid(&r).expect("save again");
        assert_eq!(store.raid_count().expect("count"), 1);

        let active = store
            .find_active_raid(GymId(1), t0())
            .expect("find")
            .expect("Some");
        assert_eq!(active, r);
    }

    #[test]
    fn taken_external_id_keeps_its_gym() {
        let store = seeded();
        assert!(store.insert_raid(&raid(5, t0())).expect("insert"));

        let mut elsewhere = raid(5, t0());
        elsewhere.gym_id = GymId(2);
        assert!(!store.insert_raid(&elsewhere).expect("insert"));

        let err = store.save_raid(&elsewhere).expect_err("other gym");
        assert!(matches!(
            err,
            RaidError::ExternalIdConflict { id: ExternalId(5) }
        ));
        assert_eq!(store.raid_count().expect("count"), 1);
        let kept = store
            .find_active_raid(GymId(1), t0())
            .expect("find")
            .expect("Some");
        assert_eq!(kept.external_id, ExternalId(5));
        assert!(store.find_active_raid(GymId(2), t0()).expect("find").is_none());
    }

    #[test]
    fn lookup_escapes_wildcards_and_folds_unicode() {
        let store = seeded();
        for (id, name) in [(3, "100% Park"), (4, "1000 Park"), (5, "ÖLBERG"), (6, "Kirche")] {
            store
                .insert_gym(&Gym {
                    id: GymId(id),
                    name: name.into(),
                    latitude: 0.0,
                    longitude: 0.0,
                    fences: vec!["west".into()],
                })
                .expect("gym");
        }

        let names = |q: &str| -> Vec<String> {
            store
                .find_candidates(CatalogKind::Gym, q)
                .expect("find")
                .into_iter()
                .map(|c| c.name)
                .collect()
        };
        assert_eq!(names("100%"), ["100% Park"]);
        assert_eq!(names("park"), ["100% Park", "1000 Park"]);
        assert_eq!(names("ölberg"), ["ÖLBERG"]);
        assert_eq!(names("KIRCHE"), ["Kirche"]);
        assert_eq!(names("zzz"), Vec::<String>::new());
    }

    #[test]
    fn like_pattern_only_when_ascii_folding_suffices() {
        assert_eq!(like_pattern(" park "), Some("%park%".to_string()));
        assert_eq!(like_pattern("a_b"), Some("%a\\_b%".to_string()));
        assert_eq!(like_pattern("ölberg"), None);
        assert_eq!(like_pattern("kirche"), None);
    }

    #[test]
    fn expired_raid_is_not_active() {
        let store = seeded();
        store.save_raid(&raid(7, t0())).expect("save");
        let later = t0() + TimeDelta::minutes(31);
        // spawn = t0 - 60m, cutoff = later - 90m = t0 - 59m
        assert!(store.find_active_raid(GymId(1), later).expect("find").is_none());
    }

    #[test]
    fn unknown_gym_violates_foreign_key() {
        let store = seeded();
        let mut r = raid(8, t0());
        r.gym_id = GymId(404);
        let err = store.save_raid(&r).expect_err("fk");
        assert!(matches!(err, RaidError::PersistenceUnavailable(_)));
        assert_eq!(store.raid_count().expect("count"), 0);
    }

    #[test]
    fn file_based_open_persists() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db_path = dir.path().join("raids.db");
        let config = PersistenceConfig::default();

        {
            let store = SqliteStore::open(&db_path, &config).expect("open");
            store
                .insert_gym(&Gym {
                    id: GymId(1),
                    name: "Arena A".into(),
                    latitude: 0.0,
                    longitude: 0.0,
                    fences: vec![],
                })
                .expect("gym");
            store.save_raid(&raid(1, t0())).expect("save");
        }

        let reopened = SqliteStore::open(&db_path, &config).expect("reopen");
        assert_eq!(reopened.raid_count().expect("count"), 1);
        assert!(reopened.integrity_check().expect("check"));
    }
}
