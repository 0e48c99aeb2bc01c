//! Raid Service: the operations the chat transport calls.
//!
//! ```text
//! report_raid ─▶ parse time ─▶ level? ──────────────┐
//!                              name ─▶ resolve boss ─┤ (may suspend)
//!                                                    ▼
//!                                         resolve gym (may suspend)
//!                                                    ▼
//!                                               upsert raid
//! ```
//!
//! A suspended step is stored as a [`Continuation`] under a token and
//! picked up again by [`RaidService::resume_selection`]. Domain failures come
//! back as failed [`Outcome`]s; only collaborator failures are returned as
//! `Err`.

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::ambiguity::{Resolution, SelectionStore};
use crate::clock::{Clock, SystemClock};
use crate::config::RaidfeldenConfig;
use crate::error::Result;
use crate::ids::{ExternalIdSource, ThreadRngIds};
use crate::outcome::{self, Outcome, OutcomeData, RaidSummary, SelectionPrompt};
use crate::repository::RaidRepository;
use crate::resolvers::{self, SubjectRef};
use crate::time_window::parse_time_left;
use crate::types::{Candidate, CatalogKind, FenceSet, GymId, PokemonId, RaidShape, SelectionToken};
use crate::upsert;

/// Where a suspended chain resumes, with everything the original request carried.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum Continuation {
    /// A report waiting for the boss to be picked.
    ReportPokemon {
        /// Gym reference still to resolve.
        gym_ref: String,
        /// Parsed expiry of the original report.
        expiry: DateTime<Utc>,
        /// Interactive limit of the original report.
        interactive_limit: usize,
        /// Fences of the original report.
        fences: FenceSet,
    },
    /// A report waiting for the gym to be picked.
    ReportGym {
        /// Resolved tier and boss.
        shape: RaidShape,
        /// Parsed expiry of the original report.
        expiry: DateTime<Utc>,
    },
    /// A hatch waiting for the boss to be picked.
    HatchPokemon {
        /// Gym reference still to resolve.
        gym_ref: String,
        /// Interactive limit of the original hatch.
        interactive_limit: usize,
        /// Fences of the original hatch.
        fences: FenceSet,
    },
    /// A hatch waiting for the gym to be picked.
    HatchGym {
        /// Resolved boss.
        pokemon: PokemonId,
    },
}

/// Entry point for raid reports, hatches and selection answers.
///
/// `Send + Sync` whenever the repository is; share it between tasks with an `Arc`.
pub struct RaidService<R> {
    repo: R,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn ExternalIdSource>,
    selections: SelectionStore<Continuation>,
    config: RaidfeldenConfig,
}

impl<R> std::fmt::Debug for RaidService<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RaidService")
            .field("pending_selections", &self.selections.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<R: RaidRepository> RaidService<R> {
    /// Create a service on the system clock with OS-seeded identifiers.
    ///
    /// # Errors
    /// Returns [`crate::RaidError::Config`] if `config` does not validate.
    pub fn new(repo: R, config: RaidfeldenConfig) -> Result<Self> {
        Self::with_sources(repo, config, Arc::new(SystemClock), Arc::new(ThreadRngIds))
    }

    /// Create a service with explicit time and identifier sources.
    ///
    /// # Errors
    /// Returns [`crate::RaidError::Config`] if `config` does not validate.
    pub fn with_sources(
        repo: R,
        config: RaidfeldenConfig,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn ExternalIdSource>,
    ) -> Result<Self> {
        config.validate()?;
        let ttl = i64::try_from(config.resolution.selection_ttl_secs)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .unwrap_or(TimeDelta::MAX);
        Ok(Self {
            repo,
            clock,
            ids,
            selections: SelectionStore::new(ttl),
            config,
        })
    }

    /// The underlying repository.
    #[must_use]
    pub fn repository(&self) -> &R {
        &self.repo
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &RaidfeldenConfig {
        &self.config
    }

    /// The configured default interactive limit.
    #[must_use]
    pub fn default_interactive_limit(&self) -> usize {
        self.config.resolution.interactive_limit
    }

    /// Number of chains waiting for an answer.
    #[must_use]
    pub fn pending_selections(&self) -> usize {
        self.selections.len()
    }

    /// Drop chains nobody answered within the configured lifetime.
    pub fn purge_abandoned(&self) -> usize {
        self.selections.purge_abandoned(self.clock.now())
    }

    // ------------------------------------------------------------------
    // Operations
    // ------------------------------------------------------------------

    /// Report a raid: `subject_ref` is a level (egg) or a boss name,
    /// `time_left` is `mm` or `mm:ss` until hatch (egg) or end (boss).
    ///
    /// # Errors
    /// Only [`crate::RaidError::PersistenceUnavailable`]; every other failure
    /// is a failed [`Outcome`].
    pub fn report_raid(
        &self,
        gym_ref: &str,
        subject_ref: &str,
        time_left: &str,
        interactive_limit: usize,
        fences: &FenceSet,
    ) -> Result<Outcome> {
        info!(gym = gym_ref, subject = subject_ref, time_left, "Raid report");
        let result = parse_time_left(time_left, self.clock.now()).and_then(|expiry| {
            self.report_subject(
                gym_ref,
                SubjectRef::parse(subject_ref),
                expiry,
                interactive_limit,
                fences,
            )
        });
        settle("report", result)
    }

    /// Report that the active raid at a gym hatched into `subject_ref`.
    ///
    /// # Errors
    /// Only [`crate::RaidError::PersistenceUnavailable`]; every other failure
    /// is a failed [`Outcome`].
    pub fn hatch_raid(
        &self,
        gym_ref: &str,
        subject_ref: &str,
        interactive_limit: usize,
        fences: &FenceSet,
    ) -> Result<Outcome> {
        info!(gym = gym_ref, subject = subject_ref, "Hatch report");
        let name = subject_ref.trim();
        let result = resolvers::resolve_pokemon(&self.repo, name, interactive_limit).and_then(
            |resolution| match resolution {
                Resolution::Resolved(c) => {
                    self.hatch_with_pokemon(PokemonId(c.id), gym_ref, interactive_limit, fences)
                }
                Resolution::Choose(list) => Ok(self.suspend(
                    Continuation::HatchPokemon {
                        gym_ref: gym_ref.to_string(),
                        interactive_limit,
                        fences: fences.clone(),
                    },
                    CatalogKind::Pokemon,
                    name,
                    list,
                )),
            },
        );
        settle("hatch", result)
    }

    /// Continue a suspended chain with the user's 1-based choice.
    ///
    /// # Errors
    /// Only [`crate::RaidError::PersistenceUnavailable`]; every other failure
    /// is a failed [`Outcome`].
    pub fn resume_selection(&self, token: SelectionToken, chosen_index: i64) -> Result<Outcome> {
        debug!(%token, chosen_index, "Selection answer");
        let result = self
            .selections
            .take(token, chosen_index)
            .and_then(|(continuation, chosen)| self.resume(continuation, &chosen));
        settle("resume", result)
    }

    // ------------------------------------------------------------------
    // Report chain
    // ------------------------------------------------------------------

    fn report_subject(
        &self,
        gym_ref: &str,
        subject: SubjectRef,
        expiry: DateTime<Utc>,
        interactive_limit: usize,
        fences: &FenceSet,
    ) -> Result<Outcome> {
        match subject {
            SubjectRef::Level(level) => {
                let level = resolvers::egg_level(level)?;
                self.report_gym(gym_ref, RaidShape::Egg { level }, expiry, interactive_limit, fences)
            }
            SubjectRef::Name(name) => {
                match resolvers::resolve_pokemon(&self.repo, &name, interactive_limit)? {
                    Resolution::Resolved(c) => self.report_with_pokemon(
                        PokemonId(c.id),
                        gym_ref,
                        expiry,
                        interactive_limit,
                        fences,
                    ),
                    Resolution::Choose(list) => Ok(self.suspend(
                        Continuation::ReportPokemon {
                            gym_ref: gym_ref.to_string(),
                            expiry,
                            interactive_limit,
                            fences: fences.clone(),
                        },
                        CatalogKind::Pokemon,
                        &name,
                        list,
                    )),
                }
            }
        }
    }

    fn report_with_pokemon(
        &self,
        pokemon: PokemonId,
        gym_ref: &str,
        expiry: DateTime<Utc>,
        interactive_limit: usize,
        fences: &FenceSet,
    ) -> Result<Outcome> {
        let pokemon = resolvers::load_pokemon(&self.repo, pokemon)?;
        let shape = RaidShape::Boss {
            level: pokemon.boss_level,
            pokemon: pokemon.id,
        };
        self.report_gym(gym_ref, shape, expiry, interactive_limit, fences)
    }

    fn report_gym(
        &self,
        gym_ref: &str,
        shape: RaidShape,
        expiry: DateTime<Utc>,
        interactive_limit: usize,
        fences: &FenceSet,
    ) -> Result<Outcome> {
        let gym_ref = gym_ref.trim();
        match resolvers::resolve_gym(&self.repo, gym_ref, interactive_limit, fences)? {
            Resolution::Resolved(c) => self.report_save(GymId(c.id), shape, expiry),
            Resolution::Choose(list) => Ok(self.suspend(
                Continuation::ReportGym { shape, expiry },
                CatalogKind::Gym,
                gym_ref,
                list,
            )),
        }
    }

    fn report_save(&self, gym: GymId, shape: RaidShape, expiry: DateTime<Utc>) -> Result<Outcome> {
        let gym = resolvers::load_gym(&self.repo, gym)?;
        let pokemon = shape
            .pokemon()
            .map(|id| resolvers::load_pokemon(&self.repo, id))
            .transpose()?;

        let report = upsert::upsert_raid(
            &self.repo,
            self.ids.as_ref(),
            self.clock.now(),
            &gym,
            shape,
            expiry,
        )?;
        let message = outcome::report_message(&report, &gym, pokemon.as_ref(), &self.config.display);
        let summary = RaidSummary::new(&report.raid, &gym, pokemon.as_ref(), report.created);
        Ok(Outcome::success(message, Some(OutcomeData::Raid(summary))))
    }

    // ------------------------------------------------------------------
    // Hatch chain
    // ------------------------------------------------------------------

    fn hatch_with_pokemon(
        &self,
        pokemon: PokemonId,
        gym_ref: &str,
        interactive_limit: usize,
        fences: &FenceSet,
    ) -> Result<Outcome> {
        let gym_ref = gym_ref.trim();
        match resolvers::resolve_gym(&self.repo, gym_ref, interactive_limit, fences)? {
            Resolution::Resolved(c) => self.hatch_save(GymId(c.id), pokemon),
            Resolution::Choose(list) => Ok(self.suspend(
                Continuation::HatchGym { pokemon },
                CatalogKind::Gym,
                gym_ref,
                list,
            )),
        }
    }

    fn hatch_save(&self, gym: GymId, pokemon: PokemonId) -> Result<Outcome> {
        let gym = resolvers::load_gym(&self.repo, gym)?;
        let pokemon = resolvers::load_pokemon(&self.repo, pokemon)?;
        let raid = upsert::hatch_raid(&self.repo, self.clock.now(), &gym, &pokemon)?;
        let summary = RaidSummary::new(&raid, &gym, Some(&pokemon), false);
        Ok(Outcome::success(
            outcome::hatch_message(&gym, &pokemon),
            Some(OutcomeData::Raid(summary)),
        ))
    }

    // ------------------------------------------------------------------
    // Suspension
    // ------------------------------------------------------------------

    fn suspend(
        &self,
        continuation: Continuation,
        kind: CatalogKind,
        query: &str,
        candidates: Vec<Candidate>,
    ) -> Outcome {
        let now = self.clock.now();
        self.selections.purge_abandoned(now);

        let choices = candidates.iter().map(|c| c.name.clone()).collect();
        let token = self.selections.suspend(continuation, candidates, now);
        debug!(%token, %kind, query, "Awaiting selection");
        Outcome::pending(SelectionPrompt {
            token,
            kind,
            query: query.to_string(),
            choices,
        })
    }

    fn resume(&self, continuation: Continuation, chosen: &Candidate) -> Result<Outcome> {
        match continuation {
            Continuation::ReportPokemon {
                gym_ref,
                expiry,
                interactive_limit,
                fences,
            } => self.report_with_pokemon(
                PokemonId(chosen.id),
                &gym_ref,
                expiry,
                interactive_limit,
                &fences,
            ),
            Continuation::ReportGym { shape, expiry } => {
                self.report_save(GymId(chosen.id), shape, expiry)
            }
            Continuation::HatchPokemon {
                gym_ref,
                interactive_limit,
                fences,
            } => self.hatch_with_pokemon(PokemonId(chosen.id), &gym_ref, interactive_limit, &fences),
            Continuation::HatchGym { pokemon } => self.hatch_save(GymId(chosen.id), pokemon),
        }
    }
}

/// Turn recoverable errors into failed outcomes; pass collaborator failures on.
fn settle(operation: &'static str, result: Result<Outcome>) -> Result<Outcome> {
    match result {
        Ok(outcome) => Ok(outcome),
        Err(err) if err.is_recoverable() => {
            debug!(operation, error = %err, "Request rejected");
            Ok(Outcome::failure(&err))
        }
        Err(err) => {
            warn!(operation, error = %err, "Collaborator failure");
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::{ErrorKind, RaidError};
    use crate::ids::SeededIds;
    use crate::repository::InMemoryRepository;
    use crate::types::{Gym, Pokemon, RaidLevel};
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0)
            .single()
            .expect("valid time")
    }

    fn service() -> (RaidService<Arc<InMemoryRepository>>, Arc<ManualClock>) {
        let repo = Arc::new(InMemoryRepository::new());
        for (id, name) in [(1, "ArenaA"), (2, "Park North"), (3, "Park East"), (4, "Park West")] {
            repo.insert_gym(Gym {
                id: GymId(id),
                name: name.into(),
                latitude: 0.0,
                longitude: 0.0,
                fences: vec!["center".into()],
            });
        }
        for (id, name, level) in [(248, "Tyranitar", 4), (150, "Mewtwo", 5), (151, "Mew", 5)] {
            repo.insert_pokemon(Pokemon {
                id: PokemonId(id),
                name: name.into(),
                boss_level: RaidLevel::new(level).expect("level"),
            });
        }
        let clock = Arc::new(ManualClock::new(t0()));
        let service = RaidService::with_sources(
            repo,
            RaidfeldenConfig::default(),
            clock.clone(),
            Arc::new(SeededIds::new(99)),
        )
        .expect("valid config");
        (service, clock)
    }

    fn all() -> FenceSet {
        FenceSet::unrestricted()
    }

    #[test]
    fn egg_report_creates_raid() {
        let (svc, _) = service();
        let out = svc.report_raid("ArenaA", "3", "10", 5, &all()).expect("report");
        assert!(out.success, "{}", out.message);
        let raid = out.raid().expect("summary");
        assert!(raid.created);
        assert_eq!(raid.level.get(), 3);
        assert_eq!(raid.battle_at, t0() + TimeDelta::seconds(600));
        assert_eq!(raid.spawn_at, t0() + TimeDelta::seconds(600 - 3600));
        assert_eq!(raid.end_at, t0() + TimeDelta::seconds(600 + 2700));
        assert_eq!(out.message, "New level 3 raid at ArenaA recorded (hatches around 12:10:00).");
    }

    #[test]
    fn level_out_of_range_is_a_failed_outcome() {
        let (svc, _) = service();
        let out = svc.report_raid("ArenaA", "25", "10", 5, &all()).expect("report");
        assert!(!out.success);
        assert_eq!(out.error, Some(ErrorKind::LevelOutOfRange));
        assert!(svc.repository().raids().is_empty());
    }

    #[test]
    fn bad_time_checked_first() {
        let (svc, _) = service();
        let out = svc.report_raid("nowhere", "25", "1:2:3", 5, &all()).expect("report");
        assert_eq!(out.error, Some(ErrorKind::InvalidTimeFormat));
    }

    #[test]
    fn ambiguous_gym_suspends_and_resumes() {
        let (svc, clock) = service();
        let out = svc.report_raid("park", "5", "20", 5, &all()).expect("report");
        let prompt = out.prompt().expect("pending").clone();
        assert_eq!(prompt.choices, ["Park North", "Park East", "Park West"]);
        assert!(svc.repository().raids().is_empty());

        clock.advance(TimeDelta::seconds(30));
        let bad = svc.resume_selection(prompt.token, 4).expect("resume");
        assert_eq!(bad.error, Some(ErrorKind::InvalidSelection));

        let done = svc.resume_selection(prompt.token, 2).expect("resume");
        assert!(done.success, "{}", done.message);
        let raid = done.raid().expect("summary");
        assert_eq!(raid.gym_name, "Park East");
        // Expiry was fixed when the report arrived, not when it was resumed.
        assert_eq!(raid.battle_at, t0() + TimeDelta::minutes(20));
        assert_eq!(svc.pending_selections(), 0);
    }

    #[test]
    fn over_limit_fails_with_count() {
        let (svc, _) = service();
        let out = svc.report_raid("park", "5", "20", 2, &all()).expect("report");
        assert_eq!(out.error, Some(ErrorKind::TooManyMatches));
        assert!(out.message.starts_with("3 gyms"));
    }

    #[test]
    fn ambiguous_boss_then_gym() {
        let (svc, _) = service();
        let first = svc.report_raid("park", "me", "40", 5, &all()).expect("report");
        let boss_prompt = first.prompt().expect("boss prompt").clone();
        assert_eq!(boss_prompt.kind, CatalogKind::Pokemon);
        assert_eq!(boss_prompt.choices, ["Mewtwo", "Mew"]);

        let second = svc.resume_selection(boss_prompt.token, 1).expect("resume");
        let gym_prompt = second.prompt().expect("gym prompt").clone();
        assert_eq!(gym_prompt.kind, CatalogKind::Gym);

        let done = svc.resume_selection(gym_prompt.token, 3).expect("resume");
        let raid = done.raid().expect("summary");
        assert_eq!(raid.pokemon_name.as_deref(), Some("Mewtwo"));
        assert_eq!(raid.level.get(), 5);
        assert_eq!(raid.end_at, t0() + TimeDelta::minutes(40));
        assert_eq!(raid.gym_name, "Park West");
    }

    #[test]
    fn hatch_without_raid_fails() {
        let (svc, _) = service();
        let out = svc.hatch_raid("ArenaA", "Tyranitar", 5, &all()).expect("hatch");
        assert_eq!(out.error, Some(ErrorKind::NoActiveEvent));
        assert_eq!(out.message, "There is currently no raid recorded at gym \"ArenaA\".");
    }

    #[test]
    fn hatch_sets_boss_only() {
        let (svc, clock) = service();
        let created = svc.report_raid("ArenaA", "4", "10", 5, &all()).expect("report");
        let created = created.raid().expect("summary").clone();

        clock.advance(TimeDelta::seconds(200));
        let out = svc.hatch_raid("ArenaA", "Tyranitar", 5, &all()).expect("hatch");
        assert!(out.success, "{}", out.message);
        let hatched = out.raid().expect("summary");
        assert_eq!(hatched.external_id, created.external_id);
        assert_eq!(hatched.spawn_at, created.spawn_at);
        assert_eq!(hatched.end_at, created.end_at);
        assert_eq!(hatched.pokemon_id, Some(PokemonId(248)));
        assert_eq!(out.message, "Tyranitar is now the raid boss at gym \"ArenaA\".");
    }

    #[test]
    fn fences_exclude_gyms() {
        let (svc, _) = service();
        let south: FenceSet = ["south"].into_iter().collect();
        let out = svc.report_raid("ArenaA", "3", "10", 5, &south).expect("report");
        assert_eq!(out.error, Some(ErrorKind::NotFound));
    }

    #[test]
    fn unknown_token_is_a_failed_outcome() {
        let (svc, _) = service();
        let out = svc.resume_selection(SelectionToken::new(), 1).expect("resume");
        assert_eq!(out.error, Some(ErrorKind::UnknownSelection));
    }

    #[test]
    fn persistence_failure_surfaces() {
        let (svc, _) = service();
        svc.repository().set_unavailable(true);
        let err = svc.report_raid("ArenaA", "3", "10", 5, &all()).expect_err("unavailable");
        assert!(matches!(err, RaidError::PersistenceUnavailable(_)));
    }

    #[test]
    fn abandoned_selection_becomes_unknown() {
        let (svc, clock) = service();
        let out = svc.report_raid("park", "5", "20", 5, &all()).expect("report");
        let token = out.prompt().expect("pending").token;

        clock.advance(TimeDelta::minutes(16));
        assert_eq!(svc.purge_abandoned(), 1);
        let late = svc.resume_selection(token, 1).expect("resume");
        assert_eq!(late.error, Some(ErrorKind::UnknownSelection));
    }
}
