//! # Raidfelden Core
//!
//! Report engine for community-sourced raid sightings.
//!
//! A reporter names a gym, either a raid level (an egg) or a boss, and the
//! time left until the egg hatches or the boss leaves. The engine:
//!
//! - **Resolves** free-text gym and boss names against the catalogs,
//!   asking the reporter to pick when a name is ambiguous
//! - **Derives** the raid's spawn, battle and end instants from the time left
//! - **Upserts** the raid, keeping at most one active raid per gym
//! - **Hatches** an active egg into a known boss without moving its window
//!
//! Every operation returns an [`Outcome`]. Only collaborator failures (the
//! database being unreachable) are returned as [`RaidError`].
//!
//! ```text
//! RaidService ─▶ resolvers ─▶ ambiguity ─▶ SelectionStore (suspend / resume)
//!      │
//!      ├─▶ time_window (parse, derive)
//!      └─▶ upsert ─▶ RaidRepository (InMemoryRepository | SqliteStore)
//! ```

#![deny(clippy::unwrap_used)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod ambiguity;
pub mod clock;
pub mod config;
pub mod error;
pub mod ids;
pub mod outcome;
pub mod persistence;
pub mod repository;
pub mod resolvers;
pub mod service;
pub mod time_window;
pub mod types;
pub mod upsert;

pub use config::RaidfeldenConfig;
pub use error::{ErrorKind, RaidError, Result};
pub use outcome::{Outcome, OutcomeData, RaidSummary, SelectionPrompt};
pub use persistence::SqliteStore;
pub use repository::{InMemoryRepository, RaidRepository};
pub use service::{Continuation, RaidService};
pub use types::*;
