//! Error types for the raid engine.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Top-level error type for all raid engine operations.
///
/// Every variant except [`RaidError::PersistenceUnavailable`],
/// [`RaidError::ExternalIdConflict`], [`RaidError::Config`] and [`RaidError::Io`]
/// is recovered by the service layer and turned into a
/// failed [`crate::Outcome`].
#[derive(Error, Debug)]
pub enum RaidError {
    /// The remaining-time text was neither `mm` nor `mm:ss`.
    #[error("Invalid time format: {input:?} (expected mm or mm:ss)")]
    InvalidTimeFormat {
        /// The rejected input.
        input: String,
    },

    /// A raid level outside 1..=5 was given.
    #[error("Raid level out of range: {level} (allowed: 1..=5)")]
    LevelOutOfRange {
        /// The rejected level.
        level: i64,
    },

    /// No catalog entry matched the reference.
    #[error("No {kind} matches {query:?}")]
    NotFound {
        /// Which catalog was searched.
        kind: crate::CatalogKind,
        /// The reference text.
        query: String,
    },

    /// More catalog entries matched than may be presented interactively.
    #[error("{count} {kind} entries match {query:?} (limit: {limit})")]
    TooManyMatches {
        /// Which catalog was searched.
        kind: crate::CatalogKind,
        /// The reference text.
        query: String,
        /// How many entries matched.
        count: usize,
        /// The interactive limit that was exceeded.
        limit: usize,
    },

    /// A hatch was reported for a gym without an active raid.
    #[error("No active raid at gym {gym:?}")]
    NoActiveEvent {
        /// Display name of the gym.
        gym: String,
    },

    /// A selection index outside the presented choices.
    #[error("Invalid selection {index} (choices: 1..={count})")]
    InvalidSelection {
        /// The 1-based index supplied.
        index: i64,
        /// Number of choices that were presented.
        count: usize,
    },

    /// A selection token that is unknown or was abandoned.
    #[error("Unknown selection token: {0}")]
    UnknownSelection(crate::SelectionToken),

    /// An external id is already taken by a raid at another gym.
    #[error("External raid id {id} is already taken by another raid")]
    ExternalIdConflict {
        /// The contested id.
        id: crate::ExternalId,
    },

    /// The persistence collaborator failed.
    #[error("Persistence unavailable: {0}")]
    PersistenceUnavailable(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rusqlite::Error> for RaidError {
    fn from(err: rusqlite::Error) -> Self {
        Self::PersistenceUnavailable(err.to_string())
    }
}

/// Machine-readable error kind exposed alongside user-facing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// See [`RaidError::InvalidTimeFormat`].
    InvalidTimeFormat,
    /// See [`RaidError::LevelOutOfRange`].
    LevelOutOfRange,
    /// See [`RaidError::NotFound`].
    NotFound,
    /// See [`RaidError::TooManyMatches`].
    TooManyMatches,
    /// See [`RaidError::NoActiveEvent`].
    NoActiveEvent,
    /// See [`RaidError::InvalidSelection`].
    InvalidSelection,
    /// See [`RaidError::UnknownSelection`].
    UnknownSelection,
    /// See [`RaidError::PersistenceUnavailable`].
    PersistenceUnavailable,
    /// See [`RaidError::ExternalIdConflict`], [`RaidError::Config`] and [`RaidError::Io`].
    Internal,
}

impl RaidError {
    /// The machine-readable kind of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidTimeFormat { .. } => ErrorKind::InvalidTimeFormat,
            Self::LevelOutOfRange { .. } => ErrorKind::LevelOutOfRange,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::TooManyMatches { .. } => ErrorKind::TooManyMatches,
            Self::NoActiveEvent { .. } => ErrorKind::NoActiveEvent,
            Self::InvalidSelection { .. } => ErrorKind::InvalidSelection,
            Self::UnknownSelection(_) => ErrorKind::UnknownSelection,
            Self::PersistenceUnavailable(_) => ErrorKind::PersistenceUnavailable,
            Self::ExternalIdConflict { .. } | Self::Config(_) | Self::Io(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Whether the service layer may turn this error into a failed outcome.
    ///
    /// Collaborator failures have no local remedy and are surfaced to the caller.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            Self::PersistenceUnavailable(_)
                | Self::ExternalIdConflict { .. }
                | Self::Config(_)
                | Self::Io(_)
        )
    }
}

/// Convenience Result type alias.
pub type Result<T> = std::result::Result<T, RaidError>;
