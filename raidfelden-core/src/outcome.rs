//! Outcome: the uniform result every engine operation returns.
//!
//! Serialises as `{ success, message, data?, error? }`. Messages are meant
//! to be posted to the chat as-is; `error` carries the machine-readable kind.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::DisplayConfig;
use crate::error::{ErrorKind, RaidError};
use crate::types::{CatalogKind, ExternalId, Gym, GymId, Pokemon, PokemonId, Raid, RaidLevel, SelectionToken};
use crate::upsert::UpsertReport;

/// Result of a report, hatch or selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    /// Whether the operation completed.
    pub success: bool,
    /// Human-readable text for the reporter.
    pub message: String,
    /// The saved raid, or the choices awaiting an answer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<OutcomeData>,
    /// Why the operation failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
}

/// Payload of an [`Outcome`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutcomeData {
    /// A raid was created or amended.
    Raid(RaidSummary),
    /// The chain is suspended until the user picks a choice.
    Pending(SelectionPrompt),
}

/// Snapshot of a saved raid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaidSummary {
    /// Raid identifier.
    pub external_id: ExternalId,
    /// Hosting gym.
    pub gym_id: GymId,
    /// Hosting gym's name.
    pub gym_name: String,
    /// Raid tier.
    pub level: RaidLevel,
    /// Boss, if known.
    pub pokemon_id: Option<PokemonId>,
    /// Boss name, if known to this operation.
    pub pokemon_name: Option<String>,
    /// Egg spawn.
    pub spawn_at: DateTime<Utc>,
    /// Hatch.
    pub battle_at: DateTime<Utc>,
    /// End.
    pub end_at: DateTime<Utc>,
    /// Whether the raid was newly created.
    pub created: bool,
}

impl RaidSummary {
    /// Summarise `raid` at `gym`.
    #[must_use]
    pub fn new(raid: &Raid, gym: &Gym, pokemon: Option<&Pokemon>, created: bool) -> Self {
        Self {
            external_id: raid.external_id,
            gym_id: gym.id,
            gym_name: gym.name.clone(),
            level: raid.shape.level(),
            pokemon_id: raid.shape.pokemon(),
            pokemon_name: pokemon
                .filter(|p| Some(p.id) == raid.shape.pokemon())
                .map(|p| p.name.clone()),
            spawn_at: raid.window.spawn_at,
            battle_at: raid.window.battle_at,
            end_at: raid.window.end_at,
            created,
        }
    }
}

/// The list a suspended chain is waiting on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionPrompt {
    /// Token to pass back with the chosen index.
    pub token: SelectionToken,
    /// Catalog the choices come from.
    pub kind: CatalogKind,
    /// The reference that was ambiguous.
    pub query: String,
    /// Display names, answer with the 1-based position.
    pub choices: Vec<String>,
}

impl Outcome {
    /// A completed operation.
    #[must_use]
    pub fn success(message: impl Into<String>, data: Option<OutcomeData>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data,
            error: None,
        }
    }

    /// A recovered failure.
    #[must_use]
    pub fn failure(err: &RaidError) -> Self {
        Self {
            success: false,
            message: user_message(err),
            data: None,
            error: Some(err.kind()),
        }
    }

    /// A chain waiting for the user to pick one of `prompt.choices`.
    #[must_use]
    pub fn pending(prompt: SelectionPrompt) -> Self {
        Self {
            success: false,
            message: prompt_message(&prompt),
            data: Some(OutcomeData::Pending(prompt)),
            error: None,
        }
    }

    /// Whether this outcome awaits a selection.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(self.data, Some(OutcomeData::Pending(_)))
    }

    /// The prompt, if pending.
    #[must_use]
    pub fn prompt(&self) -> Option<&SelectionPrompt> {
        match &self.data {
            Some(OutcomeData::Pending(p)) => Some(p),
            _ => None,
        }
    }

    /// The raid summary, if a raid was saved.
    #[must_use]
    pub fn raid(&self) -> Option<&RaidSummary> {
        match &self.data {
            Some(OutcomeData::Raid(r)) => Some(r),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

fn kind_noun(kind: CatalogKind, plural: bool) -> &'static str {
    match (kind, plural) {
        (CatalogKind::Gym, false) => "gym",
        (CatalogKind::Gym, true) => "gyms",
        (CatalogKind::Pokemon, _) => "pokemon",
    }
}

/// User-facing text for a recovered error.
#[must_use]
pub fn user_message(err: &RaidError) -> String {
    match err {
        RaidError::InvalidTimeFormat { .. } => {
            "The remaining time must be given as mm or mm:ss.".to_string()
        }
        RaidError::LevelOutOfRange { level } if *level < 1 => {
            "The smallest allowed raid level is 1.".to_string()
        }
        RaidError::LevelOutOfRange { .. } => "The largest allowed raid level is 5.".to_string(),
        RaidError::NotFound { kind, query } => {
            format!("No {} matching \"{query}\" was found.", kind_noun(*kind, false))
        }
        RaidError::TooManyMatches {
            kind, query, count, ..
        } => format!(
            "{count} {} match \"{query}\". Please be more specific.",
            kind_noun(*kind, true)
        ),
        RaidError::NoActiveEvent { gym } => {
            format!("There is currently no raid recorded at gym \"{gym}\".")
        }
        RaidError::InvalidSelection { count, .. } => {
            format!("Please answer with a number between 1 and {count}.")
        }
        RaidError::UnknownSelection(_) => "This selection is no longer open.".to_string(),
        RaidError::PersistenceUnavailable(_) => {
            "The raid database is currently unavailable.".to_string()
        }
        RaidError::ExternalIdConflict { .. } | RaidError::Config(_) | RaidError::Io(_) => {
            "Internal error.".to_string()
        }
    }
}

fn prompt_message(prompt: &SelectionPrompt) -> String {
    let mut message = format!(
        "\"{}\" is not unique. Reply with the number of the {} you mean:",
        prompt.query,
        kind_noun(prompt.kind, false)
    );
    for (i, choice) in prompt.choices.iter().enumerate() {
        message.push_str(&format!("\n{}. {choice}", i + 1));
    }
    message
}

/// Text confirming a report. Differs for new eggs, new bosses and amendments.
#[must_use]
pub fn report_message(
    report: &UpsertReport,
    gym: &Gym,
    pokemon: Option<&Pokemon>,
    display: &DisplayConfig,
) -> String {
    let boss_known = report.reported.is_boss();
    let at = display.format(report.raid.window.boundary(boss_known));
    let level = report.reported.level();

    match (pokemon.filter(|_| boss_known), report.created) {
        (None, true) => format!("New level {level} raid at {} recorded (hatches around {at}).", gym.name),
        (None, false) => format!("Level {level} raid at {} updated (hatches around {at}).", gym.name),
        (Some(p), true) => format!("New raid boss {} at {} recorded (ends around {at}).", p.name, gym.name),
        (Some(p), false) => format!("Raid boss {} at {} updated (ends around {at}).", p.name, gym.name),
    }
}

/// Text confirming a hatch.
#[must_use]
pub fn hatch_message(gym: &Gym, pokemon: &Pokemon) -> String {
    format!("{} is now the raid boss at gym \"{}\".", pokemon.name, gym.name)
}
