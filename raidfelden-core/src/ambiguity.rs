//! Ambiguity Resolution
//!
//! Turns a free-text reference into exactly one catalog entry:
//!
//! 1. exactly one case-insensitive exact match → resolved
//! 2. several exact matches, or only partial matches → offer the list,
//!    unless it is longer than the interactive limit
//! 3. nothing → not found
//!
//! A list offered to the user suspends the resolution chain. The chain is
//! stored as a [`PendingSelection`] keyed by a [`SelectionToken`] and resumed
//! when the user answers with a 1-based index. The continuation is plain data
//! (generic `C`), so the same store serves gym and boss resolution alike.

use std::collections::HashMap;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{RaidError, Result};
use crate::types::{Candidate, CatalogKind, SelectionToken};

/// Result of matching a reference against a candidate list.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// A single unambiguous entry.
    Resolved(Candidate),
    /// Several entries the user must choose between, in catalog order.
    Choose(Vec<Candidate>),
}

/// Resolve `query` against `candidates` (already filtered, in catalog order).
///
/// # Errors
/// - [`RaidError::NotFound`] if nothing is eligible.
/// - [`RaidError::TooManyMatches`] if more than `interactive_limit` entries
///   would have to be offered.
pub fn resolve(
    kind: CatalogKind,
    query: &str,
    candidates: Vec<Candidate>,
    interactive_limit: usize,
) -> Result<Resolution> {
    let needle = query.trim().to_lowercase();
    let (mut exact, partial): (Vec<_>, Vec<_>) = candidates
        .into_iter()
        .partition(|c| c.name.to_lowercase() == needle);

    if exact.len() == 1 {
        if let Some(only) = exact.pop() {
            return Ok(Resolution::Resolved(only));
        }
    }

    let offered = if exact.is_empty() { partial } else { exact };
    match offered.len() {
        0 => Err(RaidError::NotFound {
            kind,
            query: query.to_string(),
        }),
        count if count > interactive_limit => Err(RaidError::TooManyMatches {
            kind,
            query: query.to_string(),
            count,
            limit: interactive_limit,
        }),
        _ => Ok(Resolution::Choose(offered)),
    }
}

// ---------------------------------------------------------------------------
// Pending selections
// ---------------------------------------------------------------------------

/// A suspended resolution chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingSelection<C> {
    /// Key the user's answer is routed by.
    pub token: SelectionToken,
    /// Where to resume, with every original request parameter.
    pub continuation: C,
    /// Exactly the list that was shown to the user.
    pub candidates: Vec<Candidate>,
    /// When the list was shown.
    pub created_at: DateTime<Utc>,
}

/// Thread-safe store of suspended resolution chains.
#[derive(Debug)]
pub struct SelectionStore<C> {
    pending: Mutex<HashMap<SelectionToken, PendingSelection<C>>>,
    ttl: TimeDelta,
}

impl<C> SelectionStore<C> {
    /// Create a store whose abandoned entries are purged after `ttl`.
    #[must_use]
    pub fn new(ttl: TimeDelta) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Suspend a chain and return its token.
    pub fn suspend(
        &self,
        continuation: C,
        candidates: Vec<Candidate>,
        now: DateTime<Utc>,
    ) -> SelectionToken {
        let token = SelectionToken::new();
        self.pending.lock().insert(
            token,
            PendingSelection {
                token,
                continuation,
                candidates,
                created_at: now,
            },
        );
        token
    }

    /// Take the chain for `token`, resolved to the candidate at 1-based `index`.
    ///
    /// An out-of-range index leaves the chain in place so the user can answer again.
    ///
    /// # Errors
    /// - [`RaidError::UnknownSelection`] if no chain is stored under `token`.
    /// - [`RaidError::InvalidSelection`] if `index` is outside `1..=count`.
    pub fn take(&self, token: SelectionToken, index: i64) -> Result<(C, Candidate)> {
        let mut pending = self.pending.lock();
        let entry = pending
            .get(&token)
            .ok_or(RaidError::UnknownSelection(token))?;

        let count = entry.candidates.len();
        let position = usize::try_from(index)
            .ok()
            .filter(|i| (1..=count).contains(i))
            .ok_or(RaidError::InvalidSelection { index, count })?;

        let entry = pending
            .remove(&token)
            .ok_or(RaidError::UnknownSelection(token))?;
        let mut candidates = entry.candidates;
        let chosen = candidates.swap_remove(position - 1);
        Ok((entry.continuation, chosen))
    }

    /// Look at a chain without consuming it.
    #[must_use]
    pub fn get(&self, token: SelectionToken) -> Option<PendingSelection<C>>
    where
        C: Clone,
    {
        self.pending.lock().get(&token).cloned()
    }

    /// Drop chains older than the configured lifetime. Returns how many were dropped.
    pub fn purge_abandoned(&self, now: DateTime<Utc>) -> usize {
        let Some(cutoff) = now.checked_sub_signed(self.ttl) else {
            return 0;
        };
        let mut pending = self.pending.lock();
        let before = pending.len();
        pending.retain(|_, p| p.created_at > cutoff);
        let purged = before - pending.len();
        if purged > 0 {
            debug!(purged, remaining = pending.len(), "Purged abandoned selections");
        }
        purged
    }

    /// Number of suspended chains.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Whether no chain is suspended.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog(names: &[&str]) -> Vec<Candidate> {
        names
            .iter()
            .enumerate()
            .map(|(i, n)| Candidate::new(i64::try_from(i).expect("small") + 1, *n))
            .collect()
    }

    #[test]
    fn single_exact_match_resolves() {
        let r = resolve(
            CatalogKind::Gym,
            "church",
            catalog(&["Church", "Church Square", "Old Church"]),
            5,
        )
        .expect("resolve");
        assert_eq!(r, Resolution::Resolved(Candidate::new(1, "Church")));
    }

    #[test]
    fn exact_match_wins_even_over_limit() {
        let r = resolve(
            CatalogKind::Gym,
            "Church",
            catalog(&["Church", "Church A", "Church B", "Church C"]),
            1,
        )
        .expect("resolve");
        assert!(matches!(r, Resolution::Resolved(c) if c.id == 1));
    }

    #[test]
    fn several_exact_matches_offer_only_those() {
        let r = resolve(
            CatalogKind::Gym,
            "fountain",
            catalog(&["Fountain", "Fountain Park", "FOUNTAIN"]),
            5,
        )
        .expect("resolve");
        let Resolution::Choose(list) = r else {
            panic!("expected a choice");
        };
        let ids: Vec<_> = list.iter().map(|c| c.id).collect();
        assert_eq!(ids, [1, 3]);
    }

    #[test]
    fn partial_matches_offered_in_catalog_order() {
        let list = catalog(&["Park North", "Park East", "Park West"]);
        let r = resolve(CatalogKind::Gym, "park", list.clone(), 5).expect("resolve");
        assert_eq!(r, Resolution::Choose(list));
    }

    #[test]
    fn single_partial_match_still_asks() {
        let r = resolve(CatalogKind::Pokemon, "tyran", catalog(&["Tyranitar"]), 5)
            .expect("resolve");
        assert!(matches!(r, Resolution::Choose(ref l) if l.len() == 1));
    }

    #[test]
    fn over_limit_reports_count() {
        let err = resolve(
            CatalogKind::Gym,
            "park",
            catalog(&["Park North", "Park East", "Park West"]),
            2,
        )
        .expect_err("too many");
        assert!(matches!(err, RaidError::TooManyMatches { count: 3, limit: 2, .. }));
    }

    #[test]
    fn nothing_is_not_found() {
        let err = resolve(CatalogKind::Gym, "zzz", Vec::new(), 5).expect_err("none");
        assert!(matches!(err, RaidError::NotFound { kind: CatalogKind::Gym, .. }));
    }

    #[test]
    fn take_validates_against_presented_count() {
        let store: SelectionStore<&str> = SelectionStore::new(TimeDelta::minutes(15));
        let token = store.suspend("resume-here", catalog(&["A", "B", "C"]), Utc::now());

        for bad in [0, 4, -1] {
            let err = store.take(token, bad).expect_err("invalid");
            assert!(matches!(err, RaidError::InvalidSelection { count: 3, .. }));
        }
        assert_eq!(store.len(), 1, "invalid answers keep the chain");

        let (cont, chosen) = store.take(token, 2).expect("take");
        assert_eq!(cont, "resume-here");
        assert_eq!(chosen.name, "B");
        assert!(store.is_empty());

        let err = store.take(token, 2).expect_err("consumed");
        assert!(matches!(err, RaidError::UnknownSelection(t) if t == token));
    }

    #[test]
    fn purge_drops_only_abandoned() {
        let store: SelectionStore<u8> = SelectionStore::new(TimeDelta::minutes(15));
        let now = Utc::now();
        store.suspend(1, catalog(&["A"]), now - TimeDelta::minutes(20));
        let fresh = store.suspend(2, catalog(&["B"]), now);

        assert_eq!(store.purge_abandoned(now), 1);
        assert_eq!(store.len(), 1);
        assert!(store.get(fresh).is_some());
    }
}
