//! Backward partial matching.
//!
//! Resolves a partially specified key against a candidate set by comparing
//! components from the end (the most specific part first) and only widening
//! toward the front while more than one candidate survives. Works for image
//! ids and for filesystem paths through [`TrailingComponents`].

use crate::error::{ErrorKind, Result};
use crate::id::ImageId;
use std::fmt;
use std::path::Path;

/// A key addressable by components counted from its end.
pub trait TrailingComponents {
    /// Component `idx` positions from the end (`0` is the last component).
    ///
    /// `None` means the key has no component at that depth; `Some(None)` is a
    /// component that exists but carries no value. Both act as wildcards
    /// during matching.
    fn component_from_end(&self, idx: usize) -> Option<Option<&str>>;
}

impl TrailingComponents for ImageId {
    // Components are [site, parts...]; the site slot always exists and is a
    // wildcard when untagged.
    fn component_from_end(&self, idx: usize) -> Option<Option<&str>> {
        let parts = self.parts();
        if idx < parts.len() {
            Some(Some(&parts[parts.len() - 1 - idx]))
        } else if idx == parts.len() {
            Some(self.site())
        } else {
            None
        }
    }
}

impl TrailingComponents for Path {
    fn component_from_end(&self, idx: usize) -> Option<Option<&str>> {
        self.components().rev().nth(idx).map(|c| c.as_os_str().to_str())
    }
}

/// Result of matching one query against a candidate set.
#[derive(Debug, PartialEq, Eq)]
pub enum MatchOutcome<T> {
    Unique(T),
    NoMatch,
    /// The query ran out of components with several candidates still viable.
    Ambiguous(Vec<T>),
}

/// Match `query` against `candidates` from the last component backward.
///
/// A comparison at a given depth passes on equality, or when either side is
/// a wildcard at that depth. Candidate order does not affect the outcome.
pub fn match_partial_reversed<'a, C, Q>(
    candidates: impl IntoIterator<Item = &'a C>,
    query: &Q,
) -> MatchOutcome<&'a C>
where
    C: TrailingComponents + ?Sized,
    Q: TrailingComponents + ?Sized,
{
    let mut survivors: Vec<&C> = candidates.into_iter().collect();
    let mut idx = 0;
    loop {
        let Some(query_component) = query.component_from_end(idx) else {
            return MatchOutcome::Ambiguous(survivors);
        };
        survivors.retain(|candidate| {
            match (candidate.component_from_end(idx), query_component) {
                (None, _) | (Some(None), _) | (_, None) => true,
                (Some(Some(cc)), Some(qc)) => cc == qc,
            }
        });
        match survivors.len() {
            0 => return MatchOutcome::NoMatch,
            1 => return MatchOutcome::Unique(survivors[0]),
            _ => idx += 1,
        }
    }
}

/// [`match_partial_reversed`] with ambiguity lifted into the error channel.
///
/// Ambiguity is an error by default; with `ignore_ambiguous` it degrades to
/// no match.
pub fn resolve_partial<'a, C, Q>(
    candidates: impl IntoIterator<Item = &'a C>,
    query: &Q,
    ignore_ambiguous: bool,
) -> Result<Option<&'a C>>
where
    C: TrailingComponents + ?Sized,
    Q: TrailingComponents + fmt::Debug + ?Sized,
{
    match match_partial_reversed(candidates, query) {
        MatchOutcome::Unique(found) => Ok(Some(found)),
        MatchOutcome::NoMatch => Ok(None),
        MatchOutcome::Ambiguous(survivors) => {
            if ignore_ambiguous {
                tracing::debug!(candidates = survivors.len(), "ignoring ambiguous partial match");
                Ok(None)
            } else {
                exn::bail!(ErrorKind::Ambiguous(format!(
                    "{query:?} still matches {} candidates",
                    survivors.len()
                )));
            }
        }
    }
}
