//! Search outcome distinguishing "nothing matched" from a result list.

use serde::{Deserialize, Serialize};

/// Result of a keyword or similarity search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "results", rename_all = "snake_case")]
pub enum Matches<T> {
    /// At least one record matched.
    Found(Vec<T>),
    /// The search completed and nothing matched.
    NoMatches,
}

impl<T> Matches<T> {
    /// Wraps `results`, mapping an empty list to [`Matches::NoMatches`].
    #[must_use]
    pub fn from_vec(results: Vec<T>) -> Self {
        if results.is_empty() {
            Self::NoMatches
        } else {
            Self::Found(results)
        }
    }

    /// Returns whether nothing matched.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::NoMatches)
    }

    /// Number of matches.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Found(results) => results.len(),
            Self::NoMatches => 0,
        }
    }

    /// Borrows the matches as a slice (empty for [`Matches::NoMatches`]).
    #[must_use]
    pub fn as_slice(&self) -> &[T] {
        match self {
            Self::Found(results) => results,
            Self::NoMatches => &[],
        }
    }

    /// Consumes the outcome, returning the matches.
    #[must_use]
    pub fn into_vec(self) -> Vec<T> {
        match self {
            Self::Found(results) => results,
            Self::NoMatches => Vec::new(),
        }
    }
}

impl<T> Default for Matches<T> {
    fn default() -> Self {
        Self::NoMatches
    }
}

impl<T> From<Vec<T>> for Matches<T> {
    fn from(results: Vec<T>) -> Self {
        Self::from_vec(results)
    }
}
