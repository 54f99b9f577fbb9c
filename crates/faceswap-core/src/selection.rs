//! Face index selections as given on the command line.
//!
//! `"-1"` selects every face on that side; otherwise a comma separated list of
//! zero-based, left-to-right positions (duplicates allowed).

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Caller-facing spelling of [`IndexSelection::All`].
pub const ALL_SENTINEL: &str = "-1";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SelectionError {
    #[error("empty index selection — use \"-1\" for all faces")]
    Empty,
    #[error("invalid face index {raw:?}: expected a non-negative integer or \"-1\"")]
    InvalidIndex { raw: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum IndexSelection {
    #[default]
    All,
    Explicit(Vec<usize>),
}

impl IndexSelection {
    pub fn is_all(&self) -> bool {
        matches!(self, IndexSelection::All)
    }

    /// Concrete indices for a side with `available` faces; `All` becomes `0..available`.
    pub fn expand(&self, available: usize) -> Vec<usize> {
        match self {
            IndexSelection::All => (0..available).collect(),
            IndexSelection::Explicit(indices) => indices.clone(),
        }
    }
}

impl FromStr for IndexSelection {
    type Err = SelectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(SelectionError::Empty);
        }
        if s == ALL_SENTINEL {
            return Ok(IndexSelection::All);
        }

        s.split(',')
            .map(|part| {
                let part = part.trim();
                part.parse::<usize>()
                    .map_err(|_| SelectionError::InvalidIndex { raw: part.to_string() })
            })
            .collect::<Result<Vec<_>, _>>()
            .map(IndexSelection::Explicit)
    }
}

impl fmt::Display for IndexSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexSelection::All => f.write_str(ALL_SENTINEL),
            IndexSelection::Explicit(indices) => {
                let parts: Vec<String> = indices.iter().map(|i| i.to_string()).collect();
                f.write_str(&parts.join(","))
            }
        }
    }
}
