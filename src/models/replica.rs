//! Replica mode: how much of a row update messages carry.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Whether change messages carry full rows or only changed columns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Replica {
    /// Updates carry only the columns that changed; the view shallow-merges
    /// them into the existing row.
    #[default]
    Partial,

    /// Every change message carries the full row; updates replace the row
    /// wholesale.
    Full,
}

impl Replica {
    /// Wire value for the `replica` query parameter.
    pub fn as_str(&self) -> &'static str {
        match self {
            Replica::Partial => "partial",
            Replica::Full => "full",
        }
    }
}

impl fmt::Display for Replica {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
