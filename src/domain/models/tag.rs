//! Invalidation tags.

use serde::{Deserialize, Serialize};
use std::fmt;

/// An invalidation label.
///
/// `Type` is the wildcard form `(User, *)`; `Instance` names one record,
/// `(User, 42)`. Queries provide tags, mutations invalidate them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Tag {
    Instance { kind: String, id: String },
    Type(String),
}

impl Tag {
    /// Wildcard tag covering every record of `kind`.
    pub fn kind_of(kind: impl Into<String>) -> Self {
        Self::Type(kind.into())
    }

    /// Tag for a single record.
    pub fn instance(kind: impl Into<String>, id: impl ToString) -> Self {
        Self::Instance {
            kind: kind.into(),
            id: id.to_string(),
        }
    }

    pub fn kind(&self) -> &str {
        match self {
            Self::Type(kind) | Self::Instance { kind, .. } => kind,
        }
    }

    /// Instance id, `None` for the wildcard form.
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Type(_) => None,
            Self::Instance { id, .. } => Some(id),
        }
    }

    /// Whether invalidating `self` affects a query that provided `provided`.
    ///
    /// A wildcard hits every tag of its kind. An instance hits the same
    /// instance and queries that only declared the wildcard of its kind.
    pub fn invalidates(&self, provided: &Self) -> bool {
        if self.kind() != provided.kind() {
            return false;
        }
        match (self.id(), provided.id()) {
            (None, _) | (Some(_), None) => true,
            (Some(a), Some(b)) => a == b,
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Type(kind) => write!(f, "({kind}, *)"),
            Self::Instance { kind, id } => write!(f, "({kind}, {id})"),
        }
    }
}
