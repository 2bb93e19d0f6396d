//! Optimistic cache patches.

use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use super::QueryKey;

/// In-place transformation of cached data.
pub type Recipe = Arc<dyn Fn(&mut Value) + Send + Sync>;

/// Which cache entries a patch applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchTarget {
    /// A single query key.
    Key(QueryKey),
    /// Every cached key of an endpoint, whatever its arguments.
    Endpoint(String),
}

/// Forward half of an optimistic update: a target plus a recipe.
///
/// The store turns each applied patch into an `InversePatch` holding the
/// exact prior value.
#[derive(Clone)]
pub struct Patch {
    pub target: PatchTarget,
    recipe: Recipe,
}

impl Patch {
    pub fn for_key<F>(key: QueryKey, recipe: F) -> Self
    where
        F: Fn(&mut Value) + Send + Sync + 'static,
    {
        Self {
            target: PatchTarget::Key(key),
            recipe: Arc::new(recipe),
        }
    }

    pub fn for_endpoint<F>(endpoint: impl Into<String>, recipe: F) -> Self
    where
        F: Fn(&mut Value) + Send + Sync + 'static,
    {
        Self {
            target: PatchTarget::Endpoint(endpoint.into()),
            recipe: Arc::new(recipe),
        }
    }

    pub fn recipe(&self) -> &Recipe {
        &self.recipe
    }
}

impl fmt::Debug for Patch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Patch")
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}
