// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Actor identifiers
//!
//! The `id` module provides the `ActorId` type, an opaque globally unique
//! identifier assigned to every actor for its whole lifetime.
//!

use serde::{Deserialize, Serialize};

use uuid::Uuid;

use std::fmt::{self, Display, Formatter};

/// Opaque, globally unique actor identifier.
///
/// Ids are stable for the lifetime of an actor and unique within the system.
/// A forked actor and its worker-side counterpart share the same id.
#[derive(
    Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ActorId(String);

impl ActorId {
    /// Generates a fresh unique identifier.
    pub(crate) fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ActorId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ActorId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for ActorId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    use std::collections::HashSet;

    #[test]
    fn test_generated_ids_are_unique() {
        let ids: HashSet<ActorId> =
            (0..1000).map(|_| ActorId::generate()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn test_display_matches_inner() {
        let id = ActorId::from("abc123");
        assert_eq!(id.to_string(), "abc123");
        assert_eq!(id.as_str(), "abc123");
    }
}
