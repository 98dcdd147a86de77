//! Entity kinds and the generic local-store record shape

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Logical collections of the practice planner, in sync-dependency order.
///
/// Kinds with no foreign references come first; `Session` references players,
/// seasons/tournaments, and exercises, so it must reach the remote last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Player,
    Season,
    Tournament,
    Exercise,
    Settings,
    Session,
}

impl EntityKind {
    /// All kinds, ordered by ascending dependency priority
    pub const ALL: [Self; 6] = [
        Self::Player,
        Self::Season,
        Self::Tournament,
        Self::Exercise,
        Self::Settings,
        Self::Session,
    ];

    /// Dependency priority: lower values must be applied to the remote first
    #[must_use]
    pub const fn priority(self) -> u8 {
        match self {
            Self::Player => 0,
            Self::Season => 1,
            Self::Tournament => 2,
            Self::Exercise => 3,
            Self::Settings => 4,
            Self::Session => 5,
        }
    }

    /// Stable string tag used in the database and on the wire
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Player => "player",
            Self::Season => "season",
            Self::Tournament => "tournament",
            Self::Exercise => "exercise",
            Self::Settings => "settings",
            Self::Session => "session",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "player" => Ok(Self::Player),
            "season" => Ok(Self::Season),
            "tournament" => Ok(Self::Tournament),
            "exercise" => Ok(Self::Exercise),
            "settings" => Ok(Self::Settings),
            "session" => Ok(Self::Session),
            other => Err(Error::InvalidInput(format!("unknown entity kind: {other}"))),
        }
    }
}

/// A row in a local entity collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRecord {
    /// Entity identifier within its collection
    pub id: String,
    /// Full entity payload as stored locally
    pub data: serde_json::Value,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Last update timestamp (Unix ms)
    pub updated_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_priority_orders_sessions_last() {
        let max = EntityKind::ALL
            .iter()
            .max_by_key(|kind| kind.priority())
            .copied()
            .unwrap();
        assert_eq!(max, EntityKind::Session);
        assert!(EntityKind::Player.priority() < EntityKind::Session.priority());
    }

    #[test]
    fn test_all_is_sorted_by_priority() {
        let mut sorted = EntityKind::ALL;
        sorted.sort_by_key(|kind| kind.priority());
        assert_eq!(sorted, EntityKind::ALL);
    }

    #[test]
    fn test_round_trip_str() {
        for kind in EntityKind::ALL {
            let parsed: EntityKind = kind.as_str().parse().unwrap();
            assert_eq!(parsed, kind);
        }
    }

    #[test]
    fn test_unknown_kind_rejected() {
        assert!("match_report".parse::<EntityKind>().is_err());
    }
}
