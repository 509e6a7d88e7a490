//! Identifier newtypes

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(Uuid);

        impl $name {
            /// Create a new unique ID using UUID v7 (time-sortable)
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            /// Get the string representation of this ID
            #[must_use]
            pub fn as_str(&self) -> String {
                self.0.to_string()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }
    };
}

uuid_id!(
    /// Identifier of a game session
    SessionId
);
uuid_id!(
    /// Identifier of an event log entry
    EventId
);
uuid_id!(
    /// Identifier of a drawing on the field
    DrawingId
);
uuid_id!(
    /// Identifier of a recorded sync conflict
    ConflictId
);

/// Roster identifier of a player (shirt number or roster key).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PlayerId(String);

impl PlayerId {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PlayerId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_ids_are_unique_and_parse_back() {
        let first = SessionId::new();
        let second = SessionId::new();
        assert_ne!(first, second);

        let parsed: SessionId = first.as_str().parse().unwrap();
        assert_eq!(parsed, first);
    }

    #[test]
    fn v7_ids_sort_by_creation_time() {
        let earlier = ConflictId::new();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let later = ConflictId::new();
        assert!(earlier.as_str() < later.as_str());
    }

    #[test]
    fn player_id_serializes_as_plain_string() {
        let id = PlayerId::new("9");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"9\"");
    }
}
