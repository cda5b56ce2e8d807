//! Identifiers used across the call orchestrator

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(
    /// Identity of a call participant, local or remote
    ParticipantId
);

string_id!(
    /// Room the publisher joins on the relay
    RoomId
);

string_id!(
    /// Identifier of a consuming connection, derived from both participant ids
    ConsumerId
);

impl ParticipantId {
    /// Generate a random participant id for anonymous sessions
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl ConsumerId {
    /// The consumer id for `remote` as seen from `local`.
    ///
    /// Always the same for the same pair, so duplicate checks are plain lookups.
    pub fn derive(local: &ParticipantId, remote: &ParticipantId) -> Self {
        Self(format!("{local}~{remote}"))
    }
}

/// Stamp of one peer connection instance, unique within a `CallClient`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub(crate) fn new(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pc#{}", self.0)
    }
}
