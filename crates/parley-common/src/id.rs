use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Random v4 uuid, used for optimistic message ids.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Server-assigned chat session identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(i64);

impl ConversationId {
    pub fn new(raw: i64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> i64 {
        self.0
    }
}

impl From<i64> for ConversationId {
    fn from(raw: i64) -> Self {
        Self(raw)
    }
}

impl FromStr for ConversationId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
