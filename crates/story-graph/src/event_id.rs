use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use crate::GraphError;

/// Display-facing event identifier: a numeric prefix plus an optional
/// alphabetic branch suffix (`"4"`, `"4b"`, `"12c"`).
///
/// Ordering is numeric-first, then by suffix, so `"2" < "2b" < "3" < "10"`.
/// Plain string comparison would put `"10"` before `"2"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventId {
    prefix: u64,
    suffix: String,
}

impl EventId {
    pub fn new(prefix: u64, suffix: impl Into<String>) -> Self {
        Self {
            prefix,
            suffix: suffix.into(),
        }
    }

    /// The numeric part with any branch suffix stripped: `"4c"` -> 4.
    pub fn numeric_prefix(&self) -> u64 {
        self.prefix
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    /// True for suffixed ids, which name branch events rather than nodes
    /// already committed on chain.
    pub fn is_branch(&self) -> bool {
        !self.suffix.is_empty()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.prefix, self.suffix)
    }
}

impl FromStr for EventId {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits: String = s.chars().take_while(|c| c.is_ascii_digit()).collect();
        if digits.is_empty() {
            return Err(GraphError::InvalidEventId(s.to_string()));
        }
        let suffix = &s[digits.len()..];
        if !suffix.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(GraphError::InvalidEventId(s.to_string()));
        }
        let prefix = digits
            .parse::<u64>()
            .map_err(|_| GraphError::InvalidEventId(s.to_string()))?;
        Ok(Self {
            prefix,
            suffix: suffix.to_string(),
        })
    }
}

impl Serialize for EventId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for EventId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Map display event ids to the contract ids they would receive if the whole
/// set were committed in order.
///
/// Ids sort numerically (then by suffix) and are numbered 1..n. The result is
/// only valid for the exact set it was computed from: inserting or removing
/// an event renumbers everything after it. Duplicate ids collapse to one
/// entry.
pub fn assign_contract_ids(event_ids: &[EventId]) -> HashMap<String, u64> {
    let unique: BTreeSet<&EventId> = event_ids.iter().collect();
    unique
        .into_iter()
        .enumerate()
        .map(|(i, id)| (id.to_string(), i as u64 + 1))
        .collect()
}
