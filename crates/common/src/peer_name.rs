use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Longest peer name accepted. Names end up in file paths and in the
/// interface's clients table, so they are kept short.
pub const MAX_PEER_NAME_LEN: usize = 64;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PeerNameError {
    #[error("Peer name must not be empty")]
    Empty,
    #[error("Peer name is longer than {MAX_PEER_NAME_LEN} characters")]
    TooLong,
    #[error("Peer name may only contain letters, digits, '-' and '_' (found {0:?})")]
    InvalidCharacter(char),
}

/// A validated peer name. Primary key for a peer across the registry,
/// the metadata store, the per-peer directory and the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PeerName(String);

impl PeerName {
    pub fn parse(raw: &str) -> Result<Self, PeerNameError> {
        let name = raw.trim();
        if name.is_empty() {
            return Err(PeerNameError::Empty);
        }
        if name.chars().count() > MAX_PEER_NAME_LEN {
            return Err(PeerNameError::TooLong);
        }
        if let Some(bad) = name
            .chars()
            .find(|c| !(c.is_alphanumeric() || *c == '-' || *c == '_'))
        {
            return Err(PeerNameError::InvalidCharacter(bad));
        }
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for PeerName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for PeerName {
    type Error = PeerNameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<PeerName> for String {
    fn from(name: PeerName) -> Self {
        name.0
    }
}
