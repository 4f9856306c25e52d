use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum IdError {
    #[error("session id must not be empty")]
    EmptySessionId,
    #[error("user id must not be empty")]
    EmptyUserId,
}

/// Identifies one recording session; every metric, broadcast and stored row is
/// scoped to exactly one.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new<S: Into<String>>(value: S) -> Result<Self, IdError> {
        let v = value.into();
        if v.trim().is_empty() {
            return Err(IdError::EmptySessionId);
        }
        Ok(Self(v))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new<S: Into<String>>(value: S) -> Result<Self, IdError> {
        let v = value.into();
        if v.trim().is_empty() {
            return Err(IdError::EmptyUserId);
        }
        Ok(Self(v))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_ids_are_rejected() {
        assert_eq!(SessionId::new("  "), Err(IdError::EmptySessionId));
        assert_eq!(UserId::new(""), Err(IdError::EmptyUserId));
    }

    #[test]
    fn ids_serialize_as_plain_strings() {
        let id = SessionId::new("s-1").expect("valid");
        assert_eq!(serde_json::to_string(&id).expect("json"), "\"s-1\"");
    }
}
