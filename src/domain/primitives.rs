//! Domain primitives: TimeMs, MemberId, PackageId, Side.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

/// Time in milliseconds since Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimeMs(pub i64);

impl TimeMs {
    /// Create a TimeMs from milliseconds.
    pub fn new(ms: i64) -> Self {
        TimeMs(ms)
    }

    /// Current wall-clock time.
    pub fn now() -> Self {
        TimeMs(chrono::Utc::now().timestamp_millis())
    }

    /// Get the underlying milliseconds value.
    pub fn as_ms(&self) -> i64 {
        self.0
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdParseError {
    #[error("identifier must not be empty")]
    Empty,
    #[error("identifier longer than {0} characters")]
    TooLong(usize),
    #[error("identifier contains invalid character {0:?}")]
    InvalidChar(char),
}

const MAX_ID_LEN: usize = 64;

fn validate_id(raw: &str) -> Result<String, IdParseError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(IdParseError::Empty);
    }
    if trimmed.len() > MAX_ID_LEN {
        return Err(IdParseError::TooLong(MAX_ID_LEN));
    }
    if let Some(c) = trimmed
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
    {
        return Err(IdParseError::InvalidChar(c));
    }
    Ok(trimmed.to_string())
}

/// Member identifier as issued by the registration service.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MemberId(pub String);

impl MemberId {
    pub fn new(id: String) -> Self {
        MemberId(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for MemberId {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        validate_id(s).map(MemberId)
    }
}

impl std::fmt::Display for MemberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Package identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PackageId(pub String);

impl PackageId {
    pub fn new(id: String) -> Self {
        PackageId(id)
    }

    /// Fresh random identifier for purchases that arrive without one.
    pub fn generate() -> Self {
        PackageId(format!("pkg-{}", uuid::Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for PackageId {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        validate_id(s).map(PackageId)
    }
}

impl std::fmt::Display for PackageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Binary-tree leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn opposite(&self) -> Side {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Left => "left",
            Side::Right => "right",
        }
    }
}

impl FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "left" => Ok(Side::Left),
            "right" => Ok(Side::Right),
            other => Err(format!("unknown side {}", other)),
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_member_id_trims_and_validates() {
        assert_eq!(MemberId::from_str("  m-001 ").unwrap().as_str(), "m-001");
        assert_eq!(MemberId::from_str(""), Err(IdParseError::Empty));
        assert_eq!(
            MemberId::from_str("a b"),
            Err(IdParseError::InvalidChar(' '))
        );
        assert!(MemberId::from_str(&"x".repeat(65)).is_err());
    }

    #[test]
    fn test_side_serialization() {
        assert_eq!(serde_json::to_string(&Side::Left).unwrap(), "\"left\"");
        assert_eq!(Side::from_str("right").unwrap(), Side::Right);
        assert!(Side::from_str("middle").is_err());
        assert_eq!(Side::Left.opposite(), Side::Right);
    }

    #[test]
    fn test_generated_package_ids_are_valid_and_distinct() {
        let a = PackageId::generate();
        let b = PackageId::generate();
        assert_ne!(a, b);
        assert!(PackageId::from_str(a.as_str()).is_ok());
    }

    #[test]
    fn test_timems_ordering() {
        assert!(TimeMs::new(1000) < TimeMs::new(2000));
    }
}
