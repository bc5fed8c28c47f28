//! Platform roles.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Role of an authenticated platform user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Professor,
    Ta,
    Student,
    Admin,
    #[default]
    Unknown,
}

impl Role {
    /// Parse from the lowercase string representation used in tokens and config.
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "professor" => Self::Professor,
            "ta" => Self::Ta,
            "student" => Self::Student,
            "admin" => Self::Admin,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Professor => "professor",
            Self::Ta => "ta",
            Self::Student => "student",
            Self::Admin => "admin",
            Self::Unknown => "unknown",
        }
    }
}

impl<'de> Deserialize<'de> for Role {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse(&raw))
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
