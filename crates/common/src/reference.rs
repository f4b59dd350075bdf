//! Opaque external references
//!
//! Records in the hosted store are addressed by opaque strings. The only
//! structure Proofline relies on is equality and a prefix convention:
//! - `rec` followed by 14 ASCII alphanumerics is a stable record id
//! - anything else is a display name, which operators may rename at any time

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Regex for stable record ids (compiled once)
static STABLE_ID_REGEX: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"^rec[A-Za-z0-9]{14}$").expect("stable id regex is valid")
});

/// Check whether a reference follows the stable-id convention
pub fn is_stable_id(reference: &str) -> bool {
    STABLE_ID_REGEX.is_match(reference)
}

/// Generate a fresh stable record id
pub fn new_record_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("rec{}", &hex[..14])
}

/// A reference to a delivery batch, classified by the prefix convention
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum BatchReference {
    /// Immutable record id; resolves directly or not at all
    StableId(String),
    /// Mutable display name; may need disambiguation
    DisplayName(String),
}

impl BatchReference {
    /// Classify a raw reference string. Blank references are rejected.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(Error::Validation(
                "Batch reference cannot be empty".to_string(),
            ));
        }
        if is_stable_id(trimmed) {
            Ok(Self::StableId(trimmed.to_string()))
        } else {
            Ok(Self::DisplayName(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::StableId(id) => id,
            Self::DisplayName(name) => name,
        }
    }

    pub fn stable_id(&self) -> Option<&str> {
        match self {
            Self::StableId(id) => Some(id),
            Self::DisplayName(_) => None,
        }
    }
}

impl fmt::Display for BatchReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
