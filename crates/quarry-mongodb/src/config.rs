//! Per-schema configuration

use serde::{Deserialize, Serialize};
use std::fmt;

/// Validation level applied with the collection validator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationLevel {
    /// Validate all inserts and updates
    #[default]
    Strict,
    /// Skip validation of updates to documents that are already invalid
    Moderate,
}

impl ValidationLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Strict => "strict",
            Self::Moderate => "moderate",
        }
    }
}

impl fmt::Display for ValidationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Options passed at schema construction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SchemaOptions {
    /// Stamp `createdAt`/`updatedAt` on writes and declare both as date fields
    #[serde(default)]
    pub timestamps: bool,
    #[serde(default, rename = "validationLevel")]
    pub validation_level: ValidationLevel,
}

impl SchemaOptions {
    /// Options with timestamps enabled
    pub fn with_timestamps() -> Self {
        Self {
            timestamps: true,
            ..Default::default()
        }
    }

    pub fn validation_level(mut self, level: ValidationLevel) -> Self {
        self.validation_level = level;
        self
    }
}
