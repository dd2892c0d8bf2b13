//! Unit declarations as written in configuration
//!
//! Declarations use flat, second-based fields so they read naturally in YAML.
//! They convert into [`ServiceUnit`] values with the retry defaults filled in.

use crate::error::{PlanError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use wavegate_types::{ClusterId, ManifestRef, RetryPolicy, ServiceUnit, UnitName};

/// Per-unit retry override; unset fields inherit the run default
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryOverride {
    pub max_attempts: Option<u32>,
    pub base_delay_secs: Option<u64>,
    pub factor: Option<u32>,
    pub max_delay_secs: Option<u64>,
}

impl RetryOverride {
    pub fn apply_to(&self, defaults: &RetryPolicy) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.unwrap_or(defaults.max_attempts),
            base_delay: self
                .base_delay_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.base_delay),
            factor: self.factor.unwrap_or(defaults.factor),
            max_delay: self
                .max_delay_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.max_delay),
        }
    }
}

/// One service unit as declared by the operator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitDeclaration {
    pub name: String,
    pub cluster: String,
    pub manifest: String,
    #[serde(default)]
    pub wave: Option<u32>,
    #[serde(default, alias = "depends_on")]
    pub requires: Vec<String>,
    #[serde(default)]
    pub health_timeout_secs: Option<u64>,
    #[serde(default)]
    pub retry: Option<RetryOverride>,
    #[serde(default)]
    pub best_effort: bool,
}

impl UnitDeclaration {
    /// Converts into a unit. A retry override is resolved against `defaults`
    /// so the unit carries a complete policy.
    pub fn into_unit(self, defaults: &RetryPolicy) -> ServiceUnit {
        ServiceUnit {
            name: UnitName::new(self.name),
            cluster: ClusterId::new(self.cluster),
            manifest: ManifestRef::new(self.manifest),
            wave: self.wave,
            requires: self.requires.into_iter().map(UnitName::new).collect(),
            health_timeout: self.health_timeout_secs.map(Duration::from_secs),
            retry: self.retry.map(|r| r.apply_to(defaults)),
            best_effort: self.best_effort,
        }
    }
}

/// Standalone declarations file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnitsDocument {
    #[serde(default)]
    pub units: Vec<UnitDeclaration>,
}

/// Loads declarations from a YAML (`.yaml`/`.yml`) or JSON (`.json`) file.
pub fn load_units(path: impl AsRef<Path>) -> Result<Vec<UnitDeclaration>> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path).map_err(|source| PlanError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    let document: UnitsDocument = match extension.as_str() {
        "yaml" | "yml" => serde_yaml::from_str(&raw)?,
        "json" => serde_json::from_str(&raw)?,
        other => return Err(PlanError::UnsupportedFormat(other.to_string())),
    };
    Ok(document.units)
}
