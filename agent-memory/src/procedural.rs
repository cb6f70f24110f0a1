//! Procedural memory: a versioned registry of reusable skills.
//!
//! Every skill name keeps all registered versions plus a `latest` pointer
//! that always names the most recently registered version. No semantic
//! version ordering is applied: registering `1.0.0` after `2.0.0` moves
//! `latest` back to `1.0.0`.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Display, Formatter};
use std::sync::Arc;

use agent_config::PersistenceConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::backend::StorageBackend;
use crate::persistence::{Collection, Commit};
use crate::{MemoryError, MemoryResult};

/// Key space of the skill registry.
pub const SKILL_REGISTRY_KEY_SPACE: &str = "pm_skill_registry";

const LATEST: &str = "latest";

/// Selects which version of a skill to resolve.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum VersionSelector {
    /// The version named by the skill's `latest` pointer.
    #[default]
    Latest,
    /// A specific registered version.
    Exact(String),
}

impl From<&str> for VersionSelector {
    fn from(value: &str) -> Self {
        if value == LATEST {
            Self::Latest
        } else {
            Self::Exact(value.to_owned())
        }
    }
}

impl Display for VersionSelector {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Latest => f.write_str(LATEST),
            Self::Exact(version) => f.write_str(version),
        }
    }
}

/// Input to [`ProceduralMemory::register`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkillRegistration {
    skill_name: String,
    version: String,
    entry_point: String,
    description: String,
    permissions: BTreeSet<String>,
}

impl SkillRegistration {
    /// Describes a skill version.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::InvalidRecord`] when the name, version or entry
    /// point is blank, or when the version is the reserved word `latest`.
    pub fn new(
        skill_name: impl Into<String>,
        version: impl Into<String>,
        entry_point: impl Into<String>,
        description: impl Into<String>,
    ) -> MemoryResult<Self> {
        let skill_name = skill_name.into();
        if skill_name.trim().is_empty() {
            return Err(MemoryError::InvalidRecord("skill name cannot be empty"));
        }
        let version = version.into();
        if version.trim().is_empty() {
            return Err(MemoryError::InvalidRecord("skill version cannot be empty"));
        }
        if version == LATEST {
            return Err(MemoryError::InvalidRecord(
                "`latest` is reserved and cannot be registered as a version",
            ));
        }
        let entry_point = entry_point.into();
        if entry_point.trim().is_empty() {
            return Err(MemoryError::InvalidRecord("skill entry point cannot be empty"));
        }

        Ok(Self {
            skill_name,
            version,
            entry_point,
            description: description.into(),
            permissions: BTreeSet::new(),
        })
    }

    /// Restricts execution to the listed principals.
    #[must_use]
    pub fn with_permissions<I, S>(mut self, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.permissions = permissions.into_iter().map(Into::into).collect();
        self
    }
}

/// A registered skill version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillRecord {
    #[serde(default)]
    skill_name: String,
    #[serde(default)]
    version: String,
    entry_point: String,
    description: String,
    #[serde(default)]
    permissions: BTreeSet<String>,
    checksum: String,
    #[serde(with = "crate::timestamp")]
    registered_at: DateTime<Utc>,
}

impl SkillRecord {
    /// Skill name.
    #[must_use]
    pub fn skill_name(&self) -> &str {
        &self.skill_name
    }

    /// Registered version.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Callable target of the skill.
    #[must_use]
    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }

    /// Human-readable description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Principals allowed to run the skill; empty means unrestricted.
    #[must_use]
    pub fn permissions(&self) -> &BTreeSet<String> {
        &self.permissions
    }

    /// SHA-256 hex digest of `entry_point@version`.
    #[must_use]
    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    /// Registration time.
    #[must_use]
    pub fn registered_at(&self) -> DateTime<Utc> {
        self.registered_at
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct SkillEntry {
    #[serde(default)]
    versions: BTreeMap<String, SkillRecord>,
    #[serde(default)]
    latest: String,
}

/// Outcome of [`ProceduralMemory::apply`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Execution {
    /// The skill resolved and its execution was simulated.
    Applied {
        /// Resolved skill name.
        skill_name: String,
        /// Resolved version.
        version: String,
        /// Entry point that would be dispatched.
        entry_point: String,
        /// Arguments passed to the skill.
        arguments: Map<String, Value>,
    },
    /// Resolution failed.
    Failed {
        /// Why the skill could not be applied.
        reason: String,
    },
}

impl Execution {
    /// Returns whether the skill was applied.
    #[must_use]
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }
}

impl Display for Execution {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Applied {
                skill_name,
                version,
                arguments,
                ..
            } => write!(
                f,
                "applied skill `{skill_name}` version `{version}` with arguments {}",
                Value::Object(arguments.clone())
            ),
            Self::Failed { reason } => write!(f, "execution failed: {reason}"),
        }
    }
}

fn checksum(entry_point: &str, version: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(entry_point.as_bytes());
    hasher.update(b"@");
    hasher.update(version.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Versioned skill registry.
#[derive(Debug)]
pub struct ProceduralMemory {
    registry: Collection<BTreeMap<String, SkillEntry>>,
}

impl ProceduralMemory {
    /// Creates the store on `backend`.
    #[must_use]
    pub fn new(backend: Arc<dyn StorageBackend>, policy: PersistenceConfig) -> Self {
        Self {
            registry: Collection::new(SKILL_REGISTRY_KEY_SPACE, backend, policy),
        }
    }

    /// Registers (or re-registers) a skill version and points `latest` at it.
    ///
    /// # Errors
    ///
    /// Propagates persistence failures.
    pub async fn register(&self, registration: SkillRegistration) -> MemoryResult<SkillRecord> {
        let SkillRegistration {
            skill_name,
            version,
            entry_point,
            description,
            permissions,
        } = registration;
        debug!(skill = %skill_name, %version, "registering skill");

        let record = SkillRecord {
            checksum: checksum(&entry_point, &version),
            skill_name,
            version,
            entry_point,
            description,
            permissions,
            registered_at: Utc::now(),
        };

        let stored = record.clone();
        self.registry
            .modify(move |registry| {
                let entry = registry.entry(stored.skill_name.clone()).or_default();
                entry.latest.clone_from(&stored.version);
                entry.versions.insert(stored.version.clone(), stored);
                Commit::Save(())
            })
            .await?;
        Ok(record)
    }

    /// Resolves a skill version.
    ///
    /// # Errors
    ///
    /// Returns [`MemoryError::SkillNotFound`] for an unknown name,
    /// [`MemoryError::SkillVersionNotFound`] for an unknown version, and
    /// propagates load failures.
    pub async fn find(
        &self,
        skill_name: &str,
        version: impl Into<VersionSelector>,
    ) -> MemoryResult<SkillRecord> {
        let selector = version.into();
        self.registry
            .read(|registry| {
                let entry = registry.get(skill_name).ok_or_else(|| MemoryError::SkillNotFound {
                    skill: skill_name.to_owned(),
                })?;
                let resolved = match &selector {
                    VersionSelector::Latest => entry.latest.as_str(),
                    VersionSelector::Exact(version) => version.as_str(),
                };
                entry
                    .versions
                    .get(resolved)
                    .map(|record| SkillRecord {
                        skill_name: skill_name.to_owned(),
                        version: resolved.to_owned(),
                        ..record.clone()
                    })
                    .ok_or_else(|| MemoryError::SkillVersionNotFound {
                        skill: skill_name.to_owned(),
                        version: resolved.to_owned(),
                    })
            })
            .await?
    }

    /// Lists the registered versions of a skill, sorted; empty when unknown.
    ///
    /// # Errors
    ///
    /// Propagates load failures.
    pub async fn versions(&self, skill_name: &str) -> MemoryResult<Vec<String>> {
        self.registry
            .read(|registry| {
                registry
                    .get(skill_name)
                    .map(|entry| entry.versions.keys().cloned().collect())
                    .unwrap_or_default()
            })
            .await
    }

    /// Resolves a skill and simulates running it with `arguments`.
    ///
    /// Resolution failures are reported as [`Execution::Failed`] rather than
    /// as errors.
    ///
    /// # Errors
    ///
    /// Propagates load failures.
    pub async fn apply(
        &self,
        skill_name: &str,
        version: impl Into<VersionSelector>,
        arguments: Map<String, Value>,
    ) -> MemoryResult<Execution> {
        match self.find(skill_name, version).await {
            Ok(record) => {
                info!(
                    skill = %record.skill_name,
                    version = %record.version,
                    entry_point = %record.entry_point,
                    "simulating skill execution"
                );
                Ok(Execution::Applied {
                    skill_name: record.skill_name,
                    version: record.version,
                    entry_point: record.entry_point,
                    arguments,
                })
            }
            Err(err) if err.is_not_found() => {
                debug!(skill = skill_name, %err, "skill could not be applied");
                Ok(Execution::Failed {
                    reason: err.to_string(),
                })
            }
            Err(err) => Err(err),
        }
    }
}
