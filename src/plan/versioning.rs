//! Content-addressed plan file backups.
//!
//! The [`PlanVersioner`] snapshots the live plan file before every replan.
//! Backups are siblings of the plan file named
//! `<stem>.bak.<N><ext>` (for `plans.json`: `plans.bak.1.json`), with `N`
//! a dense 1-based sequence. A snapshot whose content hash matches an
//! existing version is never written twice.
//!
//! # Example
//!
//! ```rust,ignore
//! use ratchet::plan::PlanVersioner;
//!
//! let mut versioner = PlanVersioner::new("feature_list.json")?;
//! let backup = versioner.create_backup("test_failure")?;
//!
//! // ...replan rewrites feature_list.json...
//!
//! versioner.restore_version(1)?;
//! ```

use super::{content_hash, write_atomic};
use crate::error::{RatchetError, Result};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Trigger label recorded for backups found on disk from an earlier run.
pub const DISCOVERED_TRIGGER: &str = "discovered";

// ============================================================================
// Plan Version
// ============================================================================

/// Metadata for one backup of the plan file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanVersion {
    /// 1-based version number.
    pub version: usize,
    /// When the backup was taken (file mtime for discovered backups).
    pub timestamp: DateTime<Utc>,
    /// Trigger that caused the backup.
    pub trigger: String,
    /// Location of the backup file.
    pub path: PathBuf,
    /// Hex SHA-256 of the backup content.
    pub content_hash: String,
}

impl PlanVersion {
    /// Format a summary line for display.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "v{} {} [{}] {} ({})",
            self.version,
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.trigger,
            self.path.display(),
            &self.content_hash[..12.min(self.content_hash.len())]
        )
    }
}

// ============================================================================
// Plan Versioner
// ============================================================================

/// Backs up and restores the plan file.
#[derive(Debug)]
pub struct PlanVersioner {
    /// Live plan file.
    plan_path: PathBuf,

    /// Versions in order; `versions[i].version == i + 1`.
    versions: Vec<PlanVersion>,

    /// Content hash to index into `versions`.
    by_hash: HashMap<String, usize>,
}

impl PlanVersioner {
    /// Create a versioner for a plan file and pick up existing backups.
    ///
    /// The plan file itself does not need to exist yet.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing backup cannot be read.
    pub fn new(plan_path: impl AsRef<Path>) -> Result<Self> {
        let mut versioner = Self {
            plan_path: plan_path.as_ref().to_path_buf(),
            versions: Vec::new(),
            by_hash: HashMap::new(),
        };
        versioner.discover_backups()?;
        Ok(versioner)
    }

    /// The live plan file.
    #[must_use]
    pub fn plan_path(&self) -> &Path {
        &self.plan_path
    }

    /// All known versions, oldest first.
    #[must_use]
    pub fn versions(&self) -> &[PlanVersion] {
        &self.versions
    }

    /// Most recent version, if any.
    #[must_use]
    pub fn latest(&self) -> Option<&PlanVersion> {
        self.versions.last()
    }

    /// Path a backup with the given version number would have.
    #[must_use]
    pub fn backup_path(&self, version: usize) -> PathBuf {
        let (stem, ext) = self.stem_and_ext();
        self.plan_path
            .with_file_name(format!("{stem}.bak.{version}{ext}"))
    }

    /// Snapshot the live plan file.
    ///
    /// Returns the backup path. When a version with identical content
    /// already exists, its path is returned and nothing is written.
    ///
    /// # Errors
    ///
    /// Returns [`RatchetError::Backup`] if the plan cannot be read or the
    /// backup cannot be written.
    pub fn create_backup(&mut self, trigger: &str) -> Result<PathBuf> {
        let content = fs::read(&self.plan_path).map_err(|e| {
            RatchetError::backup(format!(
                "cannot read plan {}: {}",
                self.plan_path.display(),
                e
            ))
        })?;
        let hash = content_hash(&content);

        if let Some(&index) = self.by_hash.get(&hash) {
            let existing = &self.versions[index];
            debug!(
                "Plan unchanged since v{}, reusing {}",
                existing.version,
                existing.path.display()
            );
            return Ok(existing.path.clone());
        }

        let version = self.versions.len() + 1;
        let path = self.backup_path(version);
        if path.exists() {
            warn!(
                "Overwriting stray backup outside the version sequence: {}",
                path.display()
            );
        }

        fs::write(&path, &content).map_err(|e| {
            RatchetError::backup(format!("cannot write {}: {}", path.display(), e))
        })?;

        self.push_version(PlanVersion {
            version,
            timestamp: Utc::now(),
            trigger: trigger.to_string(),
            path: path.clone(),
            content_hash: hash,
        });

        info!("Backed up plan as v{} ({})", version, path.display());
        Ok(path)
    }

    /// Raw bytes stored for a version.
    ///
    /// # Errors
    ///
    /// Returns [`RatchetError::InvalidVersion`] for an out-of-range number
    /// and [`RatchetError::Backup`] if the backup file cannot be read.
    pub fn read_version(&self, version: usize) -> Result<Vec<u8>> {
        let entry = self.get(version)?;
        fs::read(&entry.path).map_err(|e| {
            RatchetError::backup(format!("cannot read {}: {}", entry.path.display(), e))
        })
    }

    /// Copy a version's content back onto the live plan file.
    ///
    /// # Errors
    ///
    /// Returns [`RatchetError::InvalidVersion`] unless
    /// `1 <= version <= versions().len()`, and [`RatchetError::Backup`] if
    /// the backup cannot be read or the plan cannot be written.
    pub fn restore_version(&self, version: usize) -> Result<()> {
        let content = self.read_version(version)?;
        let entry = &self.versions[version - 1];

        if content_hash(&content) != entry.content_hash {
            warn!(
                "Backup v{} was modified after it was taken ({})",
                version,
                entry.path.display()
            );
        }

        write_atomic(&self.plan_path, &content).map_err(|e| {
            RatchetError::backup(format!(
                "cannot restore onto {}: {}",
                self.plan_path.display(),
                e
            ))
        })?;

        info!("Restored plan from v{}", version);
        Ok(())
    }

    /// Rebuild the version list from backup files next to the plan.
    ///
    /// Only the contiguous run `1..=k` is adopted; backups beyond a gap are
    /// ignored. Returns the number of versions found.
    ///
    /// # Errors
    ///
    /// Returns an error if a matching backup file cannot be read.
    pub fn discover_backups(&mut self) -> Result<usize> {
        self.versions.clear();
        self.by_hash.clear();

        let dir = match self.plan_path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        if !dir.is_dir() {
            return Ok(0);
        }

        let (stem, ext) = self.stem_and_ext();
        let pattern = format!(
            r"^{}\.bak\.(\d+){}$",
            regex::escape(&stem),
            regex::escape(&ext)
        );
        let re = Regex::new(&pattern)
            .map_err(|e| RatchetError::backup(format!("invalid backup pattern: {e}")))?;

        let mut found: Vec<(usize, PathBuf)> = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(caps) = re.captures(&name) else {
                continue;
            };
            match caps[1].parse::<usize>() {
                Ok(n) if n > 0 => found.push((n, entry.path())),
                _ => debug!("Ignoring backup with unusable number: {}", name),
            }
        }
        found.sort_by_key(|(n, _)| *n);

        for (n, path) in found {
            if n != self.versions.len() + 1 {
                warn!(
                    "Ignoring backup {} (expected v{})",
                    path.display(),
                    self.versions.len() + 1
                );
                continue;
            }

            let content = fs::read(&path).map_err(|e| {
                RatchetError::backup(format!("cannot read {}: {}", path.display(), e))
            })?;
            let timestamp = fs::metadata(&path)
                .and_then(|m| m.modified())
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());

            self.push_version(PlanVersion {
                version: n,
                timestamp,
                trigger: DISCOVERED_TRIGGER.to_string(),
                path,
                content_hash: content_hash(&content),
            });
        }

        if !self.versions.is_empty() {
            info!("Discovered {} existing plan backups", self.versions.len());
        }
        Ok(self.versions.len())
    }

    fn get(&self, version: usize) -> Result<&PlanVersion> {
        if version == 0 || version > self.versions.len() {
            return Err(RatchetError::InvalidVersion {
                requested: version,
                available: self.versions.len(),
            });
        }
        Ok(&self.versions[version - 1])
    }

    fn push_version(&mut self, version: PlanVersion) {
        // Two discovered backups may hold the same bytes; keep the first.
        self.by_hash
            .entry(version.content_hash.clone())
            .or_insert(self.versions.len());
        self.versions.push(version);
    }

    fn stem_and_ext(&self) -> (String, String) {
        let stem = self
            .plan_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "plan".to_string());
        let ext = self
            .plan_path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        (stem, ext)
    }
}
