//! OneRoster 1.1 manifest.csv parsing.
//!
//! The manifest lists which CSV files a drop contains and whether each uses
//! `bulk` (complete set) or `delta` (changes only) processing.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::{Result, SyncError};

/// Processing mode for a file listed in the manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingMode {
    Bulk,
    Delta,
    Absent,
}

#[derive(Debug, Deserialize)]
struct ManifestEntry {
    #[serde(rename = "propertyName")]
    property_name: String,
    value: String,
}

/// Parsed manifest with file lookup.
#[derive(Debug, Default)]
pub struct Manifest {
    /// Filename (e.g. "orgs.csv") to processing mode.
    pub files: HashMap<String, ProcessingMode>,
    pub manifest_version: Option<String>,
    pub oneroster_version: Option<String>,
}

impl Manifest {
    /// Parse `manifest.csv` from `dir`; a missing manifest yields an empty one.
    pub fn from_dir(dir: &Path) -> Result<Self> {
        let manifest_path = dir.join("manifest.csv");
        if !manifest_path.exists() {
            return Ok(Self::default());
        }

        let mut rdr = csv::Reader::from_path(&manifest_path)
            .map_err(|e| SyncError::Io(std::io::Error::other(e)))?;

        let mut manifest = Manifest::default();
        for result in rdr.deserialize() {
            let entry: ManifestEntry = result
                .map_err(|e| SyncError::Serialization(format!("manifest.csv parse error: {e}")))?;

            match entry.property_name.trim() {
                "manifest.version" => manifest.manifest_version = Some(entry.value),
                "oneroster.version" => manifest.oneroster_version = Some(entry.value),
                name if name.starts_with("file.") => {
                    let file_key = name.strip_prefix("file.").unwrap_or(name);
                    let mode = match entry.value.trim().to_lowercase().as_str() {
                        "bulk" => ProcessingMode::Bulk,
                        "delta" => ProcessingMode::Delta,
                        _ => ProcessingMode::Absent,
                    };
                    manifest.files.insert(format!("{file_key}.csv"), mode);
                }
                _ => {}
            }
        }

        Ok(manifest)
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Mode of `filename`. Without a manifest, files on disk count as bulk.
    pub fn mode(&self, dir: &Path, filename: &str) -> ProcessingMode {
        if self.is_empty() {
            if dir.join(filename).is_file() {
                ProcessingMode::Bulk
            } else {
                ProcessingMode::Absent
            }
        } else {
            self.files
                .get(filename)
                .copied()
                .unwrap_or(ProcessingMode::Absent)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn missing_manifest_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = Manifest::from_dir(dir.path()).unwrap();
        assert!(manifest.is_empty());
        assert!(manifest.manifest_version.is_none());
    }

    #[test]
    fn parses_file_modes() {
        let dir = tempfile::tempdir().unwrap();
        let content = "propertyName,value\nmanifest.version,1.0\noneroster.version,1.1\nfile.orgs,bulk\nfile.users,delta\nfile.classes,absent\n";
        fs::write(dir.path().join("manifest.csv"), content).unwrap();

        let manifest = Manifest::from_dir(dir.path()).unwrap();
        assert_eq!(manifest.oneroster_version.as_deref(), Some("1.1"));
        assert_eq!(manifest.mode(dir.path(), "orgs.csv"), ProcessingMode::Bulk);
        assert_eq!(manifest.mode(dir.path(), "users.csv"), ProcessingMode::Delta);
        assert_eq!(manifest.mode(dir.path(), "classes.csv"), ProcessingMode::Absent);
        assert_eq!(
            manifest.mode(dir.path(), "enrollments.csv"),
            ProcessingMode::Absent
        );
    }

    #[test]
    fn without_manifest_files_on_disk_are_bulk() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("orgs.csv"), "sourcedId\n").unwrap();
        let manifest = Manifest::from_dir(dir.path()).unwrap();
        assert_eq!(manifest.mode(dir.path(), "orgs.csv"), ProcessingMode::Bulk);
        assert_eq!(manifest.mode(dir.path(), "users.csv"), ProcessingMode::Absent);
    }
}
