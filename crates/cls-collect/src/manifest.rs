use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

const UPM_LOCK_FILE: &str = "Packages/packages-lock.json";
const VPM_MANIFEST_FILE: &str = "Packages/vpm-manifest.json";

/// A package pinned by one of the project's lock files
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LockedPackage {
    pub name: String,
    pub version: String,
}

/// Source of the project's locked package lists. Never fails; a project
/// without a readable lock file has no packages.
pub trait ManifestReader: Send + Sync {
    fn upm_locked(&self, project_root: &Path) -> Vec<LockedPackage>;
    fn vpm_locked(&self, project_root: &Path) -> Vec<LockedPackage>;
}

/// Reads lock files from the local filesystem
#[derive(Clone, Copy, Debug, Default)]
pub struct FsManifestReader;

#[derive(Debug, Error)]
enum ManifestError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

#[derive(Deserialize)]
struct LockedEntry {
    version: Option<String>,
}

#[derive(Deserialize)]
struct UpmLock {
    #[serde(default)]
    dependencies: BTreeMap<String, LockedEntry>,
}

#[derive(Deserialize)]
struct VpmManifest {
    #[serde(default)]
    locked: BTreeMap<String, LockedEntry>,
}

fn load<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, ManifestError> {
    let bytes = fs::read(path).map_err(|source| ManifestError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&bytes).map_err(|source| ManifestError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn into_packages(entries: BTreeMap<String, LockedEntry>) -> Vec<LockedPackage> {
    entries
        .into_iter()
        .filter_map(|(name, entry)| entry.version.map(|version| LockedPackage { name, version }))
        .collect()
}

fn or_empty(result: Result<Vec<LockedPackage>, ManifestError>) -> Vec<LockedPackage> {
    result.unwrap_or_else(|e| {
        tracing::debug!(error = %e, "Manifest unavailable");
        Vec::new()
    })
}

impl ManifestReader for FsManifestReader {
    fn upm_locked(&self, project_root: &Path) -> Vec<LockedPackage> {
        or_empty(
            load::<UpmLock>(&project_root.join(UPM_LOCK_FILE)).map(|lock| into_packages(lock.dependencies)),
        )
    }

    fn vpm_locked(&self, project_root: &Path) -> Vec<LockedPackage> {
        or_empty(
            load::<VpmManifest>(&project_root.join(VPM_MANIFEST_FILE)).map(|manifest| into_packages(manifest.locked)),
        )
    }
}
