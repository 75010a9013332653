use ciwatch_core::RunStatus;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

const CACHE_FILE_SUFFIX: &str = "_cache.dat";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cache file {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("build {0} is not cached")]
    NotFound(u64),
    #[error("build {0} is already cached and cannot be rewritten")]
    AlreadyCached(u64),
    #[error("build {build_number} is {status}, only finished builds are cached")]
    NotTerminal { build_number: u64, status: String },
}

/// Persisted projection of a finished build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    #[serde(rename = "RUN_STATUS")]
    pub run_status: RunStatus,
    #[serde(rename = "DESCRIPTION")]
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaveSummary {
    pub entries: usize,
    pub appended: usize,
}

/// Append-only cache of resolved builds for one executor job.
///
/// The whole document is read on open and written back on [`BuildCacheStore::save`], which
/// consumes the store: one durable write per run.
#[derive(Debug)]
pub struct BuildCacheStore {
    path: Option<PathBuf>,
    entries: BTreeMap<u64, CacheEntry>,
    appended: BTreeSet<u64>,
}

impl BuildCacheStore {
    /// Path of the cache file for `job` inside `dir`.
    pub fn path_for_job(dir: impl AsRef<Path>, job: &str) -> PathBuf {
        dir.as_ref().join(format!("{job}{CACHE_FILE_SUFFIX}"))
    }

    /// Loads the cache at `path`. A missing file is an empty cache.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let entries = match fs::read_to_string(&path) {
            Ok(contents) => parse_document(&path, &contents)?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no cache file yet, starting empty");
                BTreeMap::new()
            }
            Err(source) => return Err(StorageError::Io { path, source }),
        };
        info!(path = %path.display(), entries = entries.len(), "loaded build cache");

        Ok(Self {
            path: Some(path),
            entries,
            appended: BTreeSet::new(),
        })
    }

    pub fn open_in_memory() -> Self {
        Self {
            path: None,
            entries: BTreeMap::new(),
            appended: BTreeSet::new(),
        }
    }

    pub fn has(&self, build_number: u64) -> bool {
        self.entries.contains_key(&build_number)
    }

    pub fn get(&self, build_number: u64) -> Result<&CacheEntry, StorageError> {
        self.entries
            .get(&build_number)
            .ok_or(StorageError::NotFound(build_number))
    }

    pub fn append(
        &mut self,
        build_number: u64,
        run_status: RunStatus,
        description: impl Into<String>,
    ) -> Result<(), StorageError> {
        if self.has(build_number) {
            return Err(StorageError::AlreadyCached(build_number));
        }
        if !run_status.is_terminal() {
            return Err(StorageError::NotTerminal {
                build_number,
                status: run_status.to_string(),
            });
        }
        self.entries.insert(
            build_number,
            CacheEntry {
                run_status,
                description: description.into(),
            },
        );
        self.appended.insert(build_number);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = (u64, &CacheEntry)> {
        self.entries.iter().map(|(number, entry)| (*number, entry))
    }

    /// Build numbers appended since the store was opened.
    pub fn appended(&self) -> impl Iterator<Item = u64> + '_ {
        self.appended.iter().copied()
    }

    /// Writes the full mapping back, replacing the previous file. In-memory stores only
    /// report what they hold.
    pub fn save(self) -> Result<SaveSummary, StorageError> {
        let summary = SaveSummary {
            entries: self.entries.len(),
            appended: self.appended.len(),
        };
        let Some(path) = self.path.as_deref() else {
            return Ok(summary);
        };

        let payload = render_document(&self.entries)?;
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| StorageError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let tmp_path = temp_path(path);
        fs::write(&tmp_path, payload).map_err(|source| StorageError::Io {
            path: tmp_path.clone(),
            source,
        })?;
        fs::rename(&tmp_path, path).map_err(|source| StorageError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        info!(
            path = %path.display(),
            entries = summary.entries,
            appended = summary.appended,
            "saved build cache"
        );
        Ok(summary)
    }
}

fn temp_path(path: &Path) -> PathBuf {
    match path.file_name() {
        Some(name) => path.with_file_name(format!("{}.tmp", name.to_string_lossy())),
        None => path.with_extension("tmp"),
    }
}

fn parse_document(
    path: &Path,
    contents: &str,
) -> Result<BTreeMap<u64, CacheEntry>, StorageError> {
    let corrupt = |reason: String| StorageError::Corrupt {
        path: path.to_path_buf(),
        reason,
    };

    let table: toml::Table = toml::from_str(contents).map_err(|err| corrupt(err.to_string()))?;
    let mut entries = BTreeMap::new();
    for (key, value) in table {
        let build_number = key
            .trim()
            .parse::<u64>()
            .map_err(|_| corrupt(format!("key {key:?} is not a build number")))?;
        let entry: CacheEntry = value
            .try_into()
            .map_err(|err: toml::de::Error| corrupt(format!("build {key}: {err}")))?;
        entries.insert(build_number, entry);
    }
    Ok(entries)
}

fn render_document(entries: &BTreeMap<u64, CacheEntry>) -> Result<String, StorageError> {
    let mut table = toml::Table::new();
    for (build_number, entry) in entries {
        let value = toml::Value::try_from(entry)
            .map_err(|err| StorageError::Serialization(err.to_string()))?;
        table.insert(build_number.to_string(), value);
    }
    toml::to_string(&table).map_err(|err| StorageError::Serialization(err.to_string()))
}
