use ciwatch_core::{TaxonomyError, TaxonomyLoader};
use serde::{Deserialize, Deserializer};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {reason}")]
    Parse { path: PathBuf, reason: String },
    #[error("invalid jenkins url {value:?}: {reason}")]
    InvalidUrl { value: String, reason: String },
    #[error("{path}: {reason}")]
    Invalid { path: PathBuf, reason: String },
    #[error("invalid target build {value:?}: {reason}")]
    InvalidBuild { value: String, reason: String },
}

#[derive(Debug, Deserialize)]
struct JenkinsFile {
    #[serde(rename = "URL")]
    url: UrlSection,
    #[serde(rename = "JOBS")]
    jobs: JobsSection,
}

#[derive(Debug, Deserialize)]
struct UrlSection {
    jenkins: String,
    #[serde(default)]
    timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct JobsSection {
    executor: String,
    #[serde(deserialize_with = "deserialize_build_id")]
    build: String,
}

/// Settings read from `jenkins.cfg` (TOML with `[URL]` and `[JOBS]` tables).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JenkinsSettings {
    pub base_url: Url,
    pub executor_job: String,
    pub target_build: String,
    pub timeout: Option<Duration>,
}

impl JenkinsSettings {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = read(path)?;
        Self::parse(path, &contents)
    }

    pub fn parse(path: &Path, contents: &str) -> Result<Self, ConfigError> {
        let file: JenkinsFile = toml::from_str(contents).map_err(|err| ConfigError::Parse {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })?;

        let base_url = Url::parse(file.url.jenkins.trim()).map_err(|err| ConfigError::InvalidUrl {
            value: file.url.jenkins.clone(),
            reason: err.to_string(),
        })?;
        let executor_job = file.jobs.executor.trim().to_string();
        if executor_job.is_empty() {
            return Err(ConfigError::Invalid {
                path: path.to_path_buf(),
                reason: "[JOBS] executor is empty".to_string(),
            });
        }

        Ok(Self {
            base_url,
            executor_job,
            target_build: validate_build_id(&file.jobs.build)?,
            timeout: file.url.timeout_secs.map(Duration::from_secs),
        })
    }
}

/// The target build ends up in the report file name, so it must be a single path component.
pub fn validate_build_id(raw: &str) -> Result<String, ConfigError> {
    let value = raw.trim();
    let invalid = |reason: &str| ConfigError::InvalidBuild {
        value: raw.to_string(),
        reason: reason.to_string(),
    };
    if value.is_empty() {
        return Err(invalid("build is empty"));
    }
    if value.contains(['/', '\\']) || value == "." || value == ".." {
        return Err(invalid("build must not contain path separators"));
    }
    Ok(value.to_string())
}

/// Target build may be written as `build = 42` or `build = "42"`.
fn deserialize_build_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let val = toml::Value::deserialize(deserializer)?;
    match val {
        toml::Value::String(s) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        toml::Value::Integer(n) => Ok(n.to_string()),
        _ => Err(serde::de::Error::custom(
            "expected a non-empty string or integer for build",
        )),
    }
}

/// Component tables of `jobs.cfg`, in file order. Each key of a table is a subcomponent and
/// its value the number of tests it should run.
#[derive(Debug, Clone)]
pub struct JobsConfig {
    components: toml::Table,
}

impl JobsConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = read(path)?;
        Self::parse(path, &contents)
    }

    pub fn parse(path: &Path, contents: &str) -> Result<Self, ConfigError> {
        let components: toml::Table = toml::from_str(contents).map_err(|err| ConfigError::Parse {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })?;
        if let Some((name, _)) = components.iter().find(|(_, value)| !value.is_table()) {
            return Err(ConfigError::Invalid {
                path: path.to_path_buf(),
                reason: format!("{name:?} must be a table of subcomponents"),
            });
        }
        Ok(Self { components })
    }
}

impl TaxonomyLoader for JobsConfig {
    fn load_components(&self) -> Result<Vec<String>, TaxonomyError> {
        Ok(self.components.keys().cloned().collect())
    }

    fn load_subcomponents(&self, component: &str) -> Result<Vec<(String, u64)>, TaxonomyError> {
        let table = self
            .components
            .get(component)
            .and_then(toml::Value::as_table)
            .ok_or_else(|| TaxonomyError::UnknownComponent {
                component: component.to_string(),
            })?;

        table
            .iter()
            .map(|(subcomponent, value)| {
                expected_total(value)
                    .map(|total| (subcomponent.clone(), total))
                    .map_err(|reason| TaxonomyError::InvalidTotal {
                        component: component.to_string(),
                        subcomponent: subcomponent.clone(),
                        reason,
                    })
            })
            .collect()
    }
}

fn expected_total(value: &toml::Value) -> Result<u64, String> {
    match value {
        toml::Value::Integer(n) => u64::try_from(*n).map_err(|_| format!("{n} is negative")),
        toml::Value::String(s) => s
            .trim()
            .parse::<u64>()
            .map_err(|_| format!("{s:?} is not a test count")),
        other => Err(format!("expected an integer, found {}", other.type_str())),
    }
}

fn read(path: &Path) -> Result<String, ConfigError> {
    fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })
}
