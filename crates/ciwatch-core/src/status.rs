use serde::{Deserialize, Serialize};
use std::fmt;

const NOT_AVAILABLE: &str = "NA";
const RUNNING: &str = "RUNNING";

/// Outcome of a build as far as the report is concerned.
///
/// `Terminal` carries whatever result text the CI server reported (`SUCCESS`, `UNSTABLE`,
/// `FAILURE`, `ABORTED`, ...). The text is kept verbatim because it is echoed into the report.
/// Only finished builds are ever persisted, so the string form always reads back as `Terminal`,
/// even when the text happens to be `NA` or `RUNNING`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RunStatus {
    NotAvailable,
    Running,
    Terminal(String),
}

impl Default for RunStatus {
    fn default() -> Self {
        Self::NotAvailable
    }
}

impl RunStatus {
    /// Result reported for a finished build that carries no result text.
    pub const UNKNOWN_RESULT: &'static str = "UNKNOWN";

    pub fn terminal(result: impl Into<String>) -> Self {
        Self::Terminal(result.into())
    }

    pub fn classify(building: bool, result: Option<&str>) -> Self {
        if building {
            return Self::Running;
        }
        Self::terminal(result.unwrap_or(Self::UNKNOWN_RESULT))
    }

    pub fn as_str(&self) -> &str {
        match self {
            RunStatus::NotAvailable => NOT_AVAILABLE,
            RunStatus::Running => RUNNING,
            RunStatus::Terminal(result) => result.as_str(),
        }
    }

    pub fn is_available(&self) -> bool {
        !matches!(self, RunStatus::NotAvailable)
    }

    pub fn is_running(&self) -> bool {
        matches!(self, RunStatus::Running)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Terminal(_))
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl From<String> for RunStatus {
    fn from(value: String) -> Self {
        RunStatus::Terminal(value)
    }
}

impl From<RunStatus> for String {
    fn from(value: RunStatus) -> Self {
        match value {
            RunStatus::Terminal(result) => result,
            other => other.as_str().to_string(),
        }
    }
}
