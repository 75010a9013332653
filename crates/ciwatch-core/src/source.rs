use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("request to {url} failed: {reason}")]
    Transport { url: String, reason: String },
    #[error("{url} answered with HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("could not decode response from {url}: {reason}")]
    Decode { url: String, reason: String },
    #[error("invalid endpoint for job {job}: {reason}")]
    Endpoint { job: String, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRef {
    pub number: u64,
}

/// Build history of a job, in the order the CI server lists it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatus {
    #[serde(default)]
    pub builds: Vec<BuildRef>,
}

/// Status record of a single build.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildStatus {
    #[serde(default)]
    pub building: bool,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl BuildStatus {
    pub fn description(&self) -> &str {
        self.description.as_deref().unwrap_or_default()
    }
}

/// Where build history comes from. Implementations block until the answer is available and
/// report every failure; callers treat any error as fatal.
pub trait BuildSource {
    fn fetch_job_status(&self, job: &str) -> Result<JobStatus, SourceError>;

    fn fetch_build_status(&self, job: &str, build_number: u64)
        -> Result<BuildStatus, SourceError>;
}

impl<T: BuildSource + ?Sized> BuildSource for &T {
    fn fetch_job_status(&self, job: &str) -> Result<JobStatus, SourceError> {
        (**self).fetch_job_status(job)
    }

    fn fetch_build_status(
        &self,
        job: &str,
        build_number: u64,
    ) -> Result<BuildStatus, SourceError> {
        (**self).fetch_build_status(job, build_number)
    }
}
