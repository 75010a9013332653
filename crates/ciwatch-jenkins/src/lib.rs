use ciwatch_core::{BuildSource, BuildStatus, JobStatus, SourceError};
use reqwest::blocking::Client;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;
use url::Url;

#[derive(Debug, Clone)]
pub struct JenkinsConfig {
    pub base_url: Url,
    /// `None` waits for as long as the server takes.
    pub timeout: Option<Duration>,
}

/// Jenkins JSON API as a [`BuildSource`].
pub struct JenkinsSource {
    client: Client,
    base_url: Url,
}

impl JenkinsSource {
    pub fn new(config: JenkinsConfig) -> Result<Self, SourceError> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(|err| SourceError::Transport {
            url: config.base_url.to_string(),
            reason: err.to_string(),
        })?;
        Ok(Self {
            client,
            base_url: config.base_url,
        })
    }

    fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, SourceError> {
        debug!(%url, "GET");
        let response = self
            .client
            .get(url.clone())
            .send()
            .map_err(|err| SourceError::Transport {
                url: url.to_string(),
                reason: err.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.text().map_err(|err| SourceError::Transport {
            url: url.to_string(),
            reason: err.to_string(),
        })?;
        decode_json(&url, &body)
    }
}

impl BuildSource for JenkinsSource {
    fn fetch_job_status(&self, job: &str) -> Result<JobStatus, SourceError> {
        let url = job_api_url(&self.base_url, job, None)?;
        self.get_json(url)
    }

    fn fetch_build_status(
        &self,
        job: &str,
        build_number: u64,
    ) -> Result<BuildStatus, SourceError> {
        let url = job_api_url(&self.base_url, job, Some(build_number))?;
        self.get_json(url)
    }
}

/// `{base}/job/{job}/api/json` or `{base}/job/{job}/{build}/api/json`.
pub fn job_api_url(base: &Url, job: &str, build_number: Option<u64>) -> Result<Url, SourceError> {
    let endpoint_error = |reason: &str| SourceError::Endpoint {
        job: job.to_string(),
        reason: reason.to_string(),
    };
    if job.trim().is_empty() {
        return Err(endpoint_error("job name is empty"));
    }

    let mut url = base.clone();
    {
        let mut segments = url
            .path_segments_mut()
            .map_err(|_| endpoint_error("base url cannot carry a path"))?;
        segments.pop_if_empty().push("job").push(job);
        if let Some(number) = build_number {
            segments.push(&number.to_string());
        }
        segments.push("api").push("json");
    }
    Ok(url)
}

fn decode_json<T: DeserializeOwned>(url: &Url, body: &str) -> Result<T, SourceError> {
    serde_json::from_str(body).map_err(|err| SourceError::Decode {
        url: url.to_string(),
        reason: err.to_string(),
    })
}
