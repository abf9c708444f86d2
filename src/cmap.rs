use std::fs::File;
use std::path::Path;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT};
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::domain::{JobId, JobStatus, MappedSignature};
use crate::error::RepurposeError;

/// Fixed wait between status polls. The remote service runs batch jobs that
/// take minutes to hours, so the loop blocks for as long as it takes.
pub const POLL_INTERVAL: Duration = Duration::from_secs(180);

const ANALYSIS_TOOL_ID: &str = "sig_gutc_tool";

/// Job record as returned by the findByJobId endpoint. The download URL
/// only appears once the job has completed.
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub status: JobStatus,
    pub download_url: Option<String>,
}

pub trait CmapClient: Send + Sync {
    fn submit_job(&self, signature: &MappedSignature, name: &str) -> Result<JobId, RepurposeError>;
    fn job_record(&self, job_id: &JobId) -> Result<JobRecord, RepurposeError>;
    fn download(&self, url: &str, destination: &Path) -> Result<(), RepurposeError>;
}

/// Sleep abstraction so the poll loop can be driven by a scripted clock in
/// tests instead of real three-minute waits.
pub trait Clock: Send + Sync {
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

#[derive(Clone)]
pub struct CmapHttpClient {
    client: Client,
    base_url: String,
}

impl CmapHttpClient {
    pub fn new(api_key: &str) -> Result<Self, RepurposeError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("kira-rp/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| RepurposeError::Filesystem(err.to_string()))?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let mut key_value = HeaderValue::from_str(api_key)
            .map_err(|err| RepurposeError::CmapHttp(err.to_string()))?;
        key_value.set_sensitive(true);
        headers.insert("user_key", key_value);

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|err| RepurposeError::CmapHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: "https://api.clue.io/api".to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

impl CmapClient for CmapHttpClient {
    fn submit_job(&self, signature: &MappedSignature, name: &str) -> Result<JobId, RepurposeError> {
        let payload = submission_payload(signature, name);
        let response = self
            .client
            .post(format!("{}/jobs", self.base_url))
            .header(CONTENT_TYPE, "application/json")
            .json(&payload)
            .send()
            .map_err(|err| RepurposeError::CmapHttp(err.to_string()))?;
        let status = response.status().as_u16();
        if !matches!(status, 200 | 201 | 202) {
            let message = response
                .text()
                .unwrap_or_else(|_| "job submission failed".to_string());
            return Err(RepurposeError::CmapStatus { status, message });
        }
        let body: Value = response
            .json()
            .map_err(|err| RepurposeError::CmapHttp(err.to_string()))?;
        extract_job_id(&body).ok_or(RepurposeError::JobRejected)
    }

    fn job_record(&self, job_id: &JobId) -> Result<JobRecord, RepurposeError> {
        let url = format!("{}/jobs/findByJobId/{}", self.base_url, job_id.as_str());
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| RepurposeError::CmapHttp(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "job status request failed".to_string());
            return Err(RepurposeError::CmapStatus { status, message });
        }
        let body: Value = response
            .json()
            .map_err(|err| RepurposeError::CmapHttp(err.to_string()))?;
        Ok(parse_job_record(&body))
    }

    fn download(&self, url: &str, destination: &Path) -> Result<(), RepurposeError> {
        let mut response = self
            .client
            .get(url)
            .send()
            .map_err(|err| RepurposeError::CmapHttp(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "result download failed".to_string());
            return Err(RepurposeError::CmapStatus { status, message });
        }
        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|err| RepurposeError::Filesystem(err.to_string()))?;
        }
        let mut file =
            File::create(destination).map_err(|err| RepurposeError::Filesystem(err.to_string()))?;
        std::io::copy(&mut response, &mut file)
            .map_err(|err| RepurposeError::Filesystem(err.to_string()))?;
        Ok(())
    }
}

/// Tag lines are the CMap grp wire format: a TAG marker, an empty cell,
/// then the Entrez ids joined by tabs.
pub fn submission_payload(signature: &MappedSignature, name: &str) -> Value {
    json!({
        "tool_id": ANALYSIS_TOOL_ID,
        "name": name,
        "data_type": "L1000",
        "dataset": "Touchstone",
        "ignoreWarnings": true,
        "uptag-cmapfile": tag_line(&signature.up),
        "dntag-cmapfile": tag_line(&signature.down),
    })
}

fn tag_line(ids: &[String]) -> String {
    format!("TAG\t\t{}", ids.join("\t"))
}

pub fn extract_job_id(body: &Value) -> Option<JobId> {
    let field = body.get("result")?.get("job_id")?;
    match field {
        Value::String(value) => Some(JobId::new(value.clone())),
        Value::Number(value) => Some(JobId::new(value.to_string())),
        _ => None,
    }
}

pub fn parse_job_record(body: &Value) -> JobRecord {
    let status = body
        .get("status")
        .and_then(|value| value.as_str())
        .map(JobStatus::parse)
        .unwrap_or_else(|| JobStatus::Unknown("missing status field".to_string()));
    let download_url = body
        .get("download_url")
        .and_then(|value| value.as_str())
        .map(|value| value.to_string());
    JobRecord {
        status,
        download_url,
    }
}

/// Blocks until the job reaches a terminal state, polling at
/// [`POLL_INTERVAL`]. Submitted/Pending re-poll after a sleep; Completed
/// returns; Failed and Unknown raise instead of spinning forever on a
/// status the service never documented.
pub fn wait_for_completion<C: CmapClient, K: Clock>(
    client: &C,
    clock: &K,
    job_id: &JobId,
) -> Result<(), RepurposeError> {
    loop {
        let record = client.job_record(job_id)?;
        match record.status {
            JobStatus::Submitted | JobStatus::Pending => {
                info!(job = %job_id, status = %record.status, "job not finished, waiting");
                clock.sleep(POLL_INTERVAL);
            }
            JobStatus::Completed => {
                info!(job = %job_id, "job completed");
                return Ok(());
            }
            status @ (JobStatus::Failed(_) | JobStatus::Unknown(_)) => {
                return Err(RepurposeError::JobFailed {
                    job_id: job_id.to_string(),
                    status: status.to_string(),
                });
            }
        }
    }
}

/// Fetches the completed job's download URL and streams the archive to
/// `destination`. A record without a download URL is a soft miss: the run
/// ends without a report rather than aborting.
pub fn retrieve_result<C: CmapClient>(
    client: &C,
    job_id: &JobId,
    destination: &Path,
) -> Result<Option<()>, RepurposeError> {
    let record = client.job_record(job_id)?;
    let Some(raw_url) = record.download_url else {
        warn!(job = %job_id, "completed job has no download_url field");
        return Ok(None);
    };
    let url = normalize_download_url(&raw_url);
    info!(job = %job_id, url, "downloading result archive");
    client.download(&url, destination)?;
    Ok(Some(()))
}

/// The API reports protocol-relative URLs (`//host/path`).
pub fn normalize_download_url(url: &str) -> String {
    if url.starts_with("//") {
        format!("https:{url}")
    } else {
        url.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;
    use std::sync::Mutex;

    struct ScriptedCmap {
        statuses: Mutex<Vec<JobStatus>>,
        polls: Mutex<usize>,
    }

    impl ScriptedCmap {
        fn new(statuses: Vec<JobStatus>) -> Self {
            Self {
                statuses: Mutex::new(statuses),
                polls: Mutex::new(0),
            }
        }

        fn poll_count(&self) -> usize {
            *self.polls.lock().unwrap()
        }
    }

    impl CmapClient for ScriptedCmap {
        fn submit_job(
            &self,
            _signature: &MappedSignature,
            _name: &str,
        ) -> Result<JobId, RepurposeError> {
            Ok(JobId::new("job-1"))
        }

        fn job_record(&self, _job_id: &JobId) -> Result<JobRecord, RepurposeError> {
            *self.polls.lock().unwrap() += 1;
            let mut statuses = self.statuses.lock().unwrap();
            let status = statuses.remove(0);
            Ok(JobRecord {
                status,
                download_url: None,
            })
        }

        fn download(&self, _url: &str, _destination: &Path) -> Result<(), RepurposeError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingClock {
        sleeps: Mutex<usize>,
    }

    impl Clock for CountingClock {
        fn sleep(&self, _duration: Duration) {
            *self.sleeps.lock().unwrap() += 1;
        }
    }

    #[test]
    fn poll_loop_counts_requests_and_sleeps() {
        let client = ScriptedCmap::new(vec![
            JobStatus::Pending,
            JobStatus::Pending,
            JobStatus::Completed,
        ]);
        let clock = CountingClock::default();
        wait_for_completion(&client, &clock, &JobId::new("job-1")).unwrap();
        assert_eq!(client.poll_count(), 3);
        assert_eq!(*clock.sleeps.lock().unwrap(), 2);
    }

    #[test]
    fn failed_status_raises_instead_of_spinning() {
        let client = ScriptedCmap::new(vec![
            JobStatus::Pending,
            JobStatus::Failed("failed".to_string()),
        ]);
        let clock = CountingClock::default();
        let result = wait_for_completion(&client, &clock, &JobId::new("job-1"));
        assert_matches!(result, Err(RepurposeError::JobFailed { .. }));
        assert_eq!(*clock.sleeps.lock().unwrap(), 1);
    }

    #[test]
    fn unknown_status_is_terminal() {
        let client = ScriptedCmap::new(vec![JobStatus::Unknown("archived".to_string())]);
        let clock = CountingClock::default();
        let result = wait_for_completion(&client, &clock, &JobId::new("job-1"));
        assert_matches!(result, Err(RepurposeError::JobFailed { status, .. }) if status == "archived");
    }

    #[test]
    fn payload_encodes_tag_lines() {
        let signature = MappedSignature {
            up: vec!["7157".to_string(), "672".to_string()],
            down: vec!["100".to_string()],
        };
        let payload = submission_payload(&signature, "run-1");
        assert_eq!(payload["uptag-cmapfile"], "TAG\t\t7157\t672");
        assert_eq!(payload["dntag-cmapfile"], "TAG\t\t100");
        assert_eq!(payload["tool_id"], ANALYSIS_TOOL_ID);
        assert_eq!(payload["ignoreWarnings"], true);
    }

    #[test]
    fn job_id_accepts_string_or_number() {
        let by_string = json!({"result": {"job_id": "abc123"}});
        let by_number = json!({"result": {"job_id": 42}});
        assert_eq!(extract_job_id(&by_string).unwrap().as_str(), "abc123");
        assert_eq!(extract_job_id(&by_number).unwrap().as_str(), "42");
        assert!(extract_job_id(&json!({"result": {}})).is_none());
    }

    #[test]
    fn protocol_relative_urls_become_https() {
        assert_eq!(
            normalize_download_url("//s3.amazonaws.com/results/x.tar.gz"),
            "https://s3.amazonaws.com/results/x.tar.gz"
        );
        assert_eq!(
            normalize_download_url("https://example.com/x.tar.gz"),
            "https://example.com/x.tar.gz"
        );
    }
}
