use std::fmt;

use serde::{Deserialize, Serialize};

/// Ranked up/down gene-symbol lists derived from a differential expression
/// run. Each direction is capped at [`SIGNATURE_SIZE`] entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GeneSignature {
    pub up: Vec<String>,
    pub down: Vec<String>,
}

/// Number of genes submitted to CMap per direction.
pub const SIGNATURE_SIZE: usize = 30;

/// Adjusted p-value cutoff for a gene to count as differentially expressed.
pub const PADJ_CUTOFF: f64 = 0.1;

/// The same up/down structure after symbol-to-Entrez resolution. Only
/// successfully resolved genes remain; order follows the source signature.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MappedSignature {
    pub up: Vec<String>,
    pub down: Vec<String>,
}

impl MappedSignature {
    pub fn is_empty(&self) -> bool {
        self.up.is_empty() && self.down.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(String);

impl JobId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Remote job lifecycle as reported by the CMap API. Statuses outside the
/// documented set are preserved verbatim in `Unknown` so the poller can
/// surface them instead of spinning on them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Submitted,
    Pending,
    Completed,
    Failed(String),
    Unknown(String),
}

impl JobStatus {
    pub fn parse(value: &str) -> Self {
        match value {
            "submitted" => JobStatus::Submitted,
            "pending" => JobStatus::Pending,
            "completed" => JobStatus::Completed,
            "failed" | "error" => JobStatus::Failed(value.to_string()),
            other => JobStatus::Unknown(other.to_string()),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Submitted | JobStatus::Pending)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Submitted => write!(f, "submitted"),
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed(raw) => write!(f, "{raw}"),
            JobStatus::Unknown(raw) => write!(f, "{raw}"),
        }
    }
}

/// One BRD compound surviving the TAG ranking, in ranked order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateDrug {
    pub broad_id: String,
    pub name: String,
    pub tag_score: f64,
}
