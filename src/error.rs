use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum RepurposeError {
    #[error("label file not found at {0}")]
    LabelFileMissing(PathBuf),

    #[error("invalid label file: {0}")]
    LabelFormat(String),

    #[error("unsupported counts file extension: {0} (expected .tsv or .csv)")]
    CountsFormat(String),

    #[error("invalid counts matrix in {file}: {message}")]
    CountsParse { file: String, message: String },

    #[error("{file}: {labels} group labels for {samples} sample columns")]
    LabelArity {
        file: String,
        labels: usize,
        samples: usize,
    },

    #[error("differential expression engine failed: {0}")]
    Engine(String),

    #[error("required tool not found: {0}")]
    MissingTool(String),

    #[error("gene panel request failed: {0}")]
    PanelHttp(String),

    #[error("gene panel returned status {status}: {message}")]
    PanelStatus { status: u16, message: String },

    #[error("malformed gene panel file: {0}")]
    PanelParse(String),

    #[error("gene alias request failed: {0}")]
    AliasHttp(String),

    #[error("CMap request failed: {0}")]
    CmapHttp(String),

    #[error("CMap returned status {status}: {message}")]
    CmapStatus { status: u16, message: String },

    #[error("CMap job submission returned no job id")]
    JobRejected,

    #[error("CMap job {job_id} ended in state {status}")]
    JobFailed { job_id: String, status: String },

    #[error("ChEMBL request failed: {0}")]
    ChemblHttp(String),

    #[error("ChEMBL returned status {status}: {message}")]
    ChemblStatus { status: u16, message: String },

    #[error("result archive has no single top-level directory: {0}")]
    ArchiveLayout(String),

    #[error("expected result file not found: {0}")]
    ResultFileMissing(String),

    #[error("malformed GCT file {file}: {message}")]
    GctParse { file: String, message: String },

    #[error("filesystem error: {0}")]
    Filesystem(String),
}
