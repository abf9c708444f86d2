use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::counts::CountMatrix;
use crate::error::RepurposeError;

/// Per-sample metadata handed to the fitting engine alongside the counts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleCondition {
    pub sample: String,
    /// "mut" or "wt".
    pub group: String,
    /// Source counts file, used as a batch covariate in the combined
    /// protocol.
    pub experiment: String,
}

/// One gene's result from the MUT-vs-WT contrast.
#[derive(Debug, Clone, PartialEq)]
pub struct DegRecord {
    pub gene: String,
    pub log2_fold_change: f64,
    /// Adjusted p-value; `None` when the engine could not compute one.
    pub padj: Option<f64>,
}

/// External differential-expression collaborator. Receives a low-count
/// filtered matrix plus group/experiment metadata, fits the MUT-vs-WT
/// contrast with design `~ experiment + group`, and returns per-gene effect
/// size and significance. Any failure here is fatal to the run.
pub trait DiffExprEngine: Send + Sync {
    fn differential_expression(
        &self,
        counts: &CountMatrix,
        conditions: &[SampleCondition],
    ) -> Result<Vec<DegRecord>, RepurposeError>;
}

/// Runs the fitting through an external `kira-deseq2` executable, exchanging
/// TSV files through a temp directory. The tool reads the counts and
/// metadata tables and writes a `results.tsv` with columns
/// gene / log2FoldChange / padj.
#[derive(Clone)]
pub struct SystemDeseqEngine {
    tool: Option<PathBuf>,
}

const DESEQ_TOOL: &str = "kira-deseq2";

impl SystemDeseqEngine {
    pub fn new() -> Self {
        Self {
            tool: find_in_path(DESEQ_TOOL),
        }
    }

    pub fn with_tool(tool: PathBuf) -> Self {
        Self { tool: Some(tool) }
    }

    fn require_tool(&self) -> Result<&PathBuf, RepurposeError> {
        self.tool
            .as_ref()
            .ok_or_else(|| RepurposeError::MissingTool(DESEQ_TOOL.to_string()))
    }

    fn write_inputs(
        dir: &Path,
        counts: &CountMatrix,
        conditions: &[SampleCondition],
    ) -> Result<(PathBuf, PathBuf), RepurposeError> {
        let counts_path = dir.join("counts.tsv");
        let meta_path = dir.join("metadata.tsv");

        let mut counts_file = fs::File::create(&counts_path)
            .map_err(|err| RepurposeError::Filesystem(err.to_string()))?;
        writeln!(counts_file, "gene\t{}", counts.samples().join("\t"))
            .map_err(|err| RepurposeError::Filesystem(err.to_string()))?;
        for (index, gene) in counts.genes().iter().enumerate() {
            let row = counts
                .row(index)
                .iter()
                .map(|value| format!("{value}"))
                .collect::<Vec<_>>()
                .join("\t");
            writeln!(counts_file, "{gene}\t{row}")
                .map_err(|err| RepurposeError::Filesystem(err.to_string()))?;
        }

        let mut meta_file = fs::File::create(&meta_path)
            .map_err(|err| RepurposeError::Filesystem(err.to_string()))?;
        writeln!(meta_file, "sample\tgroup\texperiment")
            .map_err(|err| RepurposeError::Filesystem(err.to_string()))?;
        for condition in conditions {
            writeln!(
                meta_file,
                "{}\t{}\t{}",
                condition.sample, condition.group, condition.experiment
            )
            .map_err(|err| RepurposeError::Filesystem(err.to_string()))?;
        }

        Ok((counts_path, meta_path))
    }
}

impl Default for SystemDeseqEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl DiffExprEngine for SystemDeseqEngine {
    fn differential_expression(
        &self,
        counts: &CountMatrix,
        conditions: &[SampleCondition],
    ) -> Result<Vec<DegRecord>, RepurposeError> {
        let tool = self.require_tool()?;
        let temp_dir = tempfile::Builder::new()
            .prefix("kira-rp-deseq")
            .tempdir()
            .map_err(|err| RepurposeError::Filesystem(err.to_string()))?;
        let (counts_path, meta_path) = Self::write_inputs(temp_dir.path(), counts, conditions)?;
        let results_path = temp_dir.path().join("results.tsv");

        let output = Command::new(tool)
            .arg("--counts")
            .arg(&counts_path)
            .arg("--metadata")
            .arg(&meta_path)
            .arg("--design")
            .arg("~ experiment + group")
            .arg("--contrast")
            .arg("group,mut,wt")
            .arg("--out")
            .arg(&results_path)
            .output()
            .map_err(|err| RepurposeError::Engine(err.to_string()))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let message = if stderr.is_empty() {
                format!("{DESEQ_TOOL} exited with {}", output.status)
            } else {
                stderr
            };
            return Err(RepurposeError::Engine(message));
        }

        let content = fs::read_to_string(&results_path)
            .map_err(|err| RepurposeError::Engine(format!("missing results table: {err}")))?;
        parse_results(&content)
    }
}

/// Parses the engine's results table: gene / log2FoldChange / padj, tab
/// separated, `NA` for an undefined padj.
pub fn parse_results(content: &str) -> Result<Vec<DegRecord>, RepurposeError> {
    let mut lines = content.lines().filter(|line| !line.trim().is_empty());
    let header = lines
        .next()
        .ok_or_else(|| RepurposeError::Engine("empty results table".to_string()))?;
    let columns: Vec<&str> = header.split('\t').collect();
    let lfc_col = find_column(&columns, "log2FoldChange")?;
    let padj_col = find_column(&columns, "padj")?;

    let mut records = Vec::new();
    for line in lines {
        let fields: Vec<&str> = line.split('\t').collect();
        let gene = fields.first().copied().unwrap_or_default();
        if gene.is_empty() {
            continue;
        }
        let lfc = fields
            .get(lfc_col)
            .and_then(|value| value.trim().parse::<f64>().ok())
            .ok_or_else(|| {
                RepurposeError::Engine(format!("gene {gene}: unreadable log2FoldChange"))
            })?;
        let padj = fields
            .get(padj_col)
            .and_then(|value| value.trim().parse::<f64>().ok());
        records.push(DegRecord {
            gene: gene.to_string(),
            log2_fold_change: lfc,
            padj,
        });
    }
    Ok(records)
}

fn find_column(columns: &[&str], name: &str) -> Result<usize, RepurposeError> {
    columns
        .iter()
        .position(|column| *column == name)
        .ok_or_else(|| RepurposeError::Engine(format!("results table missing column {name}")))
}

fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for path in std::env::split_paths(&path_var) {
        let exe = path.join(format!("{name}.exe"));
        if exe.exists() {
            return Some(exe);
        }
        let plain = path.join(name);
        if plain.exists() {
            return Some(plain);
        }
    }
    None
}
