use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, warn};

use crate::chembl::ChemblClient;
use crate::cmap::{self, Clock, CmapClient};
use crate::deg::DiffExprEngine;
use crate::domain::{CandidateDrug, GeneSignature};
use crate::enrich;
use crate::entrez::{self, GeneAliasClient, GenePanelClient, ResolutionReport};
use crate::error::RepurposeError;
use crate::extract::{self, TOP_CANDIDATES};
use crate::gct;
use crate::labels;
use crate::report;
use crate::signature;
use crate::workspace::Workspace;

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub combined: bool,
    pub job_name: Option<String>,
}

/// Everything a caller needs to know about a finished run. `report_path` is
/// None when the service never produced a download URL; that run ends
/// without a report but does not error.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub signature: GeneSignature,
    pub mapped_up: usize,
    pub mapped_down: usize,
    pub resolution: ResolutionReport,
    pub job_id: String,
    pub candidates: Vec<CandidateDrug>,
    pub unmatched: Vec<String>,
    pub duplicates: Vec<String>,
    pub report_path: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

fn phase(sink: &dyn ProgressSink, message: impl Into<String>) {
    sink.event(ProgressEvent {
        message: message.into(),
        elapsed: None,
    });
}

/// The pipeline orchestrator. Generic over every external collaborator so
/// tests can run the whole flow against scripted fakes, without network
/// access or real three-minute polls.
pub struct App<E, P, A, C, H, K> {
    workspace: Workspace,
    engine: E,
    panel: P,
    aliases: A,
    cmap: C,
    chembl: H,
    clock: K,
}

impl<E, P, A, C, H, K> App<E, P, A, C, H, K>
where
    E: DiffExprEngine,
    P: GenePanelClient,
    A: GeneAliasClient,
    C: CmapClient,
    H: ChemblClient,
    K: Clock,
{
    pub fn new(
        workspace: Workspace,
        engine: E,
        panel: P,
        aliases: A,
        cmap: C,
        chembl: H,
        clock: K,
    ) -> Self {
        Self {
            workspace,
            engine,
            panel,
            aliases,
            cmap,
            chembl,
            clock,
        }
    }

    pub fn run(
        &self,
        options: RunOptions,
        sink: &dyn ProgressSink,
    ) -> Result<RunSummary, RepurposeError> {
        let ws = &self.workspace;

        phase(sink, format!("phase=Labels; parsing {}", ws.label_file()));
        let labels = labels::parse_label_file(ws.label_file())?;

        phase(
            sink,
            format!(
                "phase=Signature; {} protocol over {} file(s)",
                if options.combined { "combined" } else { "per-file" },
                labels.len()
            ),
        );
        let signature = signature::extract_signature(&self.engine, ws, &labels, options.combined)?;
        info!(
            up = signature.up.len(),
            down = signature.down.len(),
            "signature extracted"
        );

        ws.ensure_data_dir()?;

        phase(sink, "phase=Resolve; mapping symbols to Entrez ids");
        let panel_cache = ws.panel_cache();
        let map = entrez::fetch_entrez_map(&self.panel, panel_cache.as_std_path())?;
        let (mapped, resolution) = entrez::resolve_signature(&signature, &map, &self.aliases)?;
        if mapped.is_empty() {
            warn!("no signature gene resolved to an Entrez id");
        }

        let job_name = options
            .job_name
            .clone()
            .unwrap_or_else(|| format!("kira-rp-{}", chrono::Utc::now().format("%Y%m%d%H%M%S")));
        phase(sink, format!("cmap.submit name={job_name}"));
        let job_id = self.cmap.submit_job(&mapped, &job_name)?;
        info!(job = %job_id, "job submitted");

        let start = Instant::now();
        cmap::wait_for_completion(&self.cmap, &self.clock, &job_id)?;
        sink.event(ProgressEvent {
            message: format!("cmap.completed job={job_id}"),
            elapsed: Some(start.elapsed()),
        });

        let archive = ws.archive_path(&job_id);
        let mut summary = RunSummary {
            signature,
            mapped_up: mapped.up.len(),
            mapped_down: mapped.down.len(),
            resolution,
            job_id: job_id.to_string(),
            candidates: Vec::new(),
            unmatched: Vec::new(),
            duplicates: Vec::new(),
            report_path: None,
        };
        if cmap::retrieve_result(&self.cmap, &job_id, archive.as_std_path())?.is_none() {
            return Ok(summary);
        }

        phase(sink, format!("phase=Extract; unpacking {archive}"));
        let data_dir = ws.data_dir();
        let root = extract::extract_archive(&archive, &data_dir)?;
        let summary_gct =
            gct::parse_gct_file(&extract::require_file(extract::summary_path(&data_dir, &root))?)?;
        let connectivity_gct =
            gct::parse_gct_file(&extract::find_connectivity_file(&data_dir, &root)?)?;
        summary.candidates =
            extract::top_candidates(&summary_gct, &connectivity_gct, TOP_CANDIDATES)?;

        phase(
            sink,
            format!(
                "phase=Enrich; querying ChEMBL for {} candidate(s)",
                summary.candidates.len()
            ),
        );
        let outcome = enrich::enrich_candidates(&self.chembl, &summary.candidates)?;
        summary.unmatched = outcome.unmatched.clone();
        summary.duplicates = outcome.duplicates.clone();

        let report_path = ws.report_path(&job_id);
        report::write_report(&report_path, &outcome)?;
        summary.report_path = Some(report_path.to_string());
        Ok(summary)
    }
}
