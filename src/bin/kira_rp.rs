use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::Parser;
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use kira_repurpose::app::{App, RunOptions};
use kira_repurpose::chembl::ChemblHttpClient;
use kira_repurpose::cmap::{CmapHttpClient, SystemClock};
use kira_repurpose::deg::SystemDeseqEngine;
use kira_repurpose::entrez::{GeneAliasHttpClient, GenePanelHttpClient};
use kira_repurpose::error::RepurposeError;
use kira_repurpose::output::{ConsoleOutput, JsonOutput, print_run_summary};
use kira_repurpose::workspace::Workspace;

#[derive(Parser)]
#[command(name = "kira-rp")]
#[command(about = "Drug repurposing pipeline: expression counts to CMap-ranked candidates")]
#[command(version, author)]
struct Cli {
    /// CMap (clue.io) API key, sent as the user_key header.
    #[arg(long)]
    api_key: String,

    /// Working directory holding the label file and counts matrices.
    #[arg(long, default_value = ".")]
    dir: Utf8PathBuf,

    /// Label file path; defaults to dataset_label.txt inside --dir.
    #[arg(long)]
    label_file: Option<Utf8PathBuf>,

    /// Fit one model over all counts files with the source file as a batch
    /// covariate, instead of per-file fits reconciled by majority vote.
    #[arg(long)]
    combined: bool,

    /// Job name shown on clue.io; defaults to a timestamped name.
    #[arg(long)]
    job_name: Option<String>,

    /// Print the run summary as JSON and suppress progress output.
    #[arg(long)]
    json: bool,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<RepurposeError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &RepurposeError) -> u8 {
    match error {
        RepurposeError::LabelFileMissing(_)
        | RepurposeError::LabelFormat(_)
        | RepurposeError::CountsFormat(_)
        | RepurposeError::CountsParse { .. }
        | RepurposeError::LabelArity { .. } => 2,
        RepurposeError::PanelHttp(_)
        | RepurposeError::PanelStatus { .. }
        | RepurposeError::PanelParse(_)
        | RepurposeError::AliasHttp(_)
        | RepurposeError::CmapHttp(_)
        | RepurposeError::CmapStatus { .. }
        | RepurposeError::JobRejected
        | RepurposeError::JobFailed { .. }
        | RepurposeError::ChemblHttp(_)
        | RepurposeError::ChemblStatus { .. }
        | RepurposeError::MissingTool(_)
        | RepurposeError::Engine(_) => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let workspace = match cli.label_file {
        Some(label_file) => Workspace::with_label_file(cli.dir, label_file),
        None => Workspace::new(cli.dir),
    };

    let engine = SystemDeseqEngine::new();
    let panel = GenePanelHttpClient::new().into_diagnostic()?;
    let aliases = GeneAliasHttpClient::new().into_diagnostic()?;
    let cmap = CmapHttpClient::new(&cli.api_key).into_diagnostic()?;
    let chembl = ChemblHttpClient::new().into_diagnostic()?;
    let app = App::new(workspace, engine, panel, aliases, cmap, chembl, SystemClock);

    let options = RunOptions {
        combined: cli.combined,
        job_name: cli.job_name,
    };

    if cli.json {
        let result = app.run(options, &JsonOutput).into_diagnostic()?;
        JsonOutput::print_run(&result).into_diagnostic()?;
    } else {
        let result = app.run(options, &ConsoleOutput).into_diagnostic()?;
        print_run_summary(&result);
    }
    Ok(())
}
