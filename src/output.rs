use std::io::{self, Write};

use serde::Serialize;

use crate::app::{ProgressEvent, ProgressSink, RunSummary};

/// Machine-readable output: the run summary as pretty JSON on stdout,
/// progress events suppressed.
pub struct JsonOutput;

impl JsonOutput {
    pub fn print_run(result: &RunSummary) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

/// Operator-facing output: one progress line per stage on stderr, keeping
/// stdout free for the summary.
pub struct ConsoleOutput;

impl ProgressSink for ConsoleOutput {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => eprintln!("{} ({:.0?})", event.message, elapsed),
            None => eprintln!("{}", event.message),
        }
    }
}

pub fn print_run_summary(result: &RunSummary) {
    println!("job: {}", result.job_id);
    println!(
        "signature: {} up / {} down ({} symbols dropped during Entrez resolution)",
        result.signature.up.len(),
        result.signature.down.len(),
        result.resolution.dropped_total()
    );
    match &result.report_path {
        Some(path) => {
            println!("candidates: {}", result.candidates.len());
            for (index, candidate) in result.candidates.iter().enumerate() {
                println!(
                    "  {}. {} ({}) TAG {:.2}",
                    index + 1,
                    candidate.name,
                    candidate.broad_id,
                    candidate.tag_score
                );
            }
            if !result.unmatched.is_empty() {
                println!("no ChEMBL match: {}", result.unmatched.join(", "));
            }
            if !result.duplicates.is_empty() {
                println!("duplicate molecules dropped: {}", result.duplicates.join(", "));
            }
            println!("report: {path}");
        }
        None => println!("no result archive was available; no report written"),
    }
}
