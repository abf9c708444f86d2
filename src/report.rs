use std::fmt::Write as _;
use std::fs;

use camino::Utf8Path;
use tracing::info;

use crate::chembl::MoleculeRecord;
use crate::enrich::{DrugProfile, EnrichmentOutcome};
use crate::error::RepurposeError;

const BRANCH: &str = "├──";
const TERMINATOR: &str = "└──";

/// Minimum clinical phase for a similar molecule to appear in the report.
const PHASE_FLOOR: f64 = 2.0;

/// Similar molecules worth showing to the operator: not the query molecule
/// itself, and in clinical development at phase 2 or later.
pub fn qualifying_similars(profile: &DrugProfile) -> Vec<&MoleculeRecord> {
    profile
        .similars
        .iter()
        .filter(|similar| similar.chembl_id != profile.molecule.chembl_id)
        .filter(|similar| matches!(similar.max_phase, Some(phase) if phase >= PHASE_FLOOR))
        .collect()
}

/// Renders the two-section recommendation report: a compact abstract with
/// one tree of analogues per candidate, then the full structural and
/// clinical record for each.
pub fn render_report(outcome: &EnrichmentOutcome) -> String {
    let mut out = String::new();

    out.push_str("<Abstract>\n");
    for (index, profile) in outcome.profiles.iter().enumerate() {
        let _ = writeln!(
            out,
            "{}. {}({}) [TAG: {:.2}]",
            index + 1,
            profile.candidate.name,
            profile.molecule.chembl_id,
            profile.candidate.tag_score
        );
        let similars = qualifying_similars(profile);
        for (position, similar) in similars.iter().enumerate() {
            let glyph = if position == similars.len() - 1 {
                TERMINATOR
            } else {
                BRANCH
            };
            let _ = writeln!(
                out,
                "{glyph}{}({})",
                display_name(similar),
                phase_label(similar.max_phase)
            );
        }
        out.push('\n');
    }

    out.push_str("\n\n<Detailed Information>\n");
    for (index, profile) in outcome.profiles.iter().enumerate() {
        render_detail(&mut out, index + 1, profile);
    }
    out
}

fn render_detail(out: &mut String, rank: usize, profile: &DrugProfile) {
    let molecule = &profile.molecule;
    let _ = writeln!(out, "===Candidate {rank}: {}===", profile.candidate.name);
    let _ = writeln!(out, "TAG Score: {:.2}", profile.candidate.tag_score);
    let _ = writeln!(out, "ChEMBL Accession ID: {}", molecule.chembl_id);
    let _ = writeln!(out, "SMILES: {}", field(molecule.smiles.as_deref()));
    let _ = writeln!(
        out,
        "Standard InChI Key: {}",
        field(molecule.inchi_key.as_deref())
    );
    let Some(phase) = molecule.max_phase else {
        out.push_str("No clinical trial information available.\n\n\n");
        return;
    };
    out.push_str("Drug information\n");
    let _ = writeln!(
        out,
        "- Preferred name: {}",
        field(molecule.pref_name.as_deref())
    );
    if !molecule.atc_names.is_empty() {
        let _ = writeln!(out, "- ATC classifications: {}", molecule.atc_names.join(", "));
    }
    let _ = writeln!(out, "- Maximum clinical phase: {}", phase_label(Some(phase)));
    if molecule.therapeutic {
        out.push_str("- Currently used in therapy.\n");
    } else if phase == 0.0 {
        out.push_str("- Not used in therapy.\n");
    } else {
        out.push_str("- Still in clinical trials, not yet marketed.\n");
    }

    for (position, similar) in qualifying_similars(profile).iter().enumerate() {
        let _ = writeln!(
            out,
            "\n\tSimilar molecule {} for candidate {}",
            position + 1,
            profile.candidate.broad_id
        );
        if let Some(similarity) = similar.similarity {
            let _ = writeln!(out, "\tSimilarity score: {similarity:.1}%");
        }
        let _ = writeln!(out, "\tChEMBL Accession ID: {}", similar.chembl_id);
        let _ = writeln!(out, "\tSMILES: {}", field(similar.smiles.as_deref()));
        let _ = writeln!(
            out,
            "\tStandard InChI Key: {}",
            field(similar.inchi_key.as_deref())
        );
        out.push_str("\tDrug information\n");
        let _ = writeln!(
            out,
            "\t- Preferred name: {}",
            field(similar.pref_name.as_deref())
        );
        if !similar.atc_names.is_empty() {
            let _ = writeln!(
                out,
                "\t- ATC classifications: {}",
                similar.atc_names.join(", ")
            );
        }
        let _ = writeln!(
            out,
            "\t- Maximum clinical phase: {}",
            phase_label(similar.max_phase)
        );
        if similar.therapeutic {
            out.push_str("\t- Currently used in therapy.\n");
        } else {
            out.push_str("\t- Still in clinical trials, not yet marketed.\n");
        }
    }
    out.push_str("\n\n");
}

pub fn write_report(path: &Utf8Path, outcome: &EnrichmentOutcome) -> Result<(), RepurposeError> {
    let text = render_report(outcome);
    fs::write(path.as_std_path(), text)
        .map_err(|err| RepurposeError::Filesystem(format!("write {path}: {err}")))?;
    info!(%path, candidates = outcome.profiles.len(), "recommendation report written");
    Ok(())
}

fn display_name(molecule: &MoleculeRecord) -> &str {
    molecule.pref_name.as_deref().unwrap_or(&molecule.chembl_id)
}

fn field(value: Option<&str>) -> &str {
    value.unwrap_or("N/A")
}

fn phase_label(phase: Option<f64>) -> String {
    match phase {
        Some(value) if value.fract() == 0.0 => format!("{}", value as i64),
        Some(value) => format!("{value}"),
        None => "N/A".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::CandidateDrug;

    fn molecule(id: &str, phase: Option<f64>, similarity: Option<f64>) -> MoleculeRecord {
        MoleculeRecord {
            chembl_id: id.to_string(),
            score: None,
            similarity,
            atc_names: vec!["L01XH01".to_string()],
            pref_name: Some(format!("drug-{id}")),
            max_phase: phase,
            therapeutic: phase == Some(4.0),
            smiles: Some("CCO".to_string()),
            inchi_key: Some("KEY".to_string()),
        }
    }

    fn profile(name: &str, tag: f64, similars: Vec<MoleculeRecord>) -> DrugProfile {
        DrugProfile {
            candidate: CandidateDrug {
                broad_id: format!("BRD-{name}"),
                name: name.to_string(),
                tag_score: tag,
            },
            molecule: molecule("CHEMBL1", Some(4.0), None),
            similars,
        }
    }

    #[test]
    fn tree_uses_branch_then_terminator() {
        let outcome = EnrichmentOutcome {
            profiles: vec![profile(
                "vorinostat",
                -98.5,
                vec![
                    molecule("CHEMBL2", Some(4.0), Some(91.0)),
                    molecule("CHEMBL3", Some(2.0), Some(64.5)),
                ],
            )],
            ..Default::default()
        };
        let text = render_report(&outcome);
        assert!(text.contains("1. vorinostat(CHEMBL1) [TAG: -98.50]"));
        assert!(text.contains("├──drug-CHEMBL2(4)"));
        assert!(text.contains("└──drug-CHEMBL3(2)"));
        assert!(text.contains("\tSimilarity score: 91.0%"));
    }

    #[test]
    fn excluded_similars_leave_an_empty_tree_but_keep_the_candidate() {
        let outcome = EnrichmentOutcome {
            profiles: vec![profile(
                "tretinoin",
                -12.0,
                vec![
                    molecule("CHEMBL1", Some(4.0), Some(99.0)),
                    molecule("CHEMBL4", None, Some(80.0)),
                    molecule("CHEMBL5", Some(1.0), Some(70.0)),
                ],
            )],
            ..Default::default()
        };
        let text = render_report(&outcome);
        assert!(text.contains("1. tretinoin(CHEMBL1) [TAG: -12.00]"));
        assert!(!text.contains("├──"));
        assert!(!text.contains("└──"));
        assert!(text.contains("===Candidate 1: tretinoin==="));
    }

    #[test]
    fn missing_phase_short_circuits_the_detail_block() {
        let mut single = profile("obscure", -3.0, Vec::new());
        single.molecule.max_phase = None;
        let outcome = EnrichmentOutcome {
            profiles: vec![single],
            ..Default::default()
        };
        let text = render_report(&outcome);
        assert!(text.contains("No clinical trial information available."));
        assert!(!text.contains("Drug information"));
    }
}
