use tracing::info;

use crate::counts::{self, CountMatrix, LOW_COUNT_THRESHOLD};
use crate::deg::{DegRecord, DiffExprEngine, SampleCondition};
use crate::domain::{GeneSignature, PADJ_CUTOFF, SIGNATURE_SIZE};
use crate::error::RepurposeError;
use crate::labels::GroupLabelSet;
use crate::workspace::Workspace;

/// Derives the up/down signature from one engine run.
///
/// Genes with padj < 0.1 are ranked ascending by padj within each fold-change
/// direction and capped at 30. A direction with fewer than 30 significant
/// genes falls back to ranking the full unfiltered table for that direction
/// instead, still capped at 30. Sorting is stable, so padj ties keep the
/// engine's row order.
pub fn derive_signature(records: &[DegRecord]) -> GeneSignature {
    GeneSignature {
        up: ranked_direction(records, |lfc| lfc > 0.0),
        down: ranked_direction(records, |lfc| lfc < 0.0),
    }
}

fn ranked_direction(records: &[DegRecord], direction: impl Fn(f64) -> bool) -> Vec<String> {
    let significant: Vec<&DegRecord> = records
        .iter()
        .filter(|record| {
            direction(record.log2_fold_change)
                && record.padj.map(|padj| padj < PADJ_CUTOFF).unwrap_or(false)
        })
        .collect();

    let mut pool: Vec<&DegRecord> = if significant.len() < SIGNATURE_SIZE {
        records
            .iter()
            .filter(|record| direction(record.log2_fold_change))
            .collect()
    } else {
        significant
    };
    pool.sort_by(|a, b| padj_key(a).total_cmp(&padj_key(b)));
    pool.into_iter()
        .take(SIGNATURE_SIZE)
        .map(|record| record.gene.clone())
        .collect()
}

fn padj_key(record: &DegRecord) -> f64 {
    record.padj.unwrap_or(f64::INFINITY)
}

/// Majority-vote reconciliation for the per-file protocol: a gene survives
/// iff it appears in at least half of the per-file lists, counting repeated
/// appearances. Output keeps first-occurrence order with duplicates
/// collapsed.
pub fn majority_vote(per_file: &[GeneSignature], n_files: usize) -> GeneSignature {
    GeneSignature {
        up: vote(per_file.iter().map(|sig| sig.up.as_slice()), n_files),
        down: vote(per_file.iter().map(|sig| sig.down.as_slice()), n_files),
    }
}

fn vote<'a>(lists: impl Iterator<Item = &'a [String]>, n_files: usize) -> Vec<String> {
    let pooled: Vec<&String> = lists.flatten().collect();
    let mut retained = Vec::new();
    for gene in &pooled {
        if retained.iter().any(|kept: &String| kept == *gene) {
            continue;
        }
        let occurrences = pooled.iter().filter(|&&other| other == *gene).count();
        if occurrences * 2 >= n_files {
            retained.push((*gene).clone());
        }
    }
    retained
}

/// Runs the full signature stage: loads every labeled counts file and
/// produces one signature, either from a single combined fit (with the
/// source file as batch covariate) or from per-file fits reconciled by
/// majority vote.
pub fn extract_signature<E: DiffExprEngine>(
    engine: &E,
    workspace: &Workspace,
    labels: &GroupLabelSet,
    combined: bool,
) -> Result<GeneSignature, RepurposeError> {
    let mut matrices = Vec::new();
    let mut conditions_per_file = Vec::new();
    for (name, groups) in labels.iter() {
        let matrix = counts::load_counts(&workspace.counts_file(name))?;
        if groups.len() != matrix.n_samples() {
            return Err(RepurposeError::LabelArity {
                file: name.to_string(),
                labels: groups.len(),
                samples: matrix.n_samples(),
            });
        }
        let conditions: Vec<SampleCondition> = matrix
            .samples()
            .iter()
            .zip(groups)
            .map(|(sample, group)| SampleCondition {
                sample: sample.clone(),
                group: group.clone(),
                experiment: name.to_string(),
            })
            .collect();
        matrices.push(matrix);
        conditions_per_file.push(conditions);
    }

    if combined {
        let merged = CountMatrix::combine(&matrices).filter_low_counts(LOW_COUNT_THRESHOLD);
        let conditions: Vec<SampleCondition> =
            conditions_per_file.into_iter().flatten().collect();
        let records = engine.differential_expression(&merged, &conditions)?;
        info!(genes = records.len(), "combined fit complete");
        return Ok(derive_signature(&records));
    }

    let n_files = matrices.len();
    let mut per_file = Vec::new();
    for (matrix, conditions) in matrices.into_iter().zip(conditions_per_file) {
        let filtered = matrix.filter_low_counts(LOW_COUNT_THRESHOLD);
        let records = engine.differential_expression(&filtered, &conditions)?;
        info!(
            file = %conditions.first().map(|c| c.experiment.as_str()).unwrap_or("?"),
            genes = records.len(),
            "per-file fit complete"
        );
        per_file.push(derive_signature(&records));
    }
    Ok(majority_vote(&per_file, n_files))
}
