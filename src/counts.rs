use std::fs;

use camino::Utf8Path;

use crate::error::RepurposeError;

/// Genes below this count in every sample are dropped before modeling.
pub const LOW_COUNT_THRESHOLD: f64 = 10.0;

/// A genes-by-samples count matrix for one (or several concatenated)
/// experiment files. Rows are genes, columns are samples.
#[derive(Debug, Clone, PartialEq)]
pub struct CountMatrix {
    genes: Vec<String>,
    samples: Vec<String>,
    values: Vec<Vec<f64>>,
}

impl CountMatrix {
    pub fn genes(&self) -> &[String] {
        &self.genes
    }

    pub fn samples(&self) -> &[String] {
        &self.samples
    }

    pub fn row(&self, index: usize) -> &[f64] {
        &self.values[index]
    }

    pub fn n_samples(&self) -> usize {
        self.samples.len()
    }

    pub fn n_genes(&self) -> usize {
        self.genes.len()
    }

    /// Drops genes whose count is below `threshold` in every sample.
    pub fn filter_low_counts(mut self, threshold: f64) -> Self {
        let keep: Vec<bool> = self
            .values
            .iter()
            .map(|row| row.iter().any(|value| *value >= threshold))
            .collect();
        let mut genes = Vec::new();
        let mut values = Vec::new();
        for (index, retain) in keep.iter().enumerate() {
            if *retain {
                genes.push(std::mem::take(&mut self.genes[index]));
                values.push(std::mem::take(&mut self.values[index]));
            }
        }
        Self {
            genes,
            samples: self.samples,
            values,
        }
    }

    /// Column-wise concatenation across experiments. Gene rows are aligned
    /// by symbol (first-appearance order); a gene absent from one matrix
    /// contributes zero counts for that matrix's samples.
    pub fn combine(matrices: &[CountMatrix]) -> CountMatrix {
        let mut genes: Vec<String> = Vec::new();
        for matrix in matrices {
            for gene in &matrix.genes {
                if !genes.contains(gene) {
                    genes.push(gene.clone());
                }
            }
        }
        let mut samples = Vec::new();
        let total_samples: usize = matrices.iter().map(|m| m.samples.len()).sum();
        let mut values = vec![vec![0.0; total_samples]; genes.len()];
        let mut offset = 0usize;
        for matrix in matrices {
            samples.extend(matrix.samples.iter().cloned());
            for (row_index, gene) in matrix.genes.iter().enumerate() {
                let target = genes.iter().position(|g| g == gene).unwrap_or_default();
                for (col_index, value) in matrix.values[row_index].iter().enumerate() {
                    values[target][offset + col_index] = *value;
                }
            }
            offset += matrix.samples.len();
        }
        CountMatrix {
            genes,
            samples,
            values,
        }
    }
}

/// Loads a counts file. The extension picks the separator (`.tsv` or
/// `.csv`); the first column holds gene symbols, the header row holds sample
/// names. Empty or `NA` cells read as zero.
pub fn load_counts(path: &Utf8Path) -> Result<CountMatrix, RepurposeError> {
    let name = path.file_name().unwrap_or_default().to_string();
    let separator = match path.extension() {
        Some("tsv") => '\t',
        Some("csv") => ',',
        _ => return Err(RepurposeError::CountsFormat(name)),
    };

    let content = fs::read_to_string(path.as_std_path())
        .map_err(|err| RepurposeError::CountsParse {
            file: name.clone(),
            message: err.to_string(),
        })?;
    parse_counts(&name, &content, separator)
}

fn parse_counts(
    name: &str,
    content: &str,
    separator: char,
) -> Result<CountMatrix, RepurposeError> {
    let mut lines = content.lines().filter(|line| !line.trim().is_empty());
    let header = lines.next().ok_or_else(|| RepurposeError::CountsParse {
        file: name.to_string(),
        message: "empty file".to_string(),
    })?;
    let samples: Vec<String> = header
        .split(separator)
        .skip(1)
        .map(|field| field.trim().to_string())
        .collect();
    if samples.is_empty() {
        return Err(RepurposeError::CountsParse {
            file: name.to_string(),
            message: "header has no sample columns".to_string(),
        });
    }

    let mut genes = Vec::new();
    let mut values = Vec::new();
    for (lineno, line) in lines.enumerate() {
        let mut fields = line.split(separator);
        let gene = fields.next().unwrap_or_default().trim();
        if gene.is_empty() {
            return Err(RepurposeError::CountsParse {
                file: name.to_string(),
                message: format!("row {} has no gene symbol", lineno + 2),
            });
        }
        let mut row = Vec::with_capacity(samples.len());
        for field in fields {
            let Some(value) = parse_count_cell(field) else {
                return Err(RepurposeError::CountsParse {
                    file: name.to_string(),
                    message: format!(
                        "row {} ({gene}): unreadable count '{}'",
                        lineno + 2,
                        field.trim()
                    ),
                });
            };
            row.push(value);
        }
        if row.len() != samples.len() {
            return Err(RepurposeError::CountsParse {
                file: name.to_string(),
                message: format!(
                    "row {} has {} values for {} samples",
                    lineno + 2,
                    row.len(),
                    samples.len()
                ),
            });
        }
        genes.push(gene.to_string());
        values.push(row);
    }

    Ok(CountMatrix {
        genes,
        samples,
        values,
    })
}

/// Empty and `NA` cells read as zero; anything else must be numeric.
fn parse_count_cell(field: &str) -> Option<f64> {
    let trimmed = field.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("na") {
        return Some(0.0);
    }
    trimmed.parse::<f64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix(text: &str) -> CountMatrix {
        parse_counts("test.tsv", text, '\t').unwrap()
    }

    #[test]
    fn parses_tsv_with_missing_cells() {
        let m = matrix("gene\ts1\ts2\nTP53\t12\t\nBRCA1\tNA\t4\n");
        assert_eq!(m.genes(), ["TP53", "BRCA1"]);
        assert_eq!(m.samples(), ["s1", "s2"]);
        assert_eq!(m.row(0), [12.0, 0.0]);
        assert_eq!(m.row(1), [0.0, 4.0]);
    }

    #[test]
    fn low_count_filter_drops_all_low_rows() {
        let m = matrix("gene\ts1\ts2\nA\t9\t3\nB\t9\t10\nC\t200\t0\n");
        let filtered = m.filter_low_counts(LOW_COUNT_THRESHOLD);
        assert_eq!(filtered.genes(), ["B", "C"]);
    }

    #[test]
    fn combine_aligns_genes_and_zero_fills() {
        let a = matrix("gene\ts1\nA\t5\nB\t7\n");
        let b = matrix("gene\ts2\ts3\nB\t1\t2\nC\t3\t4\n");
        let combined = CountMatrix::combine(&[a, b]);
        assert_eq!(combined.genes(), ["A", "B", "C"]);
        assert_eq!(combined.samples(), ["s1", "s2", "s3"]);
        assert_eq!(combined.row(0), [5.0, 0.0, 0.0]);
        assert_eq!(combined.row(1), [7.0, 1.0, 2.0]);
        assert_eq!(combined.row(2), [0.0, 3.0, 4.0]);
    }

    #[test]
    fn ragged_rows_are_rejected() {
        let result = parse_counts("bad.tsv", "gene\ts1\ts2\nA\t1\n", '\t');
        assert!(result.is_err());
    }

    #[test]
    fn non_numeric_cells_are_fatal() {
        let result = parse_counts("bad.tsv", "gene\ts1\ts2\nA\t1200\toops\n", '\t');
        assert!(matches!(
            result,
            Err(RepurposeError::CountsParse { message, .. }) if message.contains("oops")
        ));
    }
}
