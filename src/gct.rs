use std::fs;

use camino::Utf8Path;

use crate::error::RepurposeError;

/// A parsed GCT 1.3 matrix: row ids, column ids, per-row metadata columns
/// and the numeric data block. Column metadata lines are read past but not
/// retained; nothing downstream consumes them.
#[derive(Debug, Clone, PartialEq)]
pub struct GctMatrix {
    row_ids: Vec<String>,
    col_ids: Vec<String>,
    row_meta_keys: Vec<String>,
    row_meta: Vec<Vec<String>>,
    values: Vec<Vec<f64>>,
}

impl GctMatrix {
    pub fn row_ids(&self) -> &[String] {
        &self.row_ids
    }

    pub fn col_ids(&self) -> &[String] {
        &self.col_ids
    }

    pub fn n_rows(&self) -> usize {
        self.row_ids.len()
    }

    pub fn value(&self, row: usize, column: &str) -> Option<f64> {
        let col = self.col_ids.iter().position(|id| id == column)?;
        self.values.get(row).and_then(|r| r.get(col)).copied()
    }

    pub fn row_meta(&self, row: usize, key: &str) -> Option<&str> {
        let index = self.row_meta_keys.iter().position(|k| k == key)?;
        self.row_meta
            .get(row)
            .and_then(|meta| meta.get(index))
            .map(String::as_str)
    }

    /// First row whose metadata column `key` equals `value`.
    pub fn find_row_by_meta(&self, key: &str, value: &str) -> Option<usize> {
        (0..self.n_rows()).find(|row| self.row_meta(*row, key) == Some(value))
    }
}

pub fn parse_gct_file(path: &Utf8Path) -> Result<GctMatrix, RepurposeError> {
    let name = path.file_name().unwrap_or_default().to_string();
    let content = fs::read_to_string(path.as_std_path()).map_err(|err| {
        RepurposeError::GctParse {
            file: name.clone(),
            message: err.to_string(),
        }
    })?;
    parse_gct(&name, &content)
}

pub fn parse_gct(name: &str, content: &str) -> Result<GctMatrix, RepurposeError> {
    let fail = |message: String| RepurposeError::GctParse {
        file: name.to_string(),
        message,
    };

    let mut lines = content.lines();
    let version = lines.next().ok_or_else(|| fail("empty file".to_string()))?;
    if version.trim() != "#1.3" {
        return Err(fail(format!("unsupported version line '{version}'")));
    }
    let dims_line = lines
        .next()
        .ok_or_else(|| fail("missing dimensions line".to_string()))?;
    let dims: Vec<usize> = dims_line
        .split('\t')
        .map(|field| field.trim().parse::<usize>())
        .collect::<Result<_, _>>()
        .map_err(|err| fail(format!("bad dimensions line: {err}")))?;
    let [n_rows, n_cols, n_row_meta, n_col_meta] = dims[..] else {
        return Err(fail(format!(
            "expected 4 dimension fields, got {}",
            dims.len()
        )));
    };

    let header = lines
        .next()
        .ok_or_else(|| fail("missing header row".to_string()))?;
    let header_fields: Vec<&str> = header.split('\t').collect();
    if header_fields.len() != 1 + n_row_meta + n_cols {
        return Err(fail(format!(
            "header has {} fields, expected {}",
            header_fields.len(),
            1 + n_row_meta + n_cols
        )));
    }
    let row_meta_keys: Vec<String> = header_fields[1..1 + n_row_meta]
        .iter()
        .map(|field| field.trim().to_string())
        .collect();
    let col_ids: Vec<String> = header_fields[1 + n_row_meta..]
        .iter()
        .map(|field| field.trim().to_string())
        .collect();

    // Column metadata block sits between the header and the data rows.
    for _ in 0..n_col_meta {
        lines
            .next()
            .ok_or_else(|| fail("truncated column metadata block".to_string()))?;
    }

    let mut row_ids = Vec::with_capacity(n_rows);
    let mut row_meta = Vec::with_capacity(n_rows);
    let mut values = Vec::with_capacity(n_rows);
    for line in lines {
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() != 1 + n_row_meta + n_cols {
            return Err(fail(format!(
                "data row '{}' has {} fields, expected {}",
                fields.first().unwrap_or(&""),
                fields.len(),
                1 + n_row_meta + n_cols
            )));
        }
        row_ids.push(fields[0].trim().to_string());
        row_meta.push(
            fields[1..1 + n_row_meta]
                .iter()
                .map(|field| field.trim().to_string())
                .collect(),
        );
        values.push(
            fields[1 + n_row_meta..]
                .iter()
                .map(|field| parse_value(field))
                .collect(),
        );
    }
    if row_ids.len() != n_rows {
        return Err(fail(format!(
            "found {} data rows, dimensions promised {}",
            row_ids.len(),
            n_rows
        )));
    }

    Ok(GctMatrix {
        row_ids,
        col_ids,
        row_meta_keys,
        row_meta,
        values,
    })
}

fn parse_value(field: &str) -> f64 {
    let trimmed = field.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("na") || trimmed.eq_ignore_ascii_case("nan")
    {
        return f64::NAN;
    }
    trimmed.parse::<f64>().unwrap_or(f64::NAN)
}
