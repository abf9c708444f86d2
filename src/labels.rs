use std::fs;

use camino::Utf8Path;

use crate::error::RepurposeError;

/// Which experimental group each sample column of a counts file belongs to.
/// Entries keep the order of their `>>` sections in the label file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupLabelSet {
    entries: Vec<(String, Vec<String>)>,
}

impl GroupLabelSet {
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries
            .iter()
            .map(|(name, groups)| (name.as_str(), groups.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Parses a `dataset_label.txt` file.
///
/// `#` lines are comments, `>>name` opens a section for counts file `name`,
/// any other non-blank line is a comma-separated group tag list (trimmed and
/// lowercased) for the open section. The last tag line in a section wins.
/// A tag line before the first section header is a format error; this runs
/// before any network activity so a bad file aborts the pipeline early.
pub fn parse_label_file(path: &Utf8Path) -> Result<GroupLabelSet, RepurposeError> {
    if !path.as_std_path().exists() {
        return Err(RepurposeError::LabelFileMissing(
            path.as_std_path().to_path_buf(),
        ));
    }
    let content = fs::read_to_string(path.as_std_path())
        .map_err(|err| RepurposeError::Filesystem(err.to_string()))?;
    parse_labels(&content)
}

pub fn parse_labels(content: &str) -> Result<GroupLabelSet, RepurposeError> {
    let mut entries: Vec<(String, Vec<String>)> = Vec::new();
    let mut current: Option<usize> = None;

    for (lineno, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some(name) = line.strip_prefix(">>") {
            let name = name.trim();
            if name.is_empty() {
                return Err(RepurposeError::LabelFormat(format!(
                    "line {}: section header without a file name",
                    lineno + 1
                )));
            }
            entries.push((name.to_string(), Vec::new()));
            current = Some(entries.len() - 1);
            continue;
        }
        let Some(index) = current else {
            return Err(RepurposeError::LabelFormat(format!(
                "line {}: group tags before the first '>>' section header",
                lineno + 1
            )));
        };
        let groups = line
            .split(',')
            .map(|tag| tag.trim().to_lowercase())
            .collect::<Vec<_>>();
        entries[index].1 = groups;
    }

    if entries.is_empty() {
        return Err(RepurposeError::LabelFormat(
            "no '>>' section header found".to_string(),
        ));
    }
    for (name, groups) in &entries {
        if groups.is_empty() {
            return Err(RepurposeError::LabelFormat(format!(
                "section '{name}' has no group tags"
            )));
        }
    }

    Ok(GroupLabelSet { entries })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn parses_sections_and_tags() {
        let text = "# cohort A\n\n>> gse1234_counts.tsv\nMUT, mut, WT , wt\n>>second.csv\nmut,wt\n";
        let labels = parse_labels(text).unwrap();
        assert_eq!(labels.len(), 2);
        let entries: Vec<_> = labels.iter().collect();
        assert_eq!(entries[0].0, "gse1234_counts.tsv");
        assert_eq!(entries[0].1, ["mut", "mut", "wt", "wt"]);
        assert_eq!(entries[1].0, "second.csv");
        assert_eq!(entries[1].1, ["mut", "wt"]);
    }

    #[test]
    fn last_tag_line_wins_within_section() {
        let text = ">>a.tsv\nmut,wt\nwt,mut\n";
        let labels = parse_labels(text).unwrap();
        let entries: Vec<_> = labels.iter().collect();
        assert_eq!(entries[0].1, ["wt", "mut"]);
    }

    #[test]
    fn tags_before_header_are_rejected() {
        let text = "# intro\nmut,wt\n>>a.tsv\nmut,wt\n";
        assert_matches!(parse_labels(text), Err(RepurposeError::LabelFormat(_)));
    }

    #[test]
    fn missing_section_header_is_rejected() {
        assert_matches!(
            parse_labels("# only comments\n"),
            Err(RepurposeError::LabelFormat(_))
        );
    }

    #[test]
    fn section_without_tags_is_rejected() {
        assert_matches!(
            parse_labels(">>a.tsv\n"),
            Err(RepurposeError::LabelFormat(_))
        );
    }
}
