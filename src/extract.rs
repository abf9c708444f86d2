use std::collections::BTreeSet;
use std::fs::File;

use camino::{Utf8Path, Utf8PathBuf};
use flate2::read::GzDecoder;
use tar::Archive;
use tracing::{info, warn};

use crate::domain::CandidateDrug;
use crate::error::RepurposeError;
use crate::gct::GctMatrix;

/// Number of compounds carried into enrichment.
pub const TOP_CANDIDATES: usize = 10;

const SUMMARY_SUBPATH: &str = "arfs/TAG/pert_id_summary.gct";
const CONNECTIVITY_PREFIX: &str = "cs_";
const CONNECTIVITY_SUFFIX: &str = ".gct";

/// Unpacks the result tar.gz into `target_dir` and returns the archive's
/// single top-level directory name. Every member must live under one common
/// root; an archive that violates that is rejected before anything is
/// written.
pub fn extract_archive(
    archive_path: &Utf8Path,
    target_dir: &Utf8Path,
) -> Result<String, RepurposeError> {
    let root = archive_root(archive_path)?;

    let file = File::open(archive_path.as_std_path())
        .map_err(|err| RepurposeError::Filesystem(format!("open {archive_path}: {err}")))?;
    let mut archive = Archive::new(GzDecoder::new(file));
    archive
        .unpack(target_dir.as_std_path())
        .map_err(|err| RepurposeError::Filesystem(format!("unpack {archive_path}: {err}")))?;
    info!(root, "result archive extracted");
    Ok(root)
}

fn archive_root(archive_path: &Utf8Path) -> Result<String, RepurposeError> {
    let file = File::open(archive_path.as_std_path())
        .map_err(|err| RepurposeError::Filesystem(format!("open {archive_path}: {err}")))?;
    let mut archive = Archive::new(GzDecoder::new(file));
    let mut roots = BTreeSet::new();
    for entry in archive
        .entries()
        .map_err(|err| RepurposeError::Filesystem(err.to_string()))?
    {
        let entry = entry.map_err(|err| RepurposeError::Filesystem(err.to_string()))?;
        let path = entry
            .path()
            .map_err(|err| RepurposeError::Filesystem(err.to_string()))?;
        let Some(first) = path.components().next() else {
            continue;
        };
        roots.insert(first.as_os_str().to_string_lossy().to_string());
    }
    match roots.len() {
        0 => Err(RepurposeError::ArchiveLayout("archive is empty".to_string())),
        1 => Ok(roots.into_iter().next().unwrap_or_default()),
        _ => Err(RepurposeError::ArchiveLayout(
            roots.into_iter().collect::<Vec<_>>().join(", "),
        )),
    }
}

/// Fixed relative location of the per-compound summary matrix.
pub fn summary_path(data_dir: &Utf8Path, root: &str) -> Utf8PathBuf {
    data_dir.join(root).join(SUMMARY_SUBPATH)
}

/// Locates the connectivity-score matrix among the extraction root's
/// immediate entries (`cs_*.gct`, first match in name order). Absence is a
/// typed error rather than a null that blows up later.
pub fn find_connectivity_file(
    data_dir: &Utf8Path,
    root: &str,
) -> Result<Utf8PathBuf, RepurposeError> {
    let base = data_dir.join(root);
    let entries = std::fs::read_dir(base.as_std_path())
        .map_err(|err| RepurposeError::Filesystem(format!("read {base}: {err}")))?;
    let mut names: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| name.starts_with(CONNECTIVITY_PREFIX) && name.ends_with(CONNECTIVITY_SUFFIX))
        .collect();
    names.sort();
    match names.into_iter().next() {
        Some(name) => Ok(base.join(name)),
        None => Err(RepurposeError::ResultFileMissing(format!(
            "{base}/{CONNECTIVITY_PREFIX}*{CONNECTIVITY_SUFFIX}"
        ))),
    }
}

pub fn require_file(path: Utf8PathBuf) -> Result<Utf8PathBuf, RepurposeError> {
    if path.as_std_path().exists() {
        Ok(path)
    } else {
        Err(RepurposeError::ResultFileMissing(path.to_string()))
    }
}

/// Ranks BRD compounds by ascending TAG score (most signature-reversing
/// first) and resolves display names through the connectivity matrix's row
/// metadata. The sort is stable, so equal scores keep summary row order.
pub fn top_candidates(
    summary: &GctMatrix,
    connectivity: &GctMatrix,
    limit: usize,
) -> Result<Vec<CandidateDrug>, RepurposeError> {
    if !summary.col_ids().iter().any(|id| id == "TAG") {
        return Err(RepurposeError::GctParse {
            file: "pert_id_summary.gct".to_string(),
            message: "missing TAG column".to_string(),
        });
    }

    let mut ranked: Vec<(usize, f64)> = summary
        .row_ids()
        .iter()
        .enumerate()
        .filter(|(_, id)| id.starts_with("BRD"))
        .map(|(row, _)| (row, summary.value(row, "TAG").unwrap_or(f64::NAN)))
        .collect();
    ranked.sort_by(|a, b| a.1.total_cmp(&b.1));

    let mut candidates = Vec::new();
    for (row, score) in ranked.into_iter().take(limit) {
        let broad_id = summary.row_ids()[row].clone();
        let name = connectivity
            .find_row_by_meta("pert_id", &broad_id)
            .and_then(|meta_row| connectivity.row_meta(meta_row, "pert_iname"))
            .map(str::to_string)
            .unwrap_or_else(|| {
                warn!(broad_id, "no pert_iname in connectivity matrix, using id");
                broad_id.clone()
            });
        candidates.push(CandidateDrug {
            broad_id,
            name,
            tag_score: score,
        });
    }
    Ok(candidates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gct::parse_gct;

    fn summary(rows: &[(&str, f64)]) -> GctMatrix {
        let mut text = format!("#1.3\n{}\t1\t0\t0\nid\tTAG\n", rows.len());
        for (id, score) in rows {
            text.push_str(&format!("{id}\t{score}\n"));
        }
        parse_gct("pert_id_summary.gct", &text).unwrap()
    }

    fn connectivity(names: &[(&str, &str)]) -> GctMatrix {
        let mut text = format!("#1.3\n{}\t1\t2\t0\nid\tpert_id\tpert_iname\tTAG\n", names.len());
        for (id, name) in names {
            text.push_str(&format!("{id}\t{id}\t{name}\t0\n"));
        }
        parse_gct("cs_n10.gct", &text).unwrap()
    }

    #[test]
    fn ranking_is_brd_only_ascending_by_tag() {
        let summary = summary(&[
            ("BRD-A", 0.5),
            ("BRD-B", -2.1),
            ("X-C", -5.0),
            ("BRD-D", 1.0),
        ]);
        let csn = connectivity(&[
            ("BRD-A", "aspirin"),
            ("BRD-B", "vorinostat"),
            ("BRD-D", "tretinoin"),
        ]);
        let candidates = top_candidates(&summary, &csn, TOP_CANDIDATES).unwrap();
        let ids: Vec<&str> = candidates.iter().map(|c| c.broad_id.as_str()).collect();
        assert_eq!(ids, ["BRD-B", "BRD-A", "BRD-D"]);
        assert_eq!(candidates[0].name, "vorinostat");
        assert_eq!(candidates[0].tag_score, -2.1);
    }

    #[test]
    fn missing_name_falls_back_to_broad_id() {
        let summary = summary(&[("BRD-Z", -1.0)]);
        let csn = connectivity(&[("BRD-A", "aspirin")]);
        let candidates = top_candidates(&summary, &csn, TOP_CANDIDATES).unwrap();
        assert_eq!(candidates[0].name, "BRD-Z");
    }

    #[test]
    fn limit_caps_the_candidate_list() {
        let rows: Vec<(String, f64)> = (0..15)
            .map(|i| (format!("BRD-{i:02}"), i as f64 * -1.0))
            .collect();
        let borrowed: Vec<(&str, f64)> =
            rows.iter().map(|(id, s)| (id.as_str(), *s)).collect();
        let summary = summary(&borrowed);
        let csn = connectivity(&[]);
        let candidates = top_candidates(&summary, &csn, TOP_CANDIDATES).unwrap();
        assert_eq!(candidates.len(), TOP_CANDIDATES);
        assert_eq!(candidates[0].broad_id, "BRD-14");
    }

    #[test]
    fn archive_round_trip_validates_single_root() {
        let temp = tempfile::tempdir().unwrap();
        let base = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();

        let payload_dir = base.join("my.job.result");
        std::fs::create_dir_all(payload_dir.join("arfs/TAG").as_std_path()).unwrap();
        std::fs::write(
            payload_dir.join("arfs/TAG/pert_id_summary.gct").as_std_path(),
            "#1.3\n0\t1\t0\t0\nid\tTAG\n",
        )
        .unwrap();
        std::fs::write(payload_dir.join("cs_n10.gct").as_std_path(), "#1.3\n").unwrap();

        let archive_path = base.join("cmap_result_x.tar.gz");
        let file = File::create(archive_path.as_std_path()).unwrap();
        let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);
        builder
            .append_dir_all("my.job.result", payload_dir.as_std_path())
            .unwrap();
        builder.into_inner().unwrap().finish().unwrap();

        let out_dir = base.join("out");
        std::fs::create_dir_all(out_dir.as_std_path()).unwrap();
        let root = extract_archive(&archive_path, &out_dir).unwrap();
        assert_eq!(root, "my.job.result");
        assert!(summary_path(&out_dir, &root).as_std_path().exists());
        let cs = find_connectivity_file(&out_dir, &root).unwrap();
        assert!(cs.as_str().ends_with("cs_n10.gct"));
    }

    #[test]
    fn archive_with_two_roots_is_rejected() {
        let temp = tempfile::tempdir().unwrap();
        let base = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();

        let archive_path = base.join("bad.tar.gz");
        let file = File::create(archive_path.as_std_path()).unwrap();
        let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for path in ["first/a.txt", "second/b.txt"] {
            let mut header = tar::Header::new_gnu();
            header.set_size(1);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, path, &b"x"[..]).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap();

        let out_dir = base.join("out");
        std::fs::create_dir_all(out_dir.as_std_path()).unwrap();
        let result = extract_archive(&archive_path, &out_dir);
        assert!(matches!(result, Err(RepurposeError::ArchiveLayout(_))));
    }

    #[test]
    fn missing_connectivity_file_is_typed() {
        let temp = tempfile::tempdir().unwrap();
        let base = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        std::fs::create_dir_all(base.join("root").as_std_path()).unwrap();
        let result = find_connectivity_file(&base, "root");
        assert!(matches!(result, Err(RepurposeError::ResultFileMissing(_))));
    }
}
