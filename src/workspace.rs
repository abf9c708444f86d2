use std::fs;

use camino::{Utf8Path, Utf8PathBuf};

use crate::domain::JobId;
use crate::error::RepurposeError;

/// Default label-file name looked up in the working directory.
pub const LABEL_FILE_NAME: &str = "dataset_label.txt";

/// Cached copy of the L1000 BING gene panel.
pub const PANEL_FILE_NAME: &str = "L1000_BING_genes.txt.gz";

/// All on-disk locations used by a pipeline run. Replaces the implicit
/// process-wide working directory: every stage receives this struct and
/// never calls `chdir`.
#[derive(Debug, Clone)]
pub struct Workspace {
    home: Utf8PathBuf,
    label_file: Utf8PathBuf,
}

impl Workspace {
    pub fn new(home: Utf8PathBuf) -> Self {
        let label_file = home.join(LABEL_FILE_NAME);
        Self { home, label_file }
    }

    pub fn with_label_file(home: Utf8PathBuf, label_file: Utf8PathBuf) -> Self {
        Self { home, label_file }
    }

    pub fn home(&self) -> &Utf8Path {
        &self.home
    }

    /// Downloads, archives and reports all land here.
    pub fn data_dir(&self) -> Utf8PathBuf {
        self.home.join("data")
    }

    pub fn label_file(&self) -> &Utf8Path {
        &self.label_file
    }

    /// Count matrices are referenced by bare file name in the label file and
    /// resolved against the working directory.
    pub fn counts_file(&self, name: &str) -> Utf8PathBuf {
        self.home.join(name)
    }

    pub fn panel_cache(&self) -> Utf8PathBuf {
        self.data_dir().join(PANEL_FILE_NAME)
    }

    pub fn archive_path(&self, job_id: &JobId) -> Utf8PathBuf {
        self.data_dir().join(archive_name(job_id))
    }

    /// Report name is derived from the archive name by substring
    /// replacement, so the two stay correlated on disk.
    pub fn report_path(&self, job_id: &JobId) -> Utf8PathBuf {
        let name = archive_name(job_id)
            .replace("cmap_result", "Recommendations")
            .replace(".tar.gz", ".txt");
        self.data_dir().join(name)
    }

    pub fn ensure_data_dir(&self) -> Result<(), RepurposeError> {
        fs::create_dir_all(self.data_dir().as_std_path())
            .map_err(|err| RepurposeError::Filesystem(err.to_string()))
    }
}

fn archive_name(job_id: &JobId) -> String {
    format!("cmap_result_{}.tar.gz", job_id.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_paths() {
        let ws = Workspace::new(Utf8PathBuf::from("/work"));
        let job = JobId::new("5f2a");
        assert_eq!(ws.label_file().as_str(), "/work/dataset_label.txt");
        assert_eq!(
            ws.archive_path(&job).as_str(),
            "/work/data/cmap_result_5f2a.tar.gz"
        );
        assert_eq!(
            ws.report_path(&job).as_str(),
            "/work/data/Recommendations_5f2a.txt"
        );
    }
}
