use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use snafu::{ResultExt, Snafu};
use tracing::debug;

use crate::ext::BestEffortPathExt;

pub const DEFAULT_SOURCE_MARKER: &str = ".go";
pub const DEFAULT_TEST_MARKER: &str = "_test.go";

/// Decides which files of a directory are mutation targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileClassifier {
    source_marker: String,
    test_marker: String,
}

impl Default for FileClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_SOURCE_MARKER, DEFAULT_TEST_MARKER)
    }
}

impl FileClassifier {
    pub fn new(source_marker: impl Into<String>, test_marker: impl Into<String>) -> Self {
        Self {
            source_marker: source_marker.into(),
            test_marker: test_marker.into(),
        }
    }

    /// Whether a file name is a source file and not a test file.
    pub fn is_eligible_name(&self, name: &str) -> bool {
        name.contains(&self.source_marker) && !name.contains(&self.test_marker)
    }

    /// Lists the eligible source files directly inside `dir`.
    ///
    /// Subdirectories are not descended into. Symlinks are followed, so a
    /// link to a regular file counts as one and a dangling link is ignored. Results keep the order in which
    /// the directory listing returned them.
    pub fn find_eligible_files(&self, dir: &Path) -> Result<Vec<PathBuf>, ClassifyError> {
        let entries = fs::read_dir(dir).context(ListSnafu {
            path: dir.to_path_buf(),
        })?;

        let mut found_files = Vec::new();
        for entry in entries {
            let entry = entry.context(ListSnafu {
                path: dir.to_path_buf(),
            })?;
            let path = entry.path();

            let is_file = match fs::metadata(&path) {
                Ok(metadata) => metadata.is_file(),
                Err(err) if err.kind() == io::ErrorKind::NotFound => false,
                Err(err) => return Err(err).context(StatSnafu { path }),
            };
            if is_file && self.is_eligible_name(&entry.file_name().to_string_lossy()) {
                found_files.push(path);
            }
        }

        debug!(files = ?found_files, "Found eligible source files");
        Ok(found_files)
    }
}

#[derive(Debug, Snafu)]
pub enum ClassifyError {
    #[snafu(display("Failed to list directory {}", path.best_effort_path_display()))]
    ListError {
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("Failed to inspect {}", path.best_effort_path_display()))]
    StatError {
        path: PathBuf,
        source: std::io::Error,
    },
}
