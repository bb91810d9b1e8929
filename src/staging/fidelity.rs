use std::fs;
use std::hash::Hasher;
use std::io;
use std::path::{Path, PathBuf};

use metrohash::MetroHash64;
use snafu::{ResultExt, Snafu};
use tracing::{debug, warn};

use crate::ext::{BestEffortPathExt, prefixed_name};

/// Outcome of comparing a source tree with its staged copy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FidelityReport {
    pub checked: usize,
    /// Source files without a staged counterpart
    pub missing: Vec<PathBuf>,
    /// Source files whose staged counterpart has different content
    pub mismatched: Vec<PathBuf>,
}

impl FidelityReport {
    pub fn is_faithful(&self) -> bool {
        self.missing.is_empty() && self.mismatched.is_empty()
    }
}

/// Content hash of a single file.
pub fn content_hash(path: &Path) -> io::Result<u64> {
    let bytes = fs::read(path)?;
    let mut hasher = MetroHash64::default();
    hasher.write(&bytes);
    Ok(hasher.finish())
}

/// Checks that every regular file below `source` has a byte-identical copy
/// below `staged`, where each name carries `prefix`. Directories nested
/// deeper than `max_depth` are an error, matching the copier's limit.
///
/// Staged files that were already rewritten by a mutation show up in
/// `mismatched`, so run this before mutating.
pub fn verify_staged_tree(
    prefix: &str,
    source: &Path,
    staged: &Path,
    max_depth: usize,
) -> Result<FidelityReport, VerifyError> {
    let mut report = FidelityReport::default();
    compare_dir(prefix, source, staged, 0, max_depth, &mut report)?;
    debug!(
        checked = report.checked,
        missing = report.missing.len(),
        mismatched = report.mismatched.len(),
        "Verified staged tree"
    );
    Ok(report)
}

fn compare_dir(
    prefix: &str,
    source: &Path,
    staged: &Path,
    depth: usize,
    max_depth: usize,
    report: &mut FidelityReport,
) -> Result<(), VerifyError> {
    if depth > max_depth {
        return Err(VerifyError::TooDeepError {
            path: source.to_path_buf(),
            max_depth,
        });
    }

    let entries = fs::read_dir(source).context(ListSnafu {
        path: source.to_path_buf(),
    })?;
    for entry in entries {
        let entry = entry.context(ListSnafu {
            path: source.to_path_buf(),
        })?;
        let name = entry.file_name();
        let entry_source = source.join(&name);
        let entry_staged = staged.join(prefixed_name(prefix, &name));

        let metadata = fs::metadata(&entry_source).context(HashSnafu {
            path: entry_source.clone(),
        })?;
        if metadata.is_dir() {
            compare_dir(
                prefix,
                &entry_source,
                &entry_staged,
                depth + 1,
                max_depth,
                report,
            )?;
        } else if metadata.is_file() {
            report.checked += 1;
            let expected = content_hash(&entry_source).context(HashSnafu {
                path: entry_source.clone(),
            })?;
            match content_hash(&entry_staged) {
                Ok(actual) if actual == expected => {}
                Ok(_) => {
                    warn!(path = %entry_staged.display(), "Staged file differs from source");
                    report.mismatched.push(entry_source);
                }
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    warn!(path = %entry_staged.display(), "Staged file is missing");
                    report.missing.push(entry_source);
                }
                Err(err) => {
                    return Err(err).context(HashSnafu { path: entry_staged });
                }
            }
        }
    }

    Ok(())
}

#[derive(Debug, Snafu)]
pub enum VerifyError {
    #[snafu(display("Failed to list directory {}", path.best_effort_path_display()))]
    ListError {
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("Failed to hash {}", path.best_effort_path_display()))]
    HashError {
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display(
        "Directory {} is nested deeper than {} levels",
        path.best_effort_path_display(),
        max_depth
    ))]
    TooDeepError { path: PathBuf, max_depth: usize },
}
