use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use snafu::{ResultExt, Snafu};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::ext::BestEffortPathExt;

/// Deletes `path` and creates an empty file in its place, returning the
/// handle for writing.
///
/// This is not atomic. If the create fails after the delete succeeded, the
/// old content is gone for good. Use [`replace_atomically`] when the caller
/// cannot afford that window.
pub fn reopen_empty(path: &Path) -> Result<File, ReplaceError> {
    fs::remove_file(path).context(RemoveSnafu {
        path: path.to_path_buf(),
    })?;
    let file = File::create(path).context(CreateSnafu {
        path: path.to_path_buf(),
    })?;
    debug!(path = %path.display(), "Reopened file empty");
    Ok(file)
}

/// Replaces the contents of an existing file by writing a sibling temporary
/// file and renaming it over `path`. The file keeps its permissions.
pub fn replace_atomically(path: &Path, contents: &[u8]) -> Result<(), ReplaceError> {
    let permissions = fs::metadata(path)
        .context(TargetSnafu {
            path: path.to_path_buf(),
        })?
        .permissions();
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let write_context = |_: &mut std::io::Error| TempWriteSnafu {
        path: path.to_path_buf(),
    };
    let mut temp_file = NamedTempFile::new_in(dir).with_context(write_context)?;
    temp_file.write_all(contents).with_context(write_context)?;
    temp_file.flush().with_context(write_context)?;
    fs::set_permissions(temp_file.path(), permissions).with_context(write_context)?;

    temp_file
        .persist(path)
        .map_err(|err| err.error)
        .context(PersistSnafu {
            path: path.to_path_buf(),
        })?;
    debug!(path = %path.display(), bytes = contents.len(), "Replaced file atomically");
    Ok(())
}

#[derive(Debug, Snafu)]
pub enum ReplaceError {
    #[snafu(display("Failed to remove {}", path.best_effort_path_display()))]
    RemoveError {
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display(
        "Removed {} but failed to create it again, its content is lost",
        path.best_effort_path_display()
    ))]
    CreateError {
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("Cannot replace {}", path.best_effort_path_display()))]
    TargetError {
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display(
        "Failed to write replacement content for {}",
        path.best_effort_path_display()
    ))]
    TempWriteError {
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display(
        "Failed to move replacement content over {}",
        path.best_effort_path_display()
    ))]
    PersistError {
        path: PathBuf,
        source: std::io::Error,
    },
}
