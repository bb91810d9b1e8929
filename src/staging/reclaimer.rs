use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use snafu::{ResultExt, Snafu};
use tracing::{debug, info};

use crate::ext::BestEffortPathExt;

/// Deletes a staged tree and everything below it.
///
/// A path that no longer exists counts as already reclaimed. Staged copies
/// of read-only directories are made writable again when a first removal
/// attempt is denied. A failure part way through leaves whatever could not
/// be removed in place.
pub fn reclaim_tree(path: &Path) -> Result<(), ReclaimError> {
    let metadata = match fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "Nothing to reclaim");
            return Ok(());
        }
        Err(err) => {
            return Err(err).context(RemoveSnafu {
                path: path.to_path_buf(),
            });
        }
    };

    let removal = if metadata.is_dir() {
        match fs::remove_dir_all(path) {
            Err(err) if err.kind() == io::ErrorKind::PermissionDenied => {
                debug!(path = %path.display(), "Unlocking read-only directories");
                unlock_dirs(path).context(UnlockSnafu {
                    path: path.to_path_buf(),
                })?;
                fs::remove_dir_all(path)
            }
            other => other,
        }
    } else {
        fs::remove_file(path)
    };

    match removal {
        Ok(()) => {
            info!(path = %path.display(), "Reclaimed staged tree");
            Ok(())
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).context(RemoveSnafu {
            path: path.to_path_buf(),
        }),
    }
}

/// Grants the owner full access to `dir` and every directory below it.
/// Symlinks are not followed.
fn unlock_dirs(dir: &Path) -> io::Result<()> {
    let mut permissions = fs::symlink_metadata(dir)?.permissions();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        let mode = permissions.mode();
        if mode & 0o700 != 0o700 {
            permissions.set_mode(mode | 0o700);
            fs::set_permissions(dir, permissions)?;
        }
    }
    #[cfg(not(unix))]
    {
        if permissions.readonly() {
            permissions.set_readonly(false);
            fs::set_permissions(dir, permissions)?;
        }
    }

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            unlock_dirs(&entry.path())?;
        }
    }
    Ok(())
}

#[derive(Debug, Snafu)]
pub enum ReclaimError {
    #[snafu(display("Failed to remove {}", path.best_effort_path_display()))]
    RemoveError {
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display(
        "Failed to make {} writable for removal",
        path.best_effort_path_display()
    ))]
    UnlockError {
        path: PathBuf,
        source: std::io::Error,
    },
}
