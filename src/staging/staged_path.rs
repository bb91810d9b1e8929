use std::path::{Component, Path, PathBuf};

use snafu::Snafu;

use crate::ext::{BestEffortPathExt, prefixed_name};

/// Computes where the staged copy of `source` lives: the same parent
/// directory, with `prefix` prepended to the final segment.
///
/// Empty and `.` segments are dropped, so `src/`, `./src` and `src//`
/// all stage to `mut_src`. The final segment has to be a real name;
/// inputs such as `""`, `/` or `foo/..` are rejected.
pub fn compute_staged_path(prefix: &str, source: &Path) -> Result<PathBuf, StagedPathError> {
    let mut components = source
        .components()
        .filter(|component| !matches!(component, Component::CurDir))
        .collect::<Vec<_>>();

    let leaf = match components.pop() {
        Some(Component::Normal(leaf)) => leaf,
        _ => {
            return Err(StagedPathError::NoLeafSegment {
                path: source.to_path_buf(),
            });
        }
    };

    let mut staged = components.iter().collect::<PathBuf>();
    staged.push(prefixed_name(prefix, leaf));
    Ok(staged)
}

#[derive(Debug, Snafu)]
pub enum StagedPathError {
    #[snafu(display(
        "Path '{}' has no final directory name to prefix",
        path.best_effort_path_display()
    ))]
    NoLeafSegment { path: PathBuf },
}
