use std::fs::{self, File, Metadata, OpenOptions, Permissions};
use std::io;
use std::path::{Path, PathBuf};

use snafu::{ResultExt, Snafu};
use tracing::{debug, error, info, warn};

use crate::ext::{BestEffortPathExt, prefixed_name};
use crate::staging::staged_path::{StagedPathError, compute_staged_path};

/// Deepest directory nesting copied below the staged root by default
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// Copies a source tree next to itself, prefixing the root and every entry
/// name below it.
///
/// The copy never writes over an existing path: the staged root, every
/// directory and every file are created fresh, so staging the same tree
/// twice fails instead of silently refreshing the first copy. Nothing is
/// rolled back on failure; hand the staged root to
/// [`reclaim_tree`](crate::staging::reclaim_tree) to clean up.
#[derive(Debug, Clone)]
pub struct TreeCopier {
    prefix: String,
    max_depth: usize,
}

impl TreeCopier {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Stages `source` and returns the root of the staged copy.
    pub fn stage_tree(&self, source: &Path) -> Result<PathBuf, StageError> {
        let staged_root = compute_staged_path(&self.prefix, source).context(PathSnafu)?;
        let normalized_source = compute_staged_path("", source).context(PathSnafu)?;
        if staged_root == normalized_source {
            error!(path = %source.display(), "Staged root would overwrite its source");
            return Err(StageError::CollisionError { path: staged_root });
        }

        let metadata = fs::metadata(source).context(SourceUnavailableSnafu {
            path: source.to_path_buf(),
        })?;
        if !metadata.is_dir() {
            return Err(StageError::NotADirectoryError {
                path: source.to_path_buf(),
            });
        }

        if let Some(parent) = staged_root.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).context(CreateDirSnafu {
                path: parent.to_path_buf(),
            })?;
        }
        create_fresh_dir(&staged_root)?;

        info!(
            source = %source.display(),
            staged = %staged_root.display(),
            "Staging source tree"
        );

        let mut ancestors = Vec::new();
        self.copy_dir_contents(source, &staged_root, &metadata, 0, &mut ancestors)?;

        Ok(staged_root)
    }

    fn copy_dir_contents(
        &self,
        source: &Path,
        dest: &Path,
        source_metadata: &Metadata,
        depth: usize,
        ancestors: &mut Vec<PathBuf>,
    ) -> Result<(), StageError> {
        if depth > self.max_depth {
            return Err(StageError::DepthLimitError {
                path: source.to_path_buf(),
                max_depth: self.max_depth,
            });
        }

        let canonical = fs::canonicalize(source).context(SourceUnavailableSnafu {
            path: source.to_path_buf(),
        })?;
        if ancestors.contains(&canonical) {
            return Err(StageError::SymlinkCycleError {
                path: source.to_path_buf(),
            });
        }
        ancestors.push(canonical);

        let entries = fs::read_dir(source).context(ReadDirSnafu {
            path: source.to_path_buf(),
        })?;
        for entry in entries {
            let entry = entry.context(ReadDirSnafu {
                path: source.to_path_buf(),
            })?;
            let name = entry.file_name();
            let entry_source = source.join(&name);
            let entry_dest = dest.join(prefixed_name(&self.prefix, &name));

            if entry_source == entry_dest {
                error!(path = %entry_source.display(), "Staged entry would overwrite its source");
                return Err(StageError::CollisionError { path: entry_source });
            }

            self.copy_entry(&entry_source, &entry_dest, depth, ancestors)?;
        }

        ancestors.pop();
        // Applied last so read-only source directories can still be filled.
        propagate_permissions(dest, source_metadata.permissions());
        Ok(())
    }

    fn copy_entry(
        &self,
        source: &Path,
        dest: &Path,
        depth: usize,
        ancestors: &mut Vec<PathBuf>,
    ) -> Result<(), StageError> {
        let metadata = fs::metadata(source)
            .context(SourceUnavailableSnafu {
                path: source.to_path_buf(),
            })
            .inspect_err(|err| {
                error!(
                    src = %source.display(),
                    dest = %dest.display(),
                    error = %err,
                    "Failed to inspect entry"
                );
            })?;

        if metadata.is_dir() {
            create_fresh_dir(dest)?;
            self.copy_dir_contents(source, dest, &metadata, depth + 1, ancestors)
        } else if metadata.is_file() {
            copy_file(source, dest, &metadata).inspect_err(|err| {
                error!(
                    src = %source.display(),
                    dest = %dest.display(),
                    error = %err,
                    "Failed to copy file"
                );
            })
        } else {
            warn!(path = %source.display(), "Skipping entry that is neither a file nor a directory");
            Ok(())
        }
    }
}

/// Stages `source` with the default depth limit.
pub fn stage_tree(prefix: &str, source: &Path) -> Result<PathBuf, StageError> {
    TreeCopier::new(prefix).stage_tree(source)
}

fn create_fresh_dir(path: &Path) -> Result<(), StageError> {
    match fs::create_dir(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
            error!(path = %path.display(), "Staging destination already exists");
            Err(StageError::DestinationExistsError {
                path: path.to_path_buf(),
            })
        }
        Err(err) => Err(err).context(CreateDirSnafu {
            path: path.to_path_buf(),
        }),
    }
}

fn copy_file(source: &Path, dest: &Path, metadata: &Metadata) -> Result<(), StageError> {
    let mut reader = File::open(source).context(CopyFileSnafu {
        from: source.to_path_buf(),
        to: dest.to_path_buf(),
    })?;

    let mut writer = match OpenOptions::new().write(true).create_new(true).open(dest) {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
            return Err(StageError::DestinationExistsError {
                path: dest.to_path_buf(),
            });
        }
        Err(err) => {
            return Err(err).context(CopyFileSnafu {
                from: source.to_path_buf(),
                to: dest.to_path_buf(),
            });
        }
    };

    let bytes = io::copy(&mut reader, &mut writer).context(CopyFileSnafu {
        from: source.to_path_buf(),
        to: dest.to_path_buf(),
    })?;
    debug!(src = %source.display(), dest = %dest.display(), bytes, "Copied file");

    propagate_permissions(dest, metadata.permissions());
    Ok(())
}

fn propagate_permissions(path: &Path, permissions: Permissions) {
    if let Err(err) = fs::set_permissions(path, permissions) {
        warn!(
            path = %path.display(),
            error = %err,
            "Failed to propagate permissions, keeping defaults"
        );
    }
}

#[derive(Debug, Snafu)]
pub enum StageError {
    #[snafu(display("Failed to compute the staged path"))]
    PathError { source: StagedPathError },
    #[snafu(display("Source {} is missing or inaccessible", path.best_effort_path_display()))]
    SourceUnavailableError {
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("Source {} is not a directory", path.best_effort_path_display()))]
    NotADirectoryError { path: PathBuf },
    #[snafu(display(
        "Staged path would be identical to its source: {}",
        path.best_effort_path_display()
    ))]
    CollisionError { path: PathBuf },
    #[snafu(display("Staging destination {} already exists", path.best_effort_path_display()))]
    DestinationExistsError { path: PathBuf },
    #[snafu(display("Failed to create directory {}", path.best_effort_path_display()))]
    CreateDirError {
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("Failed to list directory {}", path.best_effort_path_display()))]
    ReadDirError {
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display(
        "Failed to copy {} to {}",
        from.best_effort_path_display(),
        to.best_effort_path_display()
    ))]
    CopyFileError {
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display(
        "Directory {} links back to one of its ancestors",
        path.best_effort_path_display()
    ))]
    SymlinkCycleError { path: PathBuf },
    #[snafu(display(
        "Directory {} is nested deeper than {} levels",
        path.best_effort_path_display(),
        max_depth
    ))]
    DepthLimitError { path: PathBuf, max_depth: usize },
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::*;
    use tempfile::TempDir;

    fn project_with_sources() -> (TempDir, PathBuf) {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let src = temp_dir.path().join("proj").join("src");
        fs::create_dir_all(&src).expect("Failed to create source tree");
        fs::write(src.join("a.go"), "package src\n\nfunc A() int { return 1 }\n").unwrap();
        fs::write(src.join("b.go"), "package src\n\nfunc B() int { return 2 }\n").unwrap();
        fs::write(src.join("a_test.go"), "package src\n").unwrap();
        (temp_dir, src)
    }

    fn names_in(dir: &Path) -> Vec<String> {
        let mut names = fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().to_string())
            .collect::<Vec<_>>();
        names.sort();
        names
    }

    #[test]
    fn stages_sibling_with_prefixed_names() {
        let (temp_dir, src) = project_with_sources();

        let staged = stage_tree("mut_", &src).unwrap();

        assert_eq!(staged, temp_dir.path().join("proj").join("mut_src"));
        assert_eq!(
            names_in(&staged),
            vec!["mut_a.go", "mut_a_test.go", "mut_b.go"]
        );
        for name in ["a.go", "b.go", "a_test.go"] {
            assert_eq!(
                fs::read(src.join(name)).unwrap(),
                fs::read(staged.join(format!("mut_{name}"))).unwrap()
            );
        }
        assert_eq!(names_in(&src), vec!["a.go", "a_test.go", "b.go"]);
    }

    #[test]
    fn prefix_applies_at_every_level() {
        let (_temp_dir, src) = project_with_sources();
        let nested = src.join("internal").join("util");
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join("x.go"), "package util\n").unwrap();

        let staged = stage_tree("m_", &src).unwrap();

        let staged_file = staged.join("m_internal").join("m_util").join("m_x.go");
        assert_eq!(fs::read_to_string(staged_file).unwrap(), "package util\n");
    }

    #[test]
    fn copies_empty_directories() {
        let (_temp_dir, src) = project_with_sources();
        fs::create_dir(src.join("empty")).unwrap();

        let staged = stage_tree("mut_", &src).unwrap();

        assert!(staged.join("mut_empty").is_dir());
        assert!(names_in(&staged.join("mut_empty")).is_empty());
    }

    #[rstest]
    #[case(vec![0u8; 0])]
    #[case(b"plain text\n".to_vec())]
    #[case((0..=255u8).cycle().take(256 * 1024).collect::<Vec<_>>())]
    fn content_is_copied_byte_for_byte(#[case] content: Vec<u8>) {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let src = temp_dir.path().join("src");
        fs::create_dir(&src).unwrap();
        fs::write(src.join("blob.bin"), &content).unwrap();

        let staged = stage_tree("mut_", &src).unwrap();

        assert_eq!(fs::read(staged.join("mut_blob.bin")).unwrap(), content);
    }

    #[test]
    fn empty_prefix_is_a_collision_and_writes_nothing() {
        let (_temp_dir, src) = project_with_sources();
        let before = names_in(&src);

        let result = stage_tree("", &src);

        match result {
            Err(StageError::CollisionError { path }) => assert_eq!(path, src),
            other => panic!("Expected CollisionError, got {other:?}"),
        }
        assert_eq!(names_in(&src), before);
    }

    #[test]
    fn staging_twice_fails_on_existing_destination() {
        let (_temp_dir, src) = project_with_sources();
        let staged = stage_tree("mut_", &src).unwrap();

        let result = stage_tree("mut_", &src);

        match result {
            Err(StageError::DestinationExistsError { path }) => assert_eq!(path, staged),
            other => panic!("Expected DestinationExistsError, got {other:?}"),
        }
    }

    #[test]
    fn missing_source_is_reported() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let missing = temp_dir.path().join("nope");

        let result = stage_tree("mut_", &missing);

        assert!(matches!(
            result,
            Err(StageError::SourceUnavailableError { .. })
        ));
        assert!(!temp_dir.path().join("mut_nope").exists());
    }

    #[test]
    fn file_source_is_rejected() {
        let (_temp_dir, src) = project_with_sources();

        let result = stage_tree("mut_", &src.join("a.go"));

        assert!(matches!(result, Err(StageError::NotADirectoryError { .. })));
    }

    #[test]
    fn degenerate_source_path_is_rejected() {
        let result = stage_tree("mut_", Path::new("/"));
        assert!(matches!(result, Err(StageError::PathError { .. })));
    }

    #[test]
    fn depth_limit_stops_deep_trees() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let src = temp_dir.path().join("src");
        fs::create_dir_all(src.join("a").join("b").join("c")).unwrap();

        let result = TreeCopier::new("mut_").with_max_depth(1).stage_tree(&src);

        match result {
            Err(StageError::DepthLimitError { max_depth, .. }) => assert_eq!(max_depth, 1),
            other => panic!("Expected DepthLimitError, got {other:?}"),
        }
    }

    #[test]
    fn depth_limit_allows_trees_within_bounds() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let src = temp_dir.path().join("src");
        fs::create_dir_all(src.join("a").join("b")).unwrap();

        let staged = TreeCopier::new("mut_").with_max_depth(2).stage_tree(&src);

        assert!(staged.unwrap().join("mut_a").join("mut_b").is_dir());
    }

    #[cfg(unix)]
    #[test]
    fn symlink_cycle_is_detected() {
        use std::os::unix::fs::symlink;

        let (_temp_dir, src) = project_with_sources();
        symlink(&src, src.join("loop")).unwrap();

        let result = stage_tree("mut_", &src);

        assert!(matches!(result, Err(StageError::SymlinkCycleError { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn dangling_symlink_aborts_staging() {
        use std::os::unix::fs::symlink;

        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let src = temp_dir.path().join("src");
        fs::create_dir(&src).unwrap();
        symlink(src.join("gone.go"), src.join("link.go")).unwrap();

        let result = stage_tree("mut_", &src);

        match result {
            Err(StageError::SourceUnavailableError { path, source }) => {
                assert_eq!(path, src.join("link.go"));
                assert_eq!(source.kind(), io::ErrorKind::NotFound);
            }
            other => panic!("Expected SourceUnavailableError, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn fifo_is_skipped() {
        use std::process::Command;

        let (_temp_dir, src) = project_with_sources();
        let status = Command::new("mkfifo")
            .arg(src.join("pipe"))
            .status()
            .expect("Failed to run mkfifo");
        assert!(status.success());

        let staged = stage_tree("mut_", &src).unwrap();

        assert_eq!(
            names_in(&staged),
            vec!["mut_a.go", "mut_a_test.go", "mut_b.go"]
        );
    }

    #[cfg(unix)]
    #[rstest]
    #[case(0o755)]
    #[case(0o640)]
    #[case(0o444)]
    fn file_permissions_are_propagated(#[case] mode: u32) {
        use std::os::unix::fs::PermissionsExt;

        let (_temp_dir, src) = project_with_sources();
        fs::set_permissions(src.join("a.go"), Permissions::from_mode(mode)).unwrap();

        let staged = stage_tree("mut_", &src).unwrap();

        let staged_mode = fs::metadata(staged.join("mut_a.go"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(staged_mode & 0o777, mode);
    }

    #[cfg(unix)]
    #[test]
    fn read_only_directories_are_filled_before_locking() {
        use std::os::unix::fs::PermissionsExt;

        let (_temp_dir, src) = project_with_sources();
        let locked = src.join("locked");
        fs::create_dir(&locked).unwrap();
        fs::write(locked.join("c.go"), "package locked\n").unwrap();
        fs::set_permissions(&locked, Permissions::from_mode(0o555)).unwrap();

        let staged = stage_tree("mut_", &src).unwrap();
        let staged_locked = staged.join("mut_locked");

        let staged_mode = fs::metadata(&staged_locked).unwrap().permissions().mode();
        let content = fs::read_to_string(staged_locked.join("mut_c.go")).unwrap();
        let reclaimed = crate::staging::reclaim_tree(&staged);

        fs::set_permissions(&locked, Permissions::from_mode(0o755)).unwrap();

        assert_eq!(staged_mode & 0o777, 0o555);
        assert!(reclaimed.is_ok(), "{reclaimed:?}");
        assert!(!staged.exists());
        assert_eq!(content, "package locked\n");
    }
}
