use std::io::Write;
use std::path::{Path, PathBuf};

use mutstage::config::{StagingConfig, StagingConfigError};
use mutstage::runner::{RunError, TestCommand};
use mutstage::staging::{
    ClassifyError, ReclaimError, ReplaceError, StageError, StagedPathError, VerifyError,
    compute_staged_path, reclaim_tree, reopen_empty, replace_atomically, verify_staged_tree,
};
use snafu::prelude::*;
use tracing::{debug, info, warn};

use crate::application::RuntimeConfig;
use crate::cli::Command;

pub struct Application;

impl Application {
    pub async fn run(app_config: impl Into<RuntimeConfig>) -> Result<(), ApplicationError> {
        let app_config: RuntimeConfig = app_config.into();
        let config = StagingConfig::read(&app_config.root)
            .await
            .and_then(|config| config.with_prefix_override(app_config.prefix.clone()))
            .context(ConfigSnafu)?;
        debug!("Loaded config: {:?}", config);

        match app_config.command {
            Command::Find { dir } => {
                let files = config
                    .classifier()
                    .find_eligible_files(&dir)
                    .context(ClassifySnafu)?;
                for file in files {
                    println!("{}", file.display());
                }
            }
            Command::Stage { dir } => {
                let staged = config.tree_copier().stage_tree(&dir).context(StageSnafu)?;
                println!("{}", staged.display());
            }
            Command::Reclaim { dir } => {
                reclaim_tree(&dir).context(ReclaimSnafu)?;
            }
            Command::Verify { source, staged } => {
                let report =
                    verify_staged_tree(&config.prefix, &source, &staged, config.max_depth)
                        .context(VerifySnafu)?;
                info!("Checked {} files", report.checked);
                ensure!(
                    report.is_faithful(),
                    UnfaithfulStagingSnafu {
                        missing: report.missing.len(),
                        mismatched: report.mismatched.len(),
                    }
                );
            }
            Command::Replace {
                target,
                content,
                atomic,
            } => {
                Self::replace(&target, &content, atomic).await?;
            }
            Command::Run {
                dir,
                keep,
                shell,
                command,
            } => {
                let command = if shell {
                    TestCommand::shell("test", command.join(" "))
                } else {
                    TestCommand::from_argv("test", command).context(EmptyCommandSnafu)?
                };
                Self::run_cycle(&config, &dir, &command, keep).await?;
            }
        }

        Ok(())
    }

    /// Writes the bytes of `content` over `target`, the way a mutation
    /// engine rewrites a staged file.
    async fn replace(target: &Path, content: &Path, atomic: bool) -> Result<(), ApplicationError> {
        let bytes = compio::fs::read(content).await.context(ReadContentSnafu {
            path: content.to_path_buf(),
        })?;

        if atomic {
            replace_atomically(target, &bytes).context(ReplaceSnafu)?;
        } else {
            let mut file = reopen_empty(target).context(ReplaceSnafu)?;
            file.write_all(&bytes).context(WriteSnafu {
                path: target.to_path_buf(),
            })?;
        }

        info!("Replaced {} with {} bytes", target.display(), bytes.len());
        Ok(())
    }

    /// Stages `dir`, runs `command` inside the staged copy and reclaims the
    /// copy afterwards, also when the command fails.
    ///
    /// A staging failure only triggers cleanup when the staged root did not
    /// exist before, so a colliding directory that someone else owns is
    /// never deleted.
    async fn run_cycle(
        config: &StagingConfig,
        dir: &Path,
        command: &TestCommand,
        keep: bool,
    ) -> Result<PathBuf, ApplicationError> {
        let staged_root = compute_staged_path(&config.prefix, dir).context(StagedPathSnafu)?;
        let pre_existing = staged_root.exists();

        let staged = match config.tree_copier().stage_tree(dir) {
            Ok(staged) => staged,
            Err(err) => {
                if !pre_existing && staged_root.exists() {
                    warn!("Removing partially staged tree {}", staged_root.display());
                    if let Err(reclaim_err) = reclaim_tree(&staged_root) {
                        warn!("Failed to remove partial tree: {}", reclaim_err);
                    }
                }
                return Err(err).context(StageSnafu);
            }
        };

        let outcome = Self::exercise(config, &staged, command).await;

        if keep {
            info!("Keeping staged tree at {}", staged.display());
        } else {
            reclaim_tree(&staged).context(ReclaimSnafu)?;
        }

        outcome.map(|()| staged)
    }

    async fn exercise(
        config: &StagingConfig,
        staged: &Path,
        command: &TestCommand,
    ) -> Result<(), ApplicationError> {
        let targets = config
            .classifier()
            .find_eligible_files(staged)
            .context(ClassifySnafu)?;
        info!(
            "Running '{}' against {} with {} mutation targets",
            command.command(),
            staged.display(),
            targets.len()
        );

        command.run(staged).await.context(TestRunSnafu)
    }
}

#[derive(Debug, Snafu)]
pub enum ApplicationError {
    #[snafu(display("Critical failure encountered during configuration stage"))]
    ConfigError { source: StagingConfigError },
    #[snafu(display("Failed to find mutation targets"))]
    ClassifyError { source: ClassifyError },
    #[snafu(display("Failed to determine the staged path"))]
    StagedPathError { source: StagedPathError },
    #[snafu(display("Failed to stage the source tree"))]
    StageError { source: StageError },
    #[snafu(display("Failed to reclaim the staged tree"))]
    ReclaimError { source: ReclaimError },
    #[snafu(display("Failed to verify the staged tree"))]
    VerifyError { source: VerifyError },
    #[snafu(display(
        "Staged tree differs from its source: {} missing, {} mismatched",
        missing,
        mismatched
    ))]
    UnfaithfulStaging { missing: usize, mismatched: usize },
    #[snafu(display("Failed to read replacement content from {}", path.display()))]
    ReadContentError {
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("Failed to replace the target file"))]
    ReplaceError { source: ReplaceError },
    #[snafu(display("Failed to write {}", path.display()))]
    WriteError {
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("No test command given"))]
    EmptyCommand,
    #[snafu(display("Test command did not pass against the staged tree"))]
    TestRunError { source: RunError },
}
