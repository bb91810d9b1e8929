//! Staging of isolated source-tree copies for mutation testing.
//!
//! A staged tree sits next to its source, with the source directory name
//! and every entry name below it carrying a prefix (`src/a.go` becomes
//! `mut_src/mut_a.go`). Mutations are written into the staged copy, tests
//! run against it, and the whole copy is reclaimed afterwards.
//!
//! All operations here block the calling thread and take no locks; run one
//! staging cycle per source tree and prefix at a time.

mod classifier;
mod fidelity;
mod reclaimer;
mod replacer;
mod staged_path;
mod tree_copier;

pub use classifier::{ClassifyError, DEFAULT_SOURCE_MARKER, DEFAULT_TEST_MARKER, FileClassifier};
pub use fidelity::{FidelityReport, VerifyError, content_hash, verify_staged_tree};
pub use reclaimer::{ReclaimError, reclaim_tree};
pub use replacer::{ReplaceError, reopen_empty, replace_atomically};
pub use staged_path::{StagedPathError, compute_staged_path};
pub use tree_copier::{DEFAULT_MAX_DEPTH, StageError, TreeCopier, stage_tree};
