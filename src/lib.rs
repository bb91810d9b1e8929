//! Stages isolated, renamed copies of source trees so that a mutation
//! testing engine can rewrite files and run tests without touching the
//! originals.
//!
//! The [`staging`] module holds the filesystem operations, [`config`] the
//! settings read from `mutstage.yaml`, and [`runner`] the execution of the
//! test command against a staged tree.

pub mod config;
mod ext;
pub mod runner;
pub mod staging;
