//! Runs the external test command against a staged tree.

mod test_command;

pub use test_command::{RunError, TestCommand};
