use std::path::PathBuf;

use crate::cli::{Cli, Command};

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub root: PathBuf,
    pub prefix: Option<String>,
    pub command: Command,
}

impl From<Cli> for RuntimeConfig {
    fn from(cli: Cli) -> Self {
        Self {
            root: cli.root,
            prefix: cli.prefix,
            command: cli.command,
        }
    }
}
