use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::application::data::LogLevel;

#[derive(Parser, Debug, Clone)]
#[command(version, about = "Stage isolated copies of source trees for mutation testing")]
pub struct Cli {
    #[clap(long, short, default_value = "warn", value_enum, global = true)]
    pub log_level: LogLevel,

    /// Directory holding mutstage.yaml
    #[clap(long, short, default_value = ".", global = true)]
    pub root: PathBuf,

    /// Prefix for staged names, overriding the config file
    #[clap(long, short, global = true)]
    pub prefix: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// List the mutation targets directly inside a directory
    Find { dir: PathBuf },
    /// Copy a directory next to itself under a prefixed name
    Stage { dir: PathBuf },
    /// Delete a staged directory
    Reclaim { dir: PathBuf },
    /// Check that a staged directory matches its source byte for byte
    Verify { source: PathBuf, staged: PathBuf },
    /// Overwrite a file with the content of another file
    Replace {
        target: PathBuf,
        content: PathBuf,
        /// Write through a temporary file and rename it into place
        #[clap(long)]
        atomic: bool,
    },
    /// Stage a directory, run a command inside the copy, then reclaim it
    Run {
        dir: PathBuf,
        /// Leave the staged copy in place afterwards
        #[clap(long)]
        keep: bool,
        /// Join the command words into one line and run it through the shell
        #[clap(long)]
        shell: bool,
        #[clap(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
}
