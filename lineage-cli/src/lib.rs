//! Command-line interface answering lineage questions from OSM history
//! extracts.
//!
//! Every subcommand loads a full-history PBF extract, wraps it in a cached
//! repository and prints the outcome of one analysis as pretty JSON.
#![forbid(unsafe_code)]

use std::io::Write;

use clap::{Parser, Subcommand};

mod analyse;
mod error;
mod logging;

use analyse::{BlameArgs, DiffArgs, SegmentsArgs, run_command};
pub use error::CliError;
pub use logging::{LOG_LEVEL_ENV, init_logging};

const ARG_HISTORY: &str = "history";
const ARG_CHANGESET: &str = "changeset";
const ARG_RELATION: &str = "relation";
const ARG_CACHE_DB: &str = "cache-db";
const ARG_CACHE_MAX_ENTRIES: &str = "cache-max-entries";
const ENV_DIFF_HISTORY: &str = "LINEAGE_CMDS_DIFF_HISTORY";
const ENV_DIFF_CHANGESET: &str = "LINEAGE_CMDS_DIFF_CHANGESET";
const ENV_SEGMENTS_HISTORY: &str = "LINEAGE_CMDS_SEGMENTS_HISTORY";
const ENV_SEGMENTS_RELATION: &str = "LINEAGE_CMDS_SEGMENTS_RELATION";
const ENV_BLAME_HISTORY: &str = "LINEAGE_CMDS_BLAME_HISTORY";
const ENV_BLAME_RELATION: &str = "LINEAGE_CMDS_BLAME_RELATION";

/// Run the CLI with the current process arguments and environment, writing
/// the report to standard output.
///
/// # Errors
/// Returns [`CliError`] when arguments are invalid, the extract cannot be
/// loaded, or the analysis fails. A failed analysis is still printed before
/// the error is returned.
pub fn run() -> Result<(), CliError> {
    let cli = Cli::try_parse().map_err(CliError::ArgumentParsing)?;
    let mut stdout = std::io::stdout().lock();
    run_with(cli, &mut stdout)
}

fn run_with(cli: Cli, writer: &mut dyn Write) -> Result<(), CliError> {
    let config = match cli.command {
        Command::Diff(args) => args.into_config()?,
        Command::Segments(args) => args.into_config()?,
        Command::Blame(args) => args.into_config()?,
    };
    run_command(&config, writer)
}

#[derive(Debug, Parser)]
#[command(
    name = "lineage",
    about = "Trace the edit lineage of OpenStreetMap geometry",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Report the segments a changeset removed and created.
    Diff(DiffArgs),
    /// Assemble a relation's member ways into ordered polylines.
    Segments(SegmentsArgs),
    /// Attribute every current segment of a relation to a changeset.
    Blame(BlameArgs),
}

#[cfg(test)]
mod tests;
