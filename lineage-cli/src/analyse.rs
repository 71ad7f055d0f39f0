//! Argument resolution and execution for the analysis subcommands.

use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;
use lineage_analysis::{AnalysisOutcome, AnalysisReport, AnalysisRequest, run_request};
use lineage_core::{CacheConfig, CacheSet, ChangesetId, OsmSource, RelationId, Repository};
use lineage_data::load_history_pbf;
use ortho_config::{OrthoConfig, SubcmdConfigMerge};
use serde::{Deserialize, Serialize};

use crate::{
    ARG_CACHE_DB, ARG_CACHE_MAX_ENTRIES, ARG_CHANGESET, ARG_HISTORY, ARG_RELATION, CliError,
    ENV_BLAME_HISTORY, ENV_BLAME_RELATION, ENV_DIFF_CHANGESET, ENV_DIFF_HISTORY,
    ENV_SEGMENTS_HISTORY, ENV_SEGMENTS_RELATION,
};

/// CLI arguments for the `diff` subcommand.
#[derive(Debug, Clone, Parser, Deserialize, Serialize, OrthoConfig, Default)]
#[command(
    name = "diff",
    about = "Report the segments a changeset removed and created"
)]
#[ortho_config(prefix = "LINEAGE")]
pub(crate) struct DiffArgs {
    /// Path to the full-history PBF extract.
    #[arg(long = ARG_HISTORY, value_name = "path")]
    #[serde(default)]
    pub(crate) history: Option<Utf8PathBuf>,
    /// Changeset to diff.
    #[arg(long = ARG_CHANGESET, value_name = "id")]
    #[serde(default)]
    pub(crate) changeset: Option<i64>,
    /// SQLite database backing the durable cache tier.
    #[arg(long = ARG_CACHE_DB, value_name = "path")]
    #[serde(default)]
    pub(crate) cache_db: Option<Utf8PathBuf>,
    /// Elements held per kind by the in-memory cache tier.
    #[arg(long = ARG_CACHE_MAX_ENTRIES, value_name = "count")]
    #[serde(default)]
    pub(crate) cache_max_entries: Option<usize>,
}

/// CLI arguments for the `segments` subcommand.
#[derive(Debug, Clone, Parser, Deserialize, Serialize, OrthoConfig, Default)]
#[command(
    name = "segments",
    about = "Assemble a relation's member ways into ordered polylines"
)]
#[ortho_config(prefix = "LINEAGE")]
pub(crate) struct SegmentsArgs {
    /// Path to the full-history PBF extract.
    #[arg(long = ARG_HISTORY, value_name = "path")]
    #[serde(default)]
    pub(crate) history: Option<Utf8PathBuf>,
    /// Relation to segment.
    #[arg(long = ARG_RELATION, value_name = "id")]
    #[serde(default)]
    pub(crate) relation: Option<i64>,
    /// SQLite database backing the durable cache tier.
    #[arg(long = ARG_CACHE_DB, value_name = "path")]
    #[serde(default)]
    pub(crate) cache_db: Option<Utf8PathBuf>,
    /// Elements held per kind by the in-memory cache tier.
    #[arg(long = ARG_CACHE_MAX_ENTRIES, value_name = "count")]
    #[serde(default)]
    pub(crate) cache_max_entries: Option<usize>,
}

/// CLI arguments for the `blame` subcommand.
#[derive(Debug, Clone, Parser, Deserialize, Serialize, OrthoConfig, Default)]
#[command(
    name = "blame",
    long_about = "Walk a relation's history backwards and attribute every \
                 current segment to the changeset that produced it.",
    about = "Attribute every current segment of a relation to a changeset"
)]
#[ortho_config(prefix = "LINEAGE")]
pub(crate) struct BlameArgs {
    /// Path to the full-history PBF extract.
    #[arg(long = ARG_HISTORY, value_name = "path")]
    #[serde(default)]
    pub(crate) history: Option<Utf8PathBuf>,
    /// Relation to blame.
    #[arg(long = ARG_RELATION, value_name = "id")]
    #[serde(default)]
    pub(crate) relation: Option<i64>,
    /// SQLite database backing the durable cache tier.
    #[arg(long = ARG_CACHE_DB, value_name = "path")]
    #[serde(default)]
    pub(crate) cache_db: Option<Utf8PathBuf>,
    /// Elements held per kind by the in-memory cache tier.
    #[arg(long = ARG_CACHE_MAX_ENTRIES, value_name = "count")]
    #[serde(default)]
    pub(crate) cache_max_entries: Option<usize>,
}

impl DiffArgs {
    pub(crate) fn into_config(self) -> Result<CommandConfig, CliError> {
        let merged = self.load_and_merge().map_err(CliError::Configuration)?;
        CommandConfig::try_from(merged)
    }
}

impl SegmentsArgs {
    pub(crate) fn into_config(self) -> Result<CommandConfig, CliError> {
        let merged = self.load_and_merge().map_err(CliError::Configuration)?;
        CommandConfig::try_from(merged)
    }
}

impl BlameArgs {
    pub(crate) fn into_config(self) -> Result<CommandConfig, CliError> {
        let merged = self.load_and_merge().map_err(CliError::Configuration)?;
        CommandConfig::try_from(merged)
    }
}

/// Resolved configuration shared by every analysis subcommand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CommandConfig {
    /// Full-history extract to load.
    pub(crate) history: Utf8PathBuf,
    /// Analysis to run.
    pub(crate) request: AnalysisRequest,
    /// Durable cache database, when requested.
    pub(crate) cache_db: Option<Utf8PathBuf>,
    /// Cache bounds.
    pub(crate) cache: CacheConfig,
}

fn cache_config(max_entries: Option<usize>) -> CacheConfig {
    let defaults = CacheConfig::default();
    CacheConfig {
        max_entries: max_entries.unwrap_or(defaults.max_entries),
        ..defaults
    }
}

fn required<T>(value: Option<T>, field: &'static str, env: &'static str) -> Result<T, CliError> {
    value.ok_or(CliError::MissingArgument { field, env })
}

impl TryFrom<DiffArgs> for CommandConfig {
    type Error = CliError;

    fn try_from(args: DiffArgs) -> Result<Self, Self::Error> {
        let history = required(args.history, ARG_HISTORY, ENV_DIFF_HISTORY)?;
        let changeset = required(args.changeset, ARG_CHANGESET, ENV_DIFF_CHANGESET)?;
        Ok(Self {
            history,
            request: AnalysisRequest::Diff(ChangesetId::new(changeset)),
            cache_db: args.cache_db,
            cache: cache_config(args.cache_max_entries),
        })
    }
}

impl TryFrom<SegmentsArgs> for CommandConfig {
    type Error = CliError;

    fn try_from(args: SegmentsArgs) -> Result<Self, Self::Error> {
        let history = required(args.history, ARG_HISTORY, ENV_SEGMENTS_HISTORY)?;
        let relation = required(args.relation, ARG_RELATION, ENV_SEGMENTS_RELATION)?;
        Ok(Self {
            history,
            request: AnalysisRequest::Segments(RelationId::new(relation)),
            cache_db: args.cache_db,
            cache: cache_config(args.cache_max_entries),
        })
    }
}

impl TryFrom<BlameArgs> for CommandConfig {
    type Error = CliError;

    fn try_from(args: BlameArgs) -> Result<Self, Self::Error> {
        let history = required(args.history, ARG_HISTORY, ENV_BLAME_HISTORY)?;
        let relation = required(args.relation, ARG_RELATION, ENV_BLAME_RELATION)?;
        Ok(Self {
            history,
            request: AnalysisRequest::Blame(RelationId::new(relation)),
            cache_db: args.cache_db,
            cache: cache_config(args.cache_max_entries),
        })
    }
}

impl CommandConfig {
    pub(crate) fn validate_sources(&self) -> Result<(), CliError> {
        Self::require_existing(&self.history, ARG_HISTORY)
    }

    fn require_existing(path: &Utf8Path, field: &'static str) -> Result<(), CliError> {
        match lineage_fs::is_regular_file(path) {
            Ok(true) => Ok(()),
            Ok(false) => Err(CliError::MissingSourceFile {
                field,
                path: path.to_path_buf(),
            }),
            Err(source) => Err(CliError::InspectSourcePath {
                field,
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Caches for the repository, backed by SQLite when a database is set.
    pub(crate) fn caches(&self) -> Result<CacheSet, CliError> {
        let Some(path) = self.cache_db.as_deref() else {
            return Ok(CacheSet::new(self.cache));
        };
        open_durable_caches(self.cache, path)
    }
}

#[cfg(feature = "store-sqlite")]
fn open_durable_caches(config: CacheConfig, path: &Utf8Path) -> Result<CacheSet, CliError> {
    let db = lineage_core::SqliteCacheDb::open(path)?;
    log::info!("using durable cache at {path}");
    Ok(CacheSet::with_sqlite(config, &db))
}

#[cfg(not(feature = "store-sqlite"))]
fn open_durable_caches(_config: CacheConfig, _path: &Utf8Path) -> Result<CacheSet, CliError> {
    Err(CliError::MissingFeature {
        feature: "store-sqlite",
        action: "--cache-db",
    })
}

pub(crate) fn run_command(config: &CommandConfig, writer: &mut dyn Write) -> Result<(), CliError> {
    config.validate_sources()?;
    let caches = config.caches()?;
    let snapshot = load_history_pbf(&config.history)?;
    run_against(snapshot, caches, config.request, writer)
}

/// Run `request` over `source` and print its outcome.
pub(crate) fn run_against<S: OsmSource>(
    source: S,
    caches: CacheSet,
    request: AnalysisRequest,
    writer: &mut dyn Write,
) -> Result<(), CliError> {
    let repository = Repository::with_caches(source, caches);
    let outcome = run_request(&repository, request);
    write_outcome(writer, &outcome)?;
    match outcome {
        AnalysisOutcome::Completed(_) => Ok(()),
        AnalysisOutcome::Failed(failure) => Err(CliError::AnalysisFailed {
            analysis: failure.analysis,
            message: failure.message,
        }),
    }
}

fn write_outcome(
    writer: &mut dyn Write,
    outcome: &AnalysisOutcome<AnalysisReport>,
) -> Result<(), CliError> {
    let payload = serde_json::to_string_pretty(outcome).map_err(CliError::SerializeReport)?;
    writer
        .write_all(payload.as_bytes())
        .map_err(CliError::WriteReport)?;
    writer.write_all(b"\n").map_err(CliError::WriteReport)?;
    Ok(())
}

#[cfg(test)]
pub(crate) fn diff_config_from_layers_for_test(
    layers: Vec<ortho_config::MergeLayer<'static>>,
) -> Result<CommandConfig, CliError> {
    let merged = DiffArgs::merge_from_layers(layers).map_err(CliError::from)?;
    CommandConfig::try_from(merged)
}
