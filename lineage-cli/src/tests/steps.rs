//! Behaviour-driven step definitions driving the analysis command scenarios.

use super::helpers::moved_node_history;
use super::*;
use crate::analyse::{CommandConfig, run_against};
use lineage_analysis::AnalysisRequest;
use lineage_core::{CacheSet, ChangesetId, RelationId};
use lineage_data::HistorySnapshot;
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use serde_json::Value;
use std::cell::RefCell;

/// Aggregates command scenario state so each step only needs a single world
/// argument.
#[derive(Debug, Default)]
struct CommandWorld {
    cli_args: RefCell<Vec<String>>,
    resolved: RefCell<Option<Result<CommandConfig, CliError>>>,
    history: RefCell<Option<HistorySnapshot>>,
    printed: RefCell<Vec<u8>>,
    run_result: RefCell<Option<Result<(), CliError>>>,
}

impl CommandWorld {
    fn print(&self, request: AnalysisRequest) {
        let history = self
            .history
            .borrow_mut()
            .take()
            .expect("history was built");
        let mut buffer = Vec::new();
        let result = run_against(history, CacheSet::default(), request, &mut buffer);
        *self.printed.borrow_mut() = buffer;
        self.run_result.replace(Some(result));
    }

    fn printed_json(&self) -> Value {
        serde_json::from_slice(&self.printed.borrow()).expect("printed JSON")
    }
}

#[fixture]
fn world() -> CommandWorld {
    CommandWorld::default()
}

#[given("the diff command is invoked with changeset {changeset} only")]
fn diff_without_history(#[from(world)] world: &CommandWorld, changeset: i64) {
    world
        .cli_args
        .borrow_mut()
        .extend([format!("--{ARG_CHANGESET}"), changeset.to_string()]);
}

#[given("a history where changeset {changeset} moves a node of way {way}")]
fn moved_node(#[from(world)] world: &CommandWorld, changeset: i64, way: i64) {
    assert_eq!((changeset, way), (2, 10), "helper history is fixed");
    *world.history.borrow_mut() = Some(moved_node_history());
}

#[when("the command is resolved")]
fn resolve_command(#[from(world)] world: &CommandWorld) {
    let mut invocation = vec!["lineage".to_owned(), "diff".to_owned()];
    invocation.extend(world.cli_args.borrow().iter().cloned());
    let outcome = Cli::try_parse_from(invocation)
        .map_err(CliError::ArgumentParsing)
        .and_then(|cli| match cli.command {
            Command::Diff(args) => CommandConfig::try_from(args),
            other => panic!("unexpected command {other:?}"),
        });
    world.resolved.replace(Some(outcome));
}

#[when("the diff of changeset {changeset} is printed")]
fn print_diff(#[from(world)] world: &CommandWorld, changeset: i64) {
    world.print(AnalysisRequest::Diff(ChangesetId::new(changeset)));
}

#[when("the blame of relation {relation} is printed")]
fn print_blame(#[from(world)] world: &CommandWorld, relation: i64) {
    world.print(AnalysisRequest::Blame(RelationId::new(relation)));
}

#[then("the CLI reports that the \"history\" flag is missing")]
fn reports_missing_history(#[from(world)] world: &CommandWorld) {
    let borrowed = world.resolved.borrow();
    let error = borrowed
        .as_ref()
        .expect("result recorded")
        .as_ref()
        .expect_err("expected error");
    match error {
        CliError::MissingArgument { field, env } => {
            assert_eq!(*field, ARG_HISTORY);
            assert_eq!(*env, ENV_DIFF_HISTORY);
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[then("the printed status is \"{status}\"")]
fn printed_status(#[from(world)] world: &CommandWorld, status: String) {
    assert_eq!(world.printed_json()["status"], status.as_str());
}

#[then("the printed diff removes {removed} segments and creates {created} segments")]
fn printed_diff_counts(#[from(world)] world: &CommandWorld, removed: usize, created: usize) {
    let json = world.printed_json();
    let result = &json["value"]["result"];
    let count = |key: &str| result[key].as_array().map_or(0, Vec::len);
    assert_eq!(count("removed"), removed);
    assert_eq!(count("created"), created);
}

#[then("the command fails")]
fn command_fails(#[from(world)] world: &CommandWorld) {
    let borrowed = world.run_result.borrow();
    let result = borrowed.as_ref().expect("command ran");
    assert!(matches!(result, Err(CliError::AnalysisFailed { .. })));
}

macro_rules! register_command_scenario {
    ($fn_name:ident, $scenario_title:literal) => {
        #[scenario(path = "tests/features/analysis_command.feature", name = $scenario_title)]
        fn $fn_name(#[from(world)] world: CommandWorld) {
            let _ = world;
        }
    };
}

register_command_scenario!(missing_history, "rejecting a diff without a history extract");
register_command_scenario!(printed_diff, "printing the diff of a changeset");
register_command_scenario!(unknown_relation, "reporting an unknown relation");
