//! Behavioural tests for the cache-backed repository using rstest-bdd.

use std::{cell::RefCell, sync::Arc};

use lineage_core::{
    ChangesetId, Node, NodeId, Repository, SourceError, Versioned,
    test_support::{MemorySource, node_version},
};
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};

/// Shared scenario state.
#[derive(Default)]
struct RepositoryWorld {
    repository: RefCell<Option<Repository<MemorySource>>>,
    lookup: RefCell<Option<Result<Option<Arc<Node>>, SourceError>>>,
}

impl RepositoryWorld {
    fn with_repository<R>(&self, f: impl FnOnce(&Repository<MemorySource>) -> R) -> R {
        let borrowed = self.repository.borrow();
        let repository = borrowed
            .as_ref()
            .expect("repository should be initialised by a Given step");
        f(repository)
    }
}

#[fixture]
fn world() -> RepositoryWorld {
    RepositoryWorld::default()
}

#[given("a source holding three versions of node {id}")]
fn given_three_versions(world: &RepositoryWorld, id: i64) {
    let mut source = MemorySource::default();
    source.insert_node(node_version(id, 1, 10, 100, (0.0, 0.0)));
    source.insert_node(node_version(id, 2, 20, 200, (0.0, 0.5)));
    source.insert_node(node_version(id, 3, 30, 300, (0.0, 1.0)));
    world.repository.replace(Some(Repository::new(source)));
}

#[given("a source that fails every request")]
fn given_failing_source(world: &RepositoryWorld) {
    let mut source = MemorySource::default();
    source.fail_all();
    world.repository.replace(Some(Repository::new(source)));
}

#[when("the history of node {id} is requested twice")]
fn when_history_twice(world: &RepositoryWorld, id: i64) {
    world.with_repository(|repository| {
        for _ in 0..2 {
            let history = repository
                .history(NodeId::new(id))
                .expect("history should load");
            assert_eq!(history.len(), 3);
        }
    });
}

#[when("the state of node {id} before changeset {changeset} is requested")]
fn when_before_changeset(world: &RepositoryWorld, id: i64, changeset: i64) {
    let result = world.with_repository(|repository| {
        repository.before_changeset(NodeId::new(id), ChangesetId::new(changeset))
    });
    world.lookup.replace(Some(result));
}

#[when("the current version of node {id} is requested")]
fn when_current(world: &RepositoryWorld, id: i64) {
    let result = world.with_repository(|repository| repository.current(NodeId::new(id)));
    world.lookup.replace(Some(result));
}

#[then("the source served {count} history fetch")]
fn then_history_calls(world: &RepositoryWorld, count: usize) {
    world.with_repository(|repository| {
        assert_eq!(repository.source().history_calls(), count);
    });
}

#[then("version {version} is returned")]
fn then_version_returned(world: &RepositoryWorld, version: u64) {
    let binding = world.lookup.borrow();
    let found = binding
        .as_ref()
        .expect("a lookup should be recorded")
        .as_ref()
        .expect("lookup should succeed")
        .as_ref()
        .expect("an element should be found");
    assert_eq!(found.version().get(), version);
}

#[then("a transport error is reported")]
fn then_transport_error(world: &RepositoryWorld) {
    let binding = world.lookup.borrow();
    match binding.as_ref().expect("a lookup should be recorded") {
        Err(SourceError::Transport { .. }) => {}
        other => panic!("expected transport error, got {other:?}"),
    }
}

#[scenario(path = "tests/features/repository.feature", index = 0)]
fn repeated_history_hits_cache(world: RepositoryWorld) {
    let _ = world;
}

#[scenario(path = "tests/features/repository.feature", index = 1)]
fn state_before_changeset(world: RepositoryWorld) {
    let _ = world;
}

#[scenario(path = "tests/features/repository.feature", index = 2)]
fn transport_failure(world: RepositoryWorld) {
    let _ = world;
}
