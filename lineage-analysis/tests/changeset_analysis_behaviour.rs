//! Behavioural tests for the diff and blame engines using rstest-bdd.

use std::{cell::RefCell, num::NonZeroUsize};

use lineage_analysis::{
    AnalysisOutcome, AnalysisReport, AnalysisRequest, BlameReport, GeometryDiff, Moment,
    blame_relation, diff_changeset, relation_segments, run_batch,
};
use lineage_core::{
    ChangesetDownload, ChangesetId, Entity, MemberRef, NodeId, RelationId, Repository, WayId,
    test_support::{MemorySource, changeset, node_version, relation_version, way_version},
};
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};

/// Nodes are laid out along the equator, one degree apart.
fn position(id: i64) -> (f64, f64) {
    let lon = f64::from(u8::try_from(id).expect("small node id"));
    (lon, 0.0)
}

/// Shared scenario state.
#[derive(Default)]
struct AnalysisWorld {
    source: RefCell<MemorySource>,
    diff: RefCell<Option<GeometryDiff>>,
    blame: RefCell<Option<BlameReport>>,
    batch: RefCell<Vec<AnalysisOutcome<AnalysisReport>>>,
}

impl AnalysisWorld {
    fn repository(&self) -> Repository<MemorySource> {
        Repository::new(self.source.take())
    }

    fn create_way(&self, way: i64, nodes: &[i64], created_in: i64) {
        let mut source = self.source.borrow_mut();
        source.insert_changeset(changeset(created_in, "alice", 100));
        for id in nodes {
            source.insert_node(node_version(*id, 1, created_in, 100, position(*id)));
        }
        source.insert_way(way_version(way, 1, created_in, 100, nodes));
    }
}

#[fixture]
fn world() -> AnalysisWorld {
    AnalysisWorld::default()
}

#[given("a way {way} through nodes {a}, {b} and {c} created in changeset {cs}")]
fn given_three_node_way(world: &AnalysisWorld, way: i64, a: i64, b: i64, c: i64, cs: i64) {
    world.create_way(way, &[a, b, c], cs);
}

#[given("a way {way} joining nodes {a} and {b} created in changeset {cs}")]
fn given_two_node_way(world: &AnalysisWorld, way: i64, a: i64, b: i64, cs: i64) {
    world.create_way(way, &[a, b], cs);
}

#[given("relation {id} holds ways {first} and {second}")]
fn given_relation(world: &AnalysisWorld, id: i64, first: i64, second: i64) {
    world.source.borrow_mut().insert_relation(relation_version(
        id,
        1,
        1,
        100,
        &[
            MemberRef::Way(WayId::new(first)),
            MemberRef::Way(WayId::new(second)),
        ],
    ));
}

#[given("changeset {cs} moves node {node}")]
fn given_move(world: &AnalysisWorld, cs: i64, node: i64) {
    let (lon, _) = position(node);
    let moved = node_version(node, 2, cs, 200, (lon, 1.0));
    let mut source = world.source.borrow_mut();
    source.insert_node(moved.clone());
    source.insert_changeset(changeset(cs, "bob", 200));
    source.insert_download(
        ChangesetId::new(cs),
        ChangesetDownload {
            modify: vec![Entity::from(moved)],
            ..ChangesetDownload::default()
        },
    );
}

#[when("changeset {cs} is diffed")]
fn when_diffed(world: &AnalysisWorld, cs: i64) {
    let repository = world.repository();
    let diff = diff_changeset(&repository, ChangesetId::new(cs)).expect("diff succeeds");
    world.diff.replace(Some(diff));
}

#[when("relation {id} is blamed")]
fn when_blamed(world: &AnalysisWorld, id: i64) {
    let repository = world.repository();
    let report = blame_relation(&repository, RelationId::new(id)).expect("blame succeeds");
    let current = relation_segments(&repository, RelationId::new(id), Moment::Current)
        .expect("segments resolve");
    assert!(report.attributions.keys().all(|segment| current.contains(segment)));
    world.blame.replace(Some(report));
}

#[when("changesets {first} and {second} are analysed in a batch")]
fn when_batch(world: &AnalysisWorld, first: i64, second: i64) {
    let repository = world.repository();
    let requests = [
        AnalysisRequest::Diff(ChangesetId::new(first)),
        AnalysisRequest::Diff(ChangesetId::new(second)),
    ];
    let workers = NonZeroUsize::new(2).expect("non-zero");
    world
        .batch
        .replace(run_batch(&repository, &requests, workers));
}

fn with_diff<R>(world: &AnalysisWorld, f: impl FnOnce(&GeometryDiff) -> R) -> R {
    let borrowed = world.diff.borrow();
    f(borrowed.as_ref().expect("a diff should be recorded"))
}

#[then("{count} segments are removed")]
fn then_removed(world: &AnalysisWorld, count: usize) {
    with_diff(world, |diff| assert_eq!(diff.removed.len(), count));
}

#[then("{count} segments are created")]
fn then_created(world: &AnalysisWorld, count: usize) {
    with_diff(world, |diff| assert_eq!(diff.created.len(), count));
}

#[then("no segment is unchanged")]
fn then_none_unchanged(world: &AnalysisWorld) {
    with_diff(world, |diff| assert!(diff.unchanged.is_empty()));
}

#[then("every changed segment touches node {node}")]
fn then_touches(world: &AnalysisWorld, node: i64) {
    with_diff(world, |diff| {
        let node = NodeId::new(node);
        assert!(diff.removed.iter().all(|segment| segment.touches(node)));
        assert!(diff.created.iter().all(|segment| segment.touches(node)));
    });
}

#[then("{count} segments are attributed to changeset {cs}")]
fn then_attributed(world: &AnalysisWorld, count: usize, cs: i64) {
    let binding = world.blame.borrow();
    let report = binding.as_ref().expect("a blame report should be recorded");
    assert_eq!(report.segments_by(ChangesetId::new(cs)).count(), count);
    assert!(
        report
            .segments_by(ChangesetId::new(cs))
            .all(|segment| segment.touches(NodeId::new(2)))
    );
}

#[then("{count} segment is unattributed")]
fn then_unattributed(world: &AnalysisWorld, count: usize) {
    let binding = world.blame.borrow();
    let report = binding.as_ref().expect("a blame report should be recorded");
    // Three segments exist in total: two on way 10 and one on way 11.
    assert_eq!(3 - report.attributions.len(), count);
}

#[then("the author of changeset {cs} is reported")]
fn then_author(world: &AnalysisWorld, cs: i64) {
    let binding = world.blame.borrow();
    let report = binding.as_ref().expect("a blame report should be recorded");
    let meta = report
        .changesets
        .get(&ChangesetId::new(cs))
        .expect("changeset metadata should be resolved");
    assert_eq!(meta.author.as_deref(), Some("bob"));
}

#[then("the first analysis reports changeset {cs} as missing")]
fn then_first_failed(world: &AnalysisWorld, cs: i64) {
    let batch = world.batch.borrow();
    let failure = batch
        .first()
        .and_then(AnalysisOutcome::failure)
        .expect("first analysis should fail");
    assert_eq!(failure.message, format!("changeset {cs} was not found"));
    assert!(!failure.panicked);
}

#[then("the second analysis completed")]
fn then_second_completed(world: &AnalysisWorld) {
    let batch = world.batch.borrow();
    assert!(matches!(
        batch.get(1),
        Some(AnalysisOutcome::Completed(AnalysisReport::Diff(_)))
    ));
}

#[scenario(path = "tests/features/changeset_analysis.feature", index = 0)]
fn moving_a_node(world: AnalysisWorld) {
    let _ = world;
}

#[scenario(path = "tests/features/changeset_analysis.feature", index = 1)]
fn blaming_a_relation(world: AnalysisWorld) {
    let _ = world;
}

#[scenario(path = "tests/features/changeset_analysis.feature", index = 2)]
fn batch_failure_capture(world: AnalysisWorld) {
    let _ = world;
}
