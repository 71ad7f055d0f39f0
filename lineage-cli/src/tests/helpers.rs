//! Test helpers building small histories and temporary workspaces.

use camino::Utf8PathBuf;
use lineage_core::{
    ChangesetId,
    test_support::{node_version, way_version},
};
use lineage_data::HistorySnapshot;
use tempfile::TempDir;

/// Way 10 runs through nodes 1, 2 and 3; changeset 2 moves node 2.
pub(super) fn moved_node_history() -> HistorySnapshot {
    HistorySnapshot::builder()
        .node(node_version(1, 1, 1, 100, (0.0, 0.0)))
        .node(node_version(2, 1, 1, 100, (1.0, 0.0)))
        .node(node_version(3, 1, 1, 100, (2.0, 0.0)))
        .way(way_version(10, 1, 1, 100, &[1, 2, 3]))
        .node(node_version(2, 2, 2, 200, (1.0, 1.0)))
        .author(ChangesetId::new(2), "alice")
        .build()
}

pub(super) fn utf8_temp_dir() -> (TempDir, Utf8PathBuf) {
    let dir = TempDir::new().expect("tempdir");
    let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf-8 workspace");
    (dir, root)
}
