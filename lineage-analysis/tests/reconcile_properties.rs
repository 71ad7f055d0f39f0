//! Property tests for changeset reconciliation.

use std::collections::HashSet;

use lineage_analysis::reconcile;
use lineage_core::{
    ChangesetDownload, Entity, EntityKey,
    test_support::{deleted_node, node_version},
};
use proptest::prelude::*;

fn listing() -> impl Strategy<Value = Vec<(i64, u64)>> {
    prop::collection::vec((1_i64..6, 1_u64..8), 0..12)
}

fn nodes(entries: &[(i64, u64)]) -> Vec<Entity> {
    entries
        .iter()
        .map(|&(id, version)| Entity::from(node_version(id, version, 9, 100, (0.0, 0.0))))
        .collect()
}

fn keys(bucket: &[Entity]) -> Vec<EntityKey> {
    bucket.iter().map(Entity::key).collect()
}

proptest! {
    #[test]
    fn buckets_are_disjoint_and_unique(
        create in listing(),
        modify in listing(),
        delete in listing(),
    ) {
        let download = ChangesetDownload {
            create: nodes(&create),
            modify: nodes(&modify),
            delete: delete
                .iter()
                .map(|&(id, version)| Entity::from(deleted_node(id, version, 9, 100)))
                .collect(),
        };
        let reconciled = reconcile(&download);
        let mut seen = HashSet::new();
        for key in keys(&reconciled.create)
            .into_iter()
            .chain(keys(&reconciled.modify))
            .chain(keys(&reconciled.delete))
        {
            prop_assert!(seen.insert(key), "{key:?} reported twice");
        }
        let deleted: HashSet<i64> = delete.iter().map(|&(id, _)| id).collect();
        for entity in &reconciled.create {
            prop_assert!(!deleted.contains(&entity.key().id));
        }
    }
}
