//! Collapse a changeset's raw change lists into one net change per entity.

use std::collections::BTreeMap;

use lineage_core::{ChangesetDownload, Entity, EntityKey};
use serde::Serialize;

/// Deduplicated create/modify/delete buckets.
///
/// The buckets are pairwise disjoint by [`EntityKey`]; each is ordered by
/// key.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReconciledChangeset {
    /// Net creations, holding each entity's final state in the changeset.
    pub create: Vec<Entity>,
    /// Net modifications of pre-existing entities, newest version only.
    pub modify: Vec<Entity>,
    /// Net deletions of pre-existing entities.
    pub delete: Vec<Entity>,
}

impl ReconciledChangeset {
    /// Whether no bucket holds anything.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.create.is_empty() && self.modify.is_empty() && self.delete.is_empty()
    }

    /// Every entity across the three buckets.
    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.create.iter().chain(&self.modify).chain(&self.delete)
    }
}

/// Reconcile the raw lists of a changeset download.
///
/// * Creations are last-write-wins per key.
/// * A modification of a created key replaces the creation when its version
///   is greater and is otherwise ignored; other modifications keep only the
///   highest version per key.
/// * A deletion drops the key from the modify bucket; a deletion of a
///   created key cancels the creation and is not reported at all.
///
/// # Examples
/// ```
/// use lineage_analysis::reconcile;
/// use lineage_core::{ChangesetDownload, Entity, test_support::{deleted_node, node_version}};
///
/// let download = ChangesetDownload {
///     create: vec![Entity::from(node_version(1, 1, 5, 100, (0.0, 0.0)))],
///     modify: Vec::new(),
///     delete: vec![Entity::from(deleted_node(1, 2, 5, 100))],
/// };
/// assert!(reconcile(&download).is_empty());
/// ```
#[must_use]
pub fn reconcile(download: &ChangesetDownload) -> ReconciledChangeset {
    let mut create: BTreeMap<EntityKey, Entity> = BTreeMap::new();
    for entity in &download.create {
        create.insert(entity.key(), entity.clone());
    }

    let mut modify: BTreeMap<EntityKey, Entity> = BTreeMap::new();
    for entity in &download.modify {
        let key = entity.key();
        if let Some(created) = create.get_mut(&key) {
            if entity.version() > created.version() {
                *created = entity.clone();
            }
            continue;
        }
        keep_newest(&mut modify, key, entity);
    }

    let mut delete: BTreeMap<EntityKey, Entity> = BTreeMap::new();
    for entity in &download.delete {
        let key = entity.key();
        modify.remove(&key);
        if create.remove(&key).is_some() {
            continue;
        }
        keep_newest(&mut delete, key, entity);
    }

    ReconciledChangeset {
        create: create.into_values().collect(),
        modify: modify.into_values().collect(),
        delete: delete.into_values().collect(),
    }
}

fn keep_newest(bucket: &mut BTreeMap<EntityKey, Entity>, key: EntityKey, entity: &Entity) {
    match bucket.get(&key) {
        Some(existing) if existing.version() >= entity.version() => {}
        _ => {
            bucket.insert(key, entity.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lineage_core::{
        EntityKind,
        test_support::{deleted_node, deleted_way, node_version, way_version},
    };
    use rstest::rstest;

    fn node(version: u64) -> Entity {
        Entity::from(node_version(1, version, 5, 100, (0.0, 0.0)))
    }

    fn versions(bucket: &[Entity]) -> Vec<u64> {
        bucket
            .iter()
            .filter_map(Entity::version)
            .map(|version| version.get())
            .collect()
    }

    #[rstest]
    fn created_then_deleted_nets_to_nothing() {
        let download = ChangesetDownload {
            create: vec![node(1)],
            modify: Vec::new(),
            delete: vec![Entity::from(deleted_node(1, 2, 5, 100))],
        };
        let reconciled = reconcile(&download);
        assert!(reconciled.is_empty());
    }

    #[rstest]
    fn repeated_modifications_keep_the_newest() {
        let download = ChangesetDownload {
            create: Vec::new(),
            modify: vec![node(6), node(7), node(5)],
            delete: Vec::new(),
        };
        let reconciled = reconcile(&download);
        assert_eq!(versions(&reconciled.modify), vec![7]);
    }

    #[rstest]
    fn created_then_modified_reports_final_state_as_created() {
        let download = ChangesetDownload {
            create: vec![node(1)],
            modify: vec![node(2), node(3)],
            delete: Vec::new(),
        };
        let reconciled = reconcile(&download);
        assert_eq!(versions(&reconciled.create), vec![3]);
        assert!(reconciled.modify.is_empty());
    }

    #[rstest]
    fn modified_then_deleted_is_reported_as_deleted() {
        let download = ChangesetDownload {
            create: Vec::new(),
            modify: vec![Entity::from(way_version(4, 2, 5, 100, &[1, 2]))],
            delete: vec![Entity::from(deleted_way(4, 3, 5, 100))],
        };
        let reconciled = reconcile(&download);
        assert!(reconciled.modify.is_empty());
        assert_eq!(versions(&reconciled.delete), vec![3]);
    }

    #[rstest]
    fn keys_distinguish_namespaces() {
        let download = ChangesetDownload {
            create: vec![node(1), Entity::from(way_version(1, 1, 5, 100, &[1, 2]))],
            modify: Vec::new(),
            delete: Vec::new(),
        };
        let reconciled = reconcile(&download);
        let kinds: Vec<EntityKind> = reconciled.create.iter().map(Entity::kind).collect();
        assert_eq!(kinds, vec![EntityKind::Node, EntityKind::Way]);
    }
}
