//! Per-element accumulation of history versions during PBF ingestion.

use chrono::DateTime;
use lineage_core::{
    ChangesetId, Coordinate, ElementMeta, MemberRef, Node, NodeId, Relation, RelationId,
    RelationMember, Tags, Version, Way, WayId,
};
use osmpbf::{Element, RelMemberType};

use crate::snapshot::{HistorySnapshot, HistorySnapshotBuilder};

/// History metadata common to every element representation.
struct RawInfo {
    version: i32,
    changeset: i64,
    milli_timestamp: i64,
    user: Option<String>,
    visible: bool,
}

impl RawInfo {
    fn from_info(info: &osmpbf::Info<'_>) -> Option<Self> {
        Some(Self {
            version: info.version()?,
            changeset: info.changeset()?,
            milli_timestamp: info.milli_timestamp()?,
            user: info.user().and_then(Result::ok).map(str::to_owned),
            visible: info.visible(),
        })
    }

    fn from_dense(info: &osmpbf::DenseNodeInfo<'_>) -> Self {
        Self {
            version: info.version(),
            changeset: info.changeset(),
            milli_timestamp: info.milli_timestamp(),
            user: info.user().ok().map(str::to_owned),
            visible: info.visible(),
        }
    }

    fn into_meta<'a>(
        self,
        tags: impl Iterator<Item = (&'a str, &'a str)>,
    ) -> Option<(ElementMeta, Option<String>)> {
        let version = u64::try_from(self.version)
            .ok()
            .and_then(|raw| Version::new(raw).ok())?;
        let timestamp = DateTime::from_timestamp_millis(self.milli_timestamp)?;
        let tags: Tags = tags
            .map(|(key, value)| (key.to_owned(), value.to_owned()))
            .collect();
        let mut meta = ElementMeta::new(version, ChangesetId::new(self.changeset), timestamp)
            .with_tags(tags);
        meta.visible = self.visible;
        Some((meta, self.user))
    }
}

#[derive(Debug, Default)]
pub(super) struct HistoryAccumulator {
    builder: HistorySnapshotBuilder,
}

impl HistoryAccumulator {
    pub(super) fn process_element(&mut self, element: Element<'_>) {
        match element {
            Element::Node(node) => {
                let meta =
                    RawInfo::from_info(&node.info()).and_then(|raw| raw.into_meta(node.tags()));
                self.push_node(node.id(), node.lon(), node.lat(), meta);
            }
            Element::DenseNode(node) => {
                let meta = node
                    .info()
                    .map(RawInfo::from_dense)
                    .and_then(|raw| raw.into_meta(node.tags()));
                self.push_node(node.id(), node.lon(), node.lat(), meta);
            }
            Element::Way(way) => {
                let Some((meta, user)) =
                    RawInfo::from_info(&way.info()).and_then(|raw| raw.into_meta(way.tags()))
                else {
                    self.builder.record_skipped();
                    return;
                };
                self.record_author(&meta, user);
                let nodes = way.refs().map(NodeId::new).collect();
                self.builder.push_way(Way::new(WayId::new(way.id()), nodes, meta));
            }
            Element::Relation(relation) => {
                let Some((meta, user)) = RawInfo::from_info(&relation.info())
                    .and_then(|raw| raw.into_meta(relation.tags()))
                else {
                    self.builder.record_skipped();
                    return;
                };
                self.record_author(&meta, user);
                let members = relation
                    .members()
                    .map(|member| {
                        let target = match member.member_type {
                            RelMemberType::Node => MemberRef::Node(NodeId::new(member.member_id)),
                            RelMemberType::Way => MemberRef::Way(WayId::new(member.member_id)),
                            RelMemberType::Relation => {
                                MemberRef::Relation(RelationId::new(member.member_id))
                            }
                        };
                        RelationMember::new(target, member.role().unwrap_or_default())
                    })
                    .collect();
                self.builder.push_relation(Relation::new(
                    RelationId::new(relation.id()),
                    members,
                    meta,
                ));
            }
        }
    }

    fn push_node(
        &mut self,
        id: i64,
        lon: f64,
        lat: f64,
        meta: Option<(ElementMeta, Option<String>)>,
    ) {
        let Some((meta, user)) = meta else {
            self.builder.record_skipped();
            return;
        };
        self.record_author(&meta, user);
        self.builder
            .push_node(Node::new(NodeId::new(id), Coordinate::new(lon, lat), meta));
    }

    fn record_author(&mut self, meta: &ElementMeta, user: Option<String>) {
        if let Some(user) = user.filter(|name| !name.is_empty()) {
            self.builder.push_author(meta.changeset, user);
        }
    }

    pub(super) fn combine(self, other: Self) -> Self {
        Self {
            builder: self.builder.merge(other.builder),
        }
    }

    pub(super) const fn skipped(&self) -> u64 {
        self.builder.skipped()
    }

    pub(super) fn into_snapshot(self) -> HistorySnapshot {
        self.builder.build()
    }
}
