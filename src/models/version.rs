use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::component::{ComponentDocuments, GridPlacement, PageComponent};
use crate::tree::TreeNode;

/// Current layout of [`PageSnapshot`].
pub const SNAPSHOT_FORMAT: u32 = 1;

/// An immutable, numbered snapshot of a page's component forest.
///
/// Version numbers start at 1 and only ever grow. Restoring an old version
/// appends a new one rather than rewinding the sequence, and stored versions
/// are never updated (the table rejects `UPDATE` outright).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageVersion {
    pub id: i64,
    pub page_id: Uuid,
    pub version_number: i64,
    pub snapshot: PageSnapshot,
    pub is_published: bool,
    pub published_at: Option<DateTime<Utc>>,
    pub change_notes: Option<String>,
    /// The version this one was restored from, if it was created by a restore.
    pub restored_from: Option<i64>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

/// Version metadata without the snapshot body, for history listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageVersionSummary {
    pub version_number: i64,
    pub is_published: bool,
    pub published_at: Option<DateTime<Utc>>,
    pub change_notes: Option<String>,
    pub restored_from: Option<i64>,
    pub node_count: usize,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

impl From<&PageVersion> for PageVersionSummary {
    fn from(version: &PageVersion) -> Self {
        Self {
            version_number: version.version_number,
            is_published: version.is_published,
            published_at: version.published_at,
            change_notes: version.change_notes.clone(),
            restored_from: version.restored_from,
            node_count: version.snapshot.node_count(),
            created_by: version.created_by.clone(),
            created_at: version.created_at,
        }
    }
}

/// The serialized forest held by a version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageSnapshot {
    pub format: u32,
    pub roots: Vec<TreeNode<SnapshotNode>>,
}

impl PageSnapshot {
    pub fn new(roots: Vec<TreeNode<SnapshotNode>>) -> Self {
        Self {
            format: SNAPSHOT_FORMAT,
            roots,
        }
    }

    pub fn node_count(&self) -> usize {
        self.roots.iter().map(TreeNode::len).sum()
    }

    /// All nodes in pre-order.
    pub fn nodes(&self) -> Vec<SnapshotNode> {
        crate::tree::flatten(&self.roots)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.roots.iter().any(|root| root.find(key).is_some())
    }
}

/// The stored form of one component inside a snapshot.
///
/// Carries everything needed to rebuild the live node except its storage
/// identity and audit fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotNode {
    pub key: String,
    #[serde(rename = "type")]
    pub component_type: String,
    pub parent_key: Option<String>,
    pub sort_order: i64,
    #[serde(flatten)]
    pub placement: GridPlacement,
    #[serde(flatten)]
    pub documents: ComponentDocuments,
    pub is_visible: bool,
    pub is_locked: bool,
}

impl From<&PageComponent> for SnapshotNode {
    fn from(node: &PageComponent) -> Self {
        Self {
            key: node.key.clone(),
            component_type: node.component_type.clone(),
            parent_key: node.parent_key.clone(),
            sort_order: node.sort_order,
            placement: node.placement,
            documents: node.documents.clone(),
            is_visible: node.is_visible,
            is_locked: node.is_locked,
        }
    }
}

/// Input for taking a snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateSnapshotInput {
    #[serde(default)]
    pub notes: Option<String>,
    /// Mark the version published and stamp the page's publish fields.
    #[serde(default)]
    pub publish: bool,
}
