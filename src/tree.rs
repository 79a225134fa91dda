//! Conversion between the flat component arena and the nested forest.
//!
//! Storage keeps components flat with a `parent_key` back-reference. Editors
//! and snapshots want the nested form, so [`assemble`] rebuilds it on demand
//! and [`flatten`] turns it back into records. Both are pure and do no I/O.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::models::{PageComponent, SnapshotNode};

/// Anything that can be placed in a component forest.
pub trait Positioned {
    fn key(&self) -> &str;
    fn parent_key(&self) -> Option<&str>;
    fn sort_order(&self) -> i64;

    /// Insertion sequence, used to break `sort_order` ties. Items that do not
    /// carry one keep their input order.
    fn sequence(&self) -> i64 {
        0
    }
}

impl Positioned for PageComponent {
    fn key(&self) -> &str {
        &self.key
    }

    fn parent_key(&self) -> Option<&str> {
        self.parent_key.as_deref()
    }

    fn sort_order(&self) -> i64 {
        self.sort_order
    }

    fn sequence(&self) -> i64 {
        self.id
    }
}

impl Positioned for SnapshotNode {
    fn key(&self) -> &str {
        &self.key
    }

    fn parent_key(&self) -> Option<&str> {
        self.parent_key.as_deref()
    }

    fn sort_order(&self) -> i64 {
        self.sort_order
    }
}

/// An item with its ordered children.
///
/// The item's fields are flattened into the JSON form, with an additional
/// `children` array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct TreeNode<T> {
    #[serde(flatten)]
    pub item: T,
    #[serde(default)]
    pub children: Vec<TreeNode<T>>,
}

impl<T> TreeNode<T> {
    /// Number of items in this subtree, including the root.
    pub fn len(&self) -> usize {
        1 + self.children.iter().map(TreeNode::len).sum::<usize>()
    }

    pub fn map<U>(&self, f: &impl Fn(&T) -> U) -> TreeNode<U> {
        TreeNode {
            item: f(&self.item),
            children: self.children.iter().map(|c| c.map(f)).collect(),
        }
    }
}

impl<T: Positioned> TreeNode<T> {
    pub fn find(&self, key: &str) -> Option<&TreeNode<T>> {
        if self.item.key() == key {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(key))
    }
}

/// Result of assembling a flat node list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assembly<T> {
    pub forest: Vec<TreeNode<T>>,
    /// Keys of nodes promoted to roots because their parent was missing from
    /// the input, or because they sat in a parent cycle. Callers decide
    /// whether to surface or repair these.
    pub orphans: Vec<String>,
}

impl<T> Assembly<T> {
    pub fn has_integrity_warnings(&self) -> bool {
        !self.orphans.is_empty()
    }

    pub fn len(&self) -> usize {
        self.forest.iter().map(TreeNode::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.forest.is_empty()
    }
}

type Groups<T> = HashMap<Option<String>, Vec<T>>;

/// Build the ordered forest for a flat set of nodes.
///
/// Siblings are ordered by `(sort_order, sequence)`; the sort is stable, so
/// items without a sequence keep their input order on ties. A node whose
/// parent is not in the input becomes a root and is reported in
/// [`Assembly::orphans`]; it is never dropped.
pub fn assemble<T: Positioned>(nodes: Vec<T>) -> Assembly<T> {
    let known: HashSet<String> = nodes.iter().map(|n| n.key().to_string()).collect();
    let mut orphans = Vec::new();
    let mut groups: Groups<T> = HashMap::new();

    for node in nodes {
        let parent = match node.parent_key() {
            Some(parent) if known.contains(parent) => Some(parent.to_string()),
            Some(_) => {
                orphans.push(node.key().to_string());
                None
            }
            None => None,
        };
        groups.entry(parent).or_default().push(node);
    }

    let mut forest = build_children(None, &mut groups);

    // Whatever is left is unreachable from a root: a parent cycle. Break it
    // at the earliest inserted node and report it like an orphan.
    while let Some((parent, index)) = earliest_remaining(&groups) {
        let Some(group) = groups.get_mut(&parent) else {
            break;
        };
        let item = group.remove(index);
        if group.is_empty() {
            groups.remove(&parent);
        }
        let key = item.key().to_string();
        let children = build_children(Some(&key), &mut groups);
        orphans.push(key);
        forest.push(TreeNode { item, children });
    }

    if !orphans.is_empty() {
        tracing::warn!(count = orphans.len(), ?orphans, "Assembled forest has orphaned nodes");
    }

    Assembly { forest, orphans }
}

fn build_children<T: Positioned>(parent: Option<&str>, groups: &mut Groups<T>) -> Vec<TreeNode<T>> {
    let Some(mut items) = groups.remove(&parent.map(str::to_string)) else {
        return Vec::new();
    };
    items.sort_by_key(|item| (item.sort_order(), item.sequence()));

    items
        .into_iter()
        .map(|item| {
            let key = item.key().to_string();
            let children = build_children(Some(&key), groups);
            TreeNode { item, children }
        })
        .collect()
}

fn earliest_remaining<T: Positioned>(groups: &Groups<T>) -> Option<(Option<String>, usize)> {
    groups
        .iter()
        .flat_map(|(parent, items)| {
            items
                .iter()
                .enumerate()
                .map(move |(index, item)| ((item.sequence(), item.key()), parent, index))
        })
        .min_by(|a, b| a.0.cmp(&b.0))
        .map(|(_, parent, index)| (parent.clone(), index))
}

/// Flatten a forest back to records in pre-order.
///
/// No identity is reassigned: keys and parent links are already on each item.
pub fn flatten<T: Clone>(forest: &[TreeNode<T>]) -> Vec<T> {
    let mut out = Vec::with_capacity(forest.iter().map(TreeNode::len).sum());
    for root in forest {
        push_preorder(root, &mut out);
    }
    out
}

fn push_preorder<T: Clone>(node: &TreeNode<T>, out: &mut Vec<T>) {
    out.push(node.item.clone());
    for child in &node.children {
        push_preorder(child, out);
    }
}
