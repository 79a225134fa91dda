use std::collections::{HashMap, HashSet};

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::components::{self, all_rows, insert_row, live_tree, soft_delete_keys, write_fields};
use super::pages::{require_live_page, touch_page};
use super::{get_datetime, get_json, get_opt_datetime, get_uuid, Database};
use crate::error::{PageError, Result};
use crate::models::*;
use crate::providers::Collaborators;
use crate::tree::{Assembly, TreeNode};

const VERSION_COLUMNS: &str = "id, page_id, version_number, snapshot, is_published, published_at, \
     change_notes, restored_from, created_by, created_at";

fn version_from_row(row: &Row<'_>) -> rusqlite::Result<PageVersion> {
    Ok(PageVersion {
        id: row.get(0)?,
        page_id: get_uuid(row, 1)?,
        version_number: row.get(2)?,
        snapshot: get_json(row, 3)?,
        is_published: row.get::<_, i32>(4)? != 0,
        published_at: get_opt_datetime(row, 5)?,
        change_notes: row.get(6)?,
        restored_from: row.get(7)?,
        created_by: row.get(8)?,
        created_at: get_datetime(row, 9)?,
    })
}

/// How a restore brought the live node set in line with a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    /// Live nodes overwritten in place.
    pub updated: Vec<String>,
    /// Soft-deleted rows brought back under their own key.
    pub revived: Vec<String>,
    /// Keys with no row left at all, inserted fresh.
    pub recreated: Vec<String>,
    /// Live nodes absent from the snapshot, now soft-deleted.
    pub removed: Vec<String>,
}

/// Outcome of restoring a page to an earlier version.
#[derive(Debug, Clone, Serialize)]
pub struct RestoreResult {
    /// The version appended to record the restore.
    pub version: PageVersion,
    /// The live forest after the restore.
    pub forest: Vec<TreeNode<PageComponent>>,
    pub report: ReconcileReport,
}

fn next_version_number(conn: &Connection, page_id: Uuid) -> Result<i64> {
    let number: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version_number), 0) + 1 FROM page_versions WHERE page_id = ?",
        [page_id.to_string()],
        |row| row.get(0),
    )?;
    Ok(number)
}

fn snapshot_of(assembly: &Assembly<PageComponent>) -> PageSnapshot {
    PageSnapshot::new(
        assembly
            .forest
            .iter()
            .map(|root| root.map(&|node: &PageComponent| SnapshotNode::from(node)))
            .collect(),
    )
}

fn find_version(conn: &Connection, page_id: Uuid, number: i64) -> Result<Option<PageVersion>> {
    let version = conn
        .query_row(
            &format!(
                "SELECT {VERSION_COLUMNS} FROM page_versions WHERE page_id = ? AND version_number = ?"
            ),
            (page_id.to_string(), number),
            version_from_row,
        )
        .optional()?;
    Ok(version)
}

struct NewVersion {
    snapshot: PageSnapshot,
    publish: bool,
    change_notes: Option<String>,
    restored_from: Option<i64>,
}

fn append_version(
    conn: &Connection,
    page_id: Uuid,
    actor: &str,
    new: NewVersion,
) -> Result<PageVersion> {
    let version_number = next_version_number(conn, page_id)?;
    let now = Utc::now();
    let published_at = new.publish.then_some(now);

    conn.execute(
        "INSERT INTO page_versions (page_id, version_number, snapshot, is_published, published_at,
             change_notes, restored_from, created_by, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            page_id.to_string(),
            version_number,
            serde_json::to_string(&new.snapshot)?,
            new.publish as i32,
            published_at.map(|t| t.to_rfc3339()),
            &new.change_notes,
            new.restored_from,
            actor,
            now.to_rfc3339(),
        ),
    )?;

    Ok(PageVersion {
        id: conn.last_insert_rowid(),
        page_id,
        version_number,
        snapshot: new.snapshot,
        is_published: new.publish,
        published_at,
        change_notes: new.change_notes,
        restored_from: new.restored_from,
        created_by: actor.to_string(),
        created_at: now,
    })
}

/// Every component key mentioned by any stored version of the page.
pub(crate) fn referenced_keys(conn: &Connection, page_id: Uuid) -> Result<HashSet<String>> {
    let mut stmt = conn.prepare("SELECT snapshot FROM page_versions WHERE page_id = ?")?;
    let snapshots = stmt
        .query_map([page_id.to_string()], |row| get_json::<PageSnapshot>(row, 0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(snapshots
        .iter()
        .flat_map(PageSnapshot::nodes)
        .map(|node| node.key)
        .collect())
}

pub(crate) fn take_snapshot(
    conn: &Connection,
    collab: &Collaborators,
    page_id: Uuid,
    input: CreateSnapshotInput,
) -> Result<PageVersion> {
    require_live_page(conn, page_id)?;
    let assembly = live_tree(conn, page_id)?;
    if assembly.has_integrity_warnings() {
        return Err(PageError::IntegrityViolation(format!(
            "cannot snapshot a forest with orphaned components: {}",
            assembly.orphans.join(", ")
        )));
    }

    let actor = collab.identity.current_user();
    let version = append_version(
        conn,
        page_id,
        &actor,
        NewVersion {
            snapshot: snapshot_of(&assembly),
            publish: input.publish,
            change_notes: input.notes,
            restored_from: None,
        },
    )?;

    if input.publish {
        conn.execute(
            "UPDATE pages SET status = ?, published_at = ?, published_by = ? WHERE id = ?",
            (
                PageStatus::Published.as_str(),
                version.created_at.to_rfc3339(),
                &actor,
                page_id.to_string(),
            ),
        )?;
        touch_page(conn, page_id, &actor)?;
        tracing::info!(
            page_id = %page_id,
            version = version.version_number,
            nodes = version.snapshot.node_count(),
            "Published page"
        );
    } else {
        tracing::info!(
            page_id = %page_id,
            version = version.version_number,
            nodes = version.snapshot.node_count(),
            "Created page snapshot"
        );
    }

    Ok(version)
}

/// Bring the live node set in line with version `number`, then record the
/// result as a new version.
///
/// Nodes are matched by key. The snapshot is walked in pre-order so every
/// parent row is in place before its children point at it.
pub(crate) fn restore_version(
    conn: &Connection,
    collab: &Collaborators,
    page_id: Uuid,
    number: i64,
) -> Result<RestoreResult> {
    require_live_page(conn, page_id)?;
    let target = find_version(conn, page_id, number)?
        .ok_or_else(|| PageError::not_found("version", number))?;

    let actor = collab.identity.current_user();
    let now = Utc::now();
    let rows = all_rows(conn, page_id)?;
    let mut by_key: HashMap<String, PageComponent> =
        rows.into_iter().map(|r| (r.key.clone(), r)).collect();
    let mut report = ReconcileReport::default();
    let mut wanted = HashSet::new();

    for node in target.snapshot.nodes() {
        wanted.insert(node.key.clone());
        match by_key.remove(&node.key) {
            Some(mut row) => {
                if row.is_deleted() {
                    report.revived.push(node.key.clone());
                } else {
                    report.updated.push(node.key.clone());
                }
                row.component_type = node.component_type;
                row.parent_key = node.parent_key;
                row.sort_order = node.sort_order;
                row.placement = node.placement;
                row.documents = node.documents;
                row.is_visible = node.is_visible;
                row.is_locked = node.is_locked;
                row.updated_by = actor.clone();
                row.updated_at = now;
                write_fields(conn, &row)?;
            }
            None => {
                report.recreated.push(node.key.clone());
                let row = PageComponent {
                    id: 0,
                    page_id,
                    key: node.key,
                    component_type: node.component_type,
                    parent_key: node.parent_key,
                    sort_order: node.sort_order,
                    placement: node.placement,
                    documents: node.documents,
                    is_visible: node.is_visible,
                    is_locked: node.is_locked,
                    created_by: actor.clone(),
                    updated_by: actor.clone(),
                    created_at: now,
                    updated_at: now,
                    deleted_at: None,
                    deleted_by: None,
                };
                insert_row(conn, &row)?;
            }
        }
    }

    let mut stale: Vec<&PageComponent> = by_key
        .values()
        .filter(|row| !row.is_deleted() && !wanted.contains(&row.key))
        .collect();
    stale.sort_by_key(|row| row.id);
    report.removed = stale.iter().map(|row| row.key.clone()).collect();
    soft_delete_keys(conn, page_id, &report.removed, &actor, now)?;

    touch_page(conn, page_id, &actor)?;

    let assembly = live_tree(conn, page_id)?;
    if assembly.has_integrity_warnings() {
        return Err(PageError::IntegrityViolation(format!(
            "restore of version {number} left orphaned components: {}",
            assembly.orphans.join(", ")
        )));
    }
    let version = append_version(
        conn,
        page_id,
        &actor,
        NewVersion {
            snapshot: snapshot_of(&assembly),
            publish: false,
            change_notes: Some(format!("Restored from version {number}")),
            restored_from: Some(number),
        },
    )?;

    tracing::info!(
        page_id = %page_id,
        from = number,
        version = version.version_number,
        updated = report.updated.len(),
        revived = report.revived.len(),
        recreated = report.recreated.len(),
        removed = report.removed.len(),
        "Restored page version"
    );

    Ok(RestoreResult {
        version,
        forest: assembly.forest,
        report,
    })
}

impl Database {
    // ============================================================
    // Version operations
    // ============================================================

    /// Store the current live forest as the next version of the page.
    pub fn snapshot(&self, page_id: Uuid, input: CreateSnapshotInput) -> Result<PageVersion> {
        self.write(|conn, collab| take_snapshot(conn, collab, page_id, input))
    }

    /// All versions of the page, newest first.
    pub fn list_versions(&self, page_id: Uuid) -> Result<Vec<PageVersion>> {
        self.read(|conn| {
            require_live_page(conn, page_id)?;
            let mut stmt = conn.prepare(&format!(
                "SELECT {VERSION_COLUMNS} FROM page_versions
                 WHERE page_id = ?
                 ORDER BY version_number DESC"
            ))?;
            let versions = stmt
                .query_map([page_id.to_string()], version_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(versions)
        })
    }

    pub fn list_version_summaries(&self, page_id: Uuid) -> Result<Vec<PageVersionSummary>> {
        Ok(self
            .list_versions(page_id)?
            .iter()
            .map(PageVersionSummary::from)
            .collect())
    }

    pub fn get_version(&self, page_id: Uuid, number: i64) -> Result<PageVersion> {
        self.read(|conn| {
            require_live_page(conn, page_id)?;
            find_version(conn, page_id, number)?
                .ok_or_else(|| PageError::not_found("version", number))
        })
    }

    /// Restore the page's components to version `number`.
    ///
    /// Runs as one transaction and is not blocked by component locks.
    /// Numbering never rewinds: the restored state is appended as a new
    /// version that records where it came from.
    pub fn restore(&self, page_id: Uuid, number: i64) -> Result<RestoreResult> {
        self.write(|conn, collab| restore_version(conn, collab, page_id, number))
    }

    /// Hard-delete soft-deleted components no version refers to.
    pub fn purge_components(&self, page_id: Uuid) -> Result<usize> {
        self.write(|conn, _| {
            require_live_page(conn, page_id)?;
            let purged = components::purge_unreferenced(conn, page_id)?;
            tracing::info!(page_id = %page_id, purged, "Purged unreferenced components");
            Ok(purged)
        })
    }
}
