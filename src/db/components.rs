use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use super::pages::{require_live_page, touch_page};
use super::{get_datetime, get_json, get_opt_datetime, get_uuid, versions, Database};
use crate::error::{PageError, Result};
use crate::grid::{self, Sibling};
use crate::models::*;
use crate::providers::Collaborators;
use crate::tree::{self, Assembly};

pub(crate) const COMPONENT_COLUMNS: &str = "id, page_id, key, component_type, parent_key, sort_order, \
     grid_column, column_span, grid_row, row_span, \
     properties, styles, content, settings, responsive_settings, animation_settings, interaction_settings, \
     is_visible, is_locked, created_by, updated_by, created_at, updated_at, deleted_at, deleted_by";

const MAX_KEY_LEN: usize = 128;

fn component_from_row(row: &Row<'_>) -> rusqlite::Result<PageComponent> {
    Ok(PageComponent {
        id: row.get(0)?,
        page_id: get_uuid(row, 1)?,
        key: row.get(2)?,
        component_type: row.get(3)?,
        parent_key: row.get(4)?,
        sort_order: row.get(5)?,
        placement: GridPlacement {
            column: row.get(6)?,
            column_span: row.get(7)?,
            row: row.get(8)?,
            row_span: row.get(9)?,
        },
        documents: ComponentDocuments {
            properties: get_json(row, 10)?,
            styles: get_json(row, 11)?,
            content: get_json(row, 12)?,
            settings: get_json(row, 13)?,
            responsive_settings: get_json(row, 14)?,
            animation_settings: get_json(row, 15)?,
            interaction_settings: get_json(row, 16)?,
        },
        is_visible: row.get::<_, i32>(17)? != 0,
        is_locked: row.get::<_, i32>(18)? != 0,
        created_by: row.get(19)?,
        updated_by: row.get(20)?,
        created_at: get_datetime(row, 21)?,
        updated_at: get_datetime(row, 22)?,
        deleted_at: get_opt_datetime(row, 23)?,
        deleted_by: row.get(24)?,
    })
}

/// A fresh key for a component of the given type, e.g. `hero-3f9c0a1b2d4e`.
pub fn generate_key(component_type: &str) -> String {
    let prefix: String = component_type
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .take(32)
        .collect();
    let prefix = prefix.trim_matches('-');
    let suffix = &Uuid::new_v4().simple().to_string()[..12];
    if prefix.is_empty() {
        format!("node-{suffix}")
    } else {
        format!("{prefix}-{suffix}")
    }
}

fn validate_key(key: &str) -> Result<()> {
    let well_formed = !key.is_empty()
        && key.len() <= MAX_KEY_LEN
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'));
    if well_formed {
        Ok(())
    } else {
        Err(PageError::Invalid(format!(
            "component key '{key}' must be 1-{MAX_KEY_LEN} characters of [A-Za-z0-9-_.:]"
        )))
    }
}

/// Every row of the page, live or soft-deleted, in insertion order.
pub(crate) fn all_rows(conn: &Connection, page_id: Uuid) -> Result<Vec<PageComponent>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COMPONENT_COLUMNS} FROM page_components WHERE page_id = ? ORDER BY id"
    ))?;
    let rows = stmt
        .query_map([page_id.to_string()], component_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub(crate) fn live_nodes(conn: &Connection, page_id: Uuid) -> Result<Vec<PageComponent>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COMPONENT_COLUMNS} FROM page_components
         WHERE page_id = ? AND deleted_at IS NULL
         ORDER BY sort_order, id"
    ))?;
    let rows = stmt
        .query_map([page_id.to_string()], component_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub(crate) fn live_tree(conn: &Connection, page_id: Uuid) -> Result<Assembly<PageComponent>> {
    Ok(tree::assemble(live_nodes(conn, page_id)?))
}

fn find_row(conn: &Connection, page_id: Uuid, key: &str) -> Result<Option<PageComponent>> {
    let row = conn
        .query_row(
            &format!("SELECT {COMPONENT_COLUMNS} FROM page_components WHERE page_id = ? AND key = ?"),
            (page_id.to_string(), key),
            component_from_row,
        )
        .optional()?;
    Ok(row)
}

pub(crate) fn require_live(conn: &Connection, page_id: Uuid, key: &str) -> Result<PageComponent> {
    match find_row(conn, page_id, key)? {
        Some(node) if !node.is_deleted() => Ok(node),
        _ => Err(PageError::not_found("component", key)),
    }
}

fn live_siblings(
    conn: &Connection,
    page_id: Uuid,
    parent_key: Option<&str>,
    exclude: Option<&str>,
) -> Result<Vec<Sibling>> {
    let mut stmt = conn.prepare(
        "SELECT key, sort_order FROM page_components
         WHERE page_id = ? AND parent_key IS ? AND deleted_at IS NULL
         ORDER BY sort_order, id",
    )?;
    let siblings = stmt
        .query_map((page_id.to_string(), parent_key), |row| {
            Ok(Sibling {
                key: row.get(0)?,
                sort_order: row.get(1)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(siblings
        .into_iter()
        .filter(|s| Some(s.key.as_str()) != exclude)
        .collect())
}

fn has_live_children(conn: &Connection, page_id: Uuid, key: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM page_components
         WHERE page_id = ? AND parent_key = ? AND deleted_at IS NULL",
        (page_id.to_string(), key),
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Slot a node among `siblings` and persist any respacing the slot required.
fn place(
    conn: &Connection,
    page_id: Uuid,
    siblings: &[Sibling],
    position: Position,
    actor: &str,
    now: DateTime<Utc>,
) -> Result<i64> {
    let plan = grid::plan_position(siblings, position);
    if !plan.renumbered.is_empty() {
        tracing::debug!(
            page_id = %page_id,
            count = plan.renumbered.len(),
            "Respacing siblings after order collision"
        );
    }
    for (key, order) in &plan.renumbered {
        conn.execute(
            "UPDATE page_components SET sort_order = ?, updated_by = ?, updated_at = ?
             WHERE page_id = ? AND key = ?",
            (order, actor, now.to_rfc3339(), page_id.to_string(), key),
        )?;
    }
    Ok(plan.order)
}

/// Reject a reparent that would put `moved` below itself.
///
/// Walks the ancestor chain of the target parent; if the moved node appears
/// on it, the move would create a cycle.
fn ensure_not_descendant(conn: &Connection, page_id: Uuid, moved: &str, target_parent: &str) -> Result<()> {
    let mut current = Some(target_parent.to_string());
    let mut seen = HashSet::new();
    while let Some(key) = current {
        if key == moved {
            return Err(PageError::Conflict(format!(
                "cannot move '{moved}' under '{target_parent}': it would become its own descendant"
            )));
        }
        if !seen.insert(key.clone()) {
            return Err(PageError::IntegrityViolation(format!(
                "component ancestry above '{target_parent}' contains a cycle"
            )));
        }
        current = conn
            .query_row(
                "SELECT parent_key FROM page_components WHERE page_id = ? AND key = ?",
                (page_id.to_string(), &key),
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?
            .flatten();
    }
    Ok(())
}

/// Keys of `root` and everything below it in pre-order.
fn subtree_keys(rows: &[PageComponent], root: &str, live_only: bool) -> Vec<String> {
    let mut children: HashMap<&str, Vec<&PageComponent>> = HashMap::new();
    for row in rows {
        if live_only && row.is_deleted() {
            continue;
        }
        if let Some(parent) = row.parent_key.as_deref() {
            children.entry(parent).or_default().push(row);
        }
    }
    for kids in children.values_mut() {
        kids.sort_by_key(|k| (k.sort_order, k.id));
    }

    let mut out = Vec::new();
    let mut seen = HashSet::new();
    let mut stack = vec![root];
    while let Some(key) = stack.pop() {
        if !seen.insert(key) {
            continue;
        }
        out.push(key.to_string());
        if let Some(kids) = children.get(key) {
            stack.extend(kids.iter().rev().map(|k| k.key.as_str()));
        }
    }
    out
}

pub(crate) fn soft_delete_keys(
    conn: &Connection,
    page_id: Uuid,
    keys: &[String],
    actor: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    for key in keys {
        conn.execute(
            "UPDATE page_components SET deleted_at = ?, deleted_by = ?, updated_at = ?, updated_by = ?
             WHERE page_id = ? AND key = ? AND deleted_at IS NULL",
            (now.to_rfc3339(), actor, now.to_rfc3339(), actor, page_id.to_string(), key),
        )?;
    }
    Ok(())
}

/// Whether `key` belongs to a stored row or to one that was removed for good.
fn key_taken(conn: &Connection, page_id: Uuid, key: &str) -> Result<bool> {
    if find_row(conn, page_id, key)?.is_some() {
        return Ok(true);
    }
    let retired: i64 = conn.query_row(
        "SELECT COUNT(*) FROM retired_component_keys WHERE page_id = ? AND key = ?",
        (page_id.to_string(), key),
        |row| row.get(0),
    )?;
    Ok(retired > 0)
}

/// Physically remove one row and keep its key out of circulation.
fn remove_row(conn: &Connection, page_id: Uuid, key: &str) -> Result<()> {
    conn.execute(
        "DELETE FROM page_components WHERE page_id = ? AND key = ?",
        (page_id.to_string(), key),
    )?;
    conn.execute(
        "INSERT OR IGNORE INTO retired_component_keys (page_id, key, retired_at) VALUES (?, ?, ?)",
        (page_id.to_string(), key, Utc::now().to_rfc3339()),
    )?;
    Ok(())
}

pub(crate) fn create(
    conn: &Connection,
    collab: &Collaborators,
    page_id: Uuid,
    input: CreateComponentInput,
) -> Result<PageComponent> {
    require_live_page(conn, page_id)?;

    let component_type = input.component_type.trim().to_string();
    if component_type.is_empty() {
        return Err(PageError::Invalid("component type must not be empty".to_string()));
    }
    let template = collab.templates.template(&component_type).ok_or_else(|| {
        PageError::Invalid(format!("unknown component type '{component_type}'"))
    })?;

    let key = match input.key {
        Some(key) => {
            validate_key(&key)?;
            if key_taken(conn, page_id, &key)? {
                return Err(PageError::Conflict(format!(
                    "component key '{key}' is already used on this page"
                )));
            }
            key
        }
        None => loop {
            let candidate = generate_key(&component_type);
            if !key_taken(conn, page_id, &candidate)? {
                break candidate;
            }
        },
    };

    if let Some(parent_key) = input.parent_key.as_deref() {
        require_live(conn, page_id, parent_key)?;
    }

    let placement = input.placement.unwrap_or_default();
    grid::validate_placement(&placement)?;

    let mut documents = input.documents.unwrap_or_default();
    template.apply_defaults(&mut documents);

    let actor = collab.identity.current_user();
    let now = Utc::now();
    let siblings = live_siblings(conn, page_id, input.parent_key.as_deref(), None)?;
    let sort_order = place(
        conn,
        page_id,
        &siblings,
        input.position.unwrap_or_default(),
        &actor,
        now,
    )?;

    let mut node = PageComponent {
        id: 0,
        page_id,
        key,
        component_type,
        parent_key: input.parent_key,
        sort_order,
        placement,
        documents,
        is_visible: input.is_visible.unwrap_or(true),
        is_locked: input.is_locked.unwrap_or(false),
        created_by: actor.clone(),
        updated_by: actor,
        created_at: now,
        updated_at: now,
        deleted_at: None,
        deleted_by: None,
    };
    node.id = insert_row(conn, &node)?;
    touch_page(conn, page_id, &node.created_by)?;
    tracing::debug!(
        page_id = %page_id,
        key = %node.key,
        component_type = %node.component_type,
        "Created component"
    );

    Ok(node)
}

/// Insert a live row for `node` and return its storage id.
pub(crate) fn insert_row(conn: &Connection, node: &PageComponent) -> Result<i64> {
    conn.execute(
        "INSERT INTO page_components (page_id, key, component_type, parent_key, sort_order,
             grid_column, column_span, grid_row, row_span,
             properties, styles, content, settings, responsive_settings, animation_settings, interaction_settings,
             is_visible, is_locked, created_by, updated_by, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            node.page_id.to_string(),
            &node.key,
            &node.component_type,
            &node.parent_key,
            node.sort_order,
            node.placement.column,
            node.placement.column_span,
            node.placement.row,
            node.placement.row_span,
            serde_json::to_string(&node.documents.properties)?,
            serde_json::to_string(&node.documents.styles)?,
            serde_json::to_string(&node.documents.content)?,
            serde_json::to_string(&node.documents.settings)?,
            serde_json::to_string(&node.documents.responsive_settings)?,
            serde_json::to_string(&node.documents.animation_settings)?,
            serde_json::to_string(&node.documents.interaction_settings)?,
            node.is_visible as i32,
            node.is_locked as i32,
            &node.created_by,
            &node.updated_by,
            node.created_at.to_rfc3339(),
            node.updated_at.to_rfc3339(),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub(crate) fn update(
    conn: &Connection,
    collab: &Collaborators,
    page_id: Uuid,
    key: &str,
    input: UpdateComponentInput,
) -> Result<PageComponent> {
    require_live_page(conn, page_id)?;
    let mut node = require_live(conn, page_id, key)?;

    if let Some(placement) = input.placement {
        grid::validate_placement(&placement)?;
        node.placement = placement;
    }
    let documents = &mut node.documents;
    for (slot, value) in [
        (&mut documents.properties, input.properties),
        (&mut documents.styles, input.styles),
        (&mut documents.content, input.content),
        (&mut documents.settings, input.settings),
        (&mut documents.responsive_settings, input.responsive_settings),
        (&mut documents.animation_settings, input.animation_settings),
        (&mut documents.interaction_settings, input.interaction_settings),
    ] {
        if let Some(value) = value {
            *slot = value;
        }
    }
    if let Some(is_visible) = input.is_visible {
        node.is_visible = is_visible;
    }
    if let Some(is_locked) = input.is_locked {
        node.is_locked = is_locked;
    }

    node.updated_by = collab.identity.current_user();
    node.updated_at = Utc::now();
    write_fields(conn, &node)?;
    touch_page(conn, page_id, &node.updated_by)?;
    tracing::debug!(page_id = %page_id, key = %key, "Updated component");

    Ok(node)
}

/// Persist every mutable field of `node` onto its row, clearing any
/// soft-delete marker.
pub(crate) fn write_fields(conn: &Connection, node: &PageComponent) -> Result<()> {
    conn.execute(
        "UPDATE page_components SET component_type = ?, parent_key = ?, sort_order = ?,
             grid_column = ?, column_span = ?, grid_row = ?, row_span = ?,
             properties = ?, styles = ?, content = ?, settings = ?,
             responsive_settings = ?, animation_settings = ?, interaction_settings = ?,
             is_visible = ?, is_locked = ?, updated_by = ?, updated_at = ?,
             deleted_at = NULL, deleted_by = NULL
         WHERE id = ?",
        params![
            &node.component_type,
            &node.parent_key,
            node.sort_order,
            node.placement.column,
            node.placement.column_span,
            node.placement.row,
            node.placement.row_span,
            serde_json::to_string(&node.documents.properties)?,
            serde_json::to_string(&node.documents.styles)?,
            serde_json::to_string(&node.documents.content)?,
            serde_json::to_string(&node.documents.settings)?,
            serde_json::to_string(&node.documents.responsive_settings)?,
            serde_json::to_string(&node.documents.animation_settings)?,
            serde_json::to_string(&node.documents.interaction_settings)?,
            node.is_visible as i32,
            node.is_locked as i32,
            &node.updated_by,
            node.updated_at.to_rfc3339(),
            node.id,
        ],
    )?;
    Ok(())
}

pub(crate) fn move_to(
    conn: &Connection,
    collab: &Collaborators,
    page_id: Uuid,
    key: &str,
    input: MoveComponentInput,
) -> Result<PageComponent> {
    require_live_page(conn, page_id)?;
    let mut node = require_live(conn, page_id, key)?;
    if node.is_locked {
        return Err(PageError::Locked(format!("component '{key}' is locked")));
    }

    if let Some(parent_key) = input.parent_key.as_deref() {
        if parent_key == key {
            return Err(PageError::Conflict(format!(
                "cannot move '{key}' under itself"
            )));
        }
        require_live(conn, page_id, parent_key)?;
        ensure_not_descendant(conn, page_id, key, parent_key)?;
    }

    let actor = collab.identity.current_user();
    let now = Utc::now();
    let siblings = live_siblings(conn, page_id, input.parent_key.as_deref(), Some(key))?;
    node.sort_order = place(conn, page_id, &siblings, input.position, &actor, now)?;
    node.parent_key = input.parent_key;
    node.updated_by = actor;
    node.updated_at = now;

    conn.execute(
        "UPDATE page_components SET parent_key = ?, sort_order = ?, updated_by = ?, updated_at = ?
         WHERE id = ?",
        (
            &node.parent_key,
            node.sort_order,
            &node.updated_by,
            now.to_rfc3339(),
            node.id,
        ),
    )?;
    touch_page(conn, page_id, &node.updated_by)?;
    tracing::debug!(
        page_id = %page_id,
        key = %key,
        parent_key = ?node.parent_key,
        sort_order = node.sort_order,
        "Moved component"
    );

    Ok(node)
}

/// Soft-delete one node that has no live children.
pub(crate) fn delete_one(
    conn: &Connection,
    collab: &Collaborators,
    page_id: Uuid,
    key: &str,
) -> Result<()> {
    require_live_page(conn, page_id)?;
    let node = require_live(conn, page_id, key)?;
    if node.is_locked {
        return Err(PageError::Locked(format!("component '{key}' is locked")));
    }
    if has_live_children(conn, page_id, key)? {
        return Err(PageError::IntegrityViolation(format!(
            "component '{key}' still has live children; delete or move them first, or delete the subtree"
        )));
    }

    let actor = collab.identity.current_user();
    soft_delete_keys(conn, page_id, &[node.key], &actor, Utc::now())?;
    touch_page(conn, page_id, &actor)?;
    tracing::debug!(page_id = %page_id, key = %key, "Soft-deleted component");
    Ok(())
}

/// Delete `key` and everything below it. Returns the affected keys in
/// pre-order.
pub(crate) fn delete_subtree(
    conn: &Connection,
    collab: &Collaborators,
    page_id: Uuid,
    key: &str,
    hard: bool,
) -> Result<Vec<String>> {
    require_live_page(conn, page_id)?;
    let rows = all_rows(conn, page_id)?;
    let by_key: HashMap<&str, &PageComponent> = rows.iter().map(|r| (r.key.as_str(), r)).collect();

    let root = by_key
        .get(key)
        .filter(|node| hard || !node.is_deleted())
        .ok_or_else(|| PageError::not_found("component", key))?;

    let keys = subtree_keys(&rows, &root.key, !hard);
    let locked: Vec<&str> = keys
        .iter()
        .filter_map(|k| by_key.get(k.as_str()))
        .filter(|n| n.is_locked && !n.is_deleted())
        .map(|n| n.key.as_str())
        .collect();
    if !locked.is_empty() {
        return Err(PageError::Locked(format!(
            "subtree of '{key}' contains locked components: {}",
            locked.join(", ")
        )));
    }

    let actor = collab.identity.current_user();
    if hard {
        let referenced = versions::referenced_keys(conn, page_id)?;
        let pinned: Vec<&str> = keys
            .iter()
            .filter(|k| referenced.contains(k.as_str()))
            .map(String::as_str)
            .collect();
        if !pinned.is_empty() {
            return Err(PageError::IntegrityViolation(format!(
                "components still referenced by stored versions: {}",
                pinned.join(", ")
            )));
        }
        // Children first, so no row is removed while something points at it.
        for k in keys.iter().rev() {
            remove_row(conn, page_id, k)?;
        }
        tracing::info!(page_id = %page_id, key = %key, count = keys.len(), "Purged component subtree");
    } else {
        soft_delete_keys(conn, page_id, &keys, &actor, Utc::now())?;
        tracing::debug!(page_id = %page_id, key = %key, count = keys.len(), "Soft-deleted component subtree");
    }
    touch_page(conn, page_id, &actor)?;

    Ok(keys)
}

/// Physically remove soft-deleted components that no stored version refers
/// to and that have nothing left below them. Returns how many rows went.
pub(crate) fn purge_unreferenced(conn: &Connection, page_id: Uuid) -> Result<usize> {
    let rows = all_rows(conn, page_id)?;
    let referenced = versions::referenced_keys(conn, page_id)?;

    let mut remaining_children: HashMap<&str, usize> = HashMap::new();
    for row in &rows {
        if let Some(parent) = row.parent_key.as_deref() {
            *remaining_children.entry(parent).or_default() += 1;
        }
    }

    // Deepest rows first: walk the full assembly in reverse pre-order.
    let ordered = tree::flatten(&tree::assemble(rows.clone()).forest);
    let mut purged = 0;
    for row in ordered.into_iter().rev() {
        let removable = row.is_deleted()
            && !referenced.contains(&row.key)
            && remaining_children.get(row.key.as_str()).copied().unwrap_or(0) == 0;
        if !removable {
            continue;
        }
        remove_row(conn, page_id, &row.key)?;
        if let Some(parent) = row.parent_key.as_deref() {
            if let Some(count) = remaining_children.get_mut(parent) {
                *count -= 1;
            }
        }
        purged += 1;
    }
    Ok(purged)
}

impl Database {
    // ============================================================
    // Component operations
    // ============================================================

    pub fn create_node(&self, page_id: Uuid, input: CreateComponentInput) -> Result<PageComponent> {
        self.write(|conn, collab| create(conn, collab, page_id, input))
    }

    /// Fetch a live component by key.
    pub fn get_node(&self, page_id: Uuid, key: &str) -> Result<Option<PageComponent>> {
        self.read(|conn| Ok(find_row(conn, page_id, key)?.filter(|n| !n.is_deleted())))
    }

    pub fn update_node(
        &self,
        page_id: Uuid,
        key: &str,
        input: UpdateComponentInput,
    ) -> Result<PageComponent> {
        self.write(|conn, collab| update(conn, collab, page_id, key, input))
    }

    pub fn move_node(
        &self,
        page_id: Uuid,
        key: &str,
        input: MoveComponentInput,
    ) -> Result<PageComponent> {
        self.write(|conn, collab| move_to(conn, collab, page_id, key, input))
    }

    /// Soft-delete a single component. Refused while it has live children.
    pub fn delete_node(&self, page_id: Uuid, key: &str) -> Result<()> {
        self.write(|conn, collab| delete_one(conn, collab, page_id, key))
    }

    /// Delete a component together with its whole subtree.
    ///
    /// With `hard = false` every live node of the subtree is soft-deleted in
    /// one transaction. With `hard = true` the rows are physically removed,
    /// which is refused while any stored version still refers to them.
    pub fn delete_subtree(&self, page_id: Uuid, key: &str, hard: bool) -> Result<Vec<String>> {
        self.write(|conn, collab| delete_subtree(conn, collab, page_id, key, hard))
    }

    /// Live components of a page in pre-order: each root followed by its
    /// subtree, siblings by `(sort_order, insertion)`.
    pub fn list_nodes(&self, page_id: Uuid) -> Result<Vec<PageComponent>> {
        let assembly = self.get_tree(page_id)?;
        Ok(tree::flatten(&assembly.forest))
    }

    pub fn get_tree(&self, page_id: Uuid) -> Result<Assembly<PageComponent>> {
        self.read(|conn| {
            require_live_page(conn, page_id)?;
            live_tree(conn, page_id)
        })
    }
}
