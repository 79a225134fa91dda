use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use rusqlite::{Connection, OptionalExtension, Row};
use uuid::Uuid;

use super::{get_datetime, get_opt_datetime, get_opt_uuid, get_uuid, Database};
use crate::error::{PageError, Result};
use crate::models::*;

const PAGE_COLUMNS: &str = "id, parent_id, title, slug, status, published_at, published_by, \
     created_by, updated_by, created_at, updated_at, deleted_at, deleted_by";

const MAX_SLUG_LEN: usize = 200;

fn page_from_row(row: &Row<'_>) -> rusqlite::Result<Page> {
    Ok(Page {
        id: get_uuid(row, 0)?,
        parent_id: get_opt_uuid(row, 1)?,
        title: row.get(2)?,
        slug: row.get(3)?,
        status: PageStatus::from_str(&row.get::<_, String>(4)?).unwrap_or_default(),
        published_at: get_opt_datetime(row, 5)?,
        published_by: row.get(6)?,
        created_by: row.get(7)?,
        updated_by: row.get(8)?,
        created_at: get_datetime(row, 9)?,
        updated_at: get_datetime(row, 10)?,
        deleted_at: get_opt_datetime(row, 11)?,
        deleted_by: row.get(12)?,
    })
}

pub(crate) fn find_page(conn: &Connection, id: Uuid) -> Result<Option<Page>> {
    let page = conn
        .query_row(
            &format!("SELECT {PAGE_COLUMNS} FROM pages WHERE id = ?"),
            [id.to_string()],
            page_from_row,
        )
        .optional()?;
    Ok(page)
}

/// Load a page that exists and is not soft-deleted.
pub(crate) fn require_live_page(conn: &Connection, id: Uuid) -> Result<Page> {
    match find_page(conn, id)? {
        Some(page) if !page.is_deleted() => Ok(page),
        _ => Err(PageError::not_found("page", id)),
    }
}

/// The next concurrency token after `previous`.
///
/// Tokens must strictly increase even when two writes land in the same clock
/// tick, otherwise a stale writer could present a token that still matches.
pub(crate) fn next_token(previous: DateTime<Utc>) -> DateTime<Utc> {
    let now = Utc::now();
    let floor = previous + Duration::microseconds(1);
    now.max(floor)
}

/// Advance the page's concurrency token and record who touched it.
pub(crate) fn touch_page(conn: &Connection, page_id: Uuid, actor: &str) -> Result<DateTime<Utc>> {
    let page = require_live_page(conn, page_id)?;
    let token = next_token(page.updated_at);
    conn.execute(
        "UPDATE pages SET updated_at = ?, updated_by = ? WHERE id = ?",
        (token.to_rfc3339(), actor, page_id.to_string()),
    )?;
    Ok(token)
}

/// Turn a title into a slug: lowercase ASCII words joined by single hyphens.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

fn validate_slug(slug: &str) -> Result<()> {
    let well_formed = !slug.is_empty()
        && slug.len() <= MAX_SLUG_LEN
        && slug
            .split('-')
            .all(|word| !word.is_empty() && word.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    if well_formed {
        Ok(())
    } else {
        Err(PageError::Invalid(format!(
            "slug '{slug}' must be lowercase letters and digits separated by single hyphens"
        )))
    }
}

fn ensure_slug_free(conn: &Connection, slug: &str, except: Option<Uuid>) -> Result<()> {
    let holder: Option<String> = conn
        .query_row(
            "SELECT id FROM pages WHERE slug = ? AND deleted_at IS NULL",
            [slug],
            |row| row.get(0),
        )
        .optional()?;
    match holder {
        Some(id) if except.map_or(true, |e| e.to_string() != id) => Err(PageError::Conflict(
            format!("slug '{slug}' is already used by another page"),
        )),
        _ => Ok(()),
    }
}

/// A parent page must be live and must not sit below `page_id` already.
fn check_parent_page(conn: &Connection, page_id: Option<Uuid>, parent_id: Uuid) -> Result<()> {
    let mut current = Some(require_live_page(conn, parent_id)?);
    let mut seen = HashSet::new();
    while let Some(page) = current {
        if Some(page.id) == page_id {
            return Err(PageError::Conflict(
                "a page cannot be moved under itself or one of its descendants".to_string(),
            ));
        }
        if !seen.insert(page.id) {
            return Err(PageError::IntegrityViolation(format!(
                "page hierarchy above {parent_id} contains a cycle"
            )));
        }
        current = match page.parent_id {
            Some(id) => find_page(conn, id)?,
            None => None,
        };
    }
    Ok(())
}

impl Database {
    // ============================================================
    // Page operations
    // ============================================================

    pub fn list_pages(&self) -> Result<Vec<Page>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {PAGE_COLUMNS} FROM pages WHERE deleted_at IS NULL ORDER BY title, slug"
            ))?;
            let pages = stmt
                .query_map([], page_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(pages)
        })
    }

    /// Fetch a live page. Soft-deleted pages read as absent.
    pub fn get_page(&self, id: Uuid) -> Result<Option<Page>> {
        self.read(|conn| Ok(find_page(conn, id)?.filter(|p| !p.is_deleted())))
    }

    pub fn get_page_by_slug(&self, slug: &str) -> Result<Option<Page>> {
        self.read(|conn| {
            let page = conn
                .query_row(
                    &format!(
                        "SELECT {PAGE_COLUMNS} FROM pages WHERE slug = ? AND deleted_at IS NULL"
                    ),
                    [slug],
                    page_from_row,
                )
                .optional()?;
            Ok(page)
        })
    }

    pub fn create_page(&self, input: CreatePageInput) -> Result<Page> {
        let title = input.title.trim().to_string();
        if title.is_empty() {
            return Err(PageError::Invalid("page title must not be empty".to_string()));
        }
        let slug = input.slug.unwrap_or_else(|| slugify(&title));
        validate_slug(&slug)?;

        self.write(|conn, collab| {
            ensure_slug_free(conn, &slug, None)?;
            if let Some(parent_id) = input.parent_id {
                check_parent_page(conn, None, parent_id)?;
            }

            let id = Uuid::new_v4();
            let now = Utc::now();
            let actor = collab.identity.current_user();

            conn.execute(
                "INSERT INTO pages (id, parent_id, title, slug, status, created_by, updated_by, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
                (
                    id.to_string(),
                    input.parent_id.map(|u| u.to_string()),
                    &title,
                    &slug,
                    PageStatus::Draft.as_str(),
                    &actor,
                    &actor,
                    now.to_rfc3339(),
                    now.to_rfc3339(),
                ),
            )?;
            tracing::debug!(page_id = %id, slug = %slug, "Created page");

            Ok(Page {
                id,
                parent_id: input.parent_id,
                title,
                slug,
                status: PageStatus::Draft,
                published_at: None,
                published_by: None,
                created_by: actor.clone(),
                updated_by: actor,
                created_at: now,
                updated_at: now,
                deleted_at: None,
                deleted_by: None,
            })
        })
    }

    pub fn update_page(&self, id: Uuid, input: UpdatePageInput) -> Result<Page> {
        self.write(|conn, collab| {
            let existing = require_live_page(conn, id)?;

            let title = match input.title {
                Some(title) if title.trim().is_empty() => {
                    return Err(PageError::Invalid("page title must not be empty".to_string()));
                }
                Some(title) => title.trim().to_string(),
                None => existing.title,
            };
            let slug = match input.slug {
                Some(slug) => {
                    validate_slug(&slug)?;
                    ensure_slug_free(conn, &slug, Some(id))?;
                    slug
                }
                None => existing.slug,
            };
            let parent_id = if input.clear_parent {
                None
            } else if let Some(parent_id) = input.parent_id {
                check_parent_page(conn, Some(id), parent_id)?;
                Some(parent_id)
            } else {
                existing.parent_id
            };
            let status = input.status.unwrap_or(existing.status);
            let actor = collab.identity.current_user();

            conn.execute(
                "UPDATE pages SET parent_id = ?, title = ?, slug = ?, status = ? WHERE id = ?",
                (
                    parent_id.map(|u| u.to_string()),
                    &title,
                    &slug,
                    status.as_str(),
                    id.to_string(),
                ),
            )?;
            let token = touch_page(conn, id, &actor)?;

            Ok(Page {
                parent_id,
                title,
                slug,
                status,
                updated_by: actor,
                updated_at: token,
                ..existing
            })
        })
    }

    /// Soft-delete a page. Its components and versions are kept untouched so
    /// history stays intact.
    pub fn delete_page(&self, id: Uuid) -> Result<()> {
        self.write(|conn, collab| {
            let page = require_live_page(conn, id)?;
            let now = next_token(page.updated_at);
            let actor = collab.identity.current_user();
            conn.execute(
                "UPDATE pages SET deleted_at = ?, deleted_by = ?, updated_at = ?, updated_by = ? WHERE id = ?",
                (now.to_rfc3339(), &actor, now.to_rfc3339(), &actor, id.to_string()),
            )?;
            tracing::info!(page_id = %id, "Soft-deleted page");
            Ok(())
        })
    }

    /// Physically remove a page with its components and versions.
    ///
    /// Fails with `IntegrityViolation` while other pages still name it as
    /// their parent. Meant for retention jobs, not interactive editing.
    pub fn purge_page(&self, id: Uuid) -> Result<()> {
        self.write(|conn, _| {
            if find_page(conn, id)?.is_none() {
                return Err(PageError::not_found("page", id));
            }
            let children: i64 = conn.query_row(
                "SELECT COUNT(*) FROM pages WHERE parent_id = ?",
                [id.to_string()],
                |row| row.get(0),
            )?;
            if children > 0 {
                return Err(PageError::IntegrityViolation(format!(
                    "page {id} still has {children} child page(s)"
                )));
            }
            conn.execute("DELETE FROM pages WHERE id = ?", [id.to_string()])?;
            tracing::info!(page_id = %id, "Purged page");
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_collapses_punctuation() {
        assert_eq!(slugify("Hello, World!"), "hello-world");
        assert_eq!(slugify("  Spring   Sale 2025 "), "spring-sale-2025");
        assert_eq!(slugify("---"), "");
    }

    #[test]
    fn slug_validation() {
        assert!(validate_slug("about-us").is_ok());
        assert!(validate_slug("v2").is_ok());
        assert!(validate_slug("About").is_err());
        assert!(validate_slug("double--hyphen").is_err());
        assert!(validate_slug("-leading").is_err());
        assert!(validate_slug("").is_err());
    }

    #[test]
    fn tokens_strictly_increase() {
        let far_future = Utc::now() + Duration::days(1);
        let next = next_token(far_future);
        assert!(next > far_future);
    }
}
