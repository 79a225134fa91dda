//! Key-addressed editing protocol for the page designer.
//!
//! A designer client loads a page's forest together with a
//! [`ConcurrencyToken`], edits locally, and pushes batches of
//! [`DesignerOp`]s back under that token. A batch commits in one transaction
//! or not at all; a stale token is rejected with `Conflict` and the client is
//! expected to reload and re-apply. There is no server-side merge.

mod session;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::{components, require_live_page, versions, Database, RestoreResult};
use crate::error::{PageError, Result};
use crate::models::*;
use crate::providers::Collaborators;
use crate::tree::TreeNode;

pub use session::DesignerSession;

/// The page's `updated_at` as last observed by a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConcurrencyToken(pub DateTime<Utc>);

impl ConcurrencyToken {
    pub fn of(page: &Page) -> Self {
        Self(page.updated_at)
    }
}

impl fmt::Display for ConcurrencyToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.to_rfc3339_opts(SecondsFormat::AutoSi, true))
    }
}

impl FromStr for ConcurrencyToken {
    type Err = PageError;

    fn from_str(s: &str) -> Result<Self> {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| Self(dt.with_timezone(&Utc)))
            .map_err(|e| PageError::Invalid(format!("malformed concurrency token '{s}': {e}")))
    }
}

/// One edit in a designer batch. Components are addressed by key only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DesignerOp {
    Create(CreateComponentInput),
    Update {
        key: String,
        #[serde(default)]
        changes: UpdateComponentInput,
    },
    Move {
        key: String,
        #[serde(default)]
        parent_key: Option<String>,
        #[serde(default)]
        position: Position,
    },
    Delete {
        key: String,
        /// Soft-delete the whole subtree instead of refusing when the node
        /// still has children.
        #[serde(default)]
        cascade: bool,
    },
}

impl DesignerOp {
    /// The key this op targets, if already known.
    pub fn key(&self) -> Option<&str> {
        match self {
            Self::Create(input) => input.key.as_deref(),
            Self::Update { key, .. } | Self::Move { key, .. } | Self::Delete { key, .. } => {
                Some(key.as_str())
            }
        }
    }
}

/// What one op did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum OpOutcome {
    Created { component: PageComponent },
    Updated { component: PageComponent },
    Moved { component: PageComponent },
    Deleted { keys: Vec<String> },
}

/// A page as the designer sees it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DesignerView {
    pub page: Page,
    pub token: ConcurrencyToken,
    pub forest: Vec<TreeNode<PageComponent>>,
    /// Keys surfaced as roots because their parent is missing.
    pub orphans: Vec<String>,
}

/// Result of a committed batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DesignerCommit {
    pub token: ConcurrencyToken,
    pub outcomes: Vec<OpOutcome>,
    pub forest: Vec<TreeNode<PageComponent>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishOutcome {
    pub token: ConcurrencyToken,
    pub version: PageVersion,
}

#[derive(Debug, Clone, Serialize)]
pub struct RestoreOutcome {
    pub token: ConcurrencyToken,
    #[serde(flatten)]
    pub result: RestoreResult,
}

/// Reject the call unless the page is still at `token`.
fn check_token(conn: &Connection, page_id: Uuid, token: ConcurrencyToken) -> Result<Page> {
    let page = require_live_page(conn, page_id)?;
    let current = ConcurrencyToken::of(&page);
    if current != token {
        tracing::warn!(
            page_id = %page_id,
            presented = %token,
            current = %current,
            "Rejected stale designer token"
        );
        return Err(PageError::Conflict(format!(
            "page {page_id} changed since token {token} (now {current}); reload and re-apply"
        )));
    }
    Ok(page)
}

fn current_token(conn: &Connection, page_id: Uuid) -> Result<ConcurrencyToken> {
    Ok(ConcurrencyToken::of(&require_live_page(conn, page_id)?))
}

fn apply_op(conn: &Connection, collab: &Collaborators, page_id: Uuid, op: DesignerOp) -> Result<OpOutcome> {
    let outcome = match op {
        DesignerOp::Create(input) => OpOutcome::Created {
            component: components::create(conn, collab, page_id, input)?,
        },
        DesignerOp::Update { key, changes } => OpOutcome::Updated {
            component: components::update(conn, collab, page_id, &key, changes)?,
        },
        DesignerOp::Move {
            key,
            parent_key,
            position,
        } => OpOutcome::Moved {
            component: components::move_to(
                conn,
                collab,
                page_id,
                &key,
                MoveComponentInput {
                    parent_key,
                    position,
                },
            )?,
        },
        DesignerOp::Delete { key, cascade: true } => OpOutcome::Deleted {
            keys: components::delete_subtree(conn, collab, page_id, &key, false)?,
        },
        DesignerOp::Delete { key, cascade: false } => {
            components::delete_one(conn, collab, page_id, &key)?;
            OpOutcome::Deleted { keys: vec![key] }
        }
    };
    Ok(outcome)
}

/// Server side of the designer protocol.
#[derive(Clone)]
pub struct Designer {
    db: Database,
}

impl Designer {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn load(&self, page_id: Uuid) -> Result<DesignerView> {
        self.db.read(|conn| {
            let page = require_live_page(conn, page_id)?;
            let assembly = components::live_tree(conn, page_id)?;
            Ok(DesignerView {
                token: ConcurrencyToken::of(&page),
                page,
                forest: assembly.forest,
                orphans: assembly.orphans,
            })
        })
    }

    /// Apply `ops` in order under `token`.
    ///
    /// Either every op commits and the token advances, or nothing changes.
    /// An empty batch only validates the token.
    pub fn apply(&self, page_id: Uuid, token: ConcurrencyToken, ops: Vec<DesignerOp>) -> Result<DesignerCommit> {
        let count = ops.len();
        let commit = self.db.write(|conn, collab| {
            check_token(conn, page_id, token)?;
            let outcomes = ops
                .into_iter()
                .map(|op| apply_op(conn, collab, page_id, op))
                .collect::<Result<Vec<_>>>()?;
            Ok(DesignerCommit {
                token: current_token(conn, page_id)?,
                outcomes,
                forest: components::live_tree(conn, page_id)?.forest,
            })
        })?;
        tracing::debug!(page_id = %page_id, ops = count, token = %commit.token, "Applied designer batch");
        Ok(commit)
    }

    /// Run `f` in one write transaction after checking `token`, returning the
    /// page's next token with `f`'s result.
    fn guarded<T>(
        &self,
        page_id: Uuid,
        token: ConcurrencyToken,
        f: impl FnOnce(&Connection, &Collaborators) -> Result<T>,
    ) -> Result<(ConcurrencyToken, T)> {
        self.db.write(|conn, collab| {
            check_token(conn, page_id, token)?;
            let out = f(conn, collab)?;
            Ok((current_token(conn, page_id)?, out))
        })
    }

    /// Apply a single op under `token`.
    pub fn apply_one(&self, page_id: Uuid, token: ConcurrencyToken, op: DesignerOp) -> Result<(ConcurrencyToken, OpOutcome)> {
        let key = op.key().map(str::to_string);
        let (next, outcome) = self.guarded(page_id, token, |conn, collab| apply_op(conn, collab, page_id, op))?;
        tracing::debug!(page_id = %page_id, key = ?key, token = %next, "Applied designer op");
        Ok((next, outcome))
    }

    /// Physically remove the subtree under `key`, guarded by `token`.
    pub fn purge_subtree(&self, page_id: Uuid, token: ConcurrencyToken, key: &str) -> Result<(ConcurrencyToken, Vec<String>)> {
        self.guarded(page_id, token, |conn, collab| {
            components::delete_subtree(conn, collab, page_id, key, true)
        })
    }

    /// Snapshot the current forest as a published version.
    pub fn publish(&self, page_id: Uuid, token: ConcurrencyToken, notes: Option<String>) -> Result<PublishOutcome> {
        self.db.write(|conn, collab| {
            check_token(conn, page_id, token)?;
            let version = versions::take_snapshot(
                conn,
                collab,
                page_id,
                CreateSnapshotInput {
                    notes,
                    publish: true,
                },
            )?;
            Ok(PublishOutcome {
                token: current_token(conn, page_id)?,
                version,
            })
        })
    }

    pub fn restore(&self, page_id: Uuid, token: ConcurrencyToken, version: i64) -> Result<RestoreOutcome> {
        self.db.write(|conn, collab| {
            check_token(conn, page_id, token)?;
            let result = versions::restore_version(conn, collab, page_id, version)?;
            Ok(RestoreOutcome {
                token: current_token(conn, page_id)?,
                result,
            })
        })
    }
}
