use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A page whose content is a forest of [`super::PageComponent`]s.
///
/// `updated_at` doubles as the page's concurrency token: every write to the
/// page or to any of its components advances it, and designer calls must
/// present the value they last observed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub id: Uuid,
    /// Parent page in the site hierarchy. Unrelated to component nesting.
    pub parent_id: Option<Uuid>,
    pub title: String,
    pub slug: String,
    pub status: PageStatus,
    pub published_at: Option<DateTime<Utc>>,
    pub published_by: Option<String>,
    pub created_by: String,
    pub updated_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleted_by: Option<String>,
}

impl Page {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// The lifecycle status of a page.
///
/// - `Draft`: Being edited, never published
/// - `Published`: At least one version has been published
/// - `Archived`: Retired from navigation but kept with its history
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PageStatus {
    #[default]
    Draft,
    Published,
    Archived,
}

impl PageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Published => "published",
            Self::Archived => "archived",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(Self::Draft),
            "published" => Some(Self::Published),
            "archived" => Some(Self::Archived),
            _ => None,
        }
    }
}

/// Input for creating a new page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePageInput {
    pub title: String,
    /// URL slug. Derived from the title when omitted.
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub parent_id: Option<Uuid>,
}

/// Input for updating page metadata. All fields are optional for partial updates.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdatePageInput {
    pub title: Option<String>,
    pub slug: Option<String>,
    pub status: Option<PageStatus>,
    /// Move the page under a different parent page.
    pub parent_id: Option<Uuid>,
    /// Detach the page from its parent, making it top-level.
    #[serde(default)]
    pub clear_parent: bool,
}
