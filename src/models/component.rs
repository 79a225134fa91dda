use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// One positioned element of a page's content tree.
///
/// Components are stored as a flat arena: `parent_key` is a back-reference to
/// another component of the *same* page, never an owning link. The `key` is
/// assigned once at creation and survives saves, versions and restores; the
/// numeric `id` is storage-assigned and also serves as the insertion sequence
/// that breaks `sort_order` ties between siblings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageComponent {
    pub id: i64,
    pub page_id: Uuid,
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
    /// Locked components reject structural edits (move, reparent, delete)
    /// but still accept document and placement updates.
    pub is_locked: bool,
    pub created_by: String,
    pub updated_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleted_by: Option<String>,
}

impl PageComponent {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Grid placement of a component within its parent.
///
/// Sibling placements may overlap; which one wins visually is left to the
/// renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridPlacement {
    pub column: i32,
    pub column_span: i32,
    pub row: i32,
    pub row_span: i32,
}

impl Default for GridPlacement {
    fn default() -> Self {
        Self {
            column: 0,
            column_span: 1,
            row: 0,
            row_span: 1,
        }
    }
}

/// The free-form documents carried by every component.
///
/// Their shape is defined by the component's template; the core stores and
/// versions them without interpreting them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentDocuments {
    #[serde(default = "empty_document")]
    pub properties: Value,
    #[serde(default = "empty_document")]
    pub styles: Value,
    #[serde(default = "empty_document")]
    pub content: Value,
    #[serde(default = "empty_document")]
    pub settings: Value,
    #[serde(default = "empty_document")]
    pub responsive_settings: Value,
    #[serde(default = "empty_document")]
    pub animation_settings: Value,
    #[serde(default = "empty_document")]
    pub interaction_settings: Value,
}

impl Default for ComponentDocuments {
    fn default() -> Self {
        Self {
            properties: empty_document(),
            styles: empty_document(),
            content: empty_document(),
            settings: empty_document(),
            responsive_settings: empty_document(),
            animation_settings: empty_document(),
            interaction_settings: empty_document(),
        }
    }
}

pub fn empty_document() -> Value {
    Value::Object(serde_json::Map::new())
}

/// Where a component lands among its new siblings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum Position {
    /// After the last sibling.
    #[default]
    End,
    /// At this index of the sibling list (excluding the node itself).
    /// Only the positioned node is renumbered unless neighbours collide.
    Index(usize),
    /// Use this exact `sort_order`. Ties break by insertion sequence.
    Order(i64),
}

/// Input for creating a component.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreateComponentInput {
    /// Client-assigned key for components created before their first save.
    /// A fresh key is generated when omitted.
    #[serde(default)]
    pub key: Option<String>,
    #[serde(rename = "type")]
    pub component_type: String,
    /// Parent component. `None` creates a root component.
    #[serde(default)]
    pub parent_key: Option<String>,
    #[serde(default)]
    pub placement: Option<GridPlacement>,
    #[serde(default)]
    pub position: Option<Position>,
    /// Documents supplied by the caller. Template defaults fill whatever
    /// top-level fields these leave out.
    #[serde(default)]
    pub documents: Option<ComponentDocuments>,
    #[serde(default)]
    pub is_visible: Option<bool>,
    #[serde(default)]
    pub is_locked: Option<bool>,
}

impl CreateComponentInput {
    pub fn new(component_type: impl Into<String>) -> Self {
        Self {
            component_type: component_type.into(),
            ..Self::default()
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn under(mut self, parent_key: impl Into<String>) -> Self {
        self.parent_key = Some(parent_key.into());
        self
    }

    pub fn at(mut self, position: Position) -> Self {
        self.position = Some(position);
        self
    }

    pub fn placed(mut self, placement: GridPlacement) -> Self {
        self.placement = Some(placement);
        self
    }
}

/// Input for updating a component's non-structural fields.
///
/// Each supplied document replaces the stored one wholesale. Parent and order
/// are changed through [`MoveComponentInput`] instead.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateComponentInput {
    pub placement: Option<GridPlacement>,
    pub properties: Option<Value>,
    pub styles: Option<Value>,
    pub content: Option<Value>,
    pub settings: Option<Value>,
    pub responsive_settings: Option<Value>,
    pub animation_settings: Option<Value>,
    pub interaction_settings: Option<Value>,
    pub is_visible: Option<bool>,
    pub is_locked: Option<bool>,
}

impl UpdateComponentInput {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Input for moving a component to a new parent and/or sibling slot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MoveComponentInput {
    /// New parent. `None` moves the component to the root level.
    #[serde(default)]
    pub parent_key: Option<String>,
    #[serde(default)]
    pub position: Position,
}
