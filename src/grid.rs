//! Grid placement validation and sibling ordering policy.
//!
//! Placement bounds are the only thing checked here. Overlapping sibling
//! placements are allowed; visual precedence belongs to the renderer.
//!
//! Sibling order is a sparse integer `sort_order`. Positioning a node between
//! two neighbours gives it the midpoint of their orders, so only that node is
//! written. The whole sibling set is respaced only when the neighbours are
//! adjacent integers and nothing fits between them.

use crate::error::{PageError, Result};
use crate::models::{GridPlacement, Position};

/// Spacing used for appends and for full renumbering passes.
pub const ORDER_STEP: i64 = 1024;

pub fn validate_placement(placement: &GridPlacement) -> Result<()> {
    if placement.column < 0 {
        return Err(PageError::Invalid(format!(
            "column must be >= 0, got {}",
            placement.column
        )));
    }
    if placement.row < 0 {
        return Err(PageError::Invalid(format!(
            "row must be >= 0, got {}",
            placement.row
        )));
    }
    if placement.column_span < 1 {
        return Err(PageError::Invalid(format!(
            "column_span must be >= 1, got {}",
            placement.column_span
        )));
    }
    if placement.row_span < 1 {
        return Err(PageError::Invalid(format!(
            "row_span must be >= 1, got {}",
            placement.row_span
        )));
    }
    Ok(())
}

/// A sibling as seen by the ordering policy, already in display order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sibling {
    pub key: String,
    pub sort_order: i64,
}

/// The order chosen for a positioned node, plus any siblings that had to be
/// respaced to make room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderPlan {
    pub order: i64,
    pub renumbered: Vec<(String, i64)>,
}

impl OrderPlan {
    fn single(order: i64) -> Self {
        Self {
            order,
            renumbered: Vec::new(),
        }
    }
}

/// The integer order that sits strictly between two neighbours, or past the
/// end when one side is open. `None` when the neighbours collide.
pub fn slot_between(prev: Option<i64>, next: Option<i64>) -> Option<i64> {
    match (prev, next) {
        (None, None) => Some(0),
        (Some(prev), None) => prev.checked_add(ORDER_STEP),
        (None, Some(next)) => next.checked_sub(ORDER_STEP),
        (Some(prev), Some(next)) => {
            let gap = i128::from(next) - i128::from(prev);
            if gap < 2 {
                return None;
            }
            i64::try_from(i128::from(prev) + gap / 2).ok()
        }
    }
}

/// Choose an order for a node landing at `position` among `siblings`.
///
/// `siblings` must be in display order and must not include the node being
/// positioned.
pub fn plan_position(siblings: &[Sibling], position: Position) -> OrderPlan {
    match position {
        Position::End => plan_insert(siblings, siblings.len()),
        Position::Index(index) => plan_insert(siblings, index.min(siblings.len())),
        Position::Order(order) => OrderPlan::single(order),
    }
}

fn plan_insert(siblings: &[Sibling], index: usize) -> OrderPlan {
    let prev = index
        .checked_sub(1)
        .and_then(|i| siblings.get(i))
        .map(|s| s.sort_order);
    let next = siblings.get(index).map(|s| s.sort_order);

    if let Some(order) = slot_between(prev, next) {
        return OrderPlan::single(order);
    }

    // Neighbours collide: respace everyone evenly, leaving a gap at `index`.
    let renumbered = siblings
        .iter()
        .enumerate()
        .filter_map(|(i, sibling)| {
            let slot = if i < index { i } else { i + 1 };
            let order = slot as i64 * ORDER_STEP;
            (order != sibling.sort_order).then(|| (sibling.key.clone(), order))
        })
        .collect();

    OrderPlan {
        order: index as i64 * ORDER_STEP,
        renumbered,
    }
}
