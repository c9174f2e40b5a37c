//! Board ordering engine: dense position arithmetic.
//!
//! DESIGN
//! ======
//! Pure functions over ordered id lists. The board service loads the current
//! order from storage, asks this module for the new order, and writes back
//! positions `0..n-1`. Keeping the arithmetic free of I/O lets the density
//! invariant be tested exhaustively.
//!
//! INVARIANTS
//! ==========
//! - Every list produced here renumbers to exactly `{0, ..., n-1}`.
//! - Requested indices are clamped to `[0, len]`; negative means front.
//! - A move to the task's current column and index is a no-op.

use std::collections::HashSet;

use uuid::Uuid;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum OrderingError {
    #[error("column order must list each of the board's {expected} columns exactly once")]
    NotAPermutation { expected: usize },
    #[error("task {0} is not in its source column")]
    TaskNotInColumn(Uuid),
}

impl crate::protocol::ErrorCode for OrderingError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotAPermutation { .. } => "E_ORDERING_PRECONDITION",
            Self::TaskNotInColumn(_) => "E_ORDERING_CORRUPT",
        }
    }
}

/// Clamp a requested index into `[0, len]`.
#[must_use]
pub fn clamp_index(index: i64, len: usize) -> usize {
    usize::try_from(index).map_or(0, |i| i.min(len))
}

/// Position value for a list index.
#[must_use]
pub fn position_of(index: usize) -> i32 {
    i32::try_from(index).unwrap_or(i32::MAX)
}

/// Insert `id` at the clamped `index`, returning where it landed.
pub fn insert_at(order: &mut Vec<Uuid>, index: i64, id: Uuid) -> usize {
    let at = clamp_index(index, order.len());
    order.insert(at, id);
    at
}

/// `(id, position)` pairs for an ordered list.
#[must_use]
pub fn renumber(order: &[Uuid]) -> Vec<(Uuid, i32)> {
    order.iter().enumerate().map(|(i, id)| (*id, position_of(i))).collect()
}

/// True when `positions` is exactly `{0, ..., n-1}` in some order.
#[must_use]
pub fn is_dense(positions: &[i32]) -> bool {
    let mut sorted = positions.to_vec();
    sorted.sort_unstable();
    sorted.iter().enumerate().all(|(i, p)| *p == position_of(i))
}

/// Reject anything that is not a complete reordering of `current`.
///
/// # Errors
///
/// `NotAPermutation` on missing, duplicate, or foreign ids.
pub fn check_permutation(current: &[Uuid], proposed: &[Uuid]) -> Result<(), OrderingError> {
    let err = OrderingError::NotAPermutation { expected: current.len() };
    if proposed.len() != current.len() {
        return Err(err);
    }
    let known: HashSet<&Uuid> = current.iter().collect();
    let mut seen = HashSet::with_capacity(proposed.len());
    for id in proposed {
        if !known.contains(id) || !seen.insert(id) {
            return Err(err);
        }
    }
    Ok(())
}

/// Result of planning a task move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MovePlan {
    /// Source column order after the move (the only list for same-column moves).
    pub source: Vec<Uuid>,
    /// Target column order after the move; `None` when source == target.
    pub target: Option<Vec<Uuid>>,
    /// Final index of the moved task in its new list.
    pub index: usize,
}

impl MovePlan {
    #[must_use]
    pub fn position(&self) -> i32 {
        position_of(self.index)
    }
}

/// Plan moving `task_id` out of `source` and into `target` at `index`.
///
/// Pass `target = None` to reorder within the source column. The index is
/// clamped against the list the task lands in, after the task has been
/// removed from its source.
///
/// # Errors
///
/// `TaskNotInColumn` if `task_id` is not in `source`.
pub fn plan_move(source: &[Uuid], target: Option<&[Uuid]>, task_id: Uuid, index: i64) -> Result<MovePlan, OrderingError> {
    let Some(from) = source.iter().position(|id| *id == task_id) else {
        return Err(OrderingError::TaskNotInColumn(task_id));
    };
    let mut source_order = source.to_vec();
    source_order.remove(from);

    match target {
        None => {
            let at = insert_at(&mut source_order, index, task_id);
            Ok(MovePlan { source: source_order, target: None, index: at })
        }
        Some(target) => {
            let mut target_order: Vec<Uuid> = target.iter().copied().filter(|id| *id != task_id).collect();
            let at = insert_at(&mut target_order, index, task_id);
            Ok(MovePlan { source: source_order, target: Some(target_order), index: at })
        }
    }
}

#[cfg(test)]
#[path = "ordering_test.rs"]
mod tests;
