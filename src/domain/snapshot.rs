//! State snapshots and top-level field selection.

use serde_json::{Map, Value};

/// The full value of a container at one instant, keyed by top-level field.
pub type StateSnapshot = Map<String, Value>;

/// Project `paths` out of `state`.
///
/// `None` or an empty list keeps every field. Listed fields missing from
/// `state` are skipped.
pub fn select(state: &StateSnapshot, paths: Option<&[String]>) -> StateSnapshot {
    let Some(paths) = paths.filter(|paths| !paths.is_empty()) else {
        return state.clone();
    };

    let mut picked = Map::with_capacity(paths.len());
    for path in paths {
        if let Some(value) = state.get(path) {
            picked.insert(path.clone(), value.clone());
        }
    }
    picked
}

/// Shallow-merge `restored` into `target`, overwriting only the fields it carries.
pub fn merge_into(target: &mut StateSnapshot, restored: StateSnapshot) -> usize {
    let count = restored.len();
    for (field, value) in restored {
        target.insert(field, value);
    }
    count
}
