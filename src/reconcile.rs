//! Identity-preserving merges of fresh rows into a rendered list.
//!
//! Rows whose key survives a refresh keep their original `Arc` allocation and
//! receive the new fields in place. Rows missing from the fresh result are
//! dropped without any removal signal.

use std::collections::HashMap;
use std::sync::Arc;

use crate::types::{ItemKey, ListItem};

/// Merges `new` into `old`, following the order of `new`.
///
/// A repeated key inside `new` is emitted once, at its first position, with
/// the fields of its last occurrence.
pub fn merge(old: &[Arc<ListItem>], new: Vec<Arc<ListItem>>) -> Vec<Arc<ListItem>> {
    if new.is_empty() {
        return Vec::new();
    }

    let previous: HashMap<&ItemKey, &Arc<ListItem>> =
        old.iter().map(|item| (item.key(), item)).collect();
    let mut emitted: HashMap<ItemKey, usize> = HashMap::with_capacity(new.len());
    let mut merged: Vec<Arc<ListItem>> = Vec::with_capacity(new.len());

    for fresh in new {
        if let Some(&index) = emitted.get(fresh.key()) {
            overwrite(&merged[index], &fresh);
            continue;
        }

        let kept = match previous.get(fresh.key()) {
            Some(existing) => {
                overwrite(existing, &fresh);
                Arc::clone(existing)
            }
            None => fresh,
        };
        emitted.insert(kept.key().clone(), merged.len());
        merged.push(kept);
    }

    merged
}

/// Appends a follow-up page to `old`.
///
/// Keys already present are updated in place and keep their position; new
/// keys are appended in page order.
pub fn append(old: &[Arc<ListItem>], page: Vec<Arc<ListItem>>) -> Vec<Arc<ListItem>> {
    let mut merged: Vec<Arc<ListItem>> = old.to_vec();
    let mut positions: HashMap<ItemKey, usize> = merged
        .iter()
        .enumerate()
        .map(|(index, item)| (item.key().clone(), index))
        .collect();

    for fresh in page {
        match positions.get(fresh.key()) {
            Some(&index) => overwrite(&merged[index], &fresh),
            None => {
                positions.insert(fresh.key().clone(), merged.len());
                merged.push(fresh);
            }
        }
    }

    merged
}

fn overwrite(target: &Arc<ListItem>, source: &Arc<ListItem>) {
    if Arc::ptr_eq(target, source) {
        return;
    }
    let fields = source.fields();
    if target.fields() != fields {
        target.replace_fields(fields);
    }
}
