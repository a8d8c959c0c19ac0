//! Relative display order inside a day/status bucket.
//!
//! Keys are `f64`. Inserting before a pivot takes the midpoint with its
//! predecessor; when two neighbours are too close for a midpoint to exist,
//! the bucket is renumbered and the insertion retried.

use crate::model::{Millis, Task};
use std::cmp::Ordering;

/// Display order: `order`, then creation time, then id.
pub fn compare(a: &Task, b: &Task) -> Ordering {
    a.order
        .total_cmp(&b.order)
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| a.id.cmp(&b.id))
}

pub fn sort_for_display(tasks: &mut [Task]) {
    tasks.sort_by(compare);
}

/// A key strictly between `prev` and `pivot`, or just under `pivot` when it
/// leads the bucket. `None` when no such key is representable.
pub fn key_before(prev: Option<f64>, pivot: f64) -> Option<f64> {
    match prev {
        None => {
            let key = pivot - 1.0;
            (key.is_finite() && key < pivot).then_some(key)
        }
        Some(prev) => {
            let key = prev + (pivot - prev) / 2.0;
            (key > prev && key < pivot).then_some(key)
        }
    }
}

/// A key that sorts after everything currently in the bucket.
pub fn key_at_end(last: Option<f64>, now: Millis) -> f64 {
    let now = now as f64;
    match last {
        Some(last) if last >= now => last + 1.0,
        _ => now,
    }
}

/// Rewrite keys to consecutive integers in current display order.
///
/// Returns the indices (after sorting) whose key changed.
pub fn renumber(tasks: &mut [Task]) -> Vec<usize> {
    sort_for_display(tasks);
    let mut changed = Vec::new();
    for (index, task) in tasks.iter_mut().enumerate() {
        let key = (index + 1) as f64;
        if task.order != key {
            task.order = key;
            changed.push(index);
        }
    }
    changed
}
