use std::cmp::Ordering;

use crate::domain::FileRecord;

/// Preference order for the keep file: earliest creation time, then the
/// largest file, then the smallest id. Total, so elections are reproducible.
pub fn keep_order(a: &FileRecord, b: &FileRecord) -> Ordering {
    a.created_at
        .cmp(&b.created_at)
        .then_with(|| b.size.cmp(&a.size))
        .then_with(|| a.id.cmp(&b.id))
}

/// Elect the file to keep among a group's members.
pub fn elect_keep<'a>(members: &[&'a FileRecord]) -> Option<&'a FileRecord> {
    members.iter().copied().min_by(|a, b| keep_order(a, b))
}
