//! Case-insensitive, whitespace-normalized list deduplication

use std::collections::HashSet;

/// Comparison key: trimmed, internal whitespace collapsed, lower-cased
pub fn dedup_key(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Order-preserving accumulator. The first occurrence keeps its casing.
#[derive(Debug, Default, Clone)]
pub struct ListDeduper {
    seen: HashSet<String>,
    items: Vec<String>,
}

impl ListDeduper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one item; returns true when it was new. Blank items are ignored.
    pub fn push(&mut self, item: &str) -> bool {
        let key = dedup_key(item);
        if key.is_empty() || !self.seen.insert(key) {
            return false;
        }
        self.items.push(item.trim().to_string());
        true
    }

    pub fn extend<'a, I>(&mut self, items: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        for item in items {
            self.push(item);
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn into_vec(self) -> Vec<String> {
        self.items
    }
}

/// One-shot dedup of a sequence
pub fn dedup_preserving_order<'a, I>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut deduper = ListDeduper::new();
    deduper.extend(items);
    deduper.into_vec()
}
