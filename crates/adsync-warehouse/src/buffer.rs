use std::collections::HashMap;

use adsync_core::{FieldValue, TypedRecord};
use tracing::warn;

const KEY_SEPARATOR: char = '\u{1f}';

/// Pending records, at most one per unique-key tuple.
///
/// A record whose key is already buffered is merged field by field into the
/// earlier one, later values winning. Without unique keys every record is kept,
/// as is any record missing a value for one of them.
#[derive(Debug, Clone)]
pub struct UpsertBuffer {
    unique_keys: Vec<String>,
    threshold: usize,
    entries: Vec<TypedRecord>,
    positions: HashMap<String, usize>,
}

impl UpsertBuffer {
    pub fn new(unique_keys: impl IntoIterator<Item = impl Into<String>>, threshold: usize) -> Self {
        Self {
            unique_keys: unique_keys.into_iter().map(Into::into).collect(),
            threshold: threshold.max(1),
            entries: Vec::new(),
            positions: HashMap::new(),
        }
    }

    pub fn add(&mut self, record: TypedRecord) {
        let Some(key) = self.key_of(&record) else {
            self.entries.push(record);
            return;
        };

        match self.positions.get(&key) {
            Some(&position) => self.entries[position].merge_from(record),
            None => {
                self.positions.insert(key, self.entries.len());
                self.entries.push(record);
            }
        }
    }

    pub fn should_flush(&self) -> bool {
        self.entries.len() >= self.threshold
    }

    /// Empties the buffer, returning records in first-insertion order.
    pub fn drain(&mut self) -> Vec<TypedRecord> {
        self.positions.clear();
        std::mem::take(&mut self.entries)
    }

    /// Puts drained records back ahead of anything buffered since.
    pub fn restore(&mut self, records: Vec<TypedRecord>) {
        let newer = self.drain();
        for record in records.into_iter().chain(newer) {
            self.add(record);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub const fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn records(&self) -> &[TypedRecord] {
        &self.entries
    }

    fn key_of(&self, record: &TypedRecord) -> Option<String> {
        if self.unique_keys.is_empty() {
            return None;
        }
        let mut fragments = Vec::with_capacity(self.unique_keys.len());
        for key in &self.unique_keys {
            match record.get(key) {
                Some(value) if !matches!(value, FieldValue::Null) => fragments.push(value.key_fragment()),
                _ => {
                    warn!(key = %key, "record has no value for unique key; buffering without coalescing");
                    return None;
                }
            }
        }
        Some(fragments.join(&KEY_SEPARATOR.to_string()))
    }
}
