//! Name maps and value segments.
//!
//! `NameMap` is the insertion-ordered, case-insensitive name table used
//! everywhere a script name must be mapped to a stable small index: global
//! variables, BCO name pools, local-variable tables, structure fields and
//! per-object property maps. `Segment` is the matching sparse value store.

use indexmap::IndexMap;

use crate::value::Value;

/// Stable index of a name within a [`NameMap`].
pub type NameIndex = usize;

/// Insertion-ordered, case-insensitive string-to-index map.
///
/// Names are stored in upper-case canonical form; queries are upcased
/// before lookup. Indexes are stable for the lifetime of the map.
#[derive(Debug, Clone, Default)]
pub struct NameMap {
    map: IndexMap<String, ()>,
}

impl NameMap {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a name, returning its new index.
    ///
    /// The caller is responsible for not adding duplicates; a duplicate
    /// returns the existing index (same as [`NameMap::add_maybe`]).
    pub fn add(&mut self, name: &str) -> NameIndex {
        self.add_maybe(name)
    }

    /// Adds a name unless it is already present; returns its index.
    pub fn add_maybe(&mut self, name: &str) -> NameIndex {
        let canonical = name.to_ascii_uppercase();
        let entry = self.map.entry(canonical);
        let index = entry.index();
        entry.or_insert(());
        index
    }

    /// Looks up a name, returning its index if present.
    #[must_use]
    pub fn get_index_by_name(&self, name: &str) -> Option<NameIndex> {
        if self.map.contains_key(name) {
            // fast path: caller already passed canonical upper-case
            return self.map.get_index_of(name);
        }
        self.map.get_index_of(&name.to_ascii_uppercase())
    }

    /// Returns the name stored at the given index.
    #[must_use]
    pub fn get_name_by_index(&self, index: NameIndex) -> Option<&str> {
        self.map.get_index(index).map(|(k, ())| k.as_str())
    }

    /// Number of names in the map.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// True if the map holds no names.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Iterates names in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.map.keys().map(String::as_str)
    }
}

/// Sparse array of values indexed by [`NameIndex`].
///
/// Unmapped indexes read as null. The segment grows on demand when a value
/// is stored past the current end.
#[derive(Debug, Clone, Default)]
pub struct Segment {
    values: Vec<Value>,
}

impl Segment {
    /// Creates an empty segment.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a segment with `size` null slots.
    #[must_use]
    pub fn with_size(size: usize) -> Self {
        Self {
            values: vec![Value::Null; size],
        }
    }

    /// Reads the value at `index`; null when unmapped.
    #[must_use]
    pub fn get(&self, index: usize) -> Value {
        self.values.get(index).cloned().unwrap_or(Value::Null)
    }

    /// Borrows the value at `index` if it is mapped.
    #[must_use]
    pub fn get_ref(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Stores `value` at `index`, growing the segment as needed.
    pub fn set(&mut self, index: usize, value: Value) {
        if index >= self.values.len() {
            self.values.resize(index + 1, Value::Null);
        }
        self.values[index] = value;
    }

    /// Number of mapped slots (trailing nulls included once touched).
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True if no slot was ever touched.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_map_case_blind() {
        let mut m = NameMap::new();
        assert_eq!(m.add("Alpha"), 0);
        assert_eq!(m.add("BETA"), 1);
        assert_eq!(m.add_maybe("alpha"), 0);
        assert_eq!(m.get_index_by_name("beta"), Some(1));
        assert_eq!(m.get_index_by_name("gamma"), None);
        assert_eq!(m.get_name_by_index(0), Some("ALPHA"));
        assert_eq!(m.len(), 2);
    }

    #[test]
    fn test_name_map_order_stable() {
        let mut m = NameMap::new();
        for name in ["ONE", "TWO", "THREE"] {
            m.add(name);
        }
        let names: Vec<&str> = m.iter().collect();
        assert_eq!(names, ["ONE", "TWO", "THREE"]);
    }

    #[test]
    fn test_segment_defaults_null() {
        let mut s = Segment::new();
        assert_eq!(s.get(7), Value::Null);
        s.set(3, Value::Int(9));
        assert_eq!(s.get(3), Value::Int(9));
        assert_eq!(s.get(2), Value::Null);
        assert_eq!(s.len(), 4);
    }
}
