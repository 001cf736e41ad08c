//! Atom table: bidirectional string/small-integer mapping.
//!
//! Scripts use atoms to store command strings in compact form, mostly
//! for key bindings. Ids are stable, start at 1 and grow with insertion;
//! 0 is never a valid atom and maps back to the empty string.

use indexmap::IndexSet;

/// Bidirectional string-to-integer table.
#[derive(Debug, Default)]
pub struct AtomTable {
    atoms: IndexSet<String>,
}

impl AtomTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns a string, returning its atom id.
    pub fn intern(&mut self, text: &str) -> u32 {
        let (index, _) = self.atoms.insert_full(text.to_owned());
        index as u32 + 1
    }

    /// Looks up a string without interning it.
    #[must_use]
    pub fn get_by_name(&self, text: &str) -> Option<u32> {
        self.atoms.get_index_of(text).map(|i| i as u32 + 1)
    }

    /// Maps an atom id back to its string; empty for unknown ids.
    #[must_use]
    pub fn get_by_id(&self, id: u32) -> &str {
        id.checked_sub(1)
            .and_then(|index| self.atoms.get_index(index as usize))
            .map_or("", String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let mut t = AtomTable::new();
        let a = t.intern("FIRST");
        let b = t.intern("SECOND");
        assert_eq!(a, 1);
        assert_eq!(b, 2);
        assert_eq!(t.intern("FIRST"), a);
        assert_eq!(t.get_by_id(a), "FIRST");
        assert_eq!(t.get_by_id(0), "");
        assert_eq!(t.get_by_id(99), "");
        assert_eq!(t.get_by_name("SECOND"), Some(b));
    }
}
