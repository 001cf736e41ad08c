//! Keymaps.
//!
//! A keymap binds key codes to command atoms and may inherit from any
//! number of parent keymaps. Key lookup searches the map itself first,
//! then the parents depth-first in declaration order.
//!
//! Key codes pack a base key (a Unicode scalar or a named special key)
//! with modifier bits.

use ahash::AHashMap;
use indexmap::IndexMap;

use crate::error::Error;

/// Modifier bit: Shift.
pub const KMOD_SHIFT: u32 = 0x0100_0000;
/// Modifier bit: Ctrl.
pub const KMOD_CTRL: u32 = 0x0200_0000;
/// Modifier bit: Alt.
pub const KMOD_ALT: u32 = 0x0400_0000;
/// Modifier bit: Meta.
pub const KMOD_META: u32 = 0x0800_0000;

/// Base code of the first named special key.
const KEY_SPECIAL_BASE: u32 = 0x0011_0000;

/// Named special keys, in base-code order.
const SPECIAL_KEYS: &[&str] = &[
    "F1", "F2", "F3", "F4", "F5", "F6", "F7", "F8", "F9", "F10", "F11", "F12", "F13", "F14",
    "F15", "BS", "BACKSPACE", "PAUSE", "DEL", "DOWN", "END", "ESC", "HOME", "INS", "LEFT",
    "NUM5", "PGDN", "PGUP", "PRINT", "RET", "ENTER", "RIGHT", "SPACE", "SPC", "TAB", "UP",
    "WHEELUP", "WHEELDOWN", "QUIT",
];

/// Parses a key string such as `"Ctrl-X"` or `"a"` into a key code.
#[must_use]
pub fn parse_key(text: &str) -> Option<u32> {
    let mut modifiers = 0;
    let mut rest = text.trim();
    loop {
        let Some((head, tail)) = rest.split_once('-') else {
            break;
        };
        let flag = match head.to_ascii_uppercase().as_str() {
            "SHIFT" | "S" => KMOD_SHIFT,
            "CTRL" | "C" => KMOD_CTRL,
            "ALT" | "A" => KMOD_ALT,
            "META" | "M" => KMOD_META,
            _ => break,
        };
        // a lone "-" binds the minus key, so require a non-empty tail
        if tail.is_empty() {
            break;
        }
        modifiers |= flag;
        rest = tail;
    }

    let mut chars = rest.chars();
    match (chars.next(), chars.next()) {
        (Some(ch), None) => Some(modifiers | ch as u32),
        (Some(_), Some(_)) => {
            let upper = rest.to_ascii_uppercase();
            SPECIAL_KEYS
                .iter()
                .position(|&k| k == upper)
                .map(|index| modifiers | (KEY_SPECIAL_BASE + index as u32))
        }
        (None, _) => None,
    }
}

/// One keymap: bindings plus parent references into the table.
#[derive(Debug, Default)]
pub struct Keymap {
    parents: Vec<usize>,
    bindings: AHashMap<u32, u32>,
}

impl Keymap {
    /// Binds a key to a command atom; 0 removes the binding.
    pub fn add_key(&mut self, key: u32, command: u32) {
        if command == 0 {
            self.bindings.remove(&key);
        } else {
            self.bindings.insert(key, command);
        }
    }

    /// Direct (non-inherited) binding of a key.
    #[must_use]
    pub fn get_direct(&self, key: u32) -> Option<u32> {
        self.bindings.get(&key).copied()
    }

    /// Parent keymap indexes.
    #[must_use]
    pub fn parents(&self) -> &[usize] {
        &self.parents
    }
}

/// All keymaps of a world, keyed by upper-case name.
#[derive(Debug, Default)]
pub struct KeymapTable {
    maps: IndexMap<String, Keymap>,
}

impl KeymapTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a keymap. The name must be new.
    pub fn create(&mut self, name: &str) -> Result<usize, Error> {
        let canonical = name.to_ascii_uppercase();
        if self.maps.contains_key(&canonical) {
            return Err(Error::new(format!("Keymap \"{canonical}\" already exists")));
        }
        let (index, _) = self.maps.insert_full(canonical, Keymap::default());
        Ok(index)
    }

    /// Looks up a keymap by name.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<usize> {
        self.maps.get_index_of(&name.to_ascii_uppercase())
    }

    /// Name of a keymap by index.
    #[must_use]
    pub fn name(&self, index: usize) -> Option<&str> {
        self.maps.get_index(index).map(|(name, _)| name.as_str())
    }

    /// Number of keymaps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.maps.len()
    }

    /// True when no keymap exists.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }

    /// Adds a parent to a keymap, refusing cycles.
    pub fn add_parent(&mut self, child: usize, parent: usize) -> Result<(), Error> {
        if child == parent || self.inherits_from(parent, child) {
            return Err(Error::new("Cyclic keymap inheritance"));
        }
        let map = self
            .maps
            .get_index_mut(child)
            .map(|(_, m)| m)
            .ok_or_else(|| Error::internal("invalid keymap reference"))?;
        if !map.parents.contains(&parent) {
            map.parents.push(parent);
        }
        Ok(())
    }

    /// Binds a key in a keymap.
    pub fn add_key(&mut self, index: usize, key: u32, command: u32) -> Result<(), Error> {
        let map = self
            .maps
            .get_index_mut(index)
            .map(|(_, m)| m)
            .ok_or_else(|| Error::internal("invalid keymap reference"))?;
        map.add_key(key, command);
        Ok(())
    }

    /// Looks up a key, searching the keymap and then its parents
    /// depth-first.
    #[must_use]
    pub fn lookup_command(&self, index: usize, key: u32) -> Option<u32> {
        let map = self.maps.get_index(index).map(|(_, m)| m)?;
        if let Some(command) = map.get_direct(key) {
            return Some(command);
        }
        for &parent in &map.parents {
            if let Some(command) = self.lookup_command(parent, key) {
                return Some(command);
            }
        }
        None
    }

    fn inherits_from(&self, map: usize, ancestor: usize) -> bool {
        let Some((_, m)) = self.maps.get_index(map) else {
            return false;
        };
        m.parents
            .iter()
            .any(|&p| p == ancestor || self.inherits_from(p, ancestor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key() {
        assert_eq!(parse_key("a"), Some('a' as u32));
        assert_eq!(parse_key("A"), Some('A' as u32));
        assert_eq!(parse_key("$"), Some('$' as u32));
        assert_eq!(parse_key("Ctrl-x"), Some(KMOD_CTRL | 'x' as u32));
        assert_eq!(
            parse_key("C-A-Del"),
            parse_key("Ctrl-Alt-DEL"),
        );
        assert_eq!(parse_key("-"), Some('-' as u32));
        assert_eq!(parse_key(""), None);
        assert_eq!(parse_key("NoSuchKey"), None);
        assert!(parse_key("F10").is_some());
    }

    #[test]
    fn test_create_and_lookup() {
        let mut t = KeymapTable::new();
        let base = t.create("Base").unwrap();
        assert!(t.create("BASE").is_err());
        assert_eq!(t.lookup("base"), Some(base));
        assert_eq!(t.lookup("other"), None);
        assert_eq!(t.name(base), Some("BASE"));
    }

    #[test]
    fn test_parent_lookup_and_cycles() {
        let mut t = KeymapTable::new();
        let base = t.create("BASE").unwrap();
        let child = t.create("CHILD").unwrap();
        t.add_parent(child, base).unwrap();
        assert!(t.add_parent(base, child).is_err());
        assert!(t.add_parent(child, child).is_err());

        let key = parse_key("q").unwrap();
        t.add_key(base, key, 7).unwrap();
        assert_eq!(t.lookup_command(child, key), Some(7));
        t.add_key(child, key, 9).unwrap();
        assert_eq!(t.lookup_command(child, key), Some(9));
        t.add_key(child, key, 0).unwrap();
        assert_eq!(t.lookup_command(child, key), Some(7));
    }
}
