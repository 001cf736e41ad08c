//! Advisory locks.
//!
//! Mutexes are a script-facing coordination feature: named locks with a
//! hint text, tracking which process holds them. The VM itself never
//! takes a lock; the `Lock`/`Unlock` builtins and the host UI use this
//! table to keep two auto-tasks from editing the same object.

use indexmap::IndexMap;

use crate::{error::Error, process_list::ProcessId};

#[derive(Debug)]
struct MutexInfo {
    owner: ProcessId,
    hint: String,
}

/// All advisory locks of a world, keyed by upper-case name.
#[derive(Debug, Default)]
pub struct MutexList {
    entries: IndexMap<String, MutexInfo>,
}

impl MutexList {
    /// Creates an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires a lock for a process. Re-acquiring a lock the same
    /// process already holds updates the hint.
    pub fn take(&mut self, name: &str, hint: &str, owner: ProcessId) -> Result<(), Error> {
        let canonical = name.to_ascii_uppercase();
        if let Some(info) = self.entries.get(&canonical) {
            if info.owner != owner {
                return Err(Error::new(format!("Already locked: {canonical}")));
            }
        }
        self.entries.insert(
            canonical,
            MutexInfo {
                owner,
                hint: hint.to_owned(),
            },
        );
        Ok(())
    }

    /// Releases a lock held by a process.
    pub fn release(&mut self, name: &str, owner: ProcessId) -> Result<(), Error> {
        let canonical = name.to_ascii_uppercase();
        match self.entries.get(&canonical) {
            Some(info) if info.owner == owner => {
                self.entries.shift_remove(&canonical);
                Ok(())
            }
            Some(_) => Err(Error::new(format!("Not lock owner: {canonical}"))),
            None => Err(Error::new(format!("Not locked: {canonical}"))),
        }
    }

    /// The hint of a held lock, if any.
    #[must_use]
    pub fn info(&self, name: &str) -> Option<&str> {
        self.entries
            .get(&name.to_ascii_uppercase())
            .map(|info| info.hint.as_str())
    }

    /// The process holding a lock, if any.
    #[must_use]
    pub fn owner(&self, name: &str) -> Option<ProcessId> {
        self.entries
            .get(&name.to_ascii_uppercase())
            .map(|info| info.owner)
    }

    /// Releases everything a process holds. Called when the process is
    /// removed from the process list.
    pub fn disown_process(&mut self, owner: ProcessId) {
        self.entries.retain(|_, info| info.owner != owner);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_and_conflict() {
        let mut m = MutexList::new();
        m.take("Planet.10", "editing taxes", 1).unwrap();
        assert!(m.take("planet.10", "other", 2).is_err());
        m.take("PLANET.10", "still editing", 1).unwrap();
        assert_eq!(m.info("planet.10"), Some("still editing"));
        assert_eq!(m.owner("planet.10"), Some(1));
    }

    #[test]
    fn test_release_rules() {
        let mut m = MutexList::new();
        m.take("X", "", 1).unwrap();
        assert!(m.release("X", 2).is_err());
        m.release("X", 1).unwrap();
        assert!(m.release("X", 1).is_err());
    }

    #[test]
    fn test_disown() {
        let mut m = MutexList::new();
        m.take("A", "", 1).unwrap();
        m.take("B", "", 2).unwrap();
        m.disown_process(1);
        assert_eq!(m.info("A"), None);
        assert_eq!(m.info("B"), Some(""));
    }
}
