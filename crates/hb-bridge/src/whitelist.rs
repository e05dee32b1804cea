//! Switch whitelist gate for the push pipeline.
//!
//! The backing set is consumed as a capability, not as a direct JSON-file
//! reader; `bridge` (the service) owns loading the file and calls
//! [`Whitelist::reload`] with the parsed triples.

use hb_protocol::SwitchAddr;
use std::collections::HashSet;
use std::sync::RwLock;

pub struct Whitelist {
    set: RwLock<HashSet<SwitchAddr>>,
    /// When the set is empty: `true` = deny everything, `false` = allow everything.
    strict_when_empty: bool,
}

impl Whitelist {
    pub fn new(initial: HashSet<SwitchAddr>, strict_when_empty: bool) -> Self {
        Whitelist {
            set: RwLock::new(initial),
            strict_when_empty,
        }
    }

    pub fn contains(&self, addr: SwitchAddr) -> bool {
        let set = self.set.read().unwrap();
        if set.is_empty() {
            return !self.strict_when_empty;
        }
        set.contains(&addr)
    }

    /// Atomic swap of the backing set.
    pub fn reload(&self, new_set: HashSet<SwitchAddr>) {
        *self.set.write().unwrap() = new_set;
    }

    pub fn len(&self) -> usize {
        self.set.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_set_strict_denies_everything() {
        let wl = Whitelist::new(HashSet::new(), true);
        assert!(!wl.contains(SwitchAddr::new(1, 2, 3)));
    }

    #[test]
    fn empty_set_permissive_allows_everything() {
        let wl = Whitelist::new(HashSet::new(), false);
        assert!(wl.contains(SwitchAddr::new(1, 2, 3)));
    }

    #[test]
    fn non_empty_set_checks_membership_regardless_of_policy() {
        let mut set = HashSet::new();
        set.insert(SwitchAddr::new(2, 20, 7));
        let wl = Whitelist::new(set, true);
        assert!(wl.contains(SwitchAddr::new(2, 20, 7)));
        assert!(!wl.contains(SwitchAddr::new(9, 9, 9)));
    }

    #[test]
    fn reload_swaps_the_set_atomically() {
        let wl = Whitelist::new(HashSet::new(), true);
        assert!(!wl.contains(SwitchAddr::new(1, 1, 1)));
        let mut new_set = HashSet::new();
        new_set.insert(SwitchAddr::new(1, 1, 1));
        wl.reload(new_set);
        assert!(wl.contains(SwitchAddr::new(1, 1, 1)));
        assert_eq!(wl.len(), 1);
    }
}
