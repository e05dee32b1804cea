//! Switch and load addresses.
//!
//! A switch address `SA` is a `(master, station, button)` triple; a load
//! address `LA` is a `(master, enclosure, module, load)` quadruple. Both are
//! plain value types with canonical display and wire key forms; see the
//! module docs on [`SwitchAddr::key`] and [`LoadAddr::key`].

use std::fmt;

/// `(master, station, button)`, each component `>= 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SwitchAddr {
    pub master: u32,
    pub station: u32,
    pub button: u32,
}

impl SwitchAddr {
    pub fn new(master: u32, station: u32, button: u32) -> Self {
        SwitchAddr {
            master,
            station,
            button,
        }
    }

    /// Canonical display form, e.g. `"2/20/7"`.
    pub fn display_key(&self) -> String {
        format!("{}/{}/{}", self.master, self.station, self.button)
    }

    /// Wire form used as a cache/await key, e.g. `"2-20-7"`.
    pub fn key(&self) -> String {
        format!("{}-{}-{}", self.master, self.station, self.button)
    }
}

impl fmt::Display for SwitchAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

/// `(master, enclosure in 1..=4, module in 1..=4, load in 1..=8)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LoadAddr {
    pub master: u32,
    pub enclosure: u32,
    pub module: u32,
    pub load: u32,
}

impl LoadAddr {
    pub fn new(master: u32, enclosure: u32, module: u32, load: u32) -> Self {
        LoadAddr {
            master,
            enclosure,
            module,
            load,
        }
    }

    /// Key form, e.g. `"3-1-1-2"`.
    pub fn key(&self) -> String {
        format!(
            "{}-{}-{}-{}",
            self.master, self.enclosure, self.module, self.load
        )
    }

    /// `true` if `enclosure` and `module` fall in `1..=4` and `load` in `1..=8`.
    pub fn is_valid_range(&self) -> bool {
        (1..=4).contains(&self.enclosure) && (1..=4).contains(&self.module) && (1..=8).contains(&self.load)
    }
}

impl fmt::Display for LoadAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}
