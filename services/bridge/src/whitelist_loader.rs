//! Loads the switch whitelist from a JSON file: `[{"m":2,"s":20,"b":7}, ...]`.

use hb_protocol::SwitchAddr;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct RawEntry {
    m: u32,
    s: u32,
    b: u32,
}

pub fn load_whitelist_from_path(path: &Path) -> Result<HashSet<SwitchAddr>, WhitelistLoadError> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| WhitelistLoadError::Io(format!("reading '{}': {e}", path.display())))?;
    load_whitelist_from_str(&contents)
}

pub fn load_whitelist_from_str(json: &str) -> Result<HashSet<SwitchAddr>, WhitelistLoadError> {
    let entries: Vec<RawEntry> =
        serde_json::from_str(json).map_err(|e| WhitelistLoadError::Parse(e.to_string()))?;
    Ok(entries
        .into_iter()
        .map(|e| SwitchAddr::new(e.m, e.s, e.b))
        .collect())
}

#[derive(Debug, thiserror::Error)]
pub enum WhitelistLoadError {
    #[error("IO error: {0}")]
    Io(String),
    #[error("parse error: {0}")]
    Parse(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_entries_into_switch_addrs() {
        let set = load_whitelist_from_str(r#"[{"m":2,"s":20,"b":7},{"m":1,"s":1,"b":1}]"#).unwrap();
        assert_eq!(set.len(), 2);
        assert!(set.contains(&SwitchAddr::new(2, 20, 7)));
    }

    #[test]
    fn empty_array_yields_empty_set() {
        let set = load_whitelist_from_str("[]").unwrap();
        assert!(set.is_empty());
    }

    #[test]
    fn malformed_json_is_an_error() {
        let result = load_whitelist_from_str("not json");
        assert!(matches!(result, Err(WhitelistLoadError::Parse(_))));
    }
}
