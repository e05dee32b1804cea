//! Outbound wire command builders.
//!
//! These build the bare command body (no line ending); the session layer
//! appends the configured `LINE_ENDING` before writing to the socket.

use crate::address::{LoadAddr, SwitchAddr};

/// `VGS# m s b`
pub fn switch_read(addr: SwitchAddr) -> String {
    format!("VGS# {} {} {}", addr.master, addr.station, addr.button)
}

/// `VSW m s b v`
pub fn switch_write(addr: SwitchAddr, state: bool) -> String {
    format!(
        "VSW {} {} {} {}",
        addr.master, addr.station, addr.button, state as u8
    )
}

/// `VLB# m e mod load level [fade]`
pub fn load_set(addr: LoadAddr, level: u8, fade: Option<u32>) -> String {
    match fade {
        Some(f) => format!(
            "VLB# {} {} {} {} {} {}",
            addr.master, addr.enclosure, addr.module, addr.load, level, f
        ),
        None => format!(
            "VLB# {} {} {} {} {}",
            addr.master, addr.enclosure, addr.module, addr.load, level
        ),
    }
}

/// `VGB# m e mod load`
pub fn load_read(addr: LoadAddr) -> String {
    format!(
        "VGB# {} {} {} {}",
        addr.master, addr.enclosure, addr.module, addr.load
    )
}
