use crate::error::{FilterError, Result};
use tracing::{debug, warn};

/// Kernel limit on interface names, including the trailing NUL.
pub const IFNAMSIZ: usize = 16;

pub const VLAN_MIN: u16 = 1;
pub const VLAN_MAX: u16 = 4094;

pub fn validate_interface_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.len() < IFNAMSIZ
        && name != "."
        && name != ".."
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'@'));

    if valid {
        Ok(())
    } else {
        Err(FilterError::InvalidInterface(name.to_string()))
    }
}

/// Returns `interface`, or `interface.vlan` when a VLAN is given.
pub fn compose_interface(interface: &str, vlan: Option<u16>) -> Result<String> {
    validate_interface_name(interface)?;

    let name = match vlan {
        Some(id) if !(VLAN_MIN..=VLAN_MAX).contains(&id) => {
            return Err(FilterError::InvalidVlan(id));
        }
        Some(id) => format!("{}.{}", interface, id),
        None => interface.to_string(),
    };

    validate_interface_name(&name)?;
    Ok(name)
}

pub fn interface_exists(name: &str) -> bool {
    pnet::datalink::interfaces()
        .iter()
        .any(|iface| iface.name == name)
}

/// Rules can be staged for a VLAN sub-interface that does not exist yet,
/// so a missing interface is only worth a warning.
pub fn warn_if_missing(name: &str) {
    if interface_exists(name) {
        debug!("Interface {} present", name);
    } else {
        warn!("Interface {} not found on this host; rules will match once it appears", name);
    }
}
