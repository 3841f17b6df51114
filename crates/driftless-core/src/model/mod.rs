// ── Element models ──
//
// Typed desired-state elements for the collections the engine converges,
// plus lifecycle vocabularies for objects awaited directly.

pub mod fleet;
pub mod interface_address;
pub mod prefix_list;
pub mod security_group_rule;

use std::net::IpAddr;

pub use fleet::{FleetState, SpotFleetRequestState};
pub use interface_address::{AddressKind, InterfaceAddress};
pub use prefix_list::PrefixListEntry;
pub use security_group_rule::{
    Protocol, RuleDirection, RuleSource, SecurityGroupRule, collapse_rules, expand_rules,
};

/// Parse an IP address. Its `Display` form is canonical
/// (`2001:DB8::0:1` → `2001:db8::1`).
pub(crate) fn canonical_ip(raw: &str) -> Option<IpAddr> {
    raw.trim().parse().ok()
}

/// Canonical text of a CIDR block, with its address family.
pub(crate) fn canonical_cidr(raw: &str) -> Option<(IpAddr, String)> {
    let (addr, len) = raw.trim().split_once('/')?;
    let addr: IpAddr = addr.parse().ok()?;
    let len: u8 = len.parse().ok()?;
    let max = if addr.is_ipv4() { 32 } else { 128 };
    (len <= max).then(|| (addr, format!("{addr}/{len}")))
}
