// ── Network interface addresses ──
//
// Private IPv4 addresses, IPv6 addresses and delegated prefixes attached to
// a network interface. The primary private address is fixed for the life of
// the attachment, so a change to it is a replacement, never an update.

use std::fmt;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::CoreError;
use crate::identity::{FieldWriter, Keyed};
use crate::model::{canonical_cidr, canonical_ip};
use crate::policy::{ApplyOrder, ReconcilePolicy, Reconcilable};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AddressKind {
    PrivateIpv4,
    Ipv6,
    Ipv4Prefix,
    Ipv6Prefix,
}

impl AddressKind {
    fn is_prefix(self) -> bool {
        matches!(self, Self::Ipv4Prefix | Self::Ipv6Prefix)
    }

    fn is_v4(self) -> bool {
        matches!(self, Self::PrivateIpv4 | Self::Ipv4Prefix)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceAddress {
    pub kind: AddressKind,
    pub address: String,
    /// Marks the interface's primary private address. Not part of identity;
    /// position 0 is primary when no element is flagged.
    #[serde(default)]
    pub primary: bool,
}

impl InterfaceAddress {
    pub fn private_ipv4(address: impl Into<String>) -> Self {
        Self {
            kind: AddressKind::PrivateIpv4,
            address: address.into(),
            primary: false,
        }
    }

    pub fn ipv6(address: impl Into<String>) -> Self {
        Self {
            kind: AddressKind::Ipv6,
            address: address.into(),
            primary: false,
        }
    }

    pub fn ipv4_prefix(prefix: impl Into<String>) -> Self {
        Self {
            kind: AddressKind::Ipv4Prefix,
            address: prefix.into(),
            primary: false,
        }
    }

    pub fn ipv6_prefix(prefix: impl Into<String>) -> Self {
        Self {
            kind: AddressKind::Ipv6Prefix,
            address: prefix.into(),
            primary: false,
        }
    }

    pub fn as_primary(mut self) -> Self {
        self.primary = true;
        self
    }

    fn canonical_address(&self) -> Option<String> {
        if self.kind.is_prefix() {
            let (addr, text) = canonical_cidr(&self.address)?;
            (addr.is_ipv4() == self.kind.is_v4()).then_some(text)
        } else {
            let addr = canonical_ip(&self.address)?;
            (addr.is_ipv4() == self.kind.is_v4()).then(|| addr.to_string())
        }
    }
}

impl Keyed for InterfaceAddress {
    const KIND: &'static str = "eniaddr";

    fn write_identity(&self, fields: &mut FieldWriter) {
        let address = self
            .canonical_address()
            .unwrap_or_else(|| self.address.trim().to_ascii_lowercase());
        fields.scalar("kind", self.kind).scalar("address", address);
    }
}

impl Reconcilable for InterfaceAddress {
    /// Unassign before assigning to free slots, one assignment per call so
    /// the remote order follows the desired list.
    const POLICY: ReconcilePolicy = ReconcilePolicy::incremental(ApplyOrder::RemoveThenAdd)
        .protect_primary()
        .one_per_call();

    fn validate(&self) -> Result<(), CoreError> {
        if self.canonical_address().is_none() {
            return Err(CoreError::Validation {
                message: format!("{:?} is not a valid {}", self.address, self.kind),
            });
        }
        if self.primary && self.kind != AddressKind::PrivateIpv4 {
            return Err(CoreError::Validation {
                message: format!("only a private IPv4 address can be primary, not {}", self.kind),
            });
        }
        Ok(())
    }

    fn is_primary(&self) -> bool {
        self.primary
    }

    /// Only a private IPv4 address can be an interface's primary.
    fn primary_eligible(&self) -> bool {
        self.kind == AddressKind::PrivateIpv4
    }
}

impl fmt::Display for InterfaceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address)?;
        if self.primary {
            f.write_str(" (primary)")?;
        }
        Ok(())
    }
}
