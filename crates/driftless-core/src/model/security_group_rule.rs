// ── Security group rules ──
//
// A user rule may list several sources. Remote APIs store one permission
// per (direction, protocol, port range) holding many sources, and revoke by
// exact match. The engine therefore keys one element per source: rules are
// expanded before diffing and collapsed again before each call, so adding a
// single CIDR to a rule becomes a one-element delta.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::CoreError;
use crate::identity::{FieldWriter, Keyed};
use crate::model::canonical_cidr;
use crate::policy::{ApplyOrder, ReconcilePolicy, Reconcilable};

// ── Direction ────────────────────────────────────────────────────────

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum RuleDirection {
    Ingress,
    Egress,
}

// ── Protocol ─────────────────────────────────────────────────────────

/// IP protocol of a rule, normalised so that `"-1"`, `"all"` and `"ALL"`
/// (or `"6"` and `"tcp"`) compare and hash equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Protocol {
    /// Every protocol. Carries no port range.
    All,
    Tcp,
    Udp,
    Icmp,
    Icmpv6,
    /// Any other IANA protocol number.
    Number(u8),
}

impl Protocol {
    /// Protocols whose ports are a real `from..=to` range.
    pub fn has_port_range(self) -> bool {
        matches!(self, Self::Tcp | Self::Udp)
    }
}

impl FromStr for Protocol {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        let protocol = match lowered.as_str() {
            "-1" | "all" => Self::All,
            "tcp" | "6" => Self::Tcp,
            "udp" | "17" => Self::Udp,
            "icmp" | "1" => Self::Icmp,
            "icmpv6" | "58" => Self::Icmpv6,
            other => other
                .parse::<u8>()
                .map(Self::Number)
                .map_err(|_| CoreError::Validation {
                    message: format!("unknown protocol {s:?}"),
                })?,
        };
        Ok(protocol)
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("-1"),
            Self::Tcp => f.write_str("tcp"),
            Self::Udp => f.write_str("udp"),
            Self::Icmp => f.write_str("icmp"),
            Self::Icmpv6 => f.write_str("icmpv6"),
            Self::Number(n) => write!(f, "{n}"),
        }
    }
}

impl TryFrom<String> for Protocol {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Protocol> for String {
    fn from(value: Protocol) -> Self {
        value.to_string()
    }
}

// ── Source ───────────────────────────────────────────────────────────

/// Where traffic matching a rule comes from (ingress) or goes to (egress).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleSource {
    Cidr(String),
    Ipv6Cidr(String),
    PrefixList(String),
    /// Another security group, optionally in another account.
    Group {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        owner: Option<String>,
        id: String,
    },
    /// The group the rule belongs to.
    #[serde(rename = "self")]
    SelfRef,
}

impl RuleSource {
    /// Parse a group reference, `sg-123` or `123456789012/sg-123`.
    pub fn group(reference: &str) -> Self {
        match reference.split_once('/') {
            Some((owner, id)) => Self::Group {
                owner: Some(owner.to_owned()),
                id: id.to_owned(),
            },
            None => Self::Group {
                owner: None,
                id: reference.to_owned(),
            },
        }
    }

    /// Canonical form: CIDRs normalised, tags prevent cross-kind collisions.
    fn canonical(&self) -> String {
        match self {
            Self::Cidr(c) => format!(
                "cidr:{}",
                canonical_cidr(c).map_or_else(|| c.trim().to_owned(), |(_, t)| t)
            ),
            Self::Ipv6Cidr(c) => format!(
                "ipv6:{}",
                canonical_cidr(c).map_or_else(|| c.trim().to_ascii_lowercase(), |(_, t)| t)
            ),
            Self::PrefixList(id) => format!("pl:{}", id.trim()),
            Self::Group { owner, id } => match owner {
                Some(owner) => format!("sg:{owner}/{}", id.trim()),
                None => format!("sg:{}", id.trim()),
            },
            Self::SelfRef => String::from("self"),
        }
    }

    fn validate(&self) -> Result<(), CoreError> {
        let family_ok = match self {
            Self::Cidr(c) => canonical_cidr(c).is_some_and(|(a, _)| a.is_ipv4()),
            Self::Ipv6Cidr(c) => canonical_cidr(c).is_some_and(|(a, _)| a.is_ipv6()),
            Self::PrefixList(id) | Self::Group { id, .. } => !id.trim().is_empty(),
            Self::SelfRef => true,
        };
        if family_ok {
            Ok(())
        } else {
            Err(CoreError::Validation {
                message: format!("invalid rule source {self}"),
            })
        }
    }
}

impl fmt::Display for RuleSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cidr(c) | Self::Ipv6Cidr(c) | Self::PrefixList(c) => f.write_str(c),
            Self::Group { owner: Some(owner), id } => write!(f, "{owner}/{id}"),
            Self::Group { owner: None, id } => f.write_str(id),
            Self::SelfRef => f.write_str("self"),
        }
    }
}

// ── Rule ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityGroupRule {
    pub direction: RuleDirection,
    pub protocol: Protocol,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_port: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_port: Option<i32>,
    #[serde(default)]
    pub sources: Vec<RuleSource>,
    /// Decorative; never part of identity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl SecurityGroupRule {
    pub fn new(direction: RuleDirection, protocol: Protocol, from_port: i32, to_port: i32) -> Self {
        Self {
            direction,
            protocol,
            from_port: Some(from_port),
            to_port: Some(to_port),
            sources: Vec::new(),
            description: None,
        }
    }

    pub fn ingress(protocol: Protocol, from_port: i32, to_port: i32) -> Self {
        Self::new(RuleDirection::Ingress, protocol, from_port, to_port)
    }

    pub fn egress(protocol: Protocol, from_port: i32, to_port: i32) -> Self {
        Self::new(RuleDirection::Egress, protocol, from_port, to_port)
    }

    /// A rule matching all traffic in `direction`.
    pub fn all_traffic(direction: RuleDirection) -> Self {
        Self {
            from_port: None,
            to_port: None,
            ..Self::new(direction, Protocol::All, 0, 0)
        }
    }

    pub fn cidr(mut self, cidr: impl Into<String>) -> Self {
        self.sources.push(RuleSource::Cidr(cidr.into()));
        self
    }

    pub fn ipv6_cidr(mut self, cidr: impl Into<String>) -> Self {
        self.sources.push(RuleSource::Ipv6Cidr(cidr.into()));
        self
    }

    pub fn prefix_list(mut self, id: impl Into<String>) -> Self {
        self.sources.push(RuleSource::PrefixList(id.into()));
        self
    }

    pub fn group(mut self, reference: &str) -> Self {
        self.sources.push(RuleSource::group(reference));
        self
    }

    pub fn self_ref(mut self) -> Self {
        self.sources.push(RuleSource::SelfRef);
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Ports as hashed: `(0, 0)` for `All`, absent as `0` otherwise.
    fn identity_ports(&self) -> (i64, i64) {
        if self.protocol == Protocol::All {
            return (0, 0);
        }
        (
            self.from_port.map_or(0, i64::from),
            self.to_port.map_or(0, i64::from),
        )
    }

    /// `All` rules carry no ports; omitted and explicit zero ports become
    /// the same payload.
    fn normalized(mut self) -> Self {
        if self.protocol == Protocol::All {
            self.from_port = None;
            self.to_port = None;
        }
        self
    }
}

impl Keyed for SecurityGroupRule {
    const KIND: &'static str = "sgrule";

    fn write_identity(&self, fields: &mut FieldWriter) {
        let (from, to) = self.identity_ports();
        fields
            .scalar("direction", self.direction)
            .scalar("protocol", self.protocol)
            .number("from_port", Some(from))
            .number("to_port", Some(to))
            .set("sources", self.sources.iter().map(RuleSource::canonical));
    }
}

impl Reconcilable for SecurityGroupRule {
    /// Revoke before authorize; a changed description is revoked and
    /// re-authorized.
    const POLICY: ReconcilePolicy =
        ReconcilePolicy::incremental(ApplyOrder::RemoveThenAdd).recreate_drift();

    fn validate(&self) -> Result<(), CoreError> {
        if self.sources.is_empty() {
            return Err(CoreError::Validation {
                message: format!("{} rule has no sources", self.direction),
            });
        }
        let from = self.from_port.unwrap_or(0);
        let to = self.to_port.unwrap_or(0);
        if self.protocol == Protocol::All && (from != 0 || to != 0) {
            return Err(CoreError::Validation {
                message: format!(
                    "from_port ({from}) and to_port ({to}) must both be 0 to use the all-protocols (-1) protocol"
                ),
            });
        }
        if self.protocol.has_port_range() && (from > to || from < 0 || to > 65_535) {
            return Err(CoreError::Validation {
                message: format!("invalid port range {from}-{to}"),
            });
        }
        self.sources.iter().try_for_each(RuleSource::validate)
    }

    fn expand(elements: Vec<Self>) -> Vec<Self> {
        expand_rules(elements)
    }

    fn collapse(elements: Vec<Self>) -> Vec<Self> {
        collapse_rules(elements)
    }
}

impl fmt::Display for SecurityGroupRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ", self.direction)?;
        match self.protocol {
            Protocol::All => f.write_str("all")?,
            p => {
                let (from, to) = self.identity_ports();
                write!(f, "{p} {from}-{to}")?;
            }
        }
        let sources: Vec<String> = self.sources.iter().map(ToString::to_string).collect();
        write!(f, " [{}]", sources.join(", "))
    }
}

// ── Expansion ────────────────────────────────────────────────────────

/// Split rules into one element per source, deduplicating sources.
pub fn expand_rules(rules: Vec<SecurityGroupRule>) -> Vec<SecurityGroupRule> {
    let mut out = Vec::with_capacity(rules.len());
    for rule in rules {
        let rule = rule.normalized();
        if rule.sources.len() <= 1 {
            out.push(rule);
            continue;
        }
        let mut sources = rule.sources.clone();
        let mut seen = std::collections::HashSet::new();
        sources.retain(|s| seen.insert(s.canonical()));
        out.extend(sources.into_iter().map(|source| SecurityGroupRule {
            sources: vec![source],
            ..rule.clone()
        }));
    }
    out
}

/// Merge rules sharing direction, protocol, ports and description into one
/// rule per permission. First-seen order is kept.
pub fn collapse_rules(rules: Vec<SecurityGroupRule>) -> Vec<SecurityGroupRule> {
    type Group = (RuleDirection, Protocol, Option<i32>, Option<i32>, Option<String>);

    let mut index: HashMap<Group, usize> = HashMap::new();
    let mut out: Vec<SecurityGroupRule> = Vec::new();

    for rule in rules {
        let rule = rule.normalized();
        let group = (
            rule.direction,
            rule.protocol,
            rule.from_port,
            rule.to_port,
            rule.description.clone(),
        );
        if let Some(existing) = index.get(&group).and_then(|&i| out.get_mut(i)) {
            for source in rule.sources {
                if !existing.sources.contains(&source) {
                    existing.sources.push(source);
                }
            }
            continue;
        }
        index.insert(group, out.len());
        out.push(rule);
    }
    out
}
