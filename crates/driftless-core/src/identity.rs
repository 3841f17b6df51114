// ── Synthetic identity ──
//
// Remote sub-objects such as security group rules have no native ID. Each
// element type declares its identity-bearing fields through `Keyed`; the
// hasher turns them into a canonical string (fields ordered by name, set
// members sorted) and digests it. Decorative fields are simply never
// written.

use std::collections::BTreeMap;
use std::fmt::{self, Display, Write as _};
use std::str::FromStr;

use sha2::{Digest, Sha256};

use crate::error::CoreError;

// ── Keyed ────────────────────────────────────────────────────────────

/// An element type whose identity can be derived from its fields.
pub trait Keyed {
    /// Short type tag, prefixed to every key (`sgrule`, `eniaddr`...).
    const KIND: &'static str;

    /// Write every field that participates in identity.
    fn write_identity(&self, fields: &mut FieldWriter);

    fn synthetic_key(&self) -> SyntheticKey {
        IdentityHasher::hash(self)
    }
}

// ── FieldWriter ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
enum FieldValue {
    Scalar(String),
    Set(Vec<String>),
}

/// Collects identity fields keyed by static name.
///
/// Write order is irrelevant: fields are emitted sorted by name. Writing the
/// same name twice keeps the last value.
#[derive(Debug, Default)]
pub struct FieldWriter {
    fields: BTreeMap<&'static str, FieldValue>,
}

impl FieldWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// A single-valued field.
    pub fn scalar(&mut self, name: &'static str, value: impl Display) -> &mut Self {
        self.fields
            .insert(name, FieldValue::Scalar(value.to_string()));
        self
    }

    /// An optional single-valued field. Absent is written as empty, so it
    /// never acts as a wildcard.
    pub fn optional(&mut self, name: &'static str, value: Option<impl Display>) -> &mut Self {
        let value = value.map(|v| v.to_string()).unwrap_or_default();
        self.fields.insert(name, FieldValue::Scalar(value));
        self
    }

    /// An optional number. Absent is written as `0`.
    pub fn number(&mut self, name: &'static str, value: Option<i64>) -> &mut Self {
        self.scalar(name, value.unwrap_or(0))
    }

    pub fn flag(&mut self, name: &'static str, value: bool) -> &mut Self {
        self.scalar(name, value)
    }

    /// An unordered collection. Members are sorted and deduplicated by their
    /// canonical string form.
    pub fn set<I>(&mut self, name: &'static str, members: I) -> &mut Self
    where
        I: IntoIterator,
        I::Item: Display,
    {
        let mut members: Vec<String> = members.into_iter().map(|m| m.to_string()).collect();
        members.sort_unstable();
        members.dedup();
        self.fields.insert(name, FieldValue::Set(members));
        self
    }

    /// Length-prefixed encoding, so no field value can forge a separator.
    fn canonical(&self, kind: &str) -> String {
        let mut out = String::with_capacity(64);
        push_token(&mut out, kind);
        for (name, value) in &self.fields {
            out.push(';');
            push_token(&mut out, name);
            out.push('=');
            match value {
                FieldValue::Scalar(v) => push_token(&mut out, v),
                FieldValue::Set(members) => {
                    out.push('[');
                    for (i, m) in members.iter().enumerate() {
                        if i > 0 {
                            out.push(',');
                        }
                        push_token(&mut out, m);
                    }
                    out.push(']');
                }
            }
        }
        out
    }
}

fn push_token(out: &mut String, token: &str) {
    let _ = write!(out, "{}:{token}", token.len());
}

// ── IdentityHasher ───────────────────────────────────────────────────

/// Derives [`SyntheticKey`]s from [`Keyed`] elements.
pub struct IdentityHasher;

impl IdentityHasher {
    /// The canonical identity string of an element.
    pub fn canonical<E: Keyed + ?Sized>(element: &E) -> String {
        let mut fields = FieldWriter::new();
        element.write_identity(&mut fields);
        fields.canonical(E::KIND)
    }

    pub fn hash<E: Keyed + ?Sized>(element: &E) -> SyntheticKey {
        let digest = Sha256::digest(Self::canonical(element).as_bytes());
        let mut prefix = [0_u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        SyntheticKey {
            kind: E::KIND.to_owned(),
            digest: u64::from_be_bytes(prefix),
        }
    }
}

// ── SyntheticKey ─────────────────────────────────────────────────────

/// Stand-in identifier for a sub-object with no native ID.
///
/// Displays as `{kind}-{16 hex digits}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SyntheticKey {
    kind: String,
    digest: u64,
}

impl SyntheticKey {
    pub fn kind(&self) -> &str {
        &self.kind
    }
}

impl Display for SyntheticKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.kind, hex::encode(self.digest.to_be_bytes()))
    }
}

impl FromStr for SyntheticKey {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CoreError::Validation {
            message: format!("invalid synthetic key: {s:?}"),
        };

        let (kind, digest) = s.rsplit_once('-').ok_or_else(invalid)?;
        if kind.is_empty() || digest.len() != 16 {
            return Err(invalid());
        }
        let mut bytes = [0_u8; 8];
        hex::decode_to_slice(digest, &mut bytes).map_err(|_| invalid())?;

        Ok(Self {
            kind: kind.to_owned(),
            digest: u64::from_be_bytes(bytes),
        })
    }
}
