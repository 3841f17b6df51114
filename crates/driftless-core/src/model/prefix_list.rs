// Managed prefix list entries. Lists are versioned: every modification
// names the version it was computed against.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::identity::{FieldWriter, Keyed};
use crate::model::canonical_cidr;
use crate::policy::{ReconcilePolicy, Reconcilable};

const MAX_DESCRIPTION_LEN: usize = 255;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefixListEntry {
    pub cidr: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl PrefixListEntry {
    pub fn new(cidr: impl Into<String>) -> Self {
        Self {
            cidr: cidr.into(),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

impl Keyed for PrefixListEntry {
    const KIND: &'static str = "plentry";

    fn write_identity(&self, fields: &mut FieldWriter) {
        let cidr =
            canonical_cidr(&self.cidr).map_or_else(|| self.cidr.trim().to_owned(), |(_, t)| t);
        fields.scalar("cidr", cidr);
    }
}

impl Reconcilable for PrefixListEntry {
    /// One versioned modify call; a changed description replaces the entry
    /// within that same call.
    const POLICY: ReconcilePolicy = ReconcilePolicy::versioned().recreate_drift();

    fn validate(&self) -> Result<(), CoreError> {
        if canonical_cidr(&self.cidr).is_none() {
            return Err(CoreError::Validation {
                message: format!("{:?} is not a CIDR block", self.cidr),
            });
        }
        if self
            .description
            .as_ref()
            .is_some_and(|d| d.chars().count() > MAX_DESCRIPTION_LEN)
        {
            return Err(CoreError::Validation {
                message: format!(
                    "description of {} exceeds {MAX_DESCRIPTION_LEN} characters",
                    self.cidr
                ),
            });
        }
        Ok(())
    }
}

impl fmt::Display for PrefixListEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.cidr)
    }
}
