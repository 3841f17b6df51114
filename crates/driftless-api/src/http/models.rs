// Wire envelopes for the JSON collection API.

use serde::{Deserialize, Serialize};

use crate::types::{LifecycleState, VersionToken};

/// Body of an add / remove / modify call.
#[derive(Debug, Serialize)]
pub(crate) struct ModifyRequest<'a, E> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<VersionToken>,
    pub add: &'a [E],
    pub remove: &'a [E],
}

/// Body of a whole-collection replacement.
#[derive(Debug, Serialize)]
pub(crate) struct ReplaceRequest<'a, E> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<VersionToken>,
    pub entries: &'a [E],
}

/// Acknowledgement of a mutating call. Versioned endpoints echo the token
/// the collection moved to.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct MutationResponse {
    #[serde(default)]
    pub version: Option<VersionToken>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct StateResponse {
    pub state: LifecycleState,
}

/// Error body returned alongside non-2xx statuses. Both fields are optional;
/// some endpoints return plain text instead.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}
