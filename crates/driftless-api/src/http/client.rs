// JSON-over-HTTP collection client
//
// Wraps `reqwest::Client` with collection-scoped URL construction,
// version-token plumbing, and status classification. This is the
// reference transport; cloud SDK wrappers implement the same traits.

use std::time::Duration;

use reqwest::StatusCode;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, trace};
use url::Url;

use super::models::{
    ErrorBody, ModifyRequest, MutationResponse, ReplaceRequest, StateResponse,
};
use crate::client::{CollectionClient, StatePoller};
use crate::error::Error;
use crate::transport::TransportConfig;
use crate::types::{LifecycleState, Mutation, Observed, VersionToken};

/// Codes a 409 response may carry to signal "already exists" rather than
/// a version conflict.
const DUPLICATE_CODES: &[&str] = &["Duplicate", "AlreadyExists", "InvalidPermission.Duplicate"];

/// HTTP client for one remote collection type.
///
/// Endpoints, relative to `base_url`:
///
/// - `GET  {collection}/{parent}` reads entries and version
/// - `POST {collection}/{parent}/entries` adds and/or removes entries
/// - `PUT  {collection}/{parent}/entries` replaces the whole collection
/// - `GET  {collection}/{id}/state` polls the lifecycle state
#[derive(Debug, Clone)]
pub struct HttpCollectionClient {
    http: reqwest::Client,
    base_url: Url,
    collection: String,
}

impl HttpCollectionClient {
    /// Create a client from a `TransportConfig`.
    pub fn new(
        base_url: Url,
        collection: impl Into<String>,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Self::with_client(http, base_url, collection)
    }

    /// Create a client with a pre-built `reqwest::Client`.
    pub fn with_client(
        http: reqwest::Client,
        base_url: Url,
        collection: impl Into<String>,
    ) -> Result<Self, Error> {
        if base_url.cannot_be_a_base() {
            return Err(Error::InvalidUrl(
                url::ParseError::RelativeUrlWithCannotBeABaseBase,
            ));
        }
        Ok(Self {
            http,
            base_url,
            collection: collection.into(),
        })
    }

    /// The endpoint base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// The collection path segment this client addresses.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    // ── URL builders ─────────────────────────────────────────────────

    /// Build `{base}/{collection}/{segments...}` with each segment
    /// percent-encoded, so parent IDs never alter the path structure.
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().push(&self.collection).extend(segments);
        }
        url
    }

    // ── Response handling ────────────────────────────────────────────

    /// Deserialize a successful response or classify a failure.
    async fn parse<T: DeserializeOwned>(
        resp: reqwest::Response,
        resource: &str,
    ) -> Result<T, Error> {
        let status = resp.status();
        if !status.is_success() {
            return Err(classify(resp, resource).await);
        }

        let body = resp.text().await.map_err(Error::Transport)?;
        serde_json::from_str(&body).map_err(|e| {
            let preview: String = body.chars().take(200).collect();
            Error::Deserialization {
                message: format!("{e} (body preview: {preview:?})"),
                body: body.clone(),
            }
        })
    }

    /// Accept any 2xx and pick the new version out of the body, if the
    /// endpoint reports one. Empty and non-JSON bodies carry no version.
    async fn mutation_version(
        resp: reqwest::Response,
        resource: &str,
    ) -> Result<Option<VersionToken>, Error> {
        if !resp.status().is_success() {
            return Err(classify(resp, resource).await);
        }
        let body = resp.text().await.map_err(Error::Transport)?;
        let ack: MutationResponse = serde_json::from_str(&body).unwrap_or_default();
        Ok(ack.version)
    }
}

// ── Status classification ────────────────────────────────────────────

async fn classify(resp: reqwest::Response, resource: &str) -> Error {
    let status = resp.status();
    let retry_after = resp
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs);

    let raw = resp.text().await.unwrap_or_default();
    let body: ErrorBody = serde_json::from_str(&raw).unwrap_or_default();
    let message = body
        .message
        .clone()
        .unwrap_or_else(|| raw.chars().take(200).collect());
    let resource = resource.to_owned();

    trace!(%status, code = ?body.code, "classifying error response");

    match status {
        StatusCode::NOT_FOUND => Error::NotFound { resource },
        StatusCode::TOO_MANY_REQUESTS => Error::Throttled { retry_after },
        StatusCode::CONFLICT => {
            let duplicate = body
                .code
                .as_deref()
                .is_some_and(|c| DUPLICATE_CODES.contains(&c));
            if duplicate {
                Error::Duplicate { resource, message }
            } else {
                Error::Conflict { resource, message }
            }
        }
        StatusCode::PRECONDITION_FAILED => Error::PreconditionFailed { resource, message },
        s if s.is_client_error() => Error::Rejected {
            status: s.as_u16(),
            code: body.code,
            message,
        },
        s => Error::Api {
            status: s.as_u16(),
            code: body.code,
            message,
        },
    }
}

// ── Trait implementations ────────────────────────────────────────────

impl StatePoller for HttpCollectionClient {
    type State = LifecycleState;

    async fn poll_state(&self, id: &str) -> Result<LifecycleState, Error> {
        let url = self.url(&[id, "state"]);
        debug!("GET {}", url);

        let resp = self.http.get(url).send().await.map_err(Error::Transport)?;
        let state: StateResponse = Self::parse(resp, id).await?;
        Ok(state.state)
    }
}

impl<E> CollectionClient<E> for HttpCollectionClient
where
    E: Serialize + DeserializeOwned + Send + Sync,
{
    async fn read(&self, parent: &str) -> Result<Observed<E>, Error> {
        let url = self.url(&[parent]);
        debug!("GET {}", url);

        let resp = self.http.get(url).send().await.map_err(Error::Transport)?;
        Self::parse(resp, parent).await
    }

    async fn mutate(
        &self,
        parent: &str,
        mutation: Mutation<E>,
    ) -> Result<Option<VersionToken>, Error> {
        let url = self.url(&[parent, "entries"]);
        let op = mutation.operation();

        let builder = match &mutation {
            Mutation::Add { version, elements } => self.http.post(url.clone()).json(&ModifyRequest {
                version: *version,
                add: elements,
                remove: &[],
            }),
            Mutation::Remove { version, elements } => {
                self.http.post(url.clone()).json(&ModifyRequest {
                    version: *version,
                    add: &[],
                    remove: elements,
                })
            }
            Mutation::Modify {
                version,
                add,
                remove,
            } => self.http.post(url.clone()).json(&ModifyRequest {
                version: *version,
                add,
                remove,
            }),
            Mutation::Replace { version, elements } => {
                self.http.put(url.clone()).json(&ReplaceRequest {
                    version: *version,
                    entries: elements,
                })
            }
        };

        debug!(operation = op, count = mutation.len(), "mutate {}", url);

        let resp = builder.send().await.map_err(Error::Transport)?;
        Self::mutation_version(resp, parent).await
    }
}
