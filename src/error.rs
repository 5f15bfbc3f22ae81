//! Error types for the Strata SDK.
//!
//! Each variant carries enough context (path, version, field name) to
//! diagnose a failure without re-enabling verbose tracing. Decode failures
//! are always wrapped with the path that produced them, never swallowed.

use chrono::{DateTime, Utc};

/// Errors from the transport layer: HTTP, cancellation, envelope parsing.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The caller's cancellation token fired before or during a round trip.
    #[error("request cancelled")]
    Cancelled,

    /// The request exceeded the configured deadline.
    #[error("request timed out")]
    Timeout,

    /// The server rejected the HTTP method (405). Servers predating
    /// merge-patch support answer partial writes this way.
    #[error("method not allowed: {message}")]
    MethodNotAllowed { message: String },

    /// The token's policy does not permit the operation (403).
    #[error("permission denied: {message}")]
    PermissionDenied { message: String },

    /// A write was rejected by a check-and-set precondition (409).
    #[error("write conflict: {message}")]
    Conflict { message: String },

    /// Any other non-success response from the server.
    #[error("server error {status}: {message}")]
    Api { status: u16, message: String },

    /// Network or HTTP client failure.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The response body was not valid JSON.
    #[error("invalid response body: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors produced while normalizing a wire response into typed records.
///
/// A response that triggers one of these was *present* but structurally
/// wrong — distinct from not-found, which never reaches the decoders.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// A field the wire shape promises was absent.
    #[error("missing expected field '{field}'")]
    MissingField { field: String },

    /// A field held a value of the wrong runtime type.
    #[error("unexpected type for '{field}': found {found}")]
    UnexpectedType { field: String, found: &'static str },

    /// A key in the versions map did not parse as a version number.
    #[error("invalid version key '{key}' in versions map")]
    InvalidVersionKey { key: String },

    /// A metadata record did not match its declared field layout.
    #[error("cannot decode {what}: {source}")]
    Record {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Reasons a rollback target fails validation.
///
/// The rollback's final write is never issued when any of these fire.
#[derive(Debug, thiserror::Error)]
pub enum RollbackError {
    /// The target version carries no payload.
    #[error("target version has no data")]
    NoData,

    /// The target version carries no version metadata.
    #[error("target version has no version metadata")]
    NoVersionMetadata,

    /// The target version was soft-deleted.
    #[error("target version was deleted at {deletion_time}")]
    Deleted { deletion_time: DateTime<Utc> },

    /// The target version's payload has been irreversibly destroyed.
    #[error("target version has been destroyed")]
    Destroyed,
}

/// All errors returned by the public SDK surface.
#[derive(Debug, thiserror::Error)]
pub enum StrataError {
    /// Missing or invalid client configuration.
    #[error("strata config error: {0}")]
    Config(String),

    /// No secret exists at the path.
    #[error("no secret found at '{path}'")]
    NotFound { path: String },

    /// No secret with the requested version exists at the path.
    #[error("no secret with version {version} found at '{path}'")]
    VersionNotFound { path: String, version: u64 },

    /// The response arrived but its shape violates the wire contract.
    #[error("malformed response from '{path}': {source}")]
    Decode {
        path: String,
        #[source]
        source: DecodeError,
    },

    /// A write succeeded at the HTTP layer but returned no body to decode.
    #[error("no secret was written to '{path}': empty response")]
    EmptyWriteResponse { path: String },

    /// A check-and-set write lost the race to a concurrent writer.
    #[error("concurrent modification of '{path}': {message}")]
    CasMismatch { path: String, message: String },

    /// A rollback target failed one of the safety checks.
    #[error("cannot roll back '{path}' to version {version}: {source}")]
    Rollback {
        path: String,
        version: u64,
        #[source]
        source: RollbackError,
    },

    /// The token's policy lacks the "patch" capability required for
    /// server-side merge-patch.
    #[error("permission denied patching '{path}': the token's policy needs the \"patch\" capability ({message})")]
    PatchDenied { path: String, message: String },

    /// An option value was invalid. Reported before any network round trip.
    #[error("invalid option: {reason}")]
    InvalidOption { reason: String },

    /// The transport layer failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
}
