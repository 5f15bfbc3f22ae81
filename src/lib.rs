//! Official Strata SDK for Rust.
//!
//! Strata is a versioned key-value secret store: every write creates a new
//! version, versions can be soft-deleted (recoverable) or destroyed
//! (irreversible), and writes can be guarded with an optimistic
//! check-and-set token. This crate implements the client side of that
//! protocol — version-aware reads and writes, partial updates with
//! automatic strategy fallback, and rollback with safety checks.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::collections::HashMap;
//! use strata_sdk::{Strata, WriteOptions};
//!
//! # async fn example() -> Result<(), strata_sdk::StrataError> {
//! let client = Strata::new(std::env::var("STRATA_TOKEN").unwrap_or_default())?;
//! let kv = client.kv("secret");
//!
//! let mut data = HashMap::new();
//! data.insert("password".to_owned(), "correct-horse".into());
//! kv.put("myapp/db", &data, &WriteOptions::default()).await?;
//!
//! let secret = kv.get("myapp/db").await?;
//! if let Some(data) = &secret.data {
//!     println!("password: {}", data["password"]);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Protocol logic lives behind the [`Transport`] trait, so tests and
//! embedded setups can drive [`Kv`] without a network.

mod error;
mod kv;
mod secret;
mod transport;

pub use error::{DecodeError, RollbackError, StrataError, TransportError};
pub use kv::{Kv, WriteOptions, PATCH_METHOD_MERGE, PATCH_METHOD_READ_WRITE};
pub use secret::{KvMetadata, KvSecret, VersionMetadata};
pub use transport::{HttpTransport, Transport};

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

const DEFAULT_BASE_URL: &str = "https://api.strata.dev";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for the Strata client.
#[derive(Debug, Clone)]
pub struct StrataConfig {
    /// Service token or auth token.
    pub token: String,
    /// API base URL. Default: `https://api.strata.dev`.
    pub base_url: String,
    /// Request timeout. Default: 10 seconds.
    pub timeout: Duration,
    /// Cancellation token observed before and during every round trip.
    /// Defaults to a token that never fires.
    pub cancel: CancellationToken,
}

impl Default for StrataConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            base_url: DEFAULT_BASE_URL.to_owned(),
            timeout: DEFAULT_TIMEOUT,
            cancel: CancellationToken::new(),
        }
    }
}

/// Strata SDK client: an authenticated HTTP channel plus accessors for the
/// per-mount operation facades.
pub struct Strata {
    transport: Arc<HttpTransport>,
}

impl Strata {
    /// Create a client with just a token. Reads other settings from env
    /// vars (`STRATA_TOKEN`, `STRATA_URL`).
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::Config`] if the token is empty.
    pub fn new(token: impl Into<String>) -> Result<Self, StrataError> {
        Self::with_config(StrataConfig {
            token: token.into(),
            ..StrataConfig::default()
        })
    }

    /// Create a client with full configuration. Empty fields fall back to
    /// env vars, then to defaults.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::Config`] if no token is configured.
    pub fn with_config(cfg: StrataConfig) -> Result<Self, StrataError> {
        let token = first_non_empty(&[
            &cfg.token,
            &std::env::var("STRATA_TOKEN").unwrap_or_default(),
        ]);
        if token.is_empty() {
            return Err(StrataError::Config(
                "missing token: set STRATA_TOKEN or pass a token in the config".to_owned(),
            ));
        }

        let base_url = first_non_empty(&[
            &cfg.base_url,
            &std::env::var("STRATA_URL").unwrap_or_default(),
            DEFAULT_BASE_URL,
        ])
        .trim_end_matches('/')
        .to_owned();

        let timeout = if cfg.timeout.is_zero() {
            DEFAULT_TIMEOUT
        } else {
            cfg.timeout
        };

        let transport = HttpTransport::new(base_url, token, timeout, cfg.cancel)?;
        Ok(Self {
            transport: Arc::new(transport),
        })
    }

    /// Versioned secret operations for the engine mounted at `mount`.
    #[must_use]
    pub fn kv(&self, mount: impl Into<String>) -> Kv {
        Kv::new(self.transport.clone(), mount)
    }
}

fn first_non_empty(vals: &[&str]) -> String {
    for v in vals {
        if !v.is_empty() {
            return (*v).to_owned();
        }
    }
    String::new()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn empty_token_is_a_config_error() {
        // Guard against a token leaking in from the environment.
        if std::env::var("STRATA_TOKEN").is_ok_and(|t| !t.is_empty()) {
            return;
        }
        let result = Strata::new("");
        assert!(matches!(result, Err(StrataError::Config(_))));
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let client = Strata::with_config(StrataConfig {
            token: "t".to_owned(),
            base_url: "https://strata.internal/".to_owned(),
            ..StrataConfig::default()
        });
        assert!(client.is_ok());
    }

    #[test]
    fn first_non_empty_picks_in_order() {
        assert_eq!(first_non_empty(&["", "b", "c"]), "b");
        assert_eq!(first_non_empty(&["", ""]), "");
    }
}
