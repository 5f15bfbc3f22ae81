//! Versioned secret operations over a single mount.
//!
//! [`Kv`] is the public surface of the protocol: reads and writes of
//! versioned secrets, partial updates, per-version lifecycle management
//! (soft delete, undelete, destroy), and rollback. It composes paths as
//! `<mount>/<segment>/<name>` and drives a [`Transport`] — one to three
//! strictly sequential round trips per call, no state kept between calls.
//!
//! The multi-step operations (read-then-write patch, rollback) never lock
//! anything. Consistency comes from check-and-set tokens on the final
//! write: a concurrent writer turns the write into
//! [`StrataError::CasMismatch`] instead of being silently overwritten.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::error::{DecodeError, RollbackError, StrataError, TransportError};
use crate::secret::{
    decode_full_metadata, decode_read_response, decode_write_response, json_type, KvMetadata,
    KvSecret, VersionMetadata,
};
use crate::transport::Transport;

/// Patch strategy name for a single server-side merge-patch round trip.
pub const PATCH_METHOD_MERGE: &str = "patch";
/// Patch strategy name for client-side read-then-write with check-and-set.
pub const PATCH_METHOD_READ_WRITE: &str = "rw";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PatchMethod {
    Merge,
    ReadThenWrite,
}

/// Options for write-class operations.
///
/// Named fields cover the options this crate interprets. Everything in
/// `extra` is forwarded to the server unchanged, so new server-side options
/// work without an SDK upgrade. The recognized keys (`cas`, `method`) are
/// type-checked even when they arrive through `extra`.
#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    /// Check-and-set guard: the write succeeds only if the secret's current
    /// version equals this value. `Some(0)` allows the write only if the
    /// secret does not exist yet.
    pub cas: Option<u64>,
    /// Patch strategy: [`PATCH_METHOD_MERGE`] (server-side merge-patch, the
    /// default) or [`PATCH_METHOD_READ_WRITE`] (client-side
    /// read-then-write).
    pub method: Option<String>,
    /// Additional options forwarded to the server uninterpreted.
    pub extra: HashMap<String, Value>,
}

impl WriteOptions {
    /// Options carrying only a check-and-set version.
    #[must_use]
    pub fn with_cas(cas: u64) -> Self {
        Self {
            cas: Some(cas),
            ..Self::default()
        }
    }

    /// Options carrying only a patch strategy.
    #[must_use]
    pub fn with_method(method: impl Into<String>) -> Self {
        Self {
            method: Some(method.into()),
            ..Self::default()
        }
    }

    /// Wire form: the `options` object of a write body. The named fields
    /// overwrite same-named keys smuggled in through `extra`.
    fn to_wire(&self) -> Result<Map<String, Value>, StrataError> {
        let mut wire = Map::new();

        for (key, value) in &self.extra {
            match key.as_str() {
                "cas" if !value.is_u64() => {
                    return Err(StrataError::InvalidOption {
                        reason: format!(
                            "\"cas\" must be an unsigned integer version, got {}",
                            json_type(value)
                        ),
                    })
                }
                "method" if !value.is_string() => {
                    return Err(StrataError::InvalidOption {
                        reason: format!(
                            "\"method\" must be a string \"{PATCH_METHOD_MERGE}\" or \"{PATCH_METHOD_READ_WRITE}\", got {}",
                            json_type(value)
                        ),
                    })
                }
                _ => {}
            }
            wire.insert(key.clone(), value.clone());
        }

        if let Some(cas) = self.cas {
            wire.insert("cas".to_owned(), Value::from(cas));
        }
        if let Some(method) = &self.method {
            wire.insert("method".to_owned(), Value::from(method.clone()));
        }

        Ok(wire)
    }

    /// Resolve the patch strategy. Runs before any network interaction, so
    /// a bad strategy name never costs a round trip.
    fn patch_method(&self) -> Result<PatchMethod, StrataError> {
        let name = match (&self.method, self.extra.get("method")) {
            (Some(method), _) => Some(method.clone()),
            (None, Some(Value::String(method))) => Some(method.clone()),
            (None, Some(other)) => {
                return Err(StrataError::InvalidOption {
                    reason: format!(
                        "\"method\" must be a string \"{PATCH_METHOD_MERGE}\" or \"{PATCH_METHOD_READ_WRITE}\", got {}",
                        json_type(other)
                    ),
                })
            }
            (None, None) => None,
        };

        match name.as_deref() {
            None | Some("") | Some(PATCH_METHOD_MERGE) => Ok(PatchMethod::Merge),
            Some(PATCH_METHOD_READ_WRITE) => Ok(PatchMethod::ReadThenWrite),
            Some(other) => Err(StrataError::InvalidOption {
                reason: format!(
                    "unsupported patch method '{other}': use \"{PATCH_METHOD_MERGE}\" or \"{PATCH_METHOD_READ_WRITE}\""
                ),
            }),
        }
    }
}

fn wrap_write_body(
    data: &HashMap<String, Value>,
    opts: &WriteOptions,
) -> Result<Value, StrataError> {
    let mut body = Map::new();
    body.insert(
        "data".to_owned(),
        Value::Object(data.iter().map(|(k, v)| (k.clone(), v.clone())).collect()),
    );

    let options = opts.to_wire()?;
    if !options.is_empty() {
        body.insert("options".to_owned(), Value::Object(options));
    }

    Ok(Value::Object(body))
}

/// Versioned secret operations bound to one mount.
///
/// Stateless between calls; cheap to create per mount.
pub struct Kv {
    transport: Arc<dyn Transport>,
    mount: String,
}

impl Kv {
    /// Bind a transport to the engine mounted at `mount` (e.g. `"secret"`).
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, mount: impl Into<String>) -> Self {
        Self {
            transport,
            mount: mount.into(),
        }
    }

    fn data_path(&self, path: &str) -> String {
        format!("{}/data/{}", self.mount, path)
    }

    fn metadata_path(&self, path: &str) -> String {
        format!("{}/metadata/{}", self.mount, path)
    }

    /// Read the latest version of the secret at `path`.
    ///
    /// A soft-deleted latest version is not an error: `data` comes back
    /// `None` and the version metadata carries the deletion time.
    ///
    /// # Errors
    ///
    /// - [`StrataError::NotFound`] if nothing exists at `path`.
    /// - [`StrataError::Decode`] if the response violates the wire contract.
    pub async fn get(&self, path: &str) -> Result<KvSecret, StrataError> {
        let read_path = self.data_path(path);
        debug!(path = %read_path, "reading secret");

        let raw = self
            .transport
            .read(&read_path, &[])
            .await?
            .ok_or_else(|| StrataError::NotFound {
                path: read_path.clone(),
            })?;

        decode_read_response(&raw).map_err(|source| StrataError::Decode {
            path: read_path,
            source,
        })
    }

    /// Read a specific version of the secret at `path`.
    ///
    /// # Errors
    ///
    /// - [`StrataError::VersionNotFound`] if the version does not exist.
    /// - [`StrataError::Decode`] if the response violates the wire contract.
    pub async fn get_version(&self, path: &str, version: u64) -> Result<KvSecret, StrataError> {
        let read_path = self.data_path(path);
        debug!(path = %read_path, version, "reading secret version");

        let query = [("version".to_owned(), version.to_string())];
        let raw = self
            .transport
            .read(&read_path, &query)
            .await?
            .ok_or_else(|| StrataError::VersionNotFound {
                path: read_path.clone(),
                version,
            })?;

        decode_read_response(&raw).map_err(|source| StrataError::Decode {
            path: read_path,
            source,
        })
    }

    /// List metadata for every version of the secret, strictly ascending by
    /// version number.
    ///
    /// # Errors
    ///
    /// Same conditions as [`get_metadata`](Kv::get_metadata).
    pub async fn list_versions(&self, path: &str) -> Result<Vec<VersionMetadata>, StrataError> {
        let metadata = self.get_metadata(path).await?;
        Ok(metadata.versions.into_values().collect())
    }

    /// Read the full metadata for the secret: retention policy, timestamps,
    /// and the per-version map.
    ///
    /// # Errors
    ///
    /// - [`StrataError::NotFound`] if no metadata exists at `path`.
    /// - [`StrataError::Decode`] if the response violates the wire contract.
    pub async fn get_metadata(&self, path: &str) -> Result<KvMetadata, StrataError> {
        let read_path = self.metadata_path(path);
        debug!(path = %read_path, "reading secret metadata");

        let raw = self
            .transport
            .read(&read_path, &[])
            .await?
            .ok_or_else(|| StrataError::NotFound {
                path: read_path.clone(),
            })?;

        decode_full_metadata(&raw).map_err(|source| StrataError::Decode {
            path: read_path,
            source,
        })
    }

    /// Write `data` as a new version of the secret at `path`.
    ///
    /// The previous version stays reachable through
    /// [`get_version`](Kv::get_version). The returned secret's `data` is
    /// `None`: write responses carry the new version's metadata, not an
    /// echo of the payload.
    ///
    /// # Errors
    ///
    /// - [`StrataError::CasMismatch`] if a check-and-set guard rejected the
    ///   write.
    /// - [`StrataError::EmptyWriteResponse`] if the server returned no body.
    /// - [`StrataError::Decode`] if the response violates the wire contract.
    pub async fn put(
        &self,
        path: &str,
        data: &HashMap<String, Value>,
        opts: &WriteOptions,
    ) -> Result<KvSecret, StrataError> {
        let write_path = self.data_path(path);
        debug!(path = %write_path, cas = ?opts.cas, "writing secret");

        let body = wrap_write_body(data, opts)?;
        let raw = match self.transport.write(&write_path, &body).await {
            Ok(raw) => raw,
            Err(TransportError::Conflict { message }) => {
                return Err(StrataError::CasMismatch {
                    path: write_path,
                    message,
                })
            }
            Err(other) => return Err(other.into()),
        };

        let raw = raw.ok_or_else(|| StrataError::EmptyWriteResponse {
            path: write_path.clone(),
        })?;

        decode_write_response(&raw).map_err(|source| StrataError::Decode {
            path: write_path,
            source,
        })
    }

    /// Apply a partial update to the latest version of the secret: keys in
    /// `data` are added or overwritten, everything else is preserved.
    ///
    /// By default this is a single server-side merge-patch round trip. A
    /// server without merge-patch support triggers a transparent fallback
    /// to read-then-write — same result, one extra round trip. The
    /// strategy can be forced through [`WriteOptions::method`].
    ///
    /// # Errors
    ///
    /// - [`StrataError::InvalidOption`] for an unrecognized strategy name,
    ///   before any network interaction.
    /// - [`StrataError::PatchDenied`] if the token's policy lacks the
    ///   "patch" capability.
    /// - [`StrataError::NotFound`] if there is no existing secret to patch
    ///   (read-then-write only).
    /// - [`StrataError::CasMismatch`] if a concurrent writer raced the
    ///   read-then-write cycle.
    pub async fn patch(
        &self,
        path: &str,
        data: &HashMap<String, Value>,
        opts: &WriteOptions,
    ) -> Result<KvSecret, StrataError> {
        match opts.patch_method()? {
            PatchMethod::Merge => self.merge_patch(path, data, opts).await,
            PatchMethod::ReadThenWrite => self.read_then_write(path, data).await,
        }
    }

    async fn merge_patch(
        &self,
        path: &str,
        data: &HashMap<String, Value>,
        opts: &WriteOptions,
    ) -> Result<KvSecret, StrataError> {
        let patch_path = self.data_path(path);
        debug!(path = %patch_path, "merge-patching secret");

        let body = wrap_write_body(data, opts)?;
        let raw = match self.transport.patch(&patch_path, &body).await {
            Ok(raw) => raw,
            Err(TransportError::MethodNotAllowed { .. }) => {
                // Pre-merge-patch server. Same result, one extra round trip.
                warn!(path = %patch_path, "server does not support merge-patch, falling back to read-then-write");
                return self.read_then_write(path, data).await;
            }
            Err(TransportError::PermissionDenied { message }) => {
                return Err(StrataError::PatchDenied {
                    path: patch_path,
                    message,
                })
            }
            Err(TransportError::Conflict { message }) => {
                return Err(StrataError::CasMismatch {
                    path: patch_path,
                    message,
                })
            }
            Err(other) => return Err(other.into()),
        };

        let raw = raw.ok_or_else(|| StrataError::EmptyWriteResponse {
            path: patch_path.clone(),
        })?;

        decode_write_response(&raw).map_err(|source| StrataError::Decode {
            path: patch_path,
            source,
        })
    }

    async fn read_then_write(
        &self,
        path: &str,
        new_data: &HashMap<String, Value>,
    ) -> Result<KvSecret, StrataError> {
        let existing = self.get(path).await?;

        // Patch needs something to patch: a soft-deleted latest version has
        // no payload to merge over.
        let Some(current) = existing.data else {
            return Err(StrataError::NotFound {
                path: self.data_path(path),
            });
        };
        let Some(meta) = existing.version_metadata else {
            return Err(StrataError::Decode {
                path: self.data_path(path),
                source: DecodeError::MissingField {
                    field: "metadata".to_owned(),
                },
            });
        };

        // New keys overwrite, untouched keys survive.
        let mut combined = current;
        for (key, value) in new_data {
            combined.insert(key.clone(), value.clone());
        }

        // Pin the write to the version just read so a racing writer is
        // rejected instead of silently overwritten.
        self.put(path, &combined, &WriteOptions::with_cas(meta.version))
            .await
    }

    /// Soft-delete the latest version of the secret. Recoverable with
    /// [`undelete`](Kv::undelete); use [`delete_versions`](Kv::delete_versions)
    /// for older versions.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::Transport`] on network or server failures.
    pub async fn delete(&self, path: &str) -> Result<(), StrataError> {
        let delete_path = self.data_path(path);
        debug!(path = %delete_path, "soft-deleting latest version");

        self.transport.delete(&delete_path).await?;
        Ok(())
    }

    /// Soft-delete specific versions of the secret. An empty version list
    /// is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::Transport`] on network or server failures.
    pub async fn delete_versions(&self, path: &str, versions: &[u64]) -> Result<(), StrataError> {
        if versions.is_empty() {
            return Ok(());
        }

        let delete_path = format!("{}/delete/{}", self.mount, path);
        debug!(path = %delete_path, count = versions.len(), "soft-deleting versions");

        // This endpoint takes its version list as strings.
        let list: Vec<String> = versions.iter().map(ToString::to_string).collect();
        self.transport
            .write(&delete_path, &json!({ "versions": list }))
            .await?;
        Ok(())
    }

    /// Delete the secret's metadata and every version. Irreversible.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::Transport`] on network or server failures.
    pub async fn delete_metadata(&self, path: &str) -> Result<(), StrataError> {
        let delete_path = self.metadata_path(path);
        debug!(path = %delete_path, "deleting secret metadata and all versions");

        self.transport.delete(&delete_path).await?;
        Ok(())
    }

    /// Restore soft-deleted versions so reads can fetch them again.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::Transport`] on network or server failures.
    pub async fn undelete(&self, path: &str, versions: &[u64]) -> Result<(), StrataError> {
        let undelete_path = format!("{}/undelete/{}", self.mount, path);
        debug!(path = %undelete_path, count = versions.len(), "undeleting versions");

        self.transport
            .write(&undelete_path, &json!({ "versions": versions }))
            .await?;
        Ok(())
    }

    /// Permanently remove the payload of specific versions. Unlike a soft
    /// delete, destroyed data cannot be undeleted.
    ///
    /// # Errors
    ///
    /// Returns [`StrataError::Transport`] on network or server failures.
    pub async fn destroy(&self, path: &str, versions: &[u64]) -> Result<(), StrataError> {
        let destroy_path = format!("{}/destroy/{}", self.mount, path);
        debug!(path = %destroy_path, count = versions.len(), "destroying versions");

        self.transport
            .write(&destroy_path, &json!({ "versions": versions }))
            .await?;
        Ok(())
    }

    /// Make `to_version`'s payload the newest version of the secret.
    ///
    /// The current version number keeps advancing — rollback writes a new
    /// version, it never rewrites history. The final write is pinned with
    /// check-and-set to the version that was latest when the rollback
    /// started, so a concurrent writer aborts the rollback instead of
    /// being silently overwritten.
    ///
    /// # Errors
    ///
    /// - [`StrataError::NotFound`] if nothing exists at `path`.
    /// - [`StrataError::VersionNotFound`] if `to_version` does not exist.
    /// - [`StrataError::Rollback`] if the target version is deleted,
    ///   destroyed, or otherwise unusable; the final write is not issued.
    /// - [`StrataError::CasMismatch`] if a concurrent writer raced the
    ///   rollback.
    pub async fn rollback(&self, path: &str, to_version: u64) -> Result<KvSecret, StrataError> {
        debug!(path = %path, to_version, "rolling back secret");

        // The latest version anchors the final check-and-set.
        let latest = self.get(path).await?;
        let Some(latest_meta) = latest.version_metadata else {
            return Err(StrataError::Decode {
                path: self.data_path(path),
                source: DecodeError::MissingField {
                    field: "metadata".to_owned(),
                },
            });
        };

        let target = self.get_version(path, to_version).await?;
        let data = validate_rollback_target(&target).map_err(|source| StrataError::Rollback {
            path: self.data_path(path),
            version: to_version,
            source,
        })?;

        self.put(path, data, &WriteOptions::with_cas(latest_meta.version))
            .await
    }
}

/// The safety checks guarding the final write of a rollback. Returns the
/// target's payload so the caller cannot write anything but what it
/// validated.
fn validate_rollback_target(target: &KvSecret) -> Result<&HashMap<String, Value>, RollbackError> {
    let data = target.data.as_ref().ok_or(RollbackError::NoData)?;
    let meta = target
        .version_metadata
        .as_ref()
        .ok_or(RollbackError::NoVersionMetadata)?;

    if let Some(deletion_time) = meta.deletion_time {
        return Err(RollbackError::Deleted { deletion_time });
    }
    if meta.destroyed {
        return Err(RollbackError::Destroyed);
    }

    Ok(data)
}
