//! Charm store client with a verified local archive cache.
//!
//! [`CharmStore`] asks the store for a charm's revision and SHA-256 digest,
//! downloads the archive through a [`Transport`], and keeps it under
//! `<cache_dir>/<quote(reference)>.charm`. Downloads land in a temporary file
//! in the cache directory and are renamed into place only after the digest
//! matches, so readers never see a partial archive.
//!
//! # Examples
//!
//! ```no_run
//! use charm_store::{CharmStore, Repo, StoreConfig};
//!
//! let config = StoreConfig::with_default_cache()?;
//! let store = CharmStore::from_config(&config);
//! let archive = store.get(&charm_url::must_parse("cs:trusty/wordpress"))?;
//! println!("cached at {}", archive.display());
//! # Ok::<(), charm_store::StoreError>(())
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

mod transport;

use std::collections::HashMap;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use charm_url::{Reference, quote};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
#[cfg(feature = "http")]
pub use transport::HttpTransport;
pub use transport::Transport;

/// The public charm store.
pub const STORE_URL: &str = "https://store.juju.ubuntu.com";

/// File extension of cached archives.
pub const ARCHIVE_EXTENSION: &str = "charm";

// ============================================================================
// Configuration
// ============================================================================

/// Where to reach the store and where to cache archives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Store base URL, without a trailing slash.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Directory holding downloaded archives.
    pub cache_dir: PathBuf,
}

fn default_base_url() -> String {
    STORE_URL.to_owned()
}

impl StoreConfig {
    /// The public store with archives cached in `cache_dir`.
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_url: default_base_url(),
            cache_dir: cache_dir.into(),
        }
    }

    /// The public store with archives cached in the user's cache directory.
    ///
    /// # Errors
    ///
    /// [`StoreError::CacheDirUnavailable`] if the platform has no cache
    /// directory for the current user.
    pub fn with_default_cache() -> Result<Self> {
        let base = dirs::cache_dir().ok_or(StoreError::CacheDirUnavailable)?;
        Ok(Self::new(base.join("charm-store")))
    }
}

// ============================================================================
// Store protocol
// ============================================================================

/// The store's answer to a `charm-info` request for one reference.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfoResponse {
    /// Latest revision, or the requested one when pinned. Zero is valid.
    pub revision: u64,
    /// Hex-encoded SHA-256 of the archive.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sha256: String,
    /// Errors reported by the store.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    /// Warnings reported by the store.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Revision and digest of a stored archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharmInfo {
    /// The archive's revision.
    pub revision: u64,
    /// Hex-encoded SHA-256 of the archive.
    pub sha256: String,
}

/// A source of charm archives.
pub trait Repo {
    /// Revision and digest of the archive `reference` resolves to.
    fn info(&self, reference: &Reference) -> Result<CharmInfo>;

    /// Latest revision, ignoring any revision pinned on `reference`.
    fn latest(&self, reference: &Reference) -> Result<u64> {
        Ok(self.info(&reference.with_revision(None))?.revision)
    }

    /// Path to a verified local copy of the archive.
    fn get(&self, reference: &Reference) -> Result<PathBuf>;
}

// ============================================================================
// CharmStore
// ============================================================================

/// A [`Repo`] backed by a remote store and an on-disk cache.
#[derive(Debug, Clone)]
pub struct CharmStore<T> {
    transport: T,
    cache_dir: PathBuf,
}

#[cfg(feature = "http")]
impl CharmStore<HttpTransport> {
    /// A store client speaking HTTP to `config.base_url`.
    pub fn from_config(config: &StoreConfig) -> Self {
        Self::new(HttpTransport::new(&config.base_url), &config.cache_dir)
    }
}

impl<T: Transport> CharmStore<T> {
    /// A store client using `transport`, caching into `cache_dir`.
    pub fn new(transport: T, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            transport,
            cache_dir: cache_dir.into(),
        }
    }

    /// The cache directory.
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// The underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Where the archive for `reference` is cached.
    ///
    /// Only meaningful for references with a pinned revision.
    pub fn archive_path(&self, reference: &Reference) -> PathBuf {
        self.cache_dir
            .join(format!("{}.{ARCHIVE_EXTENSION}", quote(&reference.to_string())))
    }

    fn download(&self, reference: &Reference, sha256: &str, dest: &Path) -> Result<()> {
        let mut partial = tempfile::Builder::new()
            .prefix(".charm-download-")
            .tempfile_in(&self.cache_dir)?;

        let bytes = self
            .transport
            .fetch_archive(&reference.path(), partial.as_file_mut())?;
        partial.as_file().sync_all()?;
        tracing::debug!(charm = %reference, bytes, "downloaded archive");

        // The temporary file is removed on drop if verification fails.
        verify(partial.path(), sha256)?;
        partial.persist(dest).map_err(|err| StoreError::Io(err.error))?;
        Ok(())
    }
}

impl<T: Transport> Repo for CharmStore<T> {
    fn info(&self, reference: &Reference) -> Result<CharmInfo> {
        let key = reference.to_string();
        let body = self.transport.charm_info(&key)?;
        let mut infos: HashMap<String, InfoResponse> = serde_json::from_slice(&body)?;
        let info = infos
            .remove(&key)
            .ok_or_else(|| StoreError::MissingInfo { key: key.clone() })?;

        for warning in &info.warnings {
            tracing::warn!(charm = %key, "store warning: {warning}");
        }
        if !info.errors.is_empty() {
            return Err(StoreError::InfoErrors {
                key,
                errors: info.errors,
            });
        }

        Ok(CharmInfo {
            revision: info.revision,
            sha256: info.sha256,
        })
    }

    fn get(&self, reference: &Reference) -> Result<PathBuf> {
        fs::create_dir_all(&self.cache_dir)?;

        let info = self.info(reference)?;
        let pinned = match reference.revision() {
            None => reference.with_revision(Some(info.revision)),
            Some(revision) if revision == info.revision => reference.clone(),
            Some(_) => {
                return Err(StoreError::RevisionMismatch {
                    reference: reference.to_string(),
                });
            },
        };

        let path = self.archive_path(&pinned);
        match verify(&path, &info.sha256) {
            Ok(()) => {
                tracing::debug!(charm = %pinned, path = %path.display(), "archive cache hit");
                return Ok(path);
            },
            Err(err) => tracing::debug!(charm = %pinned, %err, "archive cache miss"),
        }

        self.download(&pinned, &info.sha256, &path)?;
        Ok(path)
    }
}

/// Fails unless a file exists at `path` whose SHA-256 hex digest is `sha256`.
pub fn verify(path: &Path, sha256: &str) -> Result<()> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    let actual = hex::encode(hasher.finalize());
    if !actual.eq_ignore_ascii_case(sha256) {
        return Err(StoreError::DigestMismatch {
            path: path.to_path_buf(),
            expected: sha256.to_owned(),
            actual,
        });
    }
    Ok(())
}

// ============================================================================
// Errors
// ============================================================================

/// Errors produced by store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Local filesystem failure.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// The transport could not complete a request.
    #[error("store request failed: {0}")]
    Transport(String),

    /// The `charm-info` response was not valid JSON.
    #[error("malformed charm info: {0}")]
    MalformedInfo(#[from] serde_json::Error),

    /// The store answered without an entry for the reference.
    #[error("missing info for charm: {key:?}")]
    MissingInfo {
        /// Canonical reference string sent to the store.
        key: String,
    },

    /// The store reported errors for the reference.
    #[error("charm info errors for {key:?}: {}", .errors.join("; "))]
    InfoErrors {
        /// Canonical reference string sent to the store.
        key: String,
        /// Errors as reported.
        errors: Vec<String>,
    },

    /// The store resolved a pinned reference to another revision.
    #[error("bad revision info for {reference:?}")]
    RevisionMismatch {
        /// The pinned reference.
        reference: String,
    },

    /// An archive's digest differs from the store's.
    #[error("bad SHA256 of {path:?}: expected {expected}, got {actual}")]
    DigestMismatch {
        /// The file that was checked.
        path: PathBuf,
        /// Digest reported by the store.
        expected: String,
        /// Digest of the file.
        actual: String,
    },

    /// No per-user cache directory exists on this platform.
    #[error("cache directory unavailable")]
    CacheDirUnavailable,
}

/// Convenience type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests;
