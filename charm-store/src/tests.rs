//! Tests for the cached store client, against an in-memory transport.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fs;
use std::io::Write;

use charm_url::must_parse;
use sha2::{Digest, Sha256};
use tempfile::TempDir;

use crate::{
    CharmInfo, CharmStore, InfoResponse, Repo, Result, StoreConfig, StoreError, Transport, verify,
};

// ============================================================================
// Helpers
// ============================================================================

/// Serves canned `charm-info` answers and archives keyed by store path.
#[derive(Default)]
struct FakeTransport {
    infos: RefCell<HashMap<String, InfoResponse>>,
    archives: RefCell<HashMap<String, Vec<u8>>>,
    info_keys: RefCell<Vec<String>>,
    fetches: Cell<usize>,
}

impl FakeTransport {
    fn with_info(self, key: &str, info: InfoResponse) -> Self {
        self.infos.borrow_mut().insert(key.to_owned(), info);
        self
    }

    fn with_archive(self, path: &str, bytes: &[u8]) -> Self {
        self.archives.borrow_mut().insert(path.to_owned(), bytes.to_vec());
        self
    }
}

impl Transport for FakeTransport {
    fn charm_info(&self, key: &str) -> Result<Vec<u8>> {
        self.info_keys.borrow_mut().push(key.to_owned());
        Ok(serde_json::to_vec(&*self.infos.borrow())?)
    }

    fn fetch_archive(&self, path: &str, sink: &mut dyn Write) -> Result<u64> {
        self.fetches.set(self.fetches.get() + 1);
        let archives = self.archives.borrow();
        let bytes = archives
            .get(path)
            .ok_or_else(|| StoreError::Transport(format!("404 for {path}")))?;
        sink.write_all(bytes)?;
        Ok(bytes.len() as u64)
    }
}

fn digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

fn info(revision: u64, bytes: &[u8]) -> InfoResponse {
    InfoResponse {
        revision,
        sha256: digest(bytes),
        ..InfoResponse::default()
    }
}

const ARCHIVE: &[u8] = b"PK\x03\x04 wordpress archive";

fn wordpress_store(cache: &TempDir) -> CharmStore<FakeTransport> {
    let transport = FakeTransport::default()
        .with_info("cs:wordpress/precise", info(3, ARCHIVE))
        .with_info("cs:wordpress/precise/3", info(3, ARCHIVE))
        .with_archive("precise/wordpress-3", ARCHIVE);
    CharmStore::new(transport, cache.path())
}

fn cache_entries(cache: &TempDir) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(cache.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

// ============================================================================
// info / latest
// ============================================================================

#[test]
fn info_returns_revision_and_digest() {
    let cache = TempDir::new().unwrap();
    let store = wordpress_store(&cache);
    let got = store.info(&must_parse("precise/wordpress")).unwrap();
    assert_eq!(got, CharmInfo {
        revision: 3,
        sha256: digest(ARCHIVE),
    });
}

#[test]
fn latest_ignores_pinned_revision() {
    let cache = TempDir::new().unwrap();
    let store = wordpress_store(&cache);
    let latest = store.latest(&must_parse("cs:precise/wordpress-1")).unwrap();
    assert_eq!(latest, 3);
    assert_eq!(*store.transport().info_keys.borrow(), ["cs:wordpress/precise"]);
}

#[test]
fn info_missing_entry() {
    let cache = TempDir::new().unwrap();
    let store = wordpress_store(&cache);
    let err = store.info(&must_parse("cs:trusty/mysql")).unwrap_err();
    assert!(matches!(err, StoreError::MissingInfo { key } if key == "cs:mysql/trusty"));
}

#[test]
fn info_errors_are_reported() {
    let cache = TempDir::new().unwrap();
    let transport = FakeTransport::default().with_info("cs:mysql/trusty", InfoResponse {
        errors: vec!["entity not found".into(), "try again".into()],
        ..InfoResponse::default()
    });
    let store = CharmStore::new(transport, cache.path());
    let err = store.info(&must_parse("cs:trusty/mysql")).unwrap_err();
    assert_eq!(
        err.to_string(),
        r#"charm info errors for "cs:mysql/trusty": entity not found; try again"#
    );
}

#[test]
fn info_warnings_do_not_fail() {
    let cache = TempDir::new().unwrap();
    let transport = FakeTransport::default().with_info("cs:mysql/trusty", InfoResponse {
        revision: 0,
        sha256: digest(b""),
        warnings: vec!["deprecated".into()],
        ..InfoResponse::default()
    });
    let store = CharmStore::new(transport, cache.path());
    assert_eq!(store.info(&must_parse("cs:trusty/mysql")).unwrap().revision, 0);
}

#[test]
fn malformed_info_body() {
    struct Garbage;

    impl Transport for Garbage {
        fn charm_info(&self, _key: &str) -> Result<Vec<u8>> {
            Ok(b"<html>".to_vec())
        }

        fn fetch_archive(&self, _path: &str, _sink: &mut dyn Write) -> Result<u64> {
            unreachable!("no archive without info")
        }
    }

    let cache = TempDir::new().unwrap();
    let store = CharmStore::new(Garbage, cache.path());
    let err = store.get(&must_parse("cs:trusty/mysql")).unwrap_err();
    assert!(matches!(err, StoreError::MalformedInfo(_)));
}

// ============================================================================
// get
// ============================================================================

#[test]
fn get_downloads_into_quoted_cache_path() {
    let cache = TempDir::new().unwrap();
    let store = wordpress_store(&cache);

    let path = store.get(&must_parse("precise/wordpress")).unwrap();
    assert_eq!(path, cache.path().join("cs_3a_wordpress_2f_precise_2f_3.charm"));
    assert_eq!(fs::read(&path).unwrap(), ARCHIVE);
    assert_eq!(store.transport().fetches.get(), 1);
    assert_eq!(cache_entries(&cache), ["cs_3a_wordpress_2f_precise_2f_3.charm"]);
}

#[test]
fn get_cache_hit_skips_download() {
    let cache = TempDir::new().unwrap();
    let store = wordpress_store(&cache);
    let reference = must_parse("precise/wordpress");

    let first = store.get(&reference).unwrap();
    let second = store.get(&reference).unwrap();
    assert_eq!(first, second);
    assert_eq!(store.transport().fetches.get(), 1);
}

#[test]
fn get_replaces_corrupt_cache_entry() {
    let cache = TempDir::new().unwrap();
    let store = wordpress_store(&cache);
    let reference = must_parse("cs:precise/wordpress-3");

    let path = store.archive_path(&reference);
    fs::write(&path, b"truncated").unwrap();

    assert_eq!(store.get(&reference).unwrap(), path);
    assert_eq!(fs::read(&path).unwrap(), ARCHIVE);
    assert_eq!(store.transport().fetches.get(), 1);
}

#[test]
fn get_rejects_digest_mismatch_without_leaving_files() {
    let cache = TempDir::new().unwrap();
    let transport = FakeTransport::default()
        .with_info("cs:wordpress/precise", info(3, ARCHIVE))
        .with_archive("precise/wordpress-3", b"tampered");
    let store = CharmStore::new(transport, cache.path());

    let err = store.get(&must_parse("precise/wordpress")).unwrap_err();
    assert!(matches!(err, StoreError::DigestMismatch { .. }));
    assert!(cache_entries(&cache).is_empty());
}

#[test]
fn get_rejects_revision_mismatch() {
    let cache = TempDir::new().unwrap();
    let transport = FakeTransport::default()
        .with_info("cs:wordpress/precise/2", info(3, ARCHIVE))
        .with_archive("precise/wordpress-3", ARCHIVE);
    let store = CharmStore::new(transport, cache.path());

    let err = store.get(&must_parse("cs:precise/wordpress-2")).unwrap_err();
    assert!(matches!(
        err,
        StoreError::RevisionMismatch { reference } if reference == "cs:wordpress/precise/2"
    ));
    assert_eq!(store.transport().fetches.get(), 0);
}

#[test]
fn get_creates_cache_dir() {
    let root = TempDir::new().unwrap();
    let transport = FakeTransport::default()
        .with_info("cs:alice/foo/trusty", info(7, b"foo"))
        .with_archive("~alice/trusty/foo-7", b"foo");
    let store = CharmStore::new(transport, root.path().join("nested/cache"));

    let path = store.get(&must_parse("https://store.example/u/alice/foo/trusty")).unwrap();
    assert_eq!(path, root.path().join("nested/cache/cs_3a_alice_2f_foo_2f_trusty_2f_7.charm"));
    assert!(path.exists());
}

#[test]
fn transport_failures_propagate() {
    let cache = TempDir::new().unwrap();
    let transport = FakeTransport::default().with_info("cs:wordpress/precise", info(3, ARCHIVE));
    let store = CharmStore::new(transport, cache.path());

    let err = store.get(&must_parse("precise/wordpress")).unwrap_err();
    assert!(matches!(err, StoreError::Transport(_)));
    assert!(cache_entries(&cache).is_empty());
}

// ============================================================================
// verify / config
// ============================================================================

#[test]
fn verify_accepts_uppercase_digest() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("a.charm");
    fs::write(&path, ARCHIVE).unwrap();
    assert!(verify(&path, &digest(ARCHIVE).to_uppercase()).is_ok());
    assert!(matches!(verify(&path, &digest(b"x")), Err(StoreError::DigestMismatch { .. })));
    assert!(matches!(verify(&dir.path().join("missing"), ""), Err(StoreError::Io(_))));
}

#[test]
fn config_defaults_base_url() {
    let config: StoreConfig = serde_json::from_str(r#"{"cache_dir":"/var/cache/charms"}"#).unwrap();
    assert_eq!(config, StoreConfig::new("/var/cache/charms"));
    assert_eq!(config.base_url, crate::STORE_URL);
}

#[test]
fn info_response_wire_format() {
    let parsed: HashMap<String, InfoResponse> =
        serde_json::from_str(r#"{"cs:foo":{"revision":0,"sha256":"ab","warnings":["old"]}}"#).unwrap();
    assert_eq!(parsed["cs:foo"], InfoResponse {
        revision: 0,
        sha256: "ab".into(),
        errors: vec![],
        warnings: vec!["old".into()],
    });
}

// ============================================================================
// HTTP transport
// ============================================================================

#[cfg(feature = "http")]
#[test]
fn http_request_urls() {
    let transport = crate::HttpTransport::new("https://store.example/api/");
    assert_eq!(transport.base_url(), "https://store.example/api");

    let info = transport.info_url("cs:alice/foo/trusty").unwrap();
    assert_eq!(
        info.as_str(),
        "https://store.example/api/charm-info?charms=cs%3Aalice%2Ffoo%2Ftrusty"
    );

    let archive = transport.archive_url("~alice/trusty/foo-7").unwrap();
    assert_eq!(archive.as_str(), "https://store.example/api/charm/~alice%2Ftrusty%2Ffoo-7");
}

#[cfg(feature = "http")]
#[test]
fn http_rejects_bad_base_url() {
    let transport = crate::HttpTransport::new("not a url");
    assert!(matches!(transport.archive_url("foo-1"), Err(StoreError::Transport(_))));
}
