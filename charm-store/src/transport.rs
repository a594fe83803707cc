//! Wire access to the store.

use std::io::Write;

use crate::Result;

/// Raw requests against a charm store.
///
/// [`CharmStore`](crate::CharmStore) owns decoding, verification and
/// caching; a transport only moves bytes.
pub trait Transport {
    /// Body of a `charm-info` request for `key`: a JSON object mapping
    /// canonical reference strings to [`InfoResponse`](crate::InfoResponse).
    fn charm_info(&self, key: &str) -> Result<Vec<u8>>;

    /// Stream the archive at the compact store `path` into `sink`,
    /// returning the number of bytes written.
    fn fetch_archive(&self, path: &str, sink: &mut dyn Write) -> Result<u64>;
}

#[cfg(feature = "http")]
pub use http::HttpTransport;

#[cfg(feature = "http")]
mod http {
    use std::io::{self, Read, Write};

    use url::Url;

    use super::Transport;
    use crate::{Result, StoreError};

    /// A [`Transport`] speaking the store's HTTP API.
    #[derive(Debug, Clone)]
    pub struct HttpTransport {
        base_url: String,
        agent: ureq::Agent,
    }

    impl HttpTransport {
        /// A transport for the store at `base_url`.
        pub fn new(base_url: &str) -> Self {
            Self {
                base_url: base_url.trim_end_matches('/').to_owned(),
                agent: ureq::AgentBuilder::new().redirects(5).build(),
            }
        }

        /// The store base URL.
        pub fn base_url(&self) -> &str {
            &self.base_url
        }

        /// `base_url` extended with `segments`, each percent-encoded.
        fn endpoint<'a>(&self, segments: impl IntoIterator<Item = &'a str>) -> Result<Url> {
            let invalid = |reason: &dyn std::fmt::Display| {
                StoreError::Transport(format!("invalid store URL {:?}: {reason}", self.base_url))
            };
            let mut url = Url::parse(&self.base_url).map_err(|err| invalid(&err))?;
            url.path_segments_mut()
                .map_err(|()| invalid(&"cannot be a base"))?
                .pop_if_empty()
                .extend(segments);
            Ok(url)
        }

        fn call(&self, url: &Url) -> Result<ureq::Response> {
            tracing::debug!(%url, "store request");
            self.agent
                .get(url.as_str())
                .call()
                .map_err(|err| StoreError::Transport(err.to_string()))
        }

        /// `{base}/charm-info?charms=<key>`.
        pub(crate) fn info_url(&self, key: &str) -> Result<Url> {
            let mut url = self.endpoint(["charm-info"])?;
            url.query_pairs_mut().append_pair("charms", key);
            Ok(url)
        }

        /// `{base}/charm/<path>`, with the whole store path escaped as one
        /// segment so `/` travels as `%2F`.
        pub(crate) fn archive_url(&self, path: &str) -> Result<Url> {
            self.endpoint(["charm", path])
        }
    }

    impl Transport for HttpTransport {
        fn charm_info(&self, key: &str) -> Result<Vec<u8>> {
            let url = self.info_url(key)?;
            let mut body = Vec::new();
            self.call(&url)?.into_reader().read_to_end(&mut body)?;
            Ok(body)
        }

        fn fetch_archive(&self, path: &str, sink: &mut dyn Write) -> Result<u64> {
            let url = self.archive_url(path)?;
            let mut reader = self.call(&url)?.into_reader();
            Ok(io::copy(&mut reader, sink)?)
        }
    }
}
