//! Charm and bundle reference parsing.
//!
//! A [`Reference`] names a charm or bundle in a store or on local disk. Its
//! canonical text form is:
//!
//! ```text
//! schema:[user/]name[/series][/revision]
//! ```
//!
//! Several older encodings are still accepted and normalized on parse:
//!
//! - **slash form**: `[schema:][user/]name[/series][/revision]`
//! - **compact form**: `[schema:][~user/][series/]name[-revision]`
//! - **web form**: `https://<host>/[u/<user>/]name[/series][/revision]`
//!
//! A bare path like `precise/wordpress` is valid in both legacy forms. When
//! the first segment is a known series the compact form wins; otherwise the
//! slash form is tried first and the compact form decides on failure.
//!
//! # Examples
//!
//! ```
//! use charm_url::{Reference, Schema};
//!
//! let r: Reference = "cs:~alice/trusty/wordpress-3".parse().unwrap();
//! assert_eq!(r.schema(), Schema::Store);
//! assert_eq!(r.user(), Some("alice"));
//! assert_eq!(r.series(), Some("trusty"));
//! assert_eq!(r.revision(), Some(3));
//! assert_eq!(r.to_string(), "cs:alice/wordpress/trusty/3");
//! assert_eq!(r.path(), "~alice/trusty/wordpress-3");
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

mod name;
mod parse;

use std::fmt;
use std::str::FromStr;

pub use name::{
    BUNDLE_SERIES, DefaultVocabulary, SUPPORTED_SERIES, SeriesVocabulary, Vocabulary,
    is_valid_name, is_valid_series, is_valid_user,
};
use thiserror::Error;

// ============================================================================
// Schema
// ============================================================================

/// Where a referenced charm or bundle comes from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Schema {
    /// Hosted in the charm store (`cs`). Assumed when no schema is given.
    #[default]
    Store,
    /// A local repository (`local`). Local references never carry a user.
    Local,
}

impl Schema {
    /// The schema as it appears in reference strings.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Store => "cs",
            Self::Local => "local",
        }
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Schema {
    type Err = ParseError;

    /// Schemes are case-insensitive, as in any URI.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("cs") {
            Ok(Self::Store)
        } else if s.eq_ignore_ascii_case("local") {
            Ok(Self::Local)
        } else {
            Err(ParseError::InvalidSchema {
                input: s.to_owned(),
            })
        }
    }
}

// ============================================================================
// Reference
// ============================================================================

/// A validated charm or bundle reference.
///
/// Every `Reference` upholds the same invariants: the name passes
/// [`is_valid_name`], a present series and user passed the vocabulary they
/// were parsed with, and a [`Schema::Local`] reference has no user.
/// References are immutable; [`with_revision`](Reference::with_revision)
/// returns a new value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Reference {
    schema: Schema,
    user: Option<String>,
    name: String,
    series: Option<String>,
    revision: Option<u64>,
}

/// The unvalidated components of a [`Reference`].
///
/// Used to build references field by field; convert with
/// [`Reference::from_parts`] or `Reference::try_from`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferenceParts {
    /// Provenance schema.
    pub schema: Schema,
    /// Owner handle.
    pub user: Option<String>,
    /// Package name.
    pub name: String,
    /// Platform series.
    pub series: Option<String>,
    /// Revision number.
    pub revision: Option<u64>,
}

impl Reference {
    /// Validate `parts` against `vocab` and build a reference.
    ///
    /// # Errors
    ///
    /// The same errors parsing reports for the offending component, with
    /// the canonical rendering of `parts` as input.
    pub fn from_parts<V>(parts: ReferenceParts, vocab: &V) -> Result<Self, ParseError>
    where
        V: Vocabulary + ?Sized,
    {
        let reference = Self {
            schema: parts.schema,
            user: parts.user,
            name: parts.name,
            series: parts.series,
            revision: parts.revision,
        };
        let input = || reference.to_string();

        if let Some(user) = &reference.user {
            if reference.schema == Schema::Local {
                return Err(ParseError::LocalUrlWithUser { input: input() });
            }
            if !vocab.is_valid_user(user) {
                return Err(ParseError::InvalidUserName { input: input() });
            }
        }
        if let Some(series) = &reference.series {
            if !vocab.is_valid_series(series) {
                return Err(ParseError::InvalidSeries { input: input() });
            }
        }
        if !is_valid_name(&reference.name) {
            return Err(ParseError::InvalidName { input: input() });
        }
        Ok(reference)
    }

    /// The provenance schema.
    #[must_use]
    pub fn schema(&self) -> Schema {
        self.schema
    }

    /// The owner handle, if any.
    #[must_use]
    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    /// The package name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The platform series, if any.
    #[must_use]
    pub fn series(&self) -> Option<&str> {
        self.series.as_deref()
    }

    /// The revision, if pinned.
    #[must_use]
    pub fn revision(&self) -> Option<u64> {
        self.revision
    }

    /// A copy of this reference with the revision replaced.
    ///
    /// Pass `None` to unpin the revision.
    #[must_use]
    pub fn with_revision(&self, revision: Option<u64>) -> Self {
        Self {
            revision,
            ..self.clone()
        }
    }

    /// A copy of this reference with the series replaced, validated
    /// against `vocab`.
    ///
    /// # Errors
    ///
    /// As for [`from_parts`](Reference::from_parts).
    pub fn with_series<V>(&self, series: Option<&str>, vocab: &V) -> Result<Self, ParseError>
    where
        V: Vocabulary + ?Sized,
    {
        let mut parts = self.clone().into_parts();
        parts.series = series.map(str::to_owned);
        Self::from_parts(parts, vocab)
    }

    /// The store request path in the compact form,
    /// `[~user/][series/]name[-revision]`.
    ///
    /// This does not round-trip to the canonical form for references with
    /// a user that is also a series name; use [`Display`](fmt::Display) for
    /// anything that will be parsed again.
    #[must_use]
    pub fn path(&self) -> String {
        let mut path = String::new();
        if let Some(user) = &self.user {
            path.push('~');
            path.push_str(user);
            path.push('/');
        }
        if let Some(series) = &self.series {
            path.push_str(series);
            path.push('/');
        }
        path.push_str(&self.name);
        if let Some(revision) = self.revision {
            path.push('-');
            path.push_str(&revision.to_string());
        }
        path
    }

    /// Decompose into unvalidated parts.
    #[must_use]
    pub fn into_parts(self) -> ReferenceParts {
        ReferenceParts {
            schema: self.schema,
            user: self.user,
            name: self.name,
            series: self.series,
            revision: self.revision,
        }
    }
}

/// Display in the canonical `schema:[user/]name[/series][/revision]` form.
impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.schema)?;
        if let Some(user) = &self.user {
            write!(f, "{user}/")?;
        }
        f.write_str(&self.name)?;
        if let Some(series) = &self.series {
            write!(f, "/{series}")?;
        }
        if let Some(revision) = self.revision {
            write!(f, "/{revision}")?;
        }
        Ok(())
    }
}

impl FromStr for Reference {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse(s)
    }
}

impl TryFrom<ReferenceParts> for Reference {
    type Error = ParseError;

    fn try_from(parts: ReferenceParts) -> Result<Self, Self::Error> {
        Self::from_parts(parts, &DefaultVocabulary)
    }
}

impl From<Reference> for ReferenceParts {
    fn from(reference: Reference) -> Self {
        reference.into_parts()
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for Reference {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for Reference {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// Parser
// ============================================================================

/// A reference parser bound to a [`Vocabulary`].
///
/// The free functions [`parse`] and [`infer`] use [`DefaultVocabulary`].
/// Build a `Parser` to recognize a different series list.
///
/// ```
/// use charm_url::{Parser, SeriesVocabulary};
///
/// let parser = Parser::new(SeriesVocabulary::new(["plucky"]));
/// let r = parser.parse("plucky/nginx").unwrap();
/// assert_eq!(r.series(), Some("plucky"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct Parser<V = DefaultVocabulary> {
    vocabulary: V,
}

static DEFAULT_PARSER: Parser = Parser::new(DefaultVocabulary);

impl<V: Vocabulary> Parser<V> {
    /// A parser consulting `vocabulary` for series and user checks.
    pub const fn new(vocabulary: V) -> Self {
        Self { vocabulary }
    }

    /// The vocabulary this parser consults.
    pub fn vocabulary(&self) -> &V {
        &self.vocabulary
    }

    /// Parse a reference in any accepted form.
    ///
    /// # Errors
    ///
    /// A [`ParseError`] naming the first rule the input violates. For
    /// ambiguous legacy input, the compact grammar's error is reported.
    pub fn parse(&self, raw: &str) -> Result<Reference, ParseError> {
        match parse::split(raw)? {
            parse::Shape::Legacy { scheme, path } => {
                tracing::debug!(input = raw, grammar = "legacy", "parsing charm reference");
                parse::legacy(&self.vocabulary, raw, scheme.as_deref(), path)
            },
            parse::Shape::Web(url) => {
                tracing::debug!(input = raw, grammar = "web", "parsing charm reference");
                parse::web(&self.vocabulary, raw, &url)
            },
        }
    }

    /// Parse `raw` and fill an unset series with `default_series`.
    ///
    /// # Errors
    ///
    /// - Any error from [`parse`](Parser::parse).
    /// - [`ParseError::UnresolvedSeries`] if no series is present and
    ///   `default_series` is empty.
    /// - [`ParseError::InvalidSeries`] if `default_series` is needed but not
    ///   in the vocabulary.
    pub fn infer(&self, raw: &str, default_series: &str) -> Result<Reference, ParseError> {
        let reference = self.parse(raw)?;
        if reference.series.is_some() {
            return Ok(reference);
        }
        if default_series.is_empty() {
            return Err(ParseError::UnresolvedSeries {
                input: raw.to_owned(),
            });
        }
        if !self.vocabulary.is_valid_series(default_series) {
            return Err(ParseError::InvalidSeries {
                input: raw.to_owned(),
            });
        }
        Ok(Reference {
            series: Some(default_series.to_owned()),
            ..reference
        })
    }
}

/// Parse a reference with the default vocabulary.
///
/// # Errors
///
/// See [`Parser::parse`].
pub fn parse(raw: &str) -> Result<Reference, ParseError> {
    DEFAULT_PARSER.parse(raw)
}

/// Parse a reference known to be valid, such as a literal.
///
/// # Panics
///
/// If `raw` does not parse. Never call this on external input.
#[track_caller]
#[must_use]
pub fn must_parse(raw: &str) -> Reference {
    parse(raw).unwrap_or_else(|err| panic!("{err}"))
}

/// Parse with the default vocabulary and fill an unset series.
///
/// # Errors
///
/// See [`Parser::infer`].
pub fn infer(raw: &str, default_series: &str) -> Result<Reference, ParseError> {
    DEFAULT_PARSER.infer(raw, default_series)
}

// ============================================================================
// Quoting
// ============================================================================

/// Escape `unsafe_str` for use as a single file name.
///
/// ASCII letters, digits, `.` and `-` are kept; every other byte becomes its
/// lowercase hex value between underscores (`/` is `_2f_`).
///
/// ```
/// assert_eq!(charm_url::quote("cs:foo/1"), "cs_3a_foo_2f_1");
/// ```
#[must_use]
pub fn quote(unsafe_str: &str) -> String {
    let mut safe = String::with_capacity(unsafe_str.len() * 4);
    for b in unsafe_str.bytes() {
        match b {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'.' | b'-' => safe.push(char::from(b)),
            _ => safe.push_str(&format!("_{b:02x}_")),
        }
    }
    safe
}

// ============================================================================
// Errors
// ============================================================================

/// Errors produced while parsing or building a [`Reference`].
///
/// Every variant carries the offending input so messages can quote it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// The input is not a URI.
    #[error("cannot parse charm or bundle URL: {input:?}")]
    MalformedInput {
        /// The offending input.
        input: String,
    },
    /// A query, fragment, credentials or a leftover path segment.
    #[error("charm or bundle URL {input:?} has unrecognized parts")]
    UnrecognizedParts {
        /// The offending input.
        input: String,
    },
    /// A scheme other than `cs` or `local`.
    #[error("charm or bundle URL has invalid schema: {input:?}")]
    InvalidSchema {
        /// The offending input.
        input: String,
    },
    /// A `local` reference with a user.
    #[error("local charm or bundle URL with user name: {input:?}")]
    LocalUrlWithUser {
        /// The offending input.
        input: String,
    },
    /// Too many segments for the compact form.
    #[error("charm or bundle URL has invalid form: {input:?}")]
    InvalidForm {
        /// The offending input.
        input: String,
    },
    /// The series is not in the vocabulary.
    #[error("charm or bundle URL has invalid series: {input:?}")]
    InvalidSeries {
        /// The offending input.
        input: String,
    },
    /// The user is not a valid owner handle.
    #[error("charm or bundle URL has invalid user name: {input:?}")]
    InvalidUserName {
        /// The offending input.
        input: String,
    },
    /// The name fails [`is_valid_name`].
    #[error("URL has invalid charm or bundle name: {input:?}")]
    InvalidName {
        /// The offending input.
        input: String,
    },
    /// A segment in revision position is not a number.
    #[error("charm or bundle URL has malformed revision: {revision:?} in {input:?}")]
    MalformedRevision {
        /// The segment that should have been a revision.
        revision: String,
        /// The offending input.
        input: String,
    },
    /// A web URL with `/u/` but no user and name after it.
    #[error("charm or bundle URL {input:?} malformed, expected \"/u/<user>/<name>\"")]
    MalformedUserPath {
        /// The offending input.
        input: String,
    },
    /// Inference without a series in the input or a default.
    #[error(
        "cannot infer charm or bundle URL for {input:?}: charm or bundle url series is not resolved"
    )]
    UnresolvedSeries {
        /// The offending input.
        input: String,
    },
    /// Only a user was given.
    #[error("URL without charm or bundle name: {input:?}")]
    NoNameInUrl {
        /// The offending input.
        input: String,
    },
}

impl ParseError {
    /// The input that failed to parse.
    #[must_use]
    pub fn input(&self) -> &str {
        match self {
            Self::MalformedInput { input }
            | Self::UnrecognizedParts { input }
            | Self::InvalidSchema { input }
            | Self::LocalUrlWithUser { input }
            | Self::InvalidForm { input }
            | Self::InvalidSeries { input }
            | Self::InvalidUserName { input }
            | Self::InvalidName { input }
            | Self::MalformedRevision { input, .. }
            | Self::MalformedUserPath { input }
            | Self::UnresolvedSeries { input }
            | Self::NoNameInUrl { input } => input,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
