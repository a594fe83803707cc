//! Validation oracles for reference components.
//!
//! Package names follow a fixed grammar checked by [`is_valid_name`]. Series
//! membership and owner handles are policy rather than syntax, so the parser
//! reaches them through the [`Vocabulary`] trait and never through globals.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

/// The pseudo-series accepted by every vocabulary, used for bundles.
pub const BUNDLE_SERIES: &str = "bundle";

/// Platform series recognized by [`DefaultVocabulary`].
pub const SUPPORTED_SERIES: &[&str] = &[
    // Ubuntu
    "precise", "quantal", "raring", "saucy", "trusty", "utopic", "vivid", "wily", "xenial",
    "yakkety", "zesty", "artful", "bionic", "cosmic", "disco", "eoan", "focal", "groovy",
    "hirsute", "impish", "jammy", "kinetic", "lunar", "mantic", "noble",
    // Windows
    "win2008r2", "win2012", "win2012hv", "win2012hvr2", "win2012r2", "win2016", "win2016hv",
    "win2016nano", "win2019", "win7", "win8", "win81", "win10",
    // Others
    "centos7", "centos8", "centos9", "opensuseleap", "genericlinux", "kubernetes",
];

static VALID_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z][a-z0-9]*(-[a-z0-9]*[a-z][a-z0-9]*)*$").expect("name pattern compiles")
});

static VALID_USER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"^[a-zA-Z0-9][a-zA-Z0-9.+-]*[a-zA-Z0-9]",
        r"(?:@[a-z0-9](?:[a-z0-9-]*[a-z0-9])?(?:\.[a-z0-9](?:[a-z0-9-]*[a-z0-9])?)*)?$",
    ))
    .expect("user pattern compiles")
});

static DEFAULT_SERIES: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    SUPPORTED_SERIES
        .iter()
        .copied()
        .chain(std::iter::once(BUNDLE_SERIES))
        .collect()
});

// ============================================================================
// Syntax predicates
// ============================================================================

/// Reports whether `name` is a valid charm or bundle name.
///
/// Names are lowercase ASCII, start with a letter, and are split by single
/// hyphens into tokens that each contain at least one letter. A token made
/// only of digits (`wordpress-2`) is rejected so that it can never be
/// confused with a revision suffix.
///
/// ```
/// use charm_url::is_valid_name;
///
/// assert!(is_valid_name("word2-press2"));
/// assert!(!is_valid_name("wordpress-2"));
/// ```
pub fn is_valid_name(name: &str) -> bool {
    VALID_NAME.is_match(name)
}

/// Reports whether `user` is a syntactically valid owner handle.
///
/// A handle is at least two characters of ASCII alphanumerics, `.`, `+` and
/// `-`, starting and ending alphanumeric, optionally followed by `@domain`.
pub fn is_valid_user(user: &str) -> bool {
    VALID_USER.is_match(user)
}

/// Reports whether `series` is recognized by [`DefaultVocabulary`].
pub fn is_valid_series(series: &str) -> bool {
    DEFAULT_SERIES.contains(series)
}

// ============================================================================
// Vocabulary
// ============================================================================

/// The series and owner oracles consulted while parsing.
///
/// The parser never consults a global list directly; swapping the vocabulary
/// is how alternate platform sets (or test fixtures) are supplied.
pub trait Vocabulary: Send + Sync {
    /// Whether `series` names a recognized platform series.
    fn is_valid_series(&self, series: &str) -> bool;

    /// Whether `user` is an acceptable owner handle.
    fn is_valid_user(&self, user: &str) -> bool {
        is_valid_user(user)
    }
}

/// [`SUPPORTED_SERIES`] plus [`BUNDLE_SERIES`], with the standard owner grammar.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DefaultVocabulary;

impl Vocabulary for DefaultVocabulary {
    fn is_valid_series(&self, series: &str) -> bool {
        is_valid_series(series)
    }
}

/// A vocabulary over an explicit series list.
///
/// [`BUNDLE_SERIES`] is always a member. Owner handles use the standard
/// grammar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesVocabulary {
    series: HashSet<String>,
}

impl SeriesVocabulary {
    /// Builds a vocabulary recognizing `series` and `bundle`.
    pub fn new<I, S>(series: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut series: HashSet<String> = series.into_iter().map(Into::into).collect();
        series.insert(BUNDLE_SERIES.to_owned());
        Self { series }
    }
}

impl Vocabulary for SeriesVocabulary {
    fn is_valid_series(&self, series: &str) -> bool {
        self.series.contains(series)
    }
}
