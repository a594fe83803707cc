//! Input shape detection and the three reference grammars.
//!
//! [`split`] decides which grammar family an input belongs to. The legacy
//! family covers the compact form (`[~user/][series/]name[-revision]`) and
//! the slash form (`[user/]name[/series][/revision]`); [`legacy`] resolves
//! the ambiguity between them. [`web`] handles store page URLs.

use url::Url;

use crate::name::{Vocabulary, is_valid_name};
use crate::{ParseError, Reference, Schema};

/// Maximum number of `/`-separated segments either legacy grammar accepts.
const MAX_SEGMENTS: usize = 4;

// ============================================================================
// Shape detection
// ============================================================================

/// The grammar family an input belongs to.
pub(crate) enum Shape<'a> {
    /// `[scheme:]path`, handled by the compact and slash grammars.
    Legacy {
        /// Lowercased scheme, if one was present.
        scheme: Option<String>,
        path: &'a str,
    },
    /// An `http` or `https` URL.
    Web(Url),
}

/// Split `raw` into its URI components and classify it.
///
/// Fails with [`ParseError::MalformedInput`] when `raw` is not a URI at all,
/// and with [`ParseError::UnrecognizedParts`] when it carries a query,
/// fragment or authority no grammar accepts.
pub(crate) fn split(raw: &str) -> Result<Shape<'_>, ParseError> {
    let malformed = || ParseError::MalformedInput {
        input: raw.to_owned(),
    };
    let unrecognized = || ParseError::UnrecognizedParts {
        input: raw.to_owned(),
    };

    if raw.bytes().any(|b| b.is_ascii_control()) || !valid_escapes(raw) {
        return Err(malformed());
    }

    let (scheme, rest) = match scheme_end(raw)? {
        Some(end) => (Some(raw[..end].to_ascii_lowercase()), &raw[end + 1..]),
        None => (None, raw),
    };

    // Opaque `http:path` input falls through to the legacy grammars, which
    // reject the scheme.
    if matches!(scheme.as_deref(), Some("http" | "https")) && rest.starts_with("//") {
        let url = Url::parse(raw).map_err(|_| malformed())?;
        let has_query = url.query().is_some_and(|q| !q.is_empty());
        let has_fragment = url.fragment().is_some_and(|f| !f.is_empty());
        if has_query || has_fragment || !url.username().is_empty() || url.password().is_some() {
            return Err(unrecognized());
        }
        return Ok(Shape::Web(url));
    }

    let (rest, fragment) = rest.split_once('#').unwrap_or((rest, ""));
    let (path, query) = rest.split_once('?').unwrap_or((rest, ""));

    // Without a scheme, a colon in the first segment would read as one.
    if scheme.is_none() && path.split('/').next().is_some_and(|s| s.contains(':')) {
        return Err(malformed());
    }
    if !query.is_empty() || !fragment.is_empty() || path.starts_with("//") {
        return Err(unrecognized());
    }

    Ok(Shape::Legacy { scheme, path })
}

/// Locate the `:` terminating a leading URI scheme.
///
/// Returns `Ok(None)` when the input does not start with a scheme, and an
/// error when it starts with a bare `:`.
fn scheme_end(raw: &str) -> Result<Option<usize>, ParseError> {
    for (i, b) in raw.bytes().enumerate() {
        match b {
            b'a'..=b'z' | b'A'..=b'Z' => {},
            b'0'..=b'9' | b'+' | b'-' | b'.' if i > 0 => {},
            b':' if i == 0 => {
                return Err(ParseError::MalformedInput {
                    input: raw.to_owned(),
                });
            },
            b':' => return Ok(Some(i)),
            _ => return Ok(None),
        }
    }
    Ok(None)
}

/// Every `%` must introduce two hex digits.
fn valid_escapes(raw: &str) -> bool {
    let bytes = raw.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = bytes.get(i + 1..i + 3);
            if !hex.is_some_and(|h| h.iter().all(u8::is_ascii_hexdigit)) {
                return false;
            }
            i += 3;
        } else {
            i += 1;
        }
    }
    true
}

// ============================================================================
// Legacy grammars
// ============================================================================

/// Parse a scheme-less or opaque reference.
///
/// A leading recognized series selects the compact grammar outright.
/// Otherwise the slash grammar is tried first; when it rejects the input the
/// compact grammar decides, and its error is the one reported.
pub(crate) fn legacy<V>(
    vocab: &V,
    raw: &str,
    scheme: Option<&str>,
    path: &str,
) -> Result<Reference, ParseError>
where
    V: Vocabulary + ?Sized,
{
    let first = path.split('/').next().unwrap_or_default();
    if vocab.is_valid_series(first) {
        tracing::trace!(input = raw, series = first, "leading series selects compact grammar");
        return compact(vocab, raw, scheme, path);
    }

    match slash(vocab, raw, scheme, path) {
        Ok(reference) => Ok(reference),
        Err(err) => {
            tracing::trace!(input = raw, %err, "slash grammar rejected input, trying compact grammar");
            compact(vocab, raw, scheme, path)
        },
    }
}

fn schema(raw: &str, scheme: Option<&str>) -> Result<Schema, ParseError> {
    match scheme {
        None => Ok(Schema::default()),
        Some(s) => s.parse().map_err(|_| ParseError::InvalidSchema {
            input: raw.to_owned(),
        }),
    }
}

/// `[~user/][series/]name[-revision]`
fn compact<V>(
    vocab: &V,
    raw: &str,
    scheme: Option<&str>,
    path: &str,
) -> Result<Reference, ParseError>
where
    V: Vocabulary + ?Sized,
{
    let schema = schema(raw, scheme)?;
    let input = || raw.to_owned();

    let mut parts: Vec<&str> = path.split('/').collect();
    if parts.len() > MAX_SEGMENTS {
        return Err(ParseError::InvalidForm { input: input() });
    }

    let mut user = None;
    if let Some(handle) = parts[0].strip_prefix('~') {
        if schema == Schema::Local {
            return Err(ParseError::LocalUrlWithUser { input: input() });
        }
        user = Some(handle);
        parts.remove(0);
    }

    let (series, segment) = match parts.as_slice() {
        [] => return Err(ParseError::NoNameInUrl { input: input() }),
        [segment] => (None, *segment),
        [series, segment] => {
            if !vocab.is_valid_series(series) {
                return Err(ParseError::InvalidSeries { input: input() });
            }
            (Some(*series), *segment)
        },
        _ => return Err(ParseError::InvalidForm { input: input() }),
    };

    let (name, revision) = split_revision(raw, segment)?;

    if let Some(user) = user {
        if !vocab.is_valid_user(user) {
            return Err(ParseError::InvalidUserName { input: input() });
        }
    }
    if !is_valid_name(name) {
        return Err(ParseError::InvalidName { input: input() });
    }

    Ok(Reference {
        schema,
        user: user.map(str::to_owned),
        name: name.to_owned(),
        series: series.map(str::to_owned),
        revision,
    })
}

/// Split a trailing `-<digits>` revision off a compact-form name.
///
/// The scan runs right to left over digits and splits only when it stops on
/// a hyphen that is not the first character. The name is validated
/// afterwards by the caller, so `foo-1-2` yields the invalid name `foo-1`.
fn split_revision<'a>(raw: &str, segment: &'a str) -> Result<(&'a str, Option<u64>), ParseError> {
    let bytes = segment.as_bytes();
    let digits = bytes.iter().rev().take_while(|b| b.is_ascii_digit()).count();
    if digits == 0 || digits >= bytes.len() - 1 {
        return Ok((segment, None));
    }

    let hyphen = bytes.len() - digits - 1;
    if bytes[hyphen] != b'-' {
        return Ok((segment, None));
    }

    let digits = &segment[hyphen + 1..];
    let revision = digits.parse().map_err(|_| ParseError::MalformedRevision {
        revision: digits.to_owned(),
        input: raw.to_owned(),
    })?;
    Ok((&segment[..hyphen], Some(revision)))
}

/// `[user/]name[/series][/revision]`, consumed from the end.
fn slash<V>(
    vocab: &V,
    raw: &str,
    scheme: Option<&str>,
    path: &str,
) -> Result<Reference, ParseError>
where
    V: Vocabulary + ?Sized,
{
    let schema = schema(raw, scheme)?;
    let input = || raw.to_owned();

    let parts: Vec<&str> = path.split('/').collect();
    if parts.len() > MAX_SEGMENTS {
        return Err(ParseError::UnrecognizedParts { input: input() });
    }
    let mut rest = parts.as_slice();

    let mut revision = None;
    if let Some((last, init)) = rest.split_last() {
        if let Ok(number) = last.parse::<u64>() {
            revision = Some(number);
            rest = init;
        }
    }

    let mut series = None;
    if let Some((last, init)) = rest.split_last() {
        if vocab.is_valid_series(last) {
            series = Some(*last);
            rest = init;
        }
    }

    let Some((name, init)) = rest.split_last().filter(|(name, _)| is_valid_name(name)) else {
        return Err(ParseError::InvalidName { input: input() });
    };
    rest = init;

    let mut user = None;
    if let Some((handle, init)) = rest.split_last() {
        if !vocab.is_valid_user(handle) {
            return Err(ParseError::InvalidUserName { input: input() });
        }
        if schema == Schema::Local {
            return Err(ParseError::LocalUrlWithUser { input: input() });
        }
        user = Some(*handle);
        rest = init;
    }

    if !rest.is_empty() {
        return Err(ParseError::UnrecognizedParts { input: input() });
    }

    Ok(Reference {
        schema,
        user: user.map(str::to_owned),
        name: (*name).to_owned(),
        series: series.map(str::to_owned),
        revision,
    })
}

// ============================================================================
// Web grammar
// ============================================================================

/// `/[u/<user>/]<name>[/<series>][/<revision>]` on any store host.
///
/// Path segments are percent-decoded before they are matched.
pub(crate) fn web<V>(vocab: &V, raw: &str, url: &Url) -> Result<Reference, ParseError>
where
    V: Vocabulary + ?Sized,
{
    let input = || raw.to_owned();

    let decoded = url
        .path()
        .trim_matches('/')
        .split('/')
        .map(urlencoding::decode)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| ParseError::MalformedInput { input: input() })?;
    let parts: Vec<&str> = decoded.iter().map(|segment| &**segment).collect();
    let mut rest = parts.as_slice();

    let mut user = None;
    if rest.first() == Some(&"u") {
        match rest {
            [_, handle, tail @ ..] if !tail.is_empty() => {
                user = Some(*handle);
                rest = tail;
            },
            _ => return Err(ParseError::MalformedUserPath { input: input() }),
        }
    }

    let Some((name, tail)) = rest.split_first() else {
        return Err(ParseError::InvalidName { input: input() });
    };

    let mut tail = tail.iter();
    let mut series = None;
    let mut revision = None;
    if let Some(segment) = tail.next() {
        match segment.parse::<u64>() {
            Ok(number) => revision = Some(number),
            Err(_) => {
                if !vocab.is_valid_series(segment) {
                    return Err(ParseError::InvalidSeries { input: input() });
                }
                series = Some(*segment);
                if let Some(digits) = tail.next() {
                    let number =
                        digits
                            .parse::<u64>()
                            .map_err(|_| ParseError::MalformedRevision {
                                revision: (*digits).to_owned(),
                                input: input(),
                            })?;
                    revision = Some(number);
                }
            },
        }
    }
    if tail.next().is_some() {
        return Err(ParseError::UnrecognizedParts { input: input() });
    }

    if let Some(user) = user {
        if !vocab.is_valid_user(user) {
            return Err(ParseError::InvalidUserName { input: input() });
        }
    }
    if !is_valid_name(name) {
        return Err(ParseError::InvalidName { input: input() });
    }

    Ok(Reference {
        schema: Schema::Store,
        user: user.map(str::to_owned),
        name: (*name).to_owned(),
        series: series.map(str::to_owned),
        revision,
    })
}
