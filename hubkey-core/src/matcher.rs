//! Pattern-based credential source matching.
//!
//! A [`Pattern`] is a URL prefix split into `/` segments, where a segment of
//! exactly `*` matches any single candidate segment. A pattern that runs out
//! before the candidate does still matches, so `github.com` covers every
//! repository on that host.
//!
//! [`SourceMatcher::resolve`] picks the source whose best pattern matches the
//! most literal characters, then the highest priority, then the earliest
//! declaration. No match is a normal outcome, not an error.

use std::fmt;

use thiserror::Error;

use crate::model::CredentialSource;

/// Error parsing a pattern.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PatternError {
    #[error("pattern is empty")]
    Empty,

    #[error("pattern '{pattern}' contains an empty segment")]
    EmptySegment { pattern: String },

    #[error("pattern '{pattern}' wildcards part of segment '{segment}'; only whole segments may be '*'")]
    PartialWildcard { pattern: String, segment: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Wildcard,
}

/// A compiled URL-prefix pattern such as `github.com/org/*`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    raw: String,
    segments: Vec<Segment>,
}

impl Pattern {
    /// Parse a pattern, stripping any scheme and case-folding the host.
    pub fn parse(raw: &str) -> Result<Self, PatternError> {
        let parts = split_segments(raw);
        if parts.is_empty() {
            return Err(PatternError::Empty);
        }

        let mut segments = Vec::with_capacity(parts.len());
        for part in parts {
            let segment = match part.as_str() {
                "" => {
                    return Err(PatternError::EmptySegment {
                        pattern: raw.to_string(),
                    });
                }
                "*" => Segment::Wildcard,
                s if s.contains('*') => {
                    return Err(PatternError::PartialWildcard {
                        pattern: raw.to_string(),
                        segment: s.to_string(),
                    });
                }
                s => Segment::Literal(s.to_string()),
            };
            segments.push(segment);
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Host segment, unless it is a wildcard.
    pub fn host(&self) -> Option<&str> {
        match self.segments.first() {
            Some(Segment::Literal(host)) => Some(host),
            _ => None,
        }
    }

    /// Whether every segment is literal.
    pub fn is_literal(&self) -> bool {
        self.segments.iter().all(|s| matches!(s, Segment::Literal(_)))
    }

    /// Scheme-less, host-folded form, e.g. `github.com/Org`.
    pub fn normalized(&self) -> String {
        self.segments
            .iter()
            .map(|s| match s {
                Segment::Literal(text) => text.as_str(),
                Segment::Wildcard => "*",
            })
            .collect::<Vec<_>>()
            .join("/")
    }

    /// Number of literal characters matched against `key`, or `None` if the
    /// pattern does not match.
    pub fn match_len(&self, key: &LookupKey) -> Option<usize> {
        if self.segments.len() > key.segments.len() {
            return None;
        }

        let mut literal = 0;
        for (segment, candidate) in self.segments.iter().zip(&key.segments) {
            match segment {
                Segment::Wildcard => {}
                Segment::Literal(text) if text == candidate => literal += text.chars().count(),
                Segment::Literal(_) => return None,
            }
        }
        Some(literal)
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Normalized `host/path` key a request is matched on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupKey {
    segments: Vec<String>,
}

impl LookupKey {
    /// Build a key from a request host and optional path.
    ///
    /// The host is case-folded, surrounding slashes are trimmed and a
    /// trailing `.git` on the final segment is dropped.
    pub fn new(host: &str, path: Option<&str>) -> Self {
        let mut segments = vec![host.trim().trim_matches('/').to_lowercase()];
        if let Some(path) = path {
            segments.extend(
                path.split('/')
                    .filter(|s| !s.is_empty())
                    .map(str::to_string),
            );
        }
        if segments.len() > 1 {
            if let Some(last) = segments.last_mut() {
                if let Some(stripped) = last.strip_suffix(".git") {
                    *last = stripped.to_string();
                }
            }
        }
        Self { segments }
    }

    /// Parse a full `host/path` string (optionally with a scheme), as used
    /// for a caller-supplied override.
    pub fn parse(raw: &str) -> Self {
        let parts = split_segments(raw);
        match parts.split_first() {
            Some((host, rest)) => Self::new(host, Some(rest.join("/").as_str())),
            None => Self::new("", None),
        }
    }

    pub fn host(&self) -> &str {
        &self.segments[0]
    }

    /// First path segment, the repository owner on GitHub.
    pub fn owner(&self) -> Option<&str> {
        self.segments.get(1).map(String::as_str)
    }
}

impl fmt::Display for LookupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("/"))
    }
}

fn split_segments(raw: &str) -> Vec<String> {
    let trimmed = raw.trim();
    let without_scheme = trimmed
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(trimmed);
    let body = without_scheme.trim_matches('/');
    if body.is_empty() {
        return Vec::new();
    }

    body.split('/')
        .enumerate()
        .map(|(i, s)| if i == 0 { s.to_lowercase() } else { s.to_string() })
        .collect()
}

/// A successful resolution.
#[derive(Debug, Clone, Copy)]
pub struct Match<'a> {
    pub source: &'a CredentialSource,
    pub pattern: &'a Pattern,
    pub literal_len: usize,
    /// Index of the source in declaration order.
    pub index: usize,
}

/// Resolves lookup keys to configured credential sources.
#[derive(Debug, Clone)]
pub struct SourceMatcher {
    entries: Vec<(CredentialSource, Vec<Pattern>)>,
}

impl SourceMatcher {
    /// Compile the pattern lists of `sources`, preserving declaration order.
    pub fn new(sources: Vec<CredentialSource>) -> Result<Self, PatternError> {
        let entries = sources
            .into_iter()
            .map(|source| {
                let patterns = source
                    .patterns()
                    .iter()
                    .map(|p| Pattern::parse(p))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok((source, patterns))
            })
            .collect::<Result<Vec<_>, PatternError>>()?;
        Ok(Self { entries })
    }

    pub fn sources(&self) -> impl Iterator<Item = &CredentialSource> {
        self.entries.iter().map(|(source, _)| source)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Find the best source for `key`, or `None` if nothing matches.
    pub fn resolve(&self, key: &LookupKey) -> Option<Match<'_>> {
        let mut best: Option<Match<'_>> = None;

        for (index, (source, patterns)) in self.entries.iter().enumerate() {
            let Some((pattern, literal_len)) = patterns
                .iter()
                .filter_map(|p| p.match_len(key).map(|len| (p, len)))
                .max_by_key(|(_, len)| *len)
            else {
                continue;
            };

            let better = match &best {
                None => true,
                Some(current) => {
                    (literal_len, source.priority())
                        > (current.literal_len, current.source.priority())
                }
            };

            if better {
                best = Some(Match {
                    source,
                    pattern,
                    literal_len,
                    index,
                });
            }
        }

        match &best {
            Some(m) => tracing::debug!(
                key = %key,
                source = m.source.name(),
                pattern = %m.pattern,
                literal_len = m.literal_len,
                "resolved credential source"
            ),
            None => tracing::debug!(key = %key, "no credential source matched"),
        }
        best
    }
}
