use std::cmp::Ordering;

use regex::Regex;
use thiserror::Error;

use crate::containment::glob_contains;

/// How a stored pattern string is interpreted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PatternKind {
    /// Exact string, no wildcards.
    Literal,
    /// Glob: `*` matches any (possibly empty) sequence, `?` any one char.
    Glob,
    /// Explicit regex, stored with a `re:` prefix.
    Regex,
}

/// A compiled scope pattern: the stored string plus its anchored form.
#[derive(Clone, Debug)]
pub struct Pattern {
    raw: String,
    kind: PatternKind,
    canonical: String,
    regex: Regex,
}

impl Pattern {
    pub fn parse(raw: &str) -> Result<Self, ScopeError> {
        if raw.is_empty() {
            return Err(ScopeError::InvalidPattern {
                pattern: raw.to_string(),
                message: "pattern cannot be empty".to_string(),
            });
        }

        let (kind, canonical) = if let Some(expr) = raw.strip_prefix("re:") {
            (PatternKind::Regex, format!("^(?:{expr})$"))
        } else if raw.contains('*') || raw.contains('?') {
            (PatternKind::Glob, glob_to_regex(raw))
        } else {
            (PatternKind::Literal, format!("^{}$", regex::escape(raw)))
        };

        let regex = Regex::new(&canonical).map_err(|e| ScopeError::InvalidPattern {
            pattern: raw.to_string(),
            message: e.to_string(),
        })?;

        Ok(Self {
            raw: raw.to_string(),
            kind,
            canonical,
            regex,
        })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn kind(&self) -> PatternKind {
        self.kind
    }

    /// Anchored regex form; the canonical representation used for
    /// equality and ordering.
    pub fn canonical_regex(&self) -> &str {
        &self.canonical
    }

    /// Single anchored match, the validation hot path.
    pub fn matches(&self, input: &str) -> bool {
        self.regex.is_match(input)
    }

    /// Containment order: `self` contains `other` iff `L(other) ⊆ L(self)`.
    ///
    /// Literal and glob patterns are decided exactly by product-automaton
    /// emptiness over their canonicalized forms. Explicit regex patterns
    /// are compared by canonical-form equality only, which can only
    /// under-approve (fail-closed).
    pub fn contains(&self, other: &Pattern) -> bool {
        if self.canonical == other.canonical {
            return true;
        }
        match (self.kind, other.kind) {
            (PatternKind::Regex, _) | (_, PatternKind::Regex) => false,
            _ => glob_contains(&self.raw, &other.raw),
        }
    }

    /// Specificity order used when canonicalizing pattern sets: strictly
    /// contained patterns sort first; ties break on lexicographic
    /// canonical form.
    pub fn specificity_cmp(&self, other: &Pattern) -> Ordering {
        let self_in_other = other.contains(self);
        let other_in_self = self.contains(other);
        match (self_in_other, other_in_self) {
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            _ => self.canonical.cmp(&other.canonical),
        }
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.canonical == other.canonical
    }
}

impl Eq for Pattern {}

pub(crate) fn glob_to_regex(glob: &str) -> String {
    let mut out = String::with_capacity(glob.len() + 8);
    out.push('^');
    for ch in glob.chars() {
        match ch {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out.push('$');
    out
}

/// An ordered set of compiled patterns, canonically sorted.
#[derive(Clone, Debug)]
pub struct PatternSet {
    patterns: Vec<Pattern>,
}

impl PatternSet {
    pub fn parse<S: AsRef<str>>(raw: &[S]) -> Result<Self, ScopeError> {
        let mut patterns = raw
            .iter()
            .map(|s| Pattern::parse(s.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        patterns.sort_by(|a, b| a.specificity_cmp(b));
        patterns.dedup_by(|a, b| a.canonical == b.canonical);
        Ok(Self { patterns })
    }

    pub fn patterns(&self) -> &[Pattern] {
        &self.patterns
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// True when at least one pattern matches the input.
    pub fn matches(&self, input: &str) -> bool {
        self.patterns.iter().any(|p| p.matches(input))
    }

    /// Scope subset check: every pattern here must be contained by at
    /// least one pattern of `other`.
    pub fn is_subset_of(&self, other: &PatternSet) -> bool {
        self.patterns
            .iter()
            .all(|q| other.patterns.iter().any(|p| p.contains(q)))
    }
}

/// Scope-layer errors.
#[derive(Debug, Error)]
pub enum ScopeError {
    #[error("invalid pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },
}
