//! Series selector types
//!
//! A selector is a conjunction of label matchers:
//!
//! ```text
//! http_requests{job="api", path=~"/v1/.*", status!="200"}
//! {__name__="http_requests", env!~"dev|test"}
//! ```

use crate::storage::METRIC_NAME_LABEL;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Label match operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatchOp {
    /// `=`
    Equal,
    /// `!=`
    NotEqual,
    /// `=~`
    RegexMatch,
    /// `!~`
    RegexNotMatch,
}

impl MatchOp {
    /// Parse from operator text
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "=" => Some(Self::Equal),
            "!=" => Some(Self::NotEqual),
            "=~" => Some(Self::RegexMatch),
            "!~" => Some(Self::RegexNotMatch),
            _ => None,
        }
    }

    pub fn is_negative(self) -> bool {
        matches!(self, Self::NotEqual | Self::RegexNotMatch)
    }

    pub fn is_regex(self) -> bool {
        matches!(self, Self::RegexMatch | Self::RegexNotMatch)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Equal => "=",
            Self::NotEqual => "!=",
            Self::RegexMatch => "=~",
            Self::RegexNotMatch => "!~",
        }
    }
}

impl fmt::Display for MatchOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One `name op "value"` term of a selector
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LabelMatcher {
    pub name: String,
    pub op: MatchOp,
    pub value: String,
}

impl LabelMatcher {
    pub fn new(name: impl Into<String>, op: MatchOp, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            op,
            value: value.into(),
        }
    }

    /// `name="value"`
    pub fn equal(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(name, MatchOp::Equal, value)
    }

    /// `name!="value"`
    pub fn not_equal(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(name, MatchOp::NotEqual, value)
    }

    /// `name=~"regex"`
    pub fn regex(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(name, MatchOp::RegexMatch, value)
    }

    /// `name!~"regex"`
    pub fn not_regex(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(name, MatchOp::RegexNotMatch, value)
    }

    /// Matcher on the metric name
    pub fn metric(name: impl Into<String>) -> Self {
        Self::equal(METRIC_NAME_LABEL, name)
    }

    /// Whether this matcher can seed a search on its own
    ///
    /// A matcher that accepts the empty value also selects series *without*
    /// the label (`name=""`, `name=~".*"`), so it compiles to a negative
    /// filter.
    pub fn is_positive(&self) -> bool {
        self.matches_empty() == self.op.is_negative()
    }

    fn matches_empty(&self) -> bool {
        match self.op {
            MatchOp::Equal | MatchOp::NotEqual => self.value.is_empty(),
            // An invalid regex is reported when the filter is compiled
            MatchOp::RegexMatch | MatchOp::RegexNotMatch => {
                Regex::new(&format!("^(?:{})$", self.value)).map_or(false, |re| re.is_match(""))
            }
        }
    }
}

impl fmt::Display for LabelMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{:?}", self.name, self.op, self.value)
    }
}

/// A parsed series selector
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selector {
    pub matchers: Vec<LabelMatcher>,
}

impl Selector {
    pub fn new(matchers: Vec<LabelMatcher>) -> Self {
        Self { matchers }
    }

    /// Start building a selector for a metric name
    pub fn metric(name: impl Into<String>) -> Self {
        Self {
            matchers: vec![LabelMatcher::metric(name)],
        }
    }

    /// Add a matcher
    pub fn with(mut self, matcher: LabelMatcher) -> Self {
        self.matchers.push(matcher);
        self
    }

    /// Whether at least one matcher can seed the search
    pub fn has_positive(&self) -> bool {
        self.matchers.iter().any(LabelMatcher::is_positive)
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, m) in self.matchers.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", m)?;
        }
        f.write_str("}")
    }
}
