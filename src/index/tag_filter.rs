//! Tag filter compilation
//!
//! A label matcher is compiled into a key prefix plus a list of or-suffixes.
//! Each or-suffix appended to the prefix selects the postings of one literal
//! label value. Regexes are expanded into literals when they match a small
//! finite set of strings; otherwise the filter becomes a wildcard that scans
//! every value under the prefix and verifies it against the anchored regex.
//! A regex that matches "" also matches series without the label, so it is
//! compiled with inverted polarity.
//!
//! ```text
//! job="api"            prefix=[ns][tenant]job\x02          suffixes=["api"]
//! job=~"api|web"       prefix=[ns][tenant]job\x02          suffixes=["api", "web"]
//! path=~"/v1/.*"       prefix=[ns][tenant]path\x02/v1/     suffixes=[""]  + regex
//! path=~"[a-z]+"       prefix=[ns][tenant]path\x02         suffixes=[""]  + regex
//! ```

use crate::index::error::{SearchError, SearchResult};
use crate::query::LabelMatcher;
use crate::storage::keys::{
    escape_into, marshal_common_prefix, marshal_tag_key, NS_TAG_TIME_TO_IDS,
};
use crate::storage::{Tenant, METRIC_NAME_LABEL};
use regex::bytes::Regex;
use regex_syntax::hir::literal::Extractor;
use regex_syntax::hir::{Hir, HirKind};
use std::cmp::Ordering;
use std::fmt;

/// Static cost of one literal or-suffix lookup
pub const OR_SUFFIX_COST: u64 = 10;

/// Static cost of a wildcard filter that scans every value of its label
pub const FULL_SCAN_COST: u64 = 10_000;

/// Regex alternations expanding to more literals than this become wildcards
pub const MAX_OR_VALUES: usize = 100;

/// Longest literal kept when expanding a regex into exact values
const MAX_LITERAL_LEN: usize = 4096;

const FLAG_NEGATIVE: u8 = 0x01;
const FLAG_REGEX: u8 = 0x02;
const FLAG_INVERTED: u8 = 0x04;

/// One compiled label matcher
#[derive(Debug, Clone)]
pub struct TagFilter {
    name: String,
    value: String,
    prefix: Vec<u8>,
    key_prefix_len: usize,
    or_suffixes: Vec<Vec<u8>>,
    value_matcher: Option<Regex>,
    match_cost: u64,
    is_negative: bool,
    is_regex: bool,
    /// Compiled with the opposite polarity of the matcher it came from
    inverted: bool,
    signature: Vec<u8>,
}

impl TagFilter {
    fn compile(
        common_prefix: &[u8],
        name: &str,
        value: &str,
        is_negative: bool,
        is_regex: bool,
    ) -> SearchResult<Self> {
        let mut prefix = common_prefix.to_vec();
        marshal_tag_key(&mut prefix, name.as_bytes());
        let key_prefix_len = prefix.len();

        let mut signature = Vec::with_capacity(1 + name.len() + value.len() + 1);
        let mut flags = 0;
        if is_negative {
            flags |= FLAG_NEGATIVE;
        }
        if is_regex {
            flags |= FLAG_REGEX;
        }
        signature.push(flags);
        marshal_tag_key(&mut signature, name.as_bytes());
        signature.extend_from_slice(value.as_bytes());

        let mut tf = Self {
            name: name.to_string(),
            value: value.to_string(),
            prefix,
            key_prefix_len,
            or_suffixes: Vec::new(),
            value_matcher: None,
            match_cost: 0,
            is_negative,
            is_regex,
            inverted: false,
            signature,
        };

        if !is_regex {
            tf.set_literals(vec![value.as_bytes().to_vec()]);
            return Ok(tf);
        }

        let anchored = Regex::new(&format!("^(?:{})$", value)).map_err(|e| {
            SearchError::InvalidFilter(format!(
                "cannot compile regex {:?} for label {:?}: {}",
                value, name, e
            ))
        })?;

        // Series without the label read as the empty value. A regex matching
        // "" therefore selects them too, and only the complement has postings.
        if anchored.is_match(b"") {
            tf.is_negative = !is_negative;
            tf.inverted = true;
            tf.signature[0] |= FLAG_INVERTED;
            tf.set_wildcard(anchored);
            return Ok(tf);
        }

        match analyze_regex(value) {
            RegexShape::Literals(mut values) => {
                values.retain(|v| anchored.is_match(v));
                if values.is_empty() {
                    tf.set_wildcard(anchored);
                } else {
                    tf.set_literals(values);
                }
            }
            RegexShape::LiteralPrefix(lit) => {
                escape_into(&mut tf.prefix, &lit);
                tf.set_wildcard(anchored);
            }
            RegexShape::Opaque => tf.set_wildcard(anchored),
        }
        Ok(tf)
    }

    fn set_literals(&mut self, mut values: Vec<Vec<u8>>) {
        values.sort();
        values.dedup();
        self.or_suffixes = values
            .iter()
            .map(|v| {
                let mut suffix = Vec::with_capacity(v.len());
                escape_into(&mut suffix, v);
                suffix
            })
            .collect();
        self.match_cost = self.or_suffixes.len() as u64 * OR_SUFFIX_COST;
    }

    fn set_wildcard(&mut self, matcher: Regex) {
        self.or_suffixes = vec![Vec::new()];
        self.value_matcher = Some(matcher);
        self.match_cost = FULL_SCAN_COST;
    }

    /// Label name the filter applies to
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Value or regex source after normalization
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Key prefix shared by every item this filter touches
    pub fn prefix(&self) -> &[u8] {
        &self.prefix
    }

    /// Length of `namespace + tenant + escaped name + separator`; the label
    /// value of an item starts here
    pub fn key_prefix_len(&self) -> usize {
        self.key_prefix_len
    }

    pub fn or_suffixes(&self) -> &[Vec<u8>] {
        &self.or_suffixes
    }

    /// Anchored regex verifying values found by a wildcard scan
    pub fn value_matcher(&self) -> Option<&Regex> {
        self.value_matcher.as_ref()
    }

    /// Whether the filter selects values the regex rejects
    ///
    /// Set for regexes that match the empty string: `job=~"api|"` is
    /// evaluated as the negative of the values outside `api|`.
    pub fn is_inverted(&self) -> bool {
        self.inverted
    }

    pub fn match_cost(&self) -> u64 {
        self.match_cost
    }

    pub fn is_negative(&self) -> bool {
        self.is_negative
    }

    pub fn is_regex(&self) -> bool {
        self.is_regex
    }

    /// Stable identity of the filter, used as cost-cache key and sort tie-break
    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    /// Whether evaluation must scan every value under the prefix
    pub fn is_full_scan(&self) -> bool {
        self.or_suffixes.len() == 1 && self.or_suffixes[0].is_empty()
    }

    /// Deterministic ordering used to break cost ties
    pub fn cmp_signature(&self, other: &TagFilter) -> Ordering {
        self.signature.cmp(&other.signature)
    }
}

impl fmt::Display for TagFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match (self.is_negative != self.inverted, self.is_regex) {
            (false, false) => "=",
            (true, false) => "!=",
            (false, true) => "=~",
            (true, true) => "!~",
        };
        write!(f, "{}{}{:?}", self.name, op, self.value)
    }
}

/// All label matchers of one query, scoped to one tenant
#[derive(Debug, Clone)]
pub struct TagFilterSet {
    tfs: Vec<TagFilter>,
    common_prefix: Vec<u8>,
    tenant: Tenant,
}

impl TagFilterSet {
    pub fn new(tenant: Tenant) -> Self {
        let mut common_prefix = Vec::with_capacity(9);
        marshal_common_prefix(&mut common_prefix, NS_TAG_TIME_TO_IDS, tenant);
        Self {
            tfs: Vec::new(),
            common_prefix,
            tenant,
        }
    }

    /// Compile and validate a whole selector
    pub fn from_matchers(tenant: Tenant, matchers: &[LabelMatcher]) -> SearchResult<Self> {
        let mut tfs = Self::new(tenant);
        for m in matchers {
            tfs.add_matcher(m)?;
        }
        tfs.validate()?;
        Ok(tfs)
    }

    pub fn add_matcher(&mut self, m: &LabelMatcher) -> SearchResult<()> {
        self.add(&m.name, &m.value, m.op.is_negative(), m.op.is_regex())
    }

    /// Add one filter
    ///
    /// An empty name refers to the metric name. An empty value matches series
    /// that lack the label, so `name=""` is stored as `name!~".+"` and
    /// `name!=""` as `name=~".+"`. Regexes matching the empty string follow
    /// the same rule (see [`TagFilter::is_inverted`]). Filters identical to
    /// one already in the set are ignored.
    pub fn add(
        &mut self,
        name: &str,
        value: &str,
        is_negative: bool,
        is_regex: bool,
    ) -> SearchResult<()> {
        let name = if name.is_empty() { METRIC_NAME_LABEL } else { name };
        let (value, is_negative, is_regex) = if value.is_empty() {
            (".+", !is_negative, true)
        } else {
            (value, is_negative, is_regex)
        };

        let tf = TagFilter::compile(&self.common_prefix, name, value, is_negative, is_regex)?;
        if self.tfs.iter().any(|existing| existing.signature == tf.signature) {
            return Ok(());
        }
        self.tfs.push(tf);
        Ok(())
    }

    /// Reject sets that cannot seed a search
    pub fn validate(&self) -> SearchResult<()> {
        if self.tfs.is_empty() {
            return Err(SearchError::InvalidFilterSet(
                "at least one tag filter is required".to_string(),
            ));
        }
        if self.tfs.iter().all(|tf| tf.is_negative) {
            return Err(SearchError::InvalidFilterSet(format!(
                "{} has no positive filter",
                self
            )));
        }
        Ok(())
    }

    pub fn filters(&self) -> &[TagFilter] {
        &self.tfs
    }

    pub fn len(&self) -> usize {
        self.tfs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tfs.is_empty()
    }

    pub fn tenant(&self) -> Tenant {
        self.tenant
    }

    /// `namespace + tenant`, a prefix of every filter's prefix
    pub fn common_prefix(&self) -> &[u8] {
        &self.common_prefix
    }
}

impl fmt::Display for TagFilterSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, tf) in self.tfs.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", tf)?;
        }
        f.write_str("}")
    }
}

#[derive(Debug, PartialEq, Eq)]
enum RegexShape {
    /// Matches exactly these literal values
    Literals(Vec<Vec<u8>>),
    /// Every match starts with this literal
    LiteralPrefix(Vec<u8>),
    Opaque,
}

fn analyze_regex(pattern: &str) -> RegexShape {
    let hir = match regex_syntax::Parser::new().parse(pattern) {
        Ok(hir) => hir,
        Err(_) => return RegexShape::Opaque,
    };

    let seq = Extractor::new()
        .limit_literal_len(MAX_LITERAL_LEN)
        .extract(&hir);
    if seq.is_exact() {
        if let Some(lits) = seq.literals() {
            if lits.len() <= MAX_OR_VALUES {
                return RegexShape::Literals(lits.iter().map(|l| l.as_bytes().to_vec()).collect());
            }
        }
    }

    if let HirKind::Concat(subs) = hir.kind() {
        if let Some(HirKind::Literal(lit)) = subs.first().map(Hir::kind) {
            return RegexShape::LiteralPrefix(lit.0.to_vec());
        }
    }
    RegexShape::Opaque
}
