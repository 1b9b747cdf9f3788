//! Selector Parser
//!
//! Parses series selectors into a [`Selector`] of label matchers.
//!
//! # Supported Syntax
//!
//! ```text
//! metric
//! metric{label op "value" [, label op "value" ...] [,]}
//! {label op "value" [, ...]}
//!
//! op := "=" | "!=" | "=~" | "!~"
//! ```
//!
//! # Examples
//!
//! ```text
//! http_requests
//! http_requests{job="api", path=~"/v1/.*"}
//! {__name__="logs", level!~"debug|trace"}
//! ```
//!
//! Time bounds for the CLI (`now`, `now-1h`, `now() - 7d`, RFC 3339, or Unix
//! milliseconds) are parsed by [`parse_time`].

use nom::{
    branch::alt,
    bytes::complete::{tag, tag_no_case, take_while, take_while1},
    character::complete::{char, digit1, multispace0},
    combinator::{map_res, opt, recognize, value},
    multi::separated_list0,
    sequence::{delimited, pair, preceded, tuple},
    IResult,
};

use crate::query::ast::{LabelMatcher, MatchOp, Selector};
use crate::query::error::{QueryError, QueryResult};

/// Parse a selector string
///
/// The selector must contain at least one matcher that selects series by a
/// non-empty value; a selector made only of negative matchers would need a
/// scan of every series and is rejected.
pub fn parse_selector(input: &str) -> QueryResult<Selector> {
    let input = input.trim();
    if input.is_empty() {
        return Err(QueryError::EmptySelector);
    }

    let selector = match parse_full_selector(input) {
        Ok((remaining, selector)) => {
            if remaining.trim().is_empty() {
                selector
            } else {
                return Err(QueryError::Parse(format!(
                    "Unexpected input after selector: '{}'",
                    remaining.trim()
                )));
            }
        }
        Err(e) => return Err(QueryError::Parse(format!("Parse error: {:?}", e))),
    };

    if selector.matchers.is_empty() {
        return Err(QueryError::EmptySelector);
    }
    if !selector.has_positive() {
        return Err(QueryError::InvalidSelector(format!(
            "{} has no matcher selecting a non-empty value",
            selector
        )));
    }
    Ok(selector)
}

/// Parse a time bound into Unix milliseconds, relative to `now_ms`
pub fn parse_time(input: &str, now_ms: u64) -> QueryResult<u64> {
    let input = input.trim();
    match parse_time_expression(input, now_ms) {
        Ok((remaining, ts)) if remaining.trim().is_empty() => Ok(ts),
        Ok((remaining, _)) => Err(QueryError::InvalidTimeRange(format!(
            "Unexpected input after time: '{}'",
            remaining.trim()
        ))),
        Err(e) => Err(QueryError::InvalidTimeRange(format!(
            "Cannot parse time '{}': {:?}",
            input, e
        ))),
    }
}

/// Parse the full selector
fn parse_full_selector(input: &str) -> IResult<&str, Selector> {
    let (input, _) = multispace0(input)?;
    let (input, metric) = opt(parse_metric_name)(input)?;
    let (input, _) = multispace0(input)?;
    let (input, matchers) = opt(parse_matcher_block)(input)?;

    let mut all = Vec::new();
    if let Some(name) = metric {
        all.push(LabelMatcher::metric(name));
    }
    all.extend(matchers.unwrap_or_default());

    Ok((input, Selector::new(all)))
}

/// Parse `{m1, m2, ...}` with an optional trailing comma
fn parse_matcher_block(input: &str) -> IResult<&str, Vec<LabelMatcher>> {
    let (input, _) = char('{')(input)?;
    let (input, _) = multispace0(input)?;
    let (input, matchers) = separated_list0(
        delimited(multispace0, char(','), multispace0),
        parse_matcher,
    )(input)?;
    let (input, _) = multispace0(input)?;
    let (input, _) = opt(char(','))(input)?;
    let (input, _) = multispace0(input)?;
    let (input, _) = char('}')(input)?;
    Ok((input, matchers))
}

/// Parse one matcher like `job=~"api|web"`
fn parse_matcher(input: &str) -> IResult<&str, LabelMatcher> {
    let (input, name) = parse_label_name(input)?;
    let (input, _) = multispace0(input)?;
    let (input, op) = parse_match_op(input)?;
    let (input, _) = multispace0(input)?;
    let (input, value) = parse_quoted_string(input)?;

    Ok((input, LabelMatcher::new(name, op, value)))
}

/// Parse match operator; two-character operators are tried first
fn parse_match_op(input: &str) -> IResult<&str, MatchOp> {
    alt((
        value(MatchOp::RegexMatch, tag("=~")),
        value(MatchOp::RegexNotMatch, tag("!~")),
        value(MatchOp::NotEqual, tag("!=")),
        value(MatchOp::Equal, tag("=")),
    ))(input)
}

/// Parse metric name; colons and dots are allowed after the first character
fn parse_metric_name(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        take_while1(|c: char| c.is_alphabetic() || c == '_' || c == ':'),
        take_while(|c: char| c.is_alphanumeric() || c == '_' || c == ':' || c == '.'),
    ))(input)
}

/// Parse label name
fn parse_label_name(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        take_while1(|c: char| c.is_alphabetic() || c == '_'),
        take_while(|c: char| c.is_alphanumeric() || c == '_' || c == '.'),
    ))(input)
}

/// Parse a double- or single-quoted string
///
/// `\\`, `\n`, `\t` and an escaped quote are unescaped; any other backslash
/// sequence is kept verbatim so regex escapes like `\.` and `\d` survive.
fn parse_quoted_string(input: &str) -> IResult<&str, String> {
    alt((
        |i| quoted_with('"', i),
        |i| quoted_with('\'', i),
    ))(input)
}

fn quoted_with(quote: char, input: &str) -> IResult<&str, String> {
    let (rest, _) = char(quote)(input)?;
    let mut out = String::new();
    let mut chars = rest.char_indices();
    while let Some((i, c)) = chars.next() {
        if c == quote {
            return Ok((&rest[i + c.len_utf8()..], out));
        }
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some((_, 'n')) => out.push('\n'),
            Some((_, 't')) => out.push('\t'),
            Some((_, '\\')) => out.push('\\'),
            Some((_, e)) if e == quote => out.push(e),
            Some((_, e)) => {
                out.push('\\');
                out.push(e);
            }
            None => break,
        }
    }
    Err(nom::Err::Error(nom::error::Error::new(
        input,
        nom::error::ErrorKind::Char,
    )))
}

/// Parse a time expression
fn parse_time_expression(input: &str, now_ms: u64) -> IResult<&str, u64> {
    alt((
        |i| parse_relative_time(i, now_ms),
        parse_absolute_time,
    ))(input)
}

/// Parse relative time like "now() - 7d" or "now-1h"
fn parse_relative_time(input: &str, now_ms: u64) -> IResult<&str, u64> {
    let (input, _) = alt((tag_no_case("now()"), tag_no_case("now")))(input)?;
    let (input, _) = multispace0(input)?;

    let (input, offset) = opt(preceded(
        pair(char('-'), multispace0),
        parse_duration,
    ))(input)?;

    Ok((input, now_ms.saturating_sub(offset.unwrap_or(0))))
}

/// Parse absolute time: RFC 3339 or Unix milliseconds
fn parse_absolute_time(input: &str) -> IResult<&str, u64> {
    alt((
        map_res(
            recognize(tuple((
                digit1,
                char('-'),
                take_while1(|c: char| c.is_ascii_alphanumeric() || "-:.+".contains(c)),
            ))),
            |s: &str| {
                chrono::DateTime::parse_from_rfc3339(s)
                    .map_err(|e| e.to_string())
                    .and_then(|dt| {
                        u64::try_from(dt.timestamp_millis()).map_err(|e| e.to_string())
                    })
            },
        ),
        map_res(digit1, |s: &str| s.parse::<u64>()),
    ))(input)
}

/// Parse duration like "7d", "24h", "30m", "10s"
fn parse_duration(input: &str) -> IResult<&str, u64> {
    let (input, num) = map_res(digit1, |s: &str| s.parse::<u64>())(input)?;
    let (input, unit) = alt((
        value(7 * 24 * 60 * 60 * 1000u64, alt((tag("w"), tag("W")))),
        value(24 * 60 * 60 * 1000u64, alt((tag("d"), tag("D")))),
        value(60 * 60 * 1000u64, alt((tag("h"), tag("H")))),
        value(1u64, tag("ms")),
        value(60 * 1000u64, alt((tag("m"), tag("M")))),
        value(1000u64, alt((tag("s"), tag("S")))),
    ))(input)?;

    Ok((input, num.saturating_mul(unit)))
}
