//! Importer line parser
//!
//! One row per line:
//!
//! ```text
//! metric{label="value", ...} "sample or log line" [timestamp_ms]
//! metric "sample or log line" [timestamp_ms]
//! ```
//!
//! Blank lines and `#` comments are skipped. Quoted strings take C-style
//! backslash escapes (`\"`, `\n`, `\xHH`, `\uHHHH`, octal). Labels with an
//! empty name are dropped. Lines that fail to parse are
//! logged and skipped without failing the batch.

use crate::ingest::error::{ParseError, ParseResult};
use crate::ingest::row::{Label, Row};
use tracing::warn;

/// Rows parsed from an importer payload
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedRows {
    pub rows: Vec<Row>,
    /// Lines skipped because they could not be parsed
    pub invalid_lines: usize,
}

/// Parse every line of `input`
///
/// Rows without a timestamp get `default_timestamp`.
pub fn parse_rows(input: &str, default_timestamp: u64) -> ParsedRows {
    let mut parsed = ParsedRows::default();
    for line in input.split('\n') {
        match parse_line(line, default_timestamp) {
            Ok(Some(row)) => parsed.rows.push(row),
            Ok(None) => {}
            Err(e) => {
                warn!(line = %line.trim_end_matches('\r'), error = %e, "Skipping invalid importer line");
                parsed.invalid_lines += 1;
            }
        }
    }
    parsed
}

/// Parse a single line; `Ok(None)` for blank lines and comments
pub fn parse_line(line: &str, default_timestamp: u64) -> ParseResult<Option<Row>> {
    let line = line.strip_suffix('\r').unwrap_or(line);
    let s = skip_leading_whitespace(line);
    if s.is_empty() || s.starts_with('#') {
        return Ok(None);
    }

    let metric_end = s
        .find(|c: char| c == '{' || is_whitespace(c))
        .unwrap_or(s.len());
    let metric = &s[..metric_end];
    let mut rest = skip_leading_whitespace(&s[metric_end..]);

    let mut labels = Vec::new();
    if let Some(after_brace) = rest.strip_prefix('{') {
        let (parsed, tail) = parse_labels(after_brace)?;
        labels = parsed;
        rest = skip_leading_whitespace(tail);
    } else if metric_end == s.len() {
        return Err(ParseError::MissingValue);
    }

    if metric.is_empty() {
        return Err(ParseError::EmptyMetric);
    }
    if rest.is_empty() {
        return Err(ParseError::MissingValue);
    }

    let value_end = find_closing_quote(rest).ok_or_else(|| ParseError::InvalidValue(rest.to_string()))?;
    let value = unescape_value(&rest[..=value_end])
        .map_err(|_| ParseError::InvalidValue(rest.to_string()))?;
    let tail = &rest[value_end + 1..];

    let ts_text = skip_trailing_whitespace(skip_leading_whitespace(tail));
    let timestamp = if ts_text.is_empty() {
        default_timestamp
    } else {
        if !tail.starts_with(is_whitespace) {
            return Err(ParseError::InvalidValue(rest.to_string()));
        }
        ts_text
            .parse::<u64>()
            .map_err(|_| ParseError::InvalidTimestamp(ts_text.to_string()))?
    };

    Ok(Some(Row {
        metric: metric.to_string(),
        labels,
        timestamp,
        value,
    }))
}

/// Parse `name="value", ...}` returning the labels and the text after `}`
fn parse_labels(mut s: &str) -> ParseResult<(Vec<Label>, &str)> {
    let mut labels = Vec::new();
    loop {
        s = skip_leading_whitespace(s);
        if let Some(tail) = s.strip_prefix('}') {
            return Ok((labels, tail));
        }

        let eq = s
            .find('=')
            .ok_or_else(|| ParseError::InvalidLabels(format!("missing value for tag {:?}", s)))?;
        let name = skip_trailing_whitespace(&s[..eq]);
        s = skip_leading_whitespace(&s[eq + 1..]);

        let close = find_closing_quote(s).ok_or_else(|| {
            ParseError::InvalidLabels(format!("expecting quoted value for tag {:?}; got {:?}", name, s))
        })?;
        let value = unescape_value(&s[..=close])?;
        s = &s[close + 1..];

        if !name.is_empty() {
            labels.push(Label::new(name, value));
        }

        s = skip_leading_whitespace(s);
        if let Some(tail) = s.strip_prefix('}') {
            return Ok((labels, tail));
        }
        s = s.strip_prefix(',').ok_or_else(|| {
            ParseError::InvalidLabels(format!("missing comma after tag {:?}", name))
        })?;
    }
}

fn is_whitespace(c: char) -> bool {
    c == ' ' || c == '\t'
}

fn skip_leading_whitespace(s: &str) -> &str {
    s.trim_start_matches(is_whitespace)
}

fn skip_trailing_whitespace(s: &str) -> &str {
    s.trim_end_matches(is_whitespace)
}

/// Index of the quote closing the string that opens `s`
fn find_closing_quote(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    if bytes.first() != Some(&b'"') {
        return None;
    }
    let mut off = 1;
    loop {
        let n = bytes[off..].iter().position(|&b| b == b'"')?;
        if prev_backslashes_count(&bytes[..off + n]) % 2 == 0 {
            return Some(off + n);
        }
        off += n + 1;
    }
}

/// Number of consecutive backslashes ending `s`
fn prev_backslashes_count(s: &[u8]) -> usize {
    s.iter().rev().take_while(|&&b| b == b'\\').count()
}

/// Unquote a double-quoted string with backslash escapes
fn unescape_value(s: &str) -> ParseResult<String> {
    let inner = s
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .filter(|_| s.len() >= 2)
        .ok_or_else(|| ParseError::InvalidValue(s.to_string()))?;

    if !inner.contains('\\') {
        if inner.contains('"') || inner.contains('\n') {
            return Err(ParseError::InvalidValue(s.to_string()));
        }
        return Ok(inner.to_string());
    }

    let bad = || ParseError::InvalidEscape(s.to_string());
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        match c {
            '"' | '\n' => return Err(ParseError::InvalidValue(s.to_string())),
            '\\' => {}
            _ => {
                out.push(c);
                continue;
            }
        }
        let escaped = chars.next().ok_or_else(bad)?;
        match escaped {
            '"' => out.push('"'),
            '\'' => out.push('\''),
            '\\' => out.push('\\'),
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            'a' => out.push('\u{07}'),
            'b' => out.push('\u{08}'),
            'f' => out.push('\u{0c}'),
            'v' => out.push('\u{0b}'),
            'x' => out.push(hex_char(&mut chars, 2).ok_or_else(bad)?),
            'u' => out.push(hex_char(&mut chars, 4).ok_or_else(bad)?),
            'U' => out.push(hex_char(&mut chars, 8).ok_or_else(bad)?),
            '0'..='7' => {
                let mut code = escaped.to_digit(8).ok_or_else(bad)?;
                for _ in 0..2 {
                    let digit = chars.next().and_then(|d| d.to_digit(8)).ok_or_else(bad)?;
                    code = code * 8 + digit;
                }
                out.push(char::from_u32(code).filter(|_| code <= 0xff).ok_or_else(bad)?);
            }
            _ => return Err(bad()),
        }
    }
    Ok(out)
}

fn hex_char(chars: &mut std::str::Chars<'_>, digits: usize) -> Option<char> {
    let mut code = 0u32;
    for _ in 0..digits {
        code = code * 16 + chars.next()?.to_digit(16)?;
    }
    char::from_u32(code)
}
