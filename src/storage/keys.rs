//! Index key layout
//!
//! Every index item starts with a namespace byte and the marshaled tenant.
//! Tag names and values are escaped so that the separator bytes below never
//! occur inside them, which keeps prefix scans unambiguous.
//!
//! ```text
//! tag -> time -> ids:  [7][account][project] name 0x02 value 0x01 [bucket u64] [id u64]*
//! series -> id:        [8][account][project] (name 0x02 value 0x01)* 0x01 [id u64]
//! id -> series:        [9][account][project] [id u64] [marshal type] [count u32] values
//! ```

use crate::storage::error::{StorageError, StorageResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Tag name -> value -> date bucket -> identifiers
pub const NS_TAG_TIME_TO_IDS: u8 = 7;
/// Canonical series -> identifier
pub const NS_SERIES_TO_ID: u8 = 8;
/// Identifier -> label set
pub const NS_ID_TO_SERIES: u8 = 9;

pub const ESCAPE_CHAR: u8 = 0;
pub const TAG_SEPARATOR: u8 = 1;
pub const KV_SEPARATOR: u8 = 2;

/// Label name under which the metric name is indexed
pub const METRIC_NAME_LABEL: &str = "__name__";

pub const MSEC_PER_DAY: u64 = 24 * 3600 * 1000;

/// Length of namespace byte + tenant
pub const COMMON_PREFIX_LEN: usize = 1 + 4 + 4;

/// Tenant scope of every series and index item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Tenant {
    pub account_id: u32,
    pub project_id: u32,
}

impl Tenant {
    pub fn new(account_id: u32, project_id: u32) -> Self {
        Self {
            account_id,
            project_id,
        }
    }
}

impl fmt::Display for Tenant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.account_id, self.project_id)
    }
}

impl FromStr for Tenant {
    type Err = String;

    /// Parse `account` or `account:project`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (account, project) = match s.split_once(':') {
            Some((a, p)) => (a, p),
            None => (s, "0"),
        };
        let account_id = account
            .trim()
            .parse()
            .map_err(|e| format!("invalid account id {:?}: {}", account, e))?;
        let project_id = project
            .trim()
            .parse()
            .map_err(|e| format!("invalid project id {:?}: {}", project, e))?;
        Ok(Self::new(account_id, project_id))
    }
}

/// Append namespace + tenant to `dst`
pub fn marshal_common_prefix(dst: &mut Vec<u8>, namespace: u8, tenant: Tenant) {
    dst.push(namespace);
    dst.extend_from_slice(&tenant.account_id.to_be_bytes());
    dst.extend_from_slice(&tenant.project_id.to_be_bytes());
}

/// Append `src` with the separator bytes escaped
pub fn escape_into(dst: &mut Vec<u8>, src: &[u8]) {
    for &b in src {
        match b {
            ESCAPE_CHAR | TAG_SEPARATOR | KV_SEPARATOR => {
                dst.push(ESCAPE_CHAR);
                dst.push(b'0' + b);
            }
            _ => dst.push(b),
        }
    }
}

/// Append an escaped tag name followed by `KV_SEPARATOR`
pub fn marshal_tag_key(dst: &mut Vec<u8>, name: &[u8]) {
    escape_into(dst, name);
    dst.push(KV_SEPARATOR);
}

/// Append an escaped tag value followed by `TAG_SEPARATOR`
pub fn marshal_tag_value(dst: &mut Vec<u8>, value: &[u8]) {
    escape_into(dst, value);
    dst.push(TAG_SEPARATOR);
}

/// Unescape bytes up to the first `separator` into `dst`, returning the tail
/// after the separator
pub fn unmarshal_until<'a>(dst: &mut Vec<u8>, src: &'a [u8], separator: u8) -> StorageResult<&'a [u8]> {
    let end = src
        .iter()
        .position(|&b| b == separator)
        .ok_or_else(|| StorageError::Corruption(format!("missing separator {:#04x}", separator)))?;

    let mut i = 0;
    let escaped = &src[..end];
    while i < escaped.len() {
        let b = escaped[i];
        if b != ESCAPE_CHAR {
            dst.push(b);
            i += 1;
            continue;
        }
        let code = *escaped
            .get(i + 1)
            .ok_or_else(|| StorageError::Corruption("dangling escape char".to_string()))?;
        match code {
            b'0'..=b'2' => dst.push(code - b'0'),
            _ => {
                return Err(StorageError::Corruption(format!(
                    "unsupported escape code {:#04x}",
                    code
                )))
            }
        }
        i += 2;
    }

    Ok(&src[end + 1..])
}

pub fn marshal_u64(dst: &mut Vec<u8>, v: u64) {
    dst.extend_from_slice(&v.to_be_bytes());
}

pub fn unmarshal_u64(src: &[u8]) -> StorageResult<u64> {
    let bytes: [u8; 8] = src
        .get(..8)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| StorageError::Corruption(format!("expecting 8 bytes; got {}", src.len())))?;
    Ok(u64::from_be_bytes(bytes))
}

/// Start of the bucket containing `timestamp`
pub fn bucket_start(timestamp: u64, bucket_width_ms: u64) -> u64 {
    if bucket_width_ms == 0 {
        return timestamp;
    }
    timestamp - timestamp % bucket_width_ms
}

/// Prefix shared by every posting of `name` in `tenant`
pub fn tag_prefix(dst: &mut Vec<u8>, tenant: Tenant, name: &[u8]) {
    marshal_common_prefix(dst, NS_TAG_TIME_TO_IDS, tenant);
    marshal_tag_key(dst, name);
}

/// Build a complete posting item
pub fn posting_item(tenant: Tenant, name: &[u8], value: &[u8], bucket: u64, ids: &[u64]) -> Vec<u8> {
    let mut item = Vec::with_capacity(COMMON_PREFIX_LEN + name.len() + value.len() + 10 + 8 * (ids.len() + 1));
    tag_prefix(&mut item, tenant, name);
    marshal_tag_value(&mut item, value);
    marshal_u64(&mut item, bucket);
    for &id in ids {
        marshal_u64(&mut item, id);
    }
    item
}

/// Append the canonical series key (without identifier) for `labels`
///
/// `labels` must already be in canonical order.
pub fn marshal_series_prefix<'a>(
    dst: &mut Vec<u8>,
    tenant: Tenant,
    labels: impl IntoIterator<Item = (&'a [u8], &'a [u8])>,
) {
    marshal_common_prefix(dst, NS_SERIES_TO_ID, tenant);
    for (name, value) in labels {
        marshal_tag_key(dst, name);
        marshal_tag_value(dst, value);
    }
    dst.push(TAG_SEPARATOR);
}

/// Prefix of the label-set item stored for `id`
pub fn marshal_id_prefix(dst: &mut Vec<u8>, tenant: Tenant, id: u64) {
    marshal_common_prefix(dst, NS_ID_TO_SERIES, tenant);
    marshal_u64(dst, id);
}

/// Decodes identifier lists from posting item tails
///
/// Reused across items of one scan; the decoded slice is only valid until
/// the next call.
#[derive(Debug, Default)]
pub struct PostingParser {
    ids: Vec<u64>,
}

impl PostingParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.ids.clear();
    }

    /// Parse a tail made of `bucket u64` followed by identifiers
    pub fn parse_bucket_and_ids(&mut self, tail: &[u8]) -> StorageResult<(u64, &[u64])> {
        let bucket = unmarshal_u64(tail)?;
        let ids = self.parse_ids(&tail[8..])?;
        Ok((bucket, ids))
    }

    /// Parse a tail made only of identifiers
    pub fn parse_ids(&mut self, tail: &[u8]) -> StorageResult<&[u64]> {
        if tail.is_empty() || tail.len() % 8 != 0 {
            return Err(StorageError::Corruption(format!(
                "invalid identifier list length {}; must be a positive multiple of 8",
                tail.len()
            )));
        }
        self.ids.clear();
        self.ids.extend(tail.chunks_exact(8).map(|chunk| {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(chunk);
            u64::from_be_bytes(buf)
        }));
        Ok(&self.ids)
    }
}
