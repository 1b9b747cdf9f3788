//! Tagsieve Query Layer
//!
//! Turns user-facing series selectors into label matchers:
//!
//! - **AST**: `MatchOp`, `LabelMatcher`, `Selector`
//! - **Parser**: selector strings and CLI time bounds
//!
//! # Selector Language
//!
//! ```text
//! metric{label op "value", ...}
//! {label op "value", ...}
//!
//! op := "=" | "!=" | "=~" | "!~"
//! ```
//!
//! # Examples
//!
//! ```rust,ignore
//! use tagsieve::query::{parse_selector, LabelMatcher, Selector};
//!
//! // From a string
//! let selector = parse_selector(r#"http_requests{job=~"api|web", code!="500"}"#)?;
//!
//! // Built directly
//! let selector = Selector::metric("http_requests")
//!     .with(LabelMatcher::regex("job", "api|web"))
//!     .with(LabelMatcher::not_equal("code", "500"));
//!
//! let filters = TagFilterSet::from_matchers(tenant, &selector.matchers)?;
//! ```

mod ast;
mod error;
mod parser;

pub use ast::{LabelMatcher, MatchOp, Selector};
pub use error::{QueryError, QueryResult};
pub use parser::{parse_selector, parse_time};
