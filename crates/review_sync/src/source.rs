//! Remote review source: the paged-fetch seam and its HTTP adapter.
//!
//! The sync engine only talks to a [`PagedSource`]. [`HttpSource`] implements it
//! over the [`crate::http::HttpTransport`] boundary, and [`RateLimitedSource`]
//! wraps any source with a proactive token bucket.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use review_sync::source::{HttpSource, RateLimitedSource, StaticTokenProvider, rate_limits};
//!
//! let source = HttpSource::new(transport, "https://api.example.com/v1", "p-1", tokens)?;
//! let source = RateLimitedSource::new(source, rate_limits::DEFAULT_RPS);
//! let page = source.fetch_page(ResourceKind::Reviews, 0, 50, &Filters::new()).await?;
//! ```

mod errors;
mod http_source;
mod rate_limit;
mod types;

pub use errors::{Result, SourceError, short_error_message};
pub use http_source::{HttpSource, parse_page};
pub use rate_limit::{ApiRateLimiter, RateLimitedSource, rate_limits};
pub use types::{Filters, Page, PagedSource, ResourceKind, StaticTokenProvider, TokenProvider};
