use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use url::Url;

use crate::http::{HttpError, HttpRequest, HttpResponse, HttpTransport};

use super::errors::{Result, SourceError};
use super::types::{Filters, Page, PagedSource, ResourceKind, TokenProvider};

/// [`PagedSource`] over the review REST API.
///
/// List routes are `{base}/projects/{project}/workflows` and `.../reviews`;
/// per-review routes hang off `.../reviews/{id}/`.
pub struct HttpSource {
    transport: Arc<dyn HttpTransport>,
    base_url: Url,
    project_id: String,
    tokens: Arc<dyn TokenProvider>,
}

impl HttpSource {
    /// Create a source rooted at `base_url` for one project.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Permanent`] if `base_url` is not an absolute
    /// hierarchical URL.
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        base_url: &str,
        project_id: impl Into<String>,
        tokens: Arc<dyn TokenProvider>,
    ) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| SourceError::permanent(None, format!("invalid base URL: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(SourceError::permanent(
                None,
                format!("base URL cannot carry a path: {base_url}"),
            ));
        }

        Ok(Self {
            transport,
            base_url,
            project_id: project_id.into(),
            tokens,
        })
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    fn project_url(&self, tail: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|()| {
                SourceError::permanent(None, "base URL cannot carry a path")
            })?;
            segments.pop_if_empty();
            segments.push("projects");
            segments.push(&self.project_id);
            segments.extend(tail);
        }
        Ok(url)
    }

    pub(crate) fn list_url(
        &self,
        resource: ResourceKind,
        offset: usize,
        limit: usize,
        filters: &Filters,
    ) -> Result<Url> {
        let mut url = match resource {
            ResourceKind::Workflows => self.project_url(&["workflows"])?,
            ResourceKind::Reviews => self.project_url(&["reviews"])?,
            other => {
                return Err(SourceError::permanent(
                    None,
                    format!("{other} is not a list resource"),
                ));
            }
        };

        {
            let mut query = url.query_pairs_mut();
            query.append_pair("limit", &limit.to_string());
            query.append_pair("offset", &offset.to_string());
            for (key, value) in filters {
                query.append_pair(key, value);
            }
        }
        Ok(url)
    }

    pub(crate) fn detail_url(&self, resource: ResourceKind, review_id: &str) -> Result<Url> {
        let leaf = match resource {
            ResourceKind::ReviewVersions => "versions",
            ResourceKind::ReviewProgress => "progress",
            ResourceKind::ReviewWorkflow => "workflow",
            other => {
                return Err(SourceError::permanent(
                    None,
                    format!("{other} is not a review sub-resource"),
                ));
            }
        };
        self.project_url(&["reviews", review_id, leaf])
    }

    async fn get_json(&self, url: Url) -> Result<Value> {
        let token = self.tokens.bearer_token().await?;
        let request = HttpRequest::get(url.as_str()).bearer(&token);

        tracing::trace!(url = %url, "GET");
        let response = self.transport.send(request).await.map_err(|e| match e {
            HttpError::Timeout(m) => SourceError::transient(format!("request timed out: {m}")),
            other => SourceError::transient(other.to_string()),
        })?;

        if !response.is_success() {
            return Err(status_error(&response));
        }

        serde_json::from_slice(&response.body).map_err(|e| SourceError::decode(e.to_string()))
    }
}

/// Classify a non-2xx response.
fn status_error(response: &HttpResponse) -> SourceError {
    let body = String::from_utf8_lossy(&response.body);
    let snippet: String = body.chars().take(200).collect();
    match response.status {
        401 | 403 => SourceError::auth(format!("HTTP {}: {snippet}", response.status)),
        429 => SourceError::transient(format!(
            "rate limited (retry-after: {})",
            response.header("retry-after").unwrap_or("unset")
        )),
        s if s >= 500 => SourceError::transient(format!("HTTP {s}: {snippet}")),
        s => SourceError::permanent(Some(s), snippet),
    }
}

/// Parse a list response.
///
/// Accepts `{results: [...], pagination: {totalResults: N}}` and a bare array
/// (no reported total).
pub fn parse_page(body: Value) -> Result<Page> {
    match body {
        Value::Array(records) => Ok(Page {
            records,
            total_count: None,
        }),
        Value::Object(mut map) => {
            let records = match map.remove("results") {
                Some(Value::Array(records)) => records,
                Some(Value::Null) | None => Vec::new(),
                Some(other) => {
                    return Err(SourceError::decode(format!(
                        "`results` is not an array: {other}"
                    )));
                }
            };
            let total_count = map
                .get("pagination")
                .and_then(|p| p.get("totalResults"))
                .and_then(Value::as_u64)
                .map(|n| n as usize);
            Ok(Page {
                records,
                total_count,
            })
        }
        other => Err(SourceError::decode(format!(
            "expected a list response, got {other}"
        ))),
    }
}

#[async_trait]
impl PagedSource for HttpSource {
    async fn fetch_page(
        &self,
        resource: ResourceKind,
        offset: usize,
        limit: usize,
        filters: &Filters,
    ) -> Result<Page> {
        let url = self.list_url(resource, offset, limit, filters)?;
        parse_page(self.get_json(url).await?)
    }

    async fn fetch_detail(&self, resource: ResourceKind, id: &str) -> Result<Value> {
        let url = self.detail_url(resource, id)?;
        self.get_json(url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{HttpResponse, MockTransport, header_get};
    use crate::source::StaticTokenProvider;
    use serde_json::json;

    const BASE: &str = "https://api.example.com/v1";

    fn source(transport: &MockTransport) -> HttpSource {
        HttpSource::new(
            Arc::new(transport.clone()),
            BASE,
            "p-1",
            Arc::new(StaticTokenProvider::new("tok")),
        )
        .expect("valid base")
    }

    fn status(code: u16) -> HttpResponse {
        HttpResponse {
            status: code,
            headers: Vec::new(),
            body: b"nope".to_vec(),
        }
    }

    #[test]
    fn list_url_carries_paging_and_filters() {
        let transport = MockTransport::new();
        let mut filters = Filters::new();
        filters.insert("status".into(), "OPEN".into());

        let url = source(&transport)
            .list_url(ResourceKind::Reviews, 50, 50, &filters)
            .expect("url");
        assert_eq!(
            url.as_str(),
            "https://api.example.com/v1/projects/p-1/reviews?limit=50&offset=50&status=OPEN"
        );
    }

    #[test]
    fn detail_url_escapes_review_id() {
        let transport = MockTransport::new();
        let url = source(&transport)
            .detail_url(ResourceKind::ReviewVersions, "a/b")
            .expect("url");
        assert_eq!(
            url.as_str(),
            "https://api.example.com/v1/projects/p-1/reviews/a%2Fb/versions"
        );
    }

    #[test]
    fn list_url_rejects_detail_resource() {
        let transport = MockTransport::new();
        let err = source(&transport)
            .list_url(ResourceKind::ReviewProgress, 0, 50, &Filters::new())
            .expect_err("not a list");
        assert!(matches!(err, SourceError::Permanent { .. }));
    }

    #[test]
    fn new_rejects_non_hierarchical_base() {
        let result = HttpSource::new(
            Arc::new(MockTransport::new()),
            "mailto:ops@example.com",
            "p-1",
            Arc::new(StaticTokenProvider::new("tok")),
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn fetch_page_parses_results_and_total() {
        let transport = MockTransport::new();
        transport.push_json(
            format!("{BASE}/projects/p-1/workflows?limit=50&offset=0"),
            200,
            json!({"results": [{"id": "w1"}], "pagination": {"totalResults": 3}}),
        );

        let page = source(&transport)
            .fetch_page(ResourceKind::Workflows, 0, 50, &Filters::new())
            .await
            .expect("page");
        assert_eq!(page.records.len(), 1);
        assert_eq!(page.total_count, Some(3));

        let sent = transport.requests();
        assert_eq!(header_get(&sent[0].headers, "authorization"), Some("Bearer tok"));
    }

    #[tokio::test]
    async fn status_codes_map_to_error_classes() {
        let transport = MockTransport::new();
        let url = format!("{BASE}/projects/p-1/reviews/r1/progress");
        for code in [401, 429, 503, 404] {
            transport.push_response(url.clone(), status(code));
        }
        transport.push_transport_error(url.clone(), "connection reset");
        let src = source(&transport);

        let mut kinds = Vec::new();
        for _ in 0..5 {
            let err = src
                .fetch_detail(ResourceKind::ReviewProgress, "r1")
                .await
                .expect_err("error response");
            kinds.push(match err {
                SourceError::Auth { .. } => "auth",
                SourceError::Transient { .. } => "transient",
                SourceError::Permanent { status: Some(404), .. } => "permanent",
                other => panic!("unexpected error: {other:?}"),
            });
        }
        assert_eq!(
            kinds,
            vec!["auth", "transient", "transient", "permanent", "transient"]
        );
    }

    #[tokio::test]
    async fn undecodable_body_is_decode_error() {
        let transport = MockTransport::new();
        let url = format!("{BASE}/projects/p-1/reviews/r1/workflow");
        transport.push_response(
            url,
            HttpResponse {
                status: 200,
                headers: Vec::new(),
                body: b"<html>".to_vec(),
            },
        );

        let err = source(&transport)
            .fetch_detail(ResourceKind::ReviewWorkflow, "r1")
            .await
            .expect_err("bad json");
        assert!(matches!(err, SourceError::Decode { .. }));
        assert!(!err.is_transient());
    }

    #[test]
    fn parse_page_accepts_bare_array() {
        let page = parse_page(json!([{"id": 1}, {"id": 2}])).expect("page");
        assert_eq!(page.records.len(), 2);
        assert_eq!(page.total_count, None);
    }

    #[test]
    fn parse_page_rejects_scalar() {
        assert!(parse_page(json!("oops")).is_err());
    }
}
