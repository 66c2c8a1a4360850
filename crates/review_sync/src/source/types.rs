use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;

use super::errors::{Result, SourceError};

/// Remote resources the engine reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// Paged list of workflow templates.
    Workflows,
    /// Paged list of reviews.
    Reviews,
    /// File versions attached to one review.
    ReviewVersions,
    /// Executed steps of one review.
    ReviewProgress,
    /// Workflow template owning one review.
    ReviewWorkflow,
}

impl ResourceKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Workflows => "workflows",
            ResourceKind::Reviews => "reviews",
            ResourceKind::ReviewVersions => "review_versions",
            ResourceKind::ReviewProgress => "review_progress",
            ResourceKind::ReviewWorkflow => "review_workflow",
        }
    }

    /// Circuit breaker dependency name guarding this resource.
    ///
    /// All per-review sub-resources share one breaker.
    #[must_use]
    pub fn dependency(self) -> &'static str {
        match self {
            ResourceKind::Workflows => "workflows",
            ResourceKind::Reviews => "reviews",
            ResourceKind::ReviewVersions
            | ResourceKind::ReviewProgress
            | ResourceKind::ReviewWorkflow => "review_detail",
        }
    }

    /// Whether this resource is listed with `fetch_page`.
    #[inline]
    #[must_use]
    pub fn is_paged(self) -> bool {
        matches!(self, ResourceKind::Workflows | ResourceKind::Reviews)
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Query filters passed through to list endpoints. Ordered so URLs and cache
/// keys are deterministic.
pub type Filters = BTreeMap<String, String>;

/// One page of a list endpoint.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub records: Vec<Value>,
    /// Total number of records the source reports, when it reports one.
    pub total_count: Option<usize>,
}

/// A paginated remote source of workflows and reviews.
#[async_trait]
pub trait PagedSource: Send + Sync {
    /// Fetch one page of a list resource.
    async fn fetch_page(
        &self,
        resource: ResourceKind,
        offset: usize,
        limit: usize,
        filters: &Filters,
    ) -> Result<Page>;

    /// Fetch a per-review sub-resource.
    async fn fetch_detail(&self, resource: ResourceKind, id: &str) -> Result<Value>;
}

/// Supplies the bearer credential for outbound calls.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn bearer_token(&self) -> Result<String>;
}

/// A token read once from configuration.
#[derive(Clone)]
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl std::fmt::Debug for StaticTokenProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticTokenProvider")
            .field("token", &"<redacted>")
            .finish()
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn bearer_token(&self) -> Result<String> {
        let token = self.token.trim();
        if token.is_empty() {
            return Err(SourceError::auth("no API token configured"));
        }
        Ok(token.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detail_resources_share_one_dependency() {
        assert_eq!(ResourceKind::ReviewVersions.dependency(), "review_detail");
        assert_eq!(ResourceKind::ReviewProgress.dependency(), "review_detail");
        assert_eq!(ResourceKind::ReviewWorkflow.dependency(), "review_detail");
        assert_eq!(ResourceKind::Reviews.dependency(), "reviews");
    }

    #[test]
    fn only_lists_are_paged() {
        assert!(ResourceKind::Workflows.is_paged());
        assert!(ResourceKind::Reviews.is_paged());
        assert!(!ResourceKind::ReviewProgress.is_paged());
    }

    #[tokio::test]
    async fn static_token_provider_rejects_blank_token() {
        let err = StaticTokenProvider::new("  ")
            .bearer_token()
            .await
            .expect_err("blank token");
        assert!(matches!(err, SourceError::Auth { .. }));
    }

    #[tokio::test]
    async fn static_token_provider_trims_token() {
        let token = StaticTokenProvider::new(" abc \n").bearer_token().await;
        assert_eq!(token.expect("token"), "abc");
    }

    #[test]
    fn static_token_provider_debug_redacts() {
        let dbg = format!("{:?}", StaticTokenProvider::new("secret"));
        assert!(!dbg.contains("secret"));
    }
}
