//! Provider sources: URL shaping, authentication and response decoding on top of
//! the shared fetch engine.

pub mod facebook;
pub mod linkedin;
pub mod tiktok;

use std::sync::Arc;

use serde_json::Value;

use crate::classifier::ErrorClassifier;
use crate::data_source::SourceError;
use crate::domain::NodeSchema;
use crate::fetcher::PaginatedFetcher;
use crate::http_client::{HttpClient, HttpResponse};
use crate::provider_policy::ProviderPolicy;
use crate::retry::RetryingHttpClient;
use crate::throttling::RequestThrottle;

pub use facebook::{FacebookSettings, FacebookSource};
pub use linkedin::{LinkedinSettings, LinkedinSource};
pub use tiktok::{TiktokSettings, TiktokSource};

/// Fetcher with the provider's retry budget, classifier and request quota.
pub(crate) fn provider_fetcher(
    http: Arc<dyn HttpClient>,
    classifier: ErrorClassifier,
    policy: &ProviderPolicy,
) -> PaginatedFetcher {
    let client = RetryingHttpClient::new(http, classifier, policy.retry.clone())
        .with_throttle(RequestThrottle::from_policy(policy))
        .with_label(policy.provider_id.as_str());
    PaginatedFetcher::new(client)
}

pub(crate) fn response_json(response: &HttpResponse) -> Result<Value, SourceError> {
    response.json().map_err(|error| {
        SourceError::fetch(format!("provider returned invalid JSON: {error}"))
    })
}

/// Selected fields known to the node, in request order.
pub(crate) fn schema_fields(node: &NodeSchema, selected: &[String]) -> Vec<String> {
    node.resolve_fields(selected)
        .into_iter()
        .filter(|field| node.contains(field))
        .collect()
}
