//! Post-processing that resolves shortened ad URLs and extracts their query
//! parameters.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::domain::TypedRecord;
use crate::http_client::{HttpClient, HttpRequest};
use crate::provider_policy::ProviderPolicy;

const UTM_PARAMETERS: [&str; 5] = [
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
];

/// `https://host/segment` with no query string, no UTM tags and a single path segment.
pub fn is_short_link(url: &str) -> bool {
    if url.contains('?') || UTM_PARAMETERS.iter().any(|param| url.contains(param)) {
        return false;
    }
    let Some(rest) = url.strip_prefix("https://") else {
        return false;
    };
    match rest.split_once('/') {
        Some((host, path)) => !host.is_empty() && !path.is_empty() && !path.contains('/'),
        None => false,
    }
}

/// Query parameters of `url` with percent-decoded values; `None` when there are none.
pub fn extract_get_params(url: &str) -> Option<BTreeMap<String, String>> {
    let (_, query) = url.split_once('?')?;
    let query = query.split('#').next().unwrap_or_default();

    let params = query
        .split('&')
        .filter_map(|pair| {
            let mut parts = pair.split('=');
            let key = parts.next().filter(|key| !key.is_empty())?;
            let value = parts.next().filter(|value| !value.is_empty())?;
            let decoded = urlencoding::decode(value)
                .map(|value| value.into_owned())
                .unwrap_or_else(|_| value.to_owned());
            Some((key.to_owned(), decoded))
        })
        .collect::<BTreeMap<_, _>>();

    (!params.is_empty()).then_some(params)
}

/// Resolves short links with bounded concurrency. The transport must not follow
/// redirects: the target is read from the `Location` header.
#[derive(Clone)]
pub struct ShortLinkResolver {
    http: Arc<dyn HttpClient>,
    max_concurrency: usize,
}

impl ShortLinkResolver {
    pub fn new(http: Arc<dyn HttpClient>, max_concurrency: usize) -> Self {
        Self {
            http,
            max_concurrency: max_concurrency.max(1),
        }
    }

    pub fn from_policy(http: Arc<dyn HttpClient>, policy: &ProviderPolicy) -> Self {
        Self::new(http, policy.max_concurrency)
    }

    /// Fills `parsed_url` (and `get_params` when the resolved URL has any) on the
    /// URL asset stored in `field` of every record. Applying it twice yields the
    /// same records.
    pub async fn process(&self, mut records: Vec<TypedRecord>, field: &str) -> Vec<TypedRecord> {
        let mut short_links = Vec::new();
        for record in &records {
            if let Some(url) = record.url_asset(field).and_then(|asset| asset.website_url) {
                if is_short_link(&url) && !short_links.contains(&url) {
                    short_links.push(url);
                }
            }
        }

        let resolved = self.resolve_all(short_links).await;

        for record in &mut records {
            let Some(mut asset) = record.url_asset(field) else {
                continue;
            };
            let Some(website_url) = asset.website_url.clone().filter(|url| !url.is_empty()) else {
                continue;
            };

            let parsed_url = resolved.get(&website_url).cloned().unwrap_or(website_url);
            asset.get_params = extract_get_params(&parsed_url).or(asset.get_params);
            asset.parsed_url = Some(parsed_url);
            record.set_url_asset(field, &asset);
        }

        records
    }

    /// Resolves each URL once, `max_concurrency` at a time; every batch settles
    /// before the next one starts.
    pub async fn resolve_all(&self, urls: Vec<String>) -> HashMap<String, String> {
        let mut resolved = HashMap::with_capacity(urls.len());

        for (batch_index, batch) in urls.chunks(self.max_concurrency).enumerate() {
            debug!(batch = batch_index + 1, size = batch.len(), "resolving short links");

            let mut tasks = JoinSet::new();
            for url in batch {
                let http = Arc::clone(&self.http);
                let url = url.clone();
                tasks.spawn(async move {
                    let target = resolve_one(http.as_ref(), &url).await;
                    (url, target)
                });
            }

            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok((url, target)) => {
                        resolved.insert(url, target);
                    }
                    Err(error) => warn!(error = %error, "short link task failed"),
                }
            }
        }

        resolved
    }
}

/// A failed lookup resolves to the original URL.
async fn resolve_one(http: &dyn HttpClient, url: &str) -> String {
    match http.execute(HttpRequest::get(url).with_timeout_ms(10_000)).await {
        Ok(response) => response
            .header("location")
            .filter(|location| !location.is_empty())
            .map_or_else(|| url.to_owned(), str::to_owned),
        Err(error) => {
            warn!(url, error = %error, "failed to resolve short link");
            url.to_owned()
        }
    }
}
