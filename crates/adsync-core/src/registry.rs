use std::collections::HashMap;
use std::sync::Arc;

use crate::adapters::{FacebookSource, LinkedinSource, TiktokSource};
use crate::config::{ConnectorConfig, SourceSettings};
use crate::data_source::{Source, SourceError};
use crate::domain::FieldSchema;
use crate::http_client::{HttpClient, ReqwestHttpClient};
use crate::provider_policy::ProviderPolicy;
use crate::short_links::ShortLinkResolver;
use crate::ProviderId;

/// Configured sources keyed by provider.
#[derive(Default)]
pub struct SourceRegistry {
    sources: HashMap<ProviderId, Arc<dyn Source>>,
}

impl SourceRegistry {
    pub fn new(sources: Vec<Arc<dyn Source>>) -> Self {
        let sources = sources
            .into_iter()
            .map(|source| (source.id(), source))
            .collect();
        Self { sources }
    }

    /// Registry holding the single source described by `config`.
    pub fn from_config(config: &ConnectorConfig, schema: FieldSchema, http: Arc<dyn HttpClient>) -> Self {
        let links: Arc<dyn HttpClient> = Arc::new(ReqwestHttpClient::without_redirects());
        Self::new(vec![build_source(config, schema, http, links)])
    }

    pub fn register(&mut self, source: Arc<dyn Source>) {
        self.sources.insert(source.id(), source);
    }

    pub fn get(&self, provider: ProviderId) -> Result<Arc<dyn Source>, SourceError> {
        self.sources
            .get(&provider)
            .cloned()
            .ok_or_else(|| SourceError::configuration(format!("no source registered for provider '{provider}'")))
    }

    pub fn providers(&self) -> Vec<ProviderId> {
        let mut providers = self.sources.keys().copied().collect::<Vec<_>>();
        providers.sort();
        providers
    }
}

/// Builds the provider source for `config`.
///
/// `links` is the non-redirecting client used to resolve short links; it is only
/// consulted when `processShortLinks` is enabled on a Facebook connector.
pub fn build_source(
    config: &ConnectorConfig,
    schema: FieldSchema,
    http: Arc<dyn HttpClient>,
    links: Arc<dyn HttpClient>,
) -> Arc<dyn Source> {
    let policy = ProviderPolicy::for_connector(config);

    match &config.source {
        SourceSettings::Facebook(settings) => {
            let source = FacebookSource::new(schema, settings.clone(), http, &policy);
            if config.process_short_links {
                Arc::new(source.with_short_links(ShortLinkResolver::from_policy(links, &policy)))
            } else {
                Arc::new(source)
            }
        }
        SourceSettings::Tiktok(settings) => {
            Arc::new(TiktokSource::new(schema, settings.clone(), http, &policy))
        }
        SourceSettings::Linkedin(settings) => {
            Arc::new(LinkedinSource::new(schema, settings.clone(), http, &policy))
        }
    }
}
