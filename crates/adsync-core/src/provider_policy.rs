use std::time::Duration;

use crate::config::ConnectorConfig;
use crate::retry::{Backoff, RetryConfig};
use crate::ProviderId;

/// Request pacing and retry defaults for one provider.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderPolicy {
    pub provider_id: ProviderId,
    pub max_concurrency: usize,
    pub quota_window: Duration,
    pub quota_limit: u32,
    pub retry: RetryConfig,
}

impl ProviderPolicy {
    pub fn facebook_default() -> Self {
        Self {
            provider_id: ProviderId::Facebook,
            max_concurrency: 10,
            quota_window: Duration::from_secs(60),
            quota_limit: 200,
            retry: RetryConfig {
                enabled: true,
                max_retries: 5,
                backoff: Backoff::Exponential {
                    base: Duration::from_secs(2),
                    factor: 2.0,
                    max: Duration::from_secs(120),
                    jitter: true,
                },
            },
        }
    }

    pub fn tiktok_default() -> Self {
        Self {
            provider_id: ProviderId::Tiktok,
            max_concurrency: 5,
            quota_window: Duration::from_secs(1),
            quota_limit: 10,
            retry: RetryConfig::exponential(5),
        }
    }

    pub fn linkedin_default() -> Self {
        Self {
            provider_id: ProviderId::Linkedin,
            max_concurrency: 5,
            quota_window: Duration::from_secs(60),
            quota_limit: 100,
            retry: RetryConfig::exponential(4),
        }
    }

    pub fn default_for(provider_id: ProviderId) -> Self {
        match provider_id {
            ProviderId::Facebook => Self::facebook_default(),
            ProviderId::Tiktok => Self::tiktok_default(),
            ProviderId::Linkedin => Self::linkedin_default(),
        }
    }

    /// The provider default with the connector's overrides applied.
    pub fn for_connector(config: &ConnectorConfig) -> Self {
        let mut policy = Self::default_for(config.provider_id());
        if let Some(max_concurrency) = config.max_concurrency {
            policy.max_concurrency = max_concurrency;
        }
        policy
    }
}
