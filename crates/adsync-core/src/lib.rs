//! Source engine for adsync.
//!
//! This crate contains:
//! - Field dictionaries, typed records and date-window planning
//! - Connector configuration and provider identifiers
//! - The retrying, paginated fetch engine with provider error classification
//! - Facebook, TikTok and LinkedIn sources behind the [`Source`] contract

pub mod adapters;
pub mod caster;
pub mod classifier;
pub mod config;
pub mod data_source;
pub mod domain;
pub mod error;
pub mod fetcher;
pub mod http_client;
pub mod oauth;
pub mod provider_policy;
pub mod registry;
pub mod retry;
pub mod short_links;
pub mod source;
pub mod throttling;

pub use adapters::{
    FacebookSettings, FacebookSource, LinkedinSettings, LinkedinSource, TiktokSettings,
    TiktokSource,
};
pub use caster::RecordCaster;
pub use classifier::{ErrorClassifier, ErrorPayloadShape, FetchFailure, ProviderErrorPayload};
pub use config::{ConnectorConfig, FieldSelection, SourceSettings};
pub use data_source::{FetchRequest, Source, SourceError, SourceErrorKind};
pub use domain::{
    format_ymd, parse_ymd, plan_window, DateWindow, FieldDescriptor, FieldSchema, FieldValue,
    NodeSchema, SemanticType, TypedRecord, UrlAsset,
};
pub use error::ConfigError;
pub use fetcher::{PageCursor, PageReader, PaginatedFetcher, RawPage};
pub use http_client::{
    HttpAuth, HttpClient, HttpError, HttpMethod, HttpRequest, HttpResponse, ReqwestHttpClient,
};
pub use oauth::{AccessTokenSource, OAuthCredentials, OAuthTokenProvider};
pub use provider_policy::ProviderPolicy;
pub use registry::{build_source, SourceRegistry};
pub use retry::{Backoff, RetryConfig, RetryingHttpClient};
pub use short_links::ShortLinkResolver;
pub use source::ProviderId;
pub use throttling::RequestThrottle;
