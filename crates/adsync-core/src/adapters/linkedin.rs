//! LinkedIn Ads (versioned REST API) source.

use std::fmt::{Debug, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::adapters::{provider_fetcher, response_json, schema_fields};
use crate::classifier::{json_i64, ErrorClassifier, ErrorPayloadShape, ProviderErrorPayload};
use crate::data_source::{FetchRequest, Source, SourceError};
use crate::domain::{DateWindow, FieldSchema, NodeSchema, TypedRecord};
use crate::fetcher::{PageCursor, PageReader, PaginatedFetcher, RawPage};
use crate::http_client::{HttpAuth, HttpClient, HttpRequest, HttpResponse};
use crate::oauth::{AccessTokenSource, OAuthCredentials, OAuthTokenProvider};
use crate::provider_policy::ProviderPolicy;
use crate::ProviderId;

pub const REST_API_BASE: &str = "https://api.linkedin.com/rest";
pub const TOKEN_URL: &str = "https://www.linkedin.com/oauth/v2/accessToken";
pub const API_VERSION: &str = "202401";

const ACCOUNT_URN_PREFIX: &str = "urn:li:sponsoredAccount:";
const DEFAULT_PAGE_SIZE: u32 = 100;

pub fn classifier() -> ErrorClassifier {
    ErrorClassifier::new(Arc::new(RestErrorShape), [])
}

/// `{"status": 429, "serviceErrorCode": 65600, "message": "..."}`. Throttling
/// (HTTP 429 or the 656xx service codes) is transient.
#[derive(Debug, Default, Clone, Copy)]
pub struct RestErrorShape;

impl ErrorPayloadShape for RestErrorShape {
    fn extract(&self, status: u16, body: &str) -> Option<ProviderErrorPayload> {
        if (200..300).contains(&status) {
            return None;
        }

        let value = serde_json::from_str::<Value>(body).ok();
        let code = value
            .as_ref()
            .and_then(|value| json_i64(value.get("serviceErrorCode")));
        let throttled = status == 429 || code.is_some_and(|code| (65_600..65_700).contains(&code));
        if value.is_none() && !throttled {
            return None;
        }

        Some(ProviderErrorPayload {
            code,
            subcode: None,
            transient: Some(throttled),
            message: value
                .as_ref()
                .and_then(|value| value.get("message"))
                .and_then(Value::as_str)
                .map(str::to_owned),
        })
    }
}

#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkedinSettings {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default)]
    pub refresh_token: String,
    /// Used as-is when no refresh token is configured.
    #[serde(default)]
    pub access_token: Option<String>,
}

impl Debug for LinkedinSettings {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkedinSettings")
            .field("client_id", &self.client_id)
            .field("client_secret", &"***")
            .field("refresh_token", &"***")
            .field("access_token", &self.access_token.as_ref().map(|_| "***"))
            .finish()
    }
}

/// `elements` rows with `metadata.nextPageToken` continuation; bodies without
/// `elements` are a single object.
struct RestPages {
    base: HttpRequest,
    analytics_account: Option<String>,
}

impl RestPages {
    /// Adds `date`, `creative_id` and `account_id` columns to an analytics row.
    fn flatten_analytics(account_id: &str, mut row: Map<String, Value>) -> Map<String, Value> {
        let start = row
            .get("dateRange")
            .and_then(|range| range.get("start"))
            .and_then(|start| {
                let part = |name: &str| json_i64(start.get(name));
                Some(format!("{:04}-{:02}-{:02}", part("year")?, part("month")?, part("day")?))
            });
        if let Some(date) = start {
            row.insert(String::from("date"), Value::String(date));
        }

        let creative = row
            .get("pivotValues")
            .and_then(Value::as_array)
            .and_then(|values| values.first())
            .and_then(Value::as_str)
            .and_then(|urn| urn.rsplit(':').next())
            .map(str::to_owned);
        if let Some(creative) = creative {
            row.insert(String::from("creative_id"), Value::String(creative));
        }

        row.entry("account_id")
            .or_insert_with(|| Value::String(account_id.to_owned()));
        row
    }
}

impl PageReader for RestPages {
    fn read_page(&self, response: &HttpResponse) -> Result<RawPage, SourceError> {
        let mut body = match response_json(response)? {
            Value::Object(body) => body,
            other => {
                return Err(SourceError::fetch(format!(
                    "expected a JSON object, got {other}"
                )))
            }
        };

        let Some(elements) = body.remove("elements") else {
            return Ok(RawPage::singleton(body));
        };
        let Value::Array(elements) = elements else {
            return Err(SourceError::fetch("expected 'elements' to be an array"));
        };

        let mut rows = RawPage::objects(elements);
        if let Some(account_id) = &self.analytics_account {
            rows = rows
                .into_iter()
                .map(|row| Self::flatten_analytics(account_id, row))
                .collect();
        }

        let next = body
            .get("metadata")
            .and_then(|metadata| metadata.get("nextPageToken"))
            .and_then(Value::as_str)
            .filter(|token| !token.is_empty())
            .map(|token| PageCursor::Token(token.to_owned()));

        Ok(RawPage::new(rows, next))
    }

    fn next_request(&self, current: &HttpRequest, cursor: &PageCursor) -> HttpRequest {
        match cursor {
            PageCursor::Token(token) => self.base.clone().with_query("pageToken", token),
            PageCursor::Url(url) => HttpRequest {
                url: url.clone(),
                ..current.clone()
            },
            PageCursor::Page(_) => current.clone(),
        }
    }
}

pub struct LinkedinSource {
    schema: FieldSchema,
    fetcher: PaginatedFetcher,
    token: AccessTokenSource,
}

impl LinkedinSource {
    /// Uses the refresh-token flow when a refresh token is configured, otherwise the
    /// static access token.
    pub fn new(
        schema: FieldSchema,
        settings: LinkedinSettings,
        http: Arc<dyn HttpClient>,
        policy: &ProviderPolicy,
    ) -> Self {
        let token = if settings.refresh_token.is_empty() {
            AccessTokenSource::Static(settings.access_token.unwrap_or_default())
        } else {
            AccessTokenSource::OAuth(OAuthTokenProvider::new(
                TOKEN_URL,
                OAuthCredentials {
                    client_id: settings.client_id,
                    client_secret: settings.client_secret,
                    refresh_token: settings.refresh_token,
                },
                Arc::clone(&http),
            ))
        };

        Self {
            schema,
            fetcher: provider_fetcher(http, classifier(), policy),
            token,
        }
    }

    async fn fetch(&self, request: FetchRequest) -> Result<Vec<TypedRecord>, SourceError> {
        let node = request.node(&self.schema)?;
        let token = self
            .token
            .token()
            .await
            .map_err(|error| error.in_context(&request.node_name, &request.account_id))?;

        let pages = self.pages_for(node, &request, &token)?;
        self.fetcher
            .fetch_all(node, &request, pages.base.clone(), &pages)
            .await
    }

    fn pages_for(
        &self,
        node: &NodeSchema,
        request: &FetchRequest,
        token: &str,
    ) -> Result<RestPages, SourceError> {
        let account_id = account_id(&request.account_id);
        let page_size = node.page_limit.unwrap_or(DEFAULT_PAGE_SIZE);

        let (url, analytics_account) = match request.node_name.as_str() {
            "adAccounts" => (format!("{REST_API_BASE}/adAccounts/{account_id}"), None),
            "adCampaigns" => (
                format!("{REST_API_BASE}/adAccounts/{account_id}/adCampaigns?q=search&pageSize={page_size}"),
                None,
            ),
            "creatives" => (
                format!("{REST_API_BASE}/adAccounts/{account_id}/creatives?q=criteria&pageSize={page_size}"),
                None,
            ),
            "adAnalytics" => {
                let window = request.date_window.ok_or_else(|| {
                    SourceError::configuration("adAnalytics requires a date window")
                        .with_node(&request.node_name)
                        .with_account(&request.account_id)
                })?;
                let fields = analytics_fields(node, &request.selected_fields);
                (
                    format!(
                        "{REST_API_BASE}/adAnalytics?q=analytics&pivot=CREATIVE&timeGranularity=DAILY\
                         &dateRange={}&accounts=List(urn%3Ali%3AsponsoredAccount%3A{account_id})&fields={}",
                        restli_date_range(&window),
                        fields.join(",")
                    ),
                    Some(account_id.clone()),
                )
            }
            other => {
                return Err(SourceError::configuration(format!(
                    "linkedin node '{other}' has no endpoint"
                ))
                .with_node(other)
                .with_account(&request.account_id))
            }
        };

        let base = HttpRequest::get(url)
            .with_auth(&HttpAuth::BearerToken(token.to_owned()))
            .with_header("LinkedIn-Version", API_VERSION)
            .with_header("X-Restli-Protocol-Version", "2.0.0");

        Ok(RestPages {
            base,
            analytics_account,
        })
    }
}

fn account_id(raw: &str) -> String {
    let raw = raw.trim();
    raw.strip_prefix(ACCOUNT_URN_PREFIX).unwrap_or(raw).to_owned()
}

/// Metric fields to request; the derived columns are computed locally and the
/// pivot and date range are always requested.
fn analytics_fields(node: &NodeSchema, selected: &[String]) -> Vec<String> {
    let mut fields = schema_fields(node, selected)
        .into_iter()
        .filter(|field| !matches!(field.as_str(), "date" | "creative_id" | "account_id"))
        .collect::<Vec<_>>();
    for required in ["dateRange", "pivotValues"] {
        if !fields.iter().any(|field| field == required) {
            fields.push(required.to_owned());
        }
    }
    fields
}

fn restli_date_range(window: &DateWindow) -> String {
    format!(
        "(start:(year:{},month:{},day:{}),end:(year:{},month:{},day:{}))",
        window.start.year(),
        u8::from(window.start.month()),
        window.start.day(),
        window.end.year(),
        u8::from(window.end.month()),
        window.end.day()
    )
}

impl Source for LinkedinSource {
    fn id(&self) -> ProviderId {
        ProviderId::Linkedin
    }

    fn field_schema(&self) -> &FieldSchema {
        &self.schema
    }

    fn fetch_data<'a>(
        &'a self,
        request: FetchRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<TypedRecord>, SourceError>> + Send + 'a>> {
        Box::pin(self.fetch(request))
    }
}
