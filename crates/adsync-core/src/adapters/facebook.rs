//! Facebook Marketing (Graph API) source.

use std::fmt::{Debug, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};
use time::Date;
use tracing::info;

use crate::adapters::{provider_fetcher, response_json, schema_fields};
use crate::classifier::{json_i64, ErrorClassifier, ErrorPayloadShape, ProviderErrorPayload};
use crate::data_source::{FetchRequest, Source, SourceError};
use crate::domain::{format_ymd, FieldSchema, NodeSchema, TypedRecord};
use crate::fetcher::{PageCursor, PageReader, PaginatedFetcher, RawPage};
use crate::http_client::{HttpClient, HttpRequest, HttpResponse};
use crate::provider_policy::ProviderPolicy;
use crate::short_links::ShortLinkResolver;
use crate::ProviderId;

pub const GRAPH_API_BASE: &str = "https://graph.facebook.com/v23.0";

const DEFAULT_PAGE_LIMIT: u32 = 500;
const LINK_URL_ASSET_NODE: &str = "ad-account/insights-by-link-url-asset";
const LINK_URL_ASSET_FIELD: &str = "link_url_asset";

/// Graph API error codes worth retrying: throttling, temporary outages and the
/// ads-management rate limits.
pub fn retryable_codes() -> Vec<i64> {
    let mut codes = vec![1, 2, 4, 17, 32, 341, 613, 80014, 2_446_079];
    codes.extend(80_000..=80_009);
    codes
}

pub fn classifier() -> ErrorClassifier {
    ErrorClassifier::new(Arc::new(GraphErrorShape), retryable_codes())
}

/// `{"error": {"code", "error_subcode", "is_transient", "message"}}`
#[derive(Debug, Default, Clone, Copy)]
pub struct GraphErrorShape;

impl ErrorPayloadShape for GraphErrorShape {
    fn extract(&self, _status: u16, body: &str) -> Option<ProviderErrorPayload> {
        let value: Value = serde_json::from_str(body).ok()?;
        let error = value.get("error")?;
        Some(ProviderErrorPayload {
            code: json_i64(error.get("code")),
            subcode: json_i64(error.get("error_subcode")),
            transient: error.get("is_transient").and_then(Value::as_bool),
            message: error.get("message").and_then(Value::as_str).map(str::to_owned),
        })
    }
}

#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FacebookSettings {
    #[serde(default)]
    pub access_token: String,
}

impl Debug for FacebookSettings {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FacebookSettings")
            .field("access_token", &"***")
            .finish()
    }
}

/// Insights node variants and the breakdown they request.
fn breakdowns(node_name: &str) -> Option<&'static [&'static str]> {
    const PLAIN: &[&str] = &[];
    const BY_COUNTRY: &[&str] = &["country"];
    const BY_LINK_URL_ASSET: &[&str] = &[LINK_URL_ASSET_FIELD];

    match node_name {
        "ad-account/insights" => Some(PLAIN),
        "ad-account/insights-by-country" => Some(BY_COUNTRY),
        LINK_URL_ASSET_NODE => Some(BY_LINK_URL_ASSET),
        _ => None,
    }
}

/// Follows `paging.next` URLs; bodies without `data` are a single object.
struct GraphPages;

impl PageReader for GraphPages {
    fn read_page(&self, response: &HttpResponse) -> Result<RawPage, SourceError> {
        match response_json(response)? {
            Value::Object(mut body) => match body.remove("data") {
                Some(Value::Array(rows)) => {
                    let next = body
                        .get("paging")
                        .and_then(|paging| paging.get("next"))
                        .and_then(Value::as_str)
                        .filter(|url| !url.is_empty())
                        .map(|url| PageCursor::Url(url.to_owned()));
                    Ok(RawPage::new(RawPage::objects(rows), next))
                }
                Some(other) => Err(SourceError::fetch(format!(
                    "expected 'data' to be an array, got {other}"
                ))),
                None => Ok(RawPage::singleton(body)),
            },
            other => Err(SourceError::fetch(format!(
                "expected a JSON object, got {other}"
            ))),
        }
    }

    fn next_request(&self, current: &HttpRequest, cursor: &PageCursor) -> HttpRequest {
        match cursor {
            PageCursor::Url(url) => HttpRequest {
                url: url.clone(),
                ..current.clone()
            },
            PageCursor::Token(token) => current.clone().with_query("after", token),
            PageCursor::Page(_) => current.clone(),
        }
    }
}

pub struct FacebookSource {
    schema: FieldSchema,
    fetcher: PaginatedFetcher,
    access_token: String,
    short_links: Option<ShortLinkResolver>,
}

impl FacebookSource {
    pub fn new(
        schema: FieldSchema,
        settings: FacebookSettings,
        http: Arc<dyn HttpClient>,
        policy: &ProviderPolicy,
    ) -> Self {
        Self {
            schema,
            fetcher: provider_fetcher(http, classifier(), policy),
            access_token: settings.access_token,
            short_links: None,
        }
    }

    /// Enables short-link resolution on `link_url_asset` insight rows.
    pub fn with_short_links(mut self, resolver: ShortLinkResolver) -> Self {
        self.short_links = Some(resolver);
        self
    }

    async fn fetch(&self, request: FetchRequest) -> Result<Vec<TypedRecord>, SourceError> {
        let node = request.node(&self.schema)?;
        if self.access_token.is_empty() {
            return Err(SourceError::authentication("facebook access token is not configured")
                .with_node(&request.node_name)
                .with_account(&request.account_id));
        }

        if let Some(breakdowns) = breakdowns(&request.node_name) {
            return self.fetch_insights(node, &request, breakdowns).await;
        }

        let url = self.catalog_url(node, &request)?;
        let initial = HttpRequest::get(url).with_query("access_token", &self.access_token);
        self.fetcher.fetch_all(node, &request, initial, &GraphPages).await
    }

    fn catalog_url(&self, node: &NodeSchema, request: &FetchRequest) -> Result<String, SourceError> {
        let account = account_path(&request.account_id);
        let fields = urlencoding::encode(&schema_fields(node, &request.selected_fields).join(",")).into_owned();
        let limit = node.page_limit.unwrap_or(DEFAULT_PAGE_LIMIT);

        let url = match request.node_name.as_str() {
            "ad-account" => format!("{GRAPH_API_BASE}/{account}?fields={fields}"),
            "ad-account-user" => format!("{GRAPH_API_BASE}/{account}/?fields={fields}"),
            "ad-account/ads" | "ad-group" => {
                format!("{GRAPH_API_BASE}/{account}/ads?fields={fields}&limit={limit}")
            }
            "ad-account/adcreatives" => {
                format!("{GRAPH_API_BASE}/{account}/adcreatives?fields={fields}&limit={limit}")
            }
            other => {
                return Err(SourceError::configuration(format!(
                    "facebook node '{other}' has no endpoint"
                ))
                .with_node(other)
                .with_account(&request.account_id))
            }
        };
        Ok(url)
    }

    /// One request chain per day of the window, in day order.
    async fn fetch_insights(
        &self,
        node: &NodeSchema,
        request: &FetchRequest,
        breakdowns: &[&str],
    ) -> Result<Vec<TypedRecord>, SourceError> {
        let window = request.date_window.ok_or_else(|| {
            SourceError::configuration("insights nodes require a date window")
                .with_node(&request.node_name)
                .with_account(&request.account_id)
        })?;

        let fields = schema_fields(node, &request.selected_fields)
            .into_iter()
            .filter(|field| !breakdowns.contains(&field.as_str()))
            .collect::<Vec<_>>()
            .join(",");

        let mut records = Vec::new();
        for day in window.days() {
            let initial = self
                .insights_request(node, request, day, &fields, breakdowns)
                .with_query("access_token", &self.access_token);
            let rows = self.fetcher.fetch_all(node, request, initial, &GraphPages).await?;
            info!(
                node = %request.node_name,
                account = %request.account_id,
                day = %format_ymd(day),
                rows = rows.len(),
                "fetched insights day"
            );
            records.extend(rows);
        }

        match &self.short_links {
            Some(resolver)
                if request.node_name == LINK_URL_ASSET_NODE
                    && records.iter().any(|record| record.contains(LINK_URL_ASSET_FIELD)) =>
            {
                Ok(resolver.process(records, LINK_URL_ASSET_FIELD).await)
            }
            _ => Ok(records),
        }
    }

    fn insights_request(
        &self,
        node: &NodeSchema,
        request: &FetchRequest,
        day: Date,
        fields: &str,
        breakdowns: &[&str],
    ) -> HttpRequest {
        let day = format_ymd(day);
        let time_range = json!({ "since": day, "until": day }).to_string();
        let limit = node.page_limit.unwrap_or(DEFAULT_PAGE_LIMIT).to_string();

        let mut http_request = HttpRequest::get(format!(
            "{GRAPH_API_BASE}/{}/insights?level=ad&period=day",
            account_path(&request.account_id)
        ))
        .with_query("time_range", &time_range)
        .with_query("fields", fields)
        .with_query("limit", &limit);

        if !breakdowns.is_empty() {
            http_request = http_request.with_query("breakdowns", &breakdowns.join(","));
        }
        http_request
    }
}

fn account_path(account_id: &str) -> String {
    let account_id = account_id.trim();
    let account_id = account_id.strip_prefix("act_").unwrap_or(account_id);
    format!("act_{account_id}")
}

impl Source for FacebookSource {
    fn id(&self) -> ProviderId {
        ProviderId::Facebook
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_source::SourceErrorKind;
    use crate::domain::{DateWindow, FieldDescriptor, FieldValue, SemanticType};
    use crate::http_client::HttpError;
    use crate::retry::RetryConfig;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;
    use time::Month;

    struct RecordingHttpClient {
        responses: Mutex<VecDeque<HttpResponse>>,
        requests: Mutex<Vec<HttpRequest>>,
    }

    impl RecordingHttpClient {
        fn new(responses: Vec<HttpResponse>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn urls(&self) -> Vec<String> {
            self.requests
                .lock()
                .expect("request log should not be poisoned")
                .iter()
                .map(|request| request.url.clone())
                .collect()
        }
    }

    impl HttpClient for RecordingHttpClient {
        fn execute<'a>(
            &'a self,
            request: HttpRequest,
        ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>> {
            let redirect = request.url.starts_with("https://sho.rt/");
            self.requests
                .lock()
                .expect("request log should not be poisoned")
                .push(request);
            let response = if redirect {
                HttpResponse::new(302, "").with_header("location", "https://shop.test/p?utm_source=fb")
            } else {
                self.responses
                    .lock()
                    .expect("script should not be poisoned")
                    .pop_front()
                    .unwrap_or_else(|| HttpResponse::ok_json(r#"{"data":[]}"#))
            };
            Box::pin(async move { Ok(response) })
        }
    }

    fn schema() -> FieldSchema {
        FieldSchema::new([
            NodeSchema::new(
                "ad-account/insights",
                [
                    FieldDescriptor::new("ad_id", SemanticType::String),
                    FieldDescriptor::new("date_start", SemanticType::Date),
                    FieldDescriptor::new("spend", SemanticType::Number),
                ],
                ["ad_id", "date_start"],
            )
            .time_series()
            .with_page_limit(100),
            NodeSchema::new(
                LINK_URL_ASSET_NODE,
                [
                    FieldDescriptor::new("ad_id", SemanticType::String),
                    FieldDescriptor::new("date_start", SemanticType::Date),
                    FieldDescriptor::new(LINK_URL_ASSET_FIELD, SemanticType::Object),
                ],
                ["ad_id", "date_start"],
            )
            .time_series(),
            NodeSchema::new(
                "ad-account",
                [
                    FieldDescriptor::new("id", SemanticType::String),
                    FieldDescriptor::new("name", SemanticType::String),
                    FieldDescriptor::new("business{id,name}", SemanticType::Object),
                ],
                ["id"],
            ),
        ])
    }

    fn policy() -> ProviderPolicy {
        ProviderPolicy {
            retry: RetryConfig::fixed(Duration::ZERO, 3),
            quota_limit: 1_000,
            ..ProviderPolicy::facebook_default()
        }
    }

    fn source(client: Arc<RecordingHttpClient>) -> FacebookSource {
        FacebookSource::new(
            schema(),
            FacebookSettings {
                access_token: String::from("fb-token"),
            },
            client,
            &policy(),
        )
    }

    fn window(start: u8, end: u8) -> DateWindow {
        let day = |d| Date::from_calendar_date(2024, Month::March, d).expect("valid date");
        DateWindow::new(day(start), day(end)).expect("ordered window")
    }

    #[test]
    fn retryable_code_set_covers_rate_limits() {
        let codes = retryable_codes();
        for code in [1, 2, 4, 17, 32, 341, 613, 80_000, 80_004, 80_009, 80_014, 2_446_079] {
            assert!(codes.contains(&code), "code {code}");
        }
        assert!(!codes.contains(&190));
        assert!(!codes.contains(&80_010));
    }

    #[tokio::test]
    async fn insights_fetch_one_day_per_request_chain() {
        let client = RecordingHttpClient::new(vec![
            HttpResponse::ok_json(
                json!({"data": [{"ad_id": "1", "date_start": "2024-03-01", "spend": "1.5"}],
                       "paging": {"next": "https://graph.facebook.com/v23.0/next-page?access_token=fb-token"}})
                .to_string(),
            ),
            HttpResponse::ok_json(
                json!({"data": [{"ad_id": "2", "date_start": "2024-03-01", "spend": "2"}]}).to_string(),
            ),
            HttpResponse::ok_json(
                json!({"data": [{"ad_id": "1", "date_start": "2024-03-02", "spend": "3"}]}).to_string(),
            ),
        ]);

        let records = source(client.clone())
            .fetch_data(
                FetchRequest::new("ad-account/insights", "act_42")
                    .with_fields(["ad_id", "date_start", "spend"])
                    .with_window(window(1, 2)),
            )
            .await
            .expect("insights should load");

        assert_eq!(records.len(), 3);
        assert_eq!(records[1].get("spend"), Some(&FieldValue::Number(2.0)));

        let urls = client.urls();
        assert_eq!(urls.len(), 3);
        assert!(urls[0].starts_with("https://graph.facebook.com/v23.0/act_42/insights?level=ad&period=day"));
        assert!(urls[0].contains("time_range=%7B%22since%22%3A%222024-03-01%22%2C%22until%22%3A%222024-03-01%22%7D"));
        assert!(urls[0].contains("fields=ad_id%2Cdate_start%2Cspend"));
        assert!(urls[0].contains("limit=100"));
        assert!(urls[0].ends_with("access_token=fb-token"));
        assert_eq!(urls[1], "https://graph.facebook.com/v23.0/next-page?access_token=fb-token");
        assert!(urls[2].contains("2024-03-02"));
    }

    #[tokio::test]
    async fn breakdown_fields_move_out_of_fields_parameter() {
        let client = RecordingHttpClient::new(vec![HttpResponse::ok_json(
            json!({"data": [{
                "ad_id": "1",
                "date_start": "2024-03-01",
                "link_url_asset": {"website_url": "https://sho.rt/x1", "id": "5"}
            }]})
            .to_string(),
        )]);

        let records = source(client.clone())
            .with_short_links(ShortLinkResolver::new(client.clone(), 4))
            .fetch_data(
                FetchRequest::new(LINK_URL_ASSET_NODE, "42")
                    .with_fields(["ad_id", "date_start", LINK_URL_ASSET_FIELD])
                    .with_window(window(1, 1)),
            )
            .await
            .expect("insights should load");

        let urls = client.urls();
        assert!(urls[0].contains("fields=ad_id%2Cdate_start&"));
        assert!(urls[0].contains("breakdowns=link_url_asset"));
        assert_eq!(urls[1], "https://sho.rt/x1");

        let asset = records[0].url_asset(LINK_URL_ASSET_FIELD).expect("asset");
        assert_eq!(asset.parsed_url.as_deref(), Some("https://shop.test/p?utm_source=fb"));
        assert_eq!(
            asset.get_params.and_then(|params| params.get("utm_source").cloned()),
            Some(String::from("fb"))
        );
    }

    #[tokio::test]
    async fn singleton_node_returns_one_record() {
        let client = RecordingHttpClient::new(vec![HttpResponse::ok_json(
            json!({"id": "act_42", "name": "Main account"}).to_string(),
        )]);

        let records = source(client.clone())
            .fetch_data(FetchRequest::new("ad-account", "42").with_fields(["id", "name"]))
            .await
            .expect("account should load");

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get("name").and_then(FieldValue::as_str), Some("Main account"));
        assert_eq!(
            client.urls()[0],
            "https://graph.facebook.com/v23.0/act_42?fields=id%2Cname&access_token=fb-token"
        );
    }

    #[tokio::test]
    async fn catalog_field_list_is_url_encoded() {
        let client = RecordingHttpClient::new(vec![HttpResponse::ok_json(json!({"id": "act_42"}).to_string())]);

        source(client.clone())
            .fetch_data(FetchRequest::new("ad-account", "42").with_fields(["id", "business{id,name}"]))
            .await
            .expect("account should load");

        assert_eq!(
            client.urls()[0],
            "https://graph.facebook.com/v23.0/act_42?fields=id%2Cbusiness%7Bid%2Cname%7D&access_token=fb-token"
        );
    }

    #[tokio::test]
    async fn throttling_code_is_retried_then_succeeds() {
        let client = RecordingHttpClient::new(vec![
            HttpResponse::new(400, r#"{"error":{"code":17,"message":"User request limit reached"}}"#),
            HttpResponse::ok_json(json!({"id": "act_42", "name": "A"}).to_string()),
        ]);

        let records = source(client.clone())
            .fetch_data(FetchRequest::new("ad-account", "42").with_fields(["id", "name"]))
            .await
            .expect("second attempt should succeed");

        assert_eq!(records.len(), 1);
        assert_eq!(client.urls().len(), 2);
    }

    #[tokio::test]
    async fn invalid_token_is_fatal_with_context() {
        let client = RecordingHttpClient::new(vec![HttpResponse::new(
            400,
            r#"{"error":{"code":190,"message":"Invalid OAuth access token"}}"#,
        )]);

        let error = source(client.clone())
            .fetch_data(FetchRequest::new("ad-account", "42"))
            .await
            .expect_err("code 190 is fatal");

        assert_eq!(error.kind(), SourceErrorKind::Fetch);
        assert_eq!(error.provider_code(), Some(190));
        assert_eq!(error.status(), Some(400));
        assert_eq!(error.node(), Some("ad-account"));
        assert_eq!(error.account_id(), Some("42"));
        assert_eq!(client.urls().len(), 1);
    }

    #[tokio::test]
    async fn unknown_node_and_missing_window_are_configuration_errors() {
        let source = source(RecordingHttpClient::new(Vec::new()));

        let unknown = source
            .fetch_data(FetchRequest::new("ad-account/pixels", "42"))
            .await
            .expect_err("unknown node");
        assert_eq!(unknown.kind(), SourceErrorKind::Configuration);

        let windowless = source
            .fetch_data(FetchRequest::new("ad-account/insights", "42"))
            .await
            .expect_err("insights need a window");
        assert_eq!(windowless.kind(), SourceErrorKind::Configuration);
    }
}
