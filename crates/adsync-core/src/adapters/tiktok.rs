//! TikTok Ads (Business API) source.

use std::fmt::{Debug, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::adapters::{provider_fetcher, response_json, schema_fields};
use crate::classifier::{json_i64, ErrorClassifier, ErrorPayloadShape, ProviderErrorPayload};
use crate::data_source::{FetchRequest, Source, SourceError};
use crate::domain::{format_ymd, FieldSchema, NodeSchema, TypedRecord};
use crate::fetcher::{PageCursor, PageReader, PaginatedFetcher, RawPage};
use crate::http_client::{HttpAuth, HttpClient, HttpRequest, HttpResponse};
use crate::provider_policy::ProviderPolicy;
use crate::ProviderId;

pub const BUSINESS_API_BASE: &str = "https://business-api.tiktok.com/open_api/v1.3";

/// 40100 is the rate limit; 50000 and 50002 are transient server faults.
pub const RETRYABLE_CODES: [i64; 3] = [40_100, 50_000, 50_002];

const DEFAULT_PAGE_SIZE: u32 = 1_000;
const DATA_LEVELS: [&str; 4] = [
    "AUCTION_ADVERTISER",
    "AUCTION_CAMPAIGN",
    "AUCTION_ADGROUP",
    "AUCTION_AD",
];

pub fn classifier() -> ErrorClassifier {
    ErrorClassifier::new(Arc::new(BusinessApiShape), RETRYABLE_CODES)
}

/// `{"code": 0, "message": "OK", "data": {...}}`; any non-zero code is an error,
/// even on HTTP 200.
#[derive(Debug, Default, Clone, Copy)]
pub struct BusinessApiShape;

impl ErrorPayloadShape for BusinessApiShape {
    fn extract(&self, _status: u16, body: &str) -> Option<ProviderErrorPayload> {
        let value: Value = serde_json::from_str(body).ok()?;
        let code = json_i64(value.get("code"))?;
        (code != 0).then(|| ProviderErrorPayload {
            code: Some(code),
            subcode: None,
            transient: None,
            message: value.get("message").and_then(Value::as_str).map(str::to_owned),
        })
    }
}

#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TiktokSettings {
    #[serde(default)]
    pub access_token: String,
    /// Adds the "all statuses" filter to catalog nodes.
    #[serde(default)]
    pub include_deleted: bool,
    #[serde(default = "default_data_level")]
    pub data_level: String,
}

fn default_data_level() -> String {
    String::from("AUCTION_AD")
}

impl Default for TiktokSettings {
    fn default() -> Self {
        Self {
            access_token: String::new(),
            include_deleted: false,
            data_level: default_data_level(),
        }
    }
}

impl Debug for TiktokSettings {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TiktokSettings")
            .field("access_token", &"***")
            .field("include_deleted", &self.include_deleted)
            .field("data_level", &self.data_level)
            .finish()
    }
}

fn dimensions_for(data_level: &str) -> Vec<&'static str> {
    match data_level {
        "AUCTION_ADVERTISER" => vec!["stat_time_day"],
        "AUCTION_CAMPAIGN" => vec!["campaign_id", "stat_time_day"],
        "AUCTION_ADGROUP" => vec!["adgroup_id", "stat_time_day"],
        _ => vec!["ad_id", "stat_time_day"],
    }
}

fn status_filter(node_name: &str) -> Option<&'static str> {
    match node_name {
        "campaigns" => Some(r#"{"secondary_status":"CAMPAIGN_STATUS_ALL"}"#),
        "ad_groups" => Some(r#"{"secondary_status":"ADGROUP_STATUS_ALL"}"#),
        "ads" => Some(r#"{"secondary_status":"AD_STATUS_ALL"}"#),
        _ => None,
    }
}

/// `data.list` rows with `data.page_info.{page,total_page}` page numbers.
struct BusinessApiPages {
    base: HttpRequest,
    flatten_report_rows: bool,
    advertiser_id: String,
}

impl BusinessApiPages {
    fn first_request(&self) -> HttpRequest {
        self.base.clone().with_query("page", "1")
    }

    /// Merges `dimensions` and `metrics` into the row and fills the advertiser.
    fn flatten(&self, mut row: Map<String, Value>) -> Map<String, Value> {
        for nested in ["dimensions", "metrics"] {
            if let Some(Value::Object(values)) = row.remove(nested) {
                row.extend(values);
            }
        }
        let has_advertiser = row
            .get("advertiser_id")
            .is_some_and(|value| !value.is_null() && value.as_str() != Some(""));
        if !has_advertiser {
            row.insert(
                String::from("advertiser_id"),
                Value::String(self.advertiser_id.clone()),
            );
        }
        row
    }
}

impl PageReader for BusinessApiPages {
    fn read_page(&self, response: &HttpResponse) -> Result<RawPage, SourceError> {
        let body = response_json(response)?;
        let data = body.get("data").cloned().unwrap_or(Value::Null);

        let rows = match data.get("list") {
            Some(Value::Array(rows)) => RawPage::objects(rows.clone()),
            Some(Value::Null) | None => Vec::new(),
            Some(other) => {
                return Err(SourceError::fetch(format!(
                    "expected 'data.list' to be an array, got {other}"
                )))
            }
        };
        let rows = if self.flatten_report_rows {
            rows.into_iter().map(|row| self.flatten(row)).collect()
        } else {
            rows
        };

        let page_info = data.get("page_info");
        let page = json_i64(page_info.and_then(|info| info.get("page"))).unwrap_or(1);
        let total_pages = json_i64(page_info.and_then(|info| info.get("total_page"))).unwrap_or(1);
        let next = (page < total_pages)
            .then(|| u32::try_from(page + 1).ok())
            .flatten()
            .map(PageCursor::Page);

        Ok(RawPage::new(rows, next))
    }

    fn next_request(&self, current: &HttpRequest, cursor: &PageCursor) -> HttpRequest {
        match cursor {
            PageCursor::Page(page) => self.base.clone().with_query("page", &page.to_string()),
            PageCursor::Url(url) => HttpRequest {
                url: url.clone(),
                ..current.clone()
            },
            PageCursor::Token(_) => current.clone(),
        }
    }
}

pub struct TiktokSource {
    schema: FieldSchema,
    fetcher: PaginatedFetcher,
    settings: TiktokSettings,
}

impl TiktokSource {
    pub fn new(
        schema: FieldSchema,
        settings: TiktokSettings,
        http: Arc<dyn HttpClient>,
        policy: &ProviderPolicy,
    ) -> Self {
        Self {
            schema,
            fetcher: provider_fetcher(http, classifier(), policy),
            settings,
        }
    }

    async fn fetch(&self, request: FetchRequest) -> Result<Vec<TypedRecord>, SourceError> {
        let node = request.node(&self.schema)?;

        if !request.selected_fields.is_empty() {
            let missing = node.missing_unique_keys(&request.selected_fields);
            if !missing.is_empty() {
                return Err(SourceError::configuration(format!(
                    "missing required unique fields: {}",
                    missing.join(", ")
                ))
                .with_node(&request.node_name)
                .with_account(&request.account_id));
            }
        }
        if self.settings.access_token.is_empty() {
            return Err(SourceError::authentication("tiktok access token is not configured")
                .with_node(&request.node_name)
                .with_account(&request.account_id));
        }

        let pages = self.pages_for(node, &request)?;
        self.fetcher
            .fetch_all(node, &request, pages.first_request(), &pages)
            .await
    }

    fn pages_for(&self, node: &NodeSchema, request: &FetchRequest) -> Result<BusinessApiPages, SourceError> {
        let fields = schema_fields(node, &request.selected_fields);
        let advertiser_id = request.account_id.trim().to_owned();
        let page_size = node.page_limit.unwrap_or(DEFAULT_PAGE_SIZE).to_string();

        let auth = HttpAuth::Header {
            name: String::from("Access-Token"),
            value: self.settings.access_token.clone(),
        };

        let (path, flatten_report_rows) = match request.node_name.as_str() {
            "advertiser" => ("advertiser/info/", false),
            "campaigns" => ("campaign/get/", false),
            "ad_groups" => ("adgroup/get/", false),
            "ads" => ("ad/get/", false),
            "ad_insights" => ("report/integrated/get/", true),
            other => {
                return Err(SourceError::configuration(format!(
                    "tiktok node '{other}' has no endpoint"
                ))
                .with_node(other)
                .with_account(&request.account_id))
            }
        };

        let mut base = HttpRequest::get(format!("{BUSINESS_API_BASE}/{path}")).with_auth(&auth);

        base = match request.node_name.as_str() {
            "advertiser" => base
                .with_query("advertiser_ids", &json_list([advertiser_id.as_str()]))
                .with_query("fields", &json_list(fields.iter().map(String::as_str))),
            "ad_insights" => {
                let window = request.date_window.ok_or_else(|| {
                    SourceError::configuration("ad_insights requires a date window")
                        .with_node(&request.node_name)
                        .with_account(&request.account_id)
                })?;
                let data_level = if DATA_LEVELS.contains(&self.settings.data_level.as_str()) {
                    self.settings.data_level.as_str()
                } else {
                    "AUCTION_AD"
                };
                let dimensions = dimensions_for(data_level);
                let metrics = fields
                    .iter()
                    .map(String::as_str)
                    .filter(|field| {
                        !dimensions.iter().any(|dimension| dimension == field)
                            && !matches!(
                                *field,
                                "advertiser_id" | "stat_time_day" | "date_start" | "date_end"
                            )
                    })
                    .collect::<Vec<_>>();

                base.with_query("advertiser_id", &advertiser_id)
                    .with_query("report_type", "BASIC")
                    .with_query("data_level", data_level)
                    .with_query("dimensions", &json_list(dimensions))
                    .with_query("metrics", &json_list(metrics))
                    .with_query("start_date", &format_ymd(window.start))
                    .with_query("end_date", &format_ymd(window.end))
                    .with_query("page_size", &page_size)
            }
            _ => {
                let mut catalog = base
                    .with_query("advertiser_id", &advertiser_id)
                    .with_query("fields", &json_list(fields.iter().map(String::as_str)))
                    .with_query("page_size", &page_size);
                if self.settings.include_deleted {
                    if let Some(filter) = status_filter(&request.node_name) {
                        catalog = catalog.with_query("filtering", filter);
                    }
                }
                catalog
            }
        };

        Ok(BusinessApiPages {
            base,
            flatten_report_rows,
            advertiser_id,
        })
    }
}

fn json_list<'a>(items: impl IntoIterator<Item = &'a str>) -> String {
    Value::Array(
        items
            .into_iter()
            .map(|item| Value::String(item.to_owned()))
            .collect(),
    )
    .to_string()
}

impl Source for TiktokSource {
    fn id(&self) -> ProviderId {
        ProviderId::Tiktok
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
