//! Sequential pagination over one node.

use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::caster::RecordCaster;
use crate::data_source::{FetchRequest, SourceError};
use crate::domain::{FieldValue, NodeSchema, TypedRecord};
use crate::http_client::{HttpRequest, HttpResponse};
use crate::retry::RetryingHttpClient;

/// Provider indicator of the next page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageCursor {
    /// Absolute URL of the next page.
    Url(String),
    /// Opaque continuation token.
    Token(String),
    /// 1-based page number.
    Page(u32),
}

/// One decoded response: raw rows plus the optional continuation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawPage {
    pub records: Vec<Map<String, Value>>,
    pub next: Option<PageCursor>,
}

impl RawPage {
    pub fn new(records: Vec<Map<String, Value>>, next: Option<PageCursor>) -> Self {
        Self { records, next }
    }

    /// A non-paginated response holding exactly one object.
    pub fn singleton(record: Map<String, Value>) -> Self {
        Self {
            records: vec![record],
            next: None,
        }
    }

    /// Keeps only object rows of a JSON array.
    pub fn objects(values: Vec<Value>) -> Vec<Map<String, Value>> {
        values
            .into_iter()
            .filter_map(|value| match value {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .collect()
    }
}

/// Provider-specific decoding of pages and construction of follow-up requests.
pub trait PageReader: Send + Sync {
    fn read_page(&self, response: &HttpResponse) -> Result<RawPage, SourceError>;

    fn next_request(&self, current: &HttpRequest, cursor: &PageCursor) -> HttpRequest;
}

/// Drives one node fetch: execute, decode, cast, accumulate, follow the cursor.
#[derive(Clone)]
pub struct PaginatedFetcher {
    client: RetryingHttpClient,
    caster: RecordCaster,
}

impl PaginatedFetcher {
    pub fn new(client: RetryingHttpClient) -> Self {
        Self {
            client,
            caster: RecordCaster,
        }
    }

    pub fn client(&self) -> &RetryingHttpClient {
        &self.client
    }

    /// Fetches every page starting at `initial`. There is no page cap; the loop ends
    /// when the provider stops returning a cursor.
    pub async fn fetch_all(
        &self,
        node: &NodeSchema,
        request: &FetchRequest,
        initial: HttpRequest,
        reader: &dyn PageReader,
    ) -> Result<Vec<TypedRecord>, SourceError> {
        let selected = node
            .resolve_fields(&request.selected_fields)
            .into_iter()
            .filter(|field| node.contains(field))
            .collect::<Vec<_>>();

        let mut records = Vec::new();
        let mut current = initial;
        let mut page = 0_u32;

        loop {
            page += 1;
            let response = self.client.execute(current.clone()).await.map_err(|failure| {
                SourceError::from_failure(&failure)
                    .in_context(&request.node_name, &request.account_id)
            })?;

            let raw_page = reader
                .read_page(&response)
                .map_err(|error| error.in_context(&request.node_name, &request.account_id))?;

            records.extend(raw_page.records.into_iter().map(|raw| {
                let mut record = self.caster.cast(node, raw);
                for field in &selected {
                    if !record.contains(field) {
                        record.insert(field.clone(), FieldValue::Null);
                    }
                }
                record
            }));

            info!(
                node = %request.node_name,
                account = %request.account_id,
                page,
                accumulated = records.len(),
                "fetched page"
            );

            let Some(cursor) = raw_page.next else {
                break;
            };

            let next = reader.next_request(&current, &cursor);
            if next == current {
                warn!(
                    node = %request.node_name,
                    account = %request.account_id,
                    page,
                    "provider returned the same page cursor twice; stopping"
                );
                break;
            }
            current = next;
        }

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::ErrorClassifier;
    use crate::data_source::SourceErrorKind;
    use crate::domain::{FieldDescriptor, SemanticType};
    use crate::http_client::{HttpClient, HttpError};
    use crate::retry::RetryConfig;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    struct RecordingHttpClient {
        responses: Mutex<VecDeque<HttpResponse>>,
        requests: Mutex<Vec<HttpRequest>>,
    }

    impl RecordingHttpClient {
        fn new(bodies: Vec<Value>) -> Self {
            Self {
                responses: Mutex::new(
                    bodies
                        .into_iter()
                        .map(|body| HttpResponse::ok_json(body.to_string()))
                        .collect(),
                ),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn recorded_urls(&self) -> Vec<String> {
            self.requests
                .lock()
                .expect("request store should not be poisoned")
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
            self.requests
                .lock()
                .expect("request store should not be poisoned")
                .push(request);
            let response = self
                .responses
                .lock()
                .expect("script should not be poisoned")
                .pop_front()
                .unwrap_or_else(|| HttpResponse::new(404, r#"{"error":"no more pages"}"#));
            Box::pin(async move { Ok(response) })
        }
    }

    /// `{"items": [...], "next": "token"}` pages addressed by `?cursor=`.
    struct TokenPages;

    impl PageReader for TokenPages {
        fn read_page(&self, response: &HttpResponse) -> Result<RawPage, SourceError> {
            let body = response
                .json()
                .map_err(|error| SourceError::fetch(format!("invalid json: {error}")))?;
            let items = body["items"].as_array().cloned().unwrap_or_default();
            let next = body["next"].as_str().map(|token| PageCursor::Token(token.to_owned()));
            Ok(RawPage::new(RawPage::objects(items), next))
        }

        fn next_request(&self, _current: &HttpRequest, cursor: &PageCursor) -> HttpRequest {
            match cursor {
                PageCursor::Token(token) => {
                    HttpRequest::get("https://api.test/items").with_query("cursor", token)
                }
                other => HttpRequest::get(format!("https://api.test/items#{other:?}")),
            }
        }
    }

    fn node() -> NodeSchema {
        NodeSchema::new(
            "items",
            [
                FieldDescriptor::new("id", SemanticType::String),
                FieldDescriptor::new("clicks", SemanticType::Integer),
                FieldDescriptor::new("label", SemanticType::String),
            ],
            ["id"],
        )
    }

    fn fetcher(client: Arc<RecordingHttpClient>) -> PaginatedFetcher {
        PaginatedFetcher::new(RetryingHttpClient::new(
            client,
            ErrorClassifier::default(),
            RetryConfig::fixed(Duration::ZERO, 1),
        ))
    }

    #[tokio::test]
    async fn follows_cursors_until_exhausted_in_page_order() {
        let client = Arc::new(RecordingHttpClient::new(vec![
            json!({"items": [{"id": "1", "clicks": "1"}, {"id": "2", "clicks": "2"}], "next": "p2"}),
            json!({"items": [{"id": "3", "clicks": "3"}, {"id": "4", "clicks": "4"}], "next": "p3"}),
            json!({"items": [{"id": "5", "clicks": "5"}, {"id": "6", "clicks": "6"}]}),
        ]));
        let request = FetchRequest::new("items", "acc-1").with_fields(["id", "clicks"]);

        let records = fetcher(client.clone())
            .fetch_all(
                &node(),
                &request,
                HttpRequest::get("https://api.test/items"),
                &TokenPages,
            )
            .await
            .expect("fetch should succeed");

        let ids = records
            .iter()
            .filter_map(|record| record.get("id").and_then(FieldValue::as_str))
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["1", "2", "3", "4", "5", "6"]);
        assert_eq!(records[5].get("clicks"), Some(&FieldValue::Integer(6)));
        assert_eq!(
            client.recorded_urls(),
            vec![
                "https://api.test/items",
                "https://api.test/items?cursor=p2",
                "https://api.test/items?cursor=p3",
            ]
        );
    }

    #[tokio::test]
    async fn selected_fields_missing_from_rows_are_null() {
        let client = Arc::new(RecordingHttpClient::new(vec![
            json!({"items": [{"id": "1"}]}),
        ]));
        let request = FetchRequest::new("items", "acc-1").with_fields(["id", "label", "unknown"]);

        let records = fetcher(client)
            .fetch_all(&node(), &request, HttpRequest::get("https://api.test/items"), &TokenPages)
            .await
            .expect("fetch should succeed");

        assert_eq!(records[0].get("label"), Some(&FieldValue::Null));
        assert!(!records[0].contains("unknown"));
        assert!(!records[0].contains("clicks"));
    }

    #[tokio::test]
    async fn failing_page_reports_node_and_account() {
        let client = Arc::new(RecordingHttpClient::new(vec![
            json!({"items": [{"id": "1"}], "next": "p2"}),
        ]));
        let request = FetchRequest::new("items", "acc-9");

        let error = fetcher(client)
            .fetch_all(&node(), &request, HttpRequest::get("https://api.test/items"), &TokenPages)
            .await
            .expect_err("second page is missing");

        assert_eq!(error.kind(), SourceErrorKind::Fetch);
        assert_eq!(error.status(), Some(404));
        assert_eq!(error.node(), Some("items"));
        assert_eq!(error.account_id(), Some("acc-9"));
    }

    #[tokio::test]
    async fn repeated_cursor_stops_pagination() {
        let client = Arc::new(RecordingHttpClient::new(vec![
            json!({"items": [{"id": "1"}], "next": "same"}),
            json!({"items": [{"id": "2"}], "next": "same"}),
        ]));
        let request = FetchRequest::new("items", "acc-1");

        let records = fetcher(client.clone())
            .fetch_all(&node(), &request, HttpRequest::get("https://api.test/items"), &TokenPages)
            .await
            .expect("fetch should succeed");

        assert_eq!(records.len(), 2);
        assert_eq!(client.recorded_urls().len(), 2);
    }
}
