//! # Source contract
//!
//! Every provider integration implements [`Source`]: given a node name, an account and
//! the selected fields, it returns the node's rows as [`TypedRecord`]s.
//!
//! ## Example
//!
//! ```rust,no_run
//! use adsync_core::{FetchRequest, Source, SourceError, TypedRecord};
//!
//! async fn daily_insights(source: &dyn Source) -> Result<Vec<TypedRecord>, SourceError> {
//!     let request = FetchRequest::new("ad-account/insights", "1234567890")
//!         .with_fields(["ad_id", "date_start", "spend"]);
//!     source.fetch_data(request).await
//! }
//! ```

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;

use crate::classifier::FetchFailure;
use crate::domain::{DateWindow, FieldSchema, NodeSchema, TypedRecord};
use crate::ProviderId;

/// Failure class of a source call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceErrorKind {
    /// Unknown node, missing required field or invalid settings. Never retried.
    Configuration,
    /// Token refresh or signing failed.
    Authentication,
    /// The provider call failed after retries, or failed fatally.
    Fetch,
}

/// Structured source error carrying enough context to act on without verbose logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceError {
    kind: SourceErrorKind,
    message: String,
    node: Option<String>,
    account_id: Option<String>,
    status: Option<u16>,
    provider_code: Option<i64>,
}

impl SourceError {
    fn new(kind: SourceErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            node: None,
            account_id: None,
            status: None,
            provider_code: None,
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::Configuration, message)
    }

    pub fn unknown_node(node: &str) -> Self {
        Self::configuration(format!("unknown node '{node}'")).with_node(node)
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::Authentication, message)
    }

    pub fn fetch(message: impl Into<String>) -> Self {
        Self::new(SourceErrorKind::Fetch, message)
    }

    /// Converts an exhausted or fatal HTTP failure.
    pub fn from_failure(failure: &FetchFailure) -> Self {
        let message = if failure.attempts > 1 {
            format!("{} after {} attempts", failure.message, failure.attempts)
        } else {
            failure.message.clone()
        };
        Self {
            status: failure.status,
            provider_code: failure.provider_code(),
            ..Self::fetch(message)
        }
    }

    pub fn with_node(mut self, node: impl Into<String>) -> Self {
        self.node = Some(node.into());
        self
    }

    pub fn with_account(mut self, account_id: impl Into<String>) -> Self {
        self.account_id = Some(account_id.into());
        self
    }

    /// Fills node and account context where it is still missing.
    pub fn in_context(mut self, node: &str, account_id: &str) -> Self {
        if self.node.is_none() {
            self.node = Some(node.to_owned());
        }
        if self.account_id.is_none() {
            self.account_id = Some(account_id.to_owned());
        }
        self
    }

    pub const fn kind(&self) -> SourceErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn node(&self) -> Option<&str> {
        self.node.as_deref()
    }

    pub fn account_id(&self) -> Option<&str> {
        self.account_id.as_deref()
    }

    pub const fn status(&self) -> Option<u16> {
        self.status
    }

    pub const fn provider_code(&self) -> Option<i64> {
        self.provider_code
    }

    pub const fn code(&self) -> &'static str {
        match self.kind {
            SourceErrorKind::Configuration => "source.configuration",
            SourceErrorKind::Authentication => "source.authentication",
            SourceErrorKind::Fetch => "source.fetch",
        }
    }
}

impl Display for SourceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code())?;
        if let Some(node) = &self.node {
            write!(f, " node={node}")?;
        }
        if let Some(account_id) = &self.account_id {
            write!(f, " account={account_id}")?;
        }
        if let Some(status) = self.status {
            write!(f, " status={status}")?;
        }
        if let Some(code) = self.provider_code {
            write!(f, " provider_code={code}")?;
        }
        Ok(())
    }
}

impl std::error::Error for SourceError {}

/// One `fetch_data` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub node_name: String,
    pub account_id: String,
    pub selected_fields: Vec<String>,
    pub date_window: Option<DateWindow>,
}

impl FetchRequest {
    pub fn new(node_name: impl Into<String>, account_id: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
            account_id: account_id.into(),
            selected_fields: Vec::new(),
            date_window: None,
        }
    }

    pub fn with_fields(mut self, fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.selected_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_window(mut self, window: DateWindow) -> Self {
        self.date_window = Some(window);
        self
    }

    /// Resolves the node against `schema`, failing with a configuration error when it
    /// is unknown.
    pub fn node<'a>(&self, schema: &'a FieldSchema) -> Result<&'a NodeSchema, SourceError> {
        schema
            .node(&self.node_name)
            .ok_or_else(|| SourceError::unknown_node(&self.node_name).with_account(&self.account_id))
    }
}

/// Capability interface implemented once per provider.
pub trait Source: Send + Sync {
    /// Returns the provider identifier.
    fn id(&self) -> ProviderId;

    /// Field dictionaries this source was configured with.
    fn field_schema(&self) -> &FieldSchema;

    /// Fetches every row of one node for one account.
    ///
    /// # Errors
    ///
    /// - [`SourceErrorKind::Configuration`] when the node is unknown or required
    ///   fields are missing.
    /// - [`SourceErrorKind::Authentication`] when credentials cannot be obtained.
    /// - [`SourceErrorKind::Fetch`] when the provider call fails fatally or retries
    ///   are exhausted.
    fn fetch_data<'a>(
        &'a self,
        request: FetchRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<TypedRecord>, SourceError>> + Send + 'a>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::ProviderErrorPayload;

    #[test]
    fn fetch_errors_carry_status_and_provider_code() {
        let failure = FetchFailure {
            status: Some(400),
            payload: Some(ProviderErrorPayload {
                code: Some(100),
                message: Some(String::from("Invalid parameter")),
                ..ProviderErrorPayload::default()
            }),
            message: String::from("Invalid parameter"),
            transport_retryable: false,
            attempts: 1,
        };

        let error = SourceError::from_failure(&failure).in_context("ad-account/ads", "42");

        assert_eq!(error.kind(), SourceErrorKind::Fetch);
        assert_eq!(error.status(), Some(400));
        assert_eq!(error.provider_code(), Some(100));
        assert_eq!(
            error.to_string(),
            "Invalid parameter (source.fetch) node=ad-account/ads account=42 status=400 provider_code=100"
        );
    }

    #[test]
    fn unknown_node_is_a_configuration_error() {
        let schema = FieldSchema::default();
        let error = FetchRequest::new("ad-account/pixels", "42")
            .node(&schema)
            .expect_err("node is not in schema");

        assert_eq!(error.kind(), SourceErrorKind::Configuration);
        assert_eq!(error.node(), Some("ad-account/pixels"));
        assert_eq!(error.account_id(), Some("42"));
        assert_eq!(error.code(), "source.configuration");
    }
}
