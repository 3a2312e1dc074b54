//! Connector configuration as supplied by the configuration collaborator.

use std::path::Path;

use serde::{Deserialize, Deserializer};
use time::Date;

use crate::adapters::{FacebookSettings, LinkedinSettings, TiktokSettings};
use crate::domain::{parse_ymd, plan_window, DateWindow};
use crate::{ConfigError, ProviderId};

/// Provider credentials and provider-only options, tagged by `provider`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "provider", rename_all = "lowercase")]
pub enum SourceSettings {
    Facebook(FacebookSettings),
    Tiktok(TiktokSettings),
    Linkedin(LinkedinSettings),
}

impl SourceSettings {
    pub const fn provider_id(&self) -> ProviderId {
        match self {
            Self::Facebook(_) => ProviderId::Facebook,
            Self::Tiktok(_) => ProviderId::Tiktok,
            Self::Linkedin(_) => ProviderId::Linkedin,
        }
    }
}

/// Ordered `node -> fields` selection parsed from the connector "Fields" string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldSelection {
    nodes: Vec<(String, Vec<String>)>,
}

impl FieldSelection {
    /// Parses `"node field, node field"`. Nodes keep first-seen order; duplicate
    /// fields are dropped.
    pub fn parse(input: &str) -> Result<Self, ConfigError> {
        let mut selection = Self::default();
        for entry in input.split(',').map(str::trim).filter(|entry| !entry.is_empty()) {
            let mut parts = entry.split_whitespace();
            let (Some(node), Some(field), None) = (parts.next(), parts.next(), parts.next()) else {
                return Err(ConfigError::InvalidFieldsEntry {
                    entry: entry.to_owned(),
                });
            };
            selection.push(node, field);
        }
        Ok(selection)
    }

    fn push(&mut self, node: &str, field: &str) {
        let position = match self.nodes.iter().position(|(name, _)| name == node) {
            Some(position) => position,
            None => {
                self.nodes.push((node.to_owned(), Vec::new()));
                self.nodes.len() - 1
            }
        };
        let fields = &mut self.nodes[position].1;
        if !fields.iter().any(|existing| existing == field) {
            fields.push(field.to_owned());
        }
    }

    pub fn nodes(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(|(node, _)| node.as_str())
    }

    pub fn fields_for(&self, node: &str) -> Option<&[String]> {
        self.nodes
            .iter()
            .find(|(name, _)| name == node)
            .map(|(_, fields)| fields.as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.nodes
            .iter()
            .map(|(node, fields)| (node.as_str(), fields.as_slice()))
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl<'de> Deserialize<'de> for FieldSelection {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

fn optional_ymd<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Date>, D::Error> {
    match Option::<String>::deserialize(deserializer)? {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => parse_ymd(&raw)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(ConfigError::InvalidDate { value: raw })),
    }
}

/// Accepts either a JSON list or a comma/whitespace separated string.
fn account_list<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Accounts {
        List(Vec<String>),
        Text(String),
    }

    let accounts = match Accounts::deserialize(deserializer)? {
        Accounts::List(list) => list,
        Accounts::Text(text) => text
            .split(|c: char| c == ',' || c.is_whitespace())
            .map(str::to_owned)
            .collect(),
    };
    Ok(accounts
        .into_iter()
        .map(|account| account.trim().to_owned())
        .filter(|account| !account.is_empty())
        .collect())
}

const fn default_lookback() -> u32 {
    2
}
const fn default_max_fetch_days() -> u32 {
    30
}
const fn default_max_buffer_size() -> usize {
    250
}
const fn default_max_batch_size() -> usize {
    500
}
const fn enabled() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectorConfig {
    pub source: SourceSettings,
    #[serde(default, deserialize_with = "account_list")]
    pub account_ids: Vec<String>,
    #[serde(default)]
    pub fields: FieldSelection,
    #[serde(default, deserialize_with = "optional_ymd")]
    pub start_date: Option<Date>,
    #[serde(default, deserialize_with = "optional_ymd")]
    pub end_date: Option<Date>,
    #[serde(default, deserialize_with = "optional_ymd")]
    pub last_requested_date: Option<Date>,
    #[serde(default = "default_lookback")]
    pub reimport_lookback_window: u32,
    #[serde(default = "default_max_fetch_days")]
    pub max_fetch_days: u32,
    #[serde(default = "default_max_buffer_size")]
    pub max_buffer_size: usize,
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    /// Short-link lookups per batch; the provider policy decides when absent.
    #[serde(default)]
    pub max_concurrency: Option<usize>,
    #[serde(default = "enabled")]
    pub process_short_links: bool,
    #[serde(default = "enabled")]
    pub create_empty_tables: bool,
    #[serde(default)]
    pub destination_table_name: Option<String>,
    #[serde(default)]
    pub destination_table_prefix: Option<String>,
    #[serde(default)]
    pub destination_schema: Option<String>,
}

impl ConnectorConfig {
    /// Parses, fills missing secrets from `ADSYNC_*` environment variables and
    /// validates.
    pub fn from_json_str(input: &str) -> Result<Self, ConfigError> {
        let mut config = serde_json::from_str::<Self>(input)?;
        config.apply_secret_fallbacks(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_json_str(&std::fs::read_to_string(path)?)
    }

    pub const fn provider_id(&self) -> ProviderId {
        self.source.provider_id()
    }

    /// Fills empty secrets through `lookup` (normally the process environment).
    pub fn apply_secret_fallbacks(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let fill = |slot: &mut String, name: &str| {
            if slot.is_empty() {
                if let Some(value) = lookup(name).filter(|value| !value.is_empty()) {
                    *slot = value;
                }
            }
        };

        match &mut self.source {
            SourceSettings::Facebook(settings) => {
                fill(&mut settings.access_token, "ADSYNC_FACEBOOK_ACCESS_TOKEN");
            }
            SourceSettings::Tiktok(settings) => {
                fill(&mut settings.access_token, "ADSYNC_TIKTOK_ACCESS_TOKEN");
            }
            SourceSettings::Linkedin(settings) => {
                fill(&mut settings.client_secret, "ADSYNC_LINKEDIN_CLIENT_SECRET");
                fill(&mut settings.refresh_token, "ADSYNC_LINKEDIN_REFRESH_TOKEN");
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("maxFetchDays", self.max_fetch_days as usize),
            ("maxBufferSize", self.max_buffer_size),
            ("maxBatchSize", self.max_batch_size),
            ("maxConcurrency", self.max_concurrency.unwrap_or(1)),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::NonPositive { name: *name });
        }
        if self.account_ids.is_empty() {
            return Err(ConfigError::MissingSetting { name: "accountIds" });
        }
        if let (Some(start), Some(end)) = (self.start_date, self.end_date) {
            DateWindow::new(start, end)?;
        }
        Ok(())
    }

    /// Window to import for time-series nodes, or `None` when there is nothing to
    /// fetch yet.
    ///
    /// An explicit `endDate` pins the window; otherwise it is planned from
    /// `lastRequestedDate`, the lookback and `maxFetchDays`.
    pub fn fetch_window(&self, today: Date) -> Result<Option<DateWindow>, ConfigError> {
        let start = self
            .start_date
            .ok_or(ConfigError::MissingSetting { name: "startDate" })?;

        if let Some(end) = self.end_date {
            return DateWindow::new(start, end).map(Some);
        }

        Ok(plan_window(
            start,
            self.last_requested_date,
            today,
            self.reimport_lookback_window,
            self.max_fetch_days,
        ))
    }

    /// Destination table for `node`: the explicit name, else prefix + snake case.
    pub fn table_name(&self, node: &str) -> String {
        if let Some(name) = self.destination_table_name.as_ref().filter(|name| !name.is_empty()) {
            return name.clone();
        }
        let prefix = self
            .destination_table_prefix
            .as_deref()
            .unwrap_or_else(|| self.provider_id().table_prefix());
        format!("{prefix}{}", snake_case(node))
    }
}

/// `ad-account/insights` -> `ad_account_insights`, `adCampaigns` -> `ad_campaigns`.
pub fn snake_case(input: &str) -> String {
    let mut output = String::with_capacity(input.len() + 4);
    for c in input.chars() {
        if c.is_ascii_uppercase() {
            if !output.is_empty() && !output.ends_with('_') {
                output.push('_');
            }
            output.push(c.to_ascii_lowercase());
        } else if c.is_ascii_alphanumeric() {
            output.push(c);
        } else if !output.is_empty() && !output.ends_with('_') {
            output.push('_');
        }
    }
    while output.ends_with('_') {
        output.pop();
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Month;

    fn day(value: &str) -> Date {
        parse_ymd(value).expect("valid date")
    }

    const FACEBOOK: &str = r#"{
        "source": {"provider": "facebook", "accessToken": "fb-token"},
        "accountIds": "123, 456",
        "fields": "ad-account/insights ad_id, ad-account/insights spend, ad-account/insights ad_id, ad-account name",
        "startDate": "2024-01-01",
        "lastRequestedDate": "2024-02-10"
    }"#;

    #[test]
    fn parses_document_with_defaults() {
        let config = ConnectorConfig::from_json_str(FACEBOOK).expect("config should parse");

        assert_eq!(config.provider_id(), ProviderId::Facebook);
        assert_eq!(config.account_ids, vec!["123", "456"]);
        assert_eq!(config.reimport_lookback_window, 2);
        assert_eq!(config.max_fetch_days, 30);
        assert_eq!(config.max_buffer_size, 250);
        assert_eq!(config.max_batch_size, 500);
        assert_eq!(config.max_concurrency, None);
        assert!(config.process_short_links);
        assert!(config.create_empty_tables);
        assert_eq!(
            config.start_date,
            Some(Date::from_calendar_date(2024, Month::January, 1).expect("date"))
        );
    }

    #[test]
    fn fields_string_groups_by_node_in_order() {
        let config = ConnectorConfig::from_json_str(FACEBOOK).expect("config should parse");

        assert_eq!(
            config.fields.nodes().collect::<Vec<_>>(),
            vec!["ad-account/insights", "ad-account"]
        );
        assert_eq!(
            config.fields.fields_for("ad-account/insights"),
            Some(&[String::from("ad_id"), String::from("spend")][..])
        );
    }

    #[test]
    fn malformed_fields_entry_is_rejected() {
        let error = FieldSelection::parse("ad-account/insights").expect_err("field missing");
        assert!(matches!(error, ConfigError::InvalidFieldsEntry { .. }));

        let error = FieldSelection::parse("a b c").expect_err("too many parts");
        assert!(error.to_string().contains("a b c"));
    }

    #[test]
    fn missing_secret_falls_back_to_lookup() {
        let document = r#"{
            "source": {"provider": "linkedin", "clientId": "client"},
            "accountIds": ["508"]
        }"#;
        let mut config = serde_json::from_str::<ConnectorConfig>(document).expect("config should parse");

        config.apply_secret_fallbacks(|name| match name {
            "ADSYNC_LINKEDIN_CLIENT_SECRET" => Some(String::from("from-env")),
            "ADSYNC_LINKEDIN_REFRESH_TOKEN" => Some(String::from("refresh-env")),
            _ => None,
        });

        let SourceSettings::Linkedin(settings) = &config.source else {
            panic!("expected linkedin settings");
        };
        assert_eq!(settings.client_secret, "from-env");
        assert_eq!(settings.refresh_token, "refresh-env");
        assert_eq!(settings.client_id, "client");
    }

    #[test]
    fn document_secret_wins_over_lookup() {
        let mut config = serde_json::from_str::<ConnectorConfig>(FACEBOOK).expect("config should parse");
        config.apply_secret_fallbacks(|_| Some(String::from("from-env")));

        assert_eq!(
            config.source,
            SourceSettings::Facebook(FacebookSettings {
                access_token: String::from("fb-token")
            })
        );
    }

    #[test]
    fn validation_rejects_zero_tunables_and_inverted_dates() {
        let zero = FACEBOOK.replacen("\"startDate\"", "\"maxBufferSize\": 0, \"startDate\"", 1);
        let error = ConnectorConfig::from_json_str(&zero).expect_err("zero buffer");
        assert!(error.to_string().contains("maxBufferSize"));

        let inverted = FACEBOOK.replacen("\"startDate\"", "\"endDate\": \"2023-12-01\", \"startDate\"", 1);
        let error = ConnectorConfig::from_json_str(&inverted).expect_err("end before start");
        assert!(matches!(error, ConfigError::InvalidWindow { .. }));

        let bad_date = FACEBOOK.replacen("2024-01-01", "01/01/2024", 1);
        assert!(ConnectorConfig::from_json_str(&bad_date).is_err());
    }

    #[test]
    fn fetch_window_uses_lookback_and_explicit_end() {
        let config = ConnectorConfig::from_json_str(FACEBOOK).expect("config should parse");
        let window = config
            .fetch_window(day("2024-02-11"))
            .expect("start date present")
            .expect("days left");
        assert_eq!(window.start, day("2024-02-08"));
        assert_eq!(window.end, day("2024-02-11"));

        let pinned = ConnectorConfig {
            end_date: Some(day("2024-01-03")),
            ..config
        };
        let window = pinned
            .fetch_window(day("2024-02-11"))
            .expect("valid")
            .expect("window");
        assert_eq!(window.day_count(), 3);
    }

    #[test]
    fn table_names_follow_prefix_and_snake_case() {
        let config = ConnectorConfig::from_json_str(FACEBOOK).expect("config should parse");
        assert_eq!(config.table_name("ad-account/insights"), "facebook_ads_ad_account_insights");

        let named = ConnectorConfig {
            destination_table_name: Some(String::from("fb_insights")),
            ..config.clone()
        };
        assert_eq!(named.table_name("ad-account/insights"), "fb_insights");

        assert_eq!(snake_case("adCampaigns"), "ad_campaigns");
        assert_eq!(snake_case("ad_insights"), "ad_insights");
        assert_eq!(snake_case("ad-account-user"), "ad_account_user");
    }
}
