use thiserror::Error;

/// Errors raised while loading connector configuration and field dictionaries.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid provider '{value}', expected one of facebook, tiktok, linkedin")]
    InvalidProvider { value: String },

    #[error("invalid fields entry '{entry}', expected '<node> <field>'")]
    InvalidFieldsEntry { entry: String },

    #[error("invalid date '{value}', expected YYYY-MM-DD")]
    InvalidDate { value: String },

    #[error("date window end {end} precedes start {start}")]
    InvalidWindow { start: String, end: String },

    #[error("missing required setting '{name}'")]
    MissingSetting { name: &'static str },

    #[error("setting '{name}' must be greater than zero")]
    NonPositive { name: &'static str },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
