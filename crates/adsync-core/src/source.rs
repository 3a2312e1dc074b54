use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Canonical provider identifiers used in configuration, logs and errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    Facebook,
    Tiktok,
    Linkedin,
}

impl ProviderId {
    pub const ALL: [Self; 3] = [Self::Facebook, Self::Tiktok, Self::Linkedin];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Facebook => "facebook",
            Self::Tiktok => "tiktok",
            Self::Linkedin => "linkedin",
        }
    }

    /// Prefix used for destination tables when no explicit name is configured.
    pub const fn table_prefix(self) -> &'static str {
        match self {
            Self::Facebook => "facebook_ads_",
            Self::Tiktok => "tiktok_ads_",
            Self::Linkedin => "linkedin_ads_",
        }
    }
}

impl Display for ProviderId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "facebook" | "facebook-marketing" => Ok(Self::Facebook),
            "tiktok" | "tiktok-ads" => Ok(Self::Tiktok),
            "linkedin" | "linkedin-ads" => Ok(Self::Linkedin),
            other => Err(ConfigError::InvalidProvider {
                value: other.to_owned(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_provider_aliases_case_insensitively() {
        assert_eq!("Facebook".parse::<ProviderId>().ok(), Some(ProviderId::Facebook));
        assert_eq!(" tiktok-ads ".parse::<ProviderId>().ok(), Some(ProviderId::Tiktok));
        assert_eq!("linkedin".parse::<ProviderId>().ok(), Some(ProviderId::Linkedin));
    }

    #[test]
    fn rejects_unknown_provider() {
        let error = "snapchat".parse::<ProviderId>().expect_err("unknown provider");
        assert!(error.to_string().contains("snapchat"));
    }
}
