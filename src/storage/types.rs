use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Top-level config document. Stored as config.toml.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used_accounts_count: Option<usize>,
    #[serde(default)]
    pub configs: BTreeMap<String, NamedConfig>,
}

/// One AWS SSO instance and the profiles that draw credentials from it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NamedConfig {
    pub id: String,
    pub sso_region: String,
    #[serde(default)]
    pub profiles: BTreeMap<String, Profile>,
    #[serde(skip)]
    pub name: String,
    /// Set once the wizard finished (or the config was read from disk).
    #[serde(skip)]
    pub complete: bool,
}

impl NamedConfig {
    pub fn start_url(&self) -> String {
        if self.id.starts_with("https://") {
            self.id.clone()
        } else {
            format!("https://{}.awsapps.com/start", self.id)
        }
    }

    /// Restores the names that live in map keys rather than in the values.
    pub(crate) fn assign_names(&mut self, name: &str) {
        self.name = name.to_string();
        for (profile_name, profile) in self.profiles.iter_mut() {
            profile.name = profile_name.clone();
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Profile {
    pub region: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_account: Option<DefaultAccount>,
    #[serde(skip)]
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultAccount {
    pub account_id: String,
    pub account_name: String,
    /// Empty means the role is chosen interactively.
    #[serde(default)]
    pub role: String,
}

/// OIDC client registration and access token for one config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenRecord {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    pub client_secret_expires_at: DateTime<Utc>,
    #[serde(default)]
    pub device_code: String,
    #[serde(default)]
    pub access_token: String,
    pub access_token_expires_at: DateTime<Utc>,
    #[serde(default)]
    pub verification_uri: String,
    #[serde(default)]
    pub start_url: String,
}

impl TokenRecord {
    /// A record whose registration and token are both already expired.
    pub fn expired() -> Self {
        let past = Utc::now() - Duration::days(365);
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            client_secret_expires_at: past,
            device_code: String::new(),
            access_token: String::new(),
            access_token_expires_at: past,
            verification_uri: String::new(),
            start_url: String::new(),
        }
    }

    pub fn is_token_valid(&self, now: DateTime<Utc>) -> bool {
        now < self.access_token_expires_at
    }

    pub fn is_client_valid(&self, now: DateTime<Utc>) -> bool {
        now < self.client_secret_expires_at
    }
}

/// Token cache document. Stored as cache/access-token.json.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct TokenCacheFile {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub client_information: BTreeMap<String, TokenRecord>,
}

/// An (account, role) pair previously used for a profile.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UsageRecord {
    pub account_id: String,
    pub account_name: String,
    pub role: String,
    pub profile: String,
}

/// Usage history document. Stored as cache/last-usage.json.
///
/// config name -> profile name -> records, most recent first.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct UsageHistoryFile {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub last_usage_information: BTreeMap<String, BTreeMap<String, Vec<UsageRecord>>>,
}
