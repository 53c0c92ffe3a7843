use std::fs;
use std::path::PathBuf;

use anyhow::Result;
use tracing::warn;

use super::store::write_atomic;
use super::types::{TokenCacheFile, TokenRecord};

/// Per-config OIDC client registration and access token.
pub struct TokenCache {
    path: PathBuf,
}

impl TokenCache {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// A missing or unreadable cache reads as empty.
    fn load(&self) -> TokenCacheFile {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(_) => return TokenCacheFile::default(),
        };
        match serde_json::from_str(&contents) {
            Ok(file) => file,
            Err(err) => {
                warn!(
                    "Ignoring unreadable token cache {}: {}",
                    self.path.display(),
                    err
                );
                TokenCacheFile::default()
            }
        }
    }

    /// Never fails: an unknown config yields an already-expired record.
    pub fn get(&self, config_name: &str) -> TokenRecord {
        self.load()
            .client_information
            .remove(config_name)
            .unwrap_or_else(TokenRecord::expired)
    }

    pub fn put(&self, config_name: &str, record: TokenRecord) -> Result<()> {
        let mut file = self.load();
        file.version = env!("CARGO_PKG_VERSION").to_string();
        file.client_information
            .insert(config_name.to_string(), record);
        let contents = serde_json::to_string_pretty(&file)?;
        write_atomic(&self.path, contents.as_bytes())
    }
}
