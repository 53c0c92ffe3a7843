pub mod credentials_file;
pub mod store;
pub mod token_cache;
pub mod types;
pub mod usage_history;

pub use credentials_file::CredentialsFile;
pub use store::{ConfigStore, Settings, DEFAULT_LAST_USED_ACCOUNTS};
pub use token_cache::TokenCache;
pub use types::*;
pub use usage_history::UsageHistory;
