use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use anyhow::Result;
use tracing::warn;

use super::store::write_atomic;
use super::types::{UsageHistoryFile, UsageRecord};

/// Recently used (account, role) pairs per config and profile,
/// most recent first and free of duplicates.
pub struct UsageHistory {
    path: PathBuf,
    limit: usize,
}

impl UsageHistory {
    pub fn new(path: PathBuf, limit: usize) -> Self {
        Self { path, limit }
    }

    fn load(&self) -> UsageHistoryFile {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(_) => return UsageHistoryFile::default(),
        };
        match serde_json::from_str(&contents) {
            Ok(file) => file,
            Err(err) => {
                warn!(
                    "Ignoring unreadable usage history {}: {}",
                    self.path.display(),
                    err
                );
                UsageHistoryFile::default()
            }
        }
    }

    /// profile name -> records for one config; empty when nothing was used yet.
    pub fn history(&self, config_name: &str) -> BTreeMap<String, Vec<UsageRecord>> {
        self.load()
            .last_usage_information
            .remove(config_name)
            .unwrap_or_default()
    }

    /// At most `limit` records for the profile, most recent first.
    pub fn recent(&self, config_name: &str, profile_name: &str) -> Vec<UsageRecord> {
        let mut records = self
            .history(config_name)
            .remove(profile_name)
            .unwrap_or_default();
        records.truncate(self.limit);
        records
    }

    /// Moves `record` to the front of its profile's list, inserting it if new.
    pub fn record_usage(&self, config_name: &str, record: UsageRecord) -> Result<()> {
        let mut file = self.load();
        file.version = env!("CARGO_PKG_VERSION").to_string();

        let records = file
            .last_usage_information
            .entry(config_name.to_string())
            .or_default()
            .entry(record.profile.clone())
            .or_default();
        records.retain(|existing| existing != &record);
        records.insert(0, record);

        let contents = serde_json::to_string_pretty(&file)?;
        write_atomic(&self.path, contents.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn usage(account: &str, role: &str, profile: &str) -> UsageRecord {
        UsageRecord {
            account_id: account.into(),
            account_name: format!("Account {}", account),
            role: role.into(),
            profile: profile.into(),
        }
    }

    fn history_in(dir: &TempDir, limit: usize) -> UsageHistory {
        UsageHistory::new(dir.path().join("cache").join("last-usage.json"), limit)
    }

    #[test]
    fn no_file_means_empty_history() {
        let dir = TempDir::new().unwrap();
        let history = history_in(&dir, 5);
        assert!(history.history("work").is_empty());
        assert!(history.recent("work", "dev").is_empty());
    }

    #[test]
    fn recording_twice_keeps_one_entry() {
        let dir = TempDir::new().unwrap();
        let history = history_in(&dir, 5);
        let a = usage("111", "Admin", "dev");

        history.record_usage("work", a.clone()).unwrap();
        history.record_usage("work", a.clone()).unwrap();

        assert_eq!(history.recent("work", "dev"), vec![a]);
    }

    #[test]
    fn reuse_moves_record_to_front() {
        let dir = TempDir::new().unwrap();
        let history = history_in(&dir, 5);
        let a = usage("111", "Admin", "dev");
        let b = usage("222", "ReadOnly", "dev");

        history.record_usage("work", a.clone()).unwrap();
        history.record_usage("work", b.clone()).unwrap();
        history.record_usage("work", a.clone()).unwrap();

        assert_eq!(history.recent("work", "dev"), vec![a, b]);
    }

    #[test]
    fn length_is_capped_at_limit() {
        let dir = TempDir::new().unwrap();
        let history = history_in(&dir, 2);

        history.record_usage("work", usage("1", "r", "dev")).unwrap();
        history.record_usage("work", usage("2", "r", "dev")).unwrap();
        history.record_usage("work", usage("3", "r", "dev")).unwrap();

        let ids: Vec<_> = history
            .recent("work", "dev")
            .into_iter()
            .map(|r| r.account_id)
            .collect();
        assert_eq!(ids, vec!["3", "2"]);
        assert_eq!(history.history("work")["dev"].len(), 3);
    }

    #[test]
    fn narrow_run_keeps_older_entries() {
        let dir = TempDir::new().unwrap();
        let wide = history_in(&dir, 5);
        for id in ["1", "2", "3", "4"] {
            wide.record_usage("work", usage(id, "r", "dev")).unwrap();
        }

        history_in(&dir, 1)
            .record_usage("work", usage("2", "r", "dev"))
            .unwrap();

        let ids: Vec<_> = wide
            .recent("work", "dev")
            .into_iter()
            .map(|r| r.account_id)
            .collect();
        assert_eq!(ids, vec!["2", "4", "3", "1"]);
    }

    #[test]
    fn recent_truncates_longer_stored_history() {
        let dir = TempDir::new().unwrap();
        let wide = history_in(&dir, 5);
        wide.record_usage("work", usage("1", "r", "dev")).unwrap();
        wide.record_usage("work", usage("2", "r", "dev")).unwrap();
        wide.record_usage("work", usage("3", "r", "dev")).unwrap();

        let narrow = history_in(&dir, 2);
        let ids: Vec<_> = narrow
            .recent("work", "dev")
            .into_iter()
            .map(|r| r.account_id)
            .collect();
        assert_eq!(ids, vec!["3", "2"]);
    }

    #[test]
    fn profiles_and_configs_are_kept_apart() {
        let dir = TempDir::new().unwrap();
        let history = history_in(&dir, 5);

        history.record_usage("work", usage("1", "r", "dev")).unwrap();
        history.record_usage("work", usage("2", "r", "prod")).unwrap();
        history.record_usage("home", usage("3", "r", "dev")).unwrap();

        let work = history.history("work");
        assert_eq!(work.len(), 2);
        assert_eq!(work["dev"][0].account_id, "1");
        assert_eq!(history.recent("home", "dev")[0].account_id, "3");
    }

    #[test]
    fn corrupt_file_is_treated_as_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("last-usage.json");
        fs::write(&path, "{{{").unwrap();
        let history = UsageHistory::new(path, 5);

        assert!(history.history("work").is_empty());
        history.record_usage("work", usage("1", "r", "dev")).unwrap();
        assert_eq!(history.recent("work", "dev").len(), 1);
    }
}
