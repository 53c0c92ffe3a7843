use anyhow::{bail, Context, Result};
use tracing::{debug, info};

use crate::prompt::{fuzzy_match_fold, prefix_anchored, Selector};
use crate::sso::{AccountInfo, SsoPortal};
use crate::storage::{DefaultAccount, Profile, UsageHistory, UsageRecord};

const HISTORY_PREFIX: &str = "#";

/// How much weight earlier choices get when picking an account and role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionPolicy {
    /// Reuse the usage history, only discovering live when it is empty.
    PreferHistory,
    /// Always discover accounts and roles live.
    PreferFresh,
}

/// Picks the (account, role) pair a profile's credentials come from.
///
/// A configured default account always wins. After that the policy decides
/// between the usage history and a live listing of the operator's assignments.
pub struct AccountRoleResolver<'a> {
    portal: &'a dyn SsoPortal,
    selector: &'a dyn Selector,
    history: &'a UsageHistory,
}

impl<'a> AccountRoleResolver<'a> {
    pub fn new(
        portal: &'a dyn SsoPortal,
        selector: &'a dyn Selector,
        history: &'a UsageHistory,
    ) -> Self {
        Self {
            portal,
            selector,
            history,
        }
    }

    pub fn resolve(
        &self,
        config_name: &str,
        profile: &Profile,
        access_token: &str,
        policy: ResolutionPolicy,
    ) -> Result<UsageRecord> {
        if let Some(default) = &profile.default_account {
            return self.from_default(profile, default, access_token);
        }

        if policy == ResolutionPolicy::PreferHistory {
            let mut recent = self.history.recent(config_name, &profile.name);
            match recent.len() {
                0 => debug!("No usage history for {}/{}", config_name, profile.name),
                1 => {
                    let record = recent.remove(0);
                    info!(
                        "Using last used account {} [{}] with role {}",
                        record.account_name, record.account_id, record.role
                    );
                    return Ok(record);
                }
                _ => return self.choose_from_history(recent),
            }
        }

        self.discover(profile, access_token)
    }

    fn from_default(
        &self,
        profile: &Profile,
        default: &DefaultAccount,
        access_token: &str,
    ) -> Result<UsageRecord> {
        info!(
            "Using default account {} [{}]",
            default.account_name, default.account_id
        );
        let role = if default.role.is_empty() {
            self.choose_role(access_token, &default.account_id)?
        } else {
            default.role.clone()
        };
        Ok(UsageRecord {
            account_id: default.account_id.clone(),
            account_name: default.account_name.clone(),
            role,
            profile: profile.name.clone(),
        })
    }

    fn choose_from_history(&self, mut recent: Vec<UsageRecord>) -> Result<UsageRecord> {
        let labels: Vec<String> = recent
            .iter()
            .enumerate()
            .map(|(index, record)| {
                format!(
                    "{}{} {} [{}] {}",
                    HISTORY_PREFIX,
                    index + 1,
                    record.account_name,
                    record.account_id,
                    record.role
                )
            })
            .collect();
        let matcher = prefix_anchored(&labels, HISTORY_PREFIX);
        let index = self
            .selector
            .select("Select a recently used account", &labels, Some(&matcher))?;
        if index >= recent.len() {
            bail!("selection {} is out of range", index);
        }
        Ok(recent.swap_remove(index))
    }

    fn discover(&self, profile: &Profile, access_token: &str) -> Result<UsageRecord> {
        let account = self.choose_account(access_token)?;
        let role = self.choose_role(access_token, &account.account_id)?;
        Ok(UsageRecord {
            account_id: account.account_id,
            account_name: account.account_name,
            role,
            profile: profile.name.clone(),
        })
    }

    fn choose_account(&self, access_token: &str) -> Result<AccountInfo> {
        let mut accounts = self
            .portal
            .list_accounts(access_token)
            .context("Failed to list accounts")?;
        if accounts.is_empty() {
            bail!("no AWS accounts are assigned to this SSO user");
        }
        accounts.sort_by(|a, b| a.account_name.cmp(&b.account_name));

        let index = if accounts.len() == 1 {
            0
        } else {
            let labels: Vec<String> = accounts
                .iter()
                .map(|account| format!("{} ({})", account.account_name, account.account_id))
                .collect();
            let matcher = |input: &str, index: usize| {
                labels
                    .get(index)
                    .is_some_and(|label| fuzzy_match_fold(input, label))
            };
            self.selector
                .select("Select an account", &labels, Some(&matcher))?
        };

        if index >= accounts.len() {
            bail!("selection {} is out of range", index);
        }
        let account = accounts.swap_remove(index);
        info!(
            "Selected account {} [{}]",
            account.account_name, account.account_id
        );
        Ok(account)
    }

    fn choose_role(&self, access_token: &str, account_id: &str) -> Result<String> {
        let mut roles: Vec<String> = self
            .portal
            .list_account_roles(access_token, account_id)
            .with_context(|| format!("Failed to list roles for account {}", account_id))?
            .into_iter()
            .map(|role| role.role_name)
            .collect();
        if roles.is_empty() {
            bail!("no roles are assigned in account {}", account_id);
        }
        roles.sort();

        let index = if roles.len() == 1 {
            0
        } else {
            self.selector.select("Select a role", &roles, None)?
        };
        if index >= roles.len() {
            bail!("selection {} is out of range", index);
        }
        Ok(roles.swap_remove(index))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::SsoError;
    use crate::prompt::Matcher;
    use crate::sso::{RoleInfo, TemporaryCredentials};
    use std::cell::{Cell, RefCell};
    use std::collections::VecDeque;
    use tempfile::TempDir;

    /// Portal with fixed accounts and the same role list for every account.
    pub(crate) struct FakePortal {
        pub accounts: Vec<AccountInfo>,
        pub roles: Vec<String>,
        pub credentials: Result<TemporaryCredentials, fn() -> SsoError>,
        pub calls: Cell<usize>,
    }

    impl FakePortal {
        pub(crate) fn new(accounts: &[(&str, &str)], roles: &[&str]) -> Self {
            Self {
                accounts: accounts
                    .iter()
                    .map(|(id, name)| AccountInfo {
                        account_id: id.to_string(),
                        account_name: name.to_string(),
                        email_address: None,
                    })
                    .collect(),
                roles: roles.iter().map(|role| role.to_string()).collect(),
                credentials: Ok(TemporaryCredentials {
                    access_key_id: "AKIAEXAMPLE".into(),
                    secret_access_key: "secret".into(),
                    session_token: "session".into(),
                    expiration: 1_700_000_000_000,
                }),
                calls: Cell::new(0),
            }
        }
    }

    impl SsoPortal for FakePortal {
        fn list_accounts(&self, _: &str) -> Result<Vec<AccountInfo>, SsoError> {
            self.calls.set(self.calls.get() + 1);
            Ok(self.accounts.clone())
        }

        fn list_account_roles(&self, _: &str, account_id: &str) -> Result<Vec<RoleInfo>, SsoError> {
            self.calls.set(self.calls.get() + 1);
            Ok(self
                .roles
                .iter()
                .map(|role| RoleInfo {
                    role_name: role.clone(),
                    account_id: account_id.to_string(),
                })
                .collect())
        }

        fn get_role_credentials(
            &self,
            _: &str,
            _: &str,
            _: &str,
        ) -> Result<TemporaryCredentials, SsoError> {
            self.calls.set(self.calls.get() + 1);
            match &self.credentials {
                Ok(credentials) => Ok(credentials.clone()),
                Err(make) => Err(make()),
            }
        }
    }

    /// Answers selections from a queue and records the labels it was shown.
    #[derive(Default)]
    pub(crate) struct ScriptedSelector {
        pub answers: RefCell<VecDeque<usize>>,
        pub multi_answers: RefCell<VecDeque<Vec<usize>>>,
        pub shown: RefCell<Vec<Vec<String>>>,
        pub selects: Cell<usize>,
    }

    impl ScriptedSelector {
        pub(crate) fn answering(answers: &[usize]) -> Self {
            Self {
                answers: RefCell::new(answers.iter().copied().collect()),
                ..Default::default()
            }
        }
    }

    impl Selector for ScriptedSelector {
        fn select(&self, _: &str, choices: &[String], _: Option<Matcher>) -> Result<usize> {
            self.selects.set(self.selects.get() + 1);
            self.shown.borrow_mut().push(choices.to_vec());
            self.answers
                .borrow_mut()
                .pop_front()
                .ok_or_else(|| anyhow::anyhow!("unexpected select"))
        }

        fn multi_select(&self, _: &str, choices: &[String], _: Option<Matcher>) -> Result<Vec<usize>> {
            self.shown.borrow_mut().push(choices.to_vec());
            self.multi_answers
                .borrow_mut()
                .pop_front()
                .ok_or_else(|| anyhow::anyhow!("unexpected multi select"))
        }

        fn prompt(&self, _: &str, default: &str) -> Result<String> {
            Ok(default.to_string())
        }
    }

    pub(crate) fn profile(name: &str, region: &str) -> Profile {
        Profile {
            name: name.into(),
            region: region.into(),
            default_account: None,
        }
    }

    fn usage(id: &str, name: &str, role: &str) -> UsageRecord {
        UsageRecord {
            account_id: id.into(),
            account_name: name.into(),
            role: role.into(),
            profile: "dev".into(),
        }
    }

    fn history_in(dir: &TempDir, limit: usize) -> UsageHistory {
        UsageHistory::new(dir.path().join("last-usage.json"), limit)
    }

    #[test]
    fn single_account_and_role_need_no_prompt() {
        let dir = TempDir::new().unwrap();
        let history = history_in(&dir, 5);
        let portal = FakePortal::new(&[("111", "Dev")], &["Admin"]);
        let selector = ScriptedSelector::default();

        let record = AccountRoleResolver::new(&portal, &selector, &history)
            .resolve("work", &profile("dev", "us-east-1"), "token", ResolutionPolicy::PreferHistory)
            .unwrap();

        assert_eq!(record, usage("111", "Dev", "Admin"));
        assert_eq!(selector.selects.get(), 0);
    }

    #[test]
    fn history_offers_only_the_most_recent_entries() {
        let dir = TempDir::new().unwrap();
        let history = history_in(&dir, 5);
        history.record_usage("work", usage("333", "Third", "Admin")).unwrap();
        history.record_usage("work", usage("222", "Second", "Admin")).unwrap();
        history.record_usage("work", usage("111", "First", "Admin")).unwrap();
        let history = history_in(&dir, 2);
        let portal = FakePortal::new(&[], &[]);
        let selector = ScriptedSelector::answering(&[1]);

        let record = AccountRoleResolver::new(&portal, &selector, &history)
            .resolve("work", &profile("dev", "us-east-1"), "token", ResolutionPolicy::PreferHistory)
            .unwrap();

        assert_eq!(record, usage("222", "Second", "Admin"));
        assert_eq!(
            selector.shown.borrow()[0],
            vec!["#1 First [111] Admin", "#2 Second [222] Admin"]
        );
        assert_eq!(portal.calls.get(), 0);
    }

    #[test]
    fn single_history_entry_is_used_directly() {
        let dir = TempDir::new().unwrap();
        let history = history_in(&dir, 5);
        history.record_usage("work", usage("222", "Prod", "ReadOnly")).unwrap();
        let portal = FakePortal::new(&[], &[]);
        let selector = ScriptedSelector::default();

        let record = AccountRoleResolver::new(&portal, &selector, &history)
            .resolve("work", &profile("dev", "us-east-1"), "token", ResolutionPolicy::PreferHistory)
            .unwrap();

        assert_eq!(record, usage("222", "Prod", "ReadOnly"));
        assert_eq!(selector.selects.get(), 0);
        assert_eq!(portal.calls.get(), 0);
    }

    #[test]
    fn prefer_fresh_ignores_history() {
        let dir = TempDir::new().unwrap();
        let history = history_in(&dir, 5);
        history.record_usage("work", usage("222", "Prod", "ReadOnly")).unwrap();
        let portal = FakePortal::new(&[("111", "Dev")], &["Admin"]);
        let selector = ScriptedSelector::default();

        let record = AccountRoleResolver::new(&portal, &selector, &history)
            .resolve("work", &profile("dev", "us-east-1"), "token", ResolutionPolicy::PreferFresh)
            .unwrap();

        assert_eq!(record, usage("111", "Dev", "Admin"));
    }

    #[test]
    fn default_account_with_role_never_prompts() {
        let dir = TempDir::new().unwrap();
        let history = history_in(&dir, 5);
        history.record_usage("work", usage("222", "Prod", "ReadOnly")).unwrap();
        history.record_usage("work", usage("333", "Other", "ReadOnly")).unwrap();
        let portal = FakePortal::new(&[], &[]);
        let selector = ScriptedSelector::default();
        let mut dev = profile("dev", "us-east-1");
        dev.default_account = Some(DefaultAccount {
            account_id: "111".into(),
            account_name: "Dev".into(),
            role: "Admin".into(),
        });

        for policy in [ResolutionPolicy::PreferHistory, ResolutionPolicy::PreferFresh] {
            let record = AccountRoleResolver::new(&portal, &selector, &history)
                .resolve("work", &dev, "token", policy)
                .unwrap();
            assert_eq!(record, usage("111", "Dev", "Admin"));
        }
        assert_eq!(selector.selects.get(), 0);
        assert_eq!(portal.calls.get(), 0);
    }

    #[test]
    fn default_account_without_role_prompts_once_for_two_roles() {
        let dir = TempDir::new().unwrap();
        let history = history_in(&dir, 5);
        let portal = FakePortal::new(&[], &["ReadOnly", "Admin"]);
        let selector = ScriptedSelector::answering(&[1]);
        let mut dev = profile("dev", "us-east-1");
        dev.default_account = Some(DefaultAccount {
            account_id: "111".into(),
            account_name: "Dev".into(),
            role: String::new(),
        });

        let record = AccountRoleResolver::new(&portal, &selector, &history)
            .resolve("work", &dev, "token", ResolutionPolicy::PreferHistory)
            .unwrap();

        assert_eq!(record.role, "ReadOnly");
        assert_eq!(selector.selects.get(), 1);
        assert_eq!(selector.shown.borrow()[0], vec!["Admin", "ReadOnly"]);
    }

    #[test]
    fn two_roles_prompt_exactly_once() {
        let dir = TempDir::new().unwrap();
        let history = history_in(&dir, 5);
        let portal = FakePortal::new(&[("111", "Dev")], &["Admin", "ReadOnly"]);
        let selector = ScriptedSelector::answering(&[0]);

        let record = AccountRoleResolver::new(&portal, &selector, &history)
            .resolve("work", &profile("dev", "us-east-1"), "token", ResolutionPolicy::PreferHistory)
            .unwrap();

        assert_eq!(record, usage("111", "Dev", "Admin"));
        assert_eq!(selector.selects.get(), 1);
    }

    #[test]
    fn accounts_are_offered_sorted_by_name() {
        let dir = TempDir::new().unwrap();
        let history = history_in(&dir, 5);
        let portal = FakePortal::new(&[("222", "Prod"), ("111", "Dev")], &["Admin"]);
        let selector = ScriptedSelector::answering(&[1]);

        let record = AccountRoleResolver::new(&portal, &selector, &history)
            .resolve("work", &profile("dev", "us-east-1"), "token", ResolutionPolicy::PreferFresh)
            .unwrap();

        assert_eq!(record.account_id, "222");
        assert_eq!(selector.shown.borrow()[0], vec!["Dev (111)", "Prod (222)"]);
    }

    #[test]
    fn empty_listings_are_errors() {
        let dir = TempDir::new().unwrap();
        let history = history_in(&dir, 5);
        let selector = ScriptedSelector::default();

        let portal = FakePortal::new(&[], &["Admin"]);
        let err = AccountRoleResolver::new(&portal, &selector, &history)
            .resolve("work", &profile("dev", "us-east-1"), "token", ResolutionPolicy::PreferFresh)
            .unwrap_err();
        assert!(err.to_string().contains("no AWS accounts"));

        let portal = FakePortal::new(&[("111", "Dev")], &[]);
        let err = AccountRoleResolver::new(&portal, &selector, &history)
            .resolve("work", &profile("dev", "us-east-1"), "token", ResolutionPolicy::PreferFresh)
            .unwrap_err();
        assert!(err.to_string().contains("no roles"));
    }

    #[test]
    fn out_of_range_selection_is_rejected() {
        let dir = TempDir::new().unwrap();
        let history = history_in(&dir, 5);
        let portal = FakePortal::new(&[("111", "Dev"), ("222", "Prod")], &["Admin"]);
        let selector = ScriptedSelector::answering(&[7]);

        let err = AccountRoleResolver::new(&portal, &selector, &history)
            .resolve("work", &profile("dev", "us-east-1"), "token", ResolutionPolicy::PreferFresh)
            .unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }
}
