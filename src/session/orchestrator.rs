use anyhow::{bail, Context, Result};
use tracing::info;

use super::resolver::{AccountRoleResolver, ResolutionPolicy};
use crate::auth::{DeviceAuthorizer, OidcApi};
use crate::error::ProfileFailures;
use crate::prompt::{is_cancelled, Selector};
use crate::sso::{self, SsoPortal};
use crate::storage::{CredentialsFile, NamedConfig, TokenCache, UsageHistory};

const ALL_PROFILES: &str = "all";

/// Everything one config's credential run talks to.
pub struct Session<'a> {
    pub oidc: &'a dyn OidcApi,
    pub portal: &'a dyn SsoPortal,
    pub selector: &'a dyn Selector,
    pub tokens: &'a TokenCache,
    pub history: &'a UsageHistory,
    pub credentials: &'a CredentialsFile,
    pub open_browser: bool,
}

impl<'a> Session<'a> {
    /// Writes fresh credentials for each named profile of `config`.
    ///
    /// A failing profile does not stop the others; all failures are returned
    /// together once every profile was attempted. Cancelling a prompt stops
    /// the run immediately.
    pub fn run(&self, config: &NamedConfig, profiles: &[String], policy: ResolutionPolicy) -> Result<()> {
        let mut access_token: Option<String> = None;
        let mut failures = Vec::new();

        for name in profiles {
            match self.refresh_profile(config, name, policy, &mut access_token) {
                Ok(()) => {}
                Err(err) if is_cancelled(&err) => return Err(err),
                Err(err) => failures.push(format!("{}/{}: {:#}", config.name, name, err)),
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(ProfileFailures { failures }.into())
        }
    }

    fn refresh_profile(
        &self,
        config: &NamedConfig,
        name: &str,
        policy: ResolutionPolicy,
        access_token: &mut Option<String>,
    ) -> Result<()> {
        if name.is_empty() {
            bail!("profile name is empty");
        }
        let profile = config
            .profiles
            .get(name)
            .with_context(|| format!("profile {} is not defined in config {}", name, config.name))?;
        if profile.region.is_empty() {
            bail!("profile {} has no region configured", name);
        }

        info!("Getting credentials for profile {}", name);
        let token = match access_token {
            Some(token) => token.clone(),
            None => {
                let start_url = config.start_url();
                info!("Using start URL {}", start_url);
                let authorizer = DeviceAuthorizer::new(self.oidc, self.tokens)
                    .with_browser(self.open_browser);
                let record = authorizer.ensure_token(&config.name, &start_url)?;
                *access_token = Some(record.access_token.clone());
                record.access_token
            }
        };

        let resolver = AccountRoleResolver::new(self.portal, self.selector, self.history);
        let usage = resolver.resolve(&config.name, profile, &token, policy)?;

        let credentials = sso::exchange(self.portal, &token, &usage.account_id, &usage.role)?;
        info!(
            "Retrieved credentials for account {} [{}]",
            usage.account_name, usage.account_id
        );
        info!("Assumed role {}", usage.role);
        if let Some(expires_at) = credentials.expires_at() {
            info!("Credentials expire at {}", expires_at.with_timezone(&chrono::Local));
        }

        self.credentials
            .upsert(name, &profile.region, &credentials)
            .with_context(|| format!("Failed to write {}", self.credentials.path().display()))?;
        self.history
            .record_usage(&config.name, usage)
            .context("Failed to save usage history")?;
        Ok(())
    }
}

/// Turns the profile arguments of a command into concrete profile names.
///
/// No names means the operator picks from the config's profiles; the single
/// name `all` means every profile.
pub fn select_profiles(
    config: &NamedConfig,
    requested: &[String],
    selector: &dyn Selector,
) -> Result<Vec<String>> {
    let names: Vec<String> = config.profiles.keys().cloned().collect();

    if requested.len() == 1 && requested[0] == ALL_PROFILES {
        return Ok(names);
    }

    if !requested.is_empty() {
        let unknown: Vec<&str> = requested
            .iter()
            .filter(|name| !config.profiles.contains_key(name.as_str()))
            .map(String::as_str)
            .collect();
        if !unknown.is_empty() {
            bail!(
                "unknown profile(s) {} in config {}",
                unknown.join(", "),
                config.name
            );
        }
        return Ok(requested.to_vec());
    }

    if names.is_empty() {
        bail!("config {} has no profiles", config.name);
    }
    let chosen = selector.multi_select("Select profiles", &names, None)?;
    if chosen.is_empty() {
        bail!("no profiles selected");
    }
    Ok(chosen.into_iter().filter_map(|index| names.get(index).cloned()).collect())
}
