use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use tracing::info;

use super::wizard;
use crate::auth::OidcClient;
use crate::error::ProfileFailures;
use crate::prompt::{is_cancelled, InquireSelector, Selector};
use crate::session::{select_profiles, ResolutionPolicy, Session};
use crate::sso::PortalClient;
use crate::storage::{
    ConfigStore, CredentialsFile, NamedConfig, Settings, TokenCache, UsageHistory,
};

const DEFAULT_CONFIG: &str = "default";

/// Writes credentials for profiles of one config, always choosing the
/// account and role afresh unless the profile has a default account.
pub fn cmd_select(settings: &Settings, config_name: &str, profiles: &[String]) -> Result<()> {
    let selector = InquireSelector;
    let store = ConfigStore::new(settings);
    let config = load_or_configure(&store, config_name, &selector)?;
    let profiles = select_profiles(&config, profiles, &selector)?;
    run_config(settings, &config, &profiles, ResolutionPolicy::PreferFresh, &selector)
}

/// Renews credentials, reusing previously chosen accounts where possible.
pub fn cmd_refresh(settings: &Settings, config_name: Option<&str>, profiles: &[String]) -> Result<()> {
    let selector = InquireSelector;
    let store = ConfigStore::new(settings);

    if let Some(name) = config_name {
        let config = load_or_configure(&store, name, &selector)?;
        let profiles = select_profiles(&config, profiles, &selector)?;
        return run_config(settings, &config, &profiles, ResolutionPolicy::PreferHistory, &selector);
    }

    let mut configs = store.load_configs()?;
    if configs.is_empty() {
        eprintln!("No configs found. Creating \"{}\"...", DEFAULT_CONFIG);
        wizard::configure(&store, &[DEFAULT_CONFIG.to_string()], &selector)?;
        configs = store.load_configs()?;
    }

    let names: Vec<String> = configs.keys().cloned().collect();
    let chosen = selector.multi_select("Select the configs to refresh", &names, None)?;
    if chosen.is_empty() {
        bail!("no configs selected");
    }

    let mut failures = Vec::new();
    for name in chosen.into_iter().filter_map(|index| names.get(index)) {
        let Some(config) = configs.get(name) else {
            continue;
        };
        let result = select_profiles(config, &[], &selector).and_then(|profiles| {
            run_config(settings, config, &profiles, ResolutionPolicy::PreferHistory, &selector)
        });
        match result {
            Ok(()) => {}
            Err(err) if is_cancelled(&err) => return Err(err),
            Err(err) => match err.downcast::<ProfileFailures>() {
                Ok(profile_failures) => failures.extend(profile_failures.failures),
                Err(err) => failures.push(format!("{}: {:#}", name, err)),
            },
        }
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(ProfileFailures { failures }.into())
    }
}

pub fn cmd_config(settings: &Settings, names: &[String]) -> Result<()> {
    let names = or_default(names);
    wizard::configure(&ConfigStore::new(settings), &names, &InquireSelector)
}

pub fn cmd_config_import(settings: &Settings, path: &str) -> Result<()> {
    let path = expand_path(path)?;
    let count = ConfigStore::new(settings).import(&path)?;
    eprintln!("Imported {} config(s) from {}", count, path.display());
    Ok(())
}

pub fn cmd_config_export(settings: &Settings, path: &str) -> Result<()> {
    let path = expand_path(path)?;
    ConfigStore::new(settings).export(&path)?;
    eprintln!("Exported configs to {}", path.display());
    Ok(())
}

pub fn cmd_config_remove(settings: &Settings, configs: &[String], profiles: &[String]) -> Result<()> {
    let store = ConfigStore::new(settings);

    if !profiles.is_empty() {
        if configs.len() > 1 {
            bail!("when using --profile, specify at most one config name");
        }
        let name = configs.first().map_or(DEFAULT_CONFIG, String::as_str);
        store.remove_profiles(name, profiles)?;
        eprintln!("Removed {} from config {}", profiles.join(", "), name);
        return Ok(());
    }

    let names = or_default(configs);
    store.remove_configs(&names)?;
    eprintln!("Removed config(s) {}", names.join(", "));
    Ok(())
}

fn or_default(names: &[String]) -> Vec<String> {
    if names.is_empty() {
        vec![DEFAULT_CONFIG.to_string()]
    } else {
        names.to_vec()
    }
}

/// Returns the named config, running the wizard for it first when missing.
fn load_or_configure(store: &ConfigStore, name: &str, selector: &dyn Selector) -> Result<NamedConfig> {
    if let Some(config) = store.load_configs()?.remove(name) {
        return Ok(config);
    }
    eprintln!("Config \"{}\" does not exist. Creating it...", name);
    wizard::configure(store, &[name.to_string()], selector)?;
    store
        .load_configs()?
        .remove(name)
        .with_context(|| format!("config {} was not created", name))
}

fn run_config(
    settings: &Settings,
    config: &NamedConfig,
    profiles: &[String],
    policy: ResolutionPolicy,
    selector: &dyn Selector,
) -> Result<()> {
    let oidc = OidcClient::new(&config.sso_region)?;
    let portal = PortalClient::new(&config.sso_region)?;
    let tokens = TokenCache::new(settings.token_cache_path.clone());
    let history = UsageHistory::new(
        settings.usage_history_path.clone(),
        settings.last_used_accounts_count,
    );
    let credentials = CredentialsFile::new(settings.credentials_path.clone());

    Session {
        oidc: &oidc,
        portal: &portal,
        selector,
        tokens: &tokens,
        history: &history,
        credentials: &credentials,
        open_browser: true,
    }
    .run(config, profiles, policy)?;

    info!(
        "Credentials for {} written to {}",
        profiles.join(", "),
        settings.credentials_path.display()
    );
    Ok(())
}

/// Expands a leading `~` to the home directory.
fn expand_path(path: &str) -> Result<PathBuf> {
    let rest = match path.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => rest.trim_start_matches('/'),
        _ => return Ok(PathBuf::from(path)),
    };
    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(if rest.is_empty() { home } else { home.join(rest) })
}
