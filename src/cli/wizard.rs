use std::collections::BTreeMap;

use anyhow::Result;
use tracing::warn;

use crate::prompt::Selector;
use crate::storage::{ConfigStore, DefaultAccount, NamedConfig, Profile};

const YES_NO: [&str; 2] = ["Yes", "No"];

/// Interactively (re)defines each named config and saves the result.
///
/// A config is only written once its id, SSO region and at least one profile
/// were given; otherwise the version already on disk is kept.
pub fn configure(store: &ConfigStore, names: &[String], selector: &dyn Selector) -> Result<()> {
    let mut configs = match store.load_configs() {
        Ok(configs) => configs,
        Err(err) => {
            warn!("Starting from an empty config: {:#}", err);
            BTreeMap::new()
        }
    };

    for name in names.iter().filter(|name| !name.is_empty()) {
        eprintln!("Configuring {}", name);
        let mut config = configs.remove(name).unwrap_or_default();
        config.complete = edit_config(&mut config, selector)?;
        if !config.complete {
            warn!("Config {} was not saved", name);
        }
        config.assign_names(name);
        configs.insert(name.clone(), config);
    }

    store.save_configs(configs)
}

fn edit_config(config: &mut NamedConfig, selector: &dyn Selector) -> Result<bool> {
    config.id = selector.prompt("Start URL id", &config.id)?;
    if config.id.is_empty() {
        warn!("Start URL id cannot be empty");
        return Ok(false);
    }

    config.sso_region = selector.prompt("SSO region", &config.sso_region)?;
    if config.sso_region.is_empty() {
        warn!("SSO region cannot be empty");
        return Ok(false);
    }

    let mut suggestions: Vec<String> = config.profiles.keys().cloned().collect();
    let mut configured = 0;
    loop {
        let suggestion = suggestions.first().map_or("default", String::as_str);
        let profile_name = selector.prompt("Profile name to configure", suggestion)?;
        if profile_name.is_empty() {
            warn!("Profile name cannot be empty");
            break;
        }
        suggestions.retain(|name| name != &profile_name);

        let current_region = config
            .profiles
            .get(&profile_name)
            .map(|profile| profile.region.clone())
            .unwrap_or_default();
        let region = selector.prompt("Default profile region", &current_region)?;
        if region.is_empty() {
            warn!("Region cannot be empty");
            break;
        }

        let default_account = if ask(selector, "Configure a default account for this profile?")? {
            prompt_default_account(selector)?
        } else {
            None
        };
        config.profiles.insert(
            profile_name.clone(),
            Profile {
                region,
                default_account,
                name: profile_name,
            },
        );
        configured += 1;

        if !ask(selector, "Add another profile to this config?")? {
            break;
        }
    }

    Ok(configured > 0)
}

fn prompt_default_account(selector: &dyn Selector) -> Result<Option<DefaultAccount>> {
    let account_id = selector.prompt("Default account id for this profile", "")?;
    if account_id.is_empty() {
        warn!("Default account id cannot be empty");
        return Ok(None);
    }
    let account_name = selector.prompt("Default account name for this profile", "")?;
    if account_name.is_empty() {
        warn!("Default account name cannot be empty");
        return Ok(None);
    }
    let role = selector.prompt("Default role for this profile (optional)", "")?;
    Ok(Some(DefaultAccount {
        account_id,
        account_name,
        role,
    }))
}

fn ask(selector: &dyn Selector, question: &str) -> Result<bool> {
    let choices: Vec<String> = YES_NO.iter().map(|s| s.to_string()).collect();
    Ok(selector.select(question, &choices, None)? == 0)
}
