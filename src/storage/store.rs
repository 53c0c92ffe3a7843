use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tempfile::NamedTempFile;

use super::types::*;

const APP_DIR: &str = "ssox";
const CONFIG_FILE: &str = "config.toml";
const CACHE_DIR: &str = "cache";
const TOKEN_CACHE_FILE: &str = "access-token.json";
const USAGE_HISTORY_FILE: &str = "last-usage.json";

pub const DEFAULT_LAST_USED_ACCOUNTS: usize = 5;

/// File locations and tunables, built once at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub config_dir: PathBuf,
    pub config_path: PathBuf,
    pub token_cache_path: PathBuf,
    pub usage_history_path: PathBuf,
    pub credentials_path: PathBuf,
    pub last_used_accounts_count: usize,
}

impl Settings {
    pub fn new(config_dir: Option<PathBuf>, credentials_path: Option<PathBuf>) -> Result<Self> {
        let config_dir = match config_dir {
            Some(dir) => dir,
            None => dirs::config_dir()
                .context("Could not determine config directory")?
                .join(APP_DIR),
        };
        let credentials_path = match credentials_path {
            Some(path) => path,
            None => dirs::home_dir()
                .context("Could not determine home directory")?
                .join(".aws")
                .join("credentials"),
        };
        Ok(Self::in_dir(config_dir, credentials_path))
    }

    pub fn in_dir(config_dir: PathBuf, credentials_path: PathBuf) -> Self {
        let cache_dir = config_dir.join(CACHE_DIR);
        Self {
            config_path: config_dir.join(CONFIG_FILE),
            token_cache_path: cache_dir.join(TOKEN_CACHE_FILE),
            usage_history_path: cache_dir.join(USAGE_HISTORY_FILE),
            config_dir,
            credentials_path,
            last_used_accounts_count: DEFAULT_LAST_USED_ACCOUNTS,
        }
    }
}

/// Replaces `path` with `contents` through a temp file in the same directory.
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)
        .with_context(|| format!("Failed to create directory {}", parent.display()))?;

    let mut temp = NamedTempFile::new_in(parent)
        .with_context(|| format!("Failed to create temp file in {}", parent.display()))?;
    temp.write_all(contents)
        .with_context(|| format!("Failed to write temp file for {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        temp.as_file()
            .set_permissions(fs::Permissions::from_mode(0o600))?;
    }

    temp.persist(path)
        .map_err(|err| err.error)
        .with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}

/// Reads and writes the config document (no secrets).
pub struct ConfigStore {
    config_dir: PathBuf,
    config_path: PathBuf,
}

impl ConfigStore {
    pub fn new(settings: &Settings) -> Self {
        Self {
            config_dir: settings.config_dir.clone(),
            config_path: settings.config_path.clone(),
        }
    }

    pub fn load(&self) -> Result<ConfigFile> {
        if !self.config_path.exists() {
            return Ok(ConfigFile::default());
        }
        let contents = fs::read_to_string(&self.config_path)
            .with_context(|| format!("Failed to read {}", self.config_path.display()))?;
        parse_config(&contents)
            .with_context(|| format!("Invalid config file {}", self.config_path.display()))
    }

    pub fn load_configs(&self) -> Result<BTreeMap<String, NamedConfig>> {
        Ok(self.load()?.configs)
    }

    /// Writes `input`, keeping only complete configs. An incomplete config
    /// falls back to whatever was already on disk under the same name.
    pub fn save_configs(&self, input: BTreeMap<String, NamedConfig>) -> Result<()> {
        let existing = self.load().unwrap_or_default();

        let mut configs = BTreeMap::new();
        for (name, config) in input {
            if config.complete {
                configs.insert(name, config);
            } else if let Some(config) = existing.configs.get(&name) {
                configs.insert(name, config.clone());
            }
        }

        let file = ConfigFile {
            version: env!("CARGO_PKG_VERSION").to_string(),
            last_used_accounts_count: existing.last_used_accounts_count,
            configs,
        };
        let contents = toml::to_string_pretty(&file)?;
        write_atomic(&self.config_path, contents.as_bytes())
    }

    /// Merges the configs of another config document into this one.
    pub fn import(&self, path: &Path) -> Result<usize> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let imported = parse_config(&contents)
            .with_context(|| format!("Invalid config file {}", path.display()))?;

        let count = imported.configs.len();
        let mut configs = self.load_configs()?;
        configs.extend(imported.configs);
        self.save_configs(configs)?;
        Ok(count)
    }

    pub fn export(&self, path: &Path) -> Result<()> {
        if !self.config_path.exists() {
            anyhow::bail!("No config file at {}", self.config_path.display());
        }
        let contents = fs::read_to_string(&self.config_path)?;
        parse_config(&contents)
            .with_context(|| format!("Invalid config file {}", self.config_path.display()))?;
        write_atomic(path, contents.as_bytes())
    }

    pub fn remove_configs(&self, names: &[String]) -> Result<()> {
        let mut configs = self.load_configs()?;
        for name in names {
            configs.remove(name);
        }
        self.save_or_clear(configs)
    }

    pub fn remove_profiles(&self, config_name: &str, profiles: &[String]) -> Result<()> {
        let mut configs = self.load_configs()?;
        let Some(config) = configs.get_mut(config_name) else {
            return Ok(());
        };
        for profile in profiles {
            config.profiles.remove(profile);
        }
        if config.profiles.is_empty() {
            configs.remove(config_name);
        }
        self.save_or_clear(configs)
    }

    fn save_or_clear(&self, configs: BTreeMap<String, NamedConfig>) -> Result<()> {
        if configs.is_empty() {
            if self.config_dir.exists() {
                fs::remove_dir_all(&self.config_dir).with_context(|| {
                    format!("Failed to remove {}", self.config_dir.display())
                })?;
            }
            return Ok(());
        }
        self.save_configs(configs)
    }
}

fn parse_config(contents: &str) -> Result<ConfigFile> {
    let mut file: ConfigFile = toml::from_str(contents)?;
    for (name, config) in file.configs.iter_mut() {
        config.assign_names(name);
        config.complete = true;
    }
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> ConfigStore {
        let settings = Settings::in_dir(dir.path().join("ssox"), dir.path().join("credentials"));
        ConfigStore::new(&settings)
    }

    fn config(id: &str, profiles: &[(&str, &str)]) -> NamedConfig {
        NamedConfig {
            id: id.into(),
            sso_region: "eu-west-1".into(),
            profiles: profiles
                .iter()
                .map(|(name, region)| {
                    (
                        name.to_string(),
                        Profile {
                            region: region.to_string(),
                            ..Default::default()
                        },
                    )
                })
                .collect(),
            complete: true,
            ..Default::default()
        }
    }

    #[test]
    fn settings_lay_out_cache_under_config_dir() {
        let settings = Settings::in_dir(PathBuf::from("/cfg"), PathBuf::from("/aws/credentials"));
        assert_eq!(settings.config_path, PathBuf::from("/cfg/config.toml"));
        assert_eq!(
            settings.token_cache_path,
            PathBuf::from("/cfg/cache/access-token.json")
        );
        assert_eq!(
            settings.usage_history_path,
            PathBuf::from("/cfg/cache/last-usage.json")
        );
        assert_eq!(settings.last_used_accounts_count, DEFAULT_LAST_USED_ACCOUNTS);
    }

    #[test]
    fn missing_config_file_loads_empty() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        assert!(store.load_configs().unwrap().is_empty());
    }

    #[test]
    fn saved_configs_round_trip_with_names() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        let mut configs = BTreeMap::new();
        configs.insert("work".to_string(), config("acme", &[("dev", "us-east-1")]));
        store.save_configs(configs).unwrap();

        let loaded = store.load_configs().unwrap();
        let work = &loaded["work"];
        assert_eq!(work.name, "work");
        assert!(work.complete);
        assert_eq!(work.profiles["dev"].name, "dev");
        assert_eq!(work.profiles["dev"].region, "us-east-1");
    }

    #[test]
    fn incomplete_configs_keep_their_saved_version() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        let mut configs = BTreeMap::new();
        configs.insert("work".to_string(), config("acme", &[("dev", "us-east-1")]));
        store.save_configs(configs).unwrap();

        let mut edited = config("other", &[]);
        edited.complete = false;
        let mut configs = BTreeMap::new();
        configs.insert("work".to_string(), edited);
        let mut fresh = config("new", &[]);
        fresh.complete = false;
        configs.insert("fresh".to_string(), fresh);
        store.save_configs(configs).unwrap();

        let loaded = store.load_configs().unwrap();
        assert_eq!(loaded["work"].id, "acme");
        assert!(!loaded.contains_key("fresh"));
    }

    #[test]
    fn removing_last_profile_drops_config_and_directory() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        let mut configs = BTreeMap::new();
        configs.insert(
            "work".to_string(),
            config("acme", &[("dev", "us-east-1"), ("prod", "eu-west-1")]),
        );
        store.save_configs(configs).unwrap();

        store
            .remove_profiles("work", &["dev".to_string()])
            .unwrap();
        let loaded = store.load_configs().unwrap();
        assert_eq!(loaded["work"].profiles.len(), 1);

        store
            .remove_profiles("work", &["prod".to_string()])
            .unwrap();
        assert!(!dir.path().join("ssox").exists());
    }

    #[test]
    fn import_merges_and_export_copies() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        let mut configs = BTreeMap::new();
        configs.insert("work".to_string(), config("acme", &[("dev", "us-east-1")]));
        store.save_configs(configs).unwrap();

        let import_path = dir.path().join("import.toml");
        fs::write(
            &import_path,
            "[configs.home]\nid = \"home\"\nsso_region = \"us-east-1\"\n\n[configs.home.profiles.default]\nregion = \"us-west-2\"\n",
        )
        .unwrap();
        assert_eq!(store.import(&import_path).unwrap(), 1);

        let loaded = store.load_configs().unwrap();
        assert!(loaded.contains_key("work"));
        assert_eq!(loaded["home"].profiles["default"].region, "us-west-2");

        let export_path = dir.path().join("export.toml");
        store.export(&export_path).unwrap();
        assert_eq!(
            fs::read_to_string(&export_path).unwrap(),
            fs::read_to_string(dir.path().join("ssox").join("config.toml")).unwrap()
        );
    }

    #[test]
    fn import_rejects_invalid_documents() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let import_path = dir.path().join("broken.toml");
        fs::write(&import_path, "configs = [").unwrap();
        assert!(store.import(&import_path).is_err());
    }

    #[test]
    fn atomic_write_creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a").join("b").join("file.json");
        write_atomic(&path, b"{}").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "{}");
        write_atomic(&path, b"[]").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "[]");
    }
}
