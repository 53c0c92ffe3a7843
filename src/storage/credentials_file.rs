use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::SecondsFormat;

use super::store::write_atomic;
use crate::sso::TemporaryCredentials;

const OUTPUT_FORMAT: &str = "json";

/// The shared AWS credentials file (`~/.aws/credentials`).
pub struct CredentialsFile {
    path: PathBuf,
}

impl CredentialsFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sets the credential keys of one profile section, creating the file or
    /// the section as needed. Other sections are left untouched.
    pub fn upsert(
        &self,
        profile: &str,
        region: &str,
        credentials: &TemporaryCredentials,
    ) -> Result<()> {
        if profile.trim().is_empty() {
            anyhow::bail!("profile name is empty");
        }
        if region.trim().is_empty() {
            anyhow::bail!("no region is set for profile \"{}\"", profile);
        }

        let expiration = format_expiration(credentials.expiration)?;
        let existing = if self.path.exists() {
            fs::read_to_string(&self.path)
                .with_context(|| format!("Failed to read {}", self.path.display()))?
        } else {
            String::new()
        };

        let updated = upsert_section(
            &existing,
            profile,
            &[
                ("aws_access_key_id", credentials.access_key_id.as_str()),
                ("aws_secret_access_key", credentials.secret_access_key.as_str()),
                ("aws_session_token", credentials.session_token.as_str()),
                ("output", OUTPUT_FORMAT),
                ("region", region),
                ("aws_expiration", expiration.as_str()),
            ],
        );
        write_atomic(&self.path, updated.as_bytes())
    }
}

fn format_expiration(expiration_ms: i64) -> Result<String> {
    let expires_at = chrono::DateTime::from_timestamp_millis(expiration_ms)
        .with_context(|| format!("Invalid credential expiration {}", expiration_ms))?;
    Ok(expires_at.to_rfc3339_opts(SecondsFormat::Secs, true))
}

fn section_name(line: &str) -> Option<&str> {
    let trimmed = line.trim();
    trimmed
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .map(str::trim)
}

fn key_of(line: &str) -> Option<&str> {
    let trimmed = line.trim();
    if trimmed.starts_with('#') || trimmed.starts_with(';') {
        return None;
    }
    trimmed.split_once('=').map(|(key, _)| key.trim())
}

fn push_missing(result: &mut String, entries: &[(&str, &str)], seen: &[&str]) {
    for (key, value) in entries {
        if !seen.contains(key) {
            result.push_str(&format!("{} = {}\n", key, value));
        }
    }
}

/// Updates or appends `entries` in `[section]`, line by line.
///
/// Keys missing from an existing section are added after its last non-blank
/// line. A missing section is appended at the end of the file.
pub(crate) fn upsert_section(content: &str, section: &str, entries: &[(&str, &str)]) -> String {
    let mut result = String::with_capacity(content.len() + 256);
    let mut in_target = false;
    let mut found = false;
    let mut seen: Vec<&str> = Vec::new();
    let mut pending_blank: Vec<&str> = Vec::new();

    for line in content.lines() {
        if let Some(name) = section_name(line) {
            if in_target {
                push_missing(&mut result, entries, &seen);
                seen.clear();
            }
            for blank in pending_blank.drain(..) {
                result.push_str(blank);
                result.push('\n');
            }
            in_target = name == section;
            found |= in_target;
            result.push_str(line);
            result.push('\n');
            continue;
        }

        if !in_target {
            result.push_str(line);
            result.push('\n');
            continue;
        }

        if line.trim().is_empty() {
            pending_blank.push(line);
            continue;
        }
        for blank in pending_blank.drain(..) {
            result.push_str(blank);
            result.push('\n');
        }

        match key_of(line).and_then(|key| entries.iter().find(|(k, _)| *k == key)) {
            Some((key, value)) => {
                result.push_str(&format!("{} = {}\n", key, value));
                seen.push(*key);
            }
            None => {
                result.push_str(line);
                result.push('\n');
            }
        }
    }

    if in_target {
        push_missing(&mut result, entries, &seen);
    }
    for blank in pending_blank.drain(..) {
        result.push_str(blank);
        result.push('\n');
    }

    if !found {
        if !result.is_empty() && !result.ends_with("\n\n") {
            result.push('\n');
        }
        result.push_str(&format!("[{}]\n", section));
        push_missing(&mut result, entries, &[]);
    }

    result
}
