use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{debug, info, warn};

use super::browser::open_browser;
use super::oidc::{AccessToken, ClientRegistration, DeviceAuthorization, OidcApi};
use crate::error::SsoError;
use crate::storage::{TokenCache, TokenRecord};

const SLOW_DOWN_STEP: Duration = Duration::from_secs(5);

/// Keeps a valid SSO access token per config, running the device
/// authorization grant only when the cached one has expired.
pub struct DeviceAuthorizer<'a> {
    oidc: &'a dyn OidcApi,
    cache: &'a TokenCache,
    open_browser: bool,
    sleep: fn(Duration),
}

impl<'a> DeviceAuthorizer<'a> {
    pub fn new(oidc: &'a dyn OidcApi, cache: &'a TokenCache) -> Self {
        Self {
            oidc,
            cache,
            open_browser: true,
            sleep: std::thread::sleep,
        }
    }

    /// Whether to try opening the verification URI in a browser.
    pub fn with_browser(mut self, open_browser: bool) -> Self {
        self.open_browser = open_browser;
        self
    }

    #[cfg(test)]
    fn without_delays(oidc: &'a dyn OidcApi, cache: &'a TokenCache) -> Self {
        Self {
            oidc,
            cache,
            open_browser: false,
            sleep: |_| {},
        }
    }

    /// Returns a record whose access token is valid right now.
    pub fn ensure_token(&self, config_name: &str, start_url: &str) -> Result<TokenRecord> {
        let mut record = self.cache.get(config_name);
        let now = Utc::now();

        let mut token_usable = record.is_token_valid(now) && record.start_url == start_url;

        if !record.is_client_valid(now) {
            info!("Registering a new OIDC client for config {}", config_name);
            let registration = self
                .oidc
                .register_client()
                .context("Failed to register OIDC client")?;
            apply_registration(&mut record, registration);
            token_usable = false;
            self.cache
                .put(config_name, record.clone())
                .context("Failed to save token cache")?;
        }

        if token_usable {
            debug!("Reusing cached access token for config {}", config_name);
            return Ok(record);
        }

        let authorization = self
            .oidc
            .start_device_authorization(&record.client_id, &record.client_secret, start_url)
            .context("Failed to start device authorization")?;
        self.announce(&authorization);

        let token = self.poll_for_token(&record, &authorization)?;

        record.device_code = authorization.device_code.clone();
        record.verification_uri = authorization.uri().to_string();
        record.access_token = token.access_token;
        record.access_token_expires_at = Utc::now() + chrono::Duration::seconds(token.expires_in);
        record.start_url = start_url.to_string();

        self.cache
            .put(config_name, record.clone())
            .context("Failed to save token cache")?;
        Ok(record)
    }

    fn announce(&self, authorization: &DeviceAuthorization) {
        eprintln!("Approve the sign-in request in your browser:");
        eprintln!("  {}", authorization.uri());
        if !authorization.user_code.is_empty() {
            eprintln!("  Code: {}", authorization.user_code);
        }
        if self.open_browser {
            if let Err(err) = open_browser(authorization.uri()) {
                warn!("Could not open a browser: {}", err);
            }
        }
    }

    fn poll_for_token(
        &self,
        record: &TokenRecord,
        authorization: &DeviceAuthorization,
    ) -> Result<AccessToken> {
        let deadline = Instant::now() + Duration::from_secs(authorization.expires_in);
        let mut interval = Duration::from_secs(authorization.interval);

        info!("Waiting for authorization...");
        loop {
            (self.sleep)(interval);
            match self.oidc.create_token(
                &record.client_id,
                &record.client_secret,
                &authorization.device_code,
            ) {
                Ok(token) => return Ok(token),
                Err(SsoError::AuthorizationPending) => {
                    debug!("Authorization pending");
                }
                Err(SsoError::SlowDown) => {
                    interval += SLOW_DOWN_STEP;
                    debug!("Slowing down polling to {:?}", interval);
                }
                Err(err) => return Err(err.into()),
            }
            if Instant::now() >= deadline {
                return Err(SsoError::ExpiredToken.into());
            }
        }
    }
}

fn apply_registration(record: &mut TokenRecord, registration: ClientRegistration) {
    record.client_id = registration.client_id;
    record.client_secret = registration.client_secret;
    record.client_secret_expires_at = registration.client_secret_expires_at;
    // Tokens issued to the previous client are not reused.
    record.access_token.clear();
    record.access_token_expires_at = TokenRecord::expired().access_token_expires_at;
}
