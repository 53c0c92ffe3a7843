//! HTTP client for the AWS SSO OIDC service.

use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use reqwest::blocking::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{error_from_response, SsoError};

pub const DEVICE_CODE_GRANT: &str = "urn:ietf:params:oauth:grant-type:device_code";
const CLIENT_NAME: &str = "ssox";
const CLIENT_TYPE: &str = "public";

pub fn oidc_endpoint(region: &str) -> String {
    format!("https://oidc.{}.amazonaws.com", region)
}

#[derive(Debug, Clone)]
pub struct ClientRegistration {
    pub client_id: String,
    pub client_secret: String,
    pub client_secret_expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceAuthorization {
    pub device_code: String,
    #[serde(default)]
    pub user_code: String,
    #[serde(default)]
    pub verification_uri: String,
    #[serde(default)]
    pub verification_uri_complete: Option<String>,
    /// Seconds until the device code expires.
    pub expires_in: u64,
    /// Seconds to wait between token polls.
    #[serde(default = "default_interval")]
    pub interval: u64,
}

impl DeviceAuthorization {
    /// The URI the operator should open, with the user code when available.
    pub fn uri(&self) -> &str {
        self.verification_uri_complete
            .as_deref()
            .unwrap_or(&self.verification_uri)
    }
}

fn default_interval() -> u64 {
    5
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessToken {
    pub access_token: String,
    /// Seconds until the access token expires.
    pub expires_in: i64,
}

/// The three OIDC calls of the device-authorization grant.
pub trait OidcApi {
    fn register_client(&self) -> Result<ClientRegistration, SsoError>;
    fn start_device_authorization(
        &self,
        client_id: &str,
        client_secret: &str,
        start_url: &str,
    ) -> Result<DeviceAuthorization, SsoError>;
    fn create_token(
        &self,
        client_id: &str,
        client_secret: &str,
        device_code: &str,
    ) -> Result<AccessToken, SsoError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RegisterClientRequest<'a> {
    client_name: &'a str,
    client_type: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterClientResponse {
    client_id: String,
    client_secret: String,
    client_secret_expires_at: i64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StartDeviceAuthorizationRequest<'a> {
    client_id: &'a str,
    client_secret: &'a str,
    start_url: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateTokenRequest<'a> {
    client_id: &'a str,
    client_secret: &'a str,
    grant_type: &'a str,
    device_code: &'a str,
}

pub struct OidcClient {
    http: Client,
    base_url: String,
}

impl OidcClient {
    pub fn new(region: &str) -> Result<Self> {
        Self::with_base_url(oidc_endpoint(region))
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("ssox/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn post<B: Serialize, R: DeserializeOwned>(&self, path: &str, body: &B) -> Result<R, SsoError> {
        debug!("POST {}{}", self.base_url, path);
        let response = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .json(body)
            .send()?;

        if !response.status().is_success() {
            return Err(error_from_response(response));
        }
        Ok(response.json()?)
    }
}

impl OidcApi for OidcClient {
    fn register_client(&self) -> Result<ClientRegistration, SsoError> {
        let response: RegisterClientResponse = self.post(
            "/client/register",
            &RegisterClientRequest {
                client_name: CLIENT_NAME,
                client_type: CLIENT_TYPE,
            },
        )?;
        let expires_at = DateTime::from_timestamp(response.client_secret_expires_at, 0)
            .ok_or_else(|| SsoError::Api {
                code: "InvalidResponse".into(),
                message: format!(
                    "invalid clientSecretExpiresAt {}",
                    response.client_secret_expires_at
                ),
            })?;
        Ok(ClientRegistration {
            client_id: response.client_id,
            client_secret: response.client_secret,
            client_secret_expires_at: expires_at,
        })
    }

    fn start_device_authorization(
        &self,
        client_id: &str,
        client_secret: &str,
        start_url: &str,
    ) -> Result<DeviceAuthorization, SsoError> {
        self.post(
            "/device_authorization",
            &StartDeviceAuthorizationRequest {
                client_id,
                client_secret,
                start_url,
            },
        )
    }

    fn create_token(
        &self,
        client_id: &str,
        client_secret: &str,
        device_code: &str,
    ) -> Result<AccessToken, SsoError> {
        self.post(
            "/token",
            &CreateTokenRequest {
                client_id,
                client_secret,
                grant_type: DEVICE_CODE_GRANT,
                device_code,
            },
        )
    }
}
