//! HTTP client for the AWS SSO portal API.

use std::time::Duration;

use anyhow::Result;
use reqwest::blocking::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use super::{AccountInfo, RoleInfo, SsoPortal, TemporaryCredentials};
use crate::error::{error_from_response, SsoError};

const BEARER_HEADER: &str = "x-amz-sso_bearer_token";
const PAGE_SIZE: &str = "100";

pub fn portal_endpoint(region: &str) -> String {
    format!("https://portal.sso.{}.amazonaws.com", region)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountPage {
    #[serde(default)]
    account_list: Vec<AccountInfo>,
    next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RolePage {
    #[serde(default)]
    role_list: Vec<RoleInfo>,
    next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RoleCredentialsResponse {
    role_credentials: Option<TemporaryCredentials>,
}

pub struct PortalClient {
    http: Client,
    base_url: String,
}

impl PortalClient {
    pub fn new(region: &str) -> Result<Self> {
        Self::with_base_url(portal_endpoint(region))
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

    fn get<R: DeserializeOwned>(
        &self,
        path: &str,
        access_token: &str,
        query: &[(&str, &str)],
    ) -> Result<R, SsoError> {
        debug!("GET {}{}", self.base_url, path);
        let response = self
            .http
            .get(format!("{}{}", self.base_url, path))
            .header(BEARER_HEADER, access_token)
            .query(query)
            .send()?;

        if !response.status().is_success() {
            return Err(error_from_response(response));
        }
        Ok(response.json()?)
    }
}

impl SsoPortal for PortalClient {
    fn list_accounts(&self, access_token: &str) -> Result<Vec<AccountInfo>, SsoError> {
        let mut accounts = Vec::new();
        let mut next_token: Option<String> = None;
        loop {
            let mut query = vec![("max_result", PAGE_SIZE)];
            if let Some(token) = next_token.as_deref() {
                query.push(("next_token", token));
            }
            let page: AccountPage = self.get("/assignment/accounts", access_token, &query)?;
            accounts.extend(page.account_list);
            match page.next_token.filter(|token| !token.is_empty()) {
                Some(token) => next_token = Some(token),
                None => break,
            }
        }
        debug!("Found {} accounts", accounts.len());
        Ok(accounts)
    }

    fn list_account_roles(
        &self,
        access_token: &str,
        account_id: &str,
    ) -> Result<Vec<RoleInfo>, SsoError> {
        let mut roles = Vec::new();
        let mut next_token: Option<String> = None;
        loop {
            let mut query = vec![("account_id", account_id), ("max_result", PAGE_SIZE)];
            if let Some(token) = next_token.as_deref() {
                query.push(("next_token", token));
            }
            let page: RolePage = self.get("/assignment/roles", access_token, &query)?;
            roles.extend(page.role_list);
            match page.next_token.filter(|token| !token.is_empty()) {
                Some(token) => next_token = Some(token),
                None => break,
            }
        }
        debug!("Found {} roles for account {}", roles.len(), account_id);
        Ok(roles)
    }

    fn get_role_credentials(
        &self,
        access_token: &str,
        account_id: &str,
        role_name: &str,
    ) -> Result<TemporaryCredentials, SsoError> {
        let response: RoleCredentialsResponse = self.get(
            "/federation/credentials",
            access_token,
            &[("account_id", account_id), ("role_name", role_name)],
        )?;
        response.role_credentials.ok_or_else(|| SsoError::Api {
            code: "EmptyResponse".into(),
            message: format!(
                "no credentials returned for role {} in account {}",
                role_name, account_id
            ),
        })
    }
}
