use reqwest::blocking::Response;
use serde::Deserialize;
use thiserror::Error;

/// Errors returned by the SSO OIDC and SSO portal services.
#[derive(Debug, Error)]
pub enum SsoError {
    #[error("authorization is still pending")]
    AuthorizationPending,

    #[error("polling too frequently")]
    SlowDown,

    #[error("the device code expired before the authorization was approved")]
    ExpiredToken,

    #[error("the authorization request was denied")]
    AccessDenied,

    #[error("access forbidden: {0}")]
    Forbidden(String),

    #[error(
        "you do not have permission to assume the role. Please check the account assignments in your AWS SSO configuration"
    )]
    PermissionDenied,

    #[error("the SSO access token was rejected: {0}")]
    Unauthorized(String),

    #[error("{code}: {message}")]
    Api { code: String, message: String },

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl SsoError {
    /// Maps an OAuth error string or an AWS exception name onto a variant.
    pub fn from_code(code: &str, message: String) -> Self {
        match code {
            "authorization_pending" | "AuthorizationPendingException" => Self::AuthorizationPending,
            "slow_down" | "SlowDownException" => Self::SlowDown,
            "expired_token" | "ExpiredTokenException" => Self::ExpiredToken,
            "access_denied" | "AccessDeniedException" => Self::AccessDenied,
            "ForbiddenException" => Self::Forbidden(message),
            "UnauthorizedException" => Self::Unauthorized(message),
            _ => Self::Api {
                code: code.to_string(),
                message,
            },
        }
    }
}

/// Per-profile failures collected over a multi-profile run.
#[derive(Debug, Error)]
#[error("{}", .failures.join("\n"))]
pub struct ProfileFailures {
    pub failures: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    error: Option<String>,
    error_description: Option<String>,
    #[serde(rename = "__type")]
    kind: Option<String>,
    #[serde(alias = "Message")]
    message: Option<String>,
}

/// Builds an [`SsoError`] from a non-success response.
///
/// The error code comes from the OAuth `error` field, the `__type` field, or
/// the `x-amzn-ErrorType` header, in that order.
pub(crate) fn error_from_response(response: Response) -> SsoError {
    let status = response.status();
    let header_code = response
        .headers()
        .get("x-amzn-ErrorType")
        .and_then(|value| value.to_str().ok())
        .map(|value| value.split(':').next().unwrap_or(value).to_string());
    let text = response.text().unwrap_or_default();
    let body: ErrorBody = serde_json::from_str(&text).unwrap_or_default();

    let code = body
        .error
        .or_else(|| {
            body.kind
                .map(|kind| kind.rsplit('#').next().unwrap_or(&kind).to_string())
        })
        .or(header_code)
        .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));

    let message = body
        .error_description
        .or(body.message)
        .unwrap_or_else(|| {
            if text.trim().is_empty() {
                status.canonical_reason().unwrap_or("unknown error").to_string()
            } else {
                text.trim().to_string()
            }
        });

    SsoError::from_code(&code, message)
}
