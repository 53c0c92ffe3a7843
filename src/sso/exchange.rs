use tracing::debug;

use super::{SsoPortal, TemporaryCredentials};
use crate::error::SsoError;

/// Exchanges an access token for the credentials of one account/role.
pub fn exchange(
    portal: &dyn SsoPortal,
    access_token: &str,
    account_id: &str,
    role_name: &str,
) -> Result<TemporaryCredentials, SsoError> {
    debug!("Requesting credentials for role {} in account {}", role_name, account_id);
    portal
        .get_role_credentials(access_token, account_id, role_name)
        .map_err(classify)
}

/// A forbidden response almost always means the SSO user has no
/// assignment for the role, so it is reported that way.
fn classify(err: SsoError) -> SsoError {
    match err {
        SsoError::Forbidden(message) => {
            debug!("Forbidden: {}", message);
            SsoError::PermissionDenied
        }
        other => other,
    }
}
