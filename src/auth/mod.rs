pub mod browser;
pub mod device_flow;
pub mod oidc;

pub use device_flow::DeviceAuthorizer;
pub use oidc::{OidcApi, OidcClient};
