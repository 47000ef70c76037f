pub mod controls;
pub mod findings;
pub mod identity;
pub mod output;
pub mod query;
pub mod swimlanes;

use crate::{client::ApiClient, config::Config, error::ApiError};

use super::global::GlobalArgs;

/// Build the API client every subcommand shares: environment-derived
/// configuration plus the global CLI switches layered on top.
pub fn build_client(global: &GlobalArgs) -> Result<ApiClient, ApiError> {
    let mut config = Config::from_env()?;
    config.ignore_certs = global.ignore_certs;
    ApiClient::bootstrap(config)
}
