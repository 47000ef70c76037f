use std::{env, path::PathBuf, time::Duration};

use crate::error::ApiError;

/// Environment variables recognized by every subcommand.
pub const ENV_TOKEN: &str = "TOKEN";
pub const ENV_API_SERVER: &str = "SONRAI_API_SERVER";
pub const ENV_TOKEN_STORE: &str = "SONRAI_API_TOKENSTORE";
pub const ENV_TOKEN_FILE: &str = "SONRAI_API_TOKENFILE";
pub const ENV_REFRESH_THRESHOLD: &str = "SONRAI_TOKEN_REFRESH_SECS";
pub const ENV_RENEW_LIFETIME: &str = "SONRAI_TOKEN_RENEW_SECS";

/// Minimum refresh window is 30 minutes; anything shorter risks tokens
/// expiring between checks.
pub const REFRESH_THRESHOLD_MIN_SECS: i64 = 1_800;
/// Maximum refresh window is 30 days; anything longer renews on every run.
pub const REFRESH_THRESHOLD_MAX_SECS: i64 = 2_592_000;
/// API tokens must be issued for at least 2 hours.
pub const RENEW_LIFETIME_MIN_SECS: i64 = 7_200;
/// And at most 30 days.
pub const RENEW_LIFETIME_MAX_SECS: i64 = 2_592_000;

const DEFAULT_TOKEN_STORE: &str = "/tmp/sonrai";
const DEFAULT_TOKEN_FILE: &str = "token";
const DEFAULT_REFRESH_THRESHOLD_SECS: i64 = 21_600;
const DEFAULT_RENEW_LIFETIME_SECS: i64 = 86_400;

/// Runtime configuration resolved once per process from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Explicit API host override; when set the token's org/env claims are
    /// not consulted for endpoint resolution.
    pub api_server: Option<String>,
    /// Directory holding the persisted token file.
    pub token_store_dir: PathBuf,
    /// Filename of the persisted token inside `token_store_dir`.
    pub token_store_file: String,
    /// Renew when remaining lifetime drops under this window.
    pub refresh_threshold_secs: i64,
    /// Lifetime requested for renewed tokens.
    pub renew_lifetime_secs: i64,
    /// Transport retry budget per request.
    pub max_attempts: u32,
    /// Fixed delay between transport retry attempts.
    pub transport_retry_delay: Duration,
    /// Delay between page-level retry attempts in the pagination driver.
    pub page_retry_delay: Duration,
    /// Pause after an HTTP 500 to let the server recover before the caller
    /// inspects the body.
    pub server_error_pause: Duration,
    /// Per-request HTTP timeout.
    pub request_timeout: Duration,
    /// Skip TLS certificate validation (self-signed proxies).
    pub ignore_certs: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_server: None,
            token_store_dir: PathBuf::from(DEFAULT_TOKEN_STORE),
            token_store_file: DEFAULT_TOKEN_FILE.to_string(),
            refresh_threshold_secs: DEFAULT_REFRESH_THRESHOLD_SECS,
            renew_lifetime_secs: DEFAULT_RENEW_LIFETIME_SECS,
            max_attempts: 10,
            transport_retry_delay: Duration::from_secs(5),
            page_retry_delay: Duration::from_secs(60),
            server_error_pause: Duration::from_secs(9),
            request_timeout: Duration::from_secs(120),
            ignore_certs: false,
        }
    }
}

impl Config {
    /// Resolve configuration from the environment. Unparseable numeric
    /// variables are fatal here, before any network activity.
    pub fn from_env() -> Result<Self, ApiError> {
        let mut config = Config::default();

        if let Ok(server) = env::var(ENV_API_SERVER) {
            let server = server.trim().to_string();
            if !server.is_empty() {
                config.api_server = Some(server);
            }
        }
        if let Ok(dir) = env::var(ENV_TOKEN_STORE) {
            config.token_store_dir = PathBuf::from(dir);
        }
        if let Ok(file) = env::var(ENV_TOKEN_FILE) {
            config.token_store_file = file;
        }
        if let Some(secs) = parse_secs(ENV_REFRESH_THRESHOLD)? {
            config.refresh_threshold_secs = clamp_refresh_threshold(secs);
        }
        if let Some(secs) = parse_secs(ENV_RENEW_LIFETIME)? {
            config.renew_lifetime_secs = clamp_renew_lifetime(secs);
        }

        Ok(config)
    }

    /// Full path of the persisted token file.
    pub fn token_path(&self) -> PathBuf {
        self.token_store_dir.join(&self.token_store_file)
    }
}

fn parse_secs(var: &str) -> Result<Option<i64>, ApiError> {
    match env::var(var) {
        Ok(raw) => raw
            .trim()
            .parse::<i64>()
            .map(Some)
            .map_err(|_| ApiError::Config(format!("{var} must be an integer number of seconds, got {raw:?}"))),
        Err(_) => Ok(None),
    }
}

/// Clamp a refresh threshold to [30 minutes, 30 days]. Idempotent.
pub fn clamp_refresh_threshold(secs: i64) -> i64 {
    secs.clamp(REFRESH_THRESHOLD_MIN_SECS, REFRESH_THRESHOLD_MAX_SECS)
}

/// Clamp a requested renewal lifetime to [2 hours, 30 days]. Idempotent.
pub fn clamp_renew_lifetime(secs: i64) -> i64 {
    secs.clamp(RENEW_LIFETIME_MIN_SECS, RENEW_LIFETIME_MAX_SECS)
}
