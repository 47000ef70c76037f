#![allow(dead_code)]

use std::time::Duration;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::Utc;
use sonraictl::{
    claims::DecodeOptions,
    client::{ApiClient, TokenManager},
    config::Config,
    token_store::TokenStore,
};
use tempfile::TempDir;
use url::Url;

/// Build an unsigned-but-JWT-shaped token whose expiry is `exp_offset`
/// seconds from now.
pub fn make_token(exp_offset: i64) -> String {
    let now = Utc::now().timestamp();
    let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"RS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(
        serde_json::json!({
            "https://sonraisecurity.com/org": "acme",
            "https://sonraisecurity.com/orgs": ["acme"],
            "https://sonraisecurity.com/env": "prod",
            "aud": "crc-graphql-server.sonraisecurity.com",
            "iss": "https://sonraisecurity.auth0.com/",
            "iat": now - 60,
            "exp": now + exp_offset,
        })
        .to_string(),
    );
    format!("{header}.{payload}.testsig")
}

/// Config with millisecond-scale pauses so retry paths don't stall tests.
pub fn test_config() -> Config {
    Config {
        max_attempts: 10,
        transport_retry_delay: Duration::from_millis(5),
        page_retry_delay: Duration::from_millis(5),
        server_error_pause: Duration::from_millis(5),
        request_timeout: Duration::from_secs(5),
        ..Config::default()
    }
}

/// Client over a file-backed token store pointed at a local mock server.
pub fn client_for(config: Config, server_uri: &str, token: &str, dir: &TempDir) -> ApiClient {
    let store = TokenStore::file(dir.path().join("token"));
    store.save(token).expect("seeding the token store");
    let manager = TokenManager::new(store, token.to_string(), DecodeOptions::default())
        .expect("decoding the test token");
    let url = Url::parse(&format!("{server_uri}/graphql")).expect("mock server URL");
    ApiClient::with_url(config, manager, url).expect("building the test client")
}
