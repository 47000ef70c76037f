use reqwest::header::{CACHE_CONTROL, HeaderMap, HeaderValue};
use serde_json::{json, Value};
use tokio::time::sleep;
use tracing::{debug, error, info};
use url::Url;

use crate::{
    claims::{Claims, DecodeOptions},
    config::Config,
    endpoint,
    error::ApiError,
    retry::retry_fixed,
    token_store::{prompt_for_token, TokenStore},
};

/// Backend data-fetch fault marker. Shows up in otherwise-successful bodies
/// when a query exceeds the server-side result limit.
const GRPC_FAULT_MARKER: &str = "Unexpected exception while fetching Grpc data";

/// query-name tag the server logs for renewal traffic.
const RENEW_QUERY_NAME: &str = "SonraiAPIClient_TokenRenew";

const RENEW_MUTATION: &str = "\
mutation renewToken($expiresIn: Long) {
  GenerateSonraiUserToken(input: {expiresIn: $expiresIn, name: \"sonraictlToken\"}) {
    expireAt
    token
  }
}";

/// Owns the current token, its decoded claims, and the store it came from.
///
/// Constructed once per process and carried by the [`ApiClient`]; renewals
/// flow through [`TokenManager::install`] so the persisted copy can never
/// drift from the one in use.
#[derive(Debug)]
pub struct TokenManager {
    store: TokenStore,
    token: String,
    claims: Claims,
    decode_opts: DecodeOptions,
}

impl TokenManager {
    pub fn new(store: TokenStore, token: String, decode_opts: DecodeOptions) -> Result<Self, ApiError> {
        let claims = Claims::decode(&token, &decode_opts)?;
        Ok(Self { store, token, claims, decode_opts })
    }

    pub fn bearer(&self) -> &str {
        &self.token
    }

    pub fn claims(&self) -> &Claims {
        &self.claims
    }

    /// Adopt a freshly issued token: decode it, persist it to the store the
    /// previous token came from, then swap it in.
    fn install(&mut self, token: &str) -> Result<(), ApiError> {
        let claims = Claims::decode(token, &self.decode_opts)?;
        self.store.save(token)?;
        self.token = token.trim().to_string();
        self.claims = claims;
        Ok(())
    }
}

/// GraphQL API client: endpoint, HTTP transport, token lifecycle.
///
/// Strictly sequential: one request in flight at a time, renewal included.
/// All calls go through [`ApiClient::execute`], which checks token freshness
/// first and renews transparently inside the refresh window.
pub struct ApiClient {
    http: reqwest::Client,
    config: Config,
    url: Url,
    token: TokenManager,
}

impl ApiClient {
    /// Standard construction path: locate the credential store, load the
    /// token (prompting on stdin in interactive contexts), resolve the
    /// endpoint from the claims or the configured override.
    pub fn bootstrap(config: Config) -> Result<Self, ApiError> {
        let store = TokenStore::locate(&config);
        let token = match store.load()? {
            Some(token) => token,
            None => {
                error!("no API token found; see https://docs.sonraisecurity.com/api/sonrai-graphql-api");
                let token = prompt_for_token()?;
                store.save(&token)?;
                token
            }
        };
        let manager = TokenManager::new(store, token, DecodeOptions::default())?;
        let url = endpoint::resolve(manager.claims(), config.api_server.as_deref())?;
        Self::with_url(config, manager, url)
    }

    /// Construct against an explicit endpoint, skipping resolution. Also the
    /// seam the integration tests use to point the client at a local server.
    pub fn with_url(config: Config, token: TokenManager, url: Url) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .danger_accept_invalid_certs(config.ignore_certs)
            .build()
            .map_err(|e| ApiError::Config(format!("failed to build HTTP client: {e}")))?;
        debug!("API server: {url}");
        Ok(Self { http, config, url, token })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn token(&self) -> &TokenManager {
        &self.token
    }

    /// Execute one GraphQL request and return the decoded body.
    ///
    /// Renews the token first when it is inside the refresh window. A
    /// returned body may still carry a GraphQL `errors` array — that is the
    /// caller's concern; see [`graphql_errors`].
    pub async fn execute(&mut self, query: &str, variables: Value, query_name: &str) -> Result<Value, ApiError> {
        self.ensure_fresh().await?;
        self.post(query, &variables, query_name).await
    }

    /// Renew the current token and persist the replacement.
    ///
    /// Requires a currently-valid token to authorize the mutation: an
    /// expired token cannot be renewed, only replaced by hand.
    pub async fn renew(&mut self) -> Result<(), ApiError> {
        if self.token.claims().is_expired() {
            return Err(ApiError::Renewal("token already expired and cannot authorize a renewal".into()));
        }
        debug!("renewing token");
        let variables = json!({ "expiresIn": self.config.renew_lifetime_secs });
        let body = self.post(RENEW_MUTATION, &variables, RENEW_QUERY_NAME).await?;
        if let Some(errors) = graphql_errors(&body) {
            return Err(ApiError::Renewal(errors));
        }
        let new_token = body
            .pointer("/data/GenerateSonraiUserToken/token")
            .and_then(Value::as_str)
            .ok_or_else(|| ApiError::Renewal("renewal response carried no token".into()))?
            .to_string();
        info!("storing renewed token");
        self.token.install(&new_token)?;
        Ok(())
    }

    async fn ensure_fresh(&mut self) -> Result<(), ApiError> {
        let claims = self.token.claims();
        let remaining = claims.remaining_lifetime().num_seconds();
        if claims.is_expired() {
            debug!("token expired {}s ago, cannot be renewed", -remaining);
            return Err(ApiError::TokenExpired);
        }
        if claims.is_expiring(self.config.refresh_threshold_secs) {
            debug!("token near expiration ({remaining}s remaining), renewing");
            self.renew().await?;
        }
        Ok(())
    }

    /// Low-level POST with transport retry and status classification. No
    /// freshness check — the renewal path itself comes through here.
    async fn post(&self, query: &str, variables: &Value, query_name: &str) -> Result<Value, ApiError> {
        let body = json!({ "query": query, "variables": variables });
        let headers = self.build_headers(query_name)?;

        let response = retry_fixed(
            self.config.max_attempts,
            self.config.transport_retry_delay,
            || {
                self.http
                    .post(self.url.clone())
                    .bearer_auth(self.token.bearer())
                    .headers(headers.clone())
                    .json(&body)
                    .send()
            },
            // Connection, TLS, proxy and timeout failures all surface as
            // send errors; every one of them is worth another attempt.
            |err: &reqwest::Error| {
                error!("transport error talking to {}: {err}", self.url);
                true
            },
        )
        .await
        .map_err(|(attempts, source)| {
            error!("failed after {attempts} attempts, aborting");
            ApiError::Transport { attempts, source }
        })?;

        self.classify(response).await
    }

    fn build_headers(&self, query_name: &str) -> Result<HeaderMap, ApiError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "query-name",
            HeaderValue::from_str(query_name)
                .map_err(|_| ApiError::Config(format!("invalid query name {query_name:?}")))?,
        );
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        Ok(headers)
    }

    /// Classify an HTTP response, in precedence order: hard auth failures,
    /// rejected token, server error (non-fatal), backend fault marker
    /// (non-fatal), success, anything else.
    async fn classify(&self, response: reqwest::Response) -> Result<Value, ApiError> {
        let status = response.status().as_u16();
        debug!("status code: {status} / server: {}", self.url);
        match status {
            402 | 403 | 404 => {
                error!("*** AUTHENTICATION FAILED ***");
                error!("{status} error - check your server setting: {}", self.url);
                Err(ApiError::Authentication)
            }
            401 => {
                error!("*** API AUTHENTICATION FAILED ***");
                error!("API token rejected; retrieve a new one from the Advanced Search UI");
                Err(ApiError::TokenExpired)
            }
            500 => {
                // Some 500s carry partial or diagnostic payloads, so the body
                // is returned for inspection rather than raised. The pause
                // gives the server a chance to recover before the next call.
                let text = response.text().await.unwrap_or_default();
                error!("server 500 error: {text}");
                sleep(self.config.server_error_pause).await;
                Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
            }
            200 => {
                let text = response
                    .text()
                    .await
                    .map_err(|e| ApiError::Malformed(format!("failed reading response body: {e}")))?;
                if text.contains(GRPC_FAULT_MARKER) {
                    error!("backend Grpc fault received; this occurs when the query size limit is reached");
                    error!("narrow the query with additional filters and try again");
                }
                serde_json::from_str(&text)
                    .map_err(|e| ApiError::Malformed(format!("response body was not valid JSON: {e}")))
            }
            other => Err(ApiError::Status(other)),
        }
    }
}

/// Join the messages of a GraphQL `errors` array, if the body carries a
/// non-empty one. The executor never interprets these — semantic failures
/// belong to callers, which decide between aborting and skipping.
pub fn graphql_errors(body: &Value) -> Option<String> {
    let errors = body.get("errors")?.as_array()?;
    if errors.is_empty() {
        return None;
    }
    let joined = errors
        .iter()
        .map(|e| {
            e.get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| e.to_string())
        })
        .collect::<Vec<_>>()
        .join("; ");
    Some(joined)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn graphql_errors_joins_messages() {
        let body = json!({
            "data": null,
            "errors": [{"message": "first"}, {"message": "second"}]
        });
        assert_eq!(graphql_errors(&body).as_deref(), Some("first; second"));
    }

    #[test]
    fn absent_or_empty_errors_are_none() {
        assert!(graphql_errors(&json!({"data": {}})).is_none());
        assert!(graphql_errors(&json!({"data": {}, "errors": []})).is_none());
    }

    #[test]
    fn errors_without_message_fall_back_to_raw_json() {
        let body = json!({"errors": [{"extensions": {"code": 7}}]});
        let joined = graphql_errors(&body).unwrap();
        assert!(joined.contains("extensions"));
    }
}
