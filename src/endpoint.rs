use url::Url;

use crate::{claims::Claims, error::ApiError};

/// Domain suffix per environment tier. Production tenants live on the base
/// domain; stage and dev tenants carry an infix.
const BASE_SUFFIX: &str = ".sonraisecurity.com";
const STAGE_SUFFIX: &str = ".s.sonraisecurity.com";
const DEV_SUFFIX: &str = ".de.sonraisecurity.com";

const GRAPHQL_PATH: &str = "/graphql";

/// Resolve the GraphQL endpoint URL.
///
/// An explicit server override wins; otherwise the host is derived from the
/// token's org claim plus the environment-tier suffix. Pure function of
/// claims and configuration — no I/O.
pub fn resolve(claims: &Claims, api_server: Option<&str>) -> Result<Url, ApiError> {
    let host = match api_server {
        Some(server) => server.trim().to_string(),
        None => {
            let org = claims
                .org
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .ok_or_else(|| ApiError::Config("token carries no org claim and no API server override is set".into()))?;
            let suffix = match claims.env.as_deref() {
                Some("stage") => STAGE_SUFFIX,
                Some("dev") => DEV_SUFFIX,
                _ => BASE_SUFFIX,
            };
            format!("{org}{suffix}")
        }
    };

    Url::parse(&format!("https://{host}{GRAPHQL_PATH}"))
        .map_err(|e| ApiError::Config(format!("invalid API server {host:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(org: Option<&str>, env: Option<&str>) -> Claims {
        let mut payload = serde_json::json!({});
        if let Some(org) = org {
            payload["https://sonraisecurity.com/org"] = serde_json::json!(org);
        }
        if let Some(env) = env {
            payload["https://sonraisecurity.com/env"] = serde_json::json!(env);
        }
        serde_json::from_value(payload).unwrap()
    }

    #[test]
    fn production_tenants_use_the_base_domain() {
        let url = resolve(&claims(Some("acme"), Some("prod")), None).unwrap();
        assert_eq!(url.as_str(), "https://acme.sonraisecurity.com/graphql");
    }

    #[test]
    fn stage_tenants_get_the_s_infix() {
        let url = resolve(&claims(Some("acme"), Some("stage")), None).unwrap();
        assert_eq!(url.as_str(), "https://acme.s.sonraisecurity.com/graphql");
    }

    #[test]
    fn dev_tenants_get_the_de_infix() {
        let url = resolve(&claims(Some("acme"), Some("dev")), None).unwrap();
        assert_eq!(url.as_str(), "https://acme.de.sonraisecurity.com/graphql");
    }

    #[test]
    fn unknown_or_absent_env_falls_back_to_base_domain() {
        let url = resolve(&claims(Some("acme"), Some("qa")), None).unwrap();
        assert_eq!(url.as_str(), "https://acme.sonraisecurity.com/graphql");
        let url = resolve(&claims(Some("acme"), None), None).unwrap();
        assert_eq!(url.as_str(), "https://acme.sonraisecurity.com/graphql");
    }

    #[test]
    fn explicit_override_wins_over_claims() {
        let url = resolve(&claims(Some("acme"), Some("stage")), Some("api.example.net")).unwrap();
        assert_eq!(url.as_str(), "https://api.example.net/graphql");
    }

    #[test]
    fn missing_org_without_override_is_a_config_error() {
        let err = resolve(&claims(None, None), None).unwrap_err();
        assert!(matches!(err, ApiError::Config(_)));
    }
}
