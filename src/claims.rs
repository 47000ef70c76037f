use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{Duration, Utc};
use serde::Deserialize;

use crate::error::ApiError;

/// `aud` is allowed to be either a string or an array, so let Serde flatten it.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Aud {
    Str(String),
    Arr(Vec<String>),
}

/// Claims decoded from a Sonrai API token.
///
/// The signature is deliberately NOT verified: the client holds no key
/// material, and the server re-validates the token on every request. The
/// decode here exists only to read org/env/expiry for endpoint resolution
/// and renewal scheduling.
#[derive(Debug, Clone, Deserialize)]
pub struct Claims {
    #[serde(rename = "https://sonraisecurity.com/org")]
    pub org: Option<String>,
    #[serde(rename = "https://sonraisecurity.com/orgs", default)]
    pub orgs: Vec<String>,
    #[serde(rename = "https://sonraisecurity.com/env")]
    pub env: Option<String>,
    pub aud: Option<Aud>,
    pub exp: Option<i64>,
    pub iat: Option<i64>,
    pub nbf: Option<i64>,
    pub iss: Option<String>,
}

/// Structural checks applied at decode time, each independently toggleable.
///
/// Defaults mirror the wire contract: issued-at, not-before and issuer are
/// checked, audience is not (tenants carry per-org audiences).
#[derive(Debug, Clone)]
pub struct DecodeOptions {
    pub verify_iat: bool,
    pub verify_nbf: bool,
    pub verify_iss: bool,
    pub verify_aud: bool,
    /// Expected audience; only consulted when `verify_aud` is set.
    pub audience: Option<String>,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self { verify_iat: true, verify_nbf: true, verify_iss: true, verify_aud: false, audience: None }
    }
}

impl Claims {
    /// Decode the payload segment of a token into claims, applying the
    /// configured structural checks.
    ///
    /// A token that decodes but is already expired is still returned —
    /// expiry policy belongs to [`Claims::is_expired`] / [`Claims::is_expiring`],
    /// not to decoding. A missing `exp` defaults to epoch 0, which reads as
    /// long-expired.
    pub fn decode(token: &str, opts: &DecodeOptions) -> Result<Self, ApiError> {
        let payload_b64 = token
            .split('.')
            .nth(1)
            .ok_or_else(|| ApiError::Decode("not a JWT-shaped token".into()))?;
        let payload = URL_SAFE_NO_PAD
            .decode(payload_b64)
            .map_err(|e| ApiError::Decode(format!("invalid base64 in payload: {e}")))?;
        let claims: Claims = serde_json::from_slice(&payload)
            .map_err(|e| ApiError::Decode(format!("invalid JSON claims: {e}")))?;

        let now = Utc::now().timestamp();
        if opts.verify_iat {
            if let Some(iat) = claims.iat {
                if iat > now {
                    return Err(ApiError::Decode(format!("token issued in the future (iat {iat})")));
                }
            }
        }
        if opts.verify_nbf {
            if let Some(nbf) = claims.nbf {
                if nbf > now {
                    return Err(ApiError::Decode(format!("token not valid before {nbf}")));
                }
            }
        }
        if opts.verify_iss && claims.iss.as_deref().map_or(true, |s| s.trim().is_empty()) {
            return Err(ApiError::Decode("token carries no issuer (iss)".into()));
        }
        if opts.verify_aud {
            let expected = opts
                .audience
                .as_deref()
                .ok_or_else(|| ApiError::Decode("audience check requested without an expected audience".into()))?;
            if !claims.audiences().iter().any(|a| a == expected) {
                return Err(ApiError::Decode(format!("token audience does not include {expected:?}")));
            }
        }

        Ok(claims)
    }

    /// Expiry as an epoch timestamp; absent claims read as epoch 0.
    pub fn expiry(&self) -> i64 {
        self.exp.unwrap_or(0)
    }

    /// `expiry - now`; negative once the token has expired.
    pub fn remaining_lifetime(&self) -> Duration {
        Duration::seconds(self.expiry() - Utc::now().timestamp())
    }

    /// True once the expiry has passed.
    pub fn is_expired(&self) -> bool {
        self.remaining_lifetime() < Duration::zero()
    }

    /// True iff the token is still valid but inside the refresh window.
    /// An expired token is not "expiring" — it is already gone.
    pub fn is_expiring(&self, threshold_secs: i64) -> bool {
        let remaining = self.remaining_lifetime();
        remaining >= Duration::zero() && remaining < Duration::seconds(threshold_secs)
    }

    /// Normalize `aud` into a flat list.
    pub fn audiences(&self) -> Vec<String> {
        match &self.aud {
            Some(Aud::Str(s)) => vec![s.clone()],
            Some(Aud::Arr(v)) => v.clone(),
            None => vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_token(payload: serde_json::Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"RS256","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(payload.to_string());
        format!("{header}.{payload}.sig")
    }

    fn claims_payload(exp_offset: i64) -> serde_json::Value {
        let now = Utc::now().timestamp();
        serde_json::json!({
            "https://sonraisecurity.com/org": "acme",
            "https://sonraisecurity.com/orgs": ["acme"],
            "https://sonraisecurity.com/env": "prod",
            "aud": "crc-graphql-server.sonraisecurity.com",
            "iss": "https://sonraisecurity.auth0.com/",
            "iat": now - 60,
            "exp": now + exp_offset,
        })
    }

    #[test]
    fn decodes_org_env_and_expiry() {
        let token = build_token(claims_payload(3_600));
        let claims = Claims::decode(&token, &DecodeOptions::default()).unwrap();
        assert_eq!(claims.org.as_deref(), Some("acme"));
        assert_eq!(claims.env.as_deref(), Some("prod"));
        assert!(!claims.is_expired());
    }

    #[test]
    fn expired_tokens_are_expired_not_expiring() {
        let token = build_token(claims_payload(-600));
        let claims = Claims::decode(&token, &DecodeOptions::default()).unwrap();
        assert!(claims.is_expired());
        assert!(!claims.is_expiring(1_800));
        assert!(claims.remaining_lifetime() < Duration::zero());
    }

    #[test]
    fn near_expiry_tokens_are_expiring() {
        let token = build_token(claims_payload(1_000));
        let claims = Claims::decode(&token, &DecodeOptions::default()).unwrap();
        assert!(!claims.is_expired());
        assert!(claims.is_expiring(1_800));
        assert!(!claims.is_expiring(500));
    }

    #[test]
    fn missing_exp_reads_as_long_expired() {
        let mut payload = claims_payload(0);
        payload.as_object_mut().unwrap().remove("exp");
        let token = build_token(payload);
        let claims = Claims::decode(&token, &DecodeOptions::default()).unwrap();
        assert_eq!(claims.expiry(), 0);
        assert!(claims.is_expired());
    }

    #[test]
    fn not_a_jwt_is_a_decode_error() {
        let err = Claims::decode("garbage", &DecodeOptions::default()).unwrap_err();
        assert!(matches!(err, ApiError::Decode(_)));
    }

    #[test]
    fn nbf_in_the_future_is_rejected() {
        let mut payload = claims_payload(3_600);
        payload["nbf"] = serde_json::json!(Utc::now().timestamp() + 600);
        let token = build_token(payload);
        assert!(Claims::decode(&token, &DecodeOptions::default()).is_err());
    }

    #[test]
    fn missing_issuer_rejected_only_when_checked() {
        let mut payload = claims_payload(3_600);
        payload.as_object_mut().unwrap().remove("iss");
        let token = build_token(payload);
        assert!(Claims::decode(&token, &DecodeOptions::default()).is_err());

        let opts = DecodeOptions { verify_iss: false, ..DecodeOptions::default() };
        assert!(Claims::decode(&token, &opts).is_ok());
    }

    #[test]
    fn audience_check_accepts_string_or_array() {
        let opts = DecodeOptions {
            verify_aud: true,
            audience: Some("crc-graphql-server.sonraisecurity.com".into()),
            ..DecodeOptions::default()
        };
        let token = build_token(claims_payload(3_600));
        assert!(Claims::decode(&token, &opts).is_ok());

        let mut payload = claims_payload(3_600);
        payload["aud"] = serde_json::json!(["other", "crc-graphql-server.sonraisecurity.com"]);
        assert!(Claims::decode(&build_token(payload), &opts).is_ok());

        let mut payload = claims_payload(3_600);
        payload["aud"] = serde_json::json!("someone-else");
        assert!(Claims::decode(&build_token(payload), &opts).is_err());
    }
}
