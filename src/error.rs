use thiserror::Error;

/// Process exit codes shared by every subcommand.
///
/// Kept to a small closed set so automation wrapping these tools can tell
/// "fix your token" apart from "retry later" without parsing log output.
pub const EXIT_SUCCESS: i32 = 0;
/// clap's own usage-error code, reused for malformed inputs we detect
/// ourselves (bad variables JSON, unreadable query file, bad CSV line count).
pub const EXIT_MALFORMED_INPUT: i32 = 2;
pub const EXIT_AUTH_FAILURE: i32 = 3;
pub const EXIT_TRANSPORT_EXHAUSTED: i32 = 4;
pub const EXIT_RENEWAL_FAILURE: i32 = 5;
pub const EXIT_FAILURE: i32 = 1;

/// Error taxonomy for the API client and the subcommands built on it.
///
/// Transport and auth failures are distinct variants rather than stringly
/// errors so callers can distinguish "retry later" from "fix your token"
/// from "fix your query".
#[derive(Error, Debug)]
pub enum ApiError {
    /// No valid token found in the environment or on disk.
    #[error("no valid API token found in the environment or on disk; \
             retrieve one from Advanced Search in the Sonrai UI")]
    Authentication,

    /// The token's expiry has passed, or the server rejected a token the
    /// client believed was valid (HTTP 401: revoked or clock-skewed).
    #[error("API token expired; retrieve a new one from Advanced Search in the Sonrai UI")]
    TokenExpired,

    /// The renewal mutation failed. The old token may still be briefly
    /// usable, but this invocation is done.
    #[error("token renewal failed: {0}")]
    Renewal(String),

    /// Connection/TLS/proxy/timeout failure that survived the retry budget.
    #[error("could not reach the API after {attempts} attempts: {source}")]
    Transport {
        attempts: u32,
        #[source]
        source: reqwest::Error,
    },

    /// The token string could not be decoded into claims.
    #[error("unable to decode token: {0}")]
    Decode(String),

    /// A 200 response whose body was not the JSON we expected. Transient
    /// partial responses land here and are retried by the pagination driver.
    #[error("malformed API response: {0}")]
    Malformed(String),

    /// HTTP 200 but the body carried a GraphQL `errors` array. Raised by
    /// callers that inspect the body, never by the executor itself.
    #[error("GraphQL error: {0}")]
    GraphQl(String),

    /// Missing or unparseable local configuration; fatal before any
    /// network activity.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Any HTTP status outside the explicitly classified set.
    #[error("server returned unexpected status {0}")]
    Status(u16),

    /// The pagination driver spent its page-level retry budget. Partial
    /// results are discarded.
    #[error("giving up after {attempts} page attempts: {message}")]
    MaxRetries { attempts: u32, message: String },

    #[error("token store I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ApiError {
    /// Map an error to its process exit code.
    pub fn exit_code(&self) -> i32 {
        match self {
            ApiError::Authentication | ApiError::TokenExpired | ApiError::Decode(_) => {
                EXIT_AUTH_FAILURE
            }
            ApiError::Transport { .. } => EXIT_TRANSPORT_EXHAUSTED,
            ApiError::Renewal(_) => EXIT_RENEWAL_FAILURE,
            ApiError::Config(_) => EXIT_MALFORMED_INPUT,
            _ => EXIT_FAILURE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_distinct_per_class() {
        assert_eq!(ApiError::Authentication.exit_code(), EXIT_AUTH_FAILURE);
        assert_eq!(ApiError::TokenExpired.exit_code(), EXIT_AUTH_FAILURE);
        assert_eq!(ApiError::Renewal("x".into()).exit_code(), EXIT_RENEWAL_FAILURE);
        assert_eq!(ApiError::Config("x".into()).exit_code(), EXIT_MALFORMED_INPUT);
        assert_eq!(ApiError::Status(418).exit_code(), EXIT_FAILURE);
    }
}
