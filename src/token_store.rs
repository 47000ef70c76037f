use std::{
    env, fs,
    io::{self, IsTerminal, Write},
    path::PathBuf,
};

use tracing::debug;

use crate::{
    config::{Config, ENV_TOKEN},
    error::ApiError,
};

/// Where the token came from; renewals write back to the same place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenSource {
    /// `TOKEN` environment variable; saves rewrite the process environment.
    Env,
    /// Plaintext file holding exactly the token string, overwritten
    /// wholesale on every save.
    File(PathBuf),
}

/// Single authoritative token location for this process.
///
/// The environment wins at locate time; once a file source is chosen the
/// environment is not re-checked. Exactly one source is consulted per read.
#[derive(Debug, Clone)]
pub struct TokenStore {
    source: TokenSource,
}

impl TokenStore {
    /// Pick the authoritative source: the `TOKEN` environment variable if it
    /// is set and non-empty, else the configured file path.
    pub fn locate(config: &Config) -> Self {
        let source = match env::var(ENV_TOKEN) {
            Ok(value) if !value.trim().is_empty() => TokenSource::Env,
            _ => TokenSource::File(config.token_path()),
        };
        debug!(?source, "token store located");
        Self { source }
    }

    /// Build a store over an explicit file path, bypassing the environment.
    pub fn file(path: PathBuf) -> Self {
        Self { source: TokenSource::File(path) }
    }

    pub fn source(&self) -> &TokenSource {
        &self.source
    }

    /// Read the raw token string, or `None` if the source holds nothing.
    pub fn load(&self) -> Result<Option<String>, ApiError> {
        match &self.source {
            TokenSource::Env => match env::var(ENV_TOKEN) {
                Ok(value) if !value.trim().is_empty() => Ok(Some(value.trim().to_string())),
                _ => Ok(None),
            },
            TokenSource::File(path) => {
                if !path.exists() {
                    debug!("no token file at {}", path.display());
                    return Ok(None);
                }
                let token = fs::read_to_string(path)?;
                let token = token.trim();
                if token.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(token.to_string()))
                }
            }
        }
    }

    /// Persist a token back to the source it came from. File writes create
    /// the containing directory on first use and replace the previous
    /// content entirely.
    pub fn save(&self, token: &str) -> Result<(), ApiError> {
        let token = token.trim();
        match &self.source {
            TokenSource::Env => {
                debug!("storing token in the process environment");
                env::set_var(ENV_TOKEN, token);
                Ok(())
            }
            TokenSource::File(path) => {
                debug!("storing token in {}", path.display());
                if let Some(dir) = path.parent() {
                    fs::create_dir_all(dir)?;
                }
                let mut file = fs::File::create(path)?;
                file.write_all(token.as_bytes())?;
                file.flush()?;
                Ok(())
            }
        }
    }
}

/// Ask for a token on stdin. Only valid in interactive contexts; callers in
/// automation must treat a missing token as [`ApiError::Authentication`].
pub fn prompt_for_token() -> Result<String, ApiError> {
    if !io::stdin().is_terminal() {
        return Err(ApiError::Authentication);
    }
    eprint!("Enter Sonrai user token (no quotes): ");
    io::stderr().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    let token = line.trim().to_string();
    if token.is_empty() {
        return Err(ApiError::Authentication);
    }
    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn file_store_roundtrips_and_creates_directory() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("token");
        let store = TokenStore::file(path.clone());

        assert!(store.load().unwrap().is_none());
        store.save("  tok.en.value \n").unwrap();
        assert_eq!(store.load().unwrap().as_deref(), Some("tok.en.value"));
        // Wholesale overwrite, not append.
        store.save("second").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "second");
    }

    #[test]
    fn empty_file_reads_as_no_token() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("token");
        fs::write(&path, "  \n").unwrap();
        let store = TokenStore::file(path);
        assert!(store.load().unwrap().is_none());
    }
}
