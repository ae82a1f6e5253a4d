//! API key lookup and home-relative paths.
//!
//! The research service key is configured in one of three ways, checked
//! in this order:
//!
//! 1. `api_key: "sk-..."` inline in the config file
//! 2. `api_key_file: /run/secrets/research_key`
//! 3. `api_key_env_var: DEEPRESEARCH_API_KEY`
//!
//! Local deployments of the service run without authentication, so having
//! no source at all is not an error.

use secrecy::SecretString;

#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("Cannot read API key file '{path}': {source}")]
    Unreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("API key file '{path}' is empty")]
    EmptyFile { path: String },

    #[error("API key variable '{name}' is not set")]
    MissingEnvVar { name: String },

    #[error("API key variable '{name}' is not valid UTF-8")]
    NonUnicodeEnvVar { name: String },
}

/// Where the API key may come from. Blank entries count as unset.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeySources<'a> {
    pub inline: Option<&'a str>,
    pub file: Option<&'a str>,
    pub env_var: Option<&'a str>,
}

impl KeySources<'_> {
    /// Resolves the first configured source. A configured source that
    /// cannot be read is an error; it never falls through to the next one.
    pub fn resolve(&self) -> Result<Option<SecretString>, SecretError> {
        let set = |v: Option<&str>| v.map(str::trim).filter(|v| !v.is_empty()).map(str::to_string);

        if let Some(value) = set(self.inline) {
            return Ok(Some(SecretString::from(value)));
        }
        if let Some(path) = set(self.file) {
            return read_key_file(&expand_home(&path)).map(Some);
        }
        if let Some(name) = set(self.env_var) {
            return read_key_var(&name).map(Some);
        }
        Ok(None)
    }
}

fn read_key_file(path: &str) -> Result<SecretString, SecretError> {
    let content = std::fs::read_to_string(path).map_err(|source| SecretError::Unreadable {
        path: path.to_string(),
        source,
    })?;
    match content.trim() {
        "" => Err(SecretError::EmptyFile { path: path.to_string() }),
        key => Ok(SecretString::from(key.to_string())),
    }
}

fn read_key_var(name: &str) -> Result<SecretString, SecretError> {
    match std::env::var(name) {
        Ok(value) => Ok(SecretString::from(value.trim().to_string())),
        Err(std::env::VarError::NotPresent) => Err(SecretError::MissingEnvVar { name: name.to_string() }),
        Err(std::env::VarError::NotUnicode(_)) => Err(SecretError::NonUnicodeEnvVar { name: name.to_string() }),
    }
}

/// Replaces a leading `~` (alone or followed by `/`) with the home
/// directory. Other paths are returned unchanged.
pub fn expand_home(path: &str) -> String {
    let rest = match path.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => rest,
        _ => return path.to_string(),
    };
    match dirs::home_dir() {
        Some(home) => format!("{}{}", home.to_string_lossy(), rest),
        None => path.to_string(),
    }
}
