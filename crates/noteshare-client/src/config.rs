/// Client configuration, assembled from CLI flags and environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the REST API, e.g. `http://localhost:8080`
    pub api_url: String,
    /// Real-time relay endpoint, e.g. `ws://localhost:10000/ws`
    pub socket_url: String,
    /// Public origin used to build share links for library entries
    pub share_url: String,
}

pub const DEFAULT_API_URL: &str = "http://localhost:8080";
pub const DEFAULT_SOCKET_URL: &str = "ws://localhost:10000/ws";
pub const DEFAULT_SHARE_URL: &str = "http://localhost:3000";

impl Config {
    /// Validate URLs and build a config.
    pub fn new(api_url: &str, socket_url: &str, share_url: &str) -> Result<Self, ConfigError> {
        let api_url = api_url.trim().trim_end_matches('/');
        if !has_scheme(api_url, &["http://", "https://"]) {
            return Err(ConfigError::InvalidApiUrl(api_url.to_string()));
        }
        let socket_url = socket_url.trim();
        if !has_scheme(socket_url, &["ws://", "wss://"]) {
            return Err(ConfigError::InvalidSocketUrl(socket_url.to_string()));
        }
        let share_url = share_url.trim().trim_end_matches('/');
        if !has_scheme(share_url, &["http://", "https://"]) {
            return Err(ConfigError::InvalidShareUrl(share_url.to_string()));
        }

        Ok(Self {
            api_url: api_url.to_string(),
            socket_url: socket_url.to_string(),
            share_url: share_url.to_string(),
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            socket_url: DEFAULT_SOCKET_URL.to_string(),
            share_url: DEFAULT_SHARE_URL.to_string(),
        }
    }
}

/// True when `url` starts with one of `schemes` and has something after it.
fn has_scheme(url: &str, schemes: &[&str]) -> bool {
    schemes
        .iter()
        .any(|s| url.strip_prefix(s).is_some_and(|rest| !rest.is_empty()))
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("API URL must start with http:// or https://, got {0:?}")]
    InvalidApiUrl(String),

    #[error("Socket URL must start with ws:// or wss://, got {0:?}")]
    InvalidSocketUrl(String),

    #[error("Share URL must start with http:// or https://, got {0:?}")]
    InvalidShareUrl(String),
}
