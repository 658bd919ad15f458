use std::fmt;
use std::time::Duration;

use crate::error::ConfigError;

pub const BASE_URL_ENV: &str = "SUPERSET_BASE_URL";
pub const USERNAME_ENV: &str = "SUPERSET_USERNAME";
pub const PASSWORD_ENV: &str = "SUPERSET_PASSWORD";
pub const REQUEST_TIMEOUT_ENV: &str = "REQUEST_TIMEOUT";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Connection settings for one Superset instance, fixed for the process lifetime.
#[derive(Clone)]
pub struct Credentials {
    base_url: String,
    username: String,
    password: String,
    timeout: Duration,
}

/// Non-blank value, untouched. Blankness is judged on the trimmed text.
fn present(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

impl Credentials {
    /// Validate raw settings. Blank values count as missing, and every
    /// missing variable is reported at once.
    pub fn new(
        base_url: Option<&str>,
        username: Option<&str>,
        password: Option<&str>,
        timeout_secs: Option<u64>,
    ) -> Result<Self, ConfigError> {
        let mut missing = Vec::new();
        let base_url = present(base_url);
        if base_url.is_none() {
            missing.push(BASE_URL_ENV);
        }
        let username = present(username);
        if username.is_none() {
            missing.push(USERNAME_ENV);
        }
        let password = present(password);
        if password.is_none() {
            missing.push(PASSWORD_ENV);
        }
        let (Some(base_url), Some(username), Some(password)) = (base_url, username, password)
        else {
            return Err(ConfigError::Missing(missing));
        };

        let base_url = base_url.trim().trim_end_matches('/').to_string();
        let parsed = reqwest::Url::parse(&base_url).map_err(|e| ConfigError::InvalidBaseUrl {
            url: base_url.clone(),
            reason: e.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidBaseUrl {
                url: base_url,
                reason: "scheme must be http or https".to_string(),
            });
        }

        let timeout_secs = timeout_secs.unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS);
        if timeout_secs == 0 {
            return Err(ConfigError::InvalidTimeout);
        }

        Ok(Self {
            base_url,
            username: username.to_string(),
            password: password.to_string(),
            timeout: Duration::from_secs(timeout_secs),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub(crate) fn password(&self) -> &str {
        &self.password
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("timeout", &self.timeout)
            .finish()
    }
}
