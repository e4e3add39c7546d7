// src/config.rs
use std::env;
use std::time::Duration;

/// Connection settings for the external CRM.
#[derive(Debug, Clone)]
pub struct CrmConfig {
    /// Base URL of the CRM's JSON endpoint, e.g. "https://crm.example.com".
    pub base_url: String,
    /// Database name sent with the login request.
    pub database: String,
    pub login: String,
    pub password: String,
    /// Per-request timeout for CRM calls.
    pub request_timeout: Duration,
    /// How long an authenticated session is trusted before re-login.
    pub session_ttl_secs: i64,
    /// Page size for pull queries.
    pub pull_page_size: usize,
}

impl Default for CrmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8069".to_string(),
            database: "crm".to_string(),
            login: "admin".to_string(),
            password: "admin".to_string(),
            request_timeout: Duration::from_secs(30),
            session_ttl_secs: 60 * 60, // 1 hour
            pull_page_size: 500,
        }
    }
}

impl CrmConfig {
    /// Build from environment variables, falling back to defaults for
    /// anything unset.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            base_url: env::var("CRM_BASE_URL").unwrap_or(defaults.base_url),
            database: env::var("CRM_DATABASE").unwrap_or(defaults.database),
            login: env::var("CRM_LOGIN").unwrap_or(defaults.login),
            password: env::var("CRM_PASSWORD").unwrap_or(defaults.password),
            request_timeout: env::var("CRM_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
            session_ttl_secs: env::var("CRM_SESSION_TTL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.session_ttl_secs),
            pull_page_size: defaults.pull_page_size,
        }
    }
}
