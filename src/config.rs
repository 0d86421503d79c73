//! Configuration constants and the per-session configuration resolved at bootstrap.

use std::env;
use std::time::Duration;

/// Base URL of the local device WebAPI
pub const DEVICE_API_BASE: &str = "http://embapp-local.toshibatec.co.jp:50187/v1.0";

/// Origin serving the app and its backend proxy paths
pub const APP_ORIGIN: &str = "http://localhost:8080";

/// Portal where users obtain license codes
pub const LICENSE_PORTAL_URL: &str = "https://solution.toshiba-tec.com.cn/license/embedded";

/// User-agent marker of the device's embedded browser
pub const EMBEDDED_UA_MARKER: &str = "EWB/";

/// Cookie holding the WebAPI access token
pub const ACCESS_TOKEN_COOKIE: &str = "accessToken";

/// Header carrying the WebAPI access token
pub const ACCESS_TOKEN_HEADER: &str = "X-WebAPI-AccessToken";

/// Default request timeout in milliseconds
pub const REQUEST_TIMEOUT_MS: u64 = 15_000;

/// Event stream reconnection delay in milliseconds
pub const EVENT_STREAM_RECONNECT_DELAY_MS: u64 = 2000;

/// Path of the server-sent event stream on the device API
pub const EVENT_STREAM_PATH: &str = "/eventstream";

/// QR code module size in pixels for the full-screen dialog
pub const QR_MODULE_PX: u32 = 8;

/// Where the code executes. Decided once by the bootstrap layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionContext {
    /// Inside the printer's on-device browser
    Embedded,
    /// Inside the separate administrative web console
    Administrative,
}

impl ExecutionContext {
    /// Resolve the context from a user-agent string.
    pub fn from_user_agent(user_agent: &str) -> Self {
        if user_agent.contains(EMBEDDED_UA_MARKER) {
            Self::Embedded
        } else {
            Self::Administrative
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "embedded" | "mfp" => Some(Self::Embedded),
            "administrative" | "admin" | "settings" => Some(Self::Administrative),
            _ => None,
        }
    }
}

/// Session configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub execution_context: ExecutionContext,
    pub device_api_base: String,
    pub app_origin: String,
    pub access_token: Option<String>,
    /// Explicit application id supplied by an administrative caller
    pub app_id: Option<String>,
    pub license_portal_url: String,
    pub request_timeout: Duration,
    pub reconnect_delay: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            execution_context: ExecutionContext::Embedded,
            device_api_base: DEVICE_API_BASE.to_string(),
            app_origin: APP_ORIGIN.to_string(),
            access_token: None,
            app_id: None,
            license_portal_url: LICENSE_PORTAL_URL.to_string(),
            request_timeout: Duration::from_millis(REQUEST_TIMEOUT_MS),
            reconnect_delay: Duration::from_millis(EVENT_STREAM_RECONNECT_DELAY_MS),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let execution_context = env::var("MFP_CONTEXT")
            .ok()
            .and_then(|v| ExecutionContext::parse(&v))
            .unwrap_or_else(|| {
                ExecutionContext::from_user_agent(&env::var("MFP_USER_AGENT").unwrap_or_default())
            });

        let access_token = env::var("MFP_ACCESS_TOKEN").ok().or_else(|| {
            env::var("MFP_COOKIE")
                .ok()
                .and_then(|cookies| cookie_value(&cookies, ACCESS_TOKEN_COOKIE))
        });

        let request_timeout = env::var("MFP_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.request_timeout);

        let config = Self {
            execution_context,
            device_api_base: env::var("MFP_DEVICE_API").unwrap_or(defaults.device_api_base),
            app_origin: env::var("MFP_APP_ORIGIN").unwrap_or(defaults.app_origin),
            access_token,
            app_id: env::var("MFP_APP_ID").ok().filter(|id| !id.is_empty()),
            license_portal_url: env::var("MFP_LICENSE_PORTAL")
                .unwrap_or(defaults.license_portal_url),
            request_timeout,
            reconnect_delay: defaults.reconnect_delay,
        };

        if config.missing_app_id() {
            log::warn!("Administrative context without MFP_APP_ID, the license gate cannot start");
        }
        config
    }

    /// Administrative callers must name the application; nothing can resolve it for them.
    pub fn missing_app_id(&self) -> bool {
        self.execution_context == ExecutionContext::Administrative && self.app_id.is_none()
    }

    /// Build the server-sent event stream URL
    pub fn event_stream_url(&self) -> String {
        format!("{}{}", self.device_api_base.trim_end_matches('/'), EVENT_STREAM_PATH)
    }

    /// Build the backend proxy base for an application
    pub fn backend_base(&self, app_id: &str) -> String {
        let origin = self.app_origin.trim_end_matches('/');
        match self.execution_context {
            ExecutionContext::Embedded => format!("{}/server/{}", origin, app_id),
            ExecutionContext::Administrative => format!("{}/aplpx/server/{}", origin, app_id),
        }
    }
}

/// Extract a cookie value from a `Cookie` header style string.
pub fn cookie_value(cookies: &str, name: &str) -> Option<String> {
    cookies
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_from_user_agent() {
        assert_eq!(
            ExecutionContext::from_user_agent("Mozilla/5.0 EWB/2.1 (MFP)"),
            ExecutionContext::Embedded
        );
        assert_eq!(
            ExecutionContext::from_user_agent("Mozilla/5.0 (X11; Linux x86_64) Firefox/128.0"),
            ExecutionContext::Administrative
        );
    }

    #[test]
    fn test_cookie_value() {
        let cookies = "lang=zh; accessToken=abc123; theme=dark";
        assert_eq!(cookie_value(cookies, "accessToken").as_deref(), Some("abc123"));
        assert_eq!(cookie_value(cookies, "missing"), None);
        assert_eq!(cookie_value("xaccessToken=1", "accessToken"), None);
    }

    #[test]
    fn test_backend_base() {
        let mut config = Config {
            app_origin: "http://app.local/".into(),
            ..Config::default()
        };
        assert_eq!(config.backend_base("abc"), "http://app.local/server/abc");

        config.execution_context = ExecutionContext::Administrative;
        assert_eq!(config.backend_base("abc"), "http://app.local/aplpx/server/abc");
    }

    #[test]
    fn test_administrative_context_needs_app_id() {
        let mut config = Config {
            execution_context: ExecutionContext::Administrative,
            ..Config::default()
        };
        assert!(config.missing_app_id());

        config.app_id = Some("app-1".into());
        assert!(!config.missing_app_id());

        // The device panel resolves its own id
        let embedded = Config::default();
        assert!(!embedded.missing_app_id());
    }

    #[test]
    fn test_event_stream_url() {
        let config = Config {
            device_api_base: "http://device:50187/v1.0/".into(),
            ..Config::default()
        };
        assert_eq!(config.event_stream_url(), "http://device:50187/v1.0/eventstream");
    }
}
