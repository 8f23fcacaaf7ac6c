use std::env;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use reqwest::Url;
use tracing::warn;

/// Complete application configuration, loaded from environment variables or default values.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub source: SourceConfig,
}

impl AppConfig {
    /// Creates a configuration from the currently available environment variables.
    pub fn from_env() -> Self {
        Self {
            api: ApiConfig::from_env(),
            source: SourceConfig::from_env(),
        }
    }
}

/// Configuration for the API server.
#[derive(Clone, Debug)]
pub struct ApiConfig {
    bind_ip: IpAddr,
    display_host: String,
    port: u16,
}

impl ApiConfig {
    const DEFAULT_HOST: &'static str = "0.0.0.0";
    const DEFAULT_PORT: u16 = 5001;

    fn from_env() -> Self {
        let host_value =
            env_string("ORDER_STACKER_API_HOST").unwrap_or_else(|| Self::DEFAULT_HOST.to_string());
        let (bind_ip, effective_host) = match host_value.parse::<IpAddr>() {
            Ok(ip) => (ip, host_value),
            Err(err) => {
                warn!(
                    "⚠️ Could not parse ORDER_STACKER_API_HOST ('{}'): {}. Using {}.",
                    host_value,
                    err,
                    Self::DEFAULT_HOST
                );
                (
                    IpAddr::V4(Ipv4Addr::UNSPECIFIED),
                    Self::DEFAULT_HOST.to_string(),
                )
            }
        };

        let port = load_nonzero(
            "ORDER_STACKER_API_PORT",
            Self::DEFAULT_PORT,
            |raw| raw.parse::<u16>().map_err(|err| err.to_string()),
        );

        Self {
            bind_ip,
            display_host: effective_host,
            port,
        }
    }

    /// Socket address to bind the server to.
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_ip, self.port)
    }

    /// Visible hostname for logging and hints.
    pub fn display_host(&self) -> &str {
        &self.display_host
    }

    /// Configured port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Indicates whether binding to all interfaces.
    pub fn binds_to_all_interfaces(&self) -> bool {
        match self.bind_ip {
            IpAddr::V4(addr) => addr == Ipv4Addr::UNSPECIFIED,
            IpAddr::V6(addr) => addr == Ipv6Addr::UNSPECIFIED,
        }
    }

    /// Checks whether the hostname matches the default value.
    pub fn uses_default_host(&self) -> bool {
        self.display_host == Self::DEFAULT_HOST
    }
}

/// Configuration for the upstream order API.
#[derive(Clone, Debug)]
pub struct SourceConfig {
    base_url: String,
    credentials: Option<Credentials>,
    timeout: Duration,
    customer_cache_ttl: Duration,
}

/// Basic-auth credentials for the upstream API.
#[derive(Clone)]
pub struct Credentials {
    pub user: String,
    pub password: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

impl SourceConfig {
    const DEFAULT_BASE_URL: &'static str = "https://assessment.codeflex.it";
    const DEFAULT_TIMEOUT_SECS: u64 = 30;
    const DEFAULT_CUSTOMER_CACHE_SECS: u64 = 3600;

    fn from_env() -> Self {
        let base_url = env_string("ORDER_STACKER_SOURCE_URL")
            .unwrap_or_else(|| Self::DEFAULT_BASE_URL.to_string());

        let credentials = env_string("ORDER_STACKER_SOURCE_USER").map(|user| Credentials {
            user,
            password: env_string("ORDER_STACKER_SOURCE_PASSWORD"),
        });

        let timeout_secs = load_nonzero(
            "ORDER_STACKER_HTTP_TIMEOUT_SECS",
            Self::DEFAULT_TIMEOUT_SECS,
            |raw| raw.parse::<u64>().map_err(|err| err.to_string()),
        );

        let cache_secs = match env_string("ORDER_STACKER_CUSTOMER_CACHE_SECS") {
            Some(raw) => raw.parse::<u64>().unwrap_or_else(|err| {
                warn!(
                    "⚠️ Could not parse ORDER_STACKER_CUSTOMER_CACHE_SECS ('{}'): {}. Using {}.",
                    raw,
                    err,
                    Self::DEFAULT_CUSTOMER_CACHE_SECS
                );
                Self::DEFAULT_CUSTOMER_CACHE_SECS
            }),
            None => Self::DEFAULT_CUSTOMER_CACHE_SECS,
        };

        Self::new(
            base_url,
            credentials,
            Duration::from_secs(timeout_secs),
            Duration::from_secs(cache_secs),
        )
    }

    /// Builds a source configuration; a trailing `/` on the base URL is dropped.
    pub fn new(
        base_url: impl Into<String>,
        credentials: Option<Credentials>,
        timeout: Duration,
        customer_cache_ttl: Duration,
    ) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            base_url,
            credentials,
            timeout,
            customer_cache_ttl,
        }
    }

    /// Base URL of the upstream API, without trailing slash.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    /// Request timeout for upstream calls.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// How long the customer directory is cached. Zero disables caching.
    pub fn customer_cache_ttl(&self) -> Duration {
        self.customer_cache_ttl
    }

    /// Builds the URL of an upstream resource from its path segments.
    ///
    /// Every segment is percent-encoded on its own, so `/`, `?` or `#` inside
    /// an order number stay part of that segment.
    pub fn endpoint(&self, segments: &[&str]) -> Result<Url, String> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|err| format!("'{}' is not a valid URL: {}", self.base_url, err))?;
        url.path_segments_mut()
            .map_err(|_| format!("'{}' cannot be used as a base URL", self.base_url))?
            .pop_if_empty()
            .extend(segments.iter().copied());
        Ok(url)
    }
}

fn env_string(name: &str) -> Option<String> {
    match env::var(name) {
        Ok(value) => non_empty(&value),
        Err(env::VarError::NotPresent) => None,
        Err(err) => {
            warn!(
                "⚠️ Access to {} failed: {}. Using default value.",
                name, err
            );
            None
        }
    }
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_owned())
    }
}

fn load_nonzero<T>(var_name: &str, default: T, parse: impl Fn(&str) -> Result<T, String>) -> T
where
    T: Copy + PartialEq + Default + std::fmt::Display,
{
    match env_string(var_name) {
        Some(raw) => parse_nonzero(var_name, &raw, default, parse),
        None => default,
    }
}

fn parse_nonzero<T>(
    var_name: &str,
    raw: &str,
    default: T,
    parse: impl Fn(&str) -> Result<T, String>,
) -> T
where
    T: Copy + PartialEq + Default + std::fmt::Display,
{
    match parse(raw) {
        Ok(value) if value != T::default() => value,
        Ok(_) => {
            warn!("⚠️ {} must not be 0. Using {}.", var_name, default);
            default
        }
        Err(err) => {
            warn!(
                "⚠️ Could not parse {} ('{}'): {}. Using {}.",
                var_name, raw, err, default
            );
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_port(raw: &str) -> Result<u16, String> {
        raw.parse::<u16>().map_err(|err| err.to_string())
    }

    #[test]
    fn test_non_empty_trims_values() {
        assert_eq!(non_empty("  5001 "), Some("5001".to_string()));
        assert_eq!(non_empty(""), None);
        assert_eq!(non_empty("   "), None);
    }

    #[test]
    fn test_parse_nonzero_accepts_valid_values() {
        assert_eq!(parse_nonzero("TEST_VAR", "8080", 5001, parse_port), 8080);
        assert_eq!(parse_nonzero("TEST_VAR", "1", 5001, parse_port), 1);
    }

    #[test]
    fn test_parse_nonzero_falls_back_on_zero() {
        assert_eq!(parse_nonzero("TEST_VAR", "0", 5001, parse_port), 5001);
    }

    #[test]
    fn test_parse_nonzero_falls_back_on_garbage() {
        assert_eq!(parse_nonzero("TEST_VAR", "http", 5001, parse_port), 5001);
        assert_eq!(parse_nonzero("TEST_VAR", "70000", 5001, parse_port), 5001);
        assert_eq!(parse_nonzero("TEST_VAR", "-1", 5001, parse_port), 5001);
    }

    #[test]
    fn test_source_config_trims_trailing_slash() {
        let config = SourceConfig::new(
            "http://localhost:9000///",
            None,
            Duration::from_secs(1),
            Duration::ZERO,
        );
        assert_eq!(config.base_url(), "http://localhost:9000");
        assert_eq!(
            config.endpoint(&["order_components", "A-17"]).unwrap().as_str(),
            "http://localhost:9000/order_components/A-17"
        );
        assert_eq!(
            config.endpoint(&["customers"]).unwrap().as_str(),
            "http://localhost:9000/customers"
        );
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        let config = SourceConfig::new(
            "http://localhost:9000/api/v1/",
            None,
            Duration::from_secs(1),
            Duration::ZERO,
        );
        assert_eq!(
            config.endpoint(&["customer_orders", "7"]).unwrap().as_str(),
            "http://localhost:9000/api/v1/customer_orders/7"
        );
    }

    #[test]
    fn test_endpoint_encodes_each_segment() {
        let config = SourceConfig::new(
            "http://localhost:9000",
            None,
            Duration::from_secs(1),
            Duration::ZERO,
        );
        assert_eq!(
            config
                .endpoint(&["order_components", "../customers"])
                .unwrap()
                .as_str(),
            "http://localhost:9000/order_components/..%2Fcustomers"
        );
        assert_eq!(
            config
                .endpoint(&["order_components", "A-1?page=2#top"])
                .unwrap()
                .as_str(),
            "http://localhost:9000/order_components/A-1%3Fpage=2%23top"
        );
    }

    #[test]
    fn test_endpoint_rejects_invalid_base_url() {
        let config = SourceConfig::new("not a url", None, Duration::from_secs(1), Duration::ZERO);
        assert!(config.endpoint(&["customers"]).is_err());

        let config = SourceConfig::new("mailto:orders", None, Duration::from_secs(1), Duration::ZERO);
        assert!(config.endpoint(&["customers"]).is_err());
    }

    #[test]
    fn test_credentials_debug_hides_password() {
        let credentials = Credentials {
            user: "user".to_string(),
            password: Some("secret".to_string()),
        };
        let printed = format!("{:?}", credentials);
        assert!(printed.contains("user"));
        assert!(!printed.contains("secret"));
    }
}
