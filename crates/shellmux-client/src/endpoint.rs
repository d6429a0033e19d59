//! Socket endpoint resolution.
//!
//! The base socket URL comes from a small configuration object fetched over
//! an authenticated request. When that fetch fails, or returns a loopback
//! address while the page itself is served from another host, the endpoint
//! is derived from the page's own address instead:
//! - `https` pages → `wss://`, anything else → `ws://`
//! - the UI dev port maps to the API port (4009 → 4008 by default)
//!
//! The auth token travels as the `token` query parameter.

use std::fmt;
use std::future::Future;
use std::net::IpAddr;
use std::pin::Pin;
use std::time::Duration;

use reqwest::Url;
use serde::Deserialize;
use tracing::{debug, warn};

use shellmux_core::error::{ShellError, ShellResult};

/// The configuration object served by the API.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServerConfig {
    #[serde(rename = "wsUrl")]
    pub ws_url: String,
}

/// Fetches the server configuration with the caller's token.
pub trait ConfigFetcher: Send + Sync {
    fn fetch_config<'a>(
        &'a self,
        token: &'a str,
    ) -> Pin<Box<dyn Future<Output = ShellResult<ServerConfig>> + Send + 'a>>;
}

/// `GET <config_url>` with a bearer token.
pub struct HttpConfigFetcher {
    config_url: String,
    client: reqwest::Client,
}

impl HttpConfigFetcher {
    pub fn new(config_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            config_url: config_url.into(),
            client,
        }
    }
}

impl ConfigFetcher for HttpConfigFetcher {
    fn fetch_config<'a>(
        &'a self,
        token: &'a str,
    ) -> Pin<Box<dyn Future<Output = ShellResult<ServerConfig>> + Send + 'a>> {
        Box::pin(async move {
            let resp = self
                .client
                .get(&self.config_url)
                .bearer_auth(token)
                .send()
                .await
                .map_err(|e| ShellError::Config(format!("config request failed: {e}")))?
                .error_for_status()
                .map_err(|e| ShellError::Config(format!("config request rejected: {e}")))?;
            resp.json::<ServerConfig>()
                .await
                .map_err(|e| ShellError::Config(format!("config body invalid: {e}")))
        })
    }
}

/// The address of the page hosting the terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageLocation {
    pub secure: bool,
    pub hostname: String,
    /// Explicit port, `None` for the scheme default.
    pub port: Option<u16>,
}

impl PageLocation {
    /// Parse a page URL such as `https://dev.example.com:4009/`.
    pub fn parse(url: &str) -> ShellResult<Self> {
        let url = Url::parse(url).map_err(|e| ShellError::Config(format!("invalid page URL {url}: {e}")))?;
        let hostname = url
            .host_str()
            .ok_or_else(|| ShellError::Config(format!("page URL has no host: {url}")))?
            .to_string();
        Ok(Self {
            secure: url.scheme() == "https",
            hostname,
            port: url.port(),
        })
    }

    fn socket_scheme(&self) -> &'static str {
        if self.secure {
            "wss"
        } else {
            "ws"
        }
    }

    fn is_loopback(&self) -> bool {
        is_loopback_host(&self.hostname)
    }
}

/// Maps the UI dev-server port to the API server port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct PortRule {
    pub ui_port: u16,
    pub api_port: u16,
}

impl Default for PortRule {
    fn default() -> Self {
        Self {
            ui_port: 4009,
            api_port: 4008,
        }
    }
}

/// Endpoint resolution settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EndpointConfig {
    /// Path of the shell socket under the base URL.
    #[serde(default = "default_shell_path")]
    pub shell_path: String,
    #[serde(default)]
    pub port_rule: PortRule,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            shell_path: default_shell_path(),
            port_rule: PortRule::default(),
        }
    }
}

fn default_shell_path() -> String {
    "/shell".to_string()
}

/// A resolved socket endpoint. `Display` redacts the token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    url: Url,
}

impl Endpoint {
    /// Build `<base><shell_path>?token=<token>`.
    pub fn build(base: &str, shell_path: &str, token: &str) -> ShellResult<Self> {
        let raw = format!("{}{}", base.trim_end_matches('/'), shell_path);
        let mut url = Url::parse(&raw)
            .map_err(|e| ShellError::Config(format!("invalid socket URL {raw}: {e}")))?;
        url.query_pairs_mut().append_pair("token", token);
        Ok(Self { url })
    }

    /// The full URL, token included.
    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let full = self.url.as_str();
        match full.find("token=") {
            Some(at) => write!(f, "{}[REDACTED]", &full[..at + "token=".len()]),
            None => f.write_str(full),
        }
    }
}

/// Resolves the socket endpoint for a connect attempt.
pub struct EndpointResolver {
    fetcher: Box<dyn ConfigFetcher>,
    page: PageLocation,
    config: EndpointConfig,
}

impl EndpointResolver {
    pub fn new(fetcher: Box<dyn ConfigFetcher>, page: PageLocation) -> Self {
        Self::with_config(fetcher, page, EndpointConfig::default())
    }

    pub fn with_config(
        fetcher: Box<dyn ConfigFetcher>,
        page: PageLocation,
        config: EndpointConfig,
    ) -> Self {
        Self {
            fetcher,
            page,
            config,
        }
    }

    /// Fetch the configured base URL, falling back to the page host, and
    /// append the shell path and token.
    pub async fn resolve(&self, token: &str) -> ShellResult<Endpoint> {
        let base = match self.fetcher.fetch_config(token).await {
            Ok(config) => self.vet_base(&config.ws_url),
            Err(e) => {
                warn!(error = %e, "config fetch failed, deriving endpoint from page host");
                self.fallback_base()
            }
        };
        Endpoint::build(&base, &self.config.shell_path, token)
    }

    /// Same-host base URL derived from the page location.
    pub fn fallback_base(&self) -> String {
        let rule = self.config.port_rule;
        let port = match self.page.port {
            Some(p) if p == rule.ui_port => Some(rule.api_port),
            other => other,
        };
        match port {
            Some(port) => format!("{}://{}:{}", self.page.socket_scheme(), self.page.hostname, port),
            None => format!("{}://{}", self.page.socket_scheme(), self.page.hostname),
        }
    }

    /// Keep a configured base URL unless it is clearly wrong for this page.
    fn vet_base(&self, ws_url: &str) -> String {
        let url = match Url::parse(ws_url) {
            Ok(url) if matches!(url.scheme(), "ws" | "wss") => url,
            _ => {
                warn!(ws_url, "configured socket URL unusable, deriving from page host");
                return self.fallback_base();
            }
        };
        let loopback = url.host_str().map(is_loopback_host).unwrap_or(false);
        if loopback && !self.page.is_loopback() {
            debug!(ws_url, page_host = %self.page.hostname, "configured socket URL is loopback, deriving from page host");
            return self.fallback_base();
        }
        ws_url.to_string()
    }
}

fn is_loopback_host(host: &str) -> bool {
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.eq_ignore_ascii_case("localhost") || host.to_ascii_lowercase().ends_with(".localhost") {
        return true;
    }
    host.parse::<IpAddr>().map(|ip| ip.is_loopback()).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticFetcher(Option<&'static str>);

    impl ConfigFetcher for StaticFetcher {
        fn fetch_config<'a>(
            &'a self,
            _token: &'a str,
        ) -> Pin<Box<dyn Future<Output = ShellResult<ServerConfig>> + Send + 'a>> {
            let result = match self.0 {
                Some(url) => Ok(ServerConfig { ws_url: url.to_string() }),
                None => Err(ShellError::Config("unreachable".into())),
            };
            Box::pin(async move { result })
        }
    }

    fn resolver(config: Option<&'static str>, page: &str) -> EndpointResolver {
        EndpointResolver::new(Box::new(StaticFetcher(config)), PageLocation::parse(page).unwrap())
    }

    #[test]
    fn parse_page_location() {
        let page = PageLocation::parse("https://dev.example.com:4009/app").unwrap();
        assert!(page.secure);
        assert_eq!(page.hostname, "dev.example.com");
        assert_eq!(page.port, Some(4009));

        let page = PageLocation::parse("http://example.com/").unwrap();
        assert!(!page.secure);
        assert_eq!(page.port, None);
    }

    #[tokio::test]
    async fn configured_url_is_used() {
        let r = resolver(Some("wss://shell.example.com"), "https://app.example.com/");
        let endpoint = r.resolve("tok1").await.unwrap();
        assert_eq!(endpoint.as_str(), "wss://shell.example.com/shell?token=tok1");
    }

    #[tokio::test]
    async fn loopback_config_on_remote_page_falls_back() {
        let r = resolver(Some("ws://localhost:4008"), "https://dev.example.com:4009/");
        let endpoint = r.resolve("tok1").await.unwrap();
        assert_eq!(endpoint.as_str(), "wss://dev.example.com:4008/shell?token=tok1");
    }

    #[tokio::test]
    async fn loopback_config_on_loopback_page_is_kept() {
        let r = resolver(Some("ws://127.0.0.1:4008"), "http://localhost:4009/");
        let endpoint = r.resolve("t").await.unwrap();
        assert_eq!(endpoint.as_str(), "ws://127.0.0.1:4008/shell?token=t");
    }

    #[tokio::test]
    async fn failed_fetch_falls_back_to_page_host() {
        let r = resolver(None, "http://box.lan:8080/");
        let endpoint = r.resolve("t").await.unwrap();
        assert_eq!(endpoint.as_str(), "ws://box.lan:8080/shell?token=t");
    }

    #[tokio::test]
    async fn non_socket_scheme_falls_back() {
        let r = resolver(Some("not a url"), "https://example.com/");
        let endpoint = r.resolve("t").await.unwrap();
        assert_eq!(endpoint.as_str(), "wss://example.com/shell?token=t");
    }

    #[test]
    fn fallback_without_port() {
        let r = resolver(None, "https://example.com/");
        assert_eq!(r.fallback_base(), "wss://example.com");
    }

    #[test]
    fn token_is_url_encoded() {
        let endpoint = Endpoint::build("ws://h:1/", "/shell", "a b&c=d").unwrap();
        assert_eq!(endpoint.as_str(), "ws://h:1/shell?token=a+b%26c%3Dd");
    }

    #[test]
    fn display_redacts_token() {
        let endpoint = Endpoint::build("wss://h", "/shell", "secret").unwrap();
        let shown = endpoint.to_string();
        assert!(!shown.contains("secret"));
        assert!(shown.ends_with("token=[REDACTED]"));
    }

    #[test]
    fn loopback_hosts() {
        assert!(is_loopback_host("localhost"));
        assert!(is_loopback_host("127.0.0.1"));
        assert!(is_loopback_host("[::1]"));
        assert!(!is_loopback_host("example.com"));
        assert!(!is_loopback_host("10.0.0.2"));
    }
}
