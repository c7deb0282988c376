//! SSE manager configuration.

use std::{collections::HashSet, time::Duration};

use crate::{
    error::{SseError, SseResult},
    reconnect::BackoffConfig,
};

/// Configuration for an [`SseManager`](crate::SseManager).
///
/// Describes the single endpoint the manager streams from, the default
/// event allow-list for its first event source, and the retry policy.
#[derive(Clone, Debug)]
pub struct SseConfig {
    /// Optional display name, attached to logs and event sources.
    pub name: Option<String>,
    /// URL scheme (`http` or `https`).
    pub scheme: String,
    /// Host name or address of the endpoint.
    pub host: String,
    /// TCP port of the endpoint.
    pub port: u16,
    /// Request path, must start with `/`.
    pub path: String,
    /// Timeout for establishing the connection. The stream itself has no
    /// deadline.
    pub request_timeout: Duration,
    /// Event names accepted by default (`None` or empty = all).
    pub events: Option<Vec<String>>,
    /// Additional HTTP headers sent with every stream request.
    pub headers: http::HeaderMap,
    /// Maximum number of reconnect attempts after the first failure.
    pub max_retries: u32,
    /// Delay before the first reconnect attempt (zero = immediate).
    pub reconnect_initial_delay: Duration,
    /// Maximum delay between reconnect attempts.
    pub reconnect_max_delay: Duration,
    /// Backoff multiplier for reconnect delays.
    pub reconnect_backoff_factor: f64,
    /// Random jitter factor (0.0–1.0) for reconnect delays.
    pub reconnect_jitter: f64,
    /// Event names to log as they are parsed: `None` logs nothing,
    /// an empty set logs everything.
    pub log_events: Option<HashSet<String>>,
}

impl Default for SseConfig {
    fn default() -> Self {
        Self {
            name: None,
            scheme: "http".to_string(),
            host: String::new(),
            port: 80,
            path: "/".to_string(),
            request_timeout: Duration::from_secs(5),
            events: None,
            headers: http::HeaderMap::new(),
            max_retries: 3,
            reconnect_initial_delay: Duration::ZERO,
            reconnect_max_delay: Duration::from_secs(30),
            reconnect_backoff_factor: 2.0,
            reconnect_jitter: 0.1,
            log_events: None,
        }
    }
}

impl SseConfig {
    /// Create a configuration for `http://{host}:80{path}`.
    #[must_use]
    pub fn new(host: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            path: path.into(),
            ..Default::default()
        }
    }

    /// Build a configuration from a full URL such as
    /// `http://192.168.0.20:15081/notify`.
    ///
    /// # Errors
    ///
    /// Returns [`SseError::Config`] if the URL cannot be parsed, has no host,
    /// or uses a scheme other than `http`/`https`.
    pub fn from_url(url: &str) -> SseResult<Self> {
        let uri: http::Uri = url
            .parse()
            .map_err(|e| SseError::config(format!("Invalid URL {url}: {e}")))?;

        let scheme = uri.scheme_str().unwrap_or("http").to_ascii_lowercase();
        let default_port = match scheme.as_str() {
            "http" => 80,
            "https" => 443,
            other => return Err(SseError::config(format!("Unsupported scheme: {other}"))),
        };
        let host = uri
            .host()
            .ok_or_else(|| SseError::config(format!("URL has no host: {url}")))?;
        let path = uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .filter(|pq| pq.starts_with('/'))
            .unwrap_or("/");

        Ok(Self {
            scheme,
            host: host.to_string(),
            port: uri.port_u16().unwrap_or(default_port),
            path: path.to_string(),
            ..Default::default()
        })
    }

    /// Set the display name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the URL scheme.
    #[must_use]
    pub fn scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }

    /// Set the port.
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the connection establishment timeout.
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the default event allow-list.
    #[must_use]
    pub fn events<I, S>(mut self, events: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.events = Some(events.into_iter().map(Into::into).collect());
        self
    }

    /// Set additional HTTP headers.
    #[must_use]
    pub fn headers(mut self, headers: http::HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Set the maximum number of reconnect attempts.
    #[must_use]
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set the initial reconnect delay.
    #[must_use]
    pub fn reconnect_initial_delay(mut self, delay: Duration) -> Self {
        self.reconnect_initial_delay = delay;
        self
    }

    /// Set the maximum reconnect delay.
    #[must_use]
    pub fn reconnect_max_delay(mut self, delay: Duration) -> Self {
        self.reconnect_max_delay = delay;
        self
    }

    /// Set the reconnect backoff factor.
    #[must_use]
    pub fn reconnect_backoff_factor(mut self, factor: f64) -> Self {
        self.reconnect_backoff_factor = factor;
        self
    }

    /// Set the reconnect jitter factor.
    #[must_use]
    pub fn reconnect_jitter(mut self, jitter: f64) -> Self {
        self.reconnect_jitter = jitter;
        self
    }

    /// Log parsed events whose name is in `events` (empty = all events).
    #[must_use]
    pub fn log_events<I, S>(mut self, events: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.log_events = Some(events.into_iter().map(Into::into).collect());
        self
    }

    /// Full endpoint URI, e.g. `http://host:80/path`.
    pub fn uri(&self) -> String {
        format!("{}://{}:{}{}", self.scheme, self.host, self.port, self.path)
    }

    /// Whether an event with the given name should be logged.
    pub fn should_log_event(&self, name: Option<&str>) -> bool {
        match &self.log_events {
            None => false,
            Some(set) if set.is_empty() => true,
            Some(set) => name.is_some_and(|n| set.contains(n)),
        }
    }

    pub(crate) fn backoff(&self) -> BackoffConfig {
        BackoffConfig {
            initial_delay: self.reconnect_initial_delay,
            max_delay: self.reconnect_max_delay,
            factor: self.reconnect_backoff_factor,
            jitter: self.reconnect_jitter,
        }
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error message string if any field has an invalid value.
    pub fn validate(&self) -> Result<(), String> {
        if self.host.is_empty() {
            return Err("Host cannot be empty".to_string());
        }
        if !self.path.starts_with('/') {
            return Err("Path must start with /".to_string());
        }
        if self.scheme != "http" && self.scheme != "https" {
            return Err("Scheme must be http or https".to_string());
        }
        if self.request_timeout.is_zero() {
            return Err("Request timeout must be > 0".to_string());
        }
        self.backoff().validate()
    }
}
