//! Client configuration and endpoint resolution.

use std::fmt;
use std::time::Duration;

use serde::Deserialize;
use tonic::transport::Uri;

use crate::cache::DEFAULT_TTL;
use crate::credential::Credential;
use crate::error::{Error, Result};

/// Environment variable holding the controller address
pub const ADDRESS_VAR: &str = "CONTROLLER_ADDRESS";
/// Environment variable holding this server's access token
pub const TOKEN_VAR: &str = "SERVER_TOKEN";
/// Environment variable holding the PEM trust anchor of the controller
pub const CERTIFICATE_VAR: &str = "CONTROLLER_CERTIFICATE";

/// Default interval between two heartbeats
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
/// Default number of calls the bridge completes concurrently
pub const DEFAULT_MAX_IN_FLIGHT: usize = 64;
/// Default bound on establishing the transport
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// How the transport to the controller is secured
#[derive(Clone, PartialEq, Eq)]
pub enum TransportSecurity {
    /// Unencrypted HTTP/2
    Plaintext,
    /// TLS, trusting only the given PEM certificate
    Tls {
        /// PEM encoded trust anchor
        trust_anchor: String,
    },
}

impl fmt::Debug for TransportSecurity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportSecurity::Plaintext => f.write_str("Plaintext"),
            TransportSecurity::Tls { .. } => f.debug_struct("Tls").finish_non_exhaustive(),
        }
    }
}

/// A validated controller endpoint. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    host: String,
    port: u16,
    security: TransportSecurity,
}

impl Endpoint {
    /// Parse an address such as `http://10.0.0.2:8080`.
    ///
    /// A certificate switches the endpoint to TLS regardless of the scheme.
    /// An `https` address without a certificate is rejected since there is
    /// no trust anchor to verify the controller against.
    pub fn parse(address: &str, certificate: Option<&str>) -> Result<Self> {
        let address = address.trim();
        if address.is_empty() {
            return Err(Error::Configuration("controller address is empty".into()));
        }

        let uri: Uri = address.parse().map_err(|e| {
            Error::Configuration(format!("invalid controller address {address:?}: {e}"))
        })?;

        let https = match uri.scheme_str() {
            Some("https") => true,
            Some("http") | None => false,
            Some(other) => {
                return Err(Error::Configuration(format!(
                    "unsupported scheme {other:?} in controller address"
                )));
            }
        };

        let host = match uri.host() {
            Some(host) if !host.is_empty() => host.to_string(),
            _ => {
                return Err(Error::Configuration(format!(
                    "controller address {address:?} has no host"
                )));
            }
        };

        let security = match certificate.map(str::trim).filter(|c| !c.is_empty()) {
            Some(pem) => TransportSecurity::Tls {
                trust_anchor: pem.to_string(),
            },
            None if https => {
                return Err(Error::Configuration(format!(
                    "https controller address requires {CERTIFICATE_VAR}"
                )));
            }
            None => TransportSecurity::Plaintext,
        };

        let port = uri.port_u16().unwrap_or(if https { 443 } else { 80 });

        Ok(Self {
            host,
            port,
            security,
        })
    }

    /// Host name or address, without IPv6 brackets.
    pub fn host(&self) -> &str {
        self.host.trim_start_matches('[').trim_end_matches(']')
    }

    /// Port of the controller.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Transport security of the endpoint.
    pub fn security(&self) -> &TransportSecurity {
        &self.security
    }

    /// The URI tonic dials.
    pub fn uri(&self) -> String {
        let scheme = match self.security {
            TransportSecurity::Plaintext => "http",
            TransportSecurity::Tls { .. } => "https",
        };
        format!("{scheme}://{}:{}", self.host, self.port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uri())
    }
}

/// Raw configuration of a connection.
///
/// Nothing is validated until [`Connection::connect`](crate::Connection::connect)
/// checks the tunables and resolves the endpoint and credential.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Controller address, e.g. `http://127.0.0.1:8080`
    pub address: Option<String>,
    /// Token identifying this server
    pub token: Option<String>,
    /// PEM trust anchor; enables TLS when set
    pub certificate: Option<String>,
    /// Interval between heartbeats
    #[serde(with = "duration_ms")]
    pub heartbeat_interval: Duration,
    /// Maximum number of calls completed concurrently by the bridge
    pub max_in_flight: usize,
    /// Validity of cached reference data
    #[serde(with = "duration_ms")]
    pub cache_ttl: Duration,
    /// Bound on establishing the transport
    #[serde(with = "duration_ms")]
    pub connect_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: None,
            token: None,
            certificate: None,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            cache_ttl: DEFAULT_TTL,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("address", &self.address)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("certificate", &self.certificate.is_some())
            .field("heartbeat_interval", &self.heartbeat_interval)
            .field("max_in_flight", &self.max_in_flight)
            .field("cache_ttl", &self.cache_ttl)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

impl ClientConfig {
    /// Create an empty configuration with default tunables.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read address, token and certificate from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read address, token and certificate through `lookup`.
    ///
    /// Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            address: get(ADDRESS_VAR),
            token: get(TOKEN_VAR),
            certificate: get(CERTIFICATE_VAR),
            ..Self::default()
        }
    }

    /// Set the controller address.
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Set the access token.
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Set the PEM trust anchor.
    pub fn certificate(mut self, pem: impl Into<String>) -> Self {
        self.certificate = Some(pem.into());
        self
    }

    /// Set the heartbeat interval.
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Set the bridge concurrency bound.
    pub fn max_in_flight(mut self, max: usize) -> Self {
        self.max_in_flight = max;
        self
    }

    /// Set the validity of cached reference data.
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Set the bound on establishing the transport.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Reject tunables the connection cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.heartbeat_interval.is_zero() {
            return Err(Error::Configuration("heartbeat interval must be greater than zero".into()));
        }
        if self.connect_timeout.is_zero() {
            return Err(Error::Configuration("connect timeout must be greater than zero".into()));
        }
        if self.max_in_flight == 0 {
            return Err(Error::Configuration("max_in_flight must be at least 1".into()));
        }
        Ok(())
    }

    /// Resolve the endpoint.
    pub fn endpoint(&self) -> Result<Endpoint> {
        let address = self
            .address
            .as_deref()
            .ok_or_else(|| Error::Configuration(format!("{ADDRESS_VAR} not set")))?;
        Endpoint::parse(address, self.certificate.as_deref())
    }

    /// Resolve the credential.
    pub fn credential(&self) -> Result<Credential> {
        let token = self
            .token
            .as_deref()
            .ok_or_else(|| Error::Configuration(format!("{TOKEN_VAR} not set")))?;
        Credential::new(token)
    }
}

/// Helper for (de)serializing Duration as milliseconds
mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_plaintext_endpoint() {
        let endpoint = Endpoint::parse("http://10.0.0.2:8080", None).unwrap();
        assert_eq!(endpoint.host(), "10.0.0.2");
        assert_eq!(endpoint.port(), 8080);
        assert_eq!(endpoint.security(), &TransportSecurity::Plaintext);
        assert_eq!(endpoint.uri(), "http://10.0.0.2:8080");
    }

    #[test]
    fn test_certificate_selects_tls() {
        let endpoint = Endpoint::parse("http://ctrl.local:8080", Some("-----BEGIN")).unwrap();
        assert!(matches!(endpoint.security(), TransportSecurity::Tls { .. }));
        assert_eq!(endpoint.uri(), "https://ctrl.local:8080");
    }

    #[test]
    fn test_default_ports() {
        assert_eq!(Endpoint::parse("http://ctrl", None).unwrap().port(), 80);
        assert_eq!(
            Endpoint::parse("https://ctrl", Some("pem")).unwrap().port(),
            443
        );
    }

    #[test]
    fn test_ipv6_host_unbracketed() {
        let endpoint = Endpoint::parse("http://[::1]:50051", None).unwrap();
        assert_eq!(endpoint.host(), "::1");
        assert_eq!(endpoint.uri(), "http://[::1]:50051");
    }

    #[test]
    fn test_https_without_certificate_rejected() {
        let err = Endpoint::parse("https://ctrl:443", None).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_malformed_addresses_rejected() {
        for bad in ["", "   ", "ftp://ctrl:21", "http://", "http://exa mple"] {
            let err = Endpoint::parse(bad, None).unwrap_err();
            assert!(matches!(err, Error::Configuration(_)), "accepted {bad:?}");
        }
    }

    #[test]
    fn test_from_lookup() {
        let config = ClientConfig::from_lookup(lookup(&[
            (ADDRESS_VAR, "http://127.0.0.1:9000"),
            (TOKEN_VAR, "secret"),
        ]));
        assert_eq!(config.address.as_deref(), Some("http://127.0.0.1:9000"));
        assert_eq!(config.token.as_deref(), Some("secret"));
        assert!(config.certificate.is_none());
        assert_eq!(config.heartbeat_interval, DEFAULT_HEARTBEAT_INTERVAL);
        assert_eq!(config.cache_ttl, DEFAULT_TTL);
    }

    #[test]
    fn test_empty_values_count_as_unset() {
        let config = ClientConfig::from_lookup(lookup(&[(ADDRESS_VAR, ""), (TOKEN_VAR, " ")]));
        assert!(config.address.is_none());
        assert!(config.token.is_none());
    }

    #[test]
    fn test_missing_address_is_configuration_error() {
        let config = ClientConfig::new().token("secret");
        let err = config.endpoint().unwrap_err();
        assert!(matches!(err, Error::Configuration(ref msg) if msg.contains(ADDRESS_VAR)));
    }

    #[test]
    fn test_missing_token_is_configuration_error() {
        let config = ClientConfig::new().address("http://127.0.0.1:1");
        let err = config.credential().unwrap_err();
        assert!(matches!(err, Error::Configuration(ref msg) if msg.contains(TOKEN_VAR)));
    }

    #[test]
    fn test_debug_redacts_token() {
        let config = ClientConfig::new().token("very-secret-token");
        let debug = format!("{config:?}");
        assert!(!debug.contains("very-secret-token"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_deserialize_durations_as_millis() {
        let config: ClientConfig = serde_json::from_str(
            r#"{"address":"http://ctrl:1","heartbeat_interval":2500,"cache_ttl":1000}"#,
        )
        .unwrap();
        assert_eq!(config.heartbeat_interval, Duration::from_millis(2500));
        assert_eq!(config.cache_ttl, Duration::from_secs(1));
        assert_eq!(config.max_in_flight, DEFAULT_MAX_IN_FLIGHT);
        assert_eq!(config.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
    }

    #[test]
    fn test_defaults_are_valid() {
        ClientConfig::new().validate().unwrap();
    }

    #[test]
    fn test_zero_heartbeat_interval_rejected() {
        let config = ClientConfig::new().heartbeat_interval(Duration::ZERO);
        let err = config.validate().unwrap_err();
        assert!(matches!(err, Error::Configuration(ref msg) if msg.contains("heartbeat")));

        let config: ClientConfig = serde_json::from_str(r#"{"heartbeat_interval":0}"#).unwrap();
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_zero_tunables_rejected() {
        let err = ClientConfig::new()
            .connect_timeout(Duration::ZERO)
            .validate()
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(ref msg) if msg.contains("connect timeout")));

        let err = ClientConfig::new().max_in_flight(0).validate().unwrap_err();
        assert!(matches!(err, Error::Configuration(ref msg) if msg.contains("max_in_flight")));
    }
}
