//! Domain entities of the proxy topology.
//!
//! # Responsibilities
//! - Define hosts, listeners, frontends, middlewares, backends and servers
//! - Validate each entity on construction and after decoding
//!
//! # Design Decisions
//! - Entities are full-value records; an upsert replaces the whole value
//! - Identifiers double as store key segments, so they may not contain `/`
//! - Durations are kept as human-readable strings and validated eagerly

use std::io::BufReader;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::Error;
use crate::routing::RouteRule;

/// Frontend and backend type understood by the proxy.
pub const HTTP: &str = "http";

fn default_http() -> String {
    HTTP.to_string()
}

fn check_id(kind: &str, id: &str) -> Result<(), Error> {
    if id.trim().is_empty() {
        return Err(Error::InvalidFormat(format!("{} id can not be empty", kind)));
    }
    if id.contains('/') {
        return Err(Error::InvalidFormat(format!(
            "{} id '{}' may not contain '/'",
            kind, id
        )));
    }
    Ok(())
}

fn check_duration(field: &str, value: &Option<String>) -> Result<(), Error> {
    if let Some(raw) = value {
        humantime::parse_duration(raw)
            .map_err(|e| Error::InvalidFormat(format!("{}: '{}': {}", field, raw, e)))?;
    }
    Ok(())
}

fn parse_duration(value: &Option<String>) -> Option<Duration> {
    value
        .as_deref()
        .and_then(|raw| humantime::parse_duration(raw).ok())
}

// --- Host ---

/// A virtual host and its TLS settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub settings: HostSettings,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostSettings {
    /// Serve this host's certificate when SNI matches nothing else.
    #[serde(default)]
    pub default: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_pair: Option<KeyPair>,
    #[serde(default)]
    pub ocsp: OcspSettings,
}

/// Certificate status (OCSP stapling) settings, carried through opaquely.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OcspSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period: Option<String>,
    #[serde(default)]
    pub responders: Vec<String>,
    #[serde(default)]
    pub skip_signature_check: bool,
}

/// PEM-encoded certificate chain and private key.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPair {
    pub cert: String,
    pub key: String,
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("cert_bytes", &self.cert.len())
            .field("key", &"<redacted>")
            .finish()
    }
}

impl KeyPair {
    pub fn new(cert: impl Into<String>, key: impl Into<String>) -> Result<Self, Error> {
        let pair = Self {
            cert: cert.into(),
            key: key.into(),
        };
        pair.validate()?;
        Ok(pair)
    }

    /// Check that both halves are well-formed PEM.
    pub fn validate(&self) -> Result<(), Error> {
        let certs = rustls_pemfile::certs(&mut BufReader::new(self.cert.as_bytes()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| Error::InvalidFormat(format!("certificate: {}", e)))?;
        if certs.is_empty() {
            return Err(Error::InvalidFormat(
                "certificate: no PEM certificate found".into(),
            ));
        }
        match rustls_pemfile::private_key(&mut BufReader::new(self.key.as_bytes())) {
            Ok(Some(_)) => Ok(()),
            Ok(None) => Err(Error::InvalidFormat("key: no PEM private key found".into())),
            Err(e) => Err(Error::InvalidFormat(format!("key: {}", e))),
        }
    }
}

impl Host {
    pub fn new(name: impl Into<String>, settings: HostSettings) -> Result<Self, Error> {
        let host = Self {
            name: name.into(),
            settings,
        };
        host.validate()?;
        Ok(host)
    }

    pub fn validate(&self) -> Result<(), Error> {
        check_id("host", &self.name)?;
        if let Some(pair) = &self.settings.key_pair {
            pair.validate()?;
        }
        check_duration("ocsp period", &self.settings.ocsp.period)?;
        for responder in &self.settings.ocsp.responders {
            Url::parse(responder).map_err(|e| {
                Error::InvalidFormat(format!("ocsp responder '{}': {}", responder, e))
            })?;
        }
        Ok(())
    }
}

// --- Listener ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    Https,
}

impl Protocol {
    pub fn parse(raw: &str) -> Result<Self, Error> {
        match raw.to_lowercase().as_str() {
            "http" => Ok(Protocol::Http),
            "https" => Ok(Protocol::Https),
            other => Err(Error::InvalidFormat(format!(
                "unsupported protocol '{}', expected http or https",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Tcp,
    Unix,
}

impl Network {
    pub fn parse(raw: &str) -> Result<Self, Error> {
        match raw.to_lowercase().as_str() {
            "tcp" => Ok(Network::Tcp),
            "unix" => Ok(Network::Unix),
            other => Err(Error::InvalidFormat(format!(
                "unsupported network '{}', expected tcp or unix",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub network: Network,
    pub address: String,
}

/// A bind point of the proxy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listener {
    #[serde(default)]
    pub id: String,
    pub protocol: Protocol,
    pub address: Address,
    /// Optional route expression limiting which frontends the listener serves.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub scope: String,
}

impl Listener {
    pub fn new(id: &str, protocol: &str, network: &str, address: &str) -> Result<Self, Error> {
        let listener = Self {
            id: id.to_string(),
            protocol: Protocol::parse(protocol)?,
            address: Address {
                network: Network::parse(network)?,
                address: address.to_string(),
            },
            scope: String::new(),
        };
        listener.validate()?;
        Ok(listener)
    }

    pub fn validate(&self) -> Result<(), Error> {
        check_id("listener", &self.id)?;
        if self.address.address.trim().is_empty() {
            return Err(Error::InvalidFormat(format!(
                "listener '{}' address can not be empty",
                self.id
            )));
        }
        if !self.scope.is_empty() {
            RouteRule::parse(&self.scope)?;
        }
        Ok(())
    }
}

// --- Frontend ---

/// A routing rule bound to a backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frontend {
    #[serde(default)]
    pub id: String,
    pub route: String,
    pub backend_id: String,
    #[serde(rename = "type", default = "default_http")]
    pub kind: String,
    #[serde(default)]
    pub settings: FrontendSettings,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrontendSettings {
    #[serde(default)]
    pub limits: Limits,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub failover_predicate: String,
    /// Host header to send upstream, if rewritten.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub hostname: String,
    #[serde(default)]
    pub trust_forward_header: bool,
    #[serde(default)]
    pub pass_host_header: bool,
}

/// Request body limits; zero means unlimited.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limits {
    #[serde(default)]
    pub max_mem_body_bytes: u64,
    #[serde(default)]
    pub max_body_bytes: u64,
}

impl Frontend {
    pub fn new(
        id: impl Into<String>,
        backend_id: impl Into<String>,
        route: impl Into<String>,
        settings: FrontendSettings,
    ) -> Result<Self, Error> {
        let frontend = Self {
            id: id.into(),
            route: route.into(),
            backend_id: backend_id.into(),
            kind: default_http(),
            settings,
        };
        frontend.validate()?;
        Ok(frontend)
    }

    pub fn validate(&self) -> Result<(), Error> {
        check_id("frontend", &self.id)?;
        check_id("backend", &self.backend_id)?;
        if self.kind != HTTP {
            return Err(Error::InvalidFormat(format!(
                "frontend '{}': unsupported type '{}'",
                self.id, self.kind
            )));
        }
        self.rule().map(|_| ())
    }

    /// Parsed route rule.
    pub fn rule(&self) -> Result<RouteRule, Error> {
        RouteRule::parse(&self.route)
    }
}

// --- Middleware ---

/// A request processing step attached to a frontend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Middleware {
    #[serde(default)]
    pub id: String,
    /// Lower priorities run first.
    #[serde(default)]
    pub priority: i32,
    #[serde(rename = "type")]
    pub kind: String,
    /// Type-specific configuration, passed through untouched.
    #[serde(default)]
    pub middleware: serde_json::Value,
}

impl Middleware {
    pub fn new(
        id: impl Into<String>,
        priority: i32,
        kind: impl Into<String>,
        middleware: serde_json::Value,
    ) -> Result<Self, Error> {
        let m = Self {
            id: id.into(),
            priority,
            kind: kind.into(),
            middleware,
        };
        m.validate()?;
        Ok(m)
    }

    pub fn validate(&self) -> Result<(), Error> {
        check_id("middleware", &self.id)?;
        if self.kind.trim().is_empty() {
            return Err(Error::InvalidFormat(format!(
                "middleware '{}' type can not be empty",
                self.id
            )));
        }
        Ok(())
    }

    /// Chain ordering: priority, then id for a stable tie-break.
    pub fn order_key(&self) -> (i32, &str) {
        (self.priority, self.id.as_str())
    }
}

// --- Backend ---

/// A named pool of servers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backend {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default = "default_http")]
    pub kind: String,
    #[serde(default)]
    pub settings: BackendSettings,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendSettings {
    #[serde(default)]
    pub timeouts: Timeouts,
    #[serde(default)]
    pub keep_alive: KeepAlive,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<BackendTls>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeouts {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dial: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_handshake: Option<String>,
}

impl Timeouts {
    pub fn read(&self) -> Option<Duration> {
        parse_duration(&self.read)
    }

    pub fn dial(&self) -> Option<Duration> {
        parse_duration(&self.dial)
    }

    pub fn tls_handshake(&self) -> Option<Duration> {
        parse_duration(&self.tls_handshake)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeepAlive {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period: Option<String>,
    #[serde(default)]
    pub max_idle_conns_per_host: u32,
}

/// Client-side TLS settings used when dialing servers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendTls {
    #[serde(default)]
    pub insecure_skip_verify: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
}

impl Backend {
    pub fn new(id: impl Into<String>, settings: BackendSettings) -> Result<Self, Error> {
        let backend = Self {
            id: id.into(),
            kind: default_http(),
            settings,
        };
        backend.validate()?;
        Ok(backend)
    }

    pub fn validate(&self) -> Result<(), Error> {
        check_id("backend", &self.id)?;
        if self.kind != HTTP {
            return Err(Error::InvalidFormat(format!(
                "backend '{}': unsupported type '{}'",
                self.id, self.kind
            )));
        }
        let t = &self.settings.timeouts;
        check_duration("read timeout", &t.read)?;
        check_duration("dial timeout", &t.dial)?;
        check_duration("tls handshake timeout", &t.tls_handshake)?;
        check_duration("keep alive period", &self.settings.keep_alive.period)?;
        Ok(())
    }
}

// --- Server ---

/// One endpoint of a backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Server {
    #[serde(default)]
    pub id: String,
    pub url: String,
}

impl Server {
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Result<Self, Error> {
        let server = Self {
            id: id.into(),
            url: url.into(),
        };
        server.validate()?;
        Ok(server)
    }

    pub fn validate(&self) -> Result<(), Error> {
        check_id("server", &self.id)?;
        self.parsed_url().map(|_| ())
    }

    pub fn parsed_url(&self) -> Result<Url, Error> {
        let url = Url::parse(&self.url)
            .map_err(|e| Error::InvalidFormat(format!("server url '{}': {}", self.url, e)))?;
        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
            return Err(Error::InvalidFormat(format!(
                "server url '{}' must be an absolute http(s) url",
                self.url
            )));
        }
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listener_lowercases_protocol_and_network() {
        let l = Listener::new("l1", "HTTPS", "TCP", "0.0.0.0:443").unwrap();
        assert_eq!(l.protocol, Protocol::Https);
        assert_eq!(l.address.network, Network::Tcp);
    }

    #[test]
    fn test_listener_rejects_empty_address() {
        assert!(matches!(
            Listener::new("l1", "http", "tcp", " "),
            Err(Error::InvalidFormat(_))
        ));
        assert!(Listener::new("l1", "udp", "tcp", ":80").is_err());
    }

    #[test]
    fn test_ids_are_validated() {
        assert!(Backend::new("", BackendSettings::default()).is_err());
        assert!(Backend::new("a/b", BackendSettings::default()).is_err());
        assert!(Host::new("example.com", HostSettings::default()).is_ok());
    }

    #[test]
    fn test_backend_rejects_bad_duration() {
        let mut settings = BackendSettings::default();
        settings.timeouts.read = Some("5 parsecs".into());
        assert!(Backend::new("b1", settings).is_err());

        let mut settings = BackendSettings::default();
        settings.timeouts.dial = Some("1m30s".into());
        let backend = Backend::new("b1", settings).unwrap();
        assert_eq!(backend.settings.timeouts.dial(), Some(Duration::from_secs(90)));
    }

    #[test]
    fn test_server_url_must_be_http() {
        assert!(Server::new("s1", "http://10.0.0.1:80").is_ok());
        assert!(Server::new("s1", "ftp://10.0.0.1").is_err());
        assert!(Server::new("s1", "not a url").is_err());
    }

    #[test]
    fn test_frontend_requires_valid_route() {
        assert!(Frontend::new("f1", "b1", r#"PathPrefix("/")"#, Default::default()).is_ok());
        assert!(Frontend::new("f1", "b1", "Bogus(", Default::default()).is_err());
        assert!(Frontend::new("f1", "", r#"Path("/")"#, Default::default()).is_err());
    }

    #[test]
    fn test_middleware_order_key() {
        let a = Middleware::new("a", 2, "headers", serde_json::Value::Null).unwrap();
        let b = Middleware::new("b", 1, "headers", serde_json::Value::Null).unwrap();
        assert!(b.order_key() < a.order_key());
    }

    #[test]
    fn test_key_pair_rejects_garbage() {
        assert!(KeyPair::new("not pem", "also not pem").is_err());
    }

    #[test]
    fn test_key_pair_debug_redacts_key() {
        let pair = KeyPair {
            cert: "cert".into(),
            key: "secret-key".into(),
        };
        assert!(!format!("{:?}", pair).contains("secret-key"));
    }
}
