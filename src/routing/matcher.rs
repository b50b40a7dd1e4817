//! Route rule parsing and matching.
//!
//! # Responsibilities
//! - Parse route expressions such as `Host("a.com") && PathPrefix("/api")`
//! - Match host (exact, case-insensitive, port ignored) and path conditions
//! - Combine conditions with AND semantics
//!
//! # Design Decisions
//! - Path matching is case-sensitive
//! - A rule without a `Host` condition lives in the catch-all router
//! - No regex to guarantee O(n) matching

use crate::error::Error;

/// Router key used for rules that do not name a host.
pub const CATCH_ALL: &str = "*";

/// Path condition of a rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathMatch {
    Exact(String),
    Prefix(String),
}

impl PathMatch {
    pub fn as_str(&self) -> &str {
        match self {
            PathMatch::Exact(p) | PathMatch::Prefix(p) => p,
        }
    }

    pub fn matches(&self, path: &str) -> bool {
        match self {
            PathMatch::Exact(p) => path == p,
            PathMatch::Prefix(p) => path.starts_with(p.as_str()),
        }
    }

    /// Larger is more specific; exact paths beat prefixes of the same length.
    pub fn specificity(&self) -> (usize, bool) {
        match self {
            PathMatch::Exact(p) => (p.len(), true),
            PathMatch::Prefix(p) => (p.len(), false),
        }
    }
}

/// A parsed route expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RouteRule {
    /// Lowercased host, if the rule names one.
    pub host: Option<String>,
    pub path: PathMatch,
}

impl RouteRule {
    /// Parse a route expression.
    pub fn parse(expr: &str) -> Result<Self, Error> {
        let mut host = None;
        let mut path = None;

        if expr.trim().is_empty() {
            return Err(Error::InvalidFormat("route can not be empty".into()));
        }

        for term in expr.split("&&").map(str::trim) {
            let (name, arg) = parse_term(term)?;
            match name {
                "Host" => {
                    if host.replace(normalize_host(arg)).is_some() {
                        return Err(duplicate(expr, "Host"));
                    }
                }
                "Path" | "PathPrefix" => {
                    if !arg.starts_with('/') {
                        return Err(Error::InvalidFormat(format!(
                            "route '{}': path '{}' must start with '/'",
                            expr, arg
                        )));
                    }
                    let matcher = if name == "Path" {
                        PathMatch::Exact(arg.to_string())
                    } else {
                        PathMatch::Prefix(arg.to_string())
                    };
                    if path.replace(matcher).is_some() {
                        return Err(duplicate(expr, "Path"));
                    }
                }
                other => {
                    return Err(Error::InvalidFormat(format!(
                        "route '{}': unknown matcher '{}'",
                        expr, other
                    )))
                }
            }
        }

        Ok(Self {
            host,
            path: path.unwrap_or_else(|| PathMatch::Prefix("/".into())),
        })
    }

    /// Name of the router this rule attaches to.
    pub fn router_key(&self) -> &str {
        self.host.as_deref().unwrap_or(CATCH_ALL)
    }

    pub fn matches(&self, host: &str, path: &str) -> bool {
        let host_ok = match &self.host {
            Some(expected) => normalize_host(host) == *expected,
            None => true,
        };
        host_ok && self.path.matches(path)
    }
}

impl std::fmt::Display for RouteRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(host) = &self.host {
            write!(f, "Host(\"{}\") && ", host)?;
        }
        match &self.path {
            PathMatch::Exact(p) => write!(f, "Path(\"{}\")", p),
            PathMatch::Prefix(p) => write!(f, "PathPrefix(\"{}\")", p),
        }
    }
}

/// Lowercase and drop any port.
pub fn normalize_host(host: &str) -> String {
    let host = host.trim();
    let without_port = match host.rsplit_once(':') {
        Some((name, port))
            if !port.is_empty()
                && port.chars().all(|c| c.is_ascii_digit())
                && (!name.contains(':') || name.ends_with(']')) =>
        {
            name
        }
        _ => host,
    };
    without_port.to_lowercase()
}

fn parse_term(term: &str) -> Result<(&str, &str), Error> {
    let invalid = || Error::InvalidFormat(format!("malformed route term '{}'", term));
    let open = term.find('(').ok_or_else(invalid)?;
    let inner = term[open + 1..].strip_suffix(')').ok_or_else(invalid)?.trim();
    let name = term[..open].trim();
    let arg = ['"', '`']
        .iter()
        .find_map(|q| inner.strip_prefix(*q).and_then(|s| s.strip_suffix(*q)))
        .ok_or_else(invalid)?;
    if name.is_empty() || arg.is_empty() {
        return Err(invalid());
    }
    Ok((name, arg))
}

fn duplicate(expr: &str, what: &str) -> Error {
    Error::InvalidFormat(format!("route '{}': {} given more than once", expr, what))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_host_and_prefix() {
        let rule = RouteRule::parse(r#"Host("Example.COM") && PathPrefix("/api")"#).unwrap();
        assert_eq!(rule.host.as_deref(), Some("example.com"));
        assert_eq!(rule.path, PathMatch::Prefix("/api".into()));
        assert_eq!(rule.router_key(), "example.com");
    }

    #[test]
    fn test_parse_defaults_to_root_prefix() {
        let rule = RouteRule::parse("Host(`a.com`)").unwrap();
        assert_eq!(rule.path, PathMatch::Prefix("/".into()));

        let rule = RouteRule::parse(r#"Path("/health")"#).unwrap();
        assert_eq!(rule.router_key(), CATCH_ALL);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(RouteRule::parse("").is_err());
        assert!(RouteRule::parse("Path(/x)").is_err());
        assert!(RouteRule::parse(r#"Method("GET")"#).is_err());
        assert!(RouteRule::parse(r#"Path("x")"#).is_err());
        assert!(RouteRule::parse(r#"Host("a") && Host("b")"#).is_err());
    }

    #[test]
    fn test_host_matching_ignores_case_and_port() {
        let rule = RouteRule::parse(r#"Host("example.com")"#).unwrap();
        assert!(rule.matches("EXAMPLE.com:8080", "/"));
        assert!(!rule.matches("other.com", "/"));
    }

    #[test]
    fn test_path_matching() {
        let exact = RouteRule::parse(r#"Path("/v1")"#).unwrap();
        assert!(exact.matches("any", "/v1"));
        assert!(!exact.matches("any", "/v1/users"));

        let prefix = RouteRule::parse(r#"PathPrefix("/v1")"#).unwrap();
        assert!(prefix.matches("any", "/v1/users"));
        assert!(!prefix.matches("any", "/V1"));
    }

    #[test]
    fn test_display_is_canonical() {
        let rule = RouteRule::parse(r#"PathPrefix(`/a`) && Host(`X.org`)"#).unwrap();
        assert_eq!(rule.to_string(), r#"Host("x.org") && PathPrefix("/a")"#);
    }
}
