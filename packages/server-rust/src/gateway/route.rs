//! Route rules and the ordered route table.
//!
//! Rules are evaluated in configured order and the first whose path prefix
//! matches wins. Prefixes match on whole path segments: `/api/catalog`
//! matches `/api/catalog` and `/api/catalog/cards`, never `/api/catalogue`.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use http::header::{HeaderName, HeaderValue};
use http::HeaderMap;
use serde::{Deserialize, Serialize};

/// Scheme marking a target resolved through service discovery.
pub const LOAD_BALANCED_SCHEME: &str = "lb://";

/// Header added by the default routes to mark gateway-originated requests.
pub const GATEWAY_HEADER: &str = "X-Gateway";
pub const GATEWAY_HEADER_VALUE: &str = "API-Gateway";

/// Errors loading or validating route configuration.
#[derive(Debug, thiserror::Error)]
pub enum RouteConfigError {
    #[error("failed to read route file: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed route file: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid route target {0:?}")]
    InvalidTarget(String),
    #[error("route {route}: invalid header {name:?}")]
    InvalidHeader { route: String, name: String },
    #[error("route {0}: path prefix must start with '/'")]
    InvalidPrefix(String),
}

// ---------------------------------------------------------------------------
// RouteTarget
// ---------------------------------------------------------------------------

/// Where a matched request is sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum RouteTarget {
    /// Fixed base URI such as `http://collection-service:8082`.
    Static(String),
    /// Logical service name, resolved on every request.
    LoadBalanced(String),
}

impl FromStr for RouteTarget {
    type Err = RouteConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(service) = s.strip_prefix(LOAD_BALANCED_SCHEME) {
            let service = service.trim_end_matches('/');
            if service.is_empty() || service.contains('/') {
                return Err(RouteConfigError::InvalidTarget(s.to_string()));
            }
            return Ok(Self::LoadBalanced(service.to_string()));
        }
        let uri: http::Uri = s
            .parse()
            .map_err(|_| RouteConfigError::InvalidTarget(s.to_string()))?;
        match (uri.scheme_str(), uri.authority()) {
            (Some("http" | "https"), Some(_)) => {
                Ok(Self::Static(s.trim_end_matches('/').to_string()))
            }
            _ => Err(RouteConfigError::InvalidTarget(s.to_string())),
        }
    }
}

impl TryFrom<String> for RouteTarget {
    type Error = RouteConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RouteTarget> for String {
    fn from(target: RouteTarget) -> Self {
        target.to_string()
    }
}

impl fmt::Display for RouteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(uri) => f.write_str(uri),
            Self::LoadBalanced(service) => write!(f, "{LOAD_BALANCED_SCHEME}{service}"),
        }
    }
}

// ---------------------------------------------------------------------------
// RouteFilter
// ---------------------------------------------------------------------------

/// Request rewrite applied after a rule matches, in declared order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RouteFilter {
    /// Drops the first `parts` path segments.
    StripPrefix { parts: usize },
    /// Sets a request header unless the request already carries it.
    AddRequestHeader { name: String, value: String },
}

/// Removes the first `parts` segments of `path`. Returns `/` when nothing is left.
#[must_use]
pub fn strip_prefix_segments(path: &str, parts: usize) -> String {
    if parts == 0 {
        return path.to_string();
    }
    let trailing_slash = path.len() > 1 && path.ends_with('/');
    let rest: Vec<&str> = path
        .split('/')
        .filter(|s| !s.is_empty())
        .skip(parts)
        .collect();
    if rest.is_empty() {
        return "/".to_string();
    }
    let mut stripped = format!("/{}", rest.join("/"));
    if trailing_slash {
        stripped.push('/');
    }
    stripped
}

// ---------------------------------------------------------------------------
// RouteRule
// ---------------------------------------------------------------------------

/// One configured route. Immutable after loading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteRule {
    pub id: String,
    pub path_prefix: String,
    pub uri: RouteTarget,
    #[serde(default)]
    pub filters: Vec<RouteFilter>,
}

impl RouteRule {
    #[must_use]
    pub fn new(id: impl Into<String>, path_prefix: impl Into<String>, uri: RouteTarget) -> Self {
        Self {
            id: id.into(),
            path_prefix: normalize_prefix(&path_prefix.into()),
            uri,
            filters: Vec::new(),
        }
    }

    #[must_use]
    pub fn strip_prefix(mut self, parts: usize) -> Self {
        self.filters.push(RouteFilter::StripPrefix { parts });
        self
    }

    #[must_use]
    pub fn add_request_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.push(RouteFilter::AddRequestHeader {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    /// Whether `path` falls under this rule's prefix.
    #[must_use]
    pub fn matches(&self, path: &str) -> bool {
        let prefix = self.path_prefix.as_str();
        if prefix == "/" {
            return true;
        }
        match path.strip_prefix(prefix) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }

    /// Applies the filters in declared order. Returns the path to forward;
    /// injected headers are written into `headers` only when absent.
    #[must_use]
    pub fn apply_filters(&self, path: &str, headers: &mut HeaderMap) -> String {
        let mut path = path.to_string();
        for filter in &self.filters {
            match filter {
                RouteFilter::StripPrefix { parts } => {
                    path = strip_prefix_segments(&path, *parts);
                }
                RouteFilter::AddRequestHeader { name, value } => {
                    if let (Ok(name), Ok(value)) =
                        (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value))
                    {
                        headers.entry(name).or_insert(value);
                    }
                }
            }
        }
        path
    }

    fn validate(&mut self) -> Result<(), RouteConfigError> {
        self.path_prefix = normalize_prefix(&self.path_prefix);
        if !self.path_prefix.starts_with('/') {
            return Err(RouteConfigError::InvalidPrefix(self.id.clone()));
        }
        for filter in &self.filters {
            if let RouteFilter::AddRequestHeader { name, value } = filter {
                let valid = HeaderName::from_bytes(name.as_bytes()).is_ok()
                    && HeaderValue::from_str(value).is_ok();
                if !valid {
                    return Err(RouteConfigError::InvalidHeader {
                        route: self.id.clone(),
                        name: name.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Accepts `"/api/catalog"`, `"/api/catalog/"` and `"/api/catalog/**"` alike.
fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim();
    let trimmed = trimmed.strip_suffix("/**").unwrap_or(trimmed);
    let trimmed = trimmed.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

// ---------------------------------------------------------------------------
// RouteTable
// ---------------------------------------------------------------------------

/// Ordered list of route rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTable {
    rules: Vec<RouteRule>,
}

impl RouteTable {
    /// Builds a table, validating prefixes and header filters.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first invalid rule.
    pub fn new(mut rules: Vec<RouteRule>) -> Result<Self, RouteConfigError> {
        for rule in &mut rules {
            rule.validate()?;
        }
        Ok(Self { rules })
    }

    /// Parses a JSON array of rules.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed or a rule is invalid.
    pub fn from_json(json: &str) -> Result<Self, RouteConfigError> {
        Self::new(serde_json::from_str(json)?)
    }

    /// Loads a JSON route file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, RouteConfigError> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    /// First rule whose prefix matches `path`.
    #[must_use]
    pub fn find(&self, path: &str) -> Option<&RouteRule> {
        self.rules.iter().find(|r| r.matches(path))
    }

    #[must_use]
    pub fn rules(&self) -> &[RouteRule] {
        &self.rules
    }
}

impl Default for RouteTable {
    /// Catalog (load-balanced), collection and media routes.
    fn default() -> Self {
        Self {
            rules: vec![
                RouteRule::new(
                    "catalog-service",
                    "/api/catalog",
                    RouteTarget::LoadBalanced("catalog-service".to_string()),
                )
                .strip_prefix(2)
                .add_request_header(GATEWAY_HEADER, GATEWAY_HEADER_VALUE),
                RouteRule::new(
                    "collection-service",
                    "/api/collections",
                    RouteTarget::Static("http://collection-service:8082".to_string()),
                )
                .add_request_header(GATEWAY_HEADER, GATEWAY_HEADER_VALUE),
                RouteRule::new(
                    "media-service",
                    "/api/media",
                    RouteTarget::Static("http://media-service:8084".to_string()),
                )
                .strip_prefix(2)
                .add_request_header(GATEWAY_HEADER, GATEWAY_HEADER_VALUE),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use proptest::prelude::*;

    use super::*;

    #[test]
    fn first_matching_rule_wins() {
        let table = RouteTable::new(vec![
            RouteRule::new("narrow", "/api/catalog/sets", RouteTarget::Static("http://a:1".into())),
            RouteRule::new("wide", "/api/catalog", RouteTarget::Static("http://b:2".into())),
            RouteRule::new("shadowed", "/api/catalog/sets", RouteTarget::Static("http://c:3".into())),
        ])
        .unwrap();

        assert_eq!(table.find("/api/catalog/sets/sv1").unwrap().id, "narrow");
        assert_eq!(table.find("/api/catalog/cards").unwrap().id, "wide");
        assert!(table.find("/api/unknown").is_none());
    }

    #[test]
    fn prefix_matches_whole_segments_only() {
        let rule = RouteRule::new("c", "/api/catalog/**", RouteTarget::LoadBalanced("x".into()));
        assert_eq!(rule.path_prefix, "/api/catalog");
        assert!(rule.matches("/api/catalog"));
        assert!(rule.matches("/api/catalog/"));
        assert!(rule.matches("/api/catalog/cards/1"));
        assert!(!rule.matches("/api/catalogue"));
        assert!(!rule.matches("/api"));
    }

    #[test]
    fn strip_prefix_drops_leading_segments() {
        assert_eq!(strip_prefix_segments("/api/catalog/cards/1", 2), "/cards/1");
        assert_eq!(strip_prefix_segments("/api/catalog", 2), "/");
        assert_eq!(strip_prefix_segments("/api/catalog/", 2), "/");
        assert_eq!(strip_prefix_segments("/api/media/img/", 2), "/img/");
        assert_eq!(strip_prefix_segments("/a/b", 0), "/a/b");
        assert_eq!(strip_prefix_segments("/a", 5), "/");
    }

    #[test]
    fn filters_strip_then_inject_without_overwriting() {
        let rule = RouteRule::new("c", "/api/catalog", RouteTarget::LoadBalanced("x".into()))
            .strip_prefix(2)
            .add_request_header(GATEWAY_HEADER, GATEWAY_HEADER_VALUE);

        let mut headers = HeaderMap::new();
        let path = rule.apply_filters("/api/catalog/sets", &mut headers);
        assert_eq!(path, "/sets");
        assert_eq!(headers.get("x-gateway").unwrap(), "API-Gateway");

        // A retried request that already carries the marker keeps it as-is.
        let mut headers = HeaderMap::new();
        headers.insert("x-gateway", HeaderValue::from_static("edge"));
        let _ = rule.apply_filters("/api/catalog/sets", &mut headers);
        assert_eq!(headers.get_all("x-gateway").iter().count(), 1);
        assert_eq!(headers.get("x-gateway").unwrap(), "edge");
    }

    #[test]
    fn targets_parse_from_uri_strings() {
        assert_eq!(
            "lb://catalog-service".parse::<RouteTarget>().unwrap(),
            RouteTarget::LoadBalanced("catalog-service".into())
        );
        assert_eq!(
            "http://collection-service:8082/".parse::<RouteTarget>().unwrap(),
            RouteTarget::Static("http://collection-service:8082".into())
        );
        assert!("lb://".parse::<RouteTarget>().is_err());
        assert!("ftp://files".parse::<RouteTarget>().is_err());
        assert!("not a uri".parse::<RouteTarget>().is_err());
    }

    #[test]
    fn default_table_reproduces_deployment_routes() {
        let table = RouteTable::default();
        let catalog = table.find("/api/catalog/cards").unwrap();
        assert_eq!(catalog.uri, RouteTarget::LoadBalanced("catalog-service".into()));
        let collections = table.find("/api/collections/users/1/cards").unwrap();
        assert_eq!(collections.uri.to_string(), "http://collection-service:8082");
        assert!(!collections
            .filters
            .iter()
            .any(|f| matches!(f, RouteFilter::StripPrefix { .. })));
        assert_eq!(table.find("/api/media/x").unwrap().id, "media-service");
    }

    #[test]
    fn loads_rules_from_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{
                "id": "catalog",
                "pathPrefix": "/api/catalog/**",
                "uri": "lb://catalog-service",
                "filters": [
                    {{"type": "STRIP_PREFIX", "parts": 2}},
                    {{"type": "ADD_REQUEST_HEADER", "name": "X-Gateway", "value": "API-Gateway"}}
                ]
            }}]"#
        )
        .unwrap();

        let table = RouteTable::load(file.path()).unwrap();
        assert_eq!(table.rules().len(), 1);
        assert_eq!(table.rules()[0].path_prefix, "/api/catalog");
        assert_eq!(table.rules()[0].filters.len(), 2);
    }

    #[test]
    fn invalid_header_is_rejected_at_load() {
        let json = r#"[{"id":"r","pathPrefix":"/a","uri":"http://h:1",
            "filters":[{"type":"ADD_REQUEST_HEADER","name":"bad header","value":"v"}]}]"#;
        assert!(matches!(
            RouteTable::from_json(json),
            Err(RouteConfigError::InvalidHeader { .. })
        ));
    }

    proptest! {
        #[test]
        fn stripping_never_yields_empty_path(
            segments in proptest::collection::vec("[a-z0-9]{1,6}", 0..6),
            parts in 0usize..8,
        ) {
            let path = format!("/{}", segments.join("/"));
            let stripped = strip_prefix_segments(&path, parts);
            prop_assert!(stripped.starts_with('/'));
            let expected: Vec<_> = segments.iter().skip(parts).cloned().collect();
            if parts > 0 {
                prop_assert_eq!(stripped, format!("/{}", expected.join("/")));
            }
        }

        #[test]
        fn every_subpath_matches_its_prefix(
            prefix in proptest::collection::vec("[a-z]{1,6}", 1..4),
            rest in proptest::collection::vec("[a-z0-9]{1,6}", 0..4),
        ) {
            let prefix_path = format!("/{}", prefix.join("/"));
            let rule = RouteRule::new("r", prefix_path.clone(), RouteTarget::LoadBalanced("s".into()));
            let full = if rest.is_empty() {
                prefix_path.clone()
            } else {
                format!("{prefix_path}/{}", rest.join("/"))
            };
            prop_assert!(rule.matches(&full));
            let extended = format!("{prefix_path}x");
            prop_assert!(!rule.matches(&extended));
        }
    }
}
