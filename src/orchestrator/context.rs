//! Request classification and request-derived routing inputs.

use crate::config::RouteConfig;
use hyper::Request;
use hyper::header::{CONTENT_LENGTH, CONTENT_TYPE, COOKIE, HOST, USER_AGENT};
use serde::Serialize;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// Payloads above this size add to a request's complexity.
const LARGE_PAYLOAD_BYTES: u64 = 1024 * 1024;

/// Complexity scores are capped here.
const MAX_COMPLEXITY: f64 = 5.0;

const STATIC_EXTENSIONS: [&str; 6] = [".css", ".js", ".png", ".jpg", ".gif", ".ico"];

const SESSION_COOKIE: &str = "session_id";
const SESSION_HEADER: &str = "x-session-id";
const POOL_HEADER: &str = "x-pool-name";

/// Pool used when neither a route nor a header names one.
pub const DEFAULT_POOL: &str = "default";

/// Kind of client behind a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientType {
    Browser,
    ApiClient,
}

/// Request priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low = 1,
    Medium = 2,
    High = 3,
}

/// Classification of a single request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestContext {
    pub method: String,
    pub path: String,
    pub content_type: String,
    pub user_agent: String,
    /// Declared body size in bytes, 0 when unknown.
    pub size: u64,
    pub client_type: ClientType,
    pub is_api: bool,
    pub is_static: bool,
    pub priority: Priority,
    /// 1.0 to 5.0.
    pub complexity: f64,
}

impl RequestContext {
    /// Classify a request from its raw attributes.
    pub fn new(
        method: impl Into<String>,
        path: impl Into<String>,
        content_type: impl Into<String>,
        user_agent: impl Into<String>,
        size: u64,
    ) -> Self {
        let method = method.into();
        let path = path.into();
        let content_type = content_type.into();
        let user_agent = user_agent.into();

        let client_type = if user_agent.starts_with("Mozilla") {
            ClientType::Browser
        } else {
            ClientType::ApiClient
        };
        let is_api = is_api_request(&path, &content_type);
        let is_static = is_static_content(&path);

        let priority = if is_api {
            Priority::High
        } else if is_static {
            Priority::Low
        } else {
            Priority::Medium
        };

        let mut complexity = 1.0;
        if is_api {
            complexity += 1.0;
        }
        if size > LARGE_PAYLOAD_BYTES {
            complexity += 1.0;
        }
        if method == "POST" || method == "PUT" {
            complexity += 0.5;
        }

        Self {
            method,
            path,
            content_type,
            user_agent,
            size,
            client_type,
            is_api,
            is_static,
            priority,
            complexity: f64::min(complexity, MAX_COMPLEXITY),
        }
    }

    /// Classify an HTTP request.
    pub fn from_request<B>(req: &Request<B>) -> Self {
        let size = header_str(req, CONTENT_LENGTH.as_str())
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0);

        Self::new(
            req.method().as_str(),
            req.uri().path(),
            header_str(req, CONTENT_TYPE.as_str()).unwrap_or_default(),
            header_str(req, USER_AGENT.as_str()).unwrap_or_default(),
            size,
        )
    }
}

fn is_api_request(path: &str, content_type: &str) -> bool {
    let media_type = content_type.split(';').next().unwrap_or("").trim();
    (path.len() > 4 && path.starts_with("/api"))
        || media_type.eq_ignore_ascii_case("application/json")
}

fn is_static_content(path: &str) -> bool {
    STATIC_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

fn header_str<'a, B>(req: &'a Request<B>, name: &str) -> Option<&'a str> {
    req.headers().get(name).and_then(|v| v.to_str().ok())
}

/// Client address: first `X-Forwarded-For` hop, then `X-Real-IP`, then the
/// peer address, then loopback.
pub fn client_ip<B>(req: &Request<B>, peer: Option<SocketAddr>) -> IpAddr {
    header_str(req, "x-forwarded-for")
        .and_then(|xff| xff.split(',').next())
        .and_then(|ip| ip.trim().parse().ok())
        .or_else(|| header_str(req, "x-real-ip").and_then(|ip| ip.trim().parse().ok()))
        .or_else(|| peer.map(|p| p.ip()))
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

/// Session id from the `session_id` cookie, then the `X-Session-ID` header.
pub fn session_id<B>(req: &Request<B>) -> Option<String> {
    let from_cookie = req
        .headers()
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.trim().to_string());

    from_cookie
        .or_else(|| header_str(req, SESSION_HEADER).map(|s| s.trim().to_string()))
        .filter(|s| !s.is_empty())
}

/// Host and path-prefix routes onto pools.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<RouteConfig>,
}

impl RouteTable {
    pub fn new(routes: Vec<RouteConfig>) -> Self {
        Self { routes }
    }

    /// Pool of the matching route with the longest path prefix.
    ///
    /// Routes with an empty host match every host.
    pub fn resolve(&self, host: &str, path: &str) -> Option<&str> {
        self.routes
            .iter()
            .filter(|r| r.host.is_empty() || r.host.eq_ignore_ascii_case(host))
            .filter(|r| path.starts_with(&r.path_prefix))
            .max_by_key(|r| r.path_prefix.len())
            .map(|r| r.pool.as_str())
    }

    /// Pool for a request: route table, then `X-Pool-Name`, then `default`.
    pub fn pool_for<B>(&self, req: &Request<B>) -> String {
        let host = header_str(req, HOST.as_str())
            .or_else(|| req.uri().host())
            .unwrap_or("");
        let host = strip_port(host);

        self.resolve(host, req.uri().path())
            .or_else(|| header_str(req, POOL_HEADER).filter(|p| !p.is_empty()))
            .unwrap_or(DEFAULT_POOL)
            .to_string()
    }
}

fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        // [v6]:port
        return host.split(']').next().map(|h| &h[1..]).unwrap_or(host);
    }
    match host.rsplit_once(':') {
        Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) && !name.contains(':') => {
            name
        }
        _ => host,
    }
}
