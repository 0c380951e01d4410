//! Route schemas declared once, at registration.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

/// Request and response shapes for one route.
///
/// Schemas are opaque JSON documents; the registry only insists that at
/// least one response is described.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RouteSchema {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<Value>,
    pub responses: BTreeMap<u16, Value>,
}

impl RouteSchema {
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: Some(summary.into()),
            ..Self::default()
        }
    }

    pub fn body(mut self, schema: Value) -> Self {
        self.body = Some(schema);
        self
    }

    pub fn query(mut self, schema: Value) -> Self {
        self.query = Some(schema);
        self
    }

    pub fn response(mut self, status: u16, schema: Value) -> Self {
        self.responses.insert(status, schema);
        self
    }
}

/// A registered route, as exposed for documentation tooling.
#[derive(Debug, Clone, Serialize)]
pub struct RouteDescription {
    pub plugin: String,
    pub method: String,
    pub path: String,
    pub schema: RouteSchema,
}

/// Join a plugin prefix and a route path into one absolute path.
pub fn join_path(prefix: Option<&str>, path: &str) -> String {
    let prefix = prefix.unwrap_or("").trim_end_matches('/');
    let path = path.trim_start_matches('/');
    match (prefix.is_empty(), path.is_empty()) {
        (true, true) => "/".to_string(),
        (true, false) => format!("/{path}"),
        (false, true) => normalize_leading(prefix),
        (false, false) => format!("{}/{path}", normalize_leading(prefix)),
    }
}

fn normalize_leading(prefix: &str) -> String {
    if prefix.starts_with('/') {
        prefix.to_string()
    } else {
        format!("/{prefix}")
    }
}

/// Reject paths the router would panic on.
pub fn check_path(path: &str) -> Result<(), String> {
    let segments: Vec<&str> = path.split('/').collect();
    for (index, segment) in segments.iter().enumerate() {
        if segment.starts_with(':') {
            return Err(format!(
                "segment `{segment}` uses `:param`; capture parameters are written `{{param}}`"
            ));
        }
        if segment.starts_with('*') {
            return Err(format!(
                "segment `{segment}` uses `*wildcard`; catch-all captures are written `{{*rest}}`"
            ));
        }
        if segment.contains('{') != segment.contains('}') {
            return Err(format!("segment `{segment}` has an unbalanced capture"));
        }
        if segment.starts_with("{*") && index + 1 != segments.len() {
            return Err(format!("catch-all `{segment}` must be the last segment"));
        }
    }
    Ok(())
}

/// `path` with every capture name erased.
///
/// Two paths with the same shape match the same requests, so the router
/// accepts only one spelling of it.
pub fn route_shape(path: &str) -> String {
    let mut shape = String::with_capacity(path.len());
    let mut rest = path;
    while let Some(open) = rest.find('{') {
        shape.push_str(&rest[..open]);
        let Some(close) = rest[open..].find('}') else {
            break;
        };
        let capture = &rest[open + 1..open + close];
        shape.push_str(if capture.starts_with('*') { "{*}" } else { "{}" });
        rest = &rest[open + close + 1..];
    }
    shape.push_str(rest);
    shape
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn joins_prefixes() {
        assert_eq!(join_path(None, "/users"), "/users");
        assert_eq!(join_path(Some("/api/"), "/users"), "/api/users");
        assert_eq!(join_path(Some("api"), "users/{id}"), "/api/users/{id}");
        assert_eq!(join_path(Some("/api"), "/"), "/api");
        assert_eq!(join_path(None, ""), "/");
    }

    #[test]
    fn rejects_colon_captures() {
        assert!(check_path("/users/{id}").is_ok());
        assert!(check_path("/users/:id").is_err());
        assert!(check_path("/users/{id").is_err());
    }

    #[test]
    fn rejects_star_wildcards() {
        assert!(check_path("/files/{*rest}").is_ok());
        let reason = check_path("/files/*rest").unwrap_err();
        assert!(reason.contains("{*rest}"), "{reason}");
        assert!(check_path("/files/{*rest}/meta").is_err());
    }

    #[test]
    fn shape_erases_capture_names() {
        assert_eq!(route_shape("/users/{id}"), "/users/{}");
        assert_eq!(route_shape("/users/{name}"), route_shape("/users/{id}"));
        assert_eq!(route_shape("/files/{*path}"), "/files/{*}");
        assert_eq!(route_shape("/orders/{id}/lines/{line}"), "/orders/{}/lines/{}");
        assert_eq!(route_shape("/static"), "/static");
    }

    #[test]
    fn schema_builder_collects_responses() {
        let schema = RouteSchema::new("List users")
            .query(json!({"type": "object"}))
            .response(200, json!({"type": "array"}))
            .response(404, json!({"type": "object"}));
        assert_eq!(schema.responses.len(), 2);
        assert!(schema.body.is_none());
    }
}
