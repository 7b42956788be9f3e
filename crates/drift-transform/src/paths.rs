// SPDX-License-Identifier: MIT OR Apache-2.0
//! Body path resolution and URL field helpers.

use serde_json::Value;

/// Parse a JSONPath-lite expression (`$.a.b[0].c`, `a.b.0.c`) into
/// segments. Only child access is supported; that covers every rule the
/// transform engine accepts.
#[must_use]
pub fn parse_json_path(path: &str) -> Vec<String> {
    let trimmed = path.strip_prefix("$.").or_else(|| path.strip_prefix('$')).unwrap_or(path);
    let mut segments = Vec::new();
    for part in trimmed.split('.') {
        if part.is_empty() {
            continue;
        }
        // "items[0]" → "items", "0"
        let mut rest = part;
        while let Some(open) = rest.find('[') {
            let head = &rest[..open];
            if !head.is_empty() {
                segments.push(head.to_string());
            }
            match rest[open..].find(']') {
                Some(close) => {
                    let index = &rest[open + 1..open + close];
                    if !index.is_empty() {
                        segments.push(index.to_string());
                    }
                    rest = &rest[open + close + 1..];
                }
                None => {
                    rest = "";
                }
            }
        }
        if !rest.is_empty() {
            segments.push(rest.to_string());
        }
    }
    segments
}

/// Mutable reference to the value at `segments`, when it exists.
pub fn resolve_path_mut<'a>(root: &'a mut Value, segments: &[String]) -> Option<&'a mut Value> {
    let mut current = root;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get_mut(segment)?,
            Value::Array(items) => {
                let index: usize = segment.parse().ok()?;
                items.get_mut(index)?
            }
            _ => return None,
        };
    }
    Some(current)
}

/// Split a URL or request target into `(prefix, path, query)` where
/// `prefix` is the scheme-and-authority portion (empty for bare targets
/// like `/a/b?q=1`).
///
/// Returns `None` for values with no recognizable path; the caller treats
/// that as a silent non-match.
#[must_use]
pub fn split_url(url: &str) -> Option<(String, String, Option<String>)> {
    let (without_query, query) = match url.split_once('?') {
        Some((head, q)) => (head, Some(q.to_string())),
        None => (url, None),
    };
    if let Some(scheme_end) = without_query.find("://") {
        let after_scheme = &without_query[scheme_end + 3..];
        match after_scheme.find('/') {
            Some(path_start) => {
                let prefix = &without_query[..scheme_end + 3 + path_start];
                let path = &after_scheme[path_start..];
                Some((prefix.to_string(), path.to_string(), query))
            }
            None => Some((without_query.to_string(), String::new(), query)),
        }
    } else if without_query.starts_with('/') {
        Some((String::new(), without_query.to_string(), query))
    } else {
        None
    }
}

/// Extract the host (without port) from a URL, for inbound host matching.
///
/// Returns `None` on anything malformed; the engine treats that as a
/// failed match, never a failed request.
#[must_use]
pub fn extract_host(url: &str) -> Option<String> {
    let scheme_end = url.find("://")?;
    let after_scheme = &url[scheme_end + 3..];
    let authority = after_scheme
        .split(['/', '?', '#'])
        .next()
        .filter(|a| !a.is_empty())?;
    // Strip userinfo, then the port.
    let host_port = authority.rsplit('@').next()?;
    let host = host_port.split(':').next().filter(|h| !h.is_empty())?;
    Some(host.to_string())
}

/// Rewrite a single query parameter in `url` with `edit`, preserving every
/// other parameter and the path. Returns `None` when the parameter is
/// absent (no edit to record).
pub fn rewrite_query_param(
    url: &str,
    name: &str,
    edit: impl Fn(&str) -> String,
) -> Option<String> {
    let (head, query) = url.split_once('?')?;
    let mut touched = false;
    let rewritten: Vec<String> = query
        .split('&')
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) if key == name => {
                touched = true;
                format!("{key}={}", edit(value))
            }
            _ => pair.to_string(),
        })
        .collect();
    touched.then(|| format!("{head}?{}", rewritten.join("&")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn json_path_variants_parse_identically() {
        assert_eq!(parse_json_path("$.user.password"), vec!["user", "password"]);
        assert_eq!(parse_json_path("user.password"), vec!["user", "password"]);
        assert_eq!(
            parse_json_path("$.items[0].token"),
            vec!["items", "0", "token"]
        );
        assert_eq!(parse_json_path("items.0.token"), vec!["items", "0", "token"]);
    }

    #[test]
    fn resolve_walks_objects_and_arrays() {
        let mut body = json!({"items": [{"token": "secret"}]});
        let segments = parse_json_path("$.items[0].token");
        *resolve_path_mut(&mut body, &segments).unwrap() = json!("gone");
        assert_eq!(body, json!({"items": [{"token": "gone"}]}));
    }

    #[test]
    fn resolve_missing_path_is_none() {
        let mut body = json!({"a": 1});
        assert!(resolve_path_mut(&mut body, &parse_json_path("$.b.c")).is_none());
    }

    #[test]
    fn split_url_forms() {
        assert_eq!(
            split_url("https://api.example.com/v1/users?page=2"),
            Some((
                "https://api.example.com".into(),
                "/v1/users".into(),
                Some("page=2".into())
            ))
        );
        assert_eq!(
            split_url("/v1/users"),
            Some((String::new(), "/v1/users".into(), None))
        );
        assert_eq!(split_url("not a url"), None);
    }

    #[test]
    fn extract_host_handles_ports_and_userinfo() {
        assert_eq!(extract_host("http://api.example.com/x"), Some("api.example.com".into()));
        assert_eq!(extract_host("https://api.example.com:8443/"), Some("api.example.com".into()));
        assert_eq!(extract_host("http://user:pw@db.internal:5432/q"), Some("db.internal".into()));
        assert_eq!(extract_host("/relative/only"), None);
        assert_eq!(extract_host("http://"), None);
    }

    #[test]
    fn query_param_rewrite_preserves_others() {
        let out = rewrite_query_param("/search?q=ada&token=secret&page=1", "token", |_| "X".into());
        assert_eq!(out.as_deref(), Some("/search?q=ada&token=X&page=1"));
        assert!(rewrite_query_param("/search?q=ada", "token", |_| "X".into()).is_none());
    }
}
