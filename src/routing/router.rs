//! Route lookup and dispatch.
//!
//! # Responsibilities
//! - Store handlers by lowercase path key
//! - Resolve a request target to the longest matching key
//! - Hand the unmatched tail of the path to the handler as arguments
//!
//! # Design Decisions
//! - Immutable after construction (shared without locks)
//! - O(segments) HashMap probes per lookup
//! - Keys are case-insensitive, arguments keep their original case

use std::collections::HashMap;

/// Which request methods a route accepts.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum MethodFilter {
    #[default]
    Any,
    Only(Vec<String>),
}

impl MethodFilter {
    pub fn only(methods: &[&str]) -> Self {
        MethodFilter::Only(methods.iter().map(|m| m.to_ascii_uppercase()).collect())
    }

    pub fn accepts(&self, method: &str) -> bool {
        match self {
            MethodFilter::Any => true,
            MethodFilter::Only(methods) => methods.iter().any(|m| m.eq_ignore_ascii_case(method)),
        }
    }
}

#[derive(Debug, Clone)]
struct RouteEntry<H> {
    filter: MethodFilter,
    handler: H,
}

/// The outcome of resolving a request target.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution<H> {
    pub handler: H,
    /// Path segments after the matched key, in original case.
    pub args: Vec<String>,
    /// Matched key, or `None` when the not-found handler was chosen.
    pub key: Option<String>,
}

impl<H> Resolution<H> {
    pub fn is_not_found(&self) -> bool {
        self.key.is_none()
    }
}

/// Lowercase, leading-slash, no-trailing-slash form of a route path.
pub fn normalize_key(path: &str) -> String {
    let joined = split_segments(path).join("/");
    format!("/{}", joined.to_lowercase())
}

/// Non-empty `/`-separated segments of `target`, ignoring any query string.
pub fn split_segments(target: &str) -> Vec<&str> {
    let path = target.split(['?', '#']).next().unwrap_or("");
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Path-segment dispatch table.
#[derive(Debug, Clone)]
pub struct RouteTable<H> {
    routes: HashMap<String, Vec<RouteEntry<H>>>,
    not_found: H,
}

impl<H: Clone> RouteTable<H> {
    pub fn new(not_found: H) -> Self {
        Self {
            routes: HashMap::new(),
            not_found,
        }
    }

    /// Builder form of [`RouteTable::insert`].
    pub fn route(mut self, path: &str, filter: MethodFilter, handler: H) -> Self {
        self.insert(path, filter, handler);
        self
    }

    /// Register `handler` under `path`. Several handlers may share a key
    /// with different method filters; the first that accepts wins.
    pub fn insert(&mut self, path: &str, filter: MethodFilter, handler: H) {
        self.routes
            .entry(normalize_key(path))
            .or_default()
            .push(RouteEntry { filter, handler });
    }

    pub fn set_not_found(&mut self, handler: H) {
        self.not_found = handler;
    }

    pub fn contains(&self, path: &str) -> bool {
        self.routes.contains_key(&normalize_key(path))
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Resolve `target` for `method`.
    ///
    /// Probes the longest prefix first. A target with no segments probes `/`.
    pub fn resolve(&self, target: &str, method: &str) -> Resolution<H> {
        let segments = split_segments(target);

        if segments.is_empty() {
            if let Some(handler) = self.lookup("/", method) {
                return Resolution {
                    handler,
                    args: Vec::new(),
                    key: Some("/".to_string()),
                };
            }
        }

        for i in (1..=segments.len()).rev() {
            let key = format!("/{}", segments[..i].join("/").to_lowercase());
            if let Some(handler) = self.lookup(&key, method) {
                return Resolution {
                    handler,
                    args: segments[i..].iter().map(|s| s.to_string()).collect(),
                    key: Some(key),
                };
            }
        }

        Resolution {
            handler: self.not_found.clone(),
            args: segments.iter().map(|s| s.to_string()).collect(),
            key: None,
        }
    }

    fn lookup(&self, key: &str, method: &str) -> Option<H> {
        self.routes
            .get(key)?
            .iter()
            .find(|entry| entry.filter.accepts(method))
            .map(|entry| entry.handler.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> RouteTable<&'static str> {
        RouteTable::new("missing")
            .route("/a/b", MethodFilter::Any, "h1")
            .route("/a", MethodFilter::Any, "h2")
    }

    #[test]
    fn longest_prefix_wins_and_tail_becomes_args() {
        let resolution = table().resolve("/a/b/c/d", "GET");
        assert_eq!(resolution.handler, "h1");
        assert_eq!(resolution.args, vec!["c", "d"]);
        assert_eq!(resolution.key.as_deref(), Some("/a/b"));

        let resolution = table().resolve("/a/x", "GET");
        assert_eq!(resolution.handler, "h2");
        assert_eq!(resolution.args, vec!["x"]);
    }

    #[test]
    fn miss_uses_not_found_with_all_segments() {
        let resolution = table().resolve("/x/y", "GET");
        assert_eq!(resolution.handler, "missing");
        assert_eq!(resolution.args, vec!["x", "y"]);
        assert!(resolution.is_not_found());
    }

    #[test]
    fn keys_ignore_case_but_args_keep_it() {
        let resolution = table().resolve("/A/B/Mixed?q=1", "GET");
        assert_eq!(resolution.handler, "h1");
        assert_eq!(resolution.args, vec!["Mixed"]);
    }

    #[test]
    fn empty_path_probes_root() {
        assert!(table().resolve("/", "GET").is_not_found());

        let with_root = table().route("/", MethodFilter::Any, "root");
        let resolution = with_root.resolve("/?x=1", "GET");
        assert_eq!(resolution.handler, "root");
        assert!(resolution.args.is_empty());
    }

    #[test]
    fn method_filter_falls_through_to_shorter_key() {
        let table = table()
            .route("/a/b", MethodFilter::only(&["post"]), "post-only")
            .route("/form", MethodFilter::only(&["POST"]), "form");

        assert_eq!(table.resolve("/form", "POST").handler, "form");
        assert!(table.resolve("/form", "GET").is_not_found());

        // "/a/b" keeps its Any entry registered first.
        assert_eq!(table.resolve("/a/b", "POST").handler, "h1");
    }

    #[test]
    fn registration_normalizes_keys() {
        let table = RouteTable::new(0).route("@Isset/Cookie/", MethodFilter::Any, 1);
        assert!(table.contains("/@isset/cookie"));
        assert_eq!(normalize_key(""), "/");
        assert_eq!(table.resolve("/@ISSET/cookie/sessionId", "GET").args, vec!["sessionId"]);
    }
}
