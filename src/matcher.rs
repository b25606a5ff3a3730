//! Route matching logic.
//!
//! Resolves a request method and path against a [`TemplateSet`]:
//!
//! 1. the resolution memo, keyed by the literal `METHOD PATH`
//! 2. the exact index, keyed by `METHOD PATTERN`
//! 3. a scan of all routes in load order, testing each compiled pattern
//!
//! The first pattern that matches wins. There is no specificity ranking, so
//! overlapping patterns resolve by declaration order.
//!
//! Every distinct concrete path answered by a pattern route adds one memo
//! entry, so `/users/:id` hit with arbitrary ids grows the memo without
//! bound. Entries live until the next reload publishes a fresh set; misses
//! are never memoized.

use crate::store::TemplateSet;
use crate::template::{route_key, Template};
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// A compiled endpoint pattern.
///
/// `:name` matches exactly one non-empty path segment, `*` matches any run
/// of characters including `/`, everything else matches literally.
#[derive(Debug, Clone)]
pub struct PathPattern {
    pattern: String,
    regex: Regex,
}

impl PathPattern {
    /// Compile an endpoint pattern.
    pub fn compile(pattern: &str) -> Result<Self, regex::Error> {
        let body = pattern
            .split('/')
            .map(|segment| {
                if is_capture(segment) {
                    "[^/]+".to_string()
                } else {
                    segment
                        .split('*')
                        .map(regex::escape)
                        .collect::<Vec<_>>()
                        .join(".*")
                }
            })
            .collect::<Vec<_>>()
            .join("/");

        Ok(Self {
            pattern: pattern.to_string(),
            regex: Regex::new(&format!("^{}$", body))?,
        })
    }

    /// The source pattern.
    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    /// Whether the whole path matches this pattern.
    pub fn is_match(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }

    /// Capture `:name` segments by walking pattern and path segments
    /// pairwise. Extra segments on either side are ignored.
    pub fn path_vars(&self, path: &str) -> HashMap<String, String> {
        self.pattern
            .split('/')
            .zip(path.split('/'))
            .filter(|(segment, _)| is_capture(segment))
            .map(|(segment, value)| (segment[1..].to_string(), value.to_string()))
            .collect()
    }
}

fn is_capture(segment: &str) -> bool {
    segment.len() > 1 && segment.starts_with(':')
}

impl TemplateSet {
    /// Find the template serving `method` + `path`.
    pub fn resolve(&self, method: &str, path: &str) -> Option<Arc<Template>> {
        let key = route_key(method, path);

        if let Some(hit) = self.memo.get(&key) {
            return Some(Arc::clone(hit.value()));
        }
        if let Some(hit) = self.exact.get(&key) {
            return Some(Arc::clone(hit));
        }

        let route = self.routes.iter().find(|route| {
            route.template.method.eq_ignore_ascii_case(method) && route.pattern.is_match(path)
        })?;

        debug!(
            request = %key,
            pattern = %route.pattern.as_str(),
            "Resolved request by pattern"
        );
        let template = Arc::clone(&route.template);
        self.memo.insert(key, Arc::clone(&template));
        Some(template)
    }

    /// Path variables for `method` + `path`, empty when nothing matches.
    pub fn extract_path_vars(&self, method: &str, path: &str) -> HashMap<String, String> {
        self.resolve(method, path)
            .and_then(|template| {
                self.routes
                    .iter()
                    .find(|route| Arc::ptr_eq(&route.template, &template))
                    .map(|route| route.pattern.path_vars(path))
            })
            .unwrap_or_default()
    }
}
