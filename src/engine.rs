//! Mock response engine.
//!
//! Resolves the template for a request, generates its variables, rolls the
//! error injection dice, substitutes placeholders and computes how long the
//! caller should wait before sending the response.

use crate::generator::{self, RequestContext};
use crate::store::{TemplateSet, TemplateStore};
use rand::Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Reserved variable holding the raw request body.
pub const BODY_VAR: &str = "body";

/// Value emitted for every declared response header.
pub const HEADER_PLACEHOLDER: &str = "auto";

/// Body returned when no template matches.
pub const NOT_FOUND_BODY: &str = r#"{"error":"template not found"}"#;

/// An incoming request as seen by the engine.
#[derive(Debug, Clone, Default)]
pub struct MockRequest {
    pub method: String,
    pub path: String,
    pub body: String,
    pub headers: HashMap<String, String>,
    pub query: HashMap<String, String>,
}

impl MockRequest {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(name.into(), value.into());
        self
    }

    /// Seed variables: the raw body under [`BODY_VAR`].
    pub fn seed_vars(&self) -> HashMap<String, String> {
        HashMap::from([(BODY_VAR.to_string(), self.body.clone())])
    }
}

/// The assembled response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockResponse {
    pub status: u16,
    pub body: String,
    pub headers: HashMap<String, String>,
    /// How long the caller should wait before sending
    pub delay: Duration,
}

impl MockResponse {
    fn not_found() -> Self {
        Self {
            status: 404,
            body: NOT_FOUND_BODY.to_string(),
            headers: HashMap::new(),
            delay: Duration::ZERO,
        }
    }
}

/// Mock response engine.
///
/// Holds the published templates and request counters. All methods take
/// `&self`; the engine is shared across request tasks behind an `Arc`.
#[derive(Debug, Default)]
pub struct MockEngine {
    store: TemplateStore,
    /// Total requests processed.
    requests_total: AtomicU64,
    /// Requests answered from a template.
    requests_matched: AtomicU64,
    /// Requests answered with the 404 branch.
    requests_unmatched: AtomicU64,
}

impl MockEngine {
    /// Create an engine serving `templates`.
    pub fn new(templates: TemplateSet) -> Self {
        info!(templates = templates.len(), "Mock engine initialized");
        Self {
            store: TemplateStore::new(templates),
            ..Default::default()
        }
    }

    /// Current template snapshot.
    pub fn templates(&self) -> Arc<TemplateSet> {
        self.store.snapshot()
    }

    /// Replace the template set. Requests already running keep the
    /// snapshot they resolved against.
    pub fn reload(&self, templates: TemplateSet) {
        let previous = self.store.publish(templates);
        info!(previous = previous.len(), "Templates reloaded");
    }

    /// Get total requests processed.
    pub fn total_requests(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    /// Get total requests matched.
    pub fn total_matched(&self) -> u64 {
        self.requests_matched.load(Ordering::Relaxed)
    }

    /// Get total requests unmatched.
    pub fn total_unmatched(&self) -> u64 {
        self.requests_unmatched.load(Ordering::Relaxed)
    }

    /// Path variables captured from `path` by the template it resolves to.
    pub fn extract_path_vars(&self, method: &str, path: &str) -> HashMap<String, String> {
        self.store.snapshot().extract_path_vars(method, path)
    }

    /// Build the response for a request: path variables are extracted and
    /// the raw body is seeded under [`BODY_VAR`].
    pub fn handle<R: Rng>(&self, request: &MockRequest, rng: &mut R) -> MockResponse {
        self.handle_since(Instant::now(), request, rng)
    }

    /// Like [`MockEngine::handle`], measuring the response time target from
    /// `started` instead of from the call.
    pub fn handle_since<R: Rng>(
        &self,
        started: Instant,
        request: &MockRequest,
        rng: &mut R,
    ) -> MockResponse {
        let templates = self.store.snapshot();
        let path_vars = templates.extract_path_vars(&request.method, &request.path);
        self.assemble(started, &templates, request, request.seed_vars(), &path_vars, rng)
    }

    /// Build the response for a request with explicit seed and path
    /// variables.
    pub fn build_response<R: Rng>(
        &self,
        request: &MockRequest,
        seed_vars: HashMap<String, String>,
        path_vars: &HashMap<String, String>,
        rng: &mut R,
    ) -> MockResponse {
        let started = Instant::now();
        let templates = self.store.snapshot();
        self.assemble(started, &templates, request, seed_vars, path_vars, rng)
    }

    fn assemble<R: Rng>(
        &self,
        started: Instant,
        templates: &TemplateSet,
        request: &MockRequest,
        seed_vars: HashMap<String, String>,
        path_vars: &HashMap<String, String>,
        rng: &mut R,
    ) -> MockResponse {
        self.requests_total.fetch_add(1, Ordering::Relaxed);

        let Some(template) = templates.resolve(&request.method, &request.path) else {
            self.requests_unmatched.fetch_add(1, Ordering::Relaxed);
            warn!(
                method = %request.method,
                path = %request.path,
                "No matching template found"
            );
            return MockResponse::not_found();
        };
        self.requests_matched.fetch_add(1, Ordering::Relaxed);

        let ctx = RequestContext {
            body: &request.body,
            headers: &request.headers,
            query: &request.query,
            path_vars,
        };
        let mut vars = seed_vars;
        for var in template.body_vars.values() {
            let value = generator::generate(&var.kind, &var.condition, &ctx, rng);
            vars.insert(var.name.clone(), value);
        }

        let is_error = rng.gen_range(0..100u8) < template.error_percent;
        let (status, body_template) = if is_error {
            (
                template.error_status,
                template.error_body.as_deref().unwrap_or_default(),
            )
        } else {
            (200, template.success_body.as_str())
        };

        let body = substitute(body_template, &vars);

        // Header generators are not evaluated; every header carries the placeholder.
        let headers = template
            .headers
            .keys()
            .map(|name| (name.clone(), HEADER_PLACEHOLDER.to_string()))
            .collect();

        let delay = remaining_delay(template.response_time, started.elapsed());

        info!(
            method = %request.method,
            path = %request.path,
            template = %template.key(),
            status,
            injected_error = is_error,
            delay_ms = delay.as_millis() as u64,
            "Request matched template"
        );

        MockResponse {
            status,
            body,
            headers,
            delay,
        }
    }
}

/// Replace `$name$` placeholders with their values in a single pass.
/// Placeholders without a value are left as they are.
pub fn substitute(template: &str, vars: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('$') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let replaced = after
            .find('$')
            .filter(|&end| end > 0)
            .and_then(|end| vars.get(&after[..end]).map(|value| (value, end)));
        match replaced {
            Some((value, end)) => {
                out.push_str(value);
                rest = &after[end + 1..];
            }
            None => {
                out.push('$');
                rest = after;
            }
        }
    }

    out.push_str(rest);
    out
}

/// How much longer to wait so the response goes out at `target`.
///
/// Returns zero when there is no target, and zero plus a warning when
/// processing already took at least as long as the target.
pub fn remaining_delay(target: Option<Duration>, elapsed: Duration) -> Duration {
    let Some(target) = target else {
        return Duration::ZERO;
    };
    if target > elapsed {
        let remaining = target - elapsed;
        debug!(
            target_ms = target.as_millis() as u64,
            remaining_ms = remaining.as_millis() as u64,
            "Delaying response"
        );
        remaining
    } else {
        warn!(
            target_ms = target.as_millis() as u64,
            elapsed_ms = elapsed.as_millis() as u64,
            "Response time target exceeded by processing time"
        );
        Duration::ZERO
    }
}
