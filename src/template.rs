//! Route template documents.
//!
//! A template document describes one mocked route: the request line, the
//! generated variables, the headers to emit, the error injection settings,
//! both response bodies and the target response time.
//!
//! ```text
//! POST /users/:id
//! Additional Headers:
//!   X-Request-Id: randomString; len=12
//! Vars:
//!   name: jsonParse; user/name
//! Error Config:
//!   Percent: 10%
//!   Status: 503
//! Error body:
//!   {"error": "try again"}
//! Success body:
//!   {"id": "$id$", "name": "$name$"}
//! Response time:
//!   150
//! ```

use crate::generator::GeneratorKind;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Default status used for the error branch.
pub const DEFAULT_ERROR_STATUS: u16 = 500;

/// Errors raised while parsing a template document.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    /// The document has no content at all.
    #[error("template document is empty")]
    Empty,

    /// The first line is not `METHOD PATH`.
    #[error("malformed request line: {0:?}")]
    MalformedRequestLine(String),
}

/// A named generated value (used for both body variables and headers).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    /// Variable or header name
    pub name: String,
    /// Generator used to compute the value
    pub kind: GeneratorKind,
    /// Generator-specific argument (may be empty)
    pub condition: String,
}

/// A parsed mock route definition. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    /// Upper-case HTTP method
    pub method: String,
    /// Endpoint pattern (`:name` captures, `*` wildcards)
    pub endpoint: String,
    /// Body variables by name
    pub body_vars: BTreeMap<String, FieldDef>,
    /// Additional response headers by name
    pub headers: BTreeMap<String, FieldDef>,
    /// Chance of answering with the error branch, 0..=100
    pub error_percent: u8,
    /// Status of the error branch
    pub error_status: u16,
    /// Body of the error branch
    pub error_body: Option<String>,
    /// Body of the success branch
    pub success_body: String,
    /// Target response time, if declared
    pub response_time: Option<Duration>,
}

impl Template {
    fn new(method: &str, endpoint: &str) -> Self {
        Self {
            method: method.to_uppercase(),
            endpoint: endpoint.to_string(),
            body_vars: BTreeMap::new(),
            headers: BTreeMap::new(),
            error_percent: 0,
            error_status: DEFAULT_ERROR_STATUS,
            error_body: None,
            success_body: String::new(),
            response_time: None,
        }
    }

    /// Key used by the exact-match index: `METHOD PATTERN`.
    pub fn key(&self) -> String {
        route_key(&self.method, &self.endpoint)
    }

    /// Parse a template document.
    ///
    /// Only a malformed request line fails the document; problems inside
    /// sections are logged and the offending line is skipped.
    pub fn parse(content: &str) -> Result<Self, TemplateError> {
        if content.trim().is_empty() {
            return Err(TemplateError::Empty);
        }

        let mut lines = content.lines();
        let request_line = lines.next().unwrap_or_default().trim();

        let mut parts = request_line.split_whitespace();
        let (method, endpoint) = match (parts.next(), parts.next(), parts.next()) {
            (Some(method), Some(endpoint), None) => (method, endpoint),
            _ => {
                return Err(TemplateError::MalformedRequestLine(
                    request_line.to_string(),
                ))
            }
        };

        let mut template = Template::new(method, endpoint);
        let mut opened: Vec<Section> = Vec::new();
        let mut current: Option<Section> = None;
        let mut buffer: Vec<&str> = Vec::new();

        for line in lines {
            if let Some(section) = Section::from_header(line) {
                if !opened.contains(&section) {
                    if let Some(done) = current.take() {
                        template.apply(done, &buffer);
                    }
                    buffer.clear();
                    opened.push(section);
                    current = Some(section);
                    continue;
                }
            }
            // Lines before the first section are reserved and dropped.
            if current.is_some() {
                buffer.push(line);
            }
        }

        if let Some(done) = current {
            template.apply(done, &buffer);
        }

        Ok(template)
    }

    fn apply(&mut self, section: Section, lines: &[&str]) {
        match section {
            Section::Headers => parse_fields(&mut self.headers, lines),
            Section::Vars => parse_fields(&mut self.body_vars, lines),
            Section::ErrorConfig => self.parse_error_config(lines),
            Section::ErrorBody => {
                let body = join_body(lines);
                if !body.is_empty() {
                    self.error_body = Some(body);
                }
            }
            Section::SuccessBody => self.success_body = join_body(lines),
            Section::ResponseTime => self.parse_response_time(lines),
        }
    }

    fn parse_error_config(&mut self, lines: &[&str]) {
        for line in lines.iter().map(|l| l.trim()) {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();
            match key.trim().to_ascii_lowercase().as_str() {
                "percent" | "error percent" => {
                    match value.trim_end_matches('%').trim().parse::<u8>() {
                        Ok(p) if p <= 100 => self.error_percent = p,
                        _ => warn!(endpoint = %self.endpoint, value, "Ignoring invalid error percent"),
                    }
                }
                "status" | "error status" => match value.parse::<u16>() {
                    Ok(s) if (100..=599).contains(&s) => self.error_status = s,
                    _ => warn!(endpoint = %self.endpoint, value, "Ignoring invalid error status"),
                },
                _ => {}
            }
        }
    }

    fn parse_response_time(&mut self, lines: &[&str]) {
        let Some(value) = lines.iter().map(|l| l.trim()).find(|l| !l.is_empty()) else {
            return;
        };
        match value.parse::<i64>() {
            Ok(ms) if ms >= 0 => self.response_time = Some(Duration::from_millis(ms as u64)),
            _ => warn!(
                endpoint = %self.endpoint,
                value,
                "Response time must be a non-negative number of milliseconds"
            ),
        }
    }
}

/// Build a `METHOD PATH` key with the method upper-cased.
pub fn route_key(method: &str, path: &str) -> String {
    format!("{} {}", method.to_uppercase(), path)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Headers,
    Vars,
    ErrorConfig,
    ErrorBody,
    SuccessBody,
    ResponseTime,
}

impl Section {
    fn from_header(line: &str) -> Option<Self> {
        let name = line.trim().strip_suffix(':')?.trim();
        match name {
            "Additional Headers" => Some(Section::Headers),
            "Vars" | "Body vars" => Some(Section::Vars),
            "Error Config" => Some(Section::ErrorConfig),
            "Error body" => Some(Section::ErrorBody),
            "Success body" => Some(Section::SuccessBody),
            "Response time" => Some(Section::ResponseTime),
            _ => None,
        }
    }
}

fn parse_fields(fields: &mut BTreeMap<String, FieldDef>, lines: &[&str]) {
    for line in lines.iter().map(|l| l.trim()).filter(|l| !l.is_empty()) {
        let Some((name, spec)) = line.split_once(':') else {
            warn!(line, "Skipping definition without a generator");
            continue;
        };
        let name = name.trim();
        if name.is_empty() {
            warn!(line, "Skipping definition without a name");
            continue;
        }
        let (kind, condition) = spec.split_once(';').unwrap_or((spec, ""));
        fields.insert(
            name.to_string(),
            FieldDef {
                name: name.to_string(),
                kind: GeneratorKind::from(kind),
                condition: condition.trim().to_string(),
            },
        );
    }
}

fn join_body(lines: &[&str]) -> String {
    lines.join("\n").trim().to_string()
}
