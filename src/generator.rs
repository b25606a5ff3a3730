//! Variable generators.
//!
//! Every body variable and header in a template names a generator kind and
//! an optional condition. Generation never fails from the caller's point of
//! view: errors are logged and the value degrades to an empty string.

use crate::xpath::{self, XPathError};
use rand::distributions::Alphanumeric;
use rand::Rng;
use regex::RegexBuilder;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tracing::warn;

const DEFAULT_RANDOM_MIN: i64 = 0;
const DEFAULT_RANDOM_MAX: i64 = 999;
const DEFAULT_STRING_LEN: usize = 6;

/// Generator kinds understood by templates.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GeneratorKind {
    /// XPath expression against an XML body
    XmlParse,
    /// `/`-separated field path into a JSON body
    JsonParse,
    /// Regular expression search in the body
    RegexParse,
    /// Random integer from `min-max`, `max` or 0-999
    RandomNum,
    /// Random alphanumeric string, `len=N`
    RandomString,
    /// The condition itself
    Fixed,
    /// Request header by name
    ReqHeader,
    /// Query parameter by name
    ReqParam,
    /// Path variable by name
    ReqPath,
    /// Anything else; generates an empty value
    Unknown(String),
}

impl GeneratorKind {
    /// Template identifier for this kind.
    pub fn as_str(&self) -> &str {
        match self {
            GeneratorKind::XmlParse => "xmlParse",
            GeneratorKind::JsonParse => "jsonParse",
            GeneratorKind::RegexParse => "regexParse",
            GeneratorKind::RandomNum => "randomNum",
            GeneratorKind::RandomString => "randomString",
            GeneratorKind::Fixed => "fixed",
            GeneratorKind::ReqHeader => "reqHeader",
            GeneratorKind::ReqParam => "reqParam",
            GeneratorKind::ReqPath => "reqPath",
            GeneratorKind::Unknown(name) => name,
        }
    }
}

impl From<&str> for GeneratorKind {
    fn from(value: &str) -> Self {
        match value.trim() {
            "xmlParse" => GeneratorKind::XmlParse,
            "jsonParse" => GeneratorKind::JsonParse,
            "regexParse" => GeneratorKind::RegexParse,
            "randomNum" => GeneratorKind::RandomNum,
            "randomString" => GeneratorKind::RandomString,
            "fixed" => GeneratorKind::Fixed,
            "reqHeader" => GeneratorKind::ReqHeader,
            "reqParam" => GeneratorKind::ReqParam,
            "reqPath" => GeneratorKind::ReqPath,
            other => GeneratorKind::Unknown(other.to_string()),
        }
    }
}

impl fmt::Display for GeneratorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Internal generation failures. Never escapes [`generate`].
#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error(transparent)]
    Xml(#[from] XPathError),

    #[error("invalid JSON body: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid regex: {0}")]
    Regex(#[from] regex::Error),

    #[error("invalid argument {0:?}")]
    InvalidArgument(String),
}

/// Request data available to generators.
#[derive(Debug, Clone, Copy)]
pub struct RequestContext<'a> {
    /// Raw request body (possibly empty)
    pub body: &'a str,
    /// Request headers
    pub headers: &'a HashMap<String, String>,
    /// Query parameters
    pub query: &'a HashMap<String, String>,
    /// Path variables captured by the matched template
    pub path_vars: &'a HashMap<String, String>,
}

/// Generate a value. Failures are logged and yield an empty string.
pub fn generate<R: Rng>(
    kind: &GeneratorKind,
    condition: &str,
    ctx: &RequestContext<'_>,
    rng: &mut R,
) -> String {
    match try_generate(kind, condition, ctx, rng) {
        Ok(value) => value,
        Err(e) => {
            warn!(kind = %kind, condition, error = %e, "Variable generation failed");
            String::new()
        }
    }
}

fn try_generate<R: Rng>(
    kind: &GeneratorKind,
    condition: &str,
    ctx: &RequestContext<'_>,
    rng: &mut R,
) -> Result<String, GeneratorError> {
    match kind {
        GeneratorKind::XmlParse => xml_parse(ctx.body, condition),
        GeneratorKind::JsonParse => json_parse(ctx.body, condition),
        GeneratorKind::RegexParse => regex_parse(ctx.body, condition),
        GeneratorKind::RandomNum => random_num(condition, rng),
        GeneratorKind::RandomString => Ok(random_string(condition, rng)),
        GeneratorKind::Fixed => Ok(condition.trim().to_string()),
        GeneratorKind::ReqHeader => Ok(lookup_header(ctx.headers, condition)),
        GeneratorKind::ReqParam => Ok(lookup(ctx.query, condition)),
        GeneratorKind::ReqPath => Ok(lookup(ctx.path_vars, condition)),
        GeneratorKind::Unknown(name) => {
            warn!(kind = %name, "Unknown variable generator");
            Ok(String::new())
        }
    }
}

fn xml_parse(body: &str, expression: &str) -> Result<String, GeneratorError> {
    if body.trim().is_empty() {
        return Ok(String::new());
    }
    Ok(xpath::evaluate(body, expression.trim())?)
}

fn json_parse(body: &str, path: &str) -> Result<String, GeneratorError> {
    let root: serde_json::Value = serde_json::from_str(body)?;
    let mut node = &root;

    for segment in path.trim().split('/').filter(|s| !s.is_empty()) {
        let next = match node {
            serde_json::Value::Object(map) => map.get(segment),
            serde_json::Value::Array(items) => {
                segment.parse::<usize>().ok().and_then(|i| items.get(i))
            }
            _ => None,
        };
        match next {
            Some(value) => node = value,
            None => return Ok(String::new()),
        }
    }

    Ok(match node {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    })
}

fn regex_parse(body: &str, pattern: &str) -> Result<String, GeneratorError> {
    let regex = RegexBuilder::new(pattern.trim())
        .dot_matches_new_line(true)
        .build()?;

    let Some(captures) = regex.captures(body) else {
        return Ok(String::new());
    };

    let value = if regex.captures_len() > 1 {
        captures.get(1)
    } else {
        captures.get(0)
    };
    Ok(value.map(|m| m.as_str().to_string()).unwrap_or_default())
}

fn random_num<R: Rng>(condition: &str, rng: &mut R) -> Result<String, GeneratorError> {
    let condition = condition.trim();
    let (min, max) = if condition.is_empty() {
        (DEFAULT_RANDOM_MIN, DEFAULT_RANDOM_MAX)
    } else {
        let parts: Vec<&str> = condition.split('-').map(str::trim).collect();
        let parsed = match parts.as_slice() {
            [min, max] => min.parse().ok().zip(max.parse().ok()),
            [max] => max.parse().ok().map(|max| (DEFAULT_RANDOM_MIN, max)),
            _ => None,
        };
        parsed.unwrap_or_else(|| {
            warn!(condition, "Unparsable randomNum range, using defaults");
            (DEFAULT_RANDOM_MIN, DEFAULT_RANDOM_MAX)
        })
    };

    if min > max {
        return Err(GeneratorError::InvalidArgument(condition.to_string()));
    }
    Ok(rng.gen_range(min..=max).to_string())
}

fn random_string<R: Rng>(condition: &str, rng: &mut R) -> String {
    let len = condition
        .trim()
        .strip_prefix("len=")
        .and_then(|n| n.trim().parse::<usize>().ok())
        .unwrap_or(DEFAULT_STRING_LEN);

    (0..len).map(|_| rng.sample(Alphanumeric) as char).collect()
}

fn lookup(values: &HashMap<String, String>, key: &str) -> String {
    values.get(key.trim()).cloned().unwrap_or_default()
}

fn lookup_header(headers: &HashMap<String, String>, name: &str) -> String {
    let name = name.trim();
    headers
        .get(name)
        .or_else(|| {
            headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v)
        })
        .cloned()
        .unwrap_or_default()
}
