//! Template descriptors and their expansion.
//!
//! Two stages turn a handler's descriptor into a concrete value tree:
//!
//! 1. [`TemplateEngine`] renders Handlebars expressions found in string
//!    leaves against the request (`{{path.type}}`, `{{query.page}}`,
//!    `{{json.name}}`, `{{uuid}}`, ...). File-backed handlers use it.
//! 2. A [`TemplateExpander`] applies generation rules encoded in object keys.
//!    The dispatcher only depends on the trait; [`RuleExpander`] is the
//!    bundled implementation.
//!
//! # Rule keys
//!
//! | key            | array                  | string          | number           |
//! |----------------|------------------------|-----------------|------------------|
//! | `name\|N`      | items repeated N times | repeated N times| replaced by N    |
//! | `name\|min-max`| random repeat count    | random repeat   | random in range  |
//! | `name\|+step`  | -                      | -               | incremented per repetition |

use crate::request::MockRequest;
use handlebars::{handlebars_helper, Handlebars};
use rand::Rng;
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Number, Value};
use std::collections::HashMap;
use thiserror::Error;

/// Upper bound on repeat counts, so a typo cannot allocate unbounded output.
const MAX_REPEAT: u64 = 10_000;

/// Failure while rendering or expanding a descriptor.
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("template render failed: {0}")]
    Render(#[from] handlebars::RenderError),

    #[error("invalid rule on `{key}`: {reason}")]
    InvalidRule { key: String, reason: String },
}

/// Expands a template descriptor into concrete values.
pub trait TemplateExpander: Send + Sync {
    fn expand(&self, descriptor: &Value) -> Result<Value, TemplateError>;
}

/// Handlebars renderer for string leaves.
pub struct TemplateEngine {
    handlebars: Handlebars<'static>,
}

/// Context for template rendering.
#[derive(Debug, Serialize)]
pub struct TemplateContext {
    /// Named route parameters
    pub path: HashMap<String, String>,
    /// Query parameters
    pub query: HashMap<String, String>,
    /// Request headers
    pub headers: HashMap<String, String>,
    /// Request method
    pub method: String,
    /// Request path
    pub request_path: String,
    /// Request body (as string, if text)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    /// Request body as JSON (if parseable)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json: Option<Value>,
    /// Form fields of a urlencoded body
    #[serde(skip_serializing_if = "Option::is_none")]
    pub form: Option<HashMap<String, String>>,
}

impl TemplateContext {
    pub fn from_request(request: &MockRequest) -> Self {
        Self {
            path: request.params.clone(),
            query: request.query.clone(),
            headers: request.headers.clone(),
            method: request.method.clone(),
            request_path: request.path.clone(),
            body: request.body_text().map(String::from),
            json: request.json(),
            form: request.form(),
        }
    }
}

impl TemplateEngine {
    /// Create a new template engine.
    pub fn new() -> Self {
        let mut handlebars = Handlebars::new();

        handlebars.register_helper("json", Box::new(json_helper));
        handlebars.register_helper("uuid", Box::new(uuid_helper));
        handlebars.register_helper("now", Box::new(now_helper));
        handlebars.register_helper("random", Box::new(random_helper));
        handlebars.register_helper("default", Box::new(default_helper));
        handlebars.register_helper("upper", Box::new(upper));
        handlebars.register_helper("lower", Box::new(lower));

        // Output is JSON, not HTML
        handlebars.register_escape_fn(handlebars::no_escape);

        Self { handlebars }
    }

    #[cfg(test)]
    fn render(&self, template: &str, request: &MockRequest) -> Result<String, TemplateError> {
        let ctx = TemplateContext::from_request(request);
        Ok(self.handlebars.render_template(template, &ctx)?)
    }

    /// Render every templated string leaf (and key) of a JSON value.
    pub fn render_json(&self, json: &Value, request: &MockRequest) -> Result<Value, TemplateError> {
        let ctx = TemplateContext::from_request(request);
        self.render_json_value(json, &ctx)
    }

    fn render_str(&self, s: &str, ctx: &TemplateContext) -> Result<String, TemplateError> {
        if s.contains("{{") {
            Ok(self.handlebars.render_template(s, ctx)?)
        } else {
            Ok(s.to_string())
        }
    }

    fn render_json_value(&self, value: &Value, ctx: &TemplateContext) -> Result<Value, TemplateError> {
        match value {
            Value::String(s) => Ok(Value::String(self.render_str(s, ctx)?)),
            Value::Array(arr) => arr
                .iter()
                .map(|v| self.render_json_value(v, ctx))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Value::Object(obj) => {
                let mut rendered = Map::new();
                for (k, v) in obj {
                    rendered.insert(self.render_str(k, ctx)?, self.render_json_value(v, ctx)?);
                }
                Ok(Value::Object(rendered))
            }
            _ => Ok(value.clone()),
        }
    }
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Generation rule parsed from a `name|rule` key.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Rule {
    Count(u64),
    Range(u64, u64),
    Step(f64),
}

impl Rule {
    fn repeat_count(self) -> u64 {
        match self {
            Rule::Count(n) => n,
            Rule::Range(min, max) => rand::thread_rng().gen_range(min..=max),
            Rule::Step(_) => 1,
        }
    }
}

/// Built-in expander for `name|rule` keys.
pub struct RuleExpander {
    rule_key: Regex,
}

impl RuleExpander {
    pub fn new() -> Result<Self, regex::Error> {
        let rule_key = Regex::new(
            r"^(?P<name>[^|]+)\|(?:(?P<min>\d+)(?:-(?P<max>\d+))?|\+(?P<step>\d+(?:\.\d+)?))$",
        )?;
        Ok(Self { rule_key })
    }

    fn parse_key<'k>(&self, key: &'k str) -> Result<Option<(&'k str, Rule)>, TemplateError> {
        let Some(caps) = self.rule_key.captures(key) else {
            return Ok(None);
        };
        let name = caps.name("name").map_or(key, |m| m.as_str());
        let invalid = |reason: &str| TemplateError::InvalidRule {
            key: key.to_string(),
            reason: reason.to_string(),
        };
        let number = |m: regex::Match| m.as_str().parse::<u64>().map_err(|_| invalid("number out of range"));

        let rule = if let Some(step) = caps.name("step") {
            Rule::Step(step.as_str().parse().map_err(|_| invalid("bad step"))?)
        } else {
            let Some(min) = caps.name("min") else {
                return Ok(None);
            };
            let min = number(min)?;
            match caps.name("max") {
                Some(max) => {
                    let max = number(max)?;
                    if min > max {
                        return Err(invalid("min is greater than max"));
                    }
                    Rule::Range(min, max)
                }
                None => Rule::Count(min),
            }
        };

        let limit = match rule {
            Rule::Count(n) | Rule::Range(_, n) => n,
            Rule::Step(_) => 0,
        };
        if limit > MAX_REPEAT {
            return Err(invalid("repeat count too large"));
        }

        Ok(Some((name, rule)))
    }

    fn expand_value(
        &self,
        value: &Value,
        path: &str,
        counters: &mut HashMap<String, f64>,
    ) -> Result<Value, TemplateError> {
        match value {
            Value::Object(obj) => {
                let mut out = Map::new();
                for (key, v) in obj {
                    match self.parse_key(key)? {
                        Some((name, rule)) => {
                            let child = format!("{path}/{name}");
                            out.insert(name.to_string(), self.apply_rule(rule, v, &child, counters)?);
                        }
                        None => {
                            let child = format!("{path}/{key}");
                            out.insert(key.clone(), self.expand_value(v, &child, counters)?);
                        }
                    }
                }
                Ok(Value::Object(out))
            }
            Value::Array(items) => {
                let child = format!("{path}/*");
                items
                    .iter()
                    .map(|v| self.expand_value(v, &child, counters))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::Array)
            }
            _ => Ok(value.clone()),
        }
    }

    fn apply_rule(
        &self,
        rule: Rule,
        value: &Value,
        path: &str,
        counters: &mut HashMap<String, f64>,
    ) -> Result<Value, TemplateError> {
        match (rule, value) {
            (Rule::Step(step), Value::Number(start)) => {
                let next = match counters.get(path) {
                    Some(previous) => previous + step,
                    None => start.as_f64().unwrap_or_default(),
                };
                counters.insert(path.to_string(), next);
                Ok(number_value(next, start.is_f64() || step.fract() != 0.0))
            }
            (Rule::Step(_), other) => self.expand_value(other, path, counters),
            (Rule::Count(n), Value::Number(_)) => Ok(Value::Number(n.into())),
            (Rule::Range(min, max), Value::Number(_)) => {
                Ok(Value::Number(rand::thread_rng().gen_range(min..=max).into()))
            }
            (rule, Value::Array(items)) => {
                let child = format!("{path}/*");
                let mut out = Vec::new();
                for _ in 0..rule.repeat_count() {
                    for item in items {
                        out.push(self.expand_value(item, &child, counters)?);
                    }
                }
                Ok(Value::Array(out))
            }
            (rule, Value::String(s)) => Ok(Value::String(s.repeat(rule.repeat_count() as usize))),
            (_, other) => self.expand_value(other, path, counters),
        }
    }
}

impl TemplateExpander for RuleExpander {
    fn expand(&self, descriptor: &Value) -> Result<Value, TemplateError> {
        let mut counters = HashMap::new();
        self.expand_value(descriptor, "", &mut counters)
    }
}

fn number_value(n: f64, float: bool) -> Value {
    if !float && n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Value::Number((n as i64).into())
    } else {
        Number::from_f64(n).map_or(Value::Null, Value::Number)
    }
}

// Handlebars helpers

handlebars_helper!(upper: |s: str| s.to_uppercase());
handlebars_helper!(lower: |s: str| s.to_lowercase());

/// Default `now` format: UTC with millisecond precision.
const NOW_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

fn first_str<'h>(h: &'h handlebars::Helper, index: usize) -> Option<&'h str> {
    h.param(index).and_then(|p| p.value().as_str())
}

fn write(out: &mut dyn handlebars::Output, value: String) -> handlebars::HelperResult {
    out.write(&value)?;
    Ok(())
}

/// `{{json value}}`: strings verbatim, anything else as compact JSON.
fn json_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    let value = match h.param(0).map(|p| p.value()) {
        Some(Value::String(s)) => s.clone(),
        Some(value) => value.to_string(),
        None => String::new(),
    };
    write(out, value)
}

/// `{{uuid}}`: random RFC 4122 version 4 identifier.
fn uuid_helper(
    _: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill(&mut bytes);
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;

    let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
    write(out, [&hex[..8], &hex[8..12], &hex[12..16], &hex[16..20], &hex[20..]].join("-"))
}

/// `{{now}}` or `{{now "%Y-%m-%d"}}`.
fn now_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    let format = first_str(h, 0).unwrap_or(NOW_FORMAT);
    write(out, chrono::Utc::now().format(format).to_string())
}

/// `{{random a b}}`: integer in the inclusive range, bounds in either order.
fn random_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    let bound = |i: usize, fallback: i64| h.param(i).and_then(|p| p.value().as_i64()).unwrap_or(fallback);
    let (a, b) = (bound(0, 0), bound(1, 100));
    write(out, rand::thread_rng().gen_range(a.min(b)..=a.max(b)).to_string())
}

/// `{{default value "fallback"}}`: fallback for missing, null or empty values.
fn default_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    let value = match h.param(0).map(|p| p.value()) {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        None | Some(Value::Null) | Some(Value::String(_)) => first_str(h, 1).unwrap_or_default().to_string(),
        Some(value) => value.to_string(),
    };
    write(out, value)
}
