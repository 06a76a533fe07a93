//! Parameterized route matching.
//!
//! Extracts named parameters from paths such as `/api/{type}/detail` so the
//! key normalizer can collapse them. Templates accept both `{name}` and
//! `:name` segment syntax.

use std::collections::HashMap;

/// A compiled route template.
#[derive(Debug, Clone)]
pub struct PathTemplate {
    source: String,
    segments: Vec<TemplateSegment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TemplateSegment {
    Literal(String),
    Param(String),
}

impl PathTemplate {
    /// Compile a template. Segments are split on `/`.
    pub fn parse(template: &str) -> Self {
        let segments = template
            .split('/')
            .skip(1)
            .map(|segment| {
                if let Some(name) = segment
                    .strip_prefix('{')
                    .and_then(|s| s.strip_suffix('}'))
                {
                    TemplateSegment::Param(name.to_string())
                } else if let Some(name) = segment.strip_prefix(':') {
                    TemplateSegment::Param(name.to_string())
                } else {
                    TemplateSegment::Literal(segment.to_string())
                }
            })
            .collect();

        Self {
            source: template.to_string(),
            segments,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Match a full path, returning the captured parameters.
    ///
    /// Parameters never match an empty segment.
    pub fn matches(&self, path: &str) -> Option<HashMap<String, String>> {
        let parts: Vec<&str> = path.split('/').skip(1).collect();
        if parts.len() != self.segments.len() {
            return None;
        }

        let mut params = HashMap::new();
        for (segment, part) in self.segments.iter().zip(parts) {
            match segment {
                TemplateSegment::Literal(lit) if lit == part => {}
                TemplateSegment::Literal(_) => return None,
                TemplateSegment::Param(_) if part.is_empty() => return None,
                TemplateSegment::Param(name) => {
                    params.insert(name.clone(), part.to_string());
                }
            }
        }

        Some(params)
    }
}

/// Ordered set of parameterized routes. First match wins.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    templates: Vec<PathTemplate>,
}

impl RouteTable {
    pub fn new<S: AsRef<str>>(templates: &[S]) -> Self {
        Self {
            templates: templates
                .iter()
                .map(|t| PathTemplate::parse(t.as_ref()))
                .collect(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.templates.len()
    }

    /// Named parameters of the first template matching `path`, or an empty map.
    pub fn params(&self, path: &str) -> HashMap<String, String> {
        self.templates
            .iter()
            .find_map(|t| t.matches(path))
            .unwrap_or_default()
    }
}
