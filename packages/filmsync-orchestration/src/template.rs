//! Named-placeholder SQL templates
//!
//! Config queries use `:name` placeholders; rendering turns them into
//! PostgreSQL positional parameters (`$1`, `$2`, ...) in order of first
//! appearance. A repeated name reuses its position. `::type` casts and
//! anything inside single or double quotes are left untouched.
//!
//! ```text
//! SELECT fw.id, fw.modified
//! FROM content.film_work fw
//! WHERE fw.modified > :watermark      <- dropped by strip_filter("watermark")
//! ORDER BY fw.modified
//! LIMIT :limit
//! ```

use filmsync_storage::QueryParam;

use crate::error::{OrchestratorError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlTemplate {
    source: String,
}

/// SQL ready to execute plus its positional parameters
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedQuery {
    pub sql: String,
    pub params: Vec<QueryParam>,
}

#[derive(Debug, PartialEq)]
enum Segment<'a> {
    Text(&'a str),
    Placeholder(&'a str),
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

fn is_ident_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn segments(sql: &str) -> Vec<Segment<'_>> {
    let bytes = sql.as_bytes();
    let mut out = Vec::new();
    let mut text_start = 0;
    let mut quote: Option<u8> = None;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];

        if let Some(q) = quote {
            if b == q {
                quote = None;
            }
            i += 1;
            continue;
        }

        match b {
            b'\'' | b'"' => {
                quote = Some(b);
                i += 1;
            }
            b':' if bytes.get(i + 1) == Some(&b':') => i += 2,
            b':' if bytes.get(i + 1).copied().map_or(false, is_ident_start) => {
                let name_start = i + 1;
                let mut end = name_start;
                while end < bytes.len() && is_ident_char(bytes[end]) {
                    end += 1;
                }
                if text_start < i {
                    out.push(Segment::Text(&sql[text_start..i]));
                }
                out.push(Segment::Placeholder(&sql[name_start..end]));
                text_start = end;
                i = end;
            }
            _ => i += 1,
        }
    }

    if text_start < bytes.len() {
        out.push(Segment::Text(&sql[text_start..]));
    }
    out
}

impl SqlTemplate {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Placeholder names in order of first appearance
    pub fn placeholders(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for segment in segments(&self.source) {
            if let Segment::Placeholder(name) = segment {
                if !names.iter().any(|n| n == name) {
                    names.push(name.to_string());
                }
            }
        }
        names
    }

    pub fn references(&self, name: &str) -> bool {
        segments(&self.source)
            .iter()
            .any(|s| matches!(s, Segment::Placeholder(n) if *n == name))
    }

    /// Copy of the template without the lines that reference `:name`
    pub fn strip_filter(&self, name: &str) -> SqlTemplate {
        let kept: Vec<&str> = self
            .source
            .lines()
            .filter(|line| {
                !segments(line)
                    .iter()
                    .any(|s| matches!(s, Segment::Placeholder(n) if *n == name))
            })
            .collect();
        SqlTemplate::new(kept.join("\n"))
    }

    /// Substitute positional markers and collect bind values
    ///
    /// Every placeholder must have a binding; extra bindings are ignored so a
    /// caller can always offer the same set.
    pub fn render(&self, bindings: &[(&str, QueryParam)]) -> Result<RenderedQuery> {
        let mut sql = String::with_capacity(self.source.len());
        let mut order: Vec<&str> = Vec::new();
        let mut params = Vec::new();

        for segment in segments(&self.source) {
            match segment {
                Segment::Text(text) => sql.push_str(text),
                Segment::Placeholder(name) => {
                    let position = match order.iter().position(|n| *n == name) {
                        Some(pos) => pos,
                        None => {
                            let value = bindings
                                .iter()
                                .find(|(n, _)| *n == name)
                                .map(|(_, v)| v.clone())
                                .ok_or_else(|| {
                                    OrchestratorError::config(format!(
                                        "query placeholder ':{}' has no bound value",
                                        name
                                    ))
                                })?;
                            order.push(name);
                            params.push(value);
                            order.len() - 1
                        }
                    };
                    sql.push('$');
                    sql.push_str(&(position + 1).to_string());
                }
            }
        }

        Ok(RenderedQuery { sql, params })
    }
}

impl From<&str> for SqlTemplate {
    fn from(source: &str) -> Self {
        SqlTemplate::new(source)
    }
}
