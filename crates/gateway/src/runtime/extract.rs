//! Code extractor: pull files out of a completed plain-text response.
//!
//! Pure and idempotent. Tool-protocol runs write their files through the
//! `writeFile` tool while streaming, so nothing is extracted for them.

use std::sync::OnceLock;

use cm_domain::OutputMode;
use regex::Regex;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CodeKind {
    Html,
    Css,
    Js,
}

impl CodeKind {
    pub fn file_name(self) -> &'static str {
        match self {
            Self::Html => "index.html",
            Self::Css => "style.css",
            Self::Js => "script.js",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractedFile {
    pub kind: CodeKind,
    pub path: String,
    pub content: String,
}

impl ExtractedFile {
    fn new(kind: CodeKind, content: &str) -> Self {
        Self {
            kind,
            path: kind.file_name().to_owned(),
            content: content.to_owned(),
        }
    }
}

struct Patterns {
    html: Regex,
    css: Regex,
    js: Regex,
    any: Regex,
}

fn patterns() -> Option<&'static Patterns> {
    static PATTERNS: OnceLock<Option<Patterns>> = OnceLock::new();
    PATTERNS
        .get_or_init(|| {
            Some(Patterns {
                html: Regex::new(r"(?is)```html\s*\n(.*?)```").ok()?,
                css: Regex::new(r"(?is)```css\s*\n(.*?)```").ok()?,
                js: Regex::new(r"(?is)```(?:js|javascript)\s*\n(.*?)```").ok()?,
                any: Regex::new(r"(?s)```[^\n`]*\n(.*?)```").ok()?,
            })
        })
        .as_ref()
}

/// First non-blank captured body, trimmed.
fn first_body(re: &Regex, text: &str) -> Option<String> {
    re.captures_iter(text)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().trim())
        .find(|body| !body.is_empty())
        .map(str::to_owned)
}

pub fn extract(mode: OutputMode, text: &str) -> Vec<ExtractedFile> {
    let Some(p) = patterns() else {
        tracing::error!("code extraction patterns failed to compile");
        return Vec::new();
    };

    match mode {
        OutputMode::Html => {
            let body = first_body(&p.html, text)
                .or_else(|| first_body(&p.any, text))
                .unwrap_or_else(|| text.trim().to_owned());
            vec![ExtractedFile::new(CodeKind::Html, &body)]
        }
        OutputMode::MultiFile => [
            (CodeKind::Html, &p.html),
            (CodeKind::Css, &p.css),
            (CodeKind::Js, &p.js),
        ]
        .into_iter()
        .filter_map(|(kind, re)| first_body(re, text).map(|body| ExtractedFile::new(kind, &body)))
        .collect(),
        OutputMode::VueProject => Vec::new(),
    }
}
