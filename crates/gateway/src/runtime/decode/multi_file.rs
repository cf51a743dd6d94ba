use std::sync::OnceLock;

use cm_domain::OutputMode;
use regex::Regex;

use super::{StreamDecoder, FENCE};

const HTML_FILE: &str = "index.html";
const CSS_FILE: &str = "style.css";
const JS_FILE: &str = "script.js";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Html,
    Css,
    Js,
}

impl Kind {
    fn default_file(self) -> &'static str {
        match self {
            Self::Html => HTML_FILE,
            Self::Css => CSS_FILE,
            Self::Js => JS_FILE,
        }
    }

    fn from_file_name(name: &str) -> Option<Self> {
        let lower = name.to_ascii_lowercase();
        if lower.ends_with(".html") || lower.ends_with(".htm") {
            Some(Self::Html)
        } else if lower.ends_with(".css") {
            Some(Self::Css)
        } else if lower.ends_with(".js") {
            Some(Self::Js)
        } else {
            None
        }
    }

    fn from_lang_tag(tag: &str) -> Option<Self> {
        match tag.to_ascii_lowercase().as_str() {
            "html" | "htm" => Some(Self::Html),
            "css" => Some(Self::Css),
            "js" | "javascript" | "mjs" => Some(Self::Js),
            _ => None,
        }
    }

    fn from_content(body: &str) -> Option<Self> {
        let lower = body.to_ascii_lowercase();
        const HTML_CUES: [&str; 3] = ["<!doctype", "<html", "<head"];
        const CSS_CUES: [&str; 3] = ["body {", "color:", "font-"];
        const JS_CUES: [&str; 6] = ["function", "const ", "let ", "var ", "document.", "console."];

        if HTML_CUES.iter().any(|c| lower.contains(c)) {
            Some(Self::Html)
        } else if CSS_CUES.iter().any(|c| lower.contains(c)) {
            Some(Self::Css)
        } else if JS_CUES.iter().any(|c| lower.contains(c)) {
            Some(Self::Js)
        } else {
            None
        }
    }
}

/// A file name mentioned in prose, e.g. "Now the `style.css` file:".
fn hinted_file_name(text: &str) -> Option<String> {
    static HINT: OnceLock<Option<Regex>> = OnceLock::new();
    let re = HINT
        .get_or_init(|| Regex::new(r"(?i)\b([\w-]+(?:/[\w-]+)*\.(?:html|css|js))\b").ok())
        .as_ref()?;
    re.captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_owned())
}

/// Multi-file output (HTML, CSS, JS) in plain text. Like the plain decoder,
/// but every opened block is assigned a file name and wrapped in
/// `[MULTI_FILE_START:name]` / `[MULTI_FILE_CONTENT:name]` /
/// `[MULTI_FILE_END:name]` markup.
///
/// Name inference on an opening fence, first match wins:
/// 1. a name staged from a prose hint,
/// 2. the fence's language tag,
/// 3. content cues in the rest of the chunk,
/// 4. the first of HTML, CSS, JS not yet assigned.
#[derive(Debug, Default)]
pub struct MultiFileDecoder {
    in_block: bool,
    current_file: Option<String>,
    staged_file: Option<String>,
    seen_html: bool,
    seen_css: bool,
    seen_js: bool,
    transcript: String,
}

impl MultiFileDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    fn mark_seen(&mut self, kind: Kind) {
        match kind {
            Kind::Html => self.seen_html = true,
            Kind::Css => self.seen_css = true,
            Kind::Js => self.seen_js = true,
        }
    }

    fn next_unseen(&self) -> Option<Kind> {
        if !self.seen_html {
            Some(Kind::Html)
        } else if !self.seen_css {
            Some(Kind::Css)
        } else if !self.seen_js {
            Some(Kind::Js)
        } else {
            None
        }
    }

    /// `after_fence` is the chunk text right after the opening fence: the
    /// language tag, then possibly the first lines of content.
    fn infer_file(&mut self, after_fence: &str) -> Option<String> {
        if let Some(name) = self.staged_file.take() {
            if let Some(kind) = Kind::from_file_name(&name) {
                self.mark_seen(kind);
            }
            return Some(name);
        }

        let (tag, body) = match after_fence.split_once('\n') {
            Some((tag, body)) => (tag.trim(), body),
            None => (after_fence.trim(), ""),
        };
        let kind = Kind::from_lang_tag(tag)
            .or_else(|| Kind::from_content(body))
            .or_else(|| self.next_unseen())?;
        self.mark_seen(kind);
        Some(kind.default_file().to_owned())
    }

    fn note_prose(&mut self, text: &str) {
        if let Some(name) = hinted_file_name(text) {
            if self.current_file.as_deref() != Some(name.as_str()) {
                self.staged_file = Some(name);
            }
        }
    }

    fn open_block(&mut self, out: &mut String, after_fence: &str) {
        if let Some(prev) = self.current_file.take() {
            out.push_str(&format!("[MULTI_FILE_END:{prev}]"));
        }
        if let Some(name) = self.infer_file(after_fence) {
            out.push_str(&format!("[MULTI_FILE_START:{name}]"));
            self.current_file = Some(name);
        }
        out.push_str(FENCE);
        self.in_block = true;
    }

    fn close_block(&mut self, out: &mut String) {
        out.push_str(FENCE);
        if let Some(name) = self.current_file.take() {
            out.push_str(&format!("[MULTI_FILE_END:{name}]"));
        }
        self.in_block = false;
    }
}

impl StreamDecoder for MultiFileDecoder {
    fn mode(&self) -> OutputMode {
        OutputMode::MultiFile
    }

    fn decode(&mut self, chunk: &str) -> Option<String> {
        self.transcript.push_str(chunk);

        if !chunk.contains(FENCE) {
            if self.in_block {
                return Some(match &self.current_file {
                    Some(name) => format!("[MULTI_FILE_CONTENT:{name}]{chunk}"),
                    None => chunk.to_owned(),
                });
            }
            self.note_prose(chunk);
            return Some(chunk.to_owned());
        }

        let mut out = String::with_capacity(chunk.len() + 64);
        let mut segments = chunk.split(FENCE);
        let head = segments.next().unwrap_or_default();
        if !self.in_block {
            self.note_prose(head);
        }
        out.push_str(head);

        for segment in segments {
            if self.in_block {
                self.close_block(&mut out);
                self.note_prose(segment);
            } else {
                self.open_block(&mut out, segment);
            }
            out.push_str(segment);
        }
        Some(out)
    }

    fn transcript(&self) -> &str {
        &self.transcript
    }
}
