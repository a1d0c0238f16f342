//! Shape-preserving sanitization of untrusted input trees.
//!
//! Only string leaves change. Object keys, nesting and non-string scalars
//! pass through untouched.

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;

lazy_static! {
    static ref SCRIPT_BLOCK: Regex = Regex::new(r"(?is)<script\b[^>]*>.*?</script\s*>").unwrap();
    static ref JS_SCHEME: Regex = Regex::new(r"(?i)javascript\s*:").unwrap();
    static ref EVENT_HANDLER: Regex = Regex::new(r"(?i)on\w+\s*=").unwrap();
    static ref DATA_HTML_URI: Regex = Regex::new(r"(?i)data\s*:\s*text/html").unwrap();
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SanitizeMode {
    /// Applied to every request input.
    #[default]
    Standard,
    /// Also strips `data:text/html` URIs; for persisted or displayed content.
    Strict,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Sanitizer {
    mode: SanitizeMode,
}

impl Sanitizer {
    pub fn new(mode: SanitizeMode) -> Self {
        Self { mode }
    }

    pub fn strict() -> Self {
        Self::new(SanitizeMode::Strict)
    }

    pub fn sanitize_str(&self, input: &str) -> String {
        let out = SCRIPT_BLOCK.replace_all(input, "");
        let out = JS_SCHEME.replace_all(&out, "");
        let out = EVENT_HANDLER.replace_all(&out, "");
        let out = match self.mode {
            SanitizeMode::Standard => out,
            SanitizeMode::Strict => DATA_HTML_URI.replace_all(&out, "").into_owned().into(),
        };
        out.trim().to_string()
    }

    pub fn sanitize_value(&self, value: Value) -> Value {
        match value {
            Value::String(s) => Value::String(self.sanitize_str(&s)),
            Value::Array(items) => Value::Array(items.into_iter().map(|v| self.sanitize_value(v)).collect()),
            Value::Object(map) => Value::Object(map.into_iter().map(|(k, v)| (k, self.sanitize_value(v))).collect()),
            other => other,
        }
    }

    /// Sanitizes values of key/value pairs (query strings, forms, path params).
    pub fn sanitize_pairs(&self, pairs: Vec<(String, String)>) -> Vec<(String, String)> {
        pairs.into_iter().map(|(k, v)| (k, self.sanitize_str(&v))).collect()
    }
}
