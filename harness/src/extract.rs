//! Best-effort extraction of a `{"query": ...}` object from agent output.
//!
//! The agent is asked for JSON but not guaranteed to produce it: responses
//! arrive fenced in markdown, single-quoted, Python-flavoured (`None`), or
//! buried in prose. Extraction is an ordered chain of pure strategies; the
//! first one that yields a JSON object wins.

use regex::Regex;
use serde_json::{Map, Value};

const FENCE_PATTERNS: [&str; 2] = [r"```json\s*([\s\S]*?)\s*```", r"```\s*([\s\S]*?)\s*```"];

const OBJECT_PATTERNS: [&str; 3] = [
    r#"(?s)(\{['"]query['"]:\s*(?:null|None|['"].*?['"]).*?\})"#,
    r#"(?s)(\{"query":\s*(?:null|"[^"]*")\})"#,
    r#"(?s)(\{'query':\s*(?:null|None|'[^']*')\})"#,
];

/// Extract a JSON object from an agent response, or `None` when every
/// strategy fails.
pub fn extract_query_json(response: &str) -> Option<Map<String, Value>> {
    from_fenced_block(response)
        .or_else(|| from_inline_object(response))
        .or_else(|| parse_object(response))
}

/// Strategy 1: fenced code blocks, tagged ```json first, then untagged.
fn from_fenced_block(response: &str) -> Option<Map<String, Value>> {
    for pattern in FENCE_PATTERNS {
        let re = Regex::new(pattern).ok()?;
        if let Some(captures) = re.captures(response) {
            let body = captures.get(1)?.as_str().trim();
            if let Some(parsed) = parse_object(body).or_else(|| parse_object(&repair(body))) {
                return Some(parsed);
            }
        }
    }
    None
}

/// Strategy 2: bare `{"query": ...}` patterns anywhere in the text, covering
/// double-quoted, single-quoted, and `None`-valued conventions.
fn from_inline_object(response: &str) -> Option<Map<String, Value>> {
    for pattern in OBJECT_PATTERNS {
        let re = Regex::new(pattern).ok()?;
        if let Some(captures) = re.captures(response) {
            let candidate = repair(captures.get(1)?.as_str());
            if let Some(parsed) = parse_object(&candidate) {
                return Some(parsed);
            }
        }
    }
    None
}

/// Rewrite Python-flavoured pseudo-JSON into something parseable. Blunt on
/// purpose: it also rewrites quotes and `None` inside string values, which
/// is the accepted cost of salvaging malformed output.
fn repair(text: &str) -> String {
    text.replace('\'', "\"").replace("None", "null")
}

fn parse_object(text: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}
