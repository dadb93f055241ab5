//! Reply extraction and low-risk textual repair
//!
//! Agents reply with JSON wrapped in prose, code fences, comments and the
//! occasional trailing comma. Only noise is removed here; nothing is coerced.

use serde::de::DeserializeOwned;

/// Extract JSON from a response that may contain markdown code blocks
pub fn extract_json(text: &str) -> &str {
    // Try to find JSON in code blocks first
    if let Some(start) = text.find("```json") {
        if let Some(end) = text[start + 7..].find("```") {
            return text[start + 7..start + 7 + end].trim();
        }
    }

    // Try generic code blocks
    if let Some(start) = text.find("```") {
        if let Some(end) = text[start + 3..].find("```") {
            let content = text[start + 3..start + 3 + end].trim();
            if content.starts_with('{') || content.starts_with('[') {
                return content;
            }
            // Skip language identifier if present
            if let Some(newline) = content.find('\n') {
                return content[newline + 1..].trim();
            }
            return content;
        }
    }

    // Try to find raw JSON object
    if let Some(start) = text.find('{') {
        if let Some(end) = text.rfind('}') {
            if end > start {
                return &text[start..=end];
            }
        }
    }

    text.trim()
}

/// Strip comments, trailing commas and stray separators outside string literals
pub fn repair_json(text: &str) -> String {
    let normalized = normalize_quotes(text);
    let body = extract_json(&normalized)
        .trim()
        .trim_start_matches("---")
        .trim_end_matches("---")
        .trim()
        .trim_end_matches(';')
        .trim();

    let chars: Vec<char> = body.chars().collect();
    let mut out = String::with_capacity(body.len());
    let mut in_string = false;
    let mut escaped = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            i += 1;
            continue;
        }

        match c {
            '"' => {
                in_string = true;
                out.push(c);
                i += 1;
            }
            '/' if chars.get(i + 1) == Some(&'/') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                i += 2;
                while i + 1 < chars.len() && !(chars[i] == '*' && chars[i + 1] == '/') {
                    i += 1;
                }
                i = (i + 2).min(chars.len());
            }
            '#' => {
                // Python-style comment
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            ',' => {
                let next = chars[i + 1..].iter().copied().find(|ch| !ch.is_whitespace());
                if !matches!(next, Some('}') | Some(']')) {
                    out.push(c);
                }
                i += 1;
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }

    out
}

/// Replace typographic double quotes with ASCII ones
fn normalize_quotes(text: &str) -> String {
    text.replace(['\u{201C}', '\u{201D}'], "\"")
}

/// Why a reply could not be turned into `T`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseFailure(pub String);

impl std::fmt::Display for ParseFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unparsable reply: {}", self.0)
    }
}

/// Parse a reply directly, then once more after repair
pub fn parse_reply<T: DeserializeOwned>(text: &str) -> Result<T, ParseFailure> {
    if let Ok(parsed) = serde_json::from_str::<T>(extract_json(text)) {
        return Ok(parsed);
    }
    let repaired = repair_json(text);
    serde_json::from_str::<T>(&repaired).map_err(|e| ParseFailure(e.to_string()))
}
