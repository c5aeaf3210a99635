//! Text helpers shared by the transcript probes

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;

/// Maximum characters of a session's searchable text
pub const SEARCH_TEXT_MAX_CHARS: usize = 2_000_000;

/// Maximum characters of a derived session title
pub const TITLE_MAX_CHARS: usize = 80;

/// Decode a record timestamp into epoch milliseconds.
///
/// Accepts RFC 3339 strings, naive ISO strings (taken as UTC) and numbers;
/// numbers above 1e12 are already milliseconds, smaller ones are seconds.
pub fn parse_timestamp(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(n) => {
            let raw = n.as_f64()?;
            if raw > 1e12 {
                Some(raw as i64)
            } else {
                Some((raw * 1000.0) as i64)
            }
        }
        Value::String(s) => parse_timestamp_str(s),
        _ => None,
    }
}

fn parse_timestamp_str(s: &str) -> Option<i64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc).timestamp_millis());
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc().timestamp_millis())
}

/// First non-empty line of `text`, trimmed
pub fn first_line(text: &str) -> &str {
    text.lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("")
}

/// Make a title out of the first line, truncated on a char boundary
pub fn truncate_title(text: &str) -> String {
    let line = first_line(text);
    if line.chars().count() > TITLE_MAX_CHARS {
        let head: String = line.chars().take(TITLE_MAX_CHARS - 3).collect();
        format!("{}...", head.trim_end())
    } else {
        line.to_string()
    }
}

/// Lowercased searchable text, capped at [`SEARCH_TEXT_MAX_CHARS`]
/// including the newline between parts.
///
/// Each part is lowercased as a whole, the same way search terms are,
/// so context-dependent folds (Greek final sigma) agree on both sides.
pub fn search_text<'a>(parts: impl IntoIterator<Item = &'a str>) -> String {
    let mut out = String::new();
    let mut remaining = SEARCH_TEXT_MAX_CHARS;
    for part in parts {
        if part.is_empty() {
            continue;
        }
        let separator = usize::from(!out.is_empty());
        if remaining <= separator {
            break;
        }
        if separator == 1 {
            out.push('\n');
            remaining -= 1;
        }
        for ch in part.to_lowercase().chars().take(remaining) {
            out.push(ch);
            remaining -= 1;
        }
    }
    out
}

/// Join the textual items of a content array (or a bare string)
pub fn content_text(content: Option<&Value>) -> String {
    match content {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(item_text)
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

fn item_text(item: &Value) -> Option<String> {
    if let Some(text) = item.get("text").and_then(Value::as_str) {
        return Some(text.to_string());
    }
    match item.get("type").and_then(Value::as_str) {
        Some("image_url" | "input_image" | "output_image" | "image") => Some("[image]".to_string()),
        _ => None,
    }
}

/// Best-effort text of a record whose shape is unknown
pub fn loose_text(record: &Value) -> String {
    let message = record.get("message");
    let candidates = [
        message.and_then(|m| m.get("content")),
        record.get("payload").and_then(|p| p.get("content")),
        record.get("payload").and_then(|p| p.get("text")),
        record.get("content"),
        record.get("text"),
    ];
    candidates
        .into_iter()
        .map(content_text)
        .map(|t| t.trim().to_string())
        .find(|t| !t.is_empty())
        .unwrap_or_default()
}

/// Parse a string that looks like a JSON object or array
pub fn try_parse_json(text: &str) -> Option<Value> {
    let s = text.trim();
    if !(s.starts_with('{') || s.starts_with('[')) {
        return None;
    }
    serde_json::from_str(s).ok()
}

pub fn pretty_json(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

/// Wrap `body` in a fenced block; four backticks for tool output that may
/// itself contain fences.
pub fn fenced(fence: &str, lang: &str, body: &str) -> String {
    format!("{fence}{lang}\n{}\n{fence}", body.trim_end())
}

/// Inner text of the first `<tag>...</tag>` pair
pub fn between_tags<'a>(text: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = text.find(&open)? + open.len();
    let end = start + text[start..].find(&close)?;
    Some(text[start..end].trim())
}

/// `<key>value</key>` pairs directly inside a block, in order
pub fn tag_pairs(block: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    let mut rest = block;
    while let Some(open) = rest.find('<') {
        let after = &rest[open + 1..];
        let Some(name_end) = after.find('>') else {
            break;
        };
        let name = &after[..name_end];
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            rest = after;
            continue;
        }
        let body = &after[name_end + 1..];
        let close = format!("</{name}>");
        match body.find(&close) {
            Some(close_at) => {
                pairs.push((name.to_string(), body[..close_at].trim().to_string()));
                rest = &body[close_at + close.len()..];
            }
            None => rest = body,
        }
    }
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_timestamp_variants() {
        let iso = json!("2025-01-02T03:04:05.678Z");
        assert_eq!(parse_timestamp(Some(&iso)), Some(1_735_787_045_678));

        let offset = json!("2025-01-02T04:04:05.678+01:00");
        assert_eq!(parse_timestamp(Some(&offset)), Some(1_735_787_045_678));

        let naive = json!("2025-01-02T03:04:05");
        assert_eq!(parse_timestamp(Some(&naive)), Some(1_735_787_045_000));

        assert_eq!(parse_timestamp(Some(&json!(1_735_787_045))), Some(1_735_787_045_000));
        assert_eq!(parse_timestamp(Some(&json!(1_735_787_045_678_i64))), Some(1_735_787_045_678));
        assert_eq!(parse_timestamp(Some(&json!("yesterday"))), None);
        assert_eq!(parse_timestamp(Some(&json!(null))), None);
        assert_eq!(parse_timestamp(None), None);
    }

    #[test]
    fn test_truncate_title() {
        assert_eq!(truncate_title("\n  fix the bug\nmore"), "fix the bug");

        let long = "é".repeat(100);
        let title = truncate_title(&long);
        assert!(title.ends_with("..."));
        assert_eq!(title.chars().count(), TITLE_MAX_CHARS);
    }

    #[test]
    fn test_search_text_is_lowercased_and_capped() {
        let text = search_text(["Hello", "", "WORLD"]);
        assert_eq!(text, "hello\nworld");

        let big = "a".repeat(SEARCH_TEXT_MAX_CHARS + 10);
        assert_eq!(search_text([big.as_str(), "tail"]).len(), SEARCH_TEXT_MAX_CHARS);
    }

    #[test]
    fn test_search_text_cap_counts_separators() {
        let head = "a".repeat(SEARCH_TEXT_MAX_CHARS - 1);
        assert_eq!(search_text([head.as_str(), "xyz"]), head);

        let head = "a".repeat(SEARCH_TEXT_MAX_CHARS - 3);
        let text = search_text([head.as_str(), "XYZ"]);
        assert_eq!(text.chars().count(), SEARCH_TEXT_MAX_CHARS);
        assert!(text.ends_with("\nxy"));
    }

    #[test]
    fn test_search_text_folds_like_search_terms() {
        // Word-final capital sigma lowers to ς, not σ
        let text = search_text(["Άνοιξε την ΟΔΟΣ"]);
        assert_eq!(text, "άνοιξε την οδο\u{3c2}");
        assert!(text.contains(&"ΟΔΟΣ".to_lowercase()));
        assert!(text.contains("οδο\u{3c2}"));
    }

    #[test]
    fn test_content_text() {
        let content = json!([
            {"type": "input_text", "text": "one"},
            {"type": "input_image", "image_url": "data:..."},
            {"type": "output_text", "text": "two"}
        ]);
        assert_eq!(content_text(Some(&content)), "one\n[image]\ntwo");
        assert_eq!(content_text(Some(&json!("plain"))), "plain");
        assert_eq!(content_text(None), "");
    }

    #[test]
    fn test_tag_helpers() {
        let text = "<environment_context>\n<cwd>/work</cwd>\n<shell>zsh</shell>\n</environment_context>";
        let inner = between_tags(text, "environment_context").unwrap();
        assert_eq!(
            tag_pairs(inner),
            vec![
                ("cwd".to_string(), "/work".to_string()),
                ("shell".to_string(), "zsh".to_string())
            ]
        );
        assert_eq!(between_tags("no tags", "cwd"), None);
    }
}
