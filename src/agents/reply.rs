//! Helpers for turning model replies into JSON objects and building prompts.

use serde::Serialize;
use serde_json::{Map, Value};

pub type JsonObject = Map<String, Value>;

/// Parse a model reply as a JSON object.
///
/// Tried in order: the whole reply, the first markdown code fence, and the
/// span from the first `{` to the last `}`. Anything that is not a JSON
/// object is rejected.
pub fn parse_object(reply: &str) -> Option<JsonObject> {
    let text = reply.trim();
    [Some(text), fenced_block(text), brace_span(text)]
        .into_iter()
        .flatten()
        .find_map(|candidate| match serde_json::from_str::<Value>(candidate) {
            Ok(Value::Object(map)) => Some(map),
            _ => None,
        })
}

/// Body of the first ```` ``` ```` fence, without its language tag.
fn fenced_block(text: &str) -> Option<&str> {
    let (_, rest) = text.split_once("```")?;
    // Language tag (```json) runs to the end of the line
    let rest = match rest.split_once('\n') {
        Some((tag, body)) if !tag.trim_start().starts_with('{') => body,
        _ => rest,
    };
    let body = rest.split_once("```").map_or(rest, |(body, _)| body);
    Some(body.trim())
}

fn brace_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (start < end).then(|| &text[start..=end])
}

/// Unwrap a `json!` object literal into its map.
pub fn into_object(value: Value) -> JsonObject {
    match value {
        Value::Object(map) => map,
        _ => JsonObject::new(),
    }
}

/// First `max` characters of `text`.
pub fn head(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// Pretty JSON for embedding in prompts.
pub fn pretty<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "null".to_string())
}

/// Pretty JSON of a value, or `fallback` when it is null or empty.
pub fn pretty_or(value: &Value, fallback: &str) -> String {
    if is_blank(value) {
        fallback.to_string()
    } else {
        pretty(value)
    }
}

/// Null, empty string, empty array or empty object.
pub fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

pub fn str_or<'a>(input: &'a Value, key: &str, default: &'a str) -> &'a str {
    input.get(key).and_then(Value::as_str).unwrap_or(default)
}

pub fn f64_or(input: &Value, key: &str, default: f64) -> f64 {
    input.get(key).and_then(Value::as_f64).unwrap_or(default)
}

pub fn array<'a>(input: &'a Value, key: &str) -> &'a [Value] {
    input
        .get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// Member `key` of `input`, or `Value::Null`.
pub fn field<'a>(input: &'a Value, key: &str) -> &'a Value {
    input.get(key).unwrap_or(&Value::Null)
}

/// Render a value for a prompt line, `N/A` when absent.
pub fn display_or_na(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => "N/A".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Amount with thousands separators and two decimals, e.g. `1,234,567.50`.
pub fn format_amount(amount: f64) -> String {
    let formatted = format!("{:.2}", amount.abs());
    let (int_part, frac_part) = formatted.split_once('.').unwrap_or((formatted.as_str(), "00"));

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    let sign = if amount < 0.0 { "-" } else { "" };
    format!("{sign}{grouped}.{frac_part}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_plain_and_fenced_objects() {
        assert_eq!(parse_object(r#"{"a": 1}"#).unwrap()["a"], json!(1));
        assert_eq!(
            parse_object("```json\n{\"a\": 2}\n```").unwrap()["a"],
            json!(2)
        );
        assert_eq!(parse_object("```\n{\"a\": 3}```").unwrap()["a"], json!(3));
    }

    #[test]
    fn finds_objects_inside_prose() {
        let fenced = "Here is the JSON:\n```json\n{\"a\": 4}\n```\nLet me know if you need more.";
        assert_eq!(parse_object(fenced).unwrap()["a"], json!(4));

        let inline = "Here is the JSON:```json{\"a\": 5}```";
        assert_eq!(parse_object(inline).unwrap()["a"], json!(5));

        let bare = "Sure. {\"boq\": {\"items\": []}} Hope that helps.";
        assert!(parse_object(bare).unwrap()["boq"]["items"].is_array());
    }

    #[test]
    fn rejects_prose_and_non_objects() {
        assert!(parse_object("Sure! Here is the BOQ you asked for.").is_none());
        assert!(parse_object("[1, 2, 3]").is_none());
        assert!(parse_object("").is_none());
    }

    #[test]
    fn head_counts_characters_not_bytes() {
        assert_eq!(head("₹₹₹₹", 2), "₹₹");
        assert_eq!(head("abc", 10), "abc");
    }

    #[test]
    fn amounts_are_grouped() {
        assert_eq!(format_amount(0.0), "0.00");
        assert_eq!(format_amount(999.5), "999.50");
        assert_eq!(format_amount(1234567.891), "1,234,567.89");
        assert_eq!(format_amount(-25000.0), "-25,000.00");
    }
}
