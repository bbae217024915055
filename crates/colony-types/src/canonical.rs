//! Canonical JSON text for hashing simulation configurations.
//!
//! The simulation producer derives run keys from `json.dumps(config,
//! sort_keys=True)`. To address the same runs, the ledger renders
//! configurations byte-for-byte the same way:
//!
//! - object keys sorted by code point, whatever order the map keeps
//! - `", "` between items and `": "` between key and value
//! - every character outside printable ASCII escaped as `\uXXXX`
//!   (lowercase hex, UTF-16 surrogate pairs above the BMP)
//! - floats in shortest round-trip form, switching to exponent notation
//!   below `1e-4` and from `1e16` up, always with a fractional part or an
//!   exponent (`100.0`, `1e-05`, `1e+16`)

use std::fmt::Write as _;

use serde_json::{Number, Value};

/// Render `value` as the producer's canonical configuration text.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    push_value(&mut out, value);
    out
}

fn push_value(out: &mut String, value: &Value) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(true) => out.push_str("true"),
        Value::Bool(false) => out.push_str("false"),
        Value::Number(n) => push_number(out, n),
        Value::String(s) => push_string(out, s),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                push_value(out, item);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_unstable_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                push_string(out, key);
                out.push_str(": ");
                push_value(out, item);
            }
            out.push('}');
        }
    }
}

fn push_number(out: &mut String, n: &Number) {
    match n.as_f64() {
        Some(f) if n.is_f64() => push_float(out, f),
        _ => {
            let _ = write!(out, "{n}");
        }
    }
}

fn push_float(out: &mut String, value: f64) {
    // Shortest round-trip digits as `d.ddde±N`.
    let sci = format!("{value:e}");
    let (mantissa, exponent) = sci.split_once('e').unwrap_or((sci.as_str(), "0"));
    let exponent: i32 = exponent.parse().unwrap_or(0);
    let (negative, mantissa) = mantissa
        .strip_prefix('-')
        .map_or((false, mantissa), |rest| (true, rest));
    let digits: String = mantissa.chars().filter(char::is_ascii_digit).collect();

    if negative {
        out.push('-');
    }
    if (-4..16).contains(&exponent) {
        push_fixed(out, &digits, exponent);
    } else {
        let (lead, rest) = digits.split_at(digits.len().min(1));
        out.push_str(lead);
        if !rest.is_empty() {
            out.push('.');
            out.push_str(rest);
        }
        out.push('e');
        out.push(if exponent < 0 { '-' } else { '+' });
        let _ = write!(out, "{:02}", exponent.unsigned_abs());
    }
}

fn push_fixed(out: &mut String, digits: &str, exponent: i32) {
    let magnitude = usize::try_from(exponent.unsigned_abs()).unwrap_or(0);
    if exponent >= 0 {
        let int_len = magnitude.saturating_add(1);
        if digits.len() <= int_len {
            out.push_str(digits);
            out.extend(std::iter::repeat_n('0', int_len.saturating_sub(digits.len())));
            out.push_str(".0");
        } else {
            let (int, frac) = digits.split_at(int_len);
            out.push_str(int);
            out.push('.');
            out.push_str(frac);
        }
    } else {
        out.push_str("0.");
        out.extend(std::iter::repeat_n('0', magnitude.saturating_sub(1)));
        out.push_str(digits);
    }
}

fn push_string(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{8}' => out.push_str("\\b"),
            '\u{c}' => out.push_str("\\f"),
            ' '..='~' => out.push(c),
            _ => {
                let mut units = [0_u16; 2];
                for unit in c.encode_utf16(&mut units) {
                    let _ = write!(out, "\\u{unit:04x}");
                }
            }
        }
    }
    out.push('"');
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn separators_and_key_order() {
        let config = json!({"radius": 200, "nanobots": 10});
        assert_eq!(canonical_json(&config), r#"{"nanobots": 10, "radius": 200}"#);
        assert_eq!(canonical_json(&json!({})), "{}");
        assert_eq!(canonical_json(&json!([])), "[]");
    }

    #[test]
    fn floats_follow_shortest_repr() {
        let cases = [
            (100.0, "100.0"),
            (2.5, "2.5"),
            (0.0001, "0.0001"),
            (1e-5, "1e-05"),
            (1e16, "1e+16"),
            (1.5e17, "1.5e+17"),
            (-0.25, "-0.25"),
            (0.0, "0.0"),
            (123_456.789, "123456.789"),
        ];
        for (value, expected) in cases {
            assert_eq!(canonical_json(&json!(value)), expected, "{value}");
        }
    }

    #[test]
    fn non_ascii_is_escaped() {
        let text = json!("Zürich ☃ 😀\u{7f}");
        assert_eq!(
            canonical_json(&text),
            r#""Z\u00fcrich \u2603 \ud83d\ude00\u007f""#
        );
        assert_eq!(canonical_json(&json!("q\"\n\\")), r#""q\"\n\\""#);
    }

    #[test]
    fn nested_structures() {
        let config = json!({
            "name": "Zürich ☃",
            "nested": {"b": [1, 2.5, null, true], "a": "q\"\n"},
            "tiny": 1e-5,
            "big": 1e16,
            "x": 100.0,
            "emoji": "😀",
        });
        assert_eq!(
            canonical_json(&config),
            r#"{"big": 1e+16, "emoji": "\ud83d\ude00", "name": "Z\u00fcrich \u2603", "nested": {"a": "q\"\n", "b": [1, 2.5, null, true]}, "tiny": 1e-05, "x": 100.0}"#
        );
    }
}
