//! Request-body normalization: the sole determinant of cache-key equality.
//!
//! Rules: parse the body as JSON; drop non-deterministic top-level fields
//! (streaming flags, end-user identifiers, randomized salts); compare
//! numbers by value after rounding to 2 decimal places; emit object keys in
//! sorted order, arrays element-wise. Bodies that are not valid JSON
//! normalize to their raw bytes.

use std::io::Write;

use serde_json::Value;

/// Top-level fields with no bearing on the upstream answer: the OpenAI-style
/// streaming flags, end-user identifiers, sampling seeds, and the Anthropic
/// metadata block (which carries `user_id`).
const DROPPED_KEYS: &[&str] = &["stream", "stream_options", "user", "seed", "metadata"];

/// Produce the canonical byte string for hashing.
pub fn canonical_body(raw: &[u8]) -> Vec<u8> {
    match serde_json::from_slice::<Value>(raw) {
        Ok(value) => {
            let mut out = Vec::with_capacity(raw.len());
            write_value(&value, true, &mut out);
            out
        }
        Err(_) => raw.to_vec(),
    }
}

fn write_value(value: &Value, top_level: bool, out: &mut Vec<u8>) {
    match value {
        Value::Null => out.extend_from_slice(b"null"),
        Value::Bool(true) => out.extend_from_slice(b"true"),
        Value::Bool(false) => out.extend_from_slice(b"false"),
        Value::Number(n) => write_number(n, out),
        Value::String(s) => write_string(s, out),
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_value(item, false, out);
            }
            out.push(b']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            out.push(b'{');
            let mut first = true;
            for key in keys {
                if top_level && DROPPED_KEYS.contains(&key.as_str()) {
                    continue;
                }
                if !first {
                    out.push(b',');
                }
                first = false;
                write_string(key, out);
                out.push(b':');
                write_value(&map[key], false, out);
            }
            out.push(b'}');
        }
    }
}

/// Numbers compare by value after rounding to 2 decimal places, so
/// `0`, `0.0`, and `0.00` all emit `0`, and `0.256` emits `0.26`.
fn write_number(n: &serde_json::Number, out: &mut Vec<u8>) {
    let Some(f) = n.as_f64() else {
        let _ = write!(out, "{n}");
        return;
    };
    let rounded = (f * 100.0).round() / 100.0;
    if rounded == 0.0 {
        out.push(b'0');
    } else if rounded.fract() == 0.0 && rounded.abs() < 9e15 {
        let _ = write!(out, "{}", rounded as i64);
    } else {
        let _ = write!(out, "{rounded}");
    }
}

fn write_string(s: &str, out: &mut Vec<u8>) {
    let _ = serde_json::to_writer(&mut *out, s);
}
