//! Input sanitization for settings payloads.
//!
//! Strips `<script>` blocks and inline event handler attributes from every
//! string in a JSON document before it is validated or persisted.

use regex::Regex;
use serde_json::Value;
use std::borrow::Cow;
use std::sync::LazyLock;

static SCRIPT_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<script\b[^>]*>.*?</script\s*>").expect("script pattern is valid")
});

static EVENT_HANDLER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bon\w+\s*=").expect("handler pattern is valid"));

/// Remove script blocks and `on*=` attributes from a single string.
pub fn sanitize_str(input: &str) -> Cow<'_, str> {
    let without_scripts = SCRIPT_BLOCK.replace_all(input, "");
    if !EVENT_HANDLER.is_match(&without_scripts) {
        return without_scripts;
    }
    Cow::Owned(EVENT_HANDLER.replace_all(&without_scripts, "").into_owned())
}

/// Sanitize every string value (not keys) in place.
pub fn sanitize_json(value: &mut Value) {
    match value {
        Value::String(s) => {
            if let Cow::Owned(cleaned) = sanitize_str(s) {
                *s = cleaned;
            }
        }
        Value::Array(items) => items.iter_mut().for_each(sanitize_json),
        Value::Object(map) => map.values_mut().for_each(sanitize_json),
        _ => {}
    }
}
