//! Escaping contracts and render-context construction.
//!
//! This module owns the auto-escaping primitives (HTML escaping, the
//! mark-safe / escape-if-needed pair), the script-safe JSON serializer used to
//! embed data inside `<script>` elements, and the per-render merge that builds
//! the template input context. A render context is ephemeral: it exists only
//! for the duration of one render call.

use minijinja::Value;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value as Json};

use plinth_core::modules::ModuleConfig;
use plinth_core::request::RenderRequest;

/// HTML-escapes a string for safe inclusion in markup.
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

/// Marks a string as safe: it will not be escaped again on output.
pub fn mark_safe(s: impl Into<String>) -> Value {
    Value::from_safe_string(s.into())
}

/// Escapes a value unless it is already marked safe.
///
/// Safe values pass through untouched, which makes this idempotent: escaping
/// a safe-marked string twice yields the same string. Any other value is
/// converted to a string (null/undefined become empty) and HTML-escaped.
pub fn escape_if_needed(value: &Value) -> Value {
    if value.is_safe() {
        return value.clone();
    }
    let text = if value.is_undefined() || value.is_none() {
        String::new()
    } else {
        value.to_string()
    };
    Value::from_safe_string(escape_html(&text))
}

static SCRIPT_CLOSE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)</script\b[^>]*>").expect("static regex"));

/// Serializes a value to JSON text safe for embedding inside an HTML
/// `<script>` element.
///
/// `None` (an absent value) serializes to the literal text `null`. Closing
/// script tags, HTML comment openers, and the two Unicode separators that are
/// illegal inside script bodies are escaped.
pub fn json_for_html(value: Option<&Json>) -> String {
    let Some(value) = value else {
        return "null".to_string();
    };
    let s = serde_json::to_string(value).unwrap_or_else(|_| "null".to_string());
    let s = SCRIPT_CLOSE.replace_all(&s, "<\\/script>");
    s.replace("<!--", "<\\!--")
        .replace('\u{2028}', "\\u2028")
        .replace('\u{2029}', "\\u2029")
}

/// Quote style for [`json_attribute`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuoteStyle {
    /// Escape for a single-quoted attribute (keeps JSON compact).
    Single,
    /// Escape for a double-quoted attribute.
    Double,
}

/// Serializes a value for safe embedding inside a quoted HTML attribute.
///
/// Objects and arrays serialize to JSON first; any other value is coerced to
/// its display string and escaped directly.
pub fn json_attribute(value: &Json, quotes: QuoteStyle) -> String {
    let text = match value {
        Json::Object(_) | Json::Array(_) => {
            serde_json::to_string(value).unwrap_or_else(|_| "null".to_string())
        }
        Json::String(s) => s.clone(),
        Json::Null => String::new(),
        other => other.to_string(),
    };
    match quotes {
        QuoteStyle::Single => text
            .replace('&', "&amp;")
            .replace('<', "&lt;")
            .replace('\'', "&#39;"),
        QuoteStyle::Double => text
            .replace('&', "&amp;")
            .replace('<', "&lt;")
            .replace('"', "&quot;"),
    }
}

/// Shallow-merges `overlay` object fields into `base`, later wins.
///
/// Non-object overlays are ignored: the render context is always an object.
pub fn merge_into(base: &mut Map<String, Json>, overlay: &Json) {
    if let Json::Object(map) = overlay {
        for (key, value) in map {
            base.insert(key.clone(), value.clone());
        }
    }
}

/// Builds the template input context for one render call.
///
/// Merged in increasing priority: the module's static template data, the
/// request-attached data, the explicit `data` argument, and a fixed set of
/// request-derived defaults (`user`, `permissions`, `locale`).
pub fn build_render_context(
    req: &RenderRequest,
    data: &Json,
    module: &dyn ModuleConfig,
) -> Map<String, Json> {
    let mut merged = Map::new();
    merge_into(&mut merged, &module.template_data());
    merge_into(&mut merged, &Json::Object(req.data().clone()));
    merge_into(&mut merged, data);

    merged.insert(
        "user".to_string(),
        req.user()
            .map_or(Json::Null, |u| serde_json::json!({ "username": u.username })),
    );
    merged.insert(
        "permissions".to_string(),
        req.user()
            .map_or_else(|| Json::Array(vec![]), |u| serde_json::json!(u.permissions)),
    );
    merged.insert("locale".to_string(), Json::String(req.locale().to_string()));
    merged
}
