//! Built-in template filters.
//!
//! The default filter surface every environment ships with. Filter names are
//! fixed for template compatibility; configuration-supplied filters may
//! override any of them by name.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate};
use minijinja::Value;
use once_cell::sync::Lazy;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use regex::Regex;
use serde_json::{Map, Value as Json};
use url::form_urlencoded;

use plinth_core::error::{PlinthError, PlinthResult};

use crate::context::{escape_html, json_attribute, json_for_html, QuoteStyle};
use crate::library::{FilterRegistry, TemplateFilter};

/// Registers all built-in filters.
pub fn register_defaults(registry: &mut FilterRegistry) {
    registry.register_many(vec![
        Arc::new(DateFilter) as Arc<dyn TemplateFilter>,
        Arc::new(QueryFilter),
        Arc::new(JsonFilter),
        Arc::new(BuildFilter),
        Arc::new(StriptagsFilter),
        Arc::new(NlbrFilter),
        Arc::new(NlpFilter),
        Arc::new(CssFilter),
        Arc::new(ClonePermanentFilter),
        Arc::new(JsonAttributeFilter),
        Arc::new(MergeFilter),
    ]);
}

fn to_json(value: &Value) -> Option<Json> {
    if value.is_undefined() {
        None
    } else {
        serde_json::to_value(value).ok()
    }
}

fn stringify(value: &Value) -> String {
    if value.is_undefined() || value.is_none() {
        String::new()
    } else {
        value.to_string()
    }
}

// Chrono's delayed formatter reports failure through Display, which panics
// under ToString. Writing into a buffer turns a malformed format string, or a
// time token applied to a plain date, into an empty result instead.
fn checked_format(formatted: impl std::fmt::Display) -> String {
    use std::fmt::Write;

    let mut out = String::new();
    if write!(out, "{formatted}").is_err() {
        return String::new();
    }
    out
}

/// `date`: formats a date value with a strftime format string.
///
/// Accepts RFC 3339 strings, plain `YYYY-MM-DD` dates, and epoch
/// milliseconds. Null input, unparseable input, and bad format strings all
/// yield an empty string, never an error.
pub struct DateFilter;

impl TemplateFilter for DateFilter {
    fn name(&self) -> &str {
        "date"
    }

    fn apply(&self, value: &Value, args: &[Value]) -> PlinthResult<Value> {
        if value.is_undefined() || value.is_none() {
            return Ok(Value::from(""));
        }
        let format = args
            .first()
            .and_then(|v| v.as_str().map(ToString::to_string))
            .unwrap_or_else(|| "%Y-%m-%d".to_string());

        if let Some(text) = value.as_str() {
            if text.is_empty() {
                return Ok(Value::from(""));
            }
            if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
                return Ok(Value::from(checked_format(dt.format(&format))));
            }
            if let Ok(d) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
                return Ok(Value::from(checked_format(d.format(&format))));
            }
            return Ok(Value::from(""));
        }
        if let Some(millis) = to_json(value).and_then(|j| j.as_i64()) {
            if let Some(dt) = DateTime::from_timestamp_millis(millis) {
                return Ok(Value::from(checked_format(dt.format(&format))));
            }
        }
        Ok(Value::from(""))
    }
}

fn encode_component(s: &str) -> String {
    utf8_percent_encode(s, NON_ALPHANUMERIC).to_string()
}

fn query_pairs(prefix: &str, value: &Json, out: &mut Vec<String>) {
    match value {
        Json::Null => {}
        Json::Array(items) => {
            for item in items {
                query_pairs(prefix, item, out);
            }
        }
        Json::Object(map) => {
            for (key, item) in map {
                let nested = if prefix.is_empty() {
                    encode_component(key)
                } else {
                    format!("{prefix}%5B{}%5D", encode_component(key))
                };
                query_pairs(&nested, item, out);
            }
        }
        Json::String(s) => out.push(format!("{prefix}={}", encode_component(s))),
        other => out.push(format!("{prefix}={}", encode_component(&other.to_string()))),
    }
}

/// `query`: serializes an object to a URL query string.
pub struct QueryFilter;

impl TemplateFilter for QueryFilter {
    fn name(&self) -> &str {
        "query"
    }

    fn apply(&self, value: &Value, _args: &[Value]) -> PlinthResult<Value> {
        let json = to_json(value).unwrap_or(Json::Null);
        let mut pairs = Vec::new();
        query_pairs("", &json, &mut pairs);
        Ok(Value::from(pairs.join("&")))
    }
}

/// `json`: serializes a value to script-safe JSON and marks it safe.
pub struct JsonFilter;

impl TemplateFilter for JsonFilter {
    fn name(&self) -> &str {
        "json"
    }

    fn apply(&self, value: &Value, _args: &[Value]) -> PlinthResult<Value> {
        let json = to_json(value);
        Ok(Value::from_safe_string(json_for_html(json.as_ref())))
    }
}

/// `build`: merges query parameters into a URL.
///
/// A parameter with a null value removes any existing occurrence; other
/// values replace existing ones.
pub struct BuildFilter;

impl TemplateFilter for BuildFilter {
    fn name(&self) -> &str {
        "build"
    }

    fn apply(&self, value: &Value, args: &[Value]) -> PlinthResult<Value> {
        let url = stringify(value);
        let (base, existing) = match url.split_once('?') {
            Some((base, query)) => (base.to_string(), query.to_string()),
            None => (url, String::new()),
        };

        let mut pairs: Vec<(String, String)> = form_urlencoded::parse(existing.as_bytes())
            .into_owned()
            .collect();

        for arg in args {
            let Some(Json::Object(params)) = to_json(arg) else {
                return Err(PlinthError::BadRequest(
                    "build filter arguments must be objects".to_string(),
                ));
            };
            for (key, param) in &params {
                pairs.retain(|(k, _)| k != key);
                match param {
                    Json::Null => {}
                    Json::String(s) => pairs.push((key.clone(), s.clone())),
                    other => pairs.push((key.clone(), other.to_string())),
                }
            }
        }

        if pairs.is_empty() {
            return Ok(Value::from(base));
        }
        let query = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(pairs)
            .finish();
        Ok(Value::from(format!("{base}?{query}")))
    }
}

static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("static regex"));

/// `striptags`: strips `<...>` sequences from a string.
pub struct StriptagsFilter;

impl TemplateFilter for StriptagsFilter {
    fn name(&self) -> &str {
        "striptags"
    }

    fn apply(&self, value: &Value, _args: &[Value]) -> PlinthResult<Value> {
        let text = stringify(value);
        Ok(Value::from(TAG.replace_all(&text, "").into_owned()))
    }
}

fn escaped_text(value: &Value) -> String {
    if value.is_safe() {
        value.to_string()
    } else {
        escape_html(&stringify(value))
    }
}

/// `nlbr`: escapes, then converts newlines to `<br />` tags. Marked safe.
pub struct NlbrFilter;

impl TemplateFilter for NlbrFilter {
    fn name(&self) -> &str {
        "nlbr"
    }

    fn apply(&self, value: &Value, _args: &[Value]) -> PlinthResult<Value> {
        let text = escaped_text(value);
        Ok(Value::from_safe_string(text.replace('\n', "<br />")))
    }
}

/// `nlp`: escapes, then wraps each newline-delimited segment in a paragraph
/// tag. Marked safe.
pub struct NlpFilter;

impl TemplateFilter for NlpFilter {
    fn name(&self) -> &str {
        "nlp"
    }

    fn apply(&self, value: &Value, _args: &[Value]) -> PlinthResult<Value> {
        let text = escaped_text(value);
        let paragraphs: Vec<String> = text
            .split('\n')
            .filter(|segment| !segment.is_empty())
            .map(|segment| format!("<p>{segment}</p>"))
            .collect();
        Ok(Value::from_safe_string(paragraphs.join("\n")))
    }
}

/// `css`: converts a camel-case identifier to a hyphenated, CSS-class-safe
/// identifier.
pub struct CssFilter;

impl TemplateFilter for CssFilter {
    fn name(&self) -> &str {
        "css"
    }

    fn apply(&self, value: &Value, _args: &[Value]) -> PlinthResult<Value> {
        let text = stringify(value);
        let mut out = String::with_capacity(text.len());
        for c in text.chars() {
            if c.is_ascii_uppercase() {
                out.push('-');
                out.push(c.to_ascii_lowercase());
            } else if c == ' ' || c == '_' {
                out.push('-');
            } else {
                out.push(c);
            }
        }
        Ok(Value::from(out))
    }
}

fn clone_permanent(value: &Json) -> Json {
    match value {
        Json::Object(map) => {
            let mut out = Map::new();
            for (key, item) in map {
                // Temporary fields are prefixed with underscore; _id is the
                // one permanent exception.
                if key.starts_with('_') && key != "_id" {
                    continue;
                }
                out.insert(key.clone(), clone_permanent(item));
            }
            Json::Object(out)
        }
        Json::Array(items) => Json::Array(items.iter().map(clone_permanent).collect()),
        other => other.clone(),
    }
}

/// `clonePermanent`: deep-clones a value, dropping temporary
/// (underscore-prefixed) fields other than `_id`.
pub struct ClonePermanentFilter;

impl TemplateFilter for ClonePermanentFilter {
    fn name(&self) -> &str {
        "clonePermanent"
    }

    fn apply(&self, value: &Value, _args: &[Value]) -> PlinthResult<Value> {
        let json = to_json(value).unwrap_or(Json::Null);
        Ok(Value::from_serialize(clone_permanent(&json)))
    }
}

/// `jsonAttribute`: serializes a value for safe embedding inside a quoted
/// HTML attribute. The optional options object may set `single: true` to use
/// single-quote escaping.
pub struct JsonAttributeFilter;

impl TemplateFilter for JsonAttributeFilter {
    fn name(&self) -> &str {
        "jsonAttribute"
    }

    fn apply(&self, value: &Value, args: &[Value]) -> PlinthResult<Value> {
        let json = to_json(value).unwrap_or(Json::Null);
        let single = args
            .first()
            .and_then(to_json)
            .and_then(|opts| opts.get("single").and_then(Json::as_bool))
            .unwrap_or(false);
        let quotes = if single {
            QuoteStyle::Single
        } else {
            QuoteStyle::Double
        };
        Ok(Value::from_safe_string(json_attribute(&json, quotes)))
    }
}

/// `merge`: shallow-merges any number of mapping arguments left-to-right,
/// later wins.
pub struct MergeFilter;

impl TemplateFilter for MergeFilter {
    fn name(&self) -> &str {
        "merge"
    }

    fn apply(&self, value: &Value, args: &[Value]) -> PlinthResult<Value> {
        let mut merged = Map::new();
        if let Some(Json::Object(map)) = to_json(value) {
            merged.extend(map);
        }
        for arg in args {
            if let Some(Json::Object(map)) = to_json(arg) {
                merged.extend(map);
            }
        }
        Ok(Value::from_serialize(Json::Object(merged)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn apply(filter: &dyn TemplateFilter, value: Json, args: &[Json]) -> Value {
        let value = Value::from_serialize(&value);
        let args: Vec<Value> = args.iter().map(Value::from_serialize).collect();
        filter.apply(&value, &args).unwrap()
    }

    #[test]
    fn test_date_filter_rfc3339() {
        let out = apply(
            &DateFilter,
            json!("2026-03-14T12:30:00Z"),
            &[json!("%Y-%m-%d")],
        );
        assert_eq!(out.to_string(), "2026-03-14");
    }

    #[test]
    fn test_date_filter_plain_date() {
        let out = apply(&DateFilter, json!("2026-03-14"), &[json!("%d/%m/%Y")]);
        assert_eq!(out.to_string(), "14/03/2026");
    }

    #[test]
    fn test_date_filter_epoch_millis() {
        let out = apply(&DateFilter, json!(0), &[json!("%Y")]);
        assert_eq!(out.to_string(), "1970");
    }

    #[test]
    fn test_date_filter_null_yields_empty() {
        let out = DateFilter.apply(&Value::from(()), &[]).unwrap();
        assert_eq!(out.to_string(), "");
        let out = DateFilter.apply(&Value::UNDEFINED, &[]).unwrap();
        assert_eq!(out.to_string(), "");
    }

    #[test]
    fn test_date_filter_garbage_yields_empty() {
        let out = apply(&DateFilter, json!("not a date"), &[]);
        assert_eq!(out.to_string(), "");
    }

    #[test]
    fn test_date_filter_invalid_format_yields_empty() {
        let out = apply(&DateFilter, json!("2026-03-14"), &[json!("%Q")]);
        assert_eq!(out.to_string(), "");
        let out = apply(&DateFilter, json!("2026-03-14"), &[json!("trailing %")]);
        assert_eq!(out.to_string(), "");
    }

    #[test]
    fn test_date_filter_time_token_on_plain_date_yields_empty() {
        let out = apply(&DateFilter, json!("2026-03-14"), &[json!("%H:%M")]);
        assert_eq!(out.to_string(), "");
    }

    #[test]
    fn test_query_filter_flat_object() {
        let out = apply(&QueryFilter, json!({ "a": 1, "b": "two" }), &[]);
        assert_eq!(out.to_string(), "a=1&b=two");
    }

    #[test]
    fn test_query_filter_array_repeats_key() {
        let out = apply(&QueryFilter, json!({ "tag": ["x", "y"] }), &[]);
        assert_eq!(out.to_string(), "tag=x&tag=y");
    }

    #[test]
    fn test_query_filter_encodes_components() {
        let out = apply(&QueryFilter, json!({ "q": "a b&c" }), &[]);
        assert_eq!(out.to_string(), "q=a%20b%26c");
    }

    #[test]
    fn test_json_filter_is_safe_and_script_safe() {
        let out = apply(&JsonFilter, json!({ "html": "</script>" }), &[]);
        assert!(out.is_safe());
        assert!(!out.to_string().contains("</script>"));
    }

    #[test]
    fn test_json_filter_undefined_is_null() {
        let out = JsonFilter.apply(&Value::UNDEFINED, &[]).unwrap();
        assert_eq!(out.to_string(), "null");
    }

    #[test]
    fn test_build_filter_adds_parameter() {
        let out = apply(&BuildFilter, json!("/page"), &[json!({ "page": 2 })]);
        assert_eq!(out.to_string(), "/page?page=2");
    }

    #[test]
    fn test_build_filter_replaces_parameter() {
        let out = apply(&BuildFilter, json!("/page?page=1&q=x"), &[json!({ "page": 3 })]);
        assert_eq!(out.to_string(), "/page?q=x&page=3");
    }

    #[test]
    fn test_build_filter_null_removes_parameter() {
        let out = apply(
            &BuildFilter,
            json!("/page?page=1&q=x"),
            &[json!({ "page": null })],
        );
        assert_eq!(out.to_string(), "/page?q=x");
    }

    #[test]
    fn test_build_filter_rejects_scalar_args() {
        let result = BuildFilter.apply(&Value::from("/page"), &[Value::from(1)]);
        assert!(result.is_err());
    }

    #[test]
    fn test_striptags() {
        let out = apply(&StriptagsFilter, json!("<p>Hello <b>world</b></p>"), &[]);
        assert_eq!(out.to_string(), "Hello world");
    }

    #[test]
    fn test_nlbr_escapes_then_breaks() {
        let out = apply(&NlbrFilter, json!("a<b\nc"), &[]);
        assert!(out.is_safe());
        assert_eq!(out.to_string(), "a&lt;b<br />c");
    }

    #[test]
    fn test_nlp_wraps_paragraphs() {
        let out = apply(&NlpFilter, json!("one\ntwo"), &[]);
        assert!(out.is_safe());
        assert_eq!(out.to_string(), "<p>one</p>\n<p>two</p>");
    }

    #[test]
    fn test_css_filter_hyphenates() {
        let out = apply(&CssFilter, json!("myWidgetName"), &[]);
        assert_eq!(out.to_string(), "my-widget-name");
    }

    #[test]
    fn test_clone_permanent_drops_temporary_fields() {
        let out = apply(
            &ClonePermanentFilter,
            json!({
                "_id": "abc",
                "_edit": true,
                "title": "Home",
                "nested": { "_url": "/x", "body": "text" }
            }),
            &[],
        );
        let json: Json = serde_json::to_value(&out).unwrap();
        assert_eq!(
            json,
            json!({ "_id": "abc", "title": "Home", "nested": { "body": "text" } })
        );
    }

    #[test]
    fn test_json_attribute_filter_defaults_to_double() {
        let out = apply(&JsonAttributeFilter, json!({ "a": 1 }), &[]);
        assert!(out.is_safe());
        assert_eq!(out.to_string(), "{&quot;a&quot;:1}");
    }

    #[test]
    fn test_json_attribute_filter_single_mode() {
        let out = apply(
            &JsonAttributeFilter,
            json!({ "a": "it's" }),
            &[json!({ "single": true })],
        );
        assert_eq!(out.to_string(), r#"{"a":"it&#39;s"}"#);
    }

    #[test]
    fn test_merge_later_wins() {
        let out = apply(
            &MergeFilter,
            json!({ "a": 1, "b": 1 }),
            &[json!({ "b": 2 }), json!({ "c": 3 })],
        );
        let json: Json = serde_json::to_value(&out).unwrap();
        assert_eq!(json, json!({ "a": 1, "b": 2, "c": 3 }));
    }

    #[test]
    fn test_register_defaults_installs_all() {
        let mut registry = FilterRegistry::new();
        register_defaults(&mut registry);
        for name in [
            "date",
            "query",
            "json",
            "build",
            "striptags",
            "nlbr",
            "nlp",
            "css",
            "clonePermanent",
            "jsonAttribute",
            "merge",
        ] {
            assert!(registry.get(name).is_some(), "missing filter {name}");
        }
    }
}
