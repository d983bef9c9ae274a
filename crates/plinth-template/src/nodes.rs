//! Virtual-node rendering and runtime node injection.
//!
//! A virtual node is a small declarative description of an HTML fragment:
//! text, comment, raw markup, or a named element with attributes and a body.
//! Modules produce node trees programmatically (as JSON-like values) and the
//! renderer in this module converts them to HTML strings. A malformed node is
//! logged and contributes empty output; it never aborts its siblings.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use plinth_core::error::{PlinthError, PlinthResult};
use plinth_core::modules::ModuleRegistry;
use plinth_core::request::RenderRequest;

use crate::context::escape_html;
use crate::insertions::End;

/// Elements that never carry a body and self-close.
static VOID_ELEMENTS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param",
        "source", "track", "wbr",
    ]
});

/// A declarative description of an HTML fragment.
///
/// Exactly one of the four shapes is valid per node. Serializes to the
/// JSON-like form node-producing module methods return.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Node {
    /// An HTML comment; the text is escaped.
    Comment {
        /// The comment text.
        comment: String,
    },
    /// Verbatim markup emitted without escaping. The producer is responsible
    /// for its safety.
    Raw {
        /// The raw markup.
        raw: String,
    },
    /// A text node; escaped on output.
    Text {
        /// The text content.
        text: String,
    },
    /// A named element with attributes and an ordered body.
    Element {
        /// The tag name.
        name: String,
        /// Attribute map: `true` renders a bare attribute, `false`/null omit
        /// it entirely, anything else renders `name="escaped-value"`.
        #[serde(default, skip_serializing_if = "Map::is_empty")]
        attrs: Map<String, Value>,
        /// Ordered child nodes.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        body: Vec<Node>,
    },
}

impl Node {
    /// Creates a text node.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Creates a comment node.
    pub fn comment(comment: impl Into<String>) -> Self {
        Self::Comment {
            comment: comment.into(),
        }
    }

    /// Creates a raw-markup node.
    pub fn raw(raw: impl Into<String>) -> Self {
        Self::Raw { raw: raw.into() }
    }

    /// Creates an element node.
    pub fn element(name: impl Into<String>, attrs: Map<String, Value>, body: Vec<Self>) -> Self {
        Self::Element {
            name: name.into(),
            attrs,
            body,
        }
    }

    /// Converts this node to its JSON-like value form.
    pub fn into_value(self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

fn render_attrs(attrs: &Map<String, Value>, out: &mut String) {
    for (name, value) in attrs {
        match value {
            Value::Bool(true) => {
                out.push(' ');
                out.push_str(&escape_html(name));
            }
            Value::Bool(false) | Value::Null => {}
            Value::String(s) => {
                out.push_str(&format!(" {}=\"{}\"", escape_html(name), escape_html(s)));
            }
            other => {
                let text = match other {
                    Value::Array(_) | Value::Object(_) => {
                        serde_json::to_string(other).unwrap_or_default()
                    }
                    _ => other.to_string(),
                };
                out.push_str(&format!(" {}=\"{}\"", escape_html(name), escape_html(&text)));
            }
        }
    }
}

fn render_node(node: &Node, out: &mut String) {
    match node {
        Node::Text { text } => out.push_str(&escape_html(text)),
        Node::Comment { comment } => {
            out.push_str("<!-- ");
            out.push_str(&escape_html(comment));
            out.push_str(" -->");
        }
        Node::Raw { raw } => out.push_str(raw),
        Node::Element { name, attrs, body } => {
            let tag = escape_html(name);
            out.push('<');
            out.push_str(&tag);
            render_attrs(attrs, out);
            if body.is_empty() && VOID_ELEMENTS.contains(&name.as_str()) {
                out.push_str(" />");
                return;
            }
            out.push('>');
            for child in body {
                render_node(child, out);
            }
            out.push_str(&format!("</{tag}>"));
        }
    }
}

/// Renders an ordered sequence of nodes to an HTML string.
pub fn render_nodes(nodes: &[Node]) -> String {
    let mut out = String::new();
    for node in nodes {
        render_node(node, &mut out);
    }
    out
}

/// Renders an ordered sequence of JSON-like node values to an HTML string.
///
/// A value that matches none of the four node shapes is logged and rendered
/// as empty output; its siblings still render.
pub fn render_values(nodes: &[Value]) -> String {
    let mut out = String::new();
    for value in nodes {
        match serde_json::from_value::<Node>(value.clone()) {
            Ok(node) => render_node(&node, &mut out),
            Err(e) => {
                tracing::error!(node = %value, error = %e, "malformed virtual node skipped");
            }
        }
    }
    out
}

/// A runtime node registration: a named method on a module, invoked at render
/// time to produce a node tree for a page slot.
#[derive(Debug, Clone)]
struct NodeInsertion {
    module: String,
    method: String,
}

/// Registry of runtime node registrations, keyed by `<end>-<location>`.
///
/// Registrations are validated eagerly: referencing an unknown module or a
/// method the module does not expose is a configuration error raised at
/// registration time.
pub struct NodeRegistry {
    modules: Arc<ModuleRegistry>,
    entries: RwLock<HashMap<String, Vec<NodeInsertion>>>,
}

impl NodeRegistry {
    /// Creates an empty registry bound to the module registry it validates
    /// against.
    pub fn new(modules: Arc<ModuleRegistry>) -> Self {
        Self {
            modules,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a node-producing method for a page slot.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError` if the module is unknown or does not
    /// expose the named method.
    pub fn register(
        &self,
        end: End,
        location: &str,
        module: &str,
        method: &str,
    ) -> PlinthResult<()> {
        let Some(config) = self.modules.get(module) else {
            return Err(PlinthError::ConfigurationError(format!(
                "Cannot register nodes for unknown module '{module}'"
            )));
        };
        if !config.has_node_method(method) {
            return Err(PlinthError::ConfigurationError(format!(
                "Module '{module}' does not expose node method '{method}'"
            )));
        }
        self.entries
            .write()
            .unwrap()
            .entry(end.key(location))
            .or_default()
            .push(NodeInsertion {
                module: module.to_string(),
                method: method.to_string(),
            });
        Ok(())
    }

    /// Invokes every registered method for the given location key in
    /// registration order, renders each result, and joins the outputs with a
    /// newline.
    pub fn inject(&self, req: &RenderRequest, key: &str) -> PlinthResult<String> {
        let entries = match self.entries.read().unwrap().get(key) {
            Some(entries) => entries.clone(),
            None => return Ok(String::new()),
        };
        let mut rendered = Vec::with_capacity(entries.len());
        for entry in &entries {
            let module = self.modules.get(&entry.module).ok_or_else(|| {
                PlinthError::ConfigurationError(format!(
                    "Module '{}' disappeared after registration",
                    entry.module
                ))
            })?;
            let nodes = module.call_node_method(&entry.method, req)?;
            rendered.push(render_values(&nodes));
        }
        Ok(rendered.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::PathBuf;

    fn attrs(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_render_element_with_attrs_and_escaped_text() {
        let node = Node::element(
            "div",
            attrs(&[
                ("class", json!("x")),
                ("hidden", json!(true)),
                ("title", json!(false)),
            ]),
            vec![Node::text("<b>")],
        );
        assert_eq!(
            render_nodes(&[node]),
            r#"<div class="x" hidden>&lt;b&gt;</div>"#
        );
    }

    #[test]
    fn test_render_void_element_self_closes() {
        let node = Node::element("link", attrs(&[("href", json!("/a"))]), vec![]);
        assert_eq!(render_nodes(&[node]), r#"<link href="/a" />"#);
    }

    #[test]
    fn test_render_empty_non_void_element() {
        let node = Node::element("div", Map::new(), vec![]);
        assert_eq!(render_nodes(&[node]), "<div></div>");
    }

    #[test]
    fn test_render_null_attr_omitted() {
        let node = Node::element("span", attrs(&[("title", Value::Null)]), vec![]);
        assert_eq!(render_nodes(&[node]), "<span></span>");
    }

    #[test]
    fn test_render_comment_escapes() {
        let node = Node::comment("be <careful>");
        assert_eq!(render_nodes(&[node]), "<!-- be &lt;careful&gt; -->");
    }

    #[test]
    fn test_render_raw_verbatim() {
        let node = Node::raw("<script>init()</script>");
        assert_eq!(render_nodes(&[node]), "<script>init()</script>");
    }

    #[test]
    fn test_render_nested_body() {
        let node = Node::element(
            "ul",
            Map::new(),
            vec![
                Node::element("li", Map::new(), vec![Node::text("a")]),
                Node::element("li", Map::new(), vec![Node::text("b")]),
            ],
        );
        assert_eq!(render_nodes(&[node]), "<ul><li>a</li><li>b</li></ul>");
    }

    #[test]
    fn test_render_values_skips_malformed() {
        let values = vec![
            json!({ "bogus": true }),
            json!({ "text": "kept" }),
            json!(42),
        ];
        assert_eq!(render_values(&values), "kept");
    }

    #[test]
    fn test_render_values_matches_typed_renderer() {
        let typed = Node::element("p", Map::new(), vec![Node::text("hi")]);
        let value = typed.clone().into_value();
        assert_eq!(render_values(&[value]), render_nodes(&[typed]));
    }

    struct MetaModule;

    impl plinth_core::modules::ModuleConfig for MetaModule {
        fn name(&self) -> &str {
            "meta"
        }

        fn chain(&self) -> Vec<PathBuf> {
            vec![PathBuf::from("/srv/meta")]
        }

        fn has_node_method(&self, method: &str) -> bool {
            method == "metaNodes"
        }

        fn call_node_method(
            &self,
            method: &str,
            _req: &RenderRequest,
        ) -> PlinthResult<Vec<Value>> {
            if method == "metaNodes" {
                Ok(vec![json!({
                    "name": "meta",
                    "attrs": { "name": "generator", "content": "plinth" }
                })])
            } else {
                Err(PlinthError::ConfigurationError("no such method".into()))
            }
        }
    }

    fn registry_with_meta() -> NodeRegistry {
        let mut modules = ModuleRegistry::new();
        modules.register(Arc::new(MetaModule));
        modules.populate();
        NodeRegistry::new(Arc::new(modules))
    }

    #[test]
    fn test_node_registry_register_and_inject() {
        let registry = registry_with_meta();
        registry
            .register(End::Prepend, "head", "meta", "metaNodes")
            .unwrap();

        let req = RenderRequest::builder().build();
        let html = registry.inject(&req, "prepend-head").unwrap();
        // Attribute maps iterate in sorted key order.
        assert_eq!(html, r#"<meta content="plinth" name="generator" />"#);
    }

    #[test]
    fn test_node_registry_unknown_module_is_configuration_error() {
        let registry = registry_with_meta();
        let err = registry
            .register(End::Append, "body", "ghost", "metaNodes")
            .unwrap_err();
        assert!(matches!(err, PlinthError::ConfigurationError(_)));
    }

    #[test]
    fn test_node_registry_unknown_method_is_configuration_error() {
        let registry = registry_with_meta();
        let err = registry
            .register(End::Append, "body", "meta", "missingMethod")
            .unwrap_err();
        assert!(matches!(err, PlinthError::ConfigurationError(_)));
    }

    #[test]
    fn test_inject_empty_key_yields_empty_string() {
        let registry = registry_with_meta();
        let req = RenderRequest::builder().build();
        assert_eq!(registry.inject(&req, "append-body").unwrap(), "");
    }
}
