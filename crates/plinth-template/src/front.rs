//! Annotation of assembled page data for a decoupled front end.
//!
//! A headless consumer receives the page's document data as JSON instead of
//! rendered HTML. Before it goes out, every area-typed substructure is
//! annotated with the schema information the front end needs to render and
//! edit it: the owning field definition, the field options, and the permitted
//! widget choices. Body metadata and the four injection-slot strings ride
//! along on the payload.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde_json::{json, Map, Value as Json};
use tracing::warn;

use plinth_core::request::RenderRequest;

use crate::page::PageSlots;

/// A content-block type permitted inside an area.
#[derive(Debug, Clone, Serialize)]
pub struct WidgetChoice {
    /// The widget type name.
    pub name: String,
    /// Icon identifier for the editing UI.
    pub icon: Option<String>,
    /// Human-readable label.
    pub label: String,
}

/// The schema information attached to one area field.
#[derive(Debug, Clone, Serialize)]
pub struct AreaFieldDef {
    /// The raw field definition.
    pub field: Json,
    /// The field's configured options.
    pub options: Json,
    /// Widget types permitted in this area.
    pub choices: Vec<WidgetChoice>,
}

/// Schema lookup the annotator consults for each area it finds.
///
/// Returning `None` means the schema is unknown for that document type and
/// field; the area is skipped and a warning is logged once per distinct
/// type/field pair.
pub trait SchemaProvider: Send + Sync {
    /// Looks up the area field definition for `doc_type`/`field_name`.
    fn area_definition(&self, doc_type: &str, field_name: &str) -> Option<AreaFieldDef>;
}

/// Walks assembled page data and annotates every area for external-front
/// consumption.
pub struct FrontAnnotator {
    schema: Arc<dyn SchemaProvider>,
    warned: Mutex<HashSet<String>>,
}

/// The payload keys the annotator walks for documents.
const DOCUMENT_KEYS: &[&str] = &["home", "ancestors", "children", "page", "piece", "pieces"];

impl FrontAnnotator {
    /// Creates an annotator over the given schema source.
    pub fn new(schema: Arc<dyn SchemaProvider>) -> Self {
        Self {
            schema,
            warned: Mutex::new(HashSet::new()),
        }
    }

    fn warn_once(&self, key: String, message: &str) {
        let mut warned = self.warned.lock().unwrap();
        if warned.insert(key.clone()) {
            warn!(area = %key, "{message}");
        }
    }

    fn annotate_area(&self, doc_type: &str, field_name: &str, area: &mut Map<String, Json>) {
        area.entry("items".to_string())
            .or_insert_with(|| json!([]));
        let Some(def) = self.schema.area_definition(doc_type, field_name) else {
            self.warn_once(
                format!("{doc_type}:{field_name}"),
                "no schema field found for area, skipping annotation",
            );
            return;
        };
        area.insert("field".to_string(), def.field);
        area.insert("options".to_string(), def.options);
        area.insert(
            "choices".to_string(),
            serde_json::to_value(&def.choices).unwrap_or_else(|_| json!([])),
        );
    }

    fn walk_value(&self, doc_type: &str, field_name: &str, value: &mut Json) {
        match value {
            Json::Object(map) => {
                if map.get("metaType") == Some(&json!("area")) {
                    self.annotate_area(doc_type, field_name, map);
                }
                let keys: Vec<String> = map.keys().cloned().collect();
                for key in keys {
                    if let Some(child) = map.get_mut(&key) {
                        self.walk_value(doc_type, &key, child);
                    }
                }
            }
            Json::Array(items) => {
                for item in items {
                    self.walk_value(doc_type, field_name, item);
                }
            }
            _ => {}
        }
    }

    fn annotate_document(&self, doc: &mut Json) {
        let Some(doc_type) = doc
            .get("type")
            .and_then(Json::as_str)
            .map(ToString::to_string)
        else {
            self.warn_once(
                "untyped-document".to_string(),
                "document without a type, skipping annotation",
            );
            return;
        };
        self.walk_value(&doc_type, "", doc);
    }

    /// Annotates the assembled payload in place: every area in every document
    /// under the conventional keys, plus body metadata, bundle markup, and
    /// the injection-slot strings.
    pub fn annotate(
        &self,
        req: &RenderRequest,
        payload: &mut Map<String, Json>,
        bundle_markup: Option<&str>,
        slots: &PageSlots,
    ) {
        for key in DOCUMENT_KEYS {
            match payload.get_mut(*key) {
                Some(Json::Array(docs)) => {
                    for doc in docs {
                        self.annotate_document(doc);
                    }
                }
                Some(doc @ Json::Object(_)) => self.annotate_document(doc),
                _ => {}
            }
        }
        payload.insert(
            "scene".to_string(),
            json!(req.scene().unwrap_or("public")),
        );
        payload.insert("bodyClass".to_string(), json!(req.body_classes()));
        payload.insert("bodyAttributes".to_string(), json!(req.body_attributes()));
        if let Some(markup) = bundle_markup {
            payload.insert("bundleMarkup".to_string(), json!(markup));
        }
        payload.insert("prependHead".to_string(), json!(slots.prepend_head));
        payload.insert("appendHead".to_string(), json!(slots.append_head));
        payload.insert("prependBody".to_string(), json!(slots.prepend_body));
        payload.insert("appendBody".to_string(), json!(slots.append_body));
    }
}
