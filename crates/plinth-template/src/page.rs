//! Full-page assembly on top of the render pipeline.
//!
//! `render_page` wraps a template render with the page-level concerns: scene
//! computation, layout selection, request-derived defaults, the stored-error
//! short circuit, and post-processing that splices bundle markup and
//! registered insertions into the head and body of the rendered document.

use serde_json::{json, Map, Value as Json};
use tracing::error;

use plinth_core::error::{PlinthError, PlinthResult};
use plinth_core::modules::ModuleConfig;
use plinth_core::request::RenderRequest;

use crate::context::merge_into;
use crate::insertions::End;
use crate::service::TemplateService;

/// The four resolved injection strings for a page, one per slot.
#[derive(Debug, Default, Clone)]
pub struct PageSlots {
    /// Markup spliced right after the opening `<head>` tag.
    pub prepend_head: String,
    /// Markup spliced right before `</head>`.
    pub append_head: String,
    /// Markup spliced right after the opening `<body>` tag.
    pub prepend_body: String,
    /// Markup spliced right before `</body>`.
    pub append_body: String,
}

/// Removes the refresh query parameter from a URL without leaving a dangling
/// `?` or `&`, wherever in the query string it appears.
pub fn strip_refresh_param(url: &str, param: &str) -> String {
    let Some((path, query)) = url.split_once('?') else {
        return url.to_string();
    };
    let kept: Vec<&str> = query
        .split('&')
        .filter(|pair| {
            let name = pair.split('=').next().unwrap_or(pair);
            name != param
        })
        .collect();
    if kept.is_empty() {
        path.to_string()
    } else {
        format!("{path}?{}", kept.join("&"))
    }
}

// Inserts `markup` right after the closing '>' of the first `<tag ...>` open
// tag, preceded by a newline. No-op when the tag is absent.
fn splice_after_open(html: &str, tag: &str, markup: &str) -> String {
    if markup.is_empty() {
        return html.to_string();
    }
    let needle = format!("<{tag}");
    let Some(start) = html.find(&needle) else {
        return html.to_string();
    };
    let Some(end) = html[start..].find('>') else {
        return html.to_string();
    };
    let at = start + end + 1;
    format!("{}\n{}{}", &html[..at], markup, &html[at..])
}

fn splice_before_close(html: &str, tag: &str, markup: &str) -> String {
    if markup.is_empty() {
        return html.to_string();
    }
    let needle = format!("</{tag}>");
    match html.rfind(&needle) {
        Some(at) => format!("{}{}\n{}", &html[..at], markup, &html[at..]),
        None => html.to_string(),
    }
}

impl TemplateService {
    /// Resolves the four injection slots for this request: registered
    /// insertion markup first, then runtime-node output, in registration
    /// order within each.
    pub fn page_slots(&self, req: &RenderRequest) -> PlinthResult<PageSlots> {
        let mut slots = PageSlots::default();
        for (end, location, target) in [
            (End::Prepend, "head", &mut slots.prepend_head),
            (End::Append, "head", &mut slots.append_head),
            (End::Prepend, "body", &mut slots.prepend_body),
            (End::Append, "body", &mut slots.append_body),
        ] {
            let key = end.key(location);
            let mut parts = self.insertions.resolve(&key, &self.insertion_ctx);
            let injected = self.nodes.inject(req, &key)?;
            if !injected.is_empty() {
                parts.push(injected);
            }
            *target = parts.join("\n");
        }
        Ok(slots)
    }

    fn post_process(&self, req: &RenderRequest, html: &str) -> PlinthResult<String> {
        let slots = self.page_slots(req)?;
        let mut head_append = slots.append_head;
        if let Some(bundle) = &self.options.bundle_markup {
            if head_append.is_empty() {
                head_append = bundle.clone();
            } else {
                head_append = format!("{bundle}\n{head_append}");
            }
        }
        let mut out = splice_after_open(html, "head", &slots.prepend_head);
        out = splice_before_close(&out, "head", &head_append);
        out = splice_after_open(&out, "body", &slots.prepend_body);
        out = splice_before_close(&out, "body", &slots.append_body);
        Ok(out)
    }

    fn page_defaults(&self, req: &RenderRequest) -> Map<String, Json> {
        let refreshing = req.query_param(&self.options.refresh_param) == Some("1");
        let layout = if refreshing {
            &self.options.refresh_layout
        } else {
            &self.options.outer_layout
        };
        let permissions = req
            .user()
            .map_or_else(|| json!([]), |user| json!(user.permissions));
        let mut defaults = Map::new();
        defaults.insert("outerLayout".to_string(), json!(layout));
        defaults.insert("permissions".to_string(), permissions);
        defaults.insert(
            "scene".to_string(),
            json!(req.scene().unwrap_or("public")),
        );
        defaults.insert("refreshing".to_string(), json!(refreshing));
        defaults.insert("query".to_string(), json!(req.query()));
        defaults.insert(
            "url".to_string(),
            json!(strip_refresh_param(req.url(), &self.options.refresh_param)),
        );
        defaults.insert("bodyClass".to_string(), json!(req.body_classes()));
        defaults.insert("bodyAttributes".to_string(), json!(req.body_attributes()));
        defaults
    }

    /// Computes the scene for this request: an explicit scene on the request
    /// wins, otherwise an authenticated user gets `"apos"` and anonymous
    /// traffic gets `"public"`. The result is stored back on the request.
    pub fn compute_scene(&self, req: &mut RenderRequest) -> String {
        let mut scene = match req.scene() {
            Some(scene) => scene.to_string(),
            None => {
                if req.user().is_some() {
                    "apos".to_string()
                } else {
                    "public".to_string()
                }
            }
        };
        for observer in &self.scene_observers {
            observer(req, &mut scene);
        }
        req.set_scene(&scene);
        scene
    }

    /// Assembles a complete page: scene and layout selection, defaults merge,
    /// render, post-processing, with the error-template fallback.
    ///
    /// # Errors
    ///
    /// Only when the error template itself fails to render; every other
    /// failure resolves to the rendered error page with a forced 500 status.
    pub async fn render_page(
        &self,
        req: &mut RenderRequest,
        template: &str,
        data: &Json,
        module: &dyn ModuleConfig,
    ) -> PlinthResult<String> {
        self.compute_scene(req);

        let mut merged = self.page_defaults(req);
        merge_into(&mut merged, data);
        let merged = Json::Object(merged);

        if let Some(stored) = req.take_error() {
            return self.render_error_page(req, &stored, module).await;
        }

        match self.render(req, template, &merged, module).await {
            Ok(html) => self.post_process(req, &html),
            Err(err) => self.render_error_page(req, &err, module).await,
        }
    }

    // The error template render is deliberately not wrapped in the same
    // fallback; a failing error template is unrecoverable for the request.
    async fn render_error_page(
        &self,
        req: &mut RenderRequest,
        cause: &PlinthError,
        module: &dyn ModuleConfig,
    ) -> PlinthResult<String> {
        error!(
            error = %cause,
            url = req.url(),
            user = req.user().map_or("anonymous", |u| u.username.as_str()),
            "error while rendering page, see above for the offending helper or filter"
        );
        req.set_status(500);
        let data = json!({
            "status": 500,
            "url": req.url(),
        });
        self.render(req, &self.options.error_template, &data, module)
            .await
    }
}
