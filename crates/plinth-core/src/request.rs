//! The per-request state consumed by the rendering core.
//!
//! [`RenderRequest`] carries everything page assembly needs from the
//! surrounding request-handling layer: the URL, query parameters, the
//! already-resolved user, request-attached data, and the per-request body
//! accumulators. Instances are built via [`RenderRequest::builder`] and never
//! shared across requests.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::PlinthError;

/// The authenticated user attached to a request, if any.
#[derive(Debug, Clone, Serialize)]
pub struct RequestUser {
    /// The user's login name.
    pub username: String,
    /// The permission names granted to this user.
    pub permissions: Vec<String>,
}

/// An append-only accumulator of space-separated body class names.
#[derive(Debug, Default, Clone)]
pub struct BodyClasses(String);

impl BodyClasses {
    /// Appends a class name.
    pub fn add(&mut self, class: &str) {
        if !self.0.is_empty() {
            self.0.push(' ');
        }
        self.0.push_str(class);
    }

    /// Returns the accumulated class string.
    pub fn finalize(&self) -> &str {
        &self.0
    }
}

/// An append-only accumulator of `data-*` attribute fragments.
///
/// Values are escaped with single-quote escaping so JSON payloads stay
/// readable in the markup.
#[derive(Debug, Default, Clone)]
pub struct BodyDataAttributes(String);

impl BodyDataAttributes {
    /// Appends a `data-<key>='<escaped-value>'` fragment.
    pub fn add(&mut self, key: &str, value: &str) {
        if !self.0.is_empty() {
            self.0.push(' ');
        }
        let escaped = value.replace('&', "&amp;").replace('\'', "&#39;");
        self.0.push_str(&format!("data-{key}='{escaped}'"));
    }

    /// Returns the accumulated attribute string.
    pub fn finalize(&self) -> &str {
        &self.0
    }
}

/// Per-request state for template rendering and page assembly.
///
/// # Examples
///
/// ```
/// use plinth_core::request::RenderRequest;
///
/// let req = RenderRequest::builder()
///     .url("/articles?page=2")
///     .query("page", "2")
///     .locale("en")
///     .build();
///
/// assert_eq!(req.url(), "/articles?page=2");
/// assert_eq!(req.query_param("page"), Some("2"));
/// ```
#[derive(Debug)]
pub struct RenderRequest {
    url: String,
    query: BTreeMap<String, String>,
    locale: String,
    user: Option<RequestUser>,
    data: Map<String, Value>,
    scene: Option<String>,
    error: Option<PlinthError>,
    status: u16,
    body_classes: BodyClasses,
    body_attributes: BodyDataAttributes,
}

impl RenderRequest {
    /// Creates a new [`RenderRequestBuilder`].
    pub fn builder() -> RenderRequestBuilder {
        RenderRequestBuilder::default()
    }

    /// Returns the full request URL including any query string.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Returns a query parameter by name.
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    /// Returns all query parameters.
    pub fn query(&self) -> &BTreeMap<String, String> {
        &self.query
    }

    /// Returns the request locale.
    pub fn locale(&self) -> &str {
        &self.locale
    }

    /// Returns the authenticated user, if any.
    pub fn user(&self) -> Option<&RequestUser> {
        self.user.as_ref()
    }

    /// Returns the request-attached data merged into every render context.
    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }

    /// Attaches a data value to the request.
    pub fn set_data(&mut self, key: &str, value: Value) {
        self.data.insert(key.to_string(), value);
    }

    /// Returns the explicit scene override carried by the request, if any.
    pub fn scene(&self) -> Option<&str> {
        self.scene.as_deref()
    }

    /// Sets an explicit scene on the request.
    pub fn set_scene(&mut self, scene: &str) {
        self.scene = Some(scene.to_string());
    }

    /// Returns the stored terminal error set by an earlier pipeline stage.
    pub fn error(&self) -> Option<&PlinthError> {
        self.error.as_ref()
    }

    /// Stores a terminal error; page assembly will skip rendering and go
    /// straight to the error path.
    pub fn set_error(&mut self, error: PlinthError) {
        self.error = Some(error);
    }

    /// Takes the stored terminal error, leaving none behind.
    pub fn take_error(&mut self) -> Option<PlinthError> {
        self.error.take()
    }

    /// Returns the response status code.
    pub const fn status(&self) -> u16 {
        self.status
    }

    /// Sets the response status code.
    pub fn set_status(&mut self, status: u16) {
        self.status = status;
    }

    /// Appends a space-separated class name to the body class accumulator.
    pub fn add_body_class(&mut self, class: &str) {
        self.body_classes.add(class);
    }

    /// Appends a `data-<key>='<escaped-value>'` fragment to the body
    /// attribute accumulator.
    pub fn add_body_data_attribute(&mut self, key: &str, value: &str) {
        self.body_attributes.add(key, value);
    }

    /// Returns the accumulated body class string.
    pub fn body_classes(&self) -> &str {
        self.body_classes.finalize()
    }

    /// Returns the accumulated body data-attribute string.
    pub fn body_attributes(&self) -> &str {
        self.body_attributes.finalize()
    }
}

/// Builder for [`RenderRequest`].
#[derive(Debug, Default)]
pub struct RenderRequestBuilder {
    url: String,
    query: BTreeMap<String, String>,
    locale: Option<String>,
    user: Option<RequestUser>,
    data: Map<String, Value>,
    scene: Option<String>,
}

impl RenderRequestBuilder {
    /// Sets the full request URL.
    #[must_use]
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Adds a query parameter.
    #[must_use]
    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(name.into(), value.into());
        self
    }

    /// Sets the request locale. Defaults to `"en"`.
    #[must_use]
    pub fn locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Some(locale.into());
        self
    }

    /// Attaches an authenticated user.
    #[must_use]
    pub fn user(mut self, user: RequestUser) -> Self {
        self.user = Some(user);
        self
    }

    /// Attaches a request data value.
    #[must_use]
    pub fn data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// Sets an explicit scene.
    #[must_use]
    pub fn scene(mut self, scene: impl Into<String>) -> Self {
        self.scene = Some(scene.into());
        self
    }

    /// Builds the [`RenderRequest`].
    pub fn build(self) -> RenderRequest {
        RenderRequest {
            url: self.url,
            query: self.query,
            locale: self.locale.unwrap_or_else(|| "en".to_string()),
            user: self.user,
            data: self.data,
            scene: self.scene,
            error: None,
            status: 200,
            body_classes: BodyClasses::default(),
            body_attributes: BodyDataAttributes::default(),
        }
    }
}
