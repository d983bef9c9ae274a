//! Filter and custom-tag registration.
//!
//! Modules contribute named filters and custom tags through the registries in
//! this module during startup; environment construction installs the whole set
//! into each module's engine environment exactly once. Registration rejects
//! unknown shapes eagerly; a bad registration is a programming error in the
//! contributing module, not a render-time condition.

use std::collections::HashMap;
use std::sync::Arc;

use minijinja::value::Rest;
use minijinja::{Environment, ErrorKind, Value};

use plinth_core::error::PlinthResult;

/// A named template filter: a value-to-value transform.
///
/// Filters that return markup must mark their output safe explicitly (via
/// [`Value::from_safe_string`]); everything else is auto-escaped by the
/// environment.
pub trait TemplateFilter: Send + Sync {
    /// Returns the filter name as used in templates.
    fn name(&self) -> &str;

    /// Applies the filter to a value with the given arguments.
    fn apply(&self, value: &Value, args: &[Value]) -> PlinthResult<Value>;
}

/// A filter backed by a closure, used for configuration-supplied filters.
pub struct ClosureFilter {
    name: String,
    func: Arc<dyn Fn(&Value, &[Value]) -> PlinthResult<Value> + Send + Sync>,
}

impl ClosureFilter {
    /// Wraps a closure as a named filter.
    pub fn new<F>(name: impl Into<String>, func: F) -> Arc<dyn TemplateFilter>
    where
        F: Fn(&Value, &[Value]) -> PlinthResult<Value> + Send + Sync + 'static,
    {
        Arc::new(Self {
            name: name.into(),
            func: Arc::new(func),
        })
    }
}

impl TemplateFilter for ClosureFilter {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, value: &Value, args: &[Value]) -> PlinthResult<Value> {
        (self.func)(value, args)
    }
}

/// A registry of template filters keyed by name.
///
/// Registering a filter under an existing name replaces it; configuration-
/// supplied filters rely on this to override the defaults.
#[derive(Default)]
pub struct FilterRegistry {
    filters: HashMap<String, Arc<dyn TemplateFilter>>,
}

impl FilterRegistry {
    /// Creates a new empty filter registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a single filter. A name collision overrides the previous
    /// registration.
    pub fn register(&mut self, filter: Arc<dyn TemplateFilter>) {
        self.filters.insert(filter.name().to_string(), filter);
    }

    /// Registers many filters at once.
    pub fn register_many(&mut self, filters: impl IntoIterator<Item = Arc<dyn TemplateFilter>>) {
        for filter in filters {
            self.register(filter);
        }
    }

    /// Looks up a filter by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn TemplateFilter>> {
        self.filters.get(name).cloned()
    }

    /// Returns all registered filter names.
    pub fn names(&self) -> Vec<&str> {
        self.filters.keys().map(String::as_str).collect()
    }

    /// Returns the number of registered filters.
    pub fn len(&self) -> usize {
        self.filters.len()
    }

    /// Returns `true` if no filters are registered.
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Installs every registered filter into an engine environment.
    pub fn install(&self, env: &mut Environment<'static>) {
        for (name, filter) in &self.filters {
            let filter = Arc::clone(filter);
            env.add_filter(
                name.clone(),
                move |value: Value, args: Rest<Value>| -> Result<Value, minijinja::Error> {
                    filter.apply(&value, &args).map_err(|e| {
                        minijinja::Error::new(
                            ErrorKind::InvalidOperation,
                            format!("filter '{}' failed: {e}", filter.name()),
                        )
                    })
                },
            );
        }
    }
}

/// A custom block-like tag contributed by a module.
///
/// The parse step turns the raw argument values into a structured descriptor;
/// the run step produces output that is treated as pre-escaped. The glue that
/// adapts this onto the engine's extension protocol lives in
/// [`TagRegistry::install`].
pub trait CustomTag: Send + Sync {
    /// Returns the tag name as used in templates.
    fn name(&self) -> &str;

    /// Consumes the raw arguments and produces a structured descriptor.
    ///
    /// The default keeps the arguments as-is.
    fn parse(&self, args: &[Value]) -> PlinthResult<Value> {
        Ok(Value::from_serialize(args))
    }

    /// Executes the tag with the parsed descriptor, returning markup that is
    /// emitted without further escaping.
    fn run(&self, parsed: Value) -> PlinthResult<String>;
}

/// A registry of custom tags keyed by name.
#[derive(Default)]
pub struct TagRegistry {
    tags: HashMap<String, Arc<dyn CustomTag>>,
}

impl TagRegistry {
    /// Creates a new empty tag registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a custom tag. A name collision overrides the previous
    /// registration.
    pub fn register(&mut self, tag: Arc<dyn CustomTag>) {
        self.tags.insert(tag.name().to_string(), tag);
    }

    /// Looks up a tag by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn CustomTag>> {
        self.tags.get(name).cloned()
    }

    /// Returns all registered tag names.
    pub fn names(&self) -> Vec<&str> {
        self.tags.keys().map(String::as_str).collect()
    }

    /// Returns `true` if no tags are registered.
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Installs every registered tag into an engine environment.
    ///
    /// Tags are exposed as engine functions whose output is marked safe; the
    /// run step's contract is that it returns pre-escaped markup.
    pub fn install(&self, env: &mut Environment<'static>) {
        for (name, tag) in &self.tags {
            let tag = Arc::clone(tag);
            env.add_function(
                name.clone(),
                move |args: Rest<Value>| -> Result<Value, minijinja::Error> {
                    let parsed = tag.parse(&args).map_err(|e| {
                        minijinja::Error::new(
                            ErrorKind::InvalidOperation,
                            format!("tag '{}' failed to parse arguments: {e}", tag.name()),
                        )
                    })?;
                    let output = tag.run(parsed).map_err(|e| {
                        minijinja::Error::new(
                            ErrorKind::InvalidOperation,
                            format!("tag '{}' failed: {e}", tag.name()),
                        )
                    })?;
                    Ok(Value::from_safe_string(output))
                },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closure_filter_apply() {
        let filter = ClosureFilter::new("shout", |value, _args| {
            Ok(Value::from(format!("{value}!")))
        });
        assert_eq!(filter.name(), "shout");
        let result = filter.apply(&Value::from("hey"), &[]).unwrap();
        assert_eq!(result.to_string(), "hey!");
    }

    #[test]
    fn test_registry_register_and_get() {
        let mut registry = FilterRegistry::new();
        registry.register(ClosureFilter::new("upper", |value, _| {
            Ok(Value::from(value.to_string().to_uppercase()))
        }));

        assert_eq!(registry.len(), 1);
        assert!(registry.get("upper").is_some());
        assert!(registry.get("lower").is_none());
    }

    #[test]
    fn test_registry_collision_overrides() {
        let mut registry = FilterRegistry::new();
        registry.register(ClosureFilter::new("tag", |_, _| Ok(Value::from("old"))));
        registry.register(ClosureFilter::new("tag", |_, _| Ok(Value::from("new"))));

        assert_eq!(registry.len(), 1);
        let filter = registry.get("tag").unwrap();
        assert_eq!(
            filter.apply(&Value::from(""), &[]).unwrap().to_string(),
            "new"
        );
    }

    #[test]
    fn test_register_many() {
        let mut registry = FilterRegistry::new();
        registry.register_many(vec![
            ClosureFilter::new("a", |v, _| Ok(v.clone())),
            ClosureFilter::new("b", |v, _| Ok(v.clone())),
        ]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_install_filters_into_environment() {
        let mut registry = FilterRegistry::new();
        registry.register(ClosureFilter::new("double", |value, _| {
            let s = value.to_string();
            Ok(Value::from(format!("{s}{s}")))
        }));

        let mut env = Environment::new();
        registry.install(&mut env);

        let result = env
            .render_str("{{ 'ab'|double }}", minijinja::context! {})
            .unwrap();
        assert_eq!(result, "abab");
    }

    #[test]
    fn test_filter_error_surfaces_as_engine_error() {
        let mut registry = FilterRegistry::new();
        registry.register(ClosureFilter::new("boom", |_, _| {
            Err(plinth_core::error::PlinthError::BadRequest("nope".into()))
        }));

        let mut env = Environment::new();
        registry.install(&mut env);

        let result = env.render_str("{{ 'x'|boom }}", minijinja::context! {});
        let err = result.unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    struct GreetTag;

    impl CustomTag for GreetTag {
        fn name(&self) -> &str {
            "greet"
        }

        fn run(&self, parsed: Value) -> PlinthResult<String> {
            let name = parsed
                .get_item(&Value::from(0))
                .ok()
                .filter(|v| !v.is_undefined())
                .map_or_else(|| "World".to_string(), |v| v.to_string());
            Ok(format!("<b>Hello, {name}!</b>"))
        }
    }

    #[test]
    fn test_tag_registry_register_and_get() {
        let mut registry = TagRegistry::new();
        registry.register(Arc::new(GreetTag));
        assert!(registry.get("greet").is_some());
        assert!(registry.get("farewell").is_none());
        assert_eq!(registry.names(), vec!["greet"]);
    }

    #[test]
    fn test_tag_output_is_pre_escaped() {
        let mut registry = TagRegistry::new();
        registry.register(Arc::new(GreetTag));

        let mut env = Environment::new();
        env.set_auto_escape_callback(|_| minijinja::AutoEscape::Html);
        registry.install(&mut env);

        let result = env
            .render_str("{{ greet('Alice') }}", minijinja::context! {})
            .unwrap();
        assert_eq!(result, "<b>Hello, Alice!</b>");
    }

    #[test]
    fn test_tag_default_arguments() {
        let mut registry = TagRegistry::new();
        registry.register(Arc::new(GreetTag));

        let mut env = Environment::new();
        registry.install(&mut env);

        let result = env
            .render_str("{{ greet() }}", minijinja::context! {})
            .unwrap();
        assert_eq!(result, "<b>Hello, World!</b>");
    }
}
