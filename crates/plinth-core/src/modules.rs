//! Module registry for the plinth framework.
//!
//! A module is the unit of template ownership: it has a stable name, an
//! ordered ancestry chain of base directories (root ancestor first), optional
//! static template data merged into every render, and optionally a set of
//! node-producing methods invoked at page-assembly time.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{PlinthError, PlinthResult};
use crate::request::RenderRequest;

/// Configuration for an installed module.
///
/// Implement this trait for each module that owns templates or contributes
/// injected content. The ancestry [`chain`](ModuleConfig::chain) drives
/// template override resolution: a template in a more-derived module's views
/// directory wins over the same template in an ancestor's.
pub trait ModuleConfig: Send + Sync {
    /// Returns the stable, unique name of the module.
    fn name(&self) -> &str;

    /// Returns the ordered ancestry chain of base directories, root ancestor
    /// first and the module's own base directory last.
    ///
    /// A module with no inheritance returns a single-element chain.
    fn chain(&self) -> Vec<PathBuf>;

    /// Static values merged into every render context for this module.
    ///
    /// Returns `Value::Null` when the module contributes nothing.
    fn template_data(&self) -> Value {
        Value::Null
    }

    /// Looks up a configuration option by key.
    fn option(&self, _key: &str) -> Option<Value> {
        None
    }

    /// Returns `true` if this module exposes a node-producing method with the
    /// given name. Used to validate injection registrations eagerly.
    fn has_node_method(&self, _method: &str) -> bool {
        false
    }

    /// Invokes a node-producing method by name, returning a virtual-node tree
    /// as JSON-like values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError` if the method is unknown.
    fn call_node_method(
        &self,
        method: &str,
        _req: &RenderRequest,
    ) -> PlinthResult<Vec<Value>> {
        Err(PlinthError::ConfigurationError(format!(
            "Module '{}' has no node method '{method}'",
            self.name()
        )))
    }
}

/// The central registry of installed modules.
///
/// Modules are registered during startup and [`populate`](ModuleRegistry::populate)
/// is called once afterwards; the registry is read-only during request handling.
pub struct ModuleRegistry {
    modules: Vec<Arc<dyn ModuleConfig>>,
    names: HashMap<String, usize>,
    ready: bool,
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleRegistry {
    /// Creates a new, empty `ModuleRegistry`.
    pub fn new() -> Self {
        Self {
            modules: Vec::new(),
            names: HashMap::new(),
            ready: false,
        }
    }

    /// Registers a module.
    ///
    /// # Panics
    ///
    /// Panics if a module with the same name is already registered, or if
    /// [`populate`](ModuleRegistry::populate) has already been called.
    pub fn register(&mut self, module: Arc<dyn ModuleConfig>) {
        assert!(
            !self.ready,
            "Cannot register modules after the registry has been populated"
        );

        let name = module.name().to_string();
        assert!(
            !self.names.contains_key(&name),
            "Module with name '{name}' is already registered"
        );

        let index = self.modules.len();
        self.names.insert(name, index);
        self.modules.push(module);
    }

    /// Returns the module with the given name, if registered.
    pub fn get(&self, name: &str) -> Option<Arc<dyn ModuleConfig>> {
        self.names.get(name).map(|&idx| Arc::clone(&self.modules[idx]))
    }

    /// Returns all registered modules in registration order.
    pub fn all(&self) -> &[Arc<dyn ModuleConfig>] {
        &self.modules
    }

    /// Marks the registry as populated; no further registrations are accepted.
    pub fn populate(&mut self) {
        assert!(!self.ready, "ModuleRegistry has already been populated");
        self.ready = true;
    }

    /// Returns `true` if the registry has been populated.
    pub const fn is_ready(&self) -> bool {
        self.ready
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestModule {
        module_name: String,
        base: PathBuf,
    }

    impl TestModule {
        fn new(name: &str, base: &str) -> Self {
            Self {
                module_name: name.to_string(),
                base: PathBuf::from(base),
            }
        }
    }

    impl ModuleConfig for TestModule {
        fn name(&self) -> &str {
            &self.module_name
        }

        fn chain(&self) -> Vec<PathBuf> {
            vec![self.base.clone()]
        }
    }

    #[test]
    fn test_register_and_get() {
        let mut registry = ModuleRegistry::new();
        registry.register(Arc::new(TestModule::new("article-page", "/srv/article")));

        let module = registry.get("article-page").expect("module should exist");
        assert_eq!(module.name(), "article-page");
        assert_eq!(module.chain(), vec![PathBuf::from("/srv/article")]);
    }

    #[test]
    fn test_get_missing_module() {
        let registry = ModuleRegistry::new();
        assert!(registry.get("nonexistent").is_none());
    }

    #[test]
    fn test_all_preserves_registration_order() {
        let mut registry = ModuleRegistry::new();
        registry.register(Arc::new(TestModule::new("a", "/a")));
        registry.register(Arc::new(TestModule::new("b", "/b")));

        let names: Vec<&str> = registry.all().iter().map(|m| m.name()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_populate() {
        let mut registry = ModuleRegistry::new();
        assert!(!registry.is_ready());
        registry.populate();
        assert!(registry.is_ready());
    }

    #[test]
    #[should_panic(expected = "already registered")]
    fn test_duplicate_name_panics() {
        let mut registry = ModuleRegistry::new();
        registry.register(Arc::new(TestModule::new("dup", "/a")));
        registry.register(Arc::new(TestModule::new("dup", "/b")));
    }

    #[test]
    #[should_panic(expected = "Cannot register modules after the registry has been populated")]
    fn test_register_after_populate_panics() {
        let mut registry = ModuleRegistry::new();
        registry.populate();
        registry.register(Arc::new(TestModule::new("late", "/late")));
    }

    #[test]
    fn test_default_node_method_is_configuration_error() {
        let module = TestModule::new("plain", "/plain");
        let req = RenderRequest::builder().build();
        let err = module.call_node_method("missing", &req).unwrap_err();
        assert!(matches!(err, PlinthError::ConfigurationError(_)));
    }
}
