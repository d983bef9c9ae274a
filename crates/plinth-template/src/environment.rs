//! Per-module template environments.
//!
//! Each module gets its own configured environment: its own loader over the
//! module's view-directory chain, the shared filter and tag sets, and globals
//! describing the module. Environments are cached for the life of the process
//! and shared across renders.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use minijinja::value::Value;
use minijinja::{AutoEscape, Environment, Error, ErrorKind};
use serde_json::json;
use tracing::debug;

use plinth_core::error::{PlinthError, PlinthResult};
use plinth_core::modules::{ModuleConfig, ModuleRegistry};

use crate::library::{FilterRegistry, TagRegistry};
use crate::loaders::{FilesystemLoader, TemplateLoader};

/// A fully configured template environment for one module.
pub struct TemplateEnvironment {
    env: Environment<'static>,
    module: String,
}

impl TemplateEnvironment {
    /// Builds an environment for `module` backed by `loader`.
    ///
    /// Installs HTML auto-escaping, the shared filters and tags, the
    /// module-aware `getOption` function and the `apos` and `module` globals.
    pub fn new(
        module: &dyn ModuleConfig,
        loader: Arc<FilesystemLoader>,
        modules: Arc<ModuleRegistry>,
        filters: &FilterRegistry,
        tags: &TagRegistry,
        prefix: &str,
    ) -> Self {
        let mut env = Environment::new();
        env.set_auto_escape_callback(|_| AutoEscape::Html);

        let module_name = module.name().to_string();
        env.set_loader(move |name: &str| match loader.load(name) {
            Ok(loaded) => Ok(Some(loaded.source)),
            Err(PlinthError::TemplateNotFound(_)) => Ok(None),
            Err(e) => Err(Error::new(ErrorKind::InvalidOperation, e.to_string())),
        });

        filters.install(&mut env);
        tags.install(&mut env);

        env.add_global("apos", Value::from_serialize(json!({ "prefix": prefix })));
        env.add_global(
            "module",
            Value::from_serialize(json!({
                "name": module_name,
                "templateData": module.template_data(),
            })),
        );

        let own_module = module_name.clone();
        env.add_function(
            "getOption",
            move |key: &str, default: Option<Value>| -> Result<Value, Error> {
                let (target, option_key) = match key.split_once(':') {
                    Some((module, rest)) => (module.to_string(), rest.to_string()),
                    None => (own_module.clone(), key.to_string()),
                };
                let Some(config) = modules.get(&target) else {
                    return Err(Error::new(
                        ErrorKind::InvalidOperation,
                        format!("getOption: unknown module '{target}'"),
                    ));
                };
                Ok(config.option(&option_key).map_or_else(
                    || default.unwrap_or(Value::UNDEFINED),
                    Value::from_serialize,
                ))
            },
        );

        debug!(module = %module_name, "template environment created");
        Self {
            env,
            module: module_name,
        }
    }

    /// The name of the module this environment belongs to.
    pub fn module(&self) -> &str {
        &self.module
    }

    /// The underlying environment, for render calls.
    pub fn env(&self) -> &Environment<'static> {
        &self.env
    }
}

/// Process-lifetime cache of environments, one per module.
#[derive(Default)]
pub struct EnvironmentCache {
    envs: RwLock<HashMap<String, Arc<TemplateEnvironment>>>,
}

impl EnvironmentCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached environment for `module`, building it with `make`
    /// on first use. Creation is idempotent per module name.
    pub fn get_or_create<F>(&self, module: &str, make: F) -> PlinthResult<Arc<TemplateEnvironment>>
    where
        F: FnOnce() -> PlinthResult<TemplateEnvironment>,
    {
        if let Some(env) = self.envs.read().unwrap().get(module) {
            return Ok(Arc::clone(env));
        }
        let mut envs = self.envs.write().unwrap();
        if let Some(env) = envs.get(module) {
            return Ok(Arc::clone(env));
        }
        let env = Arc::new(make()?);
        envs.insert(module.to_string(), Arc::clone(&env));
        Ok(env)
    }

    /// Number of environments built so far.
    pub fn len(&self) -> usize {
        self.envs.read().unwrap().len()
    }

    /// True when no environment has been built yet.
    pub fn is_empty(&self) -> bool {
        self.envs.read().unwrap().is_empty()
    }
}
