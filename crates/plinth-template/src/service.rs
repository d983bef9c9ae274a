//! The template service: the central object the rest of the system talks to.
//!
//! Owns the filter and tag registries, the loader and environment caches, and
//! the insertion and runtime-node registries. Exposes the two render entry
//! points (file locator and inline string); page assembly builds on these in
//! the `page` module.

use std::path::PathBuf;
use std::sync::Arc;

use minijinja::value::Value;
use minijinja::ErrorKind;
use serde_json::{json, Value as Json};
use tracing::debug;

use plinth_core::error::{PlinthError, PlinthResult};
use plinth_core::modules::{ModuleConfig, ModuleRegistry};
use plinth_core::request::RenderRequest;

use crate::context::build_render_context;
use crate::environment::{EnvironmentCache, TemplateEnvironment};
use crate::filters::register_defaults;
use crate::insertions::{InsertionContext, InsertionRegistry};
use crate::library::{CustomTag, FilterRegistry, TagRegistry, TemplateFilter};
use crate::loaders::LoaderCache;
use crate::nodes::NodeRegistry;

/// Locale-aware text lookup injected into every render as `__t`.
pub trait Translator: Send + Sync {
    /// Translates `key` for `locale`. The default returns the key itself.
    fn translate(&self, _locale: &str, key: &str) -> String {
        key.to_string()
    }
}

/// The identity translator used when no localization backend is wired up.
pub struct NoopTranslator;

impl Translator for NoopTranslator {}

/// Service configuration. All fields have conventional defaults.
pub struct TemplateServiceOptions {
    /// Project-wide base directory whose `views/` is always searched last.
    pub fallback_dir: Option<PathBuf>,
    /// Extension appended to template names that carry none.
    pub default_extension: String,
    /// Site URL prefix exposed to templates as `apos.prefix`.
    pub prefix: String,
    /// Template rendered on the page-assembly error path.
    pub error_template: String,
    /// Default outer layout template name.
    pub outer_layout: String,
    /// Layout used for in-context refresh requests.
    pub refresh_layout: String,
    /// Query parameter that marks a refresh request when set to `"1"`.
    pub refresh_param: String,
    /// Markup for the active asset bundle, spliced into the page head.
    pub bundle_markup: Option<String>,
    /// Configuration-supplied filters; override built-ins on name collision.
    pub filters: Vec<Arc<dyn TemplateFilter>>,
}

impl Default for TemplateServiceOptions {
    fn default() -> Self {
        Self {
            fallback_dir: None,
            default_extension: "html".to_string(),
            prefix: String::new(),
            error_template: "error.html".to_string(),
            outer_layout: "outerLayout.html".to_string(),
            refresh_layout: "refreshLayout.html".to_string(),
            refresh_param: "aposRefresh".to_string(),
            bundle_markup: None,
            filters: Vec::new(),
        }
    }
}

/// The template rendering and page assembly service.
pub struct TemplateService {
    pub(crate) modules: Arc<ModuleRegistry>,
    pub(crate) options: TemplateServiceOptions,
    pub(crate) filters: FilterRegistry,
    pub(crate) tags: TagRegistry,
    pub(crate) translator: Arc<dyn Translator>,
    pub(crate) loaders: LoaderCache,
    pub(crate) environments: EnvironmentCache,
    pub(crate) insertions: InsertionRegistry,
    pub(crate) nodes: NodeRegistry,
    pub(crate) insertion_ctx: InsertionContext,
    pub(crate) scene_observers: Vec<Box<dyn Fn(&RenderRequest, &mut String) + Send + Sync>>,
}

impl TemplateService {
    /// Builds a service over the given module registry.
    ///
    /// Installs the built-in filters, then the configuration-supplied ones so
    /// they win name collisions.
    pub fn new(modules: Arc<ModuleRegistry>, options: TemplateServiceOptions) -> Self {
        let mut filters = FilterRegistry::new();
        register_defaults(&mut filters);
        for filter in &options.filters {
            filters.register(Arc::clone(filter));
        }
        let loaders = LoaderCache::new(options.default_extension.clone());
        let nodes = NodeRegistry::new(Arc::clone(&modules));
        Self {
            modules,
            options,
            filters,
            tags: TagRegistry::new(),
            translator: Arc::new(NoopTranslator),
            loaders,
            environments: EnvironmentCache::new(),
            insertions: InsertionRegistry::new(),
            nodes,
            insertion_ctx: InsertionContext::default(),
            scene_observers: Vec::new(),
        }
    }

    /// Registers a hook that may observe or rewrite the computed scene before
    /// page assembly uses it.
    pub fn add_scene_observer<F>(&mut self, observer: F)
    where
        F: Fn(&RenderRequest, &mut String) + Send + Sync + 'static,
    {
        self.scene_observers.push(Box::new(observer));
    }

    /// Registers an additional filter. Must happen before the first
    /// environment for any module is built; later environments would see it
    /// but cached ones will not.
    pub fn register_filter(&mut self, filter: Arc<dyn TemplateFilter>) {
        self.filters.register(filter);
    }

    /// Registers a module-contributed custom tag. Same timing rule as
    /// [`Self::register_filter`].
    pub fn register_tag(&mut self, tag: Arc<dyn CustomTag>) {
        self.tags.register(tag);
    }

    /// Replaces the translator backing `__t`.
    pub fn set_translator(&mut self, translator: Arc<dyn Translator>) {
        self.translator = translator;
    }

    /// Sets the build context insertions are resolved against.
    pub fn set_insertion_context(&mut self, ctx: InsertionContext) {
        self.insertion_ctx = ctx;
    }

    /// The insertion registry, for module initialization.
    pub fn insertions(&self) -> &InsertionRegistry {
        &self.insertions
    }

    /// The runtime-node registry, for module initialization.
    pub fn nodes(&self) -> &NodeRegistry {
        &self.nodes
    }

    /// The module registry this service renders for.
    pub fn modules(&self) -> &Arc<ModuleRegistry> {
        &self.modules
    }

    /// Computes the ordered view-directory list for a module: ancestry chain
    /// reversed so the most-derived module wins, project fallback last.
    pub fn view_dirs(&self, module: &dyn ModuleConfig) -> Vec<PathBuf> {
        let mut dirs: Vec<PathBuf> = module
            .chain()
            .into_iter()
            .rev()
            .map(|base| base.join("views"))
            .collect();
        if let Some(fallback) = &self.options.fallback_dir {
            dirs.push(fallback.join("views"));
        }
        dirs
    }

    /// Returns the module's environment, building it on first use.
    ///
    /// Directory resolution and filter/tag installation happen exactly once
    /// per module; the cached environment serves every later render.
    pub fn environment(&self, module: &dyn ModuleConfig) -> PlinthResult<Arc<TemplateEnvironment>> {
        self.environments.get_or_create(module.name(), || {
            let loader = self.loaders.get_or_create(&self.view_dirs(module));
            Ok(TemplateEnvironment::new(
                module,
                loader,
                Arc::clone(&self.modules),
                &self.filters,
                &self.tags,
                &self.options.prefix,
            ))
        })
    }

    fn render_args(&self, req: &RenderRequest, data: &Json, module: &dyn ModuleConfig) -> Value {
        let merged = build_render_context(req, data, module);
        let snapshot = json!({
            "url": req.url(),
            "query": req.query(),
            "locale": req.locale(),
            "scene": req.scene(),
        });
        let translator = Arc::clone(&self.translator);
        let locale = req.locale().to_string();
        let translate = Value::from_function(move |key: &str| translator.translate(&locale, key));
        Value::from_iter([
            ("data", Value::from_serialize(&merged)),
            ("__req", Value::from_serialize(&snapshot)),
            ("__t", translate.clone()),
            ("__", translate),
        ])
    }

    fn map_engine_error(name: &str, err: &minijinja::Error) -> PlinthError {
        if err.kind() == ErrorKind::TemplateNotFound {
            PlinthError::TemplateNotFound(name.to_string())
        } else {
            PlinthError::TemplateRender(format!("{name}: {err:#}"))
        }
    }

    /// Renders a template resolved by name through the module's view
    /// directories.
    ///
    /// # Errors
    ///
    /// `TemplateNotFound` when no directory holds the template,
    /// `TemplateRender` on a compilation or execution fault.
    pub async fn render(
        &self,
        req: &RenderRequest,
        name: &str,
        data: &Json,
        module: &dyn ModuleConfig,
    ) -> PlinthResult<String> {
        let env = self.environment(module)?;
        let args = self.render_args(req, data, module);
        debug!(template = name, module = module.name(), "rendering template");
        let template = env
            .env()
            .get_template(name)
            .map_err(|e| Self::map_engine_error(name, &e))?;
        template
            .render(args)
            .map_err(|e| Self::map_engine_error(name, &e))
    }

    /// Renders an inline template string in the module's environment.
    pub async fn render_string(
        &self,
        req: &RenderRequest,
        source: &str,
        data: &Json,
        module: &dyn ModuleConfig,
    ) -> PlinthResult<String> {
        let env = self.environment(module)?;
        let args = self.render_args(req, data, module);
        env.env()
            .render_str(source, args)
            .map_err(|e| Self::map_engine_error("<inline>", &e))
    }

    /// Shutdown hook: releases every cached loader. Renders must not run
    /// after this.
    pub fn teardown(&self) {
        self.loaders.release_all();
    }
}
