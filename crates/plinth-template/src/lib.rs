//! Template rendering and page assembly for the plinth CMS core.
//!
//! Templates belong to modules. Each module's view directories are searched
//! in override order (most-derived first, project fallback last) by a cached
//! loader, and each module gets one cached engine environment carrying the
//! shared filters, custom tags, and module-scoped globals. On top of that
//! sit page assembly (layout selection, defaults, error fallback, injection
//! splicing) and the annotation pass for decoupled front ends.
//!
//! The entry point is [`TemplateService`]; everything else supports it.

pub mod context;
pub mod environment;
pub mod filters;
pub mod front;
pub mod insertions;
pub mod library;
pub mod loaders;
pub mod nodes;
pub mod page;
pub mod service;

pub use environment::{EnvironmentCache, TemplateEnvironment};
pub use front::{AreaFieldDef, FrontAnnotator, SchemaProvider, WidgetChoice};
pub use insertions::{End, InsertionConditions, InsertionContext, InsertionRegistry};
pub use library::{ClosureFilter, CustomTag, FilterRegistry, TagRegistry, TemplateFilter};
pub use loaders::{FilesystemLoader, LoadedTemplate, LoaderCache, TemplateLoader};
pub use nodes::{render_nodes, render_values, Node, NodeRegistry};
pub use page::{strip_refresh_param, PageSlots};
pub use service::{NoopTranslator, TemplateService, TemplateServiceOptions, Translator};
