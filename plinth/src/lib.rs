//! # plinth
//!
//! A content-management-system core for Rust.
//!
//! This is the meta-crate that re-exports the sub-crates for convenient
//! access. You can depend on `plinth` to get the whole core, or depend on
//! individual crates for finer-grained control.

/// Core types: errors, the module registry, request state, logging setup.
pub use plinth_core as core;

/// Template rendering and page assembly.
#[cfg(feature = "template")]
pub use plinth_template as template;

// Commonly used third-party crates, re-exported so downstream projects stay
// on the same versions.
pub use serde;
pub use serde_json;
pub use tokio;
pub use tracing;
pub use tracing_subscriber;

/// The most commonly used items, importable in one line.
pub mod prelude {
    pub use plinth_core::error::{PlinthError, PlinthResult};
    pub use plinth_core::modules::{ModuleConfig, ModuleRegistry};
    pub use plinth_core::request::{RenderRequest, RequestUser};

    #[cfg(feature = "template")]
    pub use plinth_template::{
        TemplateService, TemplateServiceOptions, Translator,
    };
}
