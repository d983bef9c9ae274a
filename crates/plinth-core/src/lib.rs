//! # plinth-core
//!
//! Foundation types for the plinth content-management core: the [`PlinthError`]
//! error enum, the module registry that tracks units of template ownership,
//! the per-request [`RenderRequest`] type, and logging setup helpers.
//!
//! [`PlinthError`]: error::PlinthError
//! [`RenderRequest`]: request::RenderRequest

pub mod error;
pub mod logging;
pub mod modules;
pub mod request;

pub use error::{PlinthError, PlinthResult};
pub use modules::{ModuleConfig, ModuleRegistry};
pub use request::{RenderRequest, RequestUser};
