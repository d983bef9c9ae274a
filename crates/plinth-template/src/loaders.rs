//! Template loaders and the shared loader cache.
//!
//! A loader resolves a template name to source text by searching an ordered
//! list of view directories, first match wins. Loaders are expensive enough to
//! create (and can hold open resources) that one instance is shared across all
//! requests for the same directory set; the [`LoaderCache`] owns that sharing
//! and the ordered teardown at shutdown.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use plinth_core::error::{PlinthError, PlinthResult};

/// A resolved template: its source text plus the path it was found at, so the
/// engine can support `extends`/`include` relative to the match.
#[derive(Debug, Clone)]
pub struct LoadedTemplate {
    /// The template source text.
    pub source: String,
    /// The filesystem path the template was resolved to.
    pub path: PathBuf,
}

/// Loads template source text by name from an ordered directory list.
pub trait TemplateLoader: Send + Sync {
    /// Loads the template with the given name, searching the configured
    /// directories in order and returning the first match.
    ///
    /// # Errors
    ///
    /// Returns `TemplateNotFound` if no directory contains the template.
    fn load(&self, name: &str) -> PlinthResult<LoadedTemplate>;

    /// Releases any resources held by this loader (resolution caches, file
    /// watchers). Called exactly once during process shutdown.
    fn release(&self) -> PlinthResult<()> {
        Ok(())
    }
}

/// Loads templates from an ordered list of view directories.
///
/// If the requested name carries no extension, the default extension is
/// appended before searching. Resolved paths are memoized until
/// [`release`](TemplateLoader::release) is called.
pub struct FilesystemLoader {
    dirs: Vec<PathBuf>,
    default_extension: String,
    resolved: RwLock<HashMap<String, PathBuf>>,
}

impl FilesystemLoader {
    /// Creates a new `FilesystemLoader` over the given ordered directories.
    pub fn new(dirs: Vec<PathBuf>, default_extension: impl Into<String>) -> Self {
        Self {
            dirs,
            default_extension: default_extension.into(),
            resolved: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the ordered directory list this loader searches.
    pub fn dirs(&self) -> &[PathBuf] {
        &self.dirs
    }

    fn effective_name(&self, name: &str) -> String {
        if Path::new(name).extension().is_some() {
            name.to_string()
        } else {
            format!("{name}.{}", self.default_extension)
        }
    }

    fn resolve(&self, name: &str) -> Option<PathBuf> {
        if let Some(path) = self.resolved.read().unwrap().get(name) {
            return Some(path.clone());
        }
        for dir in &self.dirs {
            let candidate = dir.join(name);
            if candidate.is_file() {
                self.resolved
                    .write()
                    .unwrap()
                    .insert(name.to_string(), candidate.clone());
                return Some(candidate);
            }
        }
        None
    }
}

impl TemplateLoader for FilesystemLoader {
    fn load(&self, name: &str) -> PlinthResult<LoadedTemplate> {
        let name = self.effective_name(name);
        let Some(path) = self.resolve(&name) else {
            return Err(PlinthError::TemplateNotFound(format!(
                "Template '{name}' not found in directories: {:?}",
                self.dirs
            )));
        };
        let source = std::fs::read_to_string(&path).map_err(|e| {
            PlinthError::TemplateNotFound(format!(
                "Error reading template '{}': {e}",
                path.display()
            ))
        })?;
        Ok(LoadedTemplate { source, path })
    }

    fn release(&self) -> PlinthResult<()> {
        self.resolved.write().unwrap().clear();
        Ok(())
    }
}

/// A process-scoped cache of loaders keyed by their exact ordered directory
/// list.
///
/// Two modules with identical directory sets share the same underlying loader;
/// a different directory list produces a different cache entry. Populated
/// lazily; a race to create the same entry resolves to whichever instance
/// landed first.
pub struct LoaderCache {
    default_extension: String,
    loaders: RwLock<HashMap<String, Arc<FilesystemLoader>>>,
}

impl LoaderCache {
    /// Creates an empty cache whose loaders append the given default
    /// extension to extension-less template names.
    pub fn new(default_extension: impl Into<String>) -> Self {
        Self {
            default_extension: default_extension.into(),
            loaders: RwLock::new(HashMap::new()),
        }
    }

    fn key(dirs: &[PathBuf]) -> String {
        // JSON-serialize the ordered list so the key is exact, not lossy.
        serde_json::to_string(dirs).unwrap_or_else(|_| format!("{dirs:?}"))
    }

    /// Returns the cached loader for this exact directory list, creating it
    /// on first use.
    pub fn get_or_create(&self, dirs: &[PathBuf]) -> Arc<FilesystemLoader> {
        let key = Self::key(dirs);
        if let Some(loader) = self.loaders.read().unwrap().get(&key) {
            return Arc::clone(loader);
        }
        let mut loaders = self.loaders.write().unwrap();
        Arc::clone(loaders.entry(key).or_insert_with(|| {
            Arc::new(FilesystemLoader::new(
                dirs.to_vec(),
                self.default_extension.clone(),
            ))
        }))
    }

    /// Returns the number of cached loaders.
    pub fn len(&self) -> usize {
        self.loaders.read().unwrap().len()
    }

    /// Returns `true` if no loaders are cached.
    pub fn is_empty(&self) -> bool {
        self.loaders.read().unwrap().is_empty()
    }

    /// Releases every cached loader and empties the cache.
    ///
    /// Runs during shutdown, after no further renders are accepted. A failed
    /// release is logged and does not abort the remaining releases.
    pub fn release_all(&self) {
        let mut loaders = self.loaders.write().unwrap();
        for (key, loader) in loaders.drain() {
            if let Err(e) = loader.release() {
                tracing::error!(loader = %key, error = %e, "failed to release template loader");
            }
        }
    }
}
