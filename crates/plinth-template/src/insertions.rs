//! Conditional markup insertion for page slots.
//!
//! Pages expose four slots, one per end of the `head` and `body` elements.
//! Markup is registered against a slot together with optional conditions and
//! resolved at render time against the current build context, so a page can
//! carry, say, a dev-only script without the production bundle knowing about
//! it.

use std::collections::HashMap;
use std::sync::RwLock;

use tracing::error;

/// Which end of a page element an insertion targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum End {
    /// Immediately after the opening tag.
    Prepend,
    /// Immediately before the closing tag.
    Append,
}

impl End {
    /// The registry key for this end at the given location, e.g.
    /// `prepend-head`.
    pub fn key(self, location: &str) -> String {
        match self {
            Self::Prepend => format!("prepend-{location}"),
            Self::Append => format!("append-{location}"),
        }
    }
}

/// Conditions attached to an insertion at registration time.
#[derive(Debug, Clone, Default)]
pub struct InsertionConditions {
    /// Build-phase tags this insertion applies to. Compared against the
    /// context tag on the portion before any `:` suffix.
    pub when: Option<Vec<String>>,
    /// The bundler this insertion requires.
    pub bundler: Option<String>,
}

/// The build context an insertion is resolved against.
#[derive(Debug, Clone, Default)]
pub struct InsertionContext {
    /// The current build-phase tag, if the render is phase-specific.
    pub when: Option<String>,
    /// Hot-module-reload mode, if active.
    pub hmr: Option<String>,
    /// Whether this is a development build.
    pub dev: bool,
}

struct Insertion {
    markup: String,
    conditions: Option<InsertionConditions>,
}

type Predicate = Box<dyn Fn(&str, &InsertionContext) -> bool + Send + Sync>;

/// Registry of conditional markup insertions, keyed by `<end>-<location>`.
///
/// Condition predicates named in `when` values (the portion before `:`) are
/// looked up here; `hmr`, `dev` and `prod` are built in. The active bundler
/// is fixed for the life of the process.
pub struct InsertionRegistry {
    entries: RwLock<HashMap<String, Vec<Insertion>>>,
    predicates: HashMap<String, Predicate>,
    active_bundler: RwLock<Option<String>>,
}

impl Default for InsertionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InsertionRegistry {
    /// Creates a registry with the built-in `hmr`, `dev` and `prod`
    /// predicates.
    pub fn new() -> Self {
        let mut predicates: HashMap<String, Predicate> = HashMap::new();
        predicates.insert(
            "hmr".to_string(),
            Box::new(|value, ctx| match value.split_once(':') {
                Some((_, mode)) => ctx.hmr.as_deref() == Some(mode),
                None => ctx.hmr.is_some(),
            }),
        );
        predicates.insert(
            "dev".to_string(),
            Box::new(|_, ctx| ctx.dev),
        );
        predicates.insert(
            "prod".to_string(),
            Box::new(|_, ctx| !ctx.dev),
        );
        Self {
            entries: RwLock::new(HashMap::new()),
            predicates,
            active_bundler: RwLock::new(None),
        }
    }

    /// Declares the bundler in effect for this process. Insertions with a
    /// `bundler` condition only resolve when it matches.
    pub fn set_active_bundler(&self, bundler: impl Into<String>) {
        *self.active_bundler.write().unwrap() = Some(bundler.into());
    }

    /// Registers markup for a slot, optionally guarded by conditions.
    pub fn register(
        &self,
        end: End,
        location: &str,
        markup: impl Into<String>,
        conditions: Option<InsertionConditions>,
    ) {
        self.entries
            .write()
            .unwrap()
            .entry(end.key(location))
            .or_default()
            .push(Insertion {
                markup: markup.into(),
                conditions,
            });
    }

    fn when_matches(tag: &str, when: &[String]) -> bool {
        let tag_base = tag.split(':').next().unwrap_or(tag);
        when.iter()
            .any(|value| value.split(':').next().unwrap_or(value) == tag_base)
    }

    fn predicates_hold(&self, when: &[String], ctx: &InsertionContext) -> bool {
        when.iter().all(|value| {
            let name = value.split(':').next().unwrap_or(value);
            match self.predicates.get(name) {
                Some(predicate) => predicate(value, ctx),
                None => {
                    error!(condition = %value, "unknown insertion condition");
                    false
                }
            }
        })
    }

    fn included(&self, insertion: &Insertion, ctx: &InsertionContext) -> bool {
        let Some(conditions) = &insertion.conditions else {
            // Unconditional entries survive any phase.
            return true;
        };
        if let Some(tag) = &ctx.when {
            match &conditions.when {
                Some(when) if Self::when_matches(tag, when) => {}
                _ => return false,
            }
        }
        if let Some(required) = &conditions.bundler {
            if self.active_bundler.read().unwrap().as_deref() != Some(required.as_str()) {
                return false;
            }
        }
        if let Some(when) = &conditions.when {
            if !self.predicates_hold(when, ctx) {
                return false;
            }
        }
        true
    }

    /// Resolves every insertion registered under the given key against the
    /// context, in registration order.
    pub fn resolve(&self, key: &str, ctx: &InsertionContext) -> Vec<String> {
        let entries = self.entries.read().unwrap();
        let Some(list) = entries.get(key) else {
            return Vec::new();
        };
        list.iter()
            .filter(|insertion| self.included(insertion, ctx))
            .map(|insertion| insertion.markup.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn when(values: &[&str]) -> Option<InsertionConditions> {
        Some(InsertionConditions {
            when: Some(values.iter().map(ToString::to_string).collect()),
            bundler: None,
        })
    }

    #[test]
    fn test_end_keys() {
        assert_eq!(End::Prepend.key("head"), "prepend-head");
        assert_eq!(End::Append.key("body"), "append-body");
    }

    #[test]
    fn test_unconditional_survives_phase_tag() {
        let registry = InsertionRegistry::new();
        registry.register(End::Append, "head", "<meta>", None);

        let ctx = InsertionContext {
            when: Some("hmr:public".to_string()),
            ..Default::default()
        };
        assert_eq!(registry.resolve("append-head", &ctx), vec!["<meta>"]);
    }

    #[test]
    fn test_phase_tag_requires_matching_when() {
        let registry = InsertionRegistry::new();
        registry.register(End::Append, "head", "<a>", when(&["hmr:public"]));
        registry.register(End::Append, "head", "<b>", when(&["dev"]));

        let ctx = InsertionContext {
            when: Some("hmr:public".to_string()),
            hmr: Some("public".to_string()),
            dev: true,
        };
        assert_eq!(registry.resolve("append-head", &ctx), vec!["<a>"]);
    }

    #[test]
    fn test_phase_tag_prefix_match_ignores_suffix() {
        let registry = InsertionRegistry::new();
        registry.register(End::Append, "head", "<a>", when(&["hmr:apos"]));

        // Tag and condition agree on the predicate name even though the
        // suffixes differ. The hmr predicate then checks the suffix.
        let ctx = InsertionContext {
            when: Some("hmr:public".to_string()),
            hmr: Some("apos".to_string()),
            dev: true,
        };
        assert_eq!(registry.resolve("append-head", &ctx), vec!["<a>"]);
    }

    #[test]
    fn test_empty_when_excluded_under_phase_tag() {
        let registry = InsertionRegistry::new();
        registry.register(
            End::Append,
            "head",
            "<a>",
            Some(InsertionConditions {
                when: Some(vec![]),
                bundler: None,
            }),
        );

        let ctx = InsertionContext {
            when: Some("dev".to_string()),
            dev: true,
            ..Default::default()
        };
        assert!(registry.resolve("append-head", &ctx).is_empty());
    }

    #[test]
    fn test_hmr_predicate_checks_mode() {
        let registry = InsertionRegistry::new();
        registry.register(End::Append, "body", "<x>", when(&["hmr:public"]));

        let hit = InsertionContext {
            hmr: Some("public".to_string()),
            dev: true,
            ..Default::default()
        };
        let miss = InsertionContext {
            hmr: Some("apos".to_string()),
            dev: true,
            ..Default::default()
        };
        assert_eq!(registry.resolve("append-body", &hit), vec!["<x>"]);
        assert!(registry.resolve("append-body", &miss).is_empty());
    }

    #[test]
    fn test_bare_hmr_matches_any_mode() {
        let registry = InsertionRegistry::new();
        registry.register(End::Append, "body", "<x>", when(&["hmr"]));

        let ctx = InsertionContext {
            hmr: Some("apos".to_string()),
            dev: true,
            ..Default::default()
        };
        assert_eq!(registry.resolve("append-body", &ctx), vec!["<x>"]);
    }

    #[test]
    fn test_dev_and_prod_predicates() {
        let registry = InsertionRegistry::new();
        registry.register(End::Append, "body", "<d>", when(&["dev"]));
        registry.register(End::Append, "body", "<p>", when(&["prod"]));

        let dev = InsertionContext {
            dev: true,
            ..Default::default()
        };
        let prod = InsertionContext::default();
        assert_eq!(registry.resolve("append-body", &dev), vec!["<d>"]);
        assert_eq!(registry.resolve("append-body", &prod), vec!["<p>"]);
    }

    #[test]
    fn test_all_predicates_must_hold() {
        let registry = InsertionRegistry::new();
        registry.register(End::Append, "body", "<x>", when(&["dev", "hmr"]));

        let no_hmr = InsertionContext {
            dev: true,
            ..Default::default()
        };
        assert!(registry.resolve("append-body", &no_hmr).is_empty());
    }

    #[test]
    fn test_unknown_predicate_fails_closed() {
        let registry = InsertionRegistry::new();
        registry.register(End::Append, "body", "<x>", when(&["webpack"]));

        let ctx = InsertionContext {
            dev: true,
            ..Default::default()
        };
        assert!(registry.resolve("append-body", &ctx).is_empty());
    }

    #[test]
    fn test_bundler_condition() {
        let registry = InsertionRegistry::new();
        registry.set_active_bundler("vite");
        registry.register(
            End::Append,
            "body",
            "<v>",
            Some(InsertionConditions {
                when: None,
                bundler: Some("vite".to_string()),
            }),
        );
        registry.register(
            End::Append,
            "body",
            "<w>",
            Some(InsertionConditions {
                when: None,
                bundler: Some("webpack".to_string()),
            }),
        );

        let ctx = InsertionContext::default();
        assert_eq!(registry.resolve("append-body", &ctx), vec!["<v>"]);
    }

    #[test]
    fn test_registration_order_preserved() {
        let registry = InsertionRegistry::new();
        registry.register(End::Prepend, "head", "<one>", None);
        registry.register(End::Prepend, "head", "<two>", None);

        let ctx = InsertionContext::default();
        assert_eq!(registry.resolve("prepend-head", &ctx), vec!["<one>", "<two>"]);
    }
}
