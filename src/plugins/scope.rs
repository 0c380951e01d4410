//! Encapsulation scopes.
//!
//! Every plugin registers inside its own [`Scope`]. A scope's parents are the
//! scopes of the plugin's declared dependencies (or the root scope when it has
//! none), so lookups walk *up* the dependency graph only: a plugin sees what
//! its ancestors installed, never what a sibling or dependent installed.

use std::any::{type_name, Any, TypeId};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use axum::extract::Request;
use axum::response::Response;

/// A synchronous check run before a route handler.
///
/// Returning `Err` short-circuits the request with that response. Hooks may
/// also mutate the request, e.g. to insert extensions for the handler.
pub type RequestHook = Arc<dyn Fn(&mut Request) -> Result<(), Response> + Send + Sync>;

pub const ROOT_SCOPE: &str = "root";

struct Facility {
    type_name: &'static str,
    value: Arc<dyn Any + Send + Sync>,
}

/// Facilities and hooks installed by one plugin, plus links to its ancestors.
pub struct Scope {
    plugin: String,
    facilities: HashMap<TypeId, Facility>,
    hooks: Vec<RequestHook>,
    parents: Vec<Arc<Scope>>,
}

impl Scope {
    /// The scope shared by every plugin, decorated by the orchestrator.
    pub fn root() -> Self {
        Self::child(ROOT_SCOPE, Vec::new())
    }

    pub(crate) fn child(plugin: impl Into<String>, parents: Vec<Arc<Scope>>) -> Self {
        Self {
            plugin: plugin.into(),
            facilities: HashMap::new(),
            hooks: Vec::new(),
            parents,
        }
    }

    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    /// Install `value` in this scope. Returns `false` if this scope already
    /// holds a value of the same type (the existing one is kept).
    pub fn decorate<T: Any + Send + Sync>(&mut self, value: T) -> bool {
        self.decorate_arc(Arc::new(value))
    }

    pub fn decorate_arc<T: Any + Send + Sync>(&mut self, value: Arc<T>) -> bool {
        let id = TypeId::of::<T>();
        if self.facilities.contains_key(&id) {
            return false;
        }
        self.facilities.insert(
            id,
            Facility {
                type_name: type_name::<T>(),
                value,
            },
        );
        true
    }

    /// Find a `T` in this scope or the nearest ancestor that provides one.
    ///
    /// Ancestors are searched depth-first in dependency declaration order.
    pub fn get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        if let Some(facility) = self.facilities.get(&TypeId::of::<T>()) {
            return Arc::clone(&facility.value).downcast::<T>().ok();
        }
        self.parents.iter().find_map(|parent| parent.get::<T>())
    }

    /// Whether this scope itself (ignoring ancestors) holds a `T`.
    pub fn provides<T: Any + Send + Sync>(&self) -> bool {
        self.facilities.contains_key(&TypeId::of::<T>())
    }

    pub(crate) fn add_hook(&mut self, hook: RequestHook) {
        self.hooks.push(hook);
    }

    /// Hooks visible to this scope: every ancestor's first, then its own.
    ///
    /// A shared ancestor reached along several paths contributes once.
    pub fn lineage_hooks(&self) -> Vec<RequestHook> {
        let mut seen = HashSet::new();
        let mut hooks = Vec::new();
        self.collect_hooks(&mut seen, &mut hooks);
        hooks
    }

    fn collect_hooks<'a>(&'a self, seen: &mut HashSet<&'a str>, hooks: &mut Vec<RequestHook>) {
        if !seen.insert(self.plugin.as_str()) {
            return;
        }
        for parent in &self.parents {
            parent.collect_hooks(seen, hooks);
        }
        hooks.extend(self.hooks.iter().cloned());
    }

    /// Names of every scope reachable upwards from this one, including itself.
    pub fn lineage(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut names = Vec::new();
        self.collect_names(&mut seen, &mut names);
        names
    }

    fn collect_names<'a>(&'a self, seen: &mut HashSet<&'a str>, names: &mut Vec<String>) {
        if !seen.insert(self.plugin.as_str()) {
            return;
        }
        for parent in &self.parents {
            parent.collect_names(seen, names);
        }
        names.push(self.plugin.clone());
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let facilities: Vec<_> = self.facilities.values().map(|f| f.type_name).collect();
        let parents: Vec<_> = self.parents.iter().map(|p| p.plugin.as_str()).collect();
        f.debug_struct("Scope")
            .field("plugin", &self.plugin)
            .field("facilities", &facilities)
            .field("hooks", &self.hooks.len())
            .field("parents", &parents)
            .finish()
    }
}

pub(crate) fn facility_name<T>() -> &'static str {
    type_name::<T>()
}
