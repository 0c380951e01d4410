//! Errors raised while resolving and registering plugins.

use std::fmt;

use thiserror::Error;

/// Which way dependency resolution failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyErrorKind {
    Cycle,
    Missing,
    Duplicate,
}

/// The declared dependency graph cannot be ordered.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PluginDependencyError {
    /// Some plugins depend on each other, directly or transitively.
    ///
    /// `involved` lists the cycle in traversal order; a self-dependency is a
    /// cycle of one.
    #[error("plugin dependency cycle: {}", CyclePath(.involved))]
    Cycle { involved: Vec<String> },

    /// A plugin names a dependency that no descriptor provides.
    #[error("plugin '{plugin}' depends on '{name}', which is not registered")]
    Missing { plugin: String, name: String },

    /// Two descriptors share a name.
    #[error("plugin '{name}' is declared more than once")]
    Duplicate { name: String },
}

impl PluginDependencyError {
    pub fn kind(&self) -> DependencyErrorKind {
        match self {
            PluginDependencyError::Cycle { .. } => DependencyErrorKind::Cycle,
            PluginDependencyError::Missing { .. } => DependencyErrorKind::Missing,
            PluginDependencyError::Duplicate { .. } => DependencyErrorKind::Duplicate,
        }
    }
}

struct CyclePath<'a>(&'a [String]);

impl fmt::Display for CyclePath<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for name in self.0 {
            write!(f, "{name} -> ")?;
        }
        match self.0.first() {
            Some(first) => write!(f, "{first}"),
            None => Ok(()),
        }
    }
}

/// A plugin failed while registering itself.
#[derive(Debug, Error)]
pub enum PluginError {
    /// The plugin's registration function reported a failure.
    #[error("plugin '{plugin}' failed to register: {message}")]
    Registration { plugin: String, message: String },

    /// The per-instance options factory failed.
    #[error("plugin '{plugin}' options factory failed: {message}")]
    Options { plugin: String, message: String },

    /// A facility the plugin needs is not provided by any ancestor scope.
    #[error("plugin '{plugin}' requires facility `{facility}`, which no ancestor provides")]
    MissingFacility {
        plugin: String,
        facility: &'static str,
    },

    /// The plugin decorated its own scope twice with the same type.
    #[error("plugin '{plugin}' already decorated its scope with `{facility}`")]
    AlreadyDecorated {
        plugin: String,
        facility: &'static str,
    },

    /// A route was added without a response schema.
    #[error("plugin '{plugin}' route {method} {path} declares no response schema")]
    MissingSchema {
        plugin: String,
        method: String,
        path: String,
    },

    /// A route path or method cannot be served.
    #[error("plugin '{plugin}' route {path}: {reason}")]
    InvalidRoute {
        plugin: String,
        path: String,
        reason: String,
    },

    /// Two plugins claimed the same method and path.
    #[error("plugin '{plugin}' route {method} {path} is already registered by '{owner}'")]
    RouteConflict {
        plugin: String,
        method: String,
        path: String,
        owner: String,
    },
}

impl PluginError {
    /// Convenience constructor for registration functions.
    pub fn registration(plugin: impl Into<String>, message: impl fmt::Display) -> Self {
        PluginError::Registration {
            plugin: plugin.into(),
            message: message.to_string(),
        }
    }

    pub fn plugin(&self) -> &str {
        match self {
            PluginError::Registration { plugin, .. }
            | PluginError::Options { plugin, .. }
            | PluginError::MissingFacility { plugin, .. }
            | PluginError::AlreadyDecorated { plugin, .. }
            | PluginError::MissingSchema { plugin, .. }
            | PluginError::InvalidRoute { plugin, .. }
            | PluginError::RouteConflict { plugin, .. } => plugin,
        }
    }
}
