//! Plugin descriptors: what a feature module declares about itself.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::config::ServiceConfig;
use crate::plugins::error::PluginError;
use crate::plugins::registry::PluginContext;
use crate::plugins::scope::Scope;

/// Registration function run once, inside the plugin's own scope.
pub type RegisterFn = Arc<dyn Fn(&mut PluginContext<'_>) -> Result<(), PluginError> + Send + Sync>;

/// Produces per-instance options at registration time.
///
/// Receives the plugin's scope before registration (so ancestor facilities
/// are reachable) and the process configuration.
pub type OptionsFactory =
    Arc<dyn Fn(&Scope, &ServiceConfig) -> Result<Value, String> + Send + Sync>;

/// A feature module and the plugins it must be registered after.
#[derive(Clone)]
pub struct PluginDescriptor {
    name: String,
    dependencies: Vec<String>,
    prefix: Option<String>,
    register: RegisterFn,
    options: Option<OptionsFactory>,
}

impl PluginDescriptor {
    pub fn new<F>(name: impl Into<String>, register: F) -> Self
    where
        F: Fn(&mut PluginContext<'_>) -> Result<(), PluginError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            dependencies: Vec::new(),
            prefix: None,
            register: Arc::new(register),
            options: None,
        }
    }

    /// Declare a dependency. Repeated names are kept once.
    pub fn depends_on(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if !self.dependencies.contains(&name) {
            self.dependencies.push(name);
        }
        self
    }

    /// Mount every route this plugin adds under `prefix`.
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Attach an options factory evaluated at registration time.
    pub fn with_options<F>(mut self, factory: F) -> Self
    where
        F: Fn(&Scope, &ServiceConfig) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.options = Some(Arc::new(factory));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    pub fn route_prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    pub(crate) fn register_fn(&self) -> &RegisterFn {
        &self.register
    }

    pub(crate) fn options_factory(&self) -> Option<&OptionsFactory> {
        self.options.as_ref()
    }
}

impl fmt::Debug for PluginDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginDescriptor")
            .field("name", &self.name)
            .field("dependencies", &self.dependencies)
            .field("prefix", &self.prefix)
            .field("has_options", &self.options.is_some())
            .finish()
    }
}
