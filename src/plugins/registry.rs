//! Plugin registration.
//!
//! [`PluginRegistry`] collects descriptors, resolves them into a
//! [`RegistrationOrder`], then [`install`](PluginRegistry::install)s them one
//! by one. Each plugin runs its registration function against a
//! [`PluginContext`] bound to a fresh child [`Scope`]; the routes it adds are
//! wrapped with the request hooks of its whole lineage and merged into one
//! router.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::Request;
use axum::handler::Handler;
use axum::http::Method;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{on, MethodFilter};
use axum::Router;
use serde_json::Value;

use crate::config::ServiceConfig;
use crate::http::health::{LIVENESS_PATH, READINESS_PATH};
use crate::plugins::descriptor::PluginDescriptor;
use crate::plugins::error::{PluginDependencyError, PluginError};
use crate::plugins::graph::{resolve, RegistrationOrder};
use crate::plugins::route::{check_path, join_path, route_shape, RouteDescription, RouteSchema};
use crate::plugins::scope::{facility_name, RequestHook, Scope};

/// Descriptors awaiting resolution, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct PluginRegistry {
    descriptors: Vec<PluginDescriptor>,
}

impl PluginRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a plugin.
    ///
    /// # Errors
    ///
    /// Returns [`PluginDependencyError::Duplicate`] if a plugin with the same
    /// name was already added.
    pub fn add(&mut self, descriptor: PluginDescriptor) -> Result<(), PluginDependencyError> {
        if self.get(descriptor.name()).is_some() {
            return Err(PluginDependencyError::Duplicate {
                name: descriptor.name().to_string(),
            });
        }
        self.descriptors.push(descriptor);
        Ok(())
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&PluginDescriptor> {
        self.descriptors.iter().find(|d| d.name() == name)
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Compute the order plugins must be registered in.
    pub fn register(&self) -> Result<RegistrationOrder, PluginDependencyError> {
        resolve(self.descriptors.clone())
    }

    /// Register every plugin of `order` beneath `root`.
    ///
    /// Stops at the first plugin whose options factory or registration
    /// function fails; nothing from a failed installation is served.
    pub fn install(
        order: &RegistrationOrder,
        root: Arc<Scope>,
        config: &ServiceConfig,
    ) -> Result<InstalledPlugins, PluginError> {
        let mut scopes: HashMap<String, Arc<Scope>> = HashMap::new();
        let mut installed = InstalledPlugins {
            router: Router::new(),
            scopes: Vec::with_capacity(order.len()),
            routes: Vec::new(),
        };
        let mut claims = RouteClaims::with_health_routes();

        for descriptor in order.iter() {
            let parents = if descriptor.dependencies().is_empty() {
                vec![Arc::clone(&root)]
            } else {
                descriptor
                    .dependencies()
                    .iter()
                    .filter_map(|dep| scopes.get(dep).cloned())
                    .collect()
            };
            let mut scope = Scope::child(descriptor.name(), parents);

            let options = match descriptor.options_factory() {
                Some(factory) => {
                    factory(&scope, config).map_err(|message| PluginError::Options {
                        plugin: descriptor.name().to_string(),
                        message,
                    })?
                }
                None => Value::Null,
            };

            let mut ctx = PluginContext {
                plugin: descriptor.name(),
                prefix: descriptor.route_prefix(),
                scope: &mut scope,
                config,
                options: &options,
                router: Router::new(),
                route_count: 0,
                routes: Vec::new(),
                claims: &mut claims,
            };
            (descriptor.register_fn())(&mut ctx)?;

            let PluginContext {
                router,
                route_count,
                routes,
                ..
            } = ctx;

            let scope = Arc::new(scope);
            let router = if route_count > 0 {
                with_hooks(router, scope.lineage_hooks())
            } else {
                router
            };

            tracing::info!(
                plugin = descriptor.name(),
                dependencies = ?descriptor.dependencies(),
                routes = route_count,
                "Plugin registered"
            );

            installed.router = installed.router.merge(router);
            installed.routes.extend(routes);
            installed.scopes.push(Arc::clone(&scope));
            scopes.insert(descriptor.name().to_string(), scope);
        }

        Ok(installed)
    }
}

/// Owner recorded for the built-in health endpoints.
const HEALTH_OWNER: &str = "health";

/// Method and path claims across every plugin, keyed by route shape.
struct RouteClaims {
    owners: HashMap<(String, String), String>,
    /// First declared spelling of each shape, with its owner.
    spellings: HashMap<String, (String, String)>,
}

impl RouteClaims {
    fn with_health_routes() -> Self {
        let mut claims = Self {
            owners: HashMap::new(),
            spellings: HashMap::new(),
        };
        for path in [READINESS_PATH, LIVENESS_PATH] {
            claims.insert(&Method::GET, path, HEALTH_OWNER);
        }
        claims
    }

    fn claim(&mut self, plugin: &str, method: &Method, path: &str) -> Result<(), PluginError> {
        let shape = route_shape(path);
        if let Some(owner) = self.owners.get(&(method.to_string(), shape.clone())) {
            return Err(PluginError::RouteConflict {
                plugin: plugin.to_string(),
                method: method.to_string(),
                path: path.to_string(),
                owner: owner.clone(),
            });
        }
        if let Some((declared, owner)) = self.spellings.get(&shape) {
            if declared != path {
                return Err(PluginError::InvalidRoute {
                    plugin: plugin.to_string(),
                    path: path.to_string(),
                    reason: format!(
                        "captures must be named as in `{declared}`, registered by '{owner}'"
                    ),
                });
            }
        }
        self.insert(method, path, plugin);
        Ok(())
    }

    fn insert(&mut self, method: &Method, path: &str, owner: &str) {
        let shape = route_shape(path);
        self.spellings
            .entry(shape.clone())
            .or_insert_with(|| (path.to_string(), owner.to_string()));
        self.owners
            .insert((method.to_string(), shape), owner.to_string());
    }
}

fn with_hooks(router: Router, hooks: Vec<RequestHook>) -> Router {
    if hooks.is_empty() {
        return router;
    }
    let hooks = Arc::new(hooks);
    router.route_layer(middleware::from_fn(
        move |mut request: Request, next: Next| {
            let hooks = Arc::clone(&hooks);
            async move {
                for hook in hooks.iter() {
                    if let Err(response) = hook(&mut request) {
                        return response;
                    }
                }
                next.run(request).await
            }
        },
    ))
}

/// Result of installing a [`RegistrationOrder`].
#[derive(Debug)]
pub struct InstalledPlugins {
    pub router: Router,
    /// Plugin scopes in registration order.
    pub scopes: Vec<Arc<Scope>>,
    pub routes: Vec<RouteDescription>,
}

impl InstalledPlugins {
    pub fn scope(&self, plugin: &str) -> Option<&Arc<Scope>> {
        self.scopes.iter().find(|s| s.plugin() == plugin)
    }
}

/// What a registration function sees.
pub struct PluginContext<'a> {
    plugin: &'a str,
    prefix: Option<&'a str>,
    scope: &'a mut Scope,
    config: &'a ServiceConfig,
    options: &'a Value,
    router: Router,
    route_count: usize,
    routes: Vec<RouteDescription>,
    claims: &'a mut RouteClaims,
}

impl<'a> PluginContext<'a> {
    pub fn name(&self) -> &str {
        self.plugin
    }

    pub fn config(&self) -> &ServiceConfig {
        self.config
    }

    /// Options produced by the descriptor's factory, or `Null`.
    pub fn options(&self) -> &Value {
        self.options
    }

    /// Share `value` with this plugin's dependents.
    pub fn decorate<T: Any + Send + Sync>(&mut self, value: T) -> Result<(), PluginError> {
        if self.scope.decorate(value) {
            Ok(())
        } else {
            Err(PluginError::AlreadyDecorated {
                plugin: self.plugin.to_string(),
                facility: facility_name::<T>(),
            })
        }
    }

    pub fn get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.scope.get::<T>()
    }

    /// Like [`get`](Self::get), failing registration when no ancestor
    /// provides a `T`.
    pub fn require<T: Any + Send + Sync>(&self) -> Result<Arc<T>, PluginError> {
        self.get::<T>().ok_or_else(|| PluginError::MissingFacility {
            plugin: self.plugin.to_string(),
            facility: facility_name::<T>(),
        })
    }

    /// Run `hook` before every route of this plugin and of its dependents.
    pub fn add_hook<F>(&mut self, hook: F)
    where
        F: Fn(&mut Request) -> Result<(), Response> + Send + Sync + 'static,
    {
        self.scope.add_hook(Arc::new(hook));
    }

    /// Serve `handler` for `method` on `path` (relative to the plugin prefix).
    ///
    /// # Errors
    ///
    /// Fails when `schema` describes no response, the path cannot be routed,
    /// or the same method and path (up to capture names) is already claimed
    /// by another plugin or by the health endpoints.
    pub fn route<H, T>(
        &mut self,
        method: Method,
        path: &str,
        schema: RouteSchema,
        handler: H,
    ) -> Result<(), PluginError>
    where
        H: Handler<T, ()>,
        T: 'static,
    {
        let full_path = join_path(self.prefix, path);
        if schema.responses.is_empty() {
            return Err(PluginError::MissingSchema {
                plugin: self.plugin.to_string(),
                method: method.to_string(),
                path: full_path,
            });
        }
        check_path(&full_path).map_err(|reason| self.invalid_route(&full_path, reason))?;
        let filter = MethodFilter::try_from(method.clone())
            .map_err(|err| self.invalid_route(&full_path, err.to_string()))?;

        self.claims.claim(self.plugin, &method, &full_path)?;

        let router = std::mem::take(&mut self.router);
        self.router = router.route(&full_path, on(filter, handler));
        self.route_count += 1;

        tracing::debug!(plugin = self.plugin, %method, path = %full_path, "Route added");
        self.routes.push(RouteDescription {
            plugin: self.plugin.to_string(),
            method: method.to_string(),
            path: full_path,
            schema,
        });
        Ok(())
    }

    fn invalid_route(&self, path: &str, reason: String) -> PluginError {
        PluginError::InvalidRoute {
            plugin: self.plugin.to_string(),
            path: path.to_string(),
            reason,
        }
    }
}
