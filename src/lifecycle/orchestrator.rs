//! Startup sequence and the handle to the running service.

use std::future::Future;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use tokio::net::TcpListener;

use crate::admission::{AdmissionController, HealthProbe, ProcessProbe};
use crate::config::{load_config, DatabaseConfig, EnvironmentSource, ServiceConfig};
use crate::database::{MigrationStore, ResourcePool, StoreError};
use crate::error::StartupError;
use crate::http::{HttpServer, InFlightTracker};
use crate::lifecycle::resources::PoolResource;
use crate::lifecycle::shutdown::{Shutdown, ShutdownCoordinator, ShutdownReport};
use crate::lifecycle::signals::spawn_signal_listener;
use crate::lifecycle::state::{Lifecycle, LifecycleState};
use crate::migration::{MigrationRecord, MigrationRunner};
use crate::plugins::{PluginDescriptor, PluginRegistry, RouteDescription, Scope};

/// Composes configuration, pool, migrations, plugins, admission control and
/// the listener into one lifecycle.
pub struct Orchestrator {
    config: Arc<ServiceConfig>,
    registry: PluginRegistry,
    lifecycle: Lifecycle,
    shutdown: Shutdown,
    probe: Option<Arc<dyn HealthProbe>>,
}

impl Orchestrator {
    pub fn new(config: ServiceConfig) -> Self {
        Self {
            config: Arc::new(config),
            registry: PluginRegistry::new(),
            lifecycle: Lifecycle::new(),
            shutdown: Shutdown::new(),
            probe: None,
        }
    }

    /// Load and validate configuration from `source`.
    pub fn from_env<S: EnvironmentSource + ?Sized>(source: &S) -> Result<Self, StartupError> {
        Ok(Self::new(load_config(source)?))
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Declare a plugin. Order of declaration breaks ties between
    /// independent plugins.
    pub fn plugin(&mut self, descriptor: PluginDescriptor) -> Result<&mut Self, StartupError> {
        self.registry.add(descriptor)?;
        Ok(self)
    }

    /// Replace the process probe feeding admission control.
    pub fn with_probe(mut self, probe: Arc<dyn HealthProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle.clone()
    }

    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Run the whole lifecycle: start, serve until SIGINT/SIGTERM, shut down.
    pub async fn run<D, F, Fut>(self, connect: F) -> Result<ShutdownReport, StartupError>
    where
        D: ResourcePool + MigrationStore + 'static,
        F: FnOnce(DatabaseConfig) -> Fut,
        Fut: Future<Output = Result<D, StoreError>>,
    {
        let _signals = spawn_signal_listener(self.shutdown.clone());
        let service = self.start(connect).await?;
        Ok(service.wait().await)
    }

    /// Bring the service up to `Running`.
    ///
    /// Migrations complete before the listener is bound; any failure closes
    /// the pool and is returned without serving a single request.
    pub async fn start<D, F, Fut>(self, connect: F) -> Result<RunningService, StartupError>
    where
        D: ResourcePool + MigrationStore + 'static,
        F: FnOnce(DatabaseConfig) -> Fut,
        Fut: Future<Output = Result<D, StoreError>>,
    {
        tracing::info!(
            version = env!("CARGO_PKG_VERSION"),
            address = %self.config.listener.bind_address(),
            plugins = self.registry.len(),
            "Service starting"
        );

        let database = Arc::new(
            connect(self.config.database.clone())
                .await
                .map_err(StartupError::Pool)?,
        );
        let pool: Arc<dyn ResourcePool> = database.clone();

        match self.bring_up(Arc::clone(&database), Arc::clone(&pool)).await {
            Ok(service) => Ok(service),
            Err(err) => {
                tracing::error!(error = %err, "Startup failed; closing resource pool");
                pool.close().await;
                Err(err)
            }
        }
    }

    async fn bring_up<D>(
        self,
        database: Arc<D>,
        pool: Arc<dyn ResourcePool>,
    ) -> Result<RunningService, StartupError>
    where
        D: ResourcePool + MigrationStore + 'static,
    {
        let Orchestrator {
            config,
            registry,
            lifecycle,
            shutdown,
            probe,
        } = self;

        pool.health_check().await.map_err(StartupError::Pool)?;

        let store: Arc<dyn MigrationStore> = database.clone();
        let applied_migrations = MigrationRunner::new(store)
            .run(&config.migrations.dir)
            .await?;

        let order = registry.register()?;
        tracing::info!(order = ?order.names(), "Plugin order resolved");

        let mut root = Scope::root();
        root.decorate_arc(database);
        root.decorate_arc(Arc::clone(&config));
        let installed = PluginRegistry::install(&order, Arc::new(root), &config)?;

        let address = config.listener.bind_address();
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|source| StartupError::Bind {
                address: address.clone(),
                source,
            })?;

        let inflight = InFlightTracker::new();
        let admission = Arc::new(AdmissionController::new(&config.admission));
        let mut coordinator = ShutdownCoordinator::new(
            &config.shutdown,
            lifecycle.clone(),
            shutdown.clone(),
            inflight.clone(),
        );
        coordinator.push(Box::new(PoolResource::new(Arc::clone(&pool))));

        if admission.is_enabled() {
            let probe: Arc<dyn HealthProbe> = match probe {
                Some(probe) => probe,
                None => Arc::new(ProcessProbe::new(Some(pool))),
            };
            coordinator.push(Box::new(admission.spawn_sampler(probe)));
        } else {
            tracing::info!("Admission control disabled");
        }

        let server = HttpServer::new(
            &config.listener,
            installed.router,
            Arc::clone(&admission),
            lifecycle.clone(),
            inflight.clone(),
        );
        let handle = server
            .spawn(listener)
            .map_err(|source| StartupError::Bind { address, source })?;
        let local_addr = handle.local_addr();
        coordinator.push(Box::new(handle));

        lifecycle.advance(LifecycleState::Running);
        tracing::info!(
            address = %local_addr,
            migrations_applied = applied_migrations.len(),
            routes = installed.routes.len(),
            "Service ready"
        );

        Ok(RunningService {
            local_addr,
            lifecycle,
            shutdown,
            admission,
            inflight,
            routes: installed.routes,
            applied_migrations,
            coordinator,
        })
    }
}

/// A service in `Running`, waiting for a termination request.
pub struct RunningService {
    local_addr: SocketAddr,
    lifecycle: Lifecycle,
    shutdown: Shutdown,
    admission: Arc<AdmissionController>,
    inflight: InFlightTracker,
    routes: Vec<RouteDescription>,
    applied_migrations: Vec<MigrationRecord>,
    coordinator: ShutdownCoordinator,
}

impl RunningService {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    pub fn admission(&self) -> &Arc<AdmissionController> {
        &self.admission
    }

    pub fn inflight(&self) -> &InFlightTracker {
        &self.inflight
    }

    pub fn routes(&self) -> &[RouteDescription] {
        &self.routes
    }

    /// Migrations applied during this startup.
    pub fn applied_migrations(&self) -> &[MigrationRecord] {
        &self.applied_migrations
    }

    /// Serve until shutdown is triggered, then run the shutdown sequence.
    pub async fn wait(self) -> ShutdownReport {
        self.shutdown.triggered(1).await;
        self.coordinator.run().await
    }

    /// Trigger shutdown and run it to completion.
    pub async fn stop(self) -> ShutdownReport {
        self.shutdown.trigger();
        self.wait().await
    }
}

/// Apply pending migrations without starting the service.
pub async fn migrate<D, F, Fut>(
    config: &ServiceConfig,
    dir: &Path,
    connect: F,
) -> Result<Vec<MigrationRecord>, StartupError>
where
    D: ResourcePool + MigrationStore + 'static,
    F: FnOnce(DatabaseConfig) -> Fut,
    Fut: Future<Output = Result<D, StoreError>>,
{
    let database = Arc::new(
        connect(config.database.clone())
            .await
            .map_err(StartupError::Pool)?,
    );
    let store: Arc<dyn MigrationStore> = database.clone();
    let result = MigrationRunner::new(store).run(dir).await;
    database.close().await;
    Ok(result?)
}
