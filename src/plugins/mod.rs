//! Plugin subsystem.
//!
//! # Data Flow
//! ```text
//! PluginDescriptor (name, dependencies, register fn, options factory)
//!     → PluginRegistry::add (declaration order, duplicate names rejected)
//!     → graph.rs (depth-first topological order, Cycle/Missing errors)
//!     → RegistrationOrder (immutable)
//!     → PluginRegistry::install
//!         for each plugin: child Scope → options factory → register fn
//!         routes wrapped with lineage hooks → merged into one Router
//! ```
//!
//! # Design Decisions
//! - Plugins are declared explicitly; nothing is discovered from the filesystem
//! - Independent plugins register in declaration order
//! - A plugin's facilities and hooks reach its dependents only
//! - Every route declares its schema at registration; no schema, no route

pub mod descriptor;
pub mod error;
pub mod graph;
pub mod registry;
pub mod route;
pub mod scope;

pub use descriptor::PluginDescriptor;
pub use error::{DependencyErrorKind, PluginDependencyError, PluginError};
pub use graph::{resolve, RegistrationOrder};
pub use registry::{InstalledPlugins, PluginContext, PluginRegistry};
pub use route::{RouteDescription, RouteSchema};
pub use scope::{RequestHook, Scope};
