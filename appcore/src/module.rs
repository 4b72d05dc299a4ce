//! What a consuming service plugs into the core.

use std::fmt;
use std::sync::Arc;

use axum::Router;
use tonic::service::Routes;

/// Registers the service's own routes on the primary API router.
pub trait ServiceModule: Send + Sync {
    fn register_routes(&self, router: Router) -> Router;
}

/// Listener shape of a service, fixed at construction.
pub enum ModuleCapability {
    /// HTTP only.
    SingleListener(Arc<dyn ServiceModule>),
    /// HTTP plus a tonic server carrying `rpc`. The core adds the standard
    /// health service to it.
    DualListener {
        module: Arc<dyn ServiceModule>,
        rpc: Routes,
    },
}

impl fmt::Debug for ModuleCapability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModuleCapability::SingleListener(_) => f.write_str("SingleListener"),
            ModuleCapability::DualListener { .. } => f.write_str("DualListener"),
        }
    }
}

/// A module that registers nothing; the service only answers the built-in routes.
#[derive(Clone, Copy, Debug, Default)]
pub struct EmptyModule;

impl ServiceModule for EmptyModule {
    fn register_routes(&self, router: Router) -> Router {
        router
    }
}
