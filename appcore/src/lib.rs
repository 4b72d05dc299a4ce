//! Service kit for network services that sit in front of optional downstream
//! dependencies (database, cache, message broker, object store).
//!
//! The crate owns three pieces of coordination logic:
//!
//! - [`lifecycle::LifecycleOrchestrator`] starts the API listener (and the RPC
//!   listener when the module declares one) and drives a bounded, best-effort
//!   shutdown of listeners and resources.
//! - [`health::HealthAggregator`] answers `GET /api/ping` by probing every
//!   present dependency in a fixed order.
//! - [`circuit_breaker::CircuitBreakerRegistry`] hands out one lazily created
//!   breaker per call-site name.
//!
//! Everything else (route registration, client construction, configuration
//! loading) reaches the core through the narrow capabilities in
//! [`resources`] and [`module`].

pub mod circuit_breaker;
pub mod config;
pub mod error;
pub mod health;
pub mod lifecycle;
pub mod listener;
pub mod metrics;
pub mod module;
pub mod observability;
pub mod pagination;
pub mod resources;
pub mod router;
pub mod service;
pub mod time;

pub use service::{Service, ServiceInfo};
