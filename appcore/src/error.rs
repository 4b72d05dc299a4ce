use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use crate::listener::ListenerKind;
use crate::resources::Dependency;

/// Errors raised before the service accepts traffic. All of them are fatal.
#[derive(Error, Debug)]
pub enum ConstructionError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("failed to bind {listener} listener on {addr}: {source}")]
    Bind {
        listener: ListenerKind,
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot connect to {dependency}: {reason}")]
    Connect {
        dependency: Dependency,
        reason: String,
    },
    #[error("failed to install metrics recorder: {0}")]
    Metrics(String),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("grpc port derived from port {0} is out of range, set GRPC_PORT explicitly")]
    DerivedGrpcPort(u16),
    #[error("{0} must be set when STORAGE_ENDPOINT is set")]
    MissingStorageCredential(&'static str),
}

/// A dependency failed its runtime connectivity check.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProbeError {
    #[error("connectivity check failed: {0}")]
    Unreachable(String),
    #[error("connectivity check timed out after {0:?}")]
    Timeout(Duration),
    #[error("resource is closed")]
    Closed,
    #[error("service reported {0}")]
    NotServing(String),
}

/// A resource failed to release its connections.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CloseError {
    #[error("{0}")]
    Failed(String),
    #[error("close timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ListenerError {
    #[error("{0} listener was already started")]
    AlreadyStarted(ListenerKind),
}

/// One failed step of the shutdown sequence. Never aborts the sequence.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ShutdownError {
    #[error("{listener} listener did not drain before the shutdown deadline")]
    Deadline { listener: ListenerKind },
    #[error("{listener} listener stopped with an error: {reason}")]
    Listener {
        listener: ListenerKind,
        reason: String,
    },
    #[error("failed to close {dependency}: {source}")]
    Close {
        dependency: Dependency,
        #[source]
        source: CloseError,
    },
}

/// Outcome of a call guarded by a circuit breaker.
#[derive(Error, Debug, PartialEq)]
pub enum BreakerError<E> {
    #[error("circuit breaker '{name}' is open")]
    Open { name: String },
    #[error("circuit breaker '{name}' is already running its half-open trial")]
    TooManyRequests { name: String },
    #[error(transparent)]
    Call(E),
}

impl<E> BreakerError<E> {
    /// True when the breaker refused the call without running it.
    pub fn is_rejected(&self) -> bool {
        !matches!(self, BreakerError::Call(_))
    }
}

#[derive(Error, Debug)]
pub enum ObservabilityError {
    #[error("failed to initialize OpenTelemetry tracer: {0}")]
    Tracer(#[from] opentelemetry::trace::TraceError),
    #[error("failed to install tracing subscriber: {0}")]
    Subscriber(#[from] tracing_subscriber::util::TryInitError),
}
