use std::fmt;
use std::net::SocketAddr;

use async_trait::async_trait;
use axum::Router;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::service::Routes;
use tonic::transport::Server;
use tonic_health::server::{health_reporter, HealthReporter};
use tonic_health::ServingStatus;
use tracing::{error, info};

use crate::error::{ConstructionError, ListenerError, ShutdownError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListenerKind {
    Api,
    Rpc,
}

impl fmt::Display for ListenerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenerKind::Api => f.write_str("api"),
            ListenerKind::Rpc => f.write_str("grpc"),
        }
    }
}

/// Start/stop capability of one network listener. The socket is already bound
/// when the listener is constructed; `start` only launches the serve loop.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Listener: Send {
    fn kind(&self) -> ListenerKind;

    fn local_addr(&self) -> SocketAddr;

    /// Spawns the serve loop and returns without waiting for it.
    async fn start(&mut self) -> Result<(), ListenerError>;

    /// Stops accepting, then waits for in-flight requests until `deadline`.
    async fn shutdown(&mut self, deadline: Instant) -> Result<(), ShutdownError>;
}

async fn bind_tcp(kind: ListenerKind, addr: SocketAddr) -> Result<TcpListener, ConstructionError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| ConstructionError::Bind {
            listener: kind,
            addr,
            source,
        })
}

fn local_addr_of(
    kind: ListenerKind,
    addr: SocketAddr,
    listener: &TcpListener,
) -> Result<SocketAddr, ConstructionError> {
    listener
        .local_addr()
        .map_err(|source| ConstructionError::Bind {
            listener: kind,
            addr,
            source,
        })
}

enum ServeState<T> {
    Bound(T),
    Serving(JoinHandle<Result<(), String>>),
    Stopped,
}

/// Waits for the serve task until `deadline`, aborting it when the deadline passes.
async fn join_until(
    kind: ListenerKind,
    mut task: JoinHandle<Result<(), String>>,
    deadline: Instant,
) -> Result<(), ShutdownError> {
    match tokio::time::timeout_at(deadline, &mut task).await {
        Ok(Ok(Ok(()))) => {
            info!(listener = %kind, "listener drained");
            Ok(())
        }
        Ok(Ok(Err(reason))) => Err(ShutdownError::Listener {
            listener: kind,
            reason,
        }),
        Ok(Err(join_error)) => Err(ShutdownError::Listener {
            listener: kind,
            reason: join_error.to_string(),
        }),
        Err(_) => {
            task.abort();
            Err(ShutdownError::Deadline { listener: kind })
        }
    }
}

/// The primary HTTP listener serving an axum router.
pub struct ApiListener {
    addr: SocketAddr,
    shutdown: CancellationToken,
    state: ServeState<(TcpListener, Router)>,
}

impl ApiListener {
    pub async fn bind(addr: SocketAddr, router: Router) -> Result<Self, ConstructionError> {
        let listener = bind_tcp(ListenerKind::Api, addr).await?;
        let addr = local_addr_of(ListenerKind::Api, addr, &listener)?;

        Ok(Self {
            addr,
            shutdown: CancellationToken::new(),
            state: ServeState::Bound((listener, router)),
        })
    }
}

#[async_trait]
impl Listener for ApiListener {
    fn kind(&self) -> ListenerKind {
        ListenerKind::Api
    }

    fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    async fn start(&mut self) -> Result<(), ListenerError> {
        let (listener, router) = match std::mem::replace(&mut self.state, ServeState::Stopped) {
            ServeState::Bound(bound) => bound,
            other => {
                self.state = other;
                return Err(ListenerError::AlreadyStarted(ListenerKind::Api));
            }
        };

        let token = self.shutdown.clone();
        let task = tokio::spawn(async move {
            axum::serve(
                listener,
                router.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await
            .map_err(|e| {
                error!("api listener failed: {}", e);
                e.to_string()
            })
        });
        info!(listener = %ListenerKind::Api, address = %self.addr, "listening");

        self.state = ServeState::Serving(task);
        Ok(())
    }

    async fn shutdown(&mut self, deadline: Instant) -> Result<(), ShutdownError> {
        self.shutdown.cancel();
        match std::mem::replace(&mut self.state, ServeState::Stopped) {
            ServeState::Serving(task) => join_until(ListenerKind::Api, task, deadline).await,
            ServeState::Bound(_) | ServeState::Stopped => Ok(()),
        }
    }
}

/// The secondary tonic listener. It always carries `grpc.health.v1.Health`
/// next to the module's own services.
pub struct RpcListener {
    addr: SocketAddr,
    shutdown: CancellationToken,
    reporter: Option<HealthReporter>,
    state: ServeState<(TcpListener, Routes)>,
}

impl RpcListener {
    pub async fn bind(addr: SocketAddr, routes: Routes) -> Result<Self, ConstructionError> {
        let listener = bind_tcp(ListenerKind::Rpc, addr).await?;
        let addr = local_addr_of(ListenerKind::Rpc, addr, &listener)?;

        Ok(Self {
            addr,
            shutdown: CancellationToken::new(),
            reporter: None,
            state: ServeState::Bound((listener, routes)),
        })
    }

    /// Flips the server-wide health status so probes fail before the socket closes.
    async fn mark_not_serving(&mut self) {
        if let Some(reporter) = self.reporter.as_mut() {
            reporter
                .set_service_status("", ServingStatus::NotServing)
                .await;
        }
    }
}

#[async_trait]
impl Listener for RpcListener {
    fn kind(&self) -> ListenerKind {
        ListenerKind::Rpc
    }

    fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    async fn start(&mut self) -> Result<(), ListenerError> {
        let (listener, routes) = match std::mem::replace(&mut self.state, ServeState::Stopped) {
            ServeState::Bound(bound) => bound,
            other => {
                self.state = other;
                return Err(ListenerError::AlreadyStarted(ListenerKind::Rpc));
            }
        };

        // The reporter starts with the server-wide ("") status set to SERVING.
        let (reporter, health_service) = health_reporter();
        let routes = routes.add_service(health_service);

        let token = self.shutdown.clone();
        let task = tokio::spawn(async move {
            Server::builder()
                .add_routes(routes)
                .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
                    token.cancelled().await
                })
                .await
                .map_err(|e| {
                    error!("grpc listener failed: {}", e);
                    e.to_string()
                })
        });
        info!(listener = %ListenerKind::Rpc, address = %self.addr, "listening");

        self.reporter = Some(reporter);
        self.state = ServeState::Serving(task);
        Ok(())
    }

    async fn shutdown(&mut self, deadline: Instant) -> Result<(), ShutdownError> {
        self.mark_not_serving().await;
        self.shutdown.cancel();
        match std::mem::replace(&mut self.state, ServeState::Stopped) {
            ServeState::Serving(task) => join_until(ListenerKind::Rpc, task, deadline).await,
            ServeState::Bound(_) | ServeState::Stopped => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::routing::get;

    use crate::error::ProbeError;
    use crate::resources::grpc::GrpcHealthProbe;
    use crate::resources::Probe;

    use super::*;

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[tokio::test]
    async fn api_listener_reports_the_bound_port() {
        let listener = ApiListener::bind(loopback(), Router::new()).await.unwrap();

        assert_eq!(listener.kind(), ListenerKind::Api);
        assert_ne!(listener.local_addr().port(), 0);
    }

    #[tokio::test]
    async fn binding_a_taken_port_is_a_construction_error() {
        let first = ApiListener::bind(loopback(), Router::new()).await.unwrap();

        let err = ApiListener::bind(first.local_addr(), Router::new())
            .await
            .err()
            .unwrap();

        assert!(matches!(
            err,
            ConstructionError::Bind {
                listener: ListenerKind::Api,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn api_listener_starts_once_and_drains() {
        let router = Router::new().route("/", get(|| async { "ok" }));
        let mut listener = ApiListener::bind(loopback(), router).await.unwrap();

        listener.start().await.unwrap();
        assert_eq!(
            listener.start().await,
            Err(ListenerError::AlreadyStarted(ListenerKind::Api))
        );

        let deadline = Instant::now() + Duration::from_secs(5);
        assert_eq!(listener.shutdown(deadline).await, Ok(()));
    }

    #[tokio::test]
    async fn shutdown_without_start_is_a_no_op() {
        let mut listener = RpcListener::bind(loopback(), Routes::default())
            .await
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(1);
        assert_eq!(listener.shutdown(deadline).await, Ok(()));
    }

    #[tokio::test]
    async fn rpc_health_flips_to_not_serving_on_shutdown() {
        let mut listener = RpcListener::bind(loopback(), Routes::default())
            .await
            .unwrap();
        listener.start().await.unwrap();
        let probe = GrpcHealthProbe::new(listener.local_addr());

        assert_eq!(probe.probe().await, Ok(()));

        listener.mark_not_serving().await;
        assert_eq!(
            probe.probe().await,
            Err(ProbeError::NotServing("NOT_SERVING".to_owned()))
        );

        let deadline = Instant::now() + Duration::from_secs(5);
        assert_eq!(listener.shutdown(deadline).await, Ok(()));
    }
}
