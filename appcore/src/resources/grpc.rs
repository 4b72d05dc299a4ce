use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use tonic::transport::Endpoint;
use tonic_health::pb::health_check_response::ServingStatus;
use tonic_health::pb::health_client::HealthClient;
use tonic_health::pb::HealthCheckRequest;

use crate::error::ProbeError;
use crate::resources::Probe;

const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Round-trip liveness check against our own RPC listener through the
/// standard `grpc.health.v1.Health/Check` call on the server-wide ("") status.
#[derive(Clone, Debug)]
pub struct GrpcHealthProbe {
    uri: String,
    timeout: Duration,
}

impl GrpcHealthProbe {
    pub fn new(addr: SocketAddr) -> Self {
        // A listener bound to 0.0.0.0 is reached through loopback.
        let ip = match addr.ip() {
            ip if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
            ip => ip,
        };
        Self {
            uri: format!("http://{}", SocketAddr::new(ip, addr.port())),
            timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn check(&self) -> Result<(), ProbeError> {
        let channel = Endpoint::from_shared(self.uri.clone())
            .map_err(|e| ProbeError::Unreachable(e.to_string()))?
            .connect()
            .await
            .map_err(|e| ProbeError::Unreachable(e.to_string()))?;

        let response = HealthClient::new(channel)
            .check(HealthCheckRequest {
                service: String::new(),
            })
            .await
            .map_err(|status| ProbeError::Unreachable(status.to_string()))?;

        match response.into_inner().status() {
            ServingStatus::Serving => Ok(()),
            other => Err(ProbeError::NotServing(other.as_str_name().to_owned())),
        }
    }
}

#[async_trait]
impl Probe for GrpcHealthProbe {
    async fn probe(&self) -> Result<(), ProbeError> {
        tokio::time::timeout(self.timeout, self.check())
            .await
            .map_err(|_| ProbeError::Timeout(self.timeout))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unspecified_address_is_dialed_on_loopback() {
        let probe = GrpcHealthProbe::new("0.0.0.0:18000".parse().unwrap());
        assert_eq!(probe.uri, "http://127.0.0.1:18000");
    }

    #[tokio::test]
    async fn nothing_listening_is_unreachable() {
        // Grab a free port, then release it so nothing listens there.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let probe = GrpcHealthProbe::new(addr).with_timeout(Duration::from_secs(2));
        assert!(probe.probe().await.is_err());
    }
}
