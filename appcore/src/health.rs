use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;
use tracing::warn;

use crate::error::ProbeError;
use crate::resources::{Dependency, ResourceSet};

/// One failed dependency in an exhaustive probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependencyFailure {
    pub dependency: Dependency,
    pub error: String,
}

/// Aggregate verdict of one health check. Built fresh for every request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthReport {
    pub ok: bool,
    pub service: String,
    pub version: String,
    /// First failing dependency, in probe order.
    pub failed_dependency: Option<Dependency>,
    /// Caller-facing description of the first failure.
    pub message: Option<String>,
    /// Every failure, filled only by exhaustive probes.
    pub failures: Option<Vec<DependencyFailure>>,
}

impl IntoResponse for HealthReport {
    fn into_response(self) -> Response {
        match self.ok {
            true => {
                let body = json!({
                    "service": self.service,
                    "message": "pong",
                    "version": self.version,
                });
                (StatusCode::OK, Json(body)).into_response()
            }
            false => {
                let mut body = json!({
                    "service": self.service,
                    "version": self.version,
                    "error": self.message.unwrap_or_default(),
                });
                if let Some(failures) = self.failures {
                    body["failures"] = json!(failures);
                }
                (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
            }
        }
    }
}

/// Probes the present dependencies of a [`ResourceSet`] in a fixed order:
/// database, cache, broker, then the RPC listener. Probes run one after the
/// other on the calling task.
#[derive(Clone, Debug)]
pub struct HealthAggregator {
    resources: Arc<ResourceSet>,
}

impl HealthAggregator {
    pub fn new(resources: Arc<ResourceSet>) -> Self {
        Self { resources }
    }

    /// Stops at the first failing dependency; later probes are not invoked.
    pub async fn probe(&self) -> HealthReport {
        for (dependency, probe) in self.resources.probes() {
            if let Err(e) = probe.probe().await {
                record_probe(*dependency, Some(&e));
                return self.failed(*dependency, None);
            }
            record_probe(*dependency, None);
        }
        self.healthy()
    }

    /// Runs every probe and reports all failures. The first one still names
    /// the verdict.
    pub async fn probe_all(&self) -> HealthReport {
        let mut failures = Vec::new();
        for (dependency, probe) in self.resources.probes() {
            let result = probe.probe().await;
            record_probe(*dependency, result.as_ref().err());
            if let Err(e) = result {
                failures.push(DependencyFailure {
                    dependency: *dependency,
                    error: e.to_string(),
                });
            }
        }

        match failures.first() {
            None => self.healthy(),
            Some(first) => {
                let dependency = first.dependency;
                self.failed(dependency, Some(failures))
            }
        }
    }

    fn healthy(&self) -> HealthReport {
        let info = self.resources.info();
        HealthReport {
            ok: true,
            service: info.name.clone(),
            version: info.version.clone(),
            failed_dependency: None,
            message: None,
            failures: None,
        }
    }

    fn failed(
        &self,
        dependency: Dependency,
        failures: Option<Vec<DependencyFailure>>,
    ) -> HealthReport {
        let info = self.resources.info();
        HealthReport {
            ok: false,
            service: info.name.clone(),
            version: info.version.clone(),
            failed_dependency: Some(dependency),
            message: Some(dependency.failure_message().to_owned()),
            failures,
        }
    }
}

fn record_probe(dependency: Dependency, error: Option<&ProbeError>) {
    let outcome = match error {
        None => "success",
        Some(e) => {
            warn!(%dependency, error = %e, "health probe failed");
            "failure"
        }
    };
    metrics::counter!(
        "health_check_total",
        "dependency" => dependency.as_str(),
        "outcome" => outcome
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use crate::resources::mock::MockResource;
    use crate::ServiceInfo;

    use super::*;

    struct Mocks {
        database: MockResource,
        cache: MockResource,
        broker: MockResource,
        grpc: MockResource,
    }

    impl Mocks {
        fn healthy() -> Self {
            Self {
                database: MockResource::healthy(),
                cache: MockResource::healthy(),
                broker: MockResource::healthy(),
                grpc: MockResource::healthy(),
            }
        }

        /// Wires the mocks selected by `mask` (bit 0 database .. bit 3 grpc).
        fn aggregator(&self, mask: u8) -> HealthAggregator {
            let mut builder = ResourceSet::builder(ServiceInfo::new("orders", "1.2.0"));
            if mask & 0b0001 != 0 {
                builder = builder.database(Arc::new(self.database.clone()));
            }
            if mask & 0b0010 != 0 {
                builder = builder.cache(Arc::new(self.cache.clone()));
            }
            if mask & 0b0100 != 0 {
                builder = builder.broker(Arc::new(self.broker.clone()));
            }
            if mask & 0b1000 != 0 {
                builder = builder.grpc(Arc::new(self.grpc.clone()));
            }
            HealthAggregator::new(Arc::new(builder.build()))
        }

        fn calls(&self) -> [usize; 4] {
            [
                self.database.probe_calls(),
                self.cache.probe_calls(),
                self.broker.probe_calls(),
                self.grpc.probe_calls(),
            ]
        }
    }

    #[tokio::test]
    async fn only_present_dependencies_are_probed() {
        for mask in 0u8..16 {
            let mocks = Mocks::healthy();

            let report = mocks.aggregator(mask).probe().await;

            assert!(report.ok, "mask {mask:04b}");
            let expected: Vec<usize> = (0..4).map(|bit| usize::from(mask >> bit & 1)).collect();
            assert_eq!(mocks.calls().to_vec(), expected, "mask {mask:04b}");
        }
    }

    #[tokio::test]
    async fn healthy_report_carries_identity() {
        let report = Mocks::healthy().aggregator(0).probe().await;

        assert_eq!(
            report,
            HealthReport {
                ok: true,
                service: "orders".to_owned(),
                version: "1.2.0".to_owned(),
                failed_dependency: None,
                message: None,
                failures: None,
            }
        );
    }

    #[tokio::test]
    async fn first_failure_short_circuits() {
        let mut mocks = Mocks::healthy();
        mocks.cache = MockResource::unreachable();
        mocks.broker = MockResource::unreachable();

        let report = mocks.aggregator(0b1111).probe().await;

        assert!(!report.ok);
        assert_eq!(report.failed_dependency, Some(Dependency::Cache));
        assert_eq!(report.message.as_deref(), Some("cannot ping to cache service"));
        assert_eq!(mocks.calls(), [1, 1, 0, 0]);
    }

    #[tokio::test]
    async fn failing_rpc_listener_is_named_grpc() {
        let mut mocks = Mocks::healthy();
        mocks.grpc = MockResource::healthy()
            .probe_ret(Err(ProbeError::NotServing("NOT_SERVING".to_owned())));

        let report = mocks.aggregator(0b1001).probe().await;

        assert_eq!(report.failed_dependency, Some(Dependency::Grpc));
        assert_eq!(report.message.as_deref(), Some("cannot ping to GRPC service"));
    }

    #[tokio::test]
    async fn exhaustive_probe_reports_every_failure() {
        let mut mocks = Mocks::healthy();
        mocks.database = MockResource::unreachable();
        mocks.broker = MockResource::healthy().probe_ret(Err(ProbeError::Closed));

        let report = mocks.aggregator(0b0111).probe_all().await;

        assert_eq!(report.failed_dependency, Some(Dependency::Database));
        assert_eq!(mocks.calls(), [1, 1, 1, 0]);
        let failed: Vec<Dependency> = report
            .failures
            .unwrap()
            .into_iter()
            .map(|f| f.dependency)
            .collect();
        assert_eq!(failed, vec![Dependency::Database, Dependency::Broker]);
    }

    #[tokio::test]
    async fn failed_report_renders_500_body() {
        let mut mocks = Mocks::healthy();
        mocks.database = MockResource::unreachable();

        let response = mocks.aggregator(0b0001).probe().await.into_response();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(
            body,
            json!({
                "service": "orders",
                "version": "1.2.0",
                "error": "cannot ping to database service",
            })
        );
    }
}
