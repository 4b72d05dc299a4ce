use appcore::error::{CloseError, ShutdownError};
use appcore::resources::mock::MockResource;
use appcore::resources::Dependency;

use crate::common::*;

pub mod common;

#[tokio::test]
async fn stop_closes_every_resource_once_even_after_a_failure() {
    let database = MockResource::healthy().close_ret(Err(CloseError::Failed(
        "pool already closed".to_owned(),
    )));
    let cache = MockResource::healthy();
    let broker = MockResource::healthy().close_ret(Err(CloseError::Timeout(
        std::time::Duration::from_secs(5),
    )));
    let server = ServerHandle::dual(TestResources {
        database: Some(database.clone()),
        cache: Some(cache.clone()),
        broker: Some(broker.clone()),
    })
    .await;

    let report = server.stop().await;

    assert_eq!(database.close_calls(), 1);
    assert_eq!(broker.close_calls(), 1);
    assert_eq!(cache.close_calls(), 1);
    let failed: Vec<Dependency> = report
        .errors
        .iter()
        .filter_map(|e| match e {
            ShutdownError::Close { dependency, .. } => Some(*dependency),
            _ => None,
        })
        .collect();
    assert_eq!(failed, vec![Dependency::Database, Dependency::Broker]);
}

#[tokio::test]
async fn listeners_stop_accepting_after_stop() {
    let server = ServerHandle::single(TestResources::default()).await;
    let addr = server.addr;

    assert!(server.stop().await.is_clean());

    let res = reqwest::Client::new()
        .get(format!("http://{}/api/ping", addr))
        .send()
        .await;
    assert!(res.is_err());
}
