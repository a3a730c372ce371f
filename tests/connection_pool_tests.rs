//! Integration tests for connection pool rotation.
//!
//! Requests must finish on the pool they were dispatched with even when a
//! rotation swaps the pool out while they are still in flight.

use std::time::Duration;

use url::Url;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use traffic_replay::client::ClientConfig;
use traffic_replay::connection_pool::{PoolConfig, PoolManager};
use traffic_replay::executor::execute;

#[tokio::test]
async fn in_flight_request_survives_rotation() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(300)))
        .mount(&server)
        .await;

    let manager = PoolManager::new(ClientConfig::default(), Some(1)).unwrap();
    let target = Url::parse(&server.uri()).unwrap();

    let lease = manager.lease().unwrap();
    let old = manager.current().unwrap();
    let request = tokio::spawn(async move {
        let outcome = execute(lease.client(), target, Duration::from_secs(5)).await;
        (lease.generation(), outcome)
    });

    assert!(manager.rotate_if_due());
    assert_eq!(manager.current().unwrap().generation(), 1);
    assert!(!old.is_closed());

    let (generation, outcome) = request.await.unwrap();
    assert_eq!(generation, 0);
    assert!(outcome.success, "request failed: {:?}", outcome.error_detail);

    manager.close_final().await;
    assert!(old.is_closed());
    assert_eq!(old.requests_served(), 1);

    println!("✅ In-flight request completed on its original pool");
}

#[tokio::test]
async fn rotated_pools_keep_serving() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(204))
        .expect(6)
        .mount(&server)
        .await;

    let config = ClientConfig {
        pool_config: PoolConfig::new()
            .with_max_idle_per_host(4)
            .with_idle_timeout(Duration::from_secs(5)),
        ..ClientConfig::default()
    };
    let manager = PoolManager::new(config, Some(3)).unwrap();

    for _ in 0..6 {
        let lease = manager.lease().unwrap();
        manager.rotate_if_due();
        let outcome = execute(
            lease.client(),
            Url::parse(&server.uri()).unwrap(),
            Duration::from_secs(5),
        )
        .await;
        assert!(outcome.success);
    }

    assert_eq!(manager.rotations(), 2);
    assert_eq!(manager.current().unwrap().generation(), 2);
    manager.close_final().await;
}

#[tokio::test]
async fn closed_pool_serves_no_more_requests() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let manager = PoolManager::new(ClientConfig::default(), None).unwrap();
    let handle = manager.current().unwrap();

    let lease = manager.lease().unwrap();
    let outcome = execute(
        lease.client(),
        Url::parse(&server.uri()).unwrap(),
        Duration::from_secs(5),
    )
    .await;
    assert!(outcome.success);
    drop(lease);

    manager.close_final().await;

    assert!(handle.is_closed());
    assert!(manager.current().is_none());
    assert!(manager.lease().is_none(), "closed manager handed out a client");
    assert!(handle.lease().is_none(), "closed pool handed out a client");
}
