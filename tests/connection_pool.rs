//! Round-robin dispatch across several mock engines.

mod common;

use serde_json::json;

use common::{no_reply, MockBackend};
use search_gateway::config::{BackendConfig, BackendTarget};
use search_gateway::load_balancer::ConnectionPool;

const TAG: &str = "test";

fn config(backends: &[&MockBackend]) -> BackendConfig {
    BackendConfig {
        tag: TAG.to_string(),
        targets: backends
            .iter()
            .map(|backend| BackendTarget {
                host: "127.0.0.1".to_string(),
                port: backend.port(),
            })
            .collect(),
        ..BackendConfig::default()
    }
}

#[tokio::test]
async fn messages_cycle_through_backends() {
    let first = MockBackend::start(TAG, no_reply()).await;
    let second = MockBackend::start(TAG, no_reply()).await;
    let third = MockBackend::start(TAG, no_reply()).await;
    let pool = ConnectionPool::connect(&config(&[&first, &second, &third])).await.unwrap();
    assert_eq!(pool.len(), 3);

    for n in 0..4 {
        let connection = pool.get().unwrap();
        connection.emit_message("count", json!(n));
    }

    assert_eq!(first.next_request().await.body, json!(0));
    assert_eq!(second.next_request().await.body, json!(1));
    assert_eq!(third.next_request().await.body, json!(2));
    assert_eq!(first.next_request().await.body, json!(3));

    pool.close_all().await;
    for backend in [first, second, third] {
        assert!(backend.drain_requests().await.is_empty());
        backend.close().await;
    }
}

#[tokio::test]
async fn fixed_receive_ports_are_consecutive() {
    let first = MockBackend::start(TAG, no_reply()).await;
    let second = MockBackend::start(TAG, no_reply()).await;

    // find a free pair of ports by binding one and trying the next
    let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let base = probe.local_addr().unwrap().port();
    drop(probe);

    let mut config = config(&[&first, &second]);
    config.receive_port = Some(base);
    let pool = match ConnectionPool::connect(&config).await {
        Ok(pool) => pool,
        // base + 1 happened to be taken
        Err(_) => return,
    };

    let ports: Vec<_> = pool.connections().iter().map(|c| c.receive_port()).collect();
    assert_eq!(ports, vec![Some(base), Some(base + 1)]);
    assert_eq!(pool.connections()[1].reply_to(), format!("127.0.0.1:{}", base + 1));

    pool.close_all().await;
    first.close().await;
    second.close().await;
}

#[tokio::test]
async fn empty_target_list_is_rejected() {
    let config = BackendConfig {
        targets: Vec::new(),
        ..BackendConfig::default()
    };
    assert!(ConnectionPool::connect(&config).await.is_err());
}
