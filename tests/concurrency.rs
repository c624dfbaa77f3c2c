//! Concurrency tests for the server.
//!
//! Tests echo ordering, admission accounting and callback ordering under
//! concurrent clients.

mod harness;

use harness::{TestClient, TestServer};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Barrier;
use tokio::task::JoinSet;
use wsgate::ServerConfig;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_multiple_clients_sequential() {
    let server = TestServer::spawn().await;

    for i in 0..10 {
        let mut client = TestClient::open(server.addr, &[]).await.unwrap();
        let msg = format!("hello from client {i}");
        client.send_text(&msg).await.unwrap();
        let response = client.recv_text().await.unwrap();
        assert_eq!(response, Some(format!("Echo: {msg}")));
        assert_eq!(client.close(1000).await.unwrap(), Some(1000));
    }

    server
        .wait_for(|events| events.iter().filter(|e| e.starts_with("disconnect")).count() == 10)
        .await;
    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_message_ordering() {
    const NUM_CLIENTS: usize = 20;
    const MESSAGES_PER_CLIENT: usize = 50;

    let server = TestServer::spawn().await;
    let addr = server.addr;
    let ordering_violations = Arc::new(AtomicUsize::new(0));

    let mut set = JoinSet::new();

    for client_id in 0..NUM_CLIENTS {
        let violations = ordering_violations.clone();

        set.spawn(async move {
            let mut client = TestClient::open(addr, &[]).await.unwrap();

            for seq in 0..MESSAGES_PER_CLIENT {
                let msg = format!("client:{client_id}:msg:{seq}");
                client.send_text(&msg).await.unwrap();

                let response = client.recv_text().await.unwrap().unwrap();
                if response != format!("Echo: {msg}") {
                    violations.fetch_add(1, Ordering::Relaxed);
                }
            }

            client.close(1000).await.unwrap();
        });
    }

    while let Some(result) = set.join_next().await {
        result.unwrap();
    }

    let violation_count = ordering_violations.load(Ordering::Relaxed);
    assert_eq!(violation_count, 0, "Message ordering violations detected");

    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_global_limit_under_concurrent_connects() {
    const NUM_CLIENTS: usize = 20;
    const MAX_CONNECTIONS: usize = 5;

    let config = ServerConfig::default()
        .with_security(true)
        .with_max_connections(MAX_CONNECTIONS)
        .with_max_connections_per_ip(NUM_CLIENTS)
        .with_max_connections_per_minute(NUM_CLIENTS);
    let server = TestServer::spawn_with(config).await;
    let addr = server.addr;
    let barrier = Arc::new(Barrier::new(NUM_CLIENTS));
    let opened = Arc::new(AtomicUsize::new(0));

    let mut set = JoinSet::new();
    for _ in 0..NUM_CLIENTS {
        let barrier = barrier.clone();
        let opened = opened.clone();
        set.spawn(async move {
            let client = TestClient::open(addr, &[]).await;
            if client.is_ok() {
                opened.fetch_add(1, Ordering::SeqCst);
            }
            // Hold every admitted connection until all attempts are decided.
            barrier.wait().await;
            if let Ok(mut client) = client {
                client.close(1000).await.unwrap();
            }
        });
    }

    while let Some(result) = set.join_next().await {
        result.unwrap();
    }

    assert_eq!(opened.load(Ordering::SeqCst), MAX_CONNECTIONS);
    let admission = server.admission.clone();
    server.shutdown().await;
    assert_eq!(admission.global_current(), 0);
    assert_eq!(admission.tracked_ips(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_callback_order_per_client() {
    const NUM_CLIENTS: usize = 16;
    const MESSAGES_PER_CLIENT: usize = 5;

    let server = TestServer::spawn().await;
    let addr = server.addr;

    let mut set = JoinSet::new();
    for client_id in 0..NUM_CLIENTS {
        set.spawn(async move {
            let forwarded = format!("X-Forwarded-For: 10.0.0.{client_id}");
            let mut client = TestClient::open(addr, &[&forwarded]).await.unwrap();
            for seq in 0..MESSAGES_PER_CLIENT {
                client.send_text(&seq.to_string()).await.unwrap();
                client.recv_text().await.unwrap();
            }
            client.close(1000).await.unwrap();
        });
    }
    while let Some(result) = set.join_next().await {
        result.unwrap();
    }

    let events = server
        .wait_for(|events| {
            events.iter().filter(|e| e.starts_with("disconnect")).count() == NUM_CLIENTS
        })
        .await;

    let mut per_client: HashMap<String, Vec<&str>> = HashMap::new();
    for event in &events {
        let mut parts = event.splitn(3, ' ');
        let kind = parts.next().unwrap();
        let ip = parts.next().unwrap().to_string();
        per_client.entry(ip).or_default().push(kind);
    }

    assert_eq!(per_client.len(), NUM_CLIENTS);
    for (ip, kinds) in per_client {
        let mut expected = vec!["connect"];
        expected.extend(std::iter::repeat_n("message", MESSAGES_PER_CLIENT));
        expected.push("disconnect");
        assert_eq!(kinds, expected, "callback order for {ip}");
    }

    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_close_handshake_under_load() {
    const NUM_CLIENTS: usize = 50;

    let server = TestServer::spawn().await;
    let addr = server.addr;
    let closed_gracefully = Arc::new(AtomicUsize::new(0));

    let mut set = JoinSet::new();

    for _ in 0..NUM_CLIENTS {
        let closed = closed_gracefully.clone();

        set.spawn(async move {
            let mut client = TestClient::open(addr, &[]).await.unwrap();
            client.send_text("test").await.unwrap();
            let _ = client.recv_text().await.unwrap();
            if client.close(1000).await.unwrap() == Some(1000) {
                closed.fetch_add(1, Ordering::Relaxed);
            }
        });
    }

    while let Some(result) = set.join_next().await {
        result.unwrap();
    }

    assert_eq!(closed_gracefully.load(Ordering::Relaxed), NUM_CLIENTS);

    let stopped = server.shutdown().await;
    assert_eq!(stopped.current_connection_count(), 0);
}
