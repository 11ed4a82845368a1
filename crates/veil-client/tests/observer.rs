//! Observer client against a live relay.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;

use veil_client::{ClientError, ObserverClient, PartyLogPanel, ProcessingPanel, Subscribers};
use veil_core::{ClientEvent, Kind, LogLevel, ObserverId, PartyId, PartyState};
use veil_engine::{EngineConfig, SimulatedEngine};
use veil_server::{start, PipelineDelays, ServerConfig, ServerHandle};
use veil_telemetry::MetricsRecorder;

const TIMEOUT: Duration = Duration::from_secs(5);

async fn boot_server() -> ServerHandle {
    start(
        ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
            delays: PipelineDelays::zero(),
            ..Default::default()
        },
        Arc::new(SimulatedEngine::new(EngineConfig::instant())),
        Arc::new(MetricsRecorder::new()),
    )
    .await
    .expect("server starts")
}

async fn wait_for(mut done: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    while !done() {
        assert!(tokio::time::Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn panels_follow_a_full_relay() {
    let server = boot_server().await;
    let subscribers = Subscribers::new();
    let panel_a = PartyLogPanel::new(PartyId::A);
    let panel_b = PartyLogPanel::new(PartyId::B);
    let processing = ProcessingPanel::new();
    let _a = panel_a.attach(&subscribers);
    let _b = panel_b.attach(&subscribers);
    let _p = processing.attach(&subscribers);
    let _broken = subscribers.register("broken", |_| panic!("widget bug"));

    let url = format!("ws://127.0.0.1:{}/ws", server.port);
    let client = ObserverClient::connect(&url, subscribers.clone()).await.unwrap();
    assert!(client.is_connected());

    wait_for(|| panel_a.status().is_some() && panel_b.status().is_some()).await;

    client.send(&ClientEvent::encrypt(Kind::A1)).await.unwrap();
    wait_for(|| processing.last_result().is_some()).await;

    assert!(processing.last_result().unwrap().verdict);
    assert_eq!(processing.last_sent(), Some(Kind::A1));

    let a_messages: Vec<String> = panel_a.entries().into_iter().map(|e| e.message).collect();
    assert_eq!(a_messages[0], "Starting encryption of message \"A1\"");
    assert!(a_messages.contains(&"Encryption and transmission cycle complete".to_string()));

    wait_for(|| panel_b.status().map(|s| s.state) == Some(PartyState::Online)).await;
    let b_entries = panel_b.entries();
    assert!(b_entries
        .iter()
        .any(|e| e.level == LogLevel::Success && e.message.ends_with(": true")));

    client.close().await.unwrap();
    server.shutdown().await;
}

#[tokio::test]
async fn two_requests_both_reach_the_processing_panel() {
    let server = boot_server().await;
    let subscribers = Subscribers::new();
    let processing = ProcessingPanel::new();
    let _p = processing.attach(&subscribers);

    let url = format!("ws://127.0.0.1:{}/ws", server.port);
    let client = ObserverClient::connect(&url, subscribers.clone()).await.unwrap();
    client.send(&ClientEvent::encrypt(Kind::A1)).await.unwrap();
    client.send(&ClientEvent::encrypt(Kind::A2)).await.unwrap();

    wait_for(|| processing.totals() == (2, 2)).await;
    let verdicts: Vec<Option<bool>> = server.store.all().iter().map(|m| m.verdict).collect();
    assert_eq!(verdicts.len(), 2);
    assert!(verdicts.contains(&Some(true)));
    assert!(verdicts.contains(&Some(false)));

    client.close().await.unwrap();
    server.shutdown().await;
}

#[tokio::test]
async fn closed_can_be_awaited_again_after_hangup() {
    let server = boot_server().await;
    let url = format!("ws://127.0.0.1:{}/ws", server.port);
    let mut client = ObserverClient::connect(&url, Subscribers::new()).await.unwrap();
    wait_for(|| server.hub.observer_count() == 1).await;

    server.hub.disconnect(&ObserverId::new(1));
    timeout(TIMEOUT, client.closed()).await.expect("hangup seen");
    timeout(TIMEOUT, client.closed()).await.expect("second wait returns");
    assert!(!client.is_connected());

    server.shutdown().await;
}

#[tokio::test]
async fn connect_to_nothing_fails() {
    let err = ObserverClient::connect("ws://127.0.0.1:1/ws", Subscribers::new())
        .await
        .err()
        .unwrap();
    assert!(matches!(err, ClientError::Connect(_)));
}
