use std::time::Duration;

use futures::{SinkExt, StreamExt};
use mockito::{Matcher, Mock, Server};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_test::{assert_err, assert_ok};
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use super::connection::ConnectionManager;
use super::*;
use crate::snapshot::{BuildStatus, ConnectionStatus};

const BANNER_TTL: Duration = Duration::from_millis(150);

fn engine_for(server: &Server) -> Arc<Engine> {
    let client = Arc::new(BackendClient::new(&server.url(), 4).unwrap());
    Arc::new(Engine::new(
        client,
        EngineSettings {
            banner_ttl: BANNER_TTL,
            ..EngineSettings::default()
        },
    ))
}

async fn mock_json(server: &mut Server, path: &str, body: &Value) -> Mock {
    server
        .mock("GET", path)
        .match_query(Matcher::Any)
        .with_header("content-type", "application/json")
        .with_body(body.to_string())
        .create_async()
        .await
}

async fn mock_status(server: &mut Server, method: &str, path: &str, status: usize) -> Mock {
    server
        .mock(method, path)
        .match_query(Matcher::Any)
        .with_status(status)
        .create_async()
        .await
}

/// Alerts and the collection trigger, which every cycle touches.
async fn mock_auxiliary(server: &mut Server) {
    mock_json(server, "/api/failed-builds", &json!([])).await;
    mock_json(server, "/api/trigger-collection", &json!({"status": "ok"})).await;
}

fn build(number: u64, result: &str, duration_ms: u64) -> Value {
    json!({
        "number": number,
        "result": result,
        "durationMs": duration_ms,
        "timestamp": 1_700_000_000_000_u64 + number * 1000,
        "url": format!("http://ci/job/x/{number}/")
    })
}

fn head_number(snapshot: &DashboardSnapshot, name: &str) -> Option<u64> {
    snapshot
        .pipeline(name)
        .and_then(Pipeline::head)
        .map(|b| b.build_number)
}

#[tokio::test]
async fn successful_cycle_publishes_snapshot() {
    let mut server = Server::new_async().await;
    mock_auxiliary(&mut server).await;
    mock_json(
        &mut server,
        "/api/pipelines",
        &json!([
            {"name": "api", "url": "http://ci/job/api/", "color": "blue"},
            {"name": "web", "url": "http://ci/job/web/", "color": "red"}
        ]),
    )
    .await;
    mock_json(
        &mut server,
        "/api/metrics/overall",
        &json!({"success": true, "data": {"metrics": {"totalPipelines": 2, "successRatePercent": 75}}}),
    )
    .await;
    mock_json(
        &mut server,
        "/api/pipelines/api/builds",
        &json!([build(2, "SUCCESS", 90_000), build(1, "FAILURE", 30_000)]),
    )
    .await;
    mock_json(
        &mut server,
        "/api/pipelines/web/builds",
        &json!([build(8, "FAILURE", 5_000)]),
    )
    .await;

    let engine = engine_for(&server);
    let mut updates = engine.subscribe();

    engine.refresh(Trigger::Scheduled).await.unwrap();

    assert!(updates.has_changed().unwrap());
    let snapshot = updates.borrow_and_update().clone();
    assert_eq!(snapshot.cycle, 1);
    assert!(snapshot.refreshed_at.is_some());
    let names: Vec<&str> = snapshot.pipelines.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["api", "web"]);
    assert_eq!(head_number(&snapshot, "api"), Some(2));
    assert_eq!(snapshot.metrics.aggregate.total_pipelines, 2);
    assert!((snapshot.metrics.aggregate.success_rate_percent - 75.0).abs() < f64::EPSILON);
    assert_eq!(snapshot.metrics.build_status_counts[&BuildStatus::Failure], 2);
    assert!(snapshot.banner.is_none());
    assert!(!snapshot.refreshing);
}

#[tokio::test]
async fn aggregate_falls_back_to_held_builds() {
    let mut server = Server::new_async().await;
    mock_auxiliary(&mut server).await;
    mock_json(
        &mut server,
        "/api/pipelines",
        &json!([{"name": "a"}, {"name": "b"}, {"name": "c"}]),
    )
    .await;
    mock_json(&mut server, "/api/metrics/overall", &json!({})).await;
    mock_json(
        &mut server,
        "/api/pipelines/a/builds",
        &json!([
            build(5, "SUCCESS", 1_000),
            build(4, "SUCCESS", 1_000),
            build(3, "FAILURE", 1_000),
            build(2, "SUCCESS", 1_000),
            build(1, "SUCCESS", 1_000)
        ]),
    )
    .await;
    mock_json(&mut server, "/api/pipelines/b/builds", &json!([])).await;
    mock_json(
        &mut server,
        "/api/pipelines/c/builds",
        &json!([build(2, "SUCCESS", 1_000), build(1, "SUCCESS", 1_000)]),
    )
    .await;

    let engine = engine_for(&server);
    engine.refresh(Trigger::Scheduled).await.unwrap();

    let snapshot = engine.snapshot();
    let aggregate = &snapshot.metrics.aggregate;
    assert_eq!(aggregate.total_pipelines, 3);
    assert_eq!(aggregate.total_builds, 7);
    assert_eq!(aggregate.success_count, 6);
    assert_eq!(aggregate.failure_count, 1);
    assert!((aggregate.success_rate_percent - 600.0 / 7.0).abs() < 1e-9);
}

#[tokio::test]
async fn primary_fetch_failure_keeps_state_and_expires_banner() {
    let mut server = Server::new_async().await;
    mock_auxiliary(&mut server).await;
    let pipelines = mock_json(&mut server, "/api/pipelines", &json!([{"name": "api"}])).await;
    mock_json(&mut server, "/api/metrics/overall", &json!({})).await;
    mock_json(
        &mut server,
        "/api/pipelines/api/builds",
        &json!([build(3, "SUCCESS", 1_000)]),
    )
    .await;

    let engine = engine_for(&server);
    engine.refresh(Trigger::Scheduled).await.unwrap();
    let before = engine.snapshot();

    pipelines.remove_async().await;
    mock_status(&mut server, "GET", "/api/pipelines", 500).await;

    assert_err!(engine.refresh(Trigger::Scheduled).await);

    let after = engine.snapshot();
    assert_eq!(after.cycle, before.cycle);
    assert_eq!(after.pipelines, before.pipelines);
    assert_eq!(after.metrics, before.metrics);
    let banner = after.banner.as_ref().unwrap();
    assert!(banner.message.contains("500"));

    tokio::time::sleep(BANNER_TTL * 3).await;
    assert!(engine.snapshot().banner.is_none());
}

#[tokio::test]
async fn newer_banner_survives_older_expiry() {
    let server = Server::new_async().await;
    let engine = engine_for(&server);

    engine.raise_banner("first".to_string());
    tokio::time::sleep(BANNER_TTL / 2).await;
    engine.raise_banner("second".to_string());
    tokio::time::sleep(BANNER_TTL * 2 / 3).await;

    // the first banner's timer has fired but must not clear the second
    assert_eq!(
        engine.snapshot().banner.as_ref().map(|b| b.message.as_str()),
        Some("second")
    );
}

#[tokio::test]
async fn per_pipeline_failure_keeps_held_builds() {
    let mut server = Server::new_async().await;
    mock_auxiliary(&mut server).await;
    mock_json(
        &mut server,
        "/api/pipelines",
        &json!([{"name": "api"}, {"name": "web"}]),
    )
    .await;
    mock_json(&mut server, "/api/metrics/overall", &json!({})).await;
    let api_builds = mock_json(
        &mut server,
        "/api/pipelines/api/builds",
        &json!([build(1, "SUCCESS", 1_000)]),
    )
    .await;
    let web_builds = mock_json(
        &mut server,
        "/api/pipelines/web/builds",
        &json!([build(10, "FAILURE", 1_000), build(9, "SUCCESS", 1_000)]),
    )
    .await;

    let engine = engine_for(&server);
    engine.refresh(Trigger::Scheduled).await.unwrap();

    api_builds.remove_async().await;
    web_builds.remove_async().await;
    mock_json(
        &mut server,
        "/api/pipelines/api/builds",
        &json!([build(2, "SUCCESS", 1_000), build(1, "SUCCESS", 1_000)]),
    )
    .await;
    mock_status(&mut server, "GET", "/api/pipelines/web/builds", 503).await;

    assert_ok!(engine.refresh(Trigger::Push).await);

    let snapshot = engine.snapshot();
    assert_eq!(snapshot.cycle, 2);
    assert_eq!(head_number(&snapshot, "api"), Some(2));
    assert_eq!(head_number(&snapshot, "web"), Some(10));
    assert_eq!(snapshot.build_count("web"), 2);
    assert!(snapshot.banner.is_none());
}

#[tokio::test]
async fn rejected_collection_trigger_does_not_gate_cycle() {
    let mut server = Server::new_async().await;
    mock_json(&mut server, "/api/failed-builds", &json!([])).await;
    mock_status(&mut server, "GET", "/api/trigger-collection", 500).await;
    mock_json(&mut server, "/api/pipelines", &json!([])).await;
    mock_json(&mut server, "/api/metrics/overall", &json!({})).await;

    let engine = engine_for(&server);
    assert_ok!(engine.refresh(Trigger::Manual).await);

    let snapshot = engine.snapshot();
    assert_eq!(snapshot.cycle, 1);
    assert!(snapshot.banner.is_none());
    assert!(!snapshot.refreshing);
}

#[tokio::test]
async fn alert_failure_never_interrupts_cycle() {
    let mut server = Server::new_async().await;
    mock_status(&mut server, "GET", "/api/failed-builds", 500).await;
    mock_json(&mut server, "/api/trigger-collection", &json!({})).await;
    mock_json(&mut server, "/api/pipelines", &json!([])).await;
    mock_json(&mut server, "/api/metrics/overall", &json!({})).await;

    let engine = engine_for(&server);
    engine.refresh(Trigger::Scheduled).await.unwrap();

    let snapshot = engine.snapshot();
    assert_eq!(snapshot.cycle, 1);
    assert!(snapshot.alerts.is_empty());
    assert!(snapshot.banner.is_none());
}

#[tokio::test]
async fn cycle_publishes_alerts_and_acknowledgment() {
    let mut server = Server::new_async().await;
    let listing = mock_json(
        &mut server,
        "/api/failed-builds",
        &json!([
            {"job": "api", "number": 4, "result": "FAILURE", "timestamp": 1_700_000_300_000_u64},
            {"job": "web", "number": 9, "result": "UNSTABLE", "timestamp": 1_700_000_200_000_u64}
        ]),
    )
    .await;
    mock_json(&mut server, "/api/trigger-collection", &json!({})).await;
    mock_json(&mut server, "/api/pipelines", &json!([])).await;
    mock_json(&mut server, "/api/metrics/overall", &json!({})).await;

    let engine = engine_for(&server);
    engine.refresh(Trigger::Scheduled).await.unwrap();

    let snapshot = engine.snapshot();
    assert_eq!(snapshot.alerts.len(), 2);
    assert_eq!(snapshot.alerts[0].pipeline_name, "api");
    assert!(snapshot.alert_badge.visible);

    listing.remove_async().await;
    mock_status(&mut server, "POST", "/api/failed-builds/viewed", 200).await;
    mock_json(
        &mut server,
        "/api/failed-builds",
        &json!([{"job": "web", "number": 9, "result": "UNSTABLE", "timestamp": 1_700_000_200_000_u64}]),
    )
    .await;

    assert!(engine.acknowledge_alert("api", 4).await);

    let snapshot = engine.snapshot();
    assert_eq!(snapshot.alerts.len(), 1);
    assert_eq!(snapshot.alerts[0].pipeline_name, "web");
    assert_eq!(snapshot.alert_badge.count, 1);
}

#[tokio::test]
async fn node_health_is_published_and_kept_on_failure() {
    let mut server = Server::new_async().await;
    let health = mock_json(
        &mut server,
        "/api/jenkins-node-health",
        &json!({
            "connection_status": "UP",
            "jenkins_url": "http://jenkins:8080",
            "jenkins_jobs": ["api", "web"]
        }),
    )
    .await;

    let engine = engine_for(&server);
    assert!(engine.refresh_node_health().await);

    health.remove_async().await;
    mock_status(&mut server, "GET", "/api/jenkins-node-health", 502).await;
    assert!(!engine.refresh_node_health().await);

    let snapshot = engine.snapshot();
    let node = snapshot.node_health.as_ref().unwrap();
    assert_eq!(node.connection_status, ConnectionStatus::Up);
    assert_eq!(node.job_count, 2);
    assert_eq!(node.port, 8080);
}

#[tokio::test]
async fn concurrent_refreshes_are_serialized() {
    let mut server = Server::new_async().await;
    mock_auxiliary(&mut server).await;
    mock_json(&mut server, "/api/pipelines", &json!([{"name": "api"}])).await;
    mock_json(&mut server, "/api/metrics/overall", &json!({})).await;
    mock_json(
        &mut server,
        "/api/pipelines/api/builds",
        &json!([build(1, "SUCCESS", 1_000)]),
    )
    .await;

    let engine = engine_for(&server);
    let (first, second) = tokio::join!(
        engine.refresh(Trigger::Scheduled),
        engine.refresh(Trigger::Push)
    );
    assert_ok!(first);
    assert_ok!(second);

    assert_eq!(engine.snapshot().cycle, 2);
}

#[tokio::test]
async fn push_events_set_connection_state_and_request_refresh() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = Server::new_async().await;
    let engine = engine_for(&server);
    let mut updates = engine.subscribe();

    let observed = Arc::clone(&engine);
    let push_server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

        ws.send(Message::Text(r#"0{"sid":"s1","pingInterval":25000}"#.to_string()))
            .await
            .unwrap();
        let reply = ws.next().await.unwrap().unwrap();
        assert_eq!(reply, Message::Text("40".to_string()));
        assert_eq!(observed.snapshot().connection, ConnectionState::Connected);

        ws.send(Message::Text(r#"40{"sid":"n1"}"#.to_string())).await.unwrap();
        ws.send(Message::Text("2".to_string())).await.unwrap();
        let pong = ws.next().await.unwrap().unwrap();
        assert_eq!(pong, Message::Text("3".to_string()));

        ws.send(Message::Text(r#"42["build_update",{"job":"api"}]"#.to_string()))
            .await
            .unwrap();
        ws.send(Message::Text(r#"42["pipeline_update",{}]"#.to_string()))
            .await
            .unwrap();
        let _ = ws.close(None).await;
    });

    let push_url = Url::parse(&format!("ws://{addr}/socket.io/?EIO=4&transport=websocket")).unwrap();
    let manager = ConnectionManager::new(push_url, Duration::from_secs(60));
    let connection = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { manager.run(engine).await })
    };

    tokio::time::timeout(
        Duration::from_secs(5),
        updates.wait_for(|s| s.connection == ConnectionState::Disconnected),
    )
    .await
    .unwrap()
    .unwrap();

    push_server.await.unwrap();
    connection.abort();

    // two update events coalesce into one pending refresh
    assert_eq!(engine.triggers().take(), Some(Trigger::Push));
    assert_eq!(engine.triggers().take(), None);
}
