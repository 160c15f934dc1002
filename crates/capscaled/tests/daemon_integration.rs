//! Daemon-level integration tests.
//!
//! Wires the same subsystems `capscaled run` does (state store, REST API,
//! store-backed metric source, HTTP capacity client, reconciler and
//! dispatcher) against a fake capacity admin API, and drives them through
//! the public HTTP surface.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{Request, StatusCode};
use axum::routing::get;
use axum::{Json, Router};
use tokio::sync::watch;
use tower::ServiceExt;

use capscale_api::build_router;
use capscale_capacity::HttpCapacityClient;
use capscale_capacity::client::NodeCount;
use capscale_core::{
    ConditionType, DesiredStateStore, EngineConfig, ResourceSpec, ResourceStatus, ScaleDirection,
};
use capscale_metrics::{EngineMetrics, StoreMetricSource};
use capscale_reconciler::{Dispatcher, Reconciler, TracingEventSink};
use capscale_state::StateStore;

type Nodes = Arc<Mutex<HashMap<String, u32>>>;

async fn get_instance(
    State(nodes): State<Nodes>,
    Path(id): Path<String>,
) -> Result<Json<NodeCount>, StatusCode> {
    let nodes = nodes.lock().unwrap();
    nodes
        .get(&id)
        .map(|n| Json(NodeCount { node_count: *n }))
        .ok_or(StatusCode::NOT_FOUND)
}

async fn put_instance(
    State(nodes): State<Nodes>,
    Path(id): Path<String>,
    Json(body): Json<NodeCount>,
) -> StatusCode {
    nodes.lock().unwrap().insert(id, body.node_count);
    StatusCode::NO_CONTENT
}

/// Fake capacity admin API; returns its base URL.
async fn start_capacity_api(nodes: Nodes) -> String {
    let app = Router::new()
        .route("/v1/instances/{id}", get(get_instance).put(put_instance))
        .with_state(nodes);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

struct Daemon {
    router: Router,
    store: StateStore,
    shutdown: watch::Sender<bool>,
    dispatcher: tokio::task::JoinHandle<()>,
}

impl Daemon {
    async fn start(capacity_endpoint: &str) -> Self {
        let store = StateStore::open_in_memory().unwrap();
        let desired: Arc<dyn DesiredStateStore> = Arc::new(store.clone());
        let metrics = Arc::new(EngineMetrics::new());
        // Startup resync and change notifications may both run a pass for
        // the same resource; the up cooldown keeps the second one a no-op.
        let engine = EngineConfig {
            workers: 2,
            scale_up_cooldown: Duration::from_secs(3600),
            ..EngineConfig::default()
        };

        let capacity =
            HttpCapacityClient::new(capacity_endpoint, Duration::from_secs(2)).unwrap();
        let reconciler = Reconciler::new(
            Arc::clone(&desired),
            Arc::new(StoreMetricSource::new(store.clone())),
            Arc::new(capacity),
            engine.clone(),
        )
        .with_events(Arc::new(TracingEventSink))
        .with_metrics(Arc::clone(&metrics));
        let dispatcher = Dispatcher::new(Arc::new(reconciler), desired, &engine);

        let (shutdown, rx) = watch::channel(false);
        let dispatcher = tokio::spawn(async move { dispatcher.run(rx).await });

        Self {
            router: build_router(store.clone(), metrics),
            store,
            shutdown,
            dispatcher,
        }
    }

    async fn send(&self, method: &str, uri: &str, body: Option<serde_json::Value>) -> StatusCode {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let resp = self
            .router
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        resp.status()
    }

    async fn get_text(&self, uri: &str) -> String {
        let resp = self
            .router
            .clone()
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    /// Poll the stored status until `check` accepts it.
    async fn wait_for_status(
        &self,
        id: &str,
        check: impl Fn(&ResourceStatus) -> bool,
    ) -> ResourceStatus {
        for _ in 0..500 {
            if let Some(status) = self.store.get_status(id).unwrap()
                && check(&status)
            {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("status for {id} never reached the expected state");
    }

    async fn stop(self) {
        self.shutdown.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), self.dispatcher)
            .await
            .unwrap()
            .unwrap();
    }
}

#[tokio::test]
async fn overloaded_resource_scales_up_end_to_end() {
    let nodes: Nodes = Arc::new(Mutex::new(HashMap::from([("db-1".to_string(), 2)])));
    let daemon = Daemon::start(&start_capacity_api(nodes.clone()).await).await;

    let status = daemon
        .send(
            "PUT",
            "/api/v1/resources/db-1",
            Some(serde_json::json!({
                "min_nodes": 1,
                "max_nodes": 10,
                "target_utilization_percent": 50.0
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    for utilization in [85.0, 95.0] {
        let status = daemon
            .send(
                "POST",
                "/api/v1/resources/db-1/samples",
                Some(serde_json::json!({ "utilization_percent": utilization })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    // 2 nodes at ~90% against a 50% target → 4 nodes. Samples taken in the
    // same second share a key, so the mean is over one or two of them.
    let status = daemon
        .wait_for_status("db-1", |s| s.desired_nodes == Some(4))
        .await;
    assert_eq!(nodes.lock().unwrap()["db-1"], 4);
    assert_eq!(status.last_scale_direction, ScaleDirection::Up);
    assert!(status.condition(ConditionType::Ready).unwrap().status);
    assert!(status.condition(ConditionType::CapacityAccepted).unwrap().status);

    let metrics = daemon.get_text("/metrics").await;
    assert!(metrics.contains("capscale_scale_actions_total{direction=\"up\"} 1"));
    assert!(metrics.contains("capscale_desired_nodes{resource=\"db-1\"} 4"));

    let body = daemon.get_text("/api/v1/resources/db-1/status").await;
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["data"]["desired_nodes"], 4);

    daemon.stop().await;
}

#[tokio::test]
async fn invalid_spec_written_behind_the_api_is_reported() {
    let nodes: Nodes = Arc::new(Mutex::new(HashMap::from([("db-2".to_string(), 3)])));
    let daemon = Daemon::start(&start_capacity_api(nodes.clone()).await).await;

    // The API refuses it...
    let status = daemon
        .send(
            "PUT",
            "/api/v1/resources/db-2",
            Some(serde_json::json!({
                "min_nodes": 5,
                "max_nodes": 2,
                "target_utilization_percent": 50.0
            })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // ...but a direct store write still reaches the engine, which reports
    // it without touching capacity.
    daemon
        .store
        .put_spec(&ResourceSpec::new("db-2", 5, 2, 50.0))
        .unwrap();
    let status = daemon
        .wait_for_status("db-2", |s| {
            s.condition(ConditionType::SpecValid)
                .is_some_and(|c| !c.status)
        })
        .await;
    assert!(!status.condition(ConditionType::Ready).unwrap().status);
    assert_eq!(nodes.lock().unwrap()["db-2"], 3);

    daemon.stop().await;
}

#[tokio::test]
async fn deleting_a_resource_removes_its_state() {
    let nodes: Nodes = Arc::new(Mutex::new(HashMap::from([("db-3".to_string(), 2)])));
    let daemon = Daemon::start(&start_capacity_api(nodes).await).await;

    daemon
        .send(
            "PUT",
            "/api/v1/resources/db-3",
            Some(serde_json::json!({
                "min_nodes": 1,
                "max_nodes": 4,
                "target_utilization_percent": 50.0
            })),
        )
        .await;
    daemon
        .send(
            "POST",
            "/api/v1/resources/db-3/samples",
            Some(serde_json::json!({ "utilization_percent": 50.0 })),
        )
        .await;
    daemon.wait_for_status("db-3", |s| s.last_decision.is_some()).await;

    assert_eq!(
        daemon.send("DELETE", "/api/v1/resources/db-3", None).await,
        StatusCode::OK
    );
    assert_eq!(
        daemon.send("GET", "/api/v1/resources/db-3/status", None).await,
        StatusCode::NOT_FOUND
    );
    assert!(daemon.store.get_status("db-3").unwrap().is_none());
    assert!(daemon.store.latest_sample("db-3").unwrap().is_none());

    daemon.stop().await;
}
