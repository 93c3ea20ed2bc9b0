//! End-to-end registration and teardown against an in-memory gateway.

use async_trait::async_trait;
use registry_agent::error::{AgentError, GatewayError, GatewayResult};
use registry_agent::client::{AdminRequest, AdminResponse, AdminTransport};
use registry_agent::{
    AdminClient, AgentSettings, CliOverrides, LifecycleState, Orchestrator, RetryPolicy,
    TeardownStep,
};
use registry_kernel::config::AgentConfig;
use registry_kernel::{ConsumerConfig, HttpMethod, PluginSpec};
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

const BASE: &str = "http://apisix.test/apisix/admin";

const USER_PROTO: &str = r#"
syntax = "proto3";
package micro;

import "google/api/annotations.proto";

service User {
  rpc GetTest (GetTestRequest) returns (GetTestReply) {
    option (google.api.http) = {
      get: "/v1/test/{id}"
    };
  }
  // Internal only.
  rpc Ping (PingRequest) returns (PingReply) {}
  rpc CreateTest (CreateTestRequest) returns (CreateTestReply) {
    option (google.api.http) = {
      post: "/v1/test"
      body: "*"
    };
  }
}
"#;

/// Stores objects by admin path and answers like APISIX would.
#[derive(Default)]
struct FakeGateway {
    objects: Mutex<BTreeMap<String, Value>>,
    log: Mutex<Vec<(HttpMethod, String)>>,
    failing: Mutex<HashSet<(HttpMethod, String)>>,
}

impl FakeGateway {
    fn seed(&self, path: &str, value: Value) {
        self.objects.lock().unwrap().insert(path.to_string(), value);
    }

    fn fail(&self, method: HttpMethod, path: &str) {
        self.failing
            .lock()
            .unwrap()
            .insert((method, path.to_string()));
    }

    fn paths(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    fn object(&self, path: &str) -> Option<Value> {
        self.objects.lock().unwrap().get(path).cloned()
    }

    fn calls(&self, method: HttpMethod) -> Vec<String> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|(m, _)| *m == method)
            .map(|(_, p)| p.clone())
            .collect()
    }

    fn log(&self) -> Vec<(HttpMethod, String)> {
        self.log.lock().unwrap().clone()
    }
}

fn respond(status: u16, body: Value) -> GatewayResult<AdminResponse> {
    Ok(AdminResponse {
        status,
        body: serde_json::to_vec(&body).unwrap(),
    })
}

#[async_trait]
impl AdminTransport for FakeGateway {
    async fn send(&self, request: &AdminRequest) -> GatewayResult<AdminResponse> {
        let path = request.url.strip_prefix(BASE).unwrap().to_string();
        self.log.lock().unwrap().push((request.method, path.clone()));

        if request.api_key != "test-key" {
            return respond(401, json!({"message": "failed to check token"}));
        }
        if self
            .failing
            .lock()
            .unwrap()
            .contains(&(request.method, path.clone()))
        {
            return respond(503, json!({"error_msg": "etcd unavailable"}));
        }

        let mut objects = self.objects.lock().unwrap();
        match request.method {
            HttpMethod::Put => {
                let value: Value = serde_json::from_slice(request.body.as_deref().unwrap()).unwrap();
                objects.insert(path, value.clone());
                respond(201, json!({"value": value}))
            }
            HttpMethod::Delete => match objects.remove(&path) {
                Some(_) => respond(200, json!({"deleted": "1"})),
                None => respond(404, json!({"message": "Key not found"})),
            },
            HttpMethod::Get if path == "/routes" => {
                let list: Vec<Value> = objects
                    .iter()
                    .filter(|(k, _)| k.starts_with("/routes/"))
                    .map(|(_, v)| json!({"value": v}))
                    .collect();
                respond(200, json!({"total": list.len(), "list": list}))
            }
            _ => respond(404, json!({"message": "not found"})),
        }
    }
}

fn write_proto(dir: &TempDir) -> std::path::PathBuf {
    let path = dir.path().join("user.proto");
    std::fs::write(&path, USER_PROTO).unwrap();
    path
}

fn settings(proto_path: Option<&Path>) -> AgentSettings {
    let transcode = PluginSpec {
        name: "grpc-transcode".into(),
        config: serde_json::Map::new(),
    };
    let config = AgentConfig {
        admin_api: BASE.into(),
        admin_key: "test-key".into(),
        service_name: "user".into(),
        service_port: 9000,
        proto_path: proto_path.map(Path::to_path_buf),
        route_plugins: vec![transcode],
        consumers: vec![
            ConsumerConfig {
                name: "mobile".into(),
                jwt_enabled: true,
                ..Default::default()
            },
            ConsumerConfig {
                name: "anonymous".into(),
                ..Default::default()
            },
        ],
        ..AgentConfig::default()
    };
    let mut settings = AgentSettings::resolve(config, CliOverrides::default()).unwrap();
    settings.retry = RetryPolicy::new(2, Duration::from_millis(1));
    settings
}

fn orchestrator(gateway: &Arc<FakeGateway>, settings: AgentSettings) -> Orchestrator<Arc<FakeGateway>> {
    let client = AdminClient::new(Arc::clone(gateway), settings.admin.clone(), settings.retry);
    Orchestrator::new(client, settings)
}

#[tokio::test]
async fn test_registers_in_dependency_order() {
    let dir = TempDir::new().unwrap();
    let proto = write_proto(&dir);
    let gateway = Arc::new(FakeGateway::default());
    let agent = orchestrator(&gateway, settings(Some(&proto)));

    let registration = agent.register().await.unwrap();
    assert_eq!(agent.state(), LifecycleState::Running);
    assert_eq!(registration.route_ids, vec!["user-0", "user-1"]);
    assert_eq!(registration.consumers, vec!["mobile"]);
    assert_eq!(registration.upstream_id.as_deref(), Some("user"));
    assert!(registration.descriptor_registered);

    assert_eq!(
        gateway.calls(HttpMethod::Put),
        vec![
            "/consumers/mobile",
            "/upstreams/user",
            "/services/user",
            "/routes/user-0",
            "/routes/user-1",
            "/protos/user",
        ]
    );

    assert_eq!(
        gateway.object("/routes/user-0").unwrap(),
        json!({
            "id": "user-0",
            "name": "user-0",
            "desc": "Auto registered by apisix-registry-agent",
            "service_id": "user",
            "uri": "/v1/test/{id}",
            "methods": ["GET"],
            "plugins": {
                "grpc-transcode": {
                    "method": "GetTest",
                    "proto_id": "user",
                    "service": "micro.UserService"
                }
            }
        })
    );
    assert_eq!(gateway.object("/routes/user-1").unwrap()["methods"], json!(["POST"]));
    assert_eq!(
        gateway.object("/upstreams/user").unwrap(),
        json!({
            "id": "user",
            "type": "roundrobin",
            "scheme": "grpc",
            "nodes": {"127.0.0.1:9000": 1}
        })
    );
    assert_eq!(
        gateway.object("/protos/user").unwrap()["content"],
        json!(USER_PROTO)
    );
}

#[tokio::test]
async fn test_teardown_removes_untracked_routes() {
    let dir = TempDir::new().unwrap();
    let proto = write_proto(&dir);
    let gateway = Arc::new(FakeGateway::default());
    // Left behind by an earlier run with a different route layout.
    gateway.seed(
        "/routes/user-legacy",
        json!({
            "id": "user-legacy",
            "plugins": {"grpc-transcode": {"proto_id": "user", "method": "Old"}}
        }),
    );
    gateway.seed(
        "/routes/billing-0",
        json!({
            "id": "billing-0",
            "plugins": {"grpc-transcode": {"proto_id": "billing"}}
        }),
    );
    let agent = orchestrator(&gateway, settings(Some(&proto)));

    let report = agent.run(async {}).await.unwrap();

    assert_eq!(agent.state(), LifecycleState::Terminated);
    assert!(report.is_clean(), "{report:?}");
    assert!(
        report
            .steps
            .iter()
            .any(|s| s.step == TeardownStep::StaleRoute("user-legacy".into()))
    );
    // The consumer stays; the other service's route is untouched.
    assert_eq!(gateway.paths(), vec!["/consumers/mobile", "/routes/billing-0"]);

    let deletes = gateway.calls(HttpMethod::Delete);
    assert_eq!(
        deletes,
        vec![
            "/routes/user-0",
            "/routes/user-1",
            "/routes/user-legacy",
            "/protos/user",
            "/services/user",
            "/upstreams/user",
        ]
    );
}

#[tokio::test]
async fn test_service_failure_aborts_registration() {
    let dir = TempDir::new().unwrap();
    let proto = write_proto(&dir);
    let gateway = Arc::new(FakeGateway::default());
    gateway.fail(HttpMethod::Put, "/services/user");
    let agent = orchestrator(&gateway, settings(Some(&proto)));

    let err = agent.run(async {}).await.unwrap_err();

    assert!(matches!(
        err,
        AgentError::Gateway(GatewayError::RetriesExhausted { attempts: 2, .. })
    ));
    assert_eq!(agent.state(), LifecycleState::Terminated);
    let puts = gateway.calls(HttpMethod::Put);
    assert!(puts.iter().all(|p| !p.starts_with("/routes/") && !p.starts_with("/protos/")));
    assert!(gateway.calls(HttpMethod::Delete).is_empty());
}

#[tokio::test]
async fn test_other_failures_do_not_abort() {
    let dir = TempDir::new().unwrap();
    let proto = write_proto(&dir);
    let gateway = Arc::new(FakeGateway::default());
    gateway.fail(HttpMethod::Put, "/consumers/mobile");
    gateway.fail(HttpMethod::Put, "/upstreams/user");
    gateway.fail(HttpMethod::Put, "/routes/user-0");
    let agent = orchestrator(&gateway, settings(Some(&proto)));

    let registration = agent.register().await.unwrap();

    assert!(registration.consumers.is_empty());
    assert_eq!(registration.failed_routes, vec!["user-0"]);
    assert_eq!(registration.route_ids, vec!["user-0", "user-1"]);
    assert!(gateway.object("/services/user").is_some());
    assert!(gateway.object("/routes/user-1").is_some());
    assert!(gateway.object("/protos/user").is_some());
}

#[tokio::test]
async fn test_teardown_is_best_effort() {
    let dir = TempDir::new().unwrap();
    let proto = write_proto(&dir);
    let gateway = Arc::new(FakeGateway::default());
    let agent = orchestrator(&gateway, settings(Some(&proto)));
    let registration = agent.register().await.unwrap();

    gateway.fail(HttpMethod::Get, "/routes");
    gateway.fail(HttpMethod::Delete, "/protos/user");
    let report = agent.deregister(&registration).await;

    let failed: Vec<_> = report.failures().map(|f| f.step.clone()).collect();
    assert_eq!(
        failed,
        vec![TeardownStep::ListRoutes, TeardownStep::Descriptor("user".into())]
    );
    assert!(gateway.object("/services/user").is_none());
    assert!(gateway.object("/upstreams/user").is_none());
    assert_eq!(agent.state(), LifecycleState::Terminated);
}

#[tokio::test]
async fn test_registration_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let proto = write_proto(&dir);

    let mut snapshots = Vec::new();
    for _ in 0..2 {
        let gateway = Arc::new(FakeGateway::default());
        let agent = orchestrator(&gateway, settings(Some(&proto)));
        agent.register().await.unwrap();
        let objects = gateway.objects.lock().unwrap().clone();
        snapshots.push((gateway.log(), objects));
    }
    assert_eq!(snapshots[0], snapshots[1]);

    // Re-registering over existing state replaces, never duplicates.
    let gateway = Arc::new(FakeGateway::default());
    let agent = orchestrator(&gateway, settings(Some(&proto)));
    agent.register().await.unwrap();
    let first = gateway.paths();
    agent.register().await.unwrap();
    assert_eq!(gateway.paths(), first);
}

#[tokio::test]
async fn test_without_proto_registers_service_only() {
    let gateway = Arc::new(FakeGateway::default());
    let agent = orchestrator(&gateway, settings(None));

    let registration = agent.register().await.unwrap();

    assert!(registration.route_ids.is_empty());
    assert!(!registration.descriptor_registered);
    assert_eq!(
        gateway.paths(),
        vec!["/consumers/mobile", "/services/user", "/upstreams/user"]
    );
}

#[tokio::test]
async fn test_unreadable_proto_still_registers_service() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("missing.proto");
    let gateway = Arc::new(FakeGateway::default());
    let agent = orchestrator(&gateway, settings(Some(&missing)));

    let registration = agent.register().await.unwrap();

    assert!(registration.route_ids.is_empty());
    assert!(!registration.descriptor_registered);
    assert!(gateway.object("/services/user").is_some());
    assert!(gateway.calls(HttpMethod::Put).iter().all(|p| p != "/protos/user"));
}

#[tokio::test]
async fn test_run_waits_for_shutdown() {
    let gateway = Arc::new(FakeGateway::default());
    let agent = orchestrator(&gateway, settings(None));
    let mut states = agent.subscribe();
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();

    let probe = Arc::clone(&gateway);
    let observer = tokio::spawn(async move {
        states
            .wait_for(|s| *s == LifecycleState::Running)
            .await
            .unwrap();
        let registered = probe.paths();
        tx.send(()).unwrap();
        registered
    });

    let report = agent
        .run(async {
            rx.await.unwrap();
        })
        .await
        .unwrap();

    let registered = observer.await.unwrap();
    assert!(registered.contains(&"/services/user".to_string()));
    assert!(report.is_clean());
    assert_eq!(gateway.paths(), vec!["/consumers/mobile"]);
}

#[tokio::test]
async fn test_teardown_removes_leftover_descriptor_without_proto() {
    let gateway = Arc::new(FakeGateway::default());
    gateway.seed("/protos/user", json!({"content": "syntax = \"proto3\";"}));
    let agent = orchestrator(&gateway, settings(None));

    let registration = agent.register().await.unwrap();
    let report = agent.deregister(&registration).await;

    assert!(report.is_clean(), "{report:?}");
    assert!(gateway.object("/protos/user").is_none());
    assert_eq!(
        gateway.calls(HttpMethod::Delete),
        vec!["/protos/user", "/services/user", "/upstreams/user"]
    );
}

#[tokio::test]
async fn test_teardown_tolerates_objects_never_registered() {
    let dir = TempDir::new().unwrap();
    let proto = write_proto(&dir);
    let gateway = Arc::new(FakeGateway::default());
    gateway.fail(HttpMethod::Put, "/routes/user-1");
    let agent = orchestrator(&gateway, settings(Some(&proto)));

    let registration = agent.register().await.unwrap();
    let report = agent.deregister(&registration).await;

    assert!(report.is_clean(), "{report:?}");
    // One attempt for the absent route, no retries.
    let route_deletes = gateway
        .calls(HttpMethod::Delete)
        .into_iter()
        .filter(|p| p == "/routes/user-1")
        .count();
    assert_eq!(route_deletes, 1);
    assert_eq!(gateway.paths(), vec!["/consumers/mobile"]);
}
