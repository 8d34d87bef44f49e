//! End-to-end tests of the HTTP layer against the in-memory store.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Map, Value};
use tower::ServiceExt;

use qgate_core::error::{QgateError, Result};
use qgate_gateway::app_state::AppState;
use qgate_gateway::config;
use qgate_gateway::dispatch::Service;
use qgate_gateway::lifecycle::BackgroundTasks;
use qgate_gateway::router::build_router;
use qgate_gateway::store::{KvStore, MemoryStore, Stores};

const TOKEN: &str = "t-alice";

fn cfg(mode: &str) -> config::GatewayConfig {
    cfg_with(mode, "")
}

/// `extra` adds top-level sections.
fn cfg_with(mode: &str, extra: &str) -> config::GatewayConfig {
    let yaml = format!(
        r#"
version: 1
permissions:
  mode: {mode}
workers:
  poll_timeout_ms: 50
auth:
  tokens:
    {TOKEN}: alice
{extra}"#
    );
    config::load_from_str(&yaml).unwrap()
}

struct Refuses;

#[async_trait]
impl Service for Refuses {
    fn name(&self) -> &'static str {
        "refuses"
    }

    async fn handle(&self, _args: Map<String, Value>) -> Result<Value> {
        Err(QgateError::Handler("not today".into()))
    }
}

struct Gateway {
    app: Router,
    state: AppState,
    tasks: Option<BackgroundTasks>,
}

impl Gateway {
    fn new(mode: &str) -> Self {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        Self::build(AppState::new(cfg(mode), store).unwrap())
    }

    fn build(state: AppState) -> Self {
        Self {
            app: build_router(state.clone()),
            state,
            tasks: None,
        }
    }

    fn with_workers(mode: &str) -> Self {
        let mut gw = Self::new(mode);
        gw.state.register_service(Arc::new(Refuses));
        gw.tasks = Some(gw.state.start_background().unwrap());
        gw
    }

    async fn send(&self, method: Method, uri: &str, token: Option<&str>, body: &str) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(t) = token {
            req = req.header(header::AUTHORIZATION, format!("Bearer {t}"));
        }
        let resp = self
            .app
            .clone()
            .oneshot(req.body(Body::from(body.to_string())).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
        (status, value)
    }

    async fn stop(self) {
        if let Some(t) = self.tasks {
            t.stop().await;
        }
    }
}

#[tokio::test]
async fn ops_endpoints() {
    let gw = Gateway::new("production");
    let (s, body) = gw.send(Method::GET, "/healthz", None, "").await;
    assert_eq!((s, body), (StatusCode::OK, json!("ok")));

    let (s, _) = gw.send(Method::GET, "/readyz", None, "").await;
    assert_eq!(s, StatusCode::OK);
    gw.state.set_draining();
    let (s, _) = gw.send(Method::GET, "/readyz", None, "").await;
    assert_eq!(s, StatusCode::SERVICE_UNAVAILABLE);

    let (s, body) = gw.send(Method::GET, "/metrics", None, "").await;
    assert_eq!(s, StatusCode::OK);
    let text = body.as_str().unwrap();
    assert!(text.contains("qgate_draining 1"));
    assert!(text.contains("qgate_services_registered 1"));
}

#[tokio::test]
async fn development_mode_write_then_read() {
    let gw = Gateway::new("development");

    let (s, body) = gw
        .send(Method::PUT, "/rSvc?cmd=HSET&key=User42&field=name", None, r#""alice""#)
        .await;
    assert_eq!(s, StatusCode::OK);
    assert_eq!(body, json!({ "field": "name" }));
    gw.send(Method::PUT, "/rSvc?cmd=hset&key=User42&field=age", None, "31").await;

    let (s, body) = gw.send(Method::GET, "/rSvc?cmd=HGET&key=User42&field=name", None, "").await;
    assert_eq!((s, body), (StatusCode::OK, json!("alice")));

    let (_, body) = gw.send(Method::GET, "/rSvc?cmd=HGET&key=User42&field=none", None, "").await;
    assert_eq!(body, Value::Null);

    let (_, body) = gw.send(Method::GET, "/rSvc?cmd=HGETALL&key=User42", None, "").await;
    assert_eq!(body, json!({ "name": "alice", "age": 31 }));

    // missing fields are left out
    let (_, body) = gw.send(Method::GET, "/rSvc?cmd=HMGET&key=User42&field=age,name,x", None, "").await;
    assert_eq!(body, json!({ "age": 31, "name": "alice" }));

    let (_, body) = gw.send(Method::GET, "/rSvc?cmd=HKEYS&key=User42", None, "").await;
    assert_eq!(body, json!(["age", "name"]));

    let (_, body) = gw.send(Method::GET, "/rSvc?cmd=HLEN&key=User42", None, "").await;
    assert_eq!(body, json!(2));

    let (_, body) = gw.send(Method::DELETE, "/rSvc?cmd=HDEL&key=User42&field=age", None, "").await;
    assert_eq!(body, json!(true));
    let (_, body) = gw.send(Method::GET, "/rSvc?cmd=HEXISTS&key=User42&field=age", None, "").await;
    assert_eq!(body, json!(false));

    let (_, body) = gw.send(Method::PUT, "/rSvc?cmd=RPUSH&key=Log", None, r#"{"e":1}"#).await;
    assert_eq!(body, json!(1));

    // all of it was learned as allowed
    let read = gw.state.permissions().table(qgate_core::protocol::command::Access::Read);
    assert_eq!(read.lookup("User", "hgetall"), Some(true));
}

#[tokio::test]
async fn production_mode_denies_unseen_operations() {
    let gw = Gateway::new("production");
    let (s, body) = gw.send(Method::GET, "/rSvc?cmd=HGET&key=User1&field=name", None, "").await;
    assert_eq!(s, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "PERMISSION_DENIED");

    // and keeps denying
    let (s, _) = gw.send(Method::GET, "/rSvc?cmd=HGET&key=User2&field=name", None, "").await;
    assert_eq!(s, StatusCode::FORBIDDEN);

    let text = gw.state.metrics().render(&[]);
    assert!(text.contains(r#"qgate_permission_decisions_total{access="read",outcome="deny"} 2"#));
}

#[tokio::test]
async fn private_keys_are_not_readable() {
    let gw = Gateway::new("development");
    let (s, _) = gw.send(Method::GET, "/rSvc?cmd=HGET&key=session1&field=t", None, "").await;
    assert_eq!(s, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn malformed_requests_are_bad_requests() {
    let gw = Gateway::new("development");
    for uri in [
        "/rSvc?key=User1",
        "/rSvc?cmd=HGET&field=f",
        "/rSvc?cmd=HGET&key=User1",
        "/rSvc?cmd=HSET&key=User1&field=f",
        "/rSvc?cmd=NOPE&key=User1",
    ] {
        let (s, body) = gw.send(Method::GET, uri, None, "").await;
        assert_eq!(s, StatusCode::BAD_REQUEST, "{uri}");
        assert_eq!(body["error"], "BAD_REQUEST");
    }

    let (s, _) = gw.send(Method::PUT, "/rSvc?cmd=HSET&key=User1&field=f", None, "{oops").await;
    assert_eq!(s, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn bearer_tokens_are_verified() {
    let gw = Gateway::new("development");
    let (s, body) = gw
        .send(Method::GET, "/rSvc?cmd=HLEN&key=User1", Some("stolen"), "")
        .await;
    assert_eq!(s, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "AUTH_FAILED");
}

#[tokio::test]
async fn scoped_writes_are_bound_to_the_caller() {
    let gw = Gateway::new("development");

    let (s, _) = gw
        .send(Method::PUT, "/rSvc?cmd=HSET&key=Inbox&field=msg@", None, r#""hi""#)
        .await;
    assert_eq!(s, StatusCode::UNAUTHORIZED);

    let (s, body) = gw
        .send(Method::PUT, "/rSvc?cmd=HSET&key=Inbox&field=msg@", Some(TOKEN), r#""hi""#)
        .await;
    assert_eq!(s, StatusCode::OK);
    assert_eq!(body, json!({ "field": "msgalice" }));

    let stored = gw.state.store().hget("Inbox", "msgalice").await.unwrap();
    assert_eq!(stored.as_deref(), Some(&b"\"hi\""[..]));
}

#[tokio::test]
async fn calls_reach_the_echo_service() {
    let gw = Gateway::with_workers("development");

    let (s, body) = gw
        .send(
            Method::POST,
            "/rSvc?cmd=API&key=echo",
            Some(TOKEN),
            r#"{"text":"hello","caller":"mallory"}"#,
        )
        .await;
    assert_eq!(s, StatusCode::OK);
    assert_eq!(body, json!({ "text": "hello", "caller": "alice" }));

    // anonymous callers cannot claim an identity either
    let (_, body) = gw
        .send(Method::POST, "/rSvc?cmd=API&key=echo", None, r#"{"caller":"mallory"}"#)
        .await;
    assert_eq!(body, json!({}));

    gw.stop().await;
}

#[tokio::test]
async fn handler_errors_are_unprocessable() {
    let gw = Gateway::with_workers("development");
    let (s, body) = gw.send(Method::POST, "/rSvc?cmd=API&key=refuses", None, "").await;
    assert_eq!(s, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body, json!({ "error": "HANDLER_ERROR", "message": "not today" }));
    gw.stop().await;
}

#[tokio::test]
async fn calls_without_a_worker_time_out() {
    let gw = Gateway::new("development");
    let (s, body) = gw
        .send(Method::POST, "/rSvc?cmd=API&key=ghost&timeout_ms=50", None, "{}")
        .await;
    assert_eq!(s, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(body["error"], "TIMEOUT");
}

#[tokio::test]
async fn reserved_correlation_field_is_rejected() {
    let gw = Gateway::new("development");
    let (s, _) = gw
        .send(Method::POST, "/rSvc?cmd=API&key=echo", None, r#"{"BackTo":"x"}"#)
        .await;
    assert_eq!(s, StatusCode::BAD_REQUEST);

    let (s, _) = gw.send(Method::POST, "/rSvc?cmd=API&key=echo", None, "[1,2]").await;
    assert_eq!(s, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn background_tasks_start_once() {
    let gw = Gateway::with_workers("production");
    assert!(gw.state.start_background().is_err());
    gw.stop().await;
}

#[tokio::test]
async fn policy_hashes_are_not_reachable_as_data() {
    let gw = Gateway::new("development");
    let forged = r#"{"resourceKey":"Secret","createdAt":1,"denyList":["hgetall"]}"#;

    for (method, uri, body) in [
        (Method::PUT, "/rSvc?cmd=HSET&key=RedisGetPermission&field=Secret", forged),
        (Method::PUT, "/rSvc?cmd=HSET&key=RedisPostPermission&field=Junk", r#""garbage""#),
        (Method::DELETE, "/rSvc?cmd=DEL&key=RedisGetPermission", ""),
        (Method::DELETE, "/rSvc?cmd=HDEL&key=RedisPutPermission&field=User", ""),
        (Method::GET, "/rSvc?cmd=HGETALL&key=RedisGetPermission", ""),
    ] {
        let (s, body) = gw.send(method, uri, None, body).await;
        assert_eq!(s, StatusCode::FORBIDDEN, "{uri}");
        assert_eq!(body["error"], "PERMISSION_DENIED");
    }

    // nothing was written and nothing was learned for those keys
    assert!(gw.state.store().hgetall("RedisGetPermission").await.unwrap().is_empty());
    assert!(gw.state.store().hgetall("RedisPostPermission").await.unwrap().is_empty());
    assert_eq!(
        gw.state.permissions().table(qgate_core::protocol::command::Access::Write).len(),
        0
    );
    let read = gw.state.permissions().table(qgate_core::protocol::command::Access::Read);
    assert_eq!(read.refresh(gw.state.store().as_ref()).await.unwrap(), 0);
}

#[tokio::test]
async fn learned_policies_land_in_the_param_store() {
    let data = Arc::new(MemoryStore::new());
    let params = Arc::new(MemoryStore::new());
    let stores = Stores {
        data: data.clone(),
        params: params.clone(),
    };
    let mut gw = Gateway::build(AppState::with_stores(cfg("development"), stores).unwrap());
    gw.tasks = Some(gw.state.start_background().unwrap());

    let (s, _) = gw
        .send(Method::PUT, "/rSvc?cmd=HSET&key=User42&field=name", None, r#""alice""#)
        .await;
    assert_eq!(s, StatusCode::OK);

    let mut persisted = None;
    for _ in 0..50 {
        persisted = params.hget("RedisPutPermission", "User").await.unwrap();
        if persisted.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(persisted.is_some(), "policy persisted to the param store");
    assert!(data.hgetall("RedisPutPermission").await.unwrap().is_empty());
    assert!(data.hget("User42", "name").await.unwrap().is_some());

    gw.stop().await;
}

#[tokio::test]
async fn service_queues_do_not_overlap_data_keys() {
    let gw = Gateway::new("development");

    let (s, _) = gw.send(Method::PUT, "/rSvc?cmd=RPUSH&key=Orders", None, r#"{"a":1}"#).await;
    assert_eq!(s, StatusCode::OK);
    let (s, _) = gw
        .send(Method::POST, "/rSvc?cmd=API&key=Orders&timeout_ms=100", None, "{}")
        .await;
    assert_eq!(s, StatusCode::GATEWAY_TIMEOUT);

    // the data list is untouched; the request went to the service queue
    let orders = gw.state.store().lpop("Orders", 10).await.unwrap();
    assert_eq!(orders, vec![bytes::Bytes::from_static(br#"{"a":1}"#)]);
    assert_eq!(gw.state.store().lpop("api:Orders", 10).await.unwrap().len(), 1);

    // and data commands cannot reach a service queue
    for (method, uri) in [
        (Method::PUT, "/rSvc?cmd=RPUSH&key=api:echo"),
        (Method::DELETE, "/rSvc?cmd=DEL&key=api:echo"),
    ] {
        let (s, _) = gw.send(method, uri, None, "{}").await;
        assert_eq!(s, StatusCode::FORBIDDEN, "{uri}");
    }
}

#[tokio::test]
async fn sorted_sets_and_sets() {
    let gw = Gateway::new("development");

    let (s, body) = gw
        .send(Method::POST, "/rSvc?cmd=ZADD&key=Scores&score=2", None, r#""bob""#)
        .await;
    assert_eq!((s, body), (StatusCode::OK, json!(true)));
    gw.send(Method::POST, "/rSvc?cmd=ZADD&key=Scores&score=1", None, r#""alice""#).await;
    gw.send(Method::POST, "/rSvc?cmd=ZADD&key=Scores&score=3.5", None, r#"{"id":7}"#).await;

    let (_, body) = gw
        .send(Method::GET, "/rSvc?cmd=ZRANGE&key=Scores&start=0&stop=-1&withscores=true", None, "")
        .await;
    assert_eq!(body, json!(["alice", 1.0, "bob", 2.0, { "id": 7 }, 3.5]));

    let (_, body) = gw
        .send(Method::GET, "/rSvc?cmd=ZRANGE&key=Scores&start=-2&stop=-1", None, "")
        .await;
    assert_eq!(body, json!(["bob", { "id": 7 }]));

    let (_, body) = gw
        .send(Method::GET, "/rSvc?cmd=ZRANGEBYSCORE&key=Scores&min=(1&max=%2Binf", None, "")
        .await;
    assert_eq!(body, json!(["bob", { "id": 7 }]));

    let (_, body) = gw.send(Method::GET, "/rSvc?cmd=ZRANK&key=Scores&member=bob", None, "").await;
    assert_eq!(body, json!(1));
    let (_, body) = gw.send(Method::GET, "/rSvc?cmd=ZRANK&key=Scores&member=nobody", None, "").await;
    assert_eq!(body, Value::Null);

    gw.state
        .store()
        .sadd("Tags", bytes::Bytes::from_static(br#""rust""#))
        .await
        .unwrap();
    let (_, body) = gw.send(Method::GET, "/rSvc?cmd=SISMEMBER&key=Tags&member=rust", None, "").await;
    assert_eq!(body, json!(true));
    let (_, body) = gw.send(Method::GET, "/rSvc?cmd=SISMEMBER&key=Tags&member=go", None, "").await;
    assert_eq!(body, json!(false));

    // range reads are their own operations
    let read = gw.state.permissions().table(qgate_core::protocol::command::Access::Read);
    assert_eq!(read.lookup("Scores", "zrange"), Some(true));
    assert_eq!(read.lookup("Scores", "zrangebyscore"), Some(true));
    let call = gw.state.permissions().table(qgate_core::protocol::command::Access::Call);
    assert_eq!(call.lookup("Scores", "zadd"), Some(true));

    let (s, _) = gw
        .send(Method::POST, "/rSvc?cmd=ZADD&key=Scores&score=abc", None, r#""x""#)
        .await;
    assert_eq!(s, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn jsapi_passes_query_parameters_as_arguments() {
    let gw = Gateway::with_workers("development");

    let (s, body) = gw
        .send(
            Method::POST,
            "/rSvc?cmd=JSAPI&key=echo&q=rust&page=2&caller=mallory",
            Some(TOKEN),
            "",
        )
        .await;
    assert_eq!(s, StatusCode::OK);
    assert_eq!(body, json!({ "q": "rust", "page": "2", "caller": "alice" }));

    gw.stop().await;
}

#[tokio::test]
async fn oversized_bodies_are_rejected() {
    let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
    let cfg = cfg_with("development", "gateway:\n  max_body_bytes: 1024\n");
    let gw = Gateway::build(AppState::new(cfg, store).unwrap());

    let big = format!("\"{}\"", "x".repeat(2048));
    let (s, _) = gw
        .send(Method::PUT, "/rSvc?cmd=HSET&key=Blob1&field=f", None, &big)
        .await;
    assert_eq!(s, StatusCode::PAYLOAD_TOO_LARGE);

    let (s, _) = gw
        .send(Method::PUT, "/rSvc?cmd=HSET&key=Blob1&field=f", None, r#""small""#)
        .await;
    assert_eq!(s, StatusCode::OK);
}
