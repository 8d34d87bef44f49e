use std::collections::BTreeMap;
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Map, Value};

use qgate_core::error::{QgateError, Result};
use qgate_core::protocol::command::{Access, Command};

use crate::app_state::AppState;
use crate::context::{caller_from_headers, Caller};
use crate::obs::GatewayMetrics;
use crate::store::{KvStore, ScoredMember};

use super::codec::{DataQuery, DataRequest};
use super::error::ApiError;

/// Argument injected into every call with the verified caller subject.
pub const CALLER_FIELD: &str = "caller";

pub async fn get_data(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<BTreeMap<String, String>>,
) -> Response {
    let res = serve(&state, Access::Read, &headers, DataQuery::from_params(q), Bytes::new()).await;
    respond(&state, "GET", res)
}

pub async fn put_data(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<BTreeMap<String, String>>,
    body: Bytes,
) -> Response {
    let res = serve(&state, Access::Write, &headers, DataQuery::from_params(q), body).await;
    respond(&state, "PUT", res)
}

pub async fn delete_data(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<BTreeMap<String, String>>,
) -> Response {
    let res = serve(&state, Access::Delete, &headers, DataQuery::from_params(q), Bytes::new()).await;
    respond(&state, "DELETE", res)
}

pub async fn post_call(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<BTreeMap<String, String>>,
    body: Bytes,
) -> Response {
    let res = serve(&state, Access::Call, &headers, DataQuery::from_params(q), body).await;
    respond(&state, "POST", res)
}

fn respond(state: &AppState, method: &'static str, res: Result<Value>) -> Response {
    let code = match &res {
        Ok(_) => "OK",
        Err(e) => e.client_code().as_str(),
    };
    state
        .metrics()
        .http_requests
        .inc(&[("method", method), ("code", code)]);

    match res {
        Ok(v) => (StatusCode::OK, Json(v)).into_response(),
        Err(e) => ApiError(e).into_response(),
    }
}

async fn serve(
    state: &AppState,
    access: Access,
    headers: &HeaderMap,
    q: DataQuery,
    body: Bytes,
) -> Result<Value> {
    let req = q.decode(access)?;
    if !req.cmd.is_service_call() && state.is_reserved_key(&req.key) {
        tracing::debug!(key = %req.key, op = req.cmd.verb(), "reserved key refused");
        return Err(QgateError::PermissionDenied(format!("key {} is reserved", req.key)));
    }
    let caller = caller_from_headers(headers, state.verifier())?;
    let bound_field = authorize(state, &req, caller.as_ref())?;

    match &req.cmd {
        Command::Api => {
            let args = call_args(&body)?;
            call(state, &req, caller, args).await
        }
        Command::JsApi { form } => {
            let args = form
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect();
            call(state, &req, caller, args).await
        }
        cmd => execute(state.store().as_ref(), &req.key, cmd, bound_field, &body).await,
    }
}

fn authorize(state: &AppState, req: &DataRequest, caller: Option<&Caller>) -> Result<Option<String>> {
    let res = state.permissions().authorize(&req.key, &req.cmd, caller);
    let outcome = match &res {
        Ok(_) => "allow",
        Err(QgateError::PermissionDenied(reason)) => {
            tracing::debug!(key = %req.key, op = req.cmd.verb(), reason = %reason, "permission denied");
            "deny"
        }
        Err(_) => return res,
    };
    state.metrics().permission_decisions.inc(&[
        ("access", req.cmd.access().as_str()),
        ("outcome", outcome),
    ]);
    res
}

/// Run a data command. `bound_field` replaces the command's field for a
/// field-scoped write.
pub async fn execute(
    store: &dyn KvStore,
    key: &str,
    cmd: &Command,
    bound_field: Option<String>,
    body: &[u8],
) -> Result<Value> {
    let out = match cmd {
        Command::HGet { field } => store
            .hget(key, field)
            .await?
            .map(|v| decode_value(&v))
            .unwrap_or(Value::Null),
        // missing fields are left out
        Command::HMGet { fields } => Value::Object(
            fields
                .iter()
                .zip(store.hmget(key, fields).await?)
                .filter_map(|(f, v)| Some((f.clone(), decode_value(&v?))))
                .collect::<Map<_, _>>(),
        ),
        Command::HGetAll => Value::Object(
            store
                .hgetall(key)
                .await?
                .into_iter()
                .map(|(f, v)| (f, decode_value(&v)))
                .collect::<Map<_, _>>(),
        ),
        Command::HKeys => json!(store.hkeys(key).await?),
        Command::HVals => Value::Array(
            store
                .hvals(key)
                .await?
                .iter()
                .map(|v| decode_value(v))
                .collect(),
        ),
        Command::HLen => json!(store.hlen(key).await?),
        Command::HExists { field } => json!(store.hexists(key, field).await?),
        Command::SIsMember { member } => json!(store.sismember(key, &member_bytes(member)?).await?),
        Command::ZRange {
            start,
            stop,
            with_scores,
        } => render_scored(store.zrange(key, *start, *stop).await?, *with_scores),
        Command::ZRangeByScore {
            min,
            max,
            with_scores,
        } => render_scored(store.zrange_by_score(key, *min, *max).await?, *with_scores),
        Command::ZRank { member } => json!(store.zrank(key, &member_bytes(member)?).await?),
        Command::HSet { field } => {
            let field = bound_field.as_deref().unwrap_or(field);
            store.hset(key, field, encode_body(body)?).await?;
            json!({ "field": field })
        }
        Command::RPush => json!(store.rpush(key, encode_body(body)?).await?),
        Command::HDel { field } => json!(store.hdel(key, field).await?),
        Command::Del => json!(store.del(key).await?),
        Command::ZAdd { score } => json!(store.zadd(key, *score, encode_body(body)?).await?),
        Command::Api | Command::JsApi { .. } => {
            return Err(QgateError::Internal("call command on the data path".into()));
        }
    };
    Ok(out)
}

async fn call(
    state: &AppState,
    req: &DataRequest,
    caller: Option<Caller>,
    mut args: Map<String, Value>,
) -> Result<Value> {
    // never trust a client-supplied identity
    args.remove(CALLER_FIELD);
    if let Some(caller) = caller {
        args.insert(CALLER_FIELD.to_string(), Value::String(caller.subject));
    }

    let max = state.cfg().dispatch.call_timeout();
    let timeout = req.timeout.map_or(max, |t| t.min(max));
    let service = req.key.as_str();

    let metrics = state.metrics();
    let _inflight = Inflight::enter(metrics, service);
    let started = Instant::now();
    let res = state.dispatch().call_service(service, args, timeout).await;

    let outcome = match &res {
        Ok(_) => "OK",
        Err(e) => e.client_code().as_str(),
    };
    metrics
        .dispatch_duration
        .observe(&[("service", service)], started.elapsed());
    metrics
        .dispatch_calls
        .inc(&[("service", service), ("outcome", outcome)]);
    res
}

fn call_args(body: &[u8]) -> Result<Map<String, Value>> {
    if body.is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_slice(body) {
        Ok(Value::Object(args)) => Ok(args),
        Ok(_) => Err(QgateError::BadRequest("call body must be a JSON object".into())),
        Err(e) => Err(QgateError::BadRequest(format!("invalid json body: {e}"))),
    }
}

/// Stored values are JSON documents.
fn encode_body(body: &[u8]) -> Result<Bytes> {
    if body.is_empty() {
        return Err(QgateError::BadRequest("empty body".into()));
    }
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| QgateError::BadRequest(format!("invalid json body: {e}")))?;
    serde_json::to_vec(&value)
        .map(Bytes::from)
        .map_err(|e| QgateError::Internal(format!("value encode: {e}")))
}

/// A member named in the query is matched against stored JSON: valid JSON
/// text is taken as is, anything else as a JSON string.
fn member_bytes(raw: &str) -> Result<Vec<u8>> {
    let value = serde_json::from_str::<Value>(raw)
        .unwrap_or_else(|_| Value::String(raw.to_string()));
    serde_json::to_vec(&value).map_err(|e| QgateError::Internal(format!("member encode: {e}")))
}

/// Flat `[member, score, ...]` with scores, members only without.
fn render_scored(members: Vec<ScoredMember>, with_scores: bool) -> Value {
    let mut out = Vec::with_capacity(members.len() * if with_scores { 2 } else { 1 });
    for m in members {
        out.push(decode_value(&m.member));
        if with_scores {
            out.push(json!(m.score));
        }
    }
    Value::Array(out)
}

/// Values written by other clients may not be JSON; those come back as strings.
fn decode_value(raw: &[u8]) -> Value {
    serde_json::from_slice(raw)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(raw).into_owned()))
}

/// Tracks in-flight calls; decrements on drop so a cancelled request is
/// counted out too.
struct Inflight<'a> {
    metrics: &'a GatewayMetrics,
    service: &'a str,
}

impl<'a> Inflight<'a> {
    fn enter(metrics: &'a GatewayMetrics, service: &'a str) -> Self {
        metrics.dispatch_inflight.inc(&[("service", service)]);
        Self { metrics, service }
    }
}

impl Drop for Inflight<'_> {
    fn drop(&mut self) {
        self.metrics
            .dispatch_inflight
            .dec(&[("service", self.service)]);
    }
}
