//! Axum-based JSON-RPC server.
//!
//! One POST endpoint carries every method; dispatch branches on the
//! JSON-RPC method name. The observed remote address rides along so host
//! registration can derive a dial-back URI when the request doesn't
//! carry one.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::extract::{ConnectInfo, State};
use axum::http::HeaderValue;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{debug, warn};

use peerpool_core::requests::{ClientRequest, HostRequest, UpdateRequest, WithdrawRequest};
use peerpool_core::{PaymentService, Pool, PoolError, PoolStatus};
use peerpool_store::Store;

use crate::envelope::verify_envelope;
use crate::error::error_code;

/// Everything a request handler needs; shared across connections.
pub struct RpcState {
    pub pool: Arc<Pool>,
    pub payment: Arc<PaymentService>,
    pub status: Arc<PoolStatus>,
    pub store: Arc<dyn Store>,
}

#[derive(Deserialize)]
pub struct RpcRequest {
    #[serde(default)]
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Serialize)]
pub struct RpcResponse {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorBody>,
}

#[derive(Serialize)]
pub struct RpcErrorBody {
    pub code: i32,
    pub message: String,
    /// Operator-facing remediation, when the error kind has one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl RpcResponse {
    fn result(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    fn error(id: Value, code: i32, message: String, data: Option<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(RpcErrorBody {
                code,
                message,
                data,
            }),
        }
    }
}

/// Build the RPC router. `allow_origin` populates the CORS layer for
/// browser-based dashboards; unset means same-origin only.
pub fn router(state: Arc<RpcState>, allow_origin: Option<&str>) -> Router {
    let mut cors = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if let Some(origin) = allow_origin {
        cors = match origin {
            "*" => cors.allow_origin(Any),
            origin => match origin.parse::<HeaderValue>() {
                Ok(value) => cors.allow_origin(AllowOrigin::exact(value)),
                Err(_) => {
                    warn!(origin, "unparsable allow_origin, falling back to same-origin");
                    cors
                }
            },
        };
    }

    Router::new()
        .route("/", post(handle))
        .layer(cors)
        .with_state(state)
}

async fn handle(
    State(state): State<Arc<RpcState>>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    Json(request): Json<RpcRequest>,
) -> Json<RpcResponse> {
    let RpcRequest { id, method, params } = request;
    debug!(%method, %remote, "rpc request");
    match dispatch(&state, Some(remote.ip()), &method, params).await {
        Ok(result) => Json(RpcResponse::result(id, result)),
        Err(err) => Json(RpcResponse::error(
            id,
            error_code(&err),
            err.to_string(),
            err.remediation().map(str::to_string),
        )),
    }
}

/// Route one JSON-RPC call to the pool. Split from the HTTP layer so the
/// full surface is testable without sockets.
pub async fn dispatch(
    state: &RpcState,
    remote_ip: Option<IpAddr>,
    method: &str,
    params: Value,
) -> Result<Value, PoolError> {
    match method {
        "vipnode_host" => {
            let caller = verify_envelope(&state.store, method, &params)?;
            let req: HostRequest = parse_params(params)?;
            encode(state.pool.host(&caller, remote_ip, req)?)
        }
        "vipnode_client" => {
            let caller = verify_envelope(&state.store, method, &params)?;
            let req: ClientRequest = parse_params(params)?;
            encode(state.pool.client(&caller, req)?)
        }
        "vipnode_update" => {
            let caller = verify_envelope(&state.store, method, &params)?;
            let req: UpdateRequest = parse_params(params)?;
            encode(state.pool.update(&caller, req)?)
        }
        "vipnode_disconnect" => {
            let caller = verify_envelope(&state.store, method, &params)?;
            state.pool.disconnect(&caller)?;
            Ok(Value::Object(serde_json::Map::new()))
        }
        "pool_withdraw" => {
            let caller = verify_envelope(&state.store, method, &params)?;
            let req: WithdrawRequest = parse_params(params)?;
            encode(state.payment.withdraw(&caller, req.amount).await?)
        }
        "pool_status" => encode(state.status.status().await?),
        other => Err(PoolError::InvalidRequest(format!("unknown method: {other}"))),
    }
}

fn parse_params<T: serde::de::DeserializeOwned>(params: Value) -> Result<T, PoolError> {
    serde_json::from_value(params)
        .map_err(|e| PoolError::InvalidRequest(format!("invalid params: {e}")))
}

fn encode<T: Serialize>(value: T) -> Result<Value, PoolError> {
    serde_json::to_value(value)
        .map_err(|e| PoolError::InvalidRequest(format!("unencodable response: {e}")))
}
