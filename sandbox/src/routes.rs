//! HTTP route handlers for the sandbox service.

use analyst::core::types::{ExecutionRequest, ExecutionResult};
use analyst::io::backend::ExecutionBackend;
use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::response::Json;
use axum::routing::{get, post};
use serde_json::Value;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::state::AppState;

/// Build the service router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/run", post(run))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

/// POST /run - execute `{"code": ...}` and return the execution result.
///
/// Malformed requests still get a normal 200 reply, with the problem in
/// `stderr`, so clients only ever handle one response shape.
async fn run(State(state): State<AppState>, body: Bytes) -> Json<ExecutionResult> {
    let code = match parse_code(&body) {
        Ok(code) => code,
        Err(rejection) => {
            info!(reason = %rejection.message, "rejected run request");
            return Json(ExecutionResult::infrastructure_failure(
                &rejection.echo,
                rejection.message,
            ));
        }
    };

    let request = ExecutionRequest {
        code: code.clone(),
        input_path: None,
        timeout: state.timeout,
    };
    let backend = state.backend.clone();
    match tokio::task::spawn_blocking(move || backend.execute(&request)).await {
        Ok(result) => Json(result),
        Err(err) => {
            error!(err = %err, "execution worker failed");
            Json(ExecutionResult::infrastructure_failure(
                &code,
                format!("ExecutionError: worker failed: {err}"),
            ))
        }
    }
}

struct Rejection {
    /// Code to echo back, when the request carried a string.
    echo: String,
    message: String,
}

fn parse_code(body: &[u8]) -> Result<String, Rejection> {
    let reject = |echo: &str, message: String| Rejection {
        echo: echo.to_string(),
        message,
    };
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| reject("", format!("RequestError: body is not valid JSON: {e}")))?;
    match value.get("code") {
        Some(Value::String(code)) if code.trim().is_empty() => {
            Err(reject(code, "RequestError: empty code".to_string()))
        }
        Some(Value::String(code)) => Ok(code.clone()),
        Some(_) => Err(reject("", "RequestError: `code` must be a string".to_string())),
        None => Err(reject("", "RequestError: missing `code` field".to_string())),
    }
}
