//! Request dispatcher - the request-facing surface
//!
//! `Dispatcher::execute` validates a request and hands it to an `Executor`
//! (the isolation manager in production). `router` exposes it as
//! `POST /exec`. No state is shared between calls.

use async_trait::async_trait;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::num::NonZeroU64;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::core::{ExecutionRequest, ExecutionResult};
use crate::error::ExecError;

/// Runs one validated request to a result
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionResult, ExecError>;
}

/// Stateless front door for execution requests
#[derive(Clone)]
pub struct Dispatcher {
    executor: Arc<dyn Executor>,
}

impl Dispatcher {
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        Self { executor }
    }

    /// Validate and execute. Rejects a non-positive `max_duration_ms`
    /// before anything is spawned.
    pub async fn execute(
        &self,
        code: String,
        stdin: String,
        max_duration_ms: i64,
    ) -> Result<ExecutionResult, ExecError> {
        let max_duration_ms = u64::try_from(max_duration_ms)
            .ok()
            .and_then(NonZeroU64::new)
            .ok_or_else(|| {
                ExecError::InvalidRequest("'max_duration_ms' must be positive".to_string())
            })?;
        self.executor
            .execute(ExecutionRequest::new(code, stdin, max_duration_ms))
            .await
    }
}

/// JSON body of `POST /exec`
#[derive(Debug, Serialize, Deserialize)]
pub struct ExecRequestBody {
    pub code: String,
    #[serde(default)]
    pub stdin: String,
    pub max_duration_ms: i64,
}

/// JSON body of every non-200 response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

fn error_response(status: StatusCode, message: String) -> Response {
    (status, Json(ErrorBody { error: message })).into_response()
}

pub async fn handle_exec(
    State(dispatcher): State<Dispatcher>,
    payload: Result<Json<ExecRequestBody>, JsonRejection>,
) -> Response {
    let started = Instant::now();
    let Json(body) = match payload {
        Ok(body) => body,
        Err(rejection) => {
            warn!("POST /exec rejected: {}", rejection.body_text());
            return error_response(
                StatusCode::BAD_REQUEST,
                format!("Invalid request: {}", rejection.body_text()),
            );
        }
    };

    info!(
        "POST /exec code={}B stdin={}B max_duration_ms={}",
        body.code.len(),
        body.stdin.len(),
        body.max_duration_ms
    );

    match dispatcher
        .execute(body.code, body.stdin, body.max_duration_ms)
        .await
    {
        Ok(result) => {
            info!(
                "POST /exec -> {} latency={}ms",
                result.status,
                started.elapsed().as_millis()
            );
            (StatusCode::OK, Json(result)).into_response()
        }
        Err(e) if e.is_client_error() => {
            warn!("POST /exec rejected: {}", e);
            error_response(StatusCode::BAD_REQUEST, e.to_string())
        }
        Err(e) => {
            error!("POST /exec failed: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

pub fn router(dispatcher: Dispatcher) -> Router {
    Router::new()
        .route("/exec", post(handle_exec))
        .with_state(dispatcher)
}

/// Serve `POST /exec` until `shutdown` resolves
pub async fn serve(
    listener: TcpListener,
    dispatcher: Dispatcher,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    axum::serve(listener, router(dispatcher))
        .with_graceful_shutdown(shutdown)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ExecutionStatus;
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    /// Executor double: echoes the code back as stdout
    #[derive(Default)]
    struct EchoExecutor {
        calls: AtomicUsize,
        fail_spawn: bool,
    }

    #[async_trait]
    impl Executor for EchoExecutor {
        async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionResult, ExecError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_spawn {
                return Err(ExecError::Spawn(io::Error::other("no processes left")));
            }
            Ok(ExecutionResult {
                status: ExecutionStatus::Success,
                stdout: request.code,
                stderr: format!("{}:{}", request.stdin, request.max_duration_ms),
            })
        }
    }

    fn dispatcher(executor: Arc<EchoExecutor>) -> Dispatcher {
        Dispatcher::new(executor)
    }

    async fn body_json<T: serde::de::DeserializeOwned>(response: Response) -> T {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn body(
        code: &str,
        stdin: &str,
        max_duration_ms: i64,
    ) -> Result<Json<ExecRequestBody>, JsonRejection> {
        Ok(Json(ExecRequestBody {
            code: code.into(),
            stdin: stdin.into(),
            max_duration_ms,
        }))
    }

    #[tokio::test]
    async fn test_execute_passes_request_through() {
        let executor = Arc::new(EchoExecutor::default());
        let result = dispatcher(executor.clone())
            .execute("echo 1;".into(), "in".into(), 1000)
            .await
            .unwrap();
        assert_eq!(result.stdout, "echo 1;");
        assert_eq!(result.stderr, "in:1000");
        assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_execute_rejects_non_positive_duration() {
        let executor = Arc::new(EchoExecutor::default());
        for max_duration_ms in [0, -1, i64::MIN] {
            let err = dispatcher(executor.clone())
                .execute("".into(), "".into(), max_duration_ms)
                .await
                .unwrap_err();
            assert!(err.is_client_error());
            assert!(err.to_string().contains("max_duration_ms"));
        }
        assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_handle_exec_ok() {
        let executor = Arc::new(EchoExecutor::default());
        let response = handle_exec(State(dispatcher(executor)), body("echo 1;", "", 500)).await;
        assert_eq!(response.status(), StatusCode::OK);

        let result: ExecutionResult = body_json(response).await;
        assert_eq!(result.status, ExecutionStatus::Success);
        assert_eq!(result.stdout, "echo 1;");
    }

    #[tokio::test]
    async fn test_handle_exec_zero_duration_is_bad_request() {
        let executor = Arc::new(EchoExecutor::default());
        let response = handle_exec(State(dispatcher(executor)), body("", "", 0)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let error: ErrorBody = body_json(response).await;
        assert!(error.error.starts_with("Invalid request"));
    }

    #[tokio::test]
    async fn test_handle_exec_spawn_failure_is_server_error() {
        let executor = Arc::new(EchoExecutor {
            fail_spawn: true,
            ..Default::default()
        });
        let response = handle_exec(State(dispatcher(executor)), body("", "", 100)).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let error: ErrorBody = body_json(response).await;
        assert!(error.error.contains("no processes left"));
    }

    #[test]
    fn test_stdin_defaults_to_empty() {
        let body: ExecRequestBody =
            serde_json::from_str(r#"{"code":"echo 1;","max_duration_ms":10}"#).unwrap();
        assert_eq!(body.stdin, "");
    }

    async fn post_raw(addr: std::net::SocketAddr, payload: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let request = format!(
            "POST /exec HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            payload.len(),
            payload
        );
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn test_router_over_http() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let server = tokio::spawn(serve(
            listener,
            dispatcher(Arc::new(EchoExecutor::default())),
            async move {
                let _ = stop_rx.await;
            },
        ));

        let ok = post_raw(addr, r#"{"code":"echo 1;","stdin":"","max_duration_ms":1000}"#).await;
        assert!(ok.starts_with("HTTP/1.1 200"), "{}", ok);
        assert!(ok.contains(r#""status":"success""#));

        let invalid = post_raw(addr, "not json").await;
        assert!(invalid.starts_with("HTTP/1.1 400"), "{}", invalid);
        assert!(invalid.contains("Invalid request"));

        let _ = stop_tx.send(());
        tokio_test::assert_ok!(server.await.unwrap());
    }
}
