//! HTTP control-plane adapter
//!
//! Exposes the registry and stats collector under `/api/v1` with the
//! response envelope `{success, message?, data?, error?}`. When an auth
//! token is configured every request must carry `Authorization: Bearer
//! <token>`; CORS, when enabled, permits all origins.
//!
//! The adapter is a thin shim: each route maps onto exactly one engine
//! call, and engine errors travel through the envelope unchanged.

use crate::{DaemonError, Result};
use chrono::{DateTime, Utc};
use gemstone_core::config::ApiConfig;
use gemstone_core::{Registry, StatsCollector};
use hyper::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use schema::{ApiResponse, DaemonInfo, LogKind, StartRequest};
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::oneshot;
use tracing::{debug, info};

/// Default number of entries returned by history and log endpoints
const DEFAULT_LIMIT: usize = 100;

/// The control-plane HTTP server
pub struct ApiServer {
    config: ApiConfig,
    registry: Arc<Registry>,
    collector: Arc<StatsCollector>,
    started_at: DateTime<Utc>,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
}

impl ApiServer {
    /// Create a server for the given engine handles
    pub fn new(config: ApiConfig, registry: Arc<Registry>, collector: Arc<StatsCollector>) -> Self {
        Self {
            config,
            registry,
            collector,
            started_at: Utc::now(),
            shutdown: Mutex::new(None),
        }
    }

    /// Bind and serve until [`stop`](Self::stop) is called.
    ///
    /// A bind failure is fatal to the caller: the supervisor must not run
    /// without its control surface.
    pub async fn serve(self: Arc<Self>) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port)
            .parse()
            .map_err(|e| DaemonError::Server(format!("invalid API address: {e}")))?;

        let (tx, rx) = oneshot::channel();
        *self
            .shutdown
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(tx);

        let this = Arc::clone(&self);
        let make_svc = make_service_fn(move |_conn| {
            let this = Arc::clone(&this);
            async move {
                Ok::<_, Infallible>(service_fn(move |req| {
                    let this = Arc::clone(&this);
                    async move { Ok::<_, Infallible>(this.handle(req).await) }
                }))
            }
        });

        let server = Server::try_bind(&addr)
            .map_err(|e| DaemonError::Server(format!("failed to bind {addr}: {e}")))?
            .serve(make_svc)
            .with_graceful_shutdown(async {
                let _ = rx.await;
            });

        info!("API server listening on {}", addr);
        server.await.map_err(DaemonError::Http)
    }

    /// Begin graceful shutdown: stop accepting and drain in-flight requests
    pub fn stop(&self) {
        if let Some(tx) = self
            .shutdown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            let _ = tx.send(());
        }
    }

    async fn handle(&self, req: Request<Body>) -> Response<Body> {
        if self.config.enable_cors && req.method() == Method::OPTIONS {
            let mut resp = Response::new(Body::empty());
            *resp.status_mut() = StatusCode::NO_CONTENT;
            return self.finish(resp);
        }

        if !self.authorized(&req) {
            return self.finish(json_response(
                StatusCode::UNAUTHORIZED,
                &ApiResponse::err("unauthorized"),
            ));
        }

        let resp = self.route(req).await;
        self.finish(resp)
    }

    fn authorized(&self, req: &Request<Body>) -> bool {
        if self.config.auth_token.is_empty() {
            return true;
        }
        let expected = format!("Bearer {}", self.config.auth_token);
        req.headers()
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(|v| v == expected)
            .unwrap_or(false)
    }

    fn finish(&self, mut resp: Response<Body>) -> Response<Body> {
        if self.config.enable_cors {
            let headers = resp.headers_mut();
            headers.insert(
                "Access-Control-Allow-Origin",
                HeaderValue::from_static("*"),
            );
            headers.insert(
                "Access-Control-Allow-Credentials",
                HeaderValue::from_static("true"),
            );
            headers.insert(
                "Access-Control-Allow-Headers",
                HeaderValue::from_static("Content-Type, Content-Length, Accept-Encoding, Authorization, Accept, Origin, Cache-Control, X-Requested-With"),
            );
            headers.insert(
                "Access-Control-Allow-Methods",
                HeaderValue::from_static("POST, OPTIONS, GET, PUT, DELETE"),
            );
        }
        resp
    }

    async fn route(&self, req: Request<Body>) -> Response<Body> {
        let path = req.uri().path().to_string();
        let params = query_params(req.uri().query());

        let Some(rest) = path.strip_prefix("/api/v1") else {
            return not_found();
        };
        let segments: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();

        debug!("{} {}", req.method(), path);

        match (req.method().clone(), segments.as_slice()) {
            (Method::GET, ["health"]) => json_response(
                StatusCode::OK,
                &ApiResponse::ok_message("Gemstone daemon is running"),
            ),
            (Method::GET, ["system"]) => self.system_info(),
            (Method::GET, ["system", "stats"]) => {
                json_response(StatusCode::OK, &ApiResponse::ok(self.collector.current()))
            }
            (Method::GET, ["system", "stats", "history"]) => json_response(
                StatusCode::OK,
                &ApiResponse::ok(self.collector.history(limit(&params))),
            ),
            (Method::GET, ["processes"]) => {
                json_response(StatusCode::OK, &ApiResponse::ok(self.registry.list()))
            }
            (Method::POST, ["processes"]) => self.create_process(req).await,
            (Method::GET, ["processes", target]) => match self.registry.get(target) {
                Some(info) => json_response(StatusCode::OK, &ApiResponse::ok(info)),
                None => json_response(
                    StatusCode::NOT_FOUND,
                    &ApiResponse::err("process not found"),
                ),
            },
            (Method::DELETE, ["processes", target]) => match self.registry.delete(target) {
                Ok(()) => json_response(StatusCode::OK, &ApiResponse::ok_message("Process deleted")),
                Err(e) => engine_error(&e),
            },
            (Method::POST, ["processes", target, "stop"]) => match self.registry.stop(target) {
                Ok(()) => json_response(StatusCode::OK, &ApiResponse::ok_message("Process stopped")),
                Err(e) => engine_error(&e),
            },
            (Method::POST, ["processes", target, "restart"]) => {
                match self.registry.restart(target).await {
                    Ok(()) => json_response(
                        StatusCode::OK,
                        &ApiResponse::ok_message("Process restarted"),
                    ),
                    Err(e) => engine_error(&e),
                }
            }
            (Method::GET, ["processes", target, "stats"]) => match self.registry.stats(target) {
                Some(stats) => json_response(StatusCode::OK, &ApiResponse::ok(stats)),
                None => json_response(
                    StatusCode::NOT_FOUND,
                    &ApiResponse::err("process not found or not running"),
                ),
            },
            (Method::GET, ["processes", target, "stats", "history"]) => {
                match self.registry.stats_history(target, limit(&params)) {
                    Some(history) => json_response(StatusCode::OK, &ApiResponse::ok(history)),
                    None => json_response(
                        StatusCode::NOT_FOUND,
                        &ApiResponse::err("process not found"),
                    ),
                }
            }
            (Method::GET, ["processes", target, "logs"]) => {
                let lines = params
                    .get("lines")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(DEFAULT_LIMIT);
                let kind = LogKind::from_query(params.get("type").map(String::as_str));
                match self.registry.logs(target, lines, kind) {
                    Ok(logs) => json_response(StatusCode::OK, &ApiResponse::ok(logs)),
                    Err(e) => engine_error(&e),
                }
            }
            _ => not_found(),
        }
    }

    fn system_info(&self) -> Response<Body> {
        let info = DaemonInfo {
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime: (Utc::now() - self.started_at).num_seconds(),
            started_at: self.started_at,
            process_count: self.registry.count(),
            running_count: self.registry.running_count(),
            system_stats: self.collector.current(),
        };
        json_response(StatusCode::OK, &ApiResponse::ok(info))
    }

    async fn create_process(&self, req: Request<Body>) -> Response<Body> {
        let body = match hyper::body::to_bytes(req.into_body()).await {
            Ok(body) => body,
            Err(e) => {
                return json_response(
                    StatusCode::BAD_REQUEST,
                    &ApiResponse::err(format!("failed to read request body: {e}")),
                )
            }
        };

        let request: StartRequest = match serde_json::from_slice(&body) {
            Ok(request) => request,
            Err(e) => {
                return json_response(StatusCode::BAD_REQUEST, &ApiResponse::err(e.to_string()))
            }
        };

        if request.name.is_empty() || request.command.is_empty() {
            return json_response(
                StatusCode::BAD_REQUEST,
                &ApiResponse::err("name and command are required"),
            );
        }

        match self.registry.create(request) {
            Ok(info) => json_response(
                StatusCode::CREATED,
                &ApiResponse::ok_with("Process started", info),
            ),
            Err(e) => engine_error(&e),
        }
    }
}

impl std::fmt::Debug for ApiServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiServer")
            .field("host", &self.config.host)
            .field("port", &self.config.port)
            .finish_non_exhaustive()
    }
}

fn json_response(status: StatusCode, payload: &ApiResponse) -> Response<Body> {
    let body = serde_json::to_vec(payload).unwrap_or_else(|_| b"{}".to_vec());
    let mut resp = Response::new(Body::from(body));
    *resp.status_mut() = status;
    resp.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    resp
}

fn not_found() -> Response<Body> {
    json_response(StatusCode::NOT_FOUND, &ApiResponse::err("not found"))
}

/// Map an engine error onto the contract's status codes: lookups that miss
/// keep their routes' 404s (handled at the call sites); everything else is
/// a 500 with the error text in the envelope.
fn engine_error(err: &gemstone_core::CoreError) -> Response<Body> {
    json_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        &ApiResponse::err(err.to_string()),
    )
}

fn query_params(query: Option<&str>) -> HashMap<String, String> {
    query
        .unwrap_or("")
        .split('&')
        .filter(|s| !s.is_empty())
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            Some((key.to_string(), value.to_string()))
        })
        .collect()
}

fn limit(params: &HashMap<String, String>) -> usize {
    params
        .get("limit")
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_LIMIT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gemstone_core::probe::{FixedHostProbe, FixedProbe};
    use std::time::Duration;

    fn test_server(token: &str) -> (Arc<ApiServer>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(
            Registry::new(
                dir.path().join("data"),
                dir.path().join("log"),
                Arc::new(FixedProbe::default()),
            )
            .unwrap(),
        );
        let collector = Arc::new(StatsCollector::new(
            &registry,
            Arc::new(FixedHostProbe::default()),
            Duration::from_secs(60),
        ));
        let config = ApiConfig {
            auth_token: token.to_string(),
            ..ApiConfig::default()
        };
        (
            Arc::new(ApiServer::new(config, registry, collector)),
            dir,
        )
    }

    fn get(path: &str) -> Request<Body> {
        Request::builder()
            .method(Method::GET)
            .uri(path)
            .body(Body::empty())
            .unwrap()
    }

    fn post(path: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri(path)
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn envelope(resp: Response<Body>) -> ApiResponse {
        let bytes = hyper::body::to_bytes(resp.into_body()).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_returns_envelope() {
        let (server, _dir) = test_server("");
        let resp = server.handle(get("/api/v1/health")).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = envelope(resp).await;
        assert!(body.success);
        assert!(body.message.unwrap().contains("running"));
    }

    #[tokio::test]
    async fn unknown_route_is_404() {
        let (server, _dir) = test_server("");
        let resp = server.handle(get("/api/v1/nope")).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let resp = server.handle(get("/other/prefix")).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn missing_bearer_token_is_401() {
        let (server, _dir) = test_server("sekrit");

        let resp = server.handle(get("/api/v1/health")).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let req = Request::builder()
            .method(Method::GET)
            .uri("/api/v1/health")
            .header(AUTHORIZATION, "Bearer wrong")
            .body(Body::empty())
            .unwrap();
        assert_eq!(server.handle(req).await.status(), StatusCode::UNAUTHORIZED);

        let req = Request::builder()
            .method(Method::GET)
            .uri("/api/v1/health")
            .header(AUTHORIZATION, "Bearer sekrit")
            .body(Body::empty())
            .unwrap();
        assert_eq!(server.handle(req).await.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn create_requires_name_and_command() {
        let (server, _dir) = test_server("");

        let resp = server
            .handle(post("/api/v1/processes", r#"{"name":"","command":""}"#))
            .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = server.handle(post("/api/v1/processes", "not json")).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn create_get_stop_delete_flow() {
        let (server, _dir) = test_server("");

        let resp = server
            .handle(post(
                "/api/v1/processes",
                r#"{"name":"napper","command":"/bin/sh","args":["-c","sleep 30"]}"#,
            ))
            .await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body = envelope(resp).await;
        let id = body.data.unwrap()["id"].as_str().unwrap().to_string();

        let resp = server.handle(get(&format!("/api/v1/processes/{id}"))).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = envelope(resp).await;
        assert_eq!(body.data.unwrap()["status"], "running");

        // name conflict surfaces as a 500 with the engine's message
        let resp = server
            .handle(post(
                "/api/v1/processes",
                r#"{"name":"napper","command":"/bin/sh","args":["-c","sleep 30"]}"#,
            ))
            .await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = envelope(resp).await;
        assert!(body.error.unwrap().contains("already exists"));

        let resp = server
            .handle(post(&format!("/api/v1/processes/{id}/stop"), ""))
            .await;
        assert_eq!(resp.status(), StatusCode::OK);

        // stopping an already-stopping process is an engine error, not a 404
        let resp = server
            .handle(post(&format!("/api/v1/processes/{id}/stop"), ""))
            .await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let req = Request::builder()
            .method(Method::DELETE)
            .uri(format!("/api/v1/processes/{id}"))
            .body(Body::empty())
            .unwrap();
        let resp = server.handle(req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = server.handle(get(&format!("/api/v1/processes/{id}"))).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn stats_routes_distinguish_missing_from_stopped() {
        let (server, _dir) = test_server("");

        let resp = server.handle(get("/api/v1/processes/ghost/stats")).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let resp = server
            .handle(get("/api/v1/processes/ghost/stats/history"))
            .await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = server
            .handle(post(
                "/api/v1/processes",
                r#"{"name":"quick","command":"/bin/true"}"#,
            ))
            .await;
        assert_eq!(resp.status(), StatusCode::CREATED);

        // once the child exits, current stats 404 but history stays reachable
        tokio::time::sleep(Duration::from_millis(500)).await;
        let resp = server.handle(get("/api/v1/processes/quick/stats")).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let resp = server
            .handle(get("/api/v1/processes/quick/stats/history?limit=5"))
            .await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn system_endpoints_answer() {
        let (server, _dir) = test_server("");

        let resp = server.handle(get("/api/v1/system")).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = envelope(resp).await;
        let data = body.data.unwrap();
        assert_eq!(data["process_count"], 0);
        assert!(data["system_stats"].is_object());

        let resp = server.handle(get("/api/v1/system/stats")).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let resp = server.handle(get("/api/v1/system/stats/history?limit=10")).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn cors_preflight_and_headers() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(
            Registry::new(
                dir.path().join("data"),
                dir.path().join("log"),
                Arc::new(FixedProbe::default()),
            )
            .unwrap(),
        );
        let collector = Arc::new(StatsCollector::new(
            &registry,
            Arc::new(FixedHostProbe::default()),
            Duration::from_secs(60),
        ));
        let config = ApiConfig {
            enable_cors: true,
            ..ApiConfig::default()
        };
        let server = Arc::new(ApiServer::new(config, registry, collector));

        let req = Request::builder()
            .method(Method::OPTIONS)
            .uri("/api/v1/processes")
            .body(Body::empty())
            .unwrap();
        let resp = server.handle(req).await;
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        assert_eq!(
            resp.headers().get("Access-Control-Allow-Origin").unwrap(),
            "*"
        );

        let resp = server.handle(get("/api/v1/health")).await;
        assert!(resp.headers().contains_key("Access-Control-Allow-Methods"));
    }
}
