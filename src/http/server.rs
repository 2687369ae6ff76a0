//! HTTP server setup.
//!
//! # Responsibilities
//! - Create the Axum router with the query, schema and health handlers
//! - Wire up middleware (request ID, tracing, timeout, body limit)
//! - Serve until the shutdown signal, then drain
//!
//! The listening socket lives for the whole process; binding a new
//! configuration goes through [`ServingGateway`] and never touches it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::State,
    http::{HeaderName, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::ListenerConfig;
use crate::health;
use crate::http::executor::{GraphRequest, GraphResponse, QueryExecutor, RootFieldExecutor};
use crate::http::gateway::ServingGateway;
use crate::http::request::{make_request_span, X_REQUEST_ID};
use crate::observability::metrics;

pub const X_SCHEMA_GENERATION: &str = "x-schema-generation";

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub gateway: ServingGateway,
    pub executor: Arc<dyn QueryExecutor>,
}

/// Public HTTP surface of the gateway.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    pub fn new(config: &ListenerConfig, gateway: ServingGateway) -> Self {
        Self::with_executor(config, gateway, Arc::new(RootFieldExecutor))
    }

    pub fn with_executor(
        config: &ListenerConfig,
        gateway: ServingGateway,
        executor: Arc<dyn QueryExecutor>,
    ) -> Self {
        let state = AppState { gateway, executor };
        Self {
            router: Self::build_router(config, state),
        }
    }

    #[allow(deprecated)]
    fn build_router(config: &ListenerConfig, state: AppState) -> Router {
        let x_request_id = HeaderName::from_static(X_REQUEST_ID);
        Router::new()
            .route("/graphql", post(graphql_handler))
            .route("/schema", get(schema_handler))
            .route("/health", get(health::health_handler))
            .with_state(state)
            .layer(RequestBodyLimitLayer::new(config.max_body_size))
            .layer(TimeoutLayer::new(Duration::from_secs(config.request_timeout_secs)))
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
                    .layer(TraceLayer::new_for_http().make_span_with(make_request_span))
                    .layer(PropagateRequestIdLayer::new(x_request_id)),
            )
    }

    /// The router, for embedding or driving with `tower::ServiceExt::oneshot`.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serve on `listener` until `shutdown` fires, then finish in-flight requests.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("HTTP server draining");
            })
            .await?;

        tracing::info!(address = %addr, "HTTP server stopped");
        Ok(())
    }
}

fn unavailable() -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(GraphResponse::error("no configuration is bound")),
    )
        .into_response()
}

async fn graphql_handler(
    State(state): State<AppState>,
    Json(request): Json<GraphRequest>,
) -> Response {
    let start = Instant::now();

    // One snapshot for the whole request; its generation is not retired
    // until the guard drops.
    let Some(active) = state.gateway.dispatch() else {
        metrics::record_request("graphql", 503, start);
        return unavailable();
    };

    tracing::debug!(
        generation = active.generation(),
        operation = ?request.operation_name,
        "Executing query"
    );
    let response = state.executor.execute(&active, &request).await;

    metrics::record_request("graphql", 200, start);
    (StatusCode::OK, Json(response)).into_response()
}

async fn schema_handler(State(state): State<AppState>) -> Response {
    let start = Instant::now();
    let Some(active) = state.gateway.current() else {
        metrics::record_request("schema", 503, start);
        return unavailable();
    };

    metrics::record_request("schema", 200, start);
    (
        StatusCode::OK,
        [(X_SCHEMA_GENERATION, active.generation().to_string())],
        active.schema().sdl.clone(),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pubsub::PubSub;
    use crate::reload::ActiveConfiguration;
    use crate::schema::compiler::compile_sdl;
    use crate::schema::CompileInput;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    fn bound_gateway(generation: u64) -> ServingGateway {
        let schema = compile_sdl(
            CompileInput {
                sdl: "type Query { hello: String }",
                data_sources: &[],
                resolvers: &[],
                subscriptions: &[],
            },
            &PubSub::new(),
        )
        .unwrap();
        let gateway = ServingGateway::new();
        gateway.bind(Arc::new(ActiveConfiguration::new(
            generation,
            schema,
            Default::default(),
            false,
        )));
        gateway
    }

    #[tokio::test]
    async fn test_schema_endpoint_reports_generation() {
        let server = HttpServer::new(&ListenerConfig::default(), bound_gateway(4));
        let res = server
            .router()
            .oneshot(Request::get("/schema").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers()[X_SCHEMA_GENERATION], "4");
        assert!(res.headers().contains_key(X_REQUEST_ID));
        let body = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        assert!(String::from_utf8_lossy(&body).contains("hello"));
    }

    #[tokio::test]
    async fn test_unbound_gateway_answers_503() {
        let server = HttpServer::new(&ListenerConfig::default(), ServingGateway::new());
        let res = server
            .router()
            .oneshot(
                Request::post("/graphql")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"query":"{ hello }"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_graphql_round_trip() {
        let server = HttpServer::new(&ListenerConfig::default(), bound_gateway(1));
        let res = server
            .router()
            .oneshot(
                Request::post("/graphql")
                    .header("content-type", "application/json")
                    .header(X_REQUEST_ID, "req-1")
                    .body(Body::from(r#"{"query":"{ hello }"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers()[X_REQUEST_ID], "req-1");
        let body = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json, serde_json::json!({ "data": { "hello": null } }));
    }
}
