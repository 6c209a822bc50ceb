// http server - generate, validate, execute

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::core::{
    Claude, Db, PolicyConfig, QueryExecutor, QueryResult, ReasonCode, SqlGenerator,
    StatementType, excerpt, validate,
};
use crate::Error;

/// Shared, read-only request state. The policy is swapped only by
/// building a new state, never mutated.
pub struct AppState<G, E> {
    pub generator: G,
    pub executor: E,
    pub policy: Arc<PolicyConfig>,
    /// schema description handed to the generator
    pub schema: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct QueryRequest {
    query: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ValidateRequest {
    sql: String,
}

#[derive(Serialize)]
struct QueryResponse {
    status: &'static str,
    sql: String,
    data: QueryResult,
}

#[derive(Serialize)]
struct ValidateResponse {
    is_safe: bool,
    reason: ReasonCode,
    statement_type: Option<StatementType>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<ReasonCode>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
            reason: None,
        }),
    )
        .into_response()
}

pub fn build_app<G, E>(state: AppState<G, E>) -> Router
where
    G: SqlGenerator,
    E: QueryExecutor,
{
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/query", post(query::<G, E>))
        .route("/api/v1/validate", post(validate_sql::<G, E>))
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(Arc::new(state))
}

pub struct Server;

impl Server {
    pub async fn run(config: ServerConfig) -> Result<(), Error> {
        let db = Db::connect(&config.database_url, config.pool).await?;
        let schema = db.schema().await?;
        let claude = Claude::new(config.api_key)?;

        let app = build_app(AppState {
            generator: claude,
            executor: db,
            policy: Arc::new(config.policy),
            schema,
        });

        let addr = format!("{}:{}", config.host, config.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        info!(%addr, "server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| Error::Server(e.to_string()))?;

        info!("server stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "could not listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn not_found() -> Response {
    error_response(StatusCode::NOT_FOUND, "Resource not found")
}

async fn query<G, E>(
    State(state): State<Arc<AppState<G, E>>>,
    payload: Result<Json<QueryRequest>, JsonRejection>,
) -> Response
where
    G: SqlGenerator,
    E: QueryExecutor,
{
    let Json(req) = match payload {
        Ok(req) => req,
        Err(rejection) => return bad_payload(rejection),
    };
    if req.query.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "No query provided");
    }
    info!(bytes = req.query.len(), "received query");

    let sql = match state.generator.generate(&req.query, &state.schema).await {
        Ok(sql) => sql,
        Err(e) => {
            error!(error = %e, "sql generation failed");
            return error_response(StatusCode::BAD_GATEWAY, "SQL generation failed");
        }
    };

    let verdict = validate(&sql, &state.policy);
    if !verdict.is_safe {
        warn!(
            reason = %verdict.reason,
            detail = %verdict.detail,
            sql = %excerpt(&sql),
            "unsafe query rejected"
        );
        return (
            StatusCode::FORBIDDEN,
            Json(ErrorResponse {
                error: "forbidden".to_string(),
                reason: Some(verdict.reason),
            }),
        )
            .into_response();
    }
    debug!(statement_type = ?verdict.statement_type, "query allowed");

    match state.executor.execute(&sql).await {
        Ok(data) => (
            StatusCode::OK,
            Json(QueryResponse {
                status: "success",
                sql,
                data,
            }),
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "query execution failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Query processing failed")
        }
    }
}

async fn validate_sql<G, E>(
    State(state): State<Arc<AppState<G, E>>>,
    payload: Result<Json<ValidateRequest>, JsonRejection>,
) -> Response
where
    G: SqlGenerator,
    E: QueryExecutor,
{
    let Json(req) = match payload {
        Ok(req) => req,
        Err(rejection) => return bad_payload(rejection),
    };

    let verdict = validate(&req.sql, &state.policy);
    if !verdict.is_safe {
        info!(reason = %verdict.reason, detail = %verdict.detail, "validation denied");
    }

    Json(ValidateResponse {
        is_safe: verdict.is_safe,
        reason: verdict.reason,
        statement_type: verdict.statement_type,
    })
    .into_response()
}

// the rejection text can quote the payload, keep it out of the response
fn bad_payload(rejection: JsonRejection) -> Response {
    debug!(error = %rejection.body_text(), "malformed request body");
    error_response(StatusCode::BAD_REQUEST, "Malformed request body")
}
