//! HTTP endpoint for similarity queries.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::error::{PeermatchError, Result};
use crate::search::{Recommendation, SimilarityService};

#[derive(Clone)]
struct AppState {
    service: Arc<SimilarityService>,
    default_top_k: usize,
}

#[derive(Debug, Deserialize)]
struct SimilarParams {
    k: Option<usize>,
}

/// Serves `GET /similar/:email?k=N` and `GET /health`.
pub struct SimilarityServer {
    service: Arc<SimilarityService>,
    default_top_k: usize,
    allowed_origins: Vec<String>,
}

impl SimilarityServer {
    pub fn new(service: Arc<SimilarityService>, default_top_k: usize, allowed_origins: Vec<String>) -> Self {
        Self {
            service,
            default_top_k,
            allowed_origins,
        }
    }

    pub fn router(&self) -> Router {
        // No configured origins: allow any (local use)
        let cors = if self.allowed_origins.is_empty() {
            CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
        } else {
            let origins: Vec<HeaderValue> = self
                .allowed_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(origins))
                .allow_methods(Any)
                .allow_headers(Any)
        };

        Router::new()
            .route("/health", get(handle_health))
            .route("/similar/:email", get(handle_similar))
            .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(cors))
            .with_state(AppState {
                service: Arc::clone(&self.service),
                default_top_k: self.default_top_k,
            })
    }

    /// Bind to `127.0.0.1:port` and serve until the process is stopped.
    pub async fn run(&self, port: u16) -> Result<()> {
        let addr = format!("127.0.0.1:{}", port);
        let listener = tokio::net::TcpListener::bind(&addr).await.map_err(|e| {
            PeermatchError::Io(std::io::Error::new(e.kind(), format!("Failed to bind to {}: {}", addr, e)))
        })?;
        log::info!("Similarity endpoint listening on http://{}", addr);

        axum::serve(listener, self.router()).await.map_err(|e| {
            PeermatchError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("HTTP server error: {}", e),
            ))
        })?;
        Ok(())
    }
}

fn status_for(error: &PeermatchError) -> StatusCode {
    match error {
        PeermatchError::NoEmbedding(_) => StatusCode::NOT_FOUND,
        PeermatchError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::BAD_GATEWAY,
    }
}

async fn handle_health() -> Response {
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "ok",
            "service": "peermatch",
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
        .into_response()
}

async fn handle_similar(
    State(state): State<AppState>,
    Path(email): Path<String>,
    Query(params): Query<SimilarParams>,
) -> Response {
    let k = params.k.unwrap_or(state.default_top_k);
    match state.service.find_similar(&email, k).await {
        Ok(matches) => (
            StatusCode::OK,
            Json(Recommendation {
                query: email,
                top_k: k,
                matches,
                error: None,
            }),
        )
            .into_response(),
        Err(e) => {
            log::warn!("GET /similar/{} failed: {}", email, e);
            (status_for(&e), Json(Recommendation::failed(&email, k, &e))).into_response()
        }
    }
}
