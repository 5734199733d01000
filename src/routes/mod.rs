pub mod api;

use std::sync::Arc;
use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::docs::ApiDoc;
use crate::handlers::{health_check, ready_check};
use crate::state::AppState;
use crate::websocket::handler::websocket_handler;

pub use api::create_api_routes;

/// Assemble the full application router
pub fn create_app(state: Arc<AppState>) -> Router {
    let cors = state.config.cors_layer();

    Router::new()
        // Real-time protocol
        .route("/ws", get(websocket_handler))
        // Health and readiness
        .route("/health", get(health_check))
        .route("/ready", get(ready_check))
        // Mount API routes
        .nest("/api", create_api_routes())
        .with_state(state)
        // Mount Swagger UI
        .merge(SwaggerUi::new("/swagger").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(cors)
        // Add tracing layer
        .layer(TraceLayer::new_for_http())
}
