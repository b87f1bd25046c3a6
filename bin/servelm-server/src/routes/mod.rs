//! Axum router construction.
//!
//! [`build`] assembles the application router:
//! - health route
//! - OpenAI-compatible `/v1` routes
//! - Swagger UI and OpenAPI document unless `--no-swagger` is set
//! - CORS and per-request trace-id middleware

pub mod doc;
mod health;
mod v1;

use std::sync::Arc;

use axum::{Router, middleware};
use utoipa_swagger_ui::SwaggerUi;

use crate::middleware::{cors, trace};
use crate::state::AppState;

/// Build the complete Axum [`Router`] for the application.
pub fn build(state: Arc<AppState>) -> Router {
    let mut app = Router::new()
        .merge(health::router())
        .nest("/v1", v1::router());

    if state.config.swagger_enabled() {
        app = app.merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", doc::get_docs()));
    }

    app.layer(cors::cors_layer(&state.config))
        .layer(middleware::from_fn(trace::trace_middleware))
        .with_state(state)
}


#[cfg(test)]
mod test {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use servelm_core::testing::FakeEngine;
    use tower::ServiceExt;

    use super::test_support::{app, app_with, get};
    use crate::middleware::trace::X_TRACE_ID;

    #[tokio::test]
    async fn serves_openapi_document_by_default() {
        let (status, body) = get(app(FakeEngine::new()), "/api-docs/openapi.json").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["paths"]["/v1/chat/completions"]["post"].is_object());
        assert!(body["paths"]["/health"]["get"].is_object());
    }

    #[tokio::test]
    async fn swagger_can_be_disabled() {
        let app = app_with(
            FakeEngine::new(),
            servelm_core::AuditLogger::disabled(),
            &["--no-swagger"],
        );
        let (status, _) = get(app, "/api-docs/openapi.json").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn echoes_a_valid_trace_id() {
        let trace_id = "7f1d2c3e-4b5a-4c6d-8e9f-0a1b2c3d4e5f";
        let request = Request::get("/health")
            .header(X_TRACE_ID, trace_id)
            .body(Body::empty())
            .unwrap();
        let response = app(FakeEngine::new()).oneshot(request).await.unwrap();
        assert_eq!(response.headers()[X_TRACE_ID], trace_id);
    }

    #[tokio::test]
    async fn replaces_a_malformed_trace_id() {
        let request = Request::get("/health")
            .header(X_TRACE_ID, "not-a-uuid")
            .body(Body::empty())
            .unwrap();
        let response = app(FakeEngine::new()).oneshot(request).await.unwrap();
        let echoed = response.headers()[X_TRACE_ID].to_str().unwrap();
        assert!(uuid::Uuid::parse_str(echoed).is_ok());
    }
}
