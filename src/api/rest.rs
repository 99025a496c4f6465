use axum::extract::State;
use axum::http::{StatusCode, Uri};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::warn;

use crate::domain::event::ChangeEvent;
use crate::domain::resource::ResourceSnapshot;
use crate::domain::service::{CollectiveService, ServiceHealth};

/// Shared application state for all API handlers.
#[derive(Clone)]
pub struct AppState {
    pub collective: Arc<CollectiveService>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/resources/{*path}", get(resource))
        .route("/api/v1/events", post(apply_events))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<ServiceHealth> {
    Json(state.collective.health().await)
}

const RESOURCES_PREFIX: &str = "/api/v1/resources/";

/// Resolve a resource path, fetching from the collective as needed.
///
/// The path is taken undecoded: server tuples carry their slashes as `%2F`.
async fn resource(State(state): State<AppState>, uri: Uri) -> Result<Json<ResourceSnapshot>, (StatusCode, String)> {
    let path = uri.path().strip_prefix(RESOURCES_PREFIX).unwrap_or_default();
    match state.collective.resolve(path).await {
        Ok(Some(snapshot)) => Ok(Json(snapshot)),
        Ok(None) => Err((StatusCode::NOT_FOUND, format!("no resource at '{}'", path))),
        Err(e) => {
            warn!(path = %path, error = %e, "resolve failed");
            Err((StatusCode::BAD_GATEWAY, e.to_string()))
        }
    }
}

/// Accepts one event object or an array of them.
async fn apply_events(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, (StatusCode, String)> {
    let events = ChangeEvent::parse_many(body).map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
    let applied = state.collective.apply_events(&events).await;
    Ok(Json(json!({ "received": events.len(), "applied": applied })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::resolver::MemoryFetcher;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn app() -> Router {
        let fixtures = json!({
            "clusters/c1": {
                "id": "c1",
                "state": "STARTED",
                "servers": {"up": 0, "down": 0, "unknown": 0, "list": []},
                "apps": {"up": 0, "down": 0, "unknown": 0, "partial": 0, "list": []}
            },
            "servers/h1,/wlp/usr,s1": {
                "id": "h1,/wlp/usr,s1",
                "state": "STARTED",
                "wlpInstallDir": "/wlp",
                "apps": {"up": 0, "down": 0, "unknown": 0, "list": []}
            }
        });
        let fetcher = Arc::new(MemoryFetcher::from_json(&fixtures).unwrap());
        router(AppState {
            collective: Arc::new(CollectiveService::new(fetcher)),
        })
    }

    #[tokio::test]
    async fn unknown_resource_is_404() {
        let resp = app()
            .oneshot(Request::get("/api/v1/resources/clusters/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn known_resource_is_served() {
        let resp = app()
            .oneshot(Request::get("/api/v1/resources/clusters/c1").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn encoded_server_tuples_keep_their_slashes() {
        let resp = app()
            .oneshot(
                Request::get("/api/v1/resources/servers/h1,%2Fwlp%2Fusr,s1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn malformed_events_are_rejected() {
        let resp = app()
            .oneshot(
                Request::post("/api/v1/events")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"[{"type": 7}]"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
