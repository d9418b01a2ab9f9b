use super::types::{AdminError, AdminRequest};
use super::AdminDispatcher;
use anyhow::Context;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// `POST /admin`
pub fn router(dispatcher: Arc<AdminDispatcher>) -> Router {
    Router::new()
        .route("/admin", post(handle_admin))
        .with_state(dispatcher)
}

pub async fn serve(bind: &str, dispatcher: Arc<AdminDispatcher>) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind {}", bind))?;
    info!(
        "Admin dispatch listening on {} ({} identity)",
        bind,
        dispatcher.provider()
    );
    axum::serve(listener, router(dispatcher))
        .await
        .context("Admin server failed")
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

// Body is parsed by hand so malformed JSON gets the same `{error}` shape
async fn handle_admin(
    State(dispatcher): State<Arc<AdminDispatcher>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<super::AdminReply>, AdminError> {
    let request: AdminRequest = serde_json::from_slice(&body)
        .map_err(|e| AdminError::InvalidRequest(e.to_string()))?;

    dispatcher
        .dispatch(bearer_token(&headers), request)
        .await
        .map(Json)
        .map_err(|e| {
            warn!("Admin request failed: {}", e);
            e
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admin::mock::MockIdentity;
    use crate::gateway::{MemoryGateway, UserStore};
    use crate::models::{Role, User};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    async fn app() -> (Arc<MemoryGateway>, Router) {
        let identity = Arc::new(
            MockIdentity::default()
                .with_account("tok", "a1", "admin@example.com")
                .await,
        );
        let store = Arc::new(MemoryGateway::new());
        let mut admin = User::new("a1", "admin@example.com");
        admin.role = Role::Super;
        store.insert_user(admin).await;
        store.insert_user(User::new("u1", "budi@example.com")).await;

        let dispatcher = Arc::new(AdminDispatcher::new(identity, store.clone()));
        (store, router(dispatcher))
    }

    fn post_admin(token: Option<&str>, body: Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/admin")
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn role_change_returns_message() {
        let (store, app) = app().await;

        let response = app
            .oneshot(post_admin(
                Some("tok"),
                json!({
                    "action": "changeUserRole",
                    "performedBy": "admin@example.com",
                    "userId": "u1",
                    "newRole": "admin"
                }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            json_body(response).await,
            json!({ "message": "User role updated successfully" })
        );
        assert_eq!(store.get_user("u1").await.unwrap().unwrap().role, Role::Admin);
    }

    #[tokio::test]
    async fn missing_token_is_401() {
        let (_, app) = app().await;
        let response = app
            .oneshot(post_admin(
                None,
                json!({ "action": "resetPassword", "email": "budi@example.com" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(json_body(response).await["error"].is_string());
    }

    #[tokio::test]
    async fn malformed_body_is_400() {
        let (_, app) = app().await;
        let response = app
            .oneshot(post_admin(Some("tok"), json!({ "action": "nope" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_user_delete_is_404_and_unlogged() {
        let (store, app) = app().await;
        let response = app
            .oneshot(post_admin(
                Some("tok"),
                json!({ "action": "deleteUser", "userId": "ghost" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(store.logs().await.is_empty());
    }
}
