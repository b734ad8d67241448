pub mod connect;
pub mod tokens;

use axum::{
    extract::{FromRequestParts, State},
    http::{header::AUTHORIZATION, request::Parts},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_cookies::{Cookie, Cookies};
use tracing::info;

use crate::shared::error::ApiError;
use crate::shared::state::AppState;
use tokens::extract_bearer_token;

pub const SESSION_COOKIE: &str = "session";

/// The authenticated principal: either a signed-in user carried by the
/// session cookie, or a peer service carried by a bearer service token.
#[derive(Debug, Clone, Serialize)]
pub struct CurrentUser {
    pub email: String,
    pub name: String,
    pub profile_name: String,
    /// `None` means the token carried no action list, which grants everything.
    pub actions: Option<Vec<String>>,
    pub is_service: bool,
}

impl CurrentUser {
    pub fn service(issuer: &str) -> Self {
        Self {
            email: format!("{issuer}@service"),
            name: issuer.to_string(),
            profile_name: "Service".to_string(),
            actions: None,
            is_service: true,
        }
    }

    pub fn has_action(&self, action: &str) -> bool {
        let Some(actions) = &self.actions else {
            return true;
        };
        if actions.iter().any(|a| a == action) {
            return true;
        }
        if let Some(mapped) = map_action(action) {
            if actions.iter().any(|a| a == mapped) {
                return true;
            }
        }
        false
    }

    pub fn can_view(&self) -> bool {
        match &self.actions {
            None => true,
            Some(actions) => self.has_action("view") || !actions.is_empty(),
        }
    }

    pub fn can_edit(&self) -> bool {
        self.has_action("edit") || self.has_action("update")
    }

    pub fn can_delete(&self) -> bool {
        self.has_action("delete")
    }

    pub fn require_view(&self) -> Result<(), ApiError> {
        if self.can_view() {
            Ok(())
        } else {
            Err(ApiError::Forbidden("Viewing not permitted".into()))
        }
    }

    pub fn require_edit(&self) -> Result<(), ApiError> {
        if self.can_edit() {
            Ok(())
        } else {
            Err(ApiError::Forbidden("Editing not permitted".into()))
        }
    }

    pub fn require_delete(&self) -> Result<(), ApiError> {
        if self.can_delete() {
            Ok(())
        } else {
            Err(ApiError::Forbidden("Deletion not permitted".into()))
        }
    }
}

/// Connect ships action names in Portuguese; clients may check either form.
fn map_action(action: &str) -> Option<&'static str> {
    match action {
        "view" | "read" => Some("consultar"),
        "edit" | "update" | "write" => Some("editar"),
        "create" | "include" => Some("incluir"),
        "delete" | "remove" => Some("excluir"),
        "admin" => Some("admin"),
        _ => None,
    }
}

#[axum::async_trait]
impl FromRequestParts<Arc<AppState>> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        if let Some(value) = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
        {
            if let Some(token) = extract_bearer_token(value) {
                let claims = state
                    .tokens
                    .verify_service_token(token)
                    .map_err(|e| ApiError::Unauthorized(e.to_string()))?;
                return Ok(CurrentUser::service(&claims.iss));
            }
        }

        let cookies = Cookies::from_request_parts(parts, state)
            .await
            .map_err(|_| ApiError::Unauthorized("Authentication required".into()))?;
        let session = cookies
            .get(SESSION_COOKIE)
            .ok_or_else(|| ApiError::Unauthorized("Authentication required".into()))?;
        let claims = state
            .tokens
            .verify_session_token(session.value())
            .map_err(|e| ApiError::Unauthorized(e.to_string()))?;
        Ok(CurrentUser {
            email: claims.sub,
            name: claims.name,
            profile_name: claims.profile_name.unwrap_or_else(|| "Usuário".to_string()),
            actions: claims.actions,
            is_service: false,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct ConnectLoginRequest {
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub email: String,
    pub name: String,
    pub profile_name: String,
    pub actions: Option<Vec<String>>,
}

pub async fn connect_login(
    State(state): State<Arc<AppState>>,
    cookies: Cookies,
    Json(req): Json<ConnectLoginRequest>,
) -> Result<Json<SessionResponse>, ApiError> {
    let claims = state
        .tokens
        .verify_connect_login_token(&req.token)
        .map_err(|e| ApiError::Unauthorized(e.to_string()))?;

    if claims.user_email.is_empty() {
        return Err(ApiError::Unauthorized("Token carries no user email".into()));
    }

    // An empty action list means Connect sent none, which grants everything.
    let actions = claims.actions.filter(|a| !a.is_empty());

    let session = state
        .tokens
        .issue_session_token(
            &claims.user_email,
            &claims.user_name,
            claims.profile_name.clone(),
            actions.clone(),
        )
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    let mut cookie = Cookie::new(SESSION_COOKIE, session);
    cookie.set_path("/");
    cookie.set_http_only(true);
    cookies.add(cookie);

    info!("User {} signed in via Connect", claims.user_email);
    Ok(Json(SessionResponse {
        email: claims.user_email,
        name: claims.user_name,
        profile_name: claims.profile_name.unwrap_or_else(|| "Usuário".to_string()),
        actions,
    }))
}

pub async fn logout(cookies: Cookies) -> Json<serde_json::Value> {
    let mut cookie = Cookie::new(SESSION_COOKIE, "");
    cookie.set_path("/");
    cookies.remove(cookie);
    Json(serde_json::json!({ "status": "logged_out" }))
}

pub async fn me(user: CurrentUser) -> Json<SessionResponse> {
    Json(SessionResponse {
        email: user.email,
        name: user.name,
        profile_name: user.profile_name,
        actions: user.actions,
    })
}

pub fn configure_auth_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/auth/connect", post(connect_login))
        .route("/api/auth/logout", post(logout))
        .route("/api/auth/me", get(me))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_with_actions(actions: Option<Vec<&str>>) -> CurrentUser {
        CurrentUser {
            email: "ana@example.com".into(),
            name: "Ana Souza".into(),
            profile_name: "Jurídico".into(),
            actions: actions.map(|a| a.into_iter().map(String::from).collect()),
            is_service: false,
        }
    }

    #[test]
    fn test_no_actions_grants_everything() {
        let user = user_with_actions(None);
        assert!(user.can_view());
        assert!(user.can_edit());
        assert!(user.can_delete());
        assert!(user.has_action("anything"));
    }

    #[test]
    fn test_portuguese_actions_match_english_checks() {
        let user = user_with_actions(Some(vec!["editar", "consultar"]));
        assert!(user.can_view());
        assert!(user.can_edit());
        assert!(!user.can_delete());
        assert!(user.has_action("update"));
        assert!(user.has_action("editar"));
    }

    #[test]
    fn test_any_action_implies_view() {
        let user = user_with_actions(Some(vec!["incluir"]));
        assert!(user.can_view());
        assert!(!user.can_edit());
    }

    #[test]
    fn test_delete_requires_explicit_grant() {
        let user = user_with_actions(Some(vec!["excluir"]));
        assert!(user.can_delete());
        let user = user_with_actions(Some(vec!["editar"]));
        assert!(!user.can_delete());
    }

    #[test]
    fn test_service_principal_has_all_permissions() {
        let service = CurrentUser::service("connect");
        assert!(service.is_service);
        assert!(service.can_edit());
        assert!(service.can_delete());
    }
}
