use super::traits::IdentityAdmin;
use super::types::AdminError;
use crate::settings::AdminSettings;
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

/// Effectively permanent ban
const BAN_DURATION: &str = "876000h";

/// Supabase auth (GoTrue) admin API, called with the service-role key
pub struct GoTrueIdentity {
    client: Client,
    base_url: String,
    service_key: String,
}

#[derive(Debug, Deserialize)]
struct AuthUser {
    id: String,
}

impl GoTrueIdentity {
    pub fn new(client: Client, settings: &AdminSettings) -> Self {
        Self {
            client,
            base_url: settings.identity_url.trim_end_matches('/').to_string(),
            service_key: settings.service_key.clone(),
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}/auth/v1/{}", self.base_url, path))
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
    }
}

/// Human-readable message from a GoTrue error body
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            ["msg", "message", "error_description", "error"]
                .iter()
                .find_map(|key| v.get(*key).and_then(Value::as_str).map(str::to_string))
        })
        .unwrap_or_else(|| body.to_string())
}

async fn check(response: Response) -> Result<Response, AdminError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = error_message(&response.text().await.unwrap_or_default());
    warn!("Identity provider returned status {}: {}", status, message);
    match status {
        StatusCode::NOT_FOUND => Err(AdminError::NotFound(message)),
        _ => Err(AdminError::Provider(format!("{} ({})", message, status.as_u16()))),
    }
}

#[async_trait]
impl IdentityAdmin for GoTrueIdentity {
    async fn verify_token(&self, token: &str) -> Result<String, AdminError> {
        let response = self
            .client
            .get(format!("{}/auth/v1/user", self.base_url))
            .header("apikey", &self.service_key)
            .bearer_auth(token)
            .send()
            .await?;

        if matches!(
            response.status(),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
        ) {
            return Err(AdminError::Unauthorized);
        }
        let user: AuthUser = check(response).await?.json().await?;
        Ok(user.id)
    }

    async fn create_user(&self, email: &str, password: &str) -> Result<String, AdminError> {
        debug!("Creating auth user {}", email);
        let response = self
            .request(Method::POST, "admin/users")
            .json(&json!({
                "email": email,
                "password": password,
                "email_confirm": true,
            }))
            .send()
            .await?;
        let user: AuthUser = check(response).await?.json().await?;
        Ok(user.id)
    }

    async fn delete_user(&self, uid: &str) -> Result<(), AdminError> {
        let response = self
            .request(Method::DELETE, &format!("admin/users/{}", uid))
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn send_password_reset(&self, email: &str) -> Result<(), AdminError> {
        let response = self
            .request(Method::POST, "recover")
            .json(&json!({ "email": email }))
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn set_disabled(&self, uid: &str, disabled: bool) -> Result<(), AdminError> {
        let ban_duration = if disabled { BAN_DURATION } else { "none" };
        let response = self
            .request(Method::PUT, &format!("admin/users/{}", uid))
            .json(&json!({ "ban_duration": ban_duration }))
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    fn provider_name(&self) -> &'static str {
        "gotrue"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_message_prefers_known_keys() {
        assert_eq!(error_message(r#"{"msg":"User not found"}"#), "User not found");
        assert_eq!(
            error_message(r#"{"error":"invalid_grant","error_description":"expired"}"#),
            "expired"
        );
        assert_eq!(error_message("plain text"), "plain text");
    }
}
