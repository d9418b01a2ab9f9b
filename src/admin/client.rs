use super::types::{AdminAction, AdminError, AdminReply, AdminRequest};
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, error};

/// Caller side of the admin dispatch endpoint, used by the back-office
pub struct AdminClient {
    client: Client,
    endpoint: String,
    token: String,
    performed_by: String,
}

impl AdminClient {
    pub fn new(
        client: Client,
        endpoint: impl Into<String>,
        token: impl Into<String>,
        performed_by: impl Into<String>,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            token: token.into(),
            performed_by: performed_by.into(),
        }
    }

    pub async fn send(&self, action: AdminAction) -> Result<AdminReply, AdminError> {
        let name = action.name();
        let request = AdminRequest {
            performed_by: self.performed_by.clone(),
            action,
        };
        debug!("Sending {} to {}", name, self.endpoint);

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.token)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if status.is_success() {
            return serde_json::from_str(&body)
                .map_err(|e| AdminError::InvalidRequest(format!("unexpected reply: {}", e)));
        }

        let message = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_else(|| format!("Failed to {}", name));
        error!("Error during {}: {}", name, message);
        Err(AdminError::Rejected {
            status: status.as_u16(),
            message,
        })
    }
}
