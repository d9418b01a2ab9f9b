use super::types::AdminError;
use async_trait::async_trait;

/// Privileged operations against the identity provider
#[async_trait]
pub trait IdentityAdmin: Send + Sync {
    /// Resolve a caller's bearer token to their uid.
    /// Fails with `AdminError::Unauthorized` for a bad or expired token.
    async fn verify_token(&self, token: &str) -> Result<String, AdminError>;

    /// Create an account, returning the new uid
    async fn create_user(&self, email: &str, password: &str) -> Result<String, AdminError>;

    async fn delete_user(&self, uid: &str) -> Result<(), AdminError>;

    async fn send_password_reset(&self, email: &str) -> Result<(), AdminError>;

    /// Ban or unban the account
    async fn set_disabled(&self, uid: &str, disabled: bool) -> Result<(), AdminError>;

    fn provider_name(&self) -> &'static str;
}
