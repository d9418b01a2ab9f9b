//! Back-office actions that need elevated credentials.
//!
//! Each request is authenticated against the identity provider, authorized
//! against the caller's stored role, applied to the identity provider and/or
//! the user store, and recorded with exactly one log entry on success.

pub mod client;
pub mod gotrue;
pub mod server;
pub mod traits;
pub mod types;

pub use client::AdminClient;
pub use gotrue::GoTrueIdentity;
pub use server::{router, serve};
pub use traits::IdentityAdmin;
pub use types::{AdminAction, AdminError, AdminReply, AdminRequest};

use crate::gateway::UserStore;
use crate::models::{LogEntry, User};
use std::sync::Arc;
use tracing::{info, warn};
use types::parse_role;

pub struct AdminDispatcher {
    identity: Arc<dyn IdentityAdmin>,
    users: Arc<dyn UserStore>,
}

impl AdminDispatcher {
    pub fn new(identity: Arc<dyn IdentityAdmin>, users: Arc<dyn UserStore>) -> Self {
        Self { identity, users }
    }

    /// Identity provider backing account operations
    pub fn provider(&self) -> &'static str {
        self.identity.provider_name()
    }

    /// Authenticate, authorize, validate and apply one request
    pub async fn dispatch(
        &self,
        bearer: Option<&str>,
        request: AdminRequest,
    ) -> Result<AdminReply, AdminError> {
        let caller = self.authorize(bearer).await?;
        request.action.validate()?;

        let reply = self.execute(&request.action).await?;

        let performed_by = if caller.email.is_empty() {
            request.performed_by.clone()
        } else {
            caller.email.clone()
        };
        let entry = LogEntry::new(request.action.name(), performed_by, request.action.target());
        // The mutation stands even if the append fails
        if let Err(e) = self.users.append_log(&entry).await {
            warn!("Failed to record {} in logs: {}", entry.action, e);
        }

        info!(
            "{} applied {} to {}",
            entry.performed_by, entry.action, entry.target_user
        );
        Ok(reply)
    }

    /// The caller's user record, if they hold an admin role
    async fn authorize(&self, bearer: Option<&str>) -> Result<User, AdminError> {
        let token = bearer
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AdminError::Unauthorized)?;
        let uid = self.identity.verify_token(token).await?;

        match self.users.get_user(&uid).await? {
            Some(user) if user.role.is_admin() && !user.disabled => Ok(user),
            _ => {
                warn!("Rejected admin request from {}", uid);
                Err(AdminError::Forbidden)
            }
        }
    }

    async fn execute(&self, action: &AdminAction) -> Result<AdminReply, AdminError> {
        match action {
            AdminAction::CreateUser {
                email,
                password,
                role,
            } => {
                let role = parse_role(role)?;
                let uid = self.identity.create_user(email, password).await?;
                let mut user = User::new(uid.clone(), email.clone());
                user.role = role;
                self.users.create_user(&user).await?;
                Ok(AdminReply::Created { uid })
            }
            AdminAction::DeleteUser { user_id } => {
                self.identity.delete_user(user_id).await?;
                self.users.delete_user(user_id).await?;
                Ok(AdminReply::done("User deleted successfully"))
            }
            AdminAction::ResetPassword { email } => {
                self.identity.send_password_reset(email).await?;
                Ok(AdminReply::done("Password reset email sent"))
            }
            AdminAction::ToggleUserStatus { user_id, disabled } => {
                let disabled = disabled.ok_or(AdminError::MissingField("disabled"))?;
                self.identity.set_disabled(user_id, disabled).await?;
                self.users.set_disabled(user_id, disabled).await?;
                Ok(AdminReply::done(if disabled {
                    "User disabled successfully"
                } else {
                    "User enabled successfully"
                }))
            }
            AdminAction::ChangeUserRole { user_id, new_role } => {
                let role = parse_role(new_role)?;
                self.users.set_role(user_id, role).await?;
                Ok(AdminReply::done("User role updated successfully"))
            }
        }
    }
}
