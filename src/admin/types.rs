use crate::gateway::GatewayError;
use crate::models::Role;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One privileged operation, tagged by `action`. String fields default to
/// empty so a missing field surfaces as a validation error, not a parse error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum AdminAction {
    CreateUser {
        #[serde(default)]
        email: String,
        #[serde(default)]
        password: String,
        #[serde(default)]
        role: String,
    },
    DeleteUser {
        #[serde(default)]
        user_id: String,
    },
    ResetPassword {
        #[serde(default)]
        email: String,
    },
    ToggleUserStatus {
        #[serde(default)]
        user_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        disabled: Option<bool>,
    },
    ChangeUserRole {
        #[serde(default)]
        user_id: String,
        #[serde(default)]
        new_role: String,
    },
}

impl AdminAction {
    /// Wire name, also used as the log entry's action
    pub fn name(&self) -> &'static str {
        match self {
            Self::CreateUser { .. } => "createUser",
            Self::DeleteUser { .. } => "deleteUser",
            Self::ResetPassword { .. } => "resetPassword",
            Self::ToggleUserStatus { .. } => "toggleUserStatus",
            Self::ChangeUserRole { .. } => "changeUserRole",
        }
    }

    /// The user the action is aimed at, as recorded in the log
    pub fn target(&self) -> &str {
        match self {
            Self::CreateUser { email, .. } | Self::ResetPassword { email } => email,
            Self::DeleteUser { user_id }
            | Self::ToggleUserStatus { user_id, .. }
            | Self::ChangeUserRole { user_id, .. } => user_id,
        }
    }

    /// Check required fields before anything is sent anywhere
    pub fn validate(&self) -> Result<(), AdminError> {
        fn required(value: &str, field: &'static str) -> Result<(), AdminError> {
            if value.trim().is_empty() {
                return Err(AdminError::MissingField(field));
            }
            Ok(())
        }

        match self {
            Self::CreateUser {
                email,
                password,
                role,
            } => {
                required(email, "email")?;
                required(password, "password")?;
                required(role, "role")?;
                parse_role(role).map(|_| ())
            }
            Self::DeleteUser { user_id } => required(user_id, "userId"),
            Self::ResetPassword { email } => required(email, "email"),
            Self::ToggleUserStatus { user_id, disabled } => {
                required(user_id, "userId")?;
                disabled.map(|_| ()).ok_or(AdminError::MissingField("disabled"))
            }
            Self::ChangeUserRole { user_id, new_role } => {
                required(user_id, "userId")?;
                required(new_role, "newRole")?;
                parse_role(new_role).map(|_| ())
            }
        }
    }
}

pub(crate) fn parse_role(value: &str) -> Result<Role, AdminError> {
    Role::parse(value).ok_or_else(|| AdminError::InvalidRole(value.to_string()))
}

/// Request body: `{action, performedBy, ...payload}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminRequest {
    #[serde(default)]
    pub performed_by: String,
    #[serde(flatten)]
    pub action: AdminAction,
}

/// Success body: `{uid}` for createUser, `{message}` otherwise
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AdminReply {
    Created { uid: String },
    Done { message: String },
}

impl AdminReply {
    pub(crate) fn done(message: impl Into<String>) -> Self {
        Self::Done {
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum AdminError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid role: {0}")]
    InvalidRole(String),

    #[error("Missing or invalid authorization token")]
    Unauthorized,

    #[error("Admin privileges required")]
    Forbidden,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Identity provider error: {0}")]
    Provider(String),

    #[error("Store error: {0}")]
    Store(#[from] GatewayError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success reply seen by [`AdminClient`](super::AdminClient)
    #[error("{message} (status {status})")]
    Rejected { status: u16, message: String },
}

impl AdminError {
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidRequest(_) | Self::MissingField(_) | Self::InvalidRole(_) => 400,
            Self::Unauthorized => 401,
            Self::Forbidden => 403,
            Self::NotFound(_) | Self::Store(GatewayError::NotFound(_)) => 404,
            Self::Provider(_) | Self::Store(_) | Self::Http(_) => 502,
            Self::Rejected { status, .. } => *status,
        }
    }
}
